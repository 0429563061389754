#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate frameline;

use frameline::{
    protocol::{Event, WebSocketConfig},
    Channel, Connection, Role,
};

fuzz_target!(|data: &[u8]| {
    let config = WebSocketConfig::default().max_message_size(Some(1 << 20)).max_frame_size(Some(1 << 20));
    let mut connection = Connection::new(Role::Client, config);
    connection.open();

    // Feed in uneven pieces to exercise partial frames.
    for piece in data.chunks(7) {
        connection.buffer_mut().append(Channel::Inbound, piece);
        let events = connection.process_frames();
        if let Some(Event::Disconnect(code)) = events.last() {
            connection.fail(*code);
            break;
        }
    }
});
