#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate frameline;

use frameline::protocol::frame::{Decoded, Frame};

fuzz_target!(|data: &[u8]| {
    let (mut frame, status) = Frame::decode(data);
    frame.validate(false);
    if status == Decoded::Complete {
        assert!(frame.len() <= data.len());
        frame.apply_mask();
        let _ = frame.into_close();
    }
});
