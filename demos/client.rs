use std::env;

use log::*;

use frameline::{Client, ClientConfig, Connection, Handler, Message};

/// Greets the server, prints what comes back and hangs up after three messages.
struct Chatty {
    received: usize,
}

impl Handler for Chatty {
    fn on_open(&mut self, connection: &mut Connection) {
        connection.send("Hello WebSocket", false);
        connection.send_ping(b"are you there".to_vec());
    }

    fn on_message(&mut self, connection: &mut Connection, message: Message) {
        println!("Received: {}", message);
        self.received += 1;
        if self.received >= 3 {
            connection.close();
        }
    }

    fn on_close(&mut self, connection: &Connection) {
        info!("Closed after {} messages ({:?})", self.received, connection.state());
    }
}

fn main() {
    env_logger::init();

    let address = env::args().nth(1).unwrap_or_else(|| "ws://127.0.0.1:9001/".into());
    let config = match ClientConfig::from_options(env::vars().filter_map(|(name, value)| {
        name.strip_prefix("FRAMELINE_").map(|option| (option.to_owned(), value))
    })) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return;
        }
    };

    match Client::connect(&address, config, Chatty { received: 0 }) {
        Ok(mut client) => {
            if let Err(err) = client.run() {
                error!("{}", err);
            }
        }
        Err(err) => error!("Can't connect to {}: {}", address, err),
    }
}
