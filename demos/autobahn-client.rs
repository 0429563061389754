use std::{env, process::exit};

use log::*;

use frameline::{Client, ClientConfig, Connection, Handler, Message, Result};

const AGENT: &str = "Frameline";
const SERVER: &str = "ws://127.0.0.1:9001";
const DEFAULT_CASE_COUNT: u32 = 517;

/// Sends every message straight back.
struct Echo;

impl Handler for Echo {
    fn on_message(&mut self, connection: &mut Connection, message: Message) {
        connection.send_message(message);
    }
}

fn run(path: &str, config: ClientConfig) -> Result<()> {
    let mut client = Client::connect(&format!("{}{}", SERVER, path), config, Echo)?;
    client.run()
}

fn case_config() -> Result<ClientConfig> {
    ClientConfig::from_options([
        ("HANDSHAKE_TIMEOUT", "1"),
        ("BUFFER_SIZE", "8192"),
        ("LOG_LEVEL", "error"),
    ])
}

fn update_reports() -> Result<()> {
    run(&format!("/updateReports?agent={}", AGENT), ClientConfig::default())
}

fn usage() -> ! {
    eprintln!(
        "Missing command parameter\n\
         Available commands:\n\
         \t--run-all [count] - runs all tests\n\
         \t--run-case <case-number> - runs specified case\n\
         \t\t--run-case 9.1.6"
    );
    exit(2)
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("--run-all") => {
            let total = match args.get(1).map(|n| n.parse::<u32>()) {
                Some(Ok(total)) => total,
                Some(Err(_)) => usage(),
                None => DEFAULT_CASE_COUNT,
            };
            case_config().and_then(|config| {
                for case in 1..=total {
                    info!("Running test case {}", case);
                    let path = format!("/runCase?case={}&agent={}", case, AGENT);
                    if let Err(err) = run(&path, config.clone()) {
                        warn!("test {}: {}", case, err);
                    }
                }
                Ok(())
            })
        }
        Some("--run-case") => match args.get(1) {
            Some(case) => {
                let path = format!("/runCase?casetuple={}&agent={}", case, AGENT);
                run(&path, ClientConfig::default())
            }
            None => usage(),
        },
        _ => usage(),
    };

    if let Err(err) = result.and_then(|_| update_reports()) {
        error!("{}", err);
        exit(1);
    }
}
