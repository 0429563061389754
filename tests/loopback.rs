//! Runs a client against a minimal WebSocket peer on a real TCP socket.

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    process::exit,
    thread::{sleep, spawn},
    time::Duration,
};

use frameline::{
    handshake::derive_accept_key,
    protocol::frame::{coding::OpCode, Decoded, Frame},
    Client, ClientConfig, Connection, Handler, Message,
};

#[derive(Default)]
struct Echo {
    opened: usize,
    closed: usize,
    received: Vec<Message>,
}

impl Handler for Echo {
    fn on_open(&mut self, connection: &mut Connection) {
        self.opened += 1;
        connection.send("ready", false);
    }

    fn on_message(&mut self, connection: &mut Connection, message: Message) {
        self.received.push(message.clone());
        connection.send_message(message);
    }

    fn on_close(&mut self, _: &Connection) {
        self.closed += 1;
    }
}

/// Read from `stream` until one whole frame is available.
fn read_frame(stream: &mut TcpStream, pending: &mut Vec<u8>) -> Frame {
    loop {
        let (mut frame, status) = Frame::decode(&pending[..]);
        if status == Decoded::Complete {
            pending.drain(..frame.len());
            frame.apply_mask();
            return frame;
        }
        let mut chunk = [0u8; 1024];
        let size = stream.read(&mut chunk).unwrap();
        assert!(size > 0, "client hung up early");
        pending.extend_from_slice(&chunk[..size]);
    }
}

/// Accept one client, answer its handshake and run a short exchange.
fn serve(listener: TcpListener) -> (String, Vec<u8>) {
    let (mut stream, _) = listener.accept().unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut pending = Vec::new();
    let head_end = loop {
        let mut chunk = [0u8; 1024];
        let size = stream.read(&mut chunk).unwrap();
        pending.extend_from_slice(&chunk[..size]);
        if let Some(pos) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8(pending.drain(..head_end).collect()).unwrap();
    let key = head
        .lines()
        .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
        .unwrap()
        .trim()
        .to_owned();

    let mut reply = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        derive_accept_key(key.as_bytes())
    )
    .into_bytes();
    // Pipelined right behind the handshake.
    reply.extend_from_slice(&Frame::message("hello", OpCode::Text, true).to_bytes());
    stream.write_all(&reply).unwrap();

    let greeting = read_frame(&mut stream, &mut pending);
    assert_eq!(greeting.payload(), b"ready");

    let echo = read_frame(&mut stream, &mut pending);
    assert_eq!(echo.opcode(), OpCode::Text);
    assert_eq!(echo.payload(), b"hello");

    stream.write_all(&Frame::close(None).to_bytes()).unwrap();
    let close = read_frame(&mut stream, &mut pending);
    assert_eq!(close.opcode(), OpCode::Close);
    (head, close.into_payload())
}

#[test]
fn loopback_exchange() {
    env_logger::try_init().ok();

    spawn(|| {
        sleep(Duration::from_secs(10));
        println!("Unit test executed too long, perhaps stuck on WOULDBLOCK...");
        exit(1);
    });

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = spawn(move || serve(listener));

    let config = ClientConfig::default().verify_accept_key(true);
    let mut client =
        Client::connect(&format!("ws://127.0.0.1:{}/chat", port), config, Echo::default()).unwrap();
    assert!(client.address().starts_with("127.0.0.1:"));
    client.run().unwrap();

    let (head, close_payload) = server.join().unwrap();
    assert!(head.starts_with("GET /chat HTTP/1.1\r\n"));
    assert!(head.contains(&format!("Host: 127.0.0.1:{}\r\n", port)));
    assert_eq!(close_payload, vec![0x03, 0xe8]);

    let handler = client.handler();
    assert_eq!(handler.opened, 1);
    assert_eq!(handler.closed, 1);
    assert_eq!(handler.received, vec![Message::text("hello")]);
    assert!(client.response().is_some());
}
