//! Methods to connect to a WebSocket as a client.

use std::{io, time::Duration};

use log::{Level, LevelFilter};

use crate::{
    buffer::{Channel, DEFAULT_CHUNK_SIZE},
    error::{Error, ProtocolError, Result},
    handshake::client::{ClientHandshake, Request, Response},
    protocol::{Connection, ConnectionState, Event, Message, Role, WebSocketConfig},
    readiness::{self, Ready, WaitMode},
    stream::{TcpTransport, Transport},
    util::NonBlockingResult,
};

/// Log through the `log` facade, unless the client's own threshold is lower.
macro_rules! client_log {
    ($config:expr, $lvl:expr, $($arg:tt)+) => {
        if $lvl <= $config.log_level {
            log::log!($lvl, $($arg)+);
        }
    };
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Most verbose level the client logs at. The default is `Info`.
    pub log_level: LevelFilter,
    /// Bytes read from the transport at a time. The default is 8 KiB.
    pub buffer_size: usize,
    /// How long a single connection attempt may take. The default is 10 seconds.
    pub connect_timeout: Duration,
    /// Deadline for the opening handshake, counted from connection
    /// establishment. The default is 2 seconds.
    pub handshake_timeout: Duration,
    /// Literal header lines added to the upgrade request.
    pub additional_headers: Vec<String>,
    /// The maximum size of an incoming message or frame. `None` means no size
    /// limit. The default value is 64 MiB.
    pub max_message_size: Option<usize>,
    /// Bound for a single wait while outgoing data is pending. `None`, the
    /// default, waits indefinitely.
    pub flush_timeout: Option<Duration>,
    /// Check `Sec-WebSocket-Accept` against the key that was sent. Off by
    /// default: only the presence of the header is required.
    pub verify_accept_key: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            log_level: LevelFilter::Info,
            buffer_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(2),
            additional_headers: Vec::new(),
            max_message_size: Some(64 << 20),
            flush_timeout: None,
            verify_accept_key: false,
        }
    }
}

fn invalid(option: &str, reason: impl ToString) -> Error {
    Error::Config { option: option.to_owned(), reason: reason.to_string() }
}

fn parse_seconds(option: &str, value: &str) -> Result<Duration> {
    let secs: f64 = value.trim().parse().map_err(|err| invalid(option, err))?;
    Duration::try_from_secs_f64(secs).map_err(|err| invalid(option, err))
}

fn is_none(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("none")
}

impl ClientConfig {
    /// Build a configuration from named options, starting from the defaults.
    ///
    /// Names are matched case-insensitively: `LOG_LEVEL`, `BUFFER_SIZE`,
    /// `CONNECT_TIMEOUT` and `HANDSHAKE_TIMEOUT` (seconds, fractions allowed),
    /// `ADDITIONAL_HEADERS` (one header per line), `MAX_MESSAGE_SIZE` and
    /// `FLUSH_TIMEOUT` (`none` lifts the limit) and `VERIFY_ACCEPT_KEY`.
    pub fn from_options<I, K, V>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = ClientConfig::default();
        for (name, value) in options {
            let (name, value) = (name.as_ref(), value.as_ref());
            match name.to_ascii_uppercase().as_str() {
                "LOG_LEVEL" => {
                    config.log_level = value.trim().parse().map_err(|err| invalid(name, err))?;
                }
                "BUFFER_SIZE" => {
                    let size: usize = value.trim().parse().map_err(|err| invalid(name, err))?;
                    if size == 0 {
                        return Err(invalid(name, "must be greater than zero"));
                    }
                    config.buffer_size = size;
                }
                "CONNECT_TIMEOUT" => config.connect_timeout = parse_seconds(name, value)?,
                "HANDSHAKE_TIMEOUT" => config.handshake_timeout = parse_seconds(name, value)?,
                "ADDITIONAL_HEADERS" => {
                    config.additional_headers.extend(
                        value.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_owned),
                    );
                }
                "MAX_MESSAGE_SIZE" => {
                    config.max_message_size = if is_none(value) {
                        None
                    } else {
                        Some(value.trim().parse().map_err(|err| invalid(name, err))?)
                    };
                }
                "FLUSH_TIMEOUT" => {
                    config.flush_timeout =
                        if is_none(value) { None } else { Some(parse_seconds(name, value)?) };
                }
                "VERIFY_ACCEPT_KEY" => {
                    config.verify_accept_key = match value.trim().to_ascii_lowercase().as_str() {
                        "1" | "true" | "yes" | "on" => true,
                        "0" | "false" | "no" | "off" => false,
                        other => return Err(invalid(name, format!("not a boolean: {:?}", other))),
                    };
                }
                _ => return Err(invalid(name, "unknown option")),
            }
        }
        Ok(config)
    }

    /// Set [`Self::log_level`].
    pub fn log_level(mut self, log_level: LevelFilter) -> Self {
        self.log_level = log_level;
        self
    }

    /// Set [`Self::buffer_size`].
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set [`Self::connect_timeout`].
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Set [`Self::handshake_timeout`].
    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Append to [`Self::additional_headers`].
    pub fn additional_header(mut self, line: impl Into<String>) -> Self {
        self.additional_headers.push(line.into());
        self
    }

    /// Set [`Self::max_message_size`].
    pub fn max_message_size(mut self, max_message_size: Option<usize>) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Set [`Self::flush_timeout`].
    pub fn flush_timeout(mut self, flush_timeout: Option<Duration>) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    /// Set [`Self::verify_accept_key`].
    pub fn verify_accept_key(mut self, verify_accept_key: bool) -> Self {
        self.verify_accept_key = verify_accept_key;
        self
    }

    /// Protocol settings derived from this configuration.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .read_chunk_size(self.buffer_size)
            .max_message_size(self.max_message_size)
            .max_frame_size(self.max_message_size)
    }
}

/// Application callbacks.
///
/// Every method has an empty default. The connection handed in may be used
/// to queue replies; they are written out by the run loop.
pub trait Handler {
    /// The opening handshake succeeded. Called at most once, and not at all
    /// if the client was closed before the server answered.
    fn on_open(&mut self, _connection: &mut Connection) {}

    /// A complete message arrived.
    fn on_message(&mut self, _connection: &mut Connection, _message: Message) {}

    /// The transport has been torn down. Called once for every run whose
    /// handshake completed.
    fn on_close(&mut self, _connection: &Connection) {}
}

/// A WebSocket client bound to one transport.
///
/// [`Client::run`] performs the opening handshake, then services the
/// transport until the connection is closed, calling back into `H`.
#[derive(Debug)]
pub struct Client<T, H> {
    transport: T,
    connection: Connection,
    handshake: ClientHandshake,
    response: Option<Response>,
    config: ClientConfig,
    handler: H,
}

impl<H: Handler> Client<TcpTransport, H> {
    /// Connect over TCP to `address` (see [`Request::parse`]).
    pub fn connect(address: &str, config: ClientConfig, handler: H) -> Result<Self> {
        let request = Request::parse(address)?;
        let transport = match TcpTransport::connect(
            request.mode(),
            request.host(),
            request.port(),
            config.connect_timeout,
        ) {
            Ok(transport) => transport,
            Err(err) => {
                client_log!(config, Level::Error, "Unable to connect to {}: {}", request, err);
                return Err(err);
            }
        };
        client_log!(config, Level::Info, "Connected to {} from {}", request, transport.address());
        Ok(Client::new(transport, request, config, handler))
    }
}

impl<T: Transport, H: Handler> Client<T, H> {
    /// Wrap an established transport.
    ///
    /// The upgrade request, including [`ClientConfig::additional_headers`],
    /// is queued right away.
    pub fn new(transport: T, request: Request, config: ClientConfig, handler: H) -> Self {
        let request = request.with_headers(config.additional_headers.iter().cloned());
        let handshake = ClientHandshake::new(request).verify_accept_key(config.verify_accept_key);
        let mut connection = Connection::new(Role::Client, config.websocket_config());
        connection.buffer_mut().append(Channel::Outbound, &handshake.request_bytes());
        Client { transport, connection, handshake, response: None, config, handler }
    }

    /// Run the handshake and then the message loop until the connection ends.
    ///
    /// Returns `Err` if the handshake is rejected, times out or the
    /// transport fails before it completes; `on_close` is not called then.
    pub fn run(&mut self) -> Result<()> {
        if !self.transport.is_alive() {
            return Err(Error::AlreadyClosed);
        }
        if let Err(err) = self.run_handshake() {
            client_log!(self.config, Level::Error, "Handshake failed: {}", err);
            self.transport.close();
            return Err(err);
        }
        self.run_messages();
        Ok(())
    }

    fn run_handshake(&mut self) -> Result<()> {
        while self.transport.is_alive() && !self.connection.is_handshake_done() {
            let remaining = self.config.handshake_timeout.saturating_sub(self.transport.lifetime());
            if remaining.is_zero() {
                return Err(Error::HandshakeTimeout);
            }
            let mode = WaitMode::for_pending(self.connection.buffer_len(Channel::Outbound));
            for ready in readiness::wait(&mut self.transport, mode, Some(remaining)) {
                match ready {
                    Ready::Error(err) => return Err(Error::Io(err)),
                    Ready::Read => {
                        if self.read_chunk()? == Some(0) {
                            return Err(Error::Protocol(ProtocolError::HandshakeIncomplete));
                        }
                        self.try_finish_handshake()?;
                    }
                    Ready::Write => self.flush()?,
                }
            }
        }
        if self.connection.is_handshake_done() {
            Ok(())
        } else {
            Err(Error::AlreadyClosed)
        }
    }

    fn try_finish_handshake(&mut self) -> Result<()> {
        let inbound = self.connection.buffer().peek(Channel::Inbound);
        let Some((size, response)) = self.handshake.try_response(inbound)? else {
            return Ok(());
        };
        self.connection.buffer_mut().consume(Channel::Inbound, size);
        self.response = Some(response);
        client_log!(self.config, Level::Debug, "Handshake with {} done", self.handshake.request());
        if !self.connection.open() {
            // Closed before the server answered: nothing is delivered.
            self.connection.buffer_mut().clear(Channel::Inbound);
            return Ok(());
        }
        self.handler.on_open(&mut self.connection);

        // Frames may have arrived together with the response.
        let events = self.connection.process_frames();
        self.dispatch(events);
        Ok(())
    }

    fn run_messages(&mut self) {
        let mut disconnect = false;
        while self.transport.is_alive() && !disconnect {
            let pending = self.connection.buffer_len(Channel::Outbound);
            let timeout = if pending > 0 { self.config.flush_timeout } else { None };
            for ready in readiness::wait(&mut self.transport, WaitMode::for_pending(pending), timeout) {
                match ready {
                    Ready::Error(err) => {
                        client_log!(self.config, Level::Warn, "Transport failed: {}", err);
                        disconnect = true;
                    }
                    Ready::Read => match self.read_chunk() {
                        Ok(Some(0)) => {
                            client_log!(self.config, Level::Debug, "Peer closed the stream");
                            disconnect = true;
                        }
                        Ok(Some(_)) if self.connection.state() == ConnectionState::Closing => {
                            let discarded = self.connection.buffer_len(Channel::Inbound);
                            self.connection.buffer_mut().clear(Channel::Inbound);
                            client_log!(self.config, Level::Trace, "Discarded {} bytes while closing", discarded);
                        }
                        Ok(Some(_)) => {
                            let events = self.connection.process_frames();
                            self.dispatch(events);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            client_log!(self.config, Level::Warn, "Read failed: {}", err);
                            disconnect = true;
                        }
                    },
                    Ready::Write => {
                        if let Err(err) = self.flush() {
                            client_log!(self.config, Level::Warn, "Write failed: {}", err);
                            disconnect = true;
                        } else if self.connection.state() == ConnectionState::Closing
                            && self.connection.buffer().is_empty(Channel::Outbound)
                        {
                            disconnect = true;
                        }
                    }
                }
                if disconnect {
                    break;
                }
            }
        }

        self.transport.close();
        self.connection.mark_closed();
        client_log!(self.config, Level::Info, "Disconnected from {}", self.handshake.request());
        self.handler.on_close(&self.connection);
    }

    fn dispatch(&mut self, events: Vec<Event>) {
        for event in events {
            match event {
                Event::Message(message) => {
                    client_log!(self.config, Level::Trace, "Received message: {}", message);
                    self.handler.on_message(&mut self.connection, message);
                }
                Event::Disconnect(code) => {
                    client_log!(self.config, Level::Debug, "Disconnecting with code {}", code);
                    self.connection.fail(code);
                }
                Event::Idle => {}
            }
        }
    }

    /// Read one chunk into the inbound buffer. `None` means nothing was available.
    fn read_chunk(&mut self) -> io::Result<Option<usize>> {
        self.connection.buffer_mut().read_from(&mut self.transport).no_block()
    }

    /// Write as much pending output as the transport takes.
    fn flush(&mut self) -> io::Result<()> {
        let pending = self.connection.buffer().peek(Channel::Outbound);
        if pending.is_empty() {
            return Ok(());
        }
        if let Some(written) = self.transport.write(pending).no_block()? {
            self.connection.buffer_mut().consume(Channel::Outbound, written);
            client_log!(self.config, Level::Trace, "Wrote {} bytes", written);
        }
        Ok(())
    }

    /// Queue a text or binary message. See [`Connection::send`].
    pub fn send(&mut self, data: impl Into<Vec<u8>>, is_binary: bool) -> bool {
        self.connection.send(data, is_binary)
    }

    /// Queue a ping. See [`Connection::send_ping`].
    pub fn send_ping(&mut self, payload: impl Into<Vec<u8>>) -> bool {
        self.connection.send_ping(payload)
    }

    /// Start the closing handshake. See [`Connection::close`].
    pub fn close(&mut self) -> bool {
        self.connection.close()
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// The protocol engine.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Mutable access to the protocol engine.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Bytes queued on a channel.
    pub fn buffer_len(&self, channel: Channel) -> usize {
        self.connection.buffer_len(channel)
    }

    /// Local address of the transport.
    pub fn address(&self) -> String {
        self.transport.address()
    }

    /// Time since the transport connected.
    pub fn lifetime(&self) -> Duration {
        self.transport.lifetime()
    }

    /// The server's handshake response, once received.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// The configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The application callbacks.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the application callbacks.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Returns a shared reference to the inner transport.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Returns a mutable reference to the inner transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
