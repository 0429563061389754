//! Generic WebSocket protocol implementation

pub mod frame;
mod message;

pub use self::message::{IncompleteMessage, IncompleteMessageType, Message};

use log::*;

use self::frame::{
    coding::{CloseCode, OpCode},
    CloseFrame, Decoded, Frame,
};
use crate::{
    buffer::{ByteBuffer, Channel, DEFAULT_CHUNK_SIZE},
    error::{Error, ProtocolError},
};

/// Smallest possible frame: two header bytes.
const MIN_FRAME_LEN: usize = 2;

/// Indicates a Client or Server role of the websocket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This socket is a server
    Server,
    /// This socket is a client
    Client,
}

impl Role {
    /// Whether frames coming from the peer must be masked.
    ///
    /// A server MUST close the connection upon receiving a frame that is not
    /// masked. (RFC 6455)
    pub fn requires_masked_input(self) -> bool {
        matches!(self, Role::Server)
    }

    /// Whether frames sent to the peer get masked; always the inverse of
    /// [`Role::requires_masked_input`].
    pub fn masks_output(self) -> bool {
        !self.requires_masked_input()
    }
}

/// The configuration for WebSocket connection.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConfig {
    /// Size of a single read from the transport. The default value is 8 KiB.
    pub read_chunk_size: usize,
    /// The maximum size of an incoming message. `None` means no size limit. The default value is 64 MiB.
    pub max_message_size: Option<usize>,
    /// The maximum size of a single incoming message frame. `None` means no size limit.
    /// The limit is for frame payload NOT including the frame header. The default value is 16 MiB.
    pub max_frame_size: Option<usize>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            read_chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
        }
    }
}

impl WebSocketConfig {
    /// Set [`Self::read_chunk_size`].
    pub fn read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = read_chunk_size;
        self
    }

    /// Set [`Self::max_message_size`].
    pub fn max_message_size(mut self, max_message_size: Option<usize>) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Set [`Self::max_frame_size`].
    pub fn max_frame_size(mut self, max_frame_size: Option<usize>) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// Lifecycle of a connection. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// The opening handshake has not completed yet.
    Connecting,
    /// Messages may flow in both directions.
    Open,
    /// A close frame has been queued; waiting for it to drain.
    Closing,
    /// The transport is gone.
    Closed,
}

impl ConnectionState {
    /// Tell if new application messages may be queued.
    pub fn can_send(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

/// Something the application has to react to after frames were processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A complete message arrived.
    Message(Message),
    /// The connection must be closed with the given code.
    ///
    /// Carries either the code the peer sent or the reason this side gives up.
    Disconnect(CloseCode),
    /// The next frame is only partially buffered.
    Idle,
}

/// A single WebSocket connection: buffers, state and message reassembly.
///
/// The connection never touches the network. Bytes read from the transport
/// are appended to the inbound channel of [`Connection::buffer_mut`] and turned
/// into [`Event`]s by [`Connection::process_frames`]; frames queued by
/// `send`, `close` or automatic pongs accumulate on the outbound channel
/// until the owner writes them out.
#[derive(Debug)]
pub struct Connection {
    role: Role,
    config: WebSocketConfig,
    state: ConnectionState,
    handshake_done: bool,
    /// Inbound bytes needed before the next decode attempt.
    expected_len: usize,
    /// Receive: an incomplete message being processed.
    incomplete: Option<IncompleteMessage>,
    /// A ping was sent and no pong has come back yet.
    pinged: bool,
    buffer: ByteBuffer,
}

impl Connection {
    /// Create a connection in the `Connecting` state.
    pub fn new(role: Role, config: WebSocketConfig) -> Self {
        Connection {
            role,
            config,
            state: ConnectionState::Connecting,
            handshake_done: false,
            expected_len: MIN_FRAME_LEN,
            incomplete: None,
            pinged: false,
            buffer: ByteBuffer::with_chunk_size(config.read_chunk_size),
        }
    }

    /// The role of this endpoint.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The configuration in use.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the opening handshake completed.
    pub fn is_handshake_done(&self) -> bool {
        self.handshake_done
    }

    /// Inbound bytes required before frames are decoded again.
    pub fn expected_len(&self) -> usize {
        self.expected_len
    }

    /// Whether a fragmented message is being reassembled.
    pub fn is_continuation_active(&self) -> bool {
        self.incomplete.is_some()
    }

    /// Whether a ping is waiting for its pong.
    pub fn is_pinged(&self) -> bool {
        self.pinged
    }

    /// Read access to the byte queues.
    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    /// Write access to the byte queues.
    pub fn buffer_mut(&mut self) -> &mut ByteBuffer {
        &mut self.buffer
    }

    /// Number of bytes queued on a channel.
    pub fn buffer_len(&self, channel: Channel) -> usize {
        self.buffer.len(channel)
    }

    /// Move to `next` if that is a step forward. Returns whether the state changed.
    fn transition(&mut self, next: ConnectionState) -> bool {
        if next <= self.state {
            warn!("Ignoring state transition {:?} -> {:?}", self.state, next);
            return false;
        }
        debug!("Connection state {:?} -> {:?}", self.state, next);
        self.state = next;
        true
    }

    /// Record a successful opening handshake.
    ///
    /// The handshake counts as done even if `close` was called while still
    /// connecting; the return value tells whether the state became `Open`.
    pub fn open(&mut self) -> bool {
        self.handshake_done = true;
        if self.state != ConnectionState::Connecting {
            debug!("Handshake done while {:?}", self.state);
            return false;
        }
        self.transition(ConnectionState::Open)
    }

    /// Record that the transport has been torn down.
    pub fn mark_closed(&mut self) -> bool {
        self.transition(ConnectionState::Closed)
    }

    /// Queue a text or binary message.
    ///
    /// Returns `false` without queueing anything once the connection is
    /// closing or closed.
    pub fn send(&mut self, data: impl Into<Vec<u8>>, is_binary: bool) -> bool {
        if !self.state.can_send() {
            warn!("{} (state {:?})", ProtocolError::SendAfterClosing, self.state);
            return false;
        }
        let opcode = if is_binary { OpCode::Binary } else { OpCode::Text };
        self.queue(Frame::encode(data, opcode, self.role.masks_output(), true));
        true
    }

    /// Queue a [`Message`], keeping its text/binary kind.
    pub fn send_message(&mut self, message: Message) -> bool {
        let is_binary = message.is_binary();
        self.send(message.into_data(), is_binary)
    }

    /// Queue a ping and remember that a pong is due.
    pub fn send_ping(&mut self, payload: impl Into<Vec<u8>>) -> bool {
        if !self.state.can_send() {
            warn!("Unable to send ping: connection state {:?}", self.state);
            return false;
        }
        let payload = payload.into();
        if payload.len() > usize::from(frame::MAX_CONTROL_PAYLOAD) {
            warn!("Unable to send ping: payload of {} bytes is too big", payload.len());
            return false;
        }
        self.queue(Frame::encode(payload, OpCode::Ping, self.role.masks_output(), true));
        self.pinged = true;
        true
    }

    /// Start the closing handshake with a normal close code.
    ///
    /// A second call while closing or closed queues nothing.
    pub fn close(&mut self) -> bool {
        if !self.state.can_send() {
            warn!("Connection already closing or closed");
            return false;
        }
        self.start_closing(CloseCode::Normal)
    }

    /// Start the closing handshake with the code carried by a
    /// [`Event::Disconnect`].
    pub fn fail(&mut self, code: CloseCode) -> bool {
        if !self.state.can_send() {
            debug!("Not sending close {}: connection state {:?}", code, self.state);
            return false;
        }
        self.start_closing(code)
    }

    fn start_closing(&mut self, code: CloseCode) -> bool {
        let mut close = Frame::close(Some(CloseFrame { code, reason: "".into() }));
        if self.role.masks_output() {
            close.set_random_mask();
        }
        self.queue(close);
        self.transition(ConnectionState::Closing)
    }

    /// Mask (if this role masks) and append a frame to the outbound channel.
    fn queue(&mut self, mut frame: Frame) {
        trace!("Queueing {} frame of {} bytes", frame.opcode(), frame.payload().len());
        frame.apply_mask();
        self.buffer.append(Channel::Outbound, &frame.to_bytes());
    }

    /// Decode as many buffered frames as possible.
    ///
    /// Returns the events in arrival order. Processing stops after the first
    /// [`Event::Disconnect`] or when the next frame is incomplete, in which
    /// case the last event is [`Event::Idle`] and no further decoding happens
    /// until [`Connection::expected_len`] bytes are buffered.
    pub fn process_frames(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        let require_mask = self.role.requires_masked_input();

        while self.buffer.len(Channel::Inbound) >= self.expected_len {
            let (mut frame, status) = Frame::decode(self.buffer.peek(Channel::Inbound));

            if let Err(err) = frame.check(require_mask) {
                debug!("Invalid frame: {}", err);
                events.push(Event::Disconnect(CloseCode::Protocol));
                break;
            }

            if let Some(max) = self.config.max_frame_size {
                if frame.payload_len() > max as u64 {
                    debug!("Frame of {} bytes exceeds limit of {}", frame.payload_len(), max);
                    events.push(Event::Disconnect(CloseCode::Size));
                    break;
                }
            }

            if status == Decoded::Incomplete {
                self.expected_len = frame.len();
                trace!("Waiting for {} bytes", self.expected_len);
                events.push(Event::Idle);
                break;
            }

            self.expected_len = MIN_FRAME_LEN;
            self.buffer.consume(Channel::Inbound, frame.len());
            frame.apply_mask();
            trace!("Received frame {}", frame);

            if let Some(event) = self.handle_frame(frame) {
                let disconnect = matches!(event, Event::Disconnect(_));
                events.push(event);
                if disconnect {
                    break;
                }
            }
        }

        events
    }

    /// Interpret a complete, valid, unmasked frame.
    fn handle_frame(&mut self, frame: Frame) -> Option<Event> {
        let fin = frame.is_final();
        match frame.opcode() {
            OpCode::Close => {
                let code = match frame.into_close() {
                    Ok(None) => CloseCode::Normal,
                    Ok(Some(close)) => {
                        debug!("Received close frame: {}", close);
                        close.code
                    }
                    Err(Error::Utf8) => CloseCode::Invalid,
                    Err(err) => {
                        debug!("Bad close frame: {}", err);
                        CloseCode::Protocol
                    }
                };
                Some(Event::Disconnect(code))
            }

            OpCode::Ping => {
                // Upon receipt of a Ping frame, an endpoint MUST send a Pong frame in
                // response. (RFC 6455)
                let pong = Frame::encode(frame.into_payload(), OpCode::Pong, self.role.masks_output(), true);
                self.queue(pong);
                None
            }

            OpCode::Pong => {
                if self.pinged {
                    debug!("Received pong");
                    self.pinged = false;
                }
                None
            }

            OpCode::Continuation => {
                let Some(msg) = self.incomplete.as_mut() else {
                    debug!("{}", ProtocolError::UnexpectedContinueFrame);
                    return Some(Event::Disconnect(CloseCode::Protocol));
                };
                if let Some(max) = self.config.max_message_size {
                    if msg.len() + frame.payload().len() > max {
                        debug!("Message exceeds limit of {} bytes", max);
                        return Some(Event::Disconnect(CloseCode::Size));
                    }
                }
                msg.extend(frame.into_payload());
                if !fin {
                    return None;
                }
                let msg = self.incomplete.take()?;
                match msg.complete() {
                    Ok(message) => Some(Event::Message(message)),
                    Err(_) => Some(Event::Disconnect(CloseCode::Invalid)),
                }
            }

            opcode @ (OpCode::Text | OpCode::Binary) => {
                if self.incomplete.is_some() {
                    debug!("{}", ProtocolError::ExpectedFragment(opcode));
                    return Some(Event::Disconnect(CloseCode::Protocol));
                }
                if let Some(max) = self.config.max_message_size {
                    if frame.payload().len() > max {
                        debug!("Message exceeds limit of {} bytes", max);
                        return Some(Event::Disconnect(CloseCode::Size));
                    }
                }
                let binary = opcode == OpCode::Binary;
                if !fin {
                    let mut msg = IncompleteMessage::new(if binary {
                        IncompleteMessageType::Binary
                    } else {
                        IncompleteMessageType::Text
                    });
                    msg.extend(frame.into_payload());
                    self.incomplete = Some(msg);
                    return None;
                }
                match Message::from_payload(frame.into_payload(), binary) {
                    Ok(message) => Some(Event::Message(message)),
                    Err(_) => Some(Event::Disconnect(CloseCode::Invalid)),
                }
            }

            OpCode::Unknown(i) => {
                debug!("Unknown opcode {}", i);
                Some(Event::Disconnect(CloseCode::Protocol))
            }
        }
    }
}
