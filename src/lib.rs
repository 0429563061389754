//! A WebSocket (RFC 6455) protocol engine and blocking client.
//!
//! The [`protocol::Connection`] turns raw bytes into messages and back and
//! never touches the network itself. [`Client`] drives one connection over a
//! [`stream::Transport`], performing the opening handshake and then calling a
//! [`Handler`] for every message until the connection closes.
#![deny(
    missing_docs,
    missing_copy_implementations,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_must_use,
    unused_mut,
    unused_imports,
    unused_import_braces
)]

pub use http;

pub mod buffer;
pub mod client;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod readiness;
pub mod stream;
pub mod util;

pub use crate::{
    buffer::{ByteBuffer, Channel},
    client::{Client, ClientConfig, Handler},
    error::{Error, Result},
    protocol::{frame::coding::CloseCode, Connection, ConnectionState, Event, Message, Role},
    stream::{TcpTransport, Transport},
};
