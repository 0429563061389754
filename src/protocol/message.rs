use std::{fmt, result::Result as StdResult, str};

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

mod string_collect {
    /// Tracks UTF-8 validity of a text message across fragment boundaries.
    ///
    /// A code point split between two fragments is carried over in `incomplete`.
    /// The verdict is only read once the message is complete, so every
    /// fragment is scanned exactly once.
    #[derive(Debug, Default)]
    pub struct Utf8Tracker {
        incomplete: Option<utf8::Incomplete>,
        invalid: bool,
    }

    impl Utf8Tracker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn feed(&mut self, tail: &[u8]) {
            if self.invalid {
                return;
            }
            let mut input = tail;

            if let Some(mut incomplete) = self.incomplete.take() {
                match incomplete.try_complete(input) {
                    Some((Ok(_), rest)) => input = rest,
                    Some((Err(_), _)) => {
                        self.invalid = true;
                        return;
                    }
                    None => {
                        self.incomplete = Some(incomplete);
                        return;
                    }
                }
            }

            if input.is_empty() {
                return;
            }
            match utf8::decode(input) {
                Ok(_) => {}
                Err(utf8::DecodeError::Incomplete { incomplete_suffix, .. }) => {
                    self.incomplete = Some(incomplete_suffix);
                }
                Err(utf8::DecodeError::Invalid { .. }) => self.invalid = true,
            }
        }

        pub fn is_valid(&self) -> bool {
            !self.invalid && self.incomplete.is_none()
        }
    }
}

use self::string_collect::Utf8Tracker;

/// The type of incomplete message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteMessageType {
    /// The first fragment was a text frame.
    Text,
    /// The first fragment was a binary frame.
    Binary,
}

/// A message whose first fragment has arrived but whose final one has not.
#[derive(Debug)]
pub struct IncompleteMessage {
    message_type: IncompleteMessageType,
    parts: Vec<Vec<u8>>,
    len: usize,
    utf8: Utf8Tracker,
}

impl IncompleteMessage {
    /// Create new.
    pub fn new(message_type: IncompleteMessageType) -> Self {
        IncompleteMessage { message_type, parts: Vec::new(), len: 0, utf8: Utf8Tracker::new() }
    }

    /// The kind of message being reassembled.
    pub fn message_type(&self) -> IncompleteMessageType {
        self.message_type
    }

    /// Get the current filled size of the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no payload bytes have been collected yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of fragments collected so far.
    pub fn fragments(&self) -> usize {
        self.parts.len()
    }

    /// Add more data to an existing message.
    pub fn extend(&mut self, tail: Vec<u8>) {
        if self.message_type == IncompleteMessageType::Text {
            self.utf8.feed(&tail);
        }
        self.len += tail.len();
        self.parts.push(tail);
    }

    /// Convert an incomplete message into a complete one.
    ///
    /// Fails with [`Error::Utf8`] if a text message does not form valid UTF-8.
    pub fn complete(self) -> Result<Message> {
        if self.message_type == IncompleteMessageType::Text && !self.utf8.is_valid() {
            return Err(Error::Utf8);
        }
        let mut data = BytesMut::with_capacity(self.len);
        for part in self.parts {
            data.extend_from_slice(&part);
        }
        Ok(Message {
            data: data.freeze(),
            binary: self.message_type == IncompleteMessageType::Binary,
        })
    }
}

/// A complete application message.
///
/// Text messages are guaranteed to hold valid UTF-8 when they come out of a
/// [`Connection`](crate::protocol::Connection).
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Message {
    data: Bytes,
    binary: bool,
}

impl Message {
    /// Create a new text WebSocket message from a stringable.
    pub fn text<S>(string: S) -> Message
    where
        S: Into<String>,
    {
        Message { data: Bytes::from(string.into()), binary: false }
    }

    /// Create a new binary WebSocket message by converting to `Bytes`.
    pub fn binary<B>(bin: B) -> Message
    where
        B: Into<Bytes>,
    {
        Message { data: bin.into(), binary: true }
    }

    /// Build a message from a single, complete frame payload.
    ///
    /// Text payloads are validated here.
    pub fn from_payload(payload: Vec<u8>, binary: bool) -> Result<Message> {
        if !binary {
            str::from_utf8(&payload)?;
        }
        Ok(Message { data: payload.into(), binary })
    }

    /// Indicates whether a message is a text message.
    pub fn is_text(&self) -> bool {
        !self.binary
    }

    /// Indicates whether a message is a binary message.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Get the length of the WebSocket message.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the WebSocket message has no content.
    /// For example, if the other side of the connection sent an empty string.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw message bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the WebSocket and return it as binary data.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Attempt to get a &str from the WebSocket message,
    /// this will try to convert binary data to utf8.
    pub fn to_text(&self) -> Result<&str> {
        Ok(str::from_utf8(&self.data)?)
    }

    /// Decode the message body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> StdResult<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}

impl From<String> for Message {
    #[inline]
    fn from(string: String) -> Self {
        Message::text(string)
    }
}

impl<'s> From<&'s str> for Message {
    #[inline]
    fn from(string: &'s str) -> Self {
        Message::text(string)
    }
}

impl<'b> From<&'b [u8]> for Message {
    #[inline]
    fn from(data: &'b [u8]) -> Self {
        Message::binary(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for Message {
    #[inline]
    fn from(data: Vec<u8>) -> Self {
        Message::binary(data)
    }
}

impl From<Message> for Bytes {
    #[inline]
    fn from(message: Message) -> Self {
        message.into_data()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> StdResult<(), fmt::Error> {
        match self.to_text() {
            Ok(string) if self.is_text() => write!(f, "{}", string),
            _ => write!(f, "Binary Data<length={}>", self.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let t = Message::text("test".to_owned());
        assert_eq!(t.to_string(), "test".to_owned());

        let bin = Message::binary(vec![0, 1, 3, 4, 241]);
        assert_eq!(bin.to_string(), "Binary Data<length=5>".to_owned());
    }

    #[test]
    fn binary_convert() {
        let bin = [6u8, 7, 8, 9, 10, 241];
        let msg = Message::from(&bin[..]);
        assert!(msg.is_binary());
        assert!(msg.to_text().is_err());
    }

    #[test]
    fn text_convert() {
        let s = "kiwotsukete";
        let msg = Message::from(s);
        assert!(msg.is_text());
        assert_eq!(msg.to_text().unwrap(), s);
    }

    #[test]
    fn from_payload_checks_text() {
        assert!(Message::from_payload(b"plain".to_vec(), false).is_ok());
        assert!(matches!(Message::from_payload(vec![0xce, 0xba, 0xff], false), Err(Error::Utf8)));
        assert!(Message::from_payload(vec![0xff], true).unwrap().is_binary());
    }

    #[test]
    fn json_view() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Case {
            id: u32,
            tags: Vec<String>,
        }

        let msg = Message::text(r#"{"id": 7, "tags": ["a", "b"]}"#);
        let case: Case = msg.json().unwrap();
        assert_eq!(case, Case { id: 7, tags: vec!["a".into(), "b".into()] });

        let value: serde_json::Value = msg.json().unwrap();
        assert_eq!(value["id"], 7);

        assert!(Message::text("{not json").json::<serde_json::Value>().is_err());
    }

    #[test]
    fn reassemble_text_split_code_point() {
        // "κόσμε" with the two-byte "ό" split across fragments.
        let text = "κόσμε".as_bytes();
        let mut msg = IncompleteMessage::new(IncompleteMessageType::Text);
        msg.extend(text[..3].to_vec());
        msg.extend(text[3..].to_vec());
        assert_eq!(msg.fragments(), 2);
        assert_eq!(msg.len(), text.len());
        let msg = msg.complete().unwrap();
        assert_eq!(msg.to_text().unwrap(), "κόσμε");
    }

    #[test]
    fn reassemble_text_invalid() {
        let mut msg = IncompleteMessage::new(IncompleteMessageType::Text);
        msg.extend(b"Hel".to_vec());
        msg.extend(vec![0xed, 0xa0, 0x80]);
        msg.extend(b"lo".to_vec());
        assert!(matches!(msg.complete(), Err(Error::Utf8)));

        // A truncated code point at the very end is invalid as well.
        let mut msg = IncompleteMessage::new(IncompleteMessageType::Text);
        msg.extend(b"ok".to_vec());
        msg.extend(vec![0xce]);
        assert!(matches!(msg.complete(), Err(Error::Utf8)));
    }

    #[test]
    fn reassemble_binary() {
        let mut msg = IncompleteMessage::new(IncompleteMessageType::Binary);
        msg.extend(vec![0xff, 0xfe]);
        msg.extend(vec![0x00]);
        let msg = msg.complete().unwrap();
        assert!(msg.is_binary());
        assert_eq!(msg.as_bytes(), &[0xff, 0xfe, 0x00]);
    }
}
