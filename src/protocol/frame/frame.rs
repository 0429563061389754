use std::{borrow::Cow, fmt};

use bytes::BufMut;
use log::*;

use super::{
    coding::{CloseCode, OpCode},
    mask::{apply_mask, generate_mask},
};
use crate::error::{Error, ProtocolError, Result};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u8 = 125;

/// A struct representing the close command.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CloseFrame<'t> {
    /// The reason as a code.
    pub code: CloseCode,
    /// The reason as text string.
    pub reason: Cow<'t, str>,
}

impl fmt::Display for CloseFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.code)
    }
}

/// Whether a decoded frame has all of its declared bytes available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Header and the whole payload are present; the frame may be consumed.
    Complete,
    /// More bytes are needed; retry once `Frame::len()` bytes are buffered.
    Incomplete,
}

/// The first bytes of a WebSocket frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Indicates that the frame is the last one of a possibly fragmented message.
    pub is_final: bool,
    /// The three reserved bits (RSV1..RSV3), shifted down. Must be zero.
    pub rsv: u8,
    /// WebSocket protocol opcode.
    pub opcode: OpCode,
    /// A frame mask, if any.
    pub mask: Option<[u8; 4]>,
}

impl Default for FrameHeader {
    fn default() -> Self {
        FrameHeader { is_final: true, rsv: 0, opcode: OpCode::Close, mask: None }
    }
}

/// A struct representing a WebSocket frame.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    header: FrameHeader,
    /// The MASK bit; known before the key itself has arrived.
    masked: bool,
    /// The 7-bit length field exactly as found on the wire.
    length_code: u8,
    /// Declared payload length (the extended length when `length_code` is 126/127).
    payload_len: u64,
    /// Header size implied by the first two bytes: base, extended length and key.
    header_len: usize,
    payload: Vec<u8>,
}

impl Frame {
    /// Decode a frame from the front of `buf`.
    ///
    /// Decoding never fails: if `buf` ends at any field boundary the header
    /// fields read so far are returned together with [`Decoded::Incomplete`]
    /// and [`Frame::len`] tells how many bytes to wait for. The payload is
    /// only copied out once the frame is complete.
    pub fn decode(buf: &[u8]) -> (Frame, Decoded) {
        let mut frame = Frame { header_len: 2, ..Frame::default() };
        if buf.len() < 2 {
            return (frame, Decoded::Incomplete);
        }

        let first = buf[0];
        let second = buf[1];
        trace!("First: {:b}", first);
        trace!("Second: {:b}", second);

        frame.header.is_final = first & 0x80 != 0;
        frame.header.rsv = (first & 0x70) >> 4;
        frame.header.opcode = OpCode::from(first & 0x0F);

        let masked = second & 0x80 != 0;
        frame.masked = masked;
        frame.length_code = second & 0x7F;

        let length_bytes = match frame.length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        frame.header_len = 2 + length_bytes + if masked { 4 } else { 0 };

        frame.payload_len = match frame.length_code {
            126 if buf.len() >= 4 => u64::from(u16::from_be_bytes([buf[2], buf[3]])),
            127 if buf.len() >= 10 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                u64::from_be_bytes(raw)
            }
            126 | 127 => 0,
            len => u64::from(len),
        };

        if buf.len() < frame.header_len {
            return (frame, Decoded::Incomplete);
        }

        if masked {
            let start = 2 + length_bytes;
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[start..start + 4]);
            frame.header.mask = Some(key);
        }
        trace!("Payload length: {}", frame.payload_len);

        let available = (buf.len() - frame.header_len) as u64;
        if available < frame.payload_len {
            return (frame, Decoded::Incomplete);
        }

        // `payload_len <= available`, so it fits into usize.
        let end = frame.header_len + frame.payload_len as usize;
        frame.payload = buf[frame.header_len..end].to_vec();
        (frame, Decoded::Complete)
    }

    /// Build a frame ready to be serialized.
    ///
    /// The 7-bit length field is chosen from the payload size and, when
    /// `mask` is set, a fresh random key is attached. The payload is *not*
    /// masked yet; call [`Frame::apply_mask`] before formatting.
    pub fn encode(payload: impl Into<Vec<u8>>, opcode: OpCode, mask: bool, is_final: bool) -> Frame {
        let payload = payload.into();
        let payload_len = payload.len() as u64;
        let (length_code, length_bytes) = match payload.len() {
            len if len < 126 => (len as u8, 0),
            len if len < 65536 => (126, 2),
            _ => (127, 8),
        };
        let mask = if mask { Some(generate_mask()) } else { None };
        let header_len = 2 + length_bytes + if mask.is_some() { 4 } else { 0 };

        Frame {
            header: FrameHeader { is_final, rsv: 0, opcode, mask },
            masked: mask.is_some(),
            length_code,
            payload_len,
            header_len,
            payload,
        }
    }

    /// Create a new data frame.
    #[inline]
    pub fn message(data: impl Into<Vec<u8>>, opcode: OpCode, is_final: bool) -> Frame {
        debug_assert!(opcode.is_data(), "Invalid opcode for data frame.");
        Frame::encode(data, opcode, false, is_final)
    }

    /// Create a new Pong control frame.
    #[inline]
    pub fn pong(data: impl Into<Vec<u8>>) -> Frame {
        Frame::encode(data, OpCode::Pong, false, true)
    }

    /// Create a new Ping control frame.
    #[inline]
    pub fn ping(data: impl Into<Vec<u8>>) -> Frame {
        Frame::encode(data, OpCode::Ping, false, true)
    }

    /// Create a new Close control frame.
    #[inline]
    pub fn close(msg: Option<CloseFrame>) -> Frame {
        let payload = if let Some(CloseFrame { code, reason }) = msg {
            let mut p = Vec::with_capacity(reason.len() + 2);
            p.extend(u16::from(code).to_be_bytes());
            p.extend_from_slice(reason.as_bytes());
            p
        } else {
            Vec::new()
        };
        Frame::encode(payload, OpCode::Close, false, true)
    }

    /// Attach a fresh random mask to this frame.
    ///
    /// Only the key is stored; the payload is left untouched.
    pub fn set_random_mask(&mut self) -> &mut Frame {
        if self.header.mask.is_none() {
            self.header_len += 4;
        }
        self.header.mask = Some(generate_mask());
        self.masked = true;
        self
    }

    /// XOR the payload with the masking key.
    ///
    /// Does nothing for unmasked frames. The same call masks and unmasks.
    pub fn apply_mask(&mut self) -> &mut Frame {
        if let Some(mask) = self.header.mask {
            apply_mask(&mut self.payload, mask);
        }
        self
    }

    /// Check the frame against RFC 6455 framing rules.
    ///
    /// Only header fields are inspected, so this works on incomplete frames too.
    pub fn check(&self, require_mask: bool) -> Result<(), ProtocolError> {
        // MUST be 0 unless an extension is negotiated that defines meanings
        // for non-zero values.
        if self.header.rsv != 0 {
            return Err(ProtocolError::NonZeroReservedBits);
        }
        if require_mask && !self.masked {
            return Err(ProtocolError::UnmaskedFrame);
        }
        if let OpCode::Unknown(i) = self.header.opcode {
            return Err(ProtocolError::InvalidOpcode(i));
        }
        // All control frames MUST have a payload length of 125 bytes or less
        // and MUST NOT be fragmented. (RFC 6455)
        if self.header.opcode.is_control() {
            if !self.header.is_final {
                return Err(ProtocolError::FragmentedControlFrame);
            }
            if self.length_code > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::ControlFrameTooBig);
            }
        }
        Ok(())
    }

    /// Same as [`Frame::check`], reduced to a verdict.
    #[inline]
    pub fn validate(&self, require_mask: bool) -> bool {
        self.check(require_mask).is_ok()
    }

    /// Get the length of the frame on the wire.
    ///
    /// This is the length of the header + the declared length of the payload.
    /// For an incomplete frame whose extended length has not arrived yet it
    /// is the header length alone.
    #[inline]
    pub fn len(&self) -> usize {
        usize::try_from(self.payload_len)
            .ok()
            .and_then(|len| len.checked_add(self.header_len))
            .unwrap_or(usize::MAX)
    }

    /// Check if the frame is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a reference to the frame's header.
    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Test whether the frame is a final frame.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.header.is_final
    }

    /// Get the OpCode of the frame.
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.header.opcode
    }

    /// Test whether the frame is masked.
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.masked
    }

    /// The 7-bit payload length field.
    #[inline]
    pub fn length_code(&self) -> u8 {
        self.length_code
    }

    /// The declared payload length.
    #[inline]
    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    /// Get a reference to the frame's payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame into its payload as binary.
    #[inline]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Consume the frame into a closing frame.
    ///
    /// An empty payload means no code was given. A single byte, a code from
    /// the disallowed set or a reason that is not UTF-8 are errors.
    pub fn into_close(self) -> Result<Option<CloseFrame<'static>>> {
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(Error::Protocol(ProtocolError::InvalidCloseSequence)),
            _ => {
                let mut data = self.payload;
                let code = CloseCode::from(u16::from_be_bytes([data[0], data[1]]));
                if !code.is_allowed() {
                    return Err(Error::Protocol(ProtocolError::InvalidCloseCode(code)));
                }
                data.drain(0..2);
                let text = String::from_utf8(data)?;
                Ok(Some(CloseFrame { code, reason: text.into() }))
            }
        }
    }

    /// Write the exact wire representation of the frame into `buf`.
    pub fn format(&self, buf: &mut impl BufMut) {
        let mut one: u8 = self.header.opcode.into();
        if self.header.is_final {
            one |= 0x80;
        }
        one |= (self.header.rsv & 0x07) << 4;

        let mut two = self.length_code;
        if self.masked {
            two |= 0x80;
        }

        buf.put_u8(one);
        buf.put_u8(two);
        match self.length_code {
            126 => buf.put_u16(self.payload_len as u16),
            127 => buf.put_u64(self.payload_len),
            _ => {}
        }
        if let Some(mask) = self.header.mask {
            buf.put_slice(&mask);
        }
        buf.put_slice(&self.payload);
    }

    /// Serialize the frame into a fresh vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());
        self.format(&mut buf);
        buf
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use std::fmt::Write;

        write!(
            f,
            "
<FRAME>
final: {}
reserved: {:03b}
opcode: {}
length: {}
payload length: {}
payload: 0x{}
            ",
            self.header.is_final,
            self.header.rsv,
            self.header.opcode,
            self.len(),
            self.payload.len(),
            self.payload.iter().fold(String::new(), |mut output, byte| {
                _ = write!(output, "{byte:02x}");
                output
            })
        )
    }
}
