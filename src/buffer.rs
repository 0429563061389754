//! Inbound and outbound byte queues of a connection.
//!
//! The `ByteBuffer` holds two independent first-in, first-out queues of bytes.
//! Data is appended at the tail and consumed from the head; the only other
//! access is a peek at everything currently queued. Reading from the network
//! goes through [`ByteBuffer::read_from`], which pulls one chunk at a time.

use std::io::{Read, Result as IoResult};

use bytes::{Bytes, BytesMut};

/// Default size of a single network read.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Selects one of the two queues of a [`ByteBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Bytes received from the peer, not yet decoded.
    Inbound,
    /// Bytes encoded for the peer, not yet written.
    Outbound,
}

/// A pair of FIFO byte queues.
#[derive(Debug)]
pub struct ByteBuffer {
    inbound: BytesMut,
    outbound: BytesMut,
    chunk: Box<[u8]>,
}

impl ByteBuffer {
    /// Create empty queues reading `DEFAULT_CHUNK_SIZE` bytes at a time.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create empty queues reading at most `chunk_size` bytes at a time.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            inbound: BytesMut::with_capacity(chunk_size),
            outbound: BytesMut::new(),
            chunk: vec![0; chunk_size.max(1)].into_boxed_slice(),
        }
    }

    fn channel(&self, channel: Channel) -> &BytesMut {
        match channel {
            Channel::Inbound => &self.inbound,
            Channel::Outbound => &self.outbound,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut BytesMut {
        match channel {
            Channel::Inbound => &mut self.inbound,
            Channel::Outbound => &mut self.outbound,
        }
    }

    /// Append bytes at the tail of a queue.
    pub fn append(&mut self, channel: Channel, data: &[u8]) {
        self.channel_mut(channel).extend_from_slice(data);
    }

    /// Remove and return the first `len` bytes of a queue.
    ///
    /// Asking for more than is queued drains the queue; asking for nothing
    /// returns an empty slice.
    pub fn consume(&mut self, channel: Channel, len: usize) -> Bytes {
        let queue = self.channel_mut(channel);
        if len == 0 {
            return Bytes::new();
        }
        let len = len.min(queue.len());
        queue.split_to(len).freeze()
    }

    /// Everything currently queued, without removing it.
    pub fn peek(&self, channel: Channel) -> &[u8] {
        self.channel(channel)
    }

    /// Number of queued bytes.
    pub fn len(&self, channel: Channel) -> usize {
        self.channel(channel).len()
    }

    /// Whether a queue is empty.
    pub fn is_empty(&self, channel: Channel) -> bool {
        self.channel(channel).is_empty()
    }

    /// Drop everything queued on a channel.
    pub fn clear(&mut self, channel: Channel) {
        self.channel_mut(channel).clear();
    }

    /// Size of a single network read.
    pub fn chunk_size(&self) -> usize {
        self.chunk.len()
    }

    /// Read next portion of data from the given input stream into the inbound queue.
    pub fn read_from<S: Read>(&mut self, stream: &mut S) -> IoResult<usize> {
        let size = stream.read(&mut self.chunk)?;
        self.inbound.extend_from_slice(&self.chunk[..size]);
        Ok(size)
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
