//! Transports a client can run over.
//!
//! Anything implementing [`Transport`] will do; a TLS stream only has to
//! provide the same readiness and lifetime queries as [`TcpTransport`].

use std::{
    fmt,
    io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use log::*;
use polling::{Event, Events, Poller};

use crate::{
    error::{Error, Result, UrlError},
    readiness::WaitMode,
};

/// Stream mode, either plain TCP or TLS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Plain mode (`ws://` URL).
    Plain,
    /// TLS mode (`wss://` URL).
    Tls,
}

impl Mode {
    /// Port used when an address names none.
    pub fn default_port(self) -> u16 {
        match self {
            Mode::Plain => 80,
            Mode::Tls => 443,
        }
    }
}

/// What a readiness check found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Data (or end of stream) can be read without blocking.
    pub readable: bool,
    /// Data can be written without blocking.
    pub writable: bool,
}

/// A byte stream the client can drive.
///
/// `read` and `write` are expected to be non-blocking once the connection is
/// set up: `WouldBlock` means "try again after the next readiness check" and
/// a zero-length read means the peer closed the stream.
pub trait Transport: Read + Write {
    /// Switch between blocking and non-blocking mode. Returns whether it worked.
    fn set_blocking(&mut self, blocking: bool) -> bool;

    /// Whether the transport has not been closed yet.
    fn is_alive(&self) -> bool;

    /// Block until the transport is ready for `mode` or `timeout` expires.
    ///
    /// `None` waits indefinitely. A timeout yields an empty [`Readiness`].
    fn poll_ready(&mut self, mode: WaitMode, timeout: Option<Duration>) -> IoResult<Readiness>;

    /// Shut down the read half, the write half or both.
    fn shutdown(&mut self, how: Shutdown) -> IoResult<()>;

    /// Release the transport. Calling it again does nothing.
    fn close(&mut self);

    /// Local address of the connection.
    fn address(&self) -> String;

    /// Time elapsed since the connection was established.
    fn lifetime(&self) -> Duration;
}

const STREAM_KEY: usize = 1;

/// Plain TCP transport.
///
/// The stream is non-blocking and registered with its own [`Poller`]; each
/// readiness check re-arms the interest for the requested mode.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    poller: Poller,
    events: Events,
    address: String,
    connected_at: Instant,
}

impl TcpTransport {
    /// Connect to `host:port`, trying every address it resolves to.
    ///
    /// Each attempt gives up after `timeout`. TLS is not available.
    pub fn connect(mode: Mode, host: &str, port: u16, timeout: Duration) -> Result<Self> {
        if mode == Mode::Tls {
            return Err(Error::Url(UrlError::TlsFeatureNotEnabled));
        }
        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        let target = format!("{}:{}", host, port);
        for addr in (bare_host, port).to_socket_addrs()? {
            debug!("Trying to contact {} at {}...", target, addr);
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(Self::from_stream(stream)?),
                Err(err) => debug!("Connecting to {} failed: {}", addr, err),
            }
        }
        Err(Error::Url(UrlError::UnableToConnect(target)))
    }

    /// Take over an already connected stream.
    pub fn from_stream(stream: TcpStream) -> IoResult<Self> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        let address = stream.local_addr()?.to_string();
        let poller = Poller::new()?;
        // SAFETY: the stream is removed from the poller in `close`, which runs
        // before the stream is dropped (also from `Drop`).
        unsafe { poller.add(&stream, Event::none(STREAM_KEY))? };
        Ok(TcpTransport {
            stream: Some(stream),
            poller,
            events: Events::new(),
            address,
            connected_at: Instant::now(),
        })
    }

    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    fn stream_mut(&mut self) -> IoResult<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| IoErrorKind::NotConnected.into())
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("stream", &self.stream)
            .field("address", &self.address)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.stream_mut()?.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.stream_mut()?.write(buf)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.stream_mut()?.flush()
    }
}

impl Transport for TcpTransport {
    fn set_blocking(&mut self, blocking: bool) -> bool {
        match &self.stream {
            Some(stream) => stream.set_nonblocking(!blocking).is_ok(),
            None => false,
        }
    }

    fn is_alive(&self) -> bool {
        self.stream.is_some()
    }

    fn poll_ready(&mut self, mode: WaitMode, timeout: Option<Duration>) -> IoResult<Readiness> {
        let stream = self.stream.as_ref().ok_or_else(|| IoError::from(IoErrorKind::NotConnected))?;
        let interest = match mode {
            WaitMode::Read => Event::readable(STREAM_KEY),
            WaitMode::Write => Event::writable(STREAM_KEY),
            WaitMode::ReadWrite => Event::all(STREAM_KEY),
        };
        self.poller.modify(stream, interest)?;

        self.events.clear();
        match self.poller.wait(&mut self.events, timeout) {
            Ok(_) => {}
            Err(err) if err.kind() == IoErrorKind::Interrupted => return Ok(Readiness::default()),
            Err(err) => return Err(err),
        }

        let mut ready = Readiness::default();
        for event in self.events.iter().filter(|event| event.key == STREAM_KEY) {
            ready.readable |= event.readable;
            ready.writable |= event.writable;
        }
        Ok(ready)
    }

    fn shutdown(&mut self, how: Shutdown) -> IoResult<()> {
        self.stream_mut()?.shutdown(how)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = self.poller.delete(&stream) {
                debug!("Failed to deregister stream: {}", err);
            }
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                trace!("Shutdown on close: {}", err);
            }
        }
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    fn lifetime(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport =
            TcpTransport::connect(Mode::Plain, "127.0.0.1", port, Duration::from_secs(5)).unwrap();
        let (peer, _) = listener.accept().unwrap();
        (transport, peer)
    }

    #[test]
    fn tls_is_refused() {
        let err = TcpTransport::connect(Mode::Tls, "127.0.0.1", 443, Duration::from_secs(1));
        assert!(matches!(err, Err(Error::Url(UrlError::TlsFeatureNotEnabled))));
    }

    #[test]
    fn readiness_and_io() {
        let (mut transport, mut peer) = pair();
        assert!(transport.is_alive());
        assert!(transport.address().starts_with("127.0.0.1:"));

        let ready = transport.poll_ready(WaitMode::Write, Some(Duration::from_secs(5))).unwrap();
        assert!(ready.writable);
        assert_eq!(transport.write(b"ping").unwrap(), 4);

        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        // Nothing to read yet.
        let mut scratch = [0u8; 16];
        assert_eq!(transport.read(&mut scratch).unwrap_err().kind(), IoErrorKind::WouldBlock);
        let ready = transport.poll_ready(WaitMode::Read, Some(Duration::from_millis(10))).unwrap();
        assert!(!ready.readable);

        peer.write_all(b"pong").unwrap();
        let ready = transport.poll_ready(WaitMode::Read, Some(Duration::from_secs(5))).unwrap();
        assert!(ready.readable);
        assert_eq!(transport.read(&mut scratch).unwrap(), 4);
        assert_eq!(&scratch[..4], b"pong");
    }

    #[test]
    fn close_is_final() {
        let (mut transport, _peer) = pair();
        transport.close();
        transport.close();
        assert!(!transport.is_alive());
        assert!(!transport.set_blocking(false));
        assert_eq!(transport.read(&mut [0u8; 1]).unwrap_err().kind(), IoErrorKind::NotConnected);
        assert!(transport.poll_ready(WaitMode::Read, None).is_err());
    }
}
