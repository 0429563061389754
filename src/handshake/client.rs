//! Client handshake.

use std::{fmt, str::FromStr};

use http::{uri::Authority, uri::PathAndQuery, HeaderMap};
use httparse::Status;
use log::*;
use rand::Rng;

use super::{derive_accept_key, header_contains, FromHttparse, TryParse, MAX_HEADERS};
use crate::{
    error::{Error, ProtocolError, Result, UrlError},
    stream::Mode,
};

/// Host used when the address names none.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Where to connect and what to ask for.
///
/// Addresses look like `ws://host[:port]/path?query`. Every part may be
/// left out: the scheme defaults to `ws`, the host to `127.0.0.1`, the port
/// to the scheme's default and the path to `/`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    mode: Mode,
    host: String,
    port: u16,
    path: PathAndQuery,
    additional_headers: Vec<String>,
}

impl Request {
    /// Parse an address.
    pub fn parse(address: &str) -> Result<Self> {
        let (scheme, rest) = match address.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("ws", address),
        };
        let mode = match scheme.to_ascii_lowercase().as_str() {
            "ws" => Mode::Plain,
            "wss" => Mode::Tls,
            _ => return Err(Error::Url(UrlError::UnsupportedUrlScheme)),
        };

        let split = rest.find(|c| c == '/' || c == '?').unwrap_or(rest.len());
        let (authority, path) = rest.split_at(split);

        let (host, port) = if authority.is_empty() {
            (DEFAULT_HOST.to_owned(), None)
        } else if let Some(port) = authority.strip_prefix(':') {
            let authority: Authority = format!("{}:{}", DEFAULT_HOST, port).parse()?;
            (DEFAULT_HOST.to_owned(), authority.port_u16())
        } else {
            let authority: Authority = authority.parse()?;
            if authority.host().is_empty() {
                return Err(Error::Url(UrlError::EmptyHostName));
            }
            (authority.host().to_owned(), authority.port_u16())
        };

        let path: PathAndQuery = match path {
            "" => PathAndQuery::from_static("/"),
            p if p.starts_with('?') => format!("/{}", p).parse()?,
            p => p.parse()?,
        };

        Ok(Request {
            mode,
            host,
            port: port.unwrap_or_else(|| mode.default_port()),
            path,
            additional_headers: Vec::new(),
        })
    }

    /// Add literal header lines to the upgrade request.
    ///
    /// Lines are sent verbatim, in order, right after `Host`.
    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_headers.extend(
            headers
                .into_iter()
                .map(Into::into)
                .map(|line| line.trim_end_matches(&['\r', '\n'][..]).to_owned())
                .filter(|line| !line.is_empty()),
        );
        self
    }

    /// Plain or TLS.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port number.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request target: path plus optional query.
    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    /// Extra header lines.
    pub fn additional_headers(&self) -> &[String] {
        &self.additional_headers
    }

    /// Value of the `Host` header.
    pub fn host_header(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for Request {
    type Err = Error;

    fn from_str(address: &str) -> Result<Self> {
        Request::parse(address)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = match self.mode {
            Mode::Plain => "ws",
            Mode::Tls => "wss",
        };
        write!(f, "{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

/// Client side of the opening handshake.
///
/// Builds the upgrade request and checks the server's reply. Moving bytes
/// is left to the caller.
#[derive(Debug)]
pub struct ClientHandshake {
    request: Request,
    key: String,
    verify_accept_key: bool,
}

impl ClientHandshake {
    /// Prepare a handshake with a fresh random key.
    pub fn new(request: Request) -> Self {
        ClientHandshake { request, key: generate_key(), verify_accept_key: false }
    }

    /// Also check that `Sec-WebSocket-Accept` matches the key that was sent.
    pub fn verify_accept_key(mut self, verify: bool) -> Self {
        self.verify_accept_key = verify;
        self
    }

    /// The `Sec-WebSocket-Key` sent to the server.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The request being made.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The complete upgrade request as it goes on the wire.
    pub fn request_bytes(&self) -> Vec<u8> {
        let mut req = format!(
            "GET {path} HTTP/1.1\r\nHost: {host}\r\n",
            path = self.request.path(),
            host = self.request.host_header(),
        );
        for line in self.request.additional_headers() {
            req.push_str(line);
            req.push_str("\r\n");
        }
        req.push_str(&format!(
            "Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             \r\n",
            key = self.key,
        ));
        trace!("Request: {:?}", req);
        req.into_bytes()
    }

    /// Try to read and verify the server's reply from the front of `data`.
    ///
    /// Returns `Ok(None)` until the blank line ending the response head has
    /// arrived. On success the number of bytes taken by the head is returned
    /// with it; anything after that already belongs to the WebSocket stream.
    pub fn try_response(&self, data: &[u8]) -> Result<Option<(usize, Response)>> {
        match Response::try_parse(data)? {
            Some((size, response)) => {
                self.verify_response(&response)?;
                debug!("Client handshake done.");
                Ok(Some((size, response)))
            }
            None => Ok(None),
        }
    }

    /// Check a parsed reply against RFC 6455 section 4.1.
    pub fn verify_response(&self, response: &Response) -> Result<()> {
        // 1. If the status code received from the server is not 101, the
        // client handles the response per HTTP [RFC2616] procedures. (RFC 6455)
        if response.code() != 101 || response.reason() != "Switching Protocols" {
            return Err(Error::Protocol(ProtocolError::WrongStatusLine(response.status_line())));
        }

        let headers = response.headers();
        // 2. If the response lacks an |Upgrade| header field or the |Upgrade|
        // header field contains a value that is not an ASCII case-
        // insensitive match for the value "websocket", the client MUST
        // _Fail the WebSocket Connection_. (RFC 6455)
        if !header_contains(headers, "Upgrade", "websocket") {
            return Err(Error::Protocol(ProtocolError::MissingUpgradeWebSocketHeader));
        }
        // 3.  If the response lacks a |Connection| header field or the
        // |Connection| header field doesn't contain a token that is an
        // ASCII case-insensitive match for the value "Upgrade", the client
        // MUST _Fail the WebSocket Connection_. (RFC 6455)
        if !header_contains(headers, "Connection", "Upgrade") {
            return Err(Error::Protocol(ProtocolError::MissingConnectionUpgradeHeader));
        }
        // 4.  If the response lacks a |Sec-WebSocket-Accept| header field or
        // the |Sec-WebSocket-Accept| contains a value other than the
        // base64-encoded SHA-1 of ... the client MUST _Fail the WebSocket
        // Connection_. (RFC 6455)
        let accept = headers
            .get("Sec-WebSocket-Accept")
            .ok_or(Error::Protocol(ProtocolError::MissingSecWebSocketAccept))?;
        if self.verify_accept_key && accept.as_bytes() != derive_accept_key(self.key.as_bytes()).as_bytes() {
            return Err(Error::Protocol(ProtocolError::SecWebSocketAcceptKeyMismatch));
        }

        Ok(())
    }
}

/// Head of the server's reply.
#[derive(Debug, Clone)]
pub struct Response {
    code: u16,
    reason: String,
    headers: HeaderMap,
}

impl Response {
    /// Status code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Reason phrase as sent.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Status code and reason phrase, e.g. `101 Switching Protocols`.
    pub fn status_line(&self) -> String {
        format!("{} {}", self.code, self.reason)
    }

    /// Response headers. Lookups return the first occurrence of a name.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl TryParse for Response {
    fn try_parse(buf: &[u8]) -> Result<Option<(usize, Self)>> {
        let mut hbuffer = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Response::new(&mut hbuffer);
        Ok(match req.parse(buf)? {
            Status::Partial => None,
            Status::Complete(size) => Some((size, Response::from_httparse(req)?)),
        })
    }
}

impl<'h, 'b: 'h> FromHttparse<httparse::Response<'h, 'b>> for Response {
    fn from_httparse(raw: httparse::Response<'h, 'b>) -> Result<Self> {
        match raw.version {
            Some(version) if version >= 1 => {}
            _ => return Err(Error::Protocol(ProtocolError::WrongHttpVersion)),
        }
        let code = raw.code.ok_or(Error::Protocol(ProtocolError::HandshakeIncomplete))?;
        Ok(Response {
            code,
            reason: raw.reason.unwrap_or_default().to_owned(),
            headers: HeaderMap::from_httparse(raw.headers)?,
        })
    }
}

/// Generate a random key for the `Sec-WebSocket-Key` header.
///
/// Sixteen printable ASCII characters, base64-encoded.
pub fn generate_key() -> String {
    // a base64-encoded (see Section 4 of [RFC4648]) value that,
    // when decoded, is 16 bytes in length (RFC 6455)
    let mut rng = rand::rng();
    let r: [u8; 16] = std::array::from_fn(|_| rng.random_range(33..=126));
    data_encoding::BASE64.encode(&r)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCEPTED: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
        \r\n";

    #[test]
    fn random_keys() {
        let k1 = generate_key();
        println!("Generated random key 1: {}", k1);
        let k2 = generate_key();
        println!("Generated random key 2: {}", k2);
        assert_ne!(k1, k2);
        assert_eq!(k1.len(), k2.len());
        assert_eq!(k1.len(), 24);
        assert_eq!(k2.len(), 24);
        assert!(k1.ends_with("=="));
        assert!(k2.ends_with("=="));
        assert!(k1[..22].find('=').is_none());
        assert!(k2[..22].find('=').is_none());

        let raw = data_encoding::BASE64.decode(k1.as_bytes()).unwrap();
        assert!(raw.iter().all(|b| (33..=126).contains(b)));
    }

    #[test]
    fn address_defaults() {
        let req = Request::parse("ws://example.com:9001/runCase?case=1&agent=frameline").unwrap();
        assert_eq!(req.mode(), Mode::Plain);
        assert_eq!(req.host(), "example.com");
        assert_eq!(req.port(), 9001);
        assert_eq!(req.path(), "/runCase?case=1&agent=frameline");
        assert_eq!(req.host_header(), "example.com:9001");

        let req = Request::parse("localhost").unwrap();
        assert_eq!((req.host(), req.port(), req.path()), ("localhost", 80, "/"));

        let req = Request::parse("wss://secure.example").unwrap();
        assert_eq!((req.mode(), req.port()), (Mode::Tls, 443));

        let req = Request::parse("").unwrap();
        assert_eq!((req.host(), req.port(), req.path()), (DEFAULT_HOST, 80, "/"));

        let req = Request::parse(":9001?x=1").unwrap();
        assert_eq!((req.host(), req.port(), req.path()), (DEFAULT_HOST, 9001, "/?x=1"));

        let req: Request = "ws://example.com/chat".parse().unwrap();
        assert_eq!(req.to_string(), "ws://example.com:80/chat");
    }

    #[test]
    fn bad_addresses() {
        assert!(matches!(
            Request::parse("http://example.com"),
            Err(Error::Url(UrlError::UnsupportedUrlScheme))
        ));
        assert!(Request::parse("ws://exa mple.com/").is_err());
    }

    #[test]
    fn request_format() {
        let req = Request::parse("ws://localhost:9001/getCaseCount")
            .unwrap()
            .with_headers(["X-First: 1\r\n", "", "X-Second: two"]);
        let handshake = ClientHandshake::new(req);
        let text = String::from_utf8(handshake.request_bytes()).unwrap();
        let expected = format!(
            "GET /getCaseCount HTTP/1.1\r\n\
             Host: localhost:9001\r\n\
             X-First: 1\r\n\
             X-Second: two\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: {}\r\n\
             \r\n",
            handshake.key()
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn response_parsing() {
        const DATA: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n";
        let (size, resp) = Response::try_parse(DATA).unwrap().unwrap();
        assert_eq!(size, DATA.len());
        assert_eq!(resp.code(), 200);
        assert_eq!(resp.status_line(), "200 OK");
        assert_eq!(resp.headers().get("Content-Type").unwrap(), &b"text/html"[..]);
    }

    #[test]
    fn response_incomplete() {
        let handshake = ClientHandshake::new(Request::parse("ws://localhost/").unwrap());
        assert!(handshake.try_response(&ACCEPTED[..ACCEPTED.len() - 2]).unwrap().is_none());
    }

    #[test]
    fn accepts_and_reports_size() {
        let handshake = ClientHandshake::new(Request::parse("ws://localhost/").unwrap());
        let mut data = ACCEPTED.to_vec();
        data.extend_from_slice(&[0x81, 0x02, b'h', b'i']);
        let (size, resp) = handshake.try_response(&data).unwrap().unwrap();
        assert_eq!(size, ACCEPTED.len());
        assert_eq!(resp.code(), 101);
    }

    #[test]
    fn rejections() {
        let handshake = ClientHandshake::new(Request::parse("ws://localhost/").unwrap());
        let cases: [(&[u8], ProtocolError); 4] = [
            (
                b"HTTP/1.1 200 OK\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: x\r\n\r\n",
                ProtocolError::WrongStatusLine("200 OK".into()),
            ),
            (
                b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: x\r\n\r\n",
                ProtocolError::MissingUpgradeWebSocketHeader,
            ),
            (
                b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: WebSocket\r\nConnection: close\r\nSec-WebSocket-Accept: x\r\n\r\n",
                ProtocolError::MissingConnectionUpgradeHeader,
            ),
            (
                b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n",
                ProtocolError::MissingSecWebSocketAccept,
            ),
        ];
        for (data, expected) in cases {
            match handshake.try_response(data) {
                Err(Error::Protocol(err)) => assert_eq!(err, expected),
                other => panic!("unexpected result {:?}", other.map(|r| r.map(|(n, _)| n))),
            }
        }
    }

    #[test]
    fn accept_value_checked_only_on_request() {
        // The accept value belongs to a different key.
        let lenient = ClientHandshake::new(Request::parse("ws://localhost/").unwrap());
        assert!(lenient.try_response(ACCEPTED).unwrap().is_some());

        let strict = ClientHandshake::new(Request::parse("ws://localhost/").unwrap())
            .verify_accept_key(true);
        assert!(matches!(
            strict.try_response(ACCEPTED),
            Err(Error::Protocol(ProtocolError::SecWebSocketAcceptKeyMismatch))
        ));

        let reply = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            derive_accept_key(strict.key().as_bytes())
        );
        assert!(strict.try_response(reply.as_bytes()).unwrap().is_some());
    }
}
