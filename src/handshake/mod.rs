//! WebSocket handshake control.

pub mod client;

use data_encoding::BASE64;
use http::{header::HeaderName, HeaderMap, HeaderValue};
use sha1::{Digest, Sha1};

use crate::error::Result;

/// Limit on the number of header lines in a handshake response.
pub(crate) const MAX_HEADERS: usize = 124;

/// Derive the `Sec-WebSocket-Accept` response header from a `Sec-WebSocket-Key` request header.
///
/// This function can be used to perform a handshake before passing a raw TCP stream to
/// [`Client::new`][crate::client::Client::new].
pub fn derive_accept_key(request_key: &[u8]) -> String {
    // ... field is constructed by concatenating /key/ ...
    // ... with the string "258EAFA5-E914-47DA-95CA-C5AB0DC85B11" (RFC 6455)
    const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut sha1 = Sha1::default();
    sha1.update(request_key);
    sha1.update(WS_GUID);
    BASE64.encode(&sha1.finalize())
}

/// Whether the first `name` header contains `needle`, ignoring ASCII case.
pub(crate) fn header_contains(headers: &HeaderMap, name: &str, needle: &str) -> bool {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()))
        .unwrap_or(false)
}

/// Trait to read HTTP parseable objects.
pub(crate) trait TryParse: Sized {
    /// Return Ok(None) if incomplete, Err on syntax error.
    fn try_parse(data: &[u8]) -> Result<Option<(usize, Self)>>;
}

/// Trait to convert raw objects into HTTP parseables.
pub(crate) trait FromHttparse<T>: Sized {
    /// Convert raw object into parsed HTTP headers.
    fn from_httparse(raw: T) -> Result<Self>;
}

impl<'b: 'h, 'h> FromHttparse<&'b [httparse::Header<'h>]> for HeaderMap {
    fn from_httparse(raw: &'b [httparse::Header<'h>]) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for h in raw {
            headers.append(
                HeaderName::from_bytes(h.name.as_bytes())?,
                HeaderValue::from_bytes(h.value)?,
            );
        }

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_conversion() {
        // example from RFC 6455
        assert_eq!(derive_accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn contains_ignores_case() {
        let raw = [
            httparse::Header { name: "Connection", value: b"keep-alive, UPGRADE" },
            httparse::Header { name: "Upgrade", value: b"h2c" },
            httparse::Header { name: "upgrade", value: b"WebSocket" },
        ];
        let hdr = HeaderMap::from_httparse(&raw[..]).unwrap();
        assert!(header_contains(&hdr, "connection", "Upgrade"));
        // Only the first occurrence is looked at.
        assert!(!header_contains(&hdr, "Upgrade", "websocket"));
        assert!(!header_contains(&hdr, "Sec-WebSocket-Accept", ""));
    }
}
