//! WebSocket opening handshake
//!
//! Server side of the HTTP/1.1 upgrade from RFC 6455 section 4.2. The
//! negotiator is deliberately lenient: it does not check the method, the
//! `Upgrade`/`Connection` headers or the version, only that a non-empty
//! `Sec-WebSocket-Key` is present.

use crate::error::HandshakeError;
use crate::protocol::constants::{HEADER_SEC_WEBSOCKET_KEY, HEADER_TERMINATOR, WEBSOCKET_GUID};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use sha1::{Digest, Sha1};

/// Parsed upgrade request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// First line of the request, e.g. `GET /chat HTTP/1.1`
    pub request_line: String,
    /// Header name/value pairs in arrival order
    pub headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Parse a header block (without the terminating blank line)
    pub fn parse(block: &str) -> Self {
        let mut lines = block.lines();
        let request_line = lines.next().unwrap_or_default().to_string();

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.to_string(), value.trim_start().to_string()))
            .collect();

        Self {
            request_line,
            headers,
        }
    }

    /// Look up a header, ignoring ASCII case in the name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Request target from the request line, if there is one
    pub fn path(&self) -> Option<&str> {
        self.request_line.split_whitespace().nth(1)
    }

    /// The client's `Sec-WebSocket-Key`, if present and non-empty
    pub fn key(&self) -> Option<&str> {
        self.header(HEADER_SEC_WEBSOCKET_KEY)
            .filter(|key| !key.is_empty())
    }
}

/// Outcome of [`negotiate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeResult {
    /// The request was accepted
    Success {
        /// `101 Switching Protocols` response to write back
        response: Bytes,
        /// The parsed request
        request: HandshakeRequest,
        /// Bytes of input taken by the request, including the blank line
        consumed: usize,
    },
    /// The header block has not been fully received yet
    Incomplete,
    /// The request cannot be accepted
    Failure(HandshakeError),
}

/// Compute the `Sec-WebSocket-Accept` token for a client key
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Build the literal upgrade response for an accept token
pub fn response_for(accept_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: WebSocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key
    )
}

/// Length of the header block including its terminator, once one has arrived
pub fn request_len(raw: &[u8]) -> Option<usize> {
    raw.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Try to complete the handshake from the bytes received so far
pub fn negotiate(raw: &[u8], max_size: usize) -> HandshakeResult {
    let consumed = match request_len(raw) {
        Some(len) if len <= max_size => len,
        Some(len) => {
            return HandshakeResult::Failure(HandshakeError::RequestTooLarge {
                size: len,
                max: max_size,
            })
        }
        None if raw.len() >= max_size => {
            return HandshakeResult::Failure(HandshakeError::RequestTooLarge {
                size: raw.len(),
                max: max_size,
            })
        }
        None => return HandshakeResult::Incomplete,
    };

    let block = String::from_utf8_lossy(&raw[..consumed - HEADER_TERMINATOR.len()]);
    let request = HandshakeRequest::parse(&block);

    let accept = match request.key() {
        Some(key) => compute_accept_key(key),
        None => return HandshakeResult::Failure(HandshakeError::MissingKey),
    };

    HandshakeResult::Success {
        response: Bytes::from(response_for(&accept)),
        request,
        consumed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = crate::protocol::constants::DEFAULT_MAX_HANDSHAKE_SIZE;

    const SAMPLE: &str = "GET /chat HTTP/1.1\r\n\
                          Host: server.example.com\r\n\
                          Upgrade: websocket\r\n\
                          Connection: Upgrade\r\n\
                          Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                          Sec-WebSocket-Version: 13\r\n\
                          \r\n";

    #[test]
    fn test_compute_accept_key() {
        // Test vector from RFC 6455 section 1.3
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_successful_negotiation() {
        match negotiate(SAMPLE.as_bytes(), MAX) {
            HandshakeResult::Success {
                response,
                request,
                consumed,
            } => {
                assert_eq!(
                    &response[..],
                    b"HTTP/1.1 101 Switching Protocols\r\n\
                      Upgrade: WebSocket\r\n\
                      Connection: Upgrade\r\n\
                      Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
                );
                assert_eq!(consumed, SAMPLE.len());
                assert_eq!(request.path(), Some("/chat"));
                assert_eq!(request.header("host"), Some("server.example.com"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_trailing_frame_bytes_not_consumed() {
        let mut raw = SAMPLE.as_bytes().to_vec();
        raw.extend_from_slice(&[0x81, 0x00]);

        match negotiate(&raw, MAX) {
            HandshakeResult::Success { consumed, .. } => assert_eq!(consumed, SAMPLE.len()),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_missing_or_empty_key() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(
            negotiate(raw, MAX),
            HandshakeResult::Failure(HandshakeError::MissingKey)
        );

        let raw = b"GET / HTTP/1.1\r\nSec-WebSocket-Key: \r\n\r\n";
        assert_eq!(
            negotiate(raw, MAX),
            HandshakeResult::Failure(HandshakeError::MissingKey)
        );
    }

    #[test]
    fn test_incomplete_request() {
        let partial = &SAMPLE.as_bytes()[..SAMPLE.len() - 2];
        assert_eq!(negotiate(partial, MAX), HandshakeResult::Incomplete);
        assert_eq!(negotiate(b"", MAX), HandshakeResult::Incomplete);
    }

    #[test]
    fn test_request_too_large() {
        let raw = vec![b'a'; 64];
        assert_eq!(
            negotiate(&raw, 64),
            HandshakeResult::Failure(HandshakeError::RequestTooLarge { size: 64, max: 64 })
        );
        assert!(matches!(
            negotiate(SAMPLE.as_bytes(), 32),
            HandshakeResult::Failure(HandshakeError::RequestTooLarge { .. })
        ));
    }

    #[test]
    fn test_header_parsing_is_lenient() {
        let request = HandshakeRequest::parse(
            "GET / HTTP/1.1\r\n\
             no colon on this line\r\n\
             sec-websocket-key:    abc==\r\n\
             X-Empty:\r\n\
             X-Url: http://example.com:8080",
        );

        assert_eq!(request.headers.len(), 3);
        assert_eq!(request.key(), Some("abc=="));
        assert_eq!(request.header("x-empty"), Some(""));
        assert_eq!(request.header("X-URL"), Some("http://example.com:8080"));
        assert_eq!(request.header("missing"), None);
    }
}
