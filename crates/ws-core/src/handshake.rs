//! The RFC 6455 §4.2 opening handshake: parsing the client's HTTP Upgrade
//! request and computing the `Sec-WebSocket-Accept` response.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Scans `buf` for a terminating blank line and, if found, extracts and
/// validates the `Sec-WebSocket-Key` header.
///
/// Returns `Ok(None)` when `buf` does not yet contain a full request (the
/// caller should read more bytes and retry), grounded in the same
/// not-ready-yet convention as [`crate::frame::FrameHeader::parse`].
pub fn parse_request(buf: &[u8]) -> Result<Option<String>, HandshakeError> {
    let Some(header_end) = find_subslice(buf, b"\r\n\r\n") else {
        return Ok(None);
    };
    let head = std::str::from_utf8(&buf[..header_end]).map_err(|_| HandshakeError::MalformedRequestLine)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(HandshakeError::MalformedRequestLine)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(HandshakeError::MalformedRequestLine)?;
    if method != "GET" {
        return Err(HandshakeError::MalformedRequestLine);
    }
    let version = parts.next().ok_or(HandshakeError::MalformedRequestLine)?;
    let minor_version_at_least_1 = version
        .strip_prefix("HTTP/1.")
        .and_then(|minor| minor.parse::<u32>().ok())
        .is_some_and(|minor| minor >= 1);
    if !minor_version_at_least_1 {
        return Err(HandshakeError::MalformedRequestLine);
    }

    let mut saw_upgrade = false;
    let mut saw_connection = false;
    let mut saw_version_13 = false;
    let mut key = None;

    for line in lines {
        let Some((name, value)) = line.split_once(':') else { continue };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("upgrade") && value.eq_ignore_ascii_case("websocket") {
            saw_upgrade = true;
        } else if name.eq_ignore_ascii_case("connection")
            && value.to_ascii_lowercase().split(',').any(|tok| tok.trim() == "upgrade")
        {
            saw_connection = true;
        } else if name.eq_ignore_ascii_case("sec-websocket-key") {
            key = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("sec-websocket-version") && value == "13" {
            saw_version_13 = true;
        }
    }

    if !saw_upgrade || !saw_connection {
        return Err(HandshakeError::NotAnUpgrade);
    }
    if !saw_version_13 {
        return Err(HandshakeError::UnsupportedVersion);
    }
    let key = key.ok_or(HandshakeError::MissingKey)?;
    let decoded = STANDARD.decode(&key).map_err(|_| HandshakeError::MissingKey)?;
    if decoded.len() != 16 {
        return Err(HandshakeError::MissingKey);
    }
    Ok(Some(key))
}

/// Computes the `Sec-WebSocket-Accept` value for a given client key per
/// RFC 6455 §1.3: base64(SHA-1(key + GUID)).
pub fn compute_accept(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID.as_bytes());
    let digest = hasher.finalize();
    STANDARD.encode(digest)
}

/// Renders the full `101 Switching Protocols` response for a computed
/// Accept value.
pub fn build_response(accept: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
    .into_bytes()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_accept_vector() {
        // The exact example given in RFC 6455 §1.3.
        let accept = compute_accept("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn parses_well_formed_request() {
        let req = b"GET /chat HTTP/1.1\r\n\
                     Host: example.com\r\n\
                     Upgrade: websocket\r\n\
                     Connection: Upgrade\r\n\
                     Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                     Sec-WebSocket-Version: 13\r\n\r\n";
        let key = parse_request(req).unwrap().unwrap();
        assert_eq!(key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn incomplete_request_returns_none() {
        let req = b"GET /chat HTTP/1.1\r\nHost: example.com\r\n";
        assert!(parse_request(req).unwrap().is_none());
    }

    #[test]
    fn missing_upgrade_header_rejected() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert!(matches!(parse_request(req), Err(HandshakeError::NotAnUpgrade)));
    }

    #[test]
    fn missing_key_rejected() {
        let req = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\r\n";
        assert!(matches!(parse_request(req), Err(HandshakeError::MissingKey)));
    }

    #[test]
    fn key_not_decoding_to_16_bytes_rejected() {
        let req = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGVzdA==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        assert!(matches!(parse_request(req), Err(HandshakeError::MissingKey)));
    }

    #[test]
    fn unsupported_version_rejected() {
        let req = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n\r\n";
        assert!(matches!(parse_request(req), Err(HandshakeError::UnsupportedVersion)));
    }

    #[test]
    fn connection_header_allows_multiple_tokens() {
        let req = b"GET / HTTP/1.1\r\n\
                     Upgrade: websocket\r\n\
                     Connection: keep-alive, Upgrade\r\n\
                     Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                     Sec-WebSocket-Version: 13\r\n\r\n";
        assert!(parse_request(req).unwrap().is_some());
    }

    #[test]
    fn response_contains_computed_accept() {
        let accept = compute_accept("dGhlIHNhbXBsZSBub25jZQ==");
        let resp = build_response(&accept);
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }
}
