//! Client side of the HTTP Upgrade handshake (RFC 6455).
//!
//! Unlike a general-purpose client, the response parser never rejects a
//! non-101 status: the raw status code is what the `status is 101` check
//! reports on, so it must survive parsing even when the upgrade was
//! refused.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

use crate::config::Endpoint;
use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the Sec-WebSocket-Accept value for a Sec-WebSocket-Key.
///
/// The accept key is Base64(SHA-1(key + GUID)).
#[must_use]
pub fn accept_for(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a fresh 16-byte Sec-WebSocket-Key, Base64 encoded.
///
/// Falls back to system time if OS randomness is unavailable; the key only
/// needs to be unique per connection, not secret.
fn generate_key() -> String {
    let mut bytes = [0u8; 16];
    if getrandom::getrandom(&mut bytes).is_err() {
        use std::time::{SystemTime, UNIX_EPOCH};
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = ((seed >> (i * 8)) & 0xFF) as u8;
        }
    }
    BASE64.encode(bytes)
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }
    headers
}

/// Upgrade request for one connection attempt.
///
/// Carries its own key so the accept value of the response can be checked
/// against exactly what was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    host: String,
    path: String,
    key: String,
}

impl UpgradeRequest {
    /// Build a request for the given endpoint with a fresh key.
    #[must_use]
    pub fn new(endpoint: &Endpoint) -> Self {
        Self {
            host: endpoint.authority(),
            path: endpoint.path.clone(),
            key: generate_key(),
        }
    }

    /// The Sec-WebSocket-Key this request carries.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Render the raw HTTP request. No custom headers are added.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            self.path, self.host, self.key
        )
    }
}

/// Parsed upgrade response from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeResponse {
    /// Raw HTTP status code from the status line.
    pub status: u16,
    /// The Sec-WebSocket-Accept value, if the server sent one.
    pub accept: Option<String>,
}

impl UpgradeResponse {
    /// Parse an upgrade response from raw HTTP data.
    ///
    /// A non-101 status is not an error here; the caller inspects
    /// [`status`](UpgradeResponse::status) and decides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if the data is not valid UTF-8, the
    /// status line is missing or malformed, or the status code does not
    /// parse.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::Handshake("Response is not valid UTF-8".into()))?;

        let mut lines = text.lines();
        let status_line = lines
            .next()
            .ok_or_else(|| Error::Handshake("Empty response".into()))?;

        // Status line: "HTTP/1.1 101 Switching Protocols"
        let mut parts = status_line.split_whitespace();
        let version = parts
            .next()
            .ok_or_else(|| Error::Handshake("Missing HTTP version".into()))?;
        if !version.starts_with("HTTP/1.1") {
            return Err(Error::Handshake(format!(
                "Expected HTTP/1.1, got: {status_line}"
            )));
        }
        let status: u16 = parts
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| Error::Handshake(format!("Invalid status line: {status_line}")))?;

        let headers = parse_headers(lines);
        let accept = headers.get("sec-websocket-accept").cloned();

        Ok(Self { status, accept })
    }

    /// Validate a 101 response against the request key.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedStatus`] if the status is not 101
    /// - [`Error::Handshake`] if the accept header is missing or does not
    ///   match the key
    pub fn verify(&self, key: &str) -> Result<()> {
        if self.status != 101 {
            return Err(Error::UnexpectedStatus {
                status: self.status,
            });
        }

        match &self.accept {
            Some(accept) if *accept == accept_for(key) => Ok(()),
            Some(accept) => Err(Error::Handshake(format!(
                "Sec-WebSocket-Accept mismatch: {accept}"
            ))),
            None => Err(Error::Handshake(
                "Missing Sec-WebSocket-Accept header".into(),
            )),
        }
    }
}
