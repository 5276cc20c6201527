//! # handshake
//!
//! Client side of the HTTP/1.1 upgrade.
//!
//! [`HandshakeRequest`] renders the request. [`ClientHandshake`] then reads
//! the response one line at a time as bytes trickle in, and verifies it once
//! the blank line arrives. Whatever follows the blank line is left in the
//! buffer: it already belongs to the framed stream.

use base64::prelude::*;
use bytes::{Buf, BytesMut};
use sha1::{Digest, Sha1};

use crate::{WireError, WireResult};

/// GUID appended to the client key when computing `Sec-WebSocket-Accept`.
pub const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on buffered response header bytes.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Generates a random `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// The `Sec-WebSocket-Accept` value a conforming server derives from `key`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(ACCEPT_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Everything needed to render an upgrade request.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub key: String,
    pub protocol: Option<String>,
    pub extensions: Option<String>,
    /// Extra `(name, value)` headers, written in order after the upgrade headers.
    pub headers: Vec<(String, String)>,
    pub user_agent: Option<String>,
    /// `(user, password)` sent as `Authorization: Basic ...`.
    pub basic_auth: Option<(String, String)>,
    /// Sent verbatim as `Authorization: <value>`.
    pub authorization: Option<String>,
}

impl HandshakeRequest {
    /// A request for `path` on `host:port` with a freshly generated key.
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            key: generate_key(),
            protocol: None,
            extensions: None,
            headers: Vec::new(),
            user_agent: None,
            basic_auth: None,
            authorization: None,
        }
    }

    /// Renders the request including the terminating blank line.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(256);

        out.push_str(&format!("GET {} HTTP/1.1\r\n", self.path));
        out.push_str(&format!("Host: {}:{}\r\n", self.host, self.port));
        out.push_str("Connection: Upgrade\r\n");
        out.push_str("Upgrade: websocket\r\n");
        out.push_str("Sec-WebSocket-Version: 13\r\n");
        out.push_str(&format!("Sec-WebSocket-Key: {}\r\n", self.key));

        if let Some(protocol) = self.protocol.as_deref().filter(|p| !p.is_empty()) {
            out.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        if let Some(extensions) = self.extensions.as_deref().filter(|e| !e.is_empty()) {
            out.push_str(&format!("Sec-WebSocket-Extensions: {extensions}\r\n"));
        }

        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }

        if let Some(agent) = &self.user_agent {
            out.push_str(&format!("User-Agent: {agent}\r\n"));
        }

        if let Some((user, password)) = &self.basic_auth {
            let credentials = BASE64_STANDARD.encode(format!("{user}:{password}"));
            out.push_str(&format!("Authorization: Basic {credentials}\r\n"));
        }
        if let Some(auth) = self.authorization.as_deref().filter(|a| !a.is_empty()) {
            out.push_str(&format!("Authorization: {auth}\r\n"));
        }

        out.push_str("\r\n");
        out
    }
}

/// Response fields gathered while reading the upgrade response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: Option<u16>,
    pub connection_upgrade: bool,
    pub upgrade_websocket: bool,
    pub accept: Option<String>,
    pub protocol: Option<String>,
    pub extensions: Option<String>,
    pub version: Option<u16>,
    pub session_id: Option<String>,
}

impl ResponseHead {
    /// Records one header line. Lines that are neither a status line nor a
    /// `name: value` pair are ignored.
    pub fn push_line(&mut self, line: &str) {
        let line = line.trim();

        if line.starts_with("HTTP/1.") {
            // "HTTP/1.1 101 Switching Protocols"
            self.status = line
                .split_whitespace()
                .nth(1)
                .and_then(|code| code.parse().ok());
            return;
        }

        let Some((name, value)) = line.split_once(':') else {
            tracing::debug!(line, "ignoring malformed upgrade response line");
            return;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("Connection") {
            self.connection_upgrade = value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        } else if name.eq_ignore_ascii_case("Upgrade") {
            self.upgrade_websocket = value.eq_ignore_ascii_case("websocket");
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Accept") {
            self.accept = Some(value.to_owned());
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Protocol") {
            self.protocol = Some(value.to_owned());
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Extensions") {
            self.extensions = Some(value.to_owned());
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Version") {
            self.version = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Set-Cookie") {
            self.session_id = Some(session_cookie(value).to_owned());
        }
    }

    /// Checks the gathered response against the key that was sent.
    pub fn verify(&self, key: &str) -> WireResult<Negotiated> {
        let Some(status) = self.status else {
            return Err(WireError::MissingStatusLine);
        };
        if status != 101 {
            return Err(WireError::InvalidStatusCode(status));
        }
        if !self.upgrade_websocket {
            return Err(WireError::InvalidUpgradeHeader);
        }
        if !self.connection_upgrade {
            return Err(WireError::InvalidConnectionHeader);
        }

        let actual = match self.accept.as_deref() {
            Some(accept) if !accept.is_empty() => accept,
            _ => return Err(WireError::MissingAccept),
        };
        let expected = accept_key(key);
        if expected != actual {
            return Err(WireError::AcceptMismatch {
                expected,
                actual: actual.to_owned(),
            });
        }

        Ok(Negotiated {
            status,
            protocol: self.protocol.clone(),
            extensions: self.extensions.clone(),
            version: self.version,
            session_id: self.session_id.clone(),
        })
    }
}

/// Session id carried by a `Set-Cookie` value: the text after the first `=`,
/// cut at the first `;` for `HttpOnly` cookies.
fn session_cookie(value: &str) -> &str {
    let after_eq = value.split_once('=').map_or(value, |(_, rest)| rest);
    if value.contains("HttpOnly") {
        after_eq.split(';').next().unwrap_or(after_eq)
    } else {
        after_eq
    }
}

/// Outcome of a successful upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub status: u16,
    pub protocol: Option<String>,
    pub extensions: Option<String>,
    pub version: Option<u16>,
    pub session_id: Option<String>,
}

/// Incremental upgrade-response reader bound to one request key.
#[derive(Debug)]
pub struct ClientHandshake {
    key: String,
    head: ResponseHead,
    consumed: usize,
}

impl ClientHandshake {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            head: ResponseHead::default(),
            consumed: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Consumes every complete line in `buf`.
    ///
    /// Returns `Ok(None)` while the blank line terminating the headers has not
    /// arrived, and the verified [`Negotiated`] result once it has. Bytes past
    /// the blank line stay in `buf`.
    pub fn poll_response(&mut self, buf: &mut BytesMut) -> WireResult<Option<Negotiated>> {
        while let Some(end) = buf.iter().position(|b| *b == b'\n') {
            let line = buf.split_to(end + 1);
            self.consumed += line.len();
            if self.consumed > MAX_HEADER_BYTES {
                return Err(WireError::HeaderTooLarge(MAX_HEADER_BYTES));
            }

            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                tracing::trace!(status = ?self.head.status, "upgrade response headers complete");
                return self.head.verify(&self.key).map(Some);
            }
            self.head.push_line(line);
        }

        if self.consumed + buf.remaining() > MAX_HEADER_BYTES {
            return Err(WireError::HeaderTooLarge(MAX_HEADER_BYTES));
        }
        Ok(None)
    }
}
