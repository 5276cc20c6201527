//! # duplex-wire
//!
//! Client-side RFC 6455 building blocks for long-lived device sessions:
//! frame encoding/decoding with mandatory client masking, and the HTTP
//! upgrade handshake driven one response line at a time.
//!
//! The crate never touches a socket. Callers feed it bytes as they arrive
//! (possibly a few at a time on slow links) and write out whatever it
//! produces.
//!
//! # Example
//! ```rust
//! use bytes::BytesMut;
//! use duplex_wire::{Role, codec::Codec, frame::Frame};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut client = Codec::new(Role::Client, 1 << 20);
//! let mut server = Codec::new(Role::Server, 1 << 20);
//!
//! let mut wire = BytesMut::new();
//! client.encode(Frame::text("hello"), &mut wire)?;
//!
//! let frame = server.decode(&mut wire)?.expect("complete frame");
//! assert_eq!(frame.payload().as_ref(), b"hello");
//! # Ok::<(), duplex_wire::WireError>(())
//! ```

pub mod close;
pub mod codec;
pub mod frame;
pub mod handshake;
pub mod mask;

use thiserror::Error;

/// Result type for wire-level operations.
pub type WireResult<T> = std::result::Result<T, WireError>;

/// Which end of the connection a codec speaks for.
///
/// Client frames are always masked; server frames never are.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// The specific framing rule a malformed frame broke.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameFault {
    /// RSV1-3 set without a negotiated extension.
    #[error("reserved bits are not zero")]
    ReservedBits,

    /// Declared payload length exceeds what the decoder accepts.
    #[error("payload length {len} exceeds limit {max}")]
    LengthOverflow { len: u64, max: usize },

    /// Opcode in the reserved ranges 0x3-0x7 or 0xB-0xF.
    #[error("unknown opcode {0:#x}")]
    UnknownOpCode(u8),

    /// Close, ping or pong without FIN.
    #[error("control frame must not be fragmented")]
    FragmentedControl,

    /// Control frame payload above 125 bytes.
    #[error("control frame payload of {0} bytes is too large")]
    ControlTooLarge(usize),

    /// Continuation without a started message, or a new message before the
    /// previous one finished.
    #[error("invalid fragment sequence")]
    FragmentSequence,
}

/// Errors produced while framing or upgrading a connection.
#[derive(Error, Debug)]
pub enum WireError {
    /// Frame header violates RFC 6455 framing rules.
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] FrameFault),

    /// Payload contains invalid UTF-8.
    #[error("Invalid UTF-8")]
    InvalidUtf8,

    /// Response finished without an `HTTP/1.x` status line.
    #[error("Missing status line in upgrade response")]
    MissingStatusLine,

    /// HTTP status code not valid for a protocol switch.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Missing or invalid "Upgrade: websocket" header.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// Missing or invalid "Connection: upgrade" header.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// Server omitted Sec-WebSocket-Accept.
    #[error("Sec-WebSocket-Accept header is missing")]
    MissingAccept,

    /// Sec-WebSocket-Accept does not match the key we sent.
    #[error("Sec-WebSocket-Accept mismatch (expected {expected}, got {actual})")]
    AcceptMismatch { expected: String, actual: String },

    /// Upgrade response headers grew past the accepted size.
    #[error("Upgrade response headers exceed {0} bytes")]
    HeaderTooLarge(usize),

    /// I/O failure surfaced through a codec.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Returns `true` if this is a framing violation.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::MalformedFrame(_) | Self::InvalidUtf8)
    }

    /// Returns `true` if the upgrade handshake was rejected.
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::MissingStatusLine
                | Self::InvalidStatusCode(_)
                | Self::InvalidUpgradeHeader
                | Self::InvalidConnectionHeader
                | Self::MissingAccept
                | Self::AcceptMismatch { .. }
                | Self::HeaderTooLarge(_)
        )
    }
}
