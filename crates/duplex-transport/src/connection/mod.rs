//! Polled connection state machine.
//!
//! ```text
//!             reconnect interval elapsed
//!  NotConnected ──────────────────────────▶ Handshaking
//!       ▲                                     │
//!       │ handshake failed / timed out        │ 101 + valid accept
//!       ├─────────────────────────────────────┘
//!       │                                     ▼
//!       └──────── close / error / ────────  Connected
//!                 heartbeat expiry
//! ```
//!
//! The engine does no work on its own. Each [`ConnectionEngine::poll`] call
//! advances the machine by at most one connection attempt, drains whatever
//! bytes are readable and queues the resulting [`ConnectionEvent`]s.

mod engine;
mod heartbeat;

use bytes::Bytes;
pub use engine::ConnectionEngine;

/// Connection state machine states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket, or the last attempt failed.
    NotConnected,
    /// Socket open, upgrade response not yet verified.
    Handshaking,
    /// Upgrade complete, frames flowing.
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Something the engine observed during a poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Upgrade verified.
    Connected {
        /// Request target the connection was opened with.
        path: String,
        protocol: Option<String>,
        session_id: Option<String>,
    },
    /// A live connection went away. Never emitted for failed attempts.
    Disconnected { reason: String },
    /// A complete (possibly reassembled) text message.
    Text(String),
    /// A complete (possibly reassembled) binary message.
    Binary(Bytes),
    /// Ping from the server; the pong has already been sent.
    Ping(Bytes),
    Pong(Bytes),
}
