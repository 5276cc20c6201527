//! # duplex-transport
//!
//! A reconnecting, polled client session for small network devices.
//!
//! ## Layers
//!
//! - [`connection::ConnectionEngine`] owns the socket: connect, upgrade,
//!   framed I/O, optional ping/pong heartbeat and fixed-interval reconnect.
//! - [`DuplexSession`] multiplexes requests and topic subscriptions over
//!   that one connection and replays unacknowledged work after a reconnect.
//!
//! Nothing runs in the background. The caller invokes
//! [`DuplexSession::poll`] every few tens of milliseconds; reads never
//! block and every protocol step that lacks data simply resumes on the
//! next poll.
//!
//! ## Logging
//!
//! The crate emits `tracing` events and installs no subscriber.

pub mod clock;
pub mod config;
pub mod connection;
pub mod duplex;
pub mod error;
mod reconnect;
pub mod socket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConnectionConfig, HeartbeatConfig};
pub use connection::{ConnectionEngine, ConnectionEvent, ConnectionState};
pub use duplex::{
    DuplexSession, Envelope, MessageId, Response, ResponseHandler, SessionState, Topic, Update,
    task,
};
pub use error::{TransportError, TransportResult};
pub use socket::{MemoryPeer, MemorySocket, Socket, TcpSocket};
