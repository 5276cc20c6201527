//! The duplex messaging protocol on top of a [`ConnectionEngine`].
//!
//! Every message is a JSON envelope `{"header":{"id":..,"task":..},"payload":..}`
//! sent as one text frame. Responses are matched to requests by id,
//! `update` pushes are routed to topic subscribers, and requests issued
//! while offline wait in a replay buffer.
//!
//! [`ConnectionEngine`]: crate::connection::ConnectionEngine

mod envelope;
mod pending;
mod replay;
mod session;
mod subscription;
mod types;

pub use envelope::{DATA_EVENT, Envelope, Header, Response, Update};
pub use pending::{CorrelationRegistry, ResponseHandler};
pub use replay::{BufferEntry, ReplayBuffer};
pub use session::{ConnectionHandler, DuplexSession};
pub use subscription::{SubscriptionRegistry, UpdateHandler};
pub use types::{IdGenerator, MessageId, SessionState, Topic, TopicPattern, task};
