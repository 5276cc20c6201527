//! One-shot response handlers keyed by message id.

use std::collections::HashMap;

use super::{envelope::Response, types::MessageId};

/// Invoked once with the response to a task.
pub type ResponseHandler = Box<dyn FnOnce(Response) + Send>;

/// Handlers waiting for a task response.
///
/// Entries leave the registry exactly once: when their response arrives or
/// when the registry is cleared on disconnect.
#[derive(Default)]
pub struct CorrelationRegistry {
    handlers: HashMap<MessageId, ResponseHandler>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `id`, replacing any handler already there.
    pub fn register(&mut self, id: MessageId, handler: ResponseHandler) {
        if self.handlers.insert(id, handler).is_some() {
            tracing::debug!(%id, "replaced pending response handler");
        }
    }

    /// Invokes and removes the handler for `id`.
    ///
    /// Returns `false` when nothing is waiting for `id`.
    pub fn resolve(&mut self, id: MessageId, response: Response) -> bool {
        match self.handlers.remove(&id) {
            Some(handler) => {
                handler(response);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Drops every pending handler without invoking it.
    pub fn clear_all(&mut self) -> usize {
        let dropped = self.handlers.len();
        self.handlers.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for CorrelationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationRegistry")
            .field("pending", &self.handlers.len())
            .finish()
    }
}
