//! Messages kept for retransmission after a reconnect.

use std::collections::BTreeMap;

use tracing::warn;

use super::types::{MessageId, Topic, task};

/// A serialized message waiting to be (re)sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferEntry {
    pub task: String,
    /// Topic of a subscribe request.
    pub topic: Option<Topic>,
    /// The envelope exactly as it goes on the wire.
    pub message: String,
}

impl BufferEntry {
    pub fn is_subscription(&self) -> bool {
        self.task == task::SUBSCRIBE
    }
}

/// Id-ordered replay store.
///
/// Ids grow monotonically, so ascending id order is insertion order.
#[derive(Debug)]
pub struct ReplayBuffer {
    entries: BTreeMap<MessageId, BufferEntry>,
    max_entries: usize,
}

impl ReplayBuffer {
    /// Creates a buffer that starts evicting old requests past `max_entries`.
    /// Subscribe requests are never evicted.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_entries,
        }
    }

    pub fn push(&mut self, id: MessageId, entry: BufferEntry) {
        self.entries.insert(id, entry);

        while self.entries.len() > self.max_entries {
            let Some(oldest) = self
                .entries
                .iter()
                .find(|(_, entry)| !entry.is_subscription())
                .map(|(id, _)| *id)
            else {
                break;
            };

            if let Some(evicted) = self.entries.remove(&oldest) {
                warn!(
                    id = %oldest,
                    task = %evicted.task,
                    limit = self.max_entries,
                    "replay buffer full, dropping oldest message"
                );
            }
        }
    }

    pub fn remove(&mut self, id: MessageId) -> Option<BufferEntry> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: MessageId) -> Option<&BufferEntry> {
        self.entries.get(&id)
    }

    /// Drops every buffered subscribe request for `topic`.
    pub fn remove_subscriptions_for(&mut self, topic: &Topic) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !(entry.is_subscription() && entry.topic.as_ref() == Some(topic)));
        before - self.entries.len()
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (MessageId, &BufferEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
