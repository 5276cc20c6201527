//! Persistent topic handlers.
//!
//! Subscriptions outlive disconnects; only an explicit unsubscribe removes
//! them. Several handlers may share one topic, and one update may reach
//! handlers on several topics.

use std::collections::BTreeMap;

use super::{
    envelope::Update,
    types::{MessageId, Topic, TopicPattern},
};

/// Invoked for every update delivered to a topic.
pub type UpdateHandler = Box<dyn FnMut(&Update) + Send>;

struct Subscriber {
    id: MessageId,
    handler: UpdateHandler,
}

struct TopicEntry {
    pattern: TopicPattern,
    subscribers: Vec<Subscriber>,
}

/// Topic-keyed store of update handlers.
#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: BTreeMap<Topic, TopicEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handler` under `topic`. `id` is the subscribe request that
    /// created it.
    pub fn register(&mut self, topic: Topic, id: MessageId, handler: UpdateHandler) {
        let entry = self.topics.entry(topic).or_insert_with_key(|topic| TopicEntry {
            pattern: TopicPattern::parse(topic.as_str()),
            subscribers: Vec::new(),
        });
        entry.subscribers.push(Subscriber { id, handler });
    }

    /// Removes every handler for `topic`.
    pub fn unregister(&mut self, topic: &Topic) -> bool {
        self.topics.remove(topic).is_some()
    }

    /// Removes the handler registered by subscribe request `id`.
    pub fn unregister_id(&mut self, topic: &Topic, id: MessageId) -> bool {
        let Some(entry) = self.topics.get_mut(topic) else {
            return false;
        };

        let before = entry.subscribers.len();
        entry.subscribers.retain(|subscriber| subscriber.id != id);
        let removed = entry.subscribers.len() != before;

        if entry.subscribers.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// Delivers `update` to every topic whose pattern matches `path`.
    ///
    /// Returns the number of handlers invoked.
    pub fn match_and_emit(&mut self, path: &str, update: &Update) -> usize {
        let mut fired = 0;
        for entry in self.topics.values_mut() {
            if entry.pattern.matches(path) {
                fired += emit(entry, update);
            }
        }
        fired
    }

    /// Delivers `update` to the handlers of exactly `topic`.
    pub fn emit_exact(&mut self, topic: &str, update: &Update) -> usize {
        match self.topics.get_mut(&Topic::from(topic)) {
            Some(entry) => emit(entry, update),
            None => 0,
        }
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.keys()
    }

    /// Number of topics with at least one handler.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

fn emit(entry: &mut TopicEntry, update: &Update) -> usize {
    for subscriber in &mut entry.subscribers {
        (subscriber.handler)(update);
    }
    entry.subscribers.len()
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.topics
                    .iter()
                    .map(|(topic, entry)| (topic.as_str(), entry.subscribers.len())),
            )
            .finish()
    }
}
