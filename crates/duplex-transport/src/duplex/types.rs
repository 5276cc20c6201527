//! Identifiers, topics and task names of the duplex protocol.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Task names understood by the cloud endpoint.
pub mod task {
    /// Keep-alive task, also ignored when pushed by the server.
    pub const PING: &str = "ping";
    /// Server push carrying a topic update. Inbound only.
    pub const UPDATE: &str = "update";
    /// The device was unpaired. Inbound only.
    pub const UNPAIR: &str = "unpair";
    pub const SUBSCRIBE: &str = "/topic/subscribe";
    pub const UNSUBSCRIBE: &str = "/topic/unsubscribe";
    pub const DEVICE_DATA_GET: &str = "/device/data/get";
    pub const DEVICE_DATA_SET: &str = "/device/data/set";
    pub const DATASTORE_INSERT: &str = "/datastore/insert";
    pub const DATASTORE_DELETE: &str = "/datastore/delete";
    pub const DATASTORE_UPDATE: &str = "/datastore/update";
    pub const DATASTORE_PIPELINE: &str = "/datastore/pipeline";
}

/// Correlation id linking a request to its response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Hands out message ids derived from wall-clock microseconds.
///
/// Ids never repeat and never go backwards within one generator, even if
/// the system clock is coarse or steps back.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> MessageId {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_micros() as u64)
            .unwrap_or_default();
        self.next_at(micros)
    }

    fn next_at(&mut self, micros: u64) -> MessageId {
        self.last = micros.max(self.last.saturating_add(1));
        MessageId(self.last)
    }
}

/// Name of a class of pushed updates, optionally hierarchical (`event/path`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A topic split into path segments once, at registration.
///
/// A trailing `/` makes the pattern an open prefix: `data/` matches `data`,
/// `data/` and everything below `data/`. Without it only the exact path
/// matches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<String>,
    open: bool,
}

impl TopicPattern {
    pub fn parse(topic: &str) -> Self {
        let open = topic.ends_with('/');
        let segments = topic
            .trim_end_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Self { segments, open }
    }

    /// Returns `true` when an update published on `path` belongs to this
    /// pattern.
    pub fn matches(&self, path: &str) -> bool {
        let mut candidate = path.split('/').filter(|segment| !segment.is_empty());

        for segment in &self.segments {
            match candidate.next() {
                Some(part) if part == segment => {}
                _ => return false,
            }
        }

        self.open || candidate.next().is_none()
    }

    pub fn is_prefix(&self) -> bool {
        self.open
    }
}

/// Connection status seen by the session's observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
        }
    }
}
