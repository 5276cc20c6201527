//! The `{header, payload}` message exchanged over a duplex session.

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

use super::types::{MessageId, task};
use crate::error::TransportResult;

/// Event name that carries device data updates.
pub const DATA_EVENT: &str = "data";

/// Older event names still sent by some servers for data updates.
const LEGACY_DATA_EVENTS: [&str; 2] = ["deviceParms", "deviceSummary"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: MessageId,
    pub task: String,
}

/// One protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Header,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn new(id: MessageId, task: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            header: Header {
                id,
                task: task.into(),
            },
            payload,
        }
    }

    pub fn id(&self) -> MessageId {
        self.header.id
    }

    pub fn task(&self) -> &str {
        &self.header.task
    }

    pub fn parse(text: &str) -> TransportResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> TransportResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Splits a task response into status code and caller-facing payload.
    pub fn into_response(self) -> Response {
        let mut payload = self.payload.unwrap_or(Value::Null);
        let mut code = None;

        if let Some(fields) = payload.as_object_mut() {
            code = match fields.remove("code") {
                Some(Value::String(code)) => Some(code),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            };
            fields.remove("message");
        }

        Response {
            id: self.header.id,
            task: self.header.task,
            code,
            payload,
        }
    }

    /// Reads an `update` push, mapping legacy data event names to `data`.
    ///
    /// Returns `None` when the payload carries no event name.
    pub fn into_update(self) -> Option<Update> {
        let Value::Object(mut fields) = self.payload? else {
            return None;
        };

        let event = match fields.remove("event")? {
            Value::String(event) => event,
            _ => return None,
        };
        let event = if LEGACY_DATA_EVENTS.contains(&event.as_str()) {
            DATA_EVENT.to_string()
        } else {
            event
        };

        let path = match fields.remove("path") {
            Some(Value::String(path)) => path,
            _ => String::new(),
        };

        Some(Update {
            event,
            path,
            data: fields.remove("update").unwrap_or(Value::Null),
        })
    }

    pub fn is_update(&self) -> bool {
        self.header.task == task::UPDATE
    }
}

/// A task response, with the reserved `code` and `message` fields removed
/// from `payload`.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub id: MessageId,
    pub task: String,
    pub code: Option<String>,
    pub payload: Value,
}

/// A pushed topic update.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub event: String,
    pub path: String,
    pub data: Value,
}

impl Update {
    /// `event/path`, the string subscriptions are matched against.
    pub fn topic_path(&self) -> String {
        format!("{}/{}", self.event, self.path)
    }

    pub fn is_data(&self) -> bool {
        self.event == DATA_EVENT
    }
}

fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<MessageId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(MessageId::new(id)),
        RawId::Text(text) => text
            .trim()
            .parse()
            .map(MessageId::new)
            .map_err(|_| de::Error::custom(format!("invalid message id: {text}"))),
    }
}
