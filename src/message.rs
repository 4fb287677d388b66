//! Wire records exchanged with the broker during a poll cycle.

use crate::error::AgentError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Mapping handed to message handlers.
pub type Payload = Map<String, Value>;

/// Opaque transaction record; consumed by at most one handler.
pub type TransactionRecord = Value;

/// A message delivered to this entity, as listed by `plugin/message/list`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    #[serde(deserialize_with = "broker_id")]
    pub message_id: String,
    pub sender_entity_id: String,
    pub message_name: String,
    #[serde(rename = "message", default)]
    pub payload: Payload,
}

impl InboundMessage {
    /// Consumes the message and returns its payload with `message_id` and
    /// `sender_entity_id` injected. Existing keys of the same name are replaced.
    pub fn into_enriched_payload(self) -> (String, Payload) {
        let mut payload = self.payload;
        payload.insert("message_id".to_string(), Value::String(self.message_id));
        payload.insert(
            "sender_entity_id".to_string(),
            Value::String(self.sender_entity_id),
        );
        (self.message_name, payload)
    }
}

/// A reply to a message this entity sent, as listed by `response/list`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseRecord {
    #[serde(deserialize_with = "broker_id")]
    pub message_id: String,
    #[serde(default)]
    pub response: Payload,
}

/// Extracts `reply[field]` and decodes it as a list of `T`.
pub(crate) fn decode_list<T: DeserializeOwned>(
    endpoint: &str,
    mut reply: Value,
    field: &str,
) -> Result<Vec<T>, AgentError> {
    let items = reply
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| AgentError::malformed(endpoint, format!("missing '{}' field", field)))?;

    serde_json::from_value(items).map_err(|e| AgentError::malformed(endpoint, e.to_string()))
}

/// Broker ids arrive as strings or as bare numbers; both decode to a string.
fn broker_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Extracts `reply[field]` as a broker id.
pub(crate) fn decode_string(endpoint: &str, reply: &Value, field: &str) -> Result<String, AgentError> {
    reply
        .get(field)
        .and_then(|value| broker_id(value).ok())
        .ok_or_else(|| AgentError::malformed(endpoint, format!("missing string field '{}'", field)))
}
