//! The wire envelope.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HemeraError, Result};

/// The unit published on the transport.
///
/// Requests carry the caller's message in `request`; replies carry either
/// `result` or `error`. Both directions carry the correlation `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation token.
    pub id: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Pattern fields and payload, side by side.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub request: Map<String, Value>,
    #[serde(rename = "meta$", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(rename = "context$", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HemeraError>,
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(
        id: impl Into<String>,
        request: Map<String, Value>,
        meta: Option<Value>,
        context: Option<Value>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: now_millis(),
            request,
            meta,
            context,
            result: None,
            error: None,
        }
    }

    /// Build a success reply.
    pub fn success(id: impl Into<String>, result: Value, context: Option<Value>) -> Self {
        Self {
            id: id.into(),
            timestamp: now_millis(),
            request: Map::new(),
            meta: None,
            context,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error reply.
    pub fn failure(id: impl Into<String>, error: HemeraError, context: Option<Value>) -> Self {
        Self {
            id: id.into(),
            timestamp: now_millis(),
            request: Map::new(),
            meta: None,
            context,
            result: None,
            error: Some(error),
        }
    }

    /// Turn a reply into the caller-visible outcome.
    pub fn into_outcome(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_outcome() {
        let reply = Envelope::success("1", json!({"result": 3}), None);
        assert_eq!(reply.into_outcome().unwrap(), json!({"result": 3}));
    }

    #[test]
    fn test_empty_reply_is_null() {
        let reply = Envelope::success("1", Value::Null, None);
        assert_eq!(reply.into_outcome().unwrap(), Value::Null);
    }

    #[test]
    fn test_failure_outcome() {
        let reply = Envelope::failure("1", HemeraError::pattern_not_found(), None);
        let err = reply.into_outcome().unwrap_err();
        assert_eq!(err.name(), "PatternNotFound");
    }

    #[test]
    fn test_reserved_field_names_on_the_wire() {
        let envelope = Envelope::request("1", Map::new(), Some(json!("m")), Some(json!("c")));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["meta$"], "m");
        assert_eq!(value["context$"], "c");
        assert!(value.get("request").is_none());
        assert!(value["timestamp"].as_u64().unwrap() > 0);
    }
}
