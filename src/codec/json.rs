//! JSON codec, wire compatible with JSON-speaking nodes.

use bytes::Bytes;

use super::{Envelope, EnvelopeCodec};
use crate::error::{HemeraError, Result};

/// Default envelope codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes> {
        serde_json::to_vec(envelope)
            .map(Bytes::from)
            .map_err(|e| HemeraError::parse(HemeraError::from_std(&e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        serde_json::from_slice(bytes).map_err(|e| HemeraError::parse(HemeraError::from_std(&e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_round_trip_request() {
        let body = json!({"topic": "math", "cmd": "add", "a": 1, "b": 2});
        let envelope = Envelope::request(
            "token",
            body.as_object().cloned().unwrap(),
            Some(json!({"trace": 1})),
            Some(json!("ctx")),
        );

        let bytes = JsonCodec.encode(&envelope).unwrap();
        assert_eq!(JsonCodec.decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_round_trip_error_reply() {
        let err = HemeraError::business(HemeraError::msg("Uups"));
        let reply = Envelope::failure("token", err.clone(), None);

        let decoded = JsonCodec.decode(&JsonCodec.encode(&reply).unwrap()).unwrap();
        let got = decoded.into_outcome().unwrap_err();
        assert_eq!(got, err);
        assert!(got.own_stack().is_some());
    }

    #[test]
    fn test_decode_garbage_is_parse_error() {
        let err = JsonCodec.decode(b"not json at all").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.message(), "Invalid payload");
        assert!(err.cause().is_some());
    }

    #[test]
    fn test_decode_requires_envelope_fields() {
        let err = JsonCodec.decode(br#"{"topic": "math"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }
}
