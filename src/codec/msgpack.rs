//! MsgPack codec using `rmp-serde`.
//!
//! **CRITICAL**: Always use `to_vec_named`, NEVER `to_vec`!
//! Envelopes must travel in struct-as-map format so that optional fields
//! can be skipped and peers in other languages can read them by name.
//!
//! # Example
//!
//! ```
//! use hemera::codec::{Envelope, EnvelopeCodec, MsgPackCodec};
//! use serde_json::json;
//!
//! let reply = Envelope::success("abc", json!({"result": 3}), Some(json!("trace-1")));
//! let bytes = MsgPackCodec.encode(&reply).unwrap();
//!
//! let decoded = MsgPackCodec.decode(&bytes).unwrap();
//! assert_eq!(decoded.into_outcome().unwrap(), json!({"result": 3}));
//! ```

use bytes::Bytes;

use super::{Envelope, EnvelopeCodec};
use crate::error::{HemeraError, Result};

/// MessagePack codec for envelopes.
///
/// Uses `rmp_serde::to_vec_named` so structs are serialized as maps
/// (with field names) rather than arrays (positional).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the value cannot be serialized.
    #[inline]
    pub fn to_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        // CRITICAL: to_vec_named, NOT to_vec!
        rmp_serde::to_vec_named(value).map_err(|e| HemeraError::parse(HemeraError::from_std(&e)))
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn from_bytes<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| HemeraError::parse(HemeraError::from_std(&e)))
    }
}

impl EnvelopeCodec for MsgPackCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes> {
        Self::to_bytes(envelope).map(Bytes::from)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_envelope_round_trip() {
        let body = json!({"topic": "math", "cmd": "add", "a": 1, "b": 2.5, "tags": ["x"]});
        let envelope = Envelope::request(
            "token",
            body.as_object().cloned().unwrap(),
            Some(json!("meta")),
            None,
        );

        let bytes = MsgPackCodec.encode(&envelope).unwrap();
        let decoded = MsgPackCodec.decode(&bytes).unwrap();

        assert_eq!(decoded.id, "token");
        assert_eq!(decoded.request["cmd"], "add");
        assert_eq!(decoded.request["a"], 1);
        assert_eq!(decoded.request["b"], 2.5);
        assert_eq!(decoded.meta, Some(json!("meta")));
        assert_eq!(decoded.context, None);
    }

    #[test]
    fn test_error_reply_round_trip() {
        let err = HemeraError::implementation(HemeraError::msg("Shit!"));
        let reply = Envelope::failure("token", err.clone(), Some(json!("ctx")));

        let bytes = MsgPackCodec.encode(&reply).unwrap();
        let decoded = MsgPackCodec.decode(&bytes).unwrap();

        assert_eq!(decoded.context, Some(json!("ctx")));
        assert_eq!(decoded.into_outcome().unwrap_err(), err);
    }

    #[test]
    fn test_to_vec_named_produces_map_format() {
        let reply = Envelope::success("t", json!(1), None);
        let encoded = MsgPackCodec.encode(&reply).unwrap();

        // id, timestamp, result: fixmap with 3 elements
        assert_eq!(
            encoded[0], 0x83,
            "Expected map format (0x83), got {:02X}",
            encoded[0]
        );
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let err = MsgPackCodec.decode(b"not valid msgpack").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.message(), "Invalid payload");
    }
}
