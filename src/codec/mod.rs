//! Codec module - envelope serialization and payload validation.
//!
//! - [`Envelope`] - the wire unit exchanged between nodes
//! - [`EnvelopeCodec`] - bytes <-> envelope, with [`JsonCodec`] (default)
//!   and [`MsgPackCodec`] implementations
//! - [`PayloadValidator`] - checks a payload against a declared [`Shape`](crate::pattern::Shape)
//!
//! # Example
//!
//! ```
//! use hemera::codec::{Envelope, EnvelopeCodec, JsonCodec};
//! use serde_json::json;
//!
//! let request = json!({"topic": "math", "cmd": "add", "a": 1, "b": 2});
//! let envelope = Envelope::request("abc", request.as_object().cloned().unwrap(), None, None);
//!
//! let bytes = JsonCodec.encode(&envelope).unwrap();
//! let decoded = JsonCodec.decode(&bytes).unwrap();
//! assert_eq!(decoded, envelope);
//! ```

mod envelope;
mod json;
mod msgpack;
pub(crate) mod validate;

use bytes::Bytes;

use crate::error::Result;

pub use envelope::Envelope;
pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
pub use validate::{PayloadValidator, ShapeValidator, ValidationFailure};

/// Serializes envelopes to and from the transport's byte representation.
///
/// Decode failures must surface as [`ErrorKind::Parse`](crate::error::ErrorKind::Parse).
pub trait EnvelopeCodec: Send + Sync + 'static {
    /// Encode an envelope.
    fn encode(&self, envelope: &Envelope) -> Result<Bytes>;

    /// Decode bytes into an envelope.
    fn decode(&self, bytes: &[u8]) -> Result<Envelope>;
}
