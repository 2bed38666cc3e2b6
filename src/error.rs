//! Error types for hemera.
//!
//! Every failure that can cross the publish/subscribe boundary is a
//! [`HemeraError`]: a serializable value with a [`ErrorKind`], a human
//! message, an optional nested cause and the stack captured where the
//! framework caught it (`ownStack` on the wire).

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::panic::Location;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NO_TOPIC_TO_SUBSCRIBE: &str = "No topic to subscribe";
pub const NO_TOPIC_TO_REQUEST: &str = "No topic to request";
pub const PATTERN_IN_USE: &str = "Pattern is already in use";
pub const PLUGIN_REGISTERED: &str = "Plugin is already registered";
pub const INVALID_PAYLOAD: &str = "Invalid payload";
pub const PATTERN_NOT_FOUND: &str = "No handler found for this pattern";
pub const BAD_IMPLEMENTATION: &str = "Bad implementation";
pub const TIMEOUT: &str = "Timeout";
pub const CONNECTION_CLOSED: &str = "Connection closed";

/// Classification of a [`HemeraError`].
///
/// The serde names are the wire names peers see in the `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Invalid registration or call input.
    #[serde(rename = "ConfigError")]
    Config,
    /// Envelope bytes could not be encoded or decoded.
    #[serde(rename = "ParseError")]
    Parse,
    /// Payload failed the declared shape check.
    #[serde(rename = "PayloadValidationError")]
    PayloadValidation,
    /// No registered handler matches the request.
    #[serde(rename = "PatternNotFound")]
    PatternNotFound,
    /// Handler reported a failure through its reply channel.
    #[serde(rename = "BusinessError")]
    Business,
    /// Handler failed outside its reply channel.
    #[serde(rename = "ImplementationError")]
    Implementation,
    /// No reply before the deadline.
    #[serde(rename = "TimeoutError")]
    Timeout,
    /// Infrastructure failure, subject to the crash policy.
    #[serde(rename = "FatalError")]
    Fatal,
    /// Call abandoned because the instance closed.
    #[serde(rename = "CancellationError")]
    Cancellation,
    /// Transport refused a publish or subscribe.
    #[serde(rename = "TransportError")]
    Transport,
    /// Opaque error raised by user code.
    #[serde(rename = "Error")]
    External,
}

impl ErrorKind {
    /// Wire name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::PayloadValidation => "PayloadValidationError",
            ErrorKind::PatternNotFound => "PatternNotFound",
            ErrorKind::Business => "BusinessError",
            ErrorKind::Implementation => "ImplementationError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Fatal => "FatalError",
            ErrorKind::Cancellation => "CancellationError",
            ErrorKind::Transport => "TransportError",
            ErrorKind::External => "Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Main error type for all hemera operations.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct HemeraError {
    kind: ErrorKind,
    message: String,
    #[source]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cause: Option<Box<HemeraError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    own_stack: Option<String>,
}

impl HemeraError {
    /// Create an error without cause or stack.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            own_stack: None,
        }
    }

    /// An opaque user error, the equivalent of a plain `Error("...")`.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::External, message)
    }

    /// Convert any error into a cause chain, keeping its `source()` links.
    pub fn from_std(err: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(own) = err.downcast_ref::<HemeraError>() {
            return own.clone();
        }
        let mut converted = Self::msg(err.to_string());
        if let Some(source) = err.source() {
            converted.cause = Some(Box::new(Self::from_std(source)));
        }
        converted
    }

    /// Convert a panic payload into an opaque error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::msg(message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn parse(cause: HemeraError) -> Self {
        Self::new(ErrorKind::Parse, INVALID_PAYLOAD).with_cause(cause)
    }

    pub fn validation(cause: HemeraError) -> Self {
        Self::new(ErrorKind::PayloadValidation, INVALID_PAYLOAD).with_cause(cause)
    }

    pub fn pattern_not_found() -> Self {
        Self::new(ErrorKind::PatternNotFound, PATTERN_NOT_FOUND)
    }

    /// Wrap a failure reported through the reply channel.
    #[track_caller]
    pub fn business(cause: HemeraError) -> Self {
        Self::new(ErrorKind::Business, BAD_IMPLEMENTATION)
            .with_cause(cause)
            .capture_stack()
    }

    /// Wrap a failure that escaped the handler.
    #[track_caller]
    pub fn implementation(cause: HemeraError) -> Self {
        Self::new(ErrorKind::Implementation, BAD_IMPLEMENTATION)
            .with_cause(cause)
            .capture_stack()
    }

    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, TIMEOUT)
    }

    #[track_caller]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message).capture_stack()
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancellation, CONNECTION_CLOSED)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Attach a cause.
    pub fn with_cause(mut self, cause: HemeraError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Record the caller location, plus a backtrace when enabled, as `ownStack`.
    #[track_caller]
    pub fn capture_stack(mut self) -> Self {
        let location = Location::caller();
        let mut stack = format!("{} at {}", self.kind, location);
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            stack.push('\n');
            stack.push_str(&backtrace.to_string());
        }
        self.own_stack = Some(stack);
        self
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Wire name of the kind, e.g. `"TimeoutError"`.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn cause(&self) -> Option<&HemeraError> {
        self.cause.as_deref()
    }

    #[inline]
    pub fn own_stack(&self) -> Option<&str> {
        self.own_stack.as_deref()
    }

    /// Kinds the caller can act on without restarting the process.
    pub fn is_recoverable(&self) -> bool {
        self.kind != ErrorKind::Fatal
    }
}

impl From<&str> for HemeraError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

impl From<String> for HemeraError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<std::io::Error> for HemeraError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}

/// Result type alias using HemeraError.
pub type Result<T> = std::result::Result<T, HemeraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer {
        #[source]
        inner: std::io::Error,
    }

    #[test]
    fn test_kind_names_match_wire_names() {
        let encoded = serde_json::to_value(ErrorKind::Timeout).unwrap();
        assert_eq!(encoded, "TimeoutError");
        assert_eq!(ErrorKind::Timeout.name(), "TimeoutError");
        assert_eq!(ErrorKind::External.name(), "Error");
    }

    #[test]
    fn test_business_error_captures_stack() {
        let err = HemeraError::business(HemeraError::msg("Uups"));
        assert_eq!(err.name(), "BusinessError");
        assert_eq!(err.message(), "Bad implementation");
        assert_eq!(err.cause().unwrap().name(), "Error");
        assert_eq!(err.cause().unwrap().message(), "Uups");
        assert!(err.own_stack().unwrap().contains("error.rs"));
    }

    #[test]
    fn test_from_std_keeps_source_chain() {
        let outer = Outer {
            inner: std::io::Error::new(std::io::ErrorKind::Other, "disk gone"),
        };
        let converted = HemeraError::from_std(&outer);
        assert_eq!(converted.message(), "outer failure");
        assert_eq!(converted.cause().unwrap().message(), "disk gone");
    }

    #[test]
    fn test_from_std_preserves_hemera_errors() {
        let err = HemeraError::config("nope");
        let converted = HemeraError::from_std(&err);
        assert_eq!(converted, err);
    }

    #[test]
    fn test_from_panic_payloads() {
        let err = HemeraError::from_panic(Box::new("Shit!"));
        assert_eq!(err.message(), "Shit!");
        let err = HemeraError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.message(), "owned");
    }

    #[test]
    fn test_serialized_shape() {
        let err = HemeraError::implementation(HemeraError::msg("boom"));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "ImplementationError");
        assert_eq!(value["cause"]["message"], "boom");
        assert!(value["ownStack"].is_string());

        let back: HemeraError = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_fatal_is_not_recoverable() {
        assert!(!HemeraError::fatal("listener died").is_recoverable());
        assert!(HemeraError::timeout().is_recoverable());
    }
}
