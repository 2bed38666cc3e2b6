//! Patterns: the structured keys handlers are bound to.
//!
//! A [`Pattern`] is an ordered mapping of keys to [`Scalar`] values plus an
//! optional declared payload shape. Keys ending in `$` are reserved for
//! framework annotations (`meta$`, `context$`, `type$`, ...) and never take
//! part in equality or matching.
//!
//! # Example
//!
//! ```
//! use hemera::pattern::{FieldType, Pattern};
//! use serde_json::json;
//!
//! let pattern = Pattern::new()
//!     .with("topic", "math")
//!     .with("cmd", "add")
//!     .declare("a", FieldType::Number);
//!
//! assert!(pattern.matches(json!({"topic": "math", "cmd": "add", "a": 1}).as_object().unwrap()));
//!
//! let parsed = Pattern::from_value(&json!({
//!     "topic": "math",
//!     "cmd": "add",
//!     "a": { "type$": "number" }
//! })).unwrap();
//! assert_eq!(parsed, pattern);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{HemeraError, Result};

/// Suffix marking reserved keys.
pub const RESERVED_SUFFIX: char = '$';

/// Key that names the subject a pattern is published on.
pub const TOPIC_KEY: &str = "topic";

/// Returns true for framework keys such as `meta$`.
#[inline]
pub fn is_reserved(key: &str) -> bool {
    key.ends_with(RESERVED_SUFFIX)
}

/// A pattern field value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    String(String),
}

impl Scalar {
    /// Convert a JSON value, rejecting non-scalars.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => Some(Scalar::Number(n.clone())),
            Value::String(s) => Some(Scalar::String(s.clone())),
            _ => None,
        }
    }

    /// Whether an inbound field carries this value. Numbers compare
    /// numerically; two integers compare exactly.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Scalar::Bool(a), Value::Bool(b)) => a == b,
            (Scalar::Number(a), Value::Number(b)) => same_number(a, b),
            (Scalar::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => Value::Number(n.clone()),
            Scalar::String(s) => Value::String(s.clone()),
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Number(a), Scalar::Number(b)) => same_number(a, b),
            (Scalar::String(a), Scalar::String(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::String(s)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// Non-finite values have no JSON form and are stored as zero.
impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Scalar::Number(Number::from_f64(n).unwrap_or_else(|| Number::from(0)))
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Number(Number::from(n))
    }
}

impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Scalar::Number(Number::from(n))
    }
}

impl From<u64> for Scalar {
    fn from(n: u64) -> Self {
        Scalar::Number(Number::from(n))
    }
}

fn same_number(a: &Number, b: &Number) -> bool {
    if a.is_f64() || b.is_f64() {
        return a.as_f64() == b.as_f64();
    }
    a.as_i64() == b.as_i64() && a.as_u64() == b.as_u64()
}

/// Declared type of a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    String,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "number" => Some(FieldType::Number),
            "string" => Some(FieldType::String),
            "boolean" => Some(FieldType::Boolean),
            "object" => Some(FieldType::Object),
            "array" => Some(FieldType::Array),
            _ => None,
        }
    }

    /// Whether `value` is of this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::Number => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

impl From<FieldType> for FieldRule {
    fn from(ty: FieldType) -> Self {
        FieldRule {
            ty: Some(ty),
            required: false,
        }
    }
}

/// Constraint declared for one payload field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Expected type, if any.
    #[serde(rename = "type$", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<FieldType>,
    /// Whether the field must be present.
    #[serde(rename = "required$", default)]
    pub required: bool,
}

impl FieldRule {
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Declared payload shape: field name to rule.
pub type Shape = BTreeMap<String, FieldRule>;

/// A set of key/value pairs identifying a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pattern {
    fields: BTreeMap<String, Scalar>,
    shape: Shape,
}

impl Pattern {
    /// Create an empty pattern.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a discriminating field. Reserved keys are ignored.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        let key = key.into();
        if !is_reserved(&key) {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Declare a payload field constraint.
    pub fn declare(mut self, key: impl Into<String>, rule: impl Into<FieldRule>) -> Self {
        self.shape.insert(key.into(), rule.into());
        self
    }

    /// Parse a JSON object. Object values are read as field declarations
    /// (`{"type$": "number", "required$": true}`); reserved keys are dropped.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| HemeraError::config("Pattern must be an object"))?;

        let mut pattern = Pattern::new();
        for (key, value) in object {
            if is_reserved(key) {
                continue;
            }
            if let Some(scalar) = Scalar::from_value(value) {
                pattern.fields.insert(key.clone(), scalar);
                continue;
            }
            let rule = parse_rule(key, value)?;
            pattern.shape.insert(key.clone(), rule);
        }
        Ok(pattern)
    }

    /// The `topic` field, when it is a non-empty string.
    pub fn topic(&self) -> Option<&str> {
        self.fields
            .get(TOPIC_KEY)
            .and_then(Scalar::as_str)
            .filter(|t| !t.is_empty())
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of discriminating fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Structural equality on discriminating fields only.
    pub fn same_key_set(&self, other: &Pattern) -> bool {
        self.fields == other.fields
    }

    /// True when every field of this pattern is present in `message` with
    /// an equal value.
    pub fn matches(&self, message: &Map<String, Value>) -> bool {
        self.fields
            .iter()
            .all(|(key, expected)| message.get(key).is_some_and(|v| expected.matches(v)))
    }

    /// Plain mapping for introspection.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.to_value());
        }
        for (key, rule) in &self.shape {
            if let Ok(rule) = serde_json::to_value(rule) {
                object.insert(key.clone(), rule);
            }
        }
        Value::Object(object)
    }
}

fn parse_rule(key: &str, value: &Value) -> Result<FieldRule> {
    let object = value.as_object().ok_or_else(|| {
        HemeraError::config(format!("Unsupported value for pattern field '{}'", key))
    })?;

    let ty = match object.get("type$") {
        Some(Value::String(name)) => Some(FieldType::parse(name).ok_or_else(|| {
            HemeraError::config(format!("Unknown type '{}' for pattern field '{}'", name, key))
        })?),
        Some(_) => {
            return Err(HemeraError::config(format!(
                "type$ of pattern field '{}' must be a string",
                key
            )))
        }
        None => None,
    };
    let required = object
        .get("required$")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(FieldRule { ty, required })
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", key, value)?;
            first = false;
        }
        Ok(())
    }
}
