//! Payload validation against a declared shape.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::{HemeraError, Result};
use crate::pattern::{FieldType, Shape};

/// Why a payload was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    /// Offending field.
    pub field: String,
    /// Declared type, when the failure is a type mismatch.
    pub expected: Option<FieldType>,
    /// Value found, `None` when the field is missing.
    pub actual: Option<Value>,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.actual, self.expected) {
            (Some(actual), Some(expected)) => write!(
                f,
                "The value {} is not of type '{}' (parent: {}).",
                actual,
                expected.name(),
                self.field
            ),
            _ => write!(
                f,
                "The property \"{}\" is missing and is required (parent: {}).",
                self.field, self.field
            ),
        }
    }
}

impl From<ValidationFailure> for HemeraError {
    fn from(failure: ValidationFailure) -> Self {
        HemeraError::validation(HemeraError::msg(failure.to_string()))
    }
}

/// Validation collaborator.
pub trait PayloadValidator: Send + Sync + 'static {
    /// Check `payload` against `shape`, reporting the first offending field.
    fn validate(&self, payload: &Map<String, Value>, shape: &Shape)
        -> std::result::Result<(), ValidationFailure>;
}

/// Built-in validator for `type$` / `required$` declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeValidator;

impl PayloadValidator for ShapeValidator {
    fn validate(
        &self,
        payload: &Map<String, Value>,
        shape: &Shape,
    ) -> std::result::Result<(), ValidationFailure> {
        for (field, rule) in shape {
            match payload.get(field) {
                None | Some(Value::Null) => {
                    if rule.required {
                        return Err(ValidationFailure {
                            field: field.clone(),
                            expected: rule.ty,
                            actual: None,
                        });
                    }
                }
                Some(value) => {
                    if let Some(ty) = rule.ty {
                        if !ty.accepts(value) {
                            return Err(ValidationFailure {
                                field: field.clone(),
                                expected: Some(ty),
                                actual: Some(value.clone()),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Validate and convert a failure into a `PayloadValidationError`.
pub(crate) fn check(
    validator: &dyn PayloadValidator,
    payload: &Map<String, Value>,
    shape: &Shape,
) -> Result<()> {
    if shape.is_empty() {
        return Ok(());
    }
    validator.validate(payload, shape).map_err(HemeraError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pattern::FieldRule;
    use serde_json::json;

    fn shape(field: &str, rule: FieldRule) -> Shape {
        let mut shape = Shape::new();
        shape.insert(field.to_string(), rule);
        shape
    }

    #[test]
    fn test_type_mismatch_message() {
        let payload = json!({"a": "1"}).as_object().cloned().unwrap();
        let err = check(&ShapeValidator, &payload, &shape("a", FieldType::Number.into()))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PayloadValidation);
        assert_eq!(err.message(), "Invalid payload");
        assert_eq!(err.cause().unwrap().name(), "Error");
        assert_eq!(
            err.cause().unwrap().message(),
            "The value \"1\" is not of type 'number' (parent: a)."
        );
    }

    #[test]
    fn test_matching_types_pass() {
        let payload = json!({"a": 1, "b": "x", "c": true, "d": {}, "e": []})
            .as_object()
            .cloned()
            .unwrap();
        let mut shape = Shape::new();
        shape.insert("a".into(), FieldType::Number.into());
        shape.insert("b".into(), FieldType::String.into());
        shape.insert("c".into(), FieldType::Boolean.into());
        shape.insert("d".into(), FieldType::Object.into());
        shape.insert("e".into(), FieldType::Array.into());

        assert!(check(&ShapeValidator, &payload, &shape).is_ok());
    }

    #[test]
    fn test_optional_field_may_be_absent() {
        let payload = Map::new();
        assert!(check(&ShapeValidator, &payload, &shape("a", FieldType::Number.into())).is_ok());
    }

    #[test]
    fn test_required_field_missing() {
        let payload = Map::new();
        let rule = FieldRule::from(FieldType::String).required();
        let failure = ShapeValidator
            .validate(&payload, &shape("to", rule))
            .unwrap_err();

        assert_eq!(failure.field, "to");
        assert_eq!(failure.actual, None);
        assert_eq!(
            failure.to_string(),
            "The property \"to\" is missing and is required (parent: to)."
        );
    }
}
