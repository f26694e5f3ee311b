//! Field-level checks gating every write.

use crate::types::{MetricKind, MetricPayload};

/// Selects which parts of a payload [`validate`] inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Type,
    Value,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("metric id is empty")]
    EmptyId,

    #[error("metric type is empty")]
    EmptyType,

    #[error("invalid metric type: {0}")]
    InvalidType(String),

    #[error("metric has no value")]
    NoValue,

    #[error("invalid {kind} value: {raw}")]
    InvalidValue { kind: MetricKind, raw: String },
}

/// Checks the selected fields of `payload`. An empty selection checks all of
/// them. Fields are always checked in id, type, value order, so the first
/// failure reported is stable regardless of how the selection is written.
///
/// # Examples
///
/// ```
/// use pulsemon_common::types::MetricPayload;
/// use pulsemon_common::validate::{validate, Field, ValidationError};
///
/// let payload = MetricPayload {
///     id: String::new(),
///     kind: "gauge".into(),
///     value: Some(1.0),
///     ..Default::default()
/// };
/// assert_eq!(validate(&payload, &[Field::Id]), Err(ValidationError::EmptyId));
/// assert_eq!(validate(&payload, &[Field::Type, Field::Value]), Ok(()));
/// ```
pub fn validate(payload: &MetricPayload, fields: &[Field]) -> Result<(), ValidationError> {
    let selected = |field: Field| fields.is_empty() || fields.contains(&field);

    if selected(Field::Id) && payload.id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if selected(Field::Type) {
        payload.kind.parse::<MetricKind>()?;
    }
    if selected(Field::Value) && payload.delta.is_none() && payload.value.is_none() {
        return Err(ValidationError::NoValue);
    }
    Ok(())
}
