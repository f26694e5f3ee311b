use crate::validate::{validate, Field, ValidationError};
use serde::{Deserialize, Serialize};

/// Metric type. Gauges keep the last written value, counters accumulate.
///
/// # Examples
///
/// ```
/// use pulsemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("bogus".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(ValidationError::EmptyType),
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(ValidationError::InvalidType(other.to_string())),
        }
    }
}

/// The type-relevant reading of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parses a raw value as it appears in a legacy URL path segment.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidValue`] when `raw` is not a finite
    /// float (gauge) or signed 64-bit integer (counter).
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidValue {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(MetricValue::Gauge)
                .ok_or_else(invalid),
            MetricKind::Counter => raw.parse().map(MetricValue::Counter).map_err(|_| invalid()),
        }
    }

    /// Rejects NaN and infinite gauges, which JSON cannot represent.
    fn check_finite(self) -> Result<Self, ValidationError> {
        match self {
            MetricValue::Gauge(v) if !v.is_finite() => Err(ValidationError::InvalidValue {
                kind: MetricKind::Gauge,
                raw: v.to_string(),
            }),
            other => Ok(other),
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

/// Storage identity of a metric: the same id may exist once per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub id: String,
    pub kind: MetricKind,
}

impl MetricKey {
    pub fn new(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A validated metric. Exactly one of gauge value or counter delta is
/// carried, selected by [`MetricValue`].
///
/// Serializes to and from the [`MetricPayload`] wire shape, so decoding
/// untrusted JSON into a `Metric` runs full validation.
///
/// # Examples
///
/// ```
/// use pulsemon_common::types::Metric;
///
/// let m = Metric::counter("PollCount", 3);
/// let json = serde_json::to_string(&m).unwrap();
/// assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":3}"#);
///
/// let back: Metric = serde_json::from_str(&json).unwrap();
/// assert_eq!(back, m);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "MetricPayload", try_from = "MetricPayload")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.id.clone(), self.kind())
    }
}

/// Untrusted JSON shape of a metric as it appears on the wire.
///
/// Missing fields decode to their empty defaults so that validation, not the
/// JSON decoder, reports what is wrong with a payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl MetricPayload {
    /// Validates id and type only, as needed by lookups.
    pub fn key(&self) -> Result<MetricKey, ValidationError> {
        validate(self, &[Field::Id, Field::Type])?;
        Ok(MetricKey::new(self.id.clone(), self.kind.parse()?))
    }
}

impl From<Metric> for MetricPayload {
    fn from(metric: Metric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Gauge(v) => (None, Some(v)),
            MetricValue::Counter(d) => (Some(d), None),
        };
        Self {
            id: metric.id,
            kind: metric.value.kind().to_string(),
            delta,
            value,
            hash: None,
        }
    }
}

impl TryFrom<MetricPayload> for Metric {
    type Error = ValidationError;

    fn try_from(payload: MetricPayload) -> Result<Self, Self::Error> {
        validate(&payload, &[])?;
        let value = match payload.kind.parse()? {
            MetricKind::Gauge => payload.value.map(MetricValue::Gauge),
            MetricKind::Counter => payload.delta.map(MetricValue::Counter),
        };
        Ok(Self {
            id: payload.id,
            value: value.ok_or(ValidationError::NoValue)?.check_finite()?,
        })
    }
}
