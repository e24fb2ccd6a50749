use serde::{Deserialize, Serialize};

/// Kind of a metric, which decides how updates combine with the stored value.
///
/// # Examples
///
/// ```
/// use rtmon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Absolute point-in-time reading; updates overwrite.
    Gauge,
    /// Running total; updates accumulate.
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
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(MetricError::UnknownKind(s.to_string())),
        }
    }
}

/// Errors raised when a metric does not satisfy the data model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("unknown metric type '{0}'")]
    UnknownKind(String),

    #[error("metric '{id}' of type {kind} carries no {expected} field")]
    MissingPayload {
        id: String,
        kind: MetricKind,
        expected: &'static str,
    },

    #[error("metric id must not be empty")]
    EmptyId,

    #[error("counter '{id}' would overflow")]
    Overflow { id: String },

    #[error("gauge '{id}' has a non-finite value")]
    NonFinite { id: String },

    #[error("metric '{id}' of type {kind} must not carry a {unexpected} field")]
    UnexpectedPayload {
        id: String,
        kind: MetricKind,
        unexpected: &'static str,
    },
}

/// The unit of information flowing from agent to aggregator.
///
/// On the wire this is `{"id": .., "type": .., "delta": .., "value": ..}` with
/// exactly one of `delta` (counter) or `value` (gauge) present.
///
/// # Examples
///
/// ```
/// use rtmon_common::types::Metric;
///
/// let m = Metric::counter("PollCount", 3);
/// let json = serde_json::to_string(&m).unwrap();
/// assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":3}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// A metric with neither payload populated. Used as a lookup key and never
    /// treated as a stored value.
    pub fn placeholder(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind,
            delta: None,
            value: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.delta.is_none() && self.value.is_none()
    }

    /// Checks that the id is non-empty and exactly the payload matching
    /// `kind` is present.
    pub fn validate(&self) -> Result<(), MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        match self.kind {
            MetricKind::Gauge => {
                match self.value {
                    None => {
                        return Err(MetricError::MissingPayload {
                            id: self.id.clone(),
                            kind: self.kind,
                            expected: "value",
                        })
                    }
                    Some(v) if !v.is_finite() => {
                        return Err(MetricError::NonFinite { id: self.id.clone() })
                    }
                    Some(_) => {}
                }
                if self.delta.is_some() {
                    return Err(MetricError::UnexpectedPayload {
                        id: self.id.clone(),
                        kind: self.kind,
                        unexpected: "delta",
                    });
                }
            }
            MetricKind::Counter => {
                if self.delta.is_none() {
                    return Err(MetricError::MissingPayload {
                        id: self.id.clone(),
                        kind: self.kind,
                        expected: "delta",
                    });
                }
                if self.value.is_some() {
                    return Err(MetricError::UnexpectedPayload {
                        id: self.id.clone(),
                        kind: self.kind,
                        unexpected: "value",
                    });
                }
            }
        }
        Ok(())
    }

    /// Folds `update` into `self`: gauges overwrite, counters accumulate.
    ///
    /// A kind change replaces the stored metric entirely. A counter sum that
    /// leaves the `i64` range is an error and leaves `self` untouched.
    pub fn merge(&mut self, update: &Metric) -> Result<(), MetricError> {
        if self.kind != update.kind {
            *self = update.clone();
            return Ok(());
        }
        match update.kind {
            MetricKind::Gauge => self.value = update.value,
            MetricKind::Counter => {
                let stored = self.delta.unwrap_or(0);
                let sum = stored
                    .checked_add(update.delta.unwrap_or(0))
                    .ok_or_else(|| MetricError::Overflow { id: self.id.clone() })?;
                self.delta = Some(sum);
            }
        }
        Ok(())
    }

    /// Renders the payload as the plain-text form used by the `/value` endpoint.
    pub fn payload_string(&self) -> String {
        match (self.kind, self.delta, self.value) {
            (MetricKind::Counter, Some(d), _) => d.to_string(),
            (MetricKind::Gauge, _, Some(v)) => v.to_string(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_wire_format_omits_delta() {
        let json = serde_json::to_string(&Metric::gauge("Alloc", 1.5)).unwrap();
        assert_eq!(json, r#"{"id":"Alloc","type":"gauge","value":1.5}"#);
    }

    #[test]
    fn decodes_lookup_request_without_payload() {
        let m: Metric = serde_json::from_str(r#"{"id":"x","type":"gauge"}"#).unwrap();
        assert!(m.is_placeholder());
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_unknown_type_on_the_wire() {
        let res: Result<Metric, _> = serde_json::from_str(r#"{"id":"x","type":"summary","value":1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn validate_catches_mismatched_payload() {
        let mut m = Metric::counter("c", 1);
        m.value = Some(2.0);
        assert!(matches!(
            m.validate(),
            Err(MetricError::UnexpectedPayload { unexpected: "value", .. })
        ));

        let mut g = Metric::gauge("g", 1.0);
        g.value = None;
        assert!(matches!(
            g.validate(),
            Err(MetricError::MissingPayload { expected: "value", .. })
        ));
    }

    #[test]
    fn validate_rejects_non_finite_gauges() {
        assert!(matches!(
            Metric::gauge("g", f64::NAN).validate(),
            Err(MetricError::NonFinite { .. })
        ));
        assert!(Metric::gauge("g", f64::INFINITY).validate().is_err());
    }

    #[test]
    fn merge_accumulates_counters_and_overwrites_gauges() {
        let mut c = Metric::counter("a", 5);
        c.merge(&Metric::counter("a", 3)).unwrap();
        assert_eq!(c.delta, Some(8));

        let mut g = Metric::gauge("x", 1.5);
        g.merge(&Metric::gauge("x", 9.9)).unwrap();
        assert_eq!(g.value, Some(9.9));
    }

    #[test]
    fn merge_with_other_kind_replaces() {
        let mut m = Metric::gauge("x", 1.0);
        m.merge(&Metric::counter("x", 4)).unwrap();
        assert_eq!(m, Metric::counter("x", 4));
    }

    #[test]
    fn counter_overflow_is_rejected() {
        let mut c = Metric::counter("a", i64::MAX);
        assert_eq!(
            c.merge(&Metric::counter("a", 1)),
            Err(MetricError::Overflow { id: "a".to_string() })
        );
        assert_eq!(c.delta, Some(i64::MAX));
        c.merge(&Metric::counter("a", -1)).unwrap();
        assert_eq!(c.delta, Some(i64::MAX - 1));
    }

    #[test]
    fn empty_id_is_invalid() {
        assert_eq!(Metric::counter("", 1).validate(), Err(MetricError::EmptyId));
        assert_eq!(Metric::gauge("", 1.0).validate(), Err(MetricError::EmptyId));
    }

    #[test]
    fn payload_string_formats() {
        assert_eq!(Metric::counter("a", 42).payload_string(), "42");
        assert_eq!(Metric::gauge("b", 0.25).payload_string(), "0.25");
        assert_eq!(Metric::placeholder("c", MetricKind::Gauge).payload_string(), "");
    }
}
