//! Evidence records and the closed value union every agent scores over.
//!
//! The original data feed delivered untyped payloads; here the value is a
//! tagged union with per-variant divergence and outcome-extraction logic,
//! since every downstream heuristic branches on the runtime type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::outcome::labels;

/// Text markers that flag a text observation as an upstream error payload.
const ERROR_MARKERS: &[&str] = &["error", "n/a", "unavailable"];

/// Closed tagged union for evidence payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum EvidenceValue {
    Numeric(f64),
    Boolean(bool),
    Text(String),
}

impl EvidenceValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            EvidenceValue::Numeric(_) => "numeric",
            EvidenceValue::Boolean(_) => "boolean",
            EvidenceValue::Text(_) => "text",
        }
    }

    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            EvidenceValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// Same variant, so divergence and agreement checks are meaningful.
    pub fn is_comparable_to(&self, other: &EvidenceValue) -> bool {
        self.type_name() == other.type_name()
    }

    /// A value that should not be trusted at face value: non-finite or
    /// negative numbers, empty or error-flagged text.
    pub fn is_suspicious(&self) -> bool {
        match self {
            EvidenceValue::Numeric(v) => !v.is_finite() || *v < 0.0,
            EvidenceValue::Boolean(_) => false,
            EvidenceValue::Text(s) => {
                let t = s.trim().to_lowercase();
                t.is_empty() || ERROR_MARKERS.iter().any(|m| t.contains(m))
            }
        }
    }

    /// Divergence measure in [0, 1] between two values.
    ///
    /// Numeric pairs use relative difference; booleans and text use
    /// (case-insensitive) equality. Values of different variants always
    /// diverge fully.
    pub fn divergence(&self, other: &EvidenceValue) -> f64 {
        match (self, other) {
            (EvidenceValue::Numeric(a), EvidenceValue::Numeric(b)) => {
                let scale = a.abs().max(b.abs());
                if scale < f64::EPSILON {
                    0.0
                } else {
                    ((a - b).abs() / scale).min(1.0)
                }
            }
            (EvidenceValue::Boolean(a), EvidenceValue::Boolean(b)) => {
                if a == b {
                    0.0
                } else {
                    1.0
                }
            }
            (EvidenceValue::Text(a), EvidenceValue::Text(b)) => {
                if a.trim().eq_ignore_ascii_case(b.trim()) {
                    0.0
                } else {
                    1.0
                }
            }
            _ => 1.0,
        }
    }

    /// Map the raw observation to a normalized outcome label.
    pub fn normalized_outcome(&self) -> &'static str {
        match self {
            EvidenceValue::Numeric(v) => {
                if *v > 0.0 {
                    labels::YES
                } else {
                    labels::NO
                }
            }
            EvidenceValue::Boolean(b) => {
                if *b {
                    labels::YES
                } else {
                    labels::NO
                }
            }
            EvidenceValue::Text(s) => {
                let t = s.to_lowercase();
                let affirmative = ["yes", "true", "confirmed", "passed", "won", "approved"];
                let negative = ["no", "false", "denied", "failed", "lost", "rejected"];
                if affirmative.iter().any(|w| t.contains(w)) {
                    labels::YES
                } else if negative.iter().any(|w| t.contains(w)) {
                    labels::NO
                } else {
                    labels::UNCERTAIN
                }
            }
        }
    }
}

impl std::fmt::Display for EvidenceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceValue::Numeric(v) => write!(f, "{v}"),
            EvidenceValue::Boolean(b) => write!(f, "{b}"),
            EvidenceValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One timestamped, source-attributed observation.
///
/// Immutable once created; downstream agents reference records but never
/// mutate them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Identifier of the data source that produced this observation
    pub source: String,
    /// The observed value
    pub value: EvidenceValue,
    /// When the observation was made
    pub observed_at: DateTime<Utc>,
    /// Source-reported reliability in [0, 1]
    pub reliability: f64,
    /// Optional free-form metadata (provider kind, raw payload, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

impl EvidenceRecord {
    pub fn new(source: impl Into<String>, value: EvidenceValue, reliability: f64) -> Self {
        Self {
            source: source.into(),
            value,
            observed_at: Utc::now(),
            reliability: reliability.clamp(0.0, 1.0),
            metadata: None,
        }
    }

    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Age of the observation in seconds relative to `now`.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.observed_at).num_seconds()
    }

    /// String value under the given metadata key, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }

    /// One-line summary used in reasoning strings.
    pub fn summary(&self) -> String {
        format!("{}={} (r={:.2})", self.source, self.value, self.reliability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_divergence() {
        let a = EvidenceValue::Numeric(100.0);
        let b = EvidenceValue::Numeric(110.0);
        assert!((a.divergence(&b) - 10.0 / 110.0).abs() < 1e-9);
        assert_eq!(a.divergence(&EvidenceValue::Numeric(100.0)), 0.0);
        assert_eq!(
            EvidenceValue::Numeric(0.0).divergence(&EvidenceValue::Numeric(0.0)),
            0.0
        );
    }

    #[test]
    fn test_cross_type_divergence_is_full() {
        let a = EvidenceValue::Numeric(1.0);
        let b = EvidenceValue::Text("1.0".to_string());
        assert_eq!(a.divergence(&b), 1.0);
        assert!(!a.is_comparable_to(&b));
    }

    #[test]
    fn test_text_divergence_case_insensitive() {
        let a = EvidenceValue::Text("Approved".to_string());
        let b = EvidenceValue::Text("approved".to_string());
        assert_eq!(a.divergence(&b), 0.0);
        assert_eq!(a.divergence(&EvidenceValue::Text("rejected".into())), 1.0);
    }

    #[test]
    fn test_suspicious_values() {
        assert!(EvidenceValue::Numeric(f64::NAN).is_suspicious());
        assert!(EvidenceValue::Numeric(-4.2).is_suspicious());
        assert!(!EvidenceValue::Numeric(4.2).is_suspicious());
        assert!(EvidenceValue::Text("  ".into()).is_suspicious());
        assert!(EvidenceValue::Text("ERROR: feed down".into()).is_suspicious());
        assert!(!EvidenceValue::Boolean(false).is_suspicious());
    }

    #[test]
    fn test_normalized_outcome() {
        assert_eq!(EvidenceValue::Numeric(3.0).normalized_outcome(), labels::YES);
        assert_eq!(EvidenceValue::Numeric(0.0).normalized_outcome(), labels::NO);
        assert_eq!(EvidenceValue::Boolean(true).normalized_outcome(), labels::YES);
        assert_eq!(
            EvidenceValue::Text("the motion passed".into()).normalized_outcome(),
            labels::YES
        );
        assert_eq!(
            EvidenceValue::Text("still counting".into()).normalized_outcome(),
            labels::UNCERTAIN
        );
    }

    #[test]
    fn test_record_metadata_access() {
        let rec = EvidenceRecord::new("binance", EvidenceValue::Numeric(101.5), 0.9)
            .with_metadata(serde_json::json!({"kind": "price"}));
        assert_eq!(rec.metadata_str("kind"), Some("price"));
        assert_eq!(rec.metadata_str("missing"), None);
    }
}
