//! External data-provider boundary.
//!
//! Each provider exposes a bounded-time `fetch` over HTTP plus a liveness
//! `ping`; the evidence collector selects providers by keyword rules and the
//! health monitor polls them on an interval.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderEndpoint;
use crate::domain::{EvidenceRecord, EvidenceValue, Subject};
use crate::error::{Result, VeridictError};

/// One external evidence source.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Stable provider identifier, used as the evidence source id.
    fn name(&self) -> &str;

    /// Keyword rules routing subjects to this provider. An empty list means
    /// the provider is a generic fallback.
    fn keywords(&self) -> &[String];

    /// Fetch evidence relevant to the subject, within a bounded timeout.
    async fn fetch(&self, subject: &Subject) -> Result<Vec<EvidenceRecord>>;

    /// Liveness probe used by the periodic health checker.
    async fn ping(&self) -> Result<()>;
}

/// Does this provider's keyword rules match the subject's category or
/// question text?
pub fn matches_subject(provider: &dyn DataProvider, subject: &Subject) -> bool {
    let haystack = format!("{} {}", subject.category, subject.question).to_lowercase();
    provider
        .keywords()
        .iter()
        .any(|kw| haystack.contains(&kw.to_lowercase()))
}

/// Wire shape returned by HTTP providers.
#[derive(Debug, Deserialize)]
struct WireEvidence {
    #[serde(default)]
    source: Option<String>,
    value: WireValue,
    #[serde(default)]
    observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    reliability: Option<f64>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Numeric(f64),
    Boolean(bool),
    Text(String),
}

impl From<WireValue> for EvidenceValue {
    fn from(value: WireValue) -> Self {
        match value {
            WireValue::Numeric(v) => EvidenceValue::Numeric(v),
            WireValue::Boolean(b) => EvidenceValue::Boolean(b),
            WireValue::Text(s) => EvidenceValue::Text(s),
        }
    }
}

/// Generic HTTP evidence provider.
///
/// `GET {base_url}/evidence?q=<question>&category=<category>` returning a
/// JSON array of observations; `GET {base_url}/health` for liveness.
pub struct HttpDataProvider {
    name: String,
    base_url: String,
    keywords: Vec<String>,
    default_reliability: f64,
    http: Client,
}

impl HttpDataProvider {
    pub fn new(endpoint: &ProviderEndpoint, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: endpoint.name.clone(),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            keywords: endpoint.keywords.clone(),
            default_reliability: endpoint.reliability,
            http,
        })
    }
}

#[async_trait]
impl DataProvider for HttpDataProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    async fn fetch(&self, subject: &Subject) -> Result<Vec<EvidenceRecord>> {
        let url = format!("{}/evidence", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("q", subject.question.as_str()), ("category", subject.category.as_str())])
            .send()
            .await
            .map_err(|e| VeridictError::ProviderUnavailable(format!("{}: {e}", self.name)))?;

        if !response.status().is_success() {
            return Err(VeridictError::ProviderUnavailable(format!(
                "{}: status {}",
                self.name,
                response.status()
            )));
        }

        let wire: Vec<WireEvidence> = response.json().await?;
        debug!(provider = %self.name, points = wire.len(), "fetched evidence");

        let now = Utc::now();
        Ok(wire
            .into_iter()
            .map(|w| EvidenceRecord {
                source: w.source.unwrap_or_else(|| self.name.clone()),
                value: w.value.into(),
                observed_at: w.observed_at.unwrap_or(now),
                reliability: w
                    .reliability
                    .unwrap_or(self.default_reliability)
                    .clamp(0.0, 1.0),
                metadata: w.metadata,
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| VeridictError::ProviderUnavailable(format!("{}: {e}", self.name)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(VeridictError::ProviderUnavailable(format!(
                "{}: status {}",
                self.name,
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use crate::domain::SubjectStatus;

    fn subject(question: &str, category: &str) -> Subject {
        Subject {
            id: "mkt-1".to_string(),
            question: question.to_string(),
            category: category.to_string(),
            deadline: Utc::now() + ChronoDuration::hours(1),
            created_at: Utc::now(),
            status: SubjectStatus::Open,
        }
    }

    struct StubProvider {
        keywords: Vec<String>,
    }

    #[async_trait]
    impl DataProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn keywords(&self) -> &[String] {
            &self.keywords
        }

        async fn fetch(&self, _subject: &Subject) -> Result<Vec<EvidenceRecord>> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_keyword_matching() {
        let provider = StubProvider {
            keywords: vec!["price".to_string(), "crypto".to_string()],
        };

        assert!(matches_subject(
            &provider,
            &subject("Will the BTC price exceed $100k?", "finance")
        ));
        assert!(!matches_subject(
            &provider,
            &subject("Will the bill pass?", "politics")
        ));
    }

    #[test]
    fn test_wire_value_deserialization() {
        let wire: Vec<WireEvidence> = serde_json::from_str(
            r#"[
                {"value": 101.25, "reliability": 0.9},
                {"value": true},
                {"value": "approved", "source": "reuters"}
            ]"#,
        )
        .unwrap();
        assert_eq!(wire.len(), 3);
        assert!(matches!(
            EvidenceValue::from(serde_json::from_str::<WireValue>("42.0").unwrap()),
            EvidenceValue::Numeric(_)
        ));
        assert_eq!(wire[2].source.as_deref(), Some("reuters"));
    }
}
