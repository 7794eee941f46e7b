//! Deterministic in-process providers for demos and tests.
//!
//! These stand in for live market-data and news feeds; real deployments
//! register [`HttpDataProvider`](super::HttpDataProvider) endpoints instead.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use crate::domain::{EvidenceRecord, EvidenceValue, Subject};
use crate::error::Result;

use super::provider::DataProvider;

/// Synthetic price feed producing a linear series ending at
/// `base_value + step * (points - 1)`.
pub struct SimulatedMarketDataProvider {
    name: String,
    keywords: Vec<String>,
    base_value: f64,
    step: f64,
    points: usize,
    reliability: f64,
}

impl SimulatedMarketDataProvider {
    pub fn new(name: impl Into<String>, base_value: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            keywords: ["price", "btc", "bitcoin", "eth", "crypto", "stock", "market", "financial"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            base_value,
            step,
            points: 6,
            reliability: 0.9,
        }
    }

    pub fn with_points(mut self, points: usize) -> Self {
        self.points = points;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl DataProvider for SimulatedMarketDataProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    async fn fetch(&self, _subject: &Subject) -> Result<Vec<EvidenceRecord>> {
        let now = Utc::now();
        Ok((0..self.points)
            .map(|i| {
                let value = self.base_value + self.step * i as f64;
                // Oldest observation first; one synthetic tick per minute.
                let observed_at = now - ChronoDuration::minutes((self.points - i) as i64);
                EvidenceRecord::new(&self.name, EvidenceValue::Numeric(value), self.reliability)
                    .with_observed_at(observed_at)
                    .with_metadata(json!({"kind": "price"}))
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Synthetic headline feed with a fixed set of text observations.
pub struct SimulatedNewsProvider {
    name: String,
    keywords: Vec<String>,
    headlines: Vec<String>,
    reliability: f64,
}

impl SimulatedNewsProvider {
    pub fn new(name: impl Into<String>, headlines: Vec<String>) -> Self {
        Self {
            name: name.into(),
            keywords: ["news", "election", "event", "announce", "wins", "vote"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            headlines,
            reliability: 0.75,
        }
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl DataProvider for SimulatedNewsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    async fn fetch(&self, _subject: &Subject) -> Result<Vec<EvidenceRecord>> {
        let now = Utc::now();
        Ok(self
            .headlines
            .iter()
            .enumerate()
            .map(|(i, headline)| {
                let observed_at = now - ChronoDuration::minutes(i as i64 * 10);
                EvidenceRecord::new(
                    &self.name,
                    EvidenceValue::Text(headline.clone()),
                    self.reliability,
                )
                .with_observed_at(observed_at)
                .with_metadata(json!({"kind": "news"}))
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubjectStatus;

    fn subject() -> Subject {
        Subject {
            id: "mkt-1".to_string(),
            question: "Will BTC rise above $100k?".to_string(),
            category: "crypto".to_string(),
            deadline: Utc::now() + ChronoDuration::hours(1),
            created_at: Utc::now(),
            status: SubjectStatus::Open,
        }
    }

    #[tokio::test]
    async fn test_market_simulator_produces_trend() {
        let provider = SimulatedMarketDataProvider::new("sim-market", 100.0, 2.0).with_points(4);
        let records = provider.fetch(&subject()).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].value.as_numeric(), Some(100.0));
        assert_eq!(records[3].value.as_numeric(), Some(106.0));
        assert!(records[0].observed_at < records[3].observed_at);
        assert_eq!(records[0].metadata_str("kind"), Some("price"));
    }

    #[tokio::test]
    async fn test_news_simulator_emits_text_records() {
        let provider = SimulatedNewsProvider::new(
            "sim-news",
            vec!["Candidate wins primary".to_string(), "Rally approved".to_string()],
        );
        let records = provider.fetch(&subject()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0].value, EvidenceValue::Text(_)));
    }
}
