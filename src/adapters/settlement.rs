//! Settlement collaborator boundary (ledger/chain client).
//!
//! The engine reads subjects from and submits terminal decisions to this
//! layer; its internals are out of scope. The HTTP client targets the
//! settlement service's REST facade; the in-memory client backs demos and
//! tests.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::SettlementConfig;
use crate::domain::{DisputeDecision, ResolutionOutcome, Subject};
use crate::error::{Result, VeridictError};

#[cfg(test)]
use mockall::automock;

/// Boundary contract with the settlement layer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SettlementClient: Send + Sync {
    /// Read market metadata for a subject.
    async fn get_subject(&self, subject_id: &str) -> Result<Subject>;

    /// Submit a terminal resolution outcome; returns the settlement reference.
    async fn submit(&self, outcome: &ResolutionOutcome) -> Result<String>;

    /// Submit a dispute decision; returns the settlement reference.
    async fn submit_dispute_resolution(
        &self,
        subject_id: &str,
        decision: &DisputeDecision,
    ) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct SettlementRef {
    reference: String,
}

/// REST-backed settlement client.
pub struct HttpSettlementClient {
    base_url: String,
    http: Client,
}

impl HttpSettlementClient {
    pub fn new(config: &SettlementConfig) -> Result<Self> {
        url::Url::parse(&config.base_url)
            .map_err(|e| VeridictError::Internal(format!("settlement base_url: {e}")))?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl SettlementClient for HttpSettlementClient {
    async fn get_subject(&self, subject_id: &str) -> Result<Subject> {
        let url = format!("{}/subjects/{}", self.base_url, subject_id);
        let response = self.http.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(VeridictError::InvalidSubject(format!(
                "unknown subject {subject_id}"
            ))),
            status if status.is_success() => Ok(response.json().await?),
            status => Err(VeridictError::Settlement(format!(
                "get_subject {subject_id}: status {status}"
            ))),
        }
    }

    async fn submit(&self, outcome: &ResolutionOutcome) -> Result<String> {
        let url = format!("{}/resolutions", self.base_url);
        let response = self.http.post(&url).json(outcome).send().await?;

        if !response.status().is_success() {
            return Err(VeridictError::Settlement(format!(
                "submit {}: status {}",
                outcome.subject_id,
                response.status()
            )));
        }
        let settlement: SettlementRef = response.json().await?;
        Ok(settlement.reference)
    }

    async fn submit_dispute_resolution(
        &self,
        subject_id: &str,
        decision: &DisputeDecision,
    ) -> Result<String> {
        let url = format!("{}/subjects/{}/disputes", self.base_url, subject_id);
        let response = self.http.post(&url).json(decision).send().await?;

        if !response.status().is_success() {
            return Err(VeridictError::Settlement(format!(
                "dispute {subject_id}: status {}",
                response.status()
            )));
        }
        let settlement: SettlementRef = response.json().await?;
        Ok(settlement.reference)
    }
}

/// In-memory settlement client for demos and integration tests.
///
/// Records every submission so tests can assert on what crossed the
/// boundary.
#[derive(Default)]
pub struct InMemorySettlementClient {
    subjects: RwLock<HashMap<String, Subject>>,
    submissions: RwLock<Vec<ResolutionOutcome>>,
    disputes: RwLock<Vec<DisputeDecision>>,
    counter: AtomicU64,
}

impl InMemorySettlementClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_subject(&self, subject: Subject) {
        self.subjects.write().await.insert(subject.id.clone(), subject);
    }

    pub async fn submissions(&self) -> Vec<ResolutionOutcome> {
        self.submissions.read().await.clone()
    }

    pub async fn disputes(&self) -> Vec<DisputeDecision> {
        self.disputes.read().await.clone()
    }

    fn next_ref(&self) -> String {
        format!("settle-{:06}", self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl SettlementClient for InMemorySettlementClient {
    async fn get_subject(&self, subject_id: &str) -> Result<Subject> {
        self.subjects
            .read()
            .await
            .get(subject_id)
            .cloned()
            .ok_or_else(|| VeridictError::InvalidSubject(format!("unknown subject {subject_id}")))
    }

    async fn submit(&self, outcome: &ResolutionOutcome) -> Result<String> {
        self.submissions.write().await.push(outcome.clone());
        let reference = self.next_ref();
        info!(subject = %outcome.subject_id, reference = %reference, "recorded settlement submission");
        Ok(reference)
    }

    async fn submit_dispute_resolution(
        &self,
        subject_id: &str,
        decision: &DisputeDecision,
    ) -> Result<String> {
        let _ = subject_id;
        self.disputes.write().await.push(decision.clone());
        Ok(self.next_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubjectStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let client = InMemorySettlementClient::new();
        client
            .insert_subject(Subject {
                id: "mkt-1".to_string(),
                question: "Will it happen?".to_string(),
                category: "events".to_string(),
                deadline: Utc::now(),
                created_at: Utc::now(),
                status: SubjectStatus::Open,
            })
            .await;

        let subject = client.get_subject("mkt-1").await.unwrap();
        assert_eq!(subject.id, "mkt-1");

        let err = client.get_subject("mkt-404").await.unwrap_err();
        assert!(matches!(err, VeridictError::InvalidSubject(_)));

        let reference = client
            .submit(&ResolutionOutcome::failed("mkt-1", "test"))
            .await
            .unwrap();
        assert!(reference.starts_with("settle-"));
        assert_eq!(client.submissions().await.len(), 1);
    }

    #[test]
    fn test_http_client_rejects_bad_url() {
        let config = SettlementConfig {
            base_url: "not a url".to_string(),
            request_timeout_ms: 1000,
        };
        assert!(HttpSettlementClient::new(&config).is_err());
    }
}
