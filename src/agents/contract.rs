//! Agent execution contract
//!
//! Every scoring strategy gets a uniform lifecycle (start, score, stop,
//! health) and a bounded-time execution guarantee, independent of what the
//! strategy computes. The shared plumbing lives in [`AgentCore`], embedded by
//! each agent via composition; lifecycle events travel over explicit
//! channels, never inheritance-bound emitters.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::AgentConfig;
use crate::domain::{AgentKind, AgentResponse, EvidenceRecord, Subject};
use crate::error::{Result, VeridictError};

/// What a strategy computes before the contract stamps it into a full
/// [`AgentResponse`].
#[derive(Debug, Clone)]
pub struct Verdict {
    pub outcome: String,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub evidence: Vec<EvidenceRecord>,
}

/// Health snapshot reported by every agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub kind: AgentKind,
    /// Started and not stopped
    pub active: bool,
    /// Active, recently successful, and below the error-rate ceiling
    pub healthy: bool,
    /// Seconds since the last successful activity, if any
    pub last_activity_age_secs: Option<u64>,
    pub avg_duration_ms: f64,
    pub error_rate: f64,
    pub tasks_completed: u64,
}

/// Lifetime counters, updated only by the owning agent's own call path.
#[derive(Debug, Default)]
pub struct AgentMetrics {
    tasks_completed: AtomicU64,
    errors: AtomicU64,
    total_duration_ms: AtomicU64,
    /// Unix timestamp of the last successful activity; 0 = never
    last_activity_ts: AtomicI64,
}

impl AgentMetrics {
    fn record_success(&self, elapsed: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.touch();
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn touch(&self) {
        self.last_activity_ts
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed.load(Ordering::Relaxed)
    }

    pub fn error_rate(&self) -> f64 {
        let completed = self.tasks_completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total = completed + errors;
        if total == 0 {
            0.0
        } else {
            errors as f64 / total as f64
        }
    }

    pub fn avg_duration_ms(&self) -> f64 {
        let completed = self.tasks_completed.load(Ordering::Relaxed);
        if completed == 0 {
            0.0
        } else {
            self.total_duration_ms.load(Ordering::Relaxed) as f64 / completed as f64
        }
    }

    fn last_activity_age_secs(&self) -> Option<u64> {
        let ts = self.last_activity_ts.load(Ordering::Relaxed);
        if ts == 0 {
            None
        } else {
            Some((Utc::now().timestamp() - ts).max(0) as u64)
        }
    }
}

/// Shared lifecycle state every agent embeds.
pub struct AgentCore {
    id: String,
    kind: AgentKind,
    ready: AtomicBool,
    score_budget: Duration,
    staleness_window: Duration,
    max_error_rate: f64,
    metrics: AgentMetrics,
}

impl AgentCore {
    pub fn new(id: impl Into<String>, kind: AgentKind, config: &AgentConfig) -> Self {
        Self {
            id: id.into(),
            kind,
            ready: AtomicBool::new(false),
            score_budget: Duration::from_millis(config.score_timeout_ms),
            staleness_window: Duration::from_secs(config.staleness_window_secs),
            max_error_rate: config.max_error_rate,
            metrics: AgentMetrics::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn score_budget(&self) -> Duration {
        self.score_budget
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        // A freshly started agent counts as recently active.
        self.metrics.touch();
    }

    pub fn mark_stopped(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(VeridictError::NotReady(self.id.clone()))
        }
    }

    /// Run a strategy computation under the contract: reject if not started,
    /// race against the score budget, stamp identity/timestamp/duration on
    /// success, and account the attempt either way. A timeout fails this
    /// call only; it never blocks the caller past the budget.
    pub async fn scored<F>(&self, op: F) -> Result<AgentResponse>
    where
        F: Future<Output = Result<Verdict>> + Send,
    {
        self.ensure_ready()?;

        let started = Instant::now();
        match tokio::time::timeout(self.score_budget, op).await {
            Ok(Ok(verdict)) => {
                let elapsed = started.elapsed();
                self.metrics.record_success(elapsed);
                Ok(AgentResponse {
                    agent_id: self.id.clone(),
                    kind: self.kind,
                    outcome: verdict.outcome,
                    confidence: verdict.confidence,
                    reasoning: verdict.reasoning,
                    evidence: verdict.evidence,
                    created_at: Utc::now(),
                    duration_ms: elapsed.as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                self.metrics.record_error();
                Err(e)
            }
            Err(_) => {
                self.metrics.record_error();
                Err(VeridictError::Timeout {
                    agent_id: self.id.clone(),
                    budget_ms: self.score_budget.as_millis() as u64,
                })
            }
        }
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    pub fn health(&self) -> AgentHealth {
        let active = self.is_ready();
        let age = self.metrics.last_activity_age_secs();
        let error_rate = self.metrics.error_rate();
        let fresh = age.is_some_and(|a| a <= self.staleness_window.as_secs());
        AgentHealth {
            agent_id: self.id.clone(),
            kind: self.kind,
            active,
            healthy: active && fresh && error_rate < self.max_error_rate,
            last_activity_age_secs: age,
            avg_duration_ms: self.metrics.avg_duration_ms(),
            error_rate,
            tasks_completed: self.metrics.tasks_completed(),
        }
    }
}

/// Uniform lifecycle every scoring strategy must satisfy.
///
/// `start` failures propagate and leave the agent not-ready; `score` before
/// a successful `start` fails with NotReady; `stop` failures are logged by
/// the caller but never abort cleanup.
#[async_trait]
pub trait ResolutionAgent: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> AgentKind;

    /// One-time setup (acquiring data-source handles, warming caches).
    async fn start(&self) -> Result<()>;

    /// Produce this agent's opinion over the evidence set, bounded by the
    /// contract's score budget.
    async fn score(&self, evidence: &[EvidenceRecord], subject: &Subject) -> Result<AgentResponse>;

    /// Release resources. Cleanup must always complete.
    async fn stop(&self) -> Result<()>;

    fn health(&self) -> AgentHealth;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::labels;

    fn core() -> AgentCore {
        AgentCore::new(
            "test-agent",
            AgentKind::Validator,
            &AgentConfig {
                score_timeout_ms: 50,
                staleness_window_secs: 300,
                max_error_rate: 0.5,
            },
        )
    }

    fn verdict() -> Verdict {
        Verdict {
            outcome: labels::YES.to_string(),
            confidence: 0.8,
            reasoning: vec!["looks fine".to_string()],
            evidence: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_score_before_start_fails() {
        let core = core();
        let err = core.scored(async { Ok(verdict()) }).await.unwrap_err();
        assert!(matches!(err, VeridictError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_score_stamps_response() {
        let core = core();
        core.mark_ready();
        let response = core.scored(async { Ok(verdict()) }).await.unwrap();
        assert_eq!(response.agent_id, "test-agent");
        assert_eq!(response.kind, AgentKind::Validator);
        assert_eq!(response.outcome, labels::YES);
        assert_eq!(core.metrics().tasks_completed(), 1);
    }

    #[tokio::test]
    async fn test_score_timeout_counts_toward_error_rate() {
        let core = core();
        core.mark_ready();
        let err = core
            .scored(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(verdict())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VeridictError::Timeout { .. }));
        assert!(core.metrics().error_rate() > 0.99);
    }

    #[tokio::test]
    async fn test_health_requires_low_error_rate() {
        let core = core();
        core.mark_ready();
        assert!(core.health().healthy);

        // Two failures against one success pushes the rate over 50%.
        let _ = core.scored(async { Ok(verdict()) }).await;
        for _ in 0..2 {
            let _ = core
                .scored(async { Err(VeridictError::Internal("boom".into())) })
                .await;
        }
        let health = core.health();
        assert!(health.active);
        assert!(!health.healthy);
    }

    #[tokio::test]
    async fn test_stopped_agent_is_inactive() {
        let core = core();
        core.mark_ready();
        core.mark_stopped();
        let health = core.health();
        assert!(!health.active);
        assert!(!health.healthy);
    }
}
