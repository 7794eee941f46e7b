//! Resolution orchestrator.
//!
//! Sequences evidence gathering, parallel agent scoring, consensus and the
//! settlement handoff for each resolution request, enforcing single-flight
//! per subject id. Failures below the orchestrator boundary degrade the
//! attempt; nothing is thrown past it — callers always receive a
//! [`ResolutionOutcome`] and branch on its `resolved` flag.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::{DataProvider, SettlementClient};
use crate::agents::{
    ConfidenceScorer, ConflictArbiter, EvidenceCollector, EvidenceValidator, ResolutionAgent,
};
use crate::agents::contract::AgentHealth;
use crate::config::AppConfig;
use crate::consensus::ConsensusEngine;
use crate::domain::{ConsensusMethod, DisputeDecision, ResolutionOutcome, SubjectStatus};
use crate::error::{Result, VeridictError};

use super::events::{Notifier, ResolutionEvent};
use super::provider_health::{ProviderHealthBoard, ProviderHealthMonitor};

/// Per-subject resolution phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionPhase {
    NotStarted,
    EvidenceGathering,
    AgentScoring,
    Consensus,
    Settled,
    Failed,
}

impl ResolutionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPhase::NotStarted => "NOT_STARTED",
            ResolutionPhase::EvidenceGathering => "EVIDENCE_GATHERING",
            ResolutionPhase::AgentScoring => "AGENT_SCORING",
            ResolutionPhase::Consensus => "CONSENSUS",
            ResolutionPhase::Settled => "SETTLED",
            ResolutionPhase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ResolutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate orchestrator counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverStats {
    pub resolutions_started: u64,
    pub resolutions_settled: u64,
    pub resolutions_failed: u64,
    pub evidence_points_collected: u64,
    pub single_agent_decisions: u64,
    pub unanimous_decisions: u64,
    pub weighted_decisions: u64,
    pub disputes_resolved: u64,
}

type SharedOutcome = Shared<BoxFuture<'static, ResolutionOutcome>>;

struct Inner {
    collector: Arc<EvidenceCollector>,
    arbiter: Arc<ConflictArbiter>,
    agents: RwLock<Vec<Arc<dyn ResolutionAgent>>>,
    engine: ConsensusEngine,
    settlement: Arc<dyn SettlementClient>,
    board: Arc<ProviderHealthBoard>,
    notifier: Notifier,
    /// Single-flight registry: the only cross-request shared state.
    inflight: DashMap<String, SharedOutcome>,
    phases: DashMap<String, ResolutionPhase>,
    max_resolution_time: Duration,
    dispute_window: ChronoDuration,
    health_check_interval: Duration,
    stats: RwLock<ResolverStats>,
    shutdown_tx: broadcast::Sender<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ResolutionOrchestrator {
    inner: Arc<Inner>,
}

impl ResolutionOrchestrator {
    /// Wire the standard four agents over the given providers and
    /// settlement client.
    pub fn new(
        config: &AppConfig,
        providers: Vec<Arc<dyn DataProvider>>,
        settlement: Arc<dyn SettlementClient>,
    ) -> Self {
        let board = Arc::new(ProviderHealthBoard::new());
        let collector = Arc::new(EvidenceCollector::new(config, providers, Arc::clone(&board)));
        let validator = Arc::new(EvidenceValidator::new(config));
        let arbiter = Arc::new(ConflictArbiter::new(config));
        let scorer = Arc::new(ConfidenceScorer::new(config));

        let agents: Vec<Arc<dyn ResolutionAgent>> = vec![
            Arc::clone(&collector) as Arc<dyn ResolutionAgent>,
            validator,
            Arc::clone(&arbiter) as Arc<dyn ResolutionAgent>,
            scorer,
        ];

        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            inner: Arc::new(Inner {
                collector,
                arbiter,
                agents: RwLock::new(agents),
                engine: ConsensusEngine::new(config.voting.clone()),
                settlement,
                board,
                notifier: Notifier::default(),
                inflight: DashMap::new(),
                phases: DashMap::new(),
                max_resolution_time: Duration::from_millis(config.resolution.max_resolution_time_ms),
                dispute_window: ChronoDuration::seconds(config.resolution.dispute_window_secs as i64),
                health_check_interval: Duration::from_secs(config.providers.health_check_interval_secs),
                stats: RwLock::new(ResolverStats::default()),
                shutdown_tx,
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Register an additional scoring agent before `start`.
    pub async fn register_agent(&self, agent: Arc<dyn ResolutionAgent>) {
        info!(agent = agent.id(), "registered extra agent");
        self.inner.agents.write().await.push(agent);
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ResolutionEvent> {
        self.inner.notifier.subscribe()
    }

    /// Start all agents and the provider health monitor. Agent start
    /// failures are isolated: the agent stays not-ready and is dropped from
    /// scoring, the orchestrator keeps running.
    pub async fn start(&self) -> Result<()> {
        for agent in self.inner.agents.read().await.iter() {
            if let Err(e) = agent.start().await {
                warn!(agent = agent.id(), error = %e, "agent failed to start, continuing without it");
            }
        }

        let monitor = ProviderHealthMonitor::new(
            self.inner.collector.providers().to_vec(),
            Arc::clone(&self.inner.board),
            self.inner.health_check_interval,
        );
        let handle = monitor.spawn(self.inner.shutdown_tx.subscribe());
        *self.inner.monitor.lock().await = Some(handle);

        info!("resolution orchestrator started");
        Ok(())
    }

    /// Stop the health monitor and all agents. Stop failures are logged,
    /// never propagated.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(());
        if let Some(handle) = self.inner.monitor.lock().await.take() {
            let _ = handle.await;
        }
        for agent in self.inner.agents.read().await.iter() {
            if let Err(e) = agent.stop().await {
                warn!(agent = agent.id(), error = %e, "agent stop failed");
            }
        }
        info!("resolution orchestrator stopped");
    }

    /// Resolve a subject, enforcing single-flight: concurrent requests for
    /// the same subject await the same in-flight attempt and receive the
    /// identical outcome.
    pub async fn resolve(&self, subject_id: &str) -> ResolutionOutcome {
        let fut = match self.inner.inflight.entry(subject_id.to_string()) {
            Entry::Occupied(entry) => {
                info!(subject = subject_id, "joining in-flight resolution");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let inner = Arc::clone(&self.inner);
                let id = subject_id.to_string();
                let fut: SharedOutcome = async move { Inner::run(inner, id).await }.boxed().shared();
                entry.insert(fut.clone());
                fut
            }
        };

        let outcome = fut.clone().await;
        // Only evict the entry if it is still this attempt; a stale caller
        // must not remove a newer in-flight run for the same subject.
        let removed = self
            .inner
            .inflight
            .remove_if(subject_id, |_, inflight| inflight.ptr_eq(&fut));
        if removed.is_some() {
            self.inner.phases.remove(subject_id);
        }
        outcome
    }

    /// Manual-override dispute path.
    pub async fn resolve_dispute(
        &self,
        subject_id: &str,
        evidence: Vec<String>,
    ) -> Result<DisputeDecision> {
        let subject = self.inner.settlement.get_subject(subject_id).await?;
        if subject.status != SubjectStatus::Disputed {
            return Err(VeridictError::InvalidSubject(format!(
                "subject {subject_id} is not disputed (status {})",
                subject.status
            )));
        }
        if Utc::now() > subject.deadline + self.inner.dispute_window {
            return Err(VeridictError::InvalidSubject(format!(
                "dispute window closed for subject {subject_id}"
            )));
        }

        let decision = self.inner.arbiter.resolve_dispute(&subject, &evidence);
        self.inner
            .settlement
            .submit_dispute_resolution(subject_id, &decision)
            .await?;

        self.inner.stats.write().await.disputes_resolved += 1;
        self.inner.notifier.emit(ResolutionEvent::DisputeResolved {
            subject_id: subject_id.to_string(),
            outcome: decision.outcome.clone(),
        });
        Ok(decision)
    }

    /// Current phase of an in-flight resolution, if any.
    pub fn phase_of(&self, subject_id: &str) -> ResolutionPhase {
        self.inner
            .phases
            .get(subject_id)
            .map(|p| *p)
            .unwrap_or(ResolutionPhase::NotStarted)
    }

    pub async fn stats(&self) -> ResolverStats {
        self.inner.stats.read().await.clone()
    }

    pub async fn agent_health(&self) -> Vec<AgentHealth> {
        self.inner
            .agents
            .read()
            .await
            .iter()
            .map(|a| a.health())
            .collect()
    }

    /// Human-readable status block for the CLI.
    pub async fn status_summary(&self) -> String {
        let stats = self.stats().await;
        let agents = self.agent_health().await;
        let providers = self.inner.board.snapshot().await;

        let mut out = String::from("=== VERIDICT RESOLUTION ENGINE ===\n");
        out.push_str(&format!(
            "Resolutions: {} started | {} settled | {} failed\n",
            stats.resolutions_started, stats.resolutions_settled, stats.resolutions_failed
        ));
        out.push_str(&format!(
            "Decisions: {} single | {} unanimous | {} weighted | Disputes: {}\n",
            stats.single_agent_decisions,
            stats.unanimous_decisions,
            stats.weighted_decisions,
            stats.disputes_resolved
        ));
        out.push_str(&format!(
            "Evidence points collected: {}\n",
            stats.evidence_points_collected
        ));
        for agent in agents {
            out.push_str(&format!(
                "Agent {:<20} {} | err {:>5.1}% | avg {:>6.1}ms | {} tasks\n",
                agent.agent_id,
                if agent.healthy { "healthy" } else { "UNHEALTHY" },
                agent.error_rate * 100.0,
                agent.avg_duration_ms,
                agent.tasks_completed
            ));
        }
        for (name, status) in providers {
            out.push_str(&format!(
                "Provider {:<18} {}\n",
                name,
                if status.healthy { "healthy" } else { "UNHEALTHY" }
            ));
        }
        out.push_str("==================================");
        out
    }
}

impl Inner {
    fn set_phase(&self, subject_id: &str, phase: ResolutionPhase) {
        self.phases.insert(subject_id.to_string(), phase);
    }

    async fn fail(
        &self,
        subject_id: &str,
        error: impl Into<String>,
    ) -> ResolutionOutcome {
        let error = error.into();
        error!(subject = subject_id, error = %error, "resolution failed");
        self.set_phase(subject_id, ResolutionPhase::Failed);
        self.stats.write().await.resolutions_failed += 1;
        self.notifier.emit(ResolutionEvent::Failed {
            subject_id: subject_id.to_string(),
            error: error.clone(),
        });
        ResolutionOutcome::failed(subject_id, error)
    }

    async fn record_method(&self, method: ConsensusMethod) {
        let mut stats = self.stats.write().await;
        match method {
            ConsensusMethod::SingleAgent => stats.single_agent_decisions += 1,
            ConsensusMethod::Unanimous => stats.unanimous_decisions += 1,
            ConsensusMethod::WeightedVoting => stats.weighted_decisions += 1,
        }
    }

    /// One full resolution attempt. Never returns an error; every failure
    /// path is folded into a terminal outcome.
    async fn run(inner: Arc<Inner>, subject_id: String) -> ResolutionOutcome {
        let attempt_id = Uuid::new_v4();
        inner.stats.write().await.resolutions_started += 1;
        inner.notifier.emit(ResolutionEvent::Started {
            subject_id: subject_id.clone(),
            attempt_id,
        });
        info!(subject = %subject_id, attempt = %attempt_id, "resolution started");

        let subject = match inner.settlement.get_subject(&subject_id).await {
            Ok(subject) => subject,
            Err(e) => return inner.fail(&subject_id, e.to_string()).await,
        };
        if !subject.status.is_resolvable() {
            return inner
                .fail(
                    &subject_id,
                    format!("subject status {} is not resolvable", subject.status),
                )
                .await;
        }

        // Phase 1: evidence gathering always completes before scoring.
        inner.set_phase(&subject_id, ResolutionPhase::EvidenceGathering);
        let evidence = match inner.collector.collect_evidence(&subject).await {
            Ok(evidence) => evidence,
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "evidence gathering degraded to empty set");
                Vec::new()
            }
        };
        inner.stats.write().await.evidence_points_collected += evidence.len() as u64;
        inner.notifier.emit(ResolutionEvent::EvidenceCollected {
            subject_id: subject_id.clone(),
            count: evidence.len(),
        });

        // Phase 2: all agents score concurrently, each under its own budget.
        // A failing or timed-out agent is dropped from the response set.
        inner.set_phase(&subject_id, ResolutionPhase::AgentScoring);
        let mut session = inner.engine.begin(subject_id.as_str());
        let deadline = Instant::now() + inner.max_resolution_time;

        let agents = inner.agents.read().await.clone();
        let mut pending: FuturesUnordered<_> = agents
            .iter()
            .map(|agent| {
                let agent = Arc::clone(agent);
                let evidence = evidence.clone();
                let subject = subject.clone();
                async move {
                    let result = agent.score(&evidence, &subject).await;
                    (agent.id().to_string(), result)
                }
            })
            .collect();

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((agent_id, Ok(response))) => {
                        if let Err(e) = session.collect(response) {
                            warn!(subject = %subject_id, agent = %agent_id, error = %e, "response arrived after session closed");
                        }
                    }
                    Some((agent_id, Err(e))) => {
                        if e.is_agent_local() {
                            warn!(subject = %subject_id, agent = %agent_id, error = %e, "agent dropped from response set");
                        } else {
                            error!(subject = %subject_id, agent = %agent_id, error = %e, "agent failed unexpectedly, dropped from response set");
                        }
                    }
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    session.mark_timed_out();
                    break;
                }
            }
        }
        drop(pending);

        let response_count = session.response_count();
        inner.notifier.emit(ResolutionEvent::ResponsesGenerated {
            subject_id: subject_id.clone(),
            count: response_count,
        });

        // Phase 3: consensus runs only after all agent calls settled (or the
        // overall budget forced a partial-set decision).
        inner.set_phase(&subject_id, ResolutionPhase::Consensus);
        let consensus = match inner.engine.decide(&mut session) {
            Ok(consensus) => consensus,
            Err(e) => return inner.fail(&subject_id, e.to_string()).await,
        };
        let responses = session.into_responses();
        inner.record_method(consensus.method).await;
        inner.notifier.emit(ResolutionEvent::ConsensusFormed {
            subject_id: subject_id.clone(),
            outcome: consensus.outcome.clone(),
            method: consensus.method,
            confidence: consensus.confidence,
        });

        // Phase 4: settlement handoff.
        let mut outcome = ResolutionOutcome {
            attempt_id,
            subject_id: subject_id.clone(),
            outcome: consensus.outcome.clone(),
            confidence: consensus.confidence,
            evidence: consensus.reasoning.clone(),
            agent_responses: responses,
            resolved: true,
            error: None,
            settlement_ref: None,
            completed_at: Utc::now(),
        };
        match inner.settlement.submit(&outcome).await {
            Ok(reference) => {
                outcome.settlement_ref = Some(reference.clone());
                inner.set_phase(&subject_id, ResolutionPhase::Settled);
                inner.stats.write().await.resolutions_settled += 1;
                inner.notifier.emit(ResolutionEvent::Completed {
                    subject_id: subject_id.clone(),
                    outcome: outcome.outcome.clone(),
                    settlement_ref: Some(reference),
                });
                info!(
                    subject = %subject_id,
                    outcome = %outcome.outcome,
                    confidence = outcome.confidence,
                    method = %consensus.method,
                    "resolution settled"
                );
                outcome
            }
            Err(e) => inner.fail(&subject_id, format!("settlement rejected outcome: {e}")).await,
        }
    }
}
