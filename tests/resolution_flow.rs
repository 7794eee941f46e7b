//! End-to-end resolution flows over simulated providers and an in-memory
//! settlement layer.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use veridict::agents::{AgentCore, AgentHealth, ResolutionAgent, Verdict};
use veridict::config::AppConfig;
use veridict::domain::{labels, AgentKind, AgentResponse, EvidenceRecord, Subject, SubjectStatus};
use veridict::error::Result;
use veridict::{
    DataProvider, InMemorySettlementClient, ResolutionEvent, ResolutionOrchestrator,
    SimulatedMarketDataProvider, SimulatedNewsProvider,
};

fn subject(id: &str, status: SubjectStatus) -> Subject {
    Subject {
        id: id.to_string(),
        question: "Will the BTC price rise above $100k?".to_string(),
        category: "crypto".to_string(),
        deadline: Utc::now() + ChronoDuration::hours(1),
        created_at: Utc::now() - ChronoDuration::days(2),
        status,
    }
}

fn market_providers() -> Vec<Arc<dyn DataProvider>> {
    vec![
        Arc::new(SimulatedMarketDataProvider::new("sim-market", 98_000.0, 450.0)),
        Arc::new(SimulatedMarketDataProvider::new("sim-exchange", 98_100.0, 430.0)),
        Arc::new(SimulatedNewsProvider::new(
            "sim-news",
            vec![
                "Analysts confirm rally momentum".to_string(),
                "Fund inflows rise for a third week".to_string(),
            ],
        )),
    ]
}

async fn orchestrator_with(
    providers: Vec<Arc<dyn DataProvider>>,
    subjects: Vec<Subject>,
) -> (ResolutionOrchestrator, Arc<InMemorySettlementClient>) {
    let settlement = Arc::new(InMemorySettlementClient::new());
    for s in subjects {
        settlement.insert_subject(s).await;
    }
    let orchestrator =
        ResolutionOrchestrator::new(&AppConfig::default(), providers, settlement.clone());
    orchestrator.start().await.unwrap();
    (orchestrator, settlement)
}

#[tokio::test]
async fn resolves_upward_trending_market_to_yes() {
    let (orchestrator, settlement) = orchestrator_with(
        market_providers(),
        vec![subject("mkt-up", SubjectStatus::Open)],
    )
    .await;

    let outcome = orchestrator.resolve("mkt-up").await;

    assert!(outcome.resolved, "error: {:?}", outcome.error);
    assert_eq!(outcome.outcome, labels::YES);
    assert_eq!(outcome.agent_responses.len(), 4);
    assert!(outcome.confidence >= 0.1 && outcome.confidence <= 0.95);
    assert!(outcome.settlement_ref.is_some());
    assert!(!outcome.evidence.is_empty());
    // Every response respects the clamp or the explicit zero-confidence path.
    for response in &outcome.agent_responses {
        assert!(
            response.confidence == 0.0
                || (response.confidence >= 0.1 && response.confidence <= 0.95),
            "agent {} reported {}",
            response.agent_id,
            response.confidence
        );
    }

    let submissions = settlement.submissions().await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].subject_id, "mkt-up");

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn lifecycle_events_arrive_in_phase_order() {
    let (orchestrator, _settlement) = orchestrator_with(
        market_providers(),
        vec![subject("mkt-events", SubjectStatus::Open)],
    )
    .await;
    let mut events = orchestrator.subscribe();

    let outcome = orchestrator.resolve("mkt-events").await;
    assert!(outcome.resolved);

    assert!(matches!(
        events.recv().await.unwrap(),
        ResolutionEvent::Started { .. }
    ));
    match events.recv().await.unwrap() {
        ResolutionEvent::EvidenceCollected { count, .. } => assert!(count > 0),
        other => panic!("expected EvidenceCollected, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        ResolutionEvent::ResponsesGenerated { count, .. } => assert_eq!(count, 4),
        other => panic!("expected ResponsesGenerated, got {other:?}"),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        ResolutionEvent::ConsensusFormed { .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        ResolutionEvent::Completed { .. }
    ));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn concurrent_requests_share_one_inflight_attempt() {
    let (orchestrator, settlement) = orchestrator_with(
        market_providers(),
        vec![subject("mkt-race", SubjectStatus::Open)],
    )
    .await;

    let (first, second) =
        tokio::join!(orchestrator.resolve("mkt-race"), orchestrator.resolve("mkt-race"));

    // Both callers observed the very same attempt.
    assert_eq!(first.attempt_id, second.attempt_id);
    assert_eq!(first.outcome, second.outcome);
    assert_eq!(settlement.submissions().await.len(), 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn unknown_subject_fails_without_throwing() {
    let (orchestrator, settlement) =
        orchestrator_with(market_providers(), vec![]).await;

    let outcome = orchestrator.resolve("mkt-missing").await;
    assert!(!outcome.resolved);
    assert!(outcome
        .error
        .as_deref()
        .unwrap()
        .contains("unknown subject"));
    assert!(outcome.agent_responses.is_empty());
    assert!(settlement.submissions().await.is_empty());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn cancelled_subject_is_not_resolvable() {
    let (orchestrator, _settlement) = orchestrator_with(
        market_providers(),
        vec![subject("mkt-cancelled", SubjectStatus::Cancelled)],
    )
    .await;

    let outcome = orchestrator.resolve("mkt-cancelled").await;
    assert!(!outcome.resolved);
    assert!(outcome.error.as_deref().unwrap().contains("not resolvable"));

    orchestrator.shutdown().await;
}

/// Provider that answers health checks but never has evidence.
struct EmptyProvider {
    keywords: Vec<String>,
}

#[async_trait]
impl DataProvider for EmptyProvider {
    fn name(&self) -> &str {
        "empty-feed"
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

#[tokio::test]
async fn zero_evidence_still_settles_with_no_data_outcome() {
    let providers: Vec<Arc<dyn DataProvider>> = vec![Arc::new(EmptyProvider {
        keywords: vec!["price".to_string()],
    })];
    let (orchestrator, settlement) =
        orchestrator_with(providers, vec![subject("mkt-empty", SubjectStatus::Open)]).await;

    let outcome = orchestrator.resolve("mkt-empty").await;

    assert!(outcome.resolved, "error: {:?}", outcome.error);
    assert!(
        outcome.outcome == labels::NO_DATA || outcome.outcome == labels::INSUFFICIENT_VALID_DATA,
        "got {}",
        outcome.outcome
    );
    // Zero-confidence votes land on the documented floor.
    assert!((outcome.confidence - 0.1).abs() < 1e-9);
    assert_eq!(settlement.submissions().await.len(), 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn collector_without_providers_is_dropped_from_the_vote() {
    // No providers: the collector fails to start, stays not-ready, and is
    // dropped from the response set; the other three agents still decide.
    let (orchestrator, _settlement) =
        orchestrator_with(vec![], vec![subject("mkt-degraded", SubjectStatus::Open)]).await;

    let outcome = orchestrator.resolve("mkt-degraded").await;

    assert!(outcome.resolved, "error: {:?}", outcome.error);
    assert_eq!(outcome.agent_responses.len(), 3);
    assert!(outcome
        .agent_responses
        .iter()
        .all(|r| r.agent_id != "evidence-collector"));

    orchestrator.shutdown().await;
}

/// Agent whose computation always overruns its score budget.
struct SlowAgent {
    core: AgentCore,
    delay: Duration,
}

#[async_trait]
impl ResolutionAgent for SlowAgent {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Scorer
    }

    async fn start(&self) -> Result<()> {
        self.core.mark_ready();
        Ok(())
    }

    async fn score(&self, _evidence: &[EvidenceRecord], _subject: &Subject) -> Result<AgentResponse> {
        self.core
            .scored(async {
                tokio::time::sleep(self.delay).await;
                Ok(Verdict {
                    outcome: labels::YES.to_string(),
                    confidence: 0.9,
                    reasoning: vec!["slow analysis".to_string()],
                    evidence: Vec::new(),
                })
            })
            .await
    }

    async fn stop(&self) -> Result<()> {
        self.core.mark_stopped();
        Ok(())
    }

    fn health(&self) -> AgentHealth {
        self.core.health()
    }
}

#[tokio::test]
async fn timed_out_agent_degrades_but_never_blocks_resolution() {
    let mut config = AppConfig::default();
    config.agents.score_timeout_ms = 200;
    config.resolution.max_resolution_time_ms = 5_000;

    let settlement = Arc::new(InMemorySettlementClient::new());
    settlement
        .insert_subject(subject("mkt-slow", SubjectStatus::Open))
        .await;
    let orchestrator =
        ResolutionOrchestrator::new(&config, market_providers(), settlement.clone());
    orchestrator
        .register_agent(Arc::new(SlowAgent {
            core: AgentCore::new("slow-agent", AgentKind::Scorer, &config.agents),
            delay: Duration::from_secs(3),
        }))
        .await;
    orchestrator.start().await.unwrap();

    let started = std::time::Instant::now();
    let outcome = orchestrator.resolve("mkt-slow").await;

    assert!(outcome.resolved, "error: {:?}", outcome.error);
    // The four standard agents respond; the slow agent is dropped.
    assert_eq!(outcome.agent_responses.len(), 4);
    assert!(outcome.agent_responses.iter().all(|r| r.agent_id != "slow-agent"));
    // The attempt finished well under the slow agent's delay.
    assert!(started.elapsed() < Duration::from_secs(3));

    let health = orchestrator.agent_health().await;
    let slow = health.iter().find(|h| h.agent_id == "slow-agent").unwrap();
    assert!(slow.error_rate > 0.99);
    assert!(!slow.healthy);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn dispute_path_returns_fixed_confidence_decision() {
    let (orchestrator, settlement) = orchestrator_with(
        market_providers(),
        vec![subject("mkt-disputed", SubjectStatus::Disputed)],
    )
    .await;

    let decision = orchestrator
        .resolve_dispute(
            "mkt-disputed",
            vec![
                "exchange settlement data says yes".to_string(),
                "index provider confirms yes".to_string(),
                "one commentator says no".to_string(),
            ],
        )
        .await
        .unwrap();

    assert_eq!(decision.outcome, labels::YES);
    assert_eq!(decision.confidence, 0.8);
    assert_eq!(settlement.disputes().await.len(), 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn dispute_requires_disputed_status() {
    let (orchestrator, _settlement) = orchestrator_with(
        market_providers(),
        vec![subject("mkt-open", SubjectStatus::Open)],
    )
    .await;

    let err = orchestrator
        .resolve_dispute("mkt-open", vec!["evidence".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not disputed"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn stats_track_settled_and_failed_attempts() {
    let (orchestrator, _settlement) = orchestrator_with(
        market_providers(),
        vec![subject("mkt-stats", SubjectStatus::Open)],
    )
    .await;

    let _ = orchestrator.resolve("mkt-stats").await;
    let _ = orchestrator.resolve("mkt-unknown").await;

    let stats = orchestrator.stats().await;
    assert_eq!(stats.resolutions_started, 2);
    assert_eq!(stats.resolutions_settled, 1);
    assert_eq!(stats.resolutions_failed, 1);
    assert!(stats.evidence_points_collected > 0);

    orchestrator.shutdown().await;
}
