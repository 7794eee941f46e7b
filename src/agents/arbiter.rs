//! Conflict arbiter agent.
//!
//! Detects disagreement between distinct evidence sources and produces a
//! final call that explicitly accounts for conflict severity. Also hosts the
//! manual-override dispute path.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::domain::{
    clamp_confidence, labels, AgentKind, AgentResponse, DisputeDecision, EvidenceRecord, Subject,
};
use crate::error::Result;

use super::contract::{AgentCore, AgentHealth, ResolutionAgent, Verdict};

/// Divergence above this between two sources' latest values is a conflict.
const CONFLICT_THRESHOLD: f64 = 0.2;
/// Conflicts diverging beyond this are HIGH severity, MEDIUM otherwise.
const HIGH_SEVERITY_THRESHOLD: f64 = 0.5;
/// Consensus level above which the majority outcome is accepted directly.
const CONSENSUS_DECISION_THRESHOLD: f64 = 0.8;
/// Mean source reliability above which the conflict fallback answers YES.
const RELIABILITY_DECISION_THRESHOLD: f64 = 0.7;
/// Confidence reduction per HIGH severity conflict, floored.
const HIGH_CONFLICT_PENALTY: f64 = 0.2;
const MIN_CONFLICT_FACTOR: f64 = 0.3;
/// Confidence of the manual-override dispute path.
const DISPUTE_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictSeverity {
    Medium,
    High,
}

#[derive(Debug)]
struct Conflict {
    source_a: String,
    source_b: String,
    divergence: f64,
    severity: ConflictSeverity,
}

/// The latest record per source plus that source's mean reliability.
struct SourceView<'a> {
    name: &'a str,
    latest: &'a EvidenceRecord,
    reliability: f64,
}

pub struct ConflictArbiter {
    core: AgentCore,
}

impl ConflictArbiter {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            core: AgentCore::new("conflict-arbiter", AgentKind::Arbiter, &config.agents),
        }
    }

    fn source_views<'a>(&self, evidence: &'a [EvidenceRecord]) -> Vec<SourceView<'a>> {
        let mut views: Vec<SourceView<'a>> = Vec::new();
        for record in evidence {
            match views.iter_mut().find(|v| v.name == record.source) {
                Some(view) => {
                    if record.observed_at > view.latest.observed_at {
                        view.latest = record;
                    }
                }
                None => views.push(SourceView {
                    name: &record.source,
                    latest: record,
                    reliability: 0.0,
                }),
            }
        }
        for view in &mut views {
            let records: Vec<&EvidenceRecord> = evidence
                .iter()
                .filter(|r| r.source == view.name)
                .collect();
            view.reliability =
                records.iter().map(|r| r.reliability).sum::<f64>() / records.len() as f64;
        }
        views
    }

    /// Compare every unordered pair of sources by their most recent record.
    fn detect_conflicts(&self, views: &[SourceView<'_>]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for i in 0..views.len() {
            for j in (i + 1)..views.len() {
                let divergence = views[i].latest.value.divergence(&views[j].latest.value);
                if divergence > CONFLICT_THRESHOLD {
                    conflicts.push(Conflict {
                        source_a: views[i].name.to_string(),
                        source_b: views[j].name.to_string(),
                        divergence,
                        severity: if divergence > HIGH_SEVERITY_THRESHOLD {
                            ConflictSeverity::High
                        } else {
                            ConflictSeverity::Medium
                        },
                    });
                }
            }
        }
        conflicts
    }

    /// Largest group of sources whose latest values agree, over the total
    /// source count. Returns the level and a representative record of the
    /// majority group.
    fn consensus_level<'a>(&self, views: &[SourceView<'a>]) -> (f64, Option<&'a EvidenceRecord>) {
        if views.is_empty() {
            return (0.0, None);
        }

        // Greedy clustering: a source joins the first group whose
        // representative it agrees with (divergence at or below the conflict
        // threshold).
        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for (i, view) in views.iter().enumerate() {
            match groups.iter_mut().find(|(rep, _)| {
                views[*rep].latest.value.divergence(&view.latest.value) <= CONFLICT_THRESHOLD
            }) {
                Some((_, members)) => members.push(i),
                None => groups.push((i, vec![i])),
            }
        }

        let (rep, members) = groups
            .iter()
            .max_by_key(|(_, members)| members.len())
            .expect("at least one group");
        (
            members.len() as f64 / views.len() as f64,
            Some(views[*rep].latest),
        )
    }

    fn analyze(&self, evidence: &[EvidenceRecord]) -> Result<Verdict> {
        let views = self.source_views(evidence);
        if views.is_empty() {
            return Ok(Verdict {
                outcome: labels::NO_DATA.to_string(),
                confidence: 0.0,
                reasoning: vec!["no sources to arbitrate".to_string()],
                evidence: Vec::new(),
            });
        }

        let conflicts = self.detect_conflicts(&views);
        let (consensus_level, majority) = self.consensus_level(&views);
        let mean_reliability =
            views.iter().map(|v| v.reliability).sum::<f64>() / views.len() as f64;
        let high_conflicts = conflicts
            .iter()
            .filter(|c| c.severity == ConflictSeverity::High)
            .count();

        let mut reasoning = vec![format!(
            "{} sources, consensus level {:.2}, {} conflicts ({} high)",
            views.len(),
            consensus_level,
            conflicts.len(),
            high_conflicts
        )];
        for conflict in conflicts.iter().take(3) {
            reasoning.push(format!(
                "conflict {} vs {}: divergence {:.2} ({:?})",
                conflict.source_a, conflict.source_b, conflict.divergence, conflict.severity
            ));
        }

        let outcome = if consensus_level > CONSENSUS_DECISION_THRESHOLD {
            let label = majority
                .map(|r| r.value.normalized_outcome())
                .unwrap_or(labels::UNCERTAIN);
            reasoning.push(format!("majority of sources implies {label}"));
            label
        } else if !conflicts.is_empty() {
            // Conflicted picture: fall back to source reliability.
            if mean_reliability > RELIABILITY_DECISION_THRESHOLD {
                reasoning.push(format!(
                    "conflicting sources, trusting high mean reliability {mean_reliability:.2}"
                ));
                labels::YES
            } else {
                reasoning.push("conflicting sources of middling reliability".to_string());
                labels::UNCERTAIN
            }
        } else if mean_reliability > 0.0 {
            reasoning.push("no clear majority and no open conflicts".to_string());
            labels::UNCERTAIN
        } else {
            labels::NO_DATA
        };

        let conflict_factor =
            (1.0 - HIGH_CONFLICT_PENALTY * high_conflicts as f64).max(MIN_CONFLICT_FACTOR);
        let confidence =
            clamp_confidence((consensus_level * conflict_factor + mean_reliability) / 2.0);

        debug!(
            outcome,
            consensus_level, high_conflicts, confidence, "arbitration complete"
        );

        Ok(Verdict {
            outcome: outcome.to_string(),
            confidence,
            reasoning,
            evidence: views.iter().map(|v| v.latest.clone()).collect(),
        })
    }

    /// Manual-override dispute path: a fixed-confidence decision over
    /// free-text evidence. Deliberately simple; not an algorithmic
    /// arbitration.
    pub fn resolve_dispute(&self, subject: &Subject, evidence: &[String]) -> DisputeDecision {
        let lower: Vec<String> = evidence.iter().map(|e| e.to_lowercase()).collect();
        let yes = lower.iter().filter(|e| e.contains("yes")).count();
        let no = lower.iter().filter(|e| e.contains("no")).count();
        let outcome = if yes > no {
            labels::YES
        } else if no > yes {
            labels::NO
        } else {
            labels::UNCERTAIN
        };

        info!(subject = %subject.id, outcome, "dispute resolved by manual-override path");
        DisputeDecision {
            subject_id: subject.id.clone(),
            outcome: outcome.to_string(),
            confidence: DISPUTE_CONFIDENCE,
            reasoning: vec![format!(
                "dispute reviewed over {} evidence submissions ({yes} yes / {no} no)",
                evidence.len()
            )],
            decided_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ResolutionAgent for ConflictArbiter {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Arbiter
    }

    async fn start(&self) -> Result<()> {
        self.core.mark_ready();
        Ok(())
    }

    async fn score(&self, evidence: &[EvidenceRecord], _subject: &Subject) -> Result<AgentResponse> {
        self.core.scored(async { self.analyze(evidence) }).await
    }

    async fn stop(&self) -> Result<()> {
        self.core.mark_stopped();
        Ok(())
    }

    fn health(&self) -> AgentHealth {
        self.core.health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EvidenceValue, SubjectStatus};
    use chrono::Duration as ChronoDuration;

    fn subject() -> Subject {
        Subject {
            id: "mkt-1".to_string(),
            question: "Will the index close above 100?".to_string(),
            category: "finance".to_string(),
            deadline: Utc::now() + ChronoDuration::hours(2),
            created_at: Utc::now() - ChronoDuration::days(1),
            status: SubjectStatus::Open,
        }
    }

    async fn arbiter() -> ConflictArbiter {
        let agent = ConflictArbiter::new(&AppConfig::default());
        agent.start().await.unwrap();
        agent
    }

    fn record(source: &str, value: f64, reliability: f64) -> EvidenceRecord {
        EvidenceRecord::new(source, EvidenceValue::Numeric(value), reliability)
    }

    #[tokio::test]
    async fn test_identical_latest_values_mean_full_consensus() {
        let agent = arbiter().await;
        let evidence = vec![record("a", 100.0, 0.9), record("b", 100.0, 0.9)];

        let views = agent.source_views(&evidence);
        assert!(agent.detect_conflicts(&views).is_empty());
        let (level, _) = agent.consensus_level(&views);
        assert_eq!(level, 1.0);

        let response = agent.score(&evidence, &subject()).await.unwrap();
        assert_eq!(response.outcome, labels::YES);
        // Confidence is the average of consensus and mean reliability.
        assert!((response.confidence - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_only_latest_record_per_source_counts() {
        let agent = arbiter().await;
        let old = record("a", 50.0, 0.9).with_observed_at(Utc::now() - ChronoDuration::hours(1));
        let evidence = vec![old, record("a", 100.0, 0.9), record("b", 100.0, 0.9)];
        let views = agent.source_views(&evidence);
        assert_eq!(views.len(), 2);
        assert!(agent.detect_conflicts(&views).is_empty());
    }

    #[tokio::test]
    async fn test_high_severity_conflict_detection() {
        let agent = arbiter().await;
        let evidence = vec![record("a", 100.0, 0.9), record("b", 30.0, 0.9)];
        let views = agent.source_views(&evidence);
        let conflicts = agent.detect_conflicts(&views);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, ConflictSeverity::High);
    }

    #[tokio::test]
    async fn test_conflicted_reliable_sources_fall_back_to_yes() {
        let agent = arbiter().await;
        // Three-way disagreement: no group passes the consensus threshold.
        let evidence = vec![
            record("a", 100.0, 0.9),
            record("b", 30.0, 0.85),
            record("c", 60.0, 0.9),
        ];
        let response = agent.score(&evidence, &subject()).await.unwrap();
        assert_eq!(response.outcome, labels::YES);
        assert!(response.confidence >= 0.1 && response.confidence <= 0.95);
    }

    #[tokio::test]
    async fn test_conflicted_unreliable_sources_stay_uncertain() {
        let agent = arbiter().await;
        let evidence = vec![
            record("a", 100.0, 0.5),
            record("b", 30.0, 0.5),
            record("c", 60.0, 0.5),
        ];
        let response = agent.score(&evidence, &subject()).await.unwrap();
        assert_eq!(response.outcome, labels::UNCERTAIN);
    }

    #[tokio::test]
    async fn test_no_sources_reports_no_data() {
        let agent = arbiter().await;
        let response = agent.score(&[], &subject()).await.unwrap();
        assert_eq!(response.outcome, labels::NO_DATA);
        assert_eq!(response.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_dispute_path_has_fixed_confidence() {
        let agent = arbiter().await;
        let decision = agent.resolve_dispute(
            &subject(),
            &[
                "official tally: yes".to_string(),
                "exchange data says yes".to_string(),
                "one source says no".to_string(),
            ],
        );
        assert_eq!(decision.outcome, labels::YES);
        assert_eq!(decision.confidence, 0.8);
    }
}
