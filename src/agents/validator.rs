//! Evidence validator agent.
//!
//! Filters and down-weights evidence records with quality problems before
//! deriving an outcome from what survives.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::config::AppConfig;
use crate::domain::{
    clamp_confidence, labels, AgentKind, AgentResponse, EvidenceRecord, Subject,
};
use crate::error::Result;

use super::contract::{AgentCore, AgentHealth, ResolutionAgent, Verdict};

/// Records older than this are flagged stale.
const MAX_AGE_SECS: i64 = 3600;
/// Source reliability below this is flagged.
const MIN_SOURCE_RELIABILITY: f64 = 0.7;
/// Numeric relative deviation from the comparable mean at or above this is
/// flagged divergent.
const NUMERIC_DEVIATION_THRESHOLD: f64 = 0.10;
/// Non-numeric agreement ratio below this is flagged divergent.
const MIN_AGREEMENT_RATIO: f64 = 0.6;
/// Working reliability multiplier applied per failing check.
const ISSUE_PENALTY: f64 = 0.8;
/// More issues than this marks the record invalid.
const MAX_ISSUES: usize = 2;

/// Per-record validation working state.
struct Checked {
    record: EvidenceRecord,
    working_reliability: f64,
    issues: Vec<String>,
}

impl Checked {
    fn is_valid(&self) -> bool {
        self.issues.len() <= MAX_ISSUES
    }
}

pub struct EvidenceValidator {
    core: AgentCore,
}

impl EvidenceValidator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            core: AgentCore::new("evidence-validator", AgentKind::Validator, &config.agents),
        }
    }

    fn check_record(&self, record: &EvidenceRecord, all: &[EvidenceRecord]) -> Checked {
        let mut issues = Vec::new();
        let mut working_reliability = record.reliability;

        let age = record.age_seconds(Utc::now());
        if age > MAX_AGE_SECS {
            issues.push(format!("{}: stale observation ({age}s old)", record.source));
            working_reliability *= ISSUE_PENALTY;
        }

        if record.reliability < MIN_SOURCE_RELIABILITY {
            issues.push(format!(
                "{}: low source reliability ({:.2})",
                record.source, record.reliability
            ));
            working_reliability *= ISSUE_PENALTY;
        }

        if record.value.is_suspicious() {
            issues.push(format!("{}: suspicious value ({})", record.source, record.value));
            working_reliability *= ISSUE_PENALTY;
        }

        if self.diverges_from_peers(record, all) {
            issues.push(format!(
                "{}: diverges from comparable records",
                record.source
            ));
            working_reliability *= ISSUE_PENALTY;
        }

        Checked {
            record: record.clone(),
            working_reliability,
            issues,
        }
    }

    /// Divergence from same-type records reported by other sources: numeric
    /// relative deviation from the peer mean, agreement ratio otherwise.
    fn diverges_from_peers(&self, record: &EvidenceRecord, all: &[EvidenceRecord]) -> bool {
        let peers: Vec<&EvidenceRecord> = all
            .iter()
            .filter(|r| r.source != record.source && r.value.is_comparable_to(&record.value))
            .collect();
        if peers.is_empty() {
            return false;
        }

        if let Some(value) = record.value.as_numeric() {
            let mean = peers
                .iter()
                .filter_map(|r| r.value.as_numeric())
                .sum::<f64>()
                / peers.len() as f64;
            if mean.abs() < f64::EPSILON {
                return value.abs() > f64::EPSILON;
            }
            ((value - mean).abs() / mean.abs()) >= NUMERIC_DEVIATION_THRESHOLD
        } else {
            let agreeing = peers
                .iter()
                .filter(|r| record.value.divergence(&r.value) == 0.0)
                .count();
            (agreeing as f64 / peers.len() as f64) < MIN_AGREEMENT_RATIO
        }
    }

    fn analyze(&self, evidence: &[EvidenceRecord]) -> Result<Verdict> {
        let checked: Vec<Checked> = evidence
            .iter()
            .map(|r| self.check_record(r, evidence))
            .collect();

        let valid: Vec<&Checked> = checked.iter().filter(|c| c.is_valid()).collect();
        let invalid_count = checked.len() - valid.len();

        // Invalid records are excluded from the outcome but still explain
        // themselves in the reasoning summary.
        let mut reasoning: Vec<String> = checked
            .iter()
            .flat_map(|c| c.issues.iter().cloned())
            .collect();
        reasoning.insert(
            0,
            format!(
                "validated {} of {} records ({invalid_count} invalid)",
                valid.len(),
                checked.len()
            ),
        );

        if valid.is_empty() {
            return Ok(Verdict {
                outcome: labels::INSUFFICIENT_VALID_DATA.to_string(),
                confidence: 0.0,
                reasoning,
                evidence: Vec::new(),
            });
        }

        // Majority vote over normalized labels, first-seen tie-break.
        let mut tally: Vec<(&'static str, usize)> = Vec::new();
        for c in &valid {
            let label = c.record.value.normalized_outcome();
            match tally.iter_mut().find(|(l, _)| *l == label) {
                Some((_, n)) => *n += 1,
                None => tally.push((label, 1)),
            }
        }
        // Strictly-greater comparison keeps the first-seen label on ties.
        let mut best: Option<(&'static str, usize)> = None;
        for (label, n) in tally {
            if best.map_or(true, |(_, m)| n > m) {
                best = Some((label, n));
            }
        }
        let (outcome, votes) = best.expect("at least one valid record");
        reasoning.push(format!(
            "majority label {outcome} ({votes}/{} valid records)",
            valid.len()
        ));

        let avg_reliability = valid
            .iter()
            .map(|c| c.working_reliability)
            .sum::<f64>()
            / valid.len() as f64;
        let valid_share = valid.len() as f64 / checked.len() as f64;
        let confidence = clamp_confidence((avg_reliability * valid_share).min(0.95));

        info!(
            valid = valid.len(),
            invalid = invalid_count,
            outcome,
            confidence,
            "evidence validation complete"
        );

        Ok(Verdict {
            outcome: outcome.to_string(),
            confidence,
            reasoning,
            evidence: valid.into_iter().map(|c| c.record.clone()).collect(),
        })
    }
}

#[async_trait]
impl ResolutionAgent for EvidenceValidator {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Validator
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
