//! Confidence scorer agent.
//!
//! Independently estimates how trustworthy a resolution would be, as a
//! weighted blend of five rule-based factors. Each factor starts from a 0.5
//! baseline and is adjusted by bonuses and penalties before weighting.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::config::AppConfig;
use crate::domain::{
    clamp_confidence, labels, AgentKind, AgentResponse, EvidenceRecord, Subject,
};
use crate::error::Result;

use super::contract::{AgentCore, AgentHealth, ResolutionAgent, Verdict};

const FACTOR_BASELINE: f64 = 0.5;

// Blend weights; they sum to 1.
const WEIGHT_DATA_QUALITY: f64 = 0.25;
const WEIGHT_SOURCE_RELIABILITY: f64 = 0.25;
const WEIGHT_TEMPORAL: f64 = 0.15;
const WEIGHT_CONSENSUS: f64 = 0.25;
const WEIGHT_MARKET: f64 = 0.10;

// Data quality thresholds.
const RICH_RECORD_COUNT: usize = 10;
const SPARSE_RECORD_COUNT: usize = 3;
const HIGH_AVG_RELIABILITY: f64 = 0.8;
const LOW_AVG_RELIABILITY: f64 = 0.5;

// Source reliability thresholds.
const MANY_SOURCES: usize = 5;
const FEW_SOURCES: usize = 2;
const STRONG_SOURCE_RELIABILITY: f64 = 0.8;
const STRONG_SOURCE_COUNT: usize = 3;

// Consensus thresholds.
const STRONG_AGREEMENT: f64 = 0.8;
const WEAK_AGREEMENT: f64 = 0.5;
const MAX_DISTINCT_LABELS: usize = 3;

struct FactorBreakdown {
    data_quality: f64,
    source_reliability: f64,
    temporal: f64,
    consensus: f64,
    market: f64,
    /// Numeric variance carried through for reporting only.
    numeric_variance: f64,
}

pub struct ConfidenceScorer {
    core: AgentCore,
}

impl ConfidenceScorer {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            core: AgentCore::new("confidence-scorer", AgentKind::Scorer, &config.agents),
        }
    }

    fn data_quality_factor(&self, evidence: &[EvidenceRecord]) -> f64 {
        let mut factor = FACTOR_BASELINE;

        if evidence.len() >= RICH_RECORD_COUNT {
            factor += 0.2;
        } else if evidence.len() < SPARSE_RECORD_COUNT {
            factor -= 0.2;
        }

        let avg_reliability =
            evidence.iter().map(|r| r.reliability).sum::<f64>() / evidence.len() as f64;
        if avg_reliability >= HIGH_AVG_RELIABILITY {
            factor += 0.2;
        } else if avg_reliability < LOW_AVG_RELIABILITY {
            factor -= 0.2;
        }

        let now = Utc::now();
        let fresh_24h = evidence
            .iter()
            .filter(|r| r.age_seconds(now) < 24 * 3600)
            .count() as f64
            / evidence.len() as f64;
        if fresh_24h >= 0.7 {
            factor += 0.1;
        } else if fresh_24h < 0.3 {
            factor -= 0.1;
        }

        factor.clamp(0.0, 1.0)
    }

    fn source_reliability_factor(&self, evidence: &[EvidenceRecord]) -> f64 {
        let mut per_source: Vec<(&str, f64, usize)> = Vec::new();
        for record in evidence {
            match per_source.iter_mut().find(|(s, _, _)| *s == record.source) {
                Some((_, sum, n)) => {
                    *sum += record.reliability;
                    *n += 1;
                }
                None => per_source.push((&record.source, record.reliability, 1)),
            }
        }
        let averages: Vec<f64> = per_source
            .iter()
            .map(|(_, sum, n)| sum / *n as f64)
            .collect();

        let mut factor = averages.iter().sum::<f64>() / averages.len() as f64;

        if averages.len() >= MANY_SOURCES {
            factor += 0.1;
        } else if averages.len() < FEW_SOURCES {
            factor -= 0.2;
        }
        if averages
            .iter()
            .filter(|r| **r > STRONG_SOURCE_RELIABILITY)
            .count()
            >= STRONG_SOURCE_COUNT
        {
            factor += 0.1;
        }

        factor.clamp(0.0, 1.0)
    }

    fn temporal_factor(&self, evidence: &[EvidenceRecord], subject: &Subject) -> f64 {
        let mut factor = FACTOR_BASELINE;
        let now = Utc::now();

        let to_deadline = subject.seconds_to_deadline(now);
        if to_deadline > 7 * 24 * 3600 {
            factor -= 0.2;
        } else if to_deadline < 3600 {
            factor += 0.2;
        }

        let fresh_6h = evidence
            .iter()
            .filter(|r| r.age_seconds(now) < 6 * 3600)
            .count() as f64
            / evidence.len() as f64;
        if fresh_6h >= 0.5 {
            factor += 0.15;
        } else if fresh_6h < 0.2 {
            factor -= 0.15;
        }

        factor.clamp(0.0, 1.0)
    }

    /// Agreement of normalized record outcomes, plus a fragmentation
    /// penalty. The numeric variance is measured here but only reported.
    fn consensus_factor(&self, evidence: &[EvidenceRecord]) -> (f64, f64) {
        let mut factor = FACTOR_BASELINE;

        let mut tally: Vec<(&'static str, usize)> = Vec::new();
        for record in evidence {
            let label = record.value.normalized_outcome();
            match tally.iter_mut().find(|(l, _)| *l == label) {
                Some((_, n)) => *n += 1,
                None => tally.push((label, 1)),
            }
        }
        let largest = tally.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let agreement = largest as f64 / evidence.len() as f64;

        if agreement >= STRONG_AGREEMENT {
            factor += 0.3;
        } else if agreement < WEAK_AGREEMENT {
            factor -= 0.2;
        }
        if tally.len() > MAX_DISTINCT_LABELS {
            factor -= 0.1;
        }

        let numerics: Vec<f64> = evidence.iter().filter_map(|r| r.value.as_numeric()).collect();
        let variance = if numerics.len() > 1 {
            let mean = numerics.iter().sum::<f64>() / numerics.len() as f64;
            numerics.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / numerics.len() as f64
        } else {
            0.0
        };

        (factor.clamp(0.0, 1.0), variance)
    }

    fn market_factor(&self, subject: &Subject) -> f64 {
        let mut factor = FACTOR_BASELINE;
        let now = Utc::now();

        if subject.is_volatile_category() {
            factor -= 0.15;
        }
        let age = subject.age_seconds(now);
        if age > 30 * 24 * 3600 {
            factor += 0.1;
        } else if age < 24 * 3600 {
            factor -= 0.1;
        }

        factor.clamp(0.0, 1.0)
    }

    fn breakdown(&self, evidence: &[EvidenceRecord], subject: &Subject) -> FactorBreakdown {
        let (consensus, numeric_variance) = self.consensus_factor(evidence);
        FactorBreakdown {
            data_quality: self.data_quality_factor(evidence),
            source_reliability: self.source_reliability_factor(evidence),
            temporal: self.temporal_factor(evidence, subject),
            consensus,
            market: self.market_factor(subject),
            numeric_variance,
        }
    }

    /// Majority label among all records' normalized outcomes, ties broken by
    /// first-seen order.
    fn majority_outcome(&self, evidence: &[EvidenceRecord]) -> &'static str {
        let mut tally: Vec<(&'static str, usize)> = Vec::new();
        for record in evidence {
            let label = record.value.normalized_outcome();
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
        best.map(|(label, _)| label).unwrap_or(labels::UNCERTAIN)
    }

    fn analyze(&self, evidence: &[EvidenceRecord], subject: &Subject) -> Result<Verdict> {
        if evidence.is_empty() {
            return Ok(Verdict {
                outcome: labels::NO_DATA.to_string(),
                confidence: 0.0,
                reasoning: vec!["no records to score".to_string()],
                evidence: Vec::new(),
            });
        }

        let factors = self.breakdown(evidence, subject);
        let confidence = clamp_confidence(
            factors.data_quality * WEIGHT_DATA_QUALITY
                + factors.source_reliability * WEIGHT_SOURCE_RELIABILITY
                + factors.temporal * WEIGHT_TEMPORAL
                + factors.consensus * WEIGHT_CONSENSUS
                + factors.market * WEIGHT_MARKET,
        );
        let outcome = self.majority_outcome(evidence);

        debug!(
            outcome,
            confidence,
            data_quality = factors.data_quality,
            consensus = factors.consensus,
            "confidence scoring complete"
        );

        Ok(Verdict {
            outcome: outcome.to_string(),
            confidence,
            reasoning: vec![
                format!(
                    "quality {:.2}, reliability {:.2}, temporal {:.2}, consensus {:.2}, market {:.2}",
                    factors.data_quality,
                    factors.source_reliability,
                    factors.temporal,
                    factors.consensus,
                    factors.market
                ),
                format!("numeric variance {:.4}", factors.numeric_variance),
            ],
            evidence: evidence.to_vec(),
        })
    }
}

#[async_trait]
impl ResolutionAgent for ConfidenceScorer {
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

    async fn score(&self, evidence: &[EvidenceRecord], subject: &Subject) -> Result<AgentResponse> {
        self.core.scored(async { self.analyze(evidence, subject) }).await
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

    fn subject(category: &str, deadline_hours: i64, age_days: i64) -> Subject {
        Subject {
            id: "mkt-1".to_string(),
            question: "Will the reading exceed 100?".to_string(),
            category: category.to_string(),
            deadline: Utc::now() + ChronoDuration::hours(deadline_hours),
            created_at: Utc::now() - ChronoDuration::days(age_days),
            status: SubjectStatus::Open,
        }
    }

    async fn scorer() -> ConfidenceScorer {
        let agent = ConfidenceScorer::new(&AppConfig::default());
        agent.start().await.unwrap();
        agent
    }

    fn record(source: &str, value: f64, reliability: f64) -> EvidenceRecord {
        EvidenceRecord::new(source, EvidenceValue::Numeric(value), reliability)
    }

    #[tokio::test]
    async fn test_agreeing_records_push_consensus_factor_up() {
        let agent = scorer().await;
        // Five records agreeing within 2% all normalize to YES.
        let evidence = vec![
            record("a", 100.0, 0.9),
            record("b", 100.5, 0.9),
            record("c", 101.0, 0.9),
            record("d", 99.2, 0.9),
            record("e", 100.8, 0.9),
        ];
        let (consensus, variance) = agent.consensus_factor(&evidence);
        assert!(consensus >= 0.8, "got {consensus}");
        assert!(variance > 0.0);
    }

    #[tokio::test]
    async fn test_final_confidence_stays_in_range() {
        let agent = scorer().await;
        let evidence = vec![record("a", 100.0, 0.95), record("b", 100.1, 0.95)];
        let response = agent
            .score(&evidence, &subject("politics", 2, 60))
            .await
            .unwrap();
        assert!(response.confidence >= 0.1 && response.confidence <= 0.95);
        assert_eq!(response.outcome, labels::YES);
    }

    #[tokio::test]
    async fn test_volatile_recent_subject_scores_below_stable_old_one() {
        let agent = scorer().await;
        let evidence: Vec<EvidenceRecord> =
            (0..5).map(|i| record(&format!("s{i}"), 100.0, 0.85)).collect();

        let volatile = agent
            .score(&evidence, &subject("crypto", 2, 0))
            .await
            .unwrap();
        let stable = agent
            .score(&evidence, &subject("politics", 2, 60))
            .await
            .unwrap();
        assert!(volatile.confidence < stable.confidence);
    }

    #[tokio::test]
    async fn test_sparse_stale_data_is_penalized() {
        let agent = scorer().await;
        let old = Utc::now() - ChronoDuration::days(3);
        let sparse = vec![
            record("a", 100.0, 0.4).with_observed_at(old),
            record("b", 40.0, 0.4).with_observed_at(old),
        ];
        let rich: Vec<EvidenceRecord> = (0..12)
            .map(|i| record(&format!("s{i}"), 100.0 + i as f64 * 0.1, 0.9))
            .collect();

        let weak = agent.score(&sparse, &subject("politics", 48, 10)).await.unwrap();
        let strong = agent.score(&rich, &subject("politics", 48, 10)).await.unwrap();
        assert!(weak.confidence < strong.confidence);
    }

    #[tokio::test]
    async fn test_majority_outcome_tie_breaks_first_seen() {
        let agent = scorer().await;
        let evidence = vec![
            EvidenceRecord::new("a", EvidenceValue::Boolean(false), 0.9),
            EvidenceRecord::new("b", EvidenceValue::Boolean(true), 0.9),
        ];
        // 1-1 tie: the first-seen label (NO) wins.
        assert_eq!(agent.majority_outcome(&evidence), labels::NO);
    }

    #[tokio::test]
    async fn test_empty_evidence_scores_zero() {
        let agent = scorer().await;
        let response = agent.score(&[], &subject("politics", 2, 10)).await.unwrap();
        assert_eq!(response.outcome, labels::NO_DATA);
        assert_eq!(response.confidence, 0.0);
    }
}
