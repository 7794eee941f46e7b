//! Evidence collector agent.
//!
//! Gathers evidence records from the external data providers relevant to a
//! subject, then doubles as a baseline scoring agent over whatever was
//! gathered.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapters::{provider::matches_subject, DataProvider};
use crate::config::AppConfig;
use crate::domain::{
    clamp_confidence, labels, AgentKind, AgentResponse, EvidenceRecord, Subject,
};
use crate::domain::subject::BetDirection;
use crate::error::{Result, VeridictError};
use crate::services::ProviderHealthBoard;

use super::contract::{AgentCore, AgentHealth, ResolutionAgent, Verdict};

/// Words counted as positive indicators in news polarity scoring.
const POSITIVE_INDICATORS: &[&str] = &[
    "win", "wins", "won", "approve", "approved", "pass", "passed", "success", "confirm",
    "confirmed", "rise", "gain", "agree",
];

/// Words counted as negative indicators.
const NEGATIVE_INDICATORS: &[&str] = &[
    "lose", "loses", "lost", "reject", "rejected", "fail", "failed", "deny", "denied", "fall",
    "drop", "cancel", "cancelled",
];

pub struct EvidenceCollector {
    core: AgentCore,
    providers: Vec<Arc<dyn DataProvider>>,
    board: Arc<ProviderHealthBoard>,
    max_points: usize,
}

impl EvidenceCollector {
    pub fn new(
        config: &AppConfig,
        providers: Vec<Arc<dyn DataProvider>>,
        board: Arc<ProviderHealthBoard>,
    ) -> Self {
        Self {
            core: AgentCore::new("evidence-collector", AgentKind::Collector, &config.agents),
            providers,
            board,
            max_points: config.resolution.max_evidence_points,
        }
    }

    pub fn providers(&self) -> &[Arc<dyn DataProvider>] {
        &self.providers
    }

    /// Pick providers for a subject: keyword matches are always queried;
    /// non-matching providers join as a fallback while they are healthy.
    async fn select_providers(&self, subject: &Subject) -> Vec<Arc<dyn DataProvider>> {
        let mut selected = Vec::new();
        for provider in &self.providers {
            let matched = matches_subject(provider.as_ref(), subject);
            if matched || self.board.is_healthy(provider.name()).await {
                selected.push(Arc::clone(provider));
            } else {
                debug!(provider = provider.name(), "skipping unhealthy fallback provider");
            }
        }
        selected
    }

    /// Query all relevant providers concurrently. A provider failure is
    /// logged and skipped, never aborts the batch.
    pub async fn collect_evidence(&self, subject: &Subject) -> Result<Vec<EvidenceRecord>> {
        self.core.ensure_ready()?;

        let selected = self.select_providers(subject).await;
        debug!(
            subject = %subject.id,
            providers = selected.len(),
            "collecting evidence"
        );

        let fetches = selected.iter().map(|provider| {
            let provider = Arc::clone(provider);
            let subject = subject.clone();
            async move { (provider.name().to_string(), provider.fetch(&subject).await) }
        });

        let mut records = Vec::new();
        for (name, result) in join_all(fetches).await {
            match result {
                Ok(batch) => records.extend(batch),
                Err(e) => warn!(provider = %name, error = %e, "provider fetch failed, skipping"),
            }
        }

        records.sort_by_key(|r| r.observed_at);
        if records.len() > self.max_points {
            // Keep the most recent observations when over the cap.
            let excess = records.len() - self.max_points;
            records.drain(..excess);
        }

        info!(subject = %subject.id, points = records.len(), "evidence collected");
        Ok(records)
    }

    fn analyze(&self, evidence: &[EvidenceRecord], subject: &Subject) -> Result<Verdict> {
        if evidence.is_empty() {
            return Ok(Verdict {
                outcome: labels::NO_DATA.to_string(),
                confidence: 0.0,
                reasoning: vec!["no evidence collected from any provider".to_string()],
                evidence: Vec::new(),
            });
        }

        if subject.is_price_based() {
            if let Some(verdict) = self.price_trend_verdict(evidence, subject) {
                return Ok(verdict);
            }
        }
        if subject.is_event_based() {
            if let Some(verdict) = self.polarity_verdict(evidence) {
                return Ok(verdict);
            }
        }

        let avg_reliability =
            evidence.iter().map(|r| r.reliability).sum::<f64>() / evidence.len() as f64;
        Ok(Verdict {
            outcome: labels::REQUIRES_VALIDATION.to_string(),
            confidence: clamp_confidence(avg_reliability * 0.5),
            reasoning: vec![format!(
                "{} records with average reliability {:.2}; no baseline heuristic applies",
                evidence.len(),
                avg_reliability
            )],
            evidence: evidence.to_vec(),
        })
    }

    /// Trend of the earliest-to-latest price observation, mapped to YES/NO
    /// when the question phrasing implies a directional bet.
    fn price_trend_verdict(
        &self,
        evidence: &[EvidenceRecord],
        subject: &Subject,
    ) -> Option<Verdict> {
        let direction = subject.implied_direction()?;

        let mut prices: Vec<&EvidenceRecord> = evidence
            .iter()
            .filter(|r| r.metadata_str("kind") == Some("price") && r.value.as_numeric().is_some())
            .collect();
        if prices.is_empty() {
            prices = evidence
                .iter()
                .filter(|r| r.value.as_numeric().is_some())
                .collect();
        }
        if prices.len() < 2 {
            return None;
        }
        prices.sort_by_key(|r| r.observed_at);

        let earliest = prices.first()?.value.as_numeric()?;
        let latest = prices.last()?.value.as_numeric()?;
        let trend = latest - earliest;
        let max_observed = prices
            .iter()
            .filter_map(|r| r.value.as_numeric())
            .fold(0.0_f64, |a, b| a.max(b.abs()));
        let magnitude = if max_observed > f64::EPSILON {
            trend.abs() / max_observed
        } else {
            0.0
        };

        let favors_bet = match direction {
            BetDirection::Up => trend > 0.0,
            BetDirection::Down => trend < 0.0,
        };
        let outcome = if favors_bet { labels::YES } else { labels::NO };

        Some(Verdict {
            outcome: outcome.to_string(),
            confidence: clamp_confidence(0.5 + magnitude),
            reasoning: vec![
                format!(
                    "price trend {:+.4} across {} observations ({:.4} -> {:.4})",
                    trend,
                    prices.len(),
                    earliest,
                    latest
                ),
                format!("trend magnitude {:.3} relative to max observed value", magnitude),
            ],
            evidence: prices.into_iter().cloned().collect(),
        })
    }

    /// Keyword polarity counting over text observations.
    fn polarity_verdict(&self, evidence: &[EvidenceRecord]) -> Option<Verdict> {
        let mut positive = 0usize;
        let mut negative = 0usize;
        let mut texts = Vec::new();
        for record in evidence {
            if let crate::domain::EvidenceValue::Text(s) = &record.value {
                let lower = s.to_lowercase();
                positive += POSITIVE_INDICATORS.iter().filter(|w| lower.contains(*w)).count();
                negative += NEGATIVE_INDICATORS.iter().filter(|w| lower.contains(*w)).count();
                texts.push(record.clone());
            }
        }

        let total = positive + negative;
        if total == 0 {
            return None;
        }

        let (outcome, dominant) = if positive >= negative {
            (labels::YES, positive)
        } else {
            (labels::NO, negative)
        };
        let share = dominant as f64 / total as f64;

        Some(Verdict {
            outcome: outcome.to_string(),
            confidence: clamp_confidence(share * 0.9),
            reasoning: vec![format!(
                "polarity count: {positive} positive vs {negative} negative indicators"
            )],
            evidence: texts,
        })
    }
}

#[async_trait]
impl ResolutionAgent for EvidenceCollector {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Collector
    }

    async fn start(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(VeridictError::ProviderUnavailable(
                "no data providers registered".to_string(),
            ));
        }
        self.core.mark_ready();
        info!(providers = self.providers.len(), "evidence collector started");
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
