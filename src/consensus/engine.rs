//! Consensus engine
//!
//! Consumes the set of agent responses for one subject and produces a single
//! ranked decision. One session runs per subject; sessions move
//! Idle -> Collecting -> Deciding -> Complete, or to TimedOut when the
//! overall resolution budget elapses, at which point a decision is forced
//! from whatever responses have arrived.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::domain::{
    clamp_confidence, AgentKind, AgentResponse, AgentVote, ConsensusMethod, ConsensusResult,
    CONFIDENCE_CEILING,
};
use crate::error::{Result, VeridictError};

/// Voting protocol constants.
///
/// The margin thresholds and bonus terms are empirical values carried over
/// from production tuning; they are exposed as configuration rather than
/// re-derived.
#[derive(Debug, Clone, Deserialize)]
pub struct VotingConfig {
    /// Single-source penalty applied when only one agent responded
    #[serde(default = "default_single_agent_factor")]
    pub single_agent_factor: f64,
    /// Mean confidence required for the unanimous fast path
    #[serde(default = "default_unanimity_min_confidence")]
    pub unanimity_min_confidence: f64,
    /// Boost applied to the mean confidence of a unanimous decision
    #[serde(default = "default_unanimity_boost")]
    pub unanimity_boost: f64,
    /// Base vote weight per agent kind
    #[serde(default = "default_collector_weight")]
    pub collector_weight: f64,
    #[serde(default = "default_validator_weight")]
    pub validator_weight: f64,
    #[serde(default = "default_arbiter_weight")]
    pub arbiter_weight: f64,
    #[serde(default = "default_scorer_weight")]
    pub scorer_weight: f64,
    /// How much an agent's own confidence adds to its vote weight
    #[serde(default = "default_confidence_weight_factor")]
    pub confidence_weight_factor: f64,
    /// Weight bonus for responses faster than `fast_response_ms`
    #[serde(default = "default_fast_response_bonus")]
    pub fast_response_bonus: f64,
    #[serde(default = "default_fast_response_ms")]
    pub fast_response_ms: u64,
    #[serde(default = "default_min_vote_weight")]
    pub min_vote_weight: f64,
    #[serde(default = "default_max_vote_weight")]
    pub max_vote_weight: f64,
    /// Margin above which the winning confidence is boosted
    #[serde(default = "default_margin_boost_threshold")]
    pub margin_boost_threshold: f64,
    /// Margin below which the winning confidence is reduced
    #[serde(default = "default_margin_penalty_threshold")]
    pub margin_penalty_threshold: f64,
    #[serde(default = "default_margin_boost")]
    pub margin_boost: f64,
    #[serde(default = "default_margin_penalty")]
    pub margin_penalty: f64,
    /// Per-extra-agent confidence bonus, and its cap
    #[serde(default = "default_multi_agent_bonus_step")]
    pub multi_agent_bonus_step: f64,
    #[serde(default = "default_multi_agent_bonus_cap")]
    pub multi_agent_bonus_cap: f64,
    /// Reduction applied when more than two distinct outcome labels appear
    #[serde(default = "default_fragmentation_penalty")]
    pub fragmentation_penalty: f64,
    /// Cap on deduplicated reasoning strings in the result
    #[serde(default = "default_max_reasoning_entries")]
    pub max_reasoning_entries: usize,
}

fn default_single_agent_factor() -> f64 {
    0.7
}
fn default_unanimity_min_confidence() -> f64 {
    0.8
}
fn default_unanimity_boost() -> f64 {
    1.1
}
fn default_collector_weight() -> f64 {
    0.8
}
fn default_validator_weight() -> f64 {
    1.0
}
fn default_arbiter_weight() -> f64 {
    1.2
}
fn default_scorer_weight() -> f64 {
    0.9
}
fn default_confidence_weight_factor() -> f64 {
    0.5
}
fn default_fast_response_bonus() -> f64 {
    0.1
}
fn default_fast_response_ms() -> u64 {
    5_000
}
fn default_min_vote_weight() -> f64 {
    0.1
}
fn default_max_vote_weight() -> f64 {
    2.0
}
fn default_margin_boost_threshold() -> f64 {
    0.7
}
fn default_margin_penalty_threshold() -> f64 {
    0.4
}
fn default_margin_boost() -> f64 {
    1.1
}
fn default_margin_penalty() -> f64 {
    0.8
}
fn default_multi_agent_bonus_step() -> f64 {
    0.02
}
fn default_multi_agent_bonus_cap() -> f64 {
    0.1
}
fn default_fragmentation_penalty() -> f64 {
    0.9
}
fn default_max_reasoning_entries() -> usize {
    5
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            single_agent_factor: default_single_agent_factor(),
            unanimity_min_confidence: default_unanimity_min_confidence(),
            unanimity_boost: default_unanimity_boost(),
            collector_weight: default_collector_weight(),
            validator_weight: default_validator_weight(),
            arbiter_weight: default_arbiter_weight(),
            scorer_weight: default_scorer_weight(),
            confidence_weight_factor: default_confidence_weight_factor(),
            fast_response_bonus: default_fast_response_bonus(),
            fast_response_ms: default_fast_response_ms(),
            min_vote_weight: default_min_vote_weight(),
            max_vote_weight: default_max_vote_weight(),
            margin_boost_threshold: default_margin_boost_threshold(),
            margin_penalty_threshold: default_margin_penalty_threshold(),
            margin_boost: default_margin_boost(),
            margin_penalty: default_margin_penalty(),
            multi_agent_bonus_step: default_multi_agent_bonus_step(),
            multi_agent_bonus_cap: default_multi_agent_bonus_cap(),
            fragmentation_penalty: default_fragmentation_penalty(),
            max_reasoning_entries: default_max_reasoning_entries(),
        }
    }
}

impl VotingConfig {
    pub fn base_weight(&self, kind: AgentKind) -> f64 {
        match kind {
            AgentKind::Collector => self.collector_weight,
            AgentKind::Validator => self.validator_weight,
            AgentKind::Arbiter => self.arbiter_weight,
            AgentKind::Scorer => self.scorer_weight,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.min_vote_weight >= self.max_vote_weight {
            return Err("voting.min_vote_weight must be below max_vote_weight".to_string());
        }
        if self.margin_penalty_threshold >= self.margin_boost_threshold {
            return Err(
                "voting.margin_penalty_threshold must be below margin_boost_threshold".to_string(),
            );
        }
        if !(0.0..=1.0).contains(&self.unanimity_min_confidence) {
            return Err("voting.unanimity_min_confidence must be between 0 and 1".to_string());
        }
        Ok(())
    }
}

/// Consensus session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Session created, no responses yet
    Idle,
    /// Receiving per-agent responses
    Collecting,
    /// Running the decision algorithm
    Deciding,
    /// Decision produced
    Complete,
    /// Overall budget elapsed; decision forced from partial responses
    TimedOut,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::Collecting => "COLLECTING",
            SessionState::Deciding => "DECIDING",
            SessionState::Complete => "COMPLETE",
            SessionState::TimedOut => "TIMED_OUT",
        }
    }

    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Idle, Collecting)
                | (Idle, Deciding)
                | (Idle, TimedOut)
                | (Collecting, Collecting)
                | (Collecting, Deciding)
                | (Collecting, TimedOut)
                | (Deciding, Complete)
                | (TimedOut, TimedOut)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::TimedOut)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One consensus session for one subject.
pub struct ConsensusSession {
    subject_id: String,
    state: SessionState,
    responses: Vec<AgentResponse>,
}

impl ConsensusSession {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn response_count(&self) -> usize {
        self.responses.len()
    }

    fn transition(&mut self, target: SessionState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(VeridictError::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        self.state = target;
        Ok(())
    }

    /// Accept one agent response into the session.
    pub fn collect(&mut self, response: AgentResponse) -> Result<()> {
        self.transition(SessionState::Collecting)?;
        debug!(
            subject = %self.subject_id,
            agent = %response.agent_id,
            outcome = %response.outcome,
            confidence = response.confidence,
            "collected agent response"
        );
        self.responses.push(response);
        Ok(())
    }

    /// Mark the session as timed out; a forced decision may still follow.
    pub fn mark_timed_out(&mut self) {
        warn!(subject = %self.subject_id, responses = self.responses.len(), "consensus session timed out");
        self.state = SessionState::TimedOut;
    }

    /// Consume the session, yielding the collected responses.
    pub fn into_responses(self) -> Vec<AgentResponse> {
        self.responses
    }
}

/// Applies the voting protocol over one session's responses.
pub struct ConsensusEngine {
    voting: VotingConfig,
}

impl ConsensusEngine {
    pub fn new(voting: VotingConfig) -> Self {
        Self { voting }
    }

    pub fn with_defaults() -> Self {
        Self::new(VotingConfig::default())
    }

    pub fn voting(&self) -> &VotingConfig {
        &self.voting
    }

    /// Start a session for one subject. The orchestrator guarantees at most
    /// one live session per subject id.
    pub fn begin(&self, subject_id: impl Into<String>) -> ConsensusSession {
        ConsensusSession {
            subject_id: subject_id.into(),
            state: SessionState::Idle,
            responses: Vec::new(),
        }
    }

    /// Run the decision algorithm over everything the session collected.
    pub fn decide(&self, session: &mut ConsensusSession) -> Result<ConsensusResult> {
        let forced = session.state == SessionState::TimedOut;
        if !forced {
            session.transition(SessionState::Deciding)?;
        }

        let result = self.decide_inner(&session.responses, &session.subject_id);

        // A failed decision (zero responses) leaves the session in Deciding;
        // the orchestrator discards it and reports the failure.
        if !forced && result.is_ok() {
            session.transition(SessionState::Complete)?;
        }
        result
    }

    fn decide_inner(&self, responses: &[AgentResponse], subject_id: &str) -> Result<ConsensusResult> {
        if responses.is_empty() {
            return Err(VeridictError::InsufficientData(format!(
                "no agent responses for subject {subject_id}"
            )));
        }

        let result = if responses.len() == 1 {
            self.decide_single(&responses[0])
        } else if let Some(unanimous) = self.try_unanimous(responses) {
            unanimous
        } else {
            self.decide_weighted(responses)
        };

        info!(
            subject = %subject_id,
            outcome = %result.outcome,
            confidence = result.confidence,
            method = %result.method,
            votes = result.votes.len(),
            "consensus formed"
        );
        Ok(result)
    }

    /// Single responder: accept its outcome with a flat single-source
    /// penalty. The penalty is exact by contract (0.7x the agent's own
    /// confidence), so no clamp is applied here.
    fn decide_single(&self, response: &AgentResponse) -> ConsensusResult {
        let vote = AgentVote {
            agent_id: response.agent_id.clone(),
            outcome: response.outcome.clone(),
            weight: 1.0,
            confidence: response.confidence,
        };
        ConsensusResult {
            outcome: response.outcome.clone(),
            confidence: response.confidence * self.voting.single_agent_factor,
            reasoning: self.dedup_reasoning(std::slice::from_ref(response)),
            votes: vec![vote],
            method: ConsensusMethod::SingleAgent,
            decided_at: Utc::now(),
        }
    }

    /// Unanimity fast path: identical outcome labels AND mean confidence at
    /// or above the threshold. Equal labels with a 0.79 mean fall through to
    /// weighted voting.
    fn try_unanimous(&self, responses: &[AgentResponse]) -> Option<ConsensusResult> {
        let first = &responses[0].outcome;
        if !responses.iter().all(|r| r.outcome == *first) {
            return None;
        }
        let mean =
            responses.iter().map(|r| r.confidence).sum::<f64>() / responses.len() as f64;
        if mean < self.voting.unanimity_min_confidence {
            return None;
        }

        let votes = responses.iter().map(|r| self.vote_for(r)).collect();
        Some(ConsensusResult {
            outcome: first.clone(),
            confidence: (mean * self.voting.unanimity_boost).min(CONFIDENCE_CEILING),
            reasoning: self.dedup_reasoning(responses),
            votes,
            method: ConsensusMethod::Unanimous,
            decided_at: Utc::now(),
        })
    }

    fn vote_for(&self, response: &AgentResponse) -> AgentVote {
        let mut weight = self.voting.base_weight(response.kind)
            + response.confidence * self.voting.confidence_weight_factor;
        if response.duration_ms < self.voting.fast_response_ms {
            weight += self.voting.fast_response_bonus;
        }
        AgentVote {
            agent_id: response.agent_id.clone(),
            outcome: response.outcome.clone(),
            weight: weight.clamp(self.voting.min_vote_weight, self.voting.max_vote_weight),
            confidence: response.confidence,
        }
    }

    fn decide_weighted(&self, responses: &[AgentResponse]) -> ConsensusResult {
        let votes: Vec<AgentVote> = responses.iter().map(|r| self.vote_for(r)).collect();

        // Group votes by outcome label, preserving first-seen order so ties
        // break deterministically.
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (i, vote) in votes.iter().enumerate() {
            match groups.iter_mut().find(|(label, _)| *label == vote.outcome) {
                Some((_, members)) => members.push(i),
                None => groups.push((vote.outcome.clone(), vec![i])),
            }
        }

        // Score per group: total weight times mean confidence.
        let scored: Vec<(usize, f64, f64)> = groups
            .iter()
            .enumerate()
            .map(|(gi, (_, members))| {
                let total_weight: f64 = members.iter().map(|&i| votes[i].weight).sum();
                let mean_confidence: f64 = members.iter().map(|&i| votes[i].confidence).sum::<f64>()
                    / members.len() as f64;
                (gi, total_weight * mean_confidence, mean_confidence)
            })
            .collect();

        let total_score: f64 = scored.iter().map(|(_, s, _)| s).sum();
        // Strictly-greater comparison keeps the first-seen group on ties.
        let mut winner: Option<(usize, f64, f64)> = None;
        for &(gi, score, mean) in &scored {
            if winner.map_or(true, |(_, best, _)| score > best) {
                winner = Some((gi, score, mean));
            }
        }
        let (winner_idx, winner_score, winner_mean) = winner.expect("at least one vote group");

        let margin = if total_score > f64::EPSILON {
            winner_score / total_score
        } else {
            0.0
        };

        let mut confidence = winner_mean;
        if margin > self.voting.margin_boost_threshold {
            confidence *= self.voting.margin_boost;
        } else if margin < self.voting.margin_penalty_threshold {
            confidence *= self.voting.margin_penalty;
        }
        confidence += (self.voting.multi_agent_bonus_step * (responses.len() - 1) as f64)
            .min(self.voting.multi_agent_bonus_cap);
        if groups.len() > 2 {
            confidence *= self.voting.fragmentation_penalty;
        }

        let winning_label = groups[winner_idx].0.clone();
        let winners: Vec<&AgentResponse> = responses
            .iter()
            .filter(|r| r.outcome == winning_label)
            .collect();
        let reasoning = self.dedup_reasoning_refs(&winners);

        debug!(
            outcome = %winning_label,
            margin,
            groups = groups.len(),
            "weighted vote resolved"
        );

        ConsensusResult {
            outcome: winning_label,
            confidence: clamp_confidence(confidence),
            reasoning,
            votes,
            method: ConsensusMethod::WeightedVoting,
            decided_at: Utc::now(),
        }
    }

    fn dedup_reasoning(&self, responses: &[AgentResponse]) -> Vec<String> {
        let refs: Vec<&AgentResponse> = responses.iter().collect();
        self.dedup_reasoning_refs(&refs)
    }

    /// Deduplicated union of the given agents' reasoning strings, capped.
    fn dedup_reasoning_refs(&self, responses: &[&AgentResponse]) -> Vec<String> {
        let mut seen = Vec::new();
        for response in responses {
            for line in &response.reasoning {
                if !seen.contains(line) {
                    seen.push(line.clone());
                    if seen.len() >= self.voting.max_reasoning_entries {
                        return seen;
                    }
                }
            }
        }
        seen
    }
}
