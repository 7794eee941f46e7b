//! Agent responses, votes, consensus results and the terminal resolution
//! outcome handed to the settlement layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::evidence::EvidenceRecord;

/// Lower clamp bound for agent and consensus confidences.
pub const CONFIDENCE_FLOOR: f64 = 0.10;
/// Upper clamp bound for agent and consensus confidences.
pub const CONFIDENCE_CEILING: f64 = 0.95;

/// Clamp a confidence into the working range. The explicit zero-confidence
/// "no valid data" paths bypass this and report exactly 0.
pub fn clamp_confidence(value: f64) -> f64 {
    value.clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING)
}

/// Conventional outcome labels. Outcomes stay free-form strings at the
/// boundary; these are the labels the built-in agents produce.
pub mod labels {
    pub const YES: &str = "YES";
    pub const NO: &str = "NO";
    pub const UNCERTAIN: &str = "UNCERTAIN";
    pub const NO_DATA: &str = "NO_DATA";
    pub const REQUIRES_VALIDATION: &str = "REQUIRES_VALIDATION";
    pub const INSUFFICIENT_VALID_DATA: &str = "INSUFFICIENT_VALID_DATA";
}

/// The four scoring strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    Collector,
    Validator,
    Arbiter,
    Scorer,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Collector => "collector",
            AgentKind::Validator => "validator",
            AgentKind::Arbiter => "arbiter",
            AgentKind::Scorer => "scorer",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One agent's opinion for one resolution attempt. Created once, immutable
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_id: String,
    pub kind: AgentKind,
    /// Proposed outcome label, produced by this agent's own scoring logic
    pub outcome: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Ordered human-readable reasoning
    pub reasoning: Vec<String>,
    /// The evidence slice this agent based its opinion on
    pub evidence: Vec<EvidenceRecord>,
    pub created_at: DateTime<Utc>,
    /// Wall-clock processing duration
    pub duration_ms: u64,
}

/// Projection of an agent response used inside the consensus engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentVote {
    pub agent_id: String,
    pub outcome: String,
    pub weight: f64,
    pub confidence: f64,
}

/// How a consensus decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMethod {
    SingleAgent,
    Unanimous,
    WeightedVoting,
}

impl ConsensusMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusMethod::SingleAgent => "single_agent",
            ConsensusMethod::Unanimous => "unanimous",
            ConsensusMethod::WeightedVoting => "weighted_voting",
        }
    }
}

impl fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregated decision across all agent responses for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Winning outcome label; always one of the labels present in `votes`
    pub outcome: String,
    /// Aggregate confidence in [0, 1]
    pub confidence: f64,
    /// Deduplicated reasoning strings from the winning agents, capped
    pub reasoning: Vec<String>,
    /// The full vote list
    pub votes: Vec<AgentVote>,
    pub method: ConsensusMethod,
    pub decided_at: DateTime<Utc>,
}

/// Final, settlement-bound record of a resolution attempt, success or
/// failure. Callers branch on `resolved`, never on error type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub attempt_id: Uuid,
    pub subject_id: String,
    pub outcome: String,
    pub confidence: f64,
    /// Reasoning/evidence strings supporting the decision
    pub evidence: Vec<String>,
    /// Agent responses that contributed to the decision
    pub agent_responses: Vec<AgentResponse>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_ref: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ResolutionOutcome {
    /// Terminal failure outcome. Same shape as a success, distinguishable
    /// only by the `resolved` flag and `error` field.
    pub fn failed(subject_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            outcome: labels::UNCERTAIN.to_string(),
            confidence: 0.0,
            evidence: Vec::new(),
            agent_responses: Vec::new(),
            resolved: false,
            error: Some(error.into()),
            settlement_ref: None,
            completed_at: Utc::now(),
        }
    }
}

/// Decision produced by the manual-override dispute path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeDecision {
    pub subject_id: String,
    pub outcome: String,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub decided_at: DateTime<Utc>,
}
