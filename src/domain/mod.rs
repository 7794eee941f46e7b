pub mod evidence;
pub mod outcome;
pub mod subject;

pub use evidence::{EvidenceRecord, EvidenceValue};
pub use outcome::{
    clamp_confidence, labels, AgentKind, AgentResponse, AgentVote, ConsensusMethod,
    ConsensusResult, DisputeDecision, ResolutionOutcome, CONFIDENCE_CEILING, CONFIDENCE_FLOOR,
};
pub use subject::{Subject, SubjectStatus};
