pub mod engine;

pub use engine::{ConsensusEngine, ConsensusSession, SessionState, VotingConfig};
