pub mod arbiter;
pub mod collector;
pub mod contract;
pub mod scorer;
pub mod validator;

pub use arbiter::ConflictArbiter;
pub use collector::EvidenceCollector;
pub use contract::{AgentCore, AgentHealth, AgentMetrics, ResolutionAgent, Verdict};
pub use scorer::ConfidenceScorer;
pub use validator::EvidenceValidator;
