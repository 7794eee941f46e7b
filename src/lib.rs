pub mod adapters;
pub mod agents;
pub mod config;
pub mod consensus;
pub mod domain;
pub mod error;
pub mod services;

pub use adapters::{
    DataProvider, HttpDataProvider, HttpSettlementClient, InMemorySettlementClient,
    SettlementClient, SimulatedMarketDataProvider, SimulatedNewsProvider,
};
pub use agents::{
    AgentHealth, ConfidenceScorer, ConflictArbiter, EvidenceCollector, EvidenceValidator,
    ResolutionAgent,
};
pub use config::AppConfig;
pub use consensus::{ConsensusEngine, SessionState, VotingConfig};
pub use domain::{
    AgentKind, AgentResponse, AgentVote, ConsensusMethod, ConsensusResult, DisputeDecision,
    EvidenceRecord, EvidenceValue, ResolutionOutcome, Subject, SubjectStatus,
};
pub use error::{Result, VeridictError};
pub use services::{
    Notifier, ResolutionEvent, ResolutionOrchestrator, ResolutionPhase, ResolverStats,
};
