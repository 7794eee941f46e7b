use thiserror::Error;

/// Main error type for the resolution engine
#[derive(Error, Debug)]
pub enum VeridictError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Agent lifecycle errors
    #[error("Agent {0} is not ready (score called before start)")]
    NotReady(String),

    #[error("Agent {agent_id} timed out after {budget_ms}ms")]
    Timeout { agent_id: String, budget_ms: u64 },

    // Data source errors (non-fatal, logged and skipped)
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    // Resolution-level errors (fatal to a single resolution attempt)
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Settlement errors
    #[error("Settlement submission failed: {0}")]
    Settlement(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl VeridictError {
    /// Agent-local failures degrade a resolution (fewer data points, fewer
    /// votes) but must never abort it.
    pub fn is_agent_local(&self) -> bool {
        matches!(
            self,
            VeridictError::NotReady(_)
                | VeridictError::Timeout { .. }
                | VeridictError::ProviderUnavailable(_)
        )
    }
}

/// Result type alias for VeridictError
pub type Result<T> = std::result::Result<T, VeridictError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_local_classification() {
        assert!(VeridictError::NotReady("validator".into()).is_agent_local());
        assert!(VeridictError::Timeout {
            agent_id: "scorer".into(),
            budget_ms: 5000
        }
        .is_agent_local());
        assert!(VeridictError::ProviderUnavailable("coindata".into()).is_agent_local());
        assert!(!VeridictError::InsufficientData("no votes".into()).is_agent_local());
        assert!(!VeridictError::InvalidSubject("unknown".into()).is_agent_local());
    }
}
