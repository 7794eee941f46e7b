use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::consensus::VotingConfig;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agents: AgentConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub voting: VotingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agents: AgentConfig::default(),
            resolution: ResolutionConfig::default(),
            providers: ProviderConfig::default(),
            settlement: SettlementConfig::default(),
            voting: VotingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Per-agent execution contract knobs
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Score budget shared by all agents (ms)
    #[serde(default = "default_score_timeout_ms")]
    pub score_timeout_ms: u64,
    /// An agent is stale if its last success is older than this (seconds)
    #[serde(default = "default_staleness_window_secs")]
    pub staleness_window_secs: u64,
    /// Lifetime error rate above which an agent reports unhealthy
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
}

fn default_score_timeout_ms() -> u64 {
    10_000
}

fn default_staleness_window_secs() -> u64 {
    300 // 5 minutes
}

fn default_max_error_rate() -> f64 {
    0.5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            score_timeout_ms: default_score_timeout_ms(),
            staleness_window_secs: default_staleness_window_secs(),
            max_error_rate: default_max_error_rate(),
        }
    }
}

/// Resolution pipeline knobs
#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionConfig {
    /// Overall budget for one resolution attempt (ms); past this the
    /// consensus engine forces a decision from partial responses
    #[serde(default = "default_max_resolution_time_ms")]
    pub max_resolution_time_ms: u64,
    /// How long after the deadline a dispute may still be raised (seconds)
    #[serde(default = "default_dispute_window_secs")]
    pub dispute_window_secs: u64,
    /// Evidence cap per resolution attempt
    #[serde(default = "default_max_evidence_points")]
    pub max_evidence_points: usize,
}

fn default_max_resolution_time_ms() -> u64 {
    30_000
}

fn default_dispute_window_secs() -> u64 {
    86_400 // 24 hours
}

fn default_max_evidence_points() -> usize {
    50
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            max_resolution_time_ms: default_max_resolution_time_ms(),
            dispute_window_secs: default_dispute_window_secs(),
            max_evidence_points: default_max_evidence_points(),
        }
    }
}

/// External data provider knobs
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Liveness poll interval (seconds)
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Per-provider fetch/ping timeout (ms)
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// HTTP provider endpoints to register at startup
    #[serde(default)]
    pub endpoints: Vec<ProviderEndpoint>,
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_fetch_timeout_ms() -> u64 {
    5_000
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval_secs(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            endpoints: Vec::new(),
        }
    }
}

/// One configured HTTP data provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoint {
    pub name: String,
    pub base_url: String,
    /// Keyword rules that route subjects to this provider
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Reliability attributed to records from this provider
    #[serde(default = "default_provider_reliability")]
    pub reliability: f64,
}

fn default_provider_reliability() -> f64 {
    0.8
}

/// Settlement collaborator knobs
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// Base URL of the ledger/chain client API
    #[serde(default = "default_settlement_url")]
    pub base_url: String,
    /// Request timeout (ms)
    #[serde(default = "default_settlement_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_settlement_url() -> String {
    "http://localhost:9400".to_string()
}

fn default_settlement_timeout_ms() -> u64 {
    10_000
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            base_url: default_settlement_url(),
            request_timeout_ms: default_settlement_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("VERIDICT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (VERIDICT_AGENTS__SCORE_TIMEOUT_MS, etc.)
            .add_source(
                Environment::with_prefix("VERIDICT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.agents.score_timeout_ms == 0 {
            errors.push("agents.score_timeout_ms must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.agents.max_error_rate) {
            errors.push("agents.max_error_rate must be between 0 and 1".to_string());
        }

        if self.resolution.max_resolution_time_ms <= self.agents.score_timeout_ms {
            errors.push(
                "resolution.max_resolution_time_ms should exceed agents.score_timeout_ms"
                    .to_string(),
            );
        }

        if self.resolution.max_evidence_points == 0 {
            errors.push("resolution.max_evidence_points must be positive".to_string());
        }

        if self.providers.health_check_interval_secs == 0 {
            errors.push("providers.health_check_interval_secs must be positive".to_string());
        }

        for endpoint in &self.providers.endpoints {
            if url::Url::parse(&endpoint.base_url).is_err() {
                errors.push(format!(
                    "providers.endpoints: invalid base_url for {}",
                    endpoint.name
                ));
            }
        }

        if let Err(e) = self.voting.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agents.score_timeout_ms, 10_000);
        assert_eq!(config.agents.staleness_window_secs, 300);
        assert_eq!(config.resolution.max_evidence_points, 50);
    }

    #[test]
    fn test_validate_rejects_inverted_budgets() {
        let mut config = AppConfig::default();
        config.resolution.max_resolution_time_ms = 1_000;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max_resolution_time_ms")));
    }

    #[test]
    fn test_validate_rejects_bad_endpoint_url() {
        let mut config = AppConfig::default();
        config.providers.endpoints.push(ProviderEndpoint {
            name: "broken".to_string(),
            base_url: "not a url".to_string(),
            keywords: vec![],
            reliability: 0.8,
        });
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("broken")));
    }
}
