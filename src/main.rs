use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use veridict::adapters::{
    DataProvider, HttpDataProvider, HttpSettlementClient, InMemorySettlementClient,
    SettlementClient, SimulatedMarketDataProvider, SimulatedNewsProvider,
};
use veridict::config::AppConfig;
use veridict::domain::{Subject, SubjectStatus};
use veridict::error::Result;
use veridict::services::ResolutionOrchestrator;

#[derive(Parser)]
#[command(name = "veridict", about = "Multi-agent resolution engine for prediction markets")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config", global = true)]
    config_dir: String,

    /// Write logs to daily-rotated files in this directory
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one subject through the full agent pipeline
    Resolve {
        /// Subject (market) identifier
        #[arg(long)]
        subject_id: String,
        /// Run against simulated providers and an in-memory settlement layer
        #[arg(long)]
        simulate: bool,
        /// Question text for the simulated subject
        #[arg(long, default_value = "Will the BTC price rise above $100k?")]
        question: String,
        /// Category for the simulated subject
        #[arg(long, default_value = "crypto")]
        category: String,
    },
    /// Resolve a dispute through the manual-override path
    Dispute {
        #[arg(long)]
        subject_id: String,
        /// Free-text evidence submissions
        #[arg(long, required = true)]
        evidence: Vec<String>,
    },
    /// Print engine, agent and provider status
    Status {
        #[arg(long)]
        simulate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)?;
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("config error: {error}");
        }
        return Err(veridict::VeridictError::Internal(
            "invalid configuration".to_string(),
        ));
    }

    let _log_guard = init_logging(&config, cli.log_dir.as_deref());

    match cli.command {
        Commands::Resolve {
            subject_id,
            simulate,
            question,
            category,
        } => {
            let orchestrator = if simulate {
                build_simulated(&config, &subject_id, &question, &category).await?
            } else {
                build_live(&config)?
            };
            orchestrator.start().await?;

            let outcome = orchestrator.resolve(&subject_id).await;
            if outcome.resolved {
                println!(
                    "resolved {} -> {} (confidence {:.2}, settlement {})",
                    outcome.subject_id,
                    outcome.outcome,
                    outcome.confidence,
                    outcome.settlement_ref.as_deref().unwrap_or("-")
                );
                for line in &outcome.evidence {
                    println!("  - {line}");
                }
            } else {
                println!(
                    "resolution failed for {}: {}",
                    outcome.subject_id,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }

            orchestrator.shutdown().await;
        }
        Commands::Dispute {
            subject_id,
            evidence,
        } => {
            let orchestrator = build_live(&config)?;
            orchestrator.start().await?;
            match orchestrator.resolve_dispute(&subject_id, evidence).await {
                Ok(decision) => println!(
                    "dispute resolved: {} -> {} (confidence {:.2})",
                    subject_id, decision.outcome, decision.confidence
                ),
                Err(e) => println!("dispute resolution failed: {e}"),
            }
            orchestrator.shutdown().await;
        }
        Commands::Status { simulate } => {
            let orchestrator = if simulate {
                build_simulated(&config, "status-probe", "status probe", "misc").await?
            } else {
                build_live(&config)?
            };
            orchestrator.start().await?;
            println!("{}", orchestrator.status_summary().await);
            orchestrator.shutdown().await;
        }
    }

    Ok(())
}

/// Orchestrator wired to the configured HTTP providers and settlement API.
fn build_live(config: &AppConfig) -> Result<ResolutionOrchestrator> {
    let timeout = std::time::Duration::from_millis(config.providers.fetch_timeout_ms);
    let mut providers: Vec<Arc<dyn DataProvider>> = Vec::new();
    for endpoint in &config.providers.endpoints {
        providers.push(Arc::new(HttpDataProvider::new(endpoint, timeout)?));
    }
    if providers.is_empty() {
        warn!("no provider endpoints configured; resolutions will see no evidence");
    }

    let settlement: Arc<dyn SettlementClient> =
        Arc::new(HttpSettlementClient::new(&config.settlement)?);
    Ok(ResolutionOrchestrator::new(config, providers, settlement))
}

/// Orchestrator wired to deterministic simulators, with the target subject
/// pre-seeded into an in-memory settlement layer.
async fn build_simulated(
    config: &AppConfig,
    subject_id: &str,
    question: &str,
    category: &str,
) -> Result<ResolutionOrchestrator> {
    let settlement = Arc::new(InMemorySettlementClient::new());
    settlement
        .insert_subject(Subject {
            id: subject_id.to_string(),
            question: question.to_string(),
            category: category.to_string(),
            deadline: Utc::now() + ChronoDuration::hours(1),
            created_at: Utc::now() - ChronoDuration::days(2),
            status: SubjectStatus::Open,
        })
        .await;

    let providers: Vec<Arc<dyn DataProvider>> = vec![
        Arc::new(SimulatedMarketDataProvider::new("sim-market", 98_000.0, 450.0)),
        Arc::new(SimulatedMarketDataProvider::new("sim-exchange", 98_100.0, 430.0)),
        Arc::new(SimulatedNewsProvider::new(
            "sim-news",
            vec![
                "Analysts confirm rally momentum".to_string(),
                "Fund inflows rise for a third week".to_string(),
            ],
        )),
    ];

    info!(subject = subject_id, "running against simulated collaborators");
    Ok(ResolutionOrchestrator::new(config, providers, settlement))
}

fn init_logging(
    config: &AppConfig,
    log_dir: Option<&str>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "veridict.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            if config.logging.json {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .json()
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .init();
            }
            Some(guard)
        }
        None => {
            if config.logging.json {
                tracing_subscriber::fmt().with_env_filter(filter).json().init();
            } else {
                tracing_subscriber::fmt().with_env_filter(filter).init();
            }
            None
        }
    }
}
