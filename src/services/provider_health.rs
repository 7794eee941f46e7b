//! Periodic liveness polling of data providers.
//!
//! A single ticker task owned by the process lifecycle writes provider
//! health; the evidence collector's source selection reads it as an
//! eventually-consistent snapshot.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::adapters::DataProvider;

/// Health snapshot for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for ProviderStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            last_check: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Shared provider health state. Written only by the health ticker, read by
/// source selection.
#[derive(Default)]
pub struct ProviderHealthBoard {
    inner: RwLock<HashMap<String, ProviderStatus>>,
}

impl ProviderHealthBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Providers not yet checked count as healthy.
    pub async fn is_healthy(&self, name: &str) -> bool {
        self.inner
            .read()
            .await
            .get(name)
            .map(|s| s.healthy)
            .unwrap_or(true)
    }

    pub async fn record_success(&self, name: &str) {
        let mut inner = self.inner.write().await;
        let status = inner.entry(name.to_string()).or_default();
        if !status.healthy {
            info!(provider = name, "provider recovered");
        }
        status.healthy = true;
        status.consecutive_failures = 0;
        status.last_error = None;
        status.last_check = Some(Utc::now());
    }

    pub async fn record_failure(&self, name: &str, error: &str) {
        let mut inner = self.inner.write().await;
        let status = inner.entry(name.to_string()).or_default();
        if status.healthy {
            warn!(provider = name, error, "provider marked unhealthy");
        }
        status.healthy = false;
        status.consecutive_failures += 1;
        status.last_error = Some(error.to_string());
        status.last_check = Some(Utc::now());
    }

    pub async fn snapshot(&self) -> HashMap<String, ProviderStatus> {
        self.inner.read().await.clone()
    }
}

/// Ticker task pinging every provider on a fixed interval.
pub struct ProviderHealthMonitor {
    providers: Vec<Arc<dyn DataProvider>>,
    board: Arc<ProviderHealthBoard>,
    check_interval: Duration,
}

impl ProviderHealthMonitor {
    pub fn new(
        providers: Vec<Arc<dyn DataProvider>>,
        board: Arc<ProviderHealthBoard>,
        check_interval: Duration,
    ) -> Self {
        Self {
            providers,
            board,
            check_interval,
        }
    }

    /// Run one round of liveness probes, concurrently.
    pub async fn check_all(&self) {
        let checks = self.providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            let board = Arc::clone(&self.board);
            async move {
                match provider.ping().await {
                    Ok(()) => board.record_success(provider.name()).await,
                    Err(e) => board.record_failure(provider.name(), &e.to_string()).await,
                }
            }
        });
        join_all(checks).await;
        debug!(providers = self.providers.len(), "provider health sweep complete");
    }

    /// Spawn the ticker; it stops when the shutdown channel fires or closes.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.check_interval);
            info!(
                interval_secs = self.check_interval.as_secs(),
                providers = self.providers.len(),
                "provider health monitor started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check_all().await;
                    }
                    _ = shutdown.recv() => {
                        info!("provider health monitor stopping");
                        break;
                    }
                }
            }
        })
    }
}
