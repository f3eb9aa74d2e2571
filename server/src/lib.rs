//! Moonrace HTTP backend.
//!
//! Wires the engine's lifecycle service and settlement job to an axum API,
//! resolves bearer tokens to user ids, and drives the periodic settlement
//! loop. All game semantics live in `moonrace-engine`; this crate is
//! transport, auth, and scheduling.

use moonrace_engine::{
    Games, LifecycleConfig, SettlementConfig, SettlementJob, SettlementReport, Store,
};
use moonrace_types::{GameError, DEFAULT_SETTLEMENT_INTERVAL_SECS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod api;
pub use api::Api;

mod auth;
pub use auth::AuthResolver;

mod metrics;
use metrics::{HttpMetrics, SettlementMetrics};

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Server tunables. Serialized verbatim by `GET /config`, so secrets never
/// live here; tokens are read from the environment at check time.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub lifecycle: LifecycleConfig,
    pub settlement: SettlementConfig,
    /// Seconds between automatic settlement passes; 0 disables the loop.
    pub settlement_interval_secs: u64,
    /// Max request body size in bytes (no limit when absent).
    pub http_body_limit_bytes: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleConfig::default(),
            settlement: SettlementConfig::default(),
            settlement_interval_secs: DEFAULT_SETTLEMENT_INTERVAL_SECS,
            http_body_limit_bytes: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        self.lifecycle.validate()?;
        self.settlement.validate()?;
        Ok(())
    }
}

pub struct Server {
    config: ServerConfig,
    store: Arc<dyn Store>,
    games: Games,
    settlement: SettlementJob,
    auth: AuthResolver,
    http_metrics: HttpMetrics,
    settlement_metrics: SettlementMetrics,
}

impl Server {
    pub fn new(
        store: Arc<dyn Store>,
        config: ServerConfig,
        auth: AuthResolver,
    ) -> Result<Self, &'static str> {
        config.validate()?;
        let games = Games::new(Arc::clone(&store), config.lifecycle.clone());
        let settlement = SettlementJob::new(Arc::clone(&store), config.settlement.clone());
        Ok(Self {
            config,
            store,
            games,
            settlement,
            auth,
            http_metrics: HttpMetrics::default(),
            settlement_metrics: SettlementMetrics::default(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn games(&self) -> &Games {
        &self.games
    }

    pub fn auth(&self) -> &AuthResolver {
        &self.auth
    }

    pub(crate) fn http_metrics(&self) -> &HttpMetrics {
        &self.http_metrics
    }

    pub(crate) fn settlement_metrics(&self) -> &SettlementMetrics {
        &self.settlement_metrics
    }

    /// Runs one settlement pass and folds the outcome into the metrics.
    pub fn run_settlement(&self, now_ms: u64) -> Result<SettlementReport, GameError> {
        match self.settlement.run(now_ms) {
            Ok(report) => {
                self.settlement_metrics.record_report(&report, now_ms);
                Ok(report)
            }
            Err(err) => {
                self.settlement_metrics.inc_failure();
                Err(err)
            }
        }
    }

    /// Drives settlement on a fixed interval until the process exits. Passes
    /// run on the blocking pool since the store is synchronous.
    pub async fn run_settlement_loop(self: Arc<Self>) {
        let interval_secs = self.config.settlement_interval_secs;
        if interval_secs == 0 {
            info!("settlement loop disabled");
            return;
        }
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs, "settlement loop started");
        loop {
            interval.tick().await;
            let server = Arc::clone(&self);
            let outcome = tokio::task::spawn_blocking(move || server.run_settlement(now_ms())).await;
            match outcome {
                Ok(Ok(_)) => {}
                // Expected until the first snapshot is ingested.
                Ok(Err(GameError::NoPriceData)) => {
                    info!("no price data yet; settlement pass skipped")
                }
                Ok(Err(err)) => warn!(error = %err, "settlement pass failed"),
                Err(err) => warn!(error = %err, "settlement task failed"),
            }
        }
    }
}
