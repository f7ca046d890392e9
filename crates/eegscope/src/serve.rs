//! HTTP server: builds the shared state, starts the background tasks and
//! serves the routes until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use eegconf::EegscopeConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::failures::FailureLog;
use crate::index::DataIndex;
use crate::registry::{spawn_eviction_task, SessionRegistry};
use crate::session::SessionSettings;
use crate::web::{router, AppState};

/// How often session counts are logged.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub addr: String,
    pub data_root: PathBuf,
    pub idle_threshold: Duration,
    pub sweep_interval: Duration,
    pub montage: String,
    pub data_suffixes: Vec<String>,
    pub experiments: Vec<String>,
}

impl ServeConfig {
    pub fn from_config(config: &EegscopeConfig) -> Result<Self> {
        let sessions = &config.bootstrap.sessions;
        let pipeline = &config.bootstrap.pipeline;
        Ok(Self {
            addr: config.infra.bind.socket_addr(),
            data_root: config.infra.paths.data_root.clone(),
            idle_threshold: sessions.idle_threshold()?,
            sweep_interval: sessions.sweep_interval()?,
            montage: pipeline.montage.clone(),
            data_suffixes: pipeline.data_suffixes.clone(),
            experiments: pipeline.experiments.clone(),
        })
    }

    /// Registry, index and failure log for this configuration.
    pub fn build_state(&self) -> AppState {
        let failures = Arc::new(FailureLog::default());
        let settings = SessionSettings {
            montage: self.montage.clone(),
            failures: Arc::clone(&failures),
        };
        AppState {
            registry: Arc::new(SessionRegistry::new(self.idle_threshold, settings)),
            index: Arc::new(DataIndex::new(
                self.data_root.clone(),
                self.data_suffixes.clone(),
                self.experiments.clone(),
            )),
            failures,
            started_at: Instant::now(),
        }
    }
}

/// Log registry size every `interval` until cancelled.
pub fn spawn_stats_task(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = registry.stats();
                    info!(sessions = stats.total, with_data = stats.with_data, "session stats");
                }
            }
        }
    })
}

/// Run the eegscope server
pub async fn run(config: ServeConfig) -> Result<()> {
    info!(
        addr = %config.addr,
        data_root = %config.data_root.display(),
        idle_threshold_secs = config.idle_threshold.as_secs(),
        "eegscope starting"
    );
    if !config.data_root.is_dir() {
        tracing::warn!(data_root = %config.data_root.display(), "data root is not a directory");
    }

    let state = config.build_state();

    let index = Arc::clone(&state.index);
    let files = tokio::task::spawn_blocking(move || index.files().len())
        .await
        .context("Initial data scan failed")?;
    info!(files, "indexed data root");

    let cancel_token = CancellationToken::new();
    let eviction = spawn_eviction_task(
        Arc::clone(&state.registry),
        config.sweep_interval,
        cancel_token.clone(),
    );
    let stats = spawn_stats_task(
        Arc::clone(&state.registry),
        STATS_INTERVAL,
        cancel_token.clone(),
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.addr))?;

    info!("eegscope ready");
    info!("   Health: GET http://{}/health", config.addr);
    info!("   Routes: http://{}/zcc/...", config.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel_token.cancel();
    let _ = tokio::join!(eviction, stats);
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = sigterm() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_config_from_defaults() {
        let mut config = EegscopeConfig::default();
        config.infra.bind.http_port = 9100;
        config.bootstrap.sessions.idle_threshold = "90m".to_string();
        let serve = ServeConfig::from_config(&config).unwrap();
        assert!(serve.addr.ends_with(":9100"));
        assert_eq!(serve.idle_threshold, Duration::from_secs(90 * 60));
        assert_eq!(serve.sweep_interval, Duration::from_secs(600));
        assert_eq!(serve.montage, "standard_1020");

        let state = serve.build_state();
        assert!(state.registry.is_empty());
        assert_eq!(state.registry.idle_threshold(), serve.idle_threshold);
    }

    #[test]
    fn bad_duration_is_rejected() {
        let mut config = EegscopeConfig::default();
        config.bootstrap.sessions.sweep_interval = "soon".to_string();
        assert!(ServeConfig::from_config(&config).is_err());
        config.bootstrap.sessions.sweep_interval = "0s".to_string();
        assert!(ServeConfig::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn stats_task_stops_on_cancel() {
        let registry = Arc::new(SessionRegistry::new(
            Duration::from_secs(60),
            SessionSettings::default(),
        ));
        let cancel = CancellationToken::new();
        let handle = spawn_stats_task(registry, Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
