//! Background consolidation scheduler
//!
//! Runs [`ConsolidationPipeline`] on a fixed interval in a background tokio
//! task, using the same shutdown-coordination shape as the rest of this
//! codebase's daemons: a `watch` channel for the stop signal, an `AtomicBool`
//! for the running flag, and `tokio::select!` in the main loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{MemoryError, Result};
use crate::types::ConsolidationReport;

use super::ConsolidationEngine;

/// Daemon tuning.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Interval between consolidation runs.
    pub interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { interval_ms: 3_600_000 }
    }
}

/// Background consolidation scheduler owned by a single [`crate::engine::MemoryEngine`].
///
/// Each engine owns its own daemon instance; there is no process-wide
/// singleton scheduler, so constructing two engines never double-schedules
/// consolidation.
pub struct ConsolidationDaemon {
    engine: Arc<dyn ConsolidationEngine>,
    config: DaemonConfig,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    last_report: Arc<tokio::sync::Mutex<Option<ConsolidationReport>>>,
}

impl ConsolidationDaemon {
    /// Build a daemon that will run `engine.consolidate()` on `config`'s interval.
    #[must_use]
    pub fn new(engine: Arc<dyn ConsolidationEngine>, config: DaemonConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            engine,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            last_report: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Spawn the background task. Returns an error if already running.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidInput`] if the daemon is already running.
    pub fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MemoryError::InvalidInput("consolidation daemon already running".to_string()));
        }

        info!(interval_ms = self.config.interval_ms, "starting consolidation daemon");
        let daemon = Arc::clone(&self);
        Ok(tokio::spawn(async move { daemon.run_loop().await }))
    }

    /// Signal shutdown and wait for the current tick to finish.
    ///
    /// # Errors
    ///
    /// Returns an error only if the internal shutdown channel has been dropped,
    /// which cannot happen while `self` is alive.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown_tx
            .send(true)
            .map_err(|e| MemoryError::InvalidInput(format!("failed to signal shutdown: {e}")))?;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the daemon's background task is currently active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Most recent consolidation report, if any run has completed.
    pub async fn last_report(&self) -> Option<ConsolidationReport> {
        self.last_report.lock().await.clone()
    }

    async fn run_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.interval_ms));
        interval.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!("consolidation daemon tick");
                    match self.engine.consolidate().await {
                        Ok(report) => {
                            *self.last_report.lock().await = Some(report);
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "consolidation run failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("consolidation daemon shutting down");
                    break;
                }
            }
        }
    }
}
