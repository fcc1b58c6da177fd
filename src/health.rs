//! Background health probe
//!
//! Periodically checks backend availability on a fixed interval, using the
//! same shutdown-coordination shape as [`crate::consolidation::ConsolidationDaemon`]:
//! a `watch` channel for the stop signal, an `AtomicBool` for the running
//! flag, and `tokio::select!` in the main loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::storage::StorageBackend;

/// Probe tuning.
#[derive(Debug, Clone)]
pub struct HealthProbeConfig {
    /// Interval between backend availability checks.
    pub interval_ms: u64,
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self { interval_ms: 60_000 }
    }
}

/// Background backend-availability probe owned by a single [`crate::engine::MemoryEngine`].
///
/// Each engine owns its own probe instance; there is no process-wide
/// singleton, matching how the consolidation scheduler is owned.
pub struct HealthProbe {
    backend: Arc<dyn StorageBackend>,
    config: HealthProbeConfig,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    last_available: Arc<AtomicBool>,
}

impl HealthProbe {
    /// Build a probe that will check `backend.is_available()` on `config`'s interval.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, config: HealthProbeConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            backend,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            last_available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Spawn the background task. Returns an error if already running.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidInput`] if the probe is already running.
    pub fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MemoryError::InvalidInput("health probe already running".to_string()));
        }

        info!(interval_ms = self.config.interval_ms, "starting health probe");
        let probe = Arc::clone(&self);
        Ok(tokio::spawn(async move { probe.run_loop().await }))
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

    /// Whether the probe's background task is currently active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Result of the most recent check. `true` until the first tick runs.
    #[must_use]
    pub fn last_available(&self) -> bool {
        self.last_available.load(Ordering::SeqCst)
    }

    async fn run_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.interval_ms));
        interval.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let available = self.backend.is_available().await;
                    self.last_available.store(available, Ordering::SeqCst);
                    if available {
                        debug!("health probe tick: backend available");
                    } else {
                        warn!("health probe tick: backend unavailable");
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("health probe shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBackend;

    #[tokio::test]
    async fn start_then_stop_is_clean() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let probe = Arc::new(HealthProbe::new(backend, HealthProbeConfig { interval_ms: 50 }));
        let handle = Arc::clone(&probe).start().unwrap();
        assert!(probe.is_running());

        probe.stop().await.unwrap();
        handle.await.unwrap();
        assert!(!probe.is_running());
    }

    #[tokio::test]
    async fn cannot_start_twice() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let probe = Arc::new(HealthProbe::new(backend, HealthProbeConfig::default()));
        let _handle = Arc::clone(&probe).start().unwrap();
        assert!(Arc::clone(&probe).start().is_err());
        probe.stop().await.unwrap();
    }

    #[tokio::test]
    async fn reports_available_before_first_tick() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let probe = HealthProbe::new(backend, HealthProbeConfig::default());
        assert!(probe.last_available());
    }
}
