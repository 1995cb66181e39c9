//! # Sync Manager & Background Workers
//!
//! This module defines the `SyncManager`, which owns the synchronization pipeline
//! and the scheduler that drives it.
//!
//! ## Core Components
//!
//! - [`SyncManager`]: The scheduler. It is consumed when its `run` method is called
//!   and periodically synchronizes every configured (ledger, source) pair.
//! - [`SyncManagerHandle`]: A clonable, thread-safe handle that provides the public API
//!   (on-demand synchronization, shutdown).
//! - **Workers**:
//!   - `CatchupWorker`: Runs one windowed sync for a single pair under a lease.
//!

mod catchup;
mod synchronizer;

pub use catchup::SyncReport;
pub use synchronizer::LedgerClients;

use crate::{
    config::ConnectorConfig,
    error::SyncError,
    lease::LeaseProvider,
    storage::{Storage, SyncKey},
    workers::{catchup::CatchupWorker, synchronizer::WorkerContext},
};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// A clonable, thread-safe handle for interacting with the `SyncManager`.
///
/// This handle is the primary public entry point for applications using the connector.
#[derive(Clone)]
pub struct SyncManagerHandle {
    worker: Arc<CatchupWorker>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SyncManagerHandle {
    /// Synchronizes events of `source_id` on `ledger_id` for one window.
    ///
    /// # Arguments
    ///
    /// * `ledger_id` - A configured ledger id.
    /// * `source_id` - A configured source id with an address on that ledger.
    /// * `step_size` - Overrides the ledger's step size for this run.
    pub async fn synchronize(
        &self,
        ledger_id: &str,
        source_id: &str,
        step_size: Option<u64>,
    ) -> Result<SyncReport, SyncError> {
        let key = SyncKey::new(ledger_id, source_id);
        self.worker.sync(&key, step_size).await
    }

    /// Signals the scheduler to stop after the current round.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// The scheduler for all configured (ledger, source) pairs.
///
/// It is created once, its [`run()`](SyncManager::run) method is spawned as a background
/// task, and the [`SyncManagerHandle`] remains as the way to interact with it.
pub struct SyncManager {
    worker: Arc<CatchupWorker>,
    config: Arc<ConnectorConfig>,
    shutdown: watch::Receiver<bool>,
}

impl SyncManager {
    /// Creates a new `SyncManager` and its associated [`SyncManagerHandle`].
    ///
    /// # Arguments
    ///
    /// * `config` - The shared connector configuration.
    /// * `ledgers` - RPC clients for the configured ledgers.
    /// * `storage` - Checkpoint and event storage.
    /// * `leases` - The per-key lease provider guarding sync runs.
    pub fn new(
        config: Arc<ConnectorConfig>,
        ledgers: Arc<LedgerClients>,
        storage: Arc<dyn Storage>,
        leases: Arc<dyn LeaseProvider>,
    ) -> (Self, SyncManagerHandle) {
        let ctx = WorkerContext::new(config.clone(), ledgers, storage, leases);
        let worker = Arc::new(CatchupWorker::new(ctx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = Self {
            worker: worker.clone(),
            config,
            shutdown: shutdown_rx,
        };
        let handle = SyncManagerHandle {
            worker,
            shutdown: Arc::new(shutdown_tx),
        };
        (runner, handle)
    }

    /// Synchronizes every configured pair once. Pairs run concurrently; each pair's
    /// pipeline is sequential. Returns the per-pair results.
    pub async fn sync_all(&self) -> Vec<(SyncKey, Result<SyncReport, SyncError>)> {
        let keys: Vec<SyncKey> = self
            .config
            .sync_pairs()
            .into_iter()
            .map(|(ledger_id, source_id)| SyncKey::new(ledger_id, source_id))
            .collect();

        let runs = keys.iter().map(|key| self.worker.sync(key, None));
        keys.iter().cloned().zip(join_all(runs).await).collect()
    }

    /// Runs the scheduler until [`SyncManagerHandle::stop()`] is called.
    pub async fn run(self) {
        let period = Duration::from_secs(self.config.synchronizer.poll_interval_secs.max(1));
        let mut shutdown = self.shutdown.clone();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Sync scheduler started, running every {:?}.", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for (key, result) in self.sync_all().await {
                        match result {
                            Ok(report) => tracing::debug!(key = %key, inserted = report.inserted, "Scheduled sync finished."),
                            Err(e @ SyncError::SyncInProgress(_)) => tracing::info!(key = %key, "Skipping: {}", e),
                            Err(e) if e.is_transient() => tracing::warn!(key = %key, "Scheduled sync failed, will retry: {}", e),
                            Err(e) => tracing::error!(key = %key, "Scheduled sync failed: {}", e),
                        }
                    }
                },
                _ = shutdown.changed() => {
                    tracing::info!("Sync scheduler: shutdown signal received, exiting.");
                    return;
                }
            }
        }
    }
}
