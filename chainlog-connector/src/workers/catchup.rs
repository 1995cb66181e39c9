use serde::Serialize;
use tokio::time::Instant;

use crate::{
    error::SyncError,
    persister::persist_batch,
    storage::{Checkpoint, SyncKey},
    window::SyncWindow,
    workers::synchronizer::WorkerContext,
};

/// Outcome of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub key: SyncKey,
    pub window: SyncWindow,
    /// Matching logs returned by the ledger for the window.
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
    /// Checkpoint stored after the run.
    pub checkpoint: u64,
    /// The run took longer than the lease TTL, so another run may have overlapped it.
    pub outlived_lease: bool,
}

/// Runs the windowed catch-up pipeline for one (ledger, source) pair:
/// head -> checkpoint -> window -> fetch -> dedup/persist -> advance checkpoint.
pub(crate) struct CatchupWorker {
    ctx: WorkerContext,
}

impl CatchupWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub async fn sync(&self, key: &SyncKey, step_size: Option<u64>) -> Result<SyncReport, SyncError> {
        let source = self.ctx.source_handle(key)?;
        let rpc = self.ctx.rpc(&key.ledger_id)?;
        let step_size = step_size.unwrap_or_else(|| self.ctx.config.step_size_for(&key.ledger_id));
        if step_size == 0 {
            return Err(SyncError::Configuration(format!(
                "step size for ledger '{}' must be positive",
                key.ledger_id
            )));
        }

        let ttl = self.ctx.config.synchronizer.lease_ttl()?;
        let _lease = self
            .ctx
            .leases
            .try_acquire(key, ttl)
            .await?
            .ok_or_else(|| SyncError::SyncInProgress(key.clone()))?;
        let started = Instant::now();

        let head = rpc.block_number().await?;
        let checkpoint = self.ctx.storage.get_checkpoint(key).await?;
        let window = SyncWindow::plan(checkpoint, source.deployment_block(), step_size, head);
        tracing::info!(
            key = %key,
            head,
            checkpoint = ?checkpoint,
            step_size,
            "Scanning window {}.",
            window
        );

        let events = source.fetch_events(rpc.as_ref(), window).await?;
        let fetched = events.len();
        let filters = source.filters().await?;
        let stats = persist_batch(self.ctx.storage.as_ref(), key, filters, events, window.from_block).await?;

        // Advance even when the window was empty so it is not scanned forever.
        let stored = self
            .ctx
            .storage
            .set_checkpoint(&Checkpoint::new(key, window.to_block))
            .await?;
        if stored != window.to_block {
            tracing::warn!(
                key = %key,
                stored,
                planned = window.to_block,
                "Kept a higher checkpoint than this window's end."
            );
        }

        let elapsed = started.elapsed();
        let outlived_lease = elapsed > ttl;
        if outlived_lease {
            tracing::warn!(
                key = %key,
                ?elapsed,
                ?ttl,
                "Run outlived its lease; raise lease-ttl-secs."
            );
        }

        tracing::info!(
            key = %key,
            fetched,
            inserted = stats.inserted,
            skipped = stats.skipped,
            checkpoint = stored,
            "Window {} synchronized.",
            window
        );

        Ok(SyncReport {
            key: key.clone(),
            window,
            fetched,
            inserted: stats.inserted,
            skipped: stats.skipped,
            checkpoint: stored,
            outlived_lease,
        })
    }
}
