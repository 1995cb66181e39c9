//! Planning of the block range scanned by one sync run.
//!
//! Each window ends one step past the checkpoint (bounded by the ledger head)
//! and starts two steps before its end, so every run re-scans the step before
//! the checkpoint. Logs that a node surfaces late are picked up on the next run.

use serde::Serialize;
use std::fmt;

/// An inclusive block range. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncWindow {
    pub from_block: u64,
    pub to_block: u64,
}

impl SyncWindow {
    /// Computes the next window.
    ///
    /// * `checkpoint` - last scanned height, `None` if the source was never synced.
    /// * `deployment_block` - height the source was deployed at; scanning starts here.
    /// * `step_size` - how far one run advances.
    /// * `head` - the ledger's current height.
    pub fn plan(checkpoint: Option<u64>, deployment_block: u64, step_size: u64, head: u64) -> Self {
        let base = checkpoint.unwrap_or(deployment_block);
        let to_block = base.saturating_add(step_size).min(head);
        let from_block = to_block
            .saturating_sub(step_size.saturating_mul(2))
            .max(deployment_block)
            .min(to_block);

        Self {
            from_block,
            to_block,
        }
    }

    pub fn contains(&self, height: u64) -> bool {
        (self.from_block..=self.to_block).contains(&height)
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from_block, self.to_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_starts_from_deployment_block() {
        let window = SyncWindow::plan(None, 1000, 500, 2200);
        assert_eq!(window.to_block, 1500);
        // 1500 - 2 * 500 falls before the deployment block.
        assert_eq!(window.from_block, 1000);
    }

    #[test]
    fn clamps_to_head_and_keeps_overlap() {
        let window = SyncWindow::plan(Some(1500), 0, 500, 1550);
        assert_eq!(window, SyncWindow { from_block: 550, to_block: 1550 });
    }

    #[test]
    fn full_step_when_head_is_far_ahead() {
        let window = SyncWindow::plan(Some(10_000), 0, 750, 1_000_000);
        assert_eq!(window, SyncWindow { from_block: 9_250, to_block: 10_750 });
        assert!(window.contains(10_000));
    }

    #[test]
    fn never_goes_below_zero() {
        let window = SyncWindow::plan(None, 0, 2500, 100);
        assert_eq!(window, SyncWindow { from_block: 0, to_block: 100 });
    }

    #[test]
    fn head_behind_deployment_yields_single_block() {
        let window = SyncWindow::plan(None, 5_000, 500, 4_000);
        assert_eq!(window, SyncWindow { from_block: 4_000, to_block: 4_000 });
        assert!(window.contains(4_000));
    }
}
