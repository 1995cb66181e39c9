use std::time::Duration;
use thiserror::Error;

use crate::storage::SyncKey;

/// Failures talking to a ledger node.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("RPC error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("malformed response to {method}: {reason}")]
    Decode { method: String, reason: String },
}

/// Errors surfaced by a synchronization run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("unknown ledger '{0}'")]
    UnknownLedger(String),

    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("source '{source_id}' has no address on ledger '{ledger_id}'")]
    SourceNotDeployed { ledger_id: String, source_id: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("a sync for {0} is already in progress")]
    SyncInProgress(SyncKey),

    #[error("ledger RPC failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether re-invoking the same sync may succeed. Configuration errors are
    /// fatal; RPC, storage and lease contention are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Rpc(_) | SyncError::Storage(_) | SyncError::SyncInProgress(_)
        )
    }
}

/// Errors surfaced while waiting for a submitted transaction.
#[derive(Error, Debug)]
pub enum ConfirmationError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("transaction {tx_hash} was mined but reverted")]
    Reverted { tx_hash: String },

    #[error("transaction {tx_hash} was not confirmed within {after:?}")]
    TimedOut { tx_hash: String, after: Duration },

    #[error("unknown ledger '{0}'")]
    UnknownLedger(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}
