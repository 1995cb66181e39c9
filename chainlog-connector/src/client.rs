//! # Transaction Submission
//!
//! This module provides the [`TransactionSubmitter`], which broadcasts signed
//! transactions to a ledger, and the [`ConfirmationWaiter`] it uses to wait for
//! their receipts.
//!
//! ## Confirmation race
//!
//! Two independent signals are raced:
//!
//! - a fixed-interval poll of the receipt endpoint, which confirms as soon as a
//!   successful receipt with a block height appears;
//! - the ledger client's own mined-wait primitive
//!   ([`LedgerRpc::wait_for_transaction`]).
//!
//! The first to resolve wins and the other is dropped at its next suspension
//! point. Both are read-only, so abandoning one cannot affect the outcome. An
//! RPC error from either side fails the race, and the race as a whole is bounded
//! by a deadline.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Confirmation;
use crate::error::ConfirmationError;
use crate::rpc::{LedgerRpc, Receipt};
use crate::workers::LedgerClients;

/// A broadcast transaction and its confirmed receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub tx_hash: String,
    pub receipt: Receipt,
}

/// Waits for submitted transactions to be confirmed on one ledger.
#[derive(Clone)]
pub struct ConfirmationWaiter {
    rpc: Arc<dyn LedgerRpc>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ConfirmationWaiter {
    pub fn new(rpc: Arc<dyn LedgerRpc>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            rpc,
            poll_interval,
            timeout,
        }
    }

    pub fn from_config(rpc: Arc<dyn LedgerRpc>, config: &Confirmation) -> Result<Self, ConfirmationError> {
        Ok(Self::new(
            rpc,
            config.poll_interval()?,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    /// Returns the first successful receipt produced by either confirmation signal.
    pub async fn wait(&self, tx_hash: &str) -> Result<Receipt, ConfirmationError> {
        let race = async {
            tokio::select! {
                receipt = self.poll_receipt(tx_hash) => receipt,
                receipt = self.wait_mined(tx_hash) => receipt,
            }
        };

        match tokio::time::timeout(self.timeout, race).await {
            Ok(Ok(receipt)) => {
                tracing::info!(
                    tx_hash,
                    block = ?receipt.block_height,
                    "Transaction confirmed."
                );
                Ok(receipt)
            }
            Ok(Err(e)) => {
                tracing::error!(tx_hash, "Transaction failed: {}", e);
                Err(e)
            }
            Err(_) => {
                tracing::error!(tx_hash, "Transaction not confirmed within {:?}.", self.timeout);
                Err(ConfirmationError::TimedOut {
                    tx_hash: tx_hash.to_string(),
                    after: self.timeout,
                })
            }
        }
    }

    async fn poll_receipt(&self, tx_hash: &str) -> Result<Receipt, ConfirmationError> {
        loop {
            if let Some(receipt) = self.rpc.transaction_receipt(tx_hash).await? {
                if receipt.is_success() {
                    tracing::debug!(tx_hash, "Receipt found by polling.");
                    return Ok(receipt);
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_mined(&self, tx_hash: &str) -> Result<Receipt, ConfirmationError> {
        let receipt = self.rpc.wait_for_transaction(tx_hash).await?;
        if receipt.status == Some(0) {
            return Err(ConfirmationError::Reverted {
                tx_hash: tx_hash.to_string(),
            });
        }
        tracing::debug!(tx_hash, "Receipt reported by the mined-wait primitive.");
        Ok(receipt)
    }
}

/// Broadcasts signed transactions and waits for their confirmation.
#[derive(Clone)]
pub struct TransactionSubmitter {
    ledgers: Arc<LedgerClients>,
    config: Confirmation,
}

impl TransactionSubmitter {
    pub fn new(ledgers: Arc<LedgerClients>, config: Confirmation) -> Self {
        Self { ledgers, config }
    }

    /// Returns a waiter bound to `ledger_id`.
    pub fn waiter(&self, ledger_id: &str) -> Result<ConfirmationWaiter, ConfirmationError> {
        let rpc = self
            .ledgers
            .get(ledger_id)
            .ok_or_else(|| ConfirmationError::UnknownLedger(ledger_id.to_string()))?;
        ConfirmationWaiter::from_config(rpc, &self.config)
    }

    /// Submits a signed raw transaction to `ledger_id` and waits until it is confirmed.
    pub async fn submit_and_wait(
        &self,
        ledger_id: &str,
        raw_tx: &[u8],
    ) -> Result<Submission, ConfirmationError> {
        let waiter = self.waiter(ledger_id)?;
        let tx_hash = waiter.rpc.send_raw_transaction(raw_tx).await?;
        tracing::info!(ledger = ledger_id, tx_hash = %tx_hash, "Transaction submitted.");

        let receipt = waiter.wait(&tx_hash).await?;
        Ok(Submission { tx_hash, receipt })
    }
}
