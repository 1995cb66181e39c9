use anyhow::Result;
use async_trait::async_trait;
use chainlog_connector::{
    client::{ConfirmationWaiter, TransactionSubmitter},
    config::Confirmation,
    events::RawEvent,
    rpc::{LedgerRpc, LogQuery, Receipt},
    workers::LedgerClients,
    ConfirmationError, RpcError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TX: &str = "0x9f2c";

/// How the mock's mined-wait primitive behaves.
enum MinedWait {
    Never,
    Resolves(Receipt),
    Fails,
}

/// A ledger whose receipt endpoint starts answering after a number of polls.
struct ScriptedLedger {
    receipt: Option<Receipt>,
    available_after: usize,
    receipt_fails: bool,
    mined: MinedWait,
    receipt_calls: AtomicUsize,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedLedger {
    fn new(mined: MinedWait) -> Self {
        Self {
            receipt: None,
            available_after: 0,
            receipt_fails: false,
            mined,
            receipt_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn with_receipt(mut self, receipt: Receipt, available_after: usize) -> Self {
        self.receipt = Some(receipt);
        self.available_after = available_after;
        self
    }

    fn failing_receipts(mut self) -> Self {
        self.receipt_fails = true;
        self
    }

    fn receipt_calls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerRpc for ScriptedLedger {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(0)
    }

    async fn query_logs(&self, _query: &LogQuery) -> Result<Vec<RawEvent>, RpcError> {
        Ok(Vec::new())
    }

    async fn transaction_receipt(&self, _tx_hash: &str) -> Result<Option<Receipt>, RpcError> {
        let call = self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        if self.receipt_fails {
            return Err(RpcError::Node {
                code: -32603,
                message: "internal error".to_string(),
            });
        }
        if call < self.available_after {
            return Ok(None);
        }
        Ok(self.receipt.clone())
    }

    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<String, RpcError> {
        self.sent.lock().unwrap().push(raw_tx.to_vec());
        Ok(TX.to_string())
    }

    async fn wait_for_transaction(&self, _tx_hash: &str) -> Result<Receipt, RpcError> {
        match &self.mined {
            MinedWait::Never => futures::future::pending().await,
            MinedWait::Resolves(receipt) => {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(receipt.clone())
            }
            MinedWait::Fails => Err(RpcError::Decode {
                method: "eth_getTransactionReceipt".to_string(),
                reason: "missing field `status`".to_string(),
            }),
        }
    }
}

fn receipt(status: u64) -> Receipt {
    Receipt {
        tx_hash: TX.to_string(),
        block_height: Some(812),
        status: Some(status),
    }
}

fn waiter(ledger: Arc<ScriptedLedger>, timeout: Duration) -> ConfirmationWaiter {
    ConfirmationWaiter::new(ledger, Duration::from_secs(3), timeout)
}

#[tokio::test(start_paused = true)]
async fn polling_confirms_while_the_mined_wait_is_pending() -> Result<()> {
    let ledger = Arc::new(ScriptedLedger::new(MinedWait::Never).with_receipt(receipt(1), 2));

    let confirmed = waiter(ledger.clone(), Duration::from_secs(300)).wait(TX).await?;

    assert_eq!(confirmed, receipt(1));
    assert_eq!(ledger.receipt_calls(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn mined_wait_confirms_while_polling_sees_nothing() -> Result<()> {
    let ledger = Arc::new(ScriptedLedger::new(MinedWait::Resolves(receipt(1))));

    let confirmed = waiter(ledger.clone(), Duration::from_secs(300)).wait(TX).await?;

    assert_eq!(confirmed, receipt(1));
    assert!(ledger.receipt_calls() >= 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reverted_transaction_is_reported() {
    // Polling ignores the failed receipt and keeps going; the mined wait reports it.
    let ledger = Arc::new(
        ScriptedLedger::new(MinedWait::Resolves(receipt(0))).with_receipt(receipt(0), 0),
    );

    let err = waiter(ledger, Duration::from_secs(300)).wait(TX).await.unwrap_err();

    assert!(matches!(err, ConfirmationError::Reverted { ref tx_hash } if tx_hash == TX));
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_transaction_times_out() {
    let ledger = Arc::new(ScriptedLedger::new(MinedWait::Never).with_receipt(receipt(0), 0));
    let timeout = Duration::from_secs(30);

    let err = waiter(ledger.clone(), timeout).wait(TX).await.unwrap_err();

    match err {
        ConfirmationError::TimedOut { tx_hash, after } => {
            assert_eq!(tx_hash, TX);
            assert_eq!(after, timeout);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    // One poll up front, then one every three seconds until the deadline.
    assert!(ledger.receipt_calls() >= 10);
}

#[tokio::test(start_paused = true)]
async fn polling_error_fails_the_race() {
    let ledger = Arc::new(ScriptedLedger::new(MinedWait::Never).failing_receipts());

    let err = waiter(ledger, Duration::from_secs(300)).wait(TX).await.unwrap_err();

    assert!(matches!(err, ConfirmationError::Rpc(RpcError::Node { code: -32603, .. })));
}

#[tokio::test(start_paused = true)]
async fn mined_wait_error_fails_the_race() {
    let ledger = Arc::new(ScriptedLedger::new(MinedWait::Fails));

    let err = waiter(ledger, Duration::from_secs(300)).wait(TX).await.unwrap_err();

    assert!(matches!(err, ConfirmationError::Rpc(RpcError::Decode { .. })));
}

#[tokio::test(start_paused = true)]
async fn submit_and_wait_returns_the_confirmed_receipt() -> Result<()> {
    let ledger = Arc::new(ScriptedLedger::new(MinedWait::Never).with_receipt(receipt(1), 1));
    let ledgers = LedgerClients::new().with_client("base", ledger.clone());
    let submitter = TransactionSubmitter::new(Arc::new(ledgers), Confirmation::default());

    let submission = submitter.submit_and_wait("base", &[0x02, 0xf8, 0x6c]).await?;

    assert_eq!(submission.tx_hash, TX);
    assert_eq!(submission.receipt.block_height, Some(812));
    assert_eq!(*ledger.sent.lock().unwrap(), vec![vec![0x02, 0xf8, 0x6c]]);
    Ok(())
}

#[tokio::test]
async fn submit_to_unknown_ledger_is_rejected() {
    let submitter = TransactionSubmitter::new(Arc::new(LedgerClients::new()), Confirmation::default());

    let err = submitter.submit_and_wait("base", &[0x01]).await.unwrap_err();

    assert!(matches!(err, ConfirmationError::UnknownLedger(ref id) if id == "base"));
}

#[tokio::test]
async fn zero_poll_interval_is_rejected_before_broadcast() {
    let ledger = Arc::new(ScriptedLedger::new(MinedWait::Never).with_receipt(receipt(1), 0));
    let ledgers = LedgerClients::new().with_client("base", ledger.clone());
    let config = Confirmation {
        poll_interval_ms: 0,
        ..Default::default()
    };
    let submitter = TransactionSubmitter::new(Arc::new(ledgers), config);

    let err = submitter.submit_and_wait("base", &[0x01]).await.unwrap_err();

    assert!(matches!(err, ConfirmationError::Configuration(_)));
    assert!(ledger.sent.lock().unwrap().is_empty());
    assert_eq!(ledger.receipt_calls(), 0);
}
