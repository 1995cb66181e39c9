#![allow(dead_code)]

use async_trait::async_trait;
use chainlog_connector::{
    config::{ConnectorConfig, LedgerConfig, SourceConfig},
    events::{EventKey, EventRecord, RawEvent, Topic},
    rpc::{LedgerRpc, LogQuery, Receipt},
    storage::{Checkpoint, CheckpointStore, EventStore, MemoryStorage, SyncKey, UpsertOutcome},
    RpcError,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const LEDGER: &str = "base";
pub const SOURCE: &str = "token";
pub const ADDRESS: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
pub const TRANSFER: &str = "Transfer(address,address,uint256)";

pub fn transfer_topic() -> Topic {
    Topic::from_signature(TRANSFER)
}

/// A configuration with one ledger and one source deployed at `deployment_block`.
pub fn config(deployment_block: u64, step_size: u64) -> ConnectorConfig {
    let mut config = ConnectorConfig::default();
    config.ledgers.insert(
        LEDGER.to_string(),
        LedgerConfig {
            rpc_url: "http://ledger.invalid".to_string(),
            step_size: Some(step_size),
        },
    );

    let mut source = SourceConfig {
        deployment_block,
        ..Default::default()
    };
    source.addresses.insert(LEDGER.to_string(), ADDRESS.to_string());
    source.events.insert("Transfer".to_string(), TRANSFER.to_string());
    config.sources.insert(SOURCE.to_string(), source);
    config
}

pub fn transfer(block_height: u64, log_index: u64) -> RawEvent {
    RawEvent {
        block_height,
        log_index,
        tx_hash: format!("0x{block_height:08x}{log_index:04x}"),
        topics: vec![transfer_topic(), Topic([0xaa; 32])],
        args: vec![Topic([0xaa; 32]).to_string(), "0x01".to_string()],
    }
}

/// An in-memory ledger serving logs of a single address.
#[derive(Default)]
pub struct MockLedger {
    head: AtomicU64,
    logs: Mutex<Vec<RawEvent>>,
    /// Logs the node temporarily fails to return.
    hidden: Mutex<HashSet<EventKey>>,
    queries: Mutex<Vec<LogQuery>>,
    fail_queries: AtomicBool,
    query_delay: Mutex<Duration>,
}

impl MockLedger {
    pub fn with_head(head: u64) -> Self {
        let ledger = Self::default();
        ledger.set_head(head);
        ledger
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn push_log(&self, event: RawEvent) {
        self.logs.lock().unwrap().push(event);
    }

    pub fn hide(&self, block_height: u64, log_index: u64) {
        self.hidden.lock().unwrap().insert(EventKey { block_height, log_index });
    }

    pub fn unhide_all(&self) {
        self.hidden.lock().unwrap().clear();
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Makes every log query take `delay` before answering.
    pub fn slow_queries(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = delay;
    }

    pub fn queries(&self) -> Vec<LogQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<RawEvent>, RpcError> {
        self.queries.lock().unwrap().push(query.clone());
        let delay = *self.query_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(RpcError::Node {
                code: -32000,
                message: "query timeout".to_string(),
            });
        }
        if query.address != ADDRESS {
            return Ok(Vec::new());
        }

        let hidden = self.hidden.lock().unwrap().clone();
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| (query.from_block..=query.to_block).contains(&log.block_height))
            .filter(|log| log.topics.first().is_some_and(|t| query.topics.contains(t)))
            .filter(|log| !hidden.contains(&log.key()))
            .cloned()
            .collect())
    }

    async fn transaction_receipt(&self, _tx_hash: &str) -> Result<Option<Receipt>, RpcError> {
        Ok(None)
    }

    async fn send_raw_transaction(&self, _raw_tx: &[u8]) -> Result<String, RpcError> {
        unimplemented!("sync tests do not submit transactions")
    }

    async fn wait_for_transaction(&self, _tx_hash: &str) -> Result<Receipt, RpcError> {
        unimplemented!("sync tests do not submit transactions")
    }
}

/// A storage wrapper whose event writes fail for one chosen key.
#[derive(Default)]
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    fail_on: Mutex<HashMap<EventKey, ()>>,
}

impl FlakyStorage {
    pub fn fail_on(&self, block_height: u64, log_index: u64) {
        self.fail_on
            .lock()
            .unwrap()
            .insert(EventKey { block_height, log_index }, ());
    }

    pub fn heal(&self) {
        self.fail_on.lock().unwrap().clear();
    }
}

#[async_trait]
impl CheckpointStore for FlakyStorage {
    async fn get_checkpoint(&self, key: &SyncKey) -> anyhow::Result<Option<u64>> {
        self.inner.get_checkpoint(key).await
    }

    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<u64> {
        self.inner.set_checkpoint(checkpoint).await
    }

    async fn checkpoint_history(&self, key: &SyncKey) -> anyhow::Result<Vec<Checkpoint>> {
        self.inner.checkpoint_history(key).await
    }
}

#[async_trait]
impl EventStore for FlakyStorage {
    async fn stored_keys(&self, key: &SyncKey, since_block: u64) -> anyhow::Result<HashSet<EventKey>> {
        self.inner.stored_keys(key, since_block).await
    }

    async fn upsert_event(&self, record: &EventRecord) -> anyhow::Result<UpsertOutcome> {
        if self.fail_on.lock().unwrap().contains_key(&record.key()) {
            anyhow::bail!("connection reset while writing {:?}", record.key());
        }
        self.inner.upsert_event(record).await
    }

    async fn events(&self, key: &SyncKey, from_block: u64, to_block: u64) -> anyhow::Result<Vec<EventRecord>> {
        self.inner.events(key, from_block, to_block).await
    }
}
