//! Provides concrete `sled`-based implementations for the storage and lease
//! traits defined in the `chainlog-connector` library.
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chainlog_connector::{
    events::{EventKey, EventRecord},
    lease::{Lease, LeaseProvider},
    storage::{Checkpoint, CheckpointStore, EventStore, SyncKey, UpsertOutcome},
};

use crate::error::GatewayError;

const CHECKPOINTS: &str = "checkpoints";
const CHECKPOINT_HISTORY: &str = "checkpoint_history";
const EVENTS: &str = "events";
const LEASES: &str = "leases";

/// A `sled`-backed implementation of the connector's storage and lease traits.
///
/// Every tree is keyed by the scope prefix `ledger \0 source \0`. Event keys
/// append the big-endian block height and log index so a range scan over one
/// scope yields records in ledger order.
///
/// sled locks the database directory on open, so lease rows only arbitrate
/// between managers that share this handle inside one process.
#[derive(Clone)]
pub struct SledStorage {
    db: Db,
    checkpoints: Tree,
    history: Tree,
    events: Tree,
    leases: Tree,
}

/// A lease row. The token identifies the holder so only it can release the row.
#[derive(Debug, Serialize, Deserialize)]
struct LeaseRow {
    token: u64,
    expires_at_ms: i64,
}

impl SledStorage {
    /// Creates a new instance of `SledStorage` on top of an open database.
    pub fn new(db: Db) -> Result<Self> {
        Ok(Self {
            checkpoints: db.open_tree(CHECKPOINTS)?,
            history: db.open_tree(CHECKPOINT_HISTORY)?,
            events: db.open_tree(EVENTS)?,
            leases: db.open_tree(LEASES)?,
            db,
        })
    }

    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(sled::open(path)?)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, GatewayError> {
    Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, GatewayError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

fn scope_prefix(key: &SyncKey) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(key.ledger_id.len() + key.source_id.len() + 2);
    prefix.extend_from_slice(key.ledger_id.as_bytes());
    prefix.push(0);
    prefix.extend_from_slice(key.source_id.as_bytes());
    prefix.push(0);
    prefix
}

fn event_key(scope: &SyncKey, block_height: u64, log_index: u64) -> Vec<u8> {
    let mut key = scope_prefix(scope);
    key.extend_from_slice(&block_height.to_be_bytes());
    key.extend_from_slice(&log_index.to_be_bytes());
    key
}

fn parse_event_key(key: &[u8]) -> Option<EventKey> {
    let tail = key.len().checked_sub(16).map(|start| &key[start..])?;
    let (block, index) = tail.split_at(8);
    Some(EventKey {
        block_height: u64::from_be_bytes(block.try_into().ok()?),
        log_index: u64::from_be_bytes(index.try_into().ok()?),
    })
}

#[async_trait]
impl CheckpointStore for SledStorage {
    async fn get_checkpoint(&self, key: &SyncKey) -> Result<Option<u64>> {
        match self.checkpoints.get(scope_prefix(key))? {
            Some(bytes) => Ok(Some(decode::<Checkpoint>(&bytes)?.block_height)),
            None => Ok(None),
        }
    }

    /// Stores `max(stored, checkpoint)` atomically and appends the request to
    /// the history tree, then flushes.
    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> Result<u64> {
        let scope = scope_prefix(&checkpoint.key());
        let encoded = encode(checkpoint)?;

        let previous = self.checkpoints.fetch_and_update(&scope, |old| {
            let keep_old = old
                .and_then(|bytes| decode::<Checkpoint>(bytes).ok())
                .is_some_and(|stored| stored.block_height > checkpoint.block_height);
            match old {
                Some(bytes) if keep_old => Some(bytes.to_vec()),
                _ => Some(encoded.clone()),
            }
        })?;
        let stored = match previous {
            Some(bytes) => decode::<Checkpoint>(&bytes)?.block_height.max(checkpoint.block_height),
            None => checkpoint.block_height,
        };

        let mut history_key = scope;
        history_key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        self.history.insert(history_key, encoded)?;

        self.db.flush_async().await?;
        Ok(stored)
    }

    async fn checkpoint_history(&self, key: &SyncKey) -> Result<Vec<Checkpoint>> {
        self.history
            .scan_prefix(scope_prefix(key))
            .values()
            .map(|value| Ok(decode(&value?)?))
            .collect()
    }
}

#[async_trait]
impl EventStore for SledStorage {
    async fn stored_keys(&self, key: &SyncKey, since_block: u64) -> Result<HashSet<EventKey>> {
        let range = event_key(key, since_block, 0)..=event_key(key, u64::MAX, u64::MAX);
        let mut keys = HashSet::new();
        for entry in self.events.range(range).keys() {
            let raw = entry?;
            let parsed = parse_event_key(&raw)
                .ok_or_else(|| anyhow::anyhow!("Malformed event key of length {}", raw.len()))?;
            keys.insert(parsed);
        }
        Ok(keys)
    }

    /// Inserts only when the key is absent. Records become durable with the
    /// next checkpoint flush.
    async fn upsert_event(&self, record: &EventRecord) -> Result<UpsertOutcome> {
        let scope = SyncKey::new(&record.ledger_id, &record.source_id);
        let key = event_key(&scope, record.block_height, record.log_index);
        let swapped = self
            .events
            .compare_and_swap(key, None as Option<&[u8]>, Some(encode(record)?))?;
        Ok(match swapped {
            Ok(()) => UpsertOutcome::Inserted,
            Err(_) => UpsertOutcome::AlreadyPresent,
        })
    }

    async fn events(&self, key: &SyncKey, from_block: u64, to_block: u64) -> Result<Vec<EventRecord>> {
        if from_block > to_block {
            return Ok(Vec::new());
        }
        let range = event_key(key, from_block, 0)..=event_key(key, to_block, u64::MAX);
        self.events
            .range(range)
            .values()
            .map(|value| Ok(decode(&value?)?))
            .collect()
    }
}

#[async_trait]
impl LeaseProvider for SledStorage {
    /// Claims the lease row for `key` with a compare-and-swap, taking over rows
    /// whose holder let them expire.
    async fn try_acquire(&self, key: &SyncKey, ttl: Duration) -> Result<Option<Lease>> {
        let row_key = scope_prefix(key);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        loop {
            let current = self.leases.get(&row_key)?;
            let now = Utc::now().timestamp_millis();
            if let Some(bytes) = &current {
                let row: LeaseRow = decode(bytes)?;
                if row.expires_at_ms > now {
                    return Ok(None);
                }
                tracing::warn!(key = %key, "Taking over an expired sync lease.");
            }

            let row = encode(&LeaseRow {
                token: rand::random(),
                expires_at_ms: now.saturating_add(ttl_ms),
            })?;
            match self
                .leases
                .compare_and_swap(&row_key, current, Some(row.clone()))?
            {
                Ok(()) => {
                    self.leases.flush_async().await?;
                    let leases = self.leases.clone();
                    return Ok(Some(Lease::new(key.clone(), move || {
                        if let Err(e) = leases.compare_and_swap(&row_key, Some(row), None as Option<&[u8]>) {
                            tracing::error!("Failed to release sync lease: {}", e);
                        }
                    })));
                }
                // Lost a race with another claimant; re-read the row.
                Err(_) => continue,
            }
        }
    }
}
