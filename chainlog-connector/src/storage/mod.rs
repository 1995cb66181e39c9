//! Persistence seams for synchronization state.
//!
//! The connector only needs point lookups by composite key, ordered scans of one
//! (ledger, source) scope and insert-or-keep writes. Backends implement
//! [`CheckpointStore`] and [`EventStore`]; anything implementing both is a
//! [`Storage`]. [`MemoryStorage`] is provided for tests and embedding, the
//! gateway ships a `sled` backend.

mod memory;

pub use memory::MemoryStorage;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::events::{EventKey, EventRecord};

/// Identifies one synchronization scope: a source on a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncKey {
    pub ledger_id: String,
    pub source_id: String,
}

impl SyncKey {
    pub fn new(ledger_id: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            ledger_id: ledger_id.into(),
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ledger_id, self.source_id)
    }
}

/// The last block height scanned for a [`SyncKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub ledger_id: String,
    pub source_id: String,
    pub block_height: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(key: &SyncKey, block_height: u64) -> Self {
        Self {
            ledger_id: key.ledger_id.clone(),
            source_id: key.source_id.clone(),
            block_height,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> SyncKey {
        SyncKey::new(&self.ledger_id, &self.source_id)
    }
}

/// Result of writing an event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// A record with the same uniqueness key already exists; nothing was written.
    AlreadyPresent,
}

/// Durable (ledger, source) -> block height mapping.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored height, or `None` if the key was never synced.
    async fn get_checkpoint(&self, key: &SyncKey) -> Result<Option<u64>>;

    /// Atomically upserts the checkpoint of `checkpoint.key()`, keeping the
    /// larger of the stored and the new height, and appends the write to the
    /// checkpoint history. Returns the height now stored.
    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> Result<u64>;

    /// Every checkpoint write for the key, oldest first.
    async fn checkpoint_history(&self, key: &SyncKey) -> Result<Vec<Checkpoint>>;
}

/// Append-only store of event records.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Keys of stored records for the scope with `block_height >= since_block`.
    async fn stored_keys(&self, key: &SyncKey, since_block: u64) -> Result<HashSet<EventKey>>;

    /// Inserts the record unless its uniqueness key is already present.
    async fn upsert_event(&self, record: &EventRecord) -> Result<UpsertOutcome>;

    /// Stored records of the scope within `[from_block, to_block]`, ordered by
    /// block height then log index.
    async fn events(&self, key: &SyncKey, from_block: u64, to_block: u64) -> Result<Vec<EventRecord>>;
}

/// A backend holding both checkpoints and events.
pub trait Storage: CheckpointStore + EventStore {}

impl<T: CheckpointStore + EventStore> Storage for T {}
