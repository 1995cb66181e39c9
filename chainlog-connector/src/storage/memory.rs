use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use super::{Checkpoint, CheckpointStore, EventStore, SyncKey, UpsertOutcome};
use crate::events::{EventKey, EventRecord};

/// A process-local [`Storage`](super::Storage) backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    checkpoints: Mutex<HashMap<SyncKey, Checkpoint>>,
    history: Mutex<Vec<Checkpoint>>,
    events: Mutex<BTreeMap<SyncKey, BTreeMap<EventKey, EventRecord>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records across all scopes.
    pub fn event_count(&self) -> usize {
        lock(&self.events).values().map(BTreeMap::len).sum()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl CheckpointStore for MemoryStorage {
    async fn get_checkpoint(&self, key: &SyncKey) -> Result<Option<u64>> {
        Ok(lock(&self.checkpoints).get(key).map(|c| c.block_height))
    }

    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> Result<u64> {
        let stored = {
            let mut checkpoints = lock(&self.checkpoints);
            let entry = checkpoints
                .entry(checkpoint.key())
                .or_insert_with(|| checkpoint.clone());
            if checkpoint.block_height >= entry.block_height {
                *entry = checkpoint.clone();
            }
            entry.block_height
        };
        lock(&self.history).push(checkpoint.clone());
        Ok(stored)
    }

    async fn checkpoint_history(&self, key: &SyncKey) -> Result<Vec<Checkpoint>> {
        Ok(lock(&self.history)
            .iter()
            .filter(|c| c.ledger_id == key.ledger_id && c.source_id == key.source_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventStore for MemoryStorage {
    async fn stored_keys(&self, key: &SyncKey, since_block: u64) -> Result<HashSet<EventKey>> {
        let lower = EventKey {
            block_height: since_block,
            log_index: 0,
        };
        Ok(lock(&self.events)
            .get(key)
            .map(|scope| scope.range(lower..).map(|(k, _)| *k).collect())
            .unwrap_or_default())
    }

    async fn upsert_event(&self, record: &EventRecord) -> Result<UpsertOutcome> {
        let scope = SyncKey::new(&record.ledger_id, &record.source_id);
        let mut events = lock(&self.events);
        let scope = events.entry(scope).or_default();
        if scope.contains_key(&record.key()) {
            return Ok(UpsertOutcome::AlreadyPresent);
        }
        scope.insert(record.key(), record.clone());
        Ok(UpsertOutcome::Inserted)
    }

    async fn events(&self, key: &SyncKey, from_block: u64, to_block: u64) -> Result<Vec<EventRecord>> {
        if from_block > to_block {
            return Ok(Vec::new());
        }
        let lower = EventKey {
            block_height: from_block,
            log_index: 0,
        };
        let upper = EventKey {
            block_height: to_block,
            log_index: u64::MAX,
        };
        Ok(lock(&self.events)
            .get(key)
            .map(|scope| scope.range(lower..=upper).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(block_height: u64, log_index: u64) -> EventRecord {
        EventRecord {
            ledger_id: "base".into(),
            source_id: "token".into(),
            block_height,
            log_index,
            tx_hash: format!("0x{block_height:x}{log_index:x}"),
            event_name: None,
            args: vec![],
        }
    }

    #[tokio::test]
    async fn checkpoint_never_moves_backwards() {
        let store = MemoryStorage::new();
        let key = SyncKey::new("base", "token");

        assert_eq!(store.get_checkpoint(&key).await.unwrap(), None);
        assert_eq!(store.set_checkpoint(&Checkpoint::new(&key, 1500)).await.unwrap(), 1500);
        assert_eq!(store.set_checkpoint(&Checkpoint::new(&key, 1200)).await.unwrap(), 1500);
        assert_eq!(store.get_checkpoint(&key).await.unwrap(), Some(1500));

        let history = store.checkpoint_history(&key).await.unwrap();
        let heights: Vec<_> = history.iter().map(|c| c.block_height).collect();
        assert_eq!(heights, vec![1500, 1200]);
    }

    #[tokio::test]
    async fn duplicate_key_is_kept_once() {
        let store = MemoryStorage::new();
        assert_eq!(store.upsert_event(&record(100, 3)).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(
            store.upsert_event(&record(100, 3)).await.unwrap(),
            UpsertOutcome::AlreadyPresent
        );
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn stored_keys_respect_lookback() {
        let store = MemoryStorage::new();
        for (block, index) in [(90, 0), (100, 3), (120, 1)] {
            store.upsert_event(&record(block, index)).await.unwrap();
        }
        let key = SyncKey::new("base", "token");
        let keys = store.stored_keys(&key, 100).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(!keys.contains(&EventKey { block_height: 90, log_index: 0 }));

        let events = store.events(&key, 95, 120).await.unwrap();
        let positions: Vec<_> = events.iter().map(|r| (r.block_height, r.log_index)).collect();
        assert_eq!(positions, vec![(100, 3), (120, 1)]);
    }
}
