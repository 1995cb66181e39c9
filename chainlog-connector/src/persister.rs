//! Deduplication and persistence of fetched batches.
//!
//! A batch is compared against a snapshot of keys already stored for the same
//! scope, limited to the blocks the window can overlap. Only unseen records are
//! written. Writes are insert-or-keep at the store, so a record that slips past
//! the snapshot (e.g. written by a concurrent run) is still stored once.

use std::collections::HashSet;

use crate::error::SyncError;
use crate::events::{EventKey, EventRecord, RawEvent, TopicFilterSet};
use crate::storage::{EventStore, SyncKey, UpsertOutcome};

/// Counters of one persisted batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub inserted: usize,
    /// Records dropped by the snapshot, repeated within the batch, or already
    /// present at the store.
    pub skipped: usize,
}

/// Keeps the events whose key is neither in `stored` nor earlier in the batch.
pub fn dedup(batch: Vec<RawEvent>, stored: &HashSet<EventKey>) -> (Vec<RawEvent>, usize) {
    let mut seen = HashSet::with_capacity(batch.len());
    let total = batch.len();
    let fresh: Vec<RawEvent> = batch
        .into_iter()
        .filter(|event| {
            let key = event.key();
            !stored.contains(&key) && seen.insert(key)
        })
        .collect();
    let skipped = total - fresh.len();
    (fresh, skipped)
}

/// Builds the stored form of a raw event, resolving its name from the primary topic.
pub fn to_record(key: &SyncKey, filters: &TopicFilterSet, event: RawEvent) -> EventRecord {
    let event_name = event
        .primary_topic()
        .and_then(|topic| filters.event_name(topic))
        .map(str::to_string);

    EventRecord {
        ledger_id: key.ledger_id.clone(),
        source_id: key.source_id.clone(),
        block_height: event.block_height,
        log_index: event.log_index,
        tx_hash: event.tx_hash,
        event_name,
        args: event.args,
    }
}

/// Deduplicates `batch` against the store and writes the remainder in order.
///
/// The first failing write aborts the rest of the batch and is returned; records
/// written before it stay stored and are skipped by the next run.
pub async fn persist_batch<S: EventStore + ?Sized>(
    store: &S,
    key: &SyncKey,
    filters: &TopicFilterSet,
    batch: Vec<RawEvent>,
    since_block: u64,
) -> Result<PersistStats, SyncError> {
    if batch.is_empty() {
        return Ok(PersistStats::default());
    }

    let stored = store.stored_keys(key, since_block).await?;
    let (fresh, mut skipped) = dedup(batch, &stored);
    let mut inserted = 0;

    for event in fresh {
        let record = to_record(key, filters, event);
        match store.upsert_event(&record).await {
            Ok(UpsertOutcome::Inserted) => {
                inserted += 1;
                tracing::debug!(
                    key = %key,
                    block = record.block_height,
                    log_index = record.log_index,
                    event = record.event_name.as_deref().unwrap_or("<unknown>"),
                    "Stored event."
                );
            }
            Ok(UpsertOutcome::AlreadyPresent) => {
                skipped += 1;
                tracing::debug!(
                    key = %key,
                    block = record.block_height,
                    log_index = record.log_index,
                    "Event already stored by another writer."
                );
            }
            Err(e) => {
                tracing::error!(
                    key = %key,
                    block = record.block_height,
                    log_index = record.log_index,
                    inserted,
                    "Failed to store event, aborting batch: {:#}",
                    e
                );
                return Err(SyncError::Storage(e));
            }
        }
    }

    Ok(PersistStats { inserted, skipped })
}
