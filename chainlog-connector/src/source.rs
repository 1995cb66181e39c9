use tokio::sync::OnceCell;

use crate::error::SyncError;
use crate::events::{EventDefinition, RawEvent, TopicFilterSet};
use crate::rpc::{LedgerRpc, LogQuery};
use crate::storage::SyncKey;
use crate::window::SyncWindow;

/// A source deployed at one address on one ledger.
///
/// The topic filter set is resolved on first use and cached for the lifetime of
/// the handle. Concurrent first uses resolve it once.
#[derive(Debug)]
pub struct SourceHandle {
    key: SyncKey,
    address: String,
    deployment_block: u64,
    definitions: Vec<EventDefinition>,
    filters: OnceCell<TopicFilterSet>,
}

impl SourceHandle {
    pub fn new(
        key: SyncKey,
        address: impl Into<String>,
        deployment_block: u64,
        definitions: Vec<EventDefinition>,
    ) -> Self {
        Self {
            key,
            address: address.into(),
            deployment_block,
            definitions,
            filters: OnceCell::new(),
        }
    }

    pub fn key(&self) -> &SyncKey {
        &self.key
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn deployment_block(&self) -> u64 {
        self.deployment_block
    }

    /// Returns the resolved filter set, resolving it on the first call.
    pub async fn filters(&self) -> Result<&TopicFilterSet, SyncError> {
        self.filters
            .get_or_try_init(|| async {
                let filters = TopicFilterSet::resolve(&self.definitions)?;
                tracing::debug!(
                    key = %self.key,
                    topics = filters.topics().len(),
                    "Resolved topic filters."
                );
                Ok(filters)
            })
            .await
    }

    /// Fetches the logs of this source within `window` whose primary topic is in
    /// the filter set.
    pub async fn fetch_events(
        &self,
        rpc: &dyn LedgerRpc,
        window: SyncWindow,
    ) -> Result<Vec<RawEvent>, SyncError> {
        let filters = self.filters().await?;
        if filters.is_empty() {
            tracing::warn!(key = %self.key, "Source defines no events; nothing to fetch.");
            return Ok(Vec::new());
        }

        let query = LogQuery {
            address: self.address.clone(),
            topics: filters.topics().to_vec(),
            from_block: window.from_block,
            to_block: window.to_block,
        };
        let fetched = rpc.query_logs(&query).await?;
        let total = fetched.len();

        let events: Vec<RawEvent> = fetched
            .into_iter()
            .filter(|event| filters.matches(event) && window.contains(event.block_height))
            .collect();

        if events.len() != total {
            tracing::debug!(
                key = %self.key,
                dropped = total - events.len(),
                "Dropped logs outside the filter set or window."
            );
        }
        Ok(events)
    }
}
