use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    config::ConnectorConfig,
    error::SyncError,
    lease::LeaseProvider,
    rpc::{JsonRpcClient, LedgerRpc},
    source::SourceHandle,
    storage::{Storage, SyncKey},
};

/// RPC clients keyed by ledger id.
#[derive(Clone, Default)]
pub struct LedgerClients {
    clients: HashMap<String, Arc<dyn LedgerRpc>>,
}

impl LedgerClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a JSON-RPC client for every configured ledger.
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, SyncError> {
        let mut clients = Self::new();
        for (ledger_id, ledger) in &config.ledgers {
            if ledger.rpc_url.trim().is_empty() {
                return Err(SyncError::Configuration(format!(
                    "ledger '{ledger_id}' has no RPC endpoint"
                )));
            }
            let client = JsonRpcClient::new(ledger.rpc_url.clone())?;
            clients = clients.with_client(ledger_id.clone(), Arc::new(client));
        }
        Ok(clients)
    }

    pub fn with_client(mut self, ledger_id: impl Into<String>, client: Arc<dyn LedgerRpc>) -> Self {
        self.clients.insert(ledger_id.into(), client);
        self
    }

    pub fn get(&self, ledger_id: &str) -> Option<Arc<dyn LedgerRpc>> {
        self.clients.get(ledger_id).cloned()
    }

    pub fn ledger_ids(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }
}

/// A shared context containing all dependencies required by the workers.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub config: Arc<ConnectorConfig>,
    pub storage: Arc<dyn Storage>,
    pub leases: Arc<dyn LeaseProvider>,
    pub ledgers: Arc<LedgerClients>,
    sources: Arc<DashMap<SyncKey, Arc<SourceHandle>>>,
}

impl WorkerContext {
    pub fn new(
        config: Arc<ConnectorConfig>,
        ledgers: Arc<LedgerClients>,
        storage: Arc<dyn Storage>,
        leases: Arc<dyn LeaseProvider>,
    ) -> Self {
        Self {
            config,
            storage,
            leases,
            ledgers,
            sources: Arc::new(DashMap::new()),
        }
    }

    pub fn rpc(&self, ledger_id: &str) -> Result<Arc<dyn LedgerRpc>, SyncError> {
        self.config.ledger(ledger_id)?;
        self.ledgers.get(ledger_id).ok_or_else(|| {
            SyncError::Configuration(format!("ledger '{ledger_id}' has no RPC client"))
        })
    }

    /// Returns the cached handle for `key`, creating it from the configuration on
    /// first use so its filter set is resolved once per process.
    pub fn source_handle(&self, key: &SyncKey) -> Result<Arc<SourceHandle>, SyncError> {
        if let Some(handle) = self.sources.get(key) {
            return Ok(Arc::clone(handle.value()));
        }

        self.config.ledger(&key.ledger_id)?;
        let source = self.config.source(&key.source_id)?;
        let address = source
            .address_on(&key.ledger_id)
            .ok_or_else(|| SyncError::SourceNotDeployed {
                ledger_id: key.ledger_id.clone(),
                source_id: key.source_id.clone(),
            })?;
        let handle = Arc::new(SourceHandle::new(
            key.clone(),
            address,
            source.deployment_block,
            source.event_definitions(),
        ));

        let cached = self.sources.entry(key.clone()).or_insert(handle);
        Ok(Arc::clone(cached.value()))
    }
}
