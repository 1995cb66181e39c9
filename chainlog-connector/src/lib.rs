//! A Rust library that mirrors the event logs of on-chain sources into a durable
//! side-store and submits transactions with bounded confirmation.
//!
//! # Key Components
//!
//! *   [`workers::SyncManager`]: The main entry point for synchronization. Each run plans
//!     a block window from the stored checkpoint, fetches matching logs, stores the ones
//!     not seen before and advances the checkpoint.
//! *   [`client`]: Transaction submission and the confirmation race.
//! *   [`storage`]: Traits for checkpoint and event persistence plus an in-memory backend.
//! *   [`lease`]: Per-(ledger, source) mutual exclusion for sync runs.
pub mod client;
/// Defines configuration structures for the connector.
pub mod config;
pub mod error;
/// Event records, topics and the per-source topic filter set.
pub mod events;
pub mod lease;
/// Deduplication and persistence of fetched batches.
pub mod persister;
/// The ledger RPC seam and its JSON-RPC implementation.
pub mod rpc;
/// Per-source log fetching.
pub mod source;
pub mod storage;
pub mod window;
/// The synchronization pipeline and its scheduler.
pub mod workers;

pub use error::{ConfirmationError, RpcError, SyncError};
pub use storage::SyncKey;
