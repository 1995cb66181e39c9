//! Per-key mutual exclusion for sync runs.
//!
//! A run holds a [`Lease`] on its [`SyncKey`] for the whole pipeline. Dropping the
//! lease releases it, so every exit path (success, error, cancellation) frees the
//! key. Leases carry a TTL so a crashed holder cannot block a key forever.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::storage::SyncKey;

/// Grants at most one live lease per key.
#[async_trait]
pub trait LeaseProvider: Send + Sync {
    /// Returns `None` when another holder owns an unexpired lease on `key`.
    async fn try_acquire(&self, key: &SyncKey, ttl: Duration) -> Result<Option<Lease>>;
}

/// A held lease. Released on drop.
pub struct Lease {
    key: SyncKey,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Lease {
    /// Wraps a release action that runs exactly once, when the lease is dropped.
    pub fn new(key: SyncKey, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            key,
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> &SyncKey {
        &self.key
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("key", &self.key).finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!(key = %self.key, "Released sync lease.");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    token: u64,
    expires_at: Instant,
}

/// In-process single-flight leases.
#[derive(Debug, Default, Clone)]
pub struct LocalLeases {
    held: Arc<DashMap<SyncKey, Holder>>,
    next_token: Arc<AtomicU64>,
}

impl LocalLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &SyncKey) -> bool {
        self.held
            .get(key)
            .is_some_and(|holder| holder.expires_at > Instant::now())
    }
}

#[async_trait]
impl LeaseProvider for LocalLeases {
    async fn try_acquire(&self, key: &SyncKey, ttl: Duration) -> Result<Option<Lease>> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| anyhow::anyhow!("lease TTL {:?} for {} is out of range", ttl, key))?;
        let holder = Holder {
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
            expires_at,
        };

        match self.held.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return Ok(None);
                }
                tracing::warn!(key = %key, "Taking over an expired sync lease.");
                occupied.insert(holder);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(holder);
            }
        }

        let held = self.held.clone();
        let owned_key = key.clone();
        Ok(Some(Lease::new(key.clone(), move || {
            held.remove_if(&owned_key, |_, current| current.token == holder.token);
        })))
    }
}
