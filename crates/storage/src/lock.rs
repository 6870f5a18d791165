//! Shared lock backends with TTL-bounded, token-owned entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{Result, StorageError};

/// Proof of ownership of a held lock.
///
/// Releasing with a token whose value no longer matches the stored one (the
/// lock expired and was taken by someone else) has no effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub value: Uuid,
}

/// A store of named, self-expiring mutual-exclusion entries.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Attempts to take the lock once.
    ///
    /// Returns `Ok(None)` when another holder owns a live entry, and an error
    /// when the store itself cannot be reached.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>>;

    /// Deletes the entry if it is still owned by `token`.
    ///
    /// Returns false when the entry expired or belongs to someone else.
    async fn release(&self, token: &LockToken) -> Result<bool>;
}

#[derive(Default)]
struct LockState {
    held: HashMap<String, (Uuid, Instant)>,
    unavailable: bool,
    acquisitions: usize,
}

/// In-process lock store. Suitable for a single instance and for tests.
#[derive(Clone, Default)]
pub struct InMemoryLockStore {
    state: Arc<RwLock<LockState>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StorageError::Unavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Returns true if a live entry exists for the key.
    pub async fn is_held(&self, key: &str) -> bool {
        let state = self.state.read().await;
        state
            .held
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }

    /// Returns the number of live entries.
    pub async fn held_count(&self) -> usize {
        let now = Instant::now();
        let state = self.state.read().await;
        state.held.values().filter(|(_, at)| *at > now).count()
    }

    /// Returns how many times a lock was successfully taken.
    pub async fn acquisition_count(&self) -> usize {
        self.state.read().await.acquisitions
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let mut state = self.state.write().await;
        if state.unavailable {
            return Err(StorageError::Unavailable("lock store is unavailable".to_string()));
        }

        // Expired entries are dropped here; nothing else removes them.
        let now = Instant::now();
        state.held.retain(|_, (_, expires_at)| *expires_at > now);
        if state.held.contains_key(key) {
            return Ok(None);
        }

        let value = Uuid::new_v4();
        state.held.insert(key.to_string(), (value, now + ttl));
        state.acquisitions += 1;
        Ok(Some(LockToken {
            key: key.to_string(),
            value,
        }))
    }

    async fn release(&self, token: &LockToken) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.unavailable {
            return Err(StorageError::Unavailable("lock store is unavailable".to_string()));
        }

        match state.held.get(&token.key) {
            Some((value, _)) if *value == token.value => {
                state.held.remove(&token.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// A lock store that grants every request. Only for single-writer setups.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLockStore;

#[async_trait]
impl LockStore for NoopLockStore {
    async fn try_acquire(&self, key: &str, _ttl: Duration) -> Result<Option<LockToken>> {
        Ok(Some(LockToken {
            key: key.to_string(),
            value: Uuid::new_v4(),
        }))
    }

    async fn release(&self, _token: &LockToken) -> Result<bool> {
        Ok(true)
    }
}
