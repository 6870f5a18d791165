//! Key/value cache used in front of the basket tables.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::{Result, StorageError};

/// A byte-oriented cache with optional expiry.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the cached value, or None on a miss or after expiry.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores a value. `ttl` of None means no expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Removes a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, (Vec<u8>, Option<Instant>)>,
    unavailable: bool,
}

impl CacheState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(StorageError::Unavailable("cache is unavailable".to_string()));
        }
        Ok(())
    }
}

/// In-process cache, used when no external cache is configured and in tests.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    state: Arc<RwLock<CacheState>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StorageError::Unavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Returns true if the key holds a live entry.
    pub async fn contains(&self, key: &str) -> bool {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .is_some_and(|(_, expires_at)| expires_at.is_none_or(|at| at > Instant::now()))
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.write().await;
        state.check_available()?;

        match state.entries.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= Instant::now() => {
                state.entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        state.entries.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;
        state.entries.remove(key);
        Ok(())
    }
}
