//! Stock and cart lock manager.
//!
//! Wraps a [`LockStore`] with a bounded wait and an explicit per-call-site
//! policy for what to do when the store itself cannot be reached.

use std::sync::Arc;
use std::time::Duration;

use domain::CommerceError;
use storage::{LockStore, LockToken, NoopLockStore, StorageError};
use thiserror::Error;
use tokio::time::Instant;

use crate::keys::namespace_of;

/// What to do when the lock store is unreachable.
///
/// Contention is never affected by the policy: a lock held by someone else
/// always yields [`LockError::Contended`] after the bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Refuse the operation.
    FailClosed,
    /// Proceed without mutual exclusion.
    FailOpen,
}

/// Bounded-wait settings for lock acquisition.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Longest time to keep retrying a held lock.
    pub acquire_timeout: Duration,
    /// Pause between attempts.
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(2),
            retry_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder kept the lock for the whole wait.
    #[error("lock {key} is held by another operation")]
    Contended { key: String },

    /// The lock store could not be reached.
    #[error("lock store unavailable for {key}: {source}")]
    StoreUnavailable {
        key: String,
        #[source]
        source: StorageError,
    },
}

impl LockError {
    pub fn key(&self) -> &str {
        match self {
            LockError::Contended { key } | LockError::StoreUnavailable { key, .. } => key,
        }
    }
}

impl From<LockError> for CommerceError {
    fn from(err: LockError) -> Self {
        CommerceError::LockUnavailable {
            key: err.key().to_string(),
        }
    }
}

/// A held lock, or the marker of a fail-open acquisition.
#[derive(Debug)]
#[must_use = "locks must be released explicitly"]
pub enum LockHandle {
    Held(LockToken),
    /// The store was down and the caller chose to proceed unlocked.
    Unlocked { key: String },
}

impl LockHandle {
    pub fn key(&self) -> &str {
        match self {
            LockHandle::Held(token) => &token.key,
            LockHandle::Unlocked { key } => key,
        }
    }

    pub fn is_held(&self) -> bool {
        matches!(self, LockHandle::Held(_))
    }
}

/// Acquires and releases named TTL locks with a bounded wait.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    /// A manager whose every acquisition succeeds immediately.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopLockStore), LockConfig::default())
    }

    /// Acquires `key`, retrying while it is held until the acquire timeout or
    /// `deadline`, whichever comes first. At least one attempt is always made.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        deadline: Option<Instant>,
    ) -> Result<LockHandle, LockError> {
        let mut wait_until = Instant::now() + self.config.acquire_timeout;
        if let Some(deadline) = deadline {
            wait_until = wait_until.min(deadline);
        }

        loop {
            match self.store.try_acquire(key, ttl).await {
                Ok(Some(token)) => return Ok(LockHandle::Held(token)),
                Ok(None) => {}
                Err(source) => {
                    return Err(LockError::StoreUnavailable {
                        key: key.to_string(),
                        source,
                    });
                }
            }

            let now = Instant::now();
            if now >= wait_until {
                return Err(LockError::Contended {
                    key: key.to_string(),
                });
            }
            tokio::time::sleep(self.config.retry_interval.min(wait_until - now)).await;
        }
    }

    /// Acquires `key`, applying `policy` if the lock store is unreachable.
    pub async fn acquire_with_policy(
        &self,
        key: &str,
        ttl: Duration,
        policy: LockPolicy,
        deadline: Option<Instant>,
    ) -> Result<LockHandle, LockError> {
        let namespace = namespace_of(key).to_string();
        match self.acquire(key, ttl, deadline).await {
            Ok(handle) => Ok(handle),
            Err(LockError::StoreUnavailable { key, source }) if policy == LockPolicy::FailOpen => {
                tracing::warn!(%key, error = %source, "lock store unavailable, proceeding without lock");
                metrics::counter!("lock_fail_open_total", "namespace" => namespace).increment(1);
                Ok(LockHandle::Unlocked { key })
            }
            Err(err) => {
                tracing::warn!(key = %err.key(), error = %err, "lock acquisition failed");
                metrics::counter!("lock_acquire_failures_total", "namespace" => namespace)
                    .increment(1);
                Err(err)
            }
        }
    }

    /// Releases a lock. Failures are logged; the TTL bounds any leak.
    pub async fn release(&self, handle: LockHandle) {
        let LockHandle::Held(token) = handle else {
            return;
        };
        match self.store.release(&token).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(key = %token.key, "lock expired or was taken over before release");
            }
            Err(e) => {
                tracing::warn!(key = %token.key, error = %e, "failed to release lock");
            }
        }
    }

    /// Releases every handle, last acquired first.
    pub async fn release_all(&self, handles: Vec<LockHandle>) {
        for handle in handles.into_iter().rev() {
            self.release(handle).await;
        }
    }
}
