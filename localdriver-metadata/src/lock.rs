//! Advisory locks on metadata records
//!
//! A lock only serialises callers sharing the same [`LockTable`]; the blob
//! store offers no conditional write, so nothing stops another process from
//! writing the same record.

use localdriver_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// Named locks, created on first use
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock named `key`, giving up after `timeout`
    ///
    /// Waiters are served in arrival order. Locks are not reentrant: a task
    /// acquiring a key it already holds waits until the timeout.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<LockGuard> {
        let lock = {
            let mut locks = self.locks.lock();
            // Only the table holds idle locks
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => {
                debug!(key, "Acquired lock");
                Ok(LockGuard {
                    key: key.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => {
                warn!(key, ?timeout, "Timed out waiting for lock");
                Err(Error::LockTimeout {
                    key: key.to_string(),
                    waited: timeout,
                })
            }
        }
    }

    /// Whether someone currently holds `key`
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .lock()
            .get(key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Held lock, released on [`LockGuard::release`] or drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(self) {
        debug!(key = %self.key, "Released lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_release() {
        let table = LockTable::new();
        let guard = table.acquire("hosts/h1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(guard.key(), "hosts/h1");
        assert!(table.is_locked("hosts/h1"));
        assert!(!table.is_locked("hosts/h2"));

        guard.release();
        assert!(!table.is_locked("hosts/h1"));
    }

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let table = LockTable::new();
        let _guard = table.acquire("volumes/v1", Duration::from_secs(1)).await.unwrap();

        let err = table
            .acquire("volumes/v1", Duration::from_millis(20))
            .await
            .err()
            .unwrap();
        match err {
            Error::LockTimeout { key, waited } => {
                assert_eq!(key, "volumes/v1");
                assert_eq!(waited, Duration::from_millis(20));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Other keys are independent
        let _other = table.acquire("volumes/v2", Duration::from_millis(20)).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let table = Arc::new(LockTable::new());
        let guard = table.acquire("networks/n1", Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                table
                    .acquire("networks/n1", Duration::from_secs(5))
                    .await
                    .map(|g| g.key().to_string())
            })
        };
        tokio::task::yield_now().await;
        drop(guard);

        assert_eq!(waiter.await.unwrap().unwrap(), "networks/n1");
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let table = LockTable::new();
        for i in 0..10 {
            table
                .acquire(&format!("hosts/{}", i), Duration::from_secs(1))
                .await
                .unwrap()
                .release();
        }
        let _held = table.acquire("hosts/x", Duration::from_secs(1)).await.unwrap();
        assert_eq!(table.locks.lock().len(), 1);
    }
}
