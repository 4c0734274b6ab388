use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::errors::CacheError;

/// Per-wire-key async mutexes used to let a single caller recompute a missing entry.
///
/// Entries are created on first use and never removed, so the table grows with
/// the number of distinct wire keys a process has ever missed on. Each entry is
/// one small allocation. Pruning would have to prove no waiter still holds the
/// `Arc`, and a recreated mutex would let a second computation start for a key
/// that is already being computed.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, wire_key: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.get(wire_key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.locks
                .entry(wire_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Waits for the lock of `wire_key`. Cancelling `cancel` abandons the wait
    /// without disturbing the holder or other waiters.
    pub async fn acquire(
        &self,
        wire_key: &str,
        cancel: &CancellationToken,
    ) -> Result<OwnedMutexGuard<()>, CacheError> {
        let lock = self.lock_for(wire_key);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
            guard = lock.lock_owned() => Ok(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
