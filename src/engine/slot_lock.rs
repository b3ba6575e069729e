use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::SlotKey;

use super::EngineError;

/// Mutual exclusion keyed by `(doctor, bucket)`.
///
/// Entries exist only while someone holds or waits on them, so the table
/// stays proportional to in-flight writes rather than to history.
#[derive(Default)]
pub(crate) struct SlotLocks {
    locks: DashMap<SlotKey, Arc<Mutex<()>>>,
}

/// Held slot. Dropping it releases the mutex and prunes the table entry
/// when nobody else is queued on it.
pub(crate) struct SlotGuard<'a> {
    key: SlotKey,
    guard: Option<OwnedMutexGuard<()>>,
    table: &'a DashMap<SlotKey, Arc<Mutex<()>>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl SlotLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &SlotKey, timeout: Duration) -> Result<SlotGuard<'_>, EngineError> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // Build the guard before awaiting so a timeout still prunes the entry.
        let mut slot = SlotGuard {
            key: key.clone(),
            guard: None,
            table: &self.locks,
        };
        let owned = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| EngineError::Infrastructure(format!("timed out waiting for slot {}", key.bucket)))?;
        slot.guard = Some(owned);
        Ok(slot)
    }

    /// Acquire several slots in sorted order so concurrent callers cannot deadlock.
    pub async fn acquire_all(
        &self,
        keys: &[SlotKey],
        timeout: Duration,
    ) -> Result<Vec<SlotGuard<'_>>, EngineError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for key in &sorted {
            guards.push(self.acquire(key, timeout).await?);
        }
        Ok(guards)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }
}
