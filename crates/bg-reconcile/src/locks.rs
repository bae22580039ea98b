//! Per-store run serialization.
//!
//! Two live runs against the same series would race: both could flag the same
//! reading, and the loser would see a delete conflict on every iteration.
//! `RunLocks` hands out one async mutex per `SnapshotStore::instance_key()`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `key`, created on first use.
    pub fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// `true` while a live run holds `key`.
    pub fn is_busy(&self, key: &str) -> bool {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(key).is_some_and(|m| m.try_lock().is_err())
    }
}
