//! In-process snapshot store.

use async_trait::async_trait;
use bg_schemas::{Reading, ReadingId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{sort_series, SnapshotStore, StoreError};

/// Vec-backed store kept in canonical series order.
#[derive(Debug)]
pub struct MemoryStore {
    key: String,
    rows: RwLock<Vec<Reading>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with a fresh random instance key.
    pub fn new() -> Self {
        Self::with_key(Uuid::new_v4().to_string())
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn from_readings(readings: Vec<Reading>) -> Self {
        let mut rows = readings;
        sort_series(&mut rows);
        Self {
            key: Uuid::new_v4().to_string(),
            rows: RwLock::new(rows),
        }
    }

    pub async fn insert(&self, reading: Reading) {
        let mut rows = self.rows.write().await;
        rows.push(reading);
        sort_series(&mut rows);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Copy of the current series, in order.
    pub async fn readings(&self) -> Vec<Reading> {
        self.rows.read().await.clone()
    }

    pub async fn ids(&self) -> Vec<ReadingId> {
        self.rows.read().await.iter().map(|r| r.id.clone()).collect()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    fn instance_key(&self) -> String {
        format!("memory:{}", self.key)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.rows.read().await.len() as u64)
    }

    async fn page(&self, skip: u64, take: u64) -> Result<Vec<Reading>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .skip(skip as usize)
            .take(take as usize)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &ReadingId) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        match rows.iter().position(|r| &r.id == id) {
            Some(i) => {
                rows.remove(i);
                Ok(())
            }
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    async fn contains(&self, id: &ReadingId) -> Result<bool, StoreError> {
        Ok(self.rows.read().await.iter().any(|r| &r.id == id))
    }
}
