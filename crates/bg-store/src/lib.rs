//! bg-store
//!
//! The snapshot-store boundary consumed by the anomaly engine.
//!
//! The engine only ever needs three things from storage: a row count, an
//! ordered page, and a point delete. [`SnapshotStore`] is exactly that
//! contract. Implementations:
//! - [`MemoryStore`]: in-process, used by tests and CSV-driven CLI runs
//! - [`PgSnapshotStore`]: Postgres `balance_snapshots` table via sqlx
//! - [`DryRunOverlay`]: wraps another store and hides "as-if-deleted" ids
//!
//! Every implementation returns pages ordered by `(timestamp asc, id asc)`.

pub mod ingest_csv;
pub mod memory;
pub mod overlay;
pub mod pg;

use std::fmt;

use bg_schemas::{Reading, ReadingId};

pub use ingest_csv::{load_readings_csv, parse_readings_csv};
pub use memory::MemoryStore;
pub use overlay::DryRunOverlay;
pub use pg::PgSnapshotStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`SnapshotStore`] may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transport / connection failure. Fatal for the current run.
    Unavailable(String),
    /// The id no longer exists (already removed by someone else).
    NotFound(ReadingId),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "snapshot store unavailable: {msg}"),
            StoreError::NotFound(id) => write!(f, "snapshot not found: id={id}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Narrow read/page/delete contract over the balance-reading series.
///
/// Object safe, so callers can hold `Arc<dyn SnapshotStore>`.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Identity of the underlying series. Two handles onto the same series
    /// must return the same key; reconcile runs are serialized per key.
    fn instance_key(&self) -> String;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Readings `[skip, skip + take)` in `(timestamp, id)` ascending order.
    async fn page(&self, skip: u64, take: u64) -> Result<Vec<Reading>, StoreError>;

    /// Remove one reading. `NotFound` if it is already gone.
    async fn delete(&self, id: &ReadingId) -> Result<(), StoreError>;

    /// Whether `id` is still in the series.
    ///
    /// The default walks the series page by page; stores with an index
    /// should override it.
    async fn contains(&self, id: &ReadingId) -> Result<bool, StoreError> {
        let total = self.count().await?;
        let mut skip = 0u64;
        while skip < total {
            let page = self.page(skip, CONTAINS_PAGE_SIZE).await?;
            if page.is_empty() {
                break;
            }
            if page.iter().any(|r| &r.id == id) {
                return Ok(true);
            }
            skip += page.len() as u64;
        }
        Ok(false)
    }
}

const CONTAINS_PAGE_SIZE: u64 = 1000;

/// Sort readings into canonical series order.
pub fn sort_series(readings: &mut [Reading]) {
    readings.sort_by(|x, y| {
        x.timestamp
            .cmp(&y.timestamp)
            .then_with(|| x.id.cmp(&y.id))
    });
}
