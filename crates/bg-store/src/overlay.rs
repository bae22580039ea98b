//! Dry-run overlay: an "as-if-deleted" view over another store.
//!
//! Deletes are recorded in a hidden-id set instead of reaching the inner
//! store. Reads filter hidden ids out, so a reconcile loop running over the
//! overlay sees exactly the series a live run would see after the same
//! deletions. The inner store is never mutated.
//!
//! Paging keeps a cursor mapping the overlay position reached by the last
//! page to the matching inner offset. A forward scan therefore reads every
//! inner row once; only a backwards jump restarts from the top.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bg_schemas::{Reading, ReadingId};
use tokio::sync::Mutex;

use crate::{SnapshotStore, StoreError};

pub struct DryRunOverlay<'a> {
    inner: &'a dyn SnapshotStore,
    state: Mutex<OverlayState>,
}

#[derive(Default)]
struct OverlayState {
    hidden: BTreeSet<ReadingId>,
    cursor: Option<Cursor>,
}

/// Overlay position `visible` sits at inner offset `inner`.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    visible: u64,
    inner: u64,
}

impl<'a> DryRunOverlay<'a> {
    pub fn new(inner: &'a dyn SnapshotStore) -> Self {
        Self {
            inner,
            state: Mutex::new(OverlayState::default()),
        }
    }

    /// Ids hidden so far (sorted).
    pub async fn hidden_ids(&self) -> Vec<ReadingId> {
        self.state.lock().await.hidden.iter().cloned().collect()
    }
}

#[async_trait]
impl SnapshotStore for DryRunOverlay<'_> {
    fn instance_key(&self) -> String {
        format!("dry-run:{}", self.inner.instance_key())
    }

    /// Hidden ids already gone from the inner store are not subtracted twice.
    async fn count(&self) -> Result<u64, StoreError> {
        let hidden = self.state.lock().await.hidden.clone();
        let n = self.inner.count().await?;
        let mut still_present = 0u64;
        for id in &hidden {
            if self.inner.contains(id).await? {
                still_present += 1;
            }
        }
        Ok(n.saturating_sub(still_present))
    }

    async fn page(&self, skip: u64, take: u64) -> Result<Vec<Reading>, StoreError> {
        let mut st = self.state.lock().await;
        if st.hidden.is_empty() {
            return self.inner.page(skip, take).await;
        }
        if take == 0 {
            return Ok(Vec::new());
        }

        let (mut visible, mut inner_pos) = match st.cursor {
            Some(c) if c.visible <= skip => (c.visible, c.inner),
            _ => (0, 0),
        };
        let mut out = Vec::new();

        // Ask for exactly the visible rows still needed; hidden rows are
        // consumed along the way, so no fetched row is read twice.
        'fetch: loop {
            let want = (skip - visible) + (take - out.len() as u64);
            let raw = self.inner.page(inner_pos, want).await?;
            let exhausted = (raw.len() as u64) < want;
            for r in raw {
                inner_pos += 1;
                if st.hidden.contains(&r.id) {
                    continue;
                }
                if visible >= skip {
                    out.push(r);
                }
                visible += 1;
                if out.len() as u64 == take {
                    break 'fetch;
                }
            }
            if exhausted {
                break;
            }
        }

        st.cursor = Some(Cursor {
            visible,
            inner: inner_pos,
        });
        Ok(out)
    }

    async fn delete(&self, id: &ReadingId) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        if st.hidden.insert(id.clone()) {
            // Visible positions after the hidden row shifted.
            st.cursor = None;
            Ok(())
        } else {
            Err(StoreError::NotFound(id.clone()))
        }
    }

    async fn contains(&self, id: &ReadingId) -> Result<bool, StoreError> {
        if self.state.lock().await.hidden.contains(id) {
            return Ok(false);
        }
        self.inner.contains(id).await
    }
}
