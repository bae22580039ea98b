//! Scenario: store faults, delete conflicts, cancellation and run
//! serialization.
//!
//! # Invariants under test
//!
//! 1. A transport failure aborts with `StoreUnavailable` and the partial
//!    report; deletions committed before the failure stand.
//! 2. A `NotFound` on delete is a conflict: logged, recorded, loop continues.
//! 3. A cancelled token stops the loop before its next scan.
//! 4. Two concurrent live runs on one store are serialized.
//! 5. Invalid scan settings fail as `InvalidConfig`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bg_reconcile::*;
use bg_schemas::{Reading, ReadingId};
use bg_store::{MemoryStore, SnapshotStore, StoreError};
use chrono::{TimeZone, Utc};

fn three_spikes() -> MemoryStore {
    let totals = [0.0, 900.0, 0.0, 0.0, 900.0, 0.0, 0.0, 900.0, 0.0];
    let readings = totals
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
            Reading::new(format!("t{}", i + 1), ts, *a, 0.0, 0.0, 0.0)
        })
        .collect();
    MemoryStore::from_readings(readings)
}

/// Wraps a store and injects faults into `delete`.
struct FaultyStore {
    inner: Arc<MemoryStore>,
    deletes: AtomicUsize,
    /// Fail with `Unavailable` on this (1-based) delete call.
    fail_on: Option<usize>,
    /// Remove the row behind our back first, so the delete sees `NotFound`.
    race_on: Option<usize>,
    /// Cancel this token on every delete.
    cancel: Option<CancellationToken>,
    /// Hold each delete open long enough for another task to interleave.
    delay: Option<Duration>,
    /// Max observed concurrent deletes.
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl FaultyStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner: Arc::new(inner),
            deletes: AtomicUsize::new(0),
            fail_on: None,
            race_on: None,
            cancel: None,
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SnapshotStore for FaultyStore {
    fn instance_key(&self) -> String {
        self.inner.instance_key()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }

    async fn page(&self, skip: u64, take: u64) -> Result<Vec<Reading>, StoreError> {
        self.inner.page(skip, take).await
    }

    async fn delete(&self, id: &ReadingId) -> Result<(), StoreError> {
        let n = self.deletes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(token) = &self.cancel {
            token.cancel();
        }
        if self.fail_on == Some(n) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        if self.race_on == Some(n) {
            self.inner.delete(id).await?;
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.log.lock().unwrap().push(id.to_string());
        self.inner.delete(id).await
    }
}

#[tokio::test]
async fn unavailable_store_returns_partial_report() {
    let mut store = FaultyStore::new(three_spikes());
    store.fail_on = Some(2);

    let err = reconcile(
        &store,
        &ReconcileConfig::default(),
        &RunLocks::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind, ReconcileErrorKind::StoreUnavailable);
    assert!(err.message.contains("connection reset"));
    assert_eq!(err.partial.outcome, ReconcileState::Failed);
    assert_eq!(err.partial.deleted_count, 1);
    assert_eq!(err.partial.iterations, 2);
    assert_eq!(err.partial.deleted[0].id.as_str(), "t2");

    // The first deletion is committed.
    assert_eq!(store.inner.len().await, 8);
}

#[tokio::test]
async fn delete_conflict_is_not_fatal() {
    let mut store = FaultyStore::new(three_spikes());
    store.race_on = Some(1);

    let report = reconcile(
        &store,
        &ReconcileConfig::default(),
        &RunLocks::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.is_converged());
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].id.as_str(), "t2");
    assert_eq!(report.conflicts[0].iteration, 1);

    // t2 was removed by "someone else"; the run deleted the other two.
    let ids: Vec<&str> = report.deleted.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["t5", "t8"]);
    assert_eq!(report.iterations, 3);
    assert_eq!(store.inner.len().await, 6);
}

#[tokio::test]
async fn cancelled_before_start_does_nothing() {
    let store = three_spikes();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = reconcile(&store, &ReconcileConfig::default(), &RunLocks::new(), &cancel)
        .await
        .unwrap();
    assert_eq!(report.outcome, ReconcileState::Cancelled);
    assert_eq!(report.iterations, 0);
    assert_eq!(store.len().await, 9);
}

#[tokio::test]
async fn cancel_mid_run_stops_before_next_scan() {
    let cancel = CancellationToken::new();
    let mut store = FaultyStore::new(three_spikes());
    store.cancel = Some(cancel.clone());

    let report = reconcile(&store, &ReconcileConfig::default(), &RunLocks::new(), &cancel)
        .await
        .unwrap();

    assert_eq!(report.outcome, ReconcileState::Cancelled);
    assert_eq!(report.deleted_count, 1);
    assert_eq!(store.inner.len().await, 8);
}

#[tokio::test]
async fn concurrent_live_runs_are_serialized() {
    let mut store = FaultyStore::new(three_spikes());
    store.delay = Some(Duration::from_millis(20));
    let locks = RunLocks::new();
    let cancel = CancellationToken::new();
    let cfg = ReconcileConfig::default();

    let (a, b) = tokio::join!(
        reconcile(&store, &cfg, &locks, &cancel),
        reconcile(&store, &cfg, &locks, &cancel),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(a.conflicts.is_empty() && b.conflicts.is_empty());
    assert_eq!(a.deleted_count + b.deleted_count, 3);
    assert!(a.deleted_count == 0 || b.deleted_count == 0);
    assert_eq!(store.log.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn invalid_page_size_is_a_config_error() {
    let store = three_spikes();
    let err = reconcile(
        &store,
        &ReconcileConfig {
            page_size: 0,
            ..ReconcileConfig::default()
        },
        &RunLocks::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ReconcileErrorKind::InvalidConfig);
    assert_eq!(err.partial.iterations, 0);
}

#[tokio::test]
async fn observer_sees_every_step() {
    let store = three_spikes();
    let events: Mutex<Vec<ReconcileEvent>> = Mutex::new(Vec::new());

    let report = reconcile_observed(
        &store,
        &ReconcileConfig::default(),
        &RunLocks::new(),
        &CancellationToken::new(),
        &|ev: &ReconcileEvent| events.lock().unwrap().push(ev.clone()),
    )
    .await
    .unwrap();

    let events = events.into_inner().unwrap();
    // Started, one scan/delete/deleted triple per removal, the final clean
    // scan, then Finished.
    assert_eq!(events.len(), 2 + 3 * report.deleted_count + 1);
    let states: Vec<(ReconcileState, u32)> = events
        .iter()
        .filter_map(|ev| match ev {
            ReconcileEvent::Transition { state, iteration } => Some((*state, *iteration)),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            (ReconcileState::Scanning, 0),
            (ReconcileState::Deleting, 1),
            (ReconcileState::Scanning, 1),
            (ReconcileState::Deleting, 2),
            (ReconcileState::Scanning, 2),
            (ReconcileState::Deleting, 3),
            (ReconcileState::Scanning, 3),
        ]
    );
    assert!(matches!(events[3], ReconcileEvent::Deleted { .. }));
    assert!(matches!(events[0], ReconcileEvent::Started { dry_run: false, .. }));
    assert!(matches!(
        events.last(),
        Some(ReconcileEvent::Finished {
            outcome: ReconcileState::Converged,
            deleted_count: 3,
            ..
        })
    ));
}
