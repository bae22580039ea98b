use bg_anomaly::{first_anomaly, ScanError};
use bg_store::{DryRunOverlay, SnapshotStore, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::locks::RunLocks;
use crate::{
    ConflictEntry, DeletedEntry, ReconcileConfig, ReconcileError, ReconcileErrorKind,
    ReconcileEvent, ReconcileReport, ReconcileState,
};

/// Run the reconciler to a terminal state.
///
/// Live runs take the per-store lock from `locks` for the whole run; dry runs
/// are read-only and take none.
pub async fn reconcile(
    store: &dyn SnapshotStore,
    cfg: &ReconcileConfig,
    locks: &RunLocks,
    cancel: &CancellationToken,
) -> Result<ReconcileReport, ReconcileError> {
    reconcile_observed(store, cfg, locks, cancel, &|_: &ReconcileEvent| {}).await
}

/// [`reconcile`] with a progress callback.
pub async fn reconcile_observed(
    store: &dyn SnapshotStore,
    cfg: &ReconcileConfig,
    locks: &RunLocks,
    cancel: &CancellationToken,
    observe: &(dyn Fn(&ReconcileEvent) + Send + Sync),
) -> Result<ReconcileReport, ReconcileError> {
    info!(
        store = %store.instance_key(),
        dry_run = cfg.dry_run,
        max_iterations = cfg.max_iterations,
        "reconcile start"
    );
    observe(&ReconcileEvent::Started {
        dry_run: cfg.dry_run,
        max_iterations: cfg.max_iterations,
    });

    let result = if cfg.dry_run {
        let overlay = DryRunOverlay::new(store);
        run_loop(&overlay, cfg, cancel, observe).await
    } else {
        let lock = locks.lock_for(&store.instance_key());
        let _guard = lock.lock().await;
        run_loop(store, cfg, cancel, observe).await
    };

    let report = match &result {
        Ok(r) => r,
        Err(e) => &e.partial,
    };
    info!(
        outcome = %report.outcome,
        deleted = report.deleted_count,
        conflicts = report.conflicts.len(),
        iterations = report.iterations,
        dry_run = report.dry_run,
        "reconcile finished"
    );
    observe(&ReconcileEvent::Finished {
        outcome: report.outcome,
        deleted_count: report.deleted_count,
        iterations: report.iterations,
    });

    result
}

async fn run_loop(
    target: &dyn SnapshotStore,
    cfg: &ReconcileConfig,
    cancel: &CancellationToken,
    observe: &(dyn Fn(&ReconcileEvent) + Send + Sync),
) -> Result<ReconcileReport, ReconcileError> {
    let opts = cfg.scan_options();
    let mut report = ReconcileReport::new(cfg.dry_run);

    loop {
        if cancel.is_cancelled() {
            report.finish(ReconcileState::Cancelled);
            return Ok(report);
        }

        observe(&ReconcileEvent::Transition {
            state: ReconcileState::Scanning,
            iteration: report.iterations,
        });
        let flagged = match first_anomaly(target, &opts).await {
            Ok(f) => f,
            Err(e) => return Err(fail_scan(report, e)),
        };
        let Some(flagged) = flagged else {
            report.finish(ReconcileState::Converged);
            return Ok(report);
        };
        if report.iterations >= cfg.max_iterations {
            report.finish(ReconcileState::LimitReached);
            return Ok(report);
        }

        report.iterations += 1;
        let iteration = report.iterations;
        observe(&ReconcileEvent::Transition {
            state: ReconcileState::Deleting,
            iteration,
        });
        match target.delete(&flagged.id).await {
            Ok(()) => {
                info!(
                    iteration,
                    id = %flagged.id,
                    ts = %flagged.timestamp,
                    reason = %flagged.reason,
                    dry_run = cfg.dry_run,
                    "reading removed"
                );
                let entry = DeletedEntry {
                    id: flagged.id,
                    timestamp: flagged.timestamp,
                    diff_a: flagged.diff_a,
                    diff_b: flagged.diff_b,
                    reason: flagged.reason,
                    iteration,
                };
                observe(&ReconcileEvent::Deleted {
                    entry: entry.clone(),
                });
                report.record_deleted(entry);
            }
            Err(StoreError::NotFound(id)) => {
                warn!(iteration, id = %id, "delete conflict: reading already gone, rescanning");
                let entry = ConflictEntry { id, iteration };
                observe(&ReconcileEvent::Conflict {
                    entry: entry.clone(),
                });
                report.conflicts.push(entry);
            }
            Err(e) => {
                error!(iteration, id = %flagged.id, error = %e, "delete failed");
                return Err(fail(report, ReconcileErrorKind::StoreUnavailable, e.to_string()));
            }
        }
    }
}

fn fail_scan(report: ReconcileReport, e: ScanError) -> ReconcileError {
    let kind = match e {
        ScanError::Store(_) => ReconcileErrorKind::StoreUnavailable,
        ScanError::InvalidPageSize | ScanError::InvalidThresholds(_) => {
            ReconcileErrorKind::InvalidConfig
        }
    };
    error!(error = %e, iterations = report.iterations, "scan failed");
    fail(report, kind, e.to_string())
}

fn fail(mut report: ReconcileReport, kind: ReconcileErrorKind, message: String) -> ReconcileError {
    report.finish(ReconcileState::Failed);
    ReconcileError {
        kind,
        message,
        partial: report,
    }
}
