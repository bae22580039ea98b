//! bg-anomaly
//!
//! Anomaly detection over the balance series:
//! - `scanner`: windowed, page-boundary-safe pair scan
//! - `classifier`: which side of a suspect pair is the outlier
//! - `aggregate`: duplicate-free, time-ordered flag list
//! - `review`: looser, unclassified listing for human review
//!
//! Every entry point in this crate (full scan, single-anomaly lookup used by
//! the reconciler, capped preview, review) goes through the same
//! [`scan_suspects`] + [`classify_pair`] path. Read-only: nothing here
//! deletes.

pub mod aggregate;
pub mod classifier;
pub mod review;
pub mod scanner;

use bg_schemas::{FlaggedReading, ReadingId, Thresholds};
use bg_store::SnapshotStore;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use aggregate::DedupAggregator;
pub use classifier::{classify, classify_pair, REVERSION_RATIO};
pub use review::{review_report, ReviewEntry, ReviewReport};
pub use scanner::{scan_suspects, Sample, ScanError, ScanOutcome, SuspectPair, DEFAULT_PAGE_SIZE};

/// Thresholds + paging for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub thresholds: Thresholds,
    pub page_size: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::RECONCILE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Full-series anomaly report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub thresholds: Thresholds,
    /// Unique flagged readings, in time order.
    pub flagged: Vec<FlaggedReading>,
    pub suspect_pairs: usize,
    pub duplicates_suppressed: usize,
    pub readings_scanned: u64,
    pub pairs_examined: u64,
    pub malformed: Vec<ReadingId>,
    /// `true` when a cap stopped the scan before the end of the series.
    pub truncated: bool,
}

impl AnomalyReport {
    pub fn is_clean(&self) -> bool {
        self.flagged.is_empty()
    }
}

async fn scan_classify(
    store: &dyn SnapshotStore,
    opts: &ScanOptions,
    limit: Option<usize>,
) -> Result<AnomalyReport, ScanError> {
    let outcome = scan_suspects(store, &opts.thresholds, opts.page_size, limit).await?;

    let mut agg = DedupAggregator::new();
    agg.extend(outcome.suspects.iter().map(classify_pair));

    Ok(AnomalyReport {
        thresholds: opts.thresholds,
        suspect_pairs: outcome.suspects.len(),
        duplicates_suppressed: agg.suppressed(),
        flagged: agg.into_flagged(),
        readings_scanned: outcome.readings_scanned,
        pairs_examined: outcome.pairs_examined,
        malformed: outcome.malformed,
        truncated: outcome.truncated,
    })
}

/// Scan the whole series and return every unique flagged reading.
pub async fn scan_anomalies(
    store: &dyn SnapshotStore,
    opts: &ScanOptions,
) -> Result<AnomalyReport, ScanError> {
    let report = scan_classify(store, opts, None).await?;
    info!(
        flagged = report.flagged.len(),
        suspects = report.suspect_pairs,
        malformed = report.malformed.len(),
        scanned = report.readings_scanned,
        "anomaly scan complete"
    );
    Ok(report)
}

/// The earliest anomaly in the current series, if any.
///
/// Used by the reconciler once per iteration; always re-reads the store.
pub async fn first_anomaly(
    store: &dyn SnapshotStore,
    opts: &ScanOptions,
) -> Result<Option<FlaggedReading>, ScanError> {
    let report = scan_classify(store, opts, Some(1)).await?;
    Ok(report.flagged.into_iter().next())
}

/// Quick preview: the plain scan capped at `cap` suspect pairs.
///
/// This does not simulate deletions, so its list can differ from what a
/// reconcile run (live or dry) would delete. The reconciler's dry run is the
/// faithful preview.
pub async fn preview_capped(
    store: &dyn SnapshotStore,
    opts: &ScanOptions,
    cap: usize,
) -> Result<AnomalyReport, ScanError> {
    let mut report = scan_classify(store, opts, Some(cap)).await?;
    report.flagged.truncate(cap);
    Ok(report)
}
