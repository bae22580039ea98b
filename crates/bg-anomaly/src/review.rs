//! Human-review report.
//!
//! Lists every adjacent pair whose diff exceeds the (looser) review
//! thresholds. There is no outlier-side decision and no dedup: each entry is
//! tagged with the later reading of its pair, unconditionally.

use bg_schemas::{ReadingId, Thresholds};
use bg_store::SnapshotStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scanner::{scan_suspects, ScanError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    /// The later reading of the pair.
    pub id: ReadingId,
    pub timestamp: DateTime<Utc>,
    pub prev_id: ReadingId,
    pub prev_timestamp: DateTime<Utc>,
    pub diff_a: f64,
    pub diff_b: f64,
    pub total_a: f64,
    pub total_b: f64,
    pub prev_total_a: f64,
    pub prev_total_b: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReport {
    pub thresholds: Thresholds,
    pub entries: Vec<ReviewEntry>,
    pub readings_scanned: u64,
    pub malformed: Vec<ReadingId>,
}

pub async fn review_report(
    store: &dyn SnapshotStore,
    thresholds: &Thresholds,
    page_size: u64,
) -> Result<ReviewReport, ScanError> {
    let outcome = scan_suspects(store, thresholds, page_size, None).await?;

    let entries = outcome
        .suspects
        .into_iter()
        .map(|p| ReviewEntry {
            id: p.curr.reading.id,
            timestamp: p.curr.reading.timestamp,
            prev_id: p.prev.reading.id,
            prev_timestamp: p.prev.reading.timestamp,
            diff_a: p.diff.a,
            diff_b: p.diff.b,
            total_a: p.curr.totals.a,
            total_b: p.curr.totals.b,
            prev_total_a: p.prev.totals.a,
            prev_total_b: p.prev.totals.b,
        })
        .collect();

    Ok(ReviewReport {
        thresholds: *thresholds,
        entries,
        readings_scanned: outcome.readings_scanned,
        malformed: outcome.malformed,
    })
}
