//! Windowed scanner over the paged, ordered series.
//!
//! Pages the store in fixed-size chunks and compares every well-formed
//! reading with the previous well-formed one. The last reading of a page is
//! carried into the next page as the anchor, so pairs that straddle a page
//! boundary are compared like any other pair.
//!
//! For every suspect pair the scanner also resolves `next`: the first
//! well-formed reading after `curr`, wherever it lives. The classifier
//! therefore sees the same lookahead regardless of page size.
//!
//! This module does **not** decide which side of a pair is the outlier
//! (see `classifier.rs`) and never mutates the store.

use std::fmt;

use bg_schemas::{Metric, PairDiff, Reading, ReadingId, Thresholds, Totals};
use bg_store::{SnapshotStore, StoreError};
use tracing::{debug, warn};

pub const DEFAULT_PAGE_SIZE: u64 = 1000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A well-formed reading with its derived totals.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub reading: Reading,
    pub totals: Totals,
}

impl Sample {
    /// `None` for malformed readings.
    pub fn from_reading(reading: Reading) -> Option<Self> {
        let totals = reading.totals()?;
        Some(Self { reading, totals })
    }

    pub fn id(&self) -> &ReadingId {
        &self.reading.id
    }
}

/// Two time-adjacent readings whose diff exceeds a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspectPair {
    pub prev: Sample,
    pub curr: Sample,
    /// First well-formed reading after `curr`; `None` at the end of the series.
    pub next: Option<Sample>,
    pub diff: PairDiff,
    /// Metrics that exceeded their threshold, in `A, B` order. Never empty.
    pub triggered: Vec<Metric>,
}

/// Everything one pass of the scanner observed.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub suspects: Vec<SuspectPair>,
    pub readings_scanned: u64,
    pub pairs_examined: u64,
    /// Ids of readings skipped because a leg was missing or non-finite.
    pub malformed: Vec<ReadingId>,
    /// The scan stopped early because the suspect limit was reached.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanError {
    Store(StoreError),
    InvalidPageSize,
    InvalidThresholds(Thresholds),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Store(e) => write!(f, "scan aborted: {e}"),
            ScanError::InvalidPageSize => write!(f, "page size must be > 0"),
            ScanError::InvalidThresholds(th) => write!(
                f,
                "thresholds must be finite and >= 0 (a={}, b={})",
                th.a, th.b
            ),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<StoreError> for ScanError {
    fn from(e: StoreError) -> Self {
        ScanError::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// Page through the whole series and collect suspect pairs in time order.
///
/// `limit` stops the scan once that many suspects are complete (including
/// their `next` lookahead). `None` scans to the end.
pub async fn scan_suspects(
    store: &dyn SnapshotStore,
    thresholds: &Thresholds,
    page_size: u64,
    limit: Option<usize>,
) -> Result<ScanOutcome, ScanError> {
    if page_size == 0 {
        return Err(ScanError::InvalidPageSize);
    }
    if !thresholds.is_valid() {
        return Err(ScanError::InvalidThresholds(*thresholds));
    }

    let mut out = ScanOutcome::default();
    if limit == Some(0) {
        return Ok(out);
    }

    let total = store.count().await?;
    let mut skip: u64 = 0;
    let mut anchor: Option<Sample> = None;
    let mut pending: Option<SuspectPair> = None;

    'pages: while skip < total {
        let page = store.page(skip, page_size).await?;
        debug!(skip, page_size, got = page.len(), "scan page");
        if page.is_empty() {
            break;
        }
        let short_page = (page.len() as u64) < page_size;
        skip += page.len() as u64;

        for reading in page {
            out.readings_scanned += 1;

            let Some(sample) = Sample::from_reading(reading.clone()) else {
                warn!(
                    target: "bg_anomaly::malformed",
                    id = %reading.id,
                    ts = %reading.timestamp,
                    legs = ?reading.malformed_legs(),
                    "skipping malformed reading"
                );
                out.malformed.push(reading.id);
                continue;
            };

            // This sample is the lookahead for the pair that ended on the anchor.
            if let Some(mut p) = pending.take() {
                p.next = Some(sample.clone());
                out.suspects.push(p);
                if limit.is_some_and(|n| out.suspects.len() >= n) {
                    out.truncated = true;
                    break 'pages;
                }
            }

            if let Some(prev) = anchor.take() {
                out.pairs_examined += 1;
                let diff = PairDiff::between(&prev.totals, &sample.totals);
                let triggered = thresholds.triggered(&diff);
                if !triggered.is_empty() {
                    pending = Some(SuspectPair {
                        prev,
                        curr: sample.clone(),
                        next: None,
                        diff,
                        triggered,
                    });
                }
            }

            anchor = Some(sample);
        }

        if short_page {
            break;
        }
    }

    // A suspect on the final pair has no lookahead.
    if let Some(p) = pending.take() {
        out.suspects.push(p);
    }

    Ok(out)
}
