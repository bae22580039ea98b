use std::fmt;

use bg_anomaly::{ScanOptions, DEFAULT_PAGE_SIZE};
use bg_schemas::{ReadingId, Thresholds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    Scanning,
    Deleting,
    Converged,
    LimitReached,
    Failed,
    Cancelled,
}

impl ReconcileState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconcileState::Converged
                | ReconcileState::LimitReached
                | ReconcileState::Failed
                | ReconcileState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileState::Scanning => "scanning",
            ReconcileState::Deleting => "deleting",
            ReconcileState::Converged => "converged",
            ReconcileState::LimitReached => "limit_reached",
            ReconcileState::Failed => "failed",
            ReconcileState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub thresholds: Thresholds,
    pub page_size: u64,
    pub max_iterations: u32,
    pub dry_run: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::RECONCILE,
            page_size: DEFAULT_PAGE_SIZE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            dry_run: false,
        }
    }
}

impl ReconcileConfig {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            thresholds: self.thresholds,
            page_size: self.page_size,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One deletion (or as-if deletion in a dry run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedEntry {
    pub id: ReadingId,
    pub timestamp: DateTime<Utc>,
    pub diff_a: f64,
    pub diff_b: f64,
    pub reason: String,
    /// 1-based.
    pub iteration: u32,
}

/// A flagged id that was already gone when the delete ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub id: ReadingId,
    pub iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub outcome: ReconcileState,
    pub deleted_count: usize,
    pub iterations: u32,
    pub reached_limit: bool,
    pub dry_run: bool,
    pub deleted: Vec<DeletedEntry>,
    pub conflicts: Vec<ConflictEntry>,
}

impl ReconcileReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            outcome: ReconcileState::Scanning,
            deleted_count: 0,
            iterations: 0,
            reached_limit: false,
            dry_run,
            deleted: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn is_converged(&self) -> bool {
        self.outcome == ReconcileState::Converged
    }

    pub fn deleted_ids(&self) -> Vec<&ReadingId> {
        self.deleted.iter().map(|d| &d.id).collect()
    }

    pub(crate) fn record_deleted(&mut self, entry: DeletedEntry) {
        self.deleted.push(entry);
        self.deleted_count = self.deleted.len();
    }

    pub(crate) fn finish(&mut self, outcome: ReconcileState) {
        self.outcome = outcome;
        self.reached_limit = outcome == ReconcileState::LimitReached;
    }
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

/// Emitted while a run is in progress (daemon SSE, CLI logs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileEvent {
    Started { dry_run: bool, max_iterations: u32 },
    /// Entering a non-terminal state. `iteration` counts deletions attempted
    /// so far, including the one about to happen when `state` is `Deleting`.
    Transition { state: ReconcileState, iteration: u32 },
    Deleted { entry: DeletedEntry },
    Conflict { entry: ConflictEntry },
    Finished { outcome: ReconcileState, deleted_count: usize, iterations: u32 },
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileErrorKind {
    /// Paging or delete failed on transport. Committed deletions stand.
    StoreUnavailable,
    /// Page size or thresholds rejected by the scanner.
    InvalidConfig,
}

/// Run aborted. `partial` is the report up to the failure, with outcome
/// `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileError {
    pub kind: ReconcileErrorKind,
    pub message: String,
    pub partial: ReconcileReport,
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reconcile failed ({:?}) after {} iteration(s), {} deleted: {}",
            self.kind, self.partial.iterations, self.partial.deleted_count, self.message
        )
    }
}

impl std::error::Error for ReconcileError {}
