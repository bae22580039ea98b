//! Request and response types for the bg-daemon HTTP endpoints.
//!
//! Snapshot and reconcile payloads use camelCase on the wire. No business
//! logic lives here.

use bg_anomaly::{AnomalyReport, ReviewReport};
use bg_price::Valuation;
use bg_reconcile::{
    ConflictEntry, DeletedEntry, ReconcileErrorKind, ReconcileReport, ReconcileState,
};
use bg_schemas::{FlaggedReading, ReadingId, Thresholds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

// ---------------------------------------------------------------------------
// Threshold overrides (query string)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ThresholdQuery {
    pub a: Option<f64>,
    pub b: Option<f64>,
}

impl ThresholdQuery {
    pub fn apply(&self, base: Thresholds) -> Thresholds {
        Thresholds::new(self.a.unwrap_or(base.a), self.b.unwrap_or(base.b))
    }
}

// ---------------------------------------------------------------------------
// GET /v1/snapshots/anomalies  /v1/snapshots/preview
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomaliesResponse {
    pub thresholds: Thresholds,
    pub count: usize,
    pub flagged: Vec<FlaggedReading>,
    pub suspect_pairs: usize,
    pub duplicates_suppressed: usize,
    pub readings_scanned: u64,
    pub malformed: Vec<ReadingId>,
    pub truncated: bool,
}

impl From<AnomalyReport> for AnomaliesResponse {
    fn from(r: AnomalyReport) -> Self {
        Self {
            thresholds: r.thresholds,
            count: r.flagged.len(),
            flagged: r.flagged,
            suspect_pairs: r.suspect_pairs,
            duplicates_suppressed: r.duplicates_suppressed,
            readings_scanned: r.readings_scanned,
            malformed: r.malformed,
            truncated: r.truncated,
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/snapshots/review
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEntryDto {
    pub id: ReadingId,
    pub timestamp: DateTime<Utc>,
    pub prev_id: ReadingId,
    pub diff_a: f64,
    pub diff_b: f64,
    pub total_a: f64,
    pub total_b: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub thresholds: Thresholds,
    pub count: usize,
    pub entries: Vec<ReviewEntryDto>,
    pub malformed: Vec<ReadingId>,
}

impl From<ReviewReport> for ReviewResponse {
    fn from(r: ReviewReport) -> Self {
        let entries: Vec<ReviewEntryDto> = r
            .entries
            .into_iter()
            .map(|e| ReviewEntryDto {
                id: e.id,
                timestamp: e.timestamp,
                prev_id: e.prev_id,
                diff_a: e.diff_a,
                diff_b: e.diff_b,
                total_a: e.total_a,
                total_b: e.total_b,
            })
            .collect();
        Self {
            thresholds: r.thresholds,
            count: entries.len(),
            entries,
            malformed: r.malformed,
        }
    }
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub max_iterations: Option<u32>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedEntryDto {
    pub id: ReadingId,
    pub timestamp: DateTime<Utc>,
    pub diff_a: f64,
    pub diff_b: f64,
    pub reason: String,
    pub iteration: u32,
}

impl From<DeletedEntry> for DeletedEntryDto {
    fn from(d: DeletedEntry) -> Self {
        Self {
            id: d.id,
            timestamp: d.timestamp,
            diff_a: d.diff_a,
            diff_b: d.diff_b,
            reason: d.reason,
            iteration: d.iteration,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub run_id: Uuid,
    pub outcome: ReconcileState,
    pub deleted_count: usize,
    pub iterations: u32,
    pub reached_limit: bool,
    pub dry_run: bool,
    pub deleted: Vec<DeletedEntryDto>,
    pub conflicts: Vec<ConflictEntry>,
}

impl ReconcileResponse {
    pub fn from_report(run_id: Uuid, r: ReconcileReport) -> Self {
        Self {
            run_id,
            outcome: r.outcome,
            deleted_count: r.deleted_count,
            iterations: r.iterations,
            reached_limit: r.reached_limit,
            dry_run: r.dry_run,
            deleted: r.deleted.into_iter().map(DeletedEntryDto::from).collect(),
            conflicts: r.conflicts,
        }
    }
}

/// 503 body: the run aborted, `partial` shows what it committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileFailedResponse {
    pub error: String,
    pub kind: ReconcileErrorKind,
    pub partial: ReconcileResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub cancelled_runs: usize,
}

// ---------------------------------------------------------------------------
// GET /v1/snapshots/valuation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationResponse {
    pub symbol_a: String,
    pub symbol_b: String,
    /// At least one price was served past its TTL.
    pub stale: bool,
    pub valuation: Valuation,
}
