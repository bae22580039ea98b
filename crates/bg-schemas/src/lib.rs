//! bg-schemas
//!
//! Shared record types for the balance-snapshot series: the reading itself,
//! its derived totals, detection thresholds, and the flagged-reading record
//! produced by the classifier.
//!
//! Pure data. No IO.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Reading id
// ---------------------------------------------------------------------------

/// Opaque, globally unique reading identifier. Stable across reads.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingId(pub String);

impl ReadingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReadingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ReadingId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One entry in the balance series.
///
/// The four legs are explicitly nullable. A leg that is missing, NaN or
/// infinite makes the reading malformed: [`Reading::totals`] returns `None`
/// and the scanner skips it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: ReadingId,
    /// Ordering key. Not unique; ties are broken by `id`.
    pub timestamp: DateTime<Utc>,
    pub onchain_a: Option<f64>,
    pub onchain_b: Option<f64>,
    pub onsite_a: Option<f64>,
    pub onsite_b: Option<f64>,
    /// Ingestion source label, display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_by: Option<String>,
}

impl Reading {
    /// Well-formed reading with all four legs present.
    pub fn new(
        id: impl Into<ReadingId>,
        timestamp: DateTime<Utc>,
        onchain_a: f64,
        onchain_b: f64,
        onsite_a: f64,
        onsite_b: f64,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            onchain_a: Some(onchain_a),
            onchain_b: Some(onchain_b),
            onsite_a: Some(onsite_a),
            onsite_b: Some(onsite_b),
            captured_by: None,
        }
    }

    /// Derived totals, or `None` when any leg is missing or non-finite.
    pub fn totals(&self) -> Option<Totals> {
        let a = leg(self.onchain_a)? + leg(self.onsite_a)?;
        let b = leg(self.onchain_b)? + leg(self.onsite_b)?;
        Some(Totals { a, b })
    }

    pub fn is_malformed(&self) -> bool {
        self.totals().is_none()
    }

    /// Names of the legs that make this reading malformed (empty when well-formed).
    pub fn malformed_legs(&self) -> Vec<&'static str> {
        [
            ("onchain_a", self.onchain_a),
            ("onchain_b", self.onchain_b),
            ("onsite_a", self.onsite_a),
            ("onsite_b", self.onsite_b),
        ]
        .into_iter()
        .filter(|(_, v)| leg(*v).is_none())
        .map(|(name, _)| name)
        .collect()
    }

    /// Sort key used everywhere the series is ordered.
    pub fn order_key(&self) -> (DateTime<Utc>, &ReadingId) {
        (self.timestamp, &self.id)
    }
}

fn leg(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

// ---------------------------------------------------------------------------
// Derived totals and diffs
// ---------------------------------------------------------------------------

/// `a = onchain_a + onsite_a`, `b = onchain_b + onsite_b`. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub a: f64,
    pub b: f64,
}

/// The two tracked metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    A,
    B,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::A => "A",
            Metric::B => "B",
        }
    }
}

/// Absolute per-metric differences between two readings' totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairDiff {
    pub a: f64,
    pub b: f64,
}

impl PairDiff {
    pub fn between(earlier: &Totals, later: &Totals) -> Self {
        Self {
            a: (later.a - earlier.a).abs(),
            b: (later.b - earlier.b).abs(),
        }
    }

    pub fn get(&self, m: Metric) -> f64 {
        match m {
            Metric::A => self.a,
            Metric::B => self.b,
        }
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Per-metric suspicion thresholds. A diff strictly greater than the
/// threshold triggers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub a: f64,
    pub b: f64,
}

impl Thresholds {
    /// Thresholds used by scan, preview and reconcile.
    pub const RECONCILE: Thresholds = Thresholds { a: 300.0, b: 999.0 };

    /// Looser thresholds used by the human review view.
    pub const REVIEW: Thresholds = Thresholds { a: 500.0, b: 5000.0 };

    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    /// Metrics whose diff exceeds its threshold, in `A, B` order.
    pub fn triggered(&self, diff: &PairDiff) -> Vec<Metric> {
        let mut out = Vec::with_capacity(2);
        if diff.a > self.a {
            out.push(Metric::A);
        }
        if diff.b > self.b {
            out.push(Metric::B);
        }
        out
    }

    pub fn is_suspect(&self, diff: &PairDiff) -> bool {
        diff.a > self.a || diff.b > self.b
    }

    /// Both thresholds finite and non-negative.
    pub fn is_valid(&self) -> bool {
        self.a.is_finite() && self.b.is_finite() && self.a >= 0.0 && self.b >= 0.0
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::RECONCILE
    }
}

// ---------------------------------------------------------------------------
// Classifier output
// ---------------------------------------------------------------------------

/// Which reading of a suspect pair was judged the outlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierSide {
    Previous,
    Current,
}

/// Why the classifier picked its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagCause {
    /// The following reading reverted toward the pre-jump baseline.
    Spike,
    /// The new level held on the following reading.
    Step,
    /// No following reading exists; default policy applies.
    NoLookahead,
}

impl OutlierSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutlierSide::Previous => "previous",
            OutlierSide::Current => "current",
        }
    }
}

impl FlagCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagCause::Spike => "spike",
            FlagCause::Step => "step",
            FlagCause::NoLookahead => "no_lookahead",
        }
    }
}

/// One reading judged anomalous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedReading {
    pub id: ReadingId,
    pub timestamp: DateTime<Utc>,
    /// Diff of the suspect pair on metric A.
    pub diff_a: f64,
    /// Diff of the suspect pair on metric B.
    pub diff_b: f64,
    /// `"A: ±<value>"` / `"B: ±<value>"` per triggering metric, comma-joined.
    pub reason: String,
    pub side: OutlierSide,
    pub cause: FlagCause,
    pub triggered: Vec<Metric>,
}
