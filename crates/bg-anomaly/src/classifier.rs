//! Outlier-side classification for a suspect pair.
//!
//! Heuristic, single lookahead sample:
//! - for every metric that triggered, compare `|next - prev|` against the
//!   original jump `|curr - prev|`
//! - if any triggering metric has reverted below [`REVERSION_RATIO`] of its
//!   jump, `curr` is a transient spike and is the outlier
//! - otherwise (no reversion, or no `next` at all) `prev` is the outlier and
//!   the new level is kept as the legitimate state

use bg_schemas::{FlagCause, FlaggedReading, Metric, OutlierSide, PairDiff, Thresholds};

use crate::scanner::{Sample, SuspectPair};

/// A triggering metric counts as reverted when `|next - prev|` is strictly
/// below this fraction of `|curr - prev|`.
pub const REVERSION_RATIO: f64 = 0.4;

/// Classify a pair produced by the scanner.
pub fn classify_pair(pair: &SuspectPair) -> FlaggedReading {
    decide(
        &pair.prev,
        &pair.curr,
        pair.next.as_ref(),
        &pair.diff,
        &pair.triggered,
    )
}

/// Classify an arbitrary adjacent pair under `thresholds`.
///
/// Returns `None` when the pair is not suspect under those thresholds.
pub fn classify(
    prev: &Sample,
    curr: &Sample,
    next: Option<&Sample>,
    thresholds: &Thresholds,
) -> Option<FlaggedReading> {
    let diff = PairDiff::between(&prev.totals, &curr.totals);
    let triggered = thresholds.triggered(&diff);
    if triggered.is_empty() {
        return None;
    }
    Some(decide(prev, curr, next, &diff, &triggered))
}

fn decide(
    prev: &Sample,
    curr: &Sample,
    next: Option<&Sample>,
    diff: &PairDiff,
    triggered: &[Metric],
) -> FlaggedReading {
    let (side, cause) = match next {
        None => (OutlierSide::Previous, FlagCause::NoLookahead),
        Some(n) => {
            let back = PairDiff::between(&prev.totals, &n.totals);
            let reverted = triggered
                .iter()
                .any(|m| back.get(*m) < REVERSION_RATIO * diff.get(*m));
            if reverted {
                (OutlierSide::Current, FlagCause::Spike)
            } else {
                (OutlierSide::Previous, FlagCause::Step)
            }
        }
    };

    let flagged = match side {
        OutlierSide::Current => &curr.reading,
        OutlierSide::Previous => &prev.reading,
    };

    FlaggedReading {
        id: flagged.id.clone(),
        timestamp: flagged.timestamp,
        diff_a: diff.a,
        diff_b: diff.b,
        reason: reason(diff, triggered),
        side,
        cause,
        triggered: triggered.to_vec(),
    }
}

/// `"A: ±310, B: ±1200"` for the triggering metrics.
pub fn reason(diff: &PairDiff, triggered: &[Metric]) -> String {
    triggered
        .iter()
        .map(|m| format!("{}: ±{}", m.as_str(), fmt_amount(diff.get(*m))))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Two decimals at most, trailing zeros dropped.
fn fmt_amount(v: f64) -> String {
    let s = format!("{v:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}
