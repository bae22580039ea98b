//! Dedup of classifier output.
//!
//! A reading can be `curr` of one suspect pair and `prev` of the next, so the
//! classifier may flag it twice. The aggregator keeps the first occurrence
//! only. Input arrives in ascending time order and insertion order is
//! preserved, so the output is time-ordered as well.

use std::collections::HashSet;

use bg_schemas::{FlaggedReading, ReadingId};

#[derive(Debug, Default)]
pub struct DedupAggregator {
    seen: HashSet<ReadingId>,
    flagged: Vec<FlaggedReading>,
    suppressed: usize,
}

impl DedupAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the id was already emitted.
    pub fn push(&mut self, f: FlaggedReading) -> bool {
        if !self.seen.insert(f.id.clone()) {
            self.suppressed += 1;
            return false;
        }
        self.flagged.push(f);
        true
    }

    pub fn len(&self) -> usize {
        self.flagged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flagged.is_empty()
    }

    /// Number of duplicate flags dropped so far.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    pub fn into_flagged(self) -> Vec<FlaggedReading> {
        self.flagged
    }
}

impl Extend<FlaggedReading> for DedupAggregator {
    fn extend<I: IntoIterator<Item = FlaggedReading>>(&mut self, iter: I) {
        for f in iter {
            self.push(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_schemas::{FlagCause, OutlierSide};
    use chrono::{TimeZone, Utc};

    fn flag(id: &str, secs: i64, reason: &str) -> FlaggedReading {
        FlaggedReading {
            id: ReadingId::new(id),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            diff_a: 0.0,
            diff_b: 0.0,
            reason: reason.to_string(),
            side: OutlierSide::Current,
            cause: FlagCause::Spike,
            triggered: vec![],
        }
    }

    #[test]
    fn first_occurrence_wins_and_order_is_kept() {
        let mut agg = DedupAggregator::new();
        assert!(agg.push(flag("a", 1, "first")));
        assert!(agg.push(flag("b", 2, "")));
        assert!(!agg.push(flag("a", 1, "second")));
        assert!(agg.push(flag("c", 3, "")));

        assert_eq!(agg.suppressed(), 1);
        let out = agg.into_flagged();
        let ids: Vec<&str> = out.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(out[0].reason, "first");
    }
}
