//! Scenario: malformed readings and the review report.
//!
//! # Invariants under test
//!
//! 1. A reading with a missing or non-finite leg never enters a pair.
//! 2. Its id is reported as malformed; the pair around it is still examined.
//! 3. The review report uses its own thresholds, skips classification and
//!    tags each pair with the later reading.

use bg_anomaly::{review_report, scan_anomalies, ScanOptions, DEFAULT_PAGE_SIZE};
use bg_schemas::{Reading, Thresholds};
use bg_store::MemoryStore;
use chrono::{DateTime, TimeZone, Utc};

fn ts(i: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + i * 60, 0).unwrap()
}

#[tokio::test]
async fn malformed_reading_is_skipped_not_compared() {
    let mut broken = Reading::new("m1", ts(1), 1_000_000.0, 0.0, 0.0, 0.0);
    broken.onsite_a = None;
    let mut nan = Reading::new("m2", ts(2), f64::NAN, 0.0, 0.0, 0.0);
    nan.captured_by = Some("relay-2".to_string());

    let store = MemoryStore::from_readings(vec![
        Reading::new("g0", ts(0), 100.0, 0.0, 0.0, 0.0),
        broken,
        nan,
        Reading::new("g3", ts(3), 120.0, 0.0, 0.0, 0.0),
    ]);

    let report = scan_anomalies(&store, &ScanOptions::default()).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.readings_scanned, 4);
    // Only g0 -> g3 was compared.
    assert_eq!(report.pairs_examined, 1);
    let bad: Vec<&str> = report.malformed.iter().map(|id| id.as_str()).collect();
    assert_eq!(bad, vec!["m1", "m2"]);
}

#[tokio::test]
async fn malformed_reading_is_skipped_as_lookahead() {
    let mut broken = Reading::new("x", ts(2), 0.0, 0.0, 0.0, 0.0);
    broken.onchain_b = None;

    let store = MemoryStore::from_readings(vec![
        Reading::new("a", ts(0), 100.0, 0.0, 0.0, 0.0),
        Reading::new("b", ts(1), 900.0, 0.0, 0.0, 0.0),
        broken,
        Reading::new("c", ts(3), 100.0, 0.0, 0.0, 0.0),
    ]);

    let report = scan_anomalies(&store, &ScanOptions::default()).await.unwrap();
    let ids: Vec<&str> = report.flagged.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["b"]);
}

#[tokio::test]
async fn review_tags_the_later_reading() {
    // A sustained step: reconcile classification would flag r0, review tags r1.
    let store = MemoryStore::from_readings(vec![
        Reading::new("r0", ts(0), 1000.0, 0.0, 0.0, 0.0),
        Reading::new("r1", ts(1), 1600.0, 0.0, 0.0, 0.0),
        Reading::new("r2", ts(2), 1600.0, 0.0, 0.0, 0.0),
        // 400: suspect for reconcile, below the review threshold.
        Reading::new("r3", ts(3), 2000.0, 0.0, 0.0, 0.0),
    ]);

    let review = review_report(&store, &Thresholds::REVIEW, DEFAULT_PAGE_SIZE)
        .await
        .unwrap();
    assert_eq!(review.entries.len(), 1);
    let e = &review.entries[0];
    assert_eq!(e.id.as_str(), "r1");
    assert_eq!(e.prev_id.as_str(), "r0");
    assert_eq!(e.diff_a, 600.0);
    assert_eq!(e.total_a, 1600.0);
    assert_eq!(e.prev_total_a, 1000.0);

    let scan = scan_anomalies(&store, &ScanOptions::default()).await.unwrap();
    let ids: Vec<&str> = scan.flagged.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["r0", "r2"]);
}

#[tokio::test]
async fn review_does_not_dedup() {
    let store = MemoryStore::from_readings(vec![
        Reading::new("r0", ts(0), 0.0, 0.0, 0.0, 0.0),
        Reading::new("r1", ts(1), 0.0, 9000.0, 0.0, 0.0),
        Reading::new("r2", ts(2), 0.0, 0.0, 0.0, 0.0),
    ]);
    let review = review_report(&store, &Thresholds::REVIEW, 2).await.unwrap();
    let ids: Vec<&str> = review.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);
}
