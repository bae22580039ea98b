//! Read-only commands: `bg scan`, `bg review`, `bg preview`.

use anyhow::Result;
use bg_anomaly::{preview_capped, review_report, scan_anomalies, AnomalyReport, ScanOptions};

use super::{override_thresholds, print_json, Session};
use crate::SourceArgs;

pub async fn run_scan(src: &SourceArgs) -> Result<()> {
    let session = Session::open(src).await?;
    let opts = ScanOptions {
        thresholds: override_thresholds(src, session.settings.scan.thresholds)?,
        page_size: session.settings.scan.page_size,
    };
    let report = scan_anomalies(session.store.as_ref(), &opts).await?;

    if src.json {
        return print_json(&report);
    }
    println!("config_hash={}", session.config_hash);
    print_anomaly_report(&report);
    Ok(())
}

pub async fn run_preview(src: &SourceArgs, cap: Option<usize>) -> Result<()> {
    let session = Session::open(src).await?;
    let opts = ScanOptions {
        thresholds: override_thresholds(src, session.settings.scan.thresholds)?,
        page_size: session.settings.scan.page_size,
    };
    let cap = cap.unwrap_or(session.settings.reconcile.preview_cap);
    let report = preview_capped(session.store.as_ref(), &opts, cap).await?;

    if src.json {
        return print_json(&report);
    }
    println!("cap={}", cap);
    print_anomaly_report(&report);
    Ok(())
}

pub async fn run_review(src: &SourceArgs) -> Result<()> {
    let session = Session::open(src).await?;
    let thresholds = override_thresholds(src, session.settings.review.thresholds)?;
    let report = review_report(
        session.store.as_ref(),
        &thresholds,
        session.settings.scan.page_size,
    )
    .await?;

    if src.json {
        return print_json(&report);
    }
    println!("threshold_a={} threshold_b={}", thresholds.a, thresholds.b);
    println!("readings_scanned={}", report.readings_scanned);
    println!("malformed={}", report.malformed.len());
    println!("entries={}", report.entries.len());
    for e in &report.entries {
        println!(
            "review_id={} ts={} prev_id={} diff_a={} diff_b={}",
            e.id,
            e.timestamp.to_rfc3339(),
            e.prev_id,
            e.diff_a,
            e.diff_b
        );
    }
    Ok(())
}

fn print_anomaly_report(report: &AnomalyReport) {
    println!(
        "threshold_a={} threshold_b={}",
        report.thresholds.a, report.thresholds.b
    );
    println!("readings_scanned={}", report.readings_scanned);
    println!("pairs_examined={}", report.pairs_examined);
    println!("suspect_pairs={}", report.suspect_pairs);
    println!("duplicates_suppressed={}", report.duplicates_suppressed);
    println!("malformed={}", report.malformed.len());
    println!("truncated={}", report.truncated);
    println!("flagged={}", report.flagged.len());
    for f in &report.flagged {
        // reason last: it contains spaces
        println!(
            "flagged_id={} ts={} side={} cause={} reason={}",
            f.id,
            f.timestamp.to_rfc3339(),
            f.side.as_str(),
            f.cause.as_str(),
            f.reason
        );
    }
}
