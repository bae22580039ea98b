//! `bg reconcile`: the only command that deletes.

use std::fmt::Write;

use anyhow::{Context, Result};
use bg_reconcile::{reconcile, CancellationToken, ReconcileConfig, ReconcileReport, RunLocks};
use tracing::info;

use super::{override_thresholds, Session};
use crate::SourceArgs;

pub async fn run_reconcile(
    src: &SourceArgs,
    max_iterations: Option<u32>,
    dry_run: bool,
) -> Result<()> {
    let session = Session::open(src).await?;
    let cfg = ReconcileConfig {
        thresholds: override_thresholds(src, session.settings.scan.thresholds)?,
        page_size: session.settings.scan.page_size,
        max_iterations: max_iterations.unwrap_or(session.settings.reconcile.max_iterations),
        dry_run,
    };
    if src.csv.is_some() && !dry_run {
        info!("csv source: deletions apply to the in-memory copy only");
    }

    // Ctrl-C stops the run between iterations.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let locks = RunLocks::new();
    match reconcile(session.store.as_ref(), &cfg, &locks, &cancel).await {
        Ok(report) => {
            println!("{}", render_report(&report, src.json)?);
            Ok(())
        }
        Err(e) => {
            // Committed deletions stand; show them before failing.
            println!("{}", render_report(&e.partial, src.json)?);
            anyhow::bail!("RECONCILE_FAILED kind={:?}: {}", e.kind, e.message)
        }
    }
}

fn render_report(report: &ReconcileReport, json: bool) -> Result<String> {
    if json {
        return serde_json::to_string_pretty(report).context("serialize report failed");
    }
    let mut out = String::new();
    writeln!(out, "outcome={}", report.outcome)?;
    writeln!(out, "dry_run={}", report.dry_run)?;
    writeln!(out, "iterations={}", report.iterations)?;
    writeln!(out, "deleted_count={}", report.deleted_count)?;
    writeln!(out, "reached_limit={}", report.reached_limit)?;
    write!(out, "conflicts={}", report.conflicts.len())?;
    for d in &report.deleted {
        write!(
            out,
            "\ndeleted_id={} iteration={} ts={} reason={}",
            d.id,
            d.iteration,
            d.timestamp.to_rfc3339(),
            d.reason
        )?;
    }
    Ok(out)
}
