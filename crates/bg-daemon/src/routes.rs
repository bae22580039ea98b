//! Axum router and all HTTP handlers for bg-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are thin: parse, call the engine, map the
//! result to a status code.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use bg_anomaly::{
    preview_capped, review_report, scan_anomalies, ScanError, ScanOptions,
};
use bg_price::{value_reading, PriceError};
use bg_reconcile::{
    reconcile_observed, ReconcileConfig, ReconcileErrorKind, ReconcileEvent, ReconcileState,
};
use bg_schemas::{Reading, Thresholds};
use bg_store::{SnapshotStore, StoreError};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{
        AnomaliesResponse, CancelResponse, ErrorResponse, HealthResponse, ReconcileFailedResponse,
        ReconcileRequest, ReconcileResponse, ReviewResponse, ThresholdQuery, ValuationResponse,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/snapshots/anomalies", get(anomalies))
        .route("/v1/snapshots/review", get(review))
        .route("/v1/snapshots/preview", get(preview))
        .route("/v1/snapshots/valuation", get(valuation))
        .route("/v1/reconcile", post(reconcile_handler))
        .route("/v1/reconcile/cancel", post(reconcile_cancel))
        .with_state(state)
}

fn error(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(msg))).into_response()
}

fn scan_error(e: ScanError) -> Response {
    match e {
        ScanError::Store(_) => error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        ScanError::InvalidPageSize | ScanError::InvalidThresholds(_) => {
            error(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

fn thresholds_from(q: &ThresholdQuery, base: Thresholds) -> Result<Thresholds, Response> {
    let th = q.apply(base);
    if th.is_valid() {
        Ok(th)
    } else {
        Err(error(
            StatusCode::BAD_REQUEST,
            "thresholds must be finite and >= 0",
        ))
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health  /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = st.status_snapshot().await;
    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// GET /v1/snapshots/anomalies
// ---------------------------------------------------------------------------

pub(crate) async fn anomalies(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ThresholdQuery>,
) -> Response {
    let thresholds = match thresholds_from(&q, st.settings.scan.thresholds) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let opts = ScanOptions {
        thresholds,
        page_size: st.settings.scan.page_size,
    };
    match scan_anomalies(st.store.as_ref(), &opts).await {
        Ok(report) => (StatusCode::OK, Json(AnomaliesResponse::from(report))).into_response(),
        Err(e) => scan_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/snapshots/review
// ---------------------------------------------------------------------------

pub(crate) async fn review(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ThresholdQuery>,
) -> Response {
    let thresholds = match thresholds_from(&q, st.settings.review.thresholds) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    match review_report(st.store.as_ref(), &thresholds, st.settings.scan.page_size).await {
        Ok(report) => (StatusCode::OK, Json(ReviewResponse::from(report))).into_response(),
        Err(e) => scan_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/snapshots/preview
// ---------------------------------------------------------------------------

/// Capped plain scan. Not a simulation: POST /v1/reconcile with
/// `dryRun: true` is the exact preview of a live run.
pub(crate) async fn preview(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ThresholdQuery>,
) -> Response {
    let thresholds = match thresholds_from(&q, st.settings.scan.thresholds) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let opts = ScanOptions {
        thresholds,
        page_size: st.settings.scan.page_size,
    };
    match preview_capped(st.store.as_ref(), &opts, st.settings.reconcile.preview_cap).await {
        Ok(report) => (StatusCode::OK, Json(AnomaliesResponse::from(report))).into_response(),
        Err(e) => scan_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile
// ---------------------------------------------------------------------------

pub(crate) async fn reconcile_handler(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ThresholdQuery>,
    body: Option<Json<ReconcileRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let thresholds = match thresholds_from(&q, st.settings.scan.thresholds) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let cfg = ReconcileConfig {
        thresholds,
        page_size: st.settings.scan.page_size,
        max_iterations: req
            .max_iterations
            .unwrap_or(st.settings.reconcile.max_iterations),
        dry_run: req.dry_run.unwrap_or(false),
    };

    let (run_id, cancel) = st.begin_run().await;
    info!(%run_id, dry_run = cfg.dry_run, max_iterations = cfg.max_iterations, "reconcile/start");

    // The run owns its bookkeeping: a client that hangs up drops this
    // handler, not the run, so end_run always fires.
    let task_state = st.clone();
    let run = tokio::spawn(async move {
        let st = task_state;
        let bus = st.bus.clone();
        let observe = move |ev: &ReconcileEvent| {
            let _ = bus.send(BusMsg::Reconcile {
                run_id,
                event: ev.clone(),
            });
        };
        let result =
            reconcile_observed(st.store.as_ref(), &cfg, &st.locks, &cancel, &observe).await;
        match &result {
            Ok(report) => st.end_run(run_id, report.outcome).await,
            Err(e) => {
                st.end_run(run_id, e.partial.outcome).await;
                warn!(%run_id, error = %e, "reconcile/failed");
                let _ = st.bus.send(BusMsg::LogLine {
                    level: "ERROR".to_string(),
                    msg: format!("reconcile run {run_id} failed: {}", e.message),
                });
            }
        }
        result
    });

    let result = match run.await {
        Ok(result) => result,
        Err(join_err) => {
            st.end_run(run_id, ReconcileState::Failed).await;
            warn!(%run_id, error = %join_err, "reconcile/task_aborted");
            return error(StatusCode::INTERNAL_SERVER_ERROR, "reconcile task aborted");
        }
    };

    match result {
        Ok(report) => (
            StatusCode::OK,
            Json(ReconcileResponse::from_report(run_id, report)),
        )
            .into_response(),
        Err(e) => {
            let status = match e.kind {
                ReconcileErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ReconcileErrorKind::InvalidConfig => StatusCode::BAD_REQUEST,
            };
            (
                status,
                Json(ReconcileFailedResponse {
                    error: e.message,
                    kind: e.kind,
                    partial: ReconcileResponse::from_report(run_id, e.partial),
                }),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile/cancel
// ---------------------------------------------------------------------------

pub(crate) async fn reconcile_cancel(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let n = st.cancel_all().await;
    info!(cancelled = n, "reconcile/cancel");
    let _ = st.bus.send(BusMsg::LogLine {
        level: "WARN".to_string(),
        msg: format!("cancel requested for {n} reconcile run(s)"),
    });
    (StatusCode::OK, Json(CancelResponse { cancelled_runs: n }))
}

// ---------------------------------------------------------------------------
// GET /v1/snapshots/valuation
// ---------------------------------------------------------------------------

pub(crate) async fn valuation(State(st): State<Arc<AppState>>) -> Response {
    let Some(prices) = st.prices.as_ref() else {
        return error(StatusCode::SERVICE_UNAVAILABLE, "pricing disabled");
    };

    let latest = match latest_well_formed(st.store.as_ref(), st.settings.scan.page_size).await {
        Ok(Some(r)) => r,
        Ok(None) => return error(StatusCode::NOT_FOUND, "no well-formed reading"),
        Err(e) => return error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };

    let p = &st.settings.price;
    let (qa, qb) = match (prices.get(&p.symbol_a).await, prices.get(&p.symbol_b).await) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => {
            let status = match e {
                PriceError::BudgetExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            return error(status, e.to_string());
        }
    };

    match value_reading(&latest, qa.price, qb.price) {
        Some(v) => (
            StatusCode::OK,
            Json(ValuationResponse {
                symbol_a: p.symbol_a.clone(),
                symbol_b: p.symbol_b.clone(),
                stale: qa.stale || qb.stale,
                valuation: v,
            }),
        )
            .into_response(),
        None => error(StatusCode::NOT_FOUND, "no well-formed reading"),
    }
}

/// The most recent reading with all legs present, searching back one page at a time.
async fn latest_well_formed(
    store: &dyn SnapshotStore,
    page_size: u64,
) -> Result<Option<Reading>, StoreError> {
    let page_size = page_size.max(1);
    let mut end = store.count().await?;
    while end > 0 {
        let start = end.saturating_sub(page_size);
        let page = store.page(start, end - start).await?;
        if let Some(r) = page.into_iter().rev().find(|r| !r.is_malformed()) {
            return Ok(Some(r));
        }
        end = start;
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::Reconcile { .. } => "reconcile",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
