//! In-process scenario tests for bg-daemon HTTP endpoints.
//!
//! The Axum router is driven via `tower::ServiceExt::oneshot`; no TCP socket
//! is bound. Each test gets its own in-memory snapshot store.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Request, StatusCode};
use bg_config::EngineSettings;
use bg_daemon::{routes, state};
use bg_price::{ManualClock, PriceCache, PriceCacheConfig, PriceError, PriceSource};
use bg_schemas::Reading;
use bg_store::MemoryStore;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn series(totals_a: &[f64]) -> Arc<MemoryStore> {
    let readings = totals_a
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
            Reading::new(format!("t{}", i + 1), ts, *a, 0.0, 0.0, 0.0)
        })
        .collect();
    Arc::new(MemoryStore::from_readings(readings))
}

fn make_state(store: Arc<MemoryStore>) -> Arc<state::AppState> {
    Arc::new(state::AppState::new(store, EngineSettings::default()))
}

async fn call(
    router: axum::Router,
    req: Request<axum::body::Body>,
) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// GET /v1/health  /v1/status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let router = routes::build_router(make_state(series(&[])));
    let (status, body) = call(router, get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "bg-daemon");
}

#[tokio::test]
async fn status_is_idle_at_boot() {
    let router = routes::build_router(make_state(series(&[1.0])));
    let (status, body) = call(router, get("/v1/status")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["state"], "idle");
    assert!(json["last_outcome"].is_null());
    assert_eq!(json["pricing_enabled"], false);
    assert!(json["store"].is_string());
    assert!(json["active_run_ids"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// GET /v1/snapshots/*
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anomalies_lists_the_spike() {
    let router = routes::build_router(make_state(series(&[1000.0, 1310.0, 1005.0])));
    let (status, body) = call(router, get("/v1/snapshots/anomalies")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["count"], 1);
    assert_eq!(json["flagged"][0]["id"], "t2");
    assert_eq!(json["flagged"][0]["reason"], "A: ±310");
    assert_eq!(json["readingsScanned"], 3);
}

#[tokio::test]
async fn threshold_override_via_query() {
    let st = make_state(series(&[1000.0, 1310.0, 1005.0]));

    let (_, body) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/snapshots/anomalies?a=400"),
    )
    .await;
    assert_eq!(parse_json(body)["count"], 0);

    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/snapshots/anomalies?a=-5"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        routes::build_router(st),
        get("/v1/snapshots/anomalies?a=lots"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn review_uses_looser_thresholds_and_later_id() {
    let router = routes::build_router(make_state(series(&[1000.0, 1400.0, 2000.0, 2000.0])));
    let (status, body) = call(router, get("/v1/snapshots/review")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    // 400 is under the review threshold (500); 600 is over.
    assert_eq!(json["count"], 1);
    assert_eq!(json["entries"][0]["id"], "t3");
    assert_eq!(json["entries"][0]["prevId"], "t2");
}

#[tokio::test]
async fn preview_is_capped_by_settings() {
    let store = series(&[0.0, 900.0, 0.0, 0.0, 900.0, 0.0, 0.0, 900.0, 0.0]);
    let mut settings = EngineSettings::default();
    settings.reconcile.preview_cap = 1;
    let st = Arc::new(state::AppState::new(store, settings));

    let (status, body) = call(routes::build_router(st), get("/v1/snapshots/preview")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["count"], 1);
    assert_eq!(json["truncated"], true);
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconcile_deletes_and_reports_camel_case() {
    let store = series(&[1000.0, 1310.0, 1005.0]);
    let st = make_state(Arc::clone(&store));
    let mut rx = st.bus.subscribe();

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/reconcile", serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["outcome"], "converged");
    assert_eq!(json["deletedCount"], 1);
    assert_eq!(json["iterations"], 1);
    assert_eq!(json["reachedLimit"], false);
    assert_eq!(json["dryRun"], false);
    assert_eq!(json["deleted"][0]["id"], "t2");
    assert_eq!(json["deleted"][0]["diffA"], 310.0);
    assert_eq!(json["deleted"][0]["iteration"], 1);
    assert_eq!(store.len().await, 2);

    // Every step of the run goes out on the bus.
    let mut kinds = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let state::BusMsg::Reconcile { event, .. } = msg {
            kinds.push(serde_json::to_value(&event).unwrap()["kind"].clone());
        }
    }
    assert_eq!(
        kinds,
        vec!["started", "transition", "transition", "deleted", "transition", "finished"]
    );

    // Status remembers the outcome.
    let (_, body) = call(routes::build_router(st), get("/v1/status")).await;
    assert_eq!(parse_json(body)["last_outcome"], "converged");
}

#[tokio::test]
async fn reconcile_without_body_uses_defaults() {
    let store = series(&[1000.0, 1310.0, 1005.0]);
    let router = routes::build_router(make_state(Arc::clone(&store)));
    let req = Request::builder()
        .method("POST")
        .uri("/v1/reconcile")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["deletedCount"], 1);
}

#[tokio::test]
async fn dry_run_leaves_store_untouched() {
    let store = series(&[0.0, 900.0, 0.0, 0.0, 900.0, 0.0]);
    let router = routes::build_router(make_state(Arc::clone(&store)));

    let (status, body) = call(
        router,
        post_json("/v1/reconcile", serde_json::json!({ "dryRun": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["dryRun"], true);
    assert_eq!(json["deletedCount"], 2);
    assert_eq!(store.len().await, 6);
}

#[tokio::test]
async fn max_iterations_limit_is_reported() {
    let store = series(&[0.0, 900.0, 0.0, 0.0, 900.0, 0.0]);
    let router = routes::build_router(make_state(Arc::clone(&store)));

    let (status, body) = call(
        router,
        post_json("/v1/reconcile", serde_json::json!({ "maxIterations": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["outcome"], "limit_reached");
    assert_eq!(json["reachedLimit"], true);
    assert_eq!(json["deletedCount"], 1);
}

#[tokio::test]
async fn cancel_with_no_runs_is_a_no_op() {
    let router = routes::build_router(make_state(series(&[])));
    let req = Request::builder()
        .method("POST")
        .uri("/v1/reconcile/cancel")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["cancelledRuns"], 0);
}

#[tokio::test]
async fn valuation_without_pricing_is_503() {
    let router = routes::build_router(make_state(series(&[1.0])));
    let (status, body) = call(router, get("/v1/snapshots/valuation")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(parse_json(body)["error"], "pricing disabled");
}

struct FixedPrices;

#[async_trait]
impl PriceSource for FixedPrices {
    fn source_name(&self) -> &'static str {
        "fixed"
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64, PriceError> {
        match symbol {
            "BTC/USD" => Ok(50_000.0),
            "ETH/USD" => Ok(2_000.0),
            other => Err(PriceError::Api {
                code: Some(404),
                message: format!("unknown symbol {other}"),
            }),
        }
    }
}

#[tokio::test]
async fn valuation_prices_the_latest_well_formed_reading() {
    let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut broken = Reading::new("t3", t0 + chrono::Duration::minutes(2), 0.0, 0.0, 0.0, 0.0);
    broken.onsite_b = None;
    let store = Arc::new(MemoryStore::from_readings(vec![
        Reading::new("t1", t0, 1.0, 10.0, 0.0, 0.0),
        Reading::new("t2", t0 + chrono::Duration::minutes(1), 1.5, 10.0, 0.5, 5.0),
        broken,
    ]));

    let cache = PriceCache::new(
        Arc::new(FixedPrices),
        Arc::new(ManualClock::new(t0)),
        PriceCacheConfig::default(),
    );
    let st = Arc::new(state::AppState::new(store, EngineSettings::default()).with_prices(Arc::new(cache)));

    let (status, body) = call(routes::build_router(st), get("/v1/snapshots/valuation")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["symbolA"], "BTC/USD");
    assert_eq!(json["stale"], false);
    assert_eq!(json["valuation"]["id"], "t2");
    assert_eq!(json["valuation"]["total_a"], 2.0);
    assert_eq!(json["valuation"]["total_b"], 15.0);
    assert_eq!(json["valuation"]["total_value"], 130_000.0);
}

struct DownStore;

#[async_trait]
impl bg_store::SnapshotStore for DownStore {
    fn instance_key(&self) -> String {
        "down".to_string()
    }

    async fn count(&self) -> Result<u64, bg_store::StoreError> {
        Err(bg_store::StoreError::Unavailable("connection refused".into()))
    }

    async fn page(&self, _skip: u64, _take: u64) -> Result<Vec<Reading>, bg_store::StoreError> {
        Err(bg_store::StoreError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, id: &bg_schemas::ReadingId) -> Result<(), bg_store::StoreError> {
        Err(bg_store::StoreError::NotFound(id.clone()))
    }
}

#[tokio::test]
async fn store_outage_maps_to_503_with_partial_report() {
    let st = Arc::new(state::AppState::new(Arc::new(DownStore), EngineSettings::default()));

    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/snapshots/anomalies"),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/reconcile", serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json = parse_json(body);
    assert_eq!(json["kind"], "store_unavailable");
    assert_eq!(json["partial"]["outcome"], "failed");
    assert_eq!(json["partial"]["deletedCount"], 0);

    let (_, body) = call(routes::build_router(st), get("/v1/status")).await;
    let json = parse_json(body);
    assert_eq!(json["state"], "idle");
    assert_eq!(json["last_outcome"], "failed");
}

// ---------------------------------------------------------------------------
// Runs outlive their HTTP request
// ---------------------------------------------------------------------------

/// Memory store whose row count takes `delay`, so a run stays in flight.
struct SlowStore {
    inner: Arc<MemoryStore>,
    delay: std::time::Duration,
}

#[async_trait]
impl bg_store::SnapshotStore for SlowStore {
    fn instance_key(&self) -> String {
        self.inner.instance_key()
    }

    async fn count(&self) -> Result<u64, bg_store::StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.count().await
    }

    async fn page(&self, skip: u64, take: u64) -> Result<Vec<Reading>, bg_store::StoreError> {
        self.inner.page(skip, take).await
    }

    async fn delete(&self, id: &bg_schemas::ReadingId) -> Result<(), bg_store::StoreError> {
        self.inner.delete(id).await
    }
}

fn slow_state(store: Arc<MemoryStore>) -> Arc<state::AppState> {
    let slow = SlowStore {
        inner: store,
        delay: std::time::Duration::from_millis(150),
    };
    Arc::new(state::AppState::new(Arc::new(slow), EngineSettings::default()))
}

async fn wait_for_outcome(st: &Arc<state::AppState>) -> serde_json::Value {
    for _ in 0..250 {
        let (_, body) = call(routes::build_router(Arc::clone(st)), get("/v1/status")).await;
        let json = parse_json(body);
        if !json["last_outcome"].is_null() {
            return json;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("reconcile run never finished");
}

#[tokio::test]
async fn client_hanging_up_mid_run_still_returns_daemon_to_idle() {
    let store = series(&[1000.0, 1310.0, 1005.0]);
    let st = slow_state(Arc::clone(&store));

    // Drop the request future while the run is still scanning.
    let dropped = tokio::time::timeout(
        std::time::Duration::from_millis(40),
        call(
            routes::build_router(Arc::clone(&st)),
            post_json("/v1/reconcile", serde_json::json!({})),
        ),
    )
    .await;
    assert!(dropped.is_err(), "run finished before the client hung up");

    let json = wait_for_outcome(&st).await;
    assert_eq!(json["last_outcome"], "converged");
    assert_eq!(json["state"], "idle");
    assert!(json["active_run_ids"].as_array().unwrap().is_empty());
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn cancel_reaches_an_in_flight_run() {
    let store = series(&[1000.0, 1310.0, 1005.0]);
    let st = slow_state(Arc::clone(&store));

    let router = routes::build_router(Arc::clone(&st));
    let run = tokio::spawn(call(
        router,
        post_json("/v1/reconcile", serde_json::json!({})),
    ));
    tokio::time::sleep(std::time::Duration::from_millis(40)).await;

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/reconcile/cancel", serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["cancelledRuns"], 1);

    let (status, body) = run.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["outcome"], "cancelled");

    let (_, body) = call(routes::build_router(st), get("/v1/status")).await;
    let json = parse_json(body);
    assert_eq!(json["state"], "idle");
    assert_eq!(json["last_outcome"], "cancelled");
}
