//! Shared runtime state for bg-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The store, settings and
//! price cache are fixed at boot; run bookkeeping sits behind async locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bg_config::EngineSettings;
use bg_price::PriceCache;
use bg_reconcile::{CancellationToken, ReconcileEvent, ReconcileState, RunLocks};
use bg_store::SnapshotStore;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    Reconcile { run_id: Uuid, event: ReconcileEvent },
    LogLine { level: String, msg: String },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Returned by GET /v1/status and carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// Instance key of the store this daemon reconciles.
    pub store: String,
    /// Runs currently in flight (live and dry).
    pub active_run_ids: Vec<Uuid>,
    /// "idle" | "reconciling"
    pub state: String,
    pub last_outcome: Option<ReconcileState>,
    pub pricing_enabled: bool,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub store: Arc<dyn SnapshotStore>,
    pub settings: EngineSettings,
    /// Serializes live reconcile runs per store.
    pub locks: RunLocks,
    /// `None` when pricing is disabled.
    pub prices: Option<Arc<PriceCache>>,
    /// Cancellation handles of in-flight runs.
    pub active_runs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    pub last_outcome: Arc<RwLock<Option<ReconcileState>>>,
}

impl AppState {
    pub fn new(store: Arc<dyn SnapshotStore>, settings: EngineSettings) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        Self {
            bus,
            build: BuildInfo {
                service: "bg-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            store,
            settings,
            locks: RunLocks::new(),
            prices: None,
            active_runs: Arc::new(Mutex::new(HashMap::new())),
            last_outcome: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_prices(mut self, cache: Arc<PriceCache>) -> Self {
        self.prices = Some(cache);
        self
    }

    pub async fn status_snapshot(&self) -> StatusSnapshot {
        let mut active_run_ids: Vec<Uuid> = self.active_runs.lock().await.keys().copied().collect();
        active_run_ids.sort();
        StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            store: self.store.instance_key(),
            state: if active_run_ids.is_empty() {
                "idle".to_string()
            } else {
                "reconciling".to_string()
            },
            active_run_ids,
            last_outcome: *self.last_outcome.read().await,
            pricing_enabled: self.prices.is_some(),
        }
    }

    /// Register a run and hand back its cancellation token.
    pub async fn begin_run(&self) -> (Uuid, CancellationToken) {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.active_runs.lock().await.insert(id, token.clone());
        (id, token)
    }

    pub async fn end_run(&self, id: Uuid, outcome: ReconcileState) {
        self.active_runs.lock().await.remove(&id);
        *self.last_outcome.write().await = Some(outcome);
    }

    /// Cancel every in-flight run; returns how many were signalled.
    pub async fn cancel_all(&self) -> usize {
        let runs = self.active_runs.lock().await;
        for token in runs.values() {
            token.cancel();
        }
        runs.len()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
