//! bg-daemon entry point.
//!
//! Thin: loads config, opens the snapshot store, builds the shared state,
//! wires middleware, and starts the HTTP server. Route handlers live in
//! `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use bg_config::{
    load_layered_yaml, report_unused_keys, secrets::resolve_secrets_for_mode, ConfigMode,
    EngineSettings, LoadedConfig, UnusedKeyPolicy,
};
use bg_daemon::{routes, state};
use bg_price::{PriceCache, PriceCacheConfig, SystemClock, TwelveDataPriceSource};
use bg_store::{load_readings_csv, MemoryStore, PgSnapshotStore, SnapshotStore};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

/// Comma-separated YAML layers, merged in order.
const ENV_CONFIG_PATHS: &str = "BG_CONFIG_PATHS";
/// Serve an in-memory series loaded from this CSV instead of Postgres.
const ENV_SNAPSHOT_CSV: &str = "BG_SNAPSHOT_CSV";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience); production injects env vars.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config_from_env()?;
    let report = report_unused_keys(ConfigMode::Daemon, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    for key in &report.unused_leaf_pointers {
        warn!(key = %key, "unused config key");
    }
    let settings = EngineSettings::from_config_json(&loaded.config_json)?;
    let secrets = resolve_secrets_for_mode(&loaded.config_json, ConfigMode::Daemon)?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let store = open_store().await?;
    info!(store = %store.instance_key(), "snapshot store ready");

    let mut app_state = state::AppState::new(store, settings.clone());
    if settings.price.enabled {
        if let Some(key) = secrets.price_api_key {
            let cache = PriceCache::new(
                Arc::new(TwelveDataPriceSource::new(key)),
                Arc::new(SystemClock),
                PriceCacheConfig {
                    ttl: chrono::Duration::seconds(settings.price.ttl_secs as i64),
                    max_calls: settings.price.max_calls,
                    window: chrono::Duration::seconds(settings.price.window_secs as i64),
                },
            );
            app_state = app_state.with_prices(Arc::new(cache));
        }
    }
    let shared = Arc::new(app_state);

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8898)));
    info!("bg-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&shared)))
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn load_config_from_env() -> Result<LoadedConfig> {
    match std::env::var(ENV_CONFIG_PATHS) {
        Ok(raw) if !raw.trim().is_empty() => {
            let paths: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            load_layered_yaml(&paths)
        }
        _ => LoadedConfig::empty(),
    }
}

async fn open_store() -> Result<Arc<dyn SnapshotStore>> {
    if let Ok(csv) = std::env::var(ENV_SNAPSHOT_CSV) {
        let readings = load_readings_csv(Path::new(&csv))?;
        info!(path = %csv, readings = readings.len(), "serving in-memory series from csv");
        return Ok(Arc::new(MemoryStore::from_readings(readings)));
    }
    let store = PgSnapshotStore::from_env()
        .await
        .context("open postgres snapshot store")?;
    Ok(Arc::new(store))
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("BG_DAEMON_ADDR").ok()?.parse().ok()
}

/// Ctrl-C: cancel in-flight reconcile runs, then let axum drain.
async fn shutdown_signal(st: Arc<state::AppState>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        let n = st.cancel_all().await;
        info!(cancelled = n, "shutdown requested");
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
