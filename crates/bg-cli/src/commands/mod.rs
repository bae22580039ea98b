//! Command handler modules for bg-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod reconcile;
pub mod scan;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bg_config::{
    load_layered_yaml, report_unused_keys, ConfigMode, EngineSettings, LoadedConfig,
    UnusedKeyPolicy,
};
use bg_schemas::Thresholds;
use bg_store::{load_readings_csv, MemoryStore, PgSnapshotStore, SnapshotStore};
use serde::Serialize;
use tracing::warn;

use crate::SourceArgs;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Store + settings resolved from the common source flags.
pub struct Session {
    pub store: Arc<dyn SnapshotStore>,
    pub settings: EngineSettings,
    pub config_hash: String,
}

impl Session {
    pub async fn open(src: &SourceArgs) -> Result<Self> {
        let loaded = load_config(&src.config_paths)?;
        let report =
            report_unused_keys(ConfigMode::Cli, &loaded.config_json, UnusedKeyPolicy::Warn)?;
        for key in &report.unused_leaf_pointers {
            warn!(key = %key, "unused config key");
        }
        let settings = EngineSettings::from_config_json(&loaded.config_json)?;
        let store = open_store(src.csv.as_deref()).await?;
        Ok(Self {
            store,
            settings,
            config_hash: loaded.config_hash,
        })
    }
}

fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        return LoadedConfig::empty();
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    load_layered_yaml(&path_refs)
}

async fn open_store(csv: Option<&str>) -> Result<Arc<dyn SnapshotStore>> {
    match csv {
        Some(path) => {
            let readings = load_readings_csv(Path::new(path))?;
            Ok(Arc::new(MemoryStore::from_readings(readings)))
        }
        None => {
            let store = PgSnapshotStore::from_env()
                .await
                .context("open postgres snapshot store (or pass --csv)")?;
            Ok(Arc::new(store))
        }
    }
}

/// Apply `--threshold-a/--threshold-b` on top of `base`.
pub fn override_thresholds(src: &SourceArgs, base: Thresholds) -> Result<Thresholds> {
    let th = Thresholds::new(
        src.threshold_a.unwrap_or(base.a),
        src.threshold_b.unwrap_or(base.b),
    );
    if !th.is_valid() {
        bail!(
            "invalid threshold override a={} b={}: thresholds must be finite and >= 0",
            th.a,
            th.b
        );
    }
    Ok(th)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value).context("serialize report failed")?;
    println!("{s}");
    Ok(())
}
