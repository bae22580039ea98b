//! Typed engine settings extracted from the merged config JSON.
//!
//! Every key is optional and falls back to its default. A key that is
//! present with the wrong type, or a value out of range, is an error.

use anyhow::{bail, Result};
use bg_schemas::Thresholds;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub page_size: u64,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSettings {
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    pub max_iterations: u32,
    pub preview_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSettings {
    /// Valuation endpoint on/off. When on, the daemon requires the API key.
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Upstream calls allowed per `window_secs`.
    pub max_calls: u32,
    pub window_secs: u64,
    pub symbol_a: String,
    pub symbol_b: String,
    /// NAME of the env var holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub scan: ScanSettings,
    pub review: ReviewSettings,
    pub reconcile: ReconcileSettings,
    pub price: PriceSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            scan: ScanSettings {
                page_size: 1000,
                thresholds: Thresholds::RECONCILE,
            },
            review: ReviewSettings {
                thresholds: Thresholds::REVIEW,
            },
            reconcile: ReconcileSettings {
                max_iterations: 100,
                preview_cap: 50,
            },
            price: PriceSettings {
                enabled: false,
                ttl_secs: 60,
                max_calls: 8,
                window_secs: 60,
                symbol_a: "BTC/USD".to_string(),
                symbol_b: "ETH/USD".to_string(),
                api_key_env: "BG_PRICE_API_KEY".to_string(),
            },
        }
    }
}

impl EngineSettings {
    pub fn from_config_json(config: &Value) -> Result<Self> {
        let d = Self::default();

        let settings = Self {
            scan: ScanSettings {
                page_size: read_u64(config, "/scan/page_size", d.scan.page_size)?,
                thresholds: read_thresholds(config, "/scan/thresholds", d.scan.thresholds)?,
            },
            review: ReviewSettings {
                thresholds: read_thresholds(config, "/review/thresholds", d.review.thresholds)?,
            },
            reconcile: ReconcileSettings {
                max_iterations: read_u32(
                    config,
                    "/reconcile/max_iterations",
                    d.reconcile.max_iterations,
                )?,
                preview_cap: read_u64(
                    config,
                    "/reconcile/preview_cap",
                    d.reconcile.preview_cap as u64,
                )? as usize,
            },
            price: PriceSettings {
                enabled: read_bool(config, "/price/enabled", d.price.enabled)?,
                ttl_secs: read_u64(config, "/price/ttl_secs", d.price.ttl_secs)?,
                max_calls: read_u32(config, "/price/max_calls", d.price.max_calls)?,
                window_secs: read_u64(config, "/price/window_secs", d.price.window_secs)?,
                symbol_a: read_string(config, "/price/symbol_a", &d.price.symbol_a)?,
                symbol_b: read_string(config, "/price/symbol_b", &d.price.symbol_b)?,
                api_key_env: read_string(config, "/price/api_key_env", &d.price.api_key_env)?,
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.scan.page_size == 0 {
            bail!("CONFIG_INVALID /scan/page_size must be > 0");
        }
        if !self.scan.thresholds.is_valid() {
            bail!("CONFIG_INVALID /scan/thresholds must be finite and >= 0");
        }
        if !self.review.thresholds.is_valid() {
            bail!("CONFIG_INVALID /review/thresholds must be finite and >= 0");
        }
        if self.reconcile.preview_cap == 0 {
            bail!("CONFIG_INVALID /reconcile/preview_cap must be > 0");
        }
        if self.price.max_calls == 0 || self.price.window_secs == 0 {
            bail!("CONFIG_INVALID /price/max_calls and /price/window_secs must be > 0");
        }
        Ok(())
    }
}

fn read_u64(config: &Value, pointer: &str, default: u64) -> Result<u64> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => match v.as_u64() {
            Some(n) => Ok(n),
            None => bail!("CONFIG_TYPE {pointer}: expected non-negative integer, got {v}"),
        },
    }
}

fn read_u32(config: &Value, pointer: &str, default: u32) -> Result<u32> {
    let n = read_u64(config, pointer, default as u64)?;
    match u32::try_from(n) {
        Ok(n) => Ok(n),
        Err(_) => bail!("CONFIG_RANGE {pointer}: {n} does not fit in u32"),
    }
}

fn read_f64(config: &Value, pointer: &str, default: f64) -> Result<f64> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => match v.as_f64() {
            Some(n) => Ok(n),
            None => bail!("CONFIG_TYPE {pointer}: expected number, got {v}"),
        },
    }
}

fn read_bool(config: &Value, pointer: &str, default: bool) -> Result<bool> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(v) => bail!("CONFIG_TYPE {pointer}: expected bool, got {v}"),
    }
}

fn read_string(config: &Value, pointer: &str, default: &str) -> Result<String> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(v) => bail!("CONFIG_TYPE {pointer}: expected non-empty string, got {v}"),
    }
}

fn read_thresholds(config: &Value, pointer: &str, default: Thresholds) -> Result<Thresholds> {
    Ok(Thresholds::new(
        read_f64(config, &format!("{pointer}/a"), default.a)?,
        read_f64(config, &format!("{pointer}/b"), default.b)?,
    ))
}
