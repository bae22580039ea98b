//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (`price.api_key_env`). Callers
//! resolve once at startup and pass `ResolvedSecrets` into constructors.
//! `Debug` redacts values; errors name the variable, never its value.
//!
//! | Mode   | Required                                     |
//! |--------|----------------------------------------------|
//! | DAEMON | price API key, when `price.enabled` is true  |
//! | CLI    | nothing                                      |

use anyhow::{bail, Result};
use serde_json::Value;

use crate::{ConfigMode, EngineSettings};

#[derive(Clone)]
pub struct ResolvedSecrets {
    pub price_api_key: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "price_api_key",
                &self.price_api_key.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// `None` if unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

pub fn resolve_secrets_for_mode(config_json: &Value, mode: ConfigMode) -> Result<ResolvedSecrets> {
    let settings = EngineSettings::from_config_json(config_json)?;
    let var = &settings.price.api_key_env;
    let price_api_key = resolve_env(var);

    if mode == ConfigMode::Daemon && settings.price.enabled && price_api_key.is_none() {
        bail!(
            "SECRETS_MISSING mode={}: required env var '{}' (price api key) is not set or empty",
            mode.as_str(),
            var,
        );
    }

    Ok(ResolvedSecrets { price_api_key })
}
