//! TTL price cache with a rolling upstream call budget.
//!
//! - a cached price younger than `ttl` is served without an upstream call
//! - at most `max_calls` upstream calls per rolling `window`
//! - when the budget is spent, an expired entry is served marked `stale`;
//!   with nothing cached the lookup fails with `BudgetExhausted`
//!
//! Lookups are serialized through one async mutex so concurrent misses for
//! the same symbol cost one call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::source::{PriceError, PriceSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceCacheConfig {
    pub ttl: Duration,
    pub max_calls: u32,
    pub window: Duration,
}

impl Default for PriceCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(60),
            max_calls: 8,
            window: Duration::seconds(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: f64,
    pub fetched_at: DateTime<Utc>,
    /// Served past its TTL because the call budget was spent.
    pub stale: bool,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, (f64, DateTime<Utc>)>,
    calls: VecDeque<DateTime<Utc>>,
}

pub struct PriceCache {
    source: Arc<dyn PriceSource>,
    clock: Arc<dyn Clock>,
    cfg: PriceCacheConfig,
    state: Mutex<CacheState>,
}

impl PriceCache {
    pub fn new(source: Arc<dyn PriceSource>, clock: Arc<dyn Clock>, cfg: PriceCacheConfig) -> Self {
        Self {
            source,
            clock,
            cfg,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> PriceCacheConfig {
        self.cfg
    }

    pub async fn get(&self, symbol: &str) -> Result<PriceQuote, PriceError> {
        let mut st = self.state.lock().await;
        let now = self.clock.now();

        let cached = st.entries.get(symbol).copied();
        if let Some((price, fetched_at)) = cached {
            if now - fetched_at < self.cfg.ttl {
                return Ok(quote(symbol, price, fetched_at, false));
            }
        }

        while st
            .calls
            .front()
            .is_some_and(|t| now - *t >= self.cfg.window)
        {
            st.calls.pop_front();
        }

        if st.calls.len() >= self.cfg.max_calls as usize {
            return match cached {
                Some((price, fetched_at)) => {
                    warn!(symbol, %fetched_at, "price budget exhausted, serving stale");
                    Ok(quote(symbol, price, fetched_at, true))
                }
                None => Err(PriceError::BudgetExhausted {
                    symbol: symbol.to_string(),
                }),
            };
        }

        st.calls.push_back(now);
        debug!(
            symbol,
            source = self.source.source_name(),
            calls_in_window = st.calls.len(),
            "price fetch"
        );
        let price = self.source.fetch_price(symbol).await?;
        st.entries.insert(symbol.to_string(), (price, now));
        Ok(quote(symbol, price, now, false))
    }

    /// Upstream calls counted against the current window.
    pub async fn calls_in_window(&self) -> usize {
        let st = self.state.lock().await;
        let now = self.clock.now();
        st.calls
            .iter()
            .filter(|t| now - **t < self.cfg.window)
            .count()
    }
}

fn quote(symbol: &str, price: f64, fetched_at: DateTime<Utc>, stale: bool) -> PriceQuote {
    PriceQuote {
        symbol: symbol.to_string(),
        price,
        fetched_at,
        stale,
    }
}
