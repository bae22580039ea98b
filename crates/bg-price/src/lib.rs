//! bg-price
//!
//! Spot prices for valuing balance readings.
//!
//! The cache is an explicit object: callers construct it with a source, a
//! clock, a TTL and a call budget, and pass it where it is needed. There is
//! no process-wide price state.

pub mod cache;
pub mod clock;
pub mod source;
pub mod valuation;

pub use cache::{PriceCache, PriceCacheConfig, PriceQuote};
pub use clock::{Clock, ManualClock, SystemClock};
pub use source::{PriceError, PriceSource, TwelveDataPriceSource};
pub use valuation::{value_reading, Valuation};
