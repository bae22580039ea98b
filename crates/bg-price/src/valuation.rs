use bg_schemas::{Reading, ReadingId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quote-currency value of one reading's derived totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub id: ReadingId,
    pub timestamp: DateTime<Utc>,
    pub total_a: f64,
    pub total_b: f64,
    pub price_a: f64,
    pub price_b: f64,
    pub value_a: f64,
    pub value_b: f64,
    pub total_value: f64,
}

/// `None` for malformed readings.
pub fn value_reading(reading: &Reading, price_a: f64, price_b: f64) -> Option<Valuation> {
    let t = reading.totals()?;
    let value_a = t.a * price_a;
    let value_b = t.b * price_b;
    Some(Valuation {
        id: reading.id.clone(),
        timestamp: reading.timestamp,
        total_a: t.a,
        total_b: t.b,
        price_a,
        price_b,
        value_a,
        value_b,
        total_value: value_a + value_b,
    })
}
