//! CSV loader for balance readings.
//!
//! Read side only: turns a CSV file into [`Reading`] values. Callers decide
//! where they go (a [`crate::MemoryStore`] or `pg::insert_readings`).
//!
//! ## Column contract (case-insensitive, order-independent)
//!
//! | Column        | Example                    | Notes                         |
//! |---------------|----------------------------|-------------------------------|
//! | `id`          | `snap-0001`                | required, non-empty           |
//! | `timestamp`   | `2024-03-01T12:00:00Z`     | RFC 3339, or `YYYY-MM-DD HH:MM:SS` (UTC) |
//! | `onchain_a`   | `1000.5`                   | empty cell = missing leg      |
//! | `onchain_b`   | `12`                       |                               |
//! | `onsite_a`    | `0`                        |                               |
//! | `onsite_b`    | `3.25`                     |                               |
//! | `captured_by` | `relay-eu`                 | optional column               |
//!
//! A leg that is empty or unparseable is loaded as `None`; the reading is
//! kept and later skipped by the scanner as malformed.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use bg_schemas::{Reading, ReadingId};
use chrono::{DateTime, NaiveDateTime, Utc};

const REQUIRED: [&str; 6] = [
    "id",
    "timestamp",
    "onchain_a",
    "onchain_b",
    "onsite_a",
    "onsite_b",
];

/// Load all readings from a CSV file, in file order.
pub fn load_readings_csv(path: &Path) -> Result<Vec<Reading>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open readings csv failed: {}", path.display()))?;
    parse_readings_csv(file).with_context(|| format!("parse readings csv failed: {}", path.display()))
}

/// Parse readings from any reader.
pub fn parse_readings_csv<R: Read>(src: R) -> Result<Vec<Reading>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(src);

    let headers = rdr.headers().context("csv header read failed")?.clone();
    let mut col: HashMap<String, usize> = HashMap::new();
    for (i, h) in headers.iter().enumerate() {
        col.insert(h.to_ascii_lowercase(), i);
    }
    for req in REQUIRED {
        if !col.contains_key(req) {
            bail!("csv missing required header column: '{req}'");
        }
    }

    let mut out = Vec::new();
    for (i, rec) in rdr.records().enumerate() {
        let row = i + 2; // 1-based, header is row 1
        let rec = rec.with_context(|| format!("csv row {row}: read failed"))?;
        let get = |name: &str| field(&rec, &col, name).to_string();

        let id = get("id");
        if id.is_empty() {
            bail!("csv row {row}: empty id");
        }
        let timestamp = parse_timestamp(&get("timestamp"))
            .with_context(|| format!("csv row {row}: bad timestamp"))?;

        let captured_by = Some(get("captured_by")).filter(|s| !s.is_empty());

        out.push(Reading {
            id: ReadingId(id),
            timestamp,
            onchain_a: parse_leg(&get("onchain_a")),
            onchain_b: parse_leg(&get("onchain_b")),
            onsite_a: parse_leg(&get("onsite_a")),
            onsite_b: parse_leg(&get("onsite_b")),
            captured_by,
        });
    }

    Ok(out)
}

fn field<'r>(rec: &'r csv::StringRecord, col: &HashMap<String, usize>, name: &str) -> &'r str {
    col.get(name).and_then(|&idx| rec.get(idx)).unwrap_or("")
}

fn parse_leg(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|n| n.and_utc())
        .map_err(|_| anyhow!("unrecognised timestamp '{s}'"))
}
