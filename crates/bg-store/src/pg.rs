//! Postgres-backed snapshot store (`balance_snapshots` table).

use anyhow::{Context, Result};
use async_trait::async_trait;
use bg_schemas::{Reading, ReadingId};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::{debug, info};

use crate::{SnapshotStore, StoreError};

pub const ENV_DB_URL: &str = "BG_DATABASE_URL";

/// Connect to Postgres using BG_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_snapshots_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='balance_snapshots'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_snapshots_table: exists,
    })
}

/// Insert readings, ignoring ids that already exist. Returns rows inserted.
pub async fn insert_readings(pool: &PgPool, readings: &[Reading]) -> Result<u64> {
    let mut inserted = 0u64;
    for r in readings {
        let res = sqlx::query(
            r#"
            insert into balance_snapshots (
              id, ts, onchain_a, onchain_b, onsite_a, onsite_b, captured_by
            ) values ($1, $2, $3, $4, $5, $6, $7)
            on conflict (id) do nothing
            "#,
        )
        .bind(r.id.as_str())
        .bind(r.timestamp)
        .bind(r.onchain_a)
        .bind(r.onchain_b)
        .bind(r.onsite_a)
        .bind(r.onsite_b)
        .bind(r.captured_by.as_deref())
        .execute(pool)
        .await
        .with_context(|| format!("insert_readings failed id={}", r.id))?;
        inserted += res.rows_affected();
    }
    info!(rows = readings.len(), inserted, "balance readings imported");
    Ok(inserted)
}

/// Strip credentials from a Postgres URL so it can serve as a lock key and
/// appear in logs.
pub fn instance_key_from_url(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((s, r)) => (s, r),
        None => ("postgres", url),
    };
    let rest = rest.rsplit_once('@').map(|(_, host)| host).unwrap_or(rest);
    let rest = rest.split('?').next().unwrap_or(rest);
    format!("{scheme}://{rest}")
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
    key: String,
}

impl PgSnapshotStore {
    /// `key` identifies the database; see [`instance_key_from_url`].
    pub fn new(pool: PgPool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }

    pub async fn from_env() -> Result<Self> {
        let url =
            std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
        let pool = connect(&url).await?;
        Ok(Self::new(pool, instance_key_from_url(&url)))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn unavailable(op: &str, e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(format!("{op}: {e}"))
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    fn instance_key(&self) -> String {
        self.key.clone()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
            "select count(*)::bigint from balance_snapshots",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unavailable("count", e))?;
        Ok(n.max(0) as u64)
    }

    async fn page(&self, skip: u64, take: u64) -> Result<Vec<Reading>, StoreError> {
        let rows = sqlx::query(
            r#"
            select id, ts, onchain_a, onchain_b, onsite_a, onsite_b, captured_by
            from balance_snapshots
            order by ts asc, id asc
            offset $1
            limit $2
            "#,
        )
        .bind(i64::try_from(skip).unwrap_or(i64::MAX))
        .bind(i64::try_from(take).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("page", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(Reading {
                id: ReadingId(r.try_get::<String, _>("id").map_err(|e| unavailable("decode id", e))?),
                timestamp: r
                    .try_get::<DateTime<Utc>, _>("ts")
                    .map_err(|e| unavailable("decode ts", e))?,
                onchain_a: r
                    .try_get::<Option<f64>, _>("onchain_a")
                    .map_err(|e| unavailable("decode onchain_a", e))?,
                onchain_b: r
                    .try_get::<Option<f64>, _>("onchain_b")
                    .map_err(|e| unavailable("decode onchain_b", e))?,
                onsite_a: r
                    .try_get::<Option<f64>, _>("onsite_a")
                    .map_err(|e| unavailable("decode onsite_a", e))?,
                onsite_b: r
                    .try_get::<Option<f64>, _>("onsite_b")
                    .map_err(|e| unavailable("decode onsite_b", e))?,
                captured_by: r
                    .try_get::<Option<String>, _>("captured_by")
                    .map_err(|e| unavailable("decode captured_by", e))?,
            });
        }
        Ok(out)
    }

    async fn delete(&self, id: &ReadingId) -> Result<(), StoreError> {
        let res = sqlx::query("delete from balance_snapshots where id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable("delete", e))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        debug!(id = %id, "balance reading deleted");
        Ok(())
    }

    async fn contains(&self, id: &ReadingId) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
            "select exists (select 1 from balance_snapshots where id = $1)",
        )
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unavailable("contains", e))?;
        Ok(exists)
    }
}
