use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::core::orchestrator::PointSink;
use crate::core::seeder;
use crate::models::DataPoint;
use crate::reference::StaticReference;

/// Opens the pool, runs migrations and seeds the reference tables.
pub async fn init(database_url: &str) -> Result<SqlitePool> {
    tracing::info!(database_url, "connecting to SQLite");

    // Every connection to ":memory:" is a fresh database.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;

    sqlx::migrate!("./migrations").run(&pool).await.context("running migrations")?;
    seeder::seed_reference(&pool, &StaticReference).await?;

    tracing::info!("database initialized");
    Ok(pool)
}

/// [`PointSink`] that upserts into `data_points`.
#[derive(Clone)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PointSink for SqliteSink {
    async fn accept(&self, points: &[DataPoint]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for point in points {
            let result = sqlx::query(
                "INSERT INTO data_points (ba_name, fuel_name, gen_mw, timestamp, freq, market)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (ba_name, fuel_name, timestamp, market) DO UPDATE
                 SET gen_mw = EXCLUDED.gen_mw,
                     freq = EXCLUDED.freq,
                     fetched_at = CURRENT_TIMESTAMP",
            )
            .bind(&point.ba_name)
            .bind(&point.fuel_name)
            .bind(point.gen_mw)
            .bind(point.timestamp)
            .bind(point.freq.code())
            .bind(point.market.code())
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(written)
    }
}

/// Stored span per BA and market.
#[derive(Debug, Clone, PartialEq)]
pub struct Coverage {
    pub ba_name: String,
    pub market: String,
    pub points: i64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

pub async fn coverage(pool: &SqlitePool) -> Result<Vec<Coverage>> {
    let rows = sqlx::query(
        "SELECT ba_name, market, COUNT(*) AS points, MIN(timestamp) AS first, MAX(timestamp) AS last
         FROM data_points
         GROUP BY ba_name, market
         ORDER BY ba_name, market",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<Coverage> {
            Ok(Coverage {
                ba_name: row.try_get("ba_name")?,
                market: row.try_get("market")?,
                points: row.try_get("points")?,
                first: row.try_get("first")?,
                last: row.try_get("last")?,
            })
        })
        .collect()
}
