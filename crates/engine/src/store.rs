use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use common::{Error, Interval, Result, TradeRecord, TradeStore, TradingMode};

/// Completed trades persisted to SQLite (table `trades`).
#[derive(Debug, Clone)]
pub struct SqliteTradeStore {
    db: SqlitePool,
}

impl SqliteTradeStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open `url` and apply the bundled migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let db = SqlitePoolOptions::new()
            // an in-memory database lives and dies with its one connection
            .max_connections(if url.contains(":memory:") { 1 } else { 5 })
            .connect(url)
            .await?;
        sqlx::migrate!("../../migrations")
            .run(&db)
            .await
            .map_err(|e| Error::Other(format!("database migration failed: {e}")))?;
        info!("Trade store ready");
        Ok(Self::new(db))
    }
}

#[async_trait]
impl TradeStore for SqliteTradeStore {
    async fn save(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, contract_label, interval_secs, is_long, entry_price, exit_price,
                units, profit, stop_hit, confidence, mode, opened_at, closed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.contract_label)
        .bind(record.interval.as_secs())
        .bind(record.is_long)
        .bind(record.entry_price)
        .bind(record.exit_price)
        .bind(record.units)
        .bind(record.profit)
        .bind(record.stop_hit)
        .bind(record.confidence)
        .bind(record.mode)
        .bind(record.opened_at.to_rfc3339())
        .bind(record.closed_at.to_rfc3339())
        .execute(&self.db)
        .await?;

        debug!(id = %record.id, contract = %record.contract_label, "Trade record saved");
        Ok(())
    }

    async fn query(&self, contract_label: Option<&str>, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, contract_label, interval_secs, is_long, entry_price, exit_price,
                   units, profit, stop_hit, confidence, mode, opened_at, closed_at
            FROM trades
            WHERE (?1 IS NULL OR contract_label = ?1)
            ORDER BY closed_at DESC
            LIMIT ?2
            "#,
        )
        .bind(contract_label)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<TradeRecord> {
    Ok(TradeRecord {
        id: row.try_get("id")?,
        contract_label: row.try_get("contract_label")?,
        interval: Interval::from_secs(row.try_get("interval_secs")?),
        is_long: row.try_get("is_long")?,
        entry_price: row.try_get("entry_price")?,
        exit_price: row.try_get("exit_price")?,
        units: row.try_get("units")?,
        profit: row.try_get("profit")?,
        stop_hit: row.try_get("stop_hit")?,
        confidence: row.try_get("confidence")?,
        mode: row.try_get::<TradingMode, _>("mode")?,
        opened_at: parse_time(row.try_get("opened_at")?)?,
        closed_at: parse_time(row.try_get("closed_at")?)?,
    })
}

fn parse_time(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad timestamp '{raw}': {e}")))
}
