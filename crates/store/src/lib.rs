//! SQLite persistence for positions and candles.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use common::{
    Candle, CandleSource, Error, ExitReason, NewPosition, Position, PositionExit, PositionStatus,
    PositionStore, Result,
};

pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db = SqlitePool::connect_with(options).await?;
        Self::migrated(db).await
    }

    /// A private in-memory database. Single connection, so every query sees
    /// the same data.
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrated(db).await
    }

    async fn migrated(db: SqlitePool) -> Result<Self> {
        sqlx::migrate!("../../migrations").run(&db).await?;
        info!("Database ready");
        Ok(Self { db })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Upsert candles for `instrument`; a row with the same timestamp is replaced.
    pub async fn insert_candles(&self, instrument: &str, candles: &[Candle]) -> Result<usize> {
        let mut tx = self.db.begin().await?;
        for c in candles {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO candles (instrument, ts_ms, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(instrument)
            .bind(c.timestamp.timestamp_millis())
            .bind(c.open)
            .bind(c.high)
            .bind(c.low)
            .bind(c.close)
            .bind(c.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(instrument, count = candles.len(), "Stored candles");
        Ok(candles.len())
    }

    /// Every position for `wallet`, oldest first.
    pub async fn positions(&self, wallet: &str) -> Result<Vec<Position>> {
        let rows: Vec<PositionRow> = sqlx::query_as(
            r#"
            SELECT id, instrument, entry_price, entry_time, size, open_receipt,
                   exit_price, exit_time, exit_reason, pnl, close_receipt
            FROM positions WHERE wallet = ?1 ORDER BY id
            "#,
        )
        .bind(wallet)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(PositionRow::into_position).collect()
    }
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    id: i64,
    instrument: String,
    entry_price: f64,
    entry_time: String,
    size: f64,
    open_receipt: Option<String>,
    exit_price: Option<f64>,
    exit_time: Option<String>,
    exit_reason: Option<ExitReason>,
    pnl: Option<f64>,
    close_receipt: Option<String>,
}

impl PositionRow {
    fn into_position(self) -> Result<Position> {
        let exit = match (self.exit_price, self.exit_time, self.exit_reason, self.pnl) {
            (Some(price), Some(time), Some(reason), Some(pnl)) => Some(PositionExit {
                price,
                time: parse_time(&time)?,
                reason,
                pnl,
                receipt: self.close_receipt,
            }),
            (None, None, None, None) => None,
            _ => {
                return Err(Error::InvariantViolation(format!(
                    "position {} has partial exit fields",
                    self.id
                )))
            }
        };
        Ok(Position {
            id: self.id,
            instrument: self.instrument,
            entry_price: self.entry_price,
            entry_time: parse_time(&self.entry_time)?,
            size: self.size,
            open_receipt: self.open_receipt,
            exit,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CandleRow {
    ts_ms: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl TryFrom<CandleRow> for Candle {
    type Error = Error;

    fn try_from(row: CandleRow) -> Result<Self> {
        let timestamp = DateTime::from_timestamp_millis(row.ts_ms).ok_or_else(|| {
            Error::Database(sqlx::Error::Decode(
                format!("candle timestamp {} out of range", row.ts_ms).into(),
            ))
        })?;
        Ok(Candle {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        })
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Database(sqlx::Error::Decode(Box::new(e))))
}

#[async_trait]
impl PositionStore for SqliteStore {
    async fn find_open_position(&self, wallet: &str, instrument: &str) -> Result<Option<Position>> {
        let row: Option<PositionRow> = sqlx::query_as(
            r#"
            SELECT id, instrument, entry_price, entry_time, size, open_receipt,
                   exit_price, exit_time, exit_reason, pnl, close_receipt
            FROM positions
            WHERE wallet = ?1 AND instrument = ?2 AND status = ?3
            "#,
        )
        .bind(wallet)
        .bind(instrument)
        .bind(PositionStatus::Open)
        .fetch_optional(&self.db)
        .await?;
        row.map(PositionRow::into_position).transpose()
    }

    async fn insert_position(&self, new: &NewPosition) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO positions (wallet, instrument, status, entry_price, entry_time, size, open_receipt)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&new.wallet)
        .bind(&new.instrument)
        .bind(PositionStatus::Open)
        .bind(new.entry_price)
        .bind(new.entry_time.to_rfc3339())
        .bind(new.size)
        .bind(&new.open_receipt)
        .execute(&self.db)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::InvariantViolation(format!(
                    "{} already has an open position on {}",
                    new.wallet, new.instrument
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_position_close(&self, id: i64, exit: &PositionExit) -> Result<()> {
        let done = sqlx::query(
            r#"
            UPDATE positions
            SET status = ?1, exit_price = ?2, exit_time = ?3, exit_reason = ?4,
                pnl = ?5, close_receipt = ?6
            WHERE id = ?7 AND status = ?8
            "#,
        )
        .bind(PositionStatus::Closed)
        .bind(exit.price)
        .bind(exit.time.to_rfc3339())
        .bind(exit.reason)
        .bind(exit.pnl)
        .bind(&exit.receipt)
        .bind(id)
        .bind(PositionStatus::Open)
        .execute(&self.db)
        .await?;

        if done.rows_affected() == 0 {
            return Err(Error::InvariantViolation(format!(
                "position {id} is not open"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CandleSource for SqliteStore {
    async fn recent_candles(&self, instrument: &str, count: usize) -> Result<Vec<Candle>> {
        let rows: Vec<CandleRow> = sqlx::query_as(
            r#"
            SELECT ts_ms, open, high, low, close, volume
            FROM candles WHERE instrument = ?1
            ORDER BY ts_ms DESC LIMIT ?2
            "#,
        )
        .bind(instrument)
        .bind(count as i64)
        .fetch_all(&self.db)
        .await?;

        if rows.len() < count {
            return Err(Error::InsufficientData {
                have: rows.len(),
                need: count,
            });
        }
        rows.into_iter().rev().map(Candle::try_from).collect()
    }

    async fn all_candles(&self, instrument: &str) -> Result<Vec<Candle>> {
        let rows: Vec<CandleRow> = sqlx::query_as(
            r#"
            SELECT ts_ms, open, high, low, close, volume
            FROM candles WHERE instrument = ?1
            ORDER BY ts_ms
            "#,
        )
        .bind(instrument)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(Candle::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + TimeDelta::seconds(seconds)
    }

    fn new_position(wallet: &str) -> NewPosition {
        NewPosition {
            wallet: wallet.into(),
            instrument: "MINT".into(),
            entry_price: 1.25,
            entry_time: t(0),
            size: 3.0,
            open_receipt: Some("open-sig".into()),
        }
    }

    #[tokio::test]
    async fn position_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.insert_position(&new_position("w")).await.unwrap();

        let open = store.find_open_position("w", "MINT").await.unwrap().unwrap();
        assert_eq!(open.id, id);
        assert_eq!(open.entry_time, t(0));
        assert!(open.is_open());

        let exit = PositionExit {
            price: 1.0,
            time: t(600),
            reason: ExitReason::StopLoss,
            pnl: -0.75,
            receipt: Some("close-sig".into()),
        };
        store.update_position_close(id, &exit).await.unwrap();
        assert!(store.find_open_position("w", "MINT").await.unwrap().is_none());

        let all = store.positions("w").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].exit.as_ref(), Some(&exit));
        assert_eq!(all[0].status(), PositionStatus::Closed);
    }

    #[tokio::test]
    async fn one_open_row_per_wallet_and_instrument() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.insert_position(&new_position("w")).await.unwrap();
        assert!(matches!(
            store.insert_position(&new_position("w")).await,
            Err(Error::InvariantViolation(_))
        ));
        store.insert_position(&new_position("other")).await.unwrap();

        let exit = PositionExit {
            price: 2.0,
            time: t(60),
            reason: ExitReason::TakeProfit,
            pnl: 2.25,
            receipt: None,
        };
        store.update_position_close(id, &exit).await.unwrap();
        // closing twice is refused, reopening after the close is fine
        assert!(matches!(
            store.update_position_close(id, &exit).await,
            Err(Error::InvariantViolation(_))
        ));
        store.insert_position(&new_position("w")).await.unwrap();
    }

    #[tokio::test]
    async fn recent_candles_are_oldest_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        let candles: Vec<Candle> = (0..5).map(|i| Candle::flat(t(i * 60), i as f64, 1.0)).collect();
        assert_eq!(store.insert_candles("MINT", &candles).await.unwrap(), 5);

        let tail = store.recent_candles("MINT", 3).await.unwrap();
        assert_eq!(tail.iter().map(|c| c.close).collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
        assert_eq!(tail[0].timestamp, t(120));

        assert!(matches!(
            store.recent_candles("MINT", 6).await,
            Err(Error::InsufficientData { have: 5, need: 6 })
        ));
        assert_eq!(store.all_candles("MINT").await.unwrap(), candles);
        assert!(store.all_candles("NONE").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn candle_upsert_replaces_same_timestamp() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_candles("MINT", &[Candle::flat(t(0), 1.0, 1.0)]).await.unwrap();
        store.insert_candles("MINT", &[Candle::flat(t(0), 2.0, 1.0)]).await.unwrap();
        let all = store.all_candles("MINT").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].close, 2.0);
    }
}
