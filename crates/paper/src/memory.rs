use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::{
    Candle, CandleSource, Error, NewPosition, Position, PositionExit, PositionStore, Result,
};

#[derive(Debug, Clone)]
struct Row {
    wallet: String,
    position: Position,
}

/// In-process position store and candle source.
///
/// Ids are allocated from 1 in insertion order. Used for paper runs without a
/// database and as the storage double in tests.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<Row>>,
    candles: RwLock<HashMap<String, Vec<Candle>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append candles for `instrument`. Callers keep them time-ordered.
    pub async fn add_candles(&self, instrument: &str, candles: impl IntoIterator<Item = Candle>) {
        self.candles
            .write()
            .await
            .entry(instrument.to_string())
            .or_default()
            .extend(candles);
    }

    /// Every position for `wallet`, open and closed, in insertion order.
    pub async fn positions(&self, wallet: &str) -> Vec<Position> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|r| r.wallet == wallet)
            .map(|r| r.position.clone())
            .collect()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn find_open_position(&self, wallet: &str, instrument: &str) -> Result<Option<Position>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .find(|r| r.wallet == wallet && r.position.instrument == instrument && r.position.is_open())
            .map(|r| r.position.clone()))
    }

    async fn insert_position(&self, new: &NewPosition) -> Result<i64> {
        let mut rows = self.rows.write().await;
        if rows
            .iter()
            .any(|r| r.wallet == new.wallet && r.position.instrument == new.instrument && r.position.is_open())
        {
            return Err(Error::InvariantViolation(format!(
                "{} already has an open position on {}",
                new.wallet, new.instrument
            )));
        }
        let id = rows.len() as i64 + 1;
        rows.push(Row {
            wallet: new.wallet.clone(),
            position: Position {
                id,
                instrument: new.instrument.clone(),
                entry_price: new.entry_price,
                entry_time: new.entry_time,
                size: new.size,
                open_receipt: new.open_receipt.clone(),
                exit: None,
            },
        });
        Ok(id)
    }

    async fn update_position_close(&self, id: i64, exit: &PositionExit) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|r| r.position.id == id)
            .ok_or_else(|| Error::InvariantViolation(format!("position {id} does not exist")))?;
        if !row.position.is_open() {
            return Err(Error::InvariantViolation(format!("position {id} is already closed")));
        }
        row.position.exit = Some(exit.clone());
        Ok(())
    }
}

#[async_trait]
impl CandleSource for MemoryStore {
    async fn recent_candles(&self, instrument: &str, count: usize) -> Result<Vec<Candle>> {
        let candles = self.candles.read().await;
        let series = candles.get(instrument).map(Vec::as_slice).unwrap_or_default();
        if series.len() < count {
            return Err(Error::InsufficientData {
                have: series.len(),
                need: count,
            });
        }
        Ok(series[series.len() - count..].to_vec())
    }

    async fn all_candles(&self, instrument: &str) -> Result<Vec<Candle>> {
        Ok(self
            .candles
            .read()
            .await
            .get(instrument)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};
    use common::ExitReason;

    fn new_position(wallet: &str) -> NewPosition {
        NewPosition {
            wallet: wallet.into(),
            instrument: "MINT".into(),
            entry_price: 1.5,
            entry_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            size: 2.0,
            open_receipt: Some("open-sig".into()),
        }
    }

    fn exit() -> PositionExit {
        PositionExit {
            price: 2.0,
            time: Utc.timestamp_opt(1_700_000_600, 0).unwrap(),
            reason: ExitReason::TakeProfit,
            pnl: 1.0,
            receipt: Some("close-sig".into()),
        }
    }

    #[tokio::test]
    async fn insert_find_close() {
        let store = MemoryStore::new();
        let id = store.insert_position(&new_position("w")).await.unwrap();
        assert_eq!(id, 1);

        let open = store.find_open_position("w", "MINT").await.unwrap().unwrap();
        assert_eq!(open.open_receipt.as_deref(), Some("open-sig"));
        assert!(store.find_open_position("other", "MINT").await.unwrap().is_none());

        store.update_position_close(id, &exit()).await.unwrap();
        assert!(store.find_open_position("w", "MINT").await.unwrap().is_none());
        assert_eq!(store.positions("w").await[0].pnl(), Some(1.0));
    }

    #[tokio::test]
    async fn second_open_row_is_rejected() {
        let store = MemoryStore::new();
        store.insert_position(&new_position("w")).await.unwrap();
        assert!(store.insert_position(&new_position("w")).await.is_err());
        // another wallet is independent
        assert_eq!(store.insert_position(&new_position("x")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn closing_twice_is_rejected() {
        let store = MemoryStore::new();
        let id = store.insert_position(&new_position("w")).await.unwrap();
        store.update_position_close(id, &exit()).await.unwrap();
        assert!(store.update_position_close(id, &exit()).await.is_err());
        assert!(store.update_position_close(99, &exit()).await.is_err());
    }

    #[tokio::test]
    async fn recent_candles_returns_the_tail() {
        let store = MemoryStore::new();
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        store
            .add_candles(
                "MINT",
                (0..5).map(|i| Candle::flat(t + TimeDelta::seconds(i), i as f64, 1.0)),
            )
            .await;

        let tail = store.recent_candles("MINT", 2).await.unwrap();
        assert_eq!(tail.iter().map(|c| c.close).collect::<Vec<_>>(), vec![3.0, 4.0]);
        assert!(matches!(
            store.recent_candles("MINT", 6).await,
            Err(Error::InsufficientData { have: 5, need: 6 })
        ));
        assert!(store.all_candles("OTHER").await.unwrap().is_empty());
    }
}
