use async_trait::async_trait;

use crate::{Candle, NewPosition, Position, PositionExit, Result};

/// Position records, keyed by wallet and instrument.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// The OPEN position for `(wallet, instrument)`, if any.
    async fn find_open_position(&self, wallet: &str, instrument: &str) -> Result<Option<Position>>;

    /// Record a freshly opened position and return its id.
    async fn insert_position(&self, position: &NewPosition) -> Result<i64>;

    /// Mark position `id` CLOSED with the given exit fields.
    async fn update_position_close(&self, id: i64, exit: &PositionExit) -> Result<()>;
}

/// Time-ordered candles for an instrument, oldest first.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// The `count` most recent candles. Fewer available is `Error::InsufficientData`.
    async fn recent_candles(&self, instrument: &str, count: usize) -> Result<Vec<Candle>>;

    /// Every stored candle for the instrument.
    async fn all_candles(&self, instrument: &str) -> Result<Vec<Candle>>;
}
