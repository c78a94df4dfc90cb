pub mod config;
pub mod indicators;
pub mod registry;
pub mod variants;

pub use config::{ConfigOverrides, StrategyConfig, StrategyEntry, StrategyFileConfig};
pub use registry::StrategyKind;
pub use variants::{EmaGradient, Goliath, LocalExtrema, Momentum};

use chrono::{DateTime, TimeDelta, Utc};

use common::{BuyDecision, Candle, ExitReason, Position, SellDecision};

/// All strategy implementations must satisfy this trait.
///
/// Implementations hold no mutable state: identical inputs give identical
/// decisions, whether the caller is the backtester or the live loop. "Now" is
/// always `current.timestamp`.
pub trait Strategy: Send + Sync {
    fn config(&self) -> &StrategyConfig;

    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str {
        &self.config().name
    }

    fn instrument(&self) -> &str {
        &self.config().instrument
    }

    /// Fewest lookback candles `should_buy` can work with.
    fn min_lookback(&self) -> usize;

    /// Minimum time between a close and the next buy.
    fn cooldown(&self) -> TimeDelta;

    /// Entry decision over the trailing `lookback` (oldest first, excluding `current`).
    ///
    /// Returns `InsufficientData` when `lookback` is shorter than
    /// `min_lookback()`, and a hold while inside the cooldown window.
    fn should_buy(
        &self,
        lookback: &[Candle],
        current: &Candle,
        last_exit_time: Option<DateTime<Utc>>,
    ) -> BuyDecision;

    /// Exit decision for an open position. The first matching rule in the
    /// strategy's priority order wins.
    fn should_sell(&self, position: &Position, current: &Candle, lookback: &[Candle])
        -> SellDecision;
}

/// Insufficient-data and cooldown checks shared by every `should_buy`.
///
/// `Some(decision)` means the caller must return it without looking at indicators.
pub fn entry_gate(
    min_lookback: usize,
    cooldown: TimeDelta,
    lookback: &[Candle],
    current: &Candle,
    last_exit_time: Option<DateTime<Utc>>,
) -> Option<BuyDecision> {
    if lookback.len() < min_lookback {
        return Some(BuyDecision::InsufficientData {
            have: lookback.len(),
            need: min_lookback,
        });
    }
    if let Some(exit) = last_exit_time {
        let elapsed = current.timestamp - exit;
        if elapsed < cooldown {
            return Some(BuyDecision::hold(format!(
                "In cooldown: {}s since last exit, need {}s",
                elapsed.num_seconds(),
                cooldown.num_seconds()
            )));
        }
    }
    None
}

/// Percentage thresholds and hold limit used by the exit side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitRules {
    /// Loss, in percent, beyond which the position is cut (10.0 = -10%).
    pub stop_loss_pct: f64,
    /// Gain, in percent, beyond which profit is taken.
    pub take_profit_pct: f64,
    pub max_hold: TimeDelta,
}

impl ExitRules {
    pub fn stop_loss(&self, pnl_pct: f64) -> Option<SellDecision> {
        (pnl_pct < -self.stop_loss_pct).then(|| {
            SellDecision::exit(ExitReason::StopLoss, format!("Stop loss: {pnl_pct:.2}%"))
        })
    }

    pub fn take_profit(&self, pnl_pct: f64) -> Option<SellDecision> {
        (pnl_pct > self.take_profit_pct).then(|| {
            SellDecision::exit(ExitReason::TakeProfit, format!("Take profit: {pnl_pct:.2}%"))
        })
    }

    pub fn time_exit(&self, position: &Position, current: &Candle) -> Option<SellDecision> {
        let held = current.timestamp - position.entry_time;
        (held > self.max_hold).then(|| {
            SellDecision::exit(
                ExitReason::TimeExit,
                format!("Time exit: held {:.1} min", held.num_seconds() as f64 / 60.0),
            )
        })
    }

    /// Stop-loss, then take-profit, then max hold.
    pub fn evaluate(&self, position: &Position, current: &Candle) -> Option<SellDecision> {
        let pnl_pct = position.pnl_pct_at(current.close);
        self.stop_loss(pnl_pct)
            .or_else(|| self.take_profit(pnl_pct))
            .or_else(|| self.time_exit(position, current))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::{TimeDelta, TimeZone, Utc};

    use common::{Candle, Position};

    pub fn at(seconds: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + TimeDelta::seconds(seconds)
    }

    /// `closes[i]` at second `i`, with the given volume.
    pub fn series(closes: &[f64], volume: f64) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::flat(at(i as i64), c, volume))
            .collect()
    }

    pub fn candle(second: i64, close: f64, volume: f64) -> Candle {
        Candle::flat(at(second), close, volume)
    }

    pub fn open_position(entry_price: f64, entry_second: i64) -> Position {
        Position {
            id: 1,
            instrument: "TEST".into(),
            entry_price,
            entry_time: at(entry_second),
            size: 1.0,
            open_receipt: None,
            exit: None,
        }
    }
}
