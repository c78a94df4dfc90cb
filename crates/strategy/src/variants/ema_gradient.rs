use chrono::{DateTime, TimeDelta, Utc};

use common::{BuyDecision, Candle, ExitReason, Position, SellDecision};

use crate::config::StrategyConfig;
use crate::indicators::ema_gradient;
use crate::{entry_gate, ExitRules, Strategy};

const EMA_PERIOD: usize = 20;
const GRADIENT_THRESHOLD: f64 = 0.001;

/// Trend follower on the slope of a 20-period EMA.
pub struct EmaGradient {
    config: StrategyConfig,
    exits: ExitRules,
}

impl EmaGradient {
    pub fn default_config(instrument: &str) -> StrategyConfig {
        super::base_config("EMA Gradient", instrument, 50, 0.4, 400)
    }

    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            exits: ExitRules {
                stop_loss_pct: 5.0,
                take_profit_pct: 10.0,
                max_hold: TimeDelta::minutes(45),
            },
        }
    }

    /// Gradient over `lookback + current`. Zero when it cannot be computed.
    fn gradient(lookback: &[Candle], current: &Candle) -> f64 {
        let closes: Vec<f64> = lookback
            .iter()
            .map(|c| c.close)
            .chain(std::iter::once(current.close))
            .collect();
        ema_gradient(&closes, EMA_PERIOD).unwrap_or(0.0)
    }
}

impl Strategy for EmaGradient {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn min_lookback(&self) -> usize {
        EMA_PERIOD + 2
    }

    fn cooldown(&self) -> TimeDelta {
        TimeDelta::minutes(5)
    }

    fn should_buy(
        &self,
        lookback: &[Candle],
        current: &Candle,
        last_exit_time: Option<DateTime<Utc>>,
    ) -> BuyDecision {
        if let Some(gate) = entry_gate(
            self.min_lookback(),
            self.cooldown(),
            lookback,
            current,
            last_exit_time,
        ) {
            return gate;
        }

        let gradient = Self::gradient(lookback, current);
        if gradient > GRADIENT_THRESHOLD {
            BuyDecision::buy(format!(
                "EMA gradient {gradient:.4} (threshold {GRADIENT_THRESHOLD})"
            ))
        } else {
            BuyDecision::hold(format!(
                "No buy: EMA gradient {gradient:.4} (threshold {GRADIENT_THRESHOLD})"
            ))
        }
    }

    /// Stop-loss, take-profit, a turned-down EMA, then max hold.
    fn should_sell(&self, position: &Position, current: &Candle, lookback: &[Candle]) -> SellDecision {
        let pnl_pct = position.pnl_pct_at(current.close);
        if let Some(exit) = self
            .exits
            .stop_loss(pnl_pct)
            .or_else(|| self.exits.take_profit(pnl_pct))
        {
            return exit;
        }

        let gradient = Self::gradient(lookback, current);
        if gradient < -GRADIENT_THRESHOLD {
            return SellDecision::exit(
                ExitReason::EmaGradientNegative,
                format!("EMA gradient negative: {gradient:.4}"),
            );
        }

        self.exits.time_exit(position, current).unwrap_or_else(|| {
            SellDecision::hold(format!("PnL: {pnl_pct:.2}%, EMA gradient: {gradient:.4}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn ema() -> EmaGradient {
        EmaGradient::new(EmaGradient::default_config("MINT"))
    }

    fn trend(start: f64, step: f64) -> Vec<Candle> {
        let closes: Vec<f64> = (0..50).map(|i| start + step * i as f64).collect();
        series(&closes, 1.0)
    }

    #[test]
    fn buys_on_rising_ema() {
        let d = ema().should_buy(&trend(100.0, 1.0), &candle(50, 150.0, 1.0), None);
        assert!(d.is_buy(), "{}", d.info());
    }

    #[test]
    fn flat_ema_holds() {
        let lookback = series(&[100.0; 50], 1.0);
        let d = ema().should_buy(&lookback, &candle(50, 100.0, 1.0), None);
        assert!(matches!(d, BuyDecision::Hold { .. }));
    }

    #[test]
    fn needs_period_plus_two_candles() {
        let lookback = series(&[100.0; 21], 1.0);
        let d = ema().should_buy(&lookback, &candle(21, 100.0, 1.0), None);
        assert_eq!(d, BuyDecision::InsufficientData { have: 21, need: 22 });
    }

    #[test]
    fn sells_when_ema_turns_down() {
        let position = open_position(100.0, 0);
        let d = ema().should_sell(&position, &candle(50, 100.0, 1.0), &trend(125.0, -0.5));
        assert_eq!(d.reason(), Some(ExitReason::EmaGradientNegative));
    }

    #[test]
    fn price_exits_outrank_gradient() {
        let position = open_position(100.0, 0);
        let d = ema().should_sell(&position, &candle(50, 94.0, 1.0), &trend(125.0, -0.5));
        assert_eq!(d.reason(), Some(ExitReason::StopLoss));
    }

    #[test]
    fn gradient_outranks_time_exit() {
        let position = open_position(100.0, 0);
        let d = ema().should_sell(&position, &candle(5000, 100.0, 1.0), &trend(125.0, -0.5));
        assert_eq!(d.reason(), Some(ExitReason::EmaGradientNegative));

        let flat = series(&[100.0; 50], 1.0);
        let d = ema().should_sell(&position, &candle(2701, 100.0, 1.0), &flat);
        assert_eq!(d.reason(), Some(ExitReason::TimeExit));
    }
}
