use chrono::{DateTime, TimeDelta, Utc};

use common::{BuyDecision, Candle, ExitReason, Position, SellDecision};

use crate::config::StrategyConfig;
use crate::indicators::{is_local_maximum, is_local_minimum};
use crate::{entry_gate, ExitRules, Strategy};

/// Minimum relative distance from the neighbours' average for interior extrema.
const MIN_PRICE_CHANGE: f64 = 0.01;

/// Buys local minima of the close series and sells local maxima.
pub struct LocalExtrema {
    config: StrategyConfig,
    exits: ExitRules,
}

impl LocalExtrema {
    pub fn default_config(instrument: &str) -> StrategyConfig {
        super::base_config("Local Extrema", instrument, 20, 0.3, 300)
    }

    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            exits: ExitRules {
                stop_loss_pct: 5.0,
                take_profit_pct: 10.0,
                max_hold: TimeDelta::hours(2),
            },
        }
    }
}

fn closes_with_current(lookback: &[Candle], current: &Candle) -> Vec<f64> {
    lookback
        .iter()
        .map(|c| c.close)
        .chain(std::iter::once(current.close))
        .collect()
}

impl Strategy for LocalExtrema {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Two lookback closes plus the current one form the shortest series with extrema.
    fn min_lookback(&self) -> usize {
        2
    }

    fn cooldown(&self) -> TimeDelta {
        TimeDelta::minutes(10)
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

        let prices = closes_with_current(lookback, current);
        if is_local_minimum(&prices, prices.len() - 1, MIN_PRICE_CHANGE) {
            BuyDecision::buy(format!("Local minimum detected at {:.6}", current.close))
        } else {
            BuyDecision::hold("No local minimum detected")
        }
    }

    fn should_sell(&self, position: &Position, current: &Candle, lookback: &[Candle]) -> SellDecision {
        if !lookback.is_empty() {
            let prices = closes_with_current(lookback, current);
            if is_local_maximum(&prices, prices.len() - 1, MIN_PRICE_CHANGE) {
                return SellDecision::exit(
                    ExitReason::LocalMaximum,
                    format!("Local maximum detected at {:.6}", current.close),
                );
            }
        }

        self.exits.evaluate(position, current).unwrap_or_else(|| {
            SellDecision::hold(format!(
                "Holding position, PnL: {:.2}%",
                position.pnl_pct_at(current.close)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn extrema() -> LocalExtrema {
        LocalExtrema::new(LocalExtrema::default_config("MINT"))
    }

    #[test]
    fn buys_at_a_fresh_low() {
        let lookback = series(&[10.0, 9.5, 9.0], 1.0);
        let d = extrema().should_buy(&lookback, &candle(3, 8.8, 1.0), None);
        assert!(d.is_buy(), "{}", d.info());
    }

    #[test]
    fn rising_close_is_not_a_minimum() {
        let lookback = series(&[10.0, 9.5, 9.0], 1.0);
        let d = extrema().should_buy(&lookback, &candle(3, 9.2, 1.0), None);
        assert!(matches!(d, BuyDecision::Hold { .. }));
    }

    #[test]
    fn needs_two_lookback_candles() {
        let lookback = series(&[10.0], 1.0);
        let d = extrema().should_buy(&lookback, &candle(1, 9.0, 1.0), None);
        assert_eq!(d, BuyDecision::InsufficientData { have: 1, need: 2 });
    }

    #[test]
    fn cooldown_is_ten_minutes() {
        let lookback = series(&[10.0, 9.5, 9.0], 1.0);
        let current = candle(1200, 8.8, 1.0);
        assert!(!extrema().should_buy(&lookback, &current, Some(at(601))).is_buy());
        assert!(extrema().should_buy(&lookback, &current, Some(at(600))).is_buy());
    }

    #[test]
    fn local_maximum_outranks_stop_loss() {
        let position = open_position(100.0, 0);
        let lookback = series(&[90.0, 85.0, 88.0], 1.0);
        let d = extrema().should_sell(&position, &candle(3, 89.0, 1.0), &lookback);
        assert_eq!(d.reason(), Some(ExitReason::LocalMaximum));
    }

    #[test]
    fn falls_back_to_exit_rules_without_a_maximum() {
        let position = open_position(100.0, 0);
        let lookback = series(&[96.0, 95.0, 94.5], 1.0);
        let d = extrema().should_sell(&position, &candle(3, 94.0, 1.0), &lookback);
        assert_eq!(d.reason(), Some(ExitReason::StopLoss));

        let d = extrema().should_sell(&position, &candle(7201, 99.0, 1.0), &[]);
        assert_eq!(d.reason(), Some(ExitReason::TimeExit));

        let d = extrema().should_sell(&position, &candle(60, 99.5, 1.0), &series(&[100.0, 99.9], 1.0));
        assert!(!d.should_sell());
    }
}
