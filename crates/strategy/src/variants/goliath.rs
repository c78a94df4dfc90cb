use chrono::{DateTime, TimeDelta, Utc};

use common::{BuyDecision, Candle, Position, SellDecision};

use crate::config::StrategyConfig;
use crate::indicators::sma;
use crate::{entry_gate, ExitRules, Strategy};

const MA_PERIOD: usize = 20;
const VOLUME_MULTIPLIER: f64 = 1.5;

/// Breakout on heavy volume: close above its 20-period average while volume
/// runs at more than 1.5x its own average.
pub struct Goliath {
    config: StrategyConfig,
    exits: ExitRules,
}

impl Goliath {
    pub fn default_config(instrument: &str) -> StrategyConfig {
        super::base_config("Goliath", instrument, 20, 0.5, 500)
    }

    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            exits: ExitRules {
                stop_loss_pct: 10.0,
                take_profit_pct: 20.0,
                max_hold: TimeDelta::hours(1),
            },
        }
    }
}

impl Strategy for Goliath {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn min_lookback(&self) -> usize {
        MA_PERIOD
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

        let closes: Vec<f64> = lookback.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = lookback.iter().map(|c| c.volume).collect();
        let (Some(ma), Some(avg_volume)) = (sma(&closes, MA_PERIOD), sma(&volumes, MA_PERIOD)) else {
            return BuyDecision::InsufficientData {
                have: lookback.len(),
                need: MA_PERIOD,
            };
        };

        let volume_floor = VOLUME_MULTIPLIER * avg_volume;
        if current.close > ma && current.volume > volume_floor {
            BuyDecision::buy(format!(
                "Price {:.6} > MA20 {ma:.6}, high volume {:.2} > {volume_floor:.2}",
                current.close, current.volume
            ))
        } else {
            BuyDecision::hold(format!(
                "No buy: price {:.6} vs MA20 {ma:.6}, volume {:.2} vs {volume_floor:.2}",
                current.close, current.volume
            ))
        }
    }

    fn should_sell(&self, position: &Position, current: &Candle, _lookback: &[Candle]) -> SellDecision {
        self.exits.evaluate(position, current).unwrap_or_else(|| {
            SellDecision::hold(format!("PnL: {:.2}%", position.pnl_pct_at(current.close)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use common::ExitReason;

    fn goliath() -> Goliath {
        Goliath::new(Goliath::default_config("MINT"))
    }

    #[test]
    fn holds_when_close_is_below_average() {
        let lookback = series(&[100.0; 20], 10.0);
        let d = goliath().should_buy(&lookback, &candle(20, 99.0, 100.0), None);
        assert!(matches!(d, BuyDecision::Hold { .. }));
    }

    #[test]
    fn buys_on_breakout_with_volume() {
        let lookback = series(&[100.0; 20], 10.0);
        let d = goliath().should_buy(&lookback, &candle(20, 101.0, 16.0), None);
        assert!(d.is_buy(), "{}", d.info());
    }

    #[test]
    fn volume_must_exceed_one_and_a_half_times_average() {
        let lookback = series(&[100.0; 20], 10.0);
        let d = goliath().should_buy(&lookback, &candle(20, 101.0, 15.0), None);
        assert!(!d.is_buy());
    }

    #[test]
    fn short_lookback_is_insufficient() {
        let lookback = series(&[100.0; 19], 10.0);
        let d = goliath().should_buy(&lookback, &candle(19, 101.0, 50.0), None);
        assert_eq!(d, BuyDecision::InsufficientData { have: 19, need: 20 });
    }

    #[test]
    fn cooldown_blocks_a_buy_signal() {
        let lookback = series(&[100.0; 20], 10.0);
        let current = candle(600, 101.0, 50.0);
        assert!(!goliath().should_buy(&lookback, &current, Some(at(400))).is_buy());
        assert!(goliath().should_buy(&lookback, &current, Some(at(300))).is_buy());
    }

    #[test]
    fn decisions_are_repeatable() {
        let s = goliath();
        let lookback = series(&[100.0; 20], 10.0);
        let current = candle(20, 101.0, 16.0);
        assert_eq!(
            s.should_buy(&lookback, &current, None),
            s.should_buy(&lookback, &current, None)
        );
    }

    #[test]
    fn exits_follow_priority() {
        let s = goliath();
        let position = open_position(100.0, 0);
        let sl = s.should_sell(&position, &candle(60, 89.0, 1.0), &[]);
        assert_eq!(sl.reason(), Some(ExitReason::StopLoss));
        let tp = s.should_sell(&position, &candle(60, 121.0, 1.0), &[]);
        assert_eq!(tp.reason(), Some(ExitReason::TakeProfit));
        let time = s.should_sell(&position, &candle(3601, 100.0, 1.0), &[]);
        assert_eq!(time.reason(), Some(ExitReason::TimeExit));
        let hold = s.should_sell(&position, &candle(60, 105.0, 1.0), &[]);
        assert!(!hold.should_sell());
    }
}
