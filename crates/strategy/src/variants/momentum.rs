use chrono::{DateTime, TimeDelta, Utc};

use common::{BuyDecision, Candle, Position, SellDecision};

use crate::config::StrategyConfig;
use crate::indicators::{sma, RsiIndicator};
use crate::{entry_gate, ExitRules, Strategy};

const VOLUME_PERIOD: usize = 20;
const RSI_PERIOD: usize = 14;
const MIN_PRICE_MOMENTUM_PCT: f64 = 2.0;
const MIN_VOLUME_MOMENTUM_PCT: f64 = 50.0;

/// Price and volume momentum, filtered by RSI so overbought moves are skipped.
pub struct Momentum {
    config: StrategyConfig,
    rsi: RsiIndicator,
    exits: ExitRules,
}

impl Momentum {
    pub fn default_config(instrument: &str) -> StrategyConfig {
        super::base_config("Momentum", instrument, 20, 0.4, 400)
    }

    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            rsi: RsiIndicator::new(RSI_PERIOD, 70.0),
            exits: ExitRules {
                stop_loss_pct: 8.0,
                take_profit_pct: 15.0,
                max_hold: TimeDelta::minutes(30),
            },
        }
    }
}

impl Strategy for Momentum {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn min_lookback(&self) -> usize {
        VOLUME_PERIOD
    }

    fn cooldown(&self) -> TimeDelta {
        TimeDelta::minutes(3)
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

        // Momentum is measured against the second-to-last lookback close.
        let reference = lookback[lookback.len() - 2].close;
        if reference == 0.0 {
            return BuyDecision::hold("No buy: reference close is zero");
        }
        let price_momentum = (current.close - reference) / reference * 100.0;

        let volumes: Vec<f64> = lookback.iter().map(|c| c.volume).collect();
        let avg_volume = sma(&volumes, VOLUME_PERIOD).unwrap_or(0.0);
        if avg_volume == 0.0 {
            return BuyDecision::hold("No buy: average volume is zero");
        }
        let volume_momentum = (current.volume - avg_volume) / avg_volume * 100.0;

        // RSI covers the lookback only; the current candle's move is judged by momentum.
        let closes: Vec<f64> = lookback.iter().map(|c| c.close).collect();
        let Some(rsi) = self.rsi.compute_latest(&closes) else {
            return BuyDecision::InsufficientData {
                have: lookback.len(),
                need: RSI_PERIOD + 1,
            };
        };

        let summary = format!(
            "price momentum {price_momentum:.2}%, volume momentum {volume_momentum:.2}%, RSI {rsi:.1}"
        );
        if price_momentum > MIN_PRICE_MOMENTUM_PCT
            && volume_momentum > MIN_VOLUME_MOMENTUM_PCT
            && !self.rsi.is_overbought(rsi)
        {
            BuyDecision::buy(summary)
        } else {
            BuyDecision::hold(format!("No buy: {summary}"))
        }
    }

    fn should_sell(&self, position: &Position, current: &Candle, _lookback: &[Candle]) -> SellDecision {
        self.exits.evaluate(position, current).unwrap_or_else(|| {
            SellDecision::hold(format!("PnL: {:.2}%", position.pnl_pct_at(current.close)))
        })
    }
}
