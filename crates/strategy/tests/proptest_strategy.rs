use chrono::{TimeDelta, TimeZone, Utc};
use proptest::prelude::*;

use common::{Candle, ExitReason, Position};
use strategy::StrategyKind;

fn candles(closes: &[f64], volumes: &[f64]) -> Vec<Candle> {
    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    closes
        .iter()
        .zip(volumes)
        .enumerate()
        .map(|(i, (&c, &v))| Candle::flat(start + TimeDelta::minutes(i as i64), c, v))
        .collect()
}

fn kind() -> impl Strategy<Value = StrategyKind> {
    prop::sample::select(StrategyKind::ALL.to_vec())
}

proptest! {
    /// Same inputs, same decision, for every strategy.
    #[test]
    fn buy_decisions_are_idempotent(
        kind in kind(),
        closes in prop::collection::vec(0.01f64..1_000.0, 60),
        volumes in prop::collection::vec(0.0f64..1_000.0, 60),
    ) {
        let s = kind.build(kind.default_config("MINT")).unwrap();
        let all = candles(&closes, &volumes);
        let (lookback, current) = all.split_at(all.len() - 1);
        let lookback = &lookback[lookback.len() - s.config().lookback..];
        let first = s.should_buy(lookback, &current[0], None);
        let second = s.should_buy(lookback, &current[0], None);
        prop_assert_eq!(first, second);
    }

    /// No strategy buys while the cooldown window is still open.
    #[test]
    fn never_buys_inside_cooldown(
        kind in kind(),
        closes in prop::collection::vec(0.01f64..1_000.0, 60),
        volumes in prop::collection::vec(0.0f64..1_000.0, 60),
        since_exit_secs in 0i64..600,
    ) {
        let s = kind.build(kind.default_config("MINT")).unwrap();
        prop_assume!(since_exit_secs < s.cooldown().num_seconds());
        let all = candles(&closes, &volumes);
        let (lookback, current) = all.split_at(all.len() - 1);
        let last_exit = current[0].timestamp - TimeDelta::seconds(since_exit_secs);
        prop_assert!(!s.should_buy(lookback, &current[0], Some(last_exit)).is_buy());
    }

    /// A close below every strategy's stop-loss line never yields a take-profit or time exit.
    #[test]
    fn deep_losses_exit_as_stop_loss(
        kind in prop::sample::select(vec![
            StrategyKind::Goliath,
            StrategyKind::Momentum,
            StrategyKind::EmaGradient,
        ]),
        entry in 1.0f64..1_000.0,
        held_minutes in 0i64..1_000,
    ) {
        let s = kind.build(kind.default_config("MINT")).unwrap();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let position = Position {
            id: 1,
            instrument: "MINT".into(),
            entry_price: entry,
            entry_time: start,
            size: 1.0,
            open_receipt: None,
            exit: None,
        };
        let current = Candle::flat(start + TimeDelta::minutes(held_minutes), entry * 0.5, 1.0);
        let d = s.should_sell(&position, &current, &[]);
        prop_assert_eq!(d.reason(), Some(ExitReason::StopLoss));
    }
}
