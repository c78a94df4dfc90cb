use chrono::{TimeDelta, TimeZone, Utc};
use proptest::prelude::*;

use backtest::metrics::{max_drawdown, sharpe_ratio};
use backtest::Backtester;
use common::Candle;
use strategy::StrategyKind;

proptest! {
    #[test]
    fn drawdown_stays_in_unit_interval(
        curve in prop::collection::vec(-1_000.0f64..10_000.0, 0..200),
        capital in 1.0f64..10_000.0,
    ) {
        let dd = max_drawdown(&curve, capital);
        prop_assert!((0.0..=1.0).contains(&dd));
    }

    #[test]
    fn non_decreasing_curve_has_no_drawdown(
        steps in prop::collection::vec(0.0f64..100.0, 1..100),
        capital in 1.0f64..10_000.0,
    ) {
        let mut curve = vec![capital];
        for s in steps {
            let last = curve[curve.len() - 1];
            curve.push(last + s);
        }
        prop_assert_eq!(max_drawdown(&curve, capital), 0.0);
    }

    #[test]
    fn sharpe_is_finite(curve in prop::collection::vec(1.0f64..10_000.0, 0..100)) {
        prop_assert!(sharpe_ratio(&curve).is_finite());
    }

    /// Every strategy, on any price path, yields an equity curve one point
    /// longer than its timestamps and closes everything it opened.
    #[test]
    fn equity_curve_length_invariant(
        kind in prop::sample::select(StrategyKind::ALL.to_vec()),
        closes in prop::collection::vec(0.5f64..2.0, 60..160),
        volumes in prop::collection::vec(0.0f64..100.0, 160),
    ) {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let candles: Vec<Candle> = closes
            .iter()
            .zip(&volumes)
            .enumerate()
            .map(|(i, (&c, &v))| Candle::flat(start + TimeDelta::minutes(i as i64), c, v))
            .collect();

        let strategy = kind.build(kind.default_config("MINT")).unwrap();
        let result = Backtester::new(strategy, 1000.0).run(&candles).unwrap();

        prop_assert_eq!(result.equity_curve.len(), result.timestamps.len() + 1);
        prop_assert!(result.positions.iter().all(|p| p.exit.is_some()));
        prop_assert_eq!(
            result.total_trades,
            result.winning_trades + result.losing_trades
                + result.positions.iter().filter(|p| p.pnl() == Some(0.0)).count()
        );
        prop_assert!((0.0..=1.0).contains(&result.max_drawdown));
    }
}
