use chrono::TimeDelta;

use common::Position;

/// Step-over-step equity returns. A zero equity point yields a zero return.
pub fn step_returns(equity_curve: &[f64]) -> Vec<f64> {
    if equity_curve.len() < 2 {
        return Vec::new();
    }
    equity_curve
        .windows(2)
        .map(|w| {
            if w[0] == 0.0 {
                0.0
            } else {
                (w[1] - w[0]) / w[0]
            }
        })
        .collect()
}

/// Mean step return over its population standard deviation, not annualised.
/// Zero when there are fewer than two equity points or no variation.
pub fn sharpe_ratio(equity_curve: &[f64]) -> f64 {
    let returns = step_returns(equity_curve);
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let std = std_dev(&returns);
    if std == 0.0 {
        return 0.0;
    }
    mean / std
}

/// Largest fractional decline from the running peak, in `[0, 1]`.
///
/// The peak starts at `initial_capital`, so a curve that only ever sits below
/// its starting capital still registers a drawdown.
pub fn max_drawdown(equity_curve: &[f64], initial_capital: f64) -> f64 {
    let mut peak = initial_capital;
    let mut max_dd = 0.0f64;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }
    max_dd.clamp(0.0, 1.0)
}

/// Winning (`pnl > 0`) over total closed trades, zero without trades.
pub fn win_rate(positions: &[Position]) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }
    let wins = positions
        .iter()
        .filter(|p| p.pnl().is_some_and(|pnl| pnl > 0.0))
        .count();
    wins as f64 / positions.len() as f64
}

/// Mean of `exit_time - entry_time` over closed positions.
pub fn avg_hold_time(positions: &[Position]) -> TimeDelta {
    let holds: Vec<TimeDelta> = positions
        .iter()
        .filter_map(|p| p.exit.as_ref().map(|e| e.time - p.entry_time))
        .collect();
    if holds.is_empty() {
        return TimeDelta::zero();
    }
    let total_ms: i64 = holds.iter().map(TimeDelta::num_milliseconds).sum();
    TimeDelta::milliseconds(total_ms / holds.len() as i64)
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
