/// Exponential moving average series over `closes` (oldest first).
///
/// Seeded with the SMA of the first `period` values, one output per input
/// from index `period - 1` on. Empty when there are fewer than `period` values.
pub fn ema_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = closes[..period].iter().sum::<f64>() / period as f64;

    let mut series = Vec::with_capacity(closes.len() - period + 1);
    series.push(seed);
    let mut ema = seed;
    for &price in &closes[period..] {
        ema = price * k + ema * (1.0 - k);
        series.push(ema);
    }
    series
}

/// Relative change of the last two EMA values: `(ema[-1] - ema[-2]) / ema[-2]`.
///
/// `None` with fewer than `period + 2` closes or a zero previous EMA.
pub fn ema_gradient(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 2 {
        return None;
    }
    let series = ema_series(closes, period);
    let n = series.len();
    if n < 2 || series[n - 2] == 0.0 {
        return None;
    }
    Some((series[n - 1] - series[n - 2]) / series[n - 2])
}
