pub mod ema;
pub mod extrema;
pub mod rsi;

pub use ema::{ema_gradient, ema_series};
pub use extrema::{is_local_maximum, is_local_minimum};
pub use rsi::RsiIndicator;

/// Arithmetic mean. `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    mean(&values[values.len() - period..])
}
