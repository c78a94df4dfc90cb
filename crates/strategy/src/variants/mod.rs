mod ema_gradient;
mod goliath;
mod local_extrema;
mod momentum;

pub use ema_gradient::EmaGradient;
pub use goliath::Goliath;
pub use local_extrema::LocalExtrema;
pub use momentum::Momentum;

use crate::config::StrategyConfig;

/// Parameters shared by every built-in strategy; only the sizing knobs differ.
fn base_config(
    name: &str,
    instrument: &str,
    lookback: usize,
    balance_fraction: f64,
    default_slippage_bps: u32,
) -> StrategyConfig {
    StrategyConfig {
        name: name.to_string(),
        instrument: instrument.to_string(),
        lookback,
        balance_fraction,
        default_slippage_bps,
        min_trade_size: 0.001,
        fee_reserve: 0.01,
        rent_reserve: 0.002,
        poll_interval_ms: 1000,
    }
}
