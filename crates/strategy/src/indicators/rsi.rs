/// RSI (Relative Strength Index) indicator.
///
/// Averages gains and losses over the first `period` close-to-close changes,
/// then applies Wilder smoothing to any further changes. With exactly
/// `period + 1` closes this is the plain average-gain / average-loss ratio.
/// Returns `None` until at least `period + 1` closes are available.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
    pub overbought: f64,
}

impl RsiIndicator {
    pub fn new(period: usize, overbought: f64) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self { period, overbought }
    }

    /// Compute RSI from a slice of close prices (oldest first).
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 {
            return None;
        }

        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let initial = &changes[..self.period];

        let mut avg_gain = initial.iter().filter(|&&c| c > 0.0).sum::<f64>() / self.period as f64;
        let mut avg_loss = initial.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>()
            / self.period as f64;

        for &change in &changes[self.period..] {
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            avg_gain = (avg_gain * (self.period - 1) as f64 + gain) / self.period as f64;
            avg_loss = (avg_loss * (self.period - 1) as f64 + loss) / self.period as f64;
        }

        if avg_loss == 0.0 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    /// RSI over the trailing `period + 1` closes only.
    pub fn compute_latest(&self, closes: &[f64]) -> Option<f64> {
        let start = closes.len().checked_sub(self.period + 1)?;
        self.compute(&closes[start..])
    }

    pub fn is_overbought(&self, value: f64) -> bool {
        value >= self.overbought
    }
}
