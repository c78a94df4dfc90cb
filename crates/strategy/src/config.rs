use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use common::{Error, Result};

use crate::registry::StrategyKind;
use crate::Strategy;

/// Per-strategy parameters. Fixed at construction; overrides produce a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Human-readable name shown in logs and reports.
    pub name: String,
    /// Mint / identifier of the traded instrument.
    pub instrument: String,
    /// Number of candles handed to the strategy as lookback.
    pub lookback: usize,
    /// Share of the spendable balance committed per buy, in (0, 1].
    pub balance_fraction: f64,
    pub default_slippage_bps: u32,
    /// Smallest buy worth submitting, in quote-asset units.
    pub min_trade_size: f64,
    /// Quote-asset amount held back for transaction fees.
    pub fee_reserve: f64,
    /// Quote-asset amount held back for account rent.
    pub rent_reserve: f64,
    pub poll_interval_ms: u64,
}

impl StrategyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Quote-asset amount never spent on trades.
    pub fn reserves(&self) -> f64 {
        self.fee_reserve + self.rent_reserve
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(format!("strategy '{}': {msg}", self.name)));

        if self.instrument.trim().is_empty() {
            return fail("instrument must not be empty".into());
        }
        if self.lookback < 1 {
            return fail(format!("lookback must be >= 1, got {}", self.lookback));
        }
        if !(self.balance_fraction > 0.0 && self.balance_fraction <= 1.0) {
            return fail(format!(
                "balance_fraction must be in (0, 1], got {}",
                self.balance_fraction
            ));
        }
        if self.default_slippage_bps == 0 {
            return fail("default_slippage_bps must be positive".into());
        }
        if !(self.min_trade_size > 0.0) {
            return fail(format!(
                "min_trade_size must be positive, got {}",
                self.min_trade_size
            ));
        }
        if self.fee_reserve < 0.0 || self.rent_reserve < 0.0 {
            return fail("fee and rent reserves must not be negative".into());
        }
        if self.poll_interval_ms == 0 {
            return fail("poll_interval_ms must be positive".into());
        }
        Ok(())
    }

    /// Derive a config with caller-supplied trade settings applied.
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> Result<Self> {
        let derived = StrategyConfig {
            balance_fraction: overrides.balance_fraction.unwrap_or(self.balance_fraction),
            default_slippage_bps: overrides
                .default_slippage_bps
                .unwrap_or(self.default_slippage_bps),
            min_trade_size: overrides.min_trade_size.unwrap_or(self.min_trade_size),
            fee_reserve: overrides.fee_reserve.unwrap_or(self.fee_reserve),
            ..self.clone()
        };
        derived.validate()?;
        Ok(derived)
    }
}

/// Trade settings a caller may override at executor construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub balance_fraction: Option<f64>,
    pub default_slippage_bps: Option<u32>,
    pub min_trade_size: Option<f64>,
    pub fee_reserve: Option<f64>,
}

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// type = "goliath"
/// instrument = "GoLiAtHmint1111111111111111111111111111111"
///
/// [strategy.overrides]
/// balance_fraction = 0.25
/// default_slippage_bps = 300
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyEntry {
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    pub instrument: String,
    #[serde(default)]
    pub overrides: ConfigOverrides,
}

impl StrategyEntry {
    /// The kind's defaults for this instrument, with overrides applied.
    pub fn config(&self) -> Result<StrategyConfig> {
        self.kind
            .default_config(&self.instrument)
            .with_overrides(&self.overrides)
    }

    pub fn build(&self) -> Result<Box<dyn Strategy>> {
        self.kind.build(self.config()?)
    }
}

impl StrategyFileConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read strategy config at '{path}': {e}"))
        })?;
        let file = Self::from_toml_str(&content)?;
        info!(path, entries = file.strategies.len(), "Loaded strategy config");
        Ok(file)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: StrategyFileConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse strategy config: {e}")))?;

        if file.strategies.is_empty() {
            return Err(Error::Config("strategy config has no [[strategy]] entries".into()));
        }

        // One loop per instrument keeps the single-open-position rule intact.
        let mut seen = HashSet::new();
        for entry in &file.strategies {
            if !seen.insert(entry.instrument.as_str()) {
                return Err(Error::Config(format!(
                    "instrument '{}' is configured more than once",
                    entry.instrument
                )));
            }
            entry.config()?;
        }
        Ok(file)
    }
}
