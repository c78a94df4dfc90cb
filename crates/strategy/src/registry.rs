use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use common::{Error, Result};

use crate::config::StrategyConfig;
use crate::variants::{EmaGradient, Goliath, LocalExtrema, Momentum};
use crate::Strategy;

/// Every strategy the bot knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Goliath,
    Momentum,
    LocalExtrema,
    EmaGradient,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Goliath,
        StrategyKind::Momentum,
        StrategyKind::LocalExtrema,
        StrategyKind::EmaGradient,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Goliath => "goliath",
            StrategyKind::Momentum => "momentum",
            StrategyKind::LocalExtrema => "local_extrema",
            StrategyKind::EmaGradient => "ema_gradient",
        }
    }

    /// The kind's built-in parameters, bound to `instrument`.
    pub fn default_config(&self, instrument: &str) -> StrategyConfig {
        match self {
            StrategyKind::Goliath => Goliath::default_config(instrument),
            StrategyKind::Momentum => Momentum::default_config(instrument),
            StrategyKind::LocalExtrema => LocalExtrema::default_config(instrument),
            StrategyKind::EmaGradient => EmaGradient::default_config(instrument),
        }
    }

    /// Validate `config` and construct the strategy.
    pub fn build(&self, config: StrategyConfig) -> Result<Box<dyn Strategy>> {
        config.validate()?;
        let strategy: Box<dyn Strategy> = match self {
            StrategyKind::Goliath => Box::new(Goliath::new(config)),
            StrategyKind::Momentum => Box::new(Momentum::new(config)),
            StrategyKind::LocalExtrema => Box::new(LocalExtrema::new(config)),
            StrategyKind::EmaGradient => Box::new(EmaGradient::new(config)),
        };
        info!(
            kind = self.as_str(),
            name = %strategy.name(),
            instrument = %strategy.instrument(),
            "Registered strategy"
        );
        Ok(strategy)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        StrategyKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = StrategyKind::ALL.iter().map(|k| k.as_str()).collect();
                Error::Config(format!(
                    "unknown strategy '{s}', expected one of: {}",
                    known.join(", ")
                ))
            })
    }
}
