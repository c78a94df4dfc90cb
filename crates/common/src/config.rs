use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result, RunMode};

/// Mint of wrapped native SOL, the default quote asset for swaps.
pub const NATIVE_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Host configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub run_mode: RunMode,

    // Database
    pub database_url: String,

    // Strategy file (TOML)
    pub strategy_config_path: String,

    // Wallet and assets
    pub wallet: String,
    pub quote_asset: String,

    // Paper venue
    pub paper_slippage_bps: u32,
    pub paper_initial_balance: f64,
    /// Sell any open position when the live loop is asked to stop.
    pub close_on_shutdown: bool,

    // Backtest
    pub backtest_initial_capital: f64,
    pub backtest_report_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let run_mode = match required_env("RUN_MODE")?.to_lowercase().as_str() {
            "backtest" => RunMode::Backtest,
            "paper" => RunMode::Paper,
            other => {
                return Err(Error::Config(format!(
                    "RUN_MODE must be 'backtest' or 'paper', got: '{other}'"
                )))
            }
        };

        let config = Config {
            run_mode,
            database_url: required_env("DATABASE_URL")?,
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            wallet: optional_env("WALLET").unwrap_or_else(|| "paper-wallet".to_string()),
            quote_asset: optional_env("QUOTE_ASSET")
                .unwrap_or_else(|| NATIVE_SOL_MINT.to_string()),
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS", 10)?,
            paper_initial_balance: parsed_env("PAPER_INITIAL_BALANCE", 10.0)?,
            close_on_shutdown: parsed_env("CLOSE_ON_SHUTDOWN", false)?,
            backtest_initial_capital: parsed_env("BACKTEST_INITIAL_CAPITAL", 1000.0)?,
            backtest_report_dir: optional_env("BACKTEST_REPORT_DIR").map(PathBuf::from),
        };

        if config.backtest_initial_capital <= 0.0 {
            return Err(Error::Config(
                "BACKTEST_INITIAL_CAPITAL must be positive".to_string(),
            ));
        }
        if config.paper_initial_balance < 0.0 {
            return Err(Error::Config(
                "PAPER_INITIAL_BALANCE must not be negative".to_string(),
            ));
        }

        Ok(config)
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}
