use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fixed-interval OHLCV sample.
///
/// The OHLC ordering (`high >= max(open, close) >= min(open, close) >= low`)
/// is expected but not checked here; malformed rows are the data source's problem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// A candle whose OHLC are all `price`. Handy for flat series.
    pub fn flat(timestamp: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }
}

/// Side of a swap, seen from the traded instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "OPEN"),
            PositionStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeExit,
    LocalMaximum,
    EmaGradientNegative,
    /// Forced close of whatever is still open when historical data runs out.
    EndOfBacktest,
    Shutdown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TimeExit => "time_exit",
            ExitReason::LocalMaximum => "local_maximum",
            ExitReason::EmaGradientNegative => "ema_gradient_negative",
            ExitReason::EndOfBacktest => "end_of_backtest",
            ExitReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit fields of a position. Written together, exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionExit {
    pub price: f64,
    pub time: DateTime<Utc>,
    pub reason: ExitReason,
    pub pnl: f64,
    /// Venue receipt of the closing swap. `None` for simulated closes.
    pub receipt: Option<String>,
}

/// One trade on one instrument, open or closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub instrument: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub size: f64,
    pub open_receipt: Option<String>,
    pub exit: Option<PositionExit>,
}

impl Position {
    pub fn status(&self) -> PositionStatus {
        if self.exit.is_some() {
            PositionStatus::Closed
        } else {
            PositionStatus::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.exit.is_none()
    }

    /// `(price - entry_price) * size`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.size
    }

    /// Percentage move of `price` against the entry price.
    pub fn pnl_pct_at(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * 100.0
    }

    /// Realized P&L, `None` while open.
    pub fn pnl(&self) -> Option<f64> {
        self.exit.as_ref().map(|e| e.pnl)
    }
}

/// Row handed to the store when a buy fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPosition {
    pub wallet: String,
    pub instrument: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub size: f64,
    pub open_receipt: Option<String>,
}

/// Strategy output for the entry side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BuyDecision {
    Buy { info: String },
    Hold { info: String },
    /// Not enough lookback to evaluate. Always treated as a hold.
    InsufficientData { have: usize, need: usize },
}

impl BuyDecision {
    pub fn buy(info: impl Into<String>) -> Self {
        BuyDecision::Buy { info: info.into() }
    }

    pub fn hold(info: impl Into<String>) -> Self {
        BuyDecision::Hold { info: info.into() }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, BuyDecision::Buy { .. })
    }

    pub fn info(&self) -> String {
        match self {
            BuyDecision::Buy { info } | BuyDecision::Hold { info } => info.clone(),
            BuyDecision::InsufficientData { have, need } => {
                format!("insufficient data: have {have} candles, need {need}")
            }
        }
    }
}

/// Strategy output for the exit side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SellDecision {
    Hold { info: String },
    Exit { reason: ExitReason, info: String },
}

impl SellDecision {
    pub fn hold(info: impl Into<String>) -> Self {
        SellDecision::Hold { info: info.into() }
    }

    pub fn exit(reason: ExitReason, info: impl Into<String>) -> Self {
        SellDecision::Exit {
            reason,
            info: info.into(),
        }
    }

    pub fn should_sell(&self) -> bool {
        matches!(self, SellDecision::Exit { .. })
    }

    pub fn reason(&self) -> Option<ExitReason> {
        match self {
            SellDecision::Exit { reason, .. } => Some(*reason),
            SellDecision::Hold { .. } => None,
        }
    }

    pub fn info(&self) -> &str {
        match self {
            SellDecision::Hold { info } | SellDecision::Exit { info, .. } => info,
        }
    }
}

/// Parameters of a venue quote request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub input_asset: String,
    pub output_asset: String,
    /// Amount of `input_asset` to swap, in whole units.
    pub amount: f64,
    pub slippage_bps: u32,
}

/// A venue quote, passed back verbatim on submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub request: QuoteRequest,
    pub price: f64,
    pub expected_output: f64,
}

/// Confirmation of a submitted swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub receipt: String,
    pub output_amount: f64,
}

/// Whether the host runs a historical replay or the paper live loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Backtest,
    Paper,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Backtest => write!(f, "backtest"),
            RunMode::Paper => write!(f, "paper"),
        }
    }
}
