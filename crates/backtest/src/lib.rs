pub mod metrics;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, info, info_span, Span};

use common::{Candle, CandleSource, Error, ExitReason, Position, Result, SellDecision};
use position::PositionBook;
use strategy::Strategy;

/// Candles required beyond the strategy lookback before a run is attempted.
pub const MIN_EXTRA_CANDLES: usize = 10;

/// Uniform position size. Backtests measure signal quality, not capital efficiency.
const UNIT_SIZE: f64 = 1.0;

/// Replays a closed candle history through a strategy with no side effects.
pub struct Backtester {
    strategy: Box<dyn Strategy>,
    initial_capital: f64,
    span: Span,
}

impl Backtester {
    pub const DEFAULT_CAPITAL: f64 = 1000.0;

    pub fn new(strategy: Box<dyn Strategy>, initial_capital: f64) -> Self {
        let span = info_span!(
            "backtest",
            strategy = %strategy.name(),
            instrument = %strategy.instrument()
        );
        Self {
            strategy,
            initial_capital,
            span,
        }
    }

    /// Run inside the caller's span instead of a fresh `backtest` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    /// Load every stored candle for `instrument` and replay them.
    pub async fn run_from_source(
        &self,
        source: &dyn CandleSource,
        instrument: &str,
    ) -> Result<BacktestResult> {
        let candles = source.all_candles(instrument).await?;
        self.run(&candles)
    }

    pub fn run(&self, candles: &[Candle]) -> Result<BacktestResult> {
        let _enter = self.span.enter();
        let lookback = self.strategy.config().lookback;
        let need = lookback + MIN_EXTRA_CANDLES;
        if candles.len() < need {
            return Err(Error::InsufficientData {
                have: candles.len(),
                need,
            });
        }

        info!(
            candles = candles.len(),
            from = %candles[0].timestamp,
            to = %candles[candles.len() - 1].timestamp,
            "Running backtest"
        );

        let mut book = PositionBook::new();
        let mut equity_curve = Vec::with_capacity(candles.len() - lookback + 2);
        let mut timestamps = Vec::with_capacity(candles.len() - lookback + 1);
        equity_curve.push(self.initial_capital);

        for i in lookback..candles.len() {
            let current = &candles[i];
            let window = &candles[i - lookback..i];

            equity_curve.push(self.mark_to_market(&book, current.close));
            timestamps.push(current.timestamp);

            if let Some(position) = book.current() {
                let decision = self.strategy.should_sell(position, current, window);
                if let SellDecision::Exit { reason, info } = decision {
                    let closed = book.close(current.close, current.timestamp, reason, None)?;
                    debug!(
                        id = closed.id,
                        price = current.close,
                        pnl = closed.pnl().unwrap_or_default(),
                        %reason,
                        detail = %info,
                        "Closed position"
                    );
                }
            } else {
                let decision = self
                    .strategy
                    .should_buy(window, current, book.last_exit_time());
                if decision.is_buy() {
                    let opened = book.open(
                        self.strategy.instrument(),
                        current.close,
                        current.timestamp,
                        UNIT_SIZE,
                    )?;
                    debug!(
                        id = opened.id,
                        price = current.close,
                        detail = %decision.info(),
                        "Opened position"
                    );
                }
            }
        }

        if book.is_open() {
            let last = &candles[candles.len() - 1];
            book.close(last.close, last.timestamp, ExitReason::EndOfBacktest, None)?;
            equity_curve.push(self.mark_to_market(&book, last.close));
            timestamps.push(last.timestamp);
        }

        let result = BacktestResult::from_run(
            self.strategy.name(),
            self.strategy.instrument(),
            self.initial_capital,
            book.into_closed(),
            equity_curve,
            timestamps,
        );
        info!(
            trades = result.total_trades,
            total_pnl = result.total_pnl,
            max_drawdown = result.max_drawdown,
            "Backtest finished"
        );
        Ok(result)
    }

    fn mark_to_market(&self, book: &PositionBook, price: f64) -> f64 {
        self.initial_capital + book.realized_pnl() + book.unrealized_pnl(price)
    }
}

/// Aggregate statistics of one backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub instrument: String,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl_per_trade: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    #[serde(rename = "avg_hold_time_secs", serialize_with = "as_seconds")]
    pub avg_hold_time: TimeDelta,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub positions: Vec<Position>,
    /// Seeded with the initial capital, so always one longer than `timestamps`.
    pub equity_curve: Vec<f64>,
    pub timestamps: Vec<DateTime<Utc>>,
}

fn as_seconds<S: Serializer>(d: &TimeDelta, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.num_milliseconds() as f64 / 1000.0)
}

impl BacktestResult {
    fn from_run(
        strategy: &str,
        instrument: &str,
        initial_capital: f64,
        positions: Vec<Position>,
        equity_curve: Vec<f64>,
        timestamps: Vec<DateTime<Utc>>,
    ) -> Self {
        let total_trades = positions.len();
        let pnls: Vec<f64> = positions.iter().filter_map(Position::pnl).collect();
        let total_pnl: f64 = pnls.iter().sum();

        Self {
            strategy: strategy.to_string(),
            instrument: instrument.to_string(),
            total_trades,
            winning_trades: pnls.iter().filter(|&&p| p > 0.0).count(),
            losing_trades: pnls.iter().filter(|&&p| p < 0.0).count(),
            win_rate: metrics::win_rate(&positions),
            total_pnl,
            avg_pnl_per_trade: if total_trades == 0 {
                0.0
            } else {
                total_pnl / total_trades as f64
            },
            max_drawdown: metrics::max_drawdown(&equity_curve, initial_capital),
            sharpe_ratio: metrics::sharpe_ratio(&equity_curve),
            avg_hold_time: metrics::avg_hold_time(&positions),
            initial_capital,
            final_capital: equity_curve.last().copied().unwrap_or(initial_capital),
            positions,
            equity_curve,
            timestamps,
        }
    }

    /// `final / initial - 1`.
    pub fn total_return(&self) -> f64 {
        if self.initial_capital == 0.0 {
            return 0.0;
        }
        self.final_capital / self.initial_capital - 1.0
    }

    /// Write the result as pretty JSON into `dir`, returning the file path.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let slug: String = format!("{}_{}", self.strategy, self.instrument)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        let path = dir.join(format!("{slug}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Wrote backtest report");
        Ok(path)
    }

    /// Per-trade listing, one row per closed position.
    pub fn trade_table(&self) -> String {
        let mut out = format!(
            "{:>5}  {:<19}  {:>12}  {:<19}  {:>12}  {:>10}  {}\n",
            "ID", "Entry Time", "Entry Price", "Exit Time", "Exit Price", "PnL", "Reason"
        );
        for p in &self.positions {
            let (exit_time, exit_price, pnl, reason) = match &p.exit {
                Some(e) => (
                    e.time.format("%Y-%m-%d %H:%M:%S").to_string(),
                    format!("{:.6}", e.price),
                    format!("{:.2}", e.pnl),
                    e.reason.to_string(),
                ),
                None => ("Open".into(), "-".into(), "-".into(), "-".into()),
            };
            out.push_str(&format!(
                "{:>5}  {:<19}  {:>12.6}  {:<19}  {:>12}  {:>10}  {}\n",
                p.id,
                p.entry_time.format("%Y-%m-%d %H:%M:%S"),
                p.entry_price,
                exit_time,
                exit_price,
                pnl,
                reason
            ));
        }
        out
    }
}

impl fmt::Display for BacktestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hold_secs = self.avg_hold_time.num_seconds();
        writeln!(f, "{} backtest on {}", self.strategy, self.instrument)?;
        writeln!(f, "  {:<16} {}", "Total Trades", self.total_trades)?;
        writeln!(f, "  {:<16} {}", "Winning Trades", self.winning_trades)?;
        writeln!(f, "  {:<16} {}", "Losing Trades", self.losing_trades)?;
        writeln!(f, "  {:<16} {:.2}%", "Win Rate", self.win_rate * 100.0)?;
        writeln!(f, "  {:<16} {:.2}", "Total PnL", self.total_pnl)?;
        writeln!(f, "  {:<16} {:.2}", "Avg PnL/Trade", self.avg_pnl_per_trade)?;
        writeln!(f, "  {:<16} {:.2}%", "Max Drawdown", self.max_drawdown * 100.0)?;
        writeln!(f, "  {:<16} {:.2}", "Sharpe Ratio", self.sharpe_ratio)?;
        writeln!(
            f,
            "  {:<16} {}h {:02}m {:02}s",
            "Avg Hold Time",
            hold_secs / 3600,
            (hold_secs % 3600) / 60,
            hold_secs % 60
        )?;
        writeln!(f, "  {:<16} {:.2}", "Initial Capital", self.initial_capital)?;
        writeln!(f, "  {:<16} {:.2}", "Final Capital", self.final_capital)?;
        write!(f, "  {:<16} {:.2}%", "Return", self.total_return() * 100.0)
    }
}
