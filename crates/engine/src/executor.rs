use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, warn, Instrument, Span};

use common::{
    BalanceSource, Error, QuoteRequest, Result, SwapReceipt, TradeSide, Venue,
};
use strategy::{ConfigOverrides, StrategyConfig};

/// Fallback tolerances tried after the configured default, in basis points.
pub const ESCALATION_BPS: [u32; 3] = [1000, 2000, 5000];

/// Pause between a failed rung and the next one.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Ordered slippage tolerances for one trade: the default first, then the
/// fixed escalation rungs. A default equal to a later rung is simply tried twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlippageLadder {
    rungs: Vec<u32>,
}

impl SlippageLadder {
    pub fn new(default_bps: u32) -> Self {
        let rungs = std::iter::once(default_bps)
            .chain(ESCALATION_BPS)
            .collect();
        Self { rungs }
    }

    pub fn rungs(&self) -> &[u32] {
        &self.rungs
    }
}

/// What to do after a failed rung.
#[derive(Debug)]
pub enum RetryStep {
    /// Wait `delay`, then try `next_bps`.
    Retry { next_bps: u32, delay: Duration },
    /// No rungs left; carries the last failure.
    Exhausted(Error),
}

/// Bounded retry state machine over a [`SlippageLadder`].
#[derive(Debug, Clone)]
pub struct RetryState {
    ladder: SlippageLadder,
    rung: usize,
}

impl RetryState {
    pub fn new(ladder: SlippageLadder) -> Self {
        Self { ladder, rung: 0 }
    }

    /// Tolerance of the current attempt.
    pub fn slippage_bps(&self) -> u32 {
        self.ladder.rungs[self.rung]
    }

    /// 1-based number of the current attempt.
    pub fn attempt(&self) -> usize {
        self.rung + 1
    }

    pub fn record_failure(&mut self, error: Error) -> RetryStep {
        if self.rung + 1 < self.ladder.rungs.len() {
            self.rung += 1;
            RetryStep::Retry {
                next_bps: self.slippage_bps(),
                delay: RETRY_DELAY,
            }
        } else {
            RetryStep::Exhausted(error)
        }
    }
}

/// Outcome of a filled buy.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyFill {
    pub receipt: String,
    /// Quote-asset amount spent.
    pub size: f64,
    /// Instrument amount received.
    pub output_amount: f64,
    pub slippage_bps: u32,
    pub attempts: usize,
}

/// Outcome of a filled sell.
#[derive(Debug, Clone, PartialEq)]
pub struct SellFill {
    pub receipt: String,
    /// Instrument amount sold, as reported by the wallet.
    pub size: f64,
    /// Quote-asset amount received.
    pub output_amount: f64,
    pub slippage_bps: u32,
    pub attempts: usize,
}

struct Execution {
    receipt: SwapReceipt,
    slippage_bps: u32,
    attempts: usize,
}

/// Sizes trades and submits them to the venue, escalating slippage on failure.
///
/// This is the only caller of `Venue::submit_swap`. Attempts are strictly
/// sequential; a swap is never in flight twice.
pub struct TradeExecutor {
    config: StrategyConfig,
    venue: Arc<dyn Venue>,
    balances: Arc<dyn BalanceSource>,
    wallet: String,
    quote_asset: String,
    span: Span,
}

impl TradeExecutor {
    /// Build an executor for `config` with caller overrides applied.
    pub fn new(
        config: &StrategyConfig,
        overrides: &ConfigOverrides,
        venue: Arc<dyn Venue>,
        balances: Arc<dyn BalanceSource>,
        wallet: impl Into<String>,
        quote_asset: impl Into<String>,
    ) -> Result<Self> {
        let config = config.with_overrides(overrides)?;
        let span = info_span!("executor", instrument = %config.instrument);
        Ok(Self {
            config,
            venue,
            balances,
            wallet: wallet.into(),
            quote_asset: quote_asset.into(),
            span,
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The derived config, overrides included.
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    pub fn ladder(&self) -> SlippageLadder {
        SlippageLadder::new(self.config.default_slippage_bps)
    }

    /// Quote-asset amount the next buy would commit.
    ///
    /// `balance_fraction * max(0, balance - fee - rent)`, refused below the
    /// minimum trade size or when the wallet cannot cover trade plus reserves.
    pub async fn size_buy(&self) -> Result<f64> {
        let c = &self.config;
        let balance = self.balances.get_balance(&self.wallet).await?;
        let min_required = c.reserves() + c.min_trade_size;
        if balance < min_required {
            return Err(Error::InsufficientBalance(format!(
                "balance {balance:.4} below minimum {min_required:.4} (reserves + min trade)"
            )));
        }

        let available = (balance - c.reserves()).max(0.0);
        let size = c.balance_fraction * available;
        if size < c.min_trade_size {
            return Err(Error::InsufficientBalance(format!(
                "trade size {size:.4} below minimum {:.4}",
                c.min_trade_size
            )));
        }
        Ok(size)
    }

    pub async fn buy(&self) -> Result<BuyFill> {
        self.buy_inner().instrument(self.span.clone()).await
    }

    /// Sell the wallet's whole instrument balance back into the quote asset.
    pub async fn sell(&self) -> Result<SellFill> {
        self.sell_inner().instrument(self.span.clone()).await
    }

    async fn buy_inner(&self) -> Result<BuyFill> {
        let size = self.size_buy().await?;

        // Re-read right before submission; the first read may be stale.
        let balance = self.balances.get_balance(&self.wallet).await?;
        let required = size + self.config.reserves();
        if required > balance {
            return Err(Error::InsufficientBalance(format!(
                "trade needs {required:.4} including reserves, wallet holds {balance:.4}"
            )));
        }

        info!(size, balance, "Submitting buy");
        let exec = self
            .execute(
                TradeSide::Buy,
                &self.quote_asset,
                &self.config.instrument,
                size,
            )
            .await?;
        Ok(BuyFill {
            receipt: exec.receipt.receipt,
            size,
            output_amount: exec.receipt.output_amount,
            slippage_bps: exec.slippage_bps,
            attempts: exec.attempts,
        })
    }

    async fn sell_inner(&self) -> Result<SellFill> {
        let held = self
            .balances
            .get_token_balance(&self.wallet, &self.config.instrument)
            .await?;
        if held <= 0.0 {
            return Err(Error::InsufficientBalance(format!(
                "no {} to sell (wallet balance {held})",
                self.config.instrument
            )));
        }

        info!(amount = held, "Submitting sell");
        let exec = self
            .execute(
                TradeSide::Sell,
                &self.config.instrument,
                &self.quote_asset,
                held,
            )
            .await?;
        Ok(SellFill {
            receipt: exec.receipt.receipt,
            size: held,
            output_amount: exec.receipt.output_amount,
            slippage_bps: exec.slippage_bps,
            attempts: exec.attempts,
        })
    }

    async fn execute(
        &self,
        side: TradeSide,
        input_asset: &str,
        output_asset: &str,
        amount: f64,
    ) -> Result<Execution> {
        let mut state = RetryState::new(self.ladder());
        loop {
            let request = QuoteRequest {
                input_asset: input_asset.to_string(),
                output_asset: output_asset.to_string(),
                amount,
                slippage_bps: state.slippage_bps(),
            };

            match self.attempt(&request).await {
                Ok(receipt) => {
                    info!(
                        %side,
                        receipt = %receipt.receipt,
                        slippage_bps = request.slippage_bps,
                        attempt = state.attempt(),
                        "Swap confirmed"
                    );
                    return Ok(Execution {
                        receipt,
                        slippage_bps: request.slippage_bps,
                        attempts: state.attempt(),
                    });
                }
                Err(e) => {
                    warn!(
                        %side,
                        slippage_bps = request.slippage_bps,
                        attempt = state.attempt(),
                        error = %e,
                        "Swap attempt failed"
                    );
                    let attempts = state.attempt();
                    match state.record_failure(e) {
                        RetryStep::Retry { next_bps, delay } => {
                            info!(next_bps, "Escalating slippage tolerance");
                            tokio::time::sleep(delay).await;
                        }
                        RetryStep::Exhausted(last) => {
                            return Err(Error::ExecutionFailed {
                                side,
                                attempts,
                                source: Box::new(last),
                            });
                        }
                    }
                }
            }
        }
    }

    /// One rung: quote, then submit. Either step failing fails the rung.
    async fn attempt(&self, request: &QuoteRequest) -> Result<SwapReceipt> {
        let quote = self.venue.get_quote(request).await?;
        self.venue.submit_swap(&quote, &self.wallet).await
    }
}
