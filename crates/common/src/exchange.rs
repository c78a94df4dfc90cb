use async_trait::async_trait;

use crate::{Quote, QuoteRequest, Result, SwapReceipt};

/// Abstraction over the swap venue.
///
/// `PaperVenue` implements this for simulation. Only `TradeExecutor` in
/// `crates/engine` calls `submit_swap`, one attempt at a time.
#[async_trait]
pub trait Venue: Send + Sync {
    /// Ask the venue for a route at the given slippage tolerance.
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote>;

    /// Execute a previously obtained quote. Moves funds on success.
    async fn submit_swap(&self, quote: &Quote, wallet: &str) -> Result<SwapReceipt>;
}

/// Wallet balance queries against the chain.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Balance of the quote asset, in whole units.
    async fn get_balance(&self, wallet: &str) -> Result<f64>;

    /// Balance of `asset` held by `wallet`, in whole units. Zero if none.
    async fn get_token_balance(&self, wallet: &str, asset: &str) -> Result<f64>;
}
