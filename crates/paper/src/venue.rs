use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    BalanceSource, CandleSource, Error, Quote, QuoteRequest, Result, SwapReceipt, TradeSide, Venue,
};

/// Simulated swap venue and wallet for paper trading.
///
/// Quotes are priced off the latest candle close of the traded instrument,
/// with a fixed simulated slippage: buys pay more, sells receive less. A quote
/// whose simulated slippage exceeds the caller's tolerance is refused, the way
/// a real router refuses a route, so the executor's ladder still escalates.
/// Nothing ever leaves the process.
pub struct PaperVenue {
    candles: Arc<dyn CandleSource>,
    quote_asset: String,
    initial_balance: f64,
    slippage_bps: AtomicU32,
    /// wallet -> asset -> balance
    balances: RwLock<HashMap<String, HashMap<String, f64>>>,
}

impl PaperVenue {
    pub fn new(
        candles: Arc<dyn CandleSource>,
        quote_asset: impl Into<String>,
        initial_balance: f64,
        slippage_bps: u32,
    ) -> Self {
        let quote_asset = quote_asset.into();
        info!(
            quote_asset = %quote_asset,
            balance = initial_balance,
            slippage_bps,
            "PaperVenue initialized"
        );
        Self {
            candles,
            quote_asset,
            initial_balance,
            slippage_bps: AtomicU32::new(slippage_bps),
            balances: RwLock::new(HashMap::new()),
        }
    }

    pub fn slippage_bps(&self) -> u32 {
        self.slippage_bps.load(Ordering::Relaxed)
    }

    /// Change the simulated market slippage, e.g. to model a thin book.
    pub fn set_slippage_bps(&self, bps: u32) {
        self.slippage_bps.store(bps, Ordering::Relaxed);
    }

    /// Set `wallet`'s balance of `asset` outright.
    pub async fn set_balance(&self, wallet: &str, asset: &str, amount: f64) {
        let mut balances = self.balances.write().await;
        self.wallet_entry(&mut balances, wallet)
            .insert(asset.to_string(), amount);
    }

    fn wallet_entry<'a>(
        &self,
        balances: &'a mut HashMap<String, HashMap<String, f64>>,
        wallet: &str,
    ) -> &'a mut HashMap<String, f64> {
        balances.entry(wallet.to_string()).or_insert_with(|| {
            HashMap::from([(self.quote_asset.clone(), self.initial_balance)])
        })
    }

    fn side_of(&self, request: &QuoteRequest) -> Result<(TradeSide, String)> {
        let quote_in = request.input_asset == self.quote_asset;
        let quote_out = request.output_asset == self.quote_asset;
        match (quote_in, quote_out) {
            (true, false) => Ok((TradeSide::Buy, request.output_asset.clone())),
            (false, true) => Ok((TradeSide::Sell, request.input_asset.clone())),
            _ => Err(Error::Venue(format!(
                "no route {} -> {}: exactly one side must be {}",
                request.input_asset, request.output_asset, self.quote_asset
            ))),
        }
    }

    async fn balance_of(&self, wallet: &str, asset: &str) -> f64 {
        let balances = self.balances.read().await;
        match balances.get(wallet) {
            Some(assets) => assets.get(asset).copied().unwrap_or(0.0),
            None if asset == self.quote_asset => self.initial_balance,
            None => 0.0,
        }
    }
}

#[async_trait]
impl Venue for PaperVenue {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote> {
        if !(request.amount > 0.0) {
            return Err(Error::Venue(format!(
                "quote amount must be positive, got {}",
                request.amount
            )));
        }
        let (side, instrument) = self.side_of(request)?;

        let simulated = self.slippage_bps();
        if simulated > request.slippage_bps {
            return Err(Error::Venue(format!(
                "simulated slippage {simulated} bps exceeds tolerance {} bps",
                request.slippage_bps
            )));
        }

        let latest = self.candles.recent_candles(&instrument, 1).await?;
        let mid = latest
            .last()
            .map(|c| c.close)
            .filter(|&p| p > 0.0)
            .ok_or_else(|| Error::Venue(format!("no usable price for '{instrument}'")))?;

        let s = simulated as f64 / 10_000.0;
        let (price, expected_output) = match side {
            TradeSide::Buy => {
                let price = mid * (1.0 + s);
                (price, request.amount / price)
            }
            TradeSide::Sell => {
                let price = mid * (1.0 - s);
                (price, request.amount * price)
            }
        };

        debug!(%side, instrument = %instrument, mid, price, expected_output, "Paper quote");
        Ok(Quote {
            request: request.clone(),
            price,
            expected_output,
        })
    }

    async fn submit_swap(&self, quote: &Quote, wallet: &str) -> Result<SwapReceipt> {
        let request = &quote.request;
        let mut balances = self.balances.write().await;
        let assets = self.wallet_entry(&mut balances, wallet);

        let available = assets.get(&request.input_asset).copied().unwrap_or(0.0);
        if available < request.amount {
            return Err(Error::Venue(format!(
                "wallet {wallet} holds {available} {}, swap needs {}",
                request.input_asset, request.amount
            )));
        }

        *assets.entry(request.input_asset.clone()).or_insert(0.0) -= request.amount;
        *assets.entry(request.output_asset.clone()).or_insert(0.0) += quote.expected_output;

        let receipt = uuid::Uuid::new_v4().to_string();
        debug!(
            receipt = %receipt,
            input = %request.input_asset,
            output = %request.output_asset,
            amount = request.amount,
            output_amount = quote.expected_output,
            "Paper swap settled"
        );
        Ok(SwapReceipt {
            receipt,
            output_amount: quote.expected_output,
        })
    }
}

#[async_trait]
impl BalanceSource for PaperVenue {
    async fn get_balance(&self, wallet: &str) -> Result<f64> {
        Ok(self.balance_of(wallet, &self.quote_asset).await)
    }

    async fn get_token_balance(&self, wallet: &str, asset: &str) -> Result<f64> {
        Ok(self.balance_of(wallet, asset).await)
    }
}
