use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use common::{
    Candle, CandleSource, Error, ExitReason, NewPosition, PositionStore, Result,
};
use position::PositionBook;
use strategy::Strategy;

use crate::executor::TradeExecutor;
use crate::shutdown::ShutdownToken;

/// Outcome of one live-loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Not enough candles yet.
    Waiting { have: usize, need: usize },
    /// The strategy declined to act.
    Held,
    /// A buy signal arrived while another buy was still executing.
    Busy,
    Bought { id: i64 },
    Sold { id: i64, reason: ExitReason },
}

/// Counters returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveSummary {
    pub iterations: u64,
    pub buys: u64,
    pub sells: u64,
    pub failures: u64,
}

/// Clears the in-flight flag however the buy path exits.
struct BuyGuard<'a>(&'a AtomicBool);

impl<'a> BuyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BuyGuard(flag))
    }
}

impl Drop for BuyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Polls candles for one instrument, asks the strategy, and trades through
/// the executor. Storage is the source of truth for the open position.
pub struct LiveLoop {
    strategy: Box<dyn Strategy>,
    executor: TradeExecutor,
    store: Arc<dyn PositionStore>,
    candles: Arc<dyn CandleSource>,
    book: PositionBook,
    buy_in_flight: AtomicBool,
    close_on_shutdown: bool,
    span: Span,
}

impl LiveLoop {
    pub fn new(
        strategy: Box<dyn Strategy>,
        executor: TradeExecutor,
        store: Arc<dyn PositionStore>,
        candles: Arc<dyn CandleSource>,
    ) -> Self {
        let span = info_span!("live", instrument = %strategy.config().instrument);
        Self {
            strategy,
            executor,
            store,
            candles,
            book: PositionBook::new(),
            buy_in_flight: AtomicBool::new(false),
            close_on_shutdown: false,
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Sell any open position before `run` returns.
    pub fn close_on_shutdown(mut self, enabled: bool) -> Self {
        self.close_on_shutdown = enabled;
        self
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    /// Poll until `shutdown` fires. Iteration errors are logged and counted,
    /// never fatal.
    pub async fn run(mut self, shutdown: ShutdownToken) -> LiveSummary {
        let span = self.span.clone();
        async move {
            let poll = self.strategy.config().poll_interval();
            info!(
                strategy = %self.strategy.name(),
                wallet = %self.executor.wallet(),
                poll_ms = poll.as_millis() as u64,
                "Live loop started"
            );

            let mut summary = LiveSummary::default();
            while !shutdown.is_triggered() {
                summary.iterations += 1;
                match self.iterate().await {
                    Ok(Step::Bought { .. }) => summary.buys += 1,
                    Ok(Step::Sold { .. }) => summary.sells += 1,
                    Ok(_) => {}
                    Err(e) => {
                        summary.failures += 1;
                        if e.is_recoverable() {
                            error!(error = %e, "Iteration failed");
                        } else {
                            error!(error = %e, "Iteration aborted on a broken invariant");
                        }
                    }
                }
                if !shutdown.sleep(poll).await {
                    break;
                }
            }

            if self.close_on_shutdown {
                match self.close_for_shutdown().await {
                    Ok(Some(id)) => {
                        summary.sells += 1;
                        info!(id, "Closed open position on shutdown");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        summary.failures += 1;
                        error!(error = %e, "Failed to close position on shutdown");
                    }
                }
            }

            info!(
                iterations = summary.iterations,
                buys = summary.buys,
                sells = summary.sells,
                failures = summary.failures,
                "Live loop stopped"
            );
            summary
        }
        .instrument(span)
        .await
    }

    /// One poll: sync with storage, fetch candles, then the buy or sell path.
    pub async fn iterate(&mut self) -> Result<Step> {
        self.sync_with_store().await?;

        let instrument = self.strategy.config().instrument.clone();
        let lookback = self.strategy.config().lookback;
        let need = lookback + 2;
        let candles = match self.candles.recent_candles(&instrument, need).await {
            Ok(c) if c.len() >= need => c,
            Ok(c) => return Ok(Step::Waiting { have: c.len(), need }),
            Err(Error::InsufficientData { have, need }) => {
                debug!(have, need, "Waiting for candles");
                return Ok(Step::Waiting { have, need });
            }
            Err(e) => return Err(e),
        };
        // The candle right after the window is skipped; `current` is the newest.
        let window = &candles[..lookback];
        let current = candles[need - 1];

        if self.book.is_open() {
            self.sell_path(window, &current).await
        } else {
            self.buy_path(window, &current).await
        }
    }

    async fn sync_with_store(&mut self) -> Result<()> {
        let stored = self
            .store
            .find_open_position(self.executor.wallet(), self.strategy.config().instrument.as_str())
            .await?;
        if self.book.reconcile(stored) {
            match self.book.current() {
                Some(p) => info!(id = p.id, entry_price = p.entry_price, "Adopted open position from store"),
                None => warn!("Open position vanished from store, dropping it"),
            }
        }
        Ok(())
    }

    async fn buy_path(&mut self, window: &[Candle], current: &Candle) -> Result<Step> {
        let decision = self
            .strategy
            .should_buy(window, current, self.book.last_exit_time());
        if !decision.is_buy() {
            debug!(detail = %decision.info(), "Holding");
            return Ok(Step::Held);
        }

        let Some(_guard) = BuyGuard::acquire(&self.buy_in_flight) else {
            warn!("Buy already in flight, ignoring signal");
            return Ok(Step::Busy);
        };

        info!(price = current.close, detail = %decision.info(), "Buy signal");
        let fill = self.executor.buy().await?;

        let new = NewPosition {
            wallet: self.executor.wallet().to_string(),
            instrument: self.strategy.config().instrument.clone(),
            entry_price: current.close,
            entry_time: current.timestamp,
            size: fill.size,
            open_receipt: Some(fill.receipt.clone()),
        };
        let id = match self.store.insert_position(&new).await {
            Ok(id) => id,
            Err(e) => {
                error!(receipt = %fill.receipt, error = %e, "Buy filled but the position was not recorded");
                return Err(e);
            }
        };
        let opened = self.book.open_with_id(
            id,
            &new.instrument,
            new.entry_price,
            new.entry_time,
            new.size,
            new.open_receipt,
        )?;
        info!(
            id,
            entry_price = opened.entry_price,
            size = opened.size,
            slippage_bps = fill.slippage_bps,
            attempts = fill.attempts,
            "Position opened"
        );
        Ok(Step::Bought { id })
    }

    async fn sell_path(&mut self, window: &[Candle], current: &Candle) -> Result<Step> {
        let Some(position) = self.book.current().cloned() else {
            return Ok(Step::Held);
        };
        let decision = self.strategy.should_sell(&position, current, window);
        let Some(reason) = decision.reason() else {
            debug!(
                id = position.id,
                pnl_pct = position.pnl_pct_at(current.close),
                detail = %decision.info(),
                "Holding position"
            );
            return Ok(Step::Held);
        };

        info!(id = position.id, %reason, detail = %decision.info(), "Sell signal");
        let id = self.close_open(current.close, current.timestamp, reason).await?;
        Ok(Step::Sold { id, reason })
    }

    /// Sell through the executor, then apply and persist the close.
    ///
    /// `time` is the deciding candle's timestamp, the same clock the strategy
    /// measures cooldown and hold time on.
    async fn close_open(
        &mut self,
        price: f64,
        time: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<i64> {
        let fill = self.executor.sell().await?;
        let closed = self
            .book
            .close(price, time, reason, Some(fill.receipt.clone()))?;
        let id = closed.id;
        let exit = closed.exit.clone().ok_or_else(|| {
            Error::InvariantViolation(format!("position {id} closed without exit fields"))
        })?;

        if let Err(e) = self.store.update_position_close(id, &exit).await {
            error!(id, receipt = %fill.receipt, error = %e, "Sell filled but the close was not recorded");
            return Err(e);
        }
        info!(
            id,
            %reason,
            exit_price = exit.price,
            pnl = exit.pnl,
            output_amount = fill.output_amount,
            "Position closed"
        );
        Ok(id)
    }

    async fn close_for_shutdown(&mut self) -> Result<Option<i64>> {
        self.sync_with_store().await?;
        if !self.book.is_open() {
            return Ok(None);
        }
        let latest = self
            .candles
            .recent_candles(self.strategy.config().instrument.as_str(), 1)
            .await?;
        let last = latest
            .last()
            .copied()
            .ok_or(Error::InsufficientData { have: 0, need: 1 })?;
        self.close_open(last.close, last.timestamp, ExitReason::Shutdown)
            .await
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use chrono::TimeDelta;
    use common::BalanceSource;
    use paper::{MemoryStore, PaperVenue};
    use std::time::Duration;
    use strategy::{ConfigOverrides, StrategyKind};

    const WALLET: &str = "wallet";
    const QUOTE: &str = "QUOTE";
    const MINT: &str = "MINT";

    struct Harness {
        store: Arc<MemoryStore>,
        venue: Arc<PaperVenue>,
        base: DateTime<Utc>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let venue = Arc::new(PaperVenue::new(store.clone(), QUOTE, 10.0, 10));
            Self {
                store,
                venue,
                base: Utc::now() - TimeDelta::minutes(30),
            }
        }

        async fn push(&self, minute: i64, close: f64, volume: f64) {
            let t = self.base + TimeDelta::minutes(minute);
            self.store
                .add_candles(MINT, [Candle::flat(t, close, volume)])
                .await;
        }

        /// 21 quiet candles at 1.0, then a breakout at 1.2 on heavy volume.
        async fn breakout(&self) {
            for i in 0..21 {
                self.push(i, 1.0, 1.0).await;
            }
            self.push(21, 1.2, 5.0).await;
        }

        fn live_loop(&self) -> LiveLoop {
            let config = StrategyKind::Goliath.default_config(MINT);
            let strategy = StrategyKind::Goliath.build(config.clone()).unwrap();
            let executor = TradeExecutor::new(
                &config,
                &ConfigOverrides::default(),
                self.venue.clone(),
                self.venue.clone(),
                WALLET,
                QUOTE,
            )
            .unwrap();
            LiveLoop::new(strategy, executor, self.store.clone(), self.store.clone())
        }
    }

    #[tokio::test]
    async fn waits_for_enough_candles() {
        let h = Harness::new();
        for i in 0..5 {
            h.push(i, 1.0, 1.0).await;
        }
        let mut live = h.live_loop();
        assert_eq!(
            live.iterate().await.unwrap(),
            Step::Waiting { have: 5, need: 22 }
        );
    }

    #[tokio::test]
    async fn buys_on_signal_and_records_the_position() {
        let h = Harness::new();
        h.breakout().await;
        let mut live = h.live_loop();

        assert_eq!(live.iterate().await.unwrap(), Step::Bought { id: 1 });

        let stored = h.store.find_open_position(WALLET, MINT).await.unwrap().unwrap();
        assert_eq!(stored.entry_price, 1.2);
        // half of (10 - reserves) committed
        assert!((stored.size - 0.5 * (10.0 - 0.012)).abs() < 1e-9);
        assert!(stored.open_receipt.is_some());
        assert_eq!(live.book().current().map(|p| p.id), Some(1));
        assert!(h.venue.get_token_balance(WALLET, MINT).await.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn sells_on_take_profit_and_enters_cooldown() {
        let h = Harness::new();
        h.breakout().await;
        let mut live = h.live_loop();
        live.iterate().await.unwrap();

        // +25% against the 1.2 entry
        h.push(22, 1.5, 1.0).await;
        assert_eq!(
            live.iterate().await.unwrap(),
            Step::Sold { id: 1, reason: ExitReason::TakeProfit }
        );
        assert!(h.store.find_open_position(WALLET, MINT).await.unwrap().is_none());
        let closed = &h.store.positions(WALLET).await[0];
        assert_eq!(closed.exit.as_ref().map(|e| e.reason), Some(ExitReason::TakeProfit));
        assert_eq!(h.venue.get_token_balance(WALLET, MINT).await.unwrap(), 0.0);

        // another breakout right after the exit is ignored
        h.push(23, 3.0, 50.0).await;
        assert_eq!(live.iterate().await.unwrap(), Step::Held);
    }

    #[tokio::test]
    async fn hold_time_follows_the_candle_clock() {
        // the feed runs 30 minutes behind the wall clock
        let h = Harness::new();
        h.breakout().await;
        let mut live = h.live_loop();
        assert_eq!(live.iterate().await.unwrap(), Step::Bought { id: 1 });

        let entry_candle = h.base + TimeDelta::minutes(21);
        let stored = h.store.find_open_position(WALLET, MINT).await.unwrap().unwrap();
        assert_eq!(stored.entry_time, entry_candle);

        // 61 candle-minutes later, flat price: past Goliath's one hour limit
        h.push(82, 1.2, 1.0).await;
        assert_eq!(
            live.iterate().await.unwrap(),
            Step::Sold { id: 1, reason: ExitReason::TimeExit }
        );
        let closed = &h.store.positions(WALLET).await[0];
        assert_eq!(
            closed.exit.as_ref().map(|e| e.time),
            Some(h.base + TimeDelta::minutes(82))
        );
        assert_eq!(live.book().last_exit_time(), Some(h.base + TimeDelta::minutes(82)));
    }

    #[tokio::test]
    async fn adopts_an_open_position_from_the_store() {
        let h = Harness::new();
        for i in 0..22 {
            h.push(i, 1.0, 1.0).await;
        }
        let id = h
            .store
            .insert_position(&NewPosition {
                wallet: WALLET.into(),
                instrument: MINT.into(),
                entry_price: 1.0,
                entry_time: h.base + TimeDelta::minutes(21),
                size: 1.0,
                open_receipt: None,
            })
            .await
            .unwrap();

        let mut live = h.live_loop();
        assert_eq!(live.iterate().await.unwrap(), Step::Held);
        assert_eq!(live.book().current().map(|p| p.id), Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_buy_leaves_no_position() {
        let h = Harness::new();
        h.breakout().await;
        // the market never clears, even at the last rung
        h.venue.set_slippage_bps(6000);
        let mut live = h.live_loop();

        let err = live.iterate().await.unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed { attempts: 4, .. }));
        assert!(h.store.positions(WALLET).await.is_empty());
        assert!(!live.book().is_open());
        // the guard released the flag
        assert!(!live.buy_in_flight.load(Ordering::Acquire));
    }

    #[test]
    fn buy_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = BuyGuard::acquire(&flag).unwrap();
        assert!(BuyGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(BuyGuard::acquire(&flag).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown_and_reports() {
        let h = Harness::new();
        h.breakout().await;
        let live = h.live_loop();
        let (trigger, token) = Shutdown::channel();

        let task = tokio::spawn(live.run(token));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        trigger.trigger();
        let summary = task.await.unwrap();

        assert_eq!(summary.buys, 1);
        assert_eq!(summary.sells, 0);
        assert_eq!(summary.failures, 0);
        assert!(summary.iterations >= 2);
        // position stays open without close_on_shutdown
        assert!(h.store.find_open_position(WALLET, MINT).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn close_on_shutdown_sells_the_open_position() {
        let h = Harness::new();
        h.breakout().await;
        let live = h.live_loop().close_on_shutdown(true);
        let (trigger, token) = Shutdown::channel();

        let task = tokio::spawn(live.run(token));
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.trigger();
        let summary = task.await.unwrap();

        assert_eq!((summary.buys, summary.sells), (1, 1));
        let positions = h.store.positions(WALLET).await;
        assert_eq!(
            positions[0].exit.as_ref().map(|e| e.reason),
            Some(ExitReason::Shutdown)
        );
    }
}
