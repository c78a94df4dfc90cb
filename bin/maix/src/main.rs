use std::sync::Arc;

use tracing::{error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

use backtest::Backtester;
use common::{Config, RunMode};
use engine::{LiveLoop, Shutdown, TradeExecutor};
use paper::PaperVenue;
use store::SqliteStore;
use strategy::StrategyFileConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    // Scoped to this thread; every task runs on it with a current-thread runtime.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    let _log_guard = tracing::subscriber::set_default(subscriber);

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().unwrap_or_else(|e| panic!("Invalid configuration: {e}"));
    info!(mode = %cfg.run_mode, "Maix starting");

    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)
        .unwrap_or_else(|e| panic!("Invalid strategy config: {e}"));

    // ── Database ──────────────────────────────────────────────────────────────
    let store = Arc::new(
        SqliteStore::connect(&cfg.database_url)
            .await
            .unwrap_or_else(|e| panic!("Failed to open database: {e}")),
    );

    match cfg.run_mode {
        RunMode::Backtest => run_backtests(&cfg, &strategy_file, &store).await,
        RunMode::Paper => run_paper(&cfg, &strategy_file, store).await,
    }

    info!("Maix stopped");
}

async fn run_backtests(cfg: &Config, file: &StrategyFileConfig, store: &SqliteStore) {
    for entry in &file.strategies {
        let strategy = match entry.build() {
            Ok(s) => s,
            Err(e) => {
                error!(kind = %entry.kind, instrument = %entry.instrument, error = %e, "Skipping strategy");
                continue;
            }
        };
        let backtester = Backtester::new(strategy, cfg.backtest_initial_capital);
        let result = match backtester.run_from_source(store, &entry.instrument).await {
            Ok(r) => r,
            Err(e) => {
                error!(kind = %entry.kind, instrument = %entry.instrument, error = %e, "Backtest failed");
                continue;
            }
        };

        println!("{result}\n");
        println!("{}", result.trade_table());

        if let Some(dir) = &cfg.backtest_report_dir {
            if let Err(e) = result.write_json(dir) {
                warn!(error = %e, "Could not write backtest report");
            }
        }
    }
}

async fn run_paper(cfg: &Config, file: &StrategyFileConfig, store: Arc<SqliteStore>) {
    let venue = Arc::new(PaperVenue::new(
        store.clone(),
        cfg.quote_asset.clone(),
        cfg.paper_initial_balance,
        cfg.paper_slippage_bps,
    ));
    let (trigger, token) = Shutdown::channel();

    let mut loops = Vec::new();
    for entry in &file.strategies {
        let built = entry.build().and_then(|strategy| {
            // the executor applies the entry's overrides to the kind defaults itself
            let executor = TradeExecutor::new(
                &entry.kind.default_config(&entry.instrument),
                &entry.overrides,
                venue.clone(),
                venue.clone(),
                cfg.wallet.clone(),
                cfg.quote_asset.clone(),
            )?;
            Ok((strategy, executor))
        });
        let (strategy, executor) = match built {
            Ok(parts) => parts,
            Err(e) => {
                error!(kind = %entry.kind, instrument = %entry.instrument, error = %e, "Skipping strategy");
                continue;
            }
        };

        let span = info_span!("live", kind = %entry.kind, instrument = %entry.instrument);
        let live = LiveLoop::new(strategy, executor, store.clone(), store.clone())
            .with_span(span)
            .close_on_shutdown(cfg.close_on_shutdown);
        loops.push(tokio::spawn(live.run(token.clone())));
    }

    if loops.is_empty() {
        error!("No strategy could be started");
        return;
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, finishing current iterations"),
            Err(e) => error!(error = %e, "Could not listen for Ctrl-C, stopping"),
        }
        trigger.trigger();
    });

    info!(loops = loops.len(), "All live loops started. Waiting for shutdown signal.");
    for handle in loops {
        match handle.await {
            Ok(summary) => info!(
                iterations = summary.iterations,
                buys = summary.buys,
                sells = summary.sells,
                failures = summary.failures,
                "Live loop finished"
            ),
            Err(e) => error!(error = %e, "Live loop task panicked"),
        }
    }
}
