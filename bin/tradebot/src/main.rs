use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{Config, ExchangeClient, RunMode, SessionConfig};
use engine::{BybitClient, LiveRunner};
use sim::{run_backtest, ReplayRunner, TradeLog};
use strategy::{build_strategy, StrategyFileConfig};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.run_mode, symbol = %cfg.symbol, interval = %cfg.interval, "TradeBot starting");

    let strategy_file = StrategyFileConfig::load_or_default(&cfg.strategy_config_path);
    let strat = build_strategy(&strategy_file.strategy)
        .unwrap_or_else(|e| panic!("Invalid strategy config: {e}"));
    info!(strategy = strat.name(), warmup = strat.warmup(), "Strategy built");

    let session_cfg = SessionConfig {
        symbol: cfg.symbol.clone(),
        interval: cfg.interval.clone(),
        ..SessionConfig::default()
    };

    // ── Exchange ──────────────────────────────────────────────────────────────
    let client: Arc<dyn ExchangeClient> = Arc::new(BybitClient::new(
        cfg.bybit_api_key.clone(),
        cfg.bybit_api_secret.clone(),
        cfg.bybit_testnet,
    ));

    match cfg.run_mode {
        RunMode::Backtest => {
            let bars = client
                .fetch_bars(&cfg.symbol, &cfg.interval, cfg.lookback_bars)
                .await
                .unwrap_or_else(|e| panic!("Failed to fetch klines: {e}"));
            let report = run_backtest(&bars, strat.as_ref(), session_cfg)
                .unwrap_or_else(|e| panic!("Backtest failed: {e}"));
            info!(
                trades = report.trades.len(),
                final_equity = report.final_equity,
                "Backtest complete"
            );
        }
        RunMode::Replay => {
            let bars = client
                .fetch_bars(&cfg.symbol, &cfg.interval, cfg.lookback_bars)
                .await
                .unwrap_or_else(|e| panic!("Failed to fetch klines: {e}"));
            let log = TradeLog::open(&cfg.report_path, &cfg.interval, "replay")
                .unwrap_or_else(|e| panic!("Failed to open trade ledger: {e}"));
            let mut runner = ReplayRunner::new(strat, session_cfg, log);
            runner
                .run(&bars)
                .unwrap_or_else(|e| panic!("Replay failed: {e}"));
        }
        RunMode::Live => {
            let log = TradeLog::open(&cfg.report_path, &cfg.interval, "live")
                .unwrap_or_else(|e| panic!("Failed to open trade ledger: {e}"));
            let runner = LiveRunner::new(
                session_cfg,
                strat,
                client,
                log,
                Duration::from_secs(cfg.poll_seconds),
                cfg.lookback_bars,
            );

            // Ctrl-C flips the shutdown flag; the runner cancels any resting
            // order before returning.
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            });

            if let Err(e) = runner.run(shutdown_rx).await {
                panic!("Live runner failed: {e}");
            }
        }
    }
    info!("Done");
}
