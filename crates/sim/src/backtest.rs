use chrono::{DateTime, Utc};
use tracing::info;

use common::{Bar, Error, Result, SessionConfig, Trade};
use strategy::Strategy;

use crate::session::Session;

/// Outcome of a historical backtest run.
#[derive(Debug)]
pub struct BacktestReport {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub final_equity: f64,
}

/// Replay a fully materialized bar sequence through the position state
/// machine.
///
/// Iterates from the strategy's warmup offset to the second-to-last bar
/// (entries fill at the next bar's open, so the last bar only ever hosts a
/// fill or the close-out). Purely sequential and deterministic: the same
/// bars and config always produce an identical report.
pub fn run_backtest(
    bars: &[Bar],
    strat: &dyn Strategy,
    cfg: SessionConfig,
) -> Result<BacktestReport> {
    let start = strat.warmup().max(2);
    if bars.len() < start + 2 {
        return Err(Error::Data(format!(
            "bar history too short: got {} bars, need at least {} for strategy '{}'",
            bars.len(),
            start + 2,
            strat.name()
        )));
    }

    let mut session = Session::new(cfg);
    for i in start..bars.len() - 1 {
        let window = &bars[..=i];
        let signal = strat.generate_signal(window);
        session.step(&bars[i], bars[i + 1].open, bars[i + 1].ts, &signal);
    }
    session.finalize(&bars[bars.len() - 1]);

    let (trades, equity_curve, final_equity) = session.into_parts();
    info!(
        strategy = %strat.name(),
        bars = bars.len(),
        trades = trades.len(),
        final_equity = final_equity,
        "Backtest finished"
    );
    Ok(BacktestReport {
        trades,
        equity_curve,
        final_equity,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
