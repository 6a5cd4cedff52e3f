use common::{Bar, Error, Result, SessionConfig, Trade};
use strategy::Strategy;
use tracing::info;

use crate::ledger::TradeLog;
use crate::session::Session;

/// Bar-by-bar replay with an explicit step function.
///
/// Semantically identical to `run_backtest`, but the caller can drive
/// exits and entries from separately fetched slices and inspect the
/// session mid-run. Every closed trade is appended to the CSV ledger as it
/// happens, so a long replay can be reported on while still running.
pub struct ReplayRunner {
    strat: Box<dyn Strategy>,
    session: Session,
    log: TradeLog,
}

impl ReplayRunner {
    pub fn new(strat: Box<dyn Strategy>, cfg: SessionConfig, log: TradeLog) -> Self {
        Self {
            strat,
            session: Session::new(cfg),
            log,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// First bar index a replay over a full sequence may step on.
    pub fn start_index(&self) -> usize {
        self.strat.warmup().max(2)
    }

    /// One simulation step: `window` is the bar history up to and including
    /// the current bar, `next` the bar whose open hosts a potential entry.
    /// Returns the trade closed this step, if any.
    pub fn step(&mut self, window: &[Bar], next: &Bar) -> Result<Option<Trade>> {
        let cur = window
            .last()
            .ok_or_else(|| Error::Data("empty bar window".to_string()))?;
        let signal = self.strat.generate_signal(window);
        let closed = self.session.step(cur, next.open, next.ts, &signal);
        if let Some(trade) = &closed {
            self.log.append(trade)?;
        }
        Ok(closed)
    }

    /// Close any open position at the final bar and record it.
    pub fn finish(&mut self, last: &Bar) -> Result<Option<Trade>> {
        let closed = self.session.finalize(last);
        if let Some(trade) = &closed {
            self.log.append(trade)?;
        }
        Ok(closed)
    }

    /// Drive a full replay over a materialized bar sequence.
    pub fn run(&mut self, bars: &[Bar]) -> Result<()> {
        let start = self.start_index();
        if bars.len() < start + 2 {
            return Err(Error::Data(format!(
                "bar history too short: got {} bars, need at least {} for strategy '{}'",
                bars.len(),
                start + 2,
                self.strat.name()
            )));
        }

        for i in start..bars.len() - 1 {
            self.step(&bars[..=i], &bars[i + 1])?;
        }
        self.finish(&bars[bars.len() - 1])?;

        info!(
            strategy = %self.strat.name(),
            trades = self.session.trades().len(),
            final_equity = self.session.equity(),
            ledger = %self.log.path().display(),
            "Replay finished"
        );
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
