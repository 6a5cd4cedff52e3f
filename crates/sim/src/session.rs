use chrono::{DateTime, Utc};
use tracing::{debug, info};

use common::{Bar, ExitReason, OpenPosition, SessionConfig, Side, Signal, Trade};
use risk::{cost_bps, position_size, propose_levels};

/// The position state machine shared by the backtest, replay and live
/// drivers.
///
/// Owns the full mutable state of one simulated session: equity, the single
/// open position (if any), the trade ledger and the stair-step equity curve.
/// Drivers differ only in how they source `(bar, next_open, signal)` tuples;
/// all transition logic lives here so backtest and live results cannot
/// drift apart.
///
/// Equity moves only when a trade closes. Holding at most one position is
/// structural: `position` is an `Option`, and entries are refused while it
/// is `Some`.
#[derive(Debug, Clone)]
pub struct Session {
    cfg: SessionConfig,
    equity: f64,
    position: Option<OpenPosition>,
    trades: Vec<Trade>,
    equity_curve: Vec<(DateTime<Utc>, f64)>,
}

impl Session {
    pub fn new(cfg: SessionConfig) -> Self {
        let equity = cfg.initial_equity;
        Self {
            cfg,
            equity,
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        self.position.as_ref()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[(DateTime<Utc>, f64)] {
        &self.equity_curve
    }

    /// Consume the session, yielding the ledger, the equity curve and the
    /// final equity.
    pub fn into_parts(self) -> (Vec<Trade>, Vec<(DateTime<Utc>, f64)>, f64) {
        (self.trades, self.equity_curve, self.equity)
    }

    /// Sample the equity curve at `ts`. Called once per stepped bar.
    pub fn mark(&mut self, ts: DateTime<Utc>) {
        self.equity_curve.push((ts, self.equity));
    }

    /// One full simulation step: intrabar exit check on `bar`, then an entry
    /// decision filling at `next_open`. Returns the closed trade, if any.
    pub fn step(
        &mut self,
        bar: &Bar,
        next_open: f64,
        next_ts: DateTime<Utc>,
        signal: &Signal,
    ) -> Option<Trade> {
        self.mark(bar.ts);
        let closed = self.check_exit(bar);
        if self.position.is_none() {
            self.try_enter(signal, bar.close, next_open, next_ts);
        }
        closed
    }

    /// Intrabar stop/target resolution against the bar's high/low.
    ///
    /// When both levels are touched in the same bar the exit is always the
    /// stop-loss: the intrabar path is unknown, so the conservative
    /// assumption is locked in for parity with historical results.
    pub fn check_exit(&mut self, bar: &Bar) -> Option<Trade> {
        let pos = self.position?;

        let (hit_sl, hit_tp) = match pos.side {
            Side::Long => (bar.low <= pos.stop_price, bar.high >= pos.target_price),
            Side::Short => (bar.high >= pos.stop_price, bar.low <= pos.target_price),
        };

        let (reason, exit_px) = if hit_sl {
            (ExitReason::Stop, pos.stop_price)
        } else if hit_tp {
            (ExitReason::Target, pos.target_price)
        } else {
            return None;
        };

        // Fee and slippage against the raw trigger price; the ledger keeps
        // the raw price and the costs come out of PnL.
        let fee = cost_bps(exit_px, self.cfg.fee_bps);
        let slip = cost_bps(exit_px, self.cfg.slippage_bps);
        let pnl_per_unit = match pos.side {
            Side::Long => (exit_px - pos.entry_price) - fee - slip,
            Side::Short => (pos.entry_price - exit_px) - fee - slip,
        };

        Some(self.close(pos, exit_px, pnl_per_unit, bar.ts, reason))
    }

    /// Entry decision while flat. Fills at the next bar's open with costs
    /// applied in the adverse direction; a degenerate stop distance or a
    /// zero-rounded quantity skips the attempt silently.
    pub fn try_enter(
        &mut self,
        signal: &Signal,
        last_close: f64,
        next_open: f64,
        next_ts: DateTime<Utc>,
    ) -> Option<OpenPosition> {
        if self.position.is_some() {
            return None;
        }
        let side = signal.entry_side()?;

        let atr = signal.resolve_atr(last_close);
        let levels = propose_levels(next_open, atr, self.cfg.atr_mult_sl, self.cfg.atr_mult_tp, side);
        let stop_distance = (next_open - levels.stop).abs();

        let qty = match position_size(self.equity, self.cfg.risk_pct, stop_distance) {
            Ok(q) if q > 0.0 => q,
            Ok(_) => {
                debug!(symbol = %self.cfg.symbol, "Entry skipped: quantity rounded to zero");
                return None;
            }
            Err(e) => {
                debug!(symbol = %self.cfg.symbol, error = %e, "Entry skipped");
                return None;
            }
        };

        let fee = cost_bps(next_open, self.cfg.fee_bps);
        let slip = cost_bps(next_open, self.cfg.slippage_bps);
        let entry_price = match side {
            Side::Long => next_open + slip + fee,
            Side::Short => next_open - slip - fee,
        };

        let pos = OpenPosition {
            side,
            entry_price,
            quantity: qty,
            stop_price: levels.stop,
            target_price: levels.target,
            entry_time: next_ts,
        };
        info!(
            symbol = %self.cfg.symbol,
            side = %side,
            entry = entry_price,
            sl = levels.stop,
            tp = levels.target,
            qty = qty,
            reason = %signal.reason,
            "Position opened"
        );
        self.position = Some(pos);
        Some(pos)
    }

    /// Force-close at market because a fresh signal opposes the open
    /// position. Only the live driver calls this; the historical backtest
    /// intentionally has no flip path.
    pub fn flip_if_opposed(
        &mut self,
        signal: &Signal,
        price: f64,
        ts: DateTime<Utc>,
    ) -> Option<Trade> {
        let pos = self.position?;
        let wanted = signal.entry_side()?;
        if wanted != pos.side.opposite() {
            return None;
        }
        info!(symbol = %self.cfg.symbol, from = %pos.side, to = %wanted, "Flip detected, closing at market");
        Some(self.market_close(pos, price, ts, ExitReason::FlipClose))
    }

    /// Session-end close-out. Guarantees every opened position appears in
    /// the ledger exactly once, then samples the final equity point.
    pub fn finalize(&mut self, last_bar: &Bar) -> Option<Trade> {
        let closed = self
            .position
            .map(|pos| self.market_close(pos, last_bar.close, last_bar.ts, ExitReason::SessionEnd));
        self.mark(last_bar.ts);
        closed
    }

    /// Market-order close: costs are folded into the recorded exit price.
    fn market_close(
        &mut self,
        pos: OpenPosition,
        price: f64,
        ts: DateTime<Utc>,
        reason: ExitReason,
    ) -> Trade {
        let fee = cost_bps(price, self.cfg.fee_bps);
        let slip = cost_bps(price, self.cfg.slippage_bps);
        let (exit_px, pnl_per_unit) = match pos.side {
            Side::Long => {
                let px = price - fee - slip;
                (px, px - pos.entry_price)
            }
            Side::Short => {
                let px = price + fee + slip;
                (px, pos.entry_price - px)
            }
        };
        self.close(pos, exit_px, pnl_per_unit, ts, reason)
    }

    fn close(
        &mut self,
        pos: OpenPosition,
        exit_px: f64,
        pnl_per_unit: f64,
        ts: DateTime<Utc>,
        reason: ExitReason,
    ) -> Trade {
        let pnl = pnl_per_unit * pos.quantity;
        self.equity += pnl;
        self.position = None;

        let trade = Trade {
            entry_time: pos.entry_time,
            exit_time: ts,
            symbol: self.cfg.symbol.clone(),
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price: exit_px,
            quantity: pos.quantity,
            reason,
            pnl,
            equity_after: self.equity,
        };
        info!(
            symbol = %trade.symbol,
            side = %trade.side,
            reason = %reason,
            exit = exit_px,
            pnl = pnl,
            equity = self.equity,
            "Position closed"
        );
        self.trades.push(trade.clone());
        trade
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
