use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candle for a fixed interval.
/// Bars arrive oldest-first with strictly increasing timestamps and are
/// never mutated after the candle closes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Side of a position or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Direction a strategy wants to be in after seeing the latest bar window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Long,
    Short,
    Flat,
}

/// Strategy output for one bar window. Computed fresh every step, never
/// persisted. `reason` is diagnostic only; `meta` carries indicator values,
/// notably `"atr14"` for stop placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub reason: String,
    #[serde(default)]
    pub meta: HashMap<String, f64>,
}

impl Signal {
    pub fn flat(reason: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Flat,
            reason: reason.into(),
            meta: HashMap::new(),
        }
    }

    pub fn new(kind: SignalKind, reason: impl Into<String>, meta: HashMap<String, f64>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            meta,
        }
    }

    /// ATR from signal metadata, if the strategy supplied one.
    pub fn atr(&self) -> Option<f64> {
        self.meta.get("atr14").copied().filter(|v| *v > 0.0)
    }

    /// Volatility for stop placement: the strategy's ATR when present,
    /// otherwise 0.5% of the latest close.
    pub fn resolve_atr(&self, last_close: f64) -> f64 {
        self.atr().unwrap_or(last_close * 0.005)
    }

    /// Entry side for actionable signals, `None` for FLAT.
    pub fn entry_side(&self) -> Option<Side> {
        match self.kind {
            SignalKind::Long => Some(Side::Long),
            SignalKind::Short => Some(Side::Short),
            SignalKind::Flat => None,
        }
    }
}

/// The single open position a session may hold.
///
/// Invariant: `quantity > 0` and the entry-to-stop distance is positive
/// while the position lives; the session never opens a position otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub side: Side,
    /// Fill price after fee + slippage were applied in the adverse direction.
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub entry_time: DateTime<Utc>,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Stop-loss touched intrabar.
    Stop,
    /// Take-profit touched intrabar.
    Target,
    /// Force-closed at market because a new signal opposed the position.
    FlipClose,
    /// Force-closed because the bar stream or session ended.
    SessionEnd,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Stop => write!(f, "SL"),
            ExitReason::Target => write!(f, "TP"),
            ExitReason::FlipClose => write!(f, "FLIP"),
            ExitReason::SessionEnd => write!(f, "SESSION_END"),
        }
    }
}

/// Immutable record written when a position closes. The ledger is append-only
/// and ordered by close time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub reason: ExitReason,
    pub pnl: f64,
    pub equity_after: f64,
}

/// Per-session simulation parameters. Immutable for the session's duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub symbol: String,
    /// Bar interval in exchange notation ("1", "5", "15", "60", ...).
    pub interval: String,
    pub initial_equity: f64,
    /// Fraction of equity risked per trade (0.01 = 1%).
    pub risk_pct: f64,
    pub atr_mult_sl: f64,
    pub atr_mult_tp: f64,
    /// Fee per side in basis points.
    pub fee_bps: f64,
    /// Slippage per side in basis points.
    pub slippage_bps: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "15".to_string(),
            initial_equity: 2000.0,
            risk_pct: 0.01,
            atr_mult_sl: 1.0,
            atr_mult_tp: 2.0,
            fee_bps: 2.0,
            slippage_bps: 1.0,
        }
    }
}

/// An entry order with attached stop-loss and take-profit, ready for the
/// exchange. Quantities and prices are already snapped to instrument steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketOrder {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    /// Limit price for the resting entry.
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl BracketOrder {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        quantity: f64,
        price: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            quantity,
            price,
            stop_loss,
            take_profit,
        }
    }
}

/// Instrument size/price granularity pulled from the exchange.
/// Applied on top of risk sizing, never fused into it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentFilters {
    pub min_qty: f64,
    pub qty_step: f64,
    pub tick_size: f64,
}

/// How the process is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Backtest,
    Replay,
    Live,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Backtest => write!(f, "backtest"),
            RunMode::Replay => write!(f, "replay"),
            RunMode::Live => write!(f, "live"),
        }
    }
}
