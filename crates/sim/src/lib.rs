//! Trade simulation: the position state machine, the trade ledger and the
//! offline drivers (historical backtest, incremental replay).
//!
//! Everything here is synchronous and deterministic; the live polling
//! driver in `crates/engine` reuses the same `Session` so backtest and
//! live behavior cannot diverge.

pub mod backtest;
pub mod ledger;
pub mod replay;
pub mod session;

pub use backtest::{run_backtest, BacktestReport};
pub use ledger::TradeLog;
pub use replay::ReplayRunner;
pub use session::Session;
