use async_trait::async_trait;

use crate::{Bar, BracketOrder, InstrumentFilters, Result, Side};

/// Abstraction over the exchange connection.
///
/// `BybitClient` in `crates/engine` implements this for the real venue.
/// Simulation drivers only need `fetch_bars`; the live driver additionally
/// submits and cancels orders through it.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Fetch up to `limit` closed bars, oldest first.
    /// Must fail with a clear error when the venue returns no bars.
    async fn fetch_bars(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Bar>>;

    /// Submit a bracket entry (limit entry with attached SL/TP).
    /// Returns the exchange order id.
    async fn submit_order(&self, order: &BracketOrder) -> Result<String>;

    /// Cancel a resting order.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// Reduce-only market close of an open position (flip / emergency close).
    async fn close_position_market(&self, symbol: &str, side: Side, quantity: f64) -> Result<()>;

    /// Lot-size and tick granularity for a symbol.
    async fn instrument_filters(&self, symbol: &str) -> Result<InstrumentFilters>;
}
