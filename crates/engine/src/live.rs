use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use common::{Bar, ExchangeClient, Result, SessionConfig, Side};
use sim::{Session, TradeLog};
use strategy::Strategy;

use crate::order::build_bracket;

/// Entry limit price offset from the bar open, in the passive direction.
/// Keeps the PostOnly order resting instead of crossing the book.
const ENTRY_NUDGE: f64 = 0.002;

/// Polls the exchange for closed bars and drives a [`Session`] forward,
/// mirroring every simulated entry with a real bracket order.
///
/// The newest kline row is the forming candle; a bar counts as closed once
/// a row with a later start time shows up. The simulated session remains
/// the source of truth for equity and the ledger; exchange orders are the
/// side effect, not the state.
pub struct LiveRunner {
    cfg: SessionConfig,
    strat: Box<dyn Strategy>,
    client: Arc<dyn ExchangeClient>,
    session: Session,
    log: TradeLog,
    poll: Duration,
    lookback: usize,
    last_seen_ts: Option<DateTime<Utc>>,
    resting_order_id: Option<String>,
    retry_delay: Duration,
}

impl LiveRunner {
    pub fn new(
        cfg: SessionConfig,
        strat: Box<dyn Strategy>,
        client: Arc<dyn ExchangeClient>,
        log: TradeLog,
        poll: Duration,
        lookback: usize,
    ) -> Self {
        let session = Session::new(cfg.clone());
        Self {
            cfg,
            strat,
            client,
            session,
            log,
            poll,
            lookback,
            last_seen_ts: None,
            resting_order_id: None,
            retry_delay: Duration::from_secs(3),
        }
    }

    /// Override the delay after a failed fetch. Used by tests.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Poll until `shutdown` flips to `true`. A resting entry order is
    /// cancelled on the way out; fetch failures are logged and retried
    /// without losing session state.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            symbol = %self.cfg.symbol,
            interval = %self.cfg.interval,
            strategy = self.strat.name(),
            "Live runner started"
        );

        loop {
            tokio::select! {
                _ = sleep(self.poll) => {}
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let bars = match self
                .client
                .fetch_bars(&self.cfg.symbol, &self.cfg.interval, self.lookback)
                .await
            {
                Ok(bars) => bars,
                Err(e) => {
                    warn!(error = %e, "Kline fetch failed, retrying");
                    sleep(self.retry_delay).await;
                    continue;
                }
            };
            if bars.len() < 2 {
                continue;
            }

            let newest_ts = bars[bars.len() - 1].ts;
            match self.last_seen_ts {
                None => {
                    // First fetch only anchors the bar clock.
                    self.last_seen_ts = Some(newest_ts);
                    continue;
                }
                Some(seen) if seen == newest_ts => continue,
                Some(_) => self.last_seen_ts = Some(newest_ts),
            }

            if let Err(e) = self.on_new_bar(&bars).await {
                warn!(error = %e, "Bar handling failed");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// React to a freshly closed bar: resolve exits on it, then act on the
    /// new signal at the forming bar's open.
    async fn on_new_bar(&mut self, bars: &[Bar]) -> Result<()> {
        let last = &bars[bars.len() - 1];
        let prev = &bars[bars.len() - 2];

        self.session.mark(prev.ts);
        if let Some(trade) = self.session.check_exit(prev) {
            // The exchange resolves the bracket legs on its own; only the
            // ledger needs the record.
            self.log.append(&trade)?;
            self.resting_order_id = None;
        }

        let signal = self.strat.generate_signal(bars);
        info!(
            symbol = %self.cfg.symbol,
            bar = %prev.ts,
            kind = ?signal.kind,
            reason = %signal.reason,
            "Bar closed"
        );

        if signal.entry_side().is_none() {
            // A FLAT read withdraws the resting entry even while a position
            // is open; the bracket legs keep protecting the position itself.
            self.cancel_resting().await;
            return Ok(());
        }

        if let Some(trade) = self.session.flip_if_opposed(&signal, last.open, last.ts) {
            self.log.append(&trade)?;
            self.cancel_resting().await;
            if let Err(e) = self
                .client
                .close_position_market(&self.cfg.symbol, trade.side, trade.quantity)
                .await
            {
                warn!(error = %e, "Market close on flip failed");
            }
        }

        if let Some(pos) = self
            .session
            .try_enter(&signal, last.close, last.open, last.ts)
        {
            self.submit_entry(pos.side, last.open, signal.resolve_atr(last.close))
                .await;
        }
        Ok(())
    }

    /// Mirror a simulated entry with a resting PostOnly bracket order,
    /// nudged off the open so it rests instead of crossing.
    async fn submit_entry(&mut self, side: Side, open: f64, atr: f64) {
        let filters = match self.client.instrument_filters(&self.cfg.symbol).await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "Instrument filters unavailable, order skipped");
                return;
            }
        };

        let entry_px = match side {
            Side::Long => open * (1.0 - ENTRY_NUDGE),
            Side::Short => open * (1.0 + ENTRY_NUDGE),
        };
        let order = match build_bracket(
            &self.cfg.symbol,
            side,
            entry_px,
            atr,
            self.session.equity(),
            &self.cfg,
            &filters,
        ) {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "Bracket build failed, order skipped");
                return;
            }
        };

        match self.client.submit_order(&order).await {
            Ok(order_id) => {
                info!(order_id = %order_id, side = %side, price = order.price, "Entry order placed");
                self.resting_order_id = Some(order_id);
            }
            Err(e) => warn!(error = %e, "Order submission failed"),
        }
    }

    async fn cancel_resting(&mut self) {
        if let Some(order_id) = self.resting_order_id.take() {
            if let Err(e) = self.client.cancel_order(&self.cfg.symbol, &order_id).await {
                warn!(order_id = %order_id, error = %e, "Cancel failed");
            }
        }
    }

    async fn shutdown(&mut self) {
        info!(symbol = %self.cfg.symbol, equity = self.session.equity(), "Live runner stopping");
        self.cancel_resting().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use common::{BracketOrder, Error, InstrumentFilters, Signal, SignalKind};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn ts(i: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(i * 900, 0).unwrap()
    }

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            ts: ts(i),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    fn flat_bars(n: i64) -> Vec<Bar> {
        (0..n).map(|i| bar(i, 100.0, 101.0, 99.0, 100.0)).collect()
    }

    enum FetchScript {
        Bars(Vec<Bar>),
        Fail(String),
    }

    struct MockExchange {
        fetches: Mutex<Vec<FetchScript>>,
        cursor: Mutex<usize>,
        submitted: Mutex<Vec<BracketOrder>>,
        cancelled: Mutex<Vec<String>>,
        market_closes: Mutex<Vec<(Side, f64)>>,
    }

    impl MockExchange {
        fn new(fetches: Vec<FetchScript>) -> Self {
            Self {
                fetches: Mutex::new(fetches),
                cursor: Mutex::new(0),
                submitted: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
                market_closes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for MockExchange {
        async fn fetch_bars(&self, _symbol: &str, _interval: &str, _limit: usize) -> Result<Vec<Bar>> {
            let scripts = self.fetches.lock().unwrap();
            let mut cursor = self.cursor.lock().unwrap();
            // Past the end of the script, keep replaying the final entry.
            let idx = (*cursor).min(scripts.len() - 1);
            *cursor += 1;
            match &scripts[idx] {
                FetchScript::Bars(bars) => Ok(bars.clone()),
                FetchScript::Fail(msg) => Err(Error::Http(msg.clone())),
            }
        }

        async fn submit_order(&self, order: &BracketOrder) -> Result<String> {
            self.submitted.lock().unwrap().push(order.clone());
            Ok(format!("oid-{}", self.submitted.lock().unwrap().len()))
        }

        async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
            self.cancelled.lock().unwrap().push(order_id.to_string());
            Ok(())
        }

        async fn close_position_market(&self, _symbol: &str, side: Side, quantity: f64) -> Result<()> {
            self.market_closes.lock().unwrap().push((side, quantity));
            Ok(())
        }

        async fn instrument_filters(&self, _symbol: &str) -> Result<InstrumentFilters> {
            Ok(InstrumentFilters {
                min_qty: 0.001,
                qty_step: 0.001,
                tick_size: 0.5,
            })
        }
    }

    /// Goes long on every window once it has two bars.
    struct AlwaysLong;

    impl Strategy for AlwaysLong {
        fn name(&self) -> &str {
            "always_long"
        }

        fn warmup(&self) -> usize {
            2
        }

        fn generate_signal(&self, bars: &[Bar]) -> Signal {
            if bars.len() < 2 {
                return Signal::flat("not_enough_data");
            }
            let mut meta = HashMap::new();
            meta.insert("atr14".to_string(), 2.0);
            Signal::new(SignalKind::Long, "scripted_long", meta)
        }
    }

    fn runner(client: Arc<MockExchange>, dir: &tempfile::TempDir) -> LiveRunner {
        let log = TradeLog::open(dir.path().join("trades.csv"), "15", "live").unwrap();
        LiveRunner::new(
            SessionConfig::default(),
            Box::new(AlwaysLong),
            client,
            log,
            Duration::from_millis(5),
            50,
        )
        .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn new_bar_triggers_entry_and_shutdown_cancels_it() {
        let initial = flat_bars(5);
        let mut extended = initial.clone();
        extended.push(bar(5, 100.0, 101.0, 99.0, 100.0));

        let client = Arc::new(MockExchange::new(vec![
            FetchScript::Bars(initial),
            FetchScript::Bars(extended),
        ]));
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(Arc::clone(&client), &dir);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(rx));
        sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let submitted = client.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1, "one entry for one new bar");
        let order = &submitted[0];
        assert_eq!(order.side, Side::Long);
        // long entry rests below the open
        assert!(order.price < 100.0);
        assert!(order.stop_loss < order.price);
        assert!(order.take_profit > order.price);

        let cancelled = client.cancelled.lock().unwrap();
        assert_eq!(cancelled.len(), 1, "resting entry cancelled on shutdown");
        assert_eq!(cancelled[0], "oid-1");
    }

    #[tokio::test]
    async fn fetch_failure_is_retried_without_losing_state() {
        let initial = flat_bars(5);
        let mut extended = initial.clone();
        extended.push(bar(5, 100.0, 101.0, 99.0, 100.0));

        let client = Arc::new(MockExchange::new(vec![
            FetchScript::Bars(initial),
            FetchScript::Fail("connection reset".to_string()),
            FetchScript::Bars(extended),
        ]));
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(Arc::clone(&client), &dir);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(rx));
        sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(client.submitted.lock().unwrap().len(), 1);
    }

    /// Goes long once when the window reaches `fire_at` bars, FLAT otherwise.
    struct LongOnce {
        fire_at: usize,
    }

    impl Strategy for LongOnce {
        fn name(&self) -> &str {
            "long_once"
        }

        fn warmup(&self) -> usize {
            2
        }

        fn generate_signal(&self, bars: &[Bar]) -> Signal {
            if bars.len() == self.fire_at {
                let mut meta = HashMap::new();
                meta.insert("atr14".to_string(), 2.0);
                Signal::new(SignalKind::Long, "scripted_long", meta)
            } else {
                Signal::flat("scripted_flat")
            }
        }
    }

    #[tokio::test]
    async fn flat_signal_cancels_resting_entry_even_with_position_open() {
        // Bar 6 opens a long whose bracket stays untouched (stop 98,
        // target 104 vs a 99..101 range); bar 7 reads FLAT. The resting
        // entry must be withdrawn on that FLAT bar, not at shutdown.
        let initial = flat_bars(5);
        let mut with_entry = initial.clone();
        with_entry.push(bar(5, 100.0, 101.0, 99.0, 100.0));
        let mut with_flat = with_entry.clone();
        with_flat.push(bar(6, 100.0, 101.0, 99.0, 100.0));

        let client = Arc::new(MockExchange::new(vec![
            FetchScript::Bars(initial),
            FetchScript::Bars(with_entry),
            FetchScript::Bars(with_flat),
        ]));
        let dir = tempfile::tempdir().unwrap();
        let log = TradeLog::open(dir.path().join("trades.csv"), "15", "live").unwrap();
        let runner = LiveRunner::new(
            SessionConfig::default(),
            Box::new(LongOnce { fire_at: 6 }),
            Arc::clone(&client) as Arc<dyn ExchangeClient>,
            log,
            Duration::from_millis(5),
            50,
        )
        .with_retry_delay(Duration::from_millis(1));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(rx));
        sleep(Duration::from_millis(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(client.submitted.lock().unwrap().len(), 1);
        // Exactly one cancel, issued for the FLAT bar; shutdown finds no
        // resting order left to withdraw.
        let cancelled = client.cancelled.lock().unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0], "oid-1");
    }

    #[tokio::test]
    async fn unchanged_window_is_not_reprocessed() {
        // The same window is replayed forever after the new bar, so exactly
        // one entry decision must happen.
        let initial = flat_bars(5);
        let mut extended = initial.clone();
        extended.push(bar(5, 100.0, 101.0, 99.0, 100.0));

        let client = Arc::new(MockExchange::new(vec![
            FetchScript::Bars(initial),
            FetchScript::Bars(extended.clone()),
            FetchScript::Bars(extended),
        ]));
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(Arc::clone(&client), &dir);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(rx));
        sleep(Duration::from_millis(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(client.submitted.lock().unwrap().len(), 1);
    }
}
