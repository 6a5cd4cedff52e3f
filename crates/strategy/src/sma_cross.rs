use std::collections::HashMap;

use common::{Bar, Signal, SignalKind};

use crate::indicators::{atr, sma};
use crate::Strategy;

const ATR_PERIOD: usize = 14;

/// Moving-average crossover strategy.
///
/// Goes LONG when the fast SMA crosses above the slow SMA, SHORT on the
/// opposite cross, FLAT otherwise. Emits `atr14` in the signal metadata so
/// the risk sizer can place stops.
#[derive(Debug, Clone)]
pub struct SmaCross {
    name: String,
    fast: usize,
    slow: usize,
}

impl SmaCross {
    pub fn new(fast: usize, slow: usize) -> Self {
        assert!(fast < slow, "fast MA must be smaller than slow MA");
        Self {
            name: format!("sma_cross_{fast}_{slow}"),
            fast,
            slow,
        }
    }

    fn meta(&self, bars: &[Bar], fast_now: f64, slow_now: f64) -> HashMap<String, f64> {
        let mut meta = HashMap::new();
        meta.insert("price".to_string(), bars[bars.len() - 1].close);
        meta.insert("fast".to_string(), fast_now);
        meta.insert("slow".to_string(), slow_now);
        if let Some(v) = atr(bars, ATR_PERIOD) {
            meta.insert("atr14".to_string(), v);
        }
        meta
    }
}

impl Strategy for SmaCross {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        // enough bars for the slow SMA at the previous bar, plus ATR
        self.slow.max(ATR_PERIOD) + 2
    }

    fn generate_signal(&self, bars: &[Bar]) -> Signal {
        if bars.len() < self.warmup() {
            return Signal::flat("not_enough_data");
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let prev_closes = &closes[..closes.len() - 1];

        let (Some(fast_now), Some(slow_now), Some(fast_prev), Some(slow_prev)) = (
            sma(&closes, self.fast),
            sma(&closes, self.slow),
            sma(prev_closes, self.fast),
            sma(prev_closes, self.slow),
        ) else {
            return Signal::flat("sma_warming_up");
        };

        // Cross up: previously fast <= slow, now fast > slow
        if fast_prev <= slow_prev && fast_now > slow_now {
            return Signal::new(SignalKind::Long, "bull_cross", self.meta(bars, fast_now, slow_now));
        }

        // Cross down: previously fast >= slow, now fast < slow
        if fast_prev >= slow_prev && fast_now < slow_now {
            return Signal::new(SignalKind::Short, "bear_cross", self.meta(bars, fast_now, slow_now));
        }

        Signal::new(SignalKind::Flat, "no_cross", self.meta(bars, fast_now, slow_now))
    }
}
