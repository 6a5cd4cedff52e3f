use common::Bar;

/// Average True Range with Wilder smoothing (`alpha = 1/period` EMA over the
/// true-range series), seeded with the first true range.
///
/// The first bar has no previous close, so its true range is plain
/// high − low. Returns `None` for an empty window or a zero period.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.is_empty() || period == 0 {
        return None;
    }

    let alpha = 1.0 / period as f64;
    let mut value = bars[0].high - bars[0].low;

    for pair in bars.windows(2) {
        let prev_close = pair[0].close;
        let bar = &pair[1];
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        value = (1.0 - alpha) * value + alpha * tr;
    }

    Some(value)
}
