use tracing::debug;

use common::{BracketOrder, Error, InstrumentFilters, Result, SessionConfig, Side};
use risk::{position_size, propose_levels};

/// Snap a quantity down to a valid exchange step, never below the minimum.
/// Snapping down first avoids rounding a size under the minimum into
/// rejection territory.
pub fn round_qty(qty: f64, filters: &InstrumentFilters) -> f64 {
    if filters.qty_step <= 0.0 {
        return qty;
    }
    let snapped = (qty / filters.qty_step).floor() * filters.qty_step;
    let snapped = if snapped < filters.min_qty {
        filters.min_qty
    } else {
        snapped
    };
    round12(snapped)
}

/// Round a price to the nearest instrument tick.
pub fn round_price(px: f64, filters: &InstrumentFilters) -> f64 {
    if filters.tick_size <= 0.0 {
        return px;
    }
    round12((px / filters.tick_size).round() * filters.tick_size)
}

fn round12(value: f64) -> f64 {
    (value * 1e12).round() / 1e12
}

/// Build a bracket entry order: SL/TP from ATR multiples, quantity from the
/// risk sizer, everything snapped to the instrument's steps. The exchange
/// granularity is layered on top of risk sizing here, never inside it.
pub fn build_bracket(
    symbol: &str,
    side: Side,
    entry_px: f64,
    atr: f64,
    equity: f64,
    cfg: &SessionConfig,
    filters: &InstrumentFilters,
) -> Result<BracketOrder> {
    let levels = propose_levels(entry_px, atr, cfg.atr_mult_sl, cfg.atr_mult_tp, side);
    let stop_loss = round_price(levels.stop, filters);
    let take_profit = round_price(levels.target, filters);

    // Stop distance against the rounded stop, so the sized risk matches the
    // order the exchange actually sees.
    let stop_distance = (entry_px - stop_loss).abs();
    let qty = position_size(equity, cfg.risk_pct, stop_distance)
        .map_err(|e| Error::Other(format!("bracket rejected: {e}")))?;
    let qty = round_qty(qty, filters);

    let price = round_price(entry_px, filters);
    debug!(
        symbol = symbol,
        side = %side,
        price = price,
        sl = stop_loss,
        tp = take_profit,
        qty = qty,
        "Bracket built"
    );
    Ok(BracketOrder::new(symbol, side, qty, price, stop_loss, take_profit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> InstrumentFilters {
        InstrumentFilters {
            min_qty: 0.001,
            qty_step: 0.001,
            tick_size: 0.5,
        }
    }

    #[test]
    fn qty_snaps_down_to_step() {
        let f = filters();
        assert!((round_qty(0.1234, &f) - 0.123).abs() < 1e-12);
        assert!((round_qty(0.1, &f) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn qty_never_falls_below_minimum() {
        let f = filters();
        assert!((round_qty(0.0004, &f) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn zero_step_passes_qty_through() {
        let f = InstrumentFilters {
            min_qty: 0.0,
            qty_step: 0.0,
            tick_size: 0.0,
        };
        assert_eq!(round_qty(0.1234, &f), 0.1234);
        assert_eq!(round_price(50_000.3, &f), 50_000.3);
    }

    #[test]
    fn price_rounds_to_nearest_tick() {
        let f = filters();
        assert!((round_price(50_000.3, &f) - 50_000.5).abs() < 1e-9);
        assert!((round_price(50_000.2, &f) - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn bracket_sizes_and_brackets_from_risk_model() {
        let cfg = SessionConfig::default();
        // equity 2000, risk 1%, ATR 200 → stop 49_800, target 50_400, qty 0.1
        let order = build_bracket("BTCUSDT", Side::Long, 50_000.0, 200.0, 2000.0, &cfg, &filters())
            .unwrap();
        assert!((order.stop_loss - 49_800.0).abs() < 1e-9);
        assert!((order.take_profit - 50_400.0).abs() < 1e-9);
        assert!((order.quantity - 0.1).abs() < 1e-9);
        assert!((order.price - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_atr_is_rejected() {
        let cfg = SessionConfig::default();
        let err =
            build_bracket("BTCUSDT", Side::Long, 50_000.0, 0.0, 2000.0, &cfg, &filters()).unwrap_err();
        assert!(matches!(err, Error::Other(_)), "got {err:?}");
    }
}
