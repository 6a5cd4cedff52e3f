//! Risk sizing and the fee/slippage cost model.
//!
//! Pure arithmetic, no I/O. Every simulated fill and every live order is
//! sized here; exchange lot-step and tick rounding are layered on top by
//! the order builder in `crates/engine`, never fused into these values.

use thiserror::Error;

use common::Side;

/// Decimal places `position_size` rounds to. Fine enough for exchange size
/// granularity; true lot-step snapping happens at order-build time.
const QTY_DECIMALS: i32 = 6;

#[derive(Debug, Error, PartialEq)]
pub enum RiskError {
    /// Stop distance was zero or negative. The caller skips the entry
    /// attempt; this never aborts a session.
    #[error("stop distance must be > 0, got {0}")]
    InvalidStopDistance(f64),
}

/// Proposed stop-loss and take-profit levels for an entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub stop: f64,
    pub target: f64,
}

/// Absolute cost of a basis-point rate at a given price.
/// Used identically for fees and slippage, entry and exit.
pub fn cost_bps(price: f64, rate_bps: f64) -> f64 {
    price * rate_bps / 10_000.0
}

/// Position quantity such that losing the full stop distance costs
/// `equity * risk_pct`. Rounded to a fixed fractional precision as a late
/// safety step.
pub fn position_size(equity: f64, risk_pct: f64, stop_distance: f64) -> Result<f64, RiskError> {
    if stop_distance <= 0.0 {
        return Err(RiskError::InvalidStopDistance(stop_distance));
    }
    let risk_amount = equity * risk_pct;
    let qty = risk_amount / stop_distance;
    let factor = 10f64.powi(QTY_DECIMALS);
    Ok((qty * factor).round() / factor)
}

/// Stop/target levels at ATR multiples from the entry price.
/// No tick rounding here; the order builder snaps prices to the instrument.
pub fn propose_levels(entry: f64, atr: f64, atr_mult_sl: f64, atr_mult_tp: f64, side: Side) -> Levels {
    match side {
        Side::Long => Levels {
            stop: entry - atr * atr_mult_sl,
            target: entry + atr * atr_mult_tp,
        },
        Side::Short => Levels {
            stop: entry + atr * atr_mult_sl,
            target: entry - atr * atr_mult_tp,
        },
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_is_linear_in_price_and_rate() {
        // 2 bps on 50_000 = 10.0
        assert!((cost_bps(50_000.0, 2.0) - 10.0).abs() < 1e-9);
        assert_eq!(cost_bps(0.0, 2.0), 0.0);
        assert_eq!(cost_bps(50_000.0, 0.0), 0.0);
    }

    #[test]
    fn sizes_one_percent_risk_against_atr_stop() {
        // equity=2000, risk 1%, ATR stop distance 200 → 0.1 units
        let qty = position_size(2000.0, 0.01, 200.0).unwrap();
        assert!((qty - 0.1).abs() < 1e-9, "got {qty}");
    }

    #[test]
    fn rejects_non_positive_stop_distance() {
        assert_eq!(
            position_size(2000.0, 0.01, 0.0),
            Err(RiskError::InvalidStopDistance(0.0))
        );
        assert!(position_size(2000.0, 0.01, -5.0).is_err());
    }

    #[test]
    fn quantity_rounds_to_six_decimals() {
        // 20 / 3 = 6.666666...
        let qty = position_size(2000.0, 0.01, 3.0).unwrap();
        assert!((qty - 6.666667).abs() < 1e-9, "got {qty}");
    }

    #[test]
    fn long_levels_bracket_the_entry() {
        let lvls = propose_levels(50_000.0, 200.0, 1.0, 2.0, Side::Long);
        assert!((lvls.stop - 49_800.0).abs() < 1e-9);
        assert!((lvls.target - 50_400.0).abs() < 1e-9);
    }

    #[test]
    fn short_levels_mirror_long() {
        let lvls = propose_levels(50_000.0, 200.0, 1.0, 2.0, Side::Short);
        assert!((lvls.stop - 50_200.0).abs() < 1e-9);
        assert!((lvls.target - 49_600.0).abs() < 1e-9);
    }
}
