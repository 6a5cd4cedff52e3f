pub mod config;
pub mod indicators;
pub mod sma_cross;

pub use config::StrategyFileConfig;
pub use sma_cross::SmaCross;

use common::{Bar, Signal};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StrategyError {
    #[error("unknown strategy type '{0}'")]
    UnknownType(String),

    #[error("invalid parameters for '{strategy}': {reason}")]
    InvalidParams { strategy: String, reason: String },
}

/// All strategy implementations must satisfy this trait.
///
/// A strategy is a pure signal source: given a window of closed bars
/// (oldest first) it returns one of LONG / SHORT / FLAT plus metadata.
/// It is called once per simulation step and must be cheap to call
/// repeatedly; it holds no position state of its own.
pub trait Strategy: Send + Sync {
    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str;

    /// How many bars this strategy needs before it can output a signal.
    fn warmup(&self) -> usize;

    /// Evaluate the bar window ending at the current bar.
    /// Always returns a signal; FLAT when undecided or still warming up.
    fn generate_signal(&self, bars: &[Bar]) -> Signal;
}

impl std::fmt::Debug for dyn Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy").field("name", &self.name()).finish()
    }
}

/// Build a strategy instance from config, rejecting unknown types.
pub fn build_strategy(cfg: &config::StrategyConfig) -> Result<Box<dyn Strategy>, StrategyError> {
    match cfg.strategy_type.as_str() {
        "sma_cross" => {
            let fast = cfg.fast.unwrap_or(20);
            let slow = cfg.slow.unwrap_or(50);
            if fast >= slow {
                return Err(StrategyError::InvalidParams {
                    strategy: "sma_cross".to_string(),
                    reason: format!("fast must be < slow, got {fast}/{slow}"),
                });
            }
            Ok(Box::new(SmaCross::new(fast, slow)))
        }
        other => Err(StrategyError::UnknownType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;

    fn cfg(strategy_type: &str, fast: Option<usize>, slow: Option<usize>) -> StrategyConfig {
        StrategyConfig {
            strategy_type: strategy_type.to_string(),
            fast,
            slow,
        }
    }

    #[test]
    fn builds_sma_cross_with_defaults() {
        let strat = build_strategy(&cfg("sma_cross", None, None)).unwrap();
        assert_eq!(strat.name(), "sma_cross_20_50");
    }

    #[test]
    fn rejects_inverted_periods() {
        let err = build_strategy(&cfg("sma_cross", Some(50), Some(20))).unwrap_err();
        assert!(matches!(err, StrategyError::InvalidParams { .. }));
    }

    #[test]
    fn rejects_unknown_type() {
        let err = build_strategy(&cfg("momentum", None, None)).unwrap_err();
        assert_eq!(err, StrategyError::UnknownType("momentum".to_string()));
    }
}
