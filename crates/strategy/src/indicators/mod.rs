pub mod atr;
pub mod sma;

pub use atr::atr;
pub use sma::sma;
