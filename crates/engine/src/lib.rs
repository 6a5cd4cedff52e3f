pub mod bybit;
pub mod live;
pub mod order;

pub use bybit::BybitClient;
pub use live::LiveRunner;
pub use order::build_bracket;
