pub mod binance;
pub mod dominance;
pub mod hyperliquid;
pub mod mock;

pub use binance::BinanceCandleSource;
pub use dominance::{DominanceCandleSource, DominanceKind};
pub use hyperliquid::HyperliquidCandleSource;
pub use mock::MockCandleSource;
