pub mod alternating;

pub use alternating::{PricePhase, PriceSet, SidePrices, StrategyConfig, StrategyError};
