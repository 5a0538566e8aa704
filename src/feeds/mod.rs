pub mod backoff;
pub mod market_trades;
pub mod trade_updates;
