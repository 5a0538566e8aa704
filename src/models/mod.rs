pub mod account;
pub mod order;
pub mod trade_update;
