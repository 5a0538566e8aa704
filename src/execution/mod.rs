pub mod alpaca_client;
pub mod error;
pub mod order_builder;

use crate::models::account::{Clock, Position};
use crate::models::order::{Order, OrderRequest};
use async_trait::async_trait;

pub use alpaca_client::{AlpacaClient, ListOrdersQuery};
pub use error::BrokerError;
pub use order_builder::OrderBuilder;

/// The broker operations the trading loop depends on.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_clock(&self) -> Result<Clock, BrokerError>;

    async fn submit_order(&self, request: &OrderRequest) -> Result<Order, BrokerError>;

    async fn get_order(&self, order_id: &str) -> Result<Order, BrokerError>;

    /// `None` when there is no open position in `symbol`.
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError>;

    async fn cancel_all_orders(&self) -> Result<(), BrokerError>;
}
