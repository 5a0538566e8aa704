use crate::models::order::{OrderRequest, OrderSide};
use crate::strategies::{PricePhase, StrategyConfig, StrategyError};

/// Builds order requests from a sanitized strategy.
///
/// Each request gets a fresh client order id so a resubmitted request can be
/// told apart from the original in the broker's order history.
#[derive(Debug, Clone)]
pub struct OrderBuilder {
    strategy: StrategyConfig,
}

impl OrderBuilder {
    /// Sanitizes `strategy` once; every order built afterwards is safe.
    pub fn new(strategy: &StrategyConfig) -> Result<Self, StrategyError> {
        Ok(Self {
            strategy: strategy.sanitized()?,
        })
    }

    pub fn strategy(&self) -> &StrategyConfig {
        &self.strategy
    }

    pub fn build(&self, side: OrderSide, phase: PricePhase) -> OrderRequest {
        let prices = self.strategy.prices(phase).for_side(side);
        OrderRequest {
            symbol: self.strategy.symbol.clone(),
            qty: self.strategy.quantity,
            side,
            order_type: self.strategy.order_type,
            time_in_force: self.strategy.time_in_force,
            limit_price: prices.limit,
            stop_price: prices.stop,
            client_order_id: Some(format!(
                "{}-{}-{}",
                self.strategy.symbol.to_lowercase(),
                side,
                uuid::Uuid::new_v4().simple()
            )),
        }
    }
}
