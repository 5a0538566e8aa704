use crate::models::order::{OrderSide, OrderType, TimeInForce};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("failed to read strategy file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid strategy TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{phase} prices: {field} must be a positive price for {order_type} orders")]
    MissingPrice {
        phase: &'static str,
        field: &'static str,
        order_type: OrderType,
    },
    #[error("{0} orders are not supported by the alternating strategy")]
    UnsupportedOrderType(OrderType),
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(Decimal),
    #[error("symbol must not be empty")]
    EmptySymbol,
}

/// Limit/stop prices for both sides of the book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSet {
    #[serde(default)]
    pub buy_limit_price: Option<Decimal>,
    #[serde(default)]
    pub buy_stop_price: Option<Decimal>,
    #[serde(default)]
    pub sell_limit_price: Option<Decimal>,
    #[serde(default)]
    pub sell_stop_price: Option<Decimal>,
}

/// (limit_price, stop_price) for one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidePrices {
    pub limit: Option<Decimal>,
    pub stop: Option<Decimal>,
}

/// Which price set an order draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricePhase {
    /// The very first order of a run
    Initial,
    /// Every order after the first
    Loop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMonitoring {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_frequency_minutes")]
    pub frequency_minutes: u64,
}

fn default_frequency_minutes() -> u64 {
    1
}

impl Default for EmailMonitoring {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency_minutes: default_frequency_minutes(),
        }
    }
}

/// Single-symbol strategy that alternates buy and sell orders, placing the
/// next one only after the previous one filled.
///
/// ```toml
/// symbol = "AAPL"
/// quantity = 1
/// first_order_side = "buy"
/// order_type = "limit"
/// time_in_force = "gtc"
///
/// [initial]
/// buy_limit_price = 199
/// sell_limit_price = 220
///
/// [loop]
/// buy_limit_price = 200
/// sell_limit_price = 225
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub symbol: String,
    pub quantity: Decimal,
    pub first_order_side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub initial: PriceSet,
    #[serde(rename = "loop", default)]
    pub loop_prices: PriceSet,
    #[serde(default)]
    pub email_monitoring: EmailMonitoring,
}

impl PriceSet {
    pub fn for_side(&self, side: OrderSide) -> SidePrices {
        match side {
            OrderSide::Buy => SidePrices {
                limit: self.buy_limit_price,
                stop: self.buy_stop_price,
            },
            OrderSide::Sell => SidePrices {
                limit: self.sell_limit_price,
                stop: self.sell_stop_price,
            },
        }
    }

    /// Keep only the prices `order_type` uses and require those to be set.
    fn sanitize(mut self, order_type: OrderType, phase: &'static str) -> Result<Self, StrategyError> {
        let require = |value: Option<Decimal>, field: &'static str| -> Result<(), StrategyError> {
            match value {
                Some(p) if p > Decimal::ZERO => Ok(()),
                _ => Err(StrategyError::MissingPrice {
                    phase,
                    field,
                    order_type,
                }),
            }
        };

        match order_type {
            OrderType::Market => {
                self = PriceSet::default();
            }
            OrderType::Limit => {
                require(self.buy_limit_price, "buy_limit_price")?;
                require(self.sell_limit_price, "sell_limit_price")?;
                self.buy_stop_price = None;
                self.sell_stop_price = None;
            }
            OrderType::Stop => {
                require(self.buy_stop_price, "buy_stop_price")?;
                require(self.sell_stop_price, "sell_stop_price")?;
                self.buy_limit_price = None;
                self.sell_limit_price = None;
            }
            OrderType::StopLimit => {
                require(self.buy_limit_price, "buy_limit_price")?;
                require(self.sell_limit_price, "sell_limit_price")?;
                require(self.buy_stop_price, "buy_stop_price")?;
                require(self.sell_stop_price, "sell_stop_price")?;
            }
            OrderType::TrailingStop => {
                return Err(StrategyError::UnsupportedOrderType(order_type));
            }
        }
        Ok(self)
    }
}

impl StrategyConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StrategyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StrategyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, StrategyError> {
        Ok(toml::from_str(text)?)
    }

    /// Return a copy where unused prices are cleared and needed ones are
    /// verified for both the initial and the loop price sets.
    pub fn sanitized(&self) -> Result<Self, StrategyError> {
        if self.symbol.trim().is_empty() {
            return Err(StrategyError::EmptySymbol);
        }
        if self.quantity <= Decimal::ZERO {
            return Err(StrategyError::InvalidQuantity(self.quantity));
        }
        Ok(Self {
            symbol: self.symbol.trim().to_uppercase(),
            initial: self.initial.clone().sanitize(self.order_type, "initial")?,
            loop_prices: self.loop_prices.clone().sanitize(self.order_type, "loop")?,
            ..self.clone()
        })
    }

    pub fn prices(&self, phase: PricePhase) -> &PriceSet {
        match phase {
            PricePhase::Initial => &self.initial,
            PricePhase::Loop => &self.loop_prices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const LIMIT_STRATEGY: &str = r#"
        symbol = "aapl"
        quantity = 1
        first_order_side = "buy"
        order_type = "limit"
        time_in_force = "gtc"

        [initial]
        buy_limit_price = 199
        sell_limit_price = 220
        buy_stop_price = 199
        sell_stop_price = 201

        [loop]
        buy_limit_price = 200
        sell_limit_price = "225.50"
        sell_stop_price = 210

        [email_monitoring]
        enabled = true
        frequency_minutes = 5
    "#;

    #[test]
    fn test_parse_and_sanitize_limit() {
        let strategy = StrategyConfig::from_toml_str(LIMIT_STRATEGY).unwrap();
        assert_eq!(strategy.first_order_side, OrderSide::Buy);
        assert_eq!(strategy.email_monitoring.frequency_minutes, 5);

        let safe = strategy.sanitized().unwrap();
        assert_eq!(safe.symbol, "AAPL");
        assert_eq!(
            safe.initial.for_side(OrderSide::Buy),
            SidePrices { limit: Some(dec!(199)), stop: None }
        );
        assert_eq!(
            safe.loop_prices.for_side(OrderSide::Sell),
            SidePrices { limit: Some(dec!(225.50)), stop: None }
        );
    }

    #[test]
    fn test_market_clears_all_prices() {
        let mut strategy = StrategyConfig::from_toml_str(LIMIT_STRATEGY).unwrap();
        strategy.order_type = OrderType::Market;
        let safe = strategy.sanitized().unwrap();
        assert_eq!(safe.initial, PriceSet::default());
        assert_eq!(safe.loop_prices, PriceSet::default());
    }

    #[test]
    fn test_stop_requires_stop_prices() {
        let mut strategy = StrategyConfig::from_toml_str(LIMIT_STRATEGY).unwrap();
        strategy.order_type = OrderType::Stop;
        // loop set has no buy_stop_price
        let err = strategy.sanitized().unwrap_err();
        assert!(matches!(
            err,
            StrategyError::MissingPrice { phase: "loop", field: "buy_stop_price", .. }
        ));

        strategy.loop_prices.buy_stop_price = Some(dec!(200));
        let safe = strategy.sanitized().unwrap();
        assert_eq!(safe.initial.buy_limit_price, None);
        assert_eq!(safe.initial.buy_stop_price, Some(dec!(199)));
    }

    #[test]
    fn test_stop_limit_keeps_everything() {
        let mut strategy = StrategyConfig::from_toml_str(LIMIT_STRATEGY).unwrap();
        strategy.order_type = OrderType::StopLimit;
        strategy.loop_prices.buy_stop_price = Some(dec!(200));
        let safe = strategy.sanitized().unwrap();
        assert_eq!(
            safe.loop_prices.for_side(OrderSide::Buy),
            SidePrices { limit: Some(dec!(200)), stop: Some(dec!(200)) }
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut strategy = StrategyConfig::from_toml_str(LIMIT_STRATEGY).unwrap();
        strategy.initial.sell_limit_price = Some(Decimal::ZERO);
        assert!(matches!(
            strategy.sanitized(),
            Err(StrategyError::MissingPrice { phase: "initial", field: "sell_limit_price", .. })
        ));

        let mut strategy = StrategyConfig::from_toml_str(LIMIT_STRATEGY).unwrap();
        strategy.quantity = dec!(0);
        assert!(matches!(strategy.sanitized(), Err(StrategyError::InvalidQuantity(_))));

        let mut strategy = StrategyConfig::from_toml_str(LIMIT_STRATEGY).unwrap();
        strategy.order_type = OrderType::TrailingStop;
        assert!(matches!(
            strategy.sanitized(),
            Err(StrategyError::UnsupportedOrderType(OrderType::TrailingStop))
        ));
    }

    #[test]
    fn test_email_monitoring_defaults_off() {
        let text = LIMIT_STRATEGY.split("[email_monitoring]").next().unwrap();
        let strategy = StrategyConfig::from_toml_str(text).unwrap();
        assert_eq!(strategy.email_monitoring, EmailMonitoring::default());
    }
}
