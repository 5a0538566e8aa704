//! End-to-end trading loop against a scripted broker and a live relay.

use alpaca_trader::config::RuntimeConfig;
use alpaca_trader::execution::{Broker, BrokerError, OrderBuilder};
use alpaca_trader::models::account::{Clock, Position};
use alpaca_trader::models::order::{Order, OrderRequest, OrderSide, OrderStatus};
use alpaca_trader::relay::{RelayClient, RelayServer};
use alpaca_trader::strategies::StrategyConfig;
use alpaca_trader::trader::{TickOutcome, Trader, TraderState};

use async_trait::async_trait;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Mutex;
use tokio::sync::broadcast;

const STRATEGY: &str = r#"
    symbol = "spy"
    quantity = 5
    first_order_side = "sell"
    order_type = "stop_limit"
    time_in_force = "day"

    [initial]
    buy_limit_price = 300
    buy_stop_price = 301
    sell_limit_price = 320
    sell_stop_price = 319

    [loop]
    buy_limit_price = 305
    buy_stop_price = 306
    sell_limit_price = 325
    sell_stop_price = 324
"#;

/// Broker whose orders never fill on their own: only the relay reports fills.
#[derive(Default)]
struct ScriptedBroker {
    submitted: Mutex<Vec<OrderRequest>>,
    status_lookups: Mutex<u32>,
}

fn order(id: &str, side: OrderSide, status: &str) -> Order {
    serde_json::from_value(json!({
        "id": id,
        "symbol": "SPY",
        "type": "stop_limit",
        "side": side.as_str(),
        "time_in_force": "day",
        "status": status,
    }))
    .unwrap()
}

#[async_trait]
impl Broker for ScriptedBroker {
    async fn get_clock(&self) -> Result<Clock, BrokerError> {
        Ok(serde_json::from_value(json!({
            "timestamp": "2024-03-01T11:00:00-05:00",
            "is_open": true,
            "next_open": "2024-03-04T09:30:00-05:00",
            "next_close": "2024-03-01T16:00:00-05:00",
        }))?)
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<Order, BrokerError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request.clone());
        Ok(order(&format!("spy-{}", submitted.len()), request.side, "accepted"))
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, BrokerError> {
        *self.status_lookups.lock().unwrap() += 1;
        Ok(order(order_id, OrderSide::Buy, "new"))
    }

    async fn get_position(&self, _symbol: &str) -> Result<Option<Position>, BrokerError> {
        Ok(None)
    }

    async fn cancel_all_orders(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[tokio::test]
async fn relay_fills_drive_the_alternation() {
    let server = RelayServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(server.run(shutdown_tx.subscribe()));

    let strategy = StrategyConfig::from_toml_str(STRATEGY).unwrap();
    let builder = OrderBuilder::new(&strategy).unwrap();
    let runtime = RuntimeConfig {
        update_time_secs: 0.01,
        sleep_after_error_secs: 0.01,
    };
    let mut trader = Trader::new(ScriptedBroker::default(), builder, &runtime)
        .with_relay(RelayClient::new(addr.clone()));
    let streamer = RelayClient::connect(addr).await.unwrap();

    // First order: sell side, initial prices, both limit and stop kept
    trader.tick().await.unwrap();
    {
        let submitted = trader.broker().submitted.lock().unwrap();
        assert_eq!(submitted[0].symbol, "SPY");
        assert_eq!(submitted[0].side, OrderSide::Sell);
        assert_eq!(submitted[0].limit_price, Some(dec!(320)));
        assert_eq!(submitted[0].stop_price, Some(dec!(319)));
    }

    // Relay has not seen the order yet: the broker is asked
    assert_eq!(
        trader.tick().await.unwrap(),
        TickOutcome::Waiting(OrderStatus::New)
    );
    assert_eq!(*trader.broker().status_lookups.lock().unwrap(), 1);

    // Streamer reports the fill; the broker still says "new"
    streamer
        .write(&order("spy-1", OrderSide::Sell, "filled"))
        .await
        .unwrap();
    assert!(matches!(trader.tick().await.unwrap(), TickOutcome::Submitted(_)));
    assert_eq!(*trader.broker().status_lookups.lock().unwrap(), 1);

    {
        let submitted = trader.broker().submitted.lock().unwrap();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[1].side, OrderSide::Buy);
        assert_eq!(submitted[1].limit_price, Some(dec!(305)));
        assert_eq!(submitted[1].stop_price, Some(dec!(306)));
    }
    assert_eq!(
        trader.state(),
        &TraderState::Active {
            last_order_id: "spy-2".into(),
            next_side: OrderSide::Sell,
            orders_placed: 2,
        }
    );

    // A partial fill keeps the trader waiting
    streamer
        .write(&order("spy-2", OrderSide::Buy, "partially_filled"))
        .await
        .unwrap();
    assert_eq!(
        trader.tick().await.unwrap(),
        TickOutcome::Waiting(OrderStatus::PartiallyFilled)
    );
    assert_eq!(trader.broker().submitted.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn unreachable_relay_falls_back_to_broker() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let strategy = StrategyConfig::from_toml_str(STRATEGY).unwrap();
    let builder = OrderBuilder::new(&strategy).unwrap();
    let runtime = RuntimeConfig {
        update_time_secs: 0.01,
        sleep_after_error_secs: 0.01,
    };
    let mut trader =
        Trader::new(ScriptedBroker::default(), builder, &runtime).with_relay(RelayClient::new(addr));

    trader.tick().await.unwrap();
    assert_eq!(
        trader.tick().await.unwrap(),
        TickOutcome::Waiting(OrderStatus::New)
    );
    assert_eq!(*trader.broker().status_lookups.lock().unwrap(), 1);
}
