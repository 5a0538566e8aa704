use crate::config::RuntimeConfig;
use crate::execution::{Broker, BrokerError, OrderBuilder};
use crate::models::order::{Order, OrderSide, OrderStatus};
use crate::relay::RelayClient;
use crate::strategies::PricePhase;
use crate::telemetry::{AlertManager, EmailMonitor};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A non-filled status read from the relay is confirmed with the broker every
/// this many checks, so a fill the streamer missed cannot stall the loop.
pub const RELAY_CONFIRM_EVERY: u32 = 5;

/// Where the alternating loop stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraderState {
    /// No order placed yet in this run
    Fresh,
    Active {
        last_order_id: String,
        next_side: OrderSide,
        orders_placed: u64,
    },
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A new order went out
    Submitted(Order),
    /// The last order is not filled yet
    Waiting(OrderStatus),
}

/// Single-symbol trader that alternates buy and sell orders, placing the next
/// order only once the previous one is filled.
pub struct Trader<B: Broker> {
    broker: B,
    builder: OrderBuilder,
    relay: Option<RelayClient>,
    update_time: Duration,
    sleep_after_error: Duration,
    state: TraderState,
    last_status: Option<OrderStatus>,
    /// Relay-only status checks since the broker was last asked
    relay_checks: u32,
    monitoring: Option<(EmailMonitor, AlertManager)>,
}

impl<B: Broker> Trader<B> {
    pub fn new(broker: B, builder: OrderBuilder, runtime: &RuntimeConfig) -> Self {
        Self {
            broker,
            builder,
            relay: None,
            update_time: runtime.update_time(),
            sleep_after_error: runtime.sleep_after_error(),
            state: TraderState::Fresh,
            last_status: None,
            relay_checks: 0,
            monitoring: None,
        }
    }

    /// Read order status from the relay before asking the broker.
    pub fn with_relay(mut self, relay: RelayClient) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Send periodic status emails if the strategy asks for them and email is
    /// configured.
    pub fn with_alerts(mut self, alerts: AlertManager) -> Self {
        let monitoring = &self.builder.strategy().email_monitoring;
        if !monitoring.enabled {
            return self;
        }
        if !alerts.is_enabled() {
            warn!("Email monitoring is enabled but SendGrid is not configured");
            return self;
        }
        let monitor = EmailMonitor::every_minutes(monitoring.frequency_minutes);
        self.monitoring = Some((monitor, alerts));
        self
    }

    pub fn state(&self) -> &TraderState {
        &self.state
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// One pass of the loop.
    pub async fn tick(&mut self) -> Result<TickOutcome, BrokerError> {
        let (last_order_id, next_side, orders_placed) = match &self.state {
            TraderState::Fresh => return self.place_first_order().await,
            TraderState::Active {
                last_order_id,
                next_side,
                orders_placed,
            } => (last_order_id.clone(), *next_side, *orders_placed),
        };

        let status = self.order_status(&last_order_id).await?;
        if status != OrderStatus::Filled {
            self.note_status(&last_order_id, status);
            return Ok(TickOutcome::Waiting(status));
        }

        info!("Order {last_order_id} filled");
        let request = self.builder.build(next_side, PricePhase::Loop);
        let order = self.broker.submit_order(&request).await?;
        info!(
            "Submitted {} {} {} @ limit={:?} stop={:?} (order {})",
            order.side, request.qty, order.symbol, request.limit_price, request.stop_price, order.id
        );

        self.last_status = Some(order.status);
        self.relay_checks = 0;
        self.state = TraderState::Active {
            last_order_id: order.id.clone(),
            next_side: next_side.opposite(),
            orders_placed: orders_placed + 1,
        };
        Ok(TickOutcome::Submitted(order))
    }

    async fn place_first_order(&mut self) -> Result<TickOutcome, BrokerError> {
        let clock = self.broker.get_clock().await?;
        info!(
            "Market is {} (now {}, next open {}, next close {})",
            if clock.is_open { "open" } else { "closed" },
            clock.timestamp,
            clock.next_open,
            clock.next_close
        );

        let side = self.builder.strategy().first_order_side;
        let request = self.builder.build(side, PricePhase::Initial);
        let order = self.broker.submit_order(&request).await?;
        info!(
            "Submitted first order: {} {} {} @ limit={:?} stop={:?} (order {})",
            order.side, request.qty, order.symbol, request.limit_price, request.stop_price, order.id
        );

        self.last_status = Some(order.status);
        self.relay_checks = 0;
        self.state = TraderState::Active {
            last_order_id: order.id.clone(),
            next_side: side.opposite(),
            orders_placed: 1,
        };
        Ok(TickOutcome::Submitted(order))
    }

    /// A relay `filled` is taken as is. Any other relay status is trusted for
    /// a few checks and then confirmed with the broker. REST is also used when
    /// the relay is off, unreachable or has not seen the order yet.
    async fn order_status(&mut self, order_id: &str) -> Result<OrderStatus, BrokerError> {
        if let Some(relay) = &self.relay {
            match relay.read().await {
                Ok(snapshot) => {
                    let status = snapshot
                        .order(order_id)
                        .and_then(|o| o.get("status"))
                        .and_then(|s| serde_json::from_value::<OrderStatus>(s.clone()).ok());
                    match status {
                        Some(OrderStatus::Filled) => return Ok(OrderStatus::Filled),
                        Some(status) if self.relay_checks + 1 < RELAY_CONFIRM_EVERY => {
                            self.relay_checks += 1;
                            return Ok(status);
                        }
                        Some(status) => {
                            debug!("Relay says {status:?} for order {order_id}, confirming with the broker");
                        }
                        None => {
                            debug!("Relay has no status for order {order_id}, asking the broker");
                        }
                    }
                }
                Err(e) => warn!("Relay read failed, asking the broker: {e}"),
            }
        }
        self.relay_checks = 0;
        Ok(self.broker.get_order(order_id).await?.status)
    }

    fn note_status(&mut self, order_id: &str, status: OrderStatus) {
        if self.last_status == Some(status) {
            return;
        }
        self.last_status = Some(status);
        if status.is_terminal() {
            warn!("Order {order_id} ended as {status:?} without filling; no further orders will be placed");
        } else {
            info!("Order {order_id} is {status:?}");
        }
    }

    async fn send_status_email(&mut self) {
        let Some((monitor, _)) = &mut self.monitoring else {
            return;
        };
        if !monitor.due(Instant::now()) {
            return;
        }

        let symbol = self.builder.strategy().symbol.clone();
        let position = match self.broker.get_position(&symbol).await {
            Ok(Some(p)) => format!("{} {}", p.qty, symbol),
            Ok(None) => "none".to_string(),
            Err(e) => format!("unavailable ({e})"),
        };
        let body = match &self.state {
            TraderState::Fresh => format!("{symbol}: no order placed yet. Position: {position}"),
            TraderState::Active {
                last_order_id,
                next_side,
                orders_placed,
            } => format!(
                "{symbol}: last order {last_order_id} is {:?}, next side {next_side}, \
                 {orders_placed} orders placed. Position: {position}",
                self.last_status.unwrap_or(OrderStatus::Unknown)
            ),
        };

        if let Some((_, alerts)) = &self.monitoring {
            alerts.send(&format!("Trader status: {symbol}"), &body).await;
        }
    }

    /// Tick until `shutdown` resolves, then cancel every open order.
    ///
    /// Errors inside a tick are logged and retried after `sleep_after_error`.
    pub async fn run_forever<F>(&mut self, shutdown: F) -> Result<(), BrokerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Trading {} every {:?} (retry after {:?} on error)",
            self.builder.strategy().symbol,
            self.update_time,
            self.sleep_after_error
        );

        loop {
            let delay = tokio::select! {
                _ = &mut shutdown => break,
                result = self.tick() => match result {
                    Ok(_) => self.update_time,
                    Err(e) => {
                        warn!("Tick failed: {e}");
                        self.sleep_after_error
                    }
                },
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.send_status_email() => {}
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Shutdown requested, cancelling all open orders");
        self.broker.cancel_all_orders().await?;
        info!("All open orders cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::account::{Clock, Position};
    use crate::models::order::OrderRequest;
    use crate::relay::RelayServer;
    use crate::strategies::StrategyConfig;
    use crate::telemetry::http_stub::HttpStub;
    use crate::telemetry::EmailSender;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Mutex;

    const STRATEGY: &str = r#"
        symbol = "AAPL"
        quantity = 2
        first_order_side = "buy"
        order_type = "limit"
        time_in_force = "gtc"

        [initial]
        buy_limit_price = 199
        sell_limit_price = 220

        [loop]
        buy_limit_price = 200
        sell_limit_price = 225
    "#;

    #[derive(Default)]
    struct MockBroker {
        submitted: Mutex<Vec<OrderRequest>>,
        statuses: Mutex<Vec<OrderStatus>>,
        fail_get_order: Mutex<bool>,
        cancelled: Mutex<u32>,
    }

    impl MockBroker {
        fn set_status(&self, status: OrderStatus) {
            self.statuses.lock().unwrap().push(status);
        }

        fn submitted(&self) -> Vec<OrderRequest> {
            self.submitted.lock().unwrap().clone()
        }
    }

    fn order(id: &str, side: OrderSide, status: &str) -> Order {
        serde_json::from_value(json!({
            "id": id,
            "symbol": "AAPL",
            "type": "limit",
            "side": side.as_str(),
            "time_in_force": "gtc",
            "status": status,
        }))
        .unwrap()
    }

    #[async_trait]
    impl Broker for MockBroker {
        async fn get_clock(&self) -> Result<Clock, BrokerError> {
            Ok(serde_json::from_value(json!({
                "timestamp": "2024-01-02T10:00:00-05:00",
                "is_open": true,
                "next_open": "2024-01-03T09:30:00-05:00",
                "next_close": "2024-01-02T16:00:00-05:00",
            }))?)
        }

        async fn submit_order(&self, request: &OrderRequest) -> Result<Order, BrokerError> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(request.clone());
            Ok(order(&format!("order-{}", submitted.len()), request.side, "new"))
        }

        async fn get_order(&self, order_id: &str) -> Result<Order, BrokerError> {
            if *self.fail_get_order.lock().unwrap() {
                return Err(BrokerError::Api {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: None,
                    message: "boom".into(),
                });
            }
            let status = self.statuses.lock().unwrap().last().copied().unwrap_or(OrderStatus::New);
            let mut o = order(order_id, OrderSide::Buy, "new");
            o.status = status;
            Ok(o)
        }

        async fn get_position(&self, _symbol: &str) -> Result<Option<Position>, BrokerError> {
            Ok(None)
        }

        async fn cancel_all_orders(&self) -> Result<(), BrokerError> {
            *self.cancelled.lock().unwrap() += 1;
            Ok(())
        }
    }

    const EMAIL_MONITORING: &str = r#"
        [email_monitoring]
        enabled = true
        frequency_minutes = 1
    "#;

    fn trader() -> Trader<MockBroker> {
        trader_from(STRATEGY)
    }

    fn trader_from(text: &str) -> Trader<MockBroker> {
        let strategy = StrategyConfig::from_toml_str(text).unwrap();
        let builder = OrderBuilder::new(&strategy).unwrap();
        let runtime = RuntimeConfig {
            update_time_secs: 0.01,
            sleep_after_error_secs: 0.01,
        };
        Trader::new(MockBroker::default(), builder, &runtime)
    }

    #[tokio::test]
    async fn test_first_tick_uses_initial_prices() {
        let mut trader = trader();
        let outcome = trader.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Submitted(_)));

        let submitted = trader.broker().submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].side, OrderSide::Buy);
        assert_eq!(submitted[0].limit_price, Some(dec!(199)));
        assert_eq!(submitted[0].qty, dec!(2));
        assert_eq!(
            trader.state(),
            &TraderState::Active {
                last_order_id: "order-1".into(),
                next_side: OrderSide::Sell,
                orders_placed: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_waits_until_filled_then_alternates() {
        let mut trader = trader();
        trader.tick().await.unwrap();

        trader.broker().set_status(OrderStatus::PartiallyFilled);
        assert_eq!(
            trader.tick().await.unwrap(),
            TickOutcome::Waiting(OrderStatus::PartiallyFilled)
        );
        assert_eq!(trader.broker().submitted().len(), 1);

        trader.broker().set_status(OrderStatus::Filled);
        trader.tick().await.unwrap();
        let submitted = trader.broker().submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[1].side, OrderSide::Sell);
        assert_eq!(submitted[1].limit_price, Some(dec!(225)));

        // Still "filled" from the mock's point of view: the next fill flips back
        trader.tick().await.unwrap();
        let submitted = trader.broker().submitted();
        assert_eq!(submitted[2].side, OrderSide::Buy);
        assert_eq!(submitted[2].limit_price, Some(dec!(200)));
        assert!(matches!(
            trader.state(),
            TraderState::Active { orders_placed: 3, next_side: OrderSide::Sell, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_order_stalls_the_loop() {
        let mut trader = trader();
        trader.tick().await.unwrap();
        trader.broker().set_status(OrderStatus::Canceled);
        for _ in 0..3 {
            assert_eq!(
                trader.tick().await.unwrap(),
                TickOutcome::Waiting(OrderStatus::Canceled)
            );
        }
        assert_eq!(trader.broker().submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_run_forever_survives_errors_and_cancels_on_shutdown() {
        let mut trader = trader();
        *trader.broker().fail_get_order.lock().unwrap() = true;

        trader
            .run_forever(tokio::time::sleep(Duration::from_millis(80)))
            .await
            .unwrap();

        assert_eq!(trader.broker().submitted().len(), 1);
        assert_eq!(*trader.broker().cancelled.lock().unwrap(), 1);
    }

    #[test]
    fn test_alerts_ignored_when_email_not_configured() {
        let mut strategy = StrategyConfig::from_toml_str(STRATEGY).unwrap();
        strategy.email_monitoring.enabled = true;
        let builder = OrderBuilder::new(&strategy).unwrap();
        let runtime = RuntimeConfig {
            update_time_secs: 1.0,
            sleep_after_error_secs: 1.0,
        };
        let trader = Trader::new(MockBroker::default(), builder, &runtime)
            .with_alerts(AlertManager::disabled());
        assert!(trader.monitoring.is_none());
    }

    fn emailing_trader(stub: &HttpStub, timeout: Duration) -> Trader<MockBroker> {
        let sender = EmailSender::with_url("sg-key", stub.url(), timeout).unwrap();
        let alerts = AlertManager::new(Some(sender), "bot@example.com", "me@example.com");
        trader_from(&format!("{STRATEGY}{EMAIL_MONITORING}")).with_alerts(alerts)
    }

    #[tokio::test]
    async fn test_stale_relay_status_is_confirmed_with_broker() {
        let server = RelayServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        tokio::spawn(server.run(shutdown_tx.subscribe()));

        let relay = RelayClient::new(addr.clone());
        let mut trader = trader().with_relay(relay);
        trader.tick().await.unwrap();

        // The streamer saw "new" but missed the fill; the broker knows better
        RelayClient::new(addr)
            .write(&json!({"id": "order-1", "status": "new"}))
            .await
            .unwrap();
        trader.broker().set_status(OrderStatus::Filled);

        for _ in 1..RELAY_CONFIRM_EVERY {
            assert_eq!(trader.tick().await.unwrap(), TickOutcome::Waiting(OrderStatus::New));
        }
        assert!(matches!(trader.tick().await.unwrap(), TickOutcome::Submitted(_)));
        assert_eq!(trader.broker().submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_status_email_sent_once_per_interval() {
        let stub = HttpStub::start("202 Accepted").await;
        let mut trader = emailing_trader(&stub, Duration::from_secs(5));
        assert!(trader.monitoring.is_some());

        trader.tick().await.unwrap();
        trader.send_status_email().await;
        trader.tick().await.unwrap();
        trader.send_status_email().await;

        let requests = stub.requests();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body["subject"], "Trader status: AAPL");
        let text = body["content"][0]["value"].as_str().unwrap();
        assert!(text.contains("last order order-1"));
        assert!(text.contains("next side sell"));
        assert!(text.contains("1 orders placed"));
        assert!(text.contains("Position: none"));
    }

    #[tokio::test]
    async fn test_rejected_status_email_does_not_stop_trading() {
        let stub = HttpStub::start("500 Internal Server Error").await;
        let mut trader = emailing_trader(&stub, Duration::from_secs(5));

        trader.tick().await.unwrap();
        trader.send_status_email().await;
        assert_eq!(stub.requests().len(), 1);

        trader.broker().set_status(OrderStatus::Filled);
        assert!(matches!(trader.tick().await.unwrap(), TickOutcome::Submitted(_)));
    }

    #[tokio::test]
    async fn test_hung_email_server_does_not_block_shutdown() {
        let stub = HttpStub::hanging().await;
        let mut trader = emailing_trader(&stub, Duration::from_secs(60));

        let finished = tokio::time::timeout(
            Duration::from_secs(3),
            trader.run_forever(tokio::time::sleep(Duration::from_millis(100))),
        )
        .await;
        assert!(matches!(finished, Ok(Ok(()))));
        assert_eq!(trader.broker().submitted().len(), 1);
        assert_eq!(*trader.broker().cancelled.lock().unwrap(), 1);
    }
}
