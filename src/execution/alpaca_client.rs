use crate::config::BrokerConfig;
use crate::execution::error::BrokerError;
use crate::execution::Broker;
use crate::models::account::{Account, Clock, Position};
use crate::models::order::{Order, OrderRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

/// REST client for the Alpaca trading API (v2).
///
/// Every request carries the key/secret headers; the base URL follows the
/// sandbox flag (paper vs live).
pub struct AlpacaClient {
    base_url: String,
    api_key: String,
    api_secret: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderQueryStatus {
    Open,
    Closed,
    All,
}

/// Filter for `GET /v2/orders`.
#[derive(Debug, Clone, Serialize)]
pub struct ListOrdersQuery {
    pub status: OrderQueryStatus,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl Default for ListOrdersQuery {
    fn default() -> Self {
        Self {
            status: OrderQueryStatus::Open,
            limit: 50,
            after: None,
            until: None,
        }
    }
}

impl AlpacaClient {
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        Self::with_base_url(config, config.rest_url())
    }

    pub fn with_base_url(config: &BrokerConfig, base_url: &str) -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Some(std::time::Duration::from_secs(30)))
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build an authenticated request.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.http
            .request(method, url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, BrokerError> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(BrokerError::from_response(status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Fetch the account record.
    pub async fn get_account(&self) -> Result<Account, BrokerError> {
        let resp = self.request(Method::GET, "/v2/account").send().await?;
        Self::decode(resp).await
    }

    /// List orders matching `query`, newest first.
    pub async fn list_orders(&self, query: &ListOrdersQuery) -> Result<Vec<Order>, BrokerError> {
        let resp = self
            .request(Method::GET, "/v2/orders")
            .query(query)
            .send()
            .await?;
        let orders: Vec<Order> = Self::decode(resp).await?;
        debug!("Listed {} orders ({:?})", orders.len(), query.status);
        Ok(orders)
    }
}

#[async_trait]
impl Broker for AlpacaClient {
    async fn get_clock(&self) -> Result<Clock, BrokerError> {
        let resp = self.request(Method::GET, "/v2/clock").send().await?;
        Self::decode(resp).await
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<Order, BrokerError> {
        let resp = self
            .request(Method::POST, "/v2/orders")
            .json(request)
            .send()
            .await?;
        let order: Order = Self::decode(resp).await?;
        debug!("Created order: {order:?}");
        Ok(order)
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, BrokerError> {
        let path = format!("/v2/orders/{order_id}");
        let resp = self.request(Method::GET, &path).send().await?;
        let order: Order = Self::decode(resp).await?;
        debug!("Fetched order: {order:?}");
        Ok(order)
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        let path = format!("/v2/positions/{symbol}");
        let resp = self.request(Method::GET, &path).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(resp).await.map(Some)
    }

    async fn cancel_all_orders(&self) -> Result<(), BrokerError> {
        let resp = self.request(Method::DELETE, "/v2/orders").send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(BrokerError::from_response(status, &text));
        }

        // 207 Multi-Status: one entry per order with its own status code
        let results: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap_or_default();
        let failed = results
            .iter()
            .filter(|r| r.get("status").and_then(|s| s.as_u64()).map_or(false, |s| s >= 400))
            .count();
        if failed > 0 {
            warn!("Cancel all: {failed}/{} orders failed to cancel", results.len());
        } else {
            info!("All orders cancelled ({})", results.len());
        }
        Ok(())
    }
}
