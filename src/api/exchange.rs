//! Exchange REST client for market data and order execution.
//!
//! The engine only depends on the [`Exchange`] trait; [`BinanceClient`] is
//! the live implementation with HMAC-SHA256 signed requests. Test orders are
//! routed to the exchange's validation endpoint and echoed back through the
//! same decimal representation, so simulated runs exercise identical math.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;

pub const BINANCE_URL: &str = "https://api.binance.com";

/// A tradable pair from exchange market metadata, in listing order.
#[derive(Debug, Clone)]
pub struct Market {
    /// Exchange-native symbol (e.g. "ETHBTC")
    pub symbol: String,
    pub base: String,
    pub quote: String,
}

/// Latest ticker snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Ticker {
    pub last: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    Limit,
}

impl OrderKind {
    fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::Limit => "LIMIT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order placement options.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderOpts {
    /// Route to the exchange's test endpoint; nothing executes
    pub test: bool,
}

/// Result of an order placement.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub id: String,
    pub amount: Decimal,
    pub price: Decimal,
}

/// Exchange operations the trade lifecycle engine depends on.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Fetch market metadata for all listed pairs, preserving listing order.
    async fn load_markets(&self) -> Result<Vec<Market>>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn create_order(
        &self,
        symbol: &str,
        kind: OrderKind,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
        opts: &OrderOpts,
    ) -> Result<OrderFill>;

    /// Cancel every open order for the symbol.
    async fn cancel_all_orders(&self, symbol: &str) -> Result<()>;
}

/// Binance spot REST client.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PriceTicker {
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    #[serde(with = "rust_decimal::serde::str")]
    executed_qty: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    cummulative_quote_qty: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    price: Option<Decimal>,
}

impl BinanceClient {
    pub fn new(api_key: &str, secret_key: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            base_url: BINANCE_URL.to_string(),
        })
    }

    /// Create from environment variables:
    /// - EXCHANGE_API_KEY
    /// - EXCHANGE_SECRET_KEY
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("EXCHANGE_API_KEY").context("EXCHANGE_API_KEY not set")?;
        let secret_key =
            std::env::var("EXCHANGE_SECRET_KEY").context("EXCHANGE_SECRET_KEY not set")?;
        Self::new(&api_key, &secret_key)
    }

    /// HMAC-SHA256 signature over the request query string.
    fn sign(&self, query: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query);
        query.push_str("&signature=");
        query.push_str(&signature);
        query
    }

    /// Average fill price of an executed order, falling back to the quoted
    /// limit price when nothing matched yet.
    fn fill_price(
        executed_qty: Decimal,
        cummulative_quote: Option<Decimal>,
        fallback: Decimal,
    ) -> Decimal {
        match cummulative_quote {
            Some(quote) if !executed_qty.is_zero() => quote / executed_qty,
            _ => fallback,
        }
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn load_markets(&self) -> Result<Vec<Market>> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let resp = self.http.get(&url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to load markets: {} - {}", status, text));
        }

        let info: ExchangeInfo = resp.json().await.context("Failed to parse exchange info")?;

        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| Market {
                symbol: s.symbol,
                base: s.base_asset,
                quote: s.quote_asset,
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let resp = self.http.get(&url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to fetch ticker: {} - {}", status, text));
        }

        let ticker: PriceTicker = resp.json().await.context("Failed to parse ticker")?;
        Ok(Ticker { last: ticker.price })
    }

    async fn create_order(
        &self,
        symbol: &str,
        kind: OrderKind,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
        opts: &OrderOpts,
    ) -> Result<OrderFill> {
        let client_order_id = uuid::Uuid::new_v4().to_string();
        let timestamp = Utc::now().timestamp_millis().to_string();

        let mut params: Vec<(&str, String)> = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", kind.as_str().to_string()),
            ("quantity", amount.to_string()),
            ("newClientOrderId", client_order_id.clone()),
        ];
        if let Some(price) = price {
            params.push(("price", price.to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }
        params.push(("timestamp", timestamp));

        let endpoint = if opts.test {
            "/api/v3/order/test"
        } else {
            "/api/v3/order"
        };
        let url = format!("{}{}?{}", self.base_url, endpoint, self.signed_query(&params));

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Order placement failed: {} - {}", status, text));
        }

        if opts.test {
            // The test endpoint validates and returns an empty body; echo the
            // request so simulated runs see the same numbers live runs would.
            let fill_price = match price {
                Some(p) => p,
                None => self.fetch_ticker(symbol).await?.last,
            };
            return Ok(OrderFill {
                id: client_order_id,
                amount,
                price: fill_price,
            });
        }

        let order: OrderResponse = resp.json().await.context("Failed to parse order response")?;
        let fallback = price.unwrap_or(order.price.unwrap_or_default());
        let amount = if order.executed_qty.is_zero() {
            amount
        } else {
            order.executed_qty
        };

        Ok(OrderFill {
            id: order.order_id.to_string(),
            amount,
            price: Self::fill_price(order.executed_qty, order.cummulative_quote_qty, fallback),
        })
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let params: Vec<(&str, String)> = vec![
            ("symbol", symbol.to_string()),
            ("timestamp", timestamp),
        ];
        let url = format!(
            "{}/api/v3/openOrders?{}",
            self.base_url,
            self.signed_query(&params)
        );

        let resp = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Cancel all orders failed: {} - {}", status, text));
        }

        Ok(())
    }
}
