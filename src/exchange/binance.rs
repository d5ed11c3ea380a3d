//! Binance spot REST integration.
//!
//! API docs: https://developers.binance.com/docs/binance-spot-api-docs/rest-api
//! Base URL: https://api.binance.com
//! Auth: `X-MBX-APIKEY` header plus an HMAC-SHA256 `signature` parameter
//! over the query string for SIGNED endpoints (order placement).
//!
//! Prices and quantities arrive as decimal strings and are parsed straight
//! into `Decimal` so lot-step arithmetic stays exact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use tracing::{debug, info};

use super::ExchangeGateway;
use crate::types::{Order, Side};

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const GATEWAY_NAME: &str = "binance";

// ---------------------------------------------------------------------------
// API response types (Binance JSON → Rust)
// ---------------------------------------------------------------------------

/// `GET /api/v3/ticker/price`
#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

/// `GET /api/v3/exchangeInfo`, only the fields we need.
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    #[serde(default)]
    step_size: Option<String>,
}

/// `POST /api/v3/order` response (FULL response type).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: u64,
    #[serde(default)]
    transact_time: Option<i64>,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
    #[serde(default)]
    fills: Vec<OrderFill>,
}

#[derive(Debug, Deserialize)]
struct OrderFill {
    price: String,
    qty: String,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Binance spot gateway.
pub struct BinanceClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: SecretString,
    recv_window_ms: u64,
}

impl BinanceClient {
    /// Create a new Binance client with explicit credentials.
    pub fn new(
        base_url: Option<String>,
        api_key: String,
        api_secret: SecretString,
        recv_window_ms: u64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("martingale-bot/0.1.0")
            .build()
            .context("Failed to build HTTP client for Binance")?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            api_secret,
            recv_window_ms,
        })
    }

    /// Client for public endpoints only (prices and exchange info).
    /// Order placement is refused before any request is sent.
    pub fn public(base_url: Option<String>) -> Result<Self> {
        Self::new(base_url, String::new(), SecretString::new(String::new()), 5000)
    }

    // -- Internal helpers ------------------------------------------------

    /// GET a public endpoint and return the raw body.
    async fn get_public(&self, path: &str, query: &str) -> Result<String> {
        let url = format!("{}{path}?{query}", self.base_url);
        debug!(url = %url, "Binance GET");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Binance request failed: {path}"))?;

        let status = resp.status();
        let body = resp.text().await.context("Failed to read Binance response")?;
        if !status.is_success() {
            anyhow::bail!("Binance API error {status}: {}", describe_error(&body));
        }
        Ok(body)
    }

    fn timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Sign a query string with HMAC-SHA256, hex encoded.
pub fn sign(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid API secret: {e}"))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build the unsigned query string for a market order.
fn order_query(
    symbol: &str,
    side: Side,
    quantity: Decimal,
    recv_window_ms: u64,
    timestamp: i64,
) -> String {
    format!(
        "symbol={}&side={}&type=MARKET&quantity={}&recvWindow={}&timestamp={}",
        urlencoding::encode(symbol),
        side.as_str(),
        quantity.normalize(),
        recv_window_ms,
        timestamp,
    )
}

/// Turn a Binance error body into `msg (code)`, or the raw body if it
/// isn't the standard shape.
fn describe_error(body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(err) => format!("{} (code {})", err.msg, err.code),
        Err(_) => body.to_string(),
    }
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Invalid decimal in {field}: {raw}"))
}

fn parse_price(body: &str) -> Result<Decimal> {
    let ticker: TickerPrice =
        serde_json::from_str(body).context("Failed to parse Binance ticker response")?;
    parse_decimal(&ticker.price, "price")
}

fn parse_lot_step(body: &str, symbol: &str) -> Result<Decimal> {
    let info: ExchangeInfo =
        serde_json::from_str(body).context("Failed to parse Binance exchangeInfo response")?;

    let symbol_info = info
        .symbols
        .iter()
        .find(|s| s.symbol == symbol)
        .with_context(|| format!("Market info not found for {symbol}"))?;

    let step = symbol_info
        .filters
        .iter()
        .find(|f| f.filter_type == "LOT_SIZE")
        .and_then(|f| f.step_size.as_deref())
        .with_context(|| format!("No LOT_SIZE filter for {symbol}"))?;

    parse_decimal(step, "stepSize")
}

/// Convert an order response into an `Order`. The fill price is the
/// quantity-weighted average of the fills, falling back to
/// `cummulativeQuoteQty / executedQty`.
fn parse_order(body: &str, side: Side, submitted: Decimal) -> Result<Order> {
    let resp: OrderResponse =
        serde_json::from_str(body).context("Failed to parse Binance order response")?;

    let mut filled_qty = Decimal::ZERO;
    let mut filled_quote = Decimal::ZERO;
    for fill in &resp.fills {
        let qty = parse_decimal(&fill.qty, "fills.qty")?;
        let price = parse_decimal(&fill.price, "fills.price")?;
        filled_qty += qty;
        filled_quote += qty * price;
    }

    if filled_qty.is_zero() {
        if let (Some(exec), Some(quote)) = (&resp.executed_qty, &resp.cummulative_quote_qty) {
            filled_qty = parse_decimal(exec, "executedQty")?;
            filled_quote = parse_decimal(quote, "cummulativeQuoteQty")?;
        }
    }

    let fill_price = if filled_qty.is_zero() {
        Decimal::ZERO
    } else {
        filled_quote / filled_qty
    };
    let quantity = if filled_qty.is_zero() { submitted } else { filled_qty };

    let timestamp = resp
        .transact_time
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(Order {
        order_id: resp.order_id.to_string(),
        symbol: resp.symbol,
        side,
        requested_quantity: submitted,
        quantity,
        fill_price,
        timestamp,
    })
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let query = format!("symbol={}", urlencoding::encode(symbol));
        let body = self.get_public("/api/v3/ticker/price", &query).await?;
        parse_price(&body)
    }

    async fn get_lot_step(&self, symbol: &str) -> Result<Decimal> {
        let query = format!("symbol={}", urlencoding::encode(symbol));
        let body = self.get_public("/api/v3/exchangeInfo", &query).await?;
        parse_lot_step(&body, symbol)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<Order> {
        if self.api_key.is_empty() {
            anyhow::bail!("Binance API key not configured");
        }

        let query = order_query(
            symbol,
            side,
            quantity,
            self.recv_window_ms,
            Self::timestamp_ms(),
        );
        let signature = sign(self.api_secret.expose_secret(), &query)?;
        let url = format!("{}/api/v3/order?{query}&signature={signature}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Binance order request failed")?;

        let status = resp.status();
        let body = resp.text().await.context("Failed to read Binance order response")?;
        if !status.is_success() {
            anyhow::bail!("Binance order error {status}: {}", describe_error(&body));
        }

        let order = parse_order(&body, side, quantity)?;
        info!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            side = %side,
            quantity = %order.quantity,
            price = %order.fill_price,
            "Binance order filled"
        );
        Ok(order)
    }

    fn name(&self) -> &str {
        GATEWAY_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
