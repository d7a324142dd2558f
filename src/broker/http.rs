// =============================================================================
// HTTP broker connector — HMAC-SHA256 signed REST requests
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Signed requests
// carry the API key as a header and an HMAC signature of the query string;
// clock drift is tolerated via the signed timestamp parameter.
//
// Transient transport faults are retried under the shared RetryPolicy;
// permanent broker rejections are surfaced on the first occurrence.
// =============================================================================

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use async_trait::async_trait;

use crate::broker::retry::RetryPolicy;
use crate::broker::types::{
    AccountInfo, BrokerClockInfo, BrokerError, BrokerOrder, BrokerOrderStatus, BrokerPosition,
    OrderRequest,
};
use crate::broker::BrokerApi;
use crate::data::bar::Bar;
use crate::execution::symbols::SymbolProperties;
use crate::types::{OrderSide, OrderType};

type HmacSha256 = Hmac<Sha256>;

/// Broker REST client with HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct HttpBrokerConnector {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpBrokerConnector {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new connector.
    ///
    /// # Arguments
    /// * `api_key`  — API key (sent as a header, never in query params).
    /// * `secret`   — secret key used exclusively for HMAC signing.
    /// * `base_url` — paper or live REST endpoint.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-QD-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = %base_url, "broker connector initialised");

        Self {
            api_key,
            secret,
            base_url,
            client,
            retry: RetryPolicy::default(),
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Append timestamp + signature to a query string.
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    /// Issue one request and decode the JSON body, mapping transport and
    /// status failures onto the broker error taxonomy.
    async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        method: reqwest::Method,
        url: String,
    ) -> Result<T, BrokerError> {
        let resp = self
            .client
            .request(method, &url)
            .send()
            .await
            .map_err(|e| classify_transport_error(operation, &e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BrokerError::transient(operation, format!("body read failed: {e}")))?;

        if status.is_server_error() {
            return Err(BrokerError::transient(
                operation,
                format!("{status}: {body}"),
            ));
        }
        if !status.is_success() {
            return Err(BrokerError::permanent(operation, status.as_u16(), body));
        }

        serde_json::from_str::<T>(&body)
            .map_err(|e| BrokerError::parse(operation, format!("{e}: {body}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        path_and_params: (String, String),
    ) -> Result<T, BrokerError> {
        let (path, params) = path_and_params;
        self.retry
            .run(operation, || {
                let qs = self.signed_query(&params);
                let url = format!("{}{}?{}", self.base_url, path, qs);
                self.request_json::<T>(operation, reqwest::Method::GET, url)
            })
            .await
    }
}

/// Map a reqwest transport error: timeouts and connection faults are
/// transient; anything else in transport is treated as transient as well
/// since no broker decision was received.
fn classify_transport_error(operation: &str, e: &reqwest::Error) -> BrokerError {
    BrokerError::transient(operation, e.to_string())
}

// ---------------------------------------------------------------------------
// Wire DTOs (broker JSON shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireClock {
    is_open: bool,
    #[serde(default)]
    next_open: Option<DateTime<Utc>>,
    #[serde(default)]
    next_close: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WireBar {
    t: DateTime<Utc>,
    o: String,
    h: String,
    l: String,
    c: String,
    #[serde(default)]
    v: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    id: String,
    #[serde(default)]
    client_order_id: Option<String>,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    qty: String,
    #[serde(default)]
    limit_price: Option<String>,
    #[serde(default)]
    stop_price: Option<String>,
    status: BrokerOrderStatus,
    #[serde(default)]
    filled_qty: Option<String>,
    #[serde(default)]
    filled_avg_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePosition {
    symbol: String,
    qty: String,
    avg_entry_price: String,
}

#[derive(Debug, Deserialize)]
struct WireAsset {
    symbol: String,
    #[serde(default = "default_true")]
    tradable: bool,
    #[serde(default)]
    shortable: bool,
    #[serde(default)]
    fractionable: bool,
    #[serde(default)]
    min_price_increment: Option<String>,
    #[serde(default)]
    lot_size: Option<u32>,
    #[serde(default)]
    min_order_size: Option<u32>,
    #[serde(default)]
    max_order_size: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn parse_decimal(operation: &str, field: &str, raw: &str) -> Result<Decimal, BrokerError> {
    Decimal::from_str(raw)
        .map_err(|e| BrokerError::parse(operation, format!("{field}='{raw}': {e}")))
}

fn parse_opt_decimal(
    operation: &str,
    field: &str,
    raw: &Option<String>,
) -> Result<Option<Decimal>, BrokerError> {
    match raw {
        Some(s) => parse_decimal(operation, field, s).map(Some),
        None => Ok(None),
    }
}

fn convert_order(operation: &str, w: WireOrder) -> Result<BrokerOrder, BrokerError> {
    let side = OrderSide::parse(&w.side)
        .ok_or_else(|| BrokerError::parse(operation, format!("side='{}'", w.side)))?;
    let order_type = match w.order_type.to_uppercase().as_str() {
        "MARKET" => OrderType::Market,
        "LIMIT" => OrderType::Limit,
        "STOP" => OrderType::Stop,
        "STOP_LIMIT" => OrderType::StopLimit,
        other => return Err(BrokerError::parse(operation, format!("type='{other}'"))),
    };

    Ok(BrokerOrder {
        id: w.id,
        client_order_id: w.client_order_id,
        symbol: w.symbol.to_uppercase(),
        side,
        order_type,
        qty: parse_decimal(operation, "qty", &w.qty)?,
        limit_price: parse_opt_decimal(operation, "limit_price", &w.limit_price)?,
        stop_price: parse_opt_decimal(operation, "stop_price", &w.stop_price)?,
        status: w.status,
        filled_qty: match &w.filled_qty {
            Some(s) => parse_decimal(operation, "filled_qty", s)?,
            None => Decimal::ZERO,
        },
        filled_avg_price: parse_opt_decimal(operation, "filled_avg_price", &w.filled_avg_price)?,
    })
}

// ---------------------------------------------------------------------------
// BrokerApi implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl BrokerApi for HttpBrokerConnector {
    #[instrument(skip(self), name = "broker::get_clock")]
    async fn get_clock(&self) -> Result<BrokerClockInfo, BrokerError> {
        let w: WireClock = self
            .get_json("get_clock", ("/v2/clock".to_string(), String::new()))
            .await?;
        Ok(BrokerClockInfo {
            is_open: w.is_open,
            next_open: w.next_open,
            next_close: w.next_close,
        })
    }

    #[instrument(skip(self), name = "broker::get_account_info")]
    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError> {
        self.get_json("get_account_info", ("/v2/account".to_string(), String::new()))
            .await
    }

    #[instrument(skip(self), name = "broker::get_bars")]
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Bar>, BrokerError> {
        let params = format!("symbol={symbol}&timeframe={timeframe}&limit={limit}");
        let wire: Vec<WireBar> = self
            .get_json("get_bars", ("/v2/bars".to_string(), params))
            .await?;

        let mut bars = Vec::with_capacity(wire.len());
        for w in wire {
            let bar = Bar::new(
                symbol,
                w.t,
                parse_decimal("get_bars", "o", &w.o)?,
                parse_decimal("get_bars", "h", &w.h)?,
                parse_decimal("get_bars", "l", &w.l)?,
                parse_decimal("get_bars", "c", &w.c)?,
                w.v,
                "broker",
            )
            .map_err(|e| BrokerError::parse("get_bars", e.to_string()))?;
            bars.push(bar);
        }

        debug!(symbol, timeframe, count = bars.len(), "bars fetched");
        Ok(bars)
    }

    #[instrument(skip(self, request), name = "broker::submit_order", fields(symbol = %request.symbol, side = %request.side))]
    async fn submit_order(&self, request: &OrderRequest) -> Result<BrokerOrder, BrokerError> {
        let mut params = format!(
            "symbol={}&side={}&type={}&qty={}&time_in_force={}&client_order_id={}",
            request.symbol,
            request.side,
            request.order_type,
            request.qty,
            request.time_in_force,
            request.client_order_id,
        );
        if let Some(p) = request.limit_price {
            params.push_str(&format!("&limit_price={p}"));
        }
        if let Some(p) = request.stop_price {
            params.push_str(&format!("&stop_price={p}"));
        }

        // Submissions are NOT retried at the transport layer: a timed-out
        // POST may still have landed, and replays would double-submit. The
        // client_order_id idempotency key protects the one attempt we make.
        let qs = self.signed_query(&params);
        let url = format!("{}/v2/orders?{}", self.base_url, qs);
        let wire: WireOrder = self
            .request_json("submit_order", reqwest::Method::POST, url)
            .await?;

        debug!(broker_order_id = %wire.id, "order submitted");
        convert_order("submit_order", wire)
    }

    #[instrument(skip(self), name = "broker::cancel_order")]
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        self.retry
            .run("cancel_order", || {
                let qs = self.signed_query("");
                let url = format!("{}/v2/orders/{}?{}", self.base_url, broker_order_id, qs);
                async move {
                    let _ignored: serde_json::Value = self
                        .request_json("cancel_order", reqwest::Method::DELETE, url)
                        .await?;
                    Ok(())
                }
            })
            .await
    }

    #[instrument(skip(self), name = "broker::get_order_status")]
    async fn get_order_status(&self, broker_order_id: &str) -> Result<BrokerOrder, BrokerError> {
        let wire: WireOrder = self
            .get_json(
                "get_order_status",
                (format!("/v2/orders/{broker_order_id}"), String::new()),
            )
            .await?;
        convert_order("get_order_status", wire)
    }

    #[instrument(skip(self), name = "broker::list_open_orders")]
    async fn list_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
        let wire: Vec<WireOrder> = self
            .get_json(
                "list_open_orders",
                ("/v2/orders".to_string(), "status=open".to_string()),
            )
            .await?;
        wire.into_iter()
            .map(|w| convert_order("list_open_orders", w))
            .collect()
    }

    #[instrument(skip(self), name = "broker::list_positions")]
    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let wire: Vec<WirePosition> = self
            .get_json("list_positions", ("/v2/positions".to_string(), String::new()))
            .await?;
        wire.into_iter()
            .map(|w| {
                Ok(BrokerPosition {
                    symbol: w.symbol.to_uppercase(),
                    qty: parse_decimal("list_positions", "qty", &w.qty)?,
                    avg_entry_price: parse_decimal(
                        "list_positions",
                        "avg_entry_price",
                        &w.avg_entry_price,
                    )?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), name = "broker::get_symbol_info")]
    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolProperties, BrokerError> {
        let w: WireAsset = self
            .get_json("get_symbol_info", (format!("/v2/assets/{symbol}"), String::new()))
            .await?;

        let tick = match &w.min_price_increment {
            Some(s) => parse_decimal("get_symbol_info", "min_price_increment", s)?,
            None => Decimal::new(1, 2), // 0.01 default tick
        };

        Ok(SymbolProperties {
            symbol: w.symbol.to_uppercase(),
            min_price_increment: tick,
            lot_size: w.lot_size.unwrap_or(1),
            min_order_size: w.min_order_size.unwrap_or(1),
            max_order_size: w.max_order_size,
            is_tradable: w.tradable,
            is_shortable: w.shortable,
            is_fractionable: w.fractionable,
        })
    }
}

impl std::fmt::Debug for HttpBrokerConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBrokerConnector")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> HttpBrokerConnector {
        HttpBrokerConnector::new("key", "secret", "https://paper.example.test/")
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        assert_eq!(connector().base_url, "https://paper.example.test");
    }

    #[test]
    fn signature_is_deterministic_for_same_input() {
        let c = connector();
        assert_eq!(c.sign("a=1&b=2"), c.sign("a=1&b=2"));
        assert_ne!(c.sign("a=1&b=2"), c.sign("a=1&b=3"));
    }

    #[test]
    fn signed_query_carries_timestamp_and_signature() {
        let qs = connector().signed_query("symbol=SPY");
        assert!(qs.starts_with("symbol=SPY&timestamp="));
        assert!(qs.contains("&signature="));
    }

    #[test]
    fn debug_redacts_credentials() {
        let repr = format!("{:?}", connector());
        assert!(!repr.contains("secret"), "secret leaked: {repr}");
        assert!(repr.contains("<redacted>"));
    }

    #[test]
    fn wire_order_converts_with_string_decimals() {
        let wire: WireOrder = serde_json::from_str(
            r#"{
                "id": "brk-1",
                "client_order_id": "ord-1",
                "symbol": "spy",
                "side": "BUY",
                "type": "LIMIT",
                "qty": "1.5",
                "limit_price": "99.90",
                "status": "accepted",
                "filled_qty": "0.5",
                "filled_avg_price": "99.89"
            }"#,
        )
        .unwrap();

        let order = convert_order("test", wire).unwrap();
        assert_eq!(order.symbol, "SPY");
        assert_eq!(order.qty, Decimal::from_str("1.5").unwrap());
        assert_eq!(order.limit_price, Some(Decimal::from_str("99.90").unwrap()));
        assert_eq!(order.status, BrokerOrderStatus::Accepted);
        assert_eq!(order.filled_qty, Decimal::from_str("0.5").unwrap());
    }
}
