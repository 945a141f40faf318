// =============================================================================
// Bybit-style unified-account perpetual adapter
// =============================================================================
//
// The "hedge venue" slot. No Bybit client exists anywhere in the example
// pack to copy verbatim, so this is grounded on the *shape* of the
// teacher's `binance/client.rs` (signing helper + reqwest::Client field +
// redacting Debug + `#[instrument]` per call) rather than its exact
// signing string, which Bybit's v5 API constructs differently
// (timestamp + api_key + recv_window + query/body, not just the query).
// =============================================================================

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::instrument;

use crate::error::{VenueError, VenueRejectionReason};
use crate::trade::{FundingRate, MarketInfo, Order, OrderRequest, OrderbookL1, Position};
use crate::types::{OrderStatus, OrderType, Side, Symbol, VenueId};
use crate::venue::rate_limit::RateLimitTracker;
use crate::venue::{OrderbookDepth, VenuePort};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5000;

pub struct BybitVenue {
    venue_id: VenueId,
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limiter: RateLimitTracker,
}

impl BybitVenue {
    pub fn new(venue_id: VenueId, api_key: String, secret: String, base_url: impl Into<String>) -> Self {
        Self {
            venue_id,
            api_key,
            secret,
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            // Bybit's unified account documents a flat 120 req/s bucket;
            // tracked here in the same weighted-bucket shape for
            // consistency even though Bybit doesn't echo used-weight.
            rate_limiter: RateLimitTracker::new(600, 480, 20, 500_000),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Bybit v5 signs `timestamp + api_key + recv_window + query_or_body`,
    /// not just the query string.
    fn sign(&self, timestamp: u64, payload: &str) -> String {
        let prehash = format!("{timestamp}{}{RECV_WINDOW_MS}{payload}", self.api_key);
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take a key of any length");
        mac.update(prehash.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self, timestamp: u64, signature: &str) -> Vec<(&'static str, String)> {
        vec![
            ("X-BAPI-API-KEY", self.api_key.clone()),
            ("X-BAPI-TIMESTAMP", timestamp.to_string()),
            ("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS.to_string()),
            ("X-BAPI-SIGN", signature.to_string()),
        ]
    }

    fn map_transport_error(err: reqwest::Error) -> VenueError {
        if err.is_timeout() {
            VenueError::timeout(err.to_string())
        } else {
            VenueError::transient(err.to_string())
        }
    }

    fn parse_decimal(s: &str) -> Decimal {
        s.parse().unwrap_or(Decimal::ZERO)
    }

    fn check_ret_code(body: &serde_json::Value) -> Result<(), VenueError> {
        let code = body.get("retCode").and_then(|v| v.as_i64()).unwrap_or(0);
        if code == 0 {
            return Ok(());
        }
        let msg = body.get("retMsg").and_then(|v| v.as_str()).unwrap_or("bybit error").to_string();
        match code {
            10006 => Err(VenueError::rate_limited(msg)),
            110025 => Err(VenueError::rejection(VenueRejectionReason::InsufficientMargin, msg)),
            110012 => Err(VenueError::rejection(VenueRejectionReason::DuplicateClientId, msg)),
            _ => Err(VenueError::rejection(VenueRejectionReason::Other(code.to_string()), msg)),
        }
    }
}

impl std::fmt::Debug for BybitVenue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitVenue")
            .field("venue_id", &self.venue_id)
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl VenuePort for BybitVenue {
    fn venue_id(&self) -> VenueId {
        self.venue_id
    }

    #[instrument(skip(self), name = "bybit::initialize")]
    async fn initialize(&self) -> Result<(), VenueError> {
        Ok(())
    }

    #[instrument(skip(self), name = "bybit::close")]
    async fn close(&self) -> Result<(), VenueError> {
        Ok(())
    }

    #[instrument(skip(self), name = "bybit::load_markets")]
    async fn load_markets(&self) -> Result<HashMap<Symbol, MarketInfo>, VenueError> {
        let url = format!("{}/v5/market/instruments-info", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("category", "linear")])
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Self::check_ret_code(&body)?;

        let mut out = HashMap::new();
        if let Some(list) = body.pointer("/result/list").and_then(|v| v.as_array()) {
            for item in list {
                let display = item.get("symbol").and_then(|v| v.as_str()).unwrap_or_default();
                let canonical = display.trim_end_matches("USDT").to_string();
                if canonical.is_empty() {
                    continue;
                }
                let tick_size = item
                    .pointer("/priceFilter/tickSize")
                    .and_then(|v| v.as_str())
                    .map(Self::parse_decimal)
                    .unwrap_or_else(|| Decimal::new(1, 2));
                let step_size = item
                    .pointer("/lotSizeFilter/qtyStep")
                    .and_then(|v| v.as_str())
                    .map(Self::parse_decimal)
                    .unwrap_or_else(|| Decimal::new(1, 3));

                let symbol: Symbol = canonical.as_str().into();
                out.insert(
                    symbol.clone(),
                    MarketInfo {
                        symbol,
                        venue: self.venue_id,
                        tick_size,
                        step_size,
                        min_qty: step_size,
                        min_notional: Decimal::from(5),
                        max_leverage: Decimal::from(25),
                        maker_fee: Decimal::new(1, 4),
                        taker_fee: Decimal::new(6, 4),
                    },
                );
            }
        }
        Ok(out)
    }

    #[instrument(skip(self), name = "bybit::get_orderbook_l1")]
    async fn get_orderbook_l1(&self, symbol: &Symbol) -> Result<OrderbookL1, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let url = format!("{}/v5/market/tickers", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("category", "linear"), ("symbol", &display)])
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Self::check_ret_code(&body)?;

        let item = body
            .pointer("/result/list/0")
            .ok_or_else(|| VenueError::transient("empty tickers response"))?;

        let get = |key: &str| item.get(key).and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO);

        Ok(OrderbookL1 {
            symbol: symbol.clone(),
            venue: self.venue_id,
            bid_px: get("bid1Price"),
            bid_qty: get("bid1Size"),
            ask_px: get("ask1Price"),
            ask_qty: get("ask1Size"),
            updated_at: Utc::now(),
        })
    }

    #[instrument(skip(self), name = "bybit::get_orderbook_depth")]
    async fn get_orderbook_depth(&self, symbol: &Symbol, levels: u32) -> Result<OrderbookDepth, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let url = format!("{}/v5/market/orderbook", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("category", "linear"), ("symbol", &display), ("limit", &levels.to_string())])
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Self::check_ret_code(&body)?;

        let parse_side = |key: &str| -> Vec<(Decimal, Decimal)> {
            body.pointer(&format!("/result/{key}"))
                .and_then(|v| v.as_array())
                .map(|levels| {
                    levels
                        .iter()
                        .filter_map(|lvl| {
                            let arr = lvl.as_array()?;
                            let px = arr.first()?.as_str()?.parse().ok()?;
                            let qty = arr.get(1)?.as_str()?.parse().ok()?;
                            Some((px, qty))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(OrderbookDepth {
            symbol: symbol.clone(),
            venue: self.venue_id,
            bids: parse_side("b"),
            asks: parse_side("a"),
            updated_at: Utc::now(),
        })
    }

    #[instrument(skip(self), name = "bybit::get_funding_rate")]
    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let url = format!("{}/v5/market/tickers", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("category", "linear"), ("symbol", &display)])
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Self::check_ret_code(&body)?;

        let item = body
            .pointer("/result/list/0")
            .ok_or_else(|| VenueError::transient("empty tickers response"))?;

        let raw_rate = item
            .get("fundingRate")
            .and_then(|v| v.as_str())
            .map(Self::parse_decimal)
            .unwrap_or(Decimal::ZERO);
        let next_funding_ms: i64 = item
            .get("nextFundingTime")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        // Bybit linear perps also settle every 8 hours.
        let rate_hourly = FundingRate::normalize(raw_rate, Decimal::from(8));

        Ok(FundingRate {
            symbol: symbol.clone(),
            venue: self.venue_id,
            rate_hourly,
            next_funding_time: Utc.timestamp_millis_opt(next_funding_ms).single().unwrap_or_else(Utc::now),
            observed_at: Utc::now(),
        })
    }

    #[instrument(skip(self), name = "bybit::list_positions")]
    async fn list_positions(&self) -> Result<Vec<Position>, VenueError> {
        let timestamp = Self::timestamp_ms();
        let query = "category=linear&settleCoin=USDT".to_string();
        let signature = self.sign(timestamp, &query);
        let url = format!("{}/v5/position/list?{query}", self.base_url);

        let mut req = self.client.get(&url);
        for (k, v) in self.auth_headers(timestamp, &signature) {
            req = req.header(k, v);
        }

        let resp = req.send().await.map_err(Self::map_transport_error)?;
        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Self::check_ret_code(&body)?;

        let positions = body
            .pointer("/result/list")
            .and_then(|v| v.as_array())
            .map(|list| list.iter().filter_map(|p| self.parse_position(p)).filter(|p| p.qty != Decimal::ZERO).collect())
            .unwrap_or_default();

        Ok(positions)
    }

    #[instrument(skip(self), name = "bybit::get_position")]
    async fn get_position(&self, symbol: &Symbol) -> Result<Option<Position>, VenueError> {
        let positions = self.list_positions().await?;
        Ok(positions.into_iter().find(|p| &p.symbol == symbol))
    }

    #[instrument(skip(self), name = "bybit::get_available_balance")]
    async fn get_available_balance(&self) -> Result<Decimal, VenueError> {
        let timestamp = Self::timestamp_ms();
        let query = "accountType=UNIFIED&coin=USDT".to_string();
        let signature = self.sign(timestamp, &query);
        let url = format!("{}/v5/account/wallet-balance?{query}", self.base_url);

        let mut req = self.client.get(&url);
        for (k, v) in self.auth_headers(timestamp, &signature) {
            req = req.header(k, v);
        }

        let resp = req.send().await.map_err(Self::map_transport_error)?;
        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Self::check_ret_code(&body)?;

        let available = body
            .pointer("/result/list/0/totalAvailableBalance")
            .and_then(|v| v.as_str())
            .map(Self::parse_decimal)
            .unwrap_or(Decimal::ZERO);

        Ok(available)
    }

    #[instrument(skip(self), name = "bybit::get_realized_funding")]
    async fn get_realized_funding(&self, symbol: &Symbol, since: DateTime<Utc>) -> Result<Decimal, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let timestamp = Self::timestamp_ms();
        let query = format!(
            "category=linear&symbol={display}&startTime={}",
            since.timestamp_millis()
        );
        let signature = self.sign(timestamp, &query);
        let url = format!("{}/v5/position/closed-pnl?{query}", self.base_url);

        let mut req = self.client.get(&url);
        for (k, v) in self.auth_headers(timestamp, &signature) {
            req = req.header(k, v);
        }

        let resp = req.send().await.map_err(Self::map_transport_error)?;
        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Self::check_ret_code(&body)?;

        let total = body
            .pointer("/result/list")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|e| e.get("fundingFee").and_then(|v| v.as_str()))
                    .map(Self::parse_decimal)
                    .sum()
            })
            .unwrap_or(Decimal::ZERO);

        Ok(total)
    }

    #[instrument(skip(self, req), name = "bybit::place_order")]
    async fn place_order(&self, req: OrderRequest) -> Result<Order, VenueError> {
        if !self.rate_limiter.can_place_order() {
            return Err(VenueError::rate_limited("order rate limit reached"));
        }
        if req.qty <= Decimal::ZERO {
            return Err(VenueError::validation("order qty must be positive"));
        }

        let display = format!("{}USDT", req.symbol.0);
        let side = match req.side {
            Side::Long => "Buy",
            Side::Short => "Sell",
        };
        let order_type = match req.order_type {
            OrderType::Limit => "Limit",
            OrderType::Market => "Market",
        };

        let mut body = serde_json::json!({
            "category": "linear",
            "symbol": display,
            "side": side,
            "orderType": order_type,
            "qty": req.qty.to_string(),
            "orderLinkId": req.client_order_id,
            "reduceOnly": req.reduce_only,
        });
        if let Some(price) = req.price {
            body["price"] = serde_json::json!(price.to_string());
            body["timeInForce"] = serde_json::json!(match req.tif {
                crate::types::TimeInForce::PostOnly => "PostOnly",
                crate::types::TimeInForce::Ioc => "IOC",
                crate::types::TimeInForce::Fok => "FOK",
                crate::types::TimeInForce::Gtc => "GTC",
            });
        }

        let payload = serde_json::to_string(&body).map_err(|e| VenueError::validation(e.to_string()))?;
        let timestamp = Self::timestamp_ms();
        let signature = self.sign(timestamp, &payload);
        let url = format!("{}/v5/order/create", self.base_url);

        let mut http_req = self.client.post(&url).body(payload);
        for (k, v) in self.auth_headers(timestamp, &signature) {
            http_req = http_req.header(k, v);
        }

        let resp = http_req.send().await.map_err(Self::map_transport_error)?;
        self.rate_limiter.record_order_sent();

        let resp_body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Self::check_ret_code(&resp_body)?;

        let order_id = resp_body
            .pointer("/result/orderLinkId")
            .and_then(|v| v.as_str())
            .unwrap_or(&req.client_order_id)
            .to_string();

        Ok(Order {
            request: req,
            order_id,
            status: OrderStatus::Open,
            filled_qty: Decimal::ZERO,
            avg_fill_px: Decimal::ZERO,
            fee: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[instrument(skip(self), name = "bybit::get_order")]
    async fn get_order(&self, symbol: &Symbol, order_id: &str) -> Result<Order, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let timestamp = Self::timestamp_ms();
        let query = format!("category=linear&symbol={display}&orderLinkId={order_id}");
        let signature = self.sign(timestamp, &query);
        let url = format!("{}/v5/order/realtime?{query}", self.base_url);

        let mut req = self.client.get(&url);
        for (k, v) in self.auth_headers(timestamp, &signature) {
            req = req.header(k, v);
        }

        let resp = req.send().await.map_err(Self::map_transport_error)?;
        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Self::check_ret_code(&body)?;

        let item = body
            .pointer("/result/list/0")
            .ok_or_else(|| VenueError::transient("order not found"))?;

        Ok(self.parse_order(symbol, order_id, item))
    }

    #[instrument(skip(self), name = "bybit::cancel_order")]
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<bool, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let body = serde_json::json!({
            "category": "linear",
            "symbol": display,
            "orderLinkId": order_id,
        });
        let payload = serde_json::to_string(&body).map_err(|e| VenueError::validation(e.to_string()))?;
        let timestamp = Self::timestamp_ms();
        let signature = self.sign(timestamp, &payload);
        let url = format!("{}/v5/order/cancel", self.base_url);

        let mut http_req = self.client.post(&url).body(payload);
        for (k, v) in self.auth_headers(timestamp, &signature) {
            http_req = http_req.header(k, v);
        }

        let resp = http_req.send().await.map_err(Self::map_transport_error)?;
        let resp_body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        let code = resp_body.get("retCode").and_then(|v| v.as_i64()).unwrap_or(0);
        if code == 110001 {
            // Bybit's "order not found / already closed" code.
            return Ok(false);
        }
        Self::check_ret_code(&resp_body)?;
        Ok(true)
    }

    #[instrument(skip(self), name = "bybit::cancel_all")]
    async fn cancel_all(&self, symbol: Option<&Symbol>) -> Result<u32, VenueError> {
        let mut body = serde_json::json!({ "category": "linear" });
        if let Some(symbol) = symbol {
            body["symbol"] = serde_json::json!(format!("{}USDT", symbol.0));
        }
        let payload = serde_json::to_string(&body).map_err(|e| VenueError::validation(e.to_string()))?;
        let timestamp = Self::timestamp_ms();
        let signature = self.sign(timestamp, &payload);
        let url = format!("{}/v5/order/cancel-all", self.base_url);

        let mut http_req = self.client.post(&url).body(payload);
        for (k, v) in self.auth_headers(timestamp, &signature) {
            http_req = http_req.header(k, v);
        }

        let resp = http_req.send().await.map_err(Self::map_transport_error)?;
        let resp_body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Self::check_ret_code(&resp_body)?;

        let count = resp_body
            .pointer("/result/list")
            .and_then(|v| v.as_array())
            .map(|l| l.len() as u32)
            .unwrap_or(0);

        Ok(count)
    }
}

impl BybitVenue {
    fn parse_position(&self, p: &serde_json::Value) -> Option<Position> {
        let display = p.get("symbol").and_then(|v| v.as_str())?;
        let canonical = display.trim_end_matches("USDT");
        let qty = p.get("size").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO);
        let side = match p.get("side").and_then(|v| v.as_str()) {
            Some("Sell") => Side::Short,
            _ => Side::Long,
        };
        let liq_px = p
            .get("liqPrice")
            .and_then(|v| v.as_str())
            .map(Self::parse_decimal)
            .filter(|d| *d != Decimal::ZERO);

        Some(Position {
            symbol: canonical.into(),
            venue: self.venue_id,
            side,
            qty,
            entry_px: p.get("avgPrice").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            mark_px: p.get("markPrice").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            liq_px,
            unrealized_pnl: p.get("unrealisedPnl").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            leverage: p.get("leverage").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ONE),
            observed_at: Utc::now(),
        })
    }

    fn parse_order(&self, symbol: &Symbol, order_id: &str, item: &serde_json::Value) -> Order {
        let side = match item.get("side").and_then(|v| v.as_str()) {
            Some("Sell") => Side::Short,
            _ => Side::Long,
        };
        let order_type = match item.get("orderType").and_then(|v| v.as_str()) {
            Some("Market") => OrderType::Market,
            _ => OrderType::Limit,
        };
        let status = match item.get("orderStatus").and_then(|v| v.as_str()).unwrap_or("New") {
            "New" | "Created" => OrderStatus::Open,
            "PartiallyFilled" => OrderStatus::PartiallyFilled,
            "Filled" => OrderStatus::Filled,
            "Cancelled" | "PartiallyFilledCanceled" => OrderStatus::Cancelled,
            "Rejected" => OrderStatus::Rejected,
            "Deactivated" => OrderStatus::Expired,
            _ => OrderStatus::Pending,
        };

        Order {
            request: OrderRequest {
                symbol: symbol.clone(),
                venue: self.venue_id,
                side,
                qty: item.get("qty").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
                order_type,
                price: item.get("price").and_then(|v| v.as_str()).map(Self::parse_decimal),
                tif: crate::types::TimeInForce::Gtc,
                reduce_only: item.get("reduceOnly").and_then(|v| v.as_bool()).unwrap_or(false),
                client_order_id: order_id.to_string(),
            },
            order_id: order_id.to_string(),
            status,
            filled_qty: item.get("cumExecQty").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            avg_fill_px: item.get("avgPrice").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            fee: item.get("cumExecFee").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_includes_api_key_and_recv_window() {
        let venue = BybitVenue::new(
            VenueId::Hedge,
            "key123".to_string(),
            "secret".to_string(),
            "https://api.example.com",
        );
        let sig1 = venue.sign(1_000, "category=linear&symbol=ETHUSDT");
        let sig2 = venue.sign(1_000, "category=linear&symbol=ETHUSDT");
        assert_eq!(sig1, sig2);

        let sig3 = venue.sign(2_000, "category=linear&symbol=ETHUSDT");
        assert_ne!(sig1, sig3);
    }

    #[test]
    fn debug_impl_redacts_credentials() {
        let venue = BybitVenue::new(
            VenueId::Hedge,
            "hedge-key".to_string(),
            "hedge-secret".to_string(),
            "https://api.example.com",
        );
        let debug_str = format!("{venue:?}");
        assert!(!debug_str.contains("hedge-key"));
        assert!(!debug_str.contains("hedge-secret"));
    }

    #[test]
    fn check_ret_code_maps_known_error_codes() {
        let body = serde_json::json!({"retCode": 110025, "retMsg": "margin"});
        let err = BybitVenue::check_ret_code(&body).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::VenueErrorKind::VenueRejection(VenueRejectionReason::InsufficientMargin)
        ));
    }

    #[test]
    fn check_ret_code_passes_through_success() {
        let body = serde_json::json!({"retCode": 0, "retMsg": "OK"});
        assert!(BybitVenue::check_ret_code(&body).is_ok());
    }
}
