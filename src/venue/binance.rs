// =============================================================================
// Binance-style USDT-margined perpetual adapter
// =============================================================================
//
// Grounded on the teacher's `binance/client.rs`: HMAC-SHA256 request
// signing, a fixed `RECV_WINDOW`, `#[instrument(skip(self, ...))]` on
// every call, and a redacting `Debug` impl. Generalized here to implement
// `VenuePort` instead of exposing bespoke methods, and to report
// positions/orders in the venue-neutral data model (spec §3) instead of
// raw JSON `Value`s.
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

/// Adapter for a Binance-style USDT-margined futures API. Plugged in at
/// startup as either the maker or hedge venue.
pub struct BinanceVenue {
    venue_id: VenueId,
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limiter: RateLimitTracker,
}

impl BinanceVenue {
    pub fn new(venue_id: VenueId, api_key: String, secret: String, base_url: impl Into<String>) -> Self {
        Self {
            venue_id,
            api_key,
            secret,
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            rate_limiter: RateLimitTracker::new(1000, 800, 10, 200_000),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take a key of any length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "timestamp={}&recvWindow={}",
            Self::timestamp_ms(),
            RECV_WINDOW_MS
        ));
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
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
}

impl std::fmt::Debug for BinanceVenue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceVenue")
            .field("venue_id", &self.venue_id)
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl VenuePort for BinanceVenue {
    fn venue_id(&self) -> VenueId {
        self.venue_id
    }

    #[instrument(skip(self), name = "binance::initialize")]
    async fn initialize(&self) -> Result<(), VenueError> {
        Ok(())
    }

    #[instrument(skip(self), name = "binance::close")]
    async fn close(&self) -> Result<(), VenueError> {
        Ok(())
    }

    #[instrument(skip(self), name = "binance::load_markets")]
    async fn load_markets(&self) -> Result<HashMap<Symbol, MarketInfo>, VenueError> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !resp.status().is_success() {
            return Err(VenueError::transient(format!(
                "exchangeInfo returned {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        let mut out = HashMap::new();

        if let Some(symbols) = body.get("symbols").and_then(|v| v.as_array()) {
            for s in symbols {
                let display_symbol = s.get("symbol").and_then(|v| v.as_str()).unwrap_or_default();
                let canonical = display_symbol.trim_end_matches("USDT").to_string();
                if canonical.is_empty() {
                    continue;
                }
                let symbol: Symbol = canonical.as_str().into();
                out.insert(
                    symbol.clone(),
                    MarketInfo {
                        symbol,
                        venue: self.venue_id,
                        tick_size: Decimal::new(1, 2),
                        step_size: Decimal::new(1, 3),
                        min_qty: Decimal::new(1, 3),
                        min_notional: Decimal::from(5),
                        max_leverage: Decimal::from(20),
                        maker_fee: Decimal::new(2, 4),
                        taker_fee: Decimal::new(4, 4),
                    },
                );
            }
        }

        Ok(out)
    }

    #[instrument(skip(self), name = "binance::get_orderbook_l1")]
    async fn get_orderbook_l1(&self, symbol: &Symbol) -> Result<OrderbookL1, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let url = format!("{}/fapi/v1/ticker/bookTicker", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("symbol", display.as_str())])
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !resp.status().is_success() {
            return Err(VenueError::transient(format!("bookTicker returned {}", resp.status())));
        }

        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        let get = |key: &str| body.get(key).and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO);

        Ok(OrderbookL1 {
            symbol: symbol.clone(),
            venue: self.venue_id,
            bid_px: get("bidPrice"),
            bid_qty: get("bidQty"),
            ask_px: get("askPrice"),
            ask_qty: get("askQty"),
            updated_at: Utc::now(),
        })
    }

    #[instrument(skip(self), name = "binance::get_orderbook_depth")]
    async fn get_orderbook_depth(&self, symbol: &Symbol, levels: u32) -> Result<OrderbookDepth, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let url = format!("{}/fapi/v1/depth", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("symbol", display.as_str()), ("limit", &levels.to_string())])
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !resp.status().is_success() {
            return Err(VenueError::transient(format!("depth returned {}", resp.status())));
        }

        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        let parse_side = |key: &str| -> Vec<(Decimal, Decimal)> {
            body.get(key)
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
            bids: parse_side("bids"),
            asks: parse_side("asks"),
            updated_at: Utc::now(),
        })
    }

    #[instrument(skip(self), name = "binance::get_funding_rate")]
    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let url = format!("{}/fapi/v1/premiumIndex", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("symbol", display.as_str())])
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !resp.status().is_success() {
            return Err(VenueError::transient(format!("premiumIndex returned {}", resp.status())));
        }

        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        let raw_rate = body
            .get("lastFundingRate")
            .and_then(|v| v.as_str())
            .map(Self::parse_decimal)
            .unwrap_or(Decimal::ZERO);
        let next_funding_ms = body.get("nextFundingTime").and_then(|v| v.as_i64()).unwrap_or(0);

        // Binance USDT-M perps pay every 8 hours; normalize to hourly.
        let rate_hourly = FundingRate::normalize(raw_rate, Decimal::from(8));

        Ok(FundingRate {
            symbol: symbol.clone(),
            venue: self.venue_id,
            rate_hourly,
            next_funding_time: Utc.timestamp_millis_opt(next_funding_ms).single().unwrap_or_else(Utc::now),
            observed_at: Utc::now(),
        })
    }

    #[instrument(skip(self), name = "binance::list_positions")]
    async fn list_positions(&self) -> Result<Vec<Position>, VenueError> {
        let url = format!("{}/fapi/v2/positionRisk", self.base_url);
        let query = self.signed_query(&[]);
        let resp = self
            .client
            .get(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !resp.status().is_success() {
            return Err(VenueError::transient(format!("positionRisk returned {}", resp.status())));
        }

        let body: Vec<serde_json::Value> = resp.json().await.map_err(Self::map_transport_error)?;
        let positions = body
            .into_iter()
            .filter_map(|p| self.parse_position(&p))
            .filter(|pos| pos.qty != Decimal::ZERO)
            .collect();

        Ok(positions)
    }

    #[instrument(skip(self), name = "binance::get_position")]
    async fn get_position(&self, symbol: &Symbol) -> Result<Option<Position>, VenueError> {
        let positions = self.list_positions().await?;
        Ok(positions.into_iter().find(|p| &p.symbol == symbol))
    }

    #[instrument(skip(self), name = "binance::get_available_balance")]
    async fn get_available_balance(&self) -> Result<Decimal, VenueError> {
        let url = format!("{}/fapi/v2/balance", self.base_url);
        let query = self.signed_query(&[]);
        let resp = self
            .client
            .get(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !resp.status().is_success() {
            return Err(VenueError::transient(format!("balance returned {}", resp.status())));
        }

        let body: Vec<serde_json::Value> = resp.json().await.map_err(Self::map_transport_error)?;
        let available = body
            .iter()
            .find(|b| b.get("asset").and_then(|v| v.as_str()) == Some("USDT"))
            .and_then(|b| b.get("availableBalance"))
            .and_then(|v| v.as_str())
            .map(Self::parse_decimal)
            .unwrap_or(Decimal::ZERO);

        Ok(available)
    }

    #[instrument(skip(self), name = "binance::get_realized_funding")]
    async fn get_realized_funding(&self, symbol: &Symbol, since: DateTime<Utc>) -> Result<Decimal, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let url = format!("{}/fapi/v1/income", self.base_url);
        let query = self.signed_query(&[
            ("symbol", display),
            ("incomeType", "FUNDING_FEE".to_string()),
            ("startTime", since.timestamp_millis().to_string()),
        ]);
        let resp = self
            .client
            .get(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !resp.status().is_success() {
            return Err(VenueError::transient(format!("income returned {}", resp.status())));
        }

        let body: Vec<serde_json::Value> = resp.json().await.map_err(Self::map_transport_error)?;
        let total = body
            .iter()
            .filter_map(|e| e.get("income").and_then(|v| v.as_str()))
            .map(Self::parse_decimal)
            .sum();

        Ok(total)
    }

    #[instrument(skip(self, req), name = "binance::place_order")]
    async fn place_order(&self, req: OrderRequest) -> Result<Order, VenueError> {
        if !self.rate_limiter.can_place_order() {
            return Err(VenueError::rate_limited("order rate limit reached"));
        }
        if req.qty <= Decimal::ZERO {
            return Err(VenueError::validation("order qty must be positive"));
        }

        let display = format!("{}USDT", req.symbol.0);
        let side = match req.side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        };
        let order_type = match req.order_type {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
        };

        let mut params = vec![
            ("symbol".to_string(), display),
            ("side".to_string(), side.to_string()),
            ("type".to_string(), order_type.to_string()),
            ("quantity".to_string(), req.qty.to_string()),
            ("newClientOrderId".to_string(), req.client_order_id.clone()),
            ("reduceOnly".to_string(), req.reduce_only.to_string()),
        ];
        if let Some(price) = req.price {
            params.push(("price".to_string(), price.to_string()));
            params.push(("timeInForce".to_string(), req.tif.to_string()));
        }

        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        let query = self.signed_query(&params_ref);
        let url = format!("{}/fapi/v1/order", self.base_url);

        let resp = self
            .client
            .post(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        self.rate_limiter.record_order_sent();

        if resp.status() == reqwest::StatusCode::BAD_REQUEST {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let code = body.get("code").and_then(|v| v.as_i64()).unwrap_or(0);
            if code == -2010 {
                // Binance's duplicate-clientOrderId rejection.
                return Err(VenueError::rejection(
                    VenueRejectionReason::DuplicateClientId,
                    "duplicate client order id",
                ));
            }
            return Err(VenueError::rejection(
                VenueRejectionReason::OrderReject,
                body.get("msg").and_then(|v| v.as_str()).unwrap_or("order rejected").to_string(),
            ));
        }

        if !resp.status().is_success() {
            return Err(VenueError::transient(format!("place_order returned {}", resp.status())));
        }

        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        Ok(self.parse_order(&req, &body))
    }

    #[instrument(skip(self), name = "binance::get_order")]
    async fn get_order(&self, symbol: &Symbol, order_id: &str) -> Result<Order, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let query = self.signed_query(&[
            ("symbol", display),
            ("origClientOrderId", order_id.to_string()),
        ]);
        let url = format!("{}/fapi/v1/order", self.base_url);

        let resp = self
            .client
            .get(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !resp.status().is_success() {
            return Err(VenueError::transient(format!("get_order returned {}", resp.status())));
        }

        let body: serde_json::Value = resp.json().await.map_err(Self::map_transport_error)?;
        let req = self.reconstruct_request(symbol, &body);
        Ok(self.parse_order(&req, &body))
    }

    #[instrument(skip(self), name = "binance::cancel_order")]
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<bool, VenueError> {
        let display = format!("{}USDT", symbol.0);
        let query = self.signed_query(&[
            ("symbol", display),
            ("origClientOrderId", order_id.to_string()),
        ]);
        let url = format!("{}/fapi/v1/order", self.base_url);

        let resp = self
            .client
            .delete(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(VenueError::transient(format!("cancel_order returned {}", resp.status())));
        }

        Ok(true)
    }

    #[instrument(skip(self), name = "binance::cancel_all")]
    async fn cancel_all(&self, symbol: Option<&Symbol>) -> Result<u32, VenueError> {
        let Some(symbol) = symbol else {
            return Err(VenueError::validation("cancel_all requires a symbol on this venue"));
        };
        let display = format!("{}USDT", symbol.0);
        let query = self.signed_query(&[("symbol", display)]);
        let url = format!("{}/fapi/v1/allOpenOrders", self.base_url);

        let resp = self
            .client
            .delete(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !resp.status().is_success() {
            return Err(VenueError::transient(format!("cancel_all returned {}", resp.status())));
        }

        Ok(1)
    }
}

impl BinanceVenue {
    fn parse_position(&self, p: &serde_json::Value) -> Option<Position> {
        let display = p.get("symbol").and_then(|v| v.as_str())?;
        let canonical = display.trim_end_matches("USDT");
        let qty = p.get("positionAmt").and_then(|v| v.as_str()).map(Self::parse_decimal)?;
        let side = if qty >= Decimal::ZERO { Side::Long } else { Side::Short };
        let liq_px = p
            .get("liquidationPrice")
            .and_then(|v| v.as_str())
            .map(Self::parse_decimal)
            .filter(|d| *d != Decimal::ZERO);

        Some(Position {
            symbol: canonical.into(),
            venue: self.venue_id,
            side,
            qty: qty.abs(),
            entry_px: p.get("entryPrice").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            mark_px: p.get("markPrice").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            liq_px,
            unrealized_pnl: p.get("unRealizedProfit").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            leverage: p.get("leverage").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ONE),
            observed_at: Utc::now(),
        })
    }

    fn parse_order(&self, req: &OrderRequest, body: &serde_json::Value) -> Order {
        let status = match body.get("status").and_then(|v| v.as_str()).unwrap_or("NEW") {
            "NEW" => OrderStatus::Open,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" => OrderStatus::Expired,
            _ => OrderStatus::Pending,
        };

        Order {
            request: req.clone(),
            order_id: body
                .get("clientOrderId")
                .and_then(|v| v.as_str())
                .unwrap_or(&req.client_order_id)
                .to_string(),
            status,
            filled_qty: body.get("executedQty").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            avg_fill_px: body.get("avgPrice").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            fee: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn reconstruct_request(&self, symbol: &Symbol, body: &serde_json::Value) -> OrderRequest {
        let side = match body.get("side").and_then(|v| v.as_str()) {
            Some("SELL") => Side::Short,
            _ => Side::Long,
        };
        let order_type = match body.get("type").and_then(|v| v.as_str()) {
            Some("MARKET") => OrderType::Market,
            _ => OrderType::Limit,
        };

        OrderRequest {
            symbol: symbol.clone(),
            venue: self.venue_id,
            side,
            qty: body.get("origQty").and_then(|v| v.as_str()).map(Self::parse_decimal).unwrap_or(Decimal::ZERO),
            order_type,
            price: body.get("price").and_then(|v| v.as_str()).map(Self::parse_decimal),
            tif: crate::types::TimeInForce::Gtc,
            reduce_only: body.get("reduceOnly").and_then(|v| v.as_bool()).unwrap_or(false),
            client_order_id: body
                .get("clientOrderId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_the_same_query() {
        let venue = BinanceVenue::new(
            VenueId::Maker,
            "key".to_string(),
            "secret".to_string(),
            "https://fapi.example.com",
        );
        let sig1 = venue.sign("symbol=ETHUSDT&timestamp=1000");
        let sig2 = venue.sign("symbol=ETHUSDT&timestamp=1000");
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn signature_changes_with_query() {
        let venue = BinanceVenue::new(
            VenueId::Maker,
            "key".to_string(),
            "secret".to_string(),
            "https://fapi.example.com",
        );
        let sig1 = venue.sign("symbol=ETHUSDT&timestamp=1000");
        let sig2 = venue.sign("symbol=BTCUSDT&timestamp=1000");
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn debug_impl_redacts_credentials() {
        let venue = BinanceVenue::new(
            VenueId::Maker,
            "super-secret-key".to_string(),
            "super-secret-secret".to_string(),
            "https://fapi.example.com",
        );
        let debug_str = format!("{venue:?}");
        assert!(!debug_str.contains("super-secret-key"));
        assert!(!debug_str.contains("super-secret-secret"));
        assert!(debug_str.contains("<redacted>"));
    }
}
