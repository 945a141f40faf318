// =============================================================================
// Venue adapter contract — spec §4.A
// =============================================================================
//
// The core never pattern-matches on SDK types; every adapter wraps its
// own REST/WS client and re-emits the `VenueError` taxonomy from
// `crate::error`. Two concrete adapters plug into this trait (maker,
// hedge); a third (`PaperVenue`) stands in for either slot when
// `live_trading` is false.
// =============================================================================

pub mod binance;
pub mod bybit;
pub mod paper;
pub mod rate_limit;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::VenueError;
use crate::trade::{FundingRate, MarketInfo, Order, OrderRequest, OrderbookL1, Position};
use crate::types::{Symbol, VenueId};

/// A depth-of-book snapshot beyond L1. `levels` requested may exceed what
/// the venue actually returns; a shorter response is not an error
/// (spec §4.A).
#[derive(Debug, Clone)]
pub struct OrderbookDepth {
    pub symbol: Symbol,
    pub venue: VenueId,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait VenuePort: Send + Sync {
    fn venue_id(&self) -> VenueId;

    /// Scoped lifecycle start — open connection pools, prime caches.
    async fn initialize(&self) -> Result<(), VenueError>;

    /// Scoped lifecycle end — MUST cancel outstanding WS subscriptions and
    /// close HTTP pools.
    async fn close(&self) -> Result<(), VenueError>;

    async fn load_markets(&self) -> Result<HashMap<Symbol, MarketInfo>, VenueError>;

    async fn get_orderbook_l1(&self, symbol: &Symbol) -> Result<OrderbookL1, VenueError>;

    async fn get_orderbook_depth(
        &self,
        symbol: &Symbol,
        levels: u32,
    ) -> Result<OrderbookDepth, VenueError>;

    /// Rate pre-normalized to hourly before this returns.
    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, VenueError>;

    async fn list_positions(&self) -> Result<Vec<Position>, VenueError>;

    async fn get_position(&self, symbol: &Symbol) -> Result<Option<Position>, VenueError>;

    async fn get_available_balance(&self) -> Result<Decimal, VenueError>;

    async fn get_realized_funding(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
    ) -> Result<Decimal, VenueError>;

    async fn place_order(&self, req: OrderRequest) -> Result<Order, VenueError>;

    async fn get_order(&self, symbol: &Symbol, order_id: &str) -> Result<Order, VenueError>;

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<bool, VenueError>;

    async fn cancel_all(&self, symbol: Option<&Symbol>) -> Result<u32, VenueError>;
}
