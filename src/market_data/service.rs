// =============================================================================
// Market data refresh service — spec §4.C
// =============================================================================
//
// Fans out per-symbol, per-venue fetches behind a bounded semaphore, the
// same pattern as the teacher's `DomeEnrichmentService::spawn_workers`
// (Arc<Semaphore> capping concurrent requests). Each fetch is wrapped in
// `tokio::time::timeout`; a slow or failing venue never blocks the rest
// of the scan. Results land in a short-TTL cache the opportunity engine
// and execution engine read from directly instead of hitting the network
// on every decision.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::market_data::snapshot::{SymbolSnapshot, VenueSnapshot};
use crate::types::{Symbol, VenueId};
use crate::venue::VenuePort;

const DEFAULT_MAX_CONCURRENCY: usize = 20;
const DEFAULT_PER_VENUE_TIMEOUT: StdDuration = StdDuration::from_secs(2);

pub struct MarketDataService {
    maker: Arc<dyn VenuePort>,
    hedge: Arc<dyn VenuePort>,
    cache: RwLock<HashMap<Symbol, SymbolSnapshot>>,
    semaphore: Arc<Semaphore>,
    per_venue_timeout: StdDuration,
}

impl MarketDataService {
    pub fn new(maker: Arc<dyn VenuePort>, hedge: Arc<dyn VenuePort>) -> Self {
        Self {
            maker,
            hedge,
            cache: RwLock::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENCY)),
            per_venue_timeout: DEFAULT_PER_VENUE_TIMEOUT,
        }
    }

    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        self
    }

    pub fn with_per_venue_timeout(mut self, timeout: StdDuration) -> Self {
        self.per_venue_timeout = timeout;
        self
    }

    /// Refresh every symbol concurrently, bounded by the configured
    /// semaphore. A venue that times out or errors yields a "missing
    /// side" snapshot for that symbol rather than dropping the symbol
    /// from the refresh entirely (spec §4.C) — the missing side's invalid
    /// orderbook naturally fails the opportunity engine's validity filter
    /// downstream, but the other side's live quote is never discarded.
    pub async fn refresh_symbols(&self, symbols: &[Symbol]) {
        let mut handles = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let symbol = symbol.clone();
            let maker = self.maker.clone();
            let hedge = self.hedge.clone();
            let semaphore = self.semaphore.clone();
            let timeout = self.per_venue_timeout;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                Some(Self::fetch_one(&symbol, maker.as_ref(), hedge.as_ref(), timeout).await)
            }));
        }

        let mut refreshed = 0usize;
        let mut failed = 0usize;
        for handle in handles {
            match handle.await {
                Ok(Some(snapshot)) => {
                    refreshed += 1;
                    self.cache.write().insert(snapshot.symbol.clone(), snapshot);
                }
                Ok(None) => failed += 1,
                Err(e) => {
                    warn!(error = %e, "market data refresh task panicked");
                    failed += 1;
                }
            }
        }

        debug!(refreshed, failed, "market data refresh tick complete");
    }

    async fn fetch_one(
        symbol: &Symbol,
        maker: &dyn VenuePort,
        hedge: &dyn VenuePort,
        timeout: StdDuration,
    ) -> SymbolSnapshot {
        let maker_snapshot = Self::fetch_venue(symbol, VenueId::Maker, maker, timeout).await;
        let hedge_snapshot = Self::fetch_venue(symbol, VenueId::Hedge, hedge, timeout).await;
        SymbolSnapshot { symbol: symbol.clone(), maker: maker_snapshot, hedge: hedge_snapshot }
    }

    /// Fetch one venue's view of a symbol. On timeout or error, returns a
    /// "missing side" snapshot — a zeroed orderbook that fails the
    /// opportunity engine's `is_valid()` check and a zero funding rate —
    /// instead of `None`, so the other venue's live quote still reaches
    /// the cache this tick (spec §4.C).
    async fn fetch_venue(symbol: &Symbol, venue_id: VenueId, venue: &dyn VenuePort, timeout: StdDuration) -> VenueSnapshot {
        let l1 = match tokio::time::timeout(timeout, venue.get_orderbook_l1(symbol)).await {
            Ok(Ok(l1)) => Some(l1),
            Ok(Err(e)) => {
                warn!(%symbol, venue = %venue_id, error = %e, "orderbook fetch failed");
                None
            }
            Err(_) => {
                warn!(%symbol, venue = %venue_id, "orderbook fetch timed out");
                None
            }
        };

        let funding = match tokio::time::timeout(timeout, venue.get_funding_rate(symbol)).await {
            Ok(Ok(funding)) => Some(funding),
            Ok(Err(e)) => {
                warn!(%symbol, venue = %venue_id, error = %e, "funding rate fetch failed");
                None
            }
            Err(_) => {
                warn!(%symbol, venue = %venue_id, "funding rate fetch timed out");
                None
            }
        };

        let now = Utc::now();
        VenueSnapshot {
            symbol: symbol.clone(),
            venue: venue_id,
            l1: l1.unwrap_or_else(|| Self::missing_orderbook(symbol, venue_id, now)),
            funding: funding.unwrap_or_else(|| Self::missing_funding(symbol, venue_id, now)),
            market_info: None,
            fetched_at: now,
        }
    }

    fn missing_orderbook(symbol: &Symbol, venue_id: VenueId, now: chrono::DateTime<Utc>) -> crate::trade::OrderbookL1 {
        crate::trade::OrderbookL1 {
            symbol: symbol.clone(),
            venue: venue_id,
            bid_px: rust_decimal::Decimal::ZERO,
            bid_qty: rust_decimal::Decimal::ZERO,
            ask_px: rust_decimal::Decimal::ZERO,
            ask_qty: rust_decimal::Decimal::ZERO,
            updated_at: now,
        }
    }

    fn missing_funding(symbol: &Symbol, venue_id: VenueId, now: chrono::DateTime<Utc>) -> crate::trade::FundingRate {
        crate::trade::FundingRate {
            symbol: symbol.clone(),
            venue: venue_id,
            rate_hourly: rust_decimal::Decimal::ZERO,
            next_funding_time: now,
            observed_at: now,
        }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<SymbolSnapshot> {
        self.cache.read().get(symbol).cloned()
    }

    pub fn all(&self) -> Vec<SymbolSnapshot> {
        self.cache.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VenueError;
    use crate::trade::{FundingRate, MarketInfo, Order, OrderRequest, OrderbookL1, Position};
    use crate::venue::OrderbookDepth;
    use async_trait::async_trait;
    use chrono::DateTime;
    use rust_decimal::Decimal;

    struct StubVenue {
        venue_id: VenueId,
        fail: bool,
    }

    #[async_trait]
    impl VenuePort for StubVenue {
        fn venue_id(&self) -> VenueId {
            self.venue_id
        }
        async fn initialize(&self) -> Result<(), VenueError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), VenueError> {
            Ok(())
        }
        async fn load_markets(&self) -> Result<HashMap<Symbol, MarketInfo>, VenueError> {
            Ok(HashMap::new())
        }
        async fn get_orderbook_l1(&self, symbol: &Symbol) -> Result<OrderbookL1, VenueError> {
            if self.fail {
                return Err(VenueError::transient("boom"));
            }
            Ok(OrderbookL1 {
                symbol: symbol.clone(),
                venue: self.venue_id,
                bid_px: Decimal::from(100),
                bid_qty: Decimal::ONE,
                ask_px: Decimal::from(101),
                ask_qty: Decimal::ONE,
                updated_at: Utc::now(),
            })
        }
        async fn get_orderbook_depth(&self, symbol: &Symbol, _levels: u32) -> Result<OrderbookDepth, VenueError> {
            Ok(OrderbookDepth { symbol: symbol.clone(), venue: self.venue_id, bids: vec![], asks: vec![], updated_at: Utc::now() })
        }
        async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, VenueError> {
            Ok(FundingRate { symbol: symbol.clone(), venue: self.venue_id, rate_hourly: Decimal::ZERO, next_funding_time: Utc::now(), observed_at: Utc::now() })
        }
        async fn list_positions(&self) -> Result<Vec<Position>, VenueError> {
            Ok(vec![])
        }
        async fn get_position(&self, _symbol: &Symbol) -> Result<Option<Position>, VenueError> {
            Ok(None)
        }
        async fn get_available_balance(&self) -> Result<Decimal, VenueError> {
            Ok(Decimal::ZERO)
        }
        async fn get_realized_funding(&self, _symbol: &Symbol, _since: DateTime<Utc>) -> Result<Decimal, VenueError> {
            Ok(Decimal::ZERO)
        }
        async fn place_order(&self, _req: OrderRequest) -> Result<Order, VenueError> {
            unreachable!()
        }
        async fn get_order(&self, _symbol: &Symbol, _order_id: &str) -> Result<Order, VenueError> {
            unreachable!()
        }
        async fn cancel_order(&self, _symbol: &Symbol, _order_id: &str) -> Result<bool, VenueError> {
            unreachable!()
        }
        async fn cancel_all(&self, _symbol: Option<&Symbol>) -> Result<u32, VenueError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn refresh_populates_cache_for_both_venues_ok() {
        let service = MarketDataService::new(
            Arc::new(StubVenue { venue_id: VenueId::Maker, fail: false }),
            Arc::new(StubVenue { venue_id: VenueId::Hedge, fail: false }),
        );
        service.refresh_symbols(&["ETH".into(), "BTC".into()]).await;
        assert_eq!(service.len(), 2);
        assert!(service.get(&"ETH".into()).is_some());
    }

    #[tokio::test]
    async fn refresh_keeps_symbol_with_missing_side_when_one_venue_fails() {
        let service = MarketDataService::new(
            Arc::new(StubVenue { venue_id: VenueId::Maker, fail: false }),
            Arc::new(StubVenue { venue_id: VenueId::Hedge, fail: true }),
        );
        service.refresh_symbols(&["ETH".into()]).await;

        let snapshot = service.get(&"ETH".into()).expect("symbol should stay cached despite one venue failing");
        assert!(snapshot.maker.l1.is_valid());
        assert!(!snapshot.hedge.l1.is_valid(), "missing side should carry a sentinel invalid orderbook");
    }
}
