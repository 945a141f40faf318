// =============================================================================
// Paper-trading adapter — backs `live_trading = false` (spec §6)
// =============================================================================
//
// Grounded on the teacher's `execution.rs` `ExecutionResult::Simulated`
// branch: market data is read straight through from a real venue so
// scoring and sizing see live prices, but every order is filled
// in-process against the last observed top-of-book instead of reaching
// the network. Fills are immediate and total — this adapter exists to
// exercise the FSM and the store, not to model partial fills or slippage.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::instrument;

use crate::error::VenueError;
use crate::trade::{FundingRate, MarketInfo, Order, OrderRequest, OrderbookL1, Position};
use crate::types::{OrderStatus, Side, Symbol, VenueId};
use crate::venue::{OrderbookDepth, VenuePort};

/// Wraps a real adapter for read-only market data while simulating order
/// placement, fills, positions, and balance locally.
pub struct PaperVenue {
    venue_id: VenueId,
    quote_source: Arc<dyn VenuePort>,
    starting_balance: Decimal,
    realized_pnl_x1000: AtomicI64,
    positions: RwLock<HashMap<Symbol, Position>>,
    orders: RwLock<HashMap<String, Order>>,
}

impl std::fmt::Debug for PaperVenue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperVenue")
            .field("venue_id", &self.venue_id)
            .field("starting_balance", &self.starting_balance)
            .finish()
    }
}

impl PaperVenue {
    pub fn new(venue_id: VenueId, quote_source: Arc<dyn VenuePort>, starting_balance: Decimal) -> Self {
        Self {
            venue_id,
            quote_source,
            starting_balance,
            realized_pnl_x1000: AtomicI64::new(0),
            positions: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
        }
    }

    fn realized_pnl(&self) -> Decimal {
        let milli = self.realized_pnl_x1000.load(Ordering::Relaxed);
        Decimal::new(milli, 3)
    }

    /// Apply a fill to the paper position, netting against any existing
    /// opposite-side exposure and accumulating realized pnl on the netted
    /// portion — same accounting the teacher's simulated branch used for
    /// a single-venue paper fill, generalized to long and short legs.
    fn apply_fill(&self, req: &OrderRequest, fill_px: Decimal) {
        let mut positions = self.positions.write();
        let entry = positions.entry(req.symbol.clone()).or_insert_with(|| Position {
            symbol: req.symbol.clone(),
            venue: self.venue_id,
            side: req.side,
            qty: Decimal::ZERO,
            entry_px: fill_px,
            mark_px: fill_px,
            liq_px: None,
            unrealized_pnl: Decimal::ZERO,
            leverage: Decimal::ONE,
            observed_at: Utc::now(),
        });

        let signed_existing = Decimal::from(entry.side.sign()) * entry.qty;
        let signed_delta = Decimal::from(req.side.sign()) * req.qty;
        let signed_new = signed_existing + signed_delta;

        if signed_existing != Decimal::ZERO && signed_existing.signum() != signed_delta.signum() {
            let closing_qty = req.qty.min(entry.qty);
            let pnl = Decimal::from(entry.side.sign()) * (fill_px - entry.entry_px) * closing_qty;
            let milli: i64 = (pnl * Decimal::from(1000)).round().try_into().unwrap_or(0);
            self.realized_pnl_x1000.fetch_add(milli, Ordering::Relaxed);
        }

        entry.qty = signed_new.abs();
        entry.side = if signed_new >= Decimal::ZERO { Side::Long } else { Side::Short };
        entry.mark_px = fill_px;
        if entry.qty > Decimal::ZERO && signed_existing.signum() == signed_delta.signum() {
            // Weighted-average entry when adding to the same side.
            let prior_notional = entry.entry_px * signed_existing.abs();
            let added_notional = fill_px * req.qty;
            entry.entry_px = (prior_notional + added_notional) / (signed_existing.abs() + req.qty);
        } else if signed_existing.signum() != signed_delta.signum() {
            entry.entry_px = fill_px;
        }
        entry.observed_at = Utc::now();

        if entry.qty == Decimal::ZERO {
            positions.remove(&req.symbol);
        }
    }
}

#[async_trait]
impl VenuePort for PaperVenue {
    fn venue_id(&self) -> VenueId {
        self.venue_id
    }

    #[instrument(skip(self), name = "paper::initialize")]
    async fn initialize(&self) -> Result<(), VenueError> {
        Ok(())
    }

    #[instrument(skip(self), name = "paper::close")]
    async fn close(&self) -> Result<(), VenueError> {
        Ok(())
    }

    async fn load_markets(&self) -> Result<HashMap<Symbol, MarketInfo>, VenueError> {
        self.quote_source.load_markets().await
    }

    async fn get_orderbook_l1(&self, symbol: &Symbol) -> Result<OrderbookL1, VenueError> {
        self.quote_source.get_orderbook_l1(symbol).await
    }

    async fn get_orderbook_depth(&self, symbol: &Symbol, levels: u32) -> Result<OrderbookDepth, VenueError> {
        self.quote_source.get_orderbook_depth(symbol, levels).await
    }

    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, VenueError> {
        self.quote_source.get_funding_rate(symbol).await
    }

    async fn list_positions(&self) -> Result<Vec<Position>, VenueError> {
        Ok(self.positions.read().values().cloned().collect())
    }

    async fn get_position(&self, symbol: &Symbol) -> Result<Option<Position>, VenueError> {
        Ok(self.positions.read().get(symbol).cloned())
    }

    async fn get_available_balance(&self) -> Result<Decimal, VenueError> {
        Ok(self.starting_balance + self.realized_pnl())
    }

    async fn get_realized_funding(&self, _symbol: &Symbol, _since: DateTime<Utc>) -> Result<Decimal, VenueError> {
        // Funding accrual is modeled by the funding tracker using the same
        // `FundingRate` stream every adapter exposes; the paper adapter has
        // no separate funding ledger to query.
        Ok(Decimal::ZERO)
    }

    #[instrument(skip(self, req), name = "paper::place_order")]
    async fn place_order(&self, req: OrderRequest) -> Result<Order, VenueError> {
        if req.qty <= Decimal::ZERO {
            return Err(VenueError::validation("order qty must be positive"));
        }

        if self.orders.read().contains_key(&req.client_order_id) {
            // Idempotent retry of an already-filled paper order.
            return Ok(self.orders.read()[&req.client_order_id].clone());
        }

        let l1 = self.quote_source.get_orderbook_l1(&req.symbol).await?;
        if !l1.is_execution_ready() {
            return Err(VenueError::transient("no executable quote to fill paper order against"));
        }

        let fill_px = req.price.unwrap_or(match req.side {
            Side::Long => l1.ask_px,
            Side::Short => l1.bid_px,
        });

        self.apply_fill(&req, fill_px);

        let order = Order {
            order_id: req.client_order_id.clone(),
            status: OrderStatus::Filled,
            filled_qty: req.qty,
            avg_fill_px: fill_px,
            fee: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            request: req.clone(),
        };
        self.orders.write().insert(req.client_order_id.clone(), order.clone());
        Ok(order)
    }

    async fn get_order(&self, _symbol: &Symbol, order_id: &str) -> Result<Order, VenueError> {
        self.orders
            .read()
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::validation(format!("unknown paper order {order_id}")))
    }

    async fn cancel_order(&self, _symbol: &Symbol, _order_id: &str) -> Result<bool, VenueError> {
        // Every paper order fills synchronously in `place_order`; by the
        // time a caller could cancel, it is already terminal.
        Ok(false)
    }

    async fn cancel_all(&self, _symbol: Option<&Symbol>) -> Result<u32, VenueError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::MarketInfo;
    use crate::types::{OrderType, TimeInForce};

    struct FixedQuoteVenue {
        l1: OrderbookL1,
    }

    #[async_trait]
    impl VenuePort for FixedQuoteVenue {
        fn venue_id(&self) -> VenueId {
            VenueId::Maker
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
        async fn get_orderbook_l1(&self, _symbol: &Symbol) -> Result<OrderbookL1, VenueError> {
            Ok(self.l1.clone())
        }
        async fn get_orderbook_depth(&self, symbol: &Symbol, _levels: u32) -> Result<OrderbookDepth, VenueError> {
            Ok(OrderbookDepth {
                symbol: symbol.clone(),
                venue: VenueId::Maker,
                bids: vec![],
                asks: vec![],
                updated_at: Utc::now(),
            })
        }
        async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, VenueError> {
            Ok(FundingRate {
                symbol: symbol.clone(),
                venue: VenueId::Maker,
                rate_hourly: Decimal::ZERO,
                next_funding_time: Utc::now(),
                observed_at: Utc::now(),
            })
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
            unreachable!("quote source never places orders")
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

    fn quote() -> Arc<dyn VenuePort> {
        Arc::new(FixedQuoteVenue {
            l1: OrderbookL1 {
                symbol: "ETH".into(),
                venue: VenueId::Maker,
                bid_px: Decimal::from(3000),
                bid_qty: Decimal::from(100),
                ask_px: Decimal::from(3001),
                ask_qty: Decimal::from(100),
                updated_at: Utc::now(),
            },
        })
    }

    fn req(side: Side, client_order_id: &str) -> OrderRequest {
        OrderRequest {
            symbol: "ETH".into(),
            venue: VenueId::Maker,
            side,
            qty: Decimal::ONE,
            order_type: OrderType::Market,
            price: None,
            tif: TimeInForce::Ioc,
            reduce_only: false,
            client_order_id: client_order_id.to_string(),
        }
    }

    #[tokio::test]
    async fn place_order_fills_immediately_at_top_of_book() {
        let venue = PaperVenue::new(VenueId::Maker, quote(), Decimal::from(10_000));
        let order = venue.place_order(req(Side::Long, "t-1")).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_fill_px, Decimal::from(3001));

        let pos = venue.get_position(&"ETH".into()).await.unwrap().unwrap();
        assert_eq!(pos.qty, Decimal::ONE);
        assert_eq!(pos.side, Side::Long);
    }

    #[tokio::test]
    async fn repeated_client_order_id_is_idempotent() {
        let venue = PaperVenue::new(VenueId::Maker, quote(), Decimal::from(10_000));
        let first = venue.place_order(req(Side::Long, "t-1")).await.unwrap();
        let second = venue.place_order(req(Side::Long, "t-1")).await.unwrap();
        assert_eq!(first.order_id, second.order_id);

        // Only one fill should have been applied despite two calls.
        let pos = venue.get_position(&"ETH".into()).await.unwrap().unwrap();
        assert_eq!(pos.qty, Decimal::ONE);
    }

    #[tokio::test]
    async fn closing_fill_realizes_pnl_and_clears_position() {
        let venue = PaperVenue::new(VenueId::Maker, quote(), Decimal::from(10_000));
        venue.place_order(req(Side::Long, "t-1")).await.unwrap();
        venue.place_order(req(Side::Short, "t-2")).await.unwrap();

        let pos = venue.get_position(&"ETH".into()).await.unwrap();
        assert!(pos.is_none());

        let balance = venue.get_available_balance().await.unwrap();
        // Bought at ask (3001), sold at bid (3000) -> -1 realized.
        assert_eq!(balance, Decimal::from(9_999));
    }
}
