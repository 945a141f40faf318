// =============================================================================
// Execution engine — the hedged-open protocol, spec §4.E
// =============================================================================
//
// Drives one Opportunity through preflight, LEG1 (maker, reprice /
// escalate-to-taker), LEG2 (hedge taker IOC, widening slippage), and
// rollback-on-partial-fill. The concurrent dual-leg placement and
// instant-reversal-on-partial-failure shape is grounded on the
// `atomic_execution.rs` `AtomicExecutor` pattern, reimplemented against
// this crate's own `VenuePort`/`Trade`/`ExecutionState` types rather than
// that file's `SimulatedOrder`/`ExecutionBackend` pair. The symbol lock
// held for the whole FSM lifetime comes from the same file's
// `HedgeLock`/`RaceConditionGuard`, generalized into `KeyedLocks`.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use ulid::Ulid;

use crate::config::{ExecutionConfig, TradingConfig};
use crate::error::{EngineError, VenueError};
use crate::events::{Event, EventBus};
use crate::execution::locks::KeyedLocks;
use crate::trade::{MarketInfo, Opportunity, Order, OrderRequest, OrderbookL1, Trade, TradeLeg};
use crate::trade_store::TradeStoreHandle;
use crate::types::{OrderStatus, OrderType, Side, Symbol, TimeInForce, VenueId};
use crate::venue::VenuePort;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn dec(f: f64) -> Decimal {
    Decimal::try_from(f).unwrap_or(Decimal::ZERO)
}

fn quantize_down(qty: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return qty;
    }
    (qty / step).floor() * step
}

/// Limit price for a maker (post-only) order, shaded toward the far side
/// of the book by `aggressiveness` (a price fraction) as retries mount,
/// clamped so it never crosses the book.
fn maker_price(l1: &OrderbookL1, side: Side, aggressiveness: Decimal) -> Decimal {
    match side {
        Side::Long => (l1.bid_px * (Decimal::ONE + aggressiveness)).min(l1.ask_px),
        Side::Short => (l1.ask_px * (Decimal::ONE - aggressiveness)).max(l1.bid_px),
    }
}

/// Slippage-guarded taker price: cross the book by `slippage`, a price
/// fraction, on the side the order actually needs to take.
fn taker_price(l1: &OrderbookL1, side: Side, slippage: Decimal) -> Decimal {
    match side {
        Side::Long => l1.ask_px * (Decimal::ONE + slippage),
        Side::Short => l1.bid_px * (Decimal::ONE - slippage),
    }
}

/// Accumulates fills across a sequence of cancel-then-reprice attempts for
/// one leg. Each attempt places a fresh, disjoint quantity (`remaining`),
/// so attempt totals can simply be summed rather than diffed.
#[derive(Default)]
struct LegFill {
    filled_qty: Decimal,
    notional: Decimal,
    fees: Decimal,
    last_order_id: String,
}

impl LegFill {
    fn add(&mut self, order: &Order) {
        if order.filled_qty > Decimal::ZERO {
            self.notional += order.filled_qty * order.avg_fill_px;
            self.filled_qty += order.filled_qty;
            self.fees += order.fee;
        }
        self.last_order_id = order.order_id.clone();
    }

    fn avg_px(&self) -> Decimal {
        if self.filled_qty > Decimal::ZERO {
            self.notional / self.filled_qty
        } else {
            Decimal::ZERO
        }
    }
}

/// Ties together the two venue adapters, the trade store, the event bus,
/// and the per-symbol lock directory to run the hedged-open protocol
/// end to end.
pub struct ExecutionEngine {
    maker: Arc<dyn VenuePort>,
    hedge: Arc<dyn VenuePort>,
    store: TradeStoreHandle,
    events: EventBus,
    locks: KeyedLocks<Symbol>,
    trading: TradingConfig,
    execution_cfg: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(
        maker: Arc<dyn VenuePort>,
        hedge: Arc<dyn VenuePort>,
        store: TradeStoreHandle,
        events: EventBus,
        trading: TradingConfig,
        execution_cfg: ExecutionConfig,
    ) -> Self {
        Self {
            maker,
            hedge,
            store,
            events,
            locks: KeyedLocks::new(),
            trading,
            execution_cfg,
        }
    }

    /// Run the full hedged-open protocol for `opportunity`. Always
    /// returns a `Trade` (never propagates a venue error out of a normal
    /// abort/rollback path) so the caller can always persist and log the
    /// outcome; only a truly unrecoverable condition surfaces as `Err`.
    #[instrument(skip(self, opportunity, maker_market, hedge_market), fields(symbol = %opportunity.symbol))]
    pub async fn open_trade(
        &self,
        opportunity: &Opportunity,
        maker_market: &MarketInfo,
        hedge_market: &MarketInfo,
    ) -> Result<Trade, EngineError> {
        let _guard = self.locks.acquire(&opportunity.symbol).await;
        let started = Instant::now();
        let trade_id = Ulid::new();

        let (target_qty, target_notional) =
            match self.preflight(opportunity, maker_market, hedge_market).await {
                Ok(v) => v,
                Err(reason) => {
                    info!(%trade_id, reason, "preflight rejected opportunity");
                    return Ok(self.new_trade_aborted(trade_id, opportunity, reason));
                }
            };

        let mut trade = self.new_trade(trade_id, opportunity, target_qty, target_notional);
        self.persist(&trade);

        let leg1_fill = match self.run_leg1(&trade, opportunity).await {
            Ok(fill) => fill,
            Err(e) => {
                trade.exec_state = crate::trade::ExecutionState::Failed;
                trade.status = crate::trade::TradeStatus::Failed;
                trade.close_reason = Some(e.to_string());
                self.persist(&trade);
                return Err(e);
            }
        };

        if leg1_fill.filled_qty <= Decimal::ZERO {
            trade.exec_state = crate::trade::ExecutionState::Aborted;
            trade.status = crate::trade::TradeStatus::Rejected;
            trade.close_reason = Some("leg1_unfilled".to_string());
            self.persist(&trade);
            info!(%trade_id, "aborted — leg1 never filled");
            return Ok(trade);
        }

        trade.leg1.order_id = Some(leg1_fill.last_order_id.clone());
        trade.leg1.qty_filled = leg1_fill.filled_qty;
        trade.leg1.entry_px = leg1_fill.avg_px();
        trade.leg1.fees = leg1_fill.fees;
        trade.exec_state = crate::trade::ExecutionState::Leg1Filled;
        self.persist(&trade);
        self.events.publish(Event::LegFilled {
            trade_id,
            symbol: trade.symbol.clone(),
            leg: VenueId::Maker,
            qty_filled: trade.leg1.qty_filled,
        });

        trade.exec_state = crate::trade::ExecutionState::Leg2Submitted;
        self.persist(&trade);

        let leg2_fill = match self.run_leg2(&trade, opportunity, leg1_fill.filled_qty).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(%trade_id, error = %e, "leg2 placement failed outright — entering rollback");
                LegFill::default()
            }
        };

        trade.leg2.order_id = if leg2_fill.last_order_id.is_empty() {
            None
        } else {
            Some(leg2_fill.last_order_id.clone())
        };
        trade.leg2.qty_filled = leg2_fill.filled_qty;
        trade.leg2.entry_px = leg2_fill.avg_px();
        trade.leg2.fees = leg2_fill.fees;
        self.persist(&trade);
        if leg2_fill.filled_qty > Decimal::ZERO {
            self.events.publish(Event::LegFilled {
                trade_id,
                symbol: trade.symbol.clone(),
                leg: VenueId::Hedge,
                qty_filled: trade.leg2.qty_filled,
            });
        }

        let step_tolerance = maker_market.step_size.max(hedge_market.step_size);
        if trade.legs_balanced(step_tolerance) {
            trade.exec_state = crate::trade::ExecutionState::Complete;
            trade.status = crate::trade::TradeStatus::Open;
            trade.opened_at = Some(chrono::Utc::now());
            self.persist(&trade);
            self.events.publish(Event::TradeOpened { trade_id, symbol: trade.symbol.clone() });
            info!(%trade_id, elapsed_ms = started.elapsed().as_millis(), "hedged open complete");
            return Ok(trade);
        }

        self.rollback(&mut trade, opportunity).await;
        Ok(trade)
    }

    // -------------------------------------------------------------------
    // Preflight
    // -------------------------------------------------------------------

    async fn preflight(
        &self,
        opportunity: &Opportunity,
        maker_market: &MarketInfo,
        hedge_market: &MarketInfo,
    ) -> Result<(Decimal, Decimal), &'static str> {
        let symbol = &opportunity.symbol;

        let (maker_l1, hedge_l1) =
            tokio::join!(self.maker.get_orderbook_l1(symbol), self.hedge.get_orderbook_l1(symbol));
        let maker_l1 = maker_l1.map_err(|_| "maker_l1_unavailable")?;
        let hedge_l1 = hedge_l1.map_err(|_| "hedge_l1_unavailable")?;

        if !maker_l1.is_execution_ready() || !hedge_l1.is_execution_ready() {
            return Err("orderbook_not_execution_ready");
        }

        let maker_mid = maker_l1.mid_px();
        let hedge_mid = hedge_l1.mid_px();
        if maker_mid == Decimal::ZERO {
            return Err("maker_mid_zero");
        }
        let spread = ((maker_mid - hedge_mid) / maker_mid).abs();
        if spread > dec(self.trading.max_spread_pct) {
            return Err("spread_too_wide");
        }

        let multiplier = dec(self.trading.hedge_depth_preflight_multiplier);
        let required_notional = opportunity.suggested_notional * multiplier;
        let maker_depth = maker_l1.bid_qty.min(maker_l1.ask_qty) * maker_mid;
        let hedge_depth = hedge_l1.bid_qty.min(hedge_l1.ask_qty) * hedge_mid;
        if maker_depth < required_notional || hedge_depth < required_notional {
            return Err("insufficient_preflight_depth");
        }

        let (maker_balance, hedge_balance) = tokio::join!(
            self.maker.get_available_balance(),
            self.hedge.get_available_balance()
        );
        let maker_balance = maker_balance.map_err(|_| "maker_balance_unavailable")?;
        let hedge_balance = hedge_balance.map_err(|_| "hedge_balance_unavailable")?;
        let required_margin = opportunity.suggested_notional / dec(self.trading.leverage_multiplier).max(Decimal::ONE);
        if maker_balance < required_margin || hedge_balance < required_margin {
            return Err("insufficient_margin");
        }

        let step = maker_market.step_size.max(hedge_market.step_size);
        let min_qty = maker_market.min_qty.max(hedge_market.min_qty);
        let mut qty = quantize_down(opportunity.suggested_qty, step);
        if qty < min_qty {
            qty = Decimal::ZERO;
        }
        if qty <= Decimal::ZERO {
            return Err("quantized_qty_below_min");
        }

        let notional = qty * maker_mid;
        let min_notional = maker_market.min_notional.max(hedge_market.min_notional);
        if notional < min_notional {
            return Err("notional_below_min");
        }

        Ok((qty, notional))
    }

    // -------------------------------------------------------------------
    // LEG1 — maker
    // -------------------------------------------------------------------

    async fn run_leg1(&self, trade: &Trade, opportunity: &Opportunity) -> Result<LegFill, EngineError> {
        let symbol = &trade.symbol;
        let side = trade.leg1.side;
        let target = trade.target_qty;
        let max_retries = self.execution_cfg.maker_max_retries;
        let max_aggressiveness = dec(self.execution_cfg.maker_max_aggressiveness);
        let timeout = Duration::from_secs(self.execution_cfg.maker_timeout_seconds);

        let mut fill = LegFill::default();

        for attempt in 0..=max_retries {
            let remaining = target - fill.filled_qty;
            if remaining <= Decimal::ZERO {
                break;
            }

            let l1 = self.maker.get_orderbook_l1(symbol).await?;
            let aggressiveness = max_aggressiveness * Decimal::from(attempt) / Decimal::from(max_retries.max(1));
            let price = maker_price(&l1, side, aggressiveness);

            let coid = OrderRequest::derive_client_order_id(&trade.trade_id, VenueId::Maker, attempt + 1);
            let req = OrderRequest {
                symbol: symbol.clone(),
                venue: VenueId::Maker,
                side,
                qty: remaining,
                order_type: OrderType::Limit,
                price: Some(price),
                tif: TimeInForce::PostOnly,
                reduce_only: false,
                client_order_id: coid,
            };

            let order = self.place_idempotent(self.maker.as_ref(), req).await?;
            let order = self.poll_until(self.maker.as_ref(), order, timeout).await;
            let filled_this_attempt = order.status == OrderStatus::Filled;
            fill.add(&order);

            if filled_this_attempt {
                return Ok(fill);
            }

            let _ = self.maker.cancel_order(symbol, &order.order_id).await;
        }

        let remaining = target - fill.filled_qty;
        if remaining > Decimal::ZERO && self.execution_cfg.leg1_escalate_to_taker_enabled {
            let l1 = self.maker.get_orderbook_l1(symbol).await?;
            let slippage = dec(self.execution_cfg.leg1_escalate_to_taker_slippage);
            let price = taker_price(&l1, side, slippage);

            let coid = OrderRequest::derive_client_order_id(
                &trade.trade_id,
                VenueId::Maker,
                max_retries + 2,
            );
            let req = OrderRequest {
                symbol: symbol.clone(),
                venue: VenueId::Maker,
                side,
                qty: remaining,
                order_type: OrderType::Limit,
                price: Some(price),
                tif: TimeInForce::Ioc,
                reduce_only: false,
                client_order_id: coid,
            };

            let order = self.place_idempotent(self.maker.as_ref(), req).await?;
            let order = self.poll_until(self.maker.as_ref(), order, Duration::from_secs(2)).await;
            fill.add(&order);
            info!(trade_id = %trade.trade_id, symbol = %opportunity.symbol, escalated_qty = %order.filled_qty, "escalated remaining leg1 qty to taker");
        }

        Ok(fill)
    }

    // -------------------------------------------------------------------
    // LEG2 — hedge taker
    // -------------------------------------------------------------------

    async fn run_leg2(
        &self,
        trade: &Trade,
        _opportunity: &Opportunity,
        qty_filled_leg1: Decimal,
    ) -> Result<LegFill, EngineError> {
        let symbol = &trade.symbol;
        let side = trade.leg2.side;
        let max_attempts = self.execution_cfg.hedge_ioc_max_attempts;
        let step = dec(self.execution_cfg.hedge_ioc_slippage_step);
        let max_slippage = dec(self.execution_cfg.hedge_ioc_max_slippage);

        let mut fill = LegFill::default();

        for attempt in 0..max_attempts {
            let remaining = qty_filled_leg1 - fill.filled_qty;
            if remaining <= Decimal::ZERO {
                break;
            }

            let l1 = self.hedge.get_orderbook_l1(symbol).await?;
            let slippage = (step * Decimal::from(attempt + 1)).min(max_slippage);
            let price = taker_price(&l1, side, slippage);

            let coid = OrderRequest::derive_client_order_id(&trade.trade_id, VenueId::Hedge, attempt + 1);
            let req = OrderRequest {
                symbol: symbol.clone(),
                venue: VenueId::Hedge,
                side,
                qty: remaining,
                order_type: OrderType::Limit,
                price: Some(price),
                tif: TimeInForce::Ioc,
                reduce_only: false,
                client_order_id: coid,
            };

            let order = self.place_idempotent(self.hedge.as_ref(), req).await?;
            let order = self.poll_until(self.hedge.as_ref(), order, Duration::from_secs(2)).await;
            fill.add(&order);
        }

        Ok(fill)
    }

    // -------------------------------------------------------------------
    // Rollback
    // -------------------------------------------------------------------

    async fn rollback(&self, trade: &mut Trade, _opportunity: &Opportunity) {
        let delta = trade.leg1.qty_filled - trade.leg2.qty_filled;
        if delta <= Decimal::ZERO {
            trade.exec_state = crate::trade::ExecutionState::Failed;
            trade.status = crate::trade::TradeStatus::Failed;
            trade.close_reason = Some("legs_imbalanced_unexpectedly".to_string());
            self.persist(trade);
            return;
        }

        trade.exec_state = crate::trade::ExecutionState::RollbackInProgress;
        self.persist(trade);
        self.events.publish(Event::RollbackInitiated {
            trade_id: trade.trade_id,
            symbol: trade.symbol.clone(),
            delta,
        });

        let symbol = trade.symbol.clone();
        let side = trade.leg1.side.opposite();
        let max_slippage = dec(self.execution_cfg.rollback_max_slippage);
        let step = max_slippage / Decimal::from(3);

        let mut remaining = delta;
        for attempt in 0..3u32 {
            if remaining <= Decimal::ZERO {
                break;
            }
            let l1 = match self.maker.get_orderbook_l1(&symbol).await {
                Ok(l1) => l1,
                Err(_) => continue,
            };
            let slippage = (step * Decimal::from(attempt + 1)).min(max_slippage);
            let price = taker_price(&l1, side, slippage);

            let coid = OrderRequest::derive_client_order_id(&trade.trade_id, VenueId::Maker, 100 + attempt);
            let req = OrderRequest {
                symbol: symbol.clone(),
                venue: VenueId::Maker,
                side,
                qty: remaining,
                order_type: OrderType::Limit,
                price: Some(price),
                tif: TimeInForce::Ioc,
                reduce_only: true,
                client_order_id: coid,
            };

            match self.place_idempotent(self.maker.as_ref(), req).await {
                Ok(order) => {
                    let order = self.poll_until(self.maker.as_ref(), order, Duration::from_secs(2)).await;
                    remaining -= order.filled_qty;
                    trade.leg1.exit_px = order.avg_fill_px;
                }
                Err(e) => warn!(trade_id = %trade.trade_id, error = %e, "rollback attempt failed"),
            }
        }

        if remaining <= Decimal::ZERO {
            trade.exec_state = crate::trade::ExecutionState::RollbackDone;
            trade.status = crate::trade::TradeStatus::Failed;
            trade.close_reason = Some("rolled_back_leg2_underfilled".to_string());
        } else {
            trade.exec_state = crate::trade::ExecutionState::RollbackFailed;
            trade.status = crate::trade::TradeStatus::Failed;
            trade.close_reason = Some("rollback_failed_broken_hedge".to_string());
            self.events.publish(Event::BrokenHedgeDetected {
                trade_id: trade.trade_id,
                symbol: trade.symbol.clone(),
                detail: format!("residual imbalance {remaining} after rollback attempts"),
            });
        }

        self.persist(trade);
    }

    // -------------------------------------------------------------------
    // Shared helpers
    // -------------------------------------------------------------------

    /// Place an order, treating a `DuplicateClientId` rejection as success
    /// per spec §4.E: since every adapter in this crate keys `Order::order_id`
    /// by the client order id, the existing order can always be recovered
    /// with a plain `get_order` lookup.
    async fn place_idempotent(&self, venue: &dyn VenuePort, req: OrderRequest) -> Result<Order, EngineError> {
        let symbol = req.symbol.clone();
        let coid = req.client_order_id.clone();
        match venue.place_order(req).await {
            Ok(order) => Ok(order),
            Err(e) if e.is_duplicate_client_id() => {
                warn!(%symbol, client_order_id = %coid, "duplicate client order id — recovering existing order");
                venue.get_order(&symbol, &coid).await.map_err(EngineError::from)
            }
            Err(e) => Err(EngineError::from(e)),
        }
    }

    /// Poll an order until it reaches a terminal status or `timeout`
    /// elapses, whichever comes first. A transient read failure just ends
    /// the poll with whatever was last known — it never fails the FSM.
    async fn poll_until(&self, venue: &dyn VenuePort, mut order: Order, timeout: Duration) -> Order {
        let deadline = Instant::now() + timeout;
        loop {
            if order.status.is_terminal() || Instant::now() >= deadline {
                return order;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            match venue.get_order(&order.request.symbol, &order.order_id).await {
                Ok(fresh) => order = fresh,
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "order status read failed, stopping poll");
                    return order;
                }
            }
        }
    }

    fn new_trade(&self, trade_id: Ulid, opportunity: &Opportunity, qty: Decimal, notional: Decimal) -> Trade {
        let maker_side = if opportunity.long_venue == VenueId::Maker { Side::Long } else { Side::Short };
        let hedge_side = maker_side.opposite();

        Trade {
            trade_id,
            symbol: opportunity.symbol.clone(),
            leg1: TradeLeg {
                venue: VenueId::Maker,
                side: maker_side,
                order_id: None,
                qty_target: qty,
                qty_filled: Decimal::ZERO,
                entry_px: Decimal::ZERO,
                exit_px: Decimal::ZERO,
                fees: Decimal::ZERO,
                qty_closed: Decimal::ZERO,
                last_close_order_id: None,
            },
            leg2: TradeLeg {
                venue: VenueId::Hedge,
                side: hedge_side,
                order_id: None,
                qty_target: qty,
                qty_filled: Decimal::ZERO,
                entry_px: Decimal::ZERO,
                exit_px: Decimal::ZERO,
                fees: Decimal::ZERO,
                qty_closed: Decimal::ZERO,
                last_close_order_id: None,
            },
            target_qty: qty,
            target_notional_usd: notional,
            status: crate::trade::TradeStatus::Opening,
            exec_state: crate::trade::ExecutionState::Leg1Submitted,
            entry_apy: opportunity.apy,
            entry_spread: opportunity.spread_pct,
            funding_collected: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            high_water_mark: Decimal::ZERO,
            close_reason: None,
            created_at: chrono::Utc::now(),
            opened_at: None,
            closed_at: None,
        }
    }

    fn new_trade_aborted(&self, trade_id: Ulid, opportunity: &Opportunity, reason: &'static str) -> Trade {
        let mut trade = self.new_trade(trade_id, opportunity, Decimal::ZERO, Decimal::ZERO);
        trade.exec_state = crate::trade::ExecutionState::Aborted;
        trade.status = crate::trade::TradeStatus::Rejected;
        trade.close_reason = Some(reason.to_string());
        self.persist(&trade);
        trade
    }

    fn persist(&self, trade: &Trade) {
        self.store.upsert_trade(trade.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::{FundingRate, OrderbookL1, Position};
    use crate::venue::OrderbookDepth;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::RwLock;
    use std::collections::HashMap;

    /// Fills any order instantly and in full at the requested price — a
    /// happy-path double for exercising the full open_trade flow without
    /// a real venue.
    struct InstantFillVenue {
        venue_id: VenueId,
        bid: Decimal,
        ask: Decimal,
        orders: RwLock<HashMap<String, Order>>,
    }

    impl InstantFillVenue {
        fn new(venue_id: VenueId, bid: i64, ask: i64) -> Self {
            Self {
                venue_id,
                bid: Decimal::from(bid),
                ask: Decimal::from(ask),
                orders: RwLock::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl VenuePort for InstantFillVenue {
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
            Ok(OrderbookL1 {
                symbol: symbol.clone(),
                venue: self.venue_id,
                bid_px: self.bid,
                bid_qty: Decimal::from(1000),
                ask_px: self.ask,
                ask_qty: Decimal::from(1000),
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
            Ok(Decimal::from(1_000_000))
        }
        async fn get_realized_funding(&self, _symbol: &Symbol, _since: DateTime<Utc>) -> Result<Decimal, VenueError> {
            Ok(Decimal::ZERO)
        }
        async fn place_order(&self, req: OrderRequest) -> Result<Order, VenueError> {
            if self.orders.read().contains_key(&req.client_order_id) {
                return Err(VenueError::rejection(crate::error::VenueRejectionReason::DuplicateClientId, "dup"));
            }
            let px = req.price.unwrap_or(self.bid);
            let order = Order {
                order_id: req.client_order_id.clone(),
                status: OrderStatus::Filled,
                filled_qty: req.qty,
                avg_fill_px: px,
                fee: Decimal::ZERO,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                request: req.clone(),
            };
            self.orders.write().insert(req.client_order_id, order.clone());
            Ok(order)
        }
        async fn get_order(&self, _symbol: &Symbol, order_id: &str) -> Result<Order, VenueError> {
            self.orders.read().get(order_id).cloned().ok_or_else(|| VenueError::validation("no such order"))
        }
        async fn cancel_order(&self, _symbol: &Symbol, _order_id: &str) -> Result<bool, VenueError> {
            Ok(true)
        }
        async fn cancel_all(&self, _symbol: Option<&Symbol>) -> Result<u32, VenueError> {
            Ok(0)
        }
    }

    fn market(venue: VenueId) -> MarketInfo {
        MarketInfo {
            symbol: "ETH".into(),
            venue,
            tick_size: "0.01".parse().unwrap(),
            step_size: "0.001".parse().unwrap(),
            min_qty: "0.001".parse().unwrap(),
            min_notional: Decimal::from(5),
            max_leverage: Decimal::from(10),
            maker_fee: Decimal::ZERO,
            taker_fee: Decimal::ZERO,
        }
    }

    fn opportunity() -> Opportunity {
        let l1 = OrderbookL1 {
            symbol: "ETH".into(),
            venue: VenueId::Maker,
            bid_px: Decimal::from(3000),
            bid_qty: Decimal::from(1000),
            ask_px: Decimal::from(3001),
            ask_qty: Decimal::from(1000),
            updated_at: Utc::now(),
        };
        Opportunity {
            symbol: "ETH".into(),
            long_venue: VenueId::Maker,
            short_venue: VenueId::Hedge,
            net_funding_hourly: "0.0005".parse().unwrap(),
            apy: "4.38".parse().unwrap(),
            spread_pct: "0.0001".parse().unwrap(),
            suggested_qty: Decimal::from(1),
            suggested_notional: Decimal::from(3000),
            expected_value_usd: Decimal::from(50),
            breakeven_hours: Decimal::from(2),
            score: Decimal::from(50),
            liquidity_score: Decimal::from(1000),
            mid_px: Decimal::from(3000),
            long_l1: l1.clone(),
            short_l1: l1,
            observed_at: Utc::now(),
        }
    }

    fn engine(maker: Arc<dyn VenuePort>, hedge: Arc<dyn VenuePort>) -> ExecutionEngine {
        let store = crate::trade_store::TradeStore::open_memory().unwrap();
        ExecutionEngine::new(
            maker,
            hedge,
            store.handle(),
            EventBus::new(16),
            TradingConfig::default(),
            ExecutionConfig::default(),
        )
    }

    #[tokio::test]
    async fn happy_path_opens_a_balanced_trade() {
        let maker = Arc::new(InstantFillVenue::new(VenueId::Maker, 3000, 3001));
        let hedge = Arc::new(InstantFillVenue::new(VenueId::Hedge, 2999, 3000));
        let engine = engine(maker.clone(), hedge.clone());

        let trade = engine
            .open_trade(&opportunity(), &market(VenueId::Maker), &market(VenueId::Hedge))
            .await
            .unwrap();

        assert_eq!(trade.status, crate::trade::TradeStatus::Open);
        assert_eq!(trade.exec_state, crate::trade::ExecutionState::Complete);
        assert!(trade.leg1.qty_filled > Decimal::ZERO);
        assert_eq!(trade.leg1.qty_filled, trade.leg2.qty_filled);
    }

    #[tokio::test]
    async fn preflight_rejects_depth_shortfall() {
        let maker = Arc::new(InstantFillVenue { venue_id: VenueId::Maker, bid: Decimal::from(3000), ask: Decimal::from(3001), orders: RwLock::new(HashMap::new()) });
        let hedge = Arc::new(InstantFillVenue { venue_id: VenueId::Hedge, bid: Decimal::from(2999), ask: Decimal::from(3000), orders: RwLock::new(HashMap::new()) });
        let engine = engine(maker, hedge);

        let mut opp = opportunity();
        opp.suggested_notional = Decimal::from(100_000_000);
        opp.suggested_qty = Decimal::from(100_000);

        let trade = engine
            .open_trade(&opp, &market(VenueId::Maker), &market(VenueId::Hedge))
            .await
            .unwrap();

        assert_eq!(trade.status, crate::trade::TradeStatus::Rejected);
        assert_eq!(trade.exec_state, crate::trade::ExecutionState::Aborted);
    }
}
