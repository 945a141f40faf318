// =============================================================================
// Position manager / exit engine — spec §4.F
// =============================================================================
//
// One tick processes every open trade concurrently, bounded by a
// semaphore (the same `DomeEnrichmentService`-style fan-out
// `market_data/service.rs` uses), each trade serialized against itself
// by a `KeyedLocks<Ulid>` trade-lock directory (the same shape as
// `execution/locks.rs`'s symbol locks, keyed by trade id instead of
// symbol so a close in progress can't race a concurrent tick). Per-trade
// work: refresh live positions, update the high-water mark, detect
// delta imbalance, run the layered exit rule stack, and coordinate a
// close when a rule fires.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use ulid::Ulid;

use crate::config::{ExecutionConfig, ExitsConfig, TradingConfig};
use crate::events::{Event, EventBus};
use crate::execution::locks::KeyedLocks;
use crate::funding::FundingTracker;
use crate::opportunity::Opportunity;
use crate::position::exit_rules::{self, ExitContext, ExitReason};
use crate::trade::{Order, OrderRequest, Position, Trade, TradeStatus};
use crate::trade_store::TradeStoreHandle;
use crate::types::{OrderStatus, OrderType, Side, Symbol, TimeInForce, VenueId};
use crate::venue::VenuePort;

const DEFAULT_MAX_CONCURRENT_TICKS: usize = 10;

/// Fraction of the gap between `qty_filled` of the two legs, relative to
/// the larger leg, that counts as "imbalanced" before the persistence
/// counter even starts — avoids counting dust-level step rounding.
const IMBALANCE_EPSILON: Decimal = Decimal::ZERO;

fn dec(f: f64) -> Decimal {
    Decimal::try_from(f).unwrap_or(Decimal::ZERO)
}

/// Accumulates fills across a close attempt's retries, same shape as
/// `execution::engine::LegFill`.
#[derive(Default)]
struct CloseFill {
    filled_qty: Decimal,
    notional: Decimal,
    fees: Decimal,
    last_order_id: String,
}

impl CloseFill {
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

pub struct PositionManager {
    maker: Arc<dyn VenuePort>,
    hedge: Arc<dyn VenuePort>,
    store: TradeStoreHandle,
    events: EventBus,
    funding: Arc<FundingTracker>,
    trade_locks: KeyedLocks<Ulid>,
    semaphore: Arc<Semaphore>,
    trading: TradingConfig,
    execution_cfg: ExecutionConfig,
    exits_cfg: ExitsConfig,
    imbalance_ticks: RwLock<HashMap<Ulid, u32>>,
}

impl PositionManager {
    pub fn new(
        maker: Arc<dyn VenuePort>,
        hedge: Arc<dyn VenuePort>,
        store: TradeStoreHandle,
        events: EventBus,
        funding: Arc<FundingTracker>,
        trading: TradingConfig,
        execution_cfg: ExecutionConfig,
        exits_cfg: ExitsConfig,
    ) -> Self {
        Self {
            maker,
            hedge,
            store,
            events,
            funding,
            trade_locks: KeyedLocks::new(),
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_TICKS)),
            trading,
            execution_cfg,
            exits_cfg,
            imbalance_ticks: RwLock::new(HashMap::new()),
        }
    }

    /// Process every open/closing trade concurrently, bounded by the
    /// configured semaphore. Requires `Arc<Self>` so each spawned task
    /// can hold a cheap clone rather than borrowing `&self` across an
    /// await that must outlive this call.
    pub async fn tick(self: &Arc<Self>, trades: Vec<Trade>, opportunities: Vec<Opportunity>) -> Vec<Trade> {
        let opportunities = Arc::new(opportunities);
        let mut handles = Vec::with_capacity(trades.len());

        for trade in trades {
            let mgr = self.clone();
            let semaphore = self.semaphore.clone();
            let opportunities = opportunities.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                mgr.process_trade(trade, &opportunities).await
            }));
        }

        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(trade) => out.push(trade),
                Err(e) => warn!(error = %e, "position manager task panicked"),
            }
        }
        out
    }

    async fn process_trade(&self, trade: Trade, opportunities: &[Opportunity]) -> Trade {
        let _guard = self.trade_locks.acquire(&trade.trade_id).await;
        match trade.status {
            TradeStatus::Open => self.process_open(trade, opportunities).await,
            TradeStatus::Closing => self.continue_close(trade).await,
            _ => trade,
        }
    }

    // -------------------------------------------------------------------
    // Open-trade tick: refresh, detect imbalance, evaluate exits
    // -------------------------------------------------------------------

    async fn process_open(&self, mut trade: Trade, opportunities: &[Opportunity]) -> Trade {
        let (maker_pos, hedge_pos) = tokio::join!(
            self.maker.get_position(&trade.symbol),
            self.hedge.get_position(&trade.symbol)
        );
        let maker_pos = maker_pos.unwrap_or(None);
        let hedge_pos = hedge_pos.unwrap_or(None);

        // One leg gone entirely while the other remains is a broken
        // hedge regardless of everything else — emergency close now.
        if maker_pos.is_none() != hedge_pos.is_none() {
            self.events.publish(Event::BrokenHedgeDetected {
                trade_id: trade.trade_id,
                symbol: trade.symbol.clone(),
                detail: "one leg reports no position on the venue".to_string(),
            });
            return self.close(trade, "broken_hedge_missing_leg").await;
        }

        let price_pnl = maker_pos.as_ref().map(|p| p.unrealized_pnl).unwrap_or(Decimal::ZERO)
            + hedge_pos.as_ref().map(|p| p.unrealized_pnl).unwrap_or(Decimal::ZERO);
        trade.high_water_mark = trade.high_water_mark.max(price_pnl);

        let imbalance_ratio = match (&maker_pos, &hedge_pos) {
            (Some(m), Some(h)) => {
                let max_qty = m.qty.abs().max(h.qty.abs());
                if max_qty > Decimal::ZERO {
                    ((m.qty.abs() - h.qty.abs()).abs() - IMBALANCE_EPSILON).max(Decimal::ZERO) / max_qty
                } else {
                    Decimal::ZERO
                }
            }
            _ => Decimal::ZERO,
        };

        let imbalance_ticks = {
            let mut ticks = self.imbalance_ticks.write();
            let entry = ticks.entry(trade.trade_id).or_insert(0);
            if imbalance_ratio > dec(self.exits_cfg.delta_bound_pct) {
                *entry += 1;
            } else {
                *entry = 0;
            }
            *entry
        };

        let net_funding_hourly = self.current_net_funding_hourly(&trade).await;
        let current_apy = net_funding_hourly * Decimal::from(8760);
        let velocity = self.funding.velocity(&trade.symbol);
        let zscore = self.funding.zscore(&trade.symbol, net_funding_hourly);
        let est_exit_cost = self.estimate_exit_cost(&trade);
        let best_alternative_ev = opportunities
            .iter()
            .filter(|o| o.symbol != trade.symbol)
            .map(|o| o.expected_value_usd)
            .fold(None, |acc: Option<Decimal>, ev| Some(acc.map_or(ev, |a| a.max(ev))));

        let basis_pct = match (&maker_pos, &hedge_pos) {
            (Some(m), Some(h)) if m.mark_px > Decimal::ZERO => Some((m.mark_px - h.mark_px).abs() / m.mark_px),
            _ => None,
        };

        let ctx = ExitContext {
            trade: &trade,
            now: Utc::now(),
            maker_position: maker_pos.as_ref(),
            hedge_position: hedge_pos.as_ref(),
            current_apy,
            price_pnl,
            est_exit_cost,
            imbalance_ratio,
            imbalance_ticks,
            funding_velocity: velocity,
            funding_zscore: zscore,
            best_alternative_ev,
            basis_pct,
        };

        if let Some(reason) = exit_rules::evaluate(&ctx, &self.exits_cfg, &self.trading) {
            self.persist(&trade);
            return self.close(trade, reason_tag(reason)).await;
        }

        self.persist(&trade);
        trade
    }

    /// Notional-based rebalance sizing is the recorded open-question
    /// decision (DESIGN.md #2); a real rebalance order is out of scope
    /// for a single tick evaluation beyond detecting and logging it —
    /// persistent imbalance escalates into `DeltaViolation` via the exit
    /// rule stack instead of a separate corrective order path.
    async fn current_net_funding_hourly(&self, trade: &Trade) -> Decimal {
        let (maker_rate, hedge_rate) = tokio::join!(
            self.maker.get_funding_rate(&trade.symbol),
            self.hedge.get_funding_rate(&trade.symbol)
        );
        let maker_rate = maker_rate.map(|r| r.rate_hourly).unwrap_or(Decimal::ZERO);
        let hedge_rate = hedge_rate.map(|r| r.rate_hourly).unwrap_or(Decimal::ZERO);
        let net = maker_rate - hedge_rate;
        self.funding.record(&trade.symbol, net, Utc::now());
        net
    }

    fn estimate_exit_cost(&self, trade: &Trade) -> Decimal {
        // Round-trip taker fee + a half-slippage-step cushion on both
        // legs, using the close-specific slippage ceiling as the
        // pessimistic bound.
        trade.target_notional_usd * dec(self.execution_cfg.close_max_slippage) * Decimal::from(2)
    }

    // -------------------------------------------------------------------
    // Coordinated close — spec §4.F
    // -------------------------------------------------------------------

    async fn close(&self, mut trade: Trade, reason: &str) -> Trade {
        trade.status = TradeStatus::Closing;
        trade.close_reason = Some(reason.to_string());
        self.persist(&trade);
        info!(trade_id = %trade.trade_id, symbol = %trade.symbol, reason, "coordinated close initiated");
        self.continue_close(trade).await
    }

    /// Resumes an in-progress close. Safe to call repeatedly across ticks:
    /// each leg tracks `qty_closed`, the quantity reduced so far, so a
    /// partially-closed leg from a prior tick resumes against the true
    /// remainder (`qty_filled - qty_closed`) instead of resubmitting the
    /// full original size.
    async fn continue_close(&self, mut trade: Trade) -> Trade {
        let close_since = trade.opened_at.unwrap_or(trade.created_at);

        let maker_fill = self.close_leg(&trade, VenueId::Maker).await;
        Self::apply_close_fill(&mut trade.leg1, &maker_fill);

        let hedge_fill = self.close_leg(&trade, VenueId::Hedge).await;
        Self::apply_close_fill(&mut trade.leg2, &hedge_fill);

        let maker_done = trade.leg1.qty_closed >= trade.leg1.qty_filled || trade.leg1.qty_filled == Decimal::ZERO;
        let hedge_done = trade.leg2.qty_closed >= trade.leg2.qty_filled || trade.leg2.qty_filled == Decimal::ZERO;

        if !maker_done || !hedge_done {
            self.persist(&trade);
            warn!(trade_id = %trade.trade_id, "close did not fully fill this tick, will retry next tick");
            return trade;
        }

        let funding_collected = self
            .funding
            .accrue_realized(&trade, self.maker.as_ref(), self.hedge.as_ref(), close_since)
            .await
            .unwrap_or(Decimal::ZERO);
        trade.funding_collected += funding_collected;

        // Post-close VWAP readback (spec §4.F): re-read each leg's last
        // close order and overwrite its exit price if the venue's own
        // cumulative VWAP drifted from what we tracked locally by more
        // than 3bps or $0.30, whichever is larger.
        trade.leg1.exit_px = self.readback_exit_px(self.maker.as_ref(), &trade, VenueId::Maker, trade.leg1.exit_px).await;
        trade.leg2.exit_px = self.readback_exit_px(self.hedge.as_ref(), &trade, VenueId::Hedge, trade.leg2.exit_px).await;

        let provisional_pnl = trade.leg1.pnl() + trade.leg2.pnl();
        trade.realized_pnl = provisional_pnl;

        trade.status = TradeStatus::Closed;
        trade.closed_at = Some(Utc::now());
        self.persist(&trade);

        self.imbalance_ticks.write().remove(&trade.trade_id);
        self.events.publish(Event::TradeClosed {
            trade_id: trade.trade_id,
            symbol: trade.symbol.clone(),
            realized_pnl: trade.total_pnl(),
            close_reason: trade.close_reason.clone().unwrap_or_default(),
        });
        info!(trade_id = %trade.trade_id, realized_pnl = %trade.total_pnl(), "trade closed");

        trade
    }

    /// Reduce-only IOC close for one leg, escalating slippage across
    /// `hedge_ioc_max_attempts` attempts up to `close_max_slippage`, the
    /// same retry shape `execution::engine::run_leg2` uses for opening.
    async fn close_leg(&self, trade: &Trade, venue_id: VenueId) -> CloseFill {
        let (venue, leg, side): (&dyn VenuePort, _, _) = match venue_id {
            VenueId::Maker => (self.maker.as_ref(), &trade.leg1, trade.leg1.side.opposite()),
            VenueId::Hedge => (self.hedge.as_ref(), &trade.leg2, trade.leg2.side.opposite()),
        };

        let mut fill = CloseFill::default();
        let target = leg.qty_filled - leg.qty_closed;
        if target <= Decimal::ZERO {
            return fill;
        }

        let max_attempts = self.execution_cfg.hedge_ioc_max_attempts;
        let max_slippage = dec(self.execution_cfg.close_max_slippage);
        let step = max_slippage / Decimal::from(max_attempts.max(1));

        for attempt in 0..max_attempts {
            let remaining = target - fill.filled_qty;
            if remaining <= Decimal::ZERO {
                break;
            }

            let l1 = match venue.get_orderbook_l1(&trade.symbol).await {
                Ok(l1) => l1,
                Err(e) => {
                    warn!(trade_id = %trade.trade_id, venue = %venue_id, error = %e, "close leg quote read failed");
                    continue;
                }
            };
            let slippage = (step * Decimal::from(attempt + 1)).min(max_slippage);
            let price = match side {
                Side::Long => l1.ask_px * (Decimal::ONE + slippage),
                Side::Short => l1.bid_px * (Decimal::ONE - slippage),
            };

            let coid = OrderRequest::derive_client_order_id(&trade.trade_id, venue_id, 1000 + attempt);
            let req = OrderRequest {
                symbol: trade.symbol.clone(),
                venue: venue_id,
                side,
                qty: remaining,
                order_type: OrderType::Limit,
                price: Some(price),
                tif: TimeInForce::Ioc,
                reduce_only: true,
                client_order_id: coid,
            };

            match venue.place_order(req.clone()).await {
                Ok(order) => fill.add(&order),
                Err(e) if e.is_duplicate_client_id() => {
                    if let Ok(order) = venue.get_order(&trade.symbol, &req.client_order_id).await {
                        fill.add(&order);
                    }
                }
                Err(e) => {
                    warn!(trade_id = %trade.trade_id, venue = %venue_id, error = %e, "close leg order rejected");
                }
            }
        }

        fill
    }

    /// Folds one tick's close fill into a leg's cumulative close state:
    /// VWAP-combines `exit_px` with whatever was already closed, advances
    /// `qty_closed`, accrues fees, and remembers the fill's last order id
    /// for the post-close readback.
    fn apply_close_fill(leg: &mut crate::trade::TradeLeg, fill: &CloseFill) {
        if fill.filled_qty > Decimal::ZERO {
            let prior_qty = leg.qty_closed;
            let total_qty = prior_qty + fill.filled_qty;
            leg.exit_px = (leg.exit_px * prior_qty + fill.avg_px() * fill.filled_qty) / total_qty;
            leg.qty_closed = total_qty;
        }
        leg.fees += fill.fees;
        if !fill.last_order_id.is_empty() {
            leg.last_close_order_id = Some(fill.last_order_id.clone());
        }
    }

    /// Re-reads a leg's last close order from the venue and overwrites
    /// `local_px` if the venue's own cumulative VWAP drifted from it by
    /// more than 3bps or $0.30, whichever is larger (spec §4.F).
    async fn readback_exit_px(&self, venue: &dyn VenuePort, trade: &Trade, venue_id: VenueId, local_px: Decimal) -> Decimal {
        let order_id = match venue_id {
            VenueId::Maker => trade.leg1.last_close_order_id.clone(),
            VenueId::Hedge => trade.leg2.last_close_order_id.clone(),
        };
        let Some(order_id) = order_id else {
            return local_px;
        };

        match venue.get_order(&trade.symbol, &order_id).await {
            Ok(order) if order.filled_qty > Decimal::ZERO => {
                let readback_px = order.avg_fill_px;
                let threshold = (local_px.abs() * dec(0.0003)).max(dec(0.30));
                if (readback_px - local_px).abs() > threshold {
                    warn!(
                        trade_id = %trade.trade_id, venue = %venue_id,
                        local_px = %local_px, readback_px = %readback_px,
                        "post-close VWAP readback overwrote provisional exit price"
                    );
                    readback_px
                } else {
                    local_px
                }
            }
            Ok(_) => local_px,
            Err(e) => {
                warn!(trade_id = %trade.trade_id, venue = %venue_id, error = %e, "post-close VWAP readback failed, keeping provisional exit price");
                local_px
            }
        }
    }

    fn persist(&self, trade: &Trade) {
        self.store.upsert_trade(trade.clone());
    }
}

fn reason_tag(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::LiquidationImminent => "liquidation_imminent",
        ExitReason::DeltaViolation => "delta_violation",
        ExitReason::CatastrophicFundingFlip => "catastrophic_funding_flip",
        ExitReason::EarlyTakeProfit => "early_take_profit",
        ExitReason::EarlyEdgeExit => "early_edge_exit",
        ExitReason::MaxHold => "max_hold",
        ExitReason::NetEvExit => "net_ev_exit",
        ExitReason::FundingVelocity => "funding_velocity",
        ExitReason::AtrTrailing => "atr_trailing",
        ExitReason::ZScore => "z_score",
        ExitReason::ProfitTarget => "profit_target",
        ExitReason::KellyRotation => "kelly_rotation",
        ExitReason::YieldVsCost => "yield_vs_cost",
        ExitReason::BasisConvergence => "basis_convergence",
    }
}

/// Exposed for `reconcile.rs` and the CLI, which need to read a position
/// without going through the full tick pipeline.
pub async fn fetch_positions(
    maker: &dyn VenuePort,
    hedge: &dyn VenuePort,
    symbol: &Symbol,
) -> (Option<Position>, Option<Position>) {
    let (m, h) = tokio::join!(maker.get_position(symbol), hedge.get_position(symbol));
    (m.unwrap_or(None), h.unwrap_or(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VenueError;
    use crate::trade::{ExecutionState, FundingRate, MarketInfo, OrderbookL1, TradeLeg};
    use crate::venue::OrderbookDepth;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use std::collections::HashMap as StdHashMap;

    struct StubVenue {
        venue_id: VenueId,
        bid: Decimal,
        ask: Decimal,
        position: Option<Position>,
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
        async fn load_markets(&self) -> Result<StdHashMap<Symbol, MarketInfo>, VenueError> {
            Ok(StdHashMap::new())
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
            Ok(self.position.iter().cloned().collect())
        }
        async fn get_position(&self, _symbol: &Symbol) -> Result<Option<Position>, VenueError> {
            Ok(self.position.clone())
        }
        async fn get_available_balance(&self) -> Result<Decimal, VenueError> {
            Ok(Decimal::from(1_000_000))
        }
        async fn get_realized_funding(&self, _symbol: &Symbol, _since: DateTime<Utc>) -> Result<Decimal, VenueError> {
            Ok(Decimal::ZERO)
        }
        async fn place_order(&self, req: OrderRequest) -> Result<Order, VenueError> {
            let px = req.price.unwrap_or(self.bid);
            Ok(Order {
                order_id: req.client_order_id.clone(),
                status: OrderStatus::Filled,
                filled_qty: req.qty,
                avg_fill_px: px,
                fee: Decimal::ZERO,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                request: req,
            })
        }
        async fn get_order(&self, _symbol: &Symbol, _order_id: &str) -> Result<Order, VenueError> {
            Err(VenueError::validation("no such order"))
        }
        async fn cancel_order(&self, _symbol: &Symbol, _order_id: &str) -> Result<bool, VenueError> {
            Ok(true)
        }
        async fn cancel_all(&self, _symbol: Option<&Symbol>) -> Result<u32, VenueError> {
            Ok(0)
        }
    }

    fn open_trade() -> Trade {
        let now = Utc::now();
        Trade {
            trade_id: Ulid::new(),
            symbol: "ETH".into(),
            leg1: TradeLeg {
                venue: VenueId::Maker,
                side: Side::Long,
                order_id: Some("ord-1".to_string()),
                qty_target: Decimal::ONE,
                qty_filled: Decimal::ONE,
                entry_px: Decimal::from(3000),
                exit_px: Decimal::ZERO,
                fees: Decimal::ZERO,
                qty_closed: Decimal::ZERO,
                last_close_order_id: None,
            },
            leg2: TradeLeg {
                venue: VenueId::Hedge,
                side: Side::Short,
                order_id: Some("ord-2".to_string()),
                qty_target: Decimal::ONE,
                qty_filled: Decimal::ONE,
                entry_px: Decimal::from(3000),
                exit_px: Decimal::ZERO,
                fees: Decimal::ZERO,
                qty_closed: Decimal::ZERO,
                last_close_order_id: None,
            },
            target_qty: Decimal::ONE,
            target_notional_usd: Decimal::from(3000),
            status: TradeStatus::Open,
            exec_state: ExecutionState::Complete,
            entry_apy: Decimal::ONE,
            entry_spread: Decimal::ZERO,
            funding_collected: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            high_water_mark: Decimal::ZERO,
            close_reason: None,
            created_at: now - Duration::seconds(3 * 24 * 3600),
            opened_at: Some(now - Duration::seconds(3 * 24 * 3600)),
            closed_at: None,
        }
    }

    fn manager(maker_pos: Option<Position>, hedge_pos: Option<Position>) -> Arc<PositionManager> {
        let maker = Arc::new(StubVenue { venue_id: VenueId::Maker, bid: Decimal::from(3000), ask: Decimal::from(3001), position: maker_pos });
        let hedge = Arc::new(StubVenue { venue_id: VenueId::Hedge, bid: Decimal::from(2999), ask: Decimal::from(3000), position: hedge_pos });
        let store = crate::trade_store::TradeStore::open_memory().unwrap();
        Arc::new(PositionManager::new(
            maker,
            hedge,
            store.handle(),
            EventBus::new(16),
            Arc::new(FundingTracker::new()),
            TradingConfig::default(),
            ExecutionConfig::default(),
            ExitsConfig::default(),
        ))
    }

    fn position(qty: Decimal, pnl: Decimal) -> Position {
        Position {
            symbol: "ETH".into(),
            venue: VenueId::Maker,
            side: Side::Long,
            qty,
            entry_px: Decimal::from(3000),
            mark_px: Decimal::from(3000),
            liq_px: None,
            unrealized_pnl: pnl,
            leverage: Decimal::from(10),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_leg_triggers_broken_hedge_close() {
        let mgr = manager(Some(position(Decimal::ONE, Decimal::ZERO)), None);
        let result = mgr.clone().tick(vec![open_trade()], vec![]).await;
        let trade = &result[0];
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.close_reason.as_deref(), Some("broken_hedge_missing_leg"));
    }

    #[tokio::test]
    async fn profitable_trade_past_min_hold_closes_on_profit_target() {
        let mgr = manager(
            Some(position(Decimal::ONE, Decimal::from(20))),
            Some(position(Decimal::ONE, Decimal::ZERO)),
        );
        let result = mgr.clone().tick(vec![open_trade()], vec![]).await;
        let trade = &result[0];
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.close_reason.as_deref(), Some("profit_target"));
    }

    #[tokio::test]
    async fn balanced_uneventful_trade_stays_open() {
        let mgr = manager(
            Some(position(Decimal::ONE, Decimal::ZERO)),
            Some(position(Decimal::ONE, Decimal::ZERO)),
        );
        let result = mgr.clone().tick(vec![open_trade()], vec![]).await;
        assert_eq!(result[0].status, TradeStatus::Open);
    }
}
