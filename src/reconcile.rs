// =============================================================================
// Reconciliation — spec §4.H
// =============================================================================
//
// SAFETY POLICY, unchanged from the teacher's original: reconcile never
// cancels an order or closes a position on a venue. It only corrects
// internal bookkeeping (store-only) and raises events for anything that
// needs a human or the position manager's own close protocol to act on.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use ulid::Ulid;

use crate::config::ReconcileConfig;
use crate::events::{Event, EventBus};
use crate::trade::{ExecutionState, Position, Trade, TradeLeg, TradeStatus};
use crate::trade_store::TradeStore;
use crate::types::{Symbol, VenueId};
use crate::venue::VenuePort;

/// Tolerance below which a quantity difference between venue and store is
/// not considered drift. Falls back to this when a venue's market step
/// size can't be read.
const DEFAULT_STEP_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 4); // 0.0001

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub ghosts: u32,
    pub ghosts_imported: u32,
    pub zombies: u32,
    pub mismatches: u32,
    pub size_drifts: u32,
}

/// Run one reconciliation pass. `maker`/`hedge` are queried for their live
/// position lists; `store` is both the open-trade source of truth and the
/// write target for store-only corrections (zombie close, size drift).
pub async fn reconcile_once(
    maker: &dyn VenuePort,
    hedge: &dyn VenuePort,
    store: &TradeStore,
    events: &EventBus,
    cfg: &ReconcileConfig,
) -> anyhow::Result<ReconcileReport> {
    info!("reconciliation cycle started");

    let (maker_positions, hedge_positions) = tokio::join!(maker.list_positions(), hedge.list_positions());
    let maker_positions = index_by_symbol(maker_positions.unwrap_or_default());
    let hedge_positions = index_by_symbol(hedge_positions.unwrap_or_default());

    let open_trades = store.load_open_trades()?;
    let mut report = ReconcileReport::default();
    let mut covered_symbols: HashSet<Symbol> = HashSet::new();

    let step_tolerance = step_tolerance(maker, hedge).await;

    for trade in open_trades {
        covered_symbols.insert(trade.symbol.clone());

        let maker_pos = maker_positions.get(&trade.symbol);
        let hedge_pos = hedge_positions.get(&trade.symbol);

        match (maker_pos, hedge_pos) {
            (None, None) => {
                report.zombies += 1;
                close_zombie(store, trade);
            }
            (Some(_), None) | (None, Some(_)) => {
                report.mismatches += 1;
                warn!(trade_id = %trade.trade_id, symbol = %trade.symbol, "mismatch: one leg position missing");
                events.publish(Event::BrokenHedgeDetected {
                    trade_id: trade.trade_id,
                    symbol: trade.symbol.clone(),
                    detail: "reconciliation found one leg missing on the venue".to_string(),
                });
            }
            (Some(mp), Some(hp)) => {
                if correct_size_drift(store, trade, mp, hp, step_tolerance) {
                    report.size_drifts += 1;
                }
            }
        }
    }

    for (symbol, maker_pos) in &maker_positions {
        if covered_symbols.contains(symbol) {
            continue;
        }
        report.ghosts += 1;
        warn!(%symbol, venue = "maker", "ghost position: no matching open trade");
        if cfg.auto_import_ghosts {
            if let Some(hedge_pos) = hedge_positions.get(symbol) {
                import_ghost(store, symbol.clone(), maker_pos, hedge_pos);
                report.ghosts_imported += 1;
            }
        }
    }
    for symbol in hedge_positions.keys() {
        if covered_symbols.contains(symbol) || maker_positions.contains_key(symbol) {
            continue;
        }
        report.ghosts += 1;
        warn!(%symbol, venue = "hedge", "ghost position: no matching open trade");
    }

    info!(
        ghosts = report.ghosts,
        ghosts_imported = report.ghosts_imported,
        zombies = report.zombies,
        mismatches = report.mismatches,
        size_drifts = report.size_drifts,
        "reconciliation cycle completed"
    );

    Ok(report)
}

fn index_by_symbol(positions: Vec<Position>) -> HashMap<Symbol, Position> {
    positions.into_iter().map(|p| (p.symbol.clone(), p)).collect()
}

async fn step_tolerance(maker: &dyn VenuePort, hedge: &dyn VenuePort) -> Decimal {
    let (maker_markets, hedge_markets) = tokio::join!(maker.load_markets(), hedge.load_markets());
    let maker_max = maker_markets.ok().and_then(|m| m.values().map(|mi| mi.step_size).max());
    let hedge_max = hedge_markets.ok().and_then(|m| m.values().map(|mi| mi.step_size).max());
    maker_max.into_iter().chain(hedge_max).max().unwrap_or(DEFAULT_STEP_TOLERANCE).max(DEFAULT_STEP_TOLERANCE)
}

fn close_zombie(store: &TradeStore, mut trade: Trade) {
    trade.status = TradeStatus::Closed;
    trade.close_reason = Some("zombie".to_string());
    trade.closed_at = Some(Utc::now());
    info!(trade_id = %trade.trade_id, symbol = %trade.symbol, "zombie trade marked closed");
    store.handle().upsert_trade(trade);
}

fn correct_size_drift(store: &TradeStore, mut trade: Trade, maker_pos: &Position, hedge_pos: &Position, tolerance: Decimal) -> bool {
    let maker_drift = (trade.leg1.qty_filled - maker_pos.qty.abs()).abs() > tolerance;
    let hedge_drift = (trade.leg2.qty_filled - hedge_pos.qty.abs()).abs() > tolerance;
    if !maker_drift && !hedge_drift {
        return false;
    }

    if maker_drift {
        warn!(trade_id = %trade.trade_id, symbol = %trade.symbol, venue = "maker", store_qty = %trade.leg1.qty_filled, venue_qty = %maker_pos.qty, "size drift corrected from venue");
        trade.leg1.qty_filled = maker_pos.qty.abs();
    }
    if hedge_drift {
        warn!(trade_id = %trade.trade_id, symbol = %trade.symbol, venue = "hedge", store_qty = %trade.leg2.qty_filled, venue_qty = %hedge_pos.qty, "size drift corrected from venue");
        trade.leg2.qty_filled = hedge_pos.qty.abs();
    }
    store.handle().upsert_trade(trade);
    true
}

/// Reconstruct a tracked trade from a pair of untracked venue positions.
/// Only called when both legs are present (spec's "optionally auto-import"
/// clause) — a one-sided ghost is alerted on, never imported, since the
/// maker/hedge role assignment can't be inferred from a single leg.
fn import_ghost(store: &TradeStore, symbol: Symbol, maker_pos: &Position, hedge_pos: &Position) {
    let now = Utc::now();
    let trade = Trade {
        trade_id: Ulid::new(),
        symbol: symbol.clone(),
        leg1: TradeLeg {
            venue: VenueId::Maker,
            side: maker_pos.side,
            order_id: None,
            qty_target: maker_pos.qty.abs(),
            qty_filled: maker_pos.qty.abs(),
            entry_px: maker_pos.entry_px,
            exit_px: Decimal::ZERO,
            fees: Decimal::ZERO,
            qty_closed: Decimal::ZERO,
        },
        leg2: TradeLeg {
            venue: VenueId::Hedge,
            side: hedge_pos.side,
            order_id: None,
            qty_target: hedge_pos.qty.abs(),
            qty_filled: hedge_pos.qty.abs(),
            entry_px: hedge_pos.entry_px,
            exit_px: Decimal::ZERO,
            fees: Decimal::ZERO,
            qty_closed: Decimal::ZERO,
        },
        target_qty: maker_pos.qty.abs(),
        target_notional_usd: maker_pos.notional(),
        status: TradeStatus::Open,
        exec_state: ExecutionState::Complete,
        entry_apy: Decimal::ZERO,
        entry_spread: Decimal::ZERO,
        funding_collected: Decimal::ZERO,
        realized_pnl: Decimal::ZERO,
        high_water_mark: Decimal::ZERO,
        close_reason: None,
        created_at: now,
        opened_at: Some(now),
        closed_at: None,
    };
    info!(trade_id = %trade.trade_id, %symbol, "ghost position imported as a tracked trade");
    store.handle().upsert_trade(trade);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VenueError;
    use crate::trade::{FundingRate, MarketInfo, Order, OrderRequest, OrderbookL1};
    use crate::types::Side;
    use crate::venue::OrderbookDepth;
    use async_trait::async_trait;
    use chrono::DateTime;

    struct StubVenue {
        venue_id: VenueId,
        positions: Vec<Position>,
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
            Ok(OrderbookL1 { symbol: symbol.clone(), venue: self.venue_id, bid_px: Decimal::ONE, bid_qty: Decimal::ONE, ask_px: Decimal::TWO, ask_qty: Decimal::ONE, updated_at: Utc::now() })
        }
        async fn get_orderbook_depth(&self, symbol: &Symbol, _levels: u32) -> Result<OrderbookDepth, VenueError> {
            Ok(OrderbookDepth { symbol: symbol.clone(), venue: self.venue_id, bids: vec![], asks: vec![], updated_at: Utc::now() })
        }
        async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, VenueError> {
            Ok(FundingRate { symbol: symbol.clone(), venue: self.venue_id, rate_hourly: Decimal::ZERO, next_funding_time: Utc::now(), observed_at: Utc::now() })
        }
        async fn list_positions(&self) -> Result<Vec<Position>, VenueError> {
            Ok(self.positions.clone())
        }
        async fn get_position(&self, symbol: &Symbol) -> Result<Option<Position>, VenueError> {
            Ok(self.positions.iter().find(|p| &p.symbol == symbol).cloned())
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

    fn position(symbol: &str, side: Side, qty: Decimal) -> Position {
        Position {
            symbol: symbol.into(),
            venue: VenueId::Maker,
            side,
            qty,
            entry_px: Decimal::from(100),
            mark_px: Decimal::from(100),
            liq_px: None,
            unrealized_pnl: Decimal::ZERO,
            leverage: Decimal::from(5),
            observed_at: Utc::now(),
        }
    }

    fn open_trade(symbol: &str) -> Trade {
        Trade {
            trade_id: Ulid::new(),
            symbol: symbol.into(),
            leg1: TradeLeg { venue: VenueId::Maker, side: Side::Long, order_id: None, qty_target: Decimal::ONE, qty_filled: Decimal::ONE, entry_px: Decimal::from(100), exit_px: Decimal::ZERO, fees: Decimal::ZERO, qty_closed: Decimal::ZERO },
            leg2: TradeLeg { venue: VenueId::Hedge, side: Side::Short, order_id: None, qty_target: Decimal::ONE, qty_filled: Decimal::ONE, entry_px: Decimal::from(100), exit_px: Decimal::ZERO, fees: Decimal::ZERO, qty_closed: Decimal::ZERO },
            target_qty: Decimal::ONE,
            target_notional_usd: Decimal::from(100),
            status: TradeStatus::Open,
            exec_state: ExecutionState::Complete,
            entry_apy: Decimal::ZERO,
            entry_spread: Decimal::ZERO,
            funding_collected: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            high_water_mark: Decimal::ZERO,
            close_reason: None,
            created_at: Utc::now(),
            opened_at: Some(Utc::now()),
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn zombie_trade_is_marked_closed() {
        let store = TradeStore::open_memory().unwrap();
        store.handle().upsert_trade(open_trade("ETH"));
        store.handle().flush().await;

        let maker = StubVenue { venue_id: VenueId::Maker, positions: vec![] };
        let hedge = StubVenue { venue_id: VenueId::Hedge, positions: vec![] };
        let events = EventBus::new(16);
        let report = reconcile_once(&maker, &hedge, &store, &events, &ReconcileConfig::default()).await.unwrap();

        assert_eq!(report.zombies, 1);
        store.handle().flush().await;
        assert!(store.load_open_trades().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatch_publishes_broken_hedge_event() {
        let store = TradeStore::open_memory().unwrap();
        store.handle().upsert_trade(open_trade("ETH"));
        store.handle().flush().await;

        let maker = StubVenue { venue_id: VenueId::Maker, positions: vec![position("ETH", Side::Long, Decimal::ONE)] };
        let hedge = StubVenue { venue_id: VenueId::Hedge, positions: vec![] };
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let report = reconcile_once(&maker, &hedge, &store, &events, &ReconcileConfig::default()).await.unwrap();

        assert_eq!(report.mismatches, 1);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::BrokenHedgeDetected { .. }));
    }

    #[tokio::test]
    async fn ghost_position_is_alerted_but_not_imported_by_default() {
        let store = TradeStore::open_memory().unwrap();
        let maker = StubVenue { venue_id: VenueId::Maker, positions: vec![position("SOL", Side::Long, Decimal::ONE)] };
        let hedge = StubVenue { venue_id: VenueId::Hedge, positions: vec![position("SOL", Side::Short, Decimal::ONE)] };
        let events = EventBus::new(16);
        let report = reconcile_once(&maker, &hedge, &store, &events, &ReconcileConfig::default()).await.unwrap();

        assert_eq!(report.ghosts, 1);
        assert_eq!(report.ghosts_imported, 0);
    }

    #[tokio::test]
    async fn ghost_position_is_imported_when_configured() {
        let store = TradeStore::open_memory().unwrap();
        let maker = StubVenue { venue_id: VenueId::Maker, positions: vec![position("SOL", Side::Long, Decimal::ONE)] };
        let hedge = StubVenue { venue_id: VenueId::Hedge, positions: vec![position("SOL", Side::Short, Decimal::ONE)] };
        let events = EventBus::new(16);
        let mut cfg = ReconcileConfig::default();
        cfg.auto_import_ghosts = true;
        let report = reconcile_once(&maker, &hedge, &store, &events, &cfg).await.unwrap();

        assert_eq!(report.ghosts_imported, 1);
        store.handle().flush().await;
        assert_eq!(store.load_open_trades().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn size_drift_updates_store_from_venue() {
        let store = TradeStore::open_memory().unwrap();
        store.handle().upsert_trade(open_trade("ETH"));
        store.handle().flush().await;

        let maker = StubVenue { venue_id: VenueId::Maker, positions: vec![position("ETH", Side::Long, Decimal::from(2))] };
        let hedge = StubVenue { venue_id: VenueId::Hedge, positions: vec![position("ETH", Side::Short, Decimal::ONE)] };
        let events = EventBus::new(16);
        let report = reconcile_once(&maker, &hedge, &store, &events, &ReconcileConfig::default()).await.unwrap();

        assert_eq!(report.size_drifts, 1);
        store.handle().flush().await;
        let trades = store.load_open_trades().unwrap();
        assert_eq!(trades[0].leg1.qty_filled, Decimal::from(2));
    }
}
