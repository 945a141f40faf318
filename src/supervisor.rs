// =============================================================================
// Supervisor — drives the top-level loop (spec §4.I)
// =============================================================================
//
// Grounded on `main.rs`'s independent-cadence `tokio::spawn` loops (market
// data / strategy / exit monitor / reconciliation each on their own
// `tokio::time::interval`) and its `ctrl_c`-triggered graceful shutdown.
// Here the stages are market-data refresh -> opportunity scan -> execute
// -> position-manager tick -> reconcile, each independently paced, plus
// an event-consumer task that feeds `BrokenHedgeDetected` back into the
// risk engine's per-symbol cooldown.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::{Config, ReconcileConfig, TradingConfig};
use crate::events::{Event, EventBus};
use crate::execution::ExecutionEngine;
use crate::market_data::MarketDataService;
use crate::opportunity::OpportunityEngine;
use crate::position::PositionManager;
use crate::reconcile;
use crate::risk::RiskEngine;
use crate::trade::{MarketInfo, TradeStatus};
use crate::trade_store::TradeStore;
use crate::types::Symbol;
use crate::venue::VenuePort;

const MARKET_DATA_INTERVAL: StdDuration = StdDuration::from_secs(5);
const MARKETS_REFRESH_INTERVAL: StdDuration = StdDuration::from_secs(300);
const OPPORTUNITY_INTERVAL: StdDuration = StdDuration::from_secs(5);
const POSITION_TICK_INTERVAL: StdDuration = StdDuration::from_secs(10);

type MarketsCache = (HashMap<Symbol, MarketInfo>, HashMap<Symbol, MarketInfo>);

/// Shared state handed to every supervisor loop task. Every field is a
/// cheap-to-clone handle (`Arc`, or a struct wrapping one), so cloning
/// `Supervisor` itself per spawned task is the intended usage.
#[derive(Clone)]
pub struct Supervisor {
    maker: Arc<dyn VenuePort>,
    hedge: Arc<dyn VenuePort>,
    market_data: Arc<MarketDataService>,
    opportunities: Arc<OpportunityEngine>,
    execution: Arc<ExecutionEngine>,
    position_manager: Arc<PositionManager>,
    risk: Arc<RiskEngine>,
    store: Arc<TradeStore>,
    events: EventBus,
    symbols: Arc<Vec<Symbol>>,
    trading: TradingConfig,
    reconcile_cfg: ReconcileConfig,
    markets: Arc<RwLock<MarketsCache>>,
    accepting_entries: Arc<AtomicBool>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        maker: Arc<dyn VenuePort>,
        hedge: Arc<dyn VenuePort>,
        market_data: Arc<MarketDataService>,
        opportunities: Arc<OpportunityEngine>,
        execution: Arc<ExecutionEngine>,
        position_manager: Arc<PositionManager>,
        risk: Arc<RiskEngine>,
        store: Arc<TradeStore>,
        events: EventBus,
        config: &Config,
    ) -> Self {
        let symbols = config.symbols.iter().map(|s| Symbol(s.clone())).collect::<Vec<_>>();
        Self {
            maker,
            hedge,
            market_data,
            opportunities,
            execution,
            position_manager,
            risk,
            store,
            events,
            symbols: Arc::new(symbols),
            trading: config.trading.clone(),
            reconcile_cfg: config.reconcile.clone(),
            markets: Arc::new(RwLock::new((HashMap::new(), HashMap::new()))),
            accepting_entries: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Spawn every loop and return their join handles. Callers await
    /// `begin_shutdown` then abort/await these handles to drain in-flight
    /// work within a budget.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().markets_refresh_loop()),
            tokio::spawn(self.clone().market_data_loop()),
            tokio::spawn(self.clone().opportunity_loop()),
            tokio::spawn(self.clone().position_tick_loop()),
            tokio::spawn(self.clone().reconcile_loop()),
            tokio::spawn(self.clone().event_consumer_loop()),
        ]
    }

    /// Stop admitting new entries. In-flight FSMs and the current
    /// position-manager tick keep running to completion.
    pub fn begin_shutdown(&self) {
        warn!("supervisor shutdown requested — no longer admitting new entries");
        self.accepting_entries.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting_entries(&self) -> bool {
        self.accepting_entries.load(Ordering::SeqCst)
    }

    /// Force-close every open trade. Used by the `close-all` CLI command
    /// and, optionally, during a graceful shutdown that wants a flat book
    /// before exit.
    pub async fn close_all(&self) -> anyhow::Result<usize> {
        let open_trades = self.store.load_open_trades()?;
        let requested = open_trades.len();
        let ticked = self.position_manager.tick(open_trades, Vec::new()).await;
        let closed = ticked.iter().filter(|t| t.status == TradeStatus::Closed).count();
        info!(requested, closed, "close-all complete");
        Ok(closed)
    }

    // -------------------------------------------------------------------------
    // Market data
    // -------------------------------------------------------------------------

    async fn market_data_loop(self) {
        let mut interval = tokio::time::interval(MARKET_DATA_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.market_data.refresh_symbols(&self.symbols).await;
        }
    }

    async fn markets_refresh_loop(self) {
        let mut interval = tokio::time::interval(MARKETS_REFRESH_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let (maker_markets, hedge_markets) =
                tokio::join!(self.maker.load_markets(), self.hedge.load_markets());
            match (maker_markets, hedge_markets) {
                (Ok(m), Ok(h)) => {
                    *self.markets.write() = (m, h);
                    info!("venue market metadata refreshed");
                }
                (m, h) => warn!(maker_ok = m.is_ok(), hedge_ok = h.is_ok(), "failed to refresh market metadata"),
            }
            interval.tick().await;
        }
    }

    // -------------------------------------------------------------------------
    // Opportunity scan + execute
    // -------------------------------------------------------------------------

    async fn opportunity_loop(self) {
        let mut interval = tokio::time::interval(OPPORTUNITY_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;

            let snapshots = self.market_data.all();
            if snapshots.is_empty() {
                continue;
            }
            let scanned = self.opportunities.scan(&snapshots, &self.trading);

            if !self.is_accepting_entries() {
                continue;
            }
            let (can_trade, reason) = self.risk.can_trade();
            if !can_trade {
                warn!(reason, "risk engine blocking new entries this tick");
                continue;
            }

            let already_open: HashSet<Symbol> = match self.store.load_open_trades() {
                Ok(trades) => trades.into_iter().map(|t| t.symbol).collect(),
                Err(e) => {
                    warn!(error = %e, "failed to load open trades before entry selection");
                    continue;
                }
            };

            let markets = self.markets.read();
            for opp in scanned.iter().filter(|o| !already_open.contains(&o.symbol)) {
                let (symbol_ok, symbol_reason) = self.risk.symbol_allowed(&opp.symbol);
                if !symbol_ok {
                    info!(symbol = %opp.symbol, reason = symbol_reason, "symbol skipped this tick");
                    continue;
                }
                let (Some(maker_market), Some(hedge_market)) =
                    (markets.0.get(&opp.symbol), markets.1.get(&opp.symbol))
                else {
                    continue;
                };

                match self.execution.open_trade(opp, maker_market, hedge_market).await {
                    Ok(trade) => {
                        let success = !matches!(trade.status, TradeStatus::Failed | TradeStatus::Rollback);
                        self.risk.record_execution_result(success);
                        if !success {
                            self.opportunities.record_strike(&opp.symbol);
                        }
                    }
                    Err(e) => {
                        warn!(symbol = %opp.symbol, error = %e, "open_trade returned a fatal error");
                        self.risk.record_execution_result(false);
                        self.opportunities.record_strike(&opp.symbol);
                    }
                }
                // One new entry per tick keeps capital deployment gradual
                // and re-reads `already_open`/risk state on the next tick.
                break;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Position management
    // -------------------------------------------------------------------------

    async fn position_tick_loop(self) {
        let mut interval = tokio::time::interval(POSITION_TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;

            let open_trades = match self.store.load_open_trades() {
                Ok(trades) => trades,
                Err(e) => {
                    warn!(error = %e, "failed to load open trades for position tick");
                    continue;
                }
            };
            if open_trades.is_empty() {
                continue;
            }

            let opportunities = self.opportunities.scan(&self.market_data.all(), &self.trading);
            self.position_manager.tick(open_trades, opportunities).await;
        }
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    async fn reconcile_loop(self) {
        let period = StdDuration::from_secs(self.reconcile_cfg.interval_seconds.max(60));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match reconcile::reconcile_once(
                self.maker.as_ref(),
                self.hedge.as_ref(),
                &self.store,
                &self.events,
                &self.reconcile_cfg,
            )
            .await
            {
                Ok(report) => info!(?report, "reconcile pass complete"),
                Err(e) => warn!(error = %e, "reconcile pass failed"),
            }
        }
    }

    // -------------------------------------------------------------------------
    // Event consumption
    // -------------------------------------------------------------------------

    async fn event_consumer_loop(self) {
        let mut rx = self.events.subscribe();
        loop {
            match rx.recv().await {
                Ok(Event::BrokenHedgeDetected { symbol, detail, .. }) => {
                    warn!(%symbol, detail, "broken hedge observed — starting cooldown");
                    self.risk.record_broken_hedge(&symbol);
                }
                Ok(Event::TradeClosed { symbol, close_reason, .. }) => {
                    if close_reason == "broken_hedge_missing_leg" || close_reason == "zombie" {
                        self.opportunities.record_strike(&symbol);
                    } else {
                        self.opportunities.clear_strikes(&symbol);
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event consumer lagged, dropped events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
