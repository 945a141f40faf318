// =============================================================================
// Delta-neutral funding-rate arbitrage engine — entry point
// =============================================================================
//
// The engine starts in whatever mode the config file declares; unlike the
// teacher's main.rs (which forces Demo + Paused on every boot), safety here
// comes from `Config::validate_for_live`'s blast-radius guard (spec §3, §8
// scenario S4) rather than silently overriding the operator's intent.
// =============================================================================

mod config;
mod error;
mod events;
mod execution;
mod funding;
mod market_data;
mod opportunity;
mod position;
mod reconcile;
mod risk;
mod supervisor;
mod trade;
mod trade_store;
mod types;
mod venue;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::EventBus;
use crate::execution::ExecutionEngine;
use crate::funding::FundingTracker;
use crate::market_data::MarketDataService;
use crate::opportunity::OpportunityEngine;
use crate::position::PositionManager;
use crate::risk::RiskEngine;
use crate::supervisor::Supervisor;
use crate::trade::TradeStatus;
use crate::trade_store::TradeStore;
use crate::types::VenueId;
use crate::venue::binance::BinanceVenue;
use crate::venue::bybit::BybitVenue;
use crate::venue::paper::PaperVenue;
use crate::venue::VenuePort;

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_MAKER_BASE_URL: &str = "https://fapi.binance.com";
const DEFAULT_HEDGE_BASE_URL: &str = "https://api.bybit.com";
const DEFAULT_PAPER_BALANCE: &str = "100000";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Exit codes per spec §6: 0 normal, 2 config error, 3 connectivity
/// failure, 4 safety abort.
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_CONNECTIVITY_FAILURE: u8 = 3;
const EXIT_SAFETY_ABORT: u8 = 4;

#[derive(Parser)]
#[command(name = "delta-funding-arb", version, about = "Delta-neutral funding-rate arbitrage engine")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full engine loop: market data, opportunity scan, execution,
    /// position management, reconciliation.
    Run,
    /// Force-close every open trade, then exit.
    CloseAll,
    /// Run a single reconciliation pass against both venues, then exit.
    Reconcile,
    /// Connectivity and config sanity check; exits non-zero on failure.
    Doctor,
}

fn main() -> ExitCode {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::from(EXIT_CONNECTIVITY_FAILURE);
        }
    };

    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> ExitCode {
    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if let Err(reason) = config.validate_for_live() {
        error!(reason, "config failed live-trading validation");
        return ExitCode::from(EXIT_SAFETY_ABORT);
    }

    let (maker, hedge) = build_venues(&config);

    if let Err(e) = tokio::try_join!(maker.initialize(), hedge.initialize()) {
        error!(error = %e, "venue initialization failed");
        return ExitCode::from(EXIT_CONNECTIVITY_FAILURE);
    }

    let store = match TradeStore::open(&config.persistence.db_path, config.persistence.write_behind_batch_size) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open trade store");
            return ExitCode::from(EXIT_CONNECTIVITY_FAILURE);
        }
    };

    let events = EventBus::default();

    match cli.command {
        Command::Doctor => run_doctor(maker.as_ref(), hedge.as_ref(), store).await,
        Command::Reconcile => run_reconcile_once(maker.as_ref(), hedge.as_ref(), store, &events, &config).await,
        Command::CloseAll => run_close_all(maker, hedge, store, events, &config).await,
        Command::Run => run_engine(maker, hedge, store, events, config).await,
    }
}

/// Build the maker/hedge adapters. When `live_trading` is false, each real
/// adapter is wrapped in a `PaperVenue` that reads real market data but
/// fills orders in-process (spec §6).
fn build_venues(config: &Config) -> (Arc<dyn VenuePort>, Arc<dyn VenuePort>) {
    let maker_base = std::env::var("MAKER_BASE_URL").unwrap_or_else(|_| DEFAULT_MAKER_BASE_URL.to_string());
    let hedge_base = std::env::var("HEDGE_BASE_URL").unwrap_or_else(|_| DEFAULT_HEDGE_BASE_URL.to_string());

    let maker_live: Arc<dyn VenuePort> = Arc::new(BinanceVenue::new(
        VenueId::Maker,
        config.maker_venue.api_key.clone(),
        config.maker_venue.api_secret.clone(),
        maker_base,
    ));
    let hedge_live: Arc<dyn VenuePort> = Arc::new(BybitVenue::new(
        VenueId::Hedge,
        config.hedge_venue.api_key.clone(),
        config.hedge_venue.api_secret.clone(),
        hedge_base,
    ));

    if config.live_trading {
        (maker_live, hedge_live)
    } else {
        let starting_balance: Decimal = DEFAULT_PAPER_BALANCE.parse().unwrap_or(Decimal::ZERO);
        let maker: Arc<dyn VenuePort> = Arc::new(PaperVenue::new(VenueId::Maker, maker_live, starting_balance));
        let hedge: Arc<dyn VenuePort> = Arc::new(PaperVenue::new(VenueId::Hedge, hedge_live, starting_balance));
        (maker, hedge)
    }
}

// -----------------------------------------------------------------------
// CLI subcommands
// -----------------------------------------------------------------------

async fn run_doctor(maker: &dyn VenuePort, hedge: &dyn VenuePort, mut store: TradeStore) -> ExitCode {
    let mut healthy = true;

    match tokio::join!(maker.load_markets(), hedge.load_markets()) {
        (Ok(m), Ok(h)) => info!(maker_markets = m.len(), hedge_markets = h.len(), "venue connectivity OK"),
        (m, h) => {
            healthy = false;
            error!(maker_ok = m.is_ok(), hedge_ok = h.is_ok(), "venue connectivity check failed");
        }
    }

    match store.load_open_trades() {
        Ok(trades) => info!(open_trades = trades.len(), "trade store OK"),
        Err(e) => {
            healthy = false;
            error!(error = %e, "trade store check failed");
        }
    }

    store.close().await;

    if healthy {
        info!("doctor: all checks passed");
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_CONNECTIVITY_FAILURE)
    }
}

async fn run_reconcile_once(
    maker: &dyn VenuePort,
    hedge: &dyn VenuePort,
    mut store: TradeStore,
    events: &EventBus,
    config: &Config,
) -> ExitCode {
    let result = reconcile::reconcile_once(maker, hedge, &store, events, &config.reconcile).await;
    store.close().await;

    match result {
        Ok(report) => {
            info!(?report, "reconcile complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "reconcile failed");
            ExitCode::from(EXIT_CONNECTIVITY_FAILURE)
        }
    }
}

async fn run_close_all(
    maker: Arc<dyn VenuePort>,
    hedge: Arc<dyn VenuePort>,
    mut store: TradeStore,
    events: EventBus,
    config: &Config,
) -> ExitCode {
    let funding = Arc::new(FundingTracker::new());
    let position_manager = Arc::new(PositionManager::new(
        maker,
        hedge,
        store.handle(),
        events,
        funding,
        config.trading.clone(),
        config.execution.clone(),
        config.exits.clone(),
    ));

    let open_trades = match store.load_open_trades() {
        Ok(trades) => trades,
        Err(e) => {
            error!(error = %e, "failed to load open trades");
            store.close().await;
            return ExitCode::from(EXIT_CONNECTIVITY_FAILURE);
        }
    };

    let requested = open_trades.len();
    let ticked = position_manager.tick(open_trades, Vec::new()).await;
    let closed = ticked.iter().filter(|t| t.status == TradeStatus::Closed).count();
    info!(requested, closed, "close-all complete");

    store.close().await;
    ExitCode::SUCCESS
}

// -----------------------------------------------------------------------
// Main engine loop
// -----------------------------------------------------------------------

async fn run_engine(
    maker: Arc<dyn VenuePort>,
    hedge: Arc<dyn VenuePort>,
    store: TradeStore,
    events: EventBus,
    config: Config,
) -> ExitCode {
    let store = Arc::new(store);

    let market_data = Arc::new(MarketDataService::new(maker.clone(), hedge.clone()));
    let opportunities = Arc::new(OpportunityEngine::new());
    let funding = Arc::new(FundingTracker::new());
    let execution = Arc::new(ExecutionEngine::new(
        maker.clone(),
        hedge.clone(),
        store.handle(),
        events.clone(),
        config.trading.clone(),
        config.execution.clone(),
    ));
    let position_manager = Arc::new(PositionManager::new(
        maker.clone(),
        hedge.clone(),
        store.handle(),
        events.clone(),
        funding,
        config.trading.clone(),
        config.execution.clone(),
        config.exits.clone(),
    ));

    let starting_equity: Decimal = DEFAULT_PAPER_BALANCE.parse().unwrap_or(Decimal::ZERO);
    let risk = Arc::new(RiskEngine::new(&config.safety, starting_equity));

    let supervisor = Supervisor::new(
        maker.clone(),
        hedge.clone(),
        market_data,
        opportunities,
        execution,
        position_manager,
        risk,
        store.clone(),
        events,
        &config,
    );

    let handles = supervisor.spawn();

    info!(
        symbols = ?config.symbols,
        live_trading = config.live_trading,
        "engine running — press Ctrl+C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    warn!("shutdown signal received — draining in-flight work");

    supervisor.begin_shutdown();
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }
    drop(supervisor);

    if let Err(e) = maker.close().await {
        warn!(error = %e, "maker venue close reported an error");
    }
    if let Err(e) = hedge.close().await {
        warn!(error = %e, "hedge venue close reported an error");
    }
    drop(maker);
    drop(hedge);

    match Arc::try_unwrap(store) {
        Ok(mut store) => store.close().await,
        Err(_) => warn!("trade store still referenced at shutdown — skipping explicit close"),
    }

    info!("shutdown complete");
    ExitCode::SUCCESS
}
