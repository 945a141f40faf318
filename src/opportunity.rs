// =============================================================================
// Opportunity engine — spec §4.D
// =============================================================================
//
// Mirrors the teacher's `SmartFilterEngine::evaluate` idiom: an ordered
// chain of checks, each returning `Some(reason)` on the first failure and
// short-circuiting the rest. Here the chain decides whether a symbol's
// current snapshot is a tradeable opportunity rather than whether to fire
// a signal, but the shape — config-gated, reject-and-explain, debug-log
// on pass — is the same.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::TradingConfig;
use crate::market_data::SymbolSnapshot;
use crate::trade::Opportunity;
use crate::types::{Symbol, VenueId};

/// One filter in the ordered chain. Returns the rejection reason on
/// failure, `None` on pass.
type Filter = fn(&SymbolSnapshot, &TradingConfig) -> Option<&'static str>;

// Execution-readiness (both sides of both venues carrying qty) is
// deliberately not checked here — a scan-valid-but-not-execution-valid
// snapshot is still a candidate opportunity (spec §4.C); it is the
// execution engine's liquidity pre-flight that rejects it before LEG1.
const FILTER_CHAIN: &[Filter] = &[
    filter_orderbooks_valid,
    filter_min_apy,
    filter_max_spread,
    filter_min_hedge_depth,
    filter_max_notional,
    filter_funding_direction_sane,
    filter_nonzero_notional,
];

fn filter_orderbooks_valid(snapshot: &SymbolSnapshot, cfg: &TradingConfig) -> Option<&'static str> {
    if !snapshot.maker.l1.is_valid() || !snapshot.hedge.l1.is_valid() {
        return Some("orderbook_invalid");
    }
    let scan_ttl = chrono::Duration::seconds(cfg.fallback_max_age_seconds as i64);
    let execution_ttl = chrono::Duration::seconds(cfg.execution_ttl_seconds as i64);
    if !snapshot.both_scan_valid(chrono::Utc::now(), scan_ttl, execution_ttl) {
        return Some("snapshot_stale");
    }
    None
}

fn filter_min_apy(snapshot: &SymbolSnapshot, cfg: &TradingConfig) -> Option<&'static str> {
    let apy = snapshot.net_funding_hourly() * Decimal::from(8760);
    let threshold = Decimal::try_from(cfg.min_apy_threshold).unwrap_or(Decimal::ZERO);
    if apy.abs() < threshold {
        return Some("apy_below_threshold");
    }
    None
}

fn filter_max_spread(snapshot: &SymbolSnapshot, cfg: &TradingConfig) -> Option<&'static str> {
    let spread = spread_pct(snapshot);
    let max_spread = Decimal::try_from(cfg.max_spread_pct).unwrap_or(Decimal::ONE);
    if spread > max_spread {
        return Some("spread_too_wide");
    }
    None
}

fn filter_min_hedge_depth(snapshot: &SymbolSnapshot, cfg: &TradingConfig) -> Option<&'static str> {
    let multiplier = Decimal::try_from(cfg.hedge_depth_preflight_multiplier).unwrap_or(Decimal::ONE);
    let required = Decimal::try_from(cfg.desired_notional_usd).unwrap_or(Decimal::ZERO) * multiplier;
    let hedge_depth_notional = snapshot.hedge.l1.bid_qty.min(snapshot.hedge.l1.ask_qty) * snapshot.hedge.l1.mid_px();
    if hedge_depth_notional < required {
        return Some("insufficient_hedge_depth");
    }
    None
}

/// Suggested notional must clear each venue's `min_notional` and stay
/// under `max_notional_per_trade` (spec §4.D filter 4). Per-venue
/// `min_notional` lives on `MarketInfo`, which the opportunity engine
/// doesn't have in scope here, so only the upper bound is enforced at
/// this stage; the lower bound is re-checked (with real market metadata)
/// by the execution engine's pre-flight.
fn filter_max_notional(snapshot: &SymbolSnapshot, cfg: &TradingConfig) -> Option<&'static str> {
    let notional = Decimal::try_from(cfg.desired_notional_usd).unwrap_or(Decimal::ZERO)
        * Decimal::try_from(cfg.leverage_multiplier).unwrap_or(Decimal::ONE);
    let max_notional = Decimal::try_from(cfg.max_notional_per_trade).unwrap_or(Decimal::MAX);
    if notional > max_notional {
        return Some("notional_above_max_per_trade");
    }
    let _ = snapshot;
    None
}

fn filter_funding_direction_sane(snapshot: &SymbolSnapshot, _cfg: &TradingConfig) -> Option<&'static str> {
    // A net funding rate of exactly zero carries no edge to collect.
    if snapshot.net_funding_hourly() == Decimal::ZERO {
        return Some("zero_net_funding");
    }
    None
}

fn filter_nonzero_notional(snapshot: &SymbolSnapshot, cfg: &TradingConfig) -> Option<&'static str> {
    if cfg.desired_notional_usd <= 0.0 {
        return Some("desired_notional_not_configured");
    }
    let _ = snapshot;
    None
}

fn spread_pct(snapshot: &SymbolSnapshot) -> Decimal {
    let maker_mid = snapshot.maker.l1.mid_px();
    let hedge_mid = snapshot.hedge.l1.mid_px();
    if maker_mid == Decimal::ZERO {
        return Decimal::ONE;
    }
    ((maker_mid - hedge_mid) / maker_mid).abs()
}

/// Which side of the funding rate each venue should take. A positive net
/// rate (maker pays less / receives more than hedge) means we go long
/// the maker venue and short the hedge venue to collect it.
fn leg_sides(snapshot: &SymbolSnapshot) -> (VenueId, VenueId) {
    if snapshot.net_funding_hourly() >= Decimal::ZERO {
        (VenueId::Maker, VenueId::Hedge)
    } else {
        (VenueId::Hedge, VenueId::Maker)
    }
}

/// Scores and ranks candidate symbols, applying a cooldown with
/// exponential backoff to symbols that recently produced a failed or
/// closed trade (spec §4.D).
pub struct OpportunityEngine {
    cooldowns: RwLock<HashMap<Symbol, Cooldown>>,
}

#[derive(Clone, Copy)]
struct Cooldown {
    until: Instant,
    strikes: u32,
}

const BASE_COOLDOWN: Duration = Duration::from_secs(60);
const MAX_COOLDOWN: Duration = Duration::from_secs(3600);

impl OpportunityEngine {
    pub fn new() -> Self {
        Self { cooldowns: RwLock::new(HashMap::new()) }
    }

    /// Call when a trade on `symbol` fails or rolls back, to back it off
    /// exponentially from future scans.
    pub fn record_strike(&self, symbol: &Symbol) {
        let mut cooldowns = self.cooldowns.write();
        let entry = cooldowns.entry(symbol.clone()).or_insert(Cooldown { until: Instant::now(), strikes: 0 });
        entry.strikes += 1;
        let backoff = BASE_COOLDOWN.saturating_mul(1 << entry.strikes.min(6)).min(MAX_COOLDOWN);
        entry.until = Instant::now() + backoff;
        debug!(%symbol, strikes = entry.strikes, cooldown_secs = backoff.as_secs(), "symbol cooldown extended");
    }

    /// Call when a trade on `symbol` closes cleanly, to reset its strike
    /// count.
    pub fn clear_strikes(&self, symbol: &Symbol) {
        self.cooldowns.write().remove(symbol);
    }

    fn on_cooldown(&self, symbol: &Symbol) -> bool {
        self.cooldowns.read().get(symbol).map(|c| Instant::now() < c.until).unwrap_or(false)
    }

    /// Run every snapshot through the filter chain, score survivors, and
    /// return them sorted best-first by `score = EV − λ·spread_pct`
    /// (spec §4.D). Ties break on symbol lexicographic order for
    /// determinism.
    pub fn scan(&self, snapshots: &[SymbolSnapshot], cfg: &TradingConfig) -> Vec<Opportunity> {
        let mut opportunities: Vec<Opportunity> = snapshots
            .iter()
            .filter(|s| !self.on_cooldown(&s.symbol))
            .filter_map(|s| self.evaluate(s, cfg))
            .collect();

        opportunities.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.symbol.0.cmp(&b.symbol.0)));

        opportunities
    }

    fn evaluate(&self, snapshot: &SymbolSnapshot, cfg: &TradingConfig) -> Option<Opportunity> {
        for filter in FILTER_CHAIN {
            if let Some(reason) = filter(snapshot, cfg) {
                debug!(symbol = %snapshot.symbol, reason, "opportunity filtered out");
                return None;
            }
        }

        let (long_venue, short_venue) = leg_sides(snapshot);
        let net_funding_hourly = snapshot.net_funding_hourly().abs();
        let apy = net_funding_hourly * Decimal::from(8760);
        let spread = spread_pct(snapshot);
        let mid_px = snapshot.maker.l1.mid_px();

        let notional = Decimal::try_from(cfg.desired_notional_usd).unwrap_or(Decimal::ZERO)
            * Decimal::try_from(cfg.leverage_multiplier).unwrap_or(Decimal::ONE);
        let suggested_qty = if mid_px > Decimal::ZERO { notional / mid_px } else { Decimal::ZERO };

        let expected_hourly_income = notional * net_funding_hourly;
        let breakeven_hours = if expected_hourly_income > Decimal::ZERO {
            (notional * spread) / expected_hourly_income
        } else {
            Decimal::MAX
        };
        let holding_hours = Decimal::try_from(cfg.max_hold_hours).unwrap_or(Decimal::ZERO);
        let expected_value_usd = expected_hourly_income * holding_hours - (notional * spread);

        if breakeven_hours > Decimal::try_from(cfg.max_breakeven_hours).unwrap_or(Decimal::MAX) {
            debug!(symbol = %snapshot.symbol, "opportunity filtered out — breakeven too slow");
            return None;
        }
        if expected_value_usd < Decimal::try_from(cfg.min_ev_usd).unwrap_or(Decimal::ZERO) {
            debug!(symbol = %snapshot.symbol, "opportunity filtered out — EV below threshold");
            return None;
        }

        let lambda = Decimal::try_from(cfg.lambda_spread_weight).unwrap_or(Decimal::ONE);
        let score = expected_value_usd - lambda * spread;

        let liquidity_score = snapshot.maker.l1.bid_qty.min(snapshot.maker.l1.ask_qty)
            .min(snapshot.hedge.l1.bid_qty.min(snapshot.hedge.l1.ask_qty));

        Some(Opportunity {
            symbol: snapshot.symbol.clone(),
            long_venue,
            short_venue,
            net_funding_hourly,
            apy,
            spread_pct: spread,
            suggested_qty,
            suggested_notional: notional,
            expected_value_usd,
            breakeven_hours,
            score,
            liquidity_score,
            mid_px,
            long_l1: if long_venue == VenueId::Maker { snapshot.maker.l1.clone() } else { snapshot.hedge.l1.clone() },
            short_l1: if short_venue == VenueId::Maker { snapshot.maker.l1.clone() } else { snapshot.hedge.l1.clone() },
            observed_at: chrono::Utc::now(),
        })
    }
}

impl Default for OpportunityEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::VenueSnapshot;
    use crate::trade::{FundingRate, OrderbookL1};
    use chrono::Utc;

    fn snapshot(maker_rate: &str, hedge_rate: &str) -> SymbolSnapshot {
        let now = Utc::now();
        let l1 = |bid: i64, ask: i64| OrderbookL1 {
            symbol: "ETH".into(),
            venue: VenueId::Maker,
            bid_px: Decimal::from(bid),
            bid_qty: Decimal::from(1000),
            ask_px: Decimal::from(ask),
            ask_qty: Decimal::from(1000),
            updated_at: now,
        };
        SymbolSnapshot {
            symbol: "ETH".into(),
            maker: VenueSnapshot {
                symbol: "ETH".into(),
                venue: VenueId::Maker,
                l1: l1(3000, 3001),
                funding: FundingRate { symbol: "ETH".into(), venue: VenueId::Maker, rate_hourly: maker_rate.parse().unwrap(), next_funding_time: now, observed_at: now },
                market_info: None,
                fetched_at: now,
            },
            hedge: VenueSnapshot {
                symbol: "ETH".into(),
                venue: VenueId::Hedge,
                l1: l1(3000, 3001),
                funding: FundingRate { symbol: "ETH".into(), venue: VenueId::Hedge, rate_hourly: hedge_rate.parse().unwrap(), next_funding_time: now, observed_at: now },
                market_info: None,
                fetched_at: now,
            },
        }
    }

    fn cfg() -> TradingConfig {
        TradingConfig {
            desired_notional_usd: 500.0,
            max_open_trades: 3,
            leverage_multiplier: 1.0,
            min_apy_threshold: 0.05,
            min_ev_usd: 0.01,
            max_breakeven_hours: 10_000.0,
            max_spread_pct: 0.01,
            hedge_depth_preflight_multiplier: 1.0,
            max_notional_per_trade: 1_000_000.0,
            lambda_spread_weight: 1.0,
            fallback_max_age_seconds: 5,
            execution_ttl_seconds: 2,
            min_hold_seconds: 0,
            max_hold_hours: 720.0,
        }
    }

    #[test]
    fn zero_net_funding_is_filtered() {
        let engine = OpportunityEngine::new();
        let result = engine.scan(&[snapshot("0.0001", "0.0001")], &cfg());
        assert!(result.is_empty());
    }

    #[test]
    fn healthy_spread_produces_an_opportunity() {
        let engine = OpportunityEngine::new();
        let result = engine.scan(&[snapshot("0.0002", "0.00002")], &cfg());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].long_venue, VenueId::Maker);
    }

    #[test]
    fn cooldown_suppresses_repeated_strikes() {
        let engine = OpportunityEngine::new();
        let snap = snapshot("0.0002", "0.00002");
        engine.record_strike(&snap.symbol);
        let result = engine.scan(&[snap], &cfg());
        assert!(result.is_empty());
    }

    #[test]
    fn ties_break_lexicographically() {
        let mut a = snapshot("0.0002", "0.00002");
        a.symbol = "ZZZ".into();
        a.maker.symbol = "ZZZ".into();
        a.hedge.symbol = "ZZZ".into();
        let mut b = snapshot("0.0002", "0.00002");
        b.symbol = "AAA".into();
        b.maker.symbol = "AAA".into();
        b.hedge.symbol = "AAA".into();

        let engine = OpportunityEngine::new();
        let result = engine.scan(&[a, b], &cfg());
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].symbol.0, "AAA");
    }
}
