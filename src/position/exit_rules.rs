// =============================================================================
// Layered exit rule stack — spec §4.F
// =============================================================================
//
// First-hit-wins evaluation across three layers, the same shape as the
// teacher's `exit/triple_barrier.rs` layered `evaluate()`: emergency
// checks that override the minimum hold time, then economic checks, then
// optimization checks. Pure function over a snapshot context so it can be
// unit tested without any venue or store dependency.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::{ExitsConfig, TradingConfig};
use crate::trade::{Position, Trade};

/// Number of consecutive ticks an imbalance must persist before
/// DELTA_VIOLATION fires, per spec §4.F ("imbalance persists > N ticks").
const DELTA_VIOLATION_TICKS: u32 = 3;

/// Assumed hourly-rate volatility used to derive a drawdown band for
/// ATR_TRAILING in place of a true price-ATR(14) — the candle/OHLC
/// infrastructure that would compute one is out of scope (see DESIGN.md).
const ATR_PROXY_FRACTION: Decimal = Decimal::from_parts(1, 0, 0, false, 1); // 0.1

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    LiquidationImminent,
    DeltaViolation,
    CatastrophicFundingFlip,
    EarlyTakeProfit,
    EarlyEdgeExit,
    MaxHold,
    NetEvExit,
    FundingVelocity,
    AtrTrailing,
    ZScore,
    ProfitTarget,
    KellyRotation,
    YieldVsCost,
    BasisConvergence,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Everything the rule stack needs to evaluate one open trade at one
/// tick. Built fresh each tick by the position manager from live reads;
/// never persisted itself.
pub struct ExitContext<'a> {
    pub trade: &'a Trade,
    pub now: DateTime<Utc>,
    pub maker_position: Option<&'a Position>,
    pub hedge_position: Option<&'a Position>,
    pub current_apy: Decimal,
    pub price_pnl: Decimal,
    pub est_exit_cost: Decimal,
    pub imbalance_ratio: Decimal,
    pub imbalance_ticks: u32,
    pub funding_velocity: Option<Decimal>,
    pub funding_zscore: Option<Decimal>,
    pub best_alternative_ev: Option<Decimal>,
    /// Cross-venue mark-price basis, `|maker_mark - hedge_mark| / maker_mark`.
    /// `None` when either leg's position isn't available this tick.
    pub basis_pct: Option<Decimal>,
}

impl<'a> ExitContext<'a> {
    fn hold_seconds(&self) -> i64 {
        let opened_at = self.trade.opened_at.unwrap_or(self.trade.created_at);
        (self.now - opened_at).num_seconds().max(0)
    }
}

pub fn evaluate(ctx: &ExitContext, cfg: &ExitsConfig, trading: &TradingConfig) -> Option<ExitReason> {
    if let Some(reason) = layer1(ctx, cfg) {
        return Some(reason);
    }

    if ctx.hold_seconds() < trading.min_hold_seconds as i64 {
        return None;
    }

    if let Some(reason) = layer2(ctx, cfg, trading) {
        return Some(reason);
    }

    layer3(ctx, cfg)
}

fn liq_distance(ctx: &ExitContext) -> Option<Decimal> {
    let maker_dist = ctx.maker_position.and_then(|p| p.liq_distance_pct());
    let hedge_dist = ctx.hedge_position.and_then(|p| p.liq_distance_pct());
    match (maker_dist, hedge_dist) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn layer1(ctx: &ExitContext, cfg: &ExitsConfig) -> Option<ExitReason> {
    let liq_buffer = dec(cfg.liq_buffer_pct);
    if let Some(dist) = liq_distance(ctx) {
        if dist < liq_buffer {
            return Some(ExitReason::LiquidationImminent);
        }
    }

    if ctx.imbalance_ratio > dec(cfg.delta_bound_pct) && ctx.imbalance_ticks > DELTA_VIOLATION_TICKS {
        return Some(ExitReason::DeltaViolation);
    }

    if ctx.current_apy < dec(cfg.catastrophic_apy_floor) {
        return Some(ExitReason::CatastrophicFundingFlip);
    }

    let net_after_costs = ctx.price_pnl - ctx.est_exit_cost;
    if net_after_costs >= dec(cfg.early_tp_usd) && ctx.hold_seconds() >= cfg.early_tp_min_age_secs as i64 {
        return Some(ExitReason::EarlyTakeProfit);
    }

    let edge_flipped = ctx.current_apy.signum() != Decimal::ZERO
        && ctx.trade.entry_apy.signum() != Decimal::ZERO
        && ctx.current_apy.signum() != ctx.trade.entry_apy.signum();
    let min_edge_age_secs = (cfg.funding_flip_hours_threshold * 3600.0) as i64;
    if edge_flipped && ctx.hold_seconds() >= min_edge_age_secs {
        return Some(ExitReason::EarlyEdgeExit);
    }

    None
}

fn layer2(ctx: &ExitContext, cfg: &ExitsConfig, trading: &TradingConfig) -> Option<ExitReason> {
    let hold_hours = Decimal::from(ctx.hold_seconds()) / Decimal::from(3600);
    if hold_hours >= dec(trading.max_hold_hours) {
        return Some(ExitReason::MaxHold);
    }

    const PROJECTION_HOURS: i64 = 24;
    let hourly_income = (ctx.current_apy / Decimal::from(8760)) * ctx.trade.target_notional_usd;
    let expected_net_ev_next = hourly_income * Decimal::from(PROJECTION_HOURS);
    if expected_net_ev_next < dec(cfg.exit_cost_multiple) * ctx.est_exit_cost {
        return Some(ExitReason::NetEvExit);
    }

    // YIELD_VS_COST: hours of funding income needed to recoup the
    // position's own exit cost. A position earning too slowly to ever
    // clear what it costs to leave should roll off rather than ride out
    // indefinitely.
    if hourly_income > Decimal::ZERO {
        let hours_to_cover = ctx.est_exit_cost / hourly_income;
        if hours_to_cover > dec(cfg.yield_cost_hours_cap) {
            return Some(ExitReason::YieldVsCost);
        }
    }

    // BASIS_CONVERGENCE: the cross-venue price basis that funded this
    // trade's entry edge has compressed below the floor; what remains is
    // funding-rate noise rather than a tradeable spread.
    if let Some(basis) = ctx.basis_pct {
        if basis < dec(cfg.basis_min) {
            return Some(ExitReason::BasisConvergence);
        }
    }

    None
}

fn layer3(ctx: &ExitContext, cfg: &ExitsConfig) -> Option<ExitReason> {
    if let Some(velocity) = ctx.funding_velocity {
        if velocity < dec(cfg.velocity_threshold_hourly) {
            return Some(ExitReason::FundingVelocity);
        }
    }

    let hwm = ctx.trade.high_water_mark;
    if hwm >= dec(cfg.early_tp_usd) {
        let assumed_band = hwm * ATR_PROXY_FRACTION;
        if (hwm - ctx.price_pnl) >= dec(cfg.atr_multiplier) * assumed_band {
            return Some(ExitReason::AtrTrailing);
        }
    }

    if let Some(z) = ctx.funding_zscore {
        if z < dec(cfg.z_exit_threshold) {
            return Some(ExitReason::ZScore);
        }
    }

    if ctx.price_pnl >= dec(cfg.min_profit_exit_usd) {
        return Some(ExitReason::ProfitTarget);
    }

    if let Some(alt_ev) = ctx.best_alternative_ev {
        if alt_ev > dec(cfg.min_profit_exit_usd) && alt_ev > ctx.price_pnl.max(Decimal::ZERO) * Decimal::from(2) {
            return Some(ExitReason::KellyRotation);
        }
    }

    None
}

fn dec(f: f64) -> Decimal {
    Decimal::try_from(f).unwrap_or(Decimal::ZERO)
}
