// =============================================================================
// Core data model — spec §3
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::types::{OrderStatus, OrderType, Side, Symbol, TimeInForce, VenueId};

/// Per-hour funding rate observation for one symbol on one venue.
///
/// Invariant: `rate_hourly` is always the per-hour decimal rate; APY is
/// `rate_hourly * 8760`. Source venues may expose "per 8h" rates; the
/// adapter normalizes before this type is constructed (see
/// `FundingRate::normalize`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: Symbol,
    pub venue: VenueId,
    pub rate_hourly: Decimal,
    pub next_funding_time: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

impl FundingRate {
    /// Normalize a raw venue rate (expressed per `interval_hours`) to a
    /// per-hour rate. `interval_hours` must equal 1 to start live (spec
    /// §3's blast-radius guard); this function itself just does the math
    /// so callers can apply the guard separately.
    pub fn normalize(raw_rate: Decimal, interval_hours: Decimal) -> Decimal {
        raw_rate / interval_hours
    }

    pub fn apy(&self) -> Decimal {
        self.rate_hourly * Decimal::from(8760)
    }
}

/// Top-of-book snapshot for one symbol on one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookL1 {
    pub symbol: Symbol,
    pub venue: VenueId,
    pub bid_px: Decimal,
    pub bid_qty: Decimal,
    pub ask_px: Decimal,
    pub ask_qty: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl OrderbookL1 {
    /// `bid_px < ask_px` and both positive.
    pub fn is_valid(&self) -> bool {
        self.bid_px > Decimal::ZERO && self.ask_px > Decimal::ZERO && self.bid_px < self.ask_px
    }

    /// Both sides carry nonzero quantity — required before it may be used
    /// to size or price an execution.
    pub fn is_execution_ready(&self) -> bool {
        self.is_valid() && self.bid_qty > Decimal::ZERO && self.ask_qty > Decimal::ZERO
    }

    pub fn mid_px(&self) -> Decimal {
        (self.bid_px + self.ask_px) / Decimal::TWO
    }
}

/// Per-venue static market metadata, cached with a TTL by the market-data
/// service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub symbol: Symbol,
    pub venue: VenueId,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
    pub max_leverage: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
}

/// Exchange-observed position (not owned by the core — this is a read,
/// never mutated directly).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub venue: VenueId,
    pub side: Side,
    pub qty: Decimal,
    pub entry_px: Decimal,
    pub mark_px: Decimal,
    /// `None` when the venue does not expose a liquidation price (open
    /// question #3 in DESIGN.md) — monitoring is disabled for that leg
    /// rather than inferring a value.
    pub liq_px: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub leverage: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl Position {
    pub fn notional(&self) -> Decimal {
        (self.qty * self.mark_px).abs()
    }

    /// Fractional distance from mark price to liquidation price, or
    /// `None` if the venue does not expose `liq_px`.
    pub fn liq_distance_pct(&self) -> Option<Decimal> {
        let liq_px = self.liq_px?;
        if self.mark_px == Decimal::ZERO {
            return None;
        }
        Some(((self.mark_px - liq_px) / self.mark_px).abs())
    }
}

/// A request to place an order. `client_order_id` must be deterministic
/// per-attempt so that a retried placement is idempotent (spec §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub venue: VenueId,
    pub side: Side,
    pub qty: Decimal,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub tif: TimeInForce,
    pub reduce_only: bool,
    pub client_order_id: String,
}

impl OrderRequest {
    /// Deterministic client order id derived from `(trade_id, leg, attempt)`
    /// per spec §4.E.
    pub fn derive_client_order_id(trade_id: &Ulid, leg: VenueId, attempt: u32) -> String {
        format!("{trade_id}-{leg}-{attempt}")
    }
}

/// A placed order, carrying cumulative fill state. Delta-on-the-wire is
/// never trusted as authoritative — only `filled_qty`/`avg_fill_px` as
/// cumulatives (spec §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub request: OrderRequest,
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub avg_fill_px: Decimal,
    pub fee: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Apply a new cumulative fill reading. If the venue reports a lower
    /// cumulative than previously observed (a reset after restart), the
    /// prior maximum is retained and `true` is returned so the caller can
    /// log a `CumulativeReset` event (spec §5, open question #1).
    pub fn apply_cumulative_reading(
        &mut self,
        new_filled_qty: Decimal,
        new_avg_fill_px: Decimal,
        new_fee: Decimal,
        observed_at: DateTime<Utc>,
    ) -> bool {
        let is_reset = new_filled_qty < self.filled_qty;
        if !is_reset {
            self.filled_qty = new_filled_qty;
            self.avg_fill_px = new_avg_fill_px;
            self.fee = new_fee;
        }
        self.updated_at = observed_at;
        is_reset
    }
}

/// One leg of a two-leg trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLeg {
    pub venue: VenueId,
    pub side: Side,
    pub order_id: Option<String>,
    pub qty_target: Decimal,
    pub qty_filled: Decimal,
    pub entry_px: Decimal,
    pub exit_px: Decimal,
    pub fees: Decimal,
    /// How much of `qty_filled` has been reduced so far across however
    /// many ticks the close has taken. Lets `continue_close` resume from
    /// the true remainder instead of resubmitting the full original size.
    #[serde(default)]
    pub qty_closed: Decimal,
    /// Id of the most recent reduce-only order that closed part of this
    /// leg, kept so the post-close VWAP readback has an order to re-read
    /// regardless of which tick actually finished the leg.
    #[serde(default)]
    pub last_close_order_id: Option<String>,
}

impl TradeLeg {
    pub fn pnl(&self) -> Decimal {
        Decimal::from(self.side.sign()) * (self.exit_px - self.entry_px) * self.qty_filled
            - self.fees
    }
}

/// Execution-state FSM, spec §3. Strictly monotonic except the rollback
/// branch; any state may transition to `Failed` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Pending,
    Leg1Submitted,
    Leg1Filled,
    Leg2Submitted,
    Complete,
    PartialFill,
    RollbackQueued,
    RollbackInProgress,
    RollbackDone,
    RollbackFailed,
    Failed,
    Aborted,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Trade-level status, spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Opening,
    Open,
    Closing,
    Closed,
    Rejected,
    Failed,
    Rollback,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A delta-neutral funding-arb trade: one maker leg, one hedge leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: Ulid,
    pub symbol: Symbol,
    pub leg1: TradeLeg,
    pub leg2: TradeLeg,
    pub target_qty: Decimal,
    pub target_notional_usd: Decimal,
    pub status: TradeStatus,
    pub exec_state: ExecutionState,
    pub entry_apy: Decimal,
    pub entry_spread: Decimal,
    pub funding_collected: Decimal,
    pub realized_pnl: Decimal,
    pub high_water_mark: Decimal,
    pub close_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// `leg1.qty_filled == leg2.qty_filled` within `step_tolerance` —
    /// testable property #1 in spec §8.
    pub fn legs_balanced(&self, step_tolerance: Decimal) -> bool {
        (self.leg1.qty_filled - self.leg2.qty_filled).abs() <= step_tolerance
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.funding_collected - self.leg1.fees - self.leg2.fees
    }
}

/// Immutable scored snapshot produced by the opportunity engine from a
/// single refresh tick. Never mutated after construction (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: Symbol,
    pub long_venue: VenueId,
    pub short_venue: VenueId,
    pub net_funding_hourly: Decimal,
    pub apy: Decimal,
    pub spread_pct: Decimal,
    pub suggested_qty: Decimal,
    pub suggested_notional: Decimal,
    pub expected_value_usd: Decimal,
    pub breakeven_hours: Decimal,
    /// `EV − λ·spread_pct` (spec §4.D) — what the opportunity engine
    /// actually ranks on, as distinct from raw `expected_value_usd`.
    pub score: Decimal,
    pub liquidity_score: Decimal,
    pub mid_px: Decimal,
    pub long_l1: OrderbookL1,
    pub short_l1: OrderbookL1,
    pub observed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn l1(bid: &str, bid_qty: &str, ask: &str, ask_qty: &str) -> OrderbookL1 {
        OrderbookL1 {
            symbol: "ETH".into(),
            venue: VenueId::Maker,
            bid_px: bid.parse().unwrap(),
            bid_qty: bid_qty.parse().unwrap(),
            ask_px: ask.parse().unwrap(),
            ask_qty: ask_qty.parse().unwrap(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn orderbook_validity_and_execution_readiness() {
        let good = l1("3000", "10", "3001", "10");
        assert!(good.is_valid());
        assert!(good.is_execution_ready());

        let one_sided = l1("3000", "0", "3001", "10");
        assert!(one_sided.is_valid());
        assert!(!one_sided.is_execution_ready());

        let crossed = l1("3001", "10", "3000", "10");
        assert!(!crossed.is_valid());
        assert!(!crossed.is_execution_ready());
    }

    #[test]
    fn funding_rate_normalization_identity_when_interval_is_one() {
        let raw: Decimal = "0.0001".parse().unwrap();
        let normalized = FundingRate::normalize(raw, Decimal::ONE);
        assert_eq!(normalized, raw);
    }

    #[test]
    fn funding_rate_normalization_divides_by_interval() {
        // An 8h-quoted rate normalized to hourly is divided by 8.
        let raw: Decimal = "0.0008".parse().unwrap();
        let normalized = FundingRate::normalize(raw, Decimal::from(8));
        assert_eq!(normalized, "0.0001".parse::<Decimal>().unwrap());
    }

    #[test]
    fn apy_is_rate_hourly_times_8760() {
        let fr = FundingRate {
            symbol: "ETH".into(),
            venue: VenueId::Maker,
            rate_hourly: "0.0001".parse().unwrap(),
            next_funding_time: Utc::now(),
            observed_at: Utc::now(),
        };
        assert_eq!(fr.apy(), "0.876".parse::<Decimal>().unwrap());
    }

    #[test]
    fn cumulative_fill_retains_max_on_reset() {
        let mut order = Order {
            request: OrderRequest {
                symbol: "ETH".into(),
                venue: VenueId::Maker,
                side: Side::Long,
                qty: Decimal::ONE,
                order_type: OrderType::Limit,
                price: Some(Decimal::from(3000)),
                tif: TimeInForce::PostOnly,
                reduce_only: false,
                client_order_id: "t-maker-1".to_string(),
            },
            order_id: "ord-1".to_string(),
            status: OrderStatus::PartiallyFilled,
            filled_qty: "0.05".parse().unwrap(),
            avg_fill_px: Decimal::from(3000),
            fee: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let was_reset = order.apply_cumulative_reading(
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            Utc::now(),
        );
        assert!(was_reset);
        assert_eq!(order.filled_qty, "0.05".parse::<Decimal>().unwrap());
    }

    #[test]
    fn cumulative_fill_advances_normally() {
        let mut order = Order {
            request: OrderRequest {
                symbol: "ETH".into(),
                venue: VenueId::Maker,
                side: Side::Long,
                qty: Decimal::ONE,
                order_type: OrderType::Limit,
                price: Some(Decimal::from(3000)),
                tif: TimeInForce::PostOnly,
                reduce_only: false,
                client_order_id: "t-maker-1".to_string(),
            },
            order_id: "ord-1".to_string(),
            status: OrderStatus::PartiallyFilled,
            filled_qty: "0.05".parse().unwrap(),
            avg_fill_px: Decimal::from(3000),
            fee: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let was_reset = order.apply_cumulative_reading(
            "0.1".parse().unwrap(),
            Decimal::from(3000),
            Decimal::ZERO,
            Utc::now(),
        );
        assert!(!was_reset);
        assert_eq!(order.filled_qty, "0.1".parse::<Decimal>().unwrap());
    }

    #[test]
    fn client_order_id_is_deterministic() {
        let trade_id = Ulid::new();
        let a = OrderRequest::derive_client_order_id(&trade_id, VenueId::Maker, 1);
        let b = OrderRequest::derive_client_order_id(&trade_id, VenueId::Maker, 1);
        let c = OrderRequest::derive_client_order_id(&trade_id, VenueId::Maker, 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn trade_legs_balanced_within_tolerance() {
        let mut trade = sample_trade();
        trade.leg1.qty_filled = "0.1".parse().unwrap();
        trade.leg2.qty_filled = "0.1".parse().unwrap();
        assert!(trade.legs_balanced(Decimal::ZERO));

        trade.leg2.qty_filled = "0.099".parse().unwrap();
        assert!(!trade.legs_balanced(Decimal::ZERO));
        assert!(trade.legs_balanced("0.01".parse().unwrap()));
    }

    fn sample_trade() -> Trade {
        Trade {
            trade_id: Ulid::new(),
            symbol: "ETH".into(),
            leg1: TradeLeg {
                venue: VenueId::Maker,
                side: Side::Long,
                order_id: None,
                qty_target: Decimal::ONE,
                qty_filled: Decimal::ZERO,
                entry_px: Decimal::ZERO,
                exit_px: Decimal::ZERO,
                fees: Decimal::ZERO,
                qty_closed: Decimal::ZERO,
                last_close_order_id: None,
            },
            leg2: TradeLeg {
                venue: VenueId::Hedge,
                side: Side::Short,
                order_id: None,
                qty_target: Decimal::ONE,
                qty_filled: Decimal::ZERO,
                entry_px: Decimal::ZERO,
                exit_px: Decimal::ZERO,
                fees: Decimal::ZERO,
                qty_closed: Decimal::ZERO,
                last_close_order_id: None,
            },
            target_qty: Decimal::ONE,
            target_notional_usd: Decimal::from(350),
            status: TradeStatus::Pending,
            exec_state: ExecutionState::Pending,
            entry_apy: Decimal::ZERO,
            entry_spread: Decimal::ZERO,
            funding_collected: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            high_water_mark: Decimal::ZERO,
            close_reason: None,
            created_at: Utc::now(),
            opened_at: None,
            closed_at: None,
        }
    }
}
