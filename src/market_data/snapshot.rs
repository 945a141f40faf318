// =============================================================================
// Market data snapshot types — spec §4.C
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::trade::{FundingRate, MarketInfo, OrderbookL1};
use crate::types::{Symbol, VenueId};

/// How stale a cached snapshot is allowed to be for the purpose it's
/// about to be used for. The two tiers exist because scanning for
/// candidate opportunities can tolerate a slightly older quote than
/// actually sizing and pricing an order against it (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Good enough to rank and filter candidates.
    ScanValid,
    /// Good enough to size and price a real order.
    ExecutionValid,
    Stale,
}

/// One venue's market-data view of a single symbol, refreshed on its own
/// cadence and tagged with the time it was observed.
#[derive(Debug, Clone)]
pub struct VenueSnapshot {
    pub symbol: Symbol,
    pub venue: VenueId,
    pub l1: OrderbookL1,
    pub funding: FundingRate,
    pub market_info: Option<MarketInfo>,
    pub fetched_at: DateTime<Utc>,
}

impl VenueSnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.fetched_at)
    }

    /// Classify this snapshot's freshness given the two TTLs configured
    /// for the service (spec §4.C: execution TTL is always <= scan TTL).
    pub fn freshness(
        &self,
        now: DateTime<Utc>,
        scan_ttl: chrono::Duration,
        execution_ttl: chrono::Duration,
    ) -> Freshness {
        let age = self.age(now);
        if age <= execution_ttl {
            Freshness::ExecutionValid
        } else if age <= scan_ttl {
            Freshness::ScanValid
        } else {
            Freshness::Stale
        }
    }
}

/// Both venues' view of one symbol at one scan tick. Never mutated after
/// construction by the service; each refresh produces a fresh instance.
#[derive(Debug, Clone)]
pub struct SymbolSnapshot {
    pub symbol: Symbol,
    pub maker: VenueSnapshot,
    pub hedge: VenueSnapshot,
}

impl SymbolSnapshot {
    pub fn net_funding_hourly(&self) -> Decimal {
        // Maker long collects its own funding and pays the hedge's; a
        // positive net means the combined position is a net receiver.
        self.maker.funding.rate_hourly - self.hedge.funding.rate_hourly
    }

    /// Scan-valid: neither side's quote has aged past the scan TTL. Used
    /// by the opportunity engine's filter chain; execution-readiness
    /// (the tighter TTL) is re-checked directly against the venue by the
    /// execution engine's pre-flight rather than against this cached
    /// snapshot, so no `both_execution_valid` counterpart exists here.
    pub fn both_scan_valid(
        &self,
        now: DateTime<Utc>,
        scan_ttl: chrono::Duration,
        execution_ttl: chrono::Duration,
    ) -> bool {
        !matches!(self.maker.freshness(now, scan_ttl, execution_ttl), Freshness::Stale)
            && !matches!(self.hedge.freshness(now, scan_ttl, execution_ttl), Freshness::Stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VenueId;

    fn snapshot_at(age_ms: i64) -> VenueSnapshot {
        let now = Utc::now();
        VenueSnapshot {
            symbol: "ETH".into(),
            venue: VenueId::Maker,
            l1: OrderbookL1 {
                symbol: "ETH".into(),
                venue: VenueId::Maker,
                bid_px: Decimal::from(3000),
                bid_qty: Decimal::ONE,
                ask_px: Decimal::from(3001),
                ask_qty: Decimal::ONE,
                updated_at: now,
            },
            funding: FundingRate {
                symbol: "ETH".into(),
                venue: VenueId::Maker,
                rate_hourly: Decimal::ZERO,
                next_funding_time: now,
                observed_at: now,
            },
            market_info: None,
            fetched_at: now - chrono::Duration::milliseconds(age_ms),
        }
    }

    #[test]
    fn freshness_tiers_classify_by_age() {
        let scan_ttl = chrono::Duration::milliseconds(5000);
        let exec_ttl = chrono::Duration::milliseconds(1500);
        let now = Utc::now();

        assert_eq!(snapshot_at(500).freshness(now, scan_ttl, exec_ttl), Freshness::ExecutionValid);
        assert_eq!(snapshot_at(3000).freshness(now, scan_ttl, exec_ttl), Freshness::ScanValid);
        assert_eq!(snapshot_at(9000).freshness(now, scan_ttl, exec_ttl), Freshness::Stale);
    }
}
