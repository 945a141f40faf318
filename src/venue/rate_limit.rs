// =============================================================================
// Rate-limit tracker — spec §4.A weighted token bucket
// =============================================================================
//
// One instance per venue adapter, sized from that venue's own documented
// limits. Counters are atomics so any task may check them lock-free
// before issuing a request. Kept close to the teacher's
// `binance/rate_limit.rs`, which already expressed this venue-agnostically
// apart from the header names the venue-specific adapter feeds it.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

/// Thread-safe rate-limit tracker backed by atomic counters.
pub struct RateLimitTracker {
    weight_hard_limit: u32,
    weight_warn_threshold: u32,
    order_10s_limit: u32,
    order_1d_limit: u32,

    used_weight_1m: AtomicU32,
    order_count_10s: AtomicU32,
    order_count_1d: AtomicU32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub order_count_10s: u32,
    pub order_count_1d: u32,
}

impl RateLimitTracker {
    pub fn new(weight_hard_limit: u32, weight_warn_threshold: u32, order_10s_limit: u32, order_1d_limit: u32) -> Self {
        Self {
            weight_hard_limit,
            weight_warn_threshold,
            order_10s_limit,
            order_1d_limit,
            used_weight_1m: AtomicU32::new(0),
            order_count_10s: AtomicU32::new(0),
            order_count_1d: AtomicU32::new(0),
        }
    }

    /// Record the current used-weight value read from a response header.
    pub fn record_used_weight(&self, weight: u32) {
        let prev = self.used_weight_1m.swap(weight, Ordering::Relaxed);
        if weight >= self.weight_warn_threshold && prev < self.weight_warn_threshold {
            warn!(
                used_weight = weight,
                hard_limit = self.weight_hard_limit,
                "rate-limit weight crossed warning threshold"
            );
        }
    }

    pub fn record_order_counts(&self, count_10s: Option<u32>, count_1d: Option<u32>) {
        if let Some(c) = count_10s {
            self.order_count_10s.store(c, Ordering::Relaxed);
        }
        if let Some(c) = count_1d {
            self.order_count_1d.store(c, Ordering::Relaxed);
        }
    }

    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.used_weight_1m.load(Ordering::Relaxed);
        let allowed = current + weight <= self.weight_hard_limit;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = self.weight_hard_limit,
                "request blocked — would exceed rate-limit"
            );
        }
        allowed
    }

    pub fn can_place_order(&self) -> bool {
        let count_10s = self.order_count_10s.load(Ordering::Relaxed);
        let count_1d = self.order_count_1d.load(Ordering::Relaxed);

        if count_10s >= self.order_10s_limit {
            warn!(count_10s, limit = self.order_10s_limit, "order blocked — 10s order limit reached");
            return false;
        }
        if count_1d >= self.order_1d_limit {
            warn!(count_1d, limit = self.order_1d_limit, "order blocked — daily order limit reached");
            return false;
        }
        true
    }

    pub fn record_order_sent(&self) {
        self.order_count_10s.fetch_add(1, Ordering::Relaxed);
        self.order_count_1d.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_10s_counter(&self) {
        self.order_count_10s.store(0, Ordering::Relaxed);
    }

    pub fn reset_1m_weight(&self) {
        self.used_weight_1m.store(0, Ordering::Relaxed);
    }

    pub fn reset_daily_counter(&self) {
        self.order_count_1d.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.used_weight_1m.load(Ordering::Relaxed),
            order_count_10s: self.order_count_10s.load(Ordering::Relaxed),
            order_count_1d: self.order_count_1d.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .field("order_count_10s", &self.order_count_10s.load(Ordering::Relaxed))
            .field("order_count_1d", &self.order_count_1d.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_requests_over_hard_limit() {
        let t = RateLimitTracker::new(1000, 800, 10, 200_000);
        t.record_used_weight(950);
        assert!(!t.can_send_request(100));
        assert!(t.can_send_request(50));
    }

    #[test]
    fn blocks_orders_at_10s_limit() {
        let t = RateLimitTracker::new(1000, 800, 2, 200_000);
        t.record_order_sent();
        t.record_order_sent();
        assert!(!t.can_place_order());
        t.reset_10s_counter();
        assert!(t.can_place_order());
    }
}
