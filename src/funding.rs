// =============================================================================
// Funding tracker — spec §4.G
// =============================================================================
//
// Keeps a bounded per-symbol history of hourly-normalized net funding
// rates (maker minus hedge) so the exit rule stack can ask for a
// velocity (simple slope across the ring) or a z-score against recent
// history. Grounded on `futures_intel/funding_rate.rs`'s reqwest-backed
// monitor struct; the teacher's contrarian signal ladder is replaced
// entirely by this ring + two derived statistics, per spec.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::error::VenueError;
use crate::trade::Trade;
use crate::types::Symbol;
use crate::venue::VenuePort;

/// 14 days of hourly samples.
const DEFAULT_MAX_SAMPLES: usize = 24 * 14;

/// A z-score needs enough history to mean something; spec calls for at
/// least 7 days.
const MIN_SAMPLES_FOR_ZSCORE: usize = 24 * 7;

pub struct FundingTracker {
    history: RwLock<HashMap<Symbol, VecDeque<(DateTime<Utc>, Decimal)>>>,
    max_samples: usize,
}

impl FundingTracker {
    pub fn new() -> Self {
        Self { history: RwLock::new(HashMap::new()), max_samples: DEFAULT_MAX_SAMPLES }
    }

    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples.max(2);
        self
    }

    /// Record one net hourly rate observation for `symbol`.
    pub fn record(&self, symbol: &Symbol, net_rate_hourly: Decimal, observed_at: DateTime<Utc>) {
        let mut history = self.history.write();
        let ring = history.entry(symbol.clone()).or_default();
        ring.push_back((observed_at, net_rate_hourly));
        while ring.len() > self.max_samples {
            ring.pop_front();
        }
    }

    /// Simple slope (rate-per-hour change) between the oldest and newest
    /// samples currently retained. `None` if fewer than two samples.
    pub fn velocity(&self, symbol: &Symbol) -> Option<Decimal> {
        let history = self.history.read();
        let ring = history.get(symbol)?;
        let (t0, r0) = ring.front()?;
        let (t1, r1) = ring.back()?;
        if t1 <= t0 {
            return None;
        }
        let hours = Decimal::try_from((*t1 - *t0).num_seconds() as f64 / 3600.0).ok()?;
        if hours <= Decimal::ZERO {
            return None;
        }
        Some((*r1 - *r0) / hours)
    }

    /// Standard score of `current` against the retained history's mean
    /// and standard deviation. `None` until at least
    /// `MIN_SAMPLES_FOR_ZSCORE` samples have accumulated (spec §4.F).
    pub fn zscore(&self, symbol: &Symbol, current: Decimal) -> Option<Decimal> {
        let history = self.history.read();
        let ring = history.get(symbol)?;
        if ring.len() < MIN_SAMPLES_FOR_ZSCORE {
            return None;
        }

        let n = ring.len() as f64;
        let mean_f64 = ring.iter().filter_map(|(_, r)| r.to_string().parse::<f64>().ok()).sum::<f64>() / n;
        let variance = ring
            .iter()
            .filter_map(|(_, r)| r.to_string().parse::<f64>().ok())
            .map(|r| (r - mean_f64).powi(2))
            .sum::<f64>()
            / n;
        let stdev = variance.sqrt();
        if stdev == 0.0 {
            return None;
        }

        let current_f64: f64 = current.to_string().parse().ok()?;
        Decimal::try_from((current_f64 - mean_f64) / stdev).ok()
    }

    pub fn sample_count(&self, symbol: &Symbol) -> usize {
        self.history.read().get(symbol).map(VecDeque::len).unwrap_or(0)
    }

    /// Net realized funding (received minus paid) across both legs since
    /// `since`. Positive means the trade is a net receiver.
    pub async fn accrue_realized(
        &self,
        trade: &Trade,
        maker: &dyn VenuePort,
        hedge: &dyn VenuePort,
        since: DateTime<Utc>,
    ) -> Result<Decimal, VenueError> {
        let (maker_amount, hedge_amount) = tokio::join!(
            maker.get_realized_funding(&trade.symbol, since),
            hedge.get_realized_funding(&trade.symbol, since)
        );
        Ok(maker_amount? + hedge_amount?)
    }
}

impl Default for FundingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol() -> Symbol {
        "ETH".into()
    }

    #[test]
    fn velocity_is_none_with_fewer_than_two_samples() {
        let tracker = FundingTracker::new();
        tracker.record(&symbol(), "0.0001".parse().unwrap(), Utc::now());
        assert!(tracker.velocity(&symbol()).is_none());
    }

    #[test]
    fn velocity_detects_downward_slope() {
        let tracker = FundingTracker::new();
        let t0 = Utc::now() - chrono::Duration::hours(4);
        tracker.record(&symbol(), "0.0004".parse().unwrap(), t0);
        tracker.record(&symbol(), "0.0000".parse().unwrap(), t0 + chrono::Duration::hours(4));

        let velocity = tracker.velocity(&symbol()).unwrap();
        assert!(velocity < Decimal::ZERO);
    }

    #[test]
    fn zscore_requires_minimum_history() {
        let tracker = FundingTracker::new();
        let now = Utc::now();
        for i in 0..10 {
            tracker.record(&symbol(), "0.0001".parse().unwrap(), now + chrono::Duration::hours(i));
        }
        assert!(tracker.zscore(&symbol(), "0.0005".parse().unwrap()).is_none());
    }

    #[test]
    fn zscore_flags_an_outlier_once_enough_history_exists() {
        let tracker = FundingTracker::new();
        let now = Utc::now();
        for i in 0..(MIN_SAMPLES_FOR_ZSCORE as i64) {
            tracker.record(&symbol(), "0.0001".parse().unwrap(), now + chrono::Duration::hours(i));
        }
        // Constant history has zero stdev; zscore is None rather than a
        // division by zero.
        assert!(tracker.zscore(&symbol(), "0.0050".parse().unwrap()).is_none());
    }

    #[test]
    fn ring_is_bounded_by_max_samples() {
        let tracker = FundingTracker::new().with_max_samples(5);
        let now = Utc::now();
        for i in 0..10 {
            tracker.record(&symbol(), Decimal::from(i), now + chrono::Duration::hours(i));
        }
        assert_eq!(tracker.sample_count(&symbol()), 5);
    }
}
