// =============================================================================
// Risk Engine — kill-switches protecting capital and managing broken-hedge
// fallout (spec §4.I)
// =============================================================================
//
// Three independent switches:
//   1. Consecutive failures — trips after N consecutive execution failures
//      (not losing trades). Pauses new entries, existing positions keep
//      being monitored.
//   2. Max drawdown        — trips when drawdown from the day's peak equity
//      exceeds the threshold. Pauses new entries.
//   3. Broken-hedge cooldown — after a symbol reports a broken hedge, new
//      entries on that symbol are paused for a configured window.
//
// None of these switches touch open positions directly; the position
// manager and reconciler own closing trades. The risk engine only gates
// whether the supervisor is allowed to open new ones.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SafetyConfig;
use crate::types::Symbol;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Snapshot of a single kill-switch for dashboard/CLI display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerInfo {
    pub name: String,
    pub current: f64,
    pub limit: f64,
    pub tripped: bool,
}

/// Full snapshot of the risk engine's internal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub risk_mode: String,
    pub consecutive_failures: u32,
    pub drawdown_pct: f64,
    pub peak_equity: Decimal,
    pub symbols_in_cooldown: Vec<String>,
    pub circuit_breakers: Vec<CircuitBreakerInfo>,
    pub current_date: String,
}

// ---------------------------------------------------------------------------
// Internal mutable state (behind RwLock)
// ---------------------------------------------------------------------------

struct Inner {
    consecutive_failures: u32,
    peak_equity: Decimal,
    drawdown_pct: f64,
    current_date: String,
    killed: bool,
    symbol_cooldowns: HashMap<Symbol, DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Risk Engine
// ---------------------------------------------------------------------------

pub struct RiskEngine {
    state: RwLock<Inner>,
    max_consecutive_failures: u32,
    max_drawdown_pct: f64,
    broken_hedge_cooldown_seconds: u64,
}

impl RiskEngine {
    pub fn new(cfg: &SafetyConfig, starting_equity: Decimal) -> Self {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        info!(
            max_consecutive_failures = cfg.max_consecutive_failures,
            max_drawdown_pct = cfg.max_drawdown_pct,
            broken_hedge_cooldown_seconds = cfg.broken_hedge_cooldown_seconds,
            "RiskEngine initialised"
        );

        Self {
            state: RwLock::new(Inner {
                consecutive_failures: 0,
                peak_equity: starting_equity,
                drawdown_pct: 0.0,
                current_date: today,
                killed: false,
                symbol_cooldowns: HashMap::new(),
            }),
            max_consecutive_failures: cfg.max_consecutive_failures,
            max_drawdown_pct: cfg.max_drawdown_pct,
            broken_hedge_cooldown_seconds: cfg.broken_hedge_cooldown_seconds,
        }
    }

    // -------------------------------------------------------------------------
    // Execution outcome recording
    // -------------------------------------------------------------------------

    /// Record the outcome of an execution attempt (order placement / FSM
    /// completion), not the PnL of a trade. Consecutive failures reset on
    /// the first success.
    pub fn record_execution_result(&self, success: bool) {
        self.maybe_reset_daily();
        let mut s = self.state.write();
        if success {
            s.consecutive_failures = 0;
        } else {
            s.consecutive_failures += 1;
            if s.consecutive_failures >= self.max_consecutive_failures {
                warn!(
                    consecutive_failures = s.consecutive_failures,
                    limit = self.max_consecutive_failures,
                    "consecutive failures breaker tripped"
                );
            }
        }
    }

    /// Update equity-based drawdown tracking. Called after each trade close
    /// or on a periodic equity mark.
    pub fn record_equity(&self, equity: Decimal) {
        self.maybe_reset_daily();
        let mut s = self.state.write();
        if equity > s.peak_equity {
            s.peak_equity = equity;
        }
        s.drawdown_pct = if s.peak_equity > Decimal::ZERO {
            ((s.peak_equity - equity) / s.peak_equity)
                .to_string()
                .parse::<f64>()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        if s.drawdown_pct >= self.max_drawdown_pct {
            warn!(
                drawdown_pct = s.drawdown_pct,
                limit = self.max_drawdown_pct,
                "max drawdown breaker tripped"
            );
        }
    }

    /// Start (or extend) a per-symbol cooldown after a broken-hedge event.
    pub fn record_broken_hedge(&self, symbol: &Symbol) {
        let mut s = self.state.write();
        let expires = Utc::now() + chrono::Duration::seconds(self.broken_hedge_cooldown_seconds as i64);
        s.symbol_cooldowns.insert(symbol.clone(), expires);
        warn!(%symbol, cooldown_seconds = self.broken_hedge_cooldown_seconds, "symbol entered broken-hedge cooldown");
    }

    // -------------------------------------------------------------------------
    // Pre-trade gates
    // -------------------------------------------------------------------------

    /// Check whether new entries are allowed at all (global breakers).
    pub fn can_trade(&self) -> (bool, Option<String>) {
        self.maybe_reset_daily();
        let s = self.state.read();

        if s.killed {
            return (false, Some("kill switch activated".to_string()));
        }

        if s.consecutive_failures >= self.max_consecutive_failures {
            return (
                false,
                Some(format!(
                    "consecutive failures breaker tripped: {} (limit {})",
                    s.consecutive_failures, self.max_consecutive_failures
                )),
            );
        }

        if s.drawdown_pct >= self.max_drawdown_pct {
            return (
                false,
                Some(format!(
                    "max drawdown breaker tripped: {:.2}% (limit {:.2}%)",
                    s.drawdown_pct * 100.0,
                    self.max_drawdown_pct * 100.0
                )),
            );
        }

        (true, None)
    }

    /// Check whether a specific symbol is in a broken-hedge cooldown window.
    pub fn symbol_allowed(&self, symbol: &Symbol) -> (bool, Option<String>) {
        let s = self.state.read();
        if let Some(expires) = s.symbol_cooldowns.get(symbol) {
            if Utc::now() < *expires {
                return (
                    false,
                    Some(format!("{symbol} is in broken-hedge cooldown until {expires}")),
                );
            }
        }
        (true, None)
    }

    // -------------------------------------------------------------------------
    // State snapshot
    // -------------------------------------------------------------------------

    pub fn get_state(&self) -> RiskState {
        self.maybe_reset_daily();
        let s = self.state.read();
        let now = Utc::now();

        let risk_mode = if s.killed {
            "KILLED".to_string()
        } else if s.consecutive_failures >= self.max_consecutive_failures
            || s.drawdown_pct >= self.max_drawdown_pct
        {
            "BREAKER_TRIPPED".to_string()
        } else if s.consecutive_failures as f64 >= self.max_consecutive_failures as f64 * 0.75 {
            "Cautious".to_string()
        } else {
            "Normal".to_string()
        };

        let symbols_in_cooldown = s
            .symbol_cooldowns
            .iter()
            .filter(|(_, expires)| **expires > now)
            .map(|(sym, _)| sym.0.clone())
            .collect();

        RiskState {
            risk_mode,
            consecutive_failures: s.consecutive_failures,
            drawdown_pct: s.drawdown_pct,
            peak_equity: s.peak_equity,
            symbols_in_cooldown,
            circuit_breakers: vec![
                CircuitBreakerInfo {
                    name: "Consecutive Failures".to_string(),
                    current: s.consecutive_failures as f64,
                    limit: self.max_consecutive_failures as f64,
                    tripped: s.consecutive_failures >= self.max_consecutive_failures,
                },
                CircuitBreakerInfo {
                    name: "Max Drawdown".to_string(),
                    current: s.drawdown_pct * 100.0,
                    limit: self.max_drawdown_pct * 100.0,
                    tripped: s.drawdown_pct >= self.max_drawdown_pct,
                },
            ],
            current_date: s.current_date.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Daily reset / manual controls
    // -------------------------------------------------------------------------

    pub fn reset_daily(&self) {
        let mut s = self.state.write();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        Self::do_reset(&mut s, &today);
        info!(date = %today, "daily risk counters reset (manual)");
    }

    pub fn kill(&self) {
        let mut s = self.state.write();
        s.killed = true;
        warn!("kill switch activated — all new entries halted");
    }

    fn maybe_reset_daily(&self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        let mut s = self.state.write();
        if s.current_date != today {
            info!(old_date = %s.current_date, new_date = %today, "date rolled — resetting daily risk counters");
            let peak = s.peak_equity;
            Self::do_reset(&mut s, &today);
            s.peak_equity = peak;
        }
    }

    fn do_reset(s: &mut Inner, date: &str) {
        s.consecutive_failures = 0;
        s.drawdown_pct = 0.0;
        s.current_date = date.to_string();
    }
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("max_consecutive_failures", &self.max_consecutive_failures)
            .field("max_drawdown_pct", &self.max_drawdown_pct)
            .field("broken_hedge_cooldown_seconds", &self.broken_hedge_cooldown_seconds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SafetyConfig {
        SafetyConfig {
            max_consecutive_failures: 3,
            max_drawdown_pct: 0.1,
            broken_hedge_cooldown_seconds: 3600,
        }
    }

    #[test]
    fn consecutive_failures_trip_the_breaker() {
        let engine = RiskEngine::new(&cfg(), Decimal::from(10000));
        engine.record_execution_result(false);
        engine.record_execution_result(false);
        let (allowed, _) = engine.can_trade();
        assert!(allowed);
        engine.record_execution_result(false);
        let (allowed, reason) = engine.can_trade();
        assert!(!allowed);
        assert!(reason.unwrap().contains("consecutive failures"));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let engine = RiskEngine::new(&cfg(), Decimal::from(10000));
        engine.record_execution_result(false);
        engine.record_execution_result(false);
        engine.record_execution_result(true);
        let (allowed, _) = engine.can_trade();
        assert!(allowed);
    }

    #[test]
    fn drawdown_trips_the_breaker() {
        let engine = RiskEngine::new(&cfg(), Decimal::from(10000));
        engine.record_equity(Decimal::from(10000));
        engine.record_equity(Decimal::from(8900));
        let (allowed, reason) = engine.can_trade();
        assert!(!allowed);
        assert!(reason.unwrap().contains("drawdown"));
    }

    #[test]
    fn broken_hedge_cooldown_blocks_only_that_symbol() {
        let engine = RiskEngine::new(&cfg(), Decimal::from(10000));
        let sym = Symbol("BTCUSDT".to_string());
        engine.record_broken_hedge(&sym);

        let (allowed, _) = engine.symbol_allowed(&sym);
        assert!(!allowed);

        let other = Symbol("ETHUSDT".to_string());
        let (allowed_other, _) = engine.symbol_allowed(&other);
        assert!(allowed_other);
    }
}
