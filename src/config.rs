// =============================================================================
// Configuration — spec §6
// =============================================================================
//
// Every tunable the engine needs lives here, grouped the way §6 of the
// spec groups it: venues, trading, execution, exits, safety, persistence.
// All fields carry `#[serde(default = "...")]` so that adding a field
// later never breaks an existing config file on disk, following the
// teacher's `runtime_config.rs` pattern.
//
// Persistence uses the same atomic tmp + rename write the teacher uses.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::AccountMode;

// -----------------------------------------------------------------------
// Default-value helpers
// -----------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_funding_rate_interval_hours() -> u32 {
    1
}

fn default_max_open_trades() -> u32 {
    3
}

fn default_leverage_multiplier() -> f64 {
    2.0
}

fn default_min_apy_threshold() -> f64 {
    0.15
}

fn default_min_ev_usd() -> f64 {
    1.0
}

fn default_max_breakeven_hours() -> f64 {
    72.0
}

fn default_max_spread_pct() -> f64 {
    0.002
}

fn default_hedge_depth_preflight_multiplier() -> f64 {
    2.0
}

fn default_max_notional_per_trade() -> f64 {
    50_000.0
}

fn default_lambda_spread_weight() -> f64 {
    1.0
}

fn default_fallback_max_age_seconds() -> u64 {
    5
}

fn default_execution_ttl_seconds() -> u64 {
    2
}

fn default_min_hold_seconds() -> u64 {
    48 * 3600
}

fn default_max_hold_hours() -> f64 {
    30.0 * 24.0
}

fn default_maker_timeout_seconds() -> u64 {
    5
}

fn default_maker_max_retries() -> u32 {
    3
}

fn default_maker_max_aggressiveness() -> f64 {
    0.0015
}

fn default_hedge_ioc_max_attempts() -> u32 {
    5
}

fn default_hedge_ioc_slippage_step() -> f64 {
    0.0005
}

fn default_hedge_ioc_max_slippage() -> f64 {
    0.003
}

fn default_parallel_execution_timeout_secs() -> u64 {
    30
}

fn default_rollback_max_slippage() -> f64 {
    0.005
}

fn default_close_max_slippage() -> f64 {
    0.006
}

fn default_early_tp_usd() -> f64 {
    25.0
}

fn default_early_tp_min_age_secs() -> u64 {
    3600
}

fn default_min_profit_exit_usd() -> f64 {
    15.0
}

fn default_exit_cost_multiple() -> f64 {
    3.0
}

fn default_velocity_threshold_hourly() -> f64 {
    -0.00005
}

fn default_atr_multiplier() -> f64 {
    2.0
}

fn default_z_exit_threshold() -> f64 {
    -2.0
}

fn default_funding_flip_hours_threshold() -> f64 {
    6.0
}

fn default_liq_buffer_pct() -> f64 {
    0.1
}

fn default_yield_cost_hours_cap() -> f64 {
    48.0
}

fn default_basis_min() -> f64 {
    0.0005
}

fn default_catastrophic_apy_floor() -> f64 {
    -2.0
}

fn default_delta_bound_pct() -> f64 {
    0.03
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_max_drawdown_pct() -> f64 {
    10.0
}

fn default_broken_hedge_cooldown_seconds() -> u64 {
    900
}

fn default_db_path() -> String {
    "trade_store.sqlite3".to_string()
}

fn default_write_behind_batch_size() -> usize {
    50
}

fn default_write_behind_queue_capacity() -> usize {
    1024
}

fn default_rate_limit_class() -> String {
    "standard".to_string()
}

fn default_reconcile_interval_seconds() -> u64 {
    60
}

// -----------------------------------------------------------------------
// Per-venue config
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Read from the environment at load time if left empty in the file
    /// (see `Config::load`); never persisted back to disk.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// `None` means unset, distinct from `Some(0)` which is a valid
    /// account index (spec §4.A).
    #[serde(default)]
    pub account_index: Option<u32>,
    #[serde(default = "default_rate_limit_class")]
    pub rate_limit_class: String,
    #[serde(default = "default_connection_pool_size")]
    pub connection_pool_size: usize,
}

fn default_connection_pool_size() -> usize {
    10
}

impl std::fmt::Debug for VenueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueConfig")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("account_index", &self.account_index)
            .field("rate_limit_class", &self.rate_limit_class)
            .field("connection_pool_size", &self.connection_pool_size)
            .finish()
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            account_index: None,
            rate_limit_class: default_rate_limit_class(),
            connection_pool_size: default_connection_pool_size(),
        }
    }
}

// -----------------------------------------------------------------------
// Trading / execution / exits / safety / persistence groups
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default)]
    pub desired_notional_usd: f64,
    #[serde(default = "default_max_open_trades")]
    pub max_open_trades: u32,
    #[serde(default = "default_leverage_multiplier")]
    pub leverage_multiplier: f64,
    #[serde(default = "default_min_apy_threshold")]
    pub min_apy_threshold: f64,
    #[serde(default = "default_min_ev_usd")]
    pub min_ev_usd: f64,
    #[serde(default = "default_max_breakeven_hours")]
    pub max_breakeven_hours: f64,
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: f64,
    #[serde(default = "default_hedge_depth_preflight_multiplier")]
    pub hedge_depth_preflight_multiplier: f64,
    /// Upper bound on suggested notional per trade (spec §4.D filter 4).
    #[serde(default = "default_max_notional_per_trade")]
    pub max_notional_per_trade: f64,
    /// λ weight on spread in the opportunity score `EV − λ·spread_pct`
    /// (spec §4.D).
    #[serde(default = "default_lambda_spread_weight")]
    pub lambda_spread_weight: f64,
    /// Scan-valid TTL (spec §4.C `fallback_max_age_s`): a snapshot older
    /// than this is stale and dropped from the opportunity scan entirely.
    #[serde(default = "default_fallback_max_age_seconds")]
    pub fallback_max_age_seconds: u64,
    /// Execution-valid TTL, always `<= fallback_max_age_seconds`. Not
    /// enforced by the opportunity scan (spec §4.C leaves
    /// execution-readiness to the execution engine's own pre-flight) but
    /// carried here so both halves of the scan/execution TTL pair live
    /// next to each other.
    #[serde(default = "default_execution_ttl_seconds")]
    pub execution_ttl_seconds: u64,
    #[serde(default = "default_min_hold_seconds")]
    pub min_hold_seconds: u64,
    #[serde(default = "default_max_hold_hours")]
    pub max_hold_hours: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            desired_notional_usd: 500.0,
            max_open_trades: default_max_open_trades(),
            leverage_multiplier: default_leverage_multiplier(),
            min_apy_threshold: default_min_apy_threshold(),
            min_ev_usd: default_min_ev_usd(),
            max_breakeven_hours: default_max_breakeven_hours(),
            max_spread_pct: default_max_spread_pct(),
            hedge_depth_preflight_multiplier: default_hedge_depth_preflight_multiplier(),
            max_notional_per_trade: default_max_notional_per_trade(),
            lambda_spread_weight: default_lambda_spread_weight(),
            fallback_max_age_seconds: default_fallback_max_age_seconds(),
            execution_ttl_seconds: default_execution_ttl_seconds(),
            min_hold_seconds: default_min_hold_seconds(),
            max_hold_hours: default_max_hold_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_maker_timeout_seconds")]
    pub maker_timeout_seconds: u64,
    #[serde(default = "default_maker_max_retries")]
    pub maker_max_retries: u32,
    #[serde(default = "default_maker_max_aggressiveness")]
    pub maker_max_aggressiveness: f64,
    #[serde(default = "default_true")]
    pub leg1_escalate_to_taker_enabled: bool,
    #[serde(default = "default_maker_max_aggressiveness")]
    pub leg1_escalate_to_taker_slippage: f64,
    #[serde(default = "default_hedge_ioc_max_attempts")]
    pub hedge_ioc_max_attempts: u32,
    #[serde(default = "default_hedge_ioc_slippage_step")]
    pub hedge_ioc_slippage_step: f64,
    #[serde(default = "default_hedge_ioc_max_slippage")]
    pub hedge_ioc_max_slippage: f64,
    #[serde(default = "default_parallel_execution_timeout_secs")]
    pub parallel_execution_timeout_secs: u64,
    #[serde(default = "default_rollback_max_slippage")]
    pub rollback_max_slippage: f64,
    #[serde(default = "default_close_max_slippage")]
    pub close_max_slippage: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            maker_timeout_seconds: default_maker_timeout_seconds(),
            maker_max_retries: default_maker_max_retries(),
            maker_max_aggressiveness: default_maker_max_aggressiveness(),
            leg1_escalate_to_taker_enabled: true,
            leg1_escalate_to_taker_slippage: default_maker_max_aggressiveness(),
            hedge_ioc_max_attempts: default_hedge_ioc_max_attempts(),
            hedge_ioc_slippage_step: default_hedge_ioc_slippage_step(),
            hedge_ioc_max_slippage: default_hedge_ioc_max_slippage(),
            parallel_execution_timeout_secs: default_parallel_execution_timeout_secs(),
            rollback_max_slippage: default_rollback_max_slippage(),
            close_max_slippage: default_close_max_slippage(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitsConfig {
    #[serde(default = "default_early_tp_usd")]
    pub early_tp_usd: f64,
    #[serde(default = "default_early_tp_min_age_secs")]
    pub early_tp_min_age_secs: u64,
    #[serde(default = "default_min_profit_exit_usd")]
    pub min_profit_exit_usd: f64,
    #[serde(default = "default_exit_cost_multiple")]
    pub exit_cost_multiple: f64,
    #[serde(default = "default_velocity_threshold_hourly")]
    pub velocity_threshold_hourly: f64,
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: f64,
    #[serde(default = "default_z_exit_threshold")]
    pub z_exit_threshold: f64,
    #[serde(default = "default_funding_flip_hours_threshold")]
    pub funding_flip_hours_threshold: f64,
    #[serde(default = "default_liq_buffer_pct")]
    pub liq_buffer_pct: f64,
    #[serde(default = "default_catastrophic_apy_floor")]
    pub catastrophic_apy_floor: f64,
    #[serde(default = "default_delta_bound_pct")]
    pub delta_bound_pct: f64,
    /// YIELD_VS_COST fires once hours-to-cover-exit-cost exceeds this cap.
    #[serde(default = "default_yield_cost_hours_cap")]
    pub yield_cost_hours_cap: f64,
    /// BASIS_CONVERGENCE fires once cross-venue basis falls below this.
    #[serde(default = "default_basis_min")]
    pub basis_min: f64,
}

impl Default for ExitsConfig {
    fn default() -> Self {
        Self {
            early_tp_usd: default_early_tp_usd(),
            early_tp_min_age_secs: default_early_tp_min_age_secs(),
            min_profit_exit_usd: default_min_profit_exit_usd(),
            exit_cost_multiple: default_exit_cost_multiple(),
            velocity_threshold_hourly: default_velocity_threshold_hourly(),
            atr_multiplier: default_atr_multiplier(),
            z_exit_threshold: default_z_exit_threshold(),
            funding_flip_hours_threshold: default_funding_flip_hours_threshold(),
            liq_buffer_pct: default_liq_buffer_pct(),
            catastrophic_apy_floor: default_catastrophic_apy_floor(),
            delta_bound_pct: default_delta_bound_pct(),
            yield_cost_hours_cap: default_yield_cost_hours_cap(),
            basis_min: default_basis_min(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_broken_hedge_cooldown_seconds")]
    pub broken_hedge_cooldown_seconds: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            max_drawdown_pct: default_max_drawdown_pct(),
            broken_hedge_cooldown_seconds: default_broken_hedge_cooldown_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_interval_seconds")]
    pub interval_seconds: u64,
    /// Ghost positions (exchange-side, no matching open trade) are only
    /// logged and alerted on by default; set this to adopt them as
    /// tracked trades instead (spec §4.H).
    #[serde(default)]
    pub auto_import_ghosts: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_reconcile_interval_seconds(),
            auto_import_ghosts: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_write_behind_batch_size")]
    pub write_behind_batch_size: usize,
    #[serde(default = "default_write_behind_queue_capacity")]
    pub write_behind_queue_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            write_behind_batch_size: default_write_behind_batch_size(),
            write_behind_queue_capacity: default_write_behind_queue_capacity(),
        }
    }
}

// -----------------------------------------------------------------------
// Top-level Config
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Enables actual order placement; when false, every `place_order`
    /// call is routed to the paper adapter instead (spec §6).
    #[serde(default)]
    pub live_trading: bool,

    #[serde(default)]
    pub account_mode: AccountMode,

    /// Must equal 1. A blast-radius guard refuses to start live
    /// otherwise (spec §3, §8 boundary behaviors, scenario S4).
    #[serde(default = "default_funding_rate_interval_hours")]
    pub funding_rate_interval_hours: u32,

    #[serde(default)]
    pub symbols: Vec<String>,

    pub maker_venue: VenueConfig,
    pub hedge_venue: VenueConfig,

    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub exits: ExitsConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            live_trading: false,
            account_mode: AccountMode::Demo,
            funding_rate_interval_hours: default_funding_rate_interval_hours(),
            symbols: vec!["ETH".to_string(), "BTC".to_string(), "SOL".to_string()],
            maker_venue: VenueConfig::default(),
            hedge_venue: VenueConfig::default(),
            trading: TradingConfig::default(),
            execution: ExecutionConfig::default(),
            exits: ExitsConfig::default(),
            safety: SafetyConfig::default(),
            reconcile: ReconcileConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, then layer API credentials
    /// from the environment over whatever the file carries (matching the
    /// teacher's dotenv + `std::env::var` pattern in `main.rs`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        if let Ok(key) = std::env::var("MAKER_API_KEY") {
            config.maker_venue.api_key = key;
        }
        if let Ok(secret) = std::env::var("MAKER_API_SECRET") {
            config.maker_venue.api_secret = secret;
        }
        if let Ok(key) = std::env::var("HEDGE_API_KEY") {
            config.hedge_venue.api_key = key;
        }
        if let Ok(secret) = std::env::var("HEDGE_API_SECRET") {
            config.hedge_venue.api_secret = secret;
        }

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            live_trading = config.live_trading,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration using an atomic tmp + rename
    /// write. Credentials are never written back — callers should load a
    /// template config without secrets if they intend to round-trip this.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Blast-radius guard from spec §3/§8: refuse to start live if the
    /// declared funding interval isn't 1 hour (scenario S4). Returns an
    /// error message suitable for the exit-code-2 path in `main.rs`.
    pub fn validate_for_live(&self) -> std::result::Result<(), String> {
        if self.live_trading && self.funding_rate_interval_hours != 1 {
            return Err(format!(
                "funding_rate_interval_hours must be 1 for live trading, got {}",
                self.funding_rate_interval_hours
            ));
        }
        if self.live_trading && (self.maker_venue.api_key.is_empty() || self.hedge_venue.api_key.is_empty())
        {
            warn!("live_trading is true but one or both venue API keys are empty");
            return Err("live_trading requires both venue api_key values to be set".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert!(!cfg.live_trading);
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.funding_rate_interval_hours, 1);
        assert_eq!(cfg.trading.max_open_trades, 3);
        assert_eq!(cfg.safety.max_consecutive_failures, 5);
    }

    #[test]
    fn deserialise_minimal_json_uses_defaults() {
        let json = r#"{
            "maker_venue": {},
            "hedge_venue": {}
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.funding_rate_interval_hours, 1);
        assert_eq!(cfg.trading.min_apy_threshold, 0.15);
        assert_eq!(cfg.execution.maker_timeout_seconds, 5);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "live_trading": true,
            "funding_rate_interval_hours": 8,
            "maker_venue": {"api_key": "mk"},
            "hedge_venue": {"api_key": "hk"}
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert!(cfg.live_trading);
        assert_eq!(cfg.funding_rate_interval_hours, 8);
        assert_eq!(cfg.maker_venue.api_key, "mk");
        assert_eq!(cfg.safety.broken_hedge_cooldown_seconds, 900);
    }

    #[test]
    fn validate_for_live_rejects_mis_scaled_interval() {
        let mut cfg = Config::default();
        cfg.live_trading = true;
        cfg.funding_rate_interval_hours = 8;
        cfg.maker_venue.api_key = "mk".to_string();
        cfg.hedge_venue.api_key = "hk".to_string();
        assert!(cfg.validate_for_live().is_err());
    }

    #[test]
    fn validate_for_live_accepts_well_formed_config() {
        let mut cfg = Config::default();
        cfg.live_trading = true;
        cfg.maker_venue.api_key = "mk".to_string();
        cfg.hedge_venue.api_key = "hk".to_string();
        assert!(cfg.validate_for_live().is_ok());
    }

    #[test]
    fn validate_for_live_is_a_noop_in_paper_mode() {
        let mut cfg = Config::default();
        cfg.funding_rate_interval_hours = 8;
        assert!(cfg.validate_for_live().is_ok());
    }

    #[test]
    fn account_index_zero_is_distinct_from_unset() {
        let mut venue = VenueConfig::default();
        assert_eq!(venue.account_index, None);
        venue.account_index = Some(0);
        assert_eq!(venue.account_index, Some(0));
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.trading.max_open_trades, cfg2.trading.max_open_trades);
    }
}
