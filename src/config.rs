// =============================================================================
// Engine Configuration — constructor-injected settings with atomic save
// =============================================================================
//
// Every tunable parameter of the engine lives here. Components receive their
// slice of this tree at construction time; there is no process-wide registry.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
//
// Percentage conventions: every `*_pct` field stores a human-readable percent
// (e.g. `daily_soft_stop_pct = -1.0` means minus one percent). Consumers
// divide by 100 exactly once, at the comparison site.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::errors::ConfigError;
use crate::types::ExecutionMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec!["EURUSD".to_string(), "GBPUSD".to_string(), "XAUUSD".to_string()]
}

fn default_timeframe() -> String {
    "M15".to_string()
}

fn default_equity() -> Decimal {
    dec!(10000)
}

fn default_min_rr() -> Decimal {
    dec!(1.5)
}

fn default_deviation_points() -> i64 {
    10
}

fn default_max_requotes() -> u32 {
    1
}

fn default_sl_buffer_points() -> i64 {
    3
}

fn default_max_slippage_points() -> i64 {
    5
}

fn default_per_trade_pct() -> Decimal {
    dec!(0.25)
}

fn default_open_risk_cap_pct() -> Decimal {
    dec!(1.0)
}

fn default_daily_soft_stop_pct() -> Decimal {
    dec!(-1.0)
}

fn default_daily_hard_stop_pct() -> Decimal {
    dec!(-2.0)
}

fn default_max_consecutive_send_failures() -> u32 {
    3
}

fn default_failure_cooldown_seconds() -> i64 {
    900
}

fn default_min_margin_level() -> Decimal {
    dec!(200)
}

fn default_max_margin_usage_pct() -> Decimal {
    dec!(50)
}

fn default_max_total_open_risk_pct() -> Decimal {
    dec!(3.0)
}

fn default_ftmo_daily_loss_pct() -> Decimal {
    dec!(-5.0)
}

fn default_ftmo_total_loss_pct() -> Decimal {
    dec!(-10.0)
}

fn default_ftmo_profit_target_pct() -> Decimal {
    dec!(10.0)
}

fn default_ftmo_daily_warning_pct() -> Decimal {
    dec!(-3.0)
}

fn default_ftmo_total_warning_pct() -> Decimal {
    dec!(-7.0)
}

fn default_spread_buffer_multiplier() -> Decimal {
    dec!(2.0)
}

fn default_tick_spread_multiplier() -> Decimal {
    dec!(3.0)
}

fn default_tick_spread_buffer_points() -> Decimal {
    dec!(20)
}

fn default_symbol_floor_points() -> i64 {
    50
}

fn default_retry_tick_spread_multiplier() -> Decimal {
    dec!(4.0)
}

fn default_retry_tick_spread_buffer_points() -> Decimal {
    dec!(30)
}

fn default_retry_safety_margin_points() -> Decimal {
    dec!(20)
}

fn default_exit_priority() -> Vec<String> {
    vec![
        "order_block".to_string(),
        "fair_value_gap".to_string(),
        "rejection".to_string(),
        "atr".to_string(),
    ]
}

fn default_sl_atr_buffer() -> Decimal {
    dec!(0.15)
}

fn default_tp_extension_atr() -> Decimal {
    dec!(1.0)
}

fn default_min_buffer_pips() -> Decimal {
    dec!(1.0)
}

fn default_max_buffer_pips() -> Decimal {
    dec!(10.0)
}

fn default_session_windows() -> Vec<SessionWindowConfig> {
    vec![
        SessionWindowConfig {
            name: "ASIA".to_string(),
            start_utc: "00:00".to_string(),
            end_utc: "07:00".to_string(),
            max_trades_per_hour: 1,
            score_bonus: dec!(0.0),
        },
        SessionWindowConfig {
            name: "LONDON".to_string(),
            start_utc: "07:00".to_string(),
            end_utc: "13:00".to_string(),
            max_trades_per_hour: 2,
            score_bonus: dec!(0.05),
        },
        SessionWindowConfig {
            name: "NY_AM".to_string(),
            start_utc: "13:00".to_string(),
            end_utc: "17:00".to_string(),
            max_trades_per_hour: 2,
            score_bonus: dec!(0.05),
        },
        SessionWindowConfig {
            name: "NY_PM".to_string(),
            start_utc: "17:00".to_string(),
            end_utc: "21:00".to_string(),
            max_trades_per_hour: 1,
            score_bonus: dec!(0.0),
        },
    ]
}

fn default_vol_spread_multiplier() -> Decimal {
    dec!(3.0)
}

fn default_atr_spike_multiplier() -> Decimal {
    dec!(2.5)
}

fn default_vol_lookback_bars() -> usize {
    20
}

fn default_min_pause_seconds() -> i64 {
    300
}

fn default_htf_timeframe() -> String {
    "H1".to_string()
}

fn default_ema_period() -> usize {
    50
}

fn default_atr_period() -> usize {
    14
}

fn default_neutral_zone_atr_mult() -> Decimal {
    dec!(0.5)
}

fn default_bias_bonus() -> Decimal {
    dec!(0.05)
}

fn default_bias_penalty() -> Decimal {
    dec!(0.10)
}

fn default_countertrend_override_score() -> Decimal {
    dec!(0.85)
}

fn default_clear_trend_mult() -> Decimal {
    dec!(1.5)
}

fn default_htf_lookback_bars() -> usize {
    100
}

fn default_htf_cache_ttl_seconds() -> i64 {
    300
}

fn default_elite_structures() -> Vec<String> {
    // Rejection structures are deliberately absent: wick-rejection signals are
    // the weakest counter-trend evidence and never earn the override.
    vec![
        "order_block".to_string(),
        "fair_value_gap".to_string(),
        "engulfing".to_string(),
    ]
}

fn default_conflict_lookback_bars() -> usize {
    12
}

fn default_conflict_base_threshold() -> Decimal {
    dec!(0.60)
}

fn default_conflict_threshold_bump() -> Decimal {
    dec!(0.15)
}

fn default_max_positions_per_symbol() -> usize {
    2
}

fn default_max_positions_per_direction() -> usize {
    1
}

fn default_structure_threshold() -> Decimal {
    dec!(0.60)
}

fn default_session_filter_mode() -> SessionFilterMode {
    SessionFilterMode::LogOnly
}

fn default_journal_dir() -> String {
    "logs/trade_journal".to_string()
}

fn default_onboarding_state_path() -> String {
    "state/symbol_onboarding.json".to_string()
}

fn default_max_full_sl_hits() -> u32 {
    2
}

fn default_min_bars() -> usize {
    50
}

fn default_max_bars_retained() -> usize {
    500
}

fn default_atr_window() -> usize {
    14
}

fn default_debounce_bars() -> usize {
    3
}

fn default_displacement_min_body_atr() -> Decimal {
    dec!(0.50)
}

fn default_min_gap_atr_multiplier() -> Decimal {
    dec!(0.15)
}

fn default_pivot_window() -> usize {
    4
}

fn default_bos_debounce_bars() -> usize {
    2
}

fn default_sweep_debounce_bars() -> usize {
    6
}

fn default_min_reaction_body_atr() -> Decimal {
    dec!(0.35)
}

fn default_rejection_lookahead_bars() -> usize {
    6
}

fn default_min_follow_through_ratio() -> Decimal {
    dec!(0.3)
}

fn default_rejection_weights() -> RejectionWeights {
    RejectionWeights {
        reaction_body: dec!(0.35),
        follow_through: dec!(0.35),
        penetration_depth: dec!(0.20),
        context_bonus: dec!(0.10),
    }
}

fn default_min_body_atr() -> Decimal {
    dec!(0.6)
}

fn default_min_body_to_range() -> Decimal {
    dec!(0.55)
}

fn default_data_source() -> String {
    "synthetic".to_string()
}

// =============================================================================
// Execution
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Executor-level RR floor, applied after any planner clamping.
    #[serde(default = "default_min_rr")]
    pub min_rr: Decimal,

    /// Safety latch: live mode never sends real orders unless this is true.
    #[serde(default)]
    pub enable_real_orders: bool,

    #[serde(default = "default_deviation_points")]
    pub deviation_points: i64,

    #[serde(default = "default_max_requotes")]
    pub max_requotes: u32,

    #[serde(default = "default_sl_buffer_points")]
    pub sl_buffer_points: i64,

    #[serde(default = "default_max_slippage_points")]
    pub max_slippage_points: i64,

    /// Magic number stamped on every outbound order.
    #[serde(default)]
    pub magic: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default ExecutionConfig")
    }
}

// =============================================================================
// Risk
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginGuardConfig {
    #[serde(default = "default_min_margin_level")]
    pub min_margin_level: Decimal,

    #[serde(default = "default_max_margin_usage_pct")]
    pub max_margin_usage_pct: Decimal,

    #[serde(default = "default_max_total_open_risk_pct")]
    pub max_total_open_risk_pct: Decimal,
}

impl Default for MarginGuardConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default MarginGuardConfig")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Risk budget per trade as a percent of equity.
    #[serde(default = "default_per_trade_pct")]
    pub per_trade_pct: Decimal,

    /// Cap on total open risk per symbol as a percent of equity.
    #[serde(default = "default_open_risk_cap_pct")]
    pub per_symbol_open_risk_cap_pct: Decimal,

    /// Daily drawdown (negative percent) that stops new orders for the day.
    #[serde(default = "default_daily_soft_stop_pct")]
    pub daily_soft_stop_pct: Decimal,

    /// Daily drawdown (negative percent) that also flattens the symbol.
    #[serde(default = "default_daily_hard_stop_pct")]
    pub daily_hard_stop_pct: Decimal,

    #[serde(default = "default_max_consecutive_send_failures")]
    pub max_consecutive_send_failures: u32,

    #[serde(default = "default_failure_cooldown_seconds")]
    pub failure_cooldown_seconds: i64,

    #[serde(default)]
    pub margin: MarginGuardConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default RiskConfig")
    }
}

// =============================================================================
// FTMO shadow limits
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtmoConfig {
    #[serde(default = "default_ftmo_daily_loss_pct")]
    pub max_daily_loss_pct: Decimal,

    #[serde(default = "default_ftmo_total_loss_pct")]
    pub max_total_loss_pct: Decimal,

    #[serde(default = "default_ftmo_profit_target_pct")]
    pub profit_target_pct: Decimal,

    #[serde(default = "default_ftmo_daily_warning_pct")]
    pub daily_warning_pct: Decimal,

    #[serde(default = "default_ftmo_total_warning_pct")]
    pub total_warning_pct: Decimal,
}

impl Default for FtmoConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default FtmoConfig")
    }
}

// =============================================================================
// Broker stop-distance guard
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopGuardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_spread_buffer_multiplier")]
    pub spread_buffer_multiplier: Decimal,

    #[serde(default = "default_tick_spread_multiplier")]
    pub tick_spread_multiplier: Decimal,

    #[serde(default = "default_tick_spread_buffer_points")]
    pub tick_spread_buffer_points: Decimal,

    #[serde(default = "default_symbol_floor_points")]
    pub default_symbol_floor_points: i64,

    /// Per-symbol overrides for the minimum stop distance floor.
    #[serde(default)]
    pub symbol_floor_points: HashMap<String, i64>,

    #[serde(default = "default_true")]
    pub use_tick_based_stop_validation: bool,
}

impl StopGuardConfig {
    pub fn floor_points(&self, symbol: &str) -> i64 {
        self.symbol_floor_points
            .get(symbol)
            .copied()
            .unwrap_or(self.default_symbol_floor_points)
    }
}

impl Default for StopGuardConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default StopGuardConfig")
    }
}

// =============================================================================
// Invalid-stops (retcode 10016) handling
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidStopsConfig {
    #[serde(default = "default_true")]
    pub enable_adaptive_retry: bool,

    #[serde(default = "default_retry_tick_spread_multiplier")]
    pub retry_tick_spread_multiplier: Decimal,

    #[serde(default = "default_retry_tick_spread_buffer_points")]
    pub retry_tick_spread_buffer_points: Decimal,

    #[serde(default = "default_retry_safety_margin_points")]
    pub retry_safety_margin_points: Decimal,

    #[serde(default)]
    pub enable_naked_entry_fallback: bool,

    #[serde(default)]
    pub close_on_modify_failure: bool,
}

impl Default for InvalidStopsConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default InvalidStopsConfig")
    }
}

// =============================================================================
// SL/TP planning
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SltpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Methods tried in order until one survives the RR gate.
    #[serde(default = "default_exit_priority")]
    pub exit_priority: Vec<String>,

    #[serde(default = "default_true")]
    pub atr_fallback_enabled: bool,

    #[serde(default = "default_sl_atr_buffer")]
    pub sl_atr_buffer: Decimal,

    #[serde(default = "default_tp_extension_atr")]
    pub tp_extension_atr: Decimal,

    #[serde(default = "default_min_buffer_pips")]
    pub min_buffer_pips: Decimal,

    #[serde(default = "default_max_buffer_pips")]
    pub max_buffer_pips: Decimal,

    #[serde(default = "default_min_rr")]
    pub min_rr_gate: Decimal,
}

impl Default for SltpConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default SltpConfig")
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWindowConfig {
    pub name: String,
    /// "HH:MM" UTC wall-clock, inclusive.
    pub start_utc: String,
    /// "HH:MM" UTC wall-clock, exclusive.
    pub end_utc: String,
    #[serde(default)]
    pub max_trades_per_hour: u32,
    #[serde(default)]
    pub score_bonus: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityPauseConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_vol_spread_multiplier")]
    pub spread_multiplier: Decimal,

    #[serde(default = "default_atr_spike_multiplier")]
    pub atr_spike_multiplier: Decimal,

    #[serde(default = "default_vol_lookback_bars")]
    pub lookback_bars: usize,

    #[serde(default = "default_min_pause_seconds")]
    pub min_pause_seconds: i64,
}

impl Default for VolatilityPauseConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default VolatilityPauseConfig")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_session_windows")]
    pub windows: Vec<SessionWindowConfig>,

    #[serde(default)]
    pub close_positions_on_session_end: bool,

    #[serde(default)]
    pub volatility_pause: VolatilityPauseConfig,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default SessionsConfig")
    }
}

// =============================================================================
// HTF bias
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardBlockMode {
    Always,
    Conditional,
    Never,
}

impl Default for HardBlockMode {
    fn default() -> Self {
        Self::Conditional
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtfBiasConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_htf_timeframe")]
    pub timeframe: String,

    #[serde(default = "default_ema_period")]
    pub ema_period: usize,

    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    /// Width of the neutral band around the EMA, in ATR multiples.
    #[serde(default = "default_neutral_zone_atr_mult")]
    pub neutral_zone_atr_mult: Decimal,

    #[serde(default = "default_bias_bonus")]
    pub bias_bonus: Decimal,

    #[serde(default = "default_bias_penalty")]
    pub bias_penalty: Decimal,

    /// Confidence at or above which elite structures may trade counter-trend.
    #[serde(default = "default_countertrend_override_score")]
    pub countertrend_override_score: Decimal,

    #[serde(default)]
    pub hard_block: HardBlockMode,

    /// In conditional mode, distance beyond `mult × neutral zone` that makes
    /// a trend "clear" and blocks counter-trend entries.
    #[serde(default = "default_clear_trend_mult")]
    pub hard_block_clear_trend_mult: Decimal,

    #[serde(default = "default_htf_lookback_bars")]
    pub lookback_bars: usize,

    #[serde(default = "default_htf_cache_ttl_seconds")]
    pub cache_ttl_seconds: i64,

    /// Structure types eligible for the counter-trend elite override.
    #[serde(default = "default_elite_structures")]
    pub elite_structures: Vec<String>,

    #[serde(default = "default_true")]
    pub log_bias_checks: bool,
}

impl Default for HtfBiasConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default HtfBiasConfig")
    }
}

// =============================================================================
// Conflict resolver / position limits / structure thresholds
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_conflict_lookback_bars")]
    pub lookback_bars: usize,

    #[serde(default = "default_conflict_base_threshold")]
    pub base_threshold: Decimal,

    /// Extra confidence demanded when an opposing signal is in the window.
    #[serde(default = "default_conflict_threshold_bump")]
    pub threshold_bump: Decimal,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default ConflictConfig")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLimitsConfig {
    #[serde(default = "default_max_positions_per_symbol")]
    pub max_positions_per_symbol: usize,

    #[serde(default = "default_max_positions_per_direction")]
    pub max_positions_per_direction: usize,
}

impl Default for PositionLimitsConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default PositionLimitsConfig")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureThresholdsConfig {
    /// Keys are `{type}_{direction}` with a plain `{type}` fallback,
    /// e.g. `order_block_bullish` then `order_block`.
    #[serde(default)]
    pub thresholds: HashMap<String, Decimal>,

    #[serde(default = "default_structure_threshold")]
    pub default_threshold: Decimal,
}

impl Default for StructureThresholdsConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default StructureThresholdsConfig")
    }
}

// =============================================================================
// Session filter
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFilterMode {
    LogOnly,
    Enforce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolSessionRules {
    #[serde(default)]
    pub ideal: Vec<String>,
    #[serde(default)]
    pub acceptable: Vec<String>,
    #[serde(default)]
    pub avoid: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFilterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_session_filter_mode")]
    pub mode: SessionFilterMode,

    #[serde(default)]
    pub symbol_rules: HashMap<String, SymbolSessionRules>,
}

impl Default for SessionFilterConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default SessionFilterConfig")
    }
}

// =============================================================================
// Symbol onboarding
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolOnboardingOverrides {
    #[serde(default)]
    pub initial_state: Option<String>,
    #[serde(default)]
    pub execute_when_promoted: Option<bool>,
    #[serde(default)]
    pub probation_min_sessions: Option<u32>,
    #[serde(default)]
    pub probation_min_trades: Option<u32>,
    #[serde(default)]
    pub max_validation_errors: Option<u32>,
    #[serde(default)]
    pub risk_cap_multiplier_during_probation: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingConfig {
    #[serde(default = "default_onboarding_state_path")]
    pub state_path: String,

    #[serde(default)]
    pub symbols: HashMap<String, SymbolOnboardingOverrides>,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default OnboardingConfig")
    }
}

// =============================================================================
// Detectors
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBlockConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_displacement_min_body_atr")]
    pub displacement_min_body_atr: Decimal,
    #[serde(default = "default_atr_window")]
    pub atr_window: usize,
    #[serde(default = "default_debounce_bars")]
    pub debounce_bars: usize,
}

impl Default for OrderBlockConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default OrderBlockConfig")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairValueGapConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_gap_atr_multiplier")]
    pub min_gap_atr_multiplier: Decimal,
    #[serde(default = "default_atr_window")]
    pub atr_window: usize,
    #[serde(default = "default_debounce_bars")]
    pub debounce_bars: usize,
}

impl Default for FairValueGapConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default FairValueGapConfig")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakOfStructureConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_pivot_window")]
    pub pivot_window: usize,
    #[serde(default = "default_atr_window")]
    pub atr_window: usize,
    #[serde(default = "default_bos_debounce_bars")]
    pub debounce_bars: usize,
}

impl Default for BreakOfStructureConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default BreakOfStructureConfig")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_atr_window")]
    pub atr_window: usize,
    #[serde(default = "default_sweep_debounce_bars")]
    pub debounce_bars: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default SweepConfig")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionWeights {
    pub reaction_body: Decimal,
    pub follow_through: Decimal,
    pub penetration_depth: Decimal,
    pub context_bonus: Decimal,
}

impl RejectionWeights {
    pub fn sum(&self) -> Decimal {
        self.reaction_body + self.follow_through + self.penetration_depth + self.context_bonus
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_reaction_body_atr")]
    pub min_reaction_body_atr: Decimal,
    #[serde(default = "default_rejection_lookahead_bars")]
    pub lookahead_bars: usize,
    #[serde(default = "default_min_follow_through_ratio")]
    pub min_follow_through_ratio: Decimal,
    #[serde(default = "default_rejection_weights")]
    pub weights: RejectionWeights,
    #[serde(default = "default_atr_window")]
    pub atr_window: usize,
    #[serde(default = "default_bos_debounce_bars")]
    pub debounce_bars: usize,
}

impl Default for RejectionConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default RejectionConfig")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngulfingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_body_atr")]
    pub min_body_atr: Decimal,
    #[serde(default = "default_min_body_to_range")]
    pub min_body_to_range: Decimal,
    #[serde(default = "default_atr_window")]
    pub atr_window: usize,
    #[serde(default = "default_debounce_bars")]
    pub debounce_bars: usize,
}

impl Default for EngulfingConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default EngulfingConfig")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorsConfig {
    #[serde(default)]
    pub order_block: OrderBlockConfig,
    #[serde(default)]
    pub fair_value_gap: FairValueGapConfig,
    #[serde(default)]
    pub break_of_structure: BreakOfStructureConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub rejection: RejectionConfig,
    #[serde(default)]
    pub engulfing: EngulfingConfig,
}

// =============================================================================
// Journal / system
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_journal_dir")]
    pub dir: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default JournalConfig")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// "synthetic" or "csv".
    #[serde(default = "default_data_source")]
    pub data_source: String,

    #[serde(default)]
    pub csv_dir: String,

    #[serde(default = "default_min_bars")]
    pub min_bars: usize,

    #[serde(default = "default_max_bars_retained")]
    pub max_bars_retained: usize,

    #[serde(default = "default_max_full_sl_hits")]
    pub max_full_sl_hits_per_session: u32,

    /// Simulated account equity for dry-run and paper modes.
    #[serde(default = "default_equity")]
    pub sim_equity: Decimal,
}

impl Default for SystemConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default SystemConfig")
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Meridian engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub ftmo: FtmoConfig,

    #[serde(default)]
    pub stop_guard: StopGuardConfig,

    #[serde(default)]
    pub invalid_stops: InvalidStopsConfig,

    #[serde(default)]
    pub sltp: SltpConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub htf_bias: HtfBiasConfig,

    #[serde(default)]
    pub conflict: ConflictConfig,

    #[serde(default)]
    pub position_limits: PositionLimitsConfig,

    #[serde(default)]
    pub structure_thresholds: StructureThresholdsConfig,

    #[serde(default)]
    pub session_filter: SessionFilterConfig,

    #[serde(default)]
    pub onboarding: OnboardingConfig,

    #[serde(default)]
    pub detectors: DetectorsConfig,

    #[serde(default)]
    pub journal: JournalConfig,

    /// Broker symbol metadata, keyed by symbol. Used to seed the simulated
    /// gateway and validated at startup in every mode.
    #[serde(default)]
    pub broker_symbols: HashMap<String, crate::broker::SymbolInfo>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default EngineConfig")
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, falling back to defaults for any
    /// missing fields.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            source: e.into(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            source: e.into(),
        })?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Save configuration atomically (write tmp, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("failed to serialise config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write tmp config {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config into {}", path.display()))?;

        info!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Stable SHA-256 hash of the full config, logged at startup so that any
    /// run can be matched to the exact configuration that produced it.
    pub fn config_hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.execution.mode, ExecutionMode::DryRun);
        assert_eq!(cfg.sltp.min_rr_gate, dec!(1.5));
        assert_eq!(cfg.risk.per_trade_pct, dec!(0.25));
        assert_eq!(cfg.sessions.windows.len(), 4);
        assert!(cfg.stop_guard.enabled);
        assert!(!cfg.execution.enable_real_orders);
    }

    #[test]
    fn partial_json_fills_missing_fields() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"risk": {"per_trade_pct": "0.5"}}"#).unwrap();
        assert_eq!(cfg.risk.per_trade_pct, dec!(0.5));
        // Untouched siblings fall back to defaults.
        assert_eq!(cfg.risk.daily_soft_stop_pct, dec!(-1.0));
        assert_eq!(cfg.sltp.exit_priority.len(), 4);
    }

    #[test]
    fn config_hash_is_stable() {
        let a = EngineConfig::default();
        let b = EngineConfig::default();
        assert_eq!(a.config_hash(), b.config_hash());
        assert_eq!(a.config_hash().len(), 64);

        let mut c = EngineConfig::default();
        c.risk.per_trade_pct = dec!(0.5);
        assert_ne!(a.config_hash(), c.config_hash());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");

        let mut cfg = EngineConfig::default();
        cfg.symbols = vec!["EURUSD".to_string()];
        cfg.risk.per_trade_pct = dec!(0.33);
        cfg.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, vec!["EURUSD".to_string()]);
        assert_eq!(loaded.risk.per_trade_pct, dec!(0.33));
        assert_eq!(loaded.config_hash(), cfg.config_hash());
    }

    #[test]
    fn symbol_floor_lookup_falls_back_to_default() {
        let mut cfg = StopGuardConfig::default();
        cfg.symbol_floor_points.insert("XAUUSD".to_string(), 120);
        assert_eq!(cfg.floor_points("XAUUSD"), 120);
        assert_eq!(cfg.floor_points("EURUSD"), 50);
    }
}
