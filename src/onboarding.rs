// =============================================================================
// Symbol Onboarding — per-symbol observe-only -> promoted lifecycle
// =============================================================================
//
// New symbols trade under observation first: decisions are generated and
// counted but not executed (or executed under tightened risk caps) until the
// symbol earns promotion. Promotion requires enough distinct sessions and
// enough entry decisions with few validation errors. There is no automatic
// demotion.
//
// Precedence when reading a symbol's state:
//   runtime state file  >  config overrides  >  hard defaults
//
// The state file is written with an atomic tmp + rename swap.
// =============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{OnboardingConfig, RiskConfig};
use crate::decision::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingState {
    ObserveOnly,
    Promoted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolOnboarding {
    pub state: OnboardingState,
    pub execute_when_promoted: bool,
    pub probation_min_sessions: u32,
    pub probation_min_trades: u32,
    pub max_validation_errors: u32,
    pub risk_cap_multiplier_during_probation: Decimal,
    pub sessions_seen: u32,
    pub trades_seen: u32,
    pub validation_errors: u32,
    #[serde(default)]
    pub seen_sessions: Vec<String>,
    #[serde(default)]
    pub last_promotion_ts: Option<DateTime<Utc>>,
}

impl Default for SymbolOnboarding {
    fn default() -> Self {
        Self {
            state: OnboardingState::Promoted,
            execute_when_promoted: true,
            probation_min_sessions: 0,
            probation_min_trades: 0,
            max_validation_errors: 0,
            risk_cap_multiplier_during_probation: dec!(1.0),
            sessions_seen: 0,
            trades_seen: 0,
            validation_errors: 0,
            seen_sessions: Vec::new(),
            last_promotion_ts: None,
        }
    }
}

pub struct OnboardingManager {
    cfg: OnboardingConfig,
    state: BTreeMap<String, SymbolOnboarding>,
    state_path: PathBuf,
}

impl OnboardingManager {
    pub fn new(cfg: OnboardingConfig) -> Self {
        let state_path = PathBuf::from(&cfg.state_path);
        let state = match std::fs::read_to_string(&state_path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %state_path.display(), error = %e, "onboarding state unreadable; starting fresh");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            cfg,
            state,
            state_path,
        }
    }

    /// Merged view for a symbol: runtime state wins over config overrides,
    /// which win over defaults.
    pub fn get_state(&self, symbol: &str) -> SymbolOnboarding {
        let symbol = symbol.to_uppercase();
        if let Some(state) = self.state.get(&symbol) {
            return state.clone();
        }

        let mut merged = SymbolOnboarding::default();
        if let Some(overrides) = self.cfg.symbols.get(&symbol) {
            if let Some(initial) = overrides.initial_state.as_deref() {
                merged.state = match initial {
                    "observe_only" => OnboardingState::ObserveOnly,
                    _ => OnboardingState::Promoted,
                };
            }
            if let Some(execute) = overrides.execute_when_promoted {
                merged.execute_when_promoted = execute;
            }
            if let Some(min_sessions) = overrides.probation_min_sessions {
                merged.probation_min_sessions = min_sessions;
            }
            if let Some(min_trades) = overrides.probation_min_trades {
                merged.probation_min_trades = min_trades;
            }
            if let Some(max_errors) = overrides.max_validation_errors {
                merged.max_validation_errors = max_errors;
            }
            if let Some(multiplier) = overrides.risk_cap_multiplier_during_probation {
                merged.risk_cap_multiplier_during_probation = multiplier;
            }
        }
        merged
    }

    /// Update counters for a symbol after a bar's decisions, apply the
    /// promotion rule, and persist.
    pub fn record_decisions(
        &mut self,
        symbol: &str,
        decisions: &[Decision],
        session_id: Option<&str>,
        validation_errors: u32,
        now: DateTime<Utc>,
    ) {
        let key = symbol.to_uppercase();
        let mut entry = self.get_state(&key);

        // A session counts once, and only when it produced decisions.
        if let Some(session_id) = session_id {
            if !decisions.is_empty() && !entry.seen_sessions.iter().any(|s| s == session_id) {
                entry.seen_sessions.push(session_id.to_string());
                entry.sessions_seen += 1;
            }
        }

        let trades = decisions.iter().filter(|d| d.is_entry()).count() as u32;
        entry.trades_seen += trades;
        entry.validation_errors += validation_errors;

        if entry.state != OnboardingState::Promoted
            && entry.sessions_seen >= entry.probation_min_sessions
            && entry.trades_seen >= entry.probation_min_trades
            && entry.validation_errors <= entry.max_validation_errors
        {
            info!(
                symbol = %key,
                from_state = "observe_only",
                to_state = "promoted",
                sessions_seen = entry.sessions_seen,
                trades_seen = entry.trades_seen,
                validation_errors = entry.validation_errors,
                "symbol_onboarding_promotion"
            );
            entry.state = OnboardingState::Promoted;
            entry.last_promotion_ts = Some(now);
        }

        info!(
            symbol = %key,
            state = ?entry.state,
            sessions_seen = entry.sessions_seen,
            trades_seen = entry.trades_seen,
            validation_errors = entry.validation_errors,
            "symbol_onboarding_state"
        );

        self.state.insert(key, entry);
        self.save();
    }

    /// Whether entry decisions for the symbol should reach the executor.
    pub fn should_execute(&self, symbol: &str) -> bool {
        let state = self.get_state(symbol);
        state.state == OnboardingState::Promoted && state.execute_when_promoted
    }

    /// Derive a risk config with probation overrides applied. Non-promoted
    /// symbols with a multiplier below 1.0 trade under a tightened
    /// per-symbol open-risk cap. The input is never mutated.
    pub fn apply_probation_overrides(&self, symbol: &str, risk_cfg: &RiskConfig) -> RiskConfig {
        let state = self.get_state(symbol);
        let mut derived = risk_cfg.clone();

        if state.state != OnboardingState::Promoted
            && state.risk_cap_multiplier_during_probation < dec!(1.0)
        {
            derived.per_symbol_open_risk_cap_pct =
                derived.per_symbol_open_risk_cap_pct * state.risk_cap_multiplier_during_probation;
        }

        derived
    }

    /// Persist atomically. I/O failures are logged, never propagated:
    /// onboarding persistence must not block trading.
    fn save(&self) {
        if let Some(parent) = self.state_path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let json = match serde_json::to_string_pretty(&self.state) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "onboarding state serialise failed");
                return;
            }
        };
        let tmp = self.state_path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, &json) {
            warn!(path = %tmp.display(), error = %e, "onboarding state write failed");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.state_path) {
            warn!(path = %self.state_path.display(), error = %e, "onboarding state rename failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SymbolOnboardingOverrides;
    use crate::decision::DecisionStatus;
    use crate::types::DecisionType;
    use chrono::TimeZone;

    fn probation_cfg(dir: &std::path::Path) -> OnboardingConfig {
        let mut cfg = OnboardingConfig::default();
        cfg.state_path = dir
            .join("onboarding.json")
            .to_string_lossy()
            .into_owned();
        cfg.symbols.insert(
            "GBPUSD".to_string(),
            SymbolOnboardingOverrides {
                initial_state: Some("observe_only".to_string()),
                execute_when_promoted: Some(true),
                probation_min_sessions: Some(2),
                probation_min_trades: Some(3),
                max_validation_errors: Some(0),
                risk_cap_multiplier_during_probation: Some(dec!(0.5)),
            },
        );
        cfg
    }

    fn entry_decision(symbol: &str, decision_type: DecisionType) -> Decision {
        Decision {
            decision_type,
            symbol: symbol.to_string(),
            timestamp: now(),
            session_id: "LONDON".to_string(),
            entry_price: dec!(1.1),
            stop_loss: dec!(1.09),
            take_profit: dec!(1.12),
            position_size: dec!(0.1),
            risk_reward_ratio: dec!(2),
            structure_id: "id".to_string(),
            confidence_score: dec!(0.7),
            reasoning: "test".to_string(),
            status: DecisionStatus::Validated,
            metadata: Default::default(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn unknown_symbol_defaults_to_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = OnboardingConfig::default();
        cfg.state_path = dir.path().join("s.json").to_string_lossy().into_owned();
        let manager = OnboardingManager::new(cfg);
        assert!(manager.should_execute("EURUSD"));
    }

    #[test]
    fn observe_only_symbol_does_not_execute() {
        let dir = tempfile::tempdir().unwrap();
        let manager = OnboardingManager::new(probation_cfg(dir.path()));
        assert!(!manager.should_execute("GBPUSD"));
    }

    #[test]
    fn promotion_after_sessions_and_trades_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = OnboardingManager::new(probation_cfg(dir.path()));

        let buy = entry_decision("GBPUSD", DecisionType::Buy);
        // Session 1: two trades.
        manager.record_decisions("GBPUSD", &[buy.clone(), buy.clone()], Some("LONDON"), 0, now());
        assert!(!manager.should_execute("GBPUSD"));

        // Same session again: sessions_seen must not double-count.
        manager.record_decisions("GBPUSD", &[buy.clone()], Some("LONDON"), 0, now());
        let state = manager.get_state("GBPUSD");
        assert_eq!(state.sessions_seen, 1);
        assert_eq!(state.trades_seen, 3);
        assert!(!manager.should_execute("GBPUSD"));

        // Second distinct session satisfies both thresholds.
        manager.record_decisions("GBPUSD", &[buy], Some("NY_AM"), 0, now());
        let state = manager.get_state("GBPUSD");
        assert_eq!(state.sessions_seen, 2);
        assert_eq!(state.state, OnboardingState::Promoted);
        assert!(state.last_promotion_ts.is_some());
        assert!(manager.should_execute("GBPUSD"));
    }

    #[test]
    fn validation_errors_hold_back_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = OnboardingManager::new(probation_cfg(dir.path()));
        let buy = entry_decision("GBPUSD", DecisionType::Buy);

        manager.record_decisions("GBPUSD", &[buy.clone(), buy.clone()], Some("LONDON"), 1, now());
        manager.record_decisions("GBPUSD", &[buy.clone(), buy], Some("NY_AM"), 0, now());

        let state = manager.get_state("GBPUSD");
        assert!(state.sessions_seen >= 2 && state.trades_seen >= 3);
        assert_eq!(state.state, OnboardingState::ObserveOnly);
    }

    #[test]
    fn probation_tightens_risk_cap_without_mutating_input() {
        let dir = tempfile::tempdir().unwrap();
        let manager = OnboardingManager::new(probation_cfg(dir.path()));
        let base = RiskConfig::default();

        let derived = manager.apply_probation_overrides("GBPUSD", &base);
        assert_eq!(
            derived.per_symbol_open_risk_cap_pct,
            base.per_symbol_open_risk_cap_pct * dec!(0.5)
        );
        // Promoted symbols are untouched.
        let untouched = manager.apply_probation_overrides("EURUSD", &base);
        assert_eq!(
            untouched.per_symbol_open_risk_cap_pct,
            base.per_symbol_open_risk_cap_pct
        );
        // per_trade_pct never changes.
        assert_eq!(derived.per_trade_pct, base.per_trade_pct);
    }

    #[test]
    fn state_survives_reload_bit_identically() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = probation_cfg(dir.path());
        let buy = entry_decision("GBPUSD", DecisionType::Buy);

        let mut manager = OnboardingManager::new(cfg.clone());
        manager.record_decisions("GBPUSD", &[buy], Some("LONDON"), 0, now());
        let before = manager.get_state("GBPUSD");

        let reloaded = OnboardingManager::new(cfg);
        let after = reloaded.get_state("GBPUSD");

        assert_eq!(
            serde_json::to_string(&before).unwrap(),
            serde_json::to_string(&after).unwrap()
        );
    }
}
