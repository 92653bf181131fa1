// =============================================================================
// Session Filter — symbol x session relevance classification
// =============================================================================
//
// Classifies each trade attempt as ideal / acceptable / avoid / unknown for
// the (symbol, session) pair. Phase 1 runs in log-only mode; enforce mode
// blocks `avoid` combinations.
// =============================================================================

use serde::Serialize;
use tracing::info;

use crate::config::{SessionFilterConfig, SessionFilterMode};

/// How well a session suits a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRelevance {
    Ideal,
    Acceptable,
    Avoid,
    Unknown,
}

impl std::fmt::Display for SessionRelevance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ideal => write!(f, "ideal"),
            Self::Acceptable => write!(f, "acceptable"),
            Self::Avoid => write!(f, "avoid"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

pub struct SessionFilter {
    cfg: SessionFilterConfig,
}

impl SessionFilter {
    pub fn new(cfg: SessionFilterConfig) -> Self {
        Self { cfg }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    /// Look up the relevance of `session` for `symbol`.
    pub fn relevance(&self, symbol: &str, session: &str) -> SessionRelevance {
        let rules = match self.cfg.symbol_rules.get(&symbol.to_uppercase()) {
            Some(rules) => rules,
            None => return SessionRelevance::Unknown,
        };

        if rules.ideal.iter().any(|s| s == session) {
            SessionRelevance::Ideal
        } else if rules.acceptable.iter().any(|s| s == session) {
            SessionRelevance::Acceptable
        } else if rules.avoid.iter().any(|s| s == session) {
            SessionRelevance::Avoid
        } else {
            SessionRelevance::Unknown
        }
    }

    /// Evaluate a trade attempt. Returns `(relevance, should_block)` and logs
    /// the evaluation; blocking only happens in enforce mode.
    pub fn evaluate(&self, symbol: &str, session: &str) -> (SessionRelevance, bool) {
        if !self.cfg.enabled {
            return (SessionRelevance::Unknown, false);
        }

        let relevance = self.relevance(symbol, session);
        let would_block = relevance == SessionRelevance::Avoid;
        let should_block = would_block && self.cfg.mode == SessionFilterMode::Enforce;

        info!(
            symbol,
            session,
            relevance = %relevance,
            would_block_if_enforced = would_block,
            mode = ?self.cfg.mode,
            "session_filter_evaluated"
        );

        (relevance, should_block)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SymbolSessionRules;

    fn cfg_with_rules(mode: SessionFilterMode) -> SessionFilterConfig {
        let mut cfg = SessionFilterConfig::default();
        cfg.mode = mode;
        cfg.symbol_rules.insert(
            "GBPUSD".to_string(),
            SymbolSessionRules {
                ideal: vec!["LONDON".to_string(), "NY_AM".to_string()],
                acceptable: vec![],
                avoid: vec!["ASIA".to_string()],
            },
        );
        cfg
    }

    #[test]
    fn classifies_by_symbol_rules() {
        let filter = SessionFilter::new(cfg_with_rules(SessionFilterMode::LogOnly));
        assert_eq!(filter.relevance("GBPUSD", "LONDON"), SessionRelevance::Ideal);
        assert_eq!(filter.relevance("GBPUSD", "ASIA"), SessionRelevance::Avoid);
        assert_eq!(filter.relevance("GBPUSD", "NY_PM"), SessionRelevance::Unknown);
        assert_eq!(filter.relevance("USDJPY", "LONDON"), SessionRelevance::Unknown);
    }

    #[test]
    fn log_only_mode_never_blocks() {
        let filter = SessionFilter::new(cfg_with_rules(SessionFilterMode::LogOnly));
        let (relevance, block) = filter.evaluate("GBPUSD", "ASIA");
        assert_eq!(relevance, SessionRelevance::Avoid);
        assert!(!block);
    }

    #[test]
    fn enforce_mode_blocks_avoid_only() {
        let filter = SessionFilter::new(cfg_with_rules(SessionFilterMode::Enforce));
        let (_, block) = filter.evaluate("GBPUSD", "ASIA");
        assert!(block);
        let (_, block) = filter.evaluate("GBPUSD", "LONDON");
        assert!(!block);
        // Unknown symbols are never blocked.
        let (_, block) = filter.evaluate("USDJPY", "ASIA");
        assert!(!block);
    }

    #[test]
    fn symbol_lookup_is_case_insensitive() {
        let filter = SessionFilter::new(cfg_with_rules(SessionFilterMode::Enforce));
        assert_eq!(filter.relevance("gbpusd", "LONDON"), SessionRelevance::Ideal);
    }
}
