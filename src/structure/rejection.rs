// =============================================================================
// Unified Zone Rejection (UZR) detector
// =============================================================================
//
// A meaningful reaction body off a level with follow-through: the current bar
// closes with a body of at least `min_reaction_body_atr * ATR`, and at least
// `min_follow_through_ratio` of the trailing look-ahead window closed in the
// same direction.
// =============================================================================

use rust_decimal::Decimal;
use serde_json::json;
use tracing::debug;

use crate::config::RejectionConfig;
use crate::errors::ConfigError;
use crate::indicators::atr::compute_atr;
use crate::market_data::BarSeries;
use crate::types::Direction;

use super::{
    deterministic_id, quality_score, Debounce, DetectorStats, LifecycleState, Structure,
    StructureDetector, StructureQuality, StructureType,
};

pub struct RejectionDetector {
    cfg: RejectionConfig,
    stats: DetectorStats,
    debounce: Debounce,
}

impl RejectionDetector {
    pub fn new(cfg: RejectionConfig) -> Result<Self, ConfigError> {
        if cfg.min_reaction_body_atr < Decimal::ZERO {
            return Err(ConfigError::invalid(
                "rejection.min_reaction_body_atr",
                "must be >= 0",
            ));
        }
        if cfg.lookahead_bars == 0 {
            return Err(ConfigError::invalid(
                "rejection.lookahead_bars",
                "must be > 0",
            ));
        }
        if cfg.min_follow_through_ratio < Decimal::ZERO
            || cfg.min_follow_through_ratio > Decimal::ONE
        {
            return Err(ConfigError::invalid(
                "rejection.min_follow_through_ratio",
                "must be within [0, 1]",
            ));
        }
        if cfg.weights.sum() != Decimal::ONE {
            return Err(ConfigError::WeightSum {
                detector: "rejection".to_string(),
                sum: cfg.weights.sum().to_string(),
            });
        }
        if cfg.atr_window == 0 {
            return Err(ConfigError::invalid("rejection.atr_window", "must be > 0"));
        }
        Ok(Self {
            cfg,
            stats: DetectorStats::default(),
            debounce: Debounce::default(),
        })
    }
}

impl StructureDetector for RejectionDetector {
    fn name(&self) -> &'static str {
        "RejectionDetector"
    }

    fn structure_type(&self) -> StructureType {
        StructureType::Rejection
    }

    fn detect(&mut self, series: &BarSeries, session_id: &str) -> Vec<Structure> {
        if !self.cfg.enabled || series.len() < self.cfg.lookahead_bars + 2 {
            return Vec::new();
        }

        let bars = series.bars();
        let atr = match compute_atr(bars, self.cfg.atr_window) {
            Some(atr) if !atr.is_zero() => atr,
            _ => return Vec::new(),
        };

        self.stats.seen += 1;

        let bar_index = match series.current_index() {
            Some(i) => i,
            None => return Vec::new(),
        };

        let prev = &bars[bars.len() - 2];
        let curr = &bars[bars.len() - 1];

        let reaction_body = curr.body();
        if reaction_body < self.cfg.min_reaction_body_atr * atr {
            return Vec::new();
        }

        let direction = if curr.is_bullish() {
            Direction::Bullish
        } else if curr.is_bearish() {
            Direction::Bearish
        } else {
            return Vec::new();
        };

        // Follow-through: share of the trailing look-ahead window that closed
        // in the reaction's direction.
        let lookahead = &bars[bars.len() - self.cfg.lookahead_bars..];
        let aligned = lookahead
            .iter()
            .filter(|b| match direction {
                Direction::Bullish => b.is_bullish(),
                Direction::Bearish => b.is_bearish(),
            })
            .count();
        let follow_through =
            Decimal::from(aligned as u64) / Decimal::from(lookahead.len() as u64);

        if follow_through < self.cfg.min_follow_through_ratio {
            return Vec::new();
        }

        if self
            .debounce
            .blocked(direction, bar_index, self.cfg.debounce_bars as u64)
        {
            return Vec::new();
        }

        self.stats.fired += 1;
        self.debounce.mark(direction, bar_index);

        let reaction_body_atr = reaction_body / atr;
        let score = quality_score(reaction_body_atr);

        let structure = Structure {
            id: deterministic_id(
                series.symbol(),
                bar_index,
                direction,
                StructureType::Rejection,
            ),
            structure_type: StructureType::Rejection,
            symbol: series.symbol().to_string(),
            timeframe: series.timeframe().to_string(),
            origin_index: bar_index,
            start_bar: prev.clone(),
            end_bar: curr.clone(),
            high_price: prev.high.max(curr.high),
            low_price: prev.low.min(curr.low),
            direction,
            quality: StructureQuality::Medium,
            quality_score: score,
            lifecycle: LifecycleState::Unfilled,
            created_at: curr.timestamp,
            session_id: session_id.to_string(),
            metadata: [
                (
                    "reaction_body_atr".to_string(),
                    json!(reaction_body_atr.to_string()),
                ),
                (
                    "follow_through".to_string(),
                    json!(follow_through.to_string()),
                ),
                ("atr".to_string(), json!(atr.to_string())),
            ]
            .into_iter()
            .collect(),
        };

        debug!(
            symbol = series.symbol(),
            direction = %direction,
            reaction_body_atr = %reaction_body_atr,
            follow_through = %follow_through,
            "uzr_detected"
        );

        vec![structure]
    }

    fn stats(&self) -> DetectorStats {
        self.stats
    }
}

// =============================================================================
// Tests
// =============================================================================
