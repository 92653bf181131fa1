// =============================================================================
// Engulfing pattern detector
// =============================================================================
//
// The current bar's body fully engulfs the prior bar's body, with a body of
// at least `min_body_atr * ATR` and a body-to-range ratio of at least
// `min_body_to_range` (a conviction bar, not a wick).
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::debug;

use crate::config::EngulfingConfig;
use crate::errors::ConfigError;
use crate::indicators::atr::compute_atr;
use crate::market_data::BarSeries;
use crate::types::Direction;

use super::{
    deterministic_id, Debounce, DetectorStats, LifecycleState, Structure, StructureDetector,
    StructureQuality, StructureType,
};

pub struct EngulfingDetector {
    cfg: EngulfingConfig,
    stats: DetectorStats,
    debounce: Debounce,
}

impl EngulfingDetector {
    pub fn new(cfg: EngulfingConfig) -> Result<Self, ConfigError> {
        if cfg.min_body_atr < Decimal::ZERO {
            return Err(ConfigError::invalid("engulfing.min_body_atr", "must be >= 0"));
        }
        if cfg.min_body_to_range < Decimal::ZERO || cfg.min_body_to_range > Decimal::ONE {
            return Err(ConfigError::invalid(
                "engulfing.min_body_to_range",
                "must be within [0, 1]",
            ));
        }
        if cfg.atr_window == 0 {
            return Err(ConfigError::invalid("engulfing.atr_window", "must be > 0"));
        }
        Ok(Self {
            cfg,
            stats: DetectorStats::default(),
            debounce: Debounce::default(),
        })
    }
}

impl StructureDetector for EngulfingDetector {
    fn name(&self) -> &'static str {
        "EngulfingDetector"
    }

    fn structure_type(&self) -> StructureType {
        StructureType::Engulfing
    }

    fn detect(&mut self, series: &BarSeries, session_id: &str) -> Vec<Structure> {
        if !self.cfg.enabled || series.len() < 2 {
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

        let prev_body = prev.body();
        let curr_body = curr.body();
        let curr_range = curr.range();

        if curr_range.is_zero() {
            return Vec::new();
        }

        let strong_body = curr_body > prev_body
            && curr_body >= self.cfg.min_body_atr * atr
            && curr_body / curr_range >= self.cfg.min_body_to_range;

        let direction = if strong_body && curr.close > prev.open && curr.open < prev.close {
            Direction::Bullish
        } else if strong_body && curr.close < prev.open && curr.open > prev.close {
            Direction::Bearish
        } else {
            return Vec::new();
        };

        if self
            .debounce
            .blocked(direction, bar_index, self.cfg.debounce_bars as u64)
        {
            return Vec::new();
        }

        self.stats.fired += 1;
        self.debounce.mark(direction, bar_index);

        // Engulfing carries a higher base than the other detectors: the
        // pattern already implies displacement.
        let body_atr = curr_body / atr;
        let score = (dec!(0.70) + body_atr * dec!(0.10)).min(dec!(0.95));

        let structure = Structure {
            id: deterministic_id(series.symbol(), bar_index, direction, StructureType::Engulfing),
            structure_type: StructureType::Engulfing,
            symbol: series.symbol().to_string(),
            timeframe: series.timeframe().to_string(),
            origin_index: bar_index,
            start_bar: prev.clone(),
            end_bar: curr.clone(),
            high_price: prev.high.max(curr.high),
            low_price: prev.low.min(curr.low),
            direction,
            quality: StructureQuality::High,
            quality_score: score,
            lifecycle: LifecycleState::Unfilled,
            created_at: curr.timestamp,
            session_id: session_id.to_string(),
            metadata: [
                ("body_atr".to_string(), json!(body_atr.to_string())),
                (
                    "body_to_range".to_string(),
                    json!((curr_body / curr_range).to_string()),
                ),
                ("atr".to_string(), json!(atr.to_string())),
            ]
            .into_iter()
            .collect(),
        };

        debug!(
            symbol = series.symbol(),
            structure_id = %structure.id,
            direction = %direction,
            quality_score = %score,
            "engulfing_detected"
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
