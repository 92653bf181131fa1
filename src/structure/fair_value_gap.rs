// =============================================================================
// Fair Value Gap (FVG) detector
// =============================================================================
//
// A three-bar pattern with an unfilled price gap:
//   bullish — bar1.high < bar3.low  (gap between bar1 and bar3)
//   bearish — bar1.low  > bar3.high
//
// Gaps smaller than `min_gap_atr_multiplier * ATR` are noise and ignored.
// =============================================================================

use rust_decimal::Decimal;
use serde_json::json;
use tracing::debug;

use crate::config::FairValueGapConfig;
use crate::errors::ConfigError;
use crate::indicators::atr::compute_atr;
use crate::market_data::BarSeries;
use crate::types::Direction;

use super::{
    deterministic_id, quality_score, Debounce, DetectorStats, LifecycleState, Structure,
    StructureDetector, StructureQuality, StructureType,
};

pub struct FairValueGapDetector {
    cfg: FairValueGapConfig,
    stats: DetectorStats,
    debounce: Debounce,
}

impl FairValueGapDetector {
    pub fn new(cfg: FairValueGapConfig) -> Result<Self, ConfigError> {
        if cfg.min_gap_atr_multiplier < Decimal::ZERO {
            return Err(ConfigError::invalid(
                "fair_value_gap.min_gap_atr_multiplier",
                "must be >= 0",
            ));
        }
        if cfg.atr_window == 0 {
            return Err(ConfigError::invalid(
                "fair_value_gap.atr_window",
                "must be > 0",
            ));
        }
        Ok(Self {
            cfg,
            stats: DetectorStats::default(),
            debounce: Debounce::default(),
        })
    }
}

impl StructureDetector for FairValueGapDetector {
    fn name(&self) -> &'static str {
        "FairValueGapDetector"
    }

    fn structure_type(&self) -> StructureType {
        StructureType::FairValueGap
    }

    fn detect(&mut self, series: &BarSeries, session_id: &str) -> Vec<Structure> {
        if !self.cfg.enabled || series.len() < 3 {
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

        let bar1 = &bars[bars.len() - 3];
        let bar3 = &bars[bars.len() - 1];

        // The gap zone: [bar1.high, bar3.low] bullish, [bar3.high, bar1.low]
        // bearish. At most one side can hold for a given triple.
        let (direction, gap_low, gap_high) = if bar1.high < bar3.low {
            (Direction::Bullish, bar1.high, bar3.low)
        } else if bar1.low > bar3.high {
            (Direction::Bearish, bar3.high, bar1.low)
        } else {
            return Vec::new();
        };

        let gap_size = gap_high - gap_low;
        if gap_size < self.cfg.min_gap_atr_multiplier * atr {
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

        let gap_atr = gap_size / atr;
        let score = quality_score(gap_atr);
        let origin_index = bar_index - 1;

        let structure = Structure {
            id: deterministic_id(
                series.symbol(),
                origin_index,
                direction,
                StructureType::FairValueGap,
            ),
            structure_type: StructureType::FairValueGap,
            symbol: series.symbol().to_string(),
            timeframe: series.timeframe().to_string(),
            origin_index,
            start_bar: bar1.clone(),
            end_bar: bar3.clone(),
            high_price: gap_high,
            low_price: gap_low,
            direction,
            quality: StructureQuality::High,
            quality_score: score,
            lifecycle: LifecycleState::Unfilled,
            created_at: bar3.timestamp,
            session_id: session_id.to_string(),
            metadata: [
                ("gap_size".to_string(), json!(gap_size.to_string())),
                ("gap_atr".to_string(), json!(gap_atr.to_string())),
                ("atr".to_string(), json!(atr.to_string())),
            ]
            .into_iter()
            .collect(),
        };

        debug!(
            symbol = series.symbol(),
            direction = %direction,
            gap_size = %gap_size,
            quality_score = %score,
            "fvg_detected"
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
