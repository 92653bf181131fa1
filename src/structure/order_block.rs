// =============================================================================
// Order Block (OB) detector
// =============================================================================
//
// An order block is a strong displacement bar whose close is broken by the
// next bar: institutional interest left behind at the displacement zone.
//
// Pattern on the last two bars:
//   bullish — prev body >= k*ATR and current close breaks above prev high
//   bearish — prev body >= k*ATR and current close breaks below prev low
// =============================================================================

use rust_decimal::Decimal;
use serde_json::json;
use tracing::debug;

use crate::config::OrderBlockConfig;
use crate::errors::ConfigError;
use crate::indicators::atr::compute_atr;
use crate::market_data::BarSeries;
use crate::types::Direction;

use super::{
    deterministic_id, quality_score, Debounce, DetectorStats, LifecycleState, Structure,
    StructureDetector, StructureQuality, StructureType,
};

pub struct OrderBlockDetector {
    cfg: OrderBlockConfig,
    stats: DetectorStats,
    debounce: Debounce,
}

impl OrderBlockDetector {
    pub fn new(cfg: OrderBlockConfig) -> Result<Self, ConfigError> {
        if cfg.displacement_min_body_atr < Decimal::ZERO {
            return Err(ConfigError::invalid(
                "order_block.displacement_min_body_atr",
                "must be >= 0",
            ));
        }
        if cfg.atr_window == 0 {
            return Err(ConfigError::invalid("order_block.atr_window", "must be > 0"));
        }
        Ok(Self {
            cfg,
            stats: DetectorStats::default(),
            debounce: Debounce::default(),
        })
    }
}

impl StructureDetector for OrderBlockDetector {
    fn name(&self) -> &'static str {
        "OrderBlockDetector"
    }

    fn structure_type(&self) -> StructureType {
        StructureType::OrderBlock
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

        let prev = &bars[bars.len() - 2];
        let curr = &bars[bars.len() - 1];
        let prev_body = prev.body();

        let displaced = prev_body >= self.cfg.displacement_min_body_atr * atr;
        let direction = if displaced && curr.close > prev.high {
            Direction::Bullish
        } else if displaced && curr.close < prev.low {
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

        let body_atr = prev_body / atr;
        let score = quality_score(body_atr);
        let origin_index = bar_index - 1;

        let structure = Structure {
            id: deterministic_id(series.symbol(), origin_index, direction, StructureType::OrderBlock),
            structure_type: StructureType::OrderBlock,
            symbol: series.symbol().to_string(),
            timeframe: series.timeframe().to_string(),
            origin_index,
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
                ("atr".to_string(), json!(atr.to_string())),
            ]
            .into_iter()
            .collect(),
        };

        debug!(
            symbol = series.symbol(),
            direction = %direction,
            quality_score = %score,
            "ob_detected"
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
