// =============================================================================
// Break of Structure (BOS) detector
// =============================================================================
//
// A close beyond the rolling pivot extreme of the last `pivot_window` bars,
// read as trend continuation:
//   bullish — current close > pivot high
//   bearish — current close < pivot low
// =============================================================================

use serde_json::json;
use tracing::debug;

use crate::config::BreakOfStructureConfig;
use crate::errors::ConfigError;
use crate::indicators::atr::compute_atr;
use crate::market_data::BarSeries;
use crate::types::Direction;

use super::{
    deterministic_id, quality_score, Debounce, DetectorStats, LifecycleState, Structure,
    StructureDetector, StructureQuality, StructureType,
};

pub struct BreakOfStructureDetector {
    cfg: BreakOfStructureConfig,
    stats: DetectorStats,
    debounce: Debounce,
}

impl BreakOfStructureDetector {
    pub fn new(cfg: BreakOfStructureConfig) -> Result<Self, ConfigError> {
        if cfg.pivot_window < 2 {
            return Err(ConfigError::invalid(
                "break_of_structure.pivot_window",
                "must be >= 2",
            ));
        }
        if cfg.atr_window == 0 {
            return Err(ConfigError::invalid(
                "break_of_structure.atr_window",
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

impl StructureDetector for BreakOfStructureDetector {
    fn name(&self) -> &'static str {
        "BreakOfStructureDetector"
    }

    fn structure_type(&self) -> StructureType {
        StructureType::BreakOfStructure
    }

    fn detect(&mut self, series: &BarSeries, session_id: &str) -> Vec<Structure> {
        if !self.cfg.enabled || series.len() < self.cfg.pivot_window + 2 {
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

        // Pivot extremes over the window immediately preceding the current bar.
        let pivot_bars = &bars[bars.len() - 1 - self.cfg.pivot_window..bars.len() - 1];
        let pivot_high = pivot_bars.iter().map(|b| b.high).max().expect("non-empty window");
        let pivot_low = pivot_bars.iter().map(|b| b.low).min().expect("non-empty window");

        let curr = &bars[bars.len() - 1];
        let direction = if curr.close > pivot_high {
            Direction::Bullish
        } else if curr.close < pivot_low {
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

        let break_strength = match direction {
            Direction::Bullish => curr.close - pivot_high,
            Direction::Bearish => pivot_low - curr.close,
        };
        let score = quality_score(break_strength / atr);

        let structure = Structure {
            id: deterministic_id(
                series.symbol(),
                bar_index,
                direction,
                StructureType::BreakOfStructure,
            ),
            structure_type: StructureType::BreakOfStructure,
            symbol: series.symbol().to_string(),
            timeframe: series.timeframe().to_string(),
            origin_index: bar_index,
            start_bar: bars[bars.len() - 1 - self.cfg.pivot_window].clone(),
            end_bar: curr.clone(),
            high_price: pivot_high,
            low_price: pivot_low,
            direction,
            quality: StructureQuality::Medium,
            quality_score: score,
            lifecycle: LifecycleState::Unfilled,
            created_at: curr.timestamp,
            session_id: session_id.to_string(),
            metadata: [
                ("pivot_high".to_string(), json!(pivot_high.to_string())),
                ("pivot_low".to_string(), json!(pivot_low.to_string())),
                (
                    "break_strength".to_string(),
                    json!(break_strength.to_string()),
                ),
            ]
            .into_iter()
            .collect(),
        };

        debug!(
            symbol = series.symbol(),
            direction = %direction,
            break_strength = %break_strength,
            "bos_detected"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Bar;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn series_from(rows: &[(Decimal, Decimal, Decimal, Decimal)]) -> BarSeries {
        let mut series = BarSeries::new("EURUSD", "M15", 500);
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap();
        for (i, (open, high, low, close)) in rows.iter().enumerate() {
            let bar = Bar::new(
                *open,
                *high,
                *low,
                *close,
                dec!(1000),
                start + chrono::Duration::minutes(15 * i as i64),
            )
            .unwrap();
            series.push(bar).unwrap();
        }
        series
    }

    #[test]
    fn detects_bullish_break_of_pivot_high() {
        let mut rows: Vec<(Decimal, Decimal, Decimal, Decimal)> = (0..20)
            .map(|_| (dec!(1.1000), dec!(1.1010), dec!(1.0990), dec!(1.1005)))
            .collect();
        // Close decisively above the 1.1010 pivot high.
        rows.push((dec!(1.1005), dec!(1.1040), dec!(1.1000), dec!(1.1035)));
        let series = series_from(&rows);

        let mut detector =
            BreakOfStructureDetector::new(BreakOfStructureConfig::default()).unwrap();
        let structures = detector.detect(&series, "s1");

        assert_eq!(structures.len(), 1);
        let s = &structures[0];
        assert_eq!(s.direction, Direction::Bullish);
        assert_eq!(s.high_price, dec!(1.1010));
        assert_eq!(s.low_price, dec!(1.0990));
    }

    #[test]
    fn detects_bearish_break_of_pivot_low() {
        let mut rows: Vec<(Decimal, Decimal, Decimal, Decimal)> = (0..20)
            .map(|_| (dec!(1.1000), dec!(1.1010), dec!(1.0990), dec!(1.1005)))
            .collect();
        rows.push((dec!(1.1000), dec!(1.1005), dec!(1.0960), dec!(1.0965)));
        let series = series_from(&rows);

        let mut detector =
            BreakOfStructureDetector::new(BreakOfStructureConfig::default()).unwrap();
        let structures = detector.detect(&series, "s1");
        assert_eq!(structures.len(), 1);
        assert_eq!(structures[0].direction, Direction::Bearish);
    }

    #[test]
    fn close_inside_pivot_range_is_quiet() {
        let rows: Vec<(Decimal, Decimal, Decimal, Decimal)> = (0..22)
            .map(|_| (dec!(1.1000), dec!(1.1010), dec!(1.0990), dec!(1.1005)))
            .collect();
        let series = series_from(&rows);
        let mut detector =
            BreakOfStructureDetector::new(BreakOfStructureConfig::default()).unwrap();
        assert!(detector.detect(&series, "s1").is_empty());
    }

    #[test]
    fn rejects_pivot_window_below_two() {
        let mut cfg = BreakOfStructureConfig::default();
        cfg.pivot_window = 1;
        assert!(BreakOfStructureDetector::new(cfg).is_err());
    }
}
