// =============================================================================
// Liquidity Sweep detector
// =============================================================================
//
// A wick penetration of the prior bar's extreme followed by a close back
// across the prior close — resting liquidity taken, then rejected:
//   bullish — current low under prev low, close back above prev close
//   bearish — current high over prev high, close back below prev close
// =============================================================================

use serde_json::json;
use tracing::debug;

use crate::config::SweepConfig;
use crate::errors::ConfigError;
use crate::indicators::atr::compute_atr;
use crate::market_data::BarSeries;
use crate::types::Direction;

use super::{
    deterministic_id, quality_score, Debounce, DetectorStats, LifecycleState, Structure,
    StructureDetector, StructureQuality, StructureType,
};

pub struct SweepDetector {
    cfg: SweepConfig,
    stats: DetectorStats,
    debounce: Debounce,
}

impl SweepDetector {
    pub fn new(cfg: SweepConfig) -> Result<Self, ConfigError> {
        if cfg.atr_window == 0 {
            return Err(ConfigError::invalid("sweep.atr_window", "must be > 0"));
        }
        Ok(Self {
            cfg,
            stats: DetectorStats::default(),
            debounce: Debounce::default(),
        })
    }
}

impl StructureDetector for SweepDetector {
    fn name(&self) -> &'static str {
        "SweepDetector"
    }

    fn structure_type(&self) -> StructureType {
        StructureType::Sweep
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

        let (direction, penetration) = if curr.low < prev.low && curr.close > prev.close {
            (Direction::Bullish, prev.low - curr.low)
        } else if curr.high > prev.high && curr.close < prev.close {
            (Direction::Bearish, curr.high - prev.high)
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

        let penetration_atr = penetration / atr;
        let score = quality_score(penetration_atr);

        let structure = Structure {
            id: deterministic_id(series.symbol(), bar_index, direction, StructureType::Sweep),
            structure_type: StructureType::Sweep,
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
                    "penetration_atr".to_string(),
                    json!(penetration_atr.to_string()),
                ),
                ("atr".to_string(), json!(atr.to_string())),
            ]
            .into_iter()
            .collect(),
        };

        debug!(
            symbol = series.symbol(),
            direction = %direction,
            penetration = %penetration,
            "sweep_detected"
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
    fn detects_bullish_sweep_of_prior_low() {
        let mut rows: Vec<(Decimal, Decimal, Decimal, Decimal)> = (0..20)
            .map(|_| (dec!(1.1000), dec!(1.1010), dec!(1.0990), dec!(1.1005)))
            .collect();
        // Wick below 1.0990, close back above prev close 1.1005.
        rows.push((dec!(1.1000), dec!(1.1015), dec!(1.0975), dec!(1.1012)));
        let series = series_from(&rows);

        let mut detector = SweepDetector::new(SweepConfig::default()).unwrap();
        let structures = detector.detect(&series, "s1");
        assert_eq!(structures.len(), 1);
        assert_eq!(structures[0].direction, Direction::Bullish);
    }

    #[test]
    fn detects_bearish_sweep_of_prior_high() {
        let mut rows: Vec<(Decimal, Decimal, Decimal, Decimal)> = (0..20)
            .map(|_| (dec!(1.1000), dec!(1.1010), dec!(1.0990), dec!(1.1005)))
            .collect();
        rows.push((dec!(1.1005), dec!(1.1030), dec!(1.0992), dec!(1.0998)));
        let series = series_from(&rows);

        let mut detector = SweepDetector::new(SweepConfig::default()).unwrap();
        let structures = detector.detect(&series, "s1");
        assert_eq!(structures.len(), 1);
        assert_eq!(structures[0].direction, Direction::Bearish);
    }

    #[test]
    fn penetration_without_rejection_close_is_quiet() {
        let mut rows: Vec<(Decimal, Decimal, Decimal, Decimal)> = (0..20)
            .map(|_| (dec!(1.1000), dec!(1.1010), dec!(1.0990), dec!(1.1005)))
            .collect();
        // Breaks the low but keeps closing weak — a breakdown, not a sweep.
        rows.push((dec!(1.1000), dec!(1.1005), dec!(1.0975), dec!(1.0980)));
        let series = series_from(&rows);

        let mut detector = SweepDetector::new(SweepConfig::default()).unwrap();
        assert!(detector.detect(&series, "s1").is_empty());
    }
}
