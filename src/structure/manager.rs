// =============================================================================
// Structure Manager — coordinates all detectors
// =============================================================================
//
// Instantiates enabled detectors from config and runs them per bar. A single
// detector's failure never aborts the bar: errors are logged and the other
// detectors continue.
// =============================================================================

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::DetectorsConfig;
use crate::errors::ConfigError;
use crate::market_data::BarSeries;

use super::break_of_structure::BreakOfStructureDetector;
use super::engulfing::EngulfingDetector;
use super::fair_value_gap::FairValueGapDetector;
use super::order_block::OrderBlockDetector;
use super::rejection::RejectionDetector;
use super::sweep::SweepDetector;
use super::{Structure, StructureDetector};

/// Per-detector activity summary for end-of-session reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorSummary {
    pub name: String,
    pub seen: u64,
    pub fired: u64,
}

pub struct StructureManager {
    detectors: Vec<Box<dyn StructureDetector>>,
}

impl StructureManager {
    /// Build all enabled detectors. Fails fast on invalid parameters or
    /// duplicate detector names.
    pub fn new(cfg: &DetectorsConfig) -> Result<Self, ConfigError> {
        let mut detectors: Vec<Box<dyn StructureDetector>> = Vec::new();

        if cfg.order_block.enabled {
            detectors.push(Box::new(OrderBlockDetector::new(cfg.order_block.clone())?));
        }
        if cfg.fair_value_gap.enabled {
            detectors.push(Box::new(FairValueGapDetector::new(
                cfg.fair_value_gap.clone(),
            )?));
        }
        if cfg.break_of_structure.enabled {
            detectors.push(Box::new(BreakOfStructureDetector::new(
                cfg.break_of_structure.clone(),
            )?));
        }
        if cfg.sweep.enabled {
            detectors.push(Box::new(SweepDetector::new(cfg.sweep.clone())?));
        }
        if cfg.rejection.enabled {
            detectors.push(Box::new(RejectionDetector::new(cfg.rejection.clone())?));
        }
        if cfg.engulfing.enabled {
            detectors.push(Box::new(EngulfingDetector::new(cfg.engulfing.clone())?));
        }

        let mut names: Vec<&str> = detectors.iter().map(|d| d.name()).collect();
        names.sort_unstable();
        for pair in names.windows(2) {
            if pair[0] == pair[1] {
                return Err(ConfigError::DuplicateDetector(pair[0].to_string()));
            }
        }

        info!(
            count = detectors.len(),
            names = ?detectors.iter().map(|d| d.name()).collect::<Vec<_>>(),
            "structure detectors initialised"
        );

        Ok(Self { detectors })
    }

    /// Run every detector against the series. Individual detector panics are
    /// contained and logged; remaining detectors still run.
    pub fn detect_structures(&mut self, series: &BarSeries, session_id: &str) -> Vec<Structure> {
        let mut all = Vec::new();

        for detector in &mut self.detectors {
            let name = detector.name();
            match catch_unwind(AssertUnwindSafe(|| detector.detect(series, session_id))) {
                Ok(structures) => all.extend(structures),
                Err(_) => {
                    warn!(detector = name, symbol = series.symbol(), "detector panicked; skipped");
                }
            }
        }

        all
    }

    /// Seen/fired counters for every detector.
    pub fn summary(&self) -> Vec<DetectorSummary> {
        self.detectors
            .iter()
            .map(|d| {
                let stats = d.stats();
                DetectorSummary {
                    name: d.name().to_string(),
                    seen: stats.seen,
                    fired: stats.fired,
                }
            })
            .collect()
    }

    pub fn log_summary(&self) {
        for summary in self.summary() {
            info!(
                detector = %summary.name,
                seen = summary.seen,
                fired = summary.fired,
                "detector_summary"
            );
        }
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

    fn quiet_series(len: usize) -> BarSeries {
        let mut series = BarSeries::new("EURUSD", "M15", 500);
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap();
        for i in 0..len {
            let bar = Bar::new(
                dec!(1.1000),
                dec!(1.1010),
                dec!(1.0990),
                dec!(1.1005),
                dec!(1000),
                start + chrono::Duration::minutes(15 * i as i64),
            )
            .unwrap();
            series.push(bar).unwrap();
        }
        series
    }

    #[test]
    fn builds_all_six_detectors_by_default() {
        let manager = StructureManager::new(&DetectorsConfig::default()).unwrap();
        assert_eq!(manager.summary().len(), 6);
    }

    #[test]
    fn disabled_detectors_are_not_built() {
        let mut cfg = DetectorsConfig::default();
        cfg.sweep.enabled = false;
        cfg.engulfing.enabled = false;
        let manager = StructureManager::new(&cfg).unwrap();
        assert_eq!(manager.summary().len(), 4);
    }

    #[test]
    fn invalid_detector_config_fails_fast() {
        let mut cfg = DetectorsConfig::default();
        cfg.rejection.weights.context_bonus = dec!(0.5);
        assert!(StructureManager::new(&cfg).is_err());
    }

    #[test]
    fn quiet_series_produces_no_structures_but_counts_seen() {
        let mut manager = StructureManager::new(&DetectorsConfig::default()).unwrap();
        let series = quiet_series(60);
        let structures = manager.detect_structures(&series, "s1");
        assert!(structures.is_empty());
        for summary in manager.summary() {
            assert_eq!(summary.fired, 0, "{} fired unexpectedly", summary.name);
            assert!(summary.seen > 0, "{} never evaluated", summary.name);
        }
    }

    #[test]
    fn detection_is_deterministic_across_managers() {
        // Displacement + break at the end of a quiet series triggers at least
        // the order-block detector; two fresh managers must agree exactly.
        let mut series = quiet_series(30);
        let start_ts = series.last().unwrap().timestamp;
        let displacement = Bar::new(
            dec!(1.1000),
            dec!(1.1045),
            dec!(1.0995),
            dec!(1.1040),
            dec!(1000),
            start_ts + chrono::Duration::minutes(15),
        )
        .unwrap();
        let breaker = Bar::new(
            dec!(1.1040),
            dec!(1.1060),
            dec!(1.1035),
            dec!(1.1055),
            dec!(1000),
            start_ts + chrono::Duration::minutes(30),
        )
        .unwrap();
        series.push(displacement).unwrap();
        series.push(breaker).unwrap();

        let mut a = StructureManager::new(&DetectorsConfig::default()).unwrap();
        let mut b = StructureManager::new(&DetectorsConfig::default()).unwrap();
        let sa = a.detect_structures(&series, "s1");
        let sb = b.detect_structures(&series, "s1");

        assert!(!sa.is_empty());
        let ids_a: Vec<&str> = sa.iter().map(|s| s.id.as_str()).collect();
        let ids_b: Vec<&str> = sb.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
