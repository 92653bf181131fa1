// =============================================================================
// Market structure model and detector framework
// =============================================================================
//
// A `Structure` is an immutable value object produced by a detector and
// consumed by the exit planner. Structure IDs are content hashes, so two runs
// over the same bars produce identical IDs — the replay contract depends on
// this.
// =============================================================================

pub mod break_of_structure;
pub mod engulfing;
pub mod fair_value_gap;
pub mod manager;
pub mod order_block;
pub mod rejection;
pub mod sweep;

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::market_data::{Bar, BarSeries};
use crate::types::Direction;

pub use manager::StructureManager;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    OrderBlock,
    FairValueGap,
    BreakOfStructure,
    Sweep,
    Rejection,
    Engulfing,
}

impl StructureType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OrderBlock => "order_block",
            Self::FairValueGap => "fair_value_gap",
            Self::BreakOfStructure => "break_of_structure",
            Self::Sweep => "sweep",
            Self::Rejection => "rejection",
            Self::Engulfing => "engulfing",
        }
    }
}

impl std::fmt::Display for StructureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StructureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_block" => Ok(Self::OrderBlock),
            "fair_value_gap" => Ok(Self::FairValueGap),
            "break_of_structure" => Ok(Self::BreakOfStructure),
            "sweep" => Ok(Self::Sweep),
            "rejection" => Ok(Self::Rejection),
            "engulfing" => Ok(Self::Engulfing),
            other => Err(format!("unknown structure type `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureQuality {
    Premium,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unfilled,
    Partial,
    Filled,
    Expired,
    FollowedThrough,
}

// ---------------------------------------------------------------------------
// Structure record
// ---------------------------------------------------------------------------

/// An immutable detected market structure.
///
/// `high_price` / `low_price` bound the structure's zone and are always
/// ordered (`high_price >= low_price`), regardless of direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Structure {
    /// Deterministic 16-char hex id.
    pub id: String,
    pub structure_type: StructureType,
    pub symbol: String,
    pub timeframe: String,
    /// Monotone bar index where the structure originated.
    pub origin_index: u64,
    pub start_bar: Bar,
    pub end_bar: Bar,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub direction: Direction,
    pub quality: StructureQuality,
    pub quality_score: Decimal,
    pub lifecycle: LifecycleState,
    pub created_at: DateTime<Utc>,
    pub session_id: String,
    /// Ordered so serialised structures are bit-identical across runs.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Structure {
    pub fn is_bullish(&self) -> bool {
        self.direction == Direction::Bullish
    }

    pub fn price_range(&self) -> Decimal {
        self.high_price - self.low_price
    }

    pub fn midpoint(&self) -> Decimal {
        (self.high_price + self.low_price) / Decimal::TWO
    }
}

/// Deterministic structure id: first 16 hex chars of
/// sha256("{symbol}_{origin_index}_{direction}_{type}").
pub fn deterministic_id(
    symbol: &str,
    origin_index: u64,
    direction: Direction,
    structure_type: StructureType,
) -> String {
    let key = format!("{symbol}_{origin_index}_{direction}_{structure_type}");
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Shared quality scoring curve: 0.60 base plus 0.15 per unit of the
/// detector-specific ATR ratio, capped at 0.95.
pub fn quality_score(ratio: Decimal) -> Decimal {
    (dec!(0.60) + ratio * dec!(0.15)).min(dec!(0.95))
}

// ---------------------------------------------------------------------------
// Detector framework
// ---------------------------------------------------------------------------

/// Bars-evaluated / structures-emitted counters per detector.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DetectorStats {
    pub seen: u64,
    pub fired: u64,
}

/// A structure detector. Detectors are stateful (debounce memory, counters)
/// and evaluated once per closed bar.
pub trait StructureDetector: Send {
    fn name(&self) -> &'static str;

    fn structure_type(&self) -> StructureType;

    /// Evaluate the series and return any structures confirmed on the most
    /// recent bar.
    fn detect(&mut self, series: &BarSeries, session_id: &str) -> Vec<Structure>;

    fn stats(&self) -> DetectorStats;
}

/// Per-direction debounce memory shared by all detectors.
///
/// A detector must not re-fire the same direction within `debounce_bars` of
/// its previous fire at the same direction.
#[derive(Debug, Default)]
pub struct Debounce {
    last_bullish: Option<u64>,
    last_bearish: Option<u64>,
}

impl Debounce {
    pub fn blocked(&self, direction: Direction, bar_index: u64, debounce_bars: u64) -> bool {
        let last = match direction {
            Direction::Bullish => self.last_bullish,
            Direction::Bearish => self.last_bearish,
        };
        match last {
            Some(last) => bar_index.saturating_sub(last) < debounce_bars,
            None => false,
        }
    }

    pub fn mark(&mut self, direction: Direction, bar_index: u64) {
        match direction {
            Direction::Bullish => self.last_bullish = Some(bar_index),
            Direction::Bearish => self.last_bearish = Some(bar_index),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_id_is_deterministic_and_16_chars() {
        let a = deterministic_id("EURUSD", 42, Direction::Bullish, StructureType::OrderBlock);
        let b = deterministic_id("EURUSD", 42, Direction::Bullish, StructureType::OrderBlock);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn structure_id_varies_with_every_key_component() {
        let base = deterministic_id("EURUSD", 42, Direction::Bullish, StructureType::OrderBlock);
        assert_ne!(
            base,
            deterministic_id("GBPUSD", 42, Direction::Bullish, StructureType::OrderBlock)
        );
        assert_ne!(
            base,
            deterministic_id("EURUSD", 43, Direction::Bullish, StructureType::OrderBlock)
        );
        assert_ne!(
            base,
            deterministic_id("EURUSD", 42, Direction::Bearish, StructureType::OrderBlock)
        );
        assert_ne!(
            base,
            deterministic_id("EURUSD", 42, Direction::Bullish, StructureType::Sweep)
        );
    }

    #[test]
    fn quality_score_curve() {
        assert_eq!(quality_score(dec!(0)), dec!(0.60));
        assert_eq!(quality_score(dec!(1)), dec!(0.75));
        // Large ratios saturate at 0.95.
        assert_eq!(quality_score(dec!(10)), dec!(0.95));
    }

    #[test]
    fn debounce_is_per_direction() {
        let mut debounce = Debounce::default();
        debounce.mark(Direction::Bullish, 10);

        assert!(debounce.blocked(Direction::Bullish, 12, 3));
        assert!(!debounce.blocked(Direction::Bearish, 12, 3));
        assert!(!debounce.blocked(Direction::Bullish, 13, 3));
    }

    #[test]
    fn structure_type_round_trips_through_str() {
        for st in [
            StructureType::OrderBlock,
            StructureType::FairValueGap,
            StructureType::BreakOfStructure,
            StructureType::Sweep,
            StructureType::Rejection,
            StructureType::Engulfing,
        ] {
            assert_eq!(st.as_str().parse::<StructureType>().unwrap(), st);
        }
    }
}
