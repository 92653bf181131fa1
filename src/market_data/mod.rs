// =============================================================================
// Bar model — fixed-decimal OHLCV bars and per-symbol series
// =============================================================================
//
// All prices, volumes and distances are `rust_decimal::Decimal`. Binary
// floating point never touches a price.
//
// Invariants enforced at construction:
//   low <= min(open, close) <= max(open, close) <= high
//   volume >= 0
//   strictly increasing UTC timestamps within a series
// =============================================================================

pub mod sources;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::DataError;

pub use sources::{CsvReplay, MarketData, SyntheticFeed};

// ---------------------------------------------------------------------------
// Bar
// ---------------------------------------------------------------------------

/// A single immutable OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Bar {
    /// Build a bar, validating the OHLC invariants.
    pub fn new(
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, DataError> {
        if high < low {
            return Err(DataError::OhlcInvariant(format!(
                "high {high} < low {low}"
            )));
        }
        if high < open || high < close {
            return Err(DataError::OhlcInvariant(format!(
                "high {high} < open {open} or close {close}"
            )));
        }
        if low > open || low > close {
            return Err(DataError::OhlcInvariant(format!(
                "low {low} > open {open} or close {close}"
            )));
        }
        if volume < Decimal::ZERO {
            return Err(DataError::NegativeVolume(volume.to_string()));
        }

        Ok(Self {
            open,
            high,
            low,
            close,
            volume,
            timestamp,
        })
    }

    /// Absolute body size |close - open|.
    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    /// Full bar range high - low.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

// ---------------------------------------------------------------------------
// BarSeries
// ---------------------------------------------------------------------------

/// Ordered, fixed-timeframe sequence of bars for one symbol.
///
/// Retains at most `max_bars` bars; the oldest are dropped as new bars arrive,
/// keeping memory bounded over a long session.
#[derive(Debug, Clone)]
pub struct BarSeries {
    symbol: String,
    timeframe: String,
    bars: Vec<Bar>,
    max_bars: usize,
    total_pushed: u64,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>, max_bars: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            bars: Vec::with_capacity(max_bars.min(1024)),
            max_bars,
            total_pushed: 0,
        }
    }

    /// Append a bar, enforcing strictly increasing timestamps.
    pub fn push(&mut self, bar: Bar) -> Result<(), DataError> {
        if let Some(last) = self.bars.last() {
            if bar.timestamp <= last.timestamp {
                return Err(DataError::NonMonotonicTimestamp {
                    symbol: self.symbol.clone(),
                    prev: last.timestamp.to_rfc3339(),
                    next: bar.timestamp.to_rfc3339(),
                });
            }
        }
        self.bars.push(bar);
        self.total_pushed += 1;
        if self.bars.len() > self.max_bars {
            self.bars.remove(0);
        }
        Ok(())
    }

    /// Total number of bars ever pushed, unaffected by ring trimming.
    ///
    /// Detectors key debounce state and structure origins off this counter so
    /// that behaviour does not change once the retention cap is reached.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Monotone index of the most recent bar (`total_pushed - 1`).
    pub fn current_index(&self) -> Option<u64> {
        self.total_pushed.checked_sub(1)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }
}

// ---------------------------------------------------------------------------
// Price quantization
// ---------------------------------------------------------------------------

/// Round a price to the nearest multiple of `point`, half-up.
///
/// Returns the price unchanged when `point` is zero (degenerate metadata).
pub fn round_to_point(price: Decimal, point: Decimal) -> Decimal {
    if point.is_zero() {
        return price;
    }
    let units = (price / point).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    units * point
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, minute, 0).unwrap()
    }

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal, minute: u32) -> Bar {
        Bar::new(open, high, low, close, dec!(100), ts(minute)).unwrap()
    }

    #[test]
    fn bar_rejects_high_below_low() {
        let err = Bar::new(dec!(1.1), dec!(1.0), dec!(1.2), dec!(1.1), dec!(1), ts(0));
        assert!(err.is_err());
    }

    #[test]
    fn bar_rejects_close_above_high() {
        let err = Bar::new(dec!(1.1), dec!(1.15), dec!(1.05), dec!(1.2), dec!(1), ts(0));
        assert!(err.is_err());
    }

    #[test]
    fn bar_rejects_negative_volume() {
        let err = Bar::new(dec!(1.1), dec!(1.2), dec!(1.0), dec!(1.1), dec!(-1), ts(0));
        assert!(err.is_err());
    }

    #[test]
    fn bar_body_and_range() {
        let b = bar(dec!(1.10), dec!(1.20), dec!(1.05), dec!(1.15), 0);
        assert_eq!(b.body(), dec!(0.05));
        assert_eq!(b.range(), dec!(0.15));
        assert!(b.is_bullish());
    }

    #[test]
    fn series_enforces_monotonic_timestamps() {
        let mut series = BarSeries::new("EURUSD", "M15", 100);
        series
            .push(bar(dec!(1.1), dec!(1.2), dec!(1.0), dec!(1.1), 15))
            .unwrap();
        // Equal timestamp is rejected.
        let dup = bar(dec!(1.1), dec!(1.2), dec!(1.0), dec!(1.1), 15);
        assert!(series.push(dup).is_err());
        // Earlier timestamp is rejected.
        let old = bar(dec!(1.1), dec!(1.2), dec!(1.0), dec!(1.1), 0);
        assert!(series.push(old).is_err());
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn series_trims_to_max_bars() {
        let mut series = BarSeries::new("EURUSD", "M15", 3);
        for i in 0..5u32 {
            series
                .push(bar(dec!(1.1), dec!(1.2), dec!(1.0), dec!(1.1), i))
                .unwrap();
        }
        assert_eq!(series.len(), 3);
        assert_eq!(series.get(0).unwrap().timestamp, ts(2));
    }

    #[test]
    fn round_to_point_half_up() {
        let point = dec!(0.00001);
        assert_eq!(round_to_point(dec!(1.100055), point), dec!(1.10006));
        assert_eq!(round_to_point(dec!(1.100054), point), dec!(1.10005));
        // Zero point passes through.
        assert_eq!(round_to_point(dec!(1.2345), Decimal::ZERO), dec!(1.2345));
    }
}
