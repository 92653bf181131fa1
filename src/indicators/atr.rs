// =============================================================================
// Average True Range (ATR) — simple-mean method over fixed-decimal bars
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the simple mean of the last `period` TR values. Each TR needs the
// previous bar's close, so `period + 1` bars are the minimum input.
// =============================================================================

use rust_decimal::Decimal;

use crate::market_data::Bar;

/// Compute the most recent ATR value from a slice of OHLCV bars.
///
/// # Arguments
/// - `bars`   — slice of bars (oldest first).
/// - `period` — look-back window for the ATR calculation.
///
/// # Returns
/// `None` when `period` is zero or there are fewer than `period + 1` bars.
pub fn compute_atr(bars: &[Bar], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let mut tr_values: Vec<Decimal> = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let high = bars[i].high;
        let low = bars[i].low;
        let prev_close = bars[i - 1].close;

        let hl = high - low;
        let hc = (high - prev_close).abs();
        let lc = (low - prev_close).abs();

        tr_values.push(hl.max(hc).max(lc));
    }

    if tr_values.len() < period {
        return None;
    }

    let sum: Decimal = tr_values[tr_values.len() - period..].iter().copied().sum();
    Some(sum / Decimal::from(period as u64))
}
