// =============================================================================
// Exponential Moving Average (EMA) over fixed-decimal closes
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The very first EMA value is seeded with the SMA of the first `period`
// closes.
// =============================================================================

use rust_decimal::Decimal;

/// Compute the EMA series for the given `closes` slice and look-back `period`.
///
/// Returns an empty `Vec` when the input is too short or the period is zero.
/// The first output element corresponds to the close at index `period - 1`.
pub fn compute_ema(closes: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let period_dec = Decimal::from(period as u64);
    let multiplier = Decimal::TWO / (period_dec + Decimal::ONE);

    // Seed: SMA of the first `period` values.
    let seed: Decimal = closes[..period].iter().copied().sum::<Decimal>() / period_dec;

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    result.push(seed);

    let mut prev = seed;
    for &close in &closes[period..] {
        let ema = close * multiplier + prev * (Decimal::ONE - multiplier);
        result.push(ema);
        prev = ema;
    }

    result
}
