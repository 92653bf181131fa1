// =============================================================================
// Risk Sizer — price distance to position size under risk caps
// =============================================================================
//
// Sizing algorithm:
//   1. stop_distance_points = |entry - sl| / point
//      reject when <= 0 or below the symbol's hard floor
//   2. risk_budget = equity * per_trade_pct / 100
//      cap_budget  = equity * per_symbol_open_risk_cap_pct / 100
//   3. point_value_per_lot = contract_size * point
//   4. raw_volume = risk_budget / (stop_distance_points * point_value_per_lot)
//   5. snap DOWN to volume_step, clamp into [volume_min, volume_max]
//   6. new_trade_risk = stop_distance_points * point_value_per_lot * volume
//   7. reject when open_risk_before + new_trade_risk > cap_budget
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::broker::SymbolInfo;
use crate::types::Side;

// ---------------------------------------------------------------------------
// Sizing result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeRejection {
    /// Stop distance or resulting volume too small to trade.
    RiskTooSmall { reason: String },
    /// The symbol's open-risk cap would be exceeded.
    RiskCapHit {
        open_risk_before: Decimal,
        new_trade_risk: Decimal,
        cap_budget: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct SizedRisk {
    pub volume: Decimal,
    pub stop_distance_points: Decimal,
    pub new_trade_risk: Decimal,
    pub risk_budget: Decimal,
    pub cap_budget: Decimal,
}

/// Size a position for the given entry/SL pair.
pub fn size_position(
    symbol: &str,
    side: Side,
    equity: Decimal,
    entry: Decimal,
    sl: Decimal,
    meta: &SymbolInfo,
    per_trade_pct: Decimal,
    per_symbol_open_risk_cap_pct: Decimal,
    open_risk_before: Decimal,
) -> Result<SizedRisk, SizeRejection> {
    let stop_distance_points = (entry - sl).abs() / meta.point;

    if stop_distance_points <= Decimal::ZERO {
        let rejection = SizeRejection::RiskTooSmall {
            reason: "zero stop distance".to_string(),
        };
        warn!(symbol, side = %side, entry = %entry, sl = %sl, "risk_too_small");
        return Err(rejection);
    }

    let hard_floor = Decimal::from(meta.sl_hard_floor_points);
    if stop_distance_points < hard_floor {
        warn!(
            symbol,
            side = %side,
            stop_distance_points = %stop_distance_points,
            hard_floor_points = meta.sl_hard_floor_points,
            "risk_too_small"
        );
        return Err(SizeRejection::RiskTooSmall {
            reason: format!(
                "stop distance {stop_distance_points} pts below hard floor {hard_floor} pts"
            ),
        });
    }

    let risk_budget = equity * per_trade_pct / dec!(100);
    let cap_budget = equity * per_symbol_open_risk_cap_pct / dec!(100);
    let point_value_per_lot = meta.contract_size * meta.point;

    let raw_volume = risk_budget / (stop_distance_points * point_value_per_lot);

    // Snap down to the broker's volume step, then clamp.
    let steps = (raw_volume / meta.volume_step).floor();
    let mut volume = steps * meta.volume_step;
    if volume > meta.volume_max {
        volume = meta.volume_max;
    }
    if volume < meta.volume_min {
        warn!(
            symbol,
            raw_volume = %raw_volume,
            snapped_volume = %volume,
            volume_min = %meta.volume_min,
            "risk_too_small"
        );
        return Err(SizeRejection::RiskTooSmall {
            reason: format!(
                "volume {volume} below broker minimum {} after snapping",
                meta.volume_min
            ),
        });
    }

    let new_trade_risk = stop_distance_points * point_value_per_lot * volume;

    if open_risk_before + new_trade_risk > cap_budget {
        warn!(
            symbol,
            open_risk_before = %open_risk_before,
            new_trade_risk = %new_trade_risk,
            cap_budget = %cap_budget,
            "risk_cap_hit"
        );
        return Err(SizeRejection::RiskCapHit {
            open_risk_before,
            new_trade_risk,
            cap_budget,
        });
    }

    info!(
        symbol,
        side = %side,
        volume = %volume,
        stop_distance_points = %stop_distance_points,
        new_trade_risk = %new_trade_risk,
        risk_budget = %risk_budget,
        "execution_sized"
    );

    Ok(SizedRisk {
        volume,
        stop_distance_points,
        new_trade_risk,
        risk_budget,
        cap_budget,
    })
}

// ---------------------------------------------------------------------------
// Open-risk ledger
// ---------------------------------------------------------------------------

/// Per-symbol monetary open risk. The only state shared across symbol
/// streams, so access stays behind a short critical section.
#[derive(Default)]
pub struct RiskLedger {
    inner: RwLock<HashMap<String, Decimal>>,
}

impl RiskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_open_risk(&self, symbol: &str, amount: Decimal) {
        let mut map = self.inner.write();
        *map.entry(symbol.to_string()).or_insert(Decimal::ZERO) += amount;
    }

    /// Release risk when a position closes; never goes below zero.
    pub fn release(&self, symbol: &str, amount: Decimal) {
        let mut map = self.inner.write();
        if let Some(risk) = map.get_mut(symbol) {
            *risk = (*risk - amount).max(Decimal::ZERO);
        }
    }

    pub fn clear(&self, symbol: &str) {
        self.inner.write().remove(symbol);
    }

    pub fn open_risk(&self, symbol: &str) -> Decimal {
        self.inner
            .read()
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn total_open_risk(&self) -> Decimal {
        self.inner.read().values().copied().sum()
    }
}

// =============================================================================
// Tests
// =============================================================================
