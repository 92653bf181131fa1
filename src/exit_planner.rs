// =============================================================================
// Structure Exit Planner — structure-first SL/TP with ATR fallback
// =============================================================================
//
// Walks the configured priority list (order_block, fair_value_gap, rejection,
// atr). Each method places SL beyond the protecting structure plus an ATR
// buffer, sources TP from an opposing structure edge or an ATR extension,
// then runs broker clamps and the RR gate. A method that fails the gate
// yields to the next priority; when every method fails the bar produces no
// decision.
//
// Every plan records its pre-clamp `sl_requested` / `tp_requested` — the
// difference against the final values is what execution diagnostics key on.
// =============================================================================

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::broker::SymbolInfo;
use crate::config::SltpConfig;
use crate::market_data::round_to_point;
use crate::types::Side;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitMethod {
    OrderBlock,
    FairValueGap,
    Rejection,
    Atr,
}

impl ExitMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OrderBlock => "order_block",
            Self::FairValueGap => "fair_value_gap",
            Self::Rejection => "rejection",
            Self::Atr => "atr",
        }
    }
}

impl std::fmt::Display for ExitMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_block" => Ok(Self::OrderBlock),
            "fair_value_gap" => Ok(Self::FairValueGap),
            "rejection" => Ok(Self::Rejection),
            "atr" => Ok(Self::Atr),
            other => Err(format!("unknown exit method `{other}`")),
        }
    }
}

/// Price zone of a nearby structure: `lower <= upper` always.
#[derive(Debug, Clone, Copy)]
pub struct ZoneRef {
    pub upper: Decimal,
    pub lower: Decimal,
}

/// Nearest structure per type, as seen from the entry price.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestStructures {
    pub order_block: Option<ZoneRef>,
    pub fair_value_gap: Option<ZoneRef>,
    pub rejection: Option<ZoneRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExitPlan {
    pub sl: Decimal,
    pub tp: Decimal,
    pub method: ExitMethod,
    pub expected_rr: Decimal,
    /// Pre-clamp values, kept for execution diagnostics.
    pub sl_requested: Decimal,
    pub tp_requested: Decimal,
    pub clamped: bool,
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

pub struct ExitPlanner {
    cfg: SltpConfig,
}

impl ExitPlanner {
    pub fn new(cfg: SltpConfig) -> Self {
        Self { cfg }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    pub fn min_rr_gate(&self) -> Decimal {
        self.cfg.min_rr_gate
    }

    /// Plan SL/TP for an entry at `entry`. Returns `None` when no method in
    /// the priority list survives the broker clamps and the RR gate.
    pub fn plan(
        &self,
        side: Side,
        entry: Decimal,
        atr: Decimal,
        nearest: &NearestStructures,
        meta: &SymbolInfo,
    ) -> Option<ExitPlan> {
        if !self.cfg.enabled || atr <= Decimal::ZERO {
            return None;
        }

        for raw_method in &self.cfg.exit_priority {
            let method = match ExitMethod::from_str(raw_method) {
                Ok(method) => method,
                Err(_) => continue,
            };
            if method == ExitMethod::Atr && !self.cfg.atr_fallback_enabled {
                continue;
            }

            let candidate = match method {
                ExitMethod::OrderBlock => {
                    self.plan_from_order_block(side, entry, atr, nearest, meta)
                }
                ExitMethod::FairValueGap => self.plan_from_gap(side, entry, atr, nearest, meta),
                ExitMethod::Rejection => self.plan_from_rejection(side, entry, atr, nearest, meta),
                ExitMethod::Atr => self.plan_from_atr(side, entry, atr, meta),
            };

            let (sl_requested, tp_requested) = match candidate {
                Some(pair) => pair,
                None => continue,
            };

            if let Some(plan) =
                self.clamp_and_gate(method, side, entry, atr, sl_requested, tp_requested, meta)
            {
                return Some(plan);
            }
        }

        None
    }

    // -------------------------------------------------------------------------
    // Method-specific placement (pre-clamp)
    // -------------------------------------------------------------------------

    fn plan_from_order_block(
        &self,
        side: Side,
        entry: Decimal,
        atr: Decimal,
        nearest: &NearestStructures,
        meta: &SymbolInfo,
    ) -> Option<(Decimal, Decimal)> {
        let zone = nearest.order_block?;
        let sl_buf = self.sl_buffer(atr, meta);

        let sl = match side {
            Side::Buy => zone.lower - sl_buf,
            Side::Sell => zone.upper + sl_buf,
        };

        // TP from an opposing structure edge when one exists, else an ATR
        // extension (also applied when the edge lands on the wrong side).
        let tp = self
            .opposing_target(ExitMethod::OrderBlock, side, nearest)
            .or_else(|| self.opposing_target(ExitMethod::FairValueGap, side, nearest))
            .unwrap_or_else(|| self.atr_target(side, entry, atr));
        let tp = self.correct_tp_side(side, entry, atr, tp);

        Some((sl, tp))
    }

    fn plan_from_gap(
        &self,
        side: Side,
        entry: Decimal,
        atr: Decimal,
        nearest: &NearestStructures,
        meta: &SymbolInfo,
    ) -> Option<(Decimal, Decimal)> {
        let zone = nearest.fair_value_gap?;
        let sl_buf = self.sl_buffer(atr, meta);

        let (sl, tp) = match side {
            Side::Buy => (zone.lower - sl_buf, zone.upper),
            Side::Sell => (zone.upper + sl_buf, zone.lower),
        };
        let tp = self.correct_tp_side(side, entry, atr, tp);

        Some((sl, tp))
    }

    fn plan_from_rejection(
        &self,
        side: Side,
        entry: Decimal,
        atr: Decimal,
        nearest: &NearestStructures,
        meta: &SymbolInfo,
    ) -> Option<(Decimal, Decimal)> {
        let zone = nearest.rejection?;

        // The zone must protect the trade: a BUY rejects off support below,
        // a SELL off resistance above.
        match side {
            Side::Buy if entry < zone.lower => {
                debug!(entry = %entry, zone_low = %zone.lower, "rejection zone on wrong side of BUY entry");
                return None;
            }
            Side::Sell if entry > zone.upper => {
                debug!(entry = %entry, zone_high = %zone.upper, "rejection zone on wrong side of SELL entry");
                return None;
            }
            _ => {}
        }

        let sl_buf = self.sl_buffer(atr, meta);
        let sl = match side {
            Side::Buy => zone.lower - sl_buf,
            Side::Sell => zone.upper + sl_buf,
        };
        let tp = self.atr_target(side, entry, atr);

        Some((sl, tp))
    }

    fn plan_from_atr(
        &self,
        side: Side,
        entry: Decimal,
        atr: Decimal,
        meta: &SymbolInfo,
    ) -> Option<(Decimal, Decimal)> {
        let sl_buf = self.sl_buffer(atr, meta);
        let sl = match side {
            Side::Buy => entry - sl_buf,
            Side::Sell => entry + sl_buf,
        };
        Some((sl, self.atr_target(side, entry, atr)))
    }

    // -------------------------------------------------------------------------
    // Shared pieces
    // -------------------------------------------------------------------------

    /// SL buffer in price units: `clamp(min_pips, max_pips, k * ATR)`.
    fn sl_buffer(&self, atr: Decimal, meta: &SymbolInfo) -> Decimal {
        let min_buf = pips_to_price(self.cfg.min_buffer_pips, meta);
        let max_buf = pips_to_price(self.cfg.max_buffer_pips, meta);
        (self.cfg.sl_atr_buffer * atr).max(min_buf).min(max_buf)
    }

    fn atr_target(&self, side: Side, entry: Decimal, atr: Decimal) -> Decimal {
        let extension = self.cfg.tp_extension_atr * atr;
        match side {
            Side::Buy => entry + extension,
            Side::Sell => entry - extension,
        }
    }

    fn correct_tp_side(&self, side: Side, entry: Decimal, atr: Decimal, tp: Decimal) -> Decimal {
        let wrong_side = match side {
            Side::Buy => tp <= entry,
            Side::Sell => tp >= entry,
        };
        if wrong_side {
            self.atr_target(side, entry, atr)
        } else {
            tp
        }
    }

    fn opposing_target(
        &self,
        method: ExitMethod,
        side: Side,
        nearest: &NearestStructures,
    ) -> Option<Decimal> {
        let zone = match method {
            ExitMethod::OrderBlock => nearest.order_block?,
            ExitMethod::FairValueGap => nearest.fair_value_gap?,
            _ => return None,
        };
        // The opposing side exits at the far edge of the zone.
        Some(match side {
            Side::Buy => zone.upper,
            Side::Sell => zone.lower,
        })
    }

    /// Apply broker clamps and the RR gate; on an RR shortfall, try extending
    /// TP to `min_rr x risk` (keeping SL) and re-clamp.
    #[allow(clippy::too_many_arguments)]
    fn clamp_and_gate(
        &self,
        method: ExitMethod,
        side: Side,
        entry: Decimal,
        _atr: Decimal,
        sl_requested: Decimal,
        tp_requested: Decimal,
        meta: &SymbolInfo,
    ) -> Option<ExitPlan> {
        let (sl, tp, clamped) = apply_broker_clamps(entry, sl_requested, tp_requested, side, meta)?;

        let (risk, reward) = risk_reward(side, entry, sl, tp);
        if risk <= Decimal::ZERO || reward <= Decimal::ZERO {
            return None;
        }

        let rr = reward / risk;
        if rr >= self.cfg.min_rr_gate {
            return Some(ExitPlan {
                sl,
                tp,
                method,
                expected_rr: rr,
                sl_requested,
                tp_requested,
                clamped,
            });
        }

        // TP extension: demand exactly the gate's reward with the original SL.
        let needed_reward = self.cfg.min_rr_gate * risk;
        let extended_tp = match side {
            Side::Buy => entry + needed_reward,
            Side::Sell => entry - needed_reward,
        };

        let (sl2, tp2, _) = apply_broker_clamps(entry, sl, extended_tp, side, meta)?;
        let (risk2, reward2) = risk_reward(side, entry, sl2, tp2);
        if risk2 <= Decimal::ZERO || reward2 <= Decimal::ZERO {
            return None;
        }
        let rr2 = reward2 / risk2;
        if rr2 < self.cfg.min_rr_gate {
            debug!(
                method = %method,
                rr = %rr2,
                min_rr = %self.cfg.min_rr_gate,
                "exit plan rejected by rr gate after tp extension"
            );
            return None;
        }

        Some(ExitPlan {
            sl: sl2,
            tp: tp2,
            method,
            expected_rr: rr2,
            sl_requested,
            tp_requested,
            clamped: true,
        })
    }
}

/// One pip is ten points on 3/5-digit symbols and one point otherwise.
fn pips_to_price(pips: Decimal, meta: &SymbolInfo) -> Decimal {
    let per_pip = if meta.digits == 3 || meta.digits == 5 {
        meta.point * Decimal::TEN
    } else {
        meta.point
    };
    pips * per_pip
}

fn risk_reward(side: Side, entry: Decimal, sl: Decimal, tp: Decimal) -> (Decimal, Decimal) {
    match side {
        Side::Buy => (entry - sl, tp - entry),
        Side::Sell => (sl - entry, entry - tp),
    }
}

/// Round SL/TP to the point quantum, enforce the broker's minimum stop
/// distance, cap at the maximum, and reject plans whose ordering collapses.
fn apply_broker_clamps(
    entry: Decimal,
    sl: Decimal,
    tp: Decimal,
    side: Side,
    meta: &SymbolInfo,
) -> Option<(Decimal, Decimal, bool)> {
    let point = meta.point;
    let min_stop = meta.min_stop_distance;

    let mut sl_r = round_to_point(sl, point);
    let mut tp_r = round_to_point(tp, point);
    let mut clamped = sl_r != sl || tp_r != tp;

    // Push out to the broker's minimum distance.
    let (sl_dir, tp_dir) = match side {
        Side::Buy => (-Decimal::ONE, Decimal::ONE),
        Side::Sell => (Decimal::ONE, -Decimal::ONE),
    };
    let sl_pushed = ensure_distance(sl_r, entry, min_stop, sl_dir);
    let tp_pushed = ensure_distance(tp_r, entry, min_stop, tp_dir);
    if sl_pushed != sl_r || tp_pushed != tp_r {
        clamped = true;
        sl_r = round_to_point(sl_pushed, point);
        tp_r = round_to_point(tp_pushed, point);
    }

    // Cap at the maximum distance.
    if let Some(max_stop) = meta.max_stop_distance {
        if (entry - sl_r).abs() > max_stop {
            sl_r = round_to_point(entry + sl_dir * max_stop, point);
            clamped = true;
        }
        if (tp_r - entry).abs() > max_stop {
            tp_r = round_to_point(entry + tp_dir * max_stop, point);
            clamped = true;
        }
    }

    // Ordering sanity after all adjustments.
    let ordered = match side {
        Side::Buy => sl_r < entry && entry < tp_r,
        Side::Sell => tp_r < entry && entry < sl_r,
    };
    if !ordered {
        return None;
    }

    Some((sl_r, tp_r, clamped))
}

/// Move `p` outward along `direction` until it is at least `minimum` away
/// from `away_from`.
fn ensure_distance(p: Decimal, away_from: Decimal, minimum: Decimal, direction: Decimal) -> Decimal {
    let d = (p - away_from).abs();
    if d >= minimum {
        p
    } else {
        p + (minimum - d) * direction
    }
}

// =============================================================================
// Tests
// =============================================================================
