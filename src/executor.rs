// =============================================================================
// Order Executor — broker-stop pre-check, submission, adaptive recovery
// =============================================================================
//
// The executor owns the last mile of the pipeline:
//
//   1. Tick-based pre-check: SL/TP must clear
//      max(symbol_floor, spread * multiplier + buffer) points from the
//      bid/ask reference. A pre-check refusal is a `precheck_block`, NOT a
//      broker failure — it never feeds the consecutive-failure cooldown.
//   2. Submission with up to `max_requotes + 1` attempts.
//   3. Adaptive retry on invalid stops (10016): re-fetch the tick, widen the
//      minimum with retry multipliers plus a safety margin, re-anchor SL/TP
//      to the CURRENT bid/ask, and rescale volume to preserve the original
//      monetary risk.
//   4. Optional naked-entry fallback: enter with no stops, locate the
//      position, attach SL/TP via a modify.
//
// Dry-run and paper sends are simulated with retcode SIMULATED.
// =============================================================================

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::broker::{
    BrokerGateway, FillPolicy, OrderAction, OrderRequest, Position, Retcode, SymbolInfo, Tick,
};
use crate::config::{ExecutionConfig, InvalidStopsConfig, StopGuardConfig};
use crate::market_data::round_to_point;
use crate::types::{ExecutionMode, Side};

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

/// A fully sized entry ready for submission.
#[derive(Debug, Clone)]
pub struct EntryOrder {
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub entry: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub success: bool,
    pub ticket: Option<u64>,
    pub retcode: Option<Retcode>,
    /// True when refused by the executor's own pre-check.
    pub precheck_block: bool,
    pub error: Option<String>,
    /// Final levels/size actually sent (they move during adaptive retry).
    pub final_sl: Decimal,
    pub final_tp: Decimal,
    pub final_volume: Decimal,
}

impl ExecResult {
    fn blocked(order: &EntryOrder, reason: String) -> Self {
        Self {
            success: false,
            ticket: None,
            retcode: None,
            precheck_block: true,
            error: Some(reason),
            final_sl: order.sl,
            final_tp: order.tp,
            final_volume: order.volume,
        }
    }

    fn failed(order: &EntryOrder, retcode: Option<Retcode>, reason: String) -> Self {
        Self {
            success: false,
            ticket: None,
            retcode,
            precheck_block: false,
            error: Some(reason),
            final_sl: order.sl,
            final_tp: order.tp,
            final_volume: order.volume,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct OrderExecutor {
    exec_cfg: ExecutionConfig,
    stop_guard: StopGuardConfig,
    invalid_stops: InvalidStopsConfig,
    simulated_tickets: u64,
}

impl OrderExecutor {
    pub fn new(
        exec_cfg: ExecutionConfig,
        stop_guard: StopGuardConfig,
        invalid_stops: InvalidStopsConfig,
    ) -> Self {
        Self {
            exec_cfg,
            stop_guard,
            invalid_stops,
            simulated_tickets: 0,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.exec_cfg.mode
    }

    /// Execute an entry order through the gateway.
    pub fn execute(
        &mut self,
        gateway: &mut dyn BrokerGateway,
        order: &EntryOrder,
        meta: &SymbolInfo,
    ) -> ExecResult {
        if !self.exec_cfg.enabled {
            return ExecResult::failed(order, None, "executor disabled".to_string());
        }

        if let Some(reason) = validate_order(order, self.exec_cfg.min_rr) {
            warn!(symbol = %order.symbol, reason = %reason, "order validation failed");
            return ExecResult::failed(order, None, reason);
        }

        // ── Broker-stop pre-check ────────────────────────────────────────
        if self.stop_guard.enabled && self.stop_guard.use_tick_based_stop_validation {
            match gateway.tick(&order.symbol) {
                Ok(tick) => {
                    if let Some(result) = self.precheck(order, meta, &tick) {
                        return result;
                    }
                }
                Err(e) => {
                    // No tick, no verdict: let the broker decide.
                    warn!(symbol = %order.symbol, error = %e, "pre-check skipped: tick unavailable");
                }
            }
        }

        info!(
            symbol = %order.symbol,
            side = %order.side,
            volume = %order.volume,
            entry = %order.entry,
            sl = %order.sl,
            tp = %order.tp,
            mode = %self.exec_cfg.mode,
            "order_send_attempt"
        );

        // ── Simulated sends (dry-run, paper, live with the latch off) ────
        let live_send =
            self.exec_cfg.mode == ExecutionMode::Live && self.exec_cfg.enable_real_orders;
        if !live_send {
            self.simulated_tickets += 1;
            info!(
                symbol = %order.symbol,
                mode = %self.exec_cfg.mode,
                ticket = self.simulated_tickets,
                retcode = Retcode::Simulated.code(),
                retcode_description = Retcode::Simulated.description(),
                success = true,
                "order_send_result"
            );
            return ExecResult {
                success: true,
                ticket: Some(self.simulated_tickets),
                retcode: Some(Retcode::Simulated),
                precheck_block: false,
                error: None,
                final_sl: order.sl,
                final_tp: order.tp,
                final_volume: order.volume,
            };
        }

        self.send_live(gateway, order, meta)
    }

    // -------------------------------------------------------------------------
    // Pre-check
    // -------------------------------------------------------------------------

    /// Returns `Some(blocked result)` when a stop sits too close to the
    /// broker's reference price.
    fn precheck(&self, order: &EntryOrder, meta: &SymbolInfo, tick: &Tick) -> Option<ExecResult> {
        let point = meta.point;
        if point <= Decimal::ZERO {
            return None;
        }

        let spread_pts = tick.spread() / point;
        let floor = Decimal::from(self.stop_guard.floor_points(&order.symbol));
        let min_required_pts = floor.max(
            spread_pts * self.stop_guard.tick_spread_multiplier
                + self.stop_guard.tick_spread_buffer_points,
        );

        let (reference, sl_distance_pts, tp_distance_pts) = match order.side {
            Side::Buy => (
                tick.ask,
                (tick.ask - order.sl) / point,
                (order.tp - tick.ask) / point,
            ),
            Side::Sell => (
                tick.bid,
                (order.sl - tick.bid) / point,
                (tick.bid - order.tp) / point,
            ),
        };

        if sl_distance_pts < min_required_pts {
            warn!(
                symbol = %order.symbol,
                side = %order.side,
                reference = %reference,
                spread_pts = %spread_pts,
                min_required_pts = %min_required_pts,
                sl = %order.sl,
                actual_sl_distance_pts = %sl_distance_pts,
                shortfall_pts = %(min_required_pts - sl_distance_pts),
                "sl_too_close_for_broker"
            );
            return Some(ExecResult::blocked(
                order,
                format!(
                    "SL {sl_distance_pts} pts from reference, {min_required_pts} pts required"
                ),
            ));
        }

        if tp_distance_pts < min_required_pts {
            warn!(
                symbol = %order.symbol,
                side = %order.side,
                reference = %reference,
                spread_pts = %spread_pts,
                min_required_pts = %min_required_pts,
                tp = %order.tp,
                actual_tp_distance_pts = %tp_distance_pts,
                shortfall_pts = %(min_required_pts - tp_distance_pts),
                "tp_too_close_for_broker"
            );
            return Some(ExecResult::blocked(
                order,
                format!(
                    "TP {tp_distance_pts} pts from reference, {min_required_pts} pts required"
                ),
            ));
        }

        None
    }

    // -------------------------------------------------------------------------
    // Live send with adaptive recovery
    // -------------------------------------------------------------------------

    fn send_live(
        &mut self,
        gateway: &mut dyn BrokerGateway,
        order: &EntryOrder,
        meta: &SymbolInfo,
    ) -> ExecResult {
        let mut request = OrderRequest {
            action: OrderAction::Deal,
            symbol: order.symbol.clone(),
            side: order.side,
            volume: order.volume,
            price: order.entry,
            sl: round_to_point(order.sl, meta.point),
            tp: round_to_point(order.tp, meta.point),
            deviation: self.exec_cfg.deviation_points,
            magic: self.exec_cfg.magic,
            comment: order.comment.clone(),
            type_filling: FillPolicy::Fok,
            position: None,
        };

        let max_attempts = self.exec_cfg.max_requotes + 1;
        let mut attempt = 0u32;
        let mut last_retcode = None;

        while attempt < max_attempts {
            attempt += 1;
            let result = match gateway.order_send(&request) {
                Ok(result) => result,
                Err(e) => {
                    error!(symbol = %order.symbol, error = %e, "order_send transport error");
                    return ExecResult::failed(order, None, e.to_string());
                }
            };

            let success = result.retcode == Retcode::Done;
            info!(
                symbol = %order.symbol,
                retcode = result.retcode.code(),
                retcode_description = %result.retcode_description,
                sl = %request.sl,
                tp = %request.tp,
                volume = %request.volume,
                attempt,
                max_attempts,
                success,
                "order_send_result"
            );

            if success {
                return ExecResult {
                    success: true,
                    ticket: result.ticket,
                    retcode: Some(Retcode::Done),
                    precheck_block: false,
                    error: None,
                    final_sl: request.sl,
                    final_tp: request.tp,
                    final_volume: request.volume,
                };
            }

            last_retcode = Some(result.retcode);

            match result.retcode {
                Retcode::Requote if attempt < max_attempts => continue,
                Retcode::InvalidStops
                    if attempt < max_attempts && self.invalid_stops.enable_adaptive_retry =>
                {
                    warn!(
                        symbol = %order.symbol,
                        attempt,
                        "order_send_invalid_stops_retry"
                    );
                    if self.widen_stops(gateway, order, meta, &mut request) {
                        continue;
                    }
                    break;
                }
                _ => break,
            }
        }

        // ── Naked-entry fallback ─────────────────────────────────────────
        if last_retcode == Some(Retcode::InvalidStops)
            && self.invalid_stops.enable_naked_entry_fallback
        {
            if let Some(result) = self.naked_entry_fallback(gateway, order, &request) {
                return result;
            }
        }

        let reason = format!(
            "order_send failed after {attempt} attempt(s) (retcode={:?})",
            last_retcode
        );
        error!(symbol = %order.symbol, reason = %reason, "order_send_error");
        ExecResult::failed(order, last_retcode, reason)
    }

    /// Re-anchor SL/TP to the current bid/ask at a widened minimum distance
    /// and rescale volume to preserve the original monetary risk. Returns
    /// false when the adjustment is impossible.
    fn widen_stops(
        &self,
        gateway: &mut dyn BrokerGateway,
        order: &EntryOrder,
        meta: &SymbolInfo,
        request: &mut OrderRequest,
    ) -> bool {
        let tick = match gateway.tick(&order.symbol) {
            Ok(tick) => tick,
            Err(e) => {
                warn!(symbol = %order.symbol, error = %e, "stop adjustment failed: tick unavailable");
                return false;
            }
        };

        let point = meta.point;
        let spread_pts = tick.spread() / point;
        let floor = Decimal::from(self.stop_guard.floor_points(&order.symbol));

        let min_required_pts = floor.max(
            spread_pts * self.invalid_stops.retry_tick_spread_multiplier
                + self.invalid_stops.retry_tick_spread_buffer_points,
        ) + self.invalid_stops.retry_safety_margin_points;

        let offset = min_required_pts * point;
        let original_sl = request.sl;

        let (reference, new_sl, new_tp) = match order.side {
            Side::Buy => (
                tick.ask,
                round_to_point(tick.ask - offset, point),
                round_to_point(tick.ask + offset, point),
            ),
            Side::Sell => (
                tick.bid,
                round_to_point(tick.bid + offset, point),
                round_to_point(tick.bid - offset, point),
            ),
        };

        request.sl = new_sl;
        request.tp = new_tp;

        // Volume rescale: risk ∝ volume * SL distance, so shrink volume by
        // old_distance / new_distance. Clamp into broker lot bounds first,
        // then round to the nearest step — unlike initial sizing, the retry
        // preserves the already-committed monetary risk rather than rounding
        // it down.
        let original_distance = (original_sl - order.entry).abs();
        let new_distance = (new_sl - order.entry).abs();
        if original_distance > Decimal::ZERO && new_distance > Decimal::ZERO {
            let scale = original_distance / new_distance;
            let raw = (request.volume * scale)
                .max(meta.volume_min)
                .min(meta.volume_max);
            let rescaled = (raw / meta.volume_step).round() * meta.volume_step;

            info!(
                symbol = %order.symbol,
                original_volume = %request.volume,
                new_volume = %rescaled,
                scale_factor = %scale,
                original_sl_distance_pts = %(original_distance / point),
                new_sl_distance_pts = %(new_distance / point),
                "order_send_volume_rescaled"
            );
            request.volume = rescaled;
        }

        info!(
            symbol = %order.symbol,
            bid = %tick.bid,
            ask = %tick.ask,
            spread_pts = %spread_pts,
            min_required_pts = %min_required_pts,
            reference = %reference,
            new_sl = %new_sl,
            new_tp = %new_tp,
            new_volume = %request.volume,
            "order_send_stops_adjusted"
        );

        true
    }

    /// Enter without stops, then attach the intended SL/TP with a modify.
    fn naked_entry_fallback(
        &mut self,
        gateway: &mut dyn BrokerGateway,
        order: &EntryOrder,
        request: &OrderRequest,
    ) -> Option<ExecResult> {
        let mut naked = request.clone();
        naked.sl = Decimal::ZERO;
        naked.tp = Decimal::ZERO;

        warn!(
            symbol = %order.symbol,
            volume = %naked.volume,
            entry = %naked.price,
            sl_intended = %request.sl,
            tp_intended = %request.tp,
            "order_send_invalid_stops_fallback_naked_entry"
        );

        let naked_result = match gateway.order_send(&naked) {
            Ok(result) => result,
            Err(e) => {
                warn!(symbol = %order.symbol, error = %e, "naked entry fallback transport error");
                return None;
            }
        };

        if naked_result.retcode != Retcode::Done {
            return None;
        }

        // Locate the just-opened position by (side, magic, volume).
        let position_ticket = match gateway.positions(Some(&order.symbol)) {
            Ok(positions) => best_position_match(&positions, &naked).or(naked_result.ticket),
            Err(e) => {
                warn!(symbol = %order.symbol, error = %e, "fallback position lookup failed");
                naked_result.ticket
            }
        };

        let ticket = position_ticket?;

        let modify = OrderRequest {
            action: OrderAction::Sltp,
            position: Some(ticket),
            sl: request.sl,
            tp: request.tp,
            ..naked.clone()
        };

        match gateway.order_send(&modify) {
            Ok(modify_result) => {
                info!(
                    symbol = %order.symbol,
                    position = ticket,
                    retcode = modify_result.retcode.code(),
                    retcode_description = %modify_result.retcode_description,
                    sl = %request.sl,
                    tp = %request.tp,
                    "order_send_fallback_sltp_modify_result"
                );

                if modify_result.retcode != Retcode::Done {
                    error!(
                        symbol = %order.symbol,
                        position = ticket,
                        retcode = modify_result.retcode.code(),
                        close_on_modify_failure = self.invalid_stops.close_on_modify_failure,
                        "naked entry left unprotected: SLTP modify failed"
                    );
                    if self.invalid_stops.close_on_modify_failure {
                        if let Err(e) = gateway.close_position(ticket, "auto_close_modify_failed")
                        {
                            error!(symbol = %order.symbol, position = ticket, error = %e, "auto-close failed");
                        }
                        return Some(ExecResult::failed(
                            order,
                            Some(Retcode::InvalidStops),
                            "naked entry auto-closed after modify failure".to_string(),
                        ));
                    }
                }
            }
            Err(e) => {
                error!(symbol = %order.symbol, position = ticket, error = %e, "SLTP modify transport error");
            }
        }

        // The position exists even if it is temporarily unprotected.
        Some(ExecResult {
            success: true,
            ticket: Some(ticket),
            retcode: Some(Retcode::Done),
            precheck_block: false,
            error: None,
            final_sl: request.sl,
            final_tp: request.tp,
            final_volume: naked.volume,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_order(order: &EntryOrder, min_rr: Decimal) -> Option<String> {
    if order.volume <= Decimal::ZERO {
        return Some("volume must be positive".to_string());
    }
    if order.entry <= Decimal::ZERO || order.sl <= Decimal::ZERO || order.tp <= Decimal::ZERO {
        return Some("prices must be positive".to_string());
    }

    let (risk, reward) = match order.side {
        Side::Buy => {
            if order.sl >= order.entry || order.tp <= order.entry {
                return Some(format!(
                    "BUY requires sl < entry < tp, got sl={} entry={} tp={}",
                    order.sl, order.entry, order.tp
                ));
            }
            (order.entry - order.sl, order.tp - order.entry)
        }
        Side::Sell => {
            if order.sl <= order.entry || order.tp >= order.entry {
                return Some(format!(
                    "SELL requires tp < entry < sl, got sl={} entry={} tp={}",
                    order.sl, order.entry, order.tp
                ));
            }
            (order.sl - order.entry, order.entry - order.tp)
        }
    };

    if risk <= Decimal::ZERO {
        return Some("risk must be positive".to_string());
    }
    if reward / risk < min_rr {
        return Some(format!(
            "RR {} below minimum {min_rr}",
            reward / risk
        ));
    }

    None
}

fn best_position_match(positions: &[Position], request: &OrderRequest) -> Option<u64> {
    positions
        .iter()
        .map(|p| {
            let mut score = 0;
            if p.side == request.side {
                score += 2;
            }
            if p.magic == request.magic {
                score += 2;
            }
            if (p.volume - request.volume).abs() < Decimal::new(1, 6) {
                score += 1;
            }
            (score, p.ticket)
        })
        .max_by_key(|(score, ticket)| (*score, *ticket))
        .map(|(_, ticket)| ticket)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimBroker;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn eurusd_meta() -> SymbolInfo {
        SymbolInfo {
            point: dec!(0.00001),
            digits: 5,
            contract_size: dec!(100000),
            volume_min: dec!(0.01),
            volume_step: dec!(0.01),
            volume_max: dec!(100),
            stops_level: 0,
            min_stop_distance: dec!(0),
            max_stop_distance: None,
            sl_hard_floor_points: 10,
            margin_initial: Decimal::ZERO,
        }
    }

    fn broker() -> SimBroker {
        let mut symbols = HashMap::new();
        symbols.insert("EURUSD".to_string(), eurusd_meta());
        let mut broker = SimBroker::new(symbols, dec!(10000));
        broker.set_tick(
            "EURUSD",
            dec!(1.10078),
            dec!(1.10082),
            Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap(),
        );
        broker
    }

    fn order() -> EntryOrder {
        EntryOrder {
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: dec!(0.29),
            entry: dec!(1.10080),
            sl: dec!(1.09995),
            tp: dec!(1.10208),
            comment: "meridian_fair_value_gap".to_string(),
        }
    }

    fn live_executor() -> OrderExecutor {
        let mut exec_cfg = ExecutionConfig::default();
        exec_cfg.mode = ExecutionMode::Live;
        exec_cfg.enable_real_orders = true;
        OrderExecutor::new(
            exec_cfg,
            StopGuardConfig::default(),
            InvalidStopsConfig::default(),
        )
    }

    fn dry_executor() -> OrderExecutor {
        OrderExecutor::new(
            ExecutionConfig::default(),
            StopGuardConfig::default(),
            InvalidStopsConfig::default(),
        )
    }

    #[test]
    fn dry_run_simulates_send_after_precheck() {
        let mut broker = broker();
        let mut executor = dry_executor();

        let result = executor.execute(&mut broker, &order(), &eurusd_meta());
        assert!(result.success);
        assert_eq!(result.retcode, Some(Retcode::Simulated));
        // Nothing reached the broker book.
        assert_eq!(broker.open_position_count(), 0);
    }

    /// Seed scenario 2 pre-check arithmetic: spread 4 pts, floor 50, so the
    /// 87-pt SL distance from ask clears the 50-pt minimum.
    #[test]
    fn precheck_passes_reference_distances() {
        let mut broker = broker();
        let mut executor = live_executor();
        let result = executor.execute(&mut broker, &order(), &eurusd_meta());
        assert!(result.success);
        assert!(!result.precheck_block);
        assert_eq!(broker.open_position_count(), 1);
    }

    #[test]
    fn precheck_blocks_tight_sl_without_counting_as_failure() {
        let mut broker = broker();
        let mut executor = live_executor();

        let mut tight = order();
        // 30 pts from ask: below the 50-pt floor. Keep RR valid.
        tight.sl = dec!(1.10052);
        tight.tp = dec!(1.10130);

        let result = executor.execute(&mut broker, &tight, &eurusd_meta());
        assert!(!result.success);
        assert!(result.precheck_block);
        assert!(result.retcode.is_none());
        assert_eq!(broker.open_position_count(), 0);
    }

    #[test]
    fn precheck_blocks_tight_tp_after_market_moves() {
        let mut broker = broker();
        // Price rallied toward the target since planning: TP is now only
        // 9 points above the ask while SL is far away.
        broker.set_tick(
            "EURUSD",
            dec!(1.10195),
            dec!(1.10199),
            Utc.with_ymd_and_hms(2025, 6, 2, 14, 5, 0).unwrap(),
        );
        let mut executor = live_executor();

        let result = executor.execute(&mut broker, &order(), &eurusd_meta());
        assert!(!result.success);
        assert!(result.precheck_block);
        assert_eq!(broker.open_position_count(), 0);
    }

    #[test]
    fn rr_below_minimum_is_rejected_before_send() {
        let mut broker = broker();
        let mut executor = live_executor();

        let mut poor = order();
        poor.tp = dec!(1.10120); // reward 40 pts vs risk 85 pts
        let result = executor.execute(&mut broker, &poor, &eurusd_meta());
        assert!(!result.success);
        assert!(!result.precheck_block);
        assert_eq!(broker.open_position_count(), 0);
    }

    #[test]
    fn requote_retries_and_succeeds() {
        let mut broker = broker();
        broker.script_retcodes([Retcode::Requote]);
        let mut executor = live_executor();

        let result = executor.execute(&mut broker, &order(), &eurusd_meta());
        assert!(result.success);
        assert_eq!(broker.open_position_count(), 1);
    }

    /// Seed scenario 2: invalid stops, then adaptive retry re-anchors SL/TP
    /// to the live tick at a widened distance and rescales volume.
    #[test]
    fn invalid_stops_adaptive_retry_recovers() {
        let mut broker = broker();
        broker.script_retcodes([Retcode::InvalidStops]);
        let mut executor = live_executor();

        let result = executor.execute(&mut broker, &order(), &eurusd_meta());
        assert!(result.success);
        assert!(!result.precheck_block);

        // Widened minimum: max(50, 4*4 + 30) + 20 = 70 points from ask.
        assert_eq!(result.final_sl, dec!(1.10012)); // 1.10082 - 0.00070
        assert_eq!(result.final_tp, dec!(1.10152)); // 1.10082 + 0.00070

        // Volume rescaled by old/new SL distance from entry, then rounded to
        // the nearest lot step: |1.10080 - 1.10012| = 68 pts;
        // 0.29 * 85/68 = 0.3625 -> 0.36.
        assert_eq!(result.final_volume, dec!(0.36));

        let positions = broker.positions(Some("EURUSD")).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].sl, dec!(1.10012));
    }

    /// The retry rescale rounds to the nearest lot step after clamping; a
    /// raw volume landing exactly on a half-step boundary must not be
    /// truncated downward.
    #[test]
    fn invalid_stops_rescale_rounds_to_nearest_step() {
        let mut broker = broker();
        broker.script_retcodes([Retcode::InvalidStops]);
        let mut executor = live_executor();

        // 0.30 lots over the 85-pt stop rescales against the widened 68-pt
        // stop to 0.30 * 85/68 = 0.375 — exactly 37.5 steps of 0.01.
        let mut half_step = order();
        half_step.volume = dec!(0.30);

        let result = executor.execute(&mut broker, &half_step, &eurusd_meta());
        assert!(result.success);
        assert_eq!(result.final_volume, dec!(0.38));
    }

    #[test]
    fn invalid_stops_without_retry_fails() {
        let mut broker = broker();
        broker.script_retcodes([Retcode::InvalidStops]);

        let mut exec_cfg = ExecutionConfig::default();
        exec_cfg.mode = ExecutionMode::Live;
        exec_cfg.enable_real_orders = true;
        let mut invalid_cfg = InvalidStopsConfig::default();
        invalid_cfg.enable_adaptive_retry = false;
        let mut executor =
            OrderExecutor::new(exec_cfg, StopGuardConfig::default(), invalid_cfg);

        let result = executor.execute(&mut broker, &order(), &eurusd_meta());
        assert!(!result.success);
        assert_eq!(result.retcode, Some(Retcode::InvalidStops));
        assert!(!result.precheck_block);
    }

    #[test]
    fn naked_entry_fallback_attaches_stops_via_modify() {
        let mut broker = broker();
        // Both regular attempts fail with invalid stops; the naked entry and
        // the modify then succeed.
        broker.script_retcodes([Retcode::InvalidStops, Retcode::InvalidStops]);

        let mut exec_cfg = ExecutionConfig::default();
        exec_cfg.mode = ExecutionMode::Live;
        exec_cfg.enable_real_orders = true;
        let mut invalid_cfg = InvalidStopsConfig::default();
        invalid_cfg.enable_naked_entry_fallback = true;
        let mut executor =
            OrderExecutor::new(exec_cfg, StopGuardConfig::default(), invalid_cfg);

        let result = executor.execute(&mut broker, &order(), &eurusd_meta());
        assert!(result.success);

        let positions = broker.positions(Some("EURUSD")).unwrap();
        assert_eq!(positions.len(), 1);
        // Stops attached by the modify, not zero.
        assert!(positions[0].sl > Decimal::ZERO);
        assert!(positions[0].tp > Decimal::ZERO);
    }

    #[test]
    fn fatal_retcode_fails_without_retry() {
        let mut broker = broker();
        broker.script_retcodes([Retcode::Other(10013)]);
        let mut executor = live_executor();

        let result = executor.execute(&mut broker, &order(), &eurusd_meta());
        assert!(!result.success);
        assert_eq!(result.retcode, Some(Retcode::Other(10013)));
        assert_eq!(broker.open_position_count(), 0);
    }
}
