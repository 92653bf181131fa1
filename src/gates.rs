// =============================================================================
// Gate Chain — ordered pre-execution filters
// =============================================================================
//
// Every sized decision runs the chain in a fixed order:
//   1. daily soft stop          5. conflict resolver
//   2. margin & open-risk       6. HTF bias (soft adjust + hard block)
//   3. structure threshold      7. session filter
//   4. position limit
//
// A block is not an error: it is a structured event with the reason and the
// inputs that produced it. Blocks never propagate.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use crate::broker::{AccountInfo, Position};
use crate::config::{
    ConflictConfig, HardBlockMode, HtfBiasConfig, MarginGuardConfig, PositionLimitsConfig,
    StructureThresholdsConfig,
};
use crate::guards::DailyStopState;
use crate::htf::{BiasDirection, HtfSnapshot};
use crate::session_filter::SessionFilter;
use crate::structure::StructureType;
use crate::types::{Direction, ExecutionMode, Side};

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Everything the chain needs about one sized decision. Snapshots are taken
/// by the pipeline before evaluation, keeping the gates free of I/O.
pub struct GateContext<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub structure_type: StructureType,
    pub confidence: Decimal,
    pub bar_index: u64,
    pub now: DateTime<Utc>,
    pub session: Option<&'a str>,
    pub mode: ExecutionMode,
    pub daily_stop: DailyStopState,
    pub account: Option<&'a AccountInfo>,
    pub open_positions: &'a [Position],
    /// Estimated margin for the new order (volume x margin_initial).
    pub required_margin: Decimal,
    /// Current total open risk across symbols.
    pub total_open_risk: Decimal,
    pub new_trade_risk: Decimal,
    pub htf: Option<&'a HtfSnapshot>,
}

/// Why a decision was blocked, and by which gate.
#[derive(Debug, Clone)]
pub struct GateBlock {
    pub gate: &'static str,
    pub reason: String,
}

/// A passed decision, with the HTF-adjusted confidence score.
#[derive(Debug, Clone)]
pub struct GatePass {
    pub adjusted_confidence: Decimal,
    pub htf_alignment: &'static str,
}

#[derive(Debug, Clone, Copy)]
struct SignalRecord {
    bar_index: u64,
    direction: Direction,
}

// ---------------------------------------------------------------------------
// GateChain
// ---------------------------------------------------------------------------

pub struct GateChain {
    margin_cfg: MarginGuardConfig,
    thresholds: StructureThresholdsConfig,
    limits: PositionLimitsConfig,
    conflict_cfg: ConflictConfig,
    htf_cfg: HtfBiasConfig,
    session_filter: SessionFilter,
    signal_history: HashMap<String, VecDeque<SignalRecord>>,
}

impl GateChain {
    pub fn new(
        margin_cfg: MarginGuardConfig,
        thresholds: StructureThresholdsConfig,
        limits: PositionLimitsConfig,
        conflict_cfg: ConflictConfig,
        htf_cfg: HtfBiasConfig,
        session_filter: SessionFilter,
    ) -> Self {
        Self {
            margin_cfg,
            thresholds,
            limits,
            conflict_cfg,
            htf_cfg,
            session_filter,
            signal_history: HashMap::new(),
        }
    }

    /// Run the full chain. `Err` carries the first gate that blocked.
    pub fn evaluate(&mut self, ctx: &GateContext<'_>) -> Result<GatePass, GateBlock> {
        self.check_daily_stop(ctx)?;
        self.check_margin(ctx)?;
        self.check_structure_threshold(ctx)?;
        self.check_position_limit(ctx)?;
        self.check_conflict(ctx)?;
        let pass = self.check_htf_bias(ctx)?;
        self.check_session_filter(ctx)?;
        Ok(pass)
    }

    // -------------------------------------------------------------------------
    // 1. Daily soft stop
    // -------------------------------------------------------------------------

    fn check_daily_stop(&self, ctx: &GateContext<'_>) -> Result<(), GateBlock> {
        if ctx.daily_stop == DailyStopState::Clear {
            return Ok(());
        }
        Err(GateBlock {
            gate: "daily_soft_stop",
            reason: format!("daily stop active ({:?})", ctx.daily_stop),
        })
    }

    // -------------------------------------------------------------------------
    // 2. Margin & open-risk (live only)
    // -------------------------------------------------------------------------

    fn check_margin(&self, ctx: &GateContext<'_>) -> Result<(), GateBlock> {
        if ctx.mode != ExecutionMode::Live {
            return Ok(());
        }
        let account = match ctx.account {
            Some(account) => account,
            None => return Ok(()),
        };

        if let Some(margin_level) = account.margin_level {
            if margin_level < self.margin_cfg.min_margin_level {
                warn!(
                    symbol = ctx.symbol,
                    margin_level = %margin_level,
                    min = %self.margin_cfg.min_margin_level,
                    "trade_blocked_by_margin_guard"
                );
                return Err(GateBlock {
                    gate: "margin_guard",
                    reason: format!("margin level {margin_level} below minimum"),
                });
            }
        }

        if ctx.required_margin > Decimal::ZERO && account.free_margin > Decimal::ZERO {
            let usage_pct = ctx.required_margin / account.free_margin * dec!(100);
            if usage_pct > self.margin_cfg.max_margin_usage_pct {
                warn!(
                    symbol = ctx.symbol,
                    required_margin = %ctx.required_margin,
                    free_margin = %account.free_margin,
                    usage_pct = %usage_pct,
                    "trade_blocked_by_margin_guard"
                );
                return Err(GateBlock {
                    gate: "margin_guard",
                    reason: format!("margin usage {usage_pct}% above cap"),
                });
            }
        }

        if account.equity > Decimal::ZERO {
            let total_risk_pct =
                (ctx.total_open_risk + ctx.new_trade_risk) / account.equity * dec!(100);
            if total_risk_pct > self.margin_cfg.max_total_open_risk_pct {
                warn!(
                    symbol = ctx.symbol,
                    total_open_risk = %ctx.total_open_risk,
                    new_trade_risk = %ctx.new_trade_risk,
                    total_risk_pct = %total_risk_pct,
                    "trade_blocked_by_margin_guard"
                );
                return Err(GateBlock {
                    gate: "margin_guard",
                    reason: format!("total open risk {total_risk_pct}% above cap"),
                });
            }
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // 3. Structure-specific confidence threshold
    // -------------------------------------------------------------------------

    fn check_structure_threshold(&self, ctx: &GateContext<'_>) -> Result<(), GateBlock> {
        let direction = direction_of(ctx.side);
        let directional_key = format!("{}_{}", ctx.structure_type, direction);
        let threshold = self
            .thresholds
            .thresholds
            .get(&directional_key)
            .or_else(|| self.thresholds.thresholds.get(ctx.structure_type.as_str()))
            .copied()
            .unwrap_or(self.thresholds.default_threshold);

        if ctx.confidence < threshold {
            warn!(
                symbol = ctx.symbol,
                structure_type = %ctx.structure_type,
                confidence = %ctx.confidence,
                threshold = %threshold,
                "trade_blocked_by_structure_threshold"
            );
            return Err(GateBlock {
                gate: "structure_threshold",
                reason: format!(
                    "confidence {} below {} threshold {}",
                    ctx.confidence, directional_key, threshold
                ),
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // 4. Position limit
    // -------------------------------------------------------------------------

    fn check_position_limit(&self, ctx: &GateContext<'_>) -> Result<(), GateBlock> {
        let for_symbol = ctx
            .open_positions
            .iter()
            .filter(|p| p.symbol == ctx.symbol)
            .count();
        if for_symbol >= self.limits.max_positions_per_symbol {
            warn!(
                symbol = ctx.symbol,
                current_positions = for_symbol,
                max = self.limits.max_positions_per_symbol,
                "trade_blocked_by_position_limit"
            );
            return Err(GateBlock {
                gate: "position_limit",
                reason: format!("{for_symbol} positions open for symbol"),
            });
        }

        let same_direction = ctx
            .open_positions
            .iter()
            .filter(|p| p.symbol == ctx.symbol && p.side == ctx.side)
            .count();
        if same_direction >= self.limits.max_positions_per_direction {
            warn!(
                symbol = ctx.symbol,
                side = %ctx.side,
                current_positions = same_direction,
                max = self.limits.max_positions_per_direction,
                "trade_blocked_by_position_limit"
            );
            return Err(GateBlock {
                gate: "position_limit",
                reason: format!("{same_direction} same-direction positions open"),
            });
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // 5. Conflict resolver
    // -------------------------------------------------------------------------

    fn check_conflict(&mut self, ctx: &GateContext<'_>) -> Result<(), GateBlock> {
        if !self.conflict_cfg.enabled {
            return Ok(());
        }

        let direction = direction_of(ctx.side);
        let lookback = self.conflict_cfg.lookback_bars as u64;

        let ring = self
            .signal_history
            .entry(ctx.symbol.to_string())
            .or_default();

        // Drop records that fell out of the window.
        while let Some(front) = ring.front() {
            if ctx.bar_index.saturating_sub(front.bar_index) > lookback {
                ring.pop_front();
            } else {
                break;
            }
        }

        let opposing = ring.iter().any(|r| r.direction != direction);
        let verdict = if opposing {
            let required = self.conflict_cfg.base_threshold + self.conflict_cfg.threshold_bump;
            if ctx.confidence < required {
                warn!(
                    symbol = ctx.symbol,
                    side = %ctx.side,
                    confidence = %ctx.confidence,
                    required = %required,
                    lookback_bars = self.conflict_cfg.lookback_bars,
                    "trade_blocked_by_conflict_resolver"
                );
                Err(GateBlock {
                    gate: "conflict_resolver",
                    reason: format!(
                        "opposing signal in window; confidence {} below bumped threshold {}",
                        ctx.confidence, required
                    ),
                })
            } else {
                Ok(())
            }
        } else {
            Ok(())
        };

        // The current signal enters the ring regardless of the verdict.
        ring.push_back(SignalRecord {
            bar_index: ctx.bar_index,
            direction,
        });

        verdict
    }

    // -------------------------------------------------------------------------
    // 6. HTF bias
    // -------------------------------------------------------------------------

    fn check_htf_bias(&self, ctx: &GateContext<'_>) -> Result<GatePass, GateBlock> {
        let htf = match (self.htf_cfg.enabled, ctx.htf) {
            (true, Some(htf)) => htf,
            _ => {
                return Ok(GatePass {
                    adjusted_confidence: ctx.confidence,
                    htf_alignment: "unknown",
                })
            }
        };

        let direction = direction_of(ctx.side);
        let alignment = match (htf.bias, direction) {
            (BiasDirection::Bullish, Direction::Bullish)
            | (BiasDirection::Bearish, Direction::Bearish) => "aligned",
            (BiasDirection::Bullish, Direction::Bearish)
            | (BiasDirection::Bearish, Direction::Bullish) => "counter",
            (BiasDirection::Neutral, _) => "neutral",
        };

        let adjusted = match alignment {
            "aligned" => ctx.confidence + self.htf_cfg.bias_bonus,
            "counter" => ctx.confidence - self.htf_cfg.bias_penalty,
            _ => ctx.confidence,
        };

        if alignment == "counter" {
            let hard_blocked = match self.htf_cfg.hard_block {
                HardBlockMode::Always => true,
                HardBlockMode::Conditional => htf.is_clear_trend,
                HardBlockMode::Never => false,
            };

            if hard_blocked {
                // Elite override: very high original confidence on a strong
                // structure type, and never into a clear trend.
                let elite = ctx.confidence >= self.htf_cfg.countertrend_override_score
                    && self
                        .htf_cfg
                        .elite_structures
                        .iter()
                        .any(|s| s == ctx.structure_type.as_str())
                    && !htf.is_clear_trend;

                if !elite {
                    warn!(
                        symbol = ctx.symbol,
                        side = %ctx.side,
                        bias = %htf.bias,
                        alignment,
                        is_clear_trend = htf.is_clear_trend,
                        distance_atr = %htf.distance_atr,
                        "trade_blocked_by_htf_bias"
                    );
                    return Err(GateBlock {
                        gate: "htf_bias",
                        reason: format!(
                            "counter-trend against {} bias (clear_trend={})",
                            htf.bias, htf.is_clear_trend
                        ),
                    });
                }
                debug!(
                    symbol = ctx.symbol,
                    confidence = %ctx.confidence,
                    structure_type = %ctx.structure_type,
                    "htf elite override permitted counter-trend entry"
                );
            }
        }

        if self.htf_cfg.log_bias_checks {
            debug!(
                symbol = ctx.symbol,
                alignment,
                confidence = %ctx.confidence,
                adjusted = %adjusted,
                "htf bias check"
            );
        }

        Ok(GatePass {
            adjusted_confidence: adjusted.clamp(Decimal::ZERO, Decimal::ONE),
            htf_alignment: alignment,
        })
    }

    // -------------------------------------------------------------------------
    // 7. Session filter
    // -------------------------------------------------------------------------

    fn check_session_filter(&self, ctx: &GateContext<'_>) -> Result<(), GateBlock> {
        let session = match ctx.session {
            Some(session) => session,
            None => return Ok(()),
        };

        let (relevance, should_block) = self.session_filter.evaluate(ctx.symbol, session);
        if should_block {
            warn!(
                symbol = ctx.symbol,
                session,
                relevance = %relevance,
                "trade_blocked_by_session_filter"
            );
            return Err(GateBlock {
                gate: "session_filter",
                reason: format!("session {session} classified {relevance} for symbol"),
            });
        }
        Ok(())
    }
}

fn direction_of(side: Side) -> Direction {
    match side {
        Side::Buy => Direction::Bullish,
        Side::Sell => Direction::Bearish,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionFilterConfig, SessionFilterMode, SymbolSessionRules};
    use chrono::TimeZone;

    fn chain() -> GateChain {
        chain_with(SessionFilterConfig::default(), HtfBiasConfig::default())
    }

    fn chain_with(session_cfg: SessionFilterConfig, htf_cfg: HtfBiasConfig) -> GateChain {
        GateChain::new(
            MarginGuardConfig::default(),
            StructureThresholdsConfig::default(),
            PositionLimitsConfig::default(),
            ConflictConfig::default(),
            htf_cfg,
            SessionFilter::new(session_cfg),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap()
    }

    fn base_ctx<'a>(positions: &'a [Position], htf: Option<&'a HtfSnapshot>) -> GateContext<'a> {
        GateContext {
            symbol: "EURUSD",
            side: Side::Buy,
            structure_type: StructureType::FairValueGap,
            confidence: dec!(0.75),
            bar_index: 100,
            now: now(),
            session: Some("NY_AM"),
            mode: ExecutionMode::DryRun,
            daily_stop: DailyStopState::Clear,
            account: None,
            open_positions: positions,
            required_margin: Decimal::ZERO,
            total_open_risk: Decimal::ZERO,
            new_trade_risk: dec!(24.65),
            htf,
        }
    }

    fn open_position(symbol: &str, side: Side) -> Position {
        Position {
            ticket: 1,
            symbol: symbol.to_string(),
            side,
            volume: dec!(0.1),
            entry_price: dec!(1.1),
            sl: dec!(1.09),
            tp: dec!(1.12),
            magic: 0,
            opened_at: now(),
        }
    }

    fn bullish_htf(is_clear_trend: bool) -> HtfSnapshot {
        HtfSnapshot {
            bias: BiasDirection::Bullish,
            close: dec!(1.10180),
            ema: dec!(1.10000),
            atr: dec!(0.00100),
            distance: dec!(0.00180),
            distance_atr: dec!(1.8),
            is_clear_trend,
            computed_at: now(),
        }
    }

    #[test]
    fn clean_context_passes_all_gates() {
        let mut chain = chain();
        let positions = Vec::new();
        let pass = chain.evaluate(&base_ctx(&positions, None)).unwrap();
        assert_eq!(pass.adjusted_confidence, dec!(0.75));
        assert_eq!(pass.htf_alignment, "unknown");
    }

    #[test]
    fn daily_stop_blocks_first() {
        let mut chain = chain();
        let positions = Vec::new();
        let mut ctx = base_ctx(&positions, None);
        ctx.daily_stop = DailyStopState::SoftStopped;
        let block = chain.evaluate(&ctx).unwrap_err();
        assert_eq!(block.gate, "daily_soft_stop");
    }

    #[test]
    fn low_confidence_blocked_by_structure_threshold() {
        let mut chain = chain();
        let positions = Vec::new();
        let mut ctx = base_ctx(&positions, None);
        ctx.confidence = dec!(0.40); // default threshold 0.60
        let block = chain.evaluate(&ctx).unwrap_err();
        assert_eq!(block.gate, "structure_threshold");
    }

    #[test]
    fn directional_threshold_takes_precedence_over_type() {
        let mut thresholds = StructureThresholdsConfig::default();
        thresholds
            .thresholds
            .insert("fair_value_gap".to_string(), dec!(0.90));
        thresholds
            .thresholds
            .insert("fair_value_gap_bullish".to_string(), dec!(0.70));
        let mut chain = GateChain::new(
            MarginGuardConfig::default(),
            thresholds,
            PositionLimitsConfig::default(),
            ConflictConfig::default(),
            HtfBiasConfig::default(),
            SessionFilter::new(SessionFilterConfig::default()),
        );

        // 0.75 passes the 0.70 directional threshold despite the 0.90 type
        // threshold.
        let positions = Vec::new();
        assert!(chain.evaluate(&base_ctx(&positions, None)).is_ok());
    }

    /// Seed scenario 3: two open positions against a limit of two.
    #[test]
    fn position_limit_blocks_third_entry() {
        let mut chain = chain();
        let positions = vec![
            open_position("EURUSD", Side::Buy),
            open_position("EURUSD", Side::Sell),
        ];
        let block = chain.evaluate(&base_ctx(&positions, None)).unwrap_err();
        assert_eq!(block.gate, "position_limit");
    }

    #[test]
    fn same_direction_limit_blocks_second_buy() {
        let mut chain = chain();
        let positions = vec![open_position("EURUSD", Side::Buy)];
        let block = chain.evaluate(&base_ctx(&positions, None)).unwrap_err();
        assert_eq!(block.gate, "position_limit");
    }

    #[test]
    fn other_symbol_positions_do_not_count() {
        let mut chain = chain();
        let positions = vec![
            open_position("GBPUSD", Side::Buy),
            open_position("GBPUSD", Side::Sell),
        ];
        assert!(chain.evaluate(&base_ctx(&positions, None)).is_ok());
    }

    #[test]
    fn conflict_resolver_demands_bumped_confidence() {
        let mut chain = chain();
        let positions = Vec::new();

        // A SELL signal enters the ring.
        let mut sell_ctx = base_ctx(&positions, None);
        sell_ctx.side = Side::Sell;
        sell_ctx.bar_index = 95;
        assert!(chain.evaluate(&sell_ctx).is_ok());

        // A BUY within the lookback needs base (0.60) + bump (0.15) = 0.75.
        let mut buy_ctx = base_ctx(&positions, None);
        buy_ctx.confidence = dec!(0.70);
        buy_ctx.bar_index = 100;
        let block = chain.evaluate(&buy_ctx).unwrap_err();
        assert_eq!(block.gate, "conflict_resolver");

        // High-confidence BUY clears the bumped threshold.
        let mut strong_ctx = base_ctx(&positions, None);
        strong_ctx.confidence = dec!(0.80);
        strong_ctx.bar_index = 101;
        assert!(chain.evaluate(&strong_ctx).is_ok());
    }

    #[test]
    fn conflict_window_expires_old_signals() {
        let mut chain = chain();
        let positions = Vec::new();

        let mut sell_ctx = base_ctx(&positions, None);
        sell_ctx.side = Side::Sell;
        sell_ctx.bar_index = 10;
        assert!(chain.evaluate(&sell_ctx).is_ok());

        // 50 bars later the opposing record has aged out (lookback 12).
        let mut buy_ctx = base_ctx(&positions, None);
        buy_ctx.confidence = dec!(0.65);
        buy_ctx.bar_index = 60;
        assert!(chain.evaluate(&buy_ctx).is_ok());
    }

    #[test]
    fn aligned_htf_adds_bonus() {
        let mut chain = chain();
        let positions = Vec::new();
        let htf = bullish_htf(false);
        let pass = chain.evaluate(&base_ctx(&positions, Some(&htf))).unwrap();
        assert_eq!(pass.htf_alignment, "aligned");
        assert_eq!(pass.adjusted_confidence, dec!(0.80)); // 0.75 + 0.05
    }

    /// Seed scenario 4: conditional hard block on a clear counter-trend.
    #[test]
    fn counter_trend_in_clear_trend_is_blocked() {
        let mut chain = chain();
        let positions = Vec::new();
        let htf = bullish_htf(true);
        let mut ctx = base_ctx(&positions, Some(&htf));
        ctx.side = Side::Sell;
        ctx.confidence = dec!(0.95);

        let block = chain.evaluate(&ctx).unwrap_err();
        assert_eq!(block.gate, "htf_bias");
        assert!(block.reason.contains("clear_trend=true"));
    }

    #[test]
    fn counter_trend_outside_clear_trend_passes_with_penalty() {
        let mut chain = chain();
        let positions = Vec::new();
        let htf = bullish_htf(false);
        let mut ctx = base_ctx(&positions, Some(&htf));
        ctx.side = Side::Sell;

        let pass = chain.evaluate(&ctx).unwrap();
        assert_eq!(pass.htf_alignment, "counter");
        assert_eq!(pass.adjusted_confidence, dec!(0.65)); // 0.75 - 0.10
    }

    #[test]
    fn elite_override_permits_counter_trend_in_always_mode() {
        let mut htf_cfg = HtfBiasConfig::default();
        htf_cfg.hard_block = HardBlockMode::Always;
        let mut chain = chain_with(SessionFilterConfig::default(), htf_cfg);

        let positions = Vec::new();
        let htf = bullish_htf(false);
        let mut ctx = base_ctx(&positions, Some(&htf));
        ctx.side = Side::Sell;
        ctx.confidence = dec!(0.90); // above override score 0.85

        assert!(chain.evaluate(&ctx).is_ok());
    }

    #[test]
    fn rejection_structures_never_get_elite_override() {
        let mut htf_cfg = HtfBiasConfig::default();
        htf_cfg.hard_block = HardBlockMode::Always;
        let mut chain = chain_with(SessionFilterConfig::default(), htf_cfg);

        let positions = Vec::new();
        let htf = bullish_htf(false);
        let mut ctx = base_ctx(&positions, Some(&htf));
        ctx.side = Side::Sell;
        ctx.confidence = dec!(0.90);
        ctx.structure_type = StructureType::Rejection;

        let block = chain.evaluate(&ctx).unwrap_err();
        assert_eq!(block.gate, "htf_bias");
    }

    #[test]
    fn session_filter_enforce_blocks_avoid_combo() {
        let mut session_cfg = SessionFilterConfig::default();
        session_cfg.mode = SessionFilterMode::Enforce;
        session_cfg.symbol_rules.insert(
            "EURUSD".to_string(),
            SymbolSessionRules {
                ideal: vec!["LONDON".to_string()],
                acceptable: vec![],
                avoid: vec!["NY_AM".to_string()],
            },
        );
        let mut chain = chain_with(session_cfg, HtfBiasConfig::default());

        let positions = Vec::new();
        let block = chain.evaluate(&base_ctx(&positions, None)).unwrap_err();
        assert_eq!(block.gate, "session_filter");
    }

    #[test]
    fn live_mode_margin_guard_blocks_excess_total_risk() {
        let mut chain = chain();
        let positions = Vec::new();
        let account = AccountInfo {
            equity: dec!(10000),
            balance: dec!(10000),
            free_margin: dec!(10000),
            margin_level: Some(dec!(500)),
        };
        let mut ctx = base_ctx(&positions, None);
        ctx.mode = ExecutionMode::Live;
        ctx.account = Some(&account);
        // 3% cap: 280 existing + 25 new on 10k = 3.05%.
        ctx.total_open_risk = dec!(280);
        ctx.new_trade_risk = dec!(25);

        let block = chain.evaluate(&ctx).unwrap_err();
        assert_eq!(block.gate, "margin_guard");
    }
}
