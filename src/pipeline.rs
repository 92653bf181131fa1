// =============================================================================
// Trading Pipeline — bar-driven orchestrator
// =============================================================================
//
// Per bar, in this exact order:
//
//    1. reconcile closed positions (journal, risk ledger, SL-hit counter)
//    2. session rotation (optionally flattening tracked symbols)
//    3. daily reset when the UTC date advanced
//    4. market-open / symbol-tradable guard
//    5. bar counter (incremented before any early return below)
//    6. circuit breaker on session SL hits
//    7. volatility pause resume / active-check / trigger
//    8. pre-filters (minimum bars, ATR availability)
//    9. structure detection
//   10. decision generation through the exit planner
//   11. dedup to at most one decision per bar
//   12. risk sizing
//   13. gate chain
//   14. executor
//   15. journal entry cache + risk ledger + failure counters
//   16. session counters, onboarding, heartbeat
//
// Any error inside a bar is caught and logged; the bar counter has already
// advanced and the next bar proceeds normally.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::broker::{BrokerGateway, SymbolInfo};
use crate::config::EngineConfig;
use crate::decision::{Decision, DecisionStatus};
use crate::errors::{ConfigError, PipelineError};
use crate::executor::{EntryOrder, OrderExecutor};
use crate::exit_planner::{ExitPlanner, NearestStructures, ZoneRef};
use crate::gates::{GateChain, GateContext};
use crate::guards::{AccountGuards, DailyStopState};
use crate::htf::HtfBiasAnalyzer;
use crate::indicators::atr::compute_atr;
use crate::journal::{TradeEntry, TradeJournal};
use crate::market_data::BarSeries;
use crate::onboarding::OnboardingManager;
use crate::risk::{size_position, RiskLedger, SizeRejection};
use crate::session::SessionManager;
use crate::session_filter::SessionFilter;
use crate::structure::{Structure, StructureManager, StructureType};
use crate::types::{DecisionType, ExecutionMode, ExitReason, Side};

const ATR_WINDOW: usize = 14;

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub processed_bars: u64,
    pub decisions_generated: u64,
    pub orders_executed: u64,
}

/// Rolling volatility baselines per symbol for the pause trigger.
#[derive(Default)]
struct VolatilityBaseline {
    spreads: VecDeque<Decimal>,
    atrs: VecDeque<Decimal>,
}

impl VolatilityBaseline {
    fn averages(&self) -> (Decimal, Decimal) {
        let avg = |values: &VecDeque<Decimal>| {
            if values.is_empty() {
                Decimal::ZERO
            } else {
                values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u64)
            }
        };
        (avg(&self.spreads), avg(&self.atrs))
    }

    fn push(&mut self, spread: Decimal, atr: Decimal, cap: usize) {
        self.spreads.push_back(spread);
        self.atrs.push_back(atr);
        while self.spreads.len() > cap {
            self.spreads.pop_front();
        }
        while self.atrs.len() > cap {
            self.atrs.pop_front();
        }
    }
}

pub struct TradingPipeline<G: BrokerGateway> {
    cfg: EngineConfig,
    gateway: G,

    /// One detector set per symbol: debounce memory must not leak across
    /// symbol streams.
    structure_managers: HashMap<String, StructureManager>,
    session_mgr: SessionManager,
    session_filter: SessionFilter,
    exit_planner: ExitPlanner,
    gate_chain: GateChain,
    htf: HtfBiasAnalyzer,
    executor: OrderExecutor,
    guards: AccountGuards,
    journal: TradeJournal,
    onboarding: OnboardingManager,
    risk_ledger: RiskLedger,

    symbol_meta: HashMap<String, SymbolInfo>,
    symbol_points: HashMap<String, Decimal>,
    /// Open-position risk by ticket, released on close.
    ticket_risk: HashMap<u64, (String, Decimal)>,
    vol_baselines: HashMap<String, VolatilityBaseline>,

    stats: PipelineStats,
    exit_method_hist: HashMap<String, u64>,
    rr_gate_counts: HashMap<String, (u64, u64)>,
}

impl<G: BrokerGateway> TradingPipeline<G> {
    /// Build the pipeline, validating broker metadata for every configured
    /// symbol. Fails fast: a bad config never trades.
    pub fn new(cfg: EngineConfig, gateway: G, start: DateTime<Utc>) -> Result<Self, ConfigError> {
        let mut symbol_meta = HashMap::new();
        let mut symbol_points = HashMap::new();
        for symbol in &cfg.symbols {
            let meta = gateway.symbol_info(symbol).map_err(|_| {
                ConfigError::MissingBrokerMeta {
                    symbol: symbol.clone(),
                    field: "symbol_info",
                }
            })?;
            meta.validate(symbol)?;
            symbol_points.insert(symbol.clone(), meta.point);
            symbol_meta.insert(symbol.clone(), meta);
        }

        let equity = gateway
            .account_info()
            .map(|a| a.equity)
            .unwrap_or(cfg.system.sim_equity);

        let mut structure_managers = HashMap::new();
        for symbol in &cfg.symbols {
            structure_managers.insert(symbol.clone(), StructureManager::new(&cfg.detectors)?);
        }
        let session_mgr = SessionManager::new(&cfg.sessions)?;
        let session_filter = SessionFilter::new(cfg.session_filter.clone());
        let exit_planner = ExitPlanner::new(cfg.sltp.clone());
        let gate_chain = GateChain::new(
            cfg.risk.margin.clone(),
            cfg.structure_thresholds.clone(),
            cfg.position_limits.clone(),
            cfg.conflict.clone(),
            cfg.htf_bias.clone(),
            SessionFilter::new(cfg.session_filter.clone()),
        );
        let htf = HtfBiasAnalyzer::new(cfg.htf_bias.clone());
        let executor = OrderExecutor::new(
            cfg.execution.clone(),
            cfg.stop_guard.clone(),
            cfg.invalid_stops.clone(),
        );
        let guards = AccountGuards::new(cfg.risk.clone(), cfg.ftmo.clone(), equity, start);
        let journal = TradeJournal::new(&cfg.journal);
        let onboarding = OnboardingManager::new(cfg.onboarding.clone());

        Ok(Self {
            cfg,
            gateway,
            structure_managers,
            session_mgr,
            session_filter,
            exit_planner,
            gate_chain,
            htf,
            executor,
            guards,
            journal,
            onboarding,
            risk_ledger: RiskLedger::new(),
            symbol_meta,
            symbol_points,
            ticket_risk: HashMap::new(),
            vol_baselines: HashMap::new(),
            stats: PipelineStats::default(),
            exit_method_hist: HashMap::new(),
            rr_gate_counts: HashMap::new(),
        })
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    // =========================================================================
    // Per-bar processing
    // =========================================================================

    pub fn process_bar(&mut self, series: &BarSeries) -> Result<Vec<Decision>, PipelineError> {
        let symbol = series.symbol().to_string();
        let bar = match series.last() {
            Some(bar) => bar.clone(),
            None => return Ok(Vec::new()),
        };
        let now = bar.timestamp;

        // The bar counts even when a guard below returns early.
        self.stats.processed_bars += 1;

        // ── 1. Reconcile closed positions ────────────────────────────────
        self.reconcile_closures(now);

        // ── 2. Session rotation ──────────────────────────────────────────
        if let Some(rotation) = self.session_mgr.update_and_rotate(now) {
            if rotation.previous.is_some() && self.session_mgr.close_on_rotation() {
                self.flatten_tracked_symbols("session rotation close");
            }
        }

        // ── 3. Daily reset ───────────────────────────────────────────────
        let equity = self.current_equity();
        self.guards.daily_reset_if_new_day(now, equity);

        // ── 4. Market guard ──────────────────────────────────────────────
        if !self.gateway.is_market_open() || !self.gateway.is_symbol_tradable(&symbol) {
            info!(
                symbol = %symbol,
                session = %self.session_mgr.session_id(),
                timestamp = %now,
                "market_closed_skip"
            );
            return Ok(Vec::new());
        }

        // ── 6. Circuit breaker ───────────────────────────────────────────
        if self.session_mgr.counters.full_sl_hits >= self.cfg.system.max_full_sl_hits_per_session
        {
            warn!(
                symbol = %symbol,
                full_sl_hits = self.session_mgr.counters.full_sl_hits,
                max = self.cfg.system.max_full_sl_hits_per_session,
                "circuit_breaker_tripped"
            );
            return Ok(Vec::new());
        }

        // ── 7. Volatility pause ──────────────────────────────────────────
        self.session_mgr.maybe_auto_resume(now);
        if self.session_mgr.is_paused(now) {
            info!(
                symbol = %symbol,
                paused_until = ?self.session_mgr.paused_until(),
                "volatility_pause_active"
            );
            return Ok(Vec::new());
        }
        if self.update_volatility_state(&symbol, series, now) {
            return Ok(Vec::new());
        }

        // ── 8. Pre-filters ───────────────────────────────────────────────
        if series.len() < self.cfg.system.min_bars {
            return Ok(Vec::new());
        }
        let atr = match compute_atr(series.bars(), ATR_WINDOW) {
            Some(atr) if !atr.is_zero() => atr,
            _ => return Ok(Vec::new()),
        };

        // ── 9. Structure detection ───────────────────────────────────────
        let session_id = self.session_mgr.session_id();
        let structures = match self.structure_managers.get_mut(&symbol) {
            Some(manager) => manager.detect_structures(series, &session_id),
            None => Vec::new(),
        };
        if structures.is_empty() {
            return Ok(Vec::new());
        }
        self.session_mgr.counters.decisions_attempted += structures.len() as u64;

        // ── 10. Decision generation ──────────────────────────────────────
        let entry = bar.close;
        let mut decisions: Vec<Decision> = structures
            .iter()
            .filter_map(|s| self.generate_decision(s, &structures, entry, atr, now, &session_id))
            .collect();
        self.stats.decisions_generated += decisions.len() as u64;

        // ── 11. Dedup: at most one decision per bar ──────────────────────
        if decisions.len() > 1 {
            decisions.sort_by(|a, b| b.confidence_score.cmp(&a.confidence_score));
            info!(
                symbol = %symbol,
                kept = %decisions[0].structure_id,
                dropped = decisions.len() - 1,
                "decisions_deduplicated"
            );
            decisions.truncate(1);
        }

        // ── 12..15. Size, gate, execute ──────────────────────────────────
        if let Some(decision) = decisions.first_mut() {
            self.drive_decision(decision, series, now, equity);
        }

        // ── 16. Counters, onboarding, heartbeat ──────────────────────────
        let accepted = decisions
            .iter()
            .filter(|d| d.status == DecisionStatus::Executed)
            .count();
        self.session_mgr.counters.decisions_accepted += accepted as u64;
        self.onboarding
            .record_decisions(&symbol, &decisions, Some(&session_id), 0, now);

        debug!(
            symbol = %symbol,
            session = %session_id,
            processed_bars = self.stats.processed_bars,
            decisions_attempted = self.session_mgr.counters.decisions_attempted,
            decisions_accepted = self.session_mgr.counters.decisions_accepted,
            "bar heartbeat"
        );

        Ok(decisions)
    }

    // =========================================================================
    // Step helpers
    // =========================================================================

    fn reconcile_closures(&mut self, now: DateTime<Utc>) {
        let outcomes = self
            .journal
            .reconcile(&self.gateway, now, &self.symbol_points);
        for outcome in &outcomes {
            if let Some((symbol, risk)) = self.ticket_risk.remove(&outcome.ticket) {
                self.risk_ledger.release(&symbol, risk);
            }
            if outcome.exit_reason == ExitReason::SlHit {
                self.session_mgr.counters.full_sl_hits += 1;
            }
        }
    }

    fn flatten_tracked_symbols(&mut self, reason: &str) {
        for symbol in self.cfg.symbols.clone() {
            let positions = match self.gateway.positions(Some(&symbol)) {
                Ok(positions) => positions,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "position listing failed during flatten");
                    continue;
                }
            };
            for position in positions {
                if let Err(e) = self.gateway.close_position(position.ticket, reason) {
                    warn!(
                        symbol = %symbol,
                        ticket = position.ticket,
                        error = %e,
                        "position close failed"
                    );
                }
            }
        }
    }

    fn current_equity(&self) -> Decimal {
        self.gateway
            .account_info()
            .map(|a| a.equity)
            .unwrap_or(self.cfg.system.sim_equity)
    }

    /// Update rolling spread/ATR baselines and fire the volatility pause when
    /// the current bar spikes beyond them. Returns true when paused.
    fn update_volatility_state(
        &mut self,
        symbol: &str,
        series: &BarSeries,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.cfg.sessions.volatility_pause.enabled {
            return false;
        }

        let spread = match self.gateway.tick(symbol) {
            Ok(tick) => tick.spread(),
            Err(_) => return false,
        };
        let atr = match compute_atr(series.bars(), ATR_WINDOW) {
            Some(atr) => atr,
            None => return false,
        };

        let baseline = self.vol_baselines.entry(symbol.to_string()).or_default();
        let (spread_avg, atr_avg) = baseline.averages();
        baseline.push(spread, atr, self.cfg.sessions.volatility_pause.lookback_bars);

        self.session_mgr
            .check_volatility_trigger(now, spread, spread_avg, atr, atr_avg)
    }

    /// Build a decision for one structure through the exit planner.
    fn generate_decision(
        &mut self,
        structure: &Structure,
        all_structures: &[Structure],
        entry: Decimal,
        atr: Decimal,
        now: DateTime<Utc>,
        session_id: &str,
    ) -> Option<Decision> {
        let side = structure.direction.side();
        let meta = self.symbol_meta.get(&structure.symbol)?.clone();

        let nearest = nearest_structures(all_structures, entry);

        let (mut sl, mut tp, method, expected_rr) = if self.exit_planner.enabled() {
            let plan = self.exit_planner.plan(side, entry, atr, &nearest, &meta)?;
            (plan.sl, plan.tp, plan.method.to_string(), Some(plan.expected_rr))
        } else {
            // Structure-range fallback when planning is disabled.
            let range = structure.price_range();
            match side {
                Side::Buy => (
                    structure.low_price - range * dec!(0.1),
                    entry + range * dec!(2.0),
                    "legacy".to_string(),
                    None,
                ),
                Side::Sell => (
                    structure.high_price + range * dec!(0.1),
                    entry - range * dec!(2.0),
                    "legacy".to_string(),
                    None,
                ),
            }
        };

        // Safety clamp: if a level collided with entry, nudge it one epsilon
        // to the correct side.
        let epsilon = (structure.price_range() * dec!(0.01)).max(meta.point);
        match side {
            Side::Buy => {
                if sl >= entry {
                    sl = entry - epsilon;
                }
                if tp <= entry {
                    tp = entry + epsilon;
                }
            }
            Side::Sell => {
                if sl <= entry {
                    sl = entry + epsilon;
                }
                if tp >= entry {
                    tp = entry - epsilon;
                }
            }
        }

        let (risk, reward) = match side {
            Side::Buy => (entry - sl, tp - entry),
            Side::Sell => (sl - entry, entry - tp),
        };
        if risk <= Decimal::ZERO || reward <= Decimal::ZERO {
            return None;
        }
        let rr = reward / risk;

        *self.exit_method_hist.entry(method.clone()).or_insert(0) += 1;
        let gate_counts = self.rr_gate_counts.entry(method.clone()).or_insert((0, 0));
        gate_counts.1 += 1;
        if rr >= self.exit_planner.min_rr_gate() {
            gate_counts.0 += 1;
        }

        let decision = Decision {
            decision_type: match side {
                Side::Buy => DecisionType::Buy,
                Side::Sell => DecisionType::Sell,
            },
            symbol: structure.symbol.clone(),
            timestamp: now,
            session_id: session_id.to_string(),
            entry_price: entry,
            stop_loss: sl,
            take_profit: tp,
            position_size: Decimal::ZERO,
            risk_reward_ratio: rr,
            structure_id: structure.id.clone(),
            confidence_score: structure.quality_score,
            reasoning: structure.structure_type.to_string(),
            status: DecisionStatus::Validated,
            metadata: [
                (
                    "structure_type".to_string(),
                    json!(structure.structure_type.as_str()),
                ),
                ("exit_method".to_string(), json!(method)),
                (
                    "expected_rr".to_string(),
                    json!(expected_rr.unwrap_or(rr).to_string()),
                ),
                ("post_clamp_rr".to_string(), json!(rr.to_string())),
            ]
            .into_iter()
            .collect(),
        };

        if let Err(e) = decision.validate() {
            warn!(symbol = %structure.symbol, error = %e, "generated decision failed validation");
            return None;
        }

        Some(decision)
    }

    /// Steps 12-15: risk sizing, gate chain, executor, bookkeeping.
    fn drive_decision(
        &mut self,
        decision: &mut Decision,
        series: &BarSeries,
        now: DateTime<Utc>,
        equity: Decimal,
    ) {
        let symbol = decision.symbol.clone();
        let side = match decision.decision_type.side() {
            Some(side) => side,
            None => return,
        };
        let meta = match self.symbol_meta.get(&symbol) {
            Some(meta) => meta.clone(),
            None => return,
        };

        // Daily stop evaluation (live only; simulated modes keep a flat
        // equity curve anyway). Runs before sizing so a stopped day never
        // emits another `execution_sized` event.
        let daily_stop = if self.executor.mode() == ExecutionMode::Live {
            self.guards.observe_equity(equity);
            let check = self.guards.check_daily_stops(equity);
            if check.newly_hard {
                self.flatten_tracked_symbols("daily hard stop flatten");
            }
            check.state
        } else {
            DailyStopState::Clear
        };
        if daily_stop != DailyStopState::Clear {
            decision.status = DecisionStatus::Rejected;
            return;
        }

        if self.executor.mode() == ExecutionMode::Live && self.guards.ftmo_blocked() {
            decision.status = DecisionStatus::Rejected;
            return;
        }

        // ── 12. Risk sizing under probation-adjusted caps ────────────────
        let risk_cfg = self
            .onboarding
            .apply_probation_overrides(&symbol, &self.cfg.risk);
        let sized = match size_position(
            &symbol,
            side,
            equity,
            decision.entry_price,
            decision.stop_loss,
            &meta,
            risk_cfg.per_trade_pct,
            risk_cfg.per_symbol_open_risk_cap_pct,
            self.risk_ledger.open_risk(&symbol),
        ) {
            Ok(sized) => sized,
            Err(SizeRejection::RiskTooSmall { .. }) | Err(SizeRejection::RiskCapHit { .. }) => {
                decision.status = DecisionStatus::Rejected;
                return;
            }
        };
        decision.position_size = sized.volume;

        // ── 13. Gate chain ───────────────────────────────────────────────
        let open_positions = self
            .gateway
            .positions(Some(&symbol))
            .unwrap_or_default();
        let account = self.gateway.account_info().ok();
        let htf_snapshot = self.htf.snapshot(&symbol, &self.gateway, now);
        let structure_type: StructureType = decision
            .metadata
            .get("structure_type")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(StructureType::OrderBlock);

        let ctx = GateContext {
            symbol: &symbol,
            side,
            structure_type,
            confidence: decision.confidence_score,
            bar_index: series.current_index().unwrap_or(0),
            now,
            session: self.session_mgr.current_session(),
            mode: self.executor.mode(),
            daily_stop,
            account: account.as_ref(),
            open_positions: &open_positions,
            required_margin: sized.volume * meta.margin_initial,
            total_open_risk: self.risk_ledger.total_open_risk(),
            new_trade_risk: sized.new_trade_risk,
            htf: htf_snapshot.as_ref(),
        };

        let pass = match self.gate_chain.evaluate(&ctx) {
            Ok(pass) => pass,
            Err(block) => {
                debug!(symbol = %symbol, gate = block.gate, reason = %block.reason, "decision blocked");
                decision.status = DecisionStatus::Rejected;
                return;
            }
        };
        decision.confidence_score = pass.adjusted_confidence;

        // ── 14. Executor ─────────────────────────────────────────────────
        if self.guards.failures_saturated(now) {
            warn!(
                symbol = %symbol,
                consecutive_failures = self.guards.consecutive_failures(),
                "execution paused by failure saturation"
            );
            decision.status = DecisionStatus::Rejected;
            return;
        }

        if !self.onboarding.should_execute(&symbol) {
            info!(symbol = %symbol, "observe-only symbol: decision recorded, not executed");
            return;
        }

        let order = EntryOrder {
            symbol: symbol.clone(),
            side,
            volume: sized.volume,
            entry: decision.entry_price,
            sl: decision.stop_loss,
            tp: decision.take_profit,
            comment: format!("meridian_{}", structure_type.as_str()),
        };
        let result = self.executor.execute(&mut self.gateway, &order, &meta);

        // ── 15. Bookkeeping ──────────────────────────────────────────────
        if result.success {
            decision.status = DecisionStatus::Executed;
            decision.stop_loss = result.final_sl;
            decision.take_profit = result.final_tp;
            decision.position_size = result.final_volume;
            self.stats.orders_executed += 1;
            self.guards.record_send_success();
            self.risk_ledger.add_open_risk(&symbol, sized.new_trade_risk);

            if let Some(ticket) = result.ticket {
                self.ticket_risk
                    .insert(ticket, (symbol.clone(), sized.new_trade_risk));

                let session_name = self.session_mgr.session_id();
                let relevance = self.session_filter.relevance(&symbol, &session_name);
                self.journal.cache_entry(TradeEntry {
                    ticket,
                    symbol: symbol.clone(),
                    direction: side,
                    structure_type: structure_type.as_str().to_string(),
                    entry_time: now,
                    entry_price: decision.entry_price,
                    sl: result.final_sl,
                    tp: result.final_tp,
                    volume: result.final_volume,
                    intended_rr: decision.risk_reward_ratio,
                    magic: 0,
                    comment: order.comment.clone(),
                    session_name: session_name.clone(),
                    session_relevance: relevance.to_string(),
                    htf_bias: htf_snapshot
                        .as_ref()
                        .map(|h| h.bias.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    htf_alignment: pass.htf_alignment.to_string(),
                    htf_distance_atr: htf_snapshot.as_ref().map(|h| h.distance_atr),
                    htf_clear_trend: htf_snapshot.as_ref().map(|h| h.is_clear_trend),
                });
            }
        } else {
            decision.status = DecisionStatus::Rejected;
            if !result.precheck_block {
                self.guards.record_send_failure(now);
            }
        }
    }

    // =========================================================================
    // Session finalisation
    // =========================================================================

    /// Emit the end-of-session exit summary and detector counters.
    pub fn finalize_session(&self) {
        let pct = |(passed, total): (u64, u64)| {
            if total == 0 {
                0.0
            } else {
                passed as f64 / total as f64 * 100.0
            }
        };

        let overall = self
            .rr_gate_counts
            .values()
            .fold((0u64, 0u64), |acc, v| (acc.0 + v.0, acc.1 + v.1));

        info!(
            exit_method_hist = ?self.exit_method_hist,
            overall_rr_gate_pct = pct(overall),
            by_method = ?self
                .rr_gate_counts
                .iter()
                .map(|(k, v)| (k.clone(), pct(*v)))
                .collect::<HashMap<_, _>>(),
            processed_bars = self.stats.processed_bars,
            decisions_generated = self.stats.decisions_generated,
            orders_executed = self.stats.orders_executed,
            "dry_run_exit_summary"
        );

        for manager in self.structure_managers.values() {
            manager.log_summary();
        }
    }

    pub fn journal(&self) -> &TradeJournal {
        &self.journal
    }
}

/// Nearest structure zone per planner-relevant type, measured from entry.
fn nearest_structures(structures: &[Structure], entry: Decimal) -> NearestStructures {
    let mut nearest = NearestStructures::default();

    let mut pick = |filter_type: StructureType| -> Option<ZoneRef> {
        structures
            .iter()
            .filter(|s| s.structure_type == filter_type)
            .min_by_key(|s| (s.midpoint() - entry).abs())
            .map(|s| ZoneRef {
                upper: s.high_price,
                lower: s.low_price,
            })
    };

    nearest.order_block = pick(StructureType::OrderBlock);
    nearest.fair_value_gap = pick(StructureType::FairValueGap);
    nearest.rejection = pick(StructureType::Rejection);
    nearest
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Retcode, SimBroker};
    use crate::market_data::Bar;
    use chrono::TimeZone;

    fn eurusd_info() -> SymbolInfo {
        SymbolInfo {
            point: dec!(0.00001),
            digits: 5,
            contract_size: dec!(100000),
            volume_min: dec!(0.01),
            volume_step: dec!(0.01),
            volume_max: dec!(100),
            stops_level: 0,
            min_stop_distance: dec!(0.0001),
            max_stop_distance: None,
            sl_hard_floor_points: 10,
            margin_initial: Decimal::ZERO,
        }
    }

    fn test_config(dir: &std::path::Path) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.symbols = vec!["EURUSD".to_string()];
        cfg.system.min_bars = 20;
        cfg.execution.mode = ExecutionMode::Live;
        cfg.execution.enable_real_orders = true;
        cfg.journal.dir = dir.join("journal").to_string_lossy().into_owned();
        cfg.onboarding.state_path = dir
            .join("onboarding.json")
            .to_string_lossy()
            .into_owned();
        cfg.broker_symbols
            .insert("EURUSD".to_string(), eurusd_info());
        cfg
    }

    fn sim_broker() -> SimBroker {
        let mut symbols = HashMap::new();
        symbols.insert("EURUSD".to_string(), eurusd_info());
        SimBroker::new(symbols, dec!(10000))
    }

    fn start_ts() -> DateTime<Utc> {
        // LONDON session.
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap()
    }

    fn bar_at(
        i: usize,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    ) -> Bar {
        Bar::new(
            open,
            high,
            low,
            close,
            dec!(1000),
            start_ts() + chrono::Duration::minutes(15 * i as i64),
        )
        .unwrap()
    }

    /// Quiet series, then a displacement bar and a break bar that fire the
    /// order-block detector (and friends) on the final bar.
    fn signal_series() -> BarSeries {
        let mut series = BarSeries::new("EURUSD", "M15", 500);
        for i in 0..30 {
            series
                .push(bar_at(i, dec!(1.1000), dec!(1.1010), dec!(1.0990), dec!(1.1005)))
                .unwrap();
        }
        series
            .push(bar_at(30, dec!(1.1000), dec!(1.1045), dec!(1.0995), dec!(1.1040)))
            .unwrap();
        series
            .push(bar_at(31, dec!(1.1040), dec!(1.1060), dec!(1.1035), dec!(1.1055)))
            .unwrap();
        series
    }

    fn pipeline_with(
        dir: &std::path::Path,
        broker: SimBroker,
    ) -> TradingPipeline<SimBroker> {
        TradingPipeline::new(test_config(dir), broker, start_ts()).unwrap()
    }

    /// Replay the series bar by bar, the way the live loop feeds it, and
    /// collect every decision the pipeline produced along the way.
    fn run_series(pipeline: &mut TradingPipeline<SimBroker>, series: &BarSeries) -> Vec<Decision> {
        let mut partial = BarSeries::new(series.symbol(), series.timeframe(), 500);
        let mut all = Vec::new();
        for bar in series.bars() {
            partial.push(bar.clone()).unwrap();
            pipeline.gateway_mut().update_from_bar("EURUSD", bar);
            all.extend(pipeline.process_bar(&partial).unwrap());
        }
        all
    }

    #[test]
    fn signal_bars_produce_exactly_one_executed_decision() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline_with(dir.path(), sim_broker());
        let series = signal_series();

        let decisions = run_series(&mut pipeline, &series);
        assert!(!decisions.is_empty());

        let executed: Vec<&Decision> = decisions
            .iter()
            .filter(|d| d.status == DecisionStatus::Executed)
            .collect();
        assert_eq!(executed.len(), 1);
        let decision = executed[0];
        assert_eq!(decision.decision_type, DecisionType::Buy);
        assert!(decision.risk_reward_ratio >= dec!(1.5));
        assert!(decision.position_size > Decimal::ZERO);

        // Exactly one position on the book, with risk in the ledger; later
        // same-direction decisions were blocked by the position limit.
        assert_eq!(pipeline.gateway_mut().open_position_count(), 1);
        assert!(pipeline.risk_ledger.open_risk("EURUSD") > Decimal::ZERO);
        assert_eq!(pipeline.journal().cached_entry_count(), 1);
        assert_eq!(pipeline.stats().orders_executed, 1);
    }

    #[test]
    fn two_runs_are_deterministic() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let mut a = pipeline_with(dir_a.path(), sim_broker());
        let mut b = pipeline_with(dir_b.path(), sim_broker());
        let series = signal_series();

        let da = run_series(&mut a, &series);
        let db = run_series(&mut b, &series);

        assert_eq!(
            serde_json::to_string(&da).unwrap(),
            serde_json::to_string(&db).unwrap()
        );
        assert_eq!(a.stats().processed_bars, b.stats().processed_bars);
    }

    #[test]
    fn quiet_series_generates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline_with(dir.path(), sim_broker());

        let mut series = BarSeries::new("EURUSD", "M15", 500);
        for i in 0..40 {
            series
                .push(bar_at(i, dec!(1.1000), dec!(1.1010), dec!(1.0990), dec!(1.1005)))
                .unwrap();
        }
        let decisions = run_series(&mut pipeline, &series);
        assert!(decisions.is_empty());
        assert_eq!(pipeline.stats().processed_bars, 40);
        assert_eq!(pipeline.gateway_mut().open_position_count(), 0);
    }

    #[test]
    fn position_limit_blocks_when_book_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut broker = sim_broker();
        // Pre-seed one BUY position; max_positions_per_direction default is 1.
        broker.set_tick("EURUSD", dec!(1.10030), dec!(1.10034), start_ts());
        let _ = broker.order_send(&crate::broker::OrderRequest {
            action: crate::broker::OrderAction::Deal,
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: dec!(0.10),
            price: dec!(1.10030),
            sl: dec!(1.09900),
            tp: dec!(1.10300),
            deviation: 10,
            magic: 0,
            comment: "preseed".to_string(),
            type_filling: Default::default(),
            position: None,
        });

        let mut pipeline = pipeline_with(dir.path(), broker);
        let decisions = run_series(&mut pipeline, &signal_series());

        assert!(!decisions.is_empty());
        assert!(decisions
            .iter()
            .all(|d| d.status == DecisionStatus::Rejected));
        // Only the pre-seeded position remains.
        assert_eq!(pipeline.gateway_mut().open_position_count(), 1);
    }

    #[test]
    fn daily_soft_stop_suppresses_execution() {
        let dir = tempfile::tempdir().unwrap();
        let mut broker = sim_broker();
        // Down 1.05% from the 10k baseline.
        broker.set_equity(dec!(9895));
        let mut pipeline = pipeline_with(dir.path(), broker);
        // Baseline was captured at construction from current equity (9895);
        // drop further to cross the -1% soft stop.
        pipeline.gateway_mut().set_equity(dec!(9780));

        let decisions = run_series(&mut pipeline, &signal_series());
        assert!(!decisions.is_empty());
        assert!(decisions
            .iter()
            .all(|d| d.status == DecisionStatus::Rejected));
        assert_eq!(pipeline.gateway_mut().open_position_count(), 0);
    }

    #[test]
    fn circuit_breaker_stops_bar_processing() {
        let dir = tempfile::tempdir().unwrap();
        // One all-day window so no rotation resets the counters mid-series.
        let mut cfg = test_config(dir.path());
        cfg.sessions.windows = vec![crate::config::SessionWindowConfig {
            name: "ALL_DAY".to_string(),
            start_utc: "00:00".to_string(),
            end_utc: "23:59".to_string(),
            max_trades_per_hour: 10,
            score_bonus: dec!(0),
        }];
        let mut pipeline = TradingPipeline::new(cfg, sim_broker(), start_ts()).unwrap();

        // Enter the session, then saturate the SL-hit counter.
        let mut warmup = BarSeries::new("EURUSD", "M15", 500);
        warmup
            .push(bar_at(0, dec!(1.1000), dec!(1.1010), dec!(1.0990), dec!(1.1005)))
            .unwrap();
        pipeline
            .gateway_mut()
            .update_from_bar("EURUSD", &warmup.last().unwrap().clone());
        pipeline.process_bar(&warmup).unwrap();

        pipeline.session_mgr.counters.full_sl_hits = 2;

        let series = signal_series();
        let mut partial = BarSeries::new("EURUSD", "M15", 500);
        let mut decisions = Vec::new();
        for bar in series.bars() {
            partial.push(bar.clone()).unwrap();
            pipeline.gateway_mut().update_from_bar("EURUSD", bar);
            decisions.extend(pipeline.process_bar(&partial).unwrap());
        }
        assert!(decisions.is_empty());
        assert_eq!(pipeline.gateway_mut().open_position_count(), 0);
    }

    #[test]
    fn precheck_block_does_not_count_as_send_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        // Impossible floor: every order fails the pre-check.
        cfg.stop_guard.default_symbol_floor_points = 100000;
        let mut pipeline =
            TradingPipeline::new(cfg, sim_broker(), start_ts()).unwrap();

        let decisions = run_series(&mut pipeline, &signal_series());
        assert!(!decisions.is_empty());
        assert!(decisions
            .iter()
            .all(|d| d.status == DecisionStatus::Rejected));
        assert_eq!(pipeline.guards.consecutive_failures(), 0);
    }

    #[test]
    fn broker_failures_feed_the_cooldown_counter() {
        let dir = tempfile::tempdir().unwrap();
        let mut broker = sim_broker();
        // One fatal rejection per signal bar; fatal codes are not retried.
        broker.script_retcodes([Retcode::Other(10013), Retcode::Other(10013)]);
        let mut pipeline = pipeline_with(dir.path(), broker);

        let decisions = run_series(&mut pipeline, &signal_series());
        assert!(decisions
            .iter()
            .all(|d| d.status == DecisionStatus::Rejected));
        assert_eq!(pipeline.gateway_mut().open_position_count(), 0);
        assert_eq!(pipeline.guards.consecutive_failures(), 2);
    }

    #[test]
    fn sl_hit_updates_circuit_counter_and_releases_risk() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline_with(dir.path(), sim_broker());
        let series = signal_series();
        run_series(&mut pipeline, &series);
        assert_eq!(pipeline.gateway_mut().open_position_count(), 1);
        let risk_before = pipeline.risk_ledger.open_risk("EURUSD");
        assert!(risk_before > Decimal::ZERO);

        // The broker stops the position out before the next bar.
        let positions = pipeline.gateway_mut().positions(Some("EURUSD")).unwrap();
        let ticket = positions[0].ticket;
        let sl = positions[0].sl;
        let close_time = series.last().unwrap().timestamp + chrono::Duration::minutes(10);
        pipeline
            .gateway_mut()
            .force_close(ticket, sl, "sl hit", close_time);

        // Next bar reconciles the closure.
        let mut extended = series.clone();
        extended
            .push(bar_at(32, dec!(1.1055), dec!(1.1065), dec!(1.1045), dec!(1.1050)))
            .unwrap();
        pipeline
            .gateway_mut()
            .update_from_bar("EURUSD", extended.last().unwrap());
        pipeline.process_bar(&extended).unwrap();

        assert_eq!(pipeline.session_mgr.counters.full_sl_hits, 1);
        assert_eq!(pipeline.risk_ledger.open_risk("EURUSD"), Decimal::ZERO);
    }

    #[test]
    fn missing_broker_meta_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        // Gateway that knows nothing about EURUSD.
        let empty = SimBroker::new(HashMap::new(), dec!(10000));
        assert!(TradingPipeline::new(cfg, empty, start_ts()).is_err());
    }

    #[test]
    fn rotation_close_flattens_positions() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.sessions.close_positions_on_session_end = true;
        let mut pipeline =
            TradingPipeline::new(cfg, sim_broker(), start_ts()).unwrap();

        let series = signal_series();
        run_series(&mut pipeline, &series);
        assert_eq!(pipeline.gateway_mut().open_position_count(), 1);

        // Next bar lands in NY_PM: rotation closes the NY_AM position.
        let mut extended = series.clone();
        let ny_pm = Utc.with_ymd_and_hms(2025, 6, 2, 17, 10, 0).unwrap();
        extended
            .push(
                Bar::new(dec!(1.1055), dec!(1.1065), dec!(1.1045), dec!(1.1050), dec!(1000), ny_pm)
                    .unwrap(),
            )
            .unwrap();
        pipeline
            .gateway_mut()
            .update_from_bar("EURUSD", extended.last().unwrap());
        pipeline.process_bar(&extended).unwrap();

        assert_eq!(pipeline.gateway_mut().open_position_count(), 0);
    }

    #[test]
    fn observe_only_symbol_records_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.onboarding.symbols.insert(
            "EURUSD".to_string(),
            crate::config::SymbolOnboardingOverrides {
                initial_state: Some("observe_only".to_string()),
                execute_when_promoted: Some(true),
                probation_min_sessions: Some(5),
                probation_min_trades: Some(50),
                max_validation_errors: Some(0),
                risk_cap_multiplier_during_probation: Some(dec!(0.5)),
            },
        );
        let mut pipeline =
            TradingPipeline::new(cfg, sim_broker(), start_ts()).unwrap();

        let decisions = run_series(&mut pipeline, &signal_series());
        assert!(!decisions.is_empty());
        // Decisions generated and validated, but no order reached the broker.
        assert!(decisions
            .iter()
            .all(|d| d.status == DecisionStatus::Validated));
        assert_eq!(pipeline.gateway_mut().open_position_count(), 0);
        assert!(pipeline.onboarding.get_state("EURUSD").trades_seen >= 1);
    }
}
