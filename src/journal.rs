// =============================================================================
// Trade Journal — entry cache plus exit reconciliation
// =============================================================================
//
// On a successful submission the pipeline caches the entry (with its session
// and HTF context). Each bar, the journal pulls the broker's deal history and
// joins closing deals against cached entries, computing pips, achieved RR,
// hold time and the win/loss/breakeven classification.
//
// Records append to one JSON file per UTC day. A recorded-ticket set prevents
// duplicates within a process; a closing deal with no cached entry (e.g.
// after a restart) still produces a minimal record instead of being dropped.
//
// Persistence failures are logged and swallowed: trading never blocks on
// journal I/O.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::broker::{BrokerGateway, Deal, DealEntry};
use crate::config::JournalConfig;
use crate::types::{ExitReason, OutcomeKind, Side};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Entry details cached at execution time for later linking to the exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEntry {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Side,
    pub structure_type: String,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub volume: Decimal,
    pub intended_rr: Decimal,
    #[serde(default)]
    pub magic: i64,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub session_name: String,
    #[serde(default)]
    pub session_relevance: String,
    #[serde(default)]
    pub htf_bias: String,
    #[serde(default)]
    pub htf_alignment: String,
    #[serde(default)]
    pub htf_distance_atr: Option<Decimal>,
    #[serde(default)]
    pub htf_clear_trend: Option<bool>,
}

/// Complete trade record: the cached entry joined with the closing deal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub ticket: u64,
    pub symbol: String,
    /// "BUY" / "SELL", or "UNKNOWN" when no entry was cached.
    pub direction: String,
    pub structure_type: String,
    pub entry_time: Option<DateTime<Utc>>,
    pub entry_price: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub volume: Decimal,
    pub intended_rr: Decimal,
    pub exit_time: DateTime<Utc>,
    pub exit_price: Decimal,
    pub exit_reason: ExitReason,
    pub pnl_pips: Decimal,
    pub pnl_usd: Decimal,
    pub achieved_rr: Decimal,
    pub hold_time_minutes: Decimal,
    pub outcome: OutcomeKind,
    #[serde(default)]
    pub session_name: String,
    #[serde(default)]
    pub session_relevance: String,
    #[serde(default)]
    pub htf_bias: String,
    #[serde(default)]
    pub htf_alignment: String,
}

/// Aggregate view over one day's journal file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DaySummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakevens: usize,
    pub win_rate_pct: Decimal,
    pub total_pnl_usd: Decimal,
    pub avg_achieved_rr: Decimal,
    pub by_structure: HashMap<String, usize>,
    pub by_symbol: HashMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

pub struct TradeJournal {
    enabled: bool,
    dir: PathBuf,
    entry_cache: HashMap<u64, TradeEntry>,
    recorded: HashSet<u64>,
    last_check: Option<DateTime<Utc>>,
}

impl TradeJournal {
    pub fn new(cfg: &JournalConfig) -> Self {
        let dir = PathBuf::from(&cfg.dir);
        if cfg.enabled {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %e, "journal directory creation failed");
            }
        }
        Self {
            enabled: cfg.enabled,
            dir,
            entry_cache: HashMap::new(),
            recorded: HashSet::new(),
            last_check: None,
        }
    }

    pub fn cache_entry(&mut self, entry: TradeEntry) {
        if !self.enabled {
            return;
        }
        info!(
            ticket = entry.ticket,
            symbol = %entry.symbol,
            direction = %entry.direction,
            structure_type = %entry.structure_type,
            entry_price = %entry.entry_price,
            sl = %entry.sl,
            tp = %entry.tp,
            volume = %entry.volume,
            intended_rr = %entry.intended_rr,
            "trade entry cached"
        );
        self.entry_cache.insert(entry.ticket, entry);
    }

    pub fn cached_entry_count(&self) -> usize {
        self.entry_cache.len()
    }

    /// Pull closing deals since the previous reconcile pass and record an
    /// outcome per closed position. Returns the outcomes for this pass.
    pub fn reconcile(
        &mut self,
        gateway: &dyn BrokerGateway,
        now: DateTime<Utc>,
        points: &HashMap<String, Decimal>,
    ) -> Vec<TradeOutcome> {
        if !self.enabled {
            return Vec::new();
        }

        let from = self.last_check.unwrap_or(now - chrono::Duration::days(1));
        let deals = match gateway.history_deals(from, now) {
            Ok(deals) => deals,
            Err(e) => {
                warn!(error = %e, "deal history fetch failed; will retry next bar");
                return Vec::new();
            }
        };
        self.last_check = Some(now);

        let mut outcomes = Vec::new();
        for deal in deals.iter().filter(|d| d.entry == DealEntry::Out) {
            if self.recorded.contains(&deal.position_id) {
                continue;
            }
            info!(
                ticket = deal.position_id,
                symbol = %deal.symbol,
                price = %deal.price,
                profit = %deal.profit,
                comment = %deal.comment,
                "position_closed"
            );
            if let Some(outcome) = self.record_outcome(deal, points.get(&deal.symbol).copied()) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn record_outcome(&mut self, deal: &Deal, point: Option<Decimal>) -> Option<TradeOutcome> {
        let exit_reason = classify_exit_reason(&deal.comment);

        let outcome = match self.entry_cache.remove(&deal.position_id) {
            Some(entry) => {
                let direction_mult = match entry.direction {
                    Side::Buy => Decimal::ONE,
                    Side::Sell => -Decimal::ONE,
                };

                let point = point
                    .filter(|p| *p > Decimal::ZERO)
                    .unwrap_or_else(|| estimate_point(&entry.symbol));
                let pnl_pips =
                    ((deal.price - entry.entry_price) * direction_mult / point).round_dp(1);

                let risk_distance = (entry.entry_price - entry.sl).abs();
                let achieved_rr = if risk_distance > Decimal::ZERO {
                    ((deal.price - entry.entry_price) * direction_mult / risk_distance).round_dp(2)
                } else {
                    Decimal::ZERO
                };

                let hold_time_minutes = Decimal::from(
                    (deal.time - entry.entry_time).num_seconds(),
                ) / dec!(60);

                TradeOutcome {
                    ticket: entry.ticket,
                    symbol: entry.symbol.clone(),
                    direction: entry.direction.to_string(),
                    structure_type: entry.structure_type.clone(),
                    entry_time: Some(entry.entry_time),
                    entry_price: entry.entry_price,
                    sl: entry.sl,
                    tp: entry.tp,
                    volume: entry.volume,
                    intended_rr: entry.intended_rr,
                    exit_time: deal.time,
                    exit_price: deal.price,
                    exit_reason,
                    pnl_pips,
                    pnl_usd: deal.profit.round_dp(2),
                    achieved_rr,
                    hold_time_minutes: hold_time_minutes.round_dp(1),
                    outcome: classify_outcome(deal.profit),
                    session_name: entry.session_name,
                    session_relevance: entry.session_relevance,
                    htf_bias: entry.htf_bias,
                    htf_alignment: entry.htf_alignment,
                }
            }
            None => {
                warn!(
                    ticket = deal.position_id,
                    symbol = %deal.symbol,
                    exit_price = %deal.price,
                    pnl_usd = %deal.profit,
                    "no cached entry for closed position; recording minimal outcome"
                );
                TradeOutcome {
                    ticket: deal.position_id,
                    symbol: deal.symbol.clone(),
                    direction: "UNKNOWN".to_string(),
                    structure_type: "unknown".to_string(),
                    entry_time: None,
                    entry_price: Decimal::ZERO,
                    sl: Decimal::ZERO,
                    tp: Decimal::ZERO,
                    volume: deal.volume,
                    intended_rr: Decimal::ZERO,
                    exit_time: deal.time,
                    exit_price: deal.price,
                    exit_reason,
                    pnl_pips: Decimal::ZERO,
                    pnl_usd: deal.profit.round_dp(2),
                    achieved_rr: Decimal::ZERO,
                    hold_time_minutes: Decimal::ZERO,
                    outcome: classify_outcome(deal.profit),
                    session_name: String::new(),
                    session_relevance: String::new(),
                    htf_bias: String::new(),
                    htf_alignment: String::new(),
                }
            }
        };

        self.append_to_day_file(&outcome);
        self.recorded.insert(deal.position_id);

        info!(
            ticket = outcome.ticket,
            symbol = %outcome.symbol,
            direction = %outcome.direction,
            structure_type = %outcome.structure_type,
            exit_reason = %outcome.exit_reason,
            pnl_pips = %outcome.pnl_pips,
            pnl_usd = %outcome.pnl_usd,
            intended_rr = %outcome.intended_rr,
            achieved_rr = %outcome.achieved_rr,
            hold_time_minutes = %outcome.hold_time_minutes,
            outcome = %outcome.outcome,
            "trade_outcome_recorded"
        );

        Some(outcome)
    }

    fn day_file(&self, date: &str) -> PathBuf {
        self.dir.join(format!("trade_journal_{date}.json"))
    }

    fn append_to_day_file(&self, outcome: &TradeOutcome) {
        let date = outcome.exit_time.format("%Y%m%d").to_string();
        let path = self.day_file(&date);

        let mut records: Vec<serde_json::Value> = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        match serde_json::to_value(outcome) {
            Ok(value) => records.push(value),
            Err(e) => {
                warn!(ticket = outcome.ticket, error = %e, "journal serialise failed");
                return;
            }
        }

        match serde_json::to_string_pretty(&records) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(path = %path.display(), error = %e, "journal write failed");
                }
            }
            Err(e) => warn!(error = %e, "journal serialise failed"),
        }
    }

    /// Summary statistics for one UTC day (`YYYYMMDD`).
    pub fn day_summary(&self, date: &str) -> Option<DaySummary> {
        let raw = std::fs::read_to_string(self.day_file(date)).ok()?;
        let records: Vec<TradeOutcome> = serde_json::from_str(&raw).ok()?;
        if records.is_empty() {
            return None;
        }

        let mut summary = DaySummary {
            total_trades: records.len(),
            ..Default::default()
        };
        let mut rr_sum = Decimal::ZERO;

        for record in &records {
            match record.outcome {
                OutcomeKind::Win => summary.wins += 1,
                OutcomeKind::Loss => summary.losses += 1,
                OutcomeKind::Breakeven => summary.breakevens += 1,
            }
            summary.total_pnl_usd += record.pnl_usd;
            rr_sum += record.achieved_rr;
            *summary
                .by_structure
                .entry(record.structure_type.clone())
                .or_insert(0) += 1;
            *summary.by_symbol.entry(record.symbol.clone()).or_insert(0) += 1;
        }

        let total = Decimal::from(summary.total_trades as u64);
        summary.win_rate_pct =
            (Decimal::from(summary.wins as u64) / total * dec!(100)).round_dp(1);
        summary.avg_achieved_rr = (rr_sum / total).round_dp(2);
        Some(summary)
    }
}

// ---------------------------------------------------------------------------
// Classification helpers
// ---------------------------------------------------------------------------

/// Infer the exit reason from the closing deal's comment markers.
fn classify_exit_reason(comment: &str) -> ExitReason {
    let lower = comment.to_lowercase();
    if lower.contains("sl") || lower.contains("stop loss") {
        ExitReason::SlHit
    } else if lower.contains("tp") || lower.contains("take profit") {
        ExitReason::TpHit
    } else if lower.contains("manual")
        || lower.contains("close")
        || lower.contains("rotation")
        || lower.contains("flatten")
    {
        ExitReason::Manual
    } else {
        ExitReason::Unknown
    }
}

fn classify_outcome(pnl_usd: Decimal) -> OutcomeKind {
    if pnl_usd > Decimal::ZERO {
        OutcomeKind::Win
    } else if pnl_usd < Decimal::ZERO {
        OutcomeKind::Loss
    } else {
        OutcomeKind::Breakeven
    }
}

/// Fallback point estimate when broker metadata is unavailable.
fn estimate_point(symbol: &str) -> Decimal {
    if symbol.contains("JPY") || symbol.contains("XAU") {
        dec!(0.01)
    } else {
        dec!(0.0001)
    }
}

// =============================================================================
// Tests
// =============================================================================
