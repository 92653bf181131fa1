// =============================================================================
// Account Guards — daily stops, FTMO shadow limits, failure cooldown
// =============================================================================
//
// Three layers protecting the account:
//   1. Daily soft/hard stops — own drawdown discipline against the UTC-daily
//      equity baseline. Soft blocks new orders; hard also flattens.
//   2. FTMO shadow layer — externally-imposed daily/total drawdown caps,
//      tracked against intraday and all-time equity lows.
//   3. Consecutive send-failure cooldown — pauses execution after repeated
//      real broker failures; pre-check blocks never count.
//
// All `*_pct` thresholds are human-readable percents and are divided by 100
// exactly once, at the comparison site.
// =============================================================================

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

use crate::config::{FtmoConfig, RiskConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyStopState {
    Clear,
    SoftStopped,
    HardStopped,
}

/// Outcome of a daily-stop evaluation, including edge transitions so the
/// caller can flatten exactly once.
#[derive(Debug, Clone, Copy)]
pub struct DailyStopCheck {
    pub state: DailyStopState,
    pub newly_soft: bool,
    pub newly_hard: bool,
}

pub struct AccountGuards {
    risk_cfg: RiskConfig,
    ftmo_cfg: FtmoConfig,

    account_start_equity: Decimal,
    baseline_equity: Decimal,
    current_date: NaiveDate,

    daily_equity_low: Decimal,
    total_equity_low: Decimal,

    soft_triggered: bool,
    hard_triggered: bool,
    ftmo_daily_hit: bool,
    ftmo_total_hit: bool,
    daily_warned: bool,
    total_warned: bool,

    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
}

impl AccountGuards {
    pub fn new(
        risk_cfg: RiskConfig,
        ftmo_cfg: FtmoConfig,
        start_equity: Decimal,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            risk_cfg,
            ftmo_cfg,
            account_start_equity: start_equity,
            baseline_equity: start_equity,
            current_date: start.date_naive(),
            daily_equity_low: start_equity,
            total_equity_low: start_equity,
            soft_triggered: false,
            hard_triggered: false,
            ftmo_daily_hit: false,
            ftmo_total_hit: false,
            daily_warned: false,
            total_warned: false,
            consecutive_failures: 0,
            last_failure: None,
        }
    }

    // -------------------------------------------------------------------------
    // Daily baseline
    // -------------------------------------------------------------------------

    /// Reset the daily baseline when the UTC date advanced. Returns true on a
    /// new day.
    pub fn daily_reset_if_new_day(&mut self, now: DateTime<Utc>, equity: Decimal) -> bool {
        let today = now.date_naive();
        if today == self.current_date {
            return false;
        }

        info!(
            old_date = %self.current_date,
            new_date = %today,
            baseline_equity = %equity,
            "daily baseline reset"
        );

        self.current_date = today;
        self.baseline_equity = equity;
        self.daily_equity_low = equity;
        self.soft_triggered = false;
        self.hard_triggered = false;
        self.ftmo_daily_hit = false;
        self.daily_warned = false;
        true
    }

    // -------------------------------------------------------------------------
    // Daily soft / hard stops
    // -------------------------------------------------------------------------

    pub fn check_daily_stops(&mut self, equity: Decimal) -> DailyStopCheck {
        if self.baseline_equity <= Decimal::ZERO {
            return DailyStopCheck {
                state: DailyStopState::Clear,
                newly_soft: false,
                newly_hard: false,
            };
        }

        let dd_frac = (equity - self.baseline_equity) / self.baseline_equity;
        let soft_frac = self.risk_cfg.daily_soft_stop_pct / dec!(100);
        let hard_frac = self.risk_cfg.daily_hard_stop_pct / dec!(100);

        let mut newly_soft = false;
        let mut newly_hard = false;

        if dd_frac <= hard_frac && !self.hard_triggered {
            self.hard_triggered = true;
            self.soft_triggered = true;
            newly_hard = true;
            error!(
                equity = %equity,
                baseline = %self.baseline_equity,
                drawdown_pct = %(dd_frac * dec!(100)),
                limit_pct = %self.risk_cfg.daily_hard_stop_pct,
                "daily_hard_stop_hit"
            );
        } else if dd_frac <= soft_frac && !self.soft_triggered {
            self.soft_triggered = true;
            newly_soft = true;
            warn!(
                equity = %equity,
                baseline = %self.baseline_equity,
                drawdown_pct = %(dd_frac * dec!(100)),
                limit_pct = %self.risk_cfg.daily_soft_stop_pct,
                "daily_soft_stop_hit"
            );
        }

        let state = if self.hard_triggered {
            DailyStopState::HardStopped
        } else if self.soft_triggered {
            DailyStopState::SoftStopped
        } else {
            DailyStopState::Clear
        };

        DailyStopCheck {
            state,
            newly_soft,
            newly_hard,
        }
    }

    pub fn daily_stop_state(&self) -> DailyStopState {
        if self.hard_triggered {
            DailyStopState::HardStopped
        } else if self.soft_triggered {
            DailyStopState::SoftStopped
        } else {
            DailyStopState::Clear
        }
    }

    // -------------------------------------------------------------------------
    // FTMO shadow layer
    // -------------------------------------------------------------------------

    /// Track equity lows and fire FTMO limit/warning events. Returns true
    /// when an FTMO limit is (or already was) breached.
    pub fn observe_equity(&mut self, equity: Decimal) -> bool {
        if equity < self.daily_equity_low {
            self.daily_equity_low = equity;
        }
        if equity < self.total_equity_low {
            self.total_equity_low = equity;
        }

        if self.baseline_equity > Decimal::ZERO {
            let daily_frac = (self.daily_equity_low - self.baseline_equity) / self.baseline_equity;

            if !self.ftmo_daily_hit && daily_frac <= self.ftmo_cfg.max_daily_loss_pct / dec!(100) {
                self.ftmo_daily_hit = true;
                error!(
                    daily_low = %self.daily_equity_low,
                    baseline = %self.baseline_equity,
                    drawdown_pct = %(daily_frac * dec!(100)),
                    limit_pct = %self.ftmo_cfg.max_daily_loss_pct,
                    "ftmo_daily_limit_hit"
                );
            } else if !self.daily_warned
                && daily_frac <= self.ftmo_cfg.daily_warning_pct / dec!(100)
            {
                self.daily_warned = true;
                warn!(
                    daily_low = %self.daily_equity_low,
                    drawdown_pct = %(daily_frac * dec!(100)),
                    warning_pct = %self.ftmo_cfg.daily_warning_pct,
                    "ftmo daily drawdown warning"
                );
            }
        }

        if self.account_start_equity > Decimal::ZERO {
            let total_frac =
                (self.total_equity_low - self.account_start_equity) / self.account_start_equity;

            if !self.ftmo_total_hit && total_frac <= self.ftmo_cfg.max_total_loss_pct / dec!(100) {
                self.ftmo_total_hit = true;
                error!(
                    total_low = %self.total_equity_low,
                    account_start = %self.account_start_equity,
                    drawdown_pct = %(total_frac * dec!(100)),
                    limit_pct = %self.ftmo_cfg.max_total_loss_pct,
                    "ftmo_total_limit_hit"
                );
            } else if !self.total_warned
                && total_frac <= self.ftmo_cfg.total_warning_pct / dec!(100)
            {
                self.total_warned = true;
                warn!(
                    total_low = %self.total_equity_low,
                    drawdown_pct = %(total_frac * dec!(100)),
                    warning_pct = %self.ftmo_cfg.total_warning_pct,
                    "ftmo total drawdown warning"
                );
            }
        }

        self.ftmo_daily_hit || self.ftmo_total_hit
    }

    pub fn ftmo_blocked(&self) -> bool {
        self.ftmo_daily_hit || self.ftmo_total_hit
    }

    // -------------------------------------------------------------------------
    // Consecutive send-failure cooldown
    // -------------------------------------------------------------------------

    /// Count a real broker failure. Pre-check blocks must never reach here.
    pub fn record_send_failure(&mut self, now: DateTime<Utc>) {
        self.maybe_reset_failures(now);
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        warn!(
            consecutive_failures = self.consecutive_failures,
            max = self.risk_cfg.max_consecutive_send_failures,
            "broker send failure recorded"
        );
    }

    pub fn record_send_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_failure = None;
    }

    /// Whether execution is paused by failure saturation. Elapsed cooldown
    /// resets the counter first, allowing recovery from transient conditions.
    pub fn failures_saturated(&mut self, now: DateTime<Utc>) -> bool {
        self.maybe_reset_failures(now);
        self.consecutive_failures >= self.risk_cfg.max_consecutive_send_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn maybe_reset_failures(&mut self, now: DateTime<Utc>) {
        if self.consecutive_failures == 0 {
            return;
        }
        if let Some(last) = self.last_failure {
            if now - last > Duration::seconds(self.risk_cfg.failure_cooldown_seconds) {
                info!(
                    previous_count = self.consecutive_failures,
                    cooldown_seconds = self.risk_cfg.failure_cooldown_seconds,
                    "failure_counter_cooldown_reset"
                );
                self.consecutive_failures = 0;
                self.last_failure = None;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
