// =============================================================================
// Session Manager — UTC window classification, rotation, volatility pause
// =============================================================================
//
// Sessions are naive UTC clock windows ("07:00".."13:00"); daylight saving is
// out of scope. Classification picks the first enclosing window, rotation
// resets per-session counters, and the optional volatility pause suppresses
// decision-making while spreads or ATR spike.
// =============================================================================

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::config::{SessionsConfig, VolatilityPauseConfig};
use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionWindow {
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub max_trades_per_hour: u32,
    pub score_bonus: Decimal,
}

impl SessionWindow {
    /// Whether `t` falls inside the window. Windows that wrap midnight are
    /// supported.
    fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Counters reset on every session rotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCounters {
    pub decisions_attempted: u64,
    pub decisions_accepted: u64,
    pub full_sl_hits: u32,
}

/// Emitted when the enclosing session changes between two bars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationEvent {
    pub previous: Option<String>,
    pub current: Option<String>,
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

pub struct SessionManager {
    windows: Vec<SessionWindow>,
    close_positions_on_session_end: bool,
    pause_cfg: VolatilityPauseConfig,
    current_session: Option<String>,
    pub counters: SessionCounters,
    paused_until: Option<DateTime<Utc>>,
}

impl SessionManager {
    pub fn new(cfg: &SessionsConfig) -> Result<Self, ConfigError> {
        let mut windows = Vec::with_capacity(cfg.windows.len());
        for w in &cfg.windows {
            let start = parse_clock(&w.start_utc)
                .ok_or_else(|| ConfigError::invalid("sessions.start_utc", &w.start_utc))?;
            let end = parse_clock(&w.end_utc)
                .ok_or_else(|| ConfigError::invalid("sessions.end_utc", &w.end_utc))?;
            windows.push(SessionWindow {
                name: w.name.clone(),
                start,
                end,
                max_trades_per_hour: w.max_trades_per_hour,
                score_bonus: w.score_bonus,
            });
        }

        Ok(Self {
            windows,
            close_positions_on_session_end: cfg.close_positions_on_session_end,
            pause_cfg: cfg.volatility_pause.clone(),
            current_session: None,
            counters: SessionCounters::default(),
            paused_until: None,
        })
    }

    /// First enclosing window for a timestamp, or `None` outside all windows.
    pub fn classify(&self, ts: DateTime<Utc>) -> Option<&str> {
        let t = ts.time();
        self.windows
            .iter()
            .find(|w| w.contains(t))
            .map(|w| w.name.as_str())
    }

    pub fn current_session(&self) -> Option<&str> {
        self.current_session.as_deref()
    }

    /// Session id used to tag structures and decisions for this bar.
    pub fn session_id(&self) -> String {
        self.current_session
            .clone()
            .unwrap_or_else(|| "OFF_HOURS".to_string())
    }

    pub fn window(&self, name: &str) -> Option<&SessionWindow> {
        self.windows.iter().find(|w| w.name == name)
    }

    pub fn close_on_rotation(&self) -> bool {
        self.close_positions_on_session_end
    }

    /// Re-classify and rotate when the session changed. On rotation the
    /// session counters reset and a `session_rotated` event is emitted.
    pub fn update_and_rotate(&mut self, ts: DateTime<Utc>) -> Option<RotationEvent> {
        let current = self.classify(ts).map(str::to_string);
        if current == self.current_session {
            return None;
        }

        let previous = self.current_session.take();
        self.current_session = current.clone();
        self.counters = SessionCounters::default();

        info!(
            from = previous.as_deref().unwrap_or("none"),
            to = current.as_deref().unwrap_or("none"),
            "session_rotated"
        );

        Some(RotationEvent { previous, current })
    }

    // -------------------------------------------------------------------------
    // Volatility pause
    // -------------------------------------------------------------------------

    /// Clear an elapsed pause. Returns true when the pause was just cleared.
    pub fn maybe_auto_resume(&mut self, now: DateTime<Utc>) -> bool {
        match self.paused_until {
            Some(until) if now >= until => {
                self.paused_until = None;
                info!(resumed_at = %now, "volatility_pause_cleared");
                true
            }
            _ => false,
        }
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        matches!(self.paused_until, Some(until) if now < until)
    }

    pub fn paused_until(&self) -> Option<DateTime<Utc>> {
        self.paused_until
    }

    /// Trigger a pause when spread or ATR spike beyond their baselines.
    /// Returns true when a new pause was started.
    pub fn check_volatility_trigger(
        &mut self,
        now: DateTime<Utc>,
        spread: Decimal,
        baseline_spread: Decimal,
        atr_now: Decimal,
        atr_baseline: Decimal,
    ) -> bool {
        if !self.pause_cfg.enabled || self.is_paused(now) {
            return false;
        }

        let spread_spike = baseline_spread > Decimal::ZERO
            && spread > self.pause_cfg.spread_multiplier * baseline_spread;
        let atr_spike = atr_baseline > Decimal::ZERO
            && atr_now > self.pause_cfg.atr_spike_multiplier * atr_baseline;

        if !spread_spike && !atr_spike {
            return false;
        }

        let until = now + Duration::seconds(self.pause_cfg.min_pause_seconds);
        self.paused_until = Some(until);

        info!(
            spread = %spread,
            baseline_spread = %baseline_spread,
            atr_now = %atr_now,
            atr_baseline = %atr_baseline,
            spread_spike,
            atr_spike,
            paused_until = %until,
            "volatility_pause"
        );

        true
    }
}

fn parse_clock(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M").ok()
}

// =============================================================================
// Tests
// =============================================================================
