// =============================================================================
// Higher Time Frame (HTF) bias
// =============================================================================
//
// Directional bias from price vs EMA on a higher timeframe, measured in ATR
// units:
//   bullish — close > ema + neutral_zone
//   bearish — close < ema - neutral_zone
//   neutral — inside the zone
// where neutral_zone = neutral_zone_atr_mult * ATR.
//
// Snapshots are cached per symbol with a short TTL so the gateway is not hit
// on every bar.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::broker::BrokerGateway;
use crate::config::HtfBiasConfig;
use crate::indicators::atr::compute_atr;
use crate::indicators::ema::compute_ema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BiasDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for BiasDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Full HTF read for one symbol at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct HtfSnapshot {
    pub bias: BiasDirection,
    pub close: Decimal,
    pub ema: Decimal,
    pub atr: Decimal,
    /// |close - ema|.
    pub distance: Decimal,
    /// distance / atr.
    pub distance_atr: Decimal,
    /// distance beyond `hard_block_clear_trend_mult x neutral_zone`.
    pub is_clear_trend: bool,
    pub computed_at: DateTime<Utc>,
}

pub struct HtfBiasAnalyzer {
    cfg: HtfBiasConfig,
    cache: HashMap<String, HtfSnapshot>,
}

impl HtfBiasAnalyzer {
    pub fn new(cfg: HtfBiasConfig) -> Self {
        Self {
            cfg,
            cache: HashMap::new(),
        }
    }

    pub fn config(&self) -> &HtfBiasConfig {
        &self.cfg
    }

    /// HTF snapshot for `symbol`, recomputed through the gateway when the
    /// cached value is older than the TTL. `now` is the bar clock, not wall
    /// clock, so replays stay deterministic.
    pub fn snapshot(
        &mut self,
        symbol: &str,
        gateway: &dyn BrokerGateway,
        now: DateTime<Utc>,
    ) -> Option<HtfSnapshot> {
        if !self.cfg.enabled {
            return None;
        }

        if let Some(cached) = self.cache.get(symbol) {
            if now - cached.computed_at < Duration::seconds(self.cfg.cache_ttl_seconds) {
                return Some(cached.clone());
            }
        }

        let bars = match gateway.rates_from(symbol, &self.cfg.timeframe, self.cfg.lookback_bars) {
            Ok(bars) => bars,
            Err(e) => {
                warn!(symbol, error = %e, "htf rates fetch failed");
                return None;
            }
        };

        let need = self.cfg.ema_period.max(self.cfg.atr_period + 1);
        if bars.len() < need {
            debug!(symbol, have = bars.len(), need, "htf bias: insufficient bars");
            return None;
        }

        let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
        let ema = *compute_ema(&closes, self.cfg.ema_period).last()?;
        let atr = compute_atr(&bars, self.cfg.atr_period)?;
        if atr.is_zero() {
            return None;
        }

        let close = *closes.last()?;
        let neutral_zone = self.cfg.neutral_zone_atr_mult * atr;
        let distance = (close - ema).abs();

        let bias = if close > ema + neutral_zone {
            BiasDirection::Bullish
        } else if close < ema - neutral_zone {
            BiasDirection::Bearish
        } else {
            BiasDirection::Neutral
        };

        let clear_threshold = self.cfg.hard_block_clear_trend_mult * neutral_zone;
        let is_clear_trend = distance > clear_threshold;

        let snapshot = HtfSnapshot {
            bias,
            close,
            ema,
            atr,
            distance,
            distance_atr: distance / atr,
            is_clear_trend,
            computed_at: now,
        };

        if self.cfg.log_bias_checks {
            debug!(
                symbol,
                bias = %snapshot.bias,
                close = %close,
                ema = %ema,
                atr = %atr,
                distance_atr = %snapshot.distance_atr,
                is_clear_trend,
                "htf_bias_computed"
            );
        }

        self.cache.insert(symbol.to_string(), snapshot.clone());
        Some(snapshot)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{SimBroker, SymbolInfo};
    use crate::market_data::Bar;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn flat_bars(close: Decimal, count: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                Bar::new(
                    close,
                    close + dec!(0.0005),
                    close - dec!(0.0005),
                    close,
                    dec!(100),
                    start + Duration::hours(i as i64),
                )
                .unwrap()
            })
            .collect()
    }

    fn broker_with_rates(bars: Vec<Bar>) -> SimBroker {
        let mut symbols = HashMap::new();
        symbols.insert(
            "EURUSD".to_string(),
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
                sl_hard_floor_points: 0,
                margin_initial: Decimal::ZERO,
            },
        );
        let mut broker = SimBroker::new(symbols, dec!(10000));
        broker.set_rates("EURUSD", "H1", bars);
        broker
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn flat_market_is_neutral() {
        let broker = broker_with_rates(flat_bars(dec!(1.1000), 120));
        let mut analyzer = HtfBiasAnalyzer::new(HtfBiasConfig::default());
        let snapshot = analyzer.snapshot("EURUSD", &broker, now()).unwrap();
        assert_eq!(snapshot.bias, BiasDirection::Neutral);
        assert!(!snapshot.is_clear_trend);
    }

    #[test]
    fn close_above_zone_is_bullish() {
        // Flat history, then a jump well above the EMA.
        let mut bars = flat_bars(dec!(1.1000), 119);
        let last_ts = bars.last().unwrap().timestamp + Duration::hours(1);
        bars.push(
            Bar::new(
                dec!(1.1000),
                dec!(1.1060),
                dec!(1.0995),
                dec!(1.1055),
                dec!(100),
                last_ts,
            )
            .unwrap(),
        );
        let broker = broker_with_rates(bars);
        let mut analyzer = HtfBiasAnalyzer::new(HtfBiasConfig::default());
        let snapshot = analyzer.snapshot("EURUSD", &broker, now()).unwrap();
        assert_eq!(snapshot.bias, BiasDirection::Bullish);
        assert!(snapshot.distance > Decimal::ZERO);
    }

    #[test]
    fn cache_serves_within_ttl_and_expires_after() {
        let broker = broker_with_rates(flat_bars(dec!(1.1000), 120));
        let mut analyzer = HtfBiasAnalyzer::new(HtfBiasConfig::default());

        let first = analyzer.snapshot("EURUSD", &broker, now()).unwrap();
        // Within TTL: same computed_at even though the clock moved.
        let cached = analyzer
            .snapshot("EURUSD", &broker, now() + Duration::seconds(120))
            .unwrap();
        assert_eq!(cached.computed_at, first.computed_at);

        // Past TTL: recomputed.
        let fresh = analyzer
            .snapshot("EURUSD", &broker, now() + Duration::seconds(600))
            .unwrap();
        assert_ne!(fresh.computed_at, first.computed_at);
    }

    #[test]
    fn disabled_returns_none() {
        let broker = broker_with_rates(flat_bars(dec!(1.1000), 120));
        let mut cfg = HtfBiasConfig::default();
        cfg.enabled = false;
        let mut analyzer = HtfBiasAnalyzer::new(cfg);
        assert!(analyzer.snapshot("EURUSD", &broker, now()).is_none());
    }

    #[test]
    fn insufficient_bars_returns_none() {
        let broker = broker_with_rates(flat_bars(dec!(1.1000), 10));
        let mut analyzer = HtfBiasAnalyzer::new(HtfBiasConfig::default());
        assert!(analyzer.snapshot("EURUSD", &broker, now()).is_none());
    }
}
