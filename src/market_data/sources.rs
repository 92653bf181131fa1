// =============================================================================
// Market data sources — synthetic generator and CSV replay
// =============================================================================
//
// The pipeline is agnostic to where bars come from; anything implementing
// `MarketData` can drive it. Both bundled sources are fully deterministic,
// which is what makes replay runs bit-identical.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use super::Bar;

/// Capability set the pipeline needs from a data source.
///
/// Invariant: bars for a symbol arrive with strictly increasing UTC
/// timestamps on a fixed timeframe.
pub trait MarketData {
    /// Next bar for the symbol, or `None` when the source is exhausted.
    fn fetch_next_bar(&mut self, symbol: &str) -> Option<Bar>;

    /// Up to `count` historical bars for warm-up, oldest first.
    fn fetch_history(&mut self, symbol: &str, timeframe: &str, count: usize) -> Vec<Bar>;
}

// ---------------------------------------------------------------------------
// Synthetic feed
// ---------------------------------------------------------------------------

/// Deterministic synthetic OHLCV generator.
///
/// Price movement is a pair of interleaved modular waves around a base price;
/// two runs with the same parameters produce identical bars.
pub struct SyntheticFeed {
    base_prices: HashMap<String, Decimal>,
    bar_index: HashMap<String, i64>,
    start: DateTime<Utc>,
    step_minutes: i64,
}

impl SyntheticFeed {
    pub fn new(start: DateTime<Utc>, step_minutes: i64) -> Self {
        Self {
            base_prices: HashMap::new(),
            bar_index: HashMap::new(),
            start,
            step_minutes,
        }
    }

    /// Override the starting price for a symbol (default 1.0950).
    pub fn with_base_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.base_prices.insert(symbol.to_string(), price);
        self
    }

    fn generate(&mut self, symbol: &str) -> Bar {
        let index = self.bar_index.entry(symbol.to_string()).or_insert(0);
        let i = *index;
        *index += 1;

        let base = self
            .base_prices
            .entry(symbol.to_string())
            .or_insert(dec!(1.0950));

        let drift = Decimal::from(i % 20 - 10) * dec!(0.00005);
        let swing = Decimal::from(i % 5 - 2) * dec!(0.0003);

        let open = *base + drift;
        let close = open + swing;
        let high = open.max(close) + dec!(0.0008);
        let low = open.min(close) - dec!(0.0005);
        let timestamp = self.start + Duration::minutes(self.step_minutes * i);

        *base = close;

        Bar::new(open, high, low, close, dec!(1000000), timestamp)
            .expect("synthetic bars always satisfy OHLC invariants")
    }
}

impl MarketData for SyntheticFeed {
    fn fetch_next_bar(&mut self, symbol: &str) -> Option<Bar> {
        Some(self.generate(symbol))
    }

    fn fetch_history(&mut self, symbol: &str, _timeframe: &str, count: usize) -> Vec<Bar> {
        (0..count).map(|_| self.generate(symbol)).collect()
    }
}

// ---------------------------------------------------------------------------
// CSV replay
// ---------------------------------------------------------------------------

/// Replays bars from `{dir}/{symbol}_{timeframe}.csv`.
///
/// Expected columns: `timestamp,open,high,low,close,volume` with an RFC-3339
/// or epoch-seconds timestamp. Malformed rows are skipped with a warning;
/// out-of-order rows are dropped to preserve the monotonic contract.
pub struct CsvReplay {
    dir: PathBuf,
    timeframe: String,
    queues: HashMap<String, Vec<Bar>>,
    cursor: HashMap<String, usize>,
}

impl CsvReplay {
    pub fn new(dir: impl AsRef<Path>, timeframe: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            timeframe: timeframe.into(),
            queues: HashMap::new(),
            cursor: HashMap::new(),
        }
    }

    fn ensure_loaded(&mut self, symbol: &str) {
        if self.queues.contains_key(symbol) {
            return;
        }
        let path = self.dir.join(format!("{symbol}_{}.csv", self.timeframe));
        let bars = match load_csv(&path) {
            Ok(bars) => {
                info!(symbol, path = %path.display(), bars = bars.len(), "csv replay loaded");
                bars
            }
            Err(e) => {
                warn!(symbol, path = %path.display(), error = %e, "csv replay load failed");
                Vec::new()
            }
        };
        self.queues.insert(symbol.to_string(), bars);
        self.cursor.insert(symbol.to_string(), 0);
    }
}

impl MarketData for CsvReplay {
    fn fetch_next_bar(&mut self, symbol: &str) -> Option<Bar> {
        self.ensure_loaded(symbol);
        let queue = self.queues.get(symbol)?;
        let cursor = self.cursor.get_mut(symbol)?;
        let bar = queue.get(*cursor)?.clone();
        *cursor += 1;
        Some(bar)
    }

    fn fetch_history(&mut self, symbol: &str, _timeframe: &str, count: usize) -> Vec<Bar> {
        self.ensure_loaded(symbol);
        let queue = match self.queues.get(symbol) {
            Some(q) => q,
            None => return Vec::new(),
        };
        let cursor = self.cursor.entry(symbol.to_string()).or_insert(0);
        let take = count.min(queue.len() - *cursor);
        let bars = queue[*cursor..*cursor + take].to_vec();
        *cursor += take;
        bars
    }
}

fn load_csv(path: &Path) -> Result<Vec<Bar>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut bars: Vec<Bar> = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("timestamp") {
            continue;
        }
        match parse_row(line) {
            Ok(bar) => {
                if let Some(last) = bars.last() {
                    if bar.timestamp <= last.timestamp {
                        warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            "out-of-order row dropped"
                        );
                        continue;
                    }
                }
                bars.push(bar);
            }
            Err(e) => {
                warn!(path = %path.display(), line = line_no + 1, error = %e, "malformed row skipped");
            }
        }
    }
    Ok(bars)
}

fn parse_row(line: &str) -> Result<Bar> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 6 {
        bail!("expected 6 columns, got {}", fields.len());
    }

    let timestamp = parse_timestamp(fields[0])?;
    let open: Decimal = fields[1].parse().context("open")?;
    let high: Decimal = fields[2].parse().context("high")?;
    let low: Decimal = fields[3].parse().context("low")?;
    let close: Decimal = fields[4].parse().context("close")?;
    let volume: Decimal = fields[5].parse().context("volume")?;

    Bar::new(open, high, low, close, volume, timestamp).map_err(Into::into)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(epoch) = raw.parse::<i64>() {
        return Utc
            .timestamp_opt(epoch, 0)
            .single()
            .context("epoch timestamp out of range");
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("unparseable timestamp `{raw}`"))
}

// =============================================================================
// Tests
// =============================================================================
