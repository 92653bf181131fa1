// =============================================================================
// Broker Gateway — the only seam between the engine and the outside world
// =============================================================================
//
// Everything broker-dependent (ticks, account state, order routing, deal
// history) sits behind `BrokerGateway`. The decision pipeline is deterministic
// given (bars, config, gateway responses), which is what lets the simulated
// gateway drive fully reproducible runs.
// =============================================================================

pub mod sim;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ConfigError;
use crate::market_data::Bar;
use crate::types::Side;

pub use sim::SimBroker;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Transport-level failure talking to the broker (timeouts included).
#[derive(Debug, Error)]
#[error("broker: {0}")]
pub struct BrokerError(pub String);

// ---------------------------------------------------------------------------
// Metadata and account state
// ---------------------------------------------------------------------------

fn default_volume_min() -> Decimal {
    dec!(0.01)
}

fn default_volume_step() -> Decimal {
    dec!(0.01)
}

fn default_volume_max() -> Decimal {
    dec!(100)
}

/// Static per-symbol metadata. In live trading this mirrors the broker's
/// symbol info; in simulation it is seeded from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    #[serde(default)]
    pub point: Decimal,

    #[serde(default)]
    pub digits: u32,

    #[serde(default)]
    pub contract_size: Decimal,

    #[serde(default = "default_volume_min")]
    pub volume_min: Decimal,

    #[serde(default = "default_volume_step")]
    pub volume_step: Decimal,

    #[serde(default = "default_volume_max")]
    pub volume_max: Decimal,

    /// Broker-imposed static minimum stop distance in points.
    #[serde(default)]
    pub stops_level: i64,

    /// Minimum SL/TP distance in price units applied by the planner clamps.
    #[serde(default)]
    pub min_stop_distance: Decimal,

    /// Optional maximum SL/TP distance in price units.
    #[serde(default)]
    pub max_stop_distance: Option<Decimal>,

    /// Absolute floor for SL distance in points; sizing rejects below it.
    #[serde(default)]
    pub sl_hard_floor_points: i64,

    /// Initial margin per lot; zero disables margin-usage estimation.
    #[serde(default)]
    pub margin_initial: Decimal,
}

impl SymbolInfo {
    /// Validate that required broker metadata is present and coherent.
    /// Missing fields deserialise as zero, which is how absence is detected.
    pub fn validate(&self, symbol: &str) -> Result<(), ConfigError> {
        if self.point <= Decimal::ZERO {
            return Err(ConfigError::MissingBrokerMeta {
                symbol: symbol.to_string(),
                field: "point",
            });
        }
        if self.contract_size <= Decimal::ZERO {
            return Err(ConfigError::MissingBrokerMeta {
                symbol: symbol.to_string(),
                field: "contract_size",
            });
        }
        if self.volume_min <= Decimal::ZERO
            || self.volume_step <= Decimal::ZERO
            || self.volume_max < self.volume_min
        {
            return Err(ConfigError::MissingBrokerMeta {
                symbol: symbol.to_string(),
                field: "volume_min/volume_step/volume_max",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub equity: Decimal,
    pub balance: Decimal,
    pub free_margin: Decimal,
    /// Margin level in percent; `None` when no positions are open.
    pub margin_level: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub bid: Decimal,
    pub ask: Decimal,
    pub ts: DateTime<Utc>,
}

impl Tick {
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

// ---------------------------------------------------------------------------
// Positions and deals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub magic: i64,
    pub opened_at: DateTime<Utc>,
}

/// Whether a deal opened or closed a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealEntry {
    In,
    Out,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    /// Ticket of the position this deal belongs to.
    pub position_id: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub price: Decimal,
    pub profit: Decimal,
    pub time: DateTime<Utc>,
    /// Broker comment; exit reasons are classified from markers in here.
    pub comment: String,
    pub entry: DealEntry,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    /// Immediate market deal.
    Deal,
    /// Modify SL/TP on an existing position.
    Sltp,
}

/// Order filling policy. Market deals go out fill-or-kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    Fok,
    Ioc,
    Return,
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self::Fok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub action: OrderAction,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub price: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub deviation: i64,
    pub magic: i64,
    pub comment: String,
    #[serde(default)]
    pub type_filling: FillPolicy,
    /// Position ticket for `Sltp` modifies.
    pub position: Option<u64>,
}

/// Discriminated broker return codes. Everything the executor branches on is
/// a variant; unknown codes stay observable through `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retcode {
    Done,
    Requote,
    InvalidStops,
    Other(u32),
    /// Dry-run / paper sends that never reached a broker.
    Simulated,
}

impl Retcode {
    pub fn code(self) -> u32 {
        match self {
            Self::Done => 10009,
            Self::Requote => 10004,
            Self::InvalidStops => 10016,
            Self::Other(code) => code,
            Self::Simulated => 0,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            10009 => Self::Done,
            10004 => Self::Requote,
            10016 => Self::InvalidStops,
            other => Self::Other(other),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Done => "Request completed",
            Self::Requote => "Requote",
            Self::InvalidStops => "Invalid stops",
            Self::Other(_) => "Request rejected",
            Self::Simulated => "Simulated send: no broker order sent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub retcode: Retcode,
    pub retcode_description: String,
    pub ticket: Option<u64>,
}

impl OrderResult {
    pub fn ok(&self) -> bool {
        matches!(self.retcode, Retcode::Done | Retcode::Simulated)
    }
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Outbound broker capability set. All calls are synchronous; blocking I/O is
/// confined to implementations.
pub trait BrokerGateway: Send {
    fn account_info(&self) -> Result<AccountInfo, BrokerError>;

    fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError>;

    fn tick(&self, symbol: &str) -> Result<Tick, BrokerError>;

    /// Recent bars on an arbitrary timeframe (for HTF bias).
    fn rates_from(&self, symbol: &str, timeframe: &str, count: usize)
        -> Result<Vec<Bar>, BrokerError>;

    /// Open positions, optionally filtered by symbol.
    fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, BrokerError>;

    fn history_deals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Deal>, BrokerError>;

    fn order_send(&mut self, request: &OrderRequest) -> Result<OrderResult, BrokerError>;

    /// Close a position at market. Closing an already-closed ticket is a
    /// no-op success, which keeps rotation-close and hard-stop flatten
    /// composable.
    fn close_position(&mut self, ticket: u64, comment: &str) -> Result<OrderResult, BrokerError>;

    fn is_market_open(&self) -> bool {
        true
    }

    fn is_symbol_tradable(&self, symbol: &str) -> bool {
        !symbol.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
