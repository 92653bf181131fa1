// =============================================================================
// Decision — auditable record of every candidate entry
// =============================================================================
//
// Every decision the pipeline emits is immutable once built. Side invariants
// are enforced at construction:
//   BUY:  sl < entry < tp
//   SELL: tp < entry < sl
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DataError;
use crate::types::DecisionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Pending,
    Validated,
    Executed,
    Rejected,
    Cancelled,
}

/// A candidate (or executed) trading decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_type: DecisionType,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub position_size: Decimal,
    pub risk_reward_ratio: Decimal,
    pub structure_id: String,
    pub confidence_score: Decimal,
    pub reasoning: String,
    pub status: DecisionStatus,
    /// Ordered so serialised decisions are bit-identical across runs.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Decision {
    /// Validate the side invariants for entry decisions.
    pub fn validate(&self) -> Result<(), DataError> {
        match self.decision_type {
            DecisionType::Buy => {
                if !(self.stop_loss < self.entry_price && self.entry_price < self.take_profit) {
                    return Err(DataError::OhlcInvariant(format!(
                        "BUY requires sl < entry < tp, got sl={} entry={} tp={}",
                        self.stop_loss, self.entry_price, self.take_profit
                    )));
                }
            }
            DecisionType::Sell => {
                if !(self.take_profit < self.entry_price && self.entry_price < self.stop_loss) {
                    return Err(DataError::OhlcInvariant(format!(
                        "SELL requires tp < entry < sl, got sl={} entry={} tp={}",
                        self.stop_loss, self.entry_price, self.take_profit
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn is_entry(&self) -> bool {
        self.decision_type.is_entry()
    }
}

// =============================================================================
// Tests
// =============================================================================
