// =============================================================================
// Error taxonomy
// =============================================================================
//
// Three layers, matching how far an error is allowed to travel:
//   ConfigError   — startup only; the engine never starts with a bad config.
//   DataError     — per bar; the offending bar is skipped with a log.
//   PipelineError — per bar; log-worthy but non-fatal, the bar counter still
//                   advances and the next bar proceeds normally.
// =============================================================================

use thiserror::Error;

/// Fatal configuration problems detected before the pipeline starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("detector weights for `{detector}` must sum to 1.0, got {sum}")]
    WeightSum { detector: String, sum: String },

    #[error("duplicate detector name `{0}`")]
    DuplicateDetector(String),

    #[error("broker metadata for `{symbol}` is missing required field `{field}`")]
    MissingBrokerMeta { symbol: String, field: &'static str },

    #[error("failed to load config from `{path}`: {source}")]
    Load {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Recoverable per-bar data problems.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("OHLC invariant violated: {0}")]
    OhlcInvariant(String),

    #[error("negative volume {0}")]
    NegativeVolume(String),

    #[error("non-monotonic timestamp for {symbol}: {prev} >= {next}")]
    NonMonotonicTimestamp {
        symbol: String,
        prev: String,
        next: String,
    },

    #[error("insufficient bars: have {have}, need {need}")]
    InsufficientBars { have: usize, need: usize },
}

/// Per-bar pipeline failures. Never fatal: the caller logs and moves on.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("detector `{detector}` failed: {reason}")]
    Detection { detector: String, reason: String },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("broker call failed: {0}")]
    Broker(String),
}
