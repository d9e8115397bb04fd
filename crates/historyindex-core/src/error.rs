//! Error types for the history indexing pipeline.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by block sources and index stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("output {outpoint} does not exist")]
    MissingOutput { outpoint: String },

    #[error("output {outpoint} already spent by {spent_by}")]
    DoubleSpend { outpoint: String, spent_by: String },

    #[error("block {height} does not extend head {head}")]
    NonSequential { height: u64, head: u64 },
}

/// Errors that can occur while indexing.
///
/// `Gap`, `Apply` and `Persist` are the catch-up failures; all three are fatal
/// to the parser and are recovered by restarting from the persisted height.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("no block exists at height {height}")]
    Gap { height: u64 },

    #[error("failed to apply block {height}: {source}")]
    Apply {
        height: u64,
        #[source]
        source: StoreError,
    },

    #[error("block {height} applied but parsed height was not persisted: {source}")]
    Persist {
        height: u64,
        #[source]
        source: StoreError,
    },

    #[error("parsed height {parsed} is ahead of target height {target}")]
    WatermarkAhead { parsed: u64, target: u64 },

    #[error("block source error: {0}")]
    Source(#[source] StoreError),

    #[error("index store error: {0}")]
    Store(#[source] StoreError),

    #[error("parser did not stop within {0:?}")]
    StopTimeout(Duration),
}

impl IndexerError {
    /// The block height the error is about, if any.
    pub fn height(&self) -> Option<u64> {
        match self {
            Self::Gap { height } | Self::Apply { height, .. } | Self::Persist { height, .. } => {
                Some(*height)
            }
            Self::WatermarkAhead { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Returns `true` if the error must stop the parser.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::StopTimeout(_))
    }
}
