//! Error types for subcal.

use thiserror::Error;

/// Errors that can occur in subcal operations.
#[derive(Error, Debug)]
pub enum SubcalError {
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for subcal operations.
pub type SubcalResult<T> = Result<T, SubcalError>;

/// Why a single subscription record was left out of a feed.
///
/// These never abort feed generation; the record is dropped and the
/// reason is logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("negative price {0}")]
    NegativePrice(String),

    #[error("unparsable next payment date {0:?}")]
    InvalidDate(String),
}
