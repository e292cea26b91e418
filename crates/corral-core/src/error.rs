//! Core error types

use thiserror::Error;

/// Errors raised while parsing or validating core domain values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid version {0:?}")]
    InvalidVersion(String),

    #[error("invalid binary version {0:?}")]
    InvalidBinaryVersion(String),

    #[error("unknown series {0:?}")]
    UnknownSeries(String),

    #[error("unknown constraint {0:?}")]
    UnknownConstraint(String),

    #[error("malformed constraint {0:?}")]
    MalformedConstraint(String),

    #[error("bad {attr:?} constraint: {reason}")]
    BadConstraintValue { attr: String, reason: String },

    #[error("ambiguous constraints: {0:?} overlaps with {1:?}")]
    AmbiguousConstraints(String, String),

    #[error("invalid constraint value: {attr}={value}\nvalid values are: {valid:?}")]
    InvalidConstraintValue {
        attr: String,
        value: String,
        valid: Vec<String>,
    },

    #[error("no matching tools available")]
    NoMatchingTools,

    #[error("unknown status {0:?}")]
    UnknownStatus(String),

    #[error("cannot set invalid status {0:?}")]
    InvalidStatus(String),

    #[error("cannot set status {0:?}")]
    StatusNotSettable(String),

    #[error("status {0:?} is deprecated and invalid")]
    DeprecatedStatus(String),

    #[error("cannot set status {0:?} without info")]
    StatusInfoRequired(String),

    #[error("cannot set status data when status is {0:?}")]
    StatusDataNotAllowed(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
