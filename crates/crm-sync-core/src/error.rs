//! Error types for the extraction/load engine.
//!
//! Configuration- and value-class failures (§7 kind 1) are fail-fast `Err`
//! returns from the originating call. Per-record policy violations,
//! unresolved dependencies, and transport/bulk failures (§7 kinds 2-4) are
//! accumulated into a step's `errors` collection instead and never appear
//! here. See [`crate::step::Step::errors`].

use thiserror::Error;

/// A malformed record identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("'{0}' is not a valid 15 or 18 character identifier")]
    InvalidFormat(String),
}

/// Configuration-class failures: bad field references, scope/behavior
/// combinations that cannot be satisfied.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("field '{field}' is not present on object type '{sobject}'")]
    UnknownField { sobject: String, field: String },

    #[error("extraction scope QUERY requires a where-clause")]
    MissingWhereClause,

    #[error(transparent)]
    Id(#[from] IdError),
}

/// The top-level error returned by `Operation::execute`. Only configuration-
/// class failures (a step that could not even issue its initial query) are
/// represented here; outside-reference violations, unresolved dependencies,
/// and transport/bulk failures live in each step's `errors` and are reported
/// through the operation's success/failure return code instead.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("step for '{sobject}' failed to execute: {source}")]
    StepFailed {
        sobject: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
