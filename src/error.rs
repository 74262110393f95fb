//! Error taxonomy for the routing core.
//!
//! Decision-time errors (`Validation`, `NoEligibleActions`,
//! `DimensionMismatch`, `PolicyNotFound`, `InvalidAllocation`) propagate to
//! the caller, who is expected to fall back to a hardcoded default action —
//! routing is an optimization, never a hard dependency for request success.
//! Reward-reporting and shadow-path failures are logged and swallowed inside
//! the engine instead of surfacing here.

use thiserror::Error;

/// Errors produced by the routing core.
#[derive(Debug, Error)]
pub enum Error {
    /// A request was structurally invalid (missing domain/tenant, empty
    /// feature schema, and similar).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The candidate action set was empty after filtering.
    #[error("no eligible actions for domain '{domain}'")]
    NoEligibleActions {
        /// Domain the selection was attempted for.
        domain: String,
    },

    /// A context vector did not match the configured schema dimension.
    #[error("context dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimension the policy state was built with.
        expected: usize,
        /// Dimension of the offending vector.
        got: usize,
    },

    /// Experiment allocation weights did not form a distribution.
    #[error("experiment '{experiment}' allocation weights sum to {sum}, expected 1.0")]
    InvalidAllocation {
        /// Offending experiment id.
        experiment: String,
        /// Actual weight sum.
        sum: f64,
    },

    /// A policy name had no registered factory.
    #[error("unknown policy '{0}'")]
    PolicyNotFound(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
