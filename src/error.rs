//! Engine Error Types
//!
//! Unified error type for fallible operations. Invariant violations that
//! indicate program bugs (e.g. non-positive mass on a dynamic body) are
//! reported as errors from constructors and asserted in debug builds;
//! recoverable conditions (stale network references) are handled locally
//! and never surface here.

use thiserror::Error;

/// Unified error type for physics operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PhysicsError {
    /// An entity handle does not resolve to a live entity.
    #[error("invalid entity handle {index}v{version}")]
    InvalidEntity {
        /// Index part of the stale handle
        index: u32,
        /// Version part of the stale handle
        version: u32,
    },

    /// A rigid body definition violates a precondition.
    #[error("invalid rigid body definition: {reason}")]
    InvalidRigidBody {
        /// What precondition was violated
        reason: &'static str,
    },

    /// A constraint references a missing body or has degenerate geometry.
    #[error("invalid constraint: {reason}")]
    InvalidConstraint {
        /// What is wrong with the constraint
        reason: &'static str,
    },

    /// A zero-length direction was provided where a unit vector is required.
    #[error("zero-length vector in {context}")]
    ZeroLengthVector {
        /// Where the degenerate vector was encountered
        context: &'static str,
    },

    /// A capacity limit was exceeded.
    #[error("{resource} capacity exceeded (limit={limit})")]
    CapacityExceeded {
        /// What resource was exhausted
        resource: &'static str,
        /// The limit that was exceeded
        limit: usize,
    },

    /// Invalid configuration parameter.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What is wrong with the configuration
        reason: &'static str,
    },

    /// A snapshot pool referenced a component index this build does not know.
    #[error("unknown component index {index}")]
    UnknownComponentIndex {
        /// The unrecognized index
        index: u16,
    },

    /// An extrapolation job exceeded its wall-clock budget.
    #[error("extrapolation exceeded its {budget_ms} ms budget")]
    ExtrapolationTimeout {
        /// Budget that was exceeded, in milliseconds
        budget_ms: u64,
    },
}
