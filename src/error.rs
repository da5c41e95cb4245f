//! Error taxonomy for vector and operator operations.
//!
//! All size and state checks are performed host-side before any device work
//! is dispatched, so a malformed call never reaches a kernel. Faults *inside*
//! a kernel (a panic in a launched block) are not represented here: a faulted
//! execution context cannot safely continue, so such panics propagate and
//! abort the apply sequence.

use cellwise_paradis::OverlappingBlocks;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Two collaborating objects disagree about a dimension.
    #[error("dimension mismatch: expected size {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// An arithmetic operation was attempted on a vector with no storage.
    #[error("vector has no storage; resize it before use")]
    Uninitialized,

    /// An operation requiring `reinit` was called on an uninitialized
    /// operator, or a cached quantity was requested before being set.
    #[error("operator is not initialized for this operation")]
    NotInitialized,

    /// The operation is deliberately unsupported: the operator is applied
    /// matrix-free and never materializes individual entries.
    #[error("operation is not supported by a matrix-free operator")]
    NotImplemented,

    /// A cell partition violated the disjointness contract.
    #[error(transparent)]
    OverlappingBlocks(#[from] OverlappingBlocks),

    /// The execution context could not be constructed.
    #[error("failed to initialize device execution context: {0}")]
    Device(String),
}
