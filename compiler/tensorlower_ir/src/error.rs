//! Error taxonomy for the lowering core.
//!
//! Three kinds, matching the failure modes a scheduled [`crate::stmt::IndexStmt`]
//! can produce: a violated structural invariant (a bug in the caller's
//! schedule), a recognized-but-unimplemented construct (the caller may retry
//! with a different schedule), and a literal outside the supported datatype
//! set. None of these are recoverable locally: every fallible function in
//! this crate propagates with `?`.

use thiserror::Error;

/// Failure produced while lowering an index statement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LowerError {
    /// A structural invariant of the iterator set, provenance graph, or
    /// merge lattice was violated. Always a bug in the input schedule, not
    /// in user-facing index notation.
    #[error("internal lowering error in {context}: {message}")]
    Internal {
        /// What was being lowered when the invariant failed (e.g. a forall
        /// or merge-point description), for diagnostic emission.
        context: String,
        message: String,
    },

    /// A construct that is recognized by the data model but not handled by
    /// this lowerer (e.g. certain duplicate-coordinate parent chains, or a
    /// reduction node inside concrete notation). Distinct from `Internal` so
    /// a driver can choose a different schedule instead of treating it as a
    /// bug.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// A literal fell outside the declared primitive datatype set (e.g. an
    /// undefined datatype, or a 128-bit integer literal).
    #[error("unsupported datatype in literal lowering: {0}")]
    UnsupportedDatatype(String),
}

impl LowerError {
    /// Build an [`LowerError::Internal`] from a context label and message.
    pub fn internal(context: impl Into<String>, message: impl Into<String>) -> Self {
        LowerError::Internal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Build an [`LowerError::Unsupported`].
    pub fn unsupported(message: impl Into<String>) -> Self {
        LowerError::Unsupported(message.into())
    }
}

/// Convenience alias used throughout the lowering core.
pub type LowerResult<T> = Result<T, LowerError>;
