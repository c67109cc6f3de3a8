//! Error kinds shared across the tessera engine.
//!
//! One enum covers compute, storage, persistence, and the binding
//! protocol. Guardrail rejections (NOT NULL violations, `_id`
//! duplicates) are *not* errors: storage returns zero-count summary
//! tuples for those and the caller treats them as business outcomes.

use thiserror::Error;

/// The error type returned by every fallible tessera operation.
#[derive(Debug, Error)]
pub enum TesseraError {
    /// Misuse of an API: missing required options, a null kernel,
    /// an ill-formed call.
    #[error("invalid: {0}")]
    Invalid(String),

    /// A type mismatch that promotion could not recover.
    #[error("type error: cannot convert {from} to {to}")]
    TypeError {
        /// Source type description.
        from: String,
        /// Target type description.
        to: String,
    },

    /// A code path that is intentionally unreachable in this build.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Arity mismatch, no matching kernel, dispatch failure, or an IO
    /// error surfaced through a compute path.
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// Violation of the plan-parameter binding protocol.
    #[error("bind error: {0}")]
    BindError(String),

    /// Underlying file IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk state failed an integrity check.
    #[error("corrupt {what}: {detail}")]
    Corrupt {
        /// Which structure failed the check (header, frame, meta block).
        what: &'static str,
        /// What exactly did not match.
        detail: String,
    },

    /// A single-writer resource is held by another writer.
    #[error("resource busy")]
    Busy,
}

impl TesseraError {
    /// Shorthand for [`TesseraError::Invalid`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Shorthand for [`TesseraError::ExecutionError`].
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::ExecutionError(msg.into())
    }

    /// Shorthand for [`TesseraError::BindError`].
    pub fn bind(msg: impl Into<String>) -> Self {
        Self::BindError(msg.into())
    }

    /// Shorthand for [`TesseraError::TypeError`].
    pub fn type_error(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::TypeError {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Shorthand for [`TesseraError::Corrupt`].
    pub fn corrupt(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Corrupt {
            what,
            detail: detail.into(),
        }
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, TesseraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_are_stable() {
        let err = TesseraError::type_error("STRING_LITERAL", "BIGINT");
        assert_eq!(
            err.to_string(),
            "type error: cannot convert STRING_LITERAL to BIGINT"
        );

        let err = TesseraError::corrupt("header", "bad magic 0xDEAD");
        assert_eq!(err.to_string(), "corrupt header: bad magic 0xDEAD");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TesseraError = io.into();
        assert!(matches!(err, TesseraError::Io(_)));
    }
}
