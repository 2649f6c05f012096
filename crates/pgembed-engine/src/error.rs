//! Engine error types.
//!
//! The engine reports failures as error-data records: a severity, a message
//! meant for humans, optional detail and an SQLSTATE code. [`EngineError`]
//! is that record; callers of the [`Engine`](crate::Engine) trait receive it
//! as an ordinary `Err` instead of a non-local jump.

use std::fmt;

use thiserror::Error;

/// Result type for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// How severe an engine error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The current statement or transaction failed.
    Error,
    /// The session cannot continue.
    Fatal,
    /// The whole engine must restart.
    Panic,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
            Severity::Panic => write!(f, "PANIC"),
        }
    }
}

/// Broad classification used by the embedding layer to pick an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// Anything without a more specific classification.
    General,
    /// The cluster lock file is held by a live process.
    LockFileExists,
    /// The data directory is missing or malformed.
    DataDirectory,
    /// Memory could not be allocated.
    OutOfMemory,
    /// The statement could not be parsed.
    Syntax,
    /// A referenced object does not exist.
    UndefinedObject,
    /// The object being created already exists.
    DuplicateObject,
    /// The operation is not valid in the current transaction state.
    InvalidTransactionState,
    /// A file operation failed.
    Io,
    /// The statement uses a construct the engine does not implement.
    FeatureNotSupported,
    /// A value could not be converted or computed.
    DataException,
}

/// An error raised by the engine.
///
/// Displays as the bare message, which is what the embedding layer copies
/// into its last-error buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    /// Severity of the error.
    pub severity: Severity,
    /// Classification.
    pub kind: EngineErrorKind,
    /// Primary message.
    pub message: String,
    /// Optional secondary message.
    pub detail: Option<String>,
    /// Optional five-character SQLSTATE.
    pub sqlstate: Option<&'static str>,
}

impl EngineError {
    /// Creates an ERROR-level error.
    pub fn error(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            detail: None,
            sqlstate: None,
        }
    }

    /// Creates a FATAL-level error.
    pub fn fatal(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fatal,
            ..Self::error(kind, message)
        }
    }

    /// Creates a lock file conflict error.
    pub fn lock_conflict(message: impl Into<String>) -> Self {
        Self::fatal(EngineErrorKind::LockFileExists, message).with_sqlstate("F0001")
    }

    /// Creates an out-of-memory error.
    pub fn out_of_memory() -> Self {
        Self::error(EngineErrorKind::OutOfMemory, "out of memory").with_sqlstate("53200")
    }

    /// Creates an I/O error naming the file involved.
    pub fn io(action: &str, path: impl fmt::Display, source: &std::io::Error) -> Self {
        Self::error(
            EngineErrorKind::Io,
            format!("could not {} \"{}\": {}", action, path, source),
        )
        .with_sqlstate("58030")
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attaches an SQLSTATE code.
    #[must_use]
    pub fn with_sqlstate(mut self, sqlstate: &'static str) -> Self {
        self.sqlstate = Some(sqlstate);
        self
    }

    /// Returns true if the lock file is held by another process.
    pub fn is_lock_conflict(&self) -> bool {
        self.kind == EngineErrorKind::LockFileExists
    }

    /// Returns the message followed by the detail, if any.
    pub fn full_message(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{} ({})", self.message, detail),
            None => self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_message() {
        let err = EngineError::error(EngineErrorKind::Syntax, "syntax error at or near \"SELEC\"")
            .with_sqlstate("42601");
        assert_eq!(err.to_string(), "syntax error at or near \"SELEC\"");
        assert_eq!(err.severity, Severity::Error);
        assert_eq!(err.sqlstate, Some("42601"));
    }

    #[test]
    fn test_lock_conflict() {
        let err = EngineError::lock_conflict("lock file \"postmaster.pid\" already exists")
            .with_detail("Is another process running?");
        assert!(err.is_lock_conflict());
        assert_eq!(err.severity, Severity::Fatal);
        assert!(err.full_message().contains("Is another process running?"));
    }

    #[test]
    fn test_io_error_names_path() {
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = EngineError::io("open file", "/data/global/pg_control", &source);
        assert_eq!(err.kind, EngineErrorKind::Io);
        assert!(err.message.contains("/data/global/pg_control"));
    }
}
