//! Error types for the embedding layer.
//!
//! Every public operation returns [`EmbedResult`]. Engine errors never cross
//! this boundary as engine errors: they are translated into an
//! [`EmbedError`] variant chosen by the operation that was running, and the
//! displayed message is what [`Embedded::last_error_message`] reports.
//!
//! [`Embedded::last_error_message`]: crate::Embedded::last_error_message

use std::fmt;
use std::path::PathBuf;

use pgembed_common::ConfigError;
use pgembed_engine::{EngineError, EngineErrorKind};
use thiserror::Error;

use crate::result::ResultSet;

/// Result type for embedding operations.
pub type EmbedResult<T> = Result<T, EmbedError>;

/// Stable numeric codes for programmatic error handling.
///
/// The high byte is the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// Configuration could not be loaded or is invalid.
    Configuration = 0x0006,

    // Lifecycle errors (0x0100 - 0x01FF)
    /// Bootstrap or startup failed.
    InitFailed = 0x0100,
    /// The cluster is locked by another process.
    ClusterInUse = 0x0101,
    /// The engine has not been started.
    NotInitialized = 0x0102,

    // Transaction errors (0x0200 - 0x02FF)
    /// Transaction control called in the wrong state.
    TransactionState = 0x0200,
    /// The engine failed to start or commit a transaction.
    TransactionFailed = 0x0201,

    // Query errors (0x0300 - 0x03FF)
    /// Statement planning or execution failed.
    ExecutionFailed = 0x0300,

    // Resource errors (0x0400 - 0x04FF)
    /// Memory could not be allocated.
    OutOfMemory = 0x0400,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Lifecycle",
            0x02 => "Transaction",
            0x03 => "Query",
            0x04 => "Resource",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A failed statement, with the partial result.
///
/// The partial result always carries a negative status code.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecError {
    message: String,
    result: ResultSet,
}

impl ExecError {
    /// Creates an execution error from an engine error.
    pub(crate) fn from_engine(err: &EngineError) -> Self {
        Self::new(format!("Query failed: {}", err), ResultSet::failed(-1))
    }

    /// Creates an execution error with a partial result.
    pub(crate) fn new(message: impl Into<String>, result: ResultSet) -> Self {
        Self {
            message: message.into(),
            result,
        }
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the partial result.
    pub fn partial_result(&self) -> &ResultSet {
        &self.result
    }

    /// Consumes the error, returning the partial result.
    pub fn into_result(self) -> ResultSet {
        self.result
    }
}

/// Errors raised by the embedding layer.
#[derive(Debug, Error)]
pub enum EmbedError {
    // ==========================================================================
    // Lifecycle Errors
    // ==========================================================================
    /// Bootstrap or startup failed.
    #[error("{message}")]
    Init {
        /// Error message.
        message: String,
        /// Underlying I/O error, for filesystem failures.
        #[source]
        source: Option<std::io::Error>,
    },

    /// The cluster lock file is held by another process.
    #[error("{message}")]
    LockConflict {
        /// Cluster directory.
        data_dir: PathBuf,
        /// Error message.
        message: String,
    },

    /// The engine is not started.
    #[error("Not initialized")]
    NotInitialized,

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// Transaction control called in the wrong state.
    #[error("{0}")]
    TransactionState(String),

    /// The engine failed while starting or committing a transaction.
    #[error("{operation} failed: {message}")]
    TransactionFailed {
        /// "Begin" or "Commit".
        operation: &'static str,
        /// Engine message.
        message: String,
    },

    // ==========================================================================
    // Query Errors
    // ==========================================================================
    /// A statement failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Invalid argument provided.
    #[error("Invalid arguments: {0}")]
    InvalidArgument(String),

    /// Memory for a result could not be allocated.
    #[error("Out of memory")]
    Allocation,

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EmbedError {
    /// Creates an initialization error.
    pub fn init(message: impl Into<String>) -> Self {
        EmbedError::Init {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an initialization error for a failed filesystem operation.
    pub fn init_io(message: impl Into<String>, source: std::io::Error) -> Self {
        let message = format!("{}: {}", message.into(), source);
        EmbedError::Init {
            message,
            source: Some(source),
        }
    }

    /// Translates an engine error raised during bootstrap or startup.
    pub(crate) fn from_startup(err: EngineError, data_dir: PathBuf) -> Self {
        match err.kind {
            EngineErrorKind::LockFileExists => EmbedError::LockConflict {
                data_dir,
                message: format!("Cluster in use: {}", err.full_message()),
            },
            EngineErrorKind::OutOfMemory => EmbedError::Allocation,
            _ => EmbedError::init(format!("Initialization failed: {}", err.full_message())),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        EmbedError::InvalidArgument(message.into())
    }

    /// Returns the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            EmbedError::Init { .. } => ErrorCode::InitFailed,
            EmbedError::LockConflict { .. } => ErrorCode::ClusterInUse,
            EmbedError::NotInitialized => ErrorCode::NotInitialized,
            EmbedError::TransactionState(_) => ErrorCode::TransactionState,
            EmbedError::TransactionFailed { .. } => ErrorCode::TransactionFailed,
            EmbedError::Exec(_) => ErrorCode::ExecutionFailed,
            EmbedError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            EmbedError::Allocation => ErrorCode::OutOfMemory,
            EmbedError::Config(_) => ErrorCode::Configuration,
        }
    }

    /// Returns true if the operation failed because of the engine state.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            EmbedError::NotInitialized | EmbedError::TransactionState(_)
        )
    }

    /// Returns true if the cluster is locked by another process.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, EmbedError::LockConflict { .. })
    }

    /// Returns the partial result of a failed statement.
    pub fn partial_result(&self) -> Option<&ResultSet> {
        match self {
            EmbedError::Exec(e) => Some(e.partial_result()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EmbedError::NotInitialized.code(), ErrorCode::NotInitialized);
        assert_eq!(ErrorCode::ClusterInUse.category(), "Lifecycle");
        assert_eq!(ErrorCode::OutOfMemory.as_u16(), 0x0400);
        assert_eq!(ErrorCode::TransactionFailed.category(), "Transaction");
    }

    #[test]
    fn test_startup_translation() {
        let err = EmbedError::from_startup(
            EngineError::lock_conflict("lock file \"postmaster.pid\" already exists"),
            PathBuf::from("/data"),
        );
        assert!(err.is_lock_conflict());
        assert!(err.to_string().starts_with("Cluster in use: lock file"));

        let err = EmbedError::from_startup(
            EngineError::fatal(EngineErrorKind::UndefinedObject, "database \"x\" does not exist"),
            PathBuf::from("/data"),
        );
        assert_eq!(
            err.to_string(),
            "Initialization failed: database \"x\" does not exist"
        );

        let err = EmbedError::from_startup(EngineError::out_of_memory(), PathBuf::from("/data"));
        assert_eq!(err.to_string(), "Out of memory");
    }

    #[test]
    fn test_exec_error_keeps_partial_result() {
        let engine_err = EngineError::error(EngineErrorKind::Syntax, "syntax error at end of input");
        let err: EmbedError = ExecError::from_engine(&engine_err).into();
        assert_eq!(err.to_string(), "Query failed: syntax error at end of input");
        assert!(err.partial_result().unwrap().is_error());
        assert_eq!(err.code(), ErrorCode::ExecutionFailed);
    }

    #[test]
    fn test_init_io_message() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = EmbedError::init_io("could not create directory \"/x/global\"", io);
        assert!(err.to_string().contains("/x/global"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_state_errors() {
        assert!(EmbedError::NotInitialized.is_state_error());
        assert!(EmbedError::TransactionState("already in transaction".into()).is_state_error());
        assert!(!EmbedError::Allocation.is_state_error());
    }
}
