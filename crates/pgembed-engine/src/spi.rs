//! Server programming interface types.
//!
//! Statements run through the engine's SPI: connect, execute, read the
//! tuple table left behind by the last statement, finish. These types
//! describe what an execution returns.

use std::borrow::Cow;
use std::fmt;

/// Status code returned by an SPI execution.
///
/// Non-negative codes report the kind of statement that ran, negative codes
/// report an SPI-level failure that did not raise an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SpiStatus {
    Connect,
    Finish,
    Fetch,
    Utility,
    Select,
    SelectInto,
    Insert,
    Delete,
    Update,
    Cursor,
    InsertReturning,
    DeleteReturning,
    UpdateReturning,
    Rewritten,
    RelRegister,
    RelUnregister,
    TableFuncRegister,
    Merge,
    MergeReturning,
    ErrorConnect,
    ErrorCopy,
    ErrorOpUnknown,
    ErrorUnconnected,
    ErrorCursor,
    ErrorArgument,
    ErrorParam,
    ErrorTransaction,
    ErrorNoAttribute,
    ErrorNoOutFunc,
    ErrorTypUnknown,
    ErrorRelDuplicate,
    ErrorRelNotFound,
}

impl SpiStatus {
    /// Returns the numeric code.
    pub fn code(&self) -> i32 {
        match self {
            SpiStatus::Connect => 1,
            SpiStatus::Finish => 2,
            SpiStatus::Fetch => 3,
            SpiStatus::Utility => 4,
            SpiStatus::Select => 5,
            SpiStatus::SelectInto => 6,
            SpiStatus::Insert => 7,
            SpiStatus::Delete => 8,
            SpiStatus::Update => 9,
            SpiStatus::Cursor => 10,
            SpiStatus::InsertReturning => 11,
            SpiStatus::DeleteReturning => 12,
            SpiStatus::UpdateReturning => 13,
            SpiStatus::Rewritten => 14,
            SpiStatus::RelRegister => 15,
            SpiStatus::RelUnregister => 16,
            SpiStatus::TableFuncRegister => 17,
            SpiStatus::Merge => 18,
            SpiStatus::MergeReturning => 19,
            SpiStatus::ErrorConnect => -1,
            SpiStatus::ErrorCopy => -2,
            SpiStatus::ErrorOpUnknown => -3,
            SpiStatus::ErrorUnconnected => -4,
            SpiStatus::ErrorCursor => -5,
            SpiStatus::ErrorArgument => -6,
            SpiStatus::ErrorParam => -7,
            SpiStatus::ErrorTransaction => -8,
            SpiStatus::ErrorNoAttribute => -9,
            SpiStatus::ErrorNoOutFunc => -10,
            SpiStatus::ErrorTypUnknown => -11,
            SpiStatus::ErrorRelDuplicate => -12,
            SpiStatus::ErrorRelNotFound => -13,
        }
    }

    /// Looks up a status by numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        const ALL: [SpiStatus; 32] = [
            SpiStatus::Connect,
            SpiStatus::Finish,
            SpiStatus::Fetch,
            SpiStatus::Utility,
            SpiStatus::Select,
            SpiStatus::SelectInto,
            SpiStatus::Insert,
            SpiStatus::Delete,
            SpiStatus::Update,
            SpiStatus::Cursor,
            SpiStatus::InsertReturning,
            SpiStatus::DeleteReturning,
            SpiStatus::UpdateReturning,
            SpiStatus::Rewritten,
            SpiStatus::RelRegister,
            SpiStatus::RelUnregister,
            SpiStatus::TableFuncRegister,
            SpiStatus::Merge,
            SpiStatus::MergeReturning,
            SpiStatus::ErrorConnect,
            SpiStatus::ErrorCopy,
            SpiStatus::ErrorOpUnknown,
            SpiStatus::ErrorUnconnected,
            SpiStatus::ErrorCursor,
            SpiStatus::ErrorArgument,
            SpiStatus::ErrorParam,
            SpiStatus::ErrorTransaction,
            SpiStatus::ErrorNoAttribute,
            SpiStatus::ErrorNoOutFunc,
            SpiStatus::ErrorTypUnknown,
            SpiStatus::ErrorRelDuplicate,
            SpiStatus::ErrorRelNotFound,
        ];
        ALL.into_iter().find(|status| status.code() == code)
    }

    /// Returns true for the negative failure codes.
    pub fn is_error(&self) -> bool {
        self.code() < 0
    }

    /// Returns true if the statement can leave rows in the tuple table.
    pub fn returns_rows(&self) -> bool {
        matches!(
            self,
            SpiStatus::Select
                | SpiStatus::Fetch
                | SpiStatus::InsertReturning
                | SpiStatus::DeleteReturning
                | SpiStatus::UpdateReturning
                | SpiStatus::MergeReturning
        )
    }

    /// Returns the engine's symbolic name for the code.
    pub fn name(&self) -> &'static str {
        match self {
            SpiStatus::Connect => "SPI_OK_CONNECT",
            SpiStatus::Finish => "SPI_OK_FINISH",
            SpiStatus::Fetch => "SPI_OK_FETCH",
            SpiStatus::Utility => "SPI_OK_UTILITY",
            SpiStatus::Select => "SPI_OK_SELECT",
            SpiStatus::SelectInto => "SPI_OK_SELINTO",
            SpiStatus::Insert => "SPI_OK_INSERT",
            SpiStatus::Delete => "SPI_OK_DELETE",
            SpiStatus::Update => "SPI_OK_UPDATE",
            SpiStatus::Cursor => "SPI_OK_CURSOR",
            SpiStatus::InsertReturning => "SPI_OK_INSERT_RETURNING",
            SpiStatus::DeleteReturning => "SPI_OK_DELETE_RETURNING",
            SpiStatus::UpdateReturning => "SPI_OK_UPDATE_RETURNING",
            SpiStatus::Rewritten => "SPI_OK_REWRITTEN",
            SpiStatus::RelRegister => "SPI_OK_REL_REGISTER",
            SpiStatus::RelUnregister => "SPI_OK_REL_UNREGISTER",
            SpiStatus::TableFuncRegister => "SPI_OK_TD_REGISTER",
            SpiStatus::Merge => "SPI_OK_MERGE",
            SpiStatus::MergeReturning => "SPI_OK_MERGE_RETURNING",
            SpiStatus::ErrorConnect => "SPI_ERROR_CONNECT",
            SpiStatus::ErrorCopy => "SPI_ERROR_COPY",
            SpiStatus::ErrorOpUnknown => "SPI_ERROR_OPUNKNOWN",
            SpiStatus::ErrorUnconnected => "SPI_ERROR_UNCONNECTED",
            SpiStatus::ErrorCursor => "SPI_ERROR_CURSOR",
            SpiStatus::ErrorArgument => "SPI_ERROR_ARGUMENT",
            SpiStatus::ErrorParam => "SPI_ERROR_PARAM",
            SpiStatus::ErrorTransaction => "SPI_ERROR_TRANSACTION",
            SpiStatus::ErrorNoAttribute => "SPI_ERROR_NOATTRIBUTE",
            SpiStatus::ErrorNoOutFunc => "SPI_ERROR_NOOUTFUNC",
            SpiStatus::ErrorTypUnknown => "SPI_ERROR_TYPUNKNOWN",
            SpiStatus::ErrorRelDuplicate => "SPI_ERROR_REL_DUPLICATE",
            SpiStatus::ErrorRelNotFound => "SPI_ERROR_REL_NOT_FOUND",
        }
    }
}

impl fmt::Display for SpiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// What an SPI execution returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiOutcome {
    /// Status code.
    pub status: SpiStatus,
    /// Rows processed (returned for SELECT, affected otherwise).
    pub processed: u64,
}

impl SpiOutcome {
    /// Creates an outcome.
    pub fn new(status: SpiStatus, processed: u64) -> Self {
        Self { status, processed }
    }
}

/// Rows left behind by the most recent SPI execution.
///
/// Values are borrowed from engine memory that is reclaimed by the next
/// message-context reset; callers copy what they need to keep.
pub trait TupleTable {
    /// Number of columns.
    fn column_count(&self) -> usize;

    /// Name of a column, `None` if the index is out of range.
    fn column_name(&self, column: usize) -> Option<&str>;

    /// Number of rows.
    fn row_count(&self) -> usize;

    /// Text form of a value; `None` for SQL NULL or an out-of-range index.
    fn value(&self, row: usize, column: usize) -> Option<Cow<'_, str>>;
}
