//! Query results.
//!
//! A [`ResultSet`] is built fresh for every statement and owns all of its
//! data; nothing in it points into engine memory.

use pgembed_engine::{SpiOutcome, SpiStatus, TupleTable};

use crate::error::{EmbedError, EmbedResult};

/// Classification of a result's status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// The statement succeeded without returning rows.
    Ok,
    /// The statement returned rows.
    Rows,
    /// The statement failed.
    Error,
}

/// Result of executing one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet {
    /// Engine status code; negative on failure.
    status: i32,
    /// Rows returned by a query, or affected by a modification.
    row_count: u64,
    /// Column names.
    columns: Vec<String>,
    /// Row-major cell values; `None` is SQL NULL.
    values: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    /// Creates a result that carries only a status and row count.
    pub fn new(status: i32, row_count: u64) -> Self {
        Self {
            status,
            row_count,
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Creates an empty failed result.
    pub(crate) fn failed(status: i32) -> Self {
        Self::new(status, 0)
    }

    /// Copies the rows of `table` into a new result.
    ///
    /// Allocation failure yields [`EmbedError::Allocation`].
    pub(crate) fn copy_from(outcome: SpiOutcome, table: &dyn TupleTable) -> EmbedResult<Self> {
        let ncols = table.column_count();
        let nrows = table.row_count();

        let mut columns = Vec::new();
        columns
            .try_reserve_exact(ncols)
            .map_err(|_| EmbedError::Allocation)?;
        for col in 0..ncols {
            let name = table.column_name(col).unwrap_or("?column?");
            columns.push(name.to_owned());
        }

        let mut values = Vec::new();
        values
            .try_reserve_exact(nrows)
            .map_err(|_| EmbedError::Allocation)?;
        for row in 0..nrows {
            let mut cells = Vec::new();
            cells
                .try_reserve_exact(ncols)
                .map_err(|_| EmbedError::Allocation)?;
            for col in 0..ncols {
                cells.push(table.value(row, col).map(|v| v.into_owned()));
            }
            values.push(cells);
        }

        Ok(Self {
            status: outcome.status.code(),
            row_count: outcome.processed,
            columns,
            values,
        })
    }

    /// Returns the status code.
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Returns the status as an engine status, if it is a known code.
    pub fn spi_status(&self) -> Option<SpiStatus> {
        SpiStatus::from_code(self.status)
    }

    /// Classifies the status code.
    pub fn kind(&self) -> ResultKind {
        match self.spi_status() {
            _ if self.status < 0 => ResultKind::Error,
            Some(status) if status.returns_rows() => ResultKind::Rows,
            _ => ResultKind::Ok,
        }
    }

    /// Returns true if the statement failed.
    pub fn is_error(&self) -> bool {
        self.status < 0
    }

    /// Returns the number of rows returned or affected.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Returns the number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Returns a row.
    pub fn row(&self, row: usize) -> Option<&[Option<String>]> {
        self.values.get(row).map(Vec::as_slice)
    }

    /// Iterates over the rows.
    pub fn rows(&self) -> impl Iterator<Item = &[Option<String>]> {
        self.values.iter().map(Vec::as_slice)
    }

    /// Returns a cell. `None` means NULL or out of range; see [`is_null`](Self::is_null).
    pub fn get(&self, row: usize, column: usize) -> Option<&str> {
        self.values
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|v| v.as_deref())
    }

    /// Returns true if the cell exists and is NULL.
    pub fn is_null(&self, row: usize, column: usize) -> bool {
        matches!(self.values.get(row).and_then(|r| r.get(column)), Some(None))
    }

    /// Returns the first cell of the first row.
    pub fn scalar(&self) -> Option<&str> {
        self.get(0, 0)
    }

    /// Returns true if no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Pretty prints the result.
    pub fn display(&self) -> String {
        if self.is_error() {
            return format!("ERROR (status {})\n", self.status);
        }
        if self.columns.is_empty() {
            return match self.spi_status() {
                Some(status) => format!("{} ({} rows)\n", status.name(), self.row_count),
                None => format!("OK ({} rows)\n", self.row_count),
            };
        }

        let mut output = String::new();
        let cell = |v: &Option<String>| v.as_deref().unwrap_or("NULL").to_string();

        let mut col_widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.values {
            for (i, val) in row.iter().enumerate() {
                if i < col_widths.len() {
                    col_widths[i] = col_widths[i].max(cell(val).chars().count());
                }
            }
        }

        for (i, name) in self.columns.iter().enumerate() {
            if i > 0 {
                output.push_str(" | ");
            }
            output.push_str(&format!("{:width$}", name, width = col_widths[i]));
        }
        output.push('\n');

        for (i, width) in col_widths.iter().enumerate() {
            if i > 0 {
                output.push_str("-+-");
            }
            output.push_str(&"-".repeat(*width));
        }
        output.push('\n');

        for row in &self.values {
            for (i, val) in row.iter().enumerate() {
                if i > 0 {
                    output.push_str(" | ");
                }
                output.push_str(&format!("{:width$}", cell(val), width = col_widths[i]));
            }
            output.push('\n');
        }

        output.push_str(&format!("({} rows)\n", self.values.len()));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    struct Grid {
        columns: Vec<&'static str>,
        rows: Vec<Vec<Option<&'static str>>>,
    }

    impl TupleTable for Grid {
        fn column_count(&self) -> usize {
            self.columns.len()
        }

        fn column_name(&self, column: usize) -> Option<&str> {
            self.columns.get(column).copied()
        }

        fn row_count(&self) -> usize {
            self.rows.len()
        }

        fn value(&self, row: usize, column: usize) -> Option<Cow<'_, str>> {
            self.rows[row][column].map(Cow::Borrowed)
        }
    }

    fn sample() -> ResultSet {
        let grid = Grid {
            columns: vec!["id", "name"],
            rows: vec![vec![Some("1"), Some("Alice")], vec![Some("2"), None]],
        };
        ResultSet::copy_from(SpiOutcome::new(SpiStatus::Select, 2), &grid).unwrap()
    }

    #[test]
    fn test_copy_from_table() {
        let result = sample();
        assert_eq!(result.kind(), ResultKind::Rows);
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.column_count(), 2);
        assert_eq!(result.columns(), ["id", "name"]);
        assert_eq!(result.get(0, 1), Some("Alice"));
        assert_eq!(result.column_index("name"), Some(1));
        assert_eq!(result.scalar(), Some("1"));
    }

    #[test]
    fn test_null_is_not_empty_string() {
        let result = sample();
        assert!(result.is_null(1, 1));
        assert_eq!(result.get(1, 1), None);
        assert!(!result.is_null(0, 1));
        assert!(!result.is_null(5, 0));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ResultSet::new(SpiStatus::Insert.code(), 3).kind(), ResultKind::Ok);
        assert_eq!(ResultSet::failed(-1).kind(), ResultKind::Error);
        assert!(ResultSet::failed(-4).is_error());
    }

    #[test]
    fn test_display() {
        let display = sample().display();
        assert!(display.contains("id | name"));
        assert!(display.contains("Alice"));
        assert!(display.contains("NULL"));
        assert!(display.contains("(2 rows)"));

        let insert = ResultSet::new(SpiStatus::Insert.code(), 3);
        assert_eq!(insert.display(), "SPI_OK_INSERT (3 rows)\n");
    }

    #[test]
    fn test_display_aligns_multibyte_values() {
        let grid = Grid {
            columns: vec!["name", "n"],
            rows: vec![vec![Some("Renée"), Some("1")], vec![Some("Al"), Some("2")]],
        };
        let result = ResultSet::copy_from(SpiOutcome::new(SpiStatus::Select, 2), &grid).unwrap();
        let display = result.display();
        let lines: Vec<&str> = display.lines().collect();
        assert_eq!(lines[0], "name  | n");
        assert_eq!(lines[2], "Renée | 1");
        assert_eq!(lines[3], "Al    | 2");
        assert!(lines[..4].iter().all(|line| line.chars().count() == 9));
    }
}
