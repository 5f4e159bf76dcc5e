use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::QueryState;

/// Column definition returned by an Athena query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AthenaColumn {
    /// Column name as declared in the result set.
    pub name: String,
    /// Athena data type (e.g. "varchar", "bigint", "double", "boolean", "timestamp").
    pub data_type: String,
}

/// Execution metadata for a finished Athena query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// Athena query execution ID of the attempt that finished.
    pub query_id: String,
    /// Total bytes scanned during execution.
    pub bytes_scanned: u64,
    /// Engine execution time in milliseconds.
    pub execution_time_ms: u64,
    pub state: QueryState,
    /// S3 output location where results were written, if available.
    pub output_location: Option<String>,
    /// Submissions it took to get here (1 = first try).
    pub attempts: u32,
    /// When the finishing attempt was submitted.
    pub submitted_at: DateTime<Utc>,
}

/// Structured result set from an Athena query execution.
///
/// Rows are stored as `Vec<Option<String>>` where `None` represents SQL NULL.
/// Column ordering in each row matches the `columns` vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthenaQueryResult {
    /// Column definitions in result-set order.
    pub columns: Vec<AthenaColumn>,
    /// Row data. Each inner vector has the same length as `columns`.
    pub rows: Vec<Vec<Option<String>>>,
    /// Query execution metadata.
    pub metadata: QueryMetadata,
}

/// Athena pricing: $5 per TB scanned.
const DOLLARS_PER_BYTE: f64 = 5.0 / (1024.0 * 1024.0 * 1024.0 * 1024.0);

impl AthenaQueryResult {
    /// Returns the number of data rows in the result set.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Finds the zero-based index of a column by name (case-sensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Retrieves the value at the given row index and column name.
    ///
    /// Returns `None` if the row index is out of bounds, the column name
    /// does not exist, or the cell value is SQL NULL.
    pub fn get_value(&self, row: usize, col: &str) -> Option<&str> {
        let col_idx = self.column_index(col)?;
        let row_data = self.rows.get(row)?;
        row_data.get(col_idx)?.as_deref()
    }

    /// All values of one column, in row order. `None` if the column is unknown.
    pub fn column_values(&self, col: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.column_index(col)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).and_then(|v| v.as_deref()))
                .collect(),
        )
    }

    /// Distinct value tuples over `cols`, in sorted order.
    ///
    /// Returns `None` if any requested column is missing from the result.
    pub fn distinct_tuples(&self, cols: &[String]) -> Option<BTreeSet<Vec<Option<String>>>> {
        let indices: Vec<usize> = cols
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Option<_>>()?;
        Some(
            self.rows
                .iter()
                .map(|row| {
                    indices
                        .iter()
                        .map(|&i| row.get(i).cloned().flatten())
                        .collect()
                })
                .collect(),
        )
    }

    /// Estimates the query cost in USD based on Athena's $5/TB pricing model.
    pub fn cost_estimate_usd(&self) -> f64 {
        self.metadata.bytes_scanned as f64 * DOLLARS_PER_BYTE
    }
}

impl fmt::Display for AthenaQueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return write!(f, "(empty result set)");
        }

        // Column widths, at least the header length.
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.name.len()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.as_deref().unwrap_or("NULL").len());
                }
            }
        }

        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{:<width$}", col.name, width = widths[i])?;
        }
        writeln!(f)?;

        for (i, w) in widths.iter().enumerate() {
            if i > 0 {
                write!(f, "-+-")?;
            }
            write!(f, "{}", "-".repeat(*w))?;
        }
        writeln!(f)?;

        for row in &self.rows {
            for (i, cell) in row.iter().enumerate().take(widths.len()) {
                if i > 0 {
                    write!(f, " | ")?;
                }
                let value = cell.as_deref().unwrap_or("NULL");
                write!(f, "{:<width$}", value, width = widths[i])?;
            }
            writeln!(f)?;
        }

        writeln!(f)?;
        write!(
            f,
            "Query {} | {} rows | {:.3} MB scanned | {}ms | {} attempt(s) | ${:.6}",
            self.metadata.query_id,
            self.rows.len(),
            self.metadata.bytes_scanned as f64 / (1024.0 * 1024.0),
            self.metadata.execution_time_ms,
            self.metadata.attempts,
            self.cost_estimate_usd(),
        )
    }
}
