//! Self-describing tabular data backing each cached dataset.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{DISTANCE_LY_COLUMN, DISTANCE_PC_COLUMN, LY_PER_PARSEC, PARALLAX_COLUMNS};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TableError {
    #[error("row has {found} cells but the table has {expected} columns")]
    RowWidth { expected: usize, found: usize },
    #[error("column '{0}' already exists")]
    DuplicateColumn(String),
    #[error("column '{name}' has {found} values but the table has {expected} rows")]
    ColumnLength {
        name: String,
        expected: usize,
        found: usize,
    },
}

/// One cell value. Non-finite numbers are stored as `Null`.
///
/// JSON integers decode as `Integer` so 64-bit catalog identifiers stay exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Integer(i64),
    Number(f64),
    Text(String),
    Null,
}

impl Cell {
    #[must_use]
    pub fn number(value: f64) -> Self {
        if value.is_finite() {
            Cell::Number(value)
        } else {
            Cell::Null
        }
    }

    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Cell::Integer(value) => Some(*value as f64),
            Cell::Number(value) if value.is_finite() => Some(*value),
            Cell::Text(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    /// Identifier rendering: integers are exact, integral floats lose their fractional part.
    #[must_use]
    pub fn as_identifier(&self) -> Option<String> {
        match self {
            Cell::Integer(value) => Some(value.to_string()),
            Cell::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Cell::Number(value) if value.is_finite() && value.fract() == 0.0 => {
                Some(format!("{value:.0}"))
            }
            Cell::Number(value) if value.is_finite() => Some(value.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::number(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Integer(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::text(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Null, Into::into)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    #[must_use]
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Check that every row has one cell per column and column names are unique.
    ///
    /// Tables built through `push_row` always pass; decoded tables may not.
    pub fn check_shape(&self) -> Result<(), TableError> {
        let mut names = HashSet::new();
        for column in &self.columns {
            if !names.insert(column.as_str()) {
                return Err(TableError::DuplicateColumn(column.clone()));
            }
        }
        match self.rows.iter().find(|row| row.len() != self.columns.len()) {
            Some(row) => Err(TableError::RowWidth {
                expected: self.columns.len(),
                found: row.len(),
            }),
            None => Ok(()),
        }
    }

    /// Append a column; `values` must have one entry per row.
    pub fn add_column(&mut self, name: &str, values: Vec<Cell>) -> Result<(), TableError> {
        if self.column_index(name).is_some() {
            return Err(TableError::DuplicateColumn(name.to_string()));
        }
        if values.len() != self.rows.len() {
            return Err(TableError::ColumnLength {
                name: name.to_string(),
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// First column of `candidates` present in the table.
    #[must_use]
    pub fn first_present<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates
            .iter()
            .copied()
            .find(|name| self.column_index(name).is_some())
    }

    #[must_use]
    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|cells| cells.get(idx))
    }

    pub fn numbers<'a>(&'a self, column: &str) -> impl Iterator<Item = Option<f64>> + 'a {
        let idx = self.column_index(column);
        self.rows
            .iter()
            .map(move |row| idx.and_then(|i| row.get(i)).and_then(Cell::as_f64))
    }

    /// Rows whose `column` value is at most `limit`. Rows without a value are dropped.
    #[must_use]
    pub fn filter_at_most(&self, column: &str, limit: f64) -> Table {
        self.retain_rows(|table, row| {
            table
                .cell(row, column)
                .and_then(Cell::as_f64)
                .is_some_and(|value| value <= limit)
        })
    }

    /// Rows whose `column` value is at least `minimum`. Rows without a value are dropped.
    #[must_use]
    pub fn filter_at_least(&self, column: &str, minimum: f64) -> Table {
        self.retain_rows(|table, row| {
            table
                .cell(row, column)
                .and_then(Cell::as_f64)
                .is_some_and(|value| value >= minimum)
        })
    }

    fn retain_rows(&self, keep: impl Fn(&Table, usize) -> bool) -> Table {
        let rows = (0..self.rows.len())
            .filter(|&row| keep(self, row))
            .map(|row| self.rows[row].clone())
            .collect();
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Observed (min, max) of the numeric values in `column`.
    #[must_use]
    pub fn observed_range(&self, column: &str) -> Option<(f64, f64)> {
        self.numbers(column).flatten().fold(None, |acc, value| match acc {
            None => Some((value, value)),
            Some((lo, hi)) => Some((lo.min(value), hi.max(value))),
        })
    }

    /// Union of `self` and `other`, keeping the first row seen for each identifier.
    ///
    /// The identifier column is the first of `id_candidates` present in either
    /// table. Rows without an identifier are always kept. Columns missing from
    /// one side are filled with nulls.
    #[must_use]
    pub fn merge_dedup(&self, other: &Table, id_candidates: &[&str]) -> Table {
        let mut columns = self.columns.clone();
        for column in &other.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        let id_column = id_candidates
            .iter()
            .copied()
            .find(|name| columns.iter().any(|column| column == name));

        let mut merged = Table::new(columns);
        let mut seen = HashSet::new();
        for source in [self, other] {
            let mapping: Vec<Option<usize>> = merged
                .columns
                .iter()
                .map(|column| source.column_index(column))
                .collect();
            let id_idx = id_column.and_then(|name| source.column_index(name));
            for row in &source.rows {
                if let Some(id) = id_idx
                    .and_then(|i| row.get(i))
                    .and_then(Cell::as_identifier)
                {
                    if !seen.insert(id) {
                        continue;
                    }
                }
                let cells = mapping
                    .iter()
                    .map(|idx| idx.and_then(|i| row.get(i)).cloned().unwrap_or(Cell::Null))
                    .collect();
                merged.rows.push(cells);
            }
        }
        merged
    }

    /// Add `Distance_pc` / `Distance_ly` derived from the parallax column.
    ///
    /// No-op when the distance columns already exist or no parallax column is present.
    pub fn derive_distances(&mut self) {
        if self.column_index(DISTANCE_LY_COLUMN).is_some() {
            return;
        }
        let Some(parallax) = self.first_present(PARALLAX_COLUMNS) else {
            return;
        };
        let parsecs: Vec<Option<f64>> = self
            .numbers(parallax)
            .map(|plx| plx.filter(|mas| *mas > 0.0).map(|mas| 1000.0 / mas))
            .collect();
        let light_years: Vec<Cell> = parsecs
            .iter()
            .map(|pc| Cell::from(pc.map(|pc| pc * LY_PER_PARSEC)))
            .collect();
        let parsecs: Vec<Cell> = parsecs.into_iter().map(Cell::from).collect();
        // one value per row by construction; only a ragged table can fail here
        if self.column_index(DISTANCE_PC_COLUMN).is_none() {
            let added = self.add_column(DISTANCE_PC_COLUMN, parsecs);
            debug_assert!(added.is_ok(), "{added:?}");
        }
        let added = self.add_column(DISTANCE_LY_COLUMN, light_years);
        debug_assert!(added.is_ok(), "{added:?}");
    }
}
