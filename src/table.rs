//! Whitespace-delimited report tables produced by the external tool.
//!
//! PLINK report files (`.imiss`, `.lmiss`, `.sexcheck`, `.frq`, `.hwe`,
//! `.het`, `.genome`) share one shape: a header row of column names followed
//! by rows of space-padded fields. This module loads them whole; the tables
//! are per-cohort summaries and comfortably fit in memory.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is empty, expected a header row")]
    Empty { path: PathBuf },

    #[error("{path} has no column named {column}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("{path} line {line}: expected {expected} fields, found {found}")]
    RaggedRow {
        path: PathBuf,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("{path} line {line}: cannot parse {value:?} in column {column} as a number")]
    BadNumber {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },
}

/// An in-memory report table with named columns.
#[derive(Debug, Clone)]
pub struct Table {
    path: PathBuf,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    // Original file line of each row, for error positions. Blank lines are
    // skipped but still counted.
    line_numbers: Vec<u64>,
}

impl Table {
    /// Read a whitespace-delimited table with a header row.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| TableError::Io {
            path: path.clone(),
            source,
        })?;

        let mut lines = BufReader::new(file).lines();
        let mut line_no: u64 = 0;
        let header = loop {
            match lines.next() {
                None => return Err(TableError::Empty { path }),
                Some(Err(source)) => return Err(TableError::Io { path, source }),
                Some(Ok(raw)) => {
                    line_no += 1;
                    if raw.trim().is_empty() {
                        continue;
                    }
                    break raw;
                }
            }
        };

        let columns: Vec<String> = header.split_whitespace().map(str::to_string).collect();

        let mut rows = Vec::new();
        let mut line_numbers = Vec::new();
        for result in lines {
            line_no += 1;
            let raw = result.map_err(|source| TableError::Io {
                path: path.clone(),
                source,
            })?;
            if raw.trim().is_empty() {
                continue;
            }
            let fields: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
            if fields.len() != columns.len() {
                return Err(TableError::RaggedRow {
                    path,
                    line: line_no,
                    expected: columns.len(),
                    found: fields.len(),
                });
            }
            rows.push(fields);
            line_numbers.push(line_no);
        }

        Ok(Self {
            path,
            columns,
            rows,
            line_numbers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a named column, or an error naming the file and column.
    pub fn column_index(&self, column: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| TableError::MissingColumn {
                path: self.path.clone(),
                column: column.to_string(),
            })
    }

    /// All values of a string column, in row order.
    pub fn strings(&self, column: &str) -> Result<Vec<&str>, TableError> {
        let idx = self.column_index(column)?;
        Ok(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    /// All values of a numeric column, in row order. PLINK writes `NA` for
    /// undefined statistics; those parse as NaN so callers can skip them.
    pub fn floats(&self, column: &str) -> Result<Vec<f64>, TableError> {
        let idx = self.column_index(column)?;
        let mut values = Vec::with_capacity(self.rows.len());
        for (row_no, row) in self.rows.iter().enumerate() {
            let raw = row[idx].as_str();
            let value = if raw == "NA" {
                f64::NAN
            } else {
                raw.parse::<f64>().map_err(|_| TableError::BadNumber {
                    path: self.path.clone(),
                    line: self.line_numbers[row_no],
                    column: column.to_string(),
                    value: raw.to_string(),
                })?
            };
            values.push(value);
        }
        Ok(values)
    }
}
