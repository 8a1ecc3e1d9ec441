//! Columnar data frames exchanged between the pipeline and the data engine.
//!
//! A [`Frame`] is an ordered list of equally long named [`Column`]s holding
//! dynamically typed [`Value`]s. Frames produced by node executions are wrapped
//! in `Arc` and shared between the result cache, downstream nodes and previews,
//! so they are never mutated after construction.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors raised while building or reading frames.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("Column '{column}' has {found} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("Duplicate column name '{0}'")]
    DuplicateColumn(String),

    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("CSV error on line {line}: {message}")]
    Csv { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(String),
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "decimal",
            Value::Text(_) => "text",
        }
    }

    /// Hashable key for grouping, joining and de-duplication.
    ///
    /// Integral floats map to the same key as the equal integer.
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Int(i) => ValueKey::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    ValueKey::Int(*f as i64)
                } else {
                    ValueKey::Float(f.to_bits())
                }
            }
            Value::Text(s) => ValueKey::Text(s.clone()),
        }
    }

    /// Total order used for sorting: null < boolean < number < text.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::Text(_) => 3,
            }
        }

        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (a, b) if rank(a) == 2 && rank(b) == 2 => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Comparison used by predicates. Returns `None` when the values are not
    /// comparable (different kinds, or either side null).
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Parse a raw text cell, inferring the narrowest type.
    pub fn infer(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::Float(f);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Text(raw.to_string()),
        }
    }

    /// Approximate heap + inline size in bytes.
    pub fn estimated_bytes(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Value::Text(s) => inline + s.capacity(),
            _ => inline,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Hashable projection of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
}

/// A named column of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An immutable table of equally long columns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<Column>,
}

impl Frame {
    /// Build a frame, checking column lengths and name uniqueness.
    pub fn new(columns: Vec<Column>) -> Result<Self, FrameError> {
        let mut seen = HashSet::new();
        let expected = columns.first().map(Column::len).unwrap_or(0);
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(FrameError::DuplicateColumn(column.name.clone()));
            }
            if column.len() != expected {
                return Err(FrameError::LengthMismatch {
                    column: column.name.clone(),
                    expected,
                    found: column.len(),
                });
            }
        }
        Ok(Self { columns })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a frame from row-major data.
    pub fn from_rows<S: AsRef<str>>(
        names: &[S],
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, FrameError> {
        let mut columns: Vec<Column> = names
            .iter()
            .map(|n| Column::new(n.as_ref(), Vec::with_capacity(rows.len())))
            .collect();
        for (line, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(FrameError::Csv {
                    line: line + 1,
                    message: format!("row has {} cells, expected {}", row.len(), columns.len()),
                });
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }
        Self::new(columns)
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column, FrameError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))
    }

    /// Values of row `index`, in column order.
    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| c.values.get(index).cloned().unwrap_or_default())
            .collect()
    }

    /// Gather rows by index, in the given order.
    pub fn take(&self, indices: &[usize]) -> Frame {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                Column::new(
                    c.name.clone(),
                    indices
                        .iter()
                        .map(|&i| c.values.get(i).cloned().unwrap_or_default())
                        .collect(),
                )
            })
            .collect();
        Frame { columns }
    }

    /// Rows `offset..offset + len`, clamped to the frame.
    pub fn slice(&self, offset: usize, len: usize) -> Frame {
        let start = offset.min(self.height());
        let end = start.saturating_add(len).min(self.height());
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.values[start..end].to_vec()))
            .collect();
        Frame { columns }
    }

    pub fn head(&self, n: usize) -> Frame {
        self.slice(0, n)
    }

    pub fn tail(&self, n: usize) -> Frame {
        let height = self.height();
        self.slice(height.saturating_sub(n), n)
    }

    /// Keep only the named columns, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Frame, FrameError> {
        let columns = names
            .iter()
            .map(|n| self.column(n.as_ref()).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Frame::new(columns)
    }

    /// Remove the named columns.
    pub fn drop_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Frame, FrameError> {
        for name in names {
            self.column(name.as_ref())?;
        }
        let columns = self
            .columns
            .iter()
            .filter(|c| !names.iter().any(|n| n.as_ref() == c.name))
            .cloned()
            .collect();
        Ok(Frame { columns })
    }

    /// Rename columns given `(from, to)` pairs.
    pub fn rename(&self, pairs: &[(String, String)]) -> Result<Frame, FrameError> {
        let mut columns = self.columns.clone();
        for (from, to) in pairs {
            let idx = self
                .column_index(from)
                .ok_or_else(|| FrameError::ColumnNotFound(from.clone()))?;
            columns[idx].name = to.clone();
        }
        Frame::new(columns)
    }

    /// Approximate memory footprint, used as the cache cost of a result.
    pub fn estimated_bytes(&self) -> usize {
        self.columns
            .iter()
            .map(|c| {
                c.name.capacity()
                    + c.values.iter().map(Value::estimated_bytes).sum::<usize>()
            })
            .sum()
    }

    /// Parse delimited text. Cell types are inferred per column: a column is
    /// integer, decimal or boolean only if every non-empty cell parses as such.
    pub fn parse_csv(text: &str, delimiter: u8, has_header: bool) -> Result<Frame, FrameError> {
        let records = split_records(text, delimiter as char)?;
        let mut records = records.into_iter();

        let header: Vec<String> = if has_header {
            match records.next() {
                Some(h) => h,
                None => return Ok(Frame::empty()),
            }
        } else {
            Vec::new()
        };

        let body: Vec<Vec<String>> = records.collect();
        let width = if has_header {
            header.len()
        } else {
            body.first().map(Vec::len).unwrap_or(0)
        };
        let names: Vec<String> = if has_header {
            header
        } else {
            (0..width).map(|i| format!("column_{}", i + 1)).collect()
        };

        let mut raw_columns: Vec<Vec<String>> = vec![Vec::with_capacity(body.len()); width];
        for (i, record) in body.into_iter().enumerate() {
            if record.len() != width {
                return Err(FrameError::Csv {
                    line: i + 1 + usize::from(has_header),
                    message: format!("expected {} fields, found {}", width, record.len()),
                });
            }
            for (col, cell) in raw_columns.iter_mut().zip(record) {
                col.push(cell);
            }
        }

        let columns = names
            .into_iter()
            .zip(raw_columns)
            .map(|(name, cells)| Column::new(name, infer_column(cells)))
            .collect();
        Frame::new(columns)
    }

    /// Read a delimited file from disk.
    pub fn read_csv(
        path: impl AsRef<Path>,
        delimiter: u8,
        has_header: bool,
    ) -> Result<Frame, FrameError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FrameError::Io(format!("Failed to read {:?}: {}", path, e)))?;
        Self::parse_csv(&text, delimiter, has_header)
    }

    /// Render the first `max_rows` rows as an aligned text table.
    pub fn to_table_string(&self, max_rows: usize) -> String {
        let shown = self.height().min(max_rows);
        let cells: Vec<Vec<String>> = (0..shown)
            .map(|r| self.row(r).iter().map(|v| v.to_string()).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                cells
                    .iter()
                    .map(|row| row[i].len())
                    .chain(std::iter::once(c.name.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        let line = |values: Vec<&str>| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v, width = *w))
                .collect::<Vec<_>>()
                .join(" | ")
        };
        out.push_str(&line(self.column_names()));
        out.push('\n');
        out.push_str(
            &widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        for row in &cells {
            out.push('\n');
            out.push_str(&line(row.iter().map(String::as_str).collect()));
        }
        if self.height() > shown {
            out.push_str(&format!("\n... {} more rows", self.height() - shown));
        }
        out
    }
}

fn infer_column(cells: Vec<String>) -> Vec<Value> {
    let inferred: Vec<Value> = cells.iter().map(|c| Value::infer(c)).collect();

    let all = |pred: fn(&Value) -> bool| inferred.iter().all(|v| v.is_null() || pred(v));
    if all(|v| matches!(v, Value::Int(_))) || all(|v| matches!(v, Value::Bool(_))) {
        return inferred;
    }
    if all(|v| matches!(v, Value::Int(_) | Value::Float(_))) {
        return inferred
            .into_iter()
            .map(|v| match v {
                Value::Int(i) => Value::Float(i as f64),
                other => other,
            })
            .collect();
    }
    // Mixed column: keep the original text of every non-empty cell.
    cells
        .into_iter()
        .map(|c| {
            if c.trim().is_empty() {
                Value::Null
            } else {
                Value::Text(c)
            }
        })
        .collect()
}

/// Split CSV text into records, honouring double-quoted fields.
fn split_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>, FrameError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if !(record.len() == 1 && record[0].is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
                line += 1;
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(FrameError::Csv {
            line,
            message: "unterminated quoted field".to_string(),
        });
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}
