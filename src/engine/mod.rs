//! Dataframe engine boundary
//!
//! The pipeline never manipulates rows itself. Every node execution builds a
//! [`LazyPlan`] describing the work, and a [`DataEngine`] materialises it into a
//! [`Frame`]. Plans are plain values, so building one is cheap and never touches
//! data; only [`DataEngine::collect`] does.
//!
//! ```text
//! ┌──────────────┐  LazyPlan   ┌──────────────┐   Frame
//! │ Node builder │────────────►│  DataEngine  │──────────► cache
//! └──────────────┘             └──────┬───────┘
//!                                     │ polls
//!                              ┌──────▼───────┐
//!                              │  Interrupt   │ ◄── cancel(evaluation)
//!                              └──────────────┘
//! ```
//!
//! [`memory::MemoryEngine`] is the in-process implementation used by default
//! and in tests. [`sql`] compiles the SQL subset of custom SQL nodes into
//! plans.

pub mod memory;
pub mod sql;

pub use memory::MemoryEngine;

use crate::frame::{Frame, FrameError, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while materialising a plan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Type mismatch in column '{column}': {message}")]
    TypeMismatch { column: String, message: String },

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Execution interrupted")]
    Interrupted,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl From<FrameError> for EngineError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::ColumnNotFound(name) => EngineError::ColumnNotFound(name),
            FrameError::Io(message) => EngineError::Io(message),
            FrameError::Csv { .. } => EngineError::Parse(err.to_string()),
            other => EngineError::InvalidPlan(other.to_string()),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

// ==================== Interrupt ====================

/// Cooperative cancellation flag shared between a scheduler and the code
/// running a node (engine operators, script sandbox).
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that work observing this flag stops as soon as possible.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` once triggered.
    #[inline]
    pub fn check(&self) -> EngineResult<()> {
        if self.is_triggered() {
            Err(EngineError::Interrupted)
        } else {
            Ok(())
        }
    }
}

// ==================== Predicates ====================

/// Comparison operator used by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl CompareOp {
    pub const NAMES: &'static [&'static str] = &["eq", "ne", "gt", "ge", "lt", "le", "contains"];

    /// Parse either the keyword form (`ge`) or the symbol form (`>=`).
    pub fn parse(s: &str) -> Option<Self> {
        let op = match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" | "==" => CompareOp::Eq,
            "ne" | "!=" | "<>" => CompareOp::Ne,
            "gt" | ">" => CompareOp::Gt,
            "ge" | ">=" => CompareOp::Ge,
            "lt" | "<" => CompareOp::Lt,
            "le" | "<=" => CompareOp::Le,
            "contains" | "like" => CompareOp::Contains,
            _ => return None,
        };
        Some(op)
    }

    /// Apply the operator to a cell and a literal.
    pub fn apply(self, cell: &Value, literal: &Value) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => values_equal(cell, literal),
            CompareOp::Ne => !values_equal(cell, literal),
            CompareOp::Gt => cell.partial_compare(literal) == Some(Greater),
            CompareOp::Ge => matches!(cell.partial_compare(literal), Some(Greater | Equal)),
            CompareOp::Lt => cell.partial_compare(literal) == Some(Less),
            CompareOp::Le => matches!(cell.partial_compare(literal), Some(Less | Equal)),
            CompareOp::Contains => match cell {
                Value::Null => false,
                other => other.to_string().contains(&literal.to_string()),
            },
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        _ => a.partial_compare(b) == Some(std::cmp::Ordering::Equal),
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Contains => "contains",
        };
        write!(f, "{}", s)
    }
}

/// Row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull(String),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Columns referenced by the predicate.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Predicate::Compare { column, .. } | Predicate::IsNull(column) => vec![column.as_str()],
            Predicate::Not(inner) => inner.columns(),
            Predicate::And(parts) | Predicate::Or(parts) => {
                parts.iter().flat_map(|p| p.columns()).collect()
            }
        }
    }
}

// ==================== Aggregations ====================

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    First,
    Last,
    NUnique,
}

impl AggFunc {
    pub const NAMES: &'static [&'static str] =
        &["count", "sum", "mean", "min", "max", "first", "last", "n_unique"];

    pub fn parse(s: &str) -> Option<Self> {
        let func = match s.trim().to_ascii_lowercase().as_str() {
            "count" => AggFunc::Count,
            "sum" => AggFunc::Sum,
            "mean" | "avg" => AggFunc::Mean,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            "first" => AggFunc::First,
            "last" => AggFunc::Last,
            "n_unique" | "nunique" => AggFunc::NUnique,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::First => "first",
            AggFunc::Last => "last",
            AggFunc::NUnique => "n_unique",
        }
    }
}

/// One output column of an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggExpr {
    pub func: AggFunc,
    /// `None` means all rows (`count(*)`).
    pub column: Option<String>,
    pub alias: String,
}

impl AggExpr {
    pub fn new(func: AggFunc, column: Option<String>, alias: Option<String>) -> Self {
        let alias = alias.unwrap_or_else(|| match &column {
            Some(c) => format!("{}_{}", c, func.name()),
            None => func.name().to_string(),
        });
        Self {
            func,
            column,
            alias,
        }
    }

    /// Parse the `func:column[:alias]` form used by aggregate node parameters.
    /// `*` as column counts rows.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut parts = spec.split(':').map(str::trim);
        let func_name = parts.next().unwrap_or_default();
        let func = AggFunc::parse(func_name)
            .ok_or_else(|| format!("unknown aggregate function '{}'", func_name))?;
        let column = match parts.next() {
            None | Some("*") | Some("") => None,
            Some(c) => Some(c.to_string()),
        };
        if column.is_none() && func != AggFunc::Count {
            return Err(format!("aggregate '{}' needs a column", func.name()));
        }
        let alias = parts.next().filter(|a| !a.is_empty()).map(str::to_string);
        if parts.next().is_some() {
            return Err(format!("malformed aggregation '{}'", spec));
        }
        Ok(Self::new(func, column, alias))
    }
}

// ==================== Plans ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinHow {
    Inner,
    Left,
    Outer,
}

impl JoinHow {
    pub const NAMES: &'static [&'static str] = &["inner", "left", "outer"];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inner" => Some(JoinHow::Inner),
            "left" => Some(JoinHow::Left),
            "outer" | "full" => Some(JoinHow::Outer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    pub fn new(column: impl Into<String>, descending: bool) -> Self {
        Self {
            column: column.into(),
            descending,
        }
    }
}

/// A composable description of dataframe work.
#[derive(Debug, Clone)]
pub enum LazyPlan {
    /// An already materialised frame (upstream results, literal tables).
    Materialized(Arc<Frame>),
    CsvScan {
        path: PathBuf,
        delimiter: u8,
        has_header: bool,
    },
    Filter {
        input: Box<LazyPlan>,
        predicate: Predicate,
    },
    Project {
        input: Box<LazyPlan>,
        columns: Vec<String>,
    },
    Drop {
        input: Box<LazyPlan>,
        columns: Vec<String>,
    },
    Rename {
        input: Box<LazyPlan>,
        pairs: Vec<(String, String)>,
    },
    Slice {
        input: Box<LazyPlan>,
        offset: usize,
        len: usize,
    },
    Tail {
        input: Box<LazyPlan>,
        len: usize,
    },
    /// Every row except `offset..offset + len`.
    Exclude {
        input: Box<LazyPlan>,
        offset: usize,
        len: usize,
    },
    /// Every row except the last `len`.
    DropTail {
        input: Box<LazyPlan>,
        len: usize,
    },
    /// Every `every`-th row starting at `offset`.
    Step {
        input: Box<LazyPlan>,
        every: usize,
        offset: usize,
    },
    /// First occurrence of each distinct key; empty subset means all columns.
    Distinct {
        input: Box<LazyPlan>,
        subset: Vec<String>,
    },
    /// Every row whose key occurs more than once; empty subset means all
    /// columns.
    Duplicated {
        input: Box<LazyPlan>,
        subset: Vec<String>,
    },
    Sort {
        input: Box<LazyPlan>,
        keys: Vec<SortKey>,
    },
    Join {
        left: Box<LazyPlan>,
        right: Box<LazyPlan>,
        left_on: Vec<String>,
        right_on: Vec<String>,
        how: JoinHow,
    },
    Aggregate {
        input: Box<LazyPlan>,
        group_by: Vec<String>,
        aggs: Vec<AggExpr>,
    },
    Pivot {
        input: Box<LazyPlan>,
        index: Vec<String>,
        columns: String,
        values: String,
        agg: AggFunc,
    },
    /// Vertical concatenation; columns missing from an input are null.
    Union { inputs: Vec<LazyPlan> },
}

impl LazyPlan {
    pub fn frame(frame: Arc<Frame>) -> Self {
        LazyPlan::Materialized(frame)
    }

    pub fn scan_csv(path: impl Into<PathBuf>, delimiter: u8, has_header: bool) -> Self {
        LazyPlan::CsvScan {
            path: path.into(),
            delimiter,
            has_header,
        }
    }

    pub fn filter(self, predicate: Predicate) -> Self {
        LazyPlan::Filter {
            input: Box::new(self),
            predicate,
        }
    }

    pub fn select(self, columns: Vec<String>) -> Self {
        LazyPlan::Project {
            input: Box::new(self),
            columns,
        }
    }

    pub fn drop_columns(self, columns: Vec<String>) -> Self {
        LazyPlan::Drop {
            input: Box::new(self),
            columns,
        }
    }

    pub fn rename(self, pairs: Vec<(String, String)>) -> Self {
        LazyPlan::Rename {
            input: Box::new(self),
            pairs,
        }
    }

    pub fn slice(self, offset: usize, len: usize) -> Self {
        LazyPlan::Slice {
            input: Box::new(self),
            offset,
            len,
        }
    }

    pub fn head(self, len: usize) -> Self {
        self.slice(0, len)
    }

    pub fn tail(self, len: usize) -> Self {
        LazyPlan::Tail {
            input: Box::new(self),
            len,
        }
    }

    pub fn exclude(self, offset: usize, len: usize) -> Self {
        LazyPlan::Exclude {
            input: Box::new(self),
            offset,
            len,
        }
    }

    pub fn drop_tail(self, len: usize) -> Self {
        LazyPlan::DropTail {
            input: Box::new(self),
            len,
        }
    }

    pub fn step(self, every: usize, offset: usize) -> Self {
        LazyPlan::Step {
            input: Box::new(self),
            every,
            offset,
        }
    }

    pub fn distinct(self, subset: Vec<String>) -> Self {
        LazyPlan::Distinct {
            input: Box::new(self),
            subset,
        }
    }

    pub fn duplicated(self, subset: Vec<String>) -> Self {
        LazyPlan::Duplicated {
            input: Box::new(self),
            subset,
        }
    }

    pub fn sort(self, keys: Vec<SortKey>) -> Self {
        LazyPlan::Sort {
            input: Box::new(self),
            keys,
        }
    }

    pub fn join(
        self,
        right: LazyPlan,
        left_on: Vec<String>,
        right_on: Vec<String>,
        how: JoinHow,
    ) -> Self {
        LazyPlan::Join {
            left: Box::new(self),
            right: Box::new(right),
            left_on,
            right_on,
            how,
        }
    }

    pub fn aggregate(self, group_by: Vec<String>, aggs: Vec<AggExpr>) -> Self {
        LazyPlan::Aggregate {
            input: Box::new(self),
            group_by,
            aggs,
        }
    }

    pub fn pivot(self, index: Vec<String>, columns: String, values: String, agg: AggFunc) -> Self {
        LazyPlan::Pivot {
            input: Box::new(self),
            index,
            columns,
            values,
            agg,
        }
    }

    pub fn union(inputs: Vec<LazyPlan>) -> Self {
        LazyPlan::Union { inputs }
    }

    /// Short operator name, for logs.
    pub fn operator(&self) -> &'static str {
        match self {
            LazyPlan::Materialized(_) => "materialized",
            LazyPlan::CsvScan { .. } => "csv_scan",
            LazyPlan::Filter { .. } => "filter",
            LazyPlan::Project { .. } => "project",
            LazyPlan::Drop { .. } => "drop",
            LazyPlan::Rename { .. } => "rename",
            LazyPlan::Slice { .. } => "slice",
            LazyPlan::Tail { .. } => "tail",
            LazyPlan::Exclude { .. } => "exclude",
            LazyPlan::DropTail { .. } => "drop_tail",
            LazyPlan::Step { .. } => "step",
            LazyPlan::Distinct { .. } => "distinct",
            LazyPlan::Duplicated { .. } => "duplicated",
            LazyPlan::Sort { .. } => "sort",
            LazyPlan::Join { .. } => "join",
            LazyPlan::Aggregate { .. } => "aggregate",
            LazyPlan::Pivot { .. } => "pivot",
            LazyPlan::Union { .. } => "union",
        }
    }
}

// ==================== Engine trait ====================

/// The dataframe kernel as seen by the pipeline.
///
/// Implementations must poll `interrupt` often enough that a cancelled
/// evaluation stops promptly, and return [`EngineError::Interrupted`] when it
/// fires. Nothing produced by an interrupted collect is cached.
#[cfg_attr(test, mockall::automock)]
pub trait DataEngine: Send + Sync {
    /// Engine name, for logs.
    fn name(&self) -> &'static str;

    /// Materialise `plan`, producing at most `limit` rows when given.
    fn collect(
        &self,
        plan: &LazyPlan,
        limit: Option<usize>,
        interrupt: &Interrupt,
    ) -> EngineResult<Frame>;

    /// Memory cost of a materialised frame, in bytes.
    fn estimate_size(&self, frame: &Frame) -> usize;
}
