//! Rhai sandbox for custom script nodes
//!
//! A custom script node runs a Rhai script over its input tables and must
//! produce exactly one table. The script only sees what the node declares:
//!
//! - `df` - rows of the first input, as an array of maps (`[#{a: 1, b: "x"}, ...]`)
//! - `inputs` - every input in socket order, each as an array of row maps
//! - `params` - the node parameters as a map
//!
//! The value of the last expression is the result. It must be either
//!
//! - an array of row maps, or
//! - a map of column name to array of cells (all the same length).
//!
//! Cells may be `()` (null), booleans, integers, floats or strings. Columns
//! that exist in the first input keep their order; new columns follow in name
//! order.
//!
//! ## Helper Functions
//!
//! - `column(rows, name)` - Array of the cells of one column
//! - `columns(rows)` - Column names of a row array (from its first row)
//! - `abs`, `sqrt`, `pow`, `ln`, `log10`, `exp` - Floating point math
//! - `floor`, `ceil`, `round`, `clamp(x, min, max)`, `lerp(a, b, t)`
//! - `is_null(x)` - True for `()`
//!
//! Every run is bounded by the limits in
//! [`ScriptLimits`](crate::config::ScriptLimits) and stops as soon as the
//! evaluation is cancelled.
//!
//! ## Example Scripts
//!
//! Keeping expensive orders and adding a column:
//! ```rhai
//! df.filter(|row| row.amount > params.threshold)
//!   .map(|row| { row.vat = row.amount * 0.2; row })
//! ```
//!
//! Building a table column by column:
//! ```rhai
//! #{
//!     name: column(df, "name"),
//!     doubled: column(df, "value").map(|v| v * 2),
//! }
//! ```

mod engine;

pub use engine::ScriptSandbox;

use rhai::{Engine, AST};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors raised by the script sandbox
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Compilation error: {0}")]
    Compile(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Invalid script result: {0}")]
    InvalidResult(String),

    #[error("Script interrupted")]
    Interrupted,
}

/// A compiled script that can be executed repeatedly
#[derive(Clone)]
pub struct CompiledScript {
    ast: Arc<AST>,
    source: String,
}

impl CompiledScript {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("source", &self.source)
            .finish()
    }
}

/// Cache of compiled scripts keyed by source text
#[derive(Default)]
pub struct ScriptCache {
    cache: HashMap<String, CompiledScript>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached script or compile and cache it
    pub fn get_or_compile(
        &mut self,
        engine: &Engine,
        source: &str,
    ) -> Result<CompiledScript, ScriptError> {
        if let Some(script) = self.cache.get(source) {
            return Ok(script.clone());
        }

        let ast = engine
            .compile(source)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;

        let script = CompiledScript {
            ast: Arc::new(ast),
            source: source.to_string(),
        };

        self.cache.insert(source.to_string(), script.clone());
        Ok(script)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Thread-safe script cache wrapper
pub type SharedScriptCache = Arc<RwLock<ScriptCache>>;

/// Ready-made scripts
pub mod builtins {
    /// Returns the first input unchanged
    pub const PASSTHROUGH: &str = "df";

    /// Concatenates every input
    pub const CONCAT_INPUTS: &str = r#"
let out = [];
for table in inputs {
    out += table;
}
out
"#;

    /// Row numbers as a one-column table
    pub const ROW_NUMBERS: &str = r#"
let n = [];
for i in 0..df.len() {
    n.push(i);
}
#{ row: n }
"#;
}
