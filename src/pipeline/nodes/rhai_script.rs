//! Custom script node. Runs a user-provided Rhai script over its inputs.
//!
//! The builder only collects the script source, the connected tables and the
//! node parameters; compilation and execution happen in the
//! [`ScriptSandbox`](crate::scripting::ScriptSandbox) on a worker, so that
//! long scripts honour cancellation and their failures (panics included)
//! are reported against this node.
//!
//! ## Example Scripts
//!
//! Passthrough (no modification):
//! ```rhai
//! df
//! ```
//!
//! Stack every input:
//! ```rhai
//! let out = [];
//! for table in inputs { out += table; }
//! out
//! ```
//!
//! Keep large amounts:
//! ```rhai
//! df.filter(|row| row.amount > 100)
//! ```

use super::{TABLES_IN, TABLE_OUT};
use crate::pipeline::error::ExecutionResult;
use crate::pipeline::node::{BuildContext, Operation};
use crate::pipeline::node_type::{NodeDescriptor, NodeKind};
use crate::pipeline::param::{ParamDefault, ParamKind, ParamSpec};
use crate::scripting::builtins;

pub static SCRIPT: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::CustomScript,
    inputs: TABLES_IN,
    outputs: TABLE_OUT,
    params: &[ParamSpec::new(
        "source",
        ParamKind::Text,
        ParamDefault::Text(builtins::PASSTHROUGH),
    )],
    build: build_script,
};

fn build_script(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let source = ctx.non_empty_text("source")?;
    Ok(Operation::Script {
        source: source.to_string(),
        inputs: ctx.frames(0)?,
        params: ctx.params.clone(),
    })
}
