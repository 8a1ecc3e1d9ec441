//! Custom SQL node.
//!
//! The query is compiled against the connected tables (`input0`, `input1`,
//! ... in edge order, `df` for the first) when the node is built. Parse and
//! resolution errors are reported as user code failures of this node.

use super::{TABLES_IN, TABLE_OUT};
use crate::engine::{sql, LazyPlan};
use crate::pipeline::error::{ExecutionError, ExecutionResult};
use crate::pipeline::node::{BuildContext, Operation};
use crate::pipeline::node_type::{NodeDescriptor, NodeKind};
use crate::pipeline::param::{ParamDefault, ParamKind, ParamSpec};

pub static SQL: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::CustomSql,
    inputs: TABLES_IN,
    outputs: TABLE_OUT,
    params: &[ParamSpec::new(
        "query",
        ParamKind::Text,
        ParamDefault::Text("SELECT * FROM df"),
    )],
    build: build_sql,
};

fn build_sql(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let query = ctx.non_empty_text("query")?;
    let inputs: Vec<LazyPlan> = ctx.frames(0)?.into_iter().map(LazyPlan::frame).collect();
    let plan = sql::compile(query, &inputs).map_err(|e| ExecutionError::UserCodeFailure {
        node: ctx.node,
        message: e.to_string(),
    })?;
    Ok(Operation::Plan(plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Value;
    use crate::pipeline::node::NodeOutput;
    use crate::pipeline::nodes::test_support::{build, frame, run};

    #[test]
    fn test_query_over_two_inputs() {
        let a = frame(&["x"], vec![vec![1i64.into()], vec![5i64.into()]]);
        let b = frame(&["y"], vec![vec![7i64.into()], vec![8i64.into()], vec![9i64.into()]]);
        let inputs = vec![vec![NodeOutput::Frame(a), NodeOutput::Frame(b)]];

        let out = run(
            NodeKind::CustomSql,
            &[("query", "SELECT y FROM input1 WHERE y > 7 ORDER BY y DESC".into())],
            inputs,
        );
        assert_eq!(out.column("y").unwrap().values, vec![Value::Int(9), Value::Int(8)]);
    }

    #[test]
    fn test_syntax_error_is_user_code_failure() {
        let a = frame(&["x"], vec![]);
        let err = build(
            NodeKind::CustomSql,
            &[("query", "SELEKT x FROM df".into())],
            vec![vec![NodeOutput::Frame(a)]],
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::UserCodeFailure { .. }));
    }

    #[test]
    fn test_unknown_table() {
        let err = build(
            NodeKind::CustomSql,
            &[("query", "SELECT * FROM input3".into())],
            vec![vec![]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("input3"));
    }
}
