//! Filter node: keeps the rows whose column compares true against a value.
//!
//! `op` is one of `eq ne gt ge lt le contains`. Comparisons against a null
//! cell are false except `eq` with a null value (and its negation `ne`).
//! An unset `value` compares against null.

use super::{TABLE_IN, TABLE_OUT};
use crate::engine::{CompareOp, Predicate};
use crate::frame::Value;
use crate::pipeline::error::ExecutionResult;
use crate::pipeline::node::{BuildContext, Operation};
use crate::pipeline::node_type::{NodeDescriptor, NodeKind};
use crate::pipeline::param::{ParamDefault, ParamKind, ParamSpec, ParamValue};

pub static FILTER: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::Filter,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::required("column", ParamKind::Text),
        ParamSpec::new(
            "op",
            ParamKind::Choice(CompareOp::NAMES),
            ParamDefault::Text("eq"),
        ),
        ParamSpec::new("value", ParamKind::Scalar, ParamDefault::None),
    ],
    build: build_filter,
};

fn build_filter(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let column = ctx.non_empty_text("column")?;
    let op_name = ctx.text("op")?;
    let op = CompareOp::parse(op_name)
        .ok_or_else(|| ctx.invalid_param("op", format!("unknown operator '{}'", op_name)))?;
    let value = ctx
        .param("value")
        .and_then(ParamValue::to_value)
        .unwrap_or(Value::Null);

    let plan = ctx.plan(0)?.filter(Predicate::compare(column, op, value));
    Ok(Operation::Plan(plan))
}
