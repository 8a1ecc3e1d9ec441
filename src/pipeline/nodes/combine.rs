//! Merge (join) and union nodes.

use super::TABLE_OUT;
use crate::engine::{JoinHow, LazyPlan};
use crate::pipeline::error::ExecutionResult;
use crate::pipeline::node::{BuildContext, Operation};
use crate::pipeline::node_type::{NodeDescriptor, NodeKind};
use crate::pipeline::param::{ParamDefault, ParamKind, ParamSpec};
use crate::pipeline::port::{SocketSpec, SocketType};

pub static MERGE: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::Merge,
    inputs: &[
        SocketSpec::input("left", SocketType::DataFrame),
        SocketSpec::input("right", SocketType::DataFrame),
    ],
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::required("left_on", ParamKind::TextList),
        ParamSpec::new("right_on", ParamKind::TextList, ParamDefault::EmptyList),
        ParamSpec::new(
            "how",
            ParamKind::Choice(JoinHow::NAMES),
            ParamDefault::Text("inner"),
        ),
    ],
    build: build_merge,
};

pub static UNION: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::Union,
    inputs: &[SocketSpec::multi("tables", SocketType::DataFrame, true)],
    outputs: TABLE_OUT,
    params: &[],
    build: build_union,
};

/// Joins `left` and `right`. An empty `right_on` reuses `left_on`.
fn build_merge(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let left_on = ctx.text_list("left_on")?;
    if left_on.is_empty() {
        return Err(ctx.invalid_param("left_on", "needs at least one key column"));
    }
    let mut right_on = ctx.text_list("right_on")?;
    if right_on.is_empty() {
        right_on = left_on.clone();
    }
    if right_on.len() != left_on.len() {
        return Err(ctx.invalid_param(
            "right_on",
            format!(
                "has {} key columns, left_on has {}",
                right_on.len(),
                left_on.len()
            ),
        ));
    }
    let how_name = ctx.text("how")?;
    let how = JoinHow::parse(how_name)
        .ok_or_else(|| ctx.invalid_param("how", format!("unknown join '{}'", how_name)))?;

    let plan = ctx.plan(0)?.join(ctx.plan(1)?, left_on, right_on, how);
    Ok(Operation::Plan(plan))
}

fn build_union(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let inputs = ctx
        .frames(0)?
        .into_iter()
        .map(LazyPlan::frame)
        .collect::<Vec<_>>();
    Ok(Operation::Plan(LazyPlan::union(inputs)))
}
