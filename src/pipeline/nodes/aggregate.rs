//! Group-by aggregation and pivot nodes.
//!
//! Aggregations are written `func:column[:alias]`, e.g. `sum:amount:total`
//! or `count:*`. Without an alias the output column is `column_func`.

use super::{TABLE_IN, TABLE_OUT};
use crate::engine::{AggExpr, AggFunc};
use crate::pipeline::error::ExecutionResult;
use crate::pipeline::node::{BuildContext, Operation};
use crate::pipeline::node_type::{NodeDescriptor, NodeKind};
use crate::pipeline::param::{ParamDefault, ParamKind, ParamSpec};

pub static AGGREGATE: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::Aggregate,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::new("group_by", ParamKind::TextList, ParamDefault::EmptyList),
        ParamSpec::new("aggregations", ParamKind::TextList, ParamDefault::EmptyList),
    ],
    build: build_aggregate,
};

pub static PIVOT: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::Pivot,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::required("index", ParamKind::TextList),
        ParamSpec::required("columns", ParamKind::Text),
        ParamSpec::required("values", ParamKind::Text),
        ParamSpec::new(
            "agg",
            ParamKind::Choice(AggFunc::NAMES),
            ParamDefault::Text("sum"),
        ),
    ],
    build: build_pivot,
};

fn build_aggregate(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let group_by = ctx.text_list("group_by")?;
    let aggs = ctx
        .text_list("aggregations")?
        .iter()
        .map(|spec| AggExpr::parse(spec).map_err(|e| ctx.invalid_param("aggregations", e)))
        .collect::<ExecutionResult<Vec<_>>>()?;
    if group_by.is_empty() && aggs.is_empty() {
        return Err(ctx.invalid_param(
            "aggregations",
            "needs at least one aggregation or group column",
        ));
    }
    Ok(Operation::Plan(ctx.plan(0)?.aggregate(group_by, aggs)))
}

fn build_pivot(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let index = ctx.text_list("index")?;
    let columns = ctx.non_empty_text("columns")?;
    let values = ctx.non_empty_text("values")?;
    let agg_name = ctx.text("agg")?;
    let agg = AggFunc::parse(agg_name)
        .ok_or_else(|| ctx.invalid_param("agg", format!("unknown function '{}'", agg_name)))?;
    let plan = ctx
        .plan(0)?
        .pivot(index, columns.to_string(), values.to_string(), agg);
    Ok(Operation::Plan(plan))
}
