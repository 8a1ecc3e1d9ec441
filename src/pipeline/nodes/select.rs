//! Column and row selection nodes.

use super::{TABLE_IN, TABLE_OUT};
use crate::engine::{Predicate, SortKey};
use crate::pipeline::error::ExecutionResult;
use crate::pipeline::node::{BuildContext, Operation};
use crate::pipeline::node_type::{NodeDescriptor, NodeKind};
use crate::pipeline::param::{ParamDefault, ParamKind, ParamSpec};
use crate::pipeline::port::{SocketSpec, SocketType};

const COUNT: ParamKind = ParamKind::Int {
    min: Some(0),
    max: None,
};

const COLUMNS: ParamSpec = ParamSpec::new("columns", ParamKind::TextList, ParamDefault::EmptyList);

/// Table plus an optional scalar overriding the `count` parameter.
const TABLE_AND_COUNT_IN: &[SocketSpec] = &[
    SocketSpec::input("table", SocketType::DataFrame),
    SocketSpec::optional("count", SocketType::Scalar),
];

pub static CHOOSE_COLUMNS: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::ColumnsChoose,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[COLUMNS],
    build: build_choose_columns,
};

pub static REMOVE_COLUMNS: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::ColumnsRemove,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[COLUMNS],
    build: build_remove_columns,
};

pub static FIRST_ROWS: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsFirst,
    inputs: TABLE_AND_COUNT_IN,
    outputs: TABLE_OUT,
    params: &[ParamSpec::new("count", COUNT, ParamDefault::Int(10))],
    build: build_first_rows,
};

pub static LAST_ROWS: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsLast,
    inputs: TABLE_AND_COUNT_IN,
    outputs: TABLE_OUT,
    params: &[ParamSpec::new("count", COUNT, ParamDefault::Int(10))],
    build: build_last_rows,
};

pub static REMOVE_FIRST_ROWS: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsRemoveFirst,
    inputs: TABLE_AND_COUNT_IN,
    outputs: TABLE_OUT,
    params: &[ParamSpec::new("count", COUNT, ParamDefault::Int(1))],
    build: build_remove_first_rows,
};

pub static REMOVE_LAST_ROWS: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsRemoveLast,
    inputs: TABLE_AND_COUNT_IN,
    outputs: TABLE_OUT,
    params: &[ParamSpec::new("count", COUNT, ParamDefault::Int(1))],
    build: build_remove_last_rows,
};

pub static ROW_RANGE: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsRange,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::new("start", COUNT, ParamDefault::Int(0)),
        ParamSpec::new("length", COUNT, ParamDefault::Int(10)),
    ],
    build: build_row_range,
};

pub static REMOVE_ROW_RANGE: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsRemoveRange,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::new("start", COUNT, ParamDefault::Int(0)),
        ParamSpec::new("length", COUNT, ParamDefault::Int(1)),
    ],
    build: build_remove_row_range,
};

pub static EVERY_NTH: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsEveryNth,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::new(
            "step",
            ParamKind::Int {
                min: Some(1),
                max: None,
            },
            ParamDefault::Int(2),
        ),
        ParamSpec::new("offset", COUNT, ParamDefault::Int(0)),
    ],
    build: build_every_nth,
};

pub static TOP_K: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsTopK,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::required("column", ParamKind::Text),
        ParamSpec::new("count", COUNT, ParamDefault::Int(10)),
    ],
    build: build_top_k,
};

pub static BOTTOM_K: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsBottomK,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::required("column", ParamKind::Text),
        ParamSpec::new("count", COUNT, ParamDefault::Int(10)),
    ],
    build: build_bottom_k,
};

pub static DISTINCT: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsDistinct,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[COLUMNS],
    build: build_distinct,
};

pub static KEEP_DUPLICATES: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::RowsKeepDuplicates,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[COLUMNS],
    build: build_keep_duplicates,
};

fn build_choose_columns(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let columns = ctx.text_list("columns")?;
    Ok(Operation::Plan(ctx.plan(0)?.select(columns)))
}

fn build_remove_columns(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let columns = ctx.text_list("columns")?;
    Ok(Operation::Plan(ctx.plan(0)?.drop_columns(columns)))
}

/// Row count from the connected scalar, or the `count` parameter.
fn row_count(ctx: &BuildContext<'_>) -> ExecutionResult<usize> {
    match ctx.scalar(1) {
        Some(value) => value
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                ctx.invalid_param(
                    "count",
                    format!("connected value {} is not a non-negative integer", value),
                )
            }),
        None => ctx.count("count"),
    }
}

fn build_first_rows(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let count = row_count(ctx)?;
    Ok(Operation::Plan(ctx.plan(0)?.head(count)))
}

fn build_last_rows(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let count = row_count(ctx)?;
    Ok(Operation::Plan(ctx.plan(0)?.tail(count)))
}

fn build_remove_first_rows(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let count = row_count(ctx)?;
    Ok(Operation::Plan(ctx.plan(0)?.exclude(0, count)))
}

fn build_remove_last_rows(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let count = row_count(ctx)?;
    Ok(Operation::Plan(ctx.plan(0)?.drop_tail(count)))
}

fn build_row_range(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let start = ctx.count("start")?;
    let length = ctx.count("length")?;
    Ok(Operation::Plan(ctx.plan(0)?.slice(start, length)))
}

fn build_remove_row_range(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let start = ctx.count("start")?;
    let length = ctx.count("length")?;
    Ok(Operation::Plan(ctx.plan(0)?.exclude(start, length)))
}

fn build_every_nth(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let step = ctx.count("step")?.max(1);
    let offset = ctx.count("offset")?;
    Ok(Operation::Plan(ctx.plan(0)?.step(step, offset)))
}

/// Rows with a non-null `column`, sorted, truncated to `count`.
fn ranked(ctx: &BuildContext<'_>, descending: bool) -> ExecutionResult<Operation> {
    let column = ctx.non_empty_text("column")?;
    let count = ctx.count("count")?;
    let plan = ctx
        .plan(0)?
        .filter(Predicate::Not(Box::new(Predicate::IsNull(column.to_string()))))
        .sort(vec![SortKey::new(column, descending)])
        .head(count);
    Ok(Operation::Plan(plan))
}

fn build_top_k(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    ranked(ctx, true)
}

fn build_bottom_k(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    ranked(ctx, false)
}

fn build_distinct(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let columns = ctx.text_list("columns")?;
    Ok(Operation::Plan(ctx.plan(0)?.distinct(columns)))
}

fn build_keep_duplicates(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let columns = ctx.text_list("columns")?;
    Ok(Operation::Plan(ctx.plan(0)?.duplicated(columns)))
}
