//! Viewer sink. Passes its input through and is the usual evaluation
//! target of previews.

use super::{TABLE_IN, TABLE_OUT};
use crate::pipeline::error::ExecutionResult;
use crate::pipeline::node::{BuildContext, Operation};
use crate::pipeline::node_type::{NodeDescriptor, NodeKind};

pub static VIEWER: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::SinkViewer,
    inputs: TABLE_IN,
    outputs: TABLE_OUT,
    params: &[],
    build: build_viewer,
};

fn build_viewer(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    Ok(Operation::Plan(ctx.plan(0)?))
}
