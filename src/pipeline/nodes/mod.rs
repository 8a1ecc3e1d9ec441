//! Built-in node kinds.
//!
//! Each module declares the static descriptors of a family of kinds and the
//! builders that turn a node into an [`Operation`](crate::pipeline::node::Operation).

pub mod aggregate;
pub mod combine;
pub mod filter;
pub mod rhai_script;
pub mod select;
pub mod source;
pub mod sql;
pub mod viewer;

use super::node_type::{NodeDescriptor, NodeKind};
use super::port::{SocketSpec, SocketType};

/// Single required table input.
pub(crate) const TABLE_IN: &[SocketSpec] = &[SocketSpec::input("table", SocketType::DataFrame)];

/// Any number of table inputs, in edge order.
pub(crate) const TABLES_IN: &[SocketSpec] =
    &[SocketSpec::multi("tables", SocketType::DataFrame, false)];

pub(crate) const TABLE_OUT: &[SocketSpec] = &[SocketSpec::output("table", SocketType::DataFrame)];

pub(crate) const VALUE_OUT: &[SocketSpec] = &[SocketSpec::output("value", SocketType::Scalar)];

/// Static descriptor of a built-in kind.
pub fn descriptor(kind: NodeKind) -> &'static NodeDescriptor {
    match kind {
        NodeKind::SourceCsv => &source::CSV,
        NodeKind::SourceTable => &source::TABLE,
        NodeKind::ConstantBoolean => &source::BOOLEAN,
        NodeKind::ConstantInteger => &source::INTEGER,
        NodeKind::ConstantDecimal => &source::DECIMAL,
        NodeKind::ConstantText => &source::TEXT,
        NodeKind::Filter => &filter::FILTER,
        NodeKind::ColumnsChoose => &select::CHOOSE_COLUMNS,
        NodeKind::ColumnsRemove => &select::REMOVE_COLUMNS,
        NodeKind::RowsFirst => &select::FIRST_ROWS,
        NodeKind::RowsLast => &select::LAST_ROWS,
        NodeKind::RowsRemoveFirst => &select::REMOVE_FIRST_ROWS,
        NodeKind::RowsRemoveLast => &select::REMOVE_LAST_ROWS,
        NodeKind::RowsRange => &select::ROW_RANGE,
        NodeKind::RowsRemoveRange => &select::REMOVE_ROW_RANGE,
        NodeKind::RowsEveryNth => &select::EVERY_NTH,
        NodeKind::RowsTopK => &select::TOP_K,
        NodeKind::RowsBottomK => &select::BOTTOM_K,
        NodeKind::RowsDistinct => &select::DISTINCT,
        NodeKind::RowsKeepDuplicates => &select::KEEP_DUPLICATES,
        NodeKind::Merge => &combine::MERGE,
        NodeKind::Union => &combine::UNION,
        NodeKind::Aggregate => &aggregate::AGGREGATE,
        NodeKind::Pivot => &aggregate::PIVOT,
        NodeKind::CustomSql => &sql::SQL,
        NodeKind::CustomScript => &rhai_script::SCRIPT,
        NodeKind::SinkViewer => &viewer::VIEWER,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::frame::{Frame, Value};
    use crate::pipeline::error::ExecutionResult;
    use crate::pipeline::id::NodeId;
    use crate::pipeline::node::{BuildContext, NodeOutput, Operation};
    use crate::pipeline::node_type::NodeKind;
    use crate::pipeline::param::{self, ParamValue, Params};
    use std::sync::Arc;

    pub fn frame(names: &[&str], rows: Vec<Vec<Value>>) -> Arc<Frame> {
        Arc::new(Frame::from_rows(names, rows).unwrap())
    }

    /// Build `kind` with its defaults overridden by `updates`.
    pub fn build(
        kind: NodeKind,
        updates: &[(&str, ParamValue)],
        inputs: Vec<Vec<NodeOutput>>,
    ) -> ExecutionResult<Operation> {
        let descriptor = kind.descriptor();
        let updates: Params = updates
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let params = param::merge(descriptor.params, &param::defaults(descriptor.params), &updates)
            .unwrap();
        let ctx = BuildContext {
            node: NodeId(1),
            kind,
            params: &params,
            inputs: &inputs,
        };
        (descriptor.build)(&ctx)
    }

    /// Build and collect with the in-memory engine.
    pub fn run(
        kind: NodeKind,
        updates: &[(&str, ParamValue)],
        inputs: Vec<Vec<NodeOutput>>,
    ) -> Frame {
        use crate::engine::{DataEngine, Interrupt, MemoryEngine};
        match build(kind, updates, inputs).unwrap() {
            Operation::Plan(plan) => MemoryEngine::new()
                .collect(&plan, None, &Interrupt::new())
                .unwrap(),
            other => panic!("expected a plan, got {:?}", other),
        }
    }

    pub fn table(frame: Arc<Frame>) -> Vec<NodeOutput> {
        vec![NodeOutput::Frame(frame)]
    }
}
