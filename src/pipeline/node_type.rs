//! Node kinds and the registry of their descriptors.
//!
//! The set of kinds is closed: [`NodeKind`] has one variant per kind, and
//! every kind has a static [`NodeDescriptor`] (sockets, parameter schema and
//! the builder that turns a node into an [`Operation`]). The [`NodeRegistry`]
//! is the lookup table from the stable string id used in pipeline
//! definitions to that descriptor.

use super::error::ExecutionResult;
use super::node::{BuildContext, Operation};
use super::nodes;
use super::param::ParamSpec;
use super::port::SocketSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Types of nodes that can be placed in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    // Sources
    #[serde(rename = "source.csv")]
    SourceCsv,
    #[serde(rename = "source.table")]
    SourceTable,

    // Constants
    #[serde(rename = "constant.boolean")]
    ConstantBoolean,
    #[serde(rename = "constant.integer")]
    ConstantInteger,
    #[serde(rename = "constant.decimal")]
    ConstantDecimal,
    #[serde(rename = "constant.text")]
    ConstantText,

    // Transforms
    #[serde(rename = "filter")]
    Filter,
    #[serde(rename = "columns.choose")]
    ColumnsChoose,
    #[serde(rename = "columns.remove")]
    ColumnsRemove,
    #[serde(rename = "rows.first")]
    RowsFirst,
    #[serde(rename = "rows.last")]
    RowsLast,
    #[serde(rename = "rows.remove_first")]
    RowsRemoveFirst,
    #[serde(rename = "rows.remove_last")]
    RowsRemoveLast,
    #[serde(rename = "rows.range")]
    RowsRange,
    #[serde(rename = "rows.remove_range")]
    RowsRemoveRange,
    #[serde(rename = "rows.every_nth")]
    RowsEveryNth,
    #[serde(rename = "rows.top_k")]
    RowsTopK,
    #[serde(rename = "rows.bottom_k")]
    RowsBottomK,
    #[serde(rename = "rows.distinct")]
    RowsDistinct,
    #[serde(rename = "rows.keep_duplicates")]
    RowsKeepDuplicates,

    // Combine
    #[serde(rename = "merge")]
    Merge,
    #[serde(rename = "union")]
    Union,

    // Aggregate
    #[serde(rename = "aggregate")]
    Aggregate,
    #[serde(rename = "pivot")]
    Pivot,

    // Custom user code
    #[serde(rename = "custom.sql")]
    CustomSql,
    #[serde(rename = "custom.script")]
    CustomScript,

    // Sinks
    #[serde(rename = "sink.viewer")]
    SinkViewer,
}

/// Palette grouping of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Source,
    Constant,
    Transform,
    Combine,
    Aggregate,
    Custom,
    Sink,
}

impl NodeKind {
    /// Get all available node kinds.
    pub fn all() -> &'static [NodeKind] {
        &[
            NodeKind::SourceCsv,
            NodeKind::SourceTable,
            NodeKind::ConstantBoolean,
            NodeKind::ConstantInteger,
            NodeKind::ConstantDecimal,
            NodeKind::ConstantText,
            NodeKind::Filter,
            NodeKind::ColumnsChoose,
            NodeKind::ColumnsRemove,
            NodeKind::RowsFirst,
            NodeKind::RowsLast,
            NodeKind::RowsRemoveFirst,
            NodeKind::RowsRemoveLast,
            NodeKind::RowsRange,
            NodeKind::RowsRemoveRange,
            NodeKind::RowsEveryNth,
            NodeKind::RowsTopK,
            NodeKind::RowsBottomK,
            NodeKind::RowsDistinct,
            NodeKind::RowsKeepDuplicates,
            NodeKind::Merge,
            NodeKind::Union,
            NodeKind::Aggregate,
            NodeKind::Pivot,
            NodeKind::CustomSql,
            NodeKind::CustomScript,
            NodeKind::SinkViewer,
        ]
    }

    /// Stable string id, as persisted in pipeline definitions.
    pub fn id(&self) -> &'static str {
        match self {
            NodeKind::SourceCsv => "source.csv",
            NodeKind::SourceTable => "source.table",
            NodeKind::ConstantBoolean => "constant.boolean",
            NodeKind::ConstantInteger => "constant.integer",
            NodeKind::ConstantDecimal => "constant.decimal",
            NodeKind::ConstantText => "constant.text",
            NodeKind::Filter => "filter",
            NodeKind::ColumnsChoose => "columns.choose",
            NodeKind::ColumnsRemove => "columns.remove",
            NodeKind::RowsFirst => "rows.first",
            NodeKind::RowsLast => "rows.last",
            NodeKind::RowsRemoveFirst => "rows.remove_first",
            NodeKind::RowsRemoveLast => "rows.remove_last",
            NodeKind::RowsRange => "rows.range",
            NodeKind::RowsRemoveRange => "rows.remove_range",
            NodeKind::RowsEveryNth => "rows.every_nth",
            NodeKind::RowsTopK => "rows.top_k",
            NodeKind::RowsBottomK => "rows.bottom_k",
            NodeKind::RowsDistinct => "rows.distinct",
            NodeKind::RowsKeepDuplicates => "rows.keep_duplicates",
            NodeKind::Merge => "merge",
            NodeKind::Union => "union",
            NodeKind::Aggregate => "aggregate",
            NodeKind::Pivot => "pivot",
            NodeKind::CustomSql => "custom.sql",
            NodeKind::CustomScript => "custom.script",
            NodeKind::SinkViewer => "sink.viewer",
        }
    }

    /// Get the display name for this node kind.
    pub fn display_name(&self) -> &'static str {
        match self {
            NodeKind::SourceCsv => "Read CSV",
            NodeKind::SourceTable => "Table",
            NodeKind::ConstantBoolean => "Boolean",
            NodeKind::ConstantInteger => "Integer",
            NodeKind::ConstantDecimal => "Decimal",
            NodeKind::ConstantText => "Text",
            NodeKind::Filter => "Filter Rows",
            NodeKind::ColumnsChoose => "Choose Columns",
            NodeKind::ColumnsRemove => "Remove Columns",
            NodeKind::RowsFirst => "Keep First Rows",
            NodeKind::RowsLast => "Keep Last Rows",
            NodeKind::RowsRemoveFirst => "Remove First Rows",
            NodeKind::RowsRemoveLast => "Remove Last Rows",
            NodeKind::RowsRange => "Keep Row Range",
            NodeKind::RowsRemoveRange => "Remove Row Range",
            NodeKind::RowsEveryNth => "Keep Every Nth Row",
            NodeKind::RowsTopK => "Keep Top K",
            NodeKind::RowsBottomK => "Keep Bottom K",
            NodeKind::RowsDistinct => "Remove Duplicate Rows",
            NodeKind::RowsKeepDuplicates => "Keep Duplicate Rows",
            NodeKind::Merge => "Merge",
            NodeKind::Union => "Union",
            NodeKind::Aggregate => "Group & Aggregate",
            NodeKind::Pivot => "Pivot",
            NodeKind::CustomSql => "SQL Query",
            NodeKind::CustomScript => "Script",
            NodeKind::SinkViewer => "Viewer",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            NodeKind::SourceCsv | NodeKind::SourceTable => Category::Source,
            NodeKind::ConstantBoolean
            | NodeKind::ConstantInteger
            | NodeKind::ConstantDecimal
            | NodeKind::ConstantText => Category::Constant,
            NodeKind::Merge | NodeKind::Union => Category::Combine,
            NodeKind::Aggregate | NodeKind::Pivot => Category::Aggregate,
            NodeKind::CustomSql | NodeKind::CustomScript => Category::Custom,
            NodeKind::SinkViewer => Category::Sink,
            _ => Category::Transform,
        }
    }

    /// Look up a kind by its string id.
    pub fn from_id(id: &str) -> Option<NodeKind> {
        registry().lookup(id).map(|d| d.kind)
    }

    /// Check if this kind runs user-written code.
    pub fn is_custom(&self) -> bool {
        self.category() == Category::Custom
    }

    /// Check if this node kind is a sink node.
    pub fn is_sink(&self) -> bool {
        self.category() == Category::Sink
    }

    /// Static descriptor of this kind.
    pub fn descriptor(&self) -> &'static NodeDescriptor {
        nodes::descriptor(*self)
    }

    /// Get a detailed description of what this node does.
    pub fn description(&self) -> &'static str {
        match self {
            NodeKind::SourceCsv => "Reads a delimited text file.\n\
                 Column types are inferred from the cells.",
            NodeKind::SourceTable => "A small literal table.\n\
                 Columns and rows are edited as parameters.",
            NodeKind::ConstantBoolean
            | NodeKind::ConstantInteger
            | NodeKind::ConstantDecimal
            | NodeKind::ConstantText => "A single value.\n\
                 Feeds scalar inputs such as row counts.",
            NodeKind::Filter => "Keeps rows whose column compares true\n\
                 against a value (eq, ne, gt, ge, lt, le, contains).",
            NodeKind::ColumnsChoose => "Keeps only the listed columns, in list order.",
            NodeKind::ColumnsRemove => "Drops the listed columns.",
            NodeKind::RowsFirst => "Keeps the first N rows.\n\
                 N can come from a connected scalar.",
            NodeKind::RowsLast => "Keeps the last N rows.\n\
                 N can come from a connected scalar.",
            NodeKind::RowsRemoveFirst => "Drops the first N rows.\n\
                 N can come from a connected scalar.",
            NodeKind::RowsRemoveLast => "Drops the last N rows.\n\
                 N can come from a connected scalar.",
            NodeKind::RowsRange => "Keeps `length` rows starting at `start`.",
            NodeKind::RowsRemoveRange => "Drops `length` rows starting at `start`.",
            NodeKind::RowsEveryNth => "Keeps every `step`-th row from `offset`.",
            NodeKind::RowsTopK => "Keeps the K rows with the largest values\n\
                 in a column, largest first.",
            NodeKind::RowsBottomK => "Keeps the K rows with the smallest values\n\
                 in a column, smallest first.",
            NodeKind::RowsDistinct => "Removes duplicate rows, keeping the first.\n\
                 Compares the listed columns, or all columns.",
            NodeKind::RowsKeepDuplicates => "Keeps every row whose key occurs more than once.\n\
                 Compares the listed columns, or all columns.",
            NodeKind::Merge => "Joins two tables on key columns\n\
                 (inner, left or outer).",
            NodeKind::Union => "Stacks any number of tables.\n\
                 Missing columns are filled with nulls.",
            NodeKind::Aggregate => "Groups rows and computes aggregates\n\
                 (count, sum, mean, min, max, first, last, n_unique).",
            NodeKind::Pivot => "Spreads the values of one column into\n\
                 new columns, aggregating a value column.",
            NodeKind::CustomSql => "Runs a SELECT query over the inputs\n\
                 (input0, input1, ... or df).",
            NodeKind::CustomScript => "Runs a Rhai script over the inputs.\n\
                 Returns rows or columns.",
            NodeKind::SinkViewer => "Shows its input.\n\
                 Evaluation target for previews.",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Builds the operation of one node from its resolved inputs and parameters.
pub type BuildFn = fn(&BuildContext<'_>) -> ExecutionResult<Operation>;

/// Static description of a node kind.
pub struct NodeDescriptor {
    pub kind: NodeKind,
    pub inputs: &'static [SocketSpec],
    pub outputs: &'static [SocketSpec],
    pub params: &'static [ParamSpec],
    pub build: BuildFn,
}

impl std::fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("params", &self.params)
            .finish()
    }
}

impl NodeDescriptor {
    pub fn input(&self, name: &str) -> Option<(usize, &'static SocketSpec)> {
        self.inputs.iter().enumerate().find(|(_, s)| s.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&'static SocketSpec> {
        self.outputs.iter().find(|s| s.name == name)
    }

    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Lookup table from kind id to descriptor.
#[derive(Debug)]
pub struct NodeRegistry {
    entries: BTreeMap<&'static str, &'static NodeDescriptor>,
}

impl NodeRegistry {
    fn builtin() -> Self {
        let entries = NodeKind::all()
            .iter()
            .map(|kind| (kind.id(), nodes::descriptor(*kind)))
            .collect();
        Self { entries }
    }

    pub fn lookup(&self, id: &str) -> Option<&'static NodeDescriptor> {
        self.entries.get(id).copied()
    }

    /// Descriptors ordered by id.
    pub fn descriptors(&self) -> impl Iterator<Item = &'static NodeDescriptor> + '_ {
        self.entries.values().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The registry of built-in node kinds.
pub fn registry() -> &'static NodeRegistry {
    static REGISTRY: OnceLock<NodeRegistry> = OnceLock::new();
    REGISTRY.get_or_init(NodeRegistry::builtin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::param::defaults;

    #[test]
    fn test_ids_round_trip() {
        for kind in NodeKind::all() {
            assert_eq!(NodeKind::from_id(kind.id()), Some(*kind));
            assert_eq!(kind.descriptor().kind, *kind);
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.id()));
        }
        assert_eq!(registry().len(), NodeKind::all().len());
        assert_eq!(NodeKind::from_id("signal.source"), None);
    }

    #[test]
    fn test_every_kind_has_one_output() {
        for kind in NodeKind::all() {
            assert_eq!(kind.descriptor().outputs.len(), 1, "{}", kind.id());
        }
    }

    #[test]
    fn test_defaults_validate_against_schema() {
        for kind in NodeKind::all() {
            let schema = kind.descriptor().params;
            for (name, value) in defaults(schema) {
                let spec = kind.descriptor().param(&name).unwrap();
                assert_eq!(spec.validate(&value).as_ref(), Ok(&value), "{}.{}", kind.id(), name);
            }
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(NodeKind::SourceCsv.category(), Category::Source);
        assert!(NodeKind::CustomScript.is_custom());
        assert!(NodeKind::SinkViewer.is_sink());
        assert_eq!(NodeKind::RowsTopK.category(), Category::Transform);
    }
}
