//! Node-based dataframe pipeline.
//!
//! Tables flow through typed nodes: Sources (CSV, literal tables, constants)
//! → Transforms (filters, row and column selection, merges, aggregations,
//! custom SQL and scripts) → Sinks (viewer). Nothing is computed on edit;
//! a node is evaluated on demand, together with the part of its upstream
//! whose results are not cached yet.
//!
//! # Architecture
//!
//! ```text
//! [source.csv] ──► [filter] ──► [aggregate] ──► [sink.viewer]
//!       │
//!       └────────► [rows.top_k]
//!
//! PipelineController ── edits ──► PipelineGraph (fingerprints, undo inverses)
//!        │
//!        └── evaluate ──► DependencyResolver ──► Scheduler ──► ResultCache
//!                                                   │
//!                                     DataEngine / ScriptSandbox
//! ```
//!
//! # Design
//!
//! - **Closed set of kinds** - `NodeKind` enum with a static descriptor table.
//! - **Arena graph** - nodes and edges in `Vec<Option<_>>` slots indexed by id.
//! - **Content fingerprints** - equal fingerprints share one cached result.
//! - **Command-pattern edits** - every edit returns its inverse for undo.
//! - **Snapshot readers** - evaluations run on `Arc<PipelineGraph>` snapshots.

pub mod bridge;
pub mod cache;
pub mod compiled_plan;
pub mod compiler;
pub mod controller;
pub mod definition;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod graph;
pub mod history;
pub mod id;
pub mod node;
pub mod node_type;
pub mod nodes;
pub mod param;
pub mod port;

pub use bridge::{EdgeSnapshot, EventBus, NodeSnapshot, NodeStatus, PipelineEvent, TopologySnapshot};
pub use cache::{CacheStats, Claim, ResultCache};
pub use compiled_plan::{ExecutionPlan, PlanStats, PlanStep};
pub use compiler::DependencyResolver;
pub use controller::{EvaluationHandle, PipelineController};
pub use definition::{EdgeDefinition, NodeDefinition, PipelineDefinition};
pub use error::{ExecutionError, ExecutionResult, GraphError, GraphResult};
pub use executor::{EvaluateOptions, EvaluationReport, NodeOutcome, Scheduler, WorkerPool};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use graph::{Change, ChangeRecord, Edge, EditOp, PipelineGraph};
pub use history::History;
pub use id::{EdgeId, EvaluationId, NodeId};
pub use node::{Node, NodeOutput, Position, ResultHandle};
pub use node_type::{registry, Category, NodeDescriptor, NodeKind};
pub use param::{ParamValue, Params};
pub use port::{Arity, SocketSpec, SocketType};
