//! # witt-pipeline: node-based dataframe pipelines
//!
//! A directed acyclic graph of typed nodes (sources, transforms, custom SQL
//! and script nodes, sinks) evaluated lazily and incrementally. Every node
//! carries a content fingerprint derived from its kind, parameters and
//! upstream fingerprints; results are cached by fingerprint, so an edit only
//! re-executes the nodes it actually affects.
//!
//! ## Architecture
//!
//! - **Pipeline**: graph, dependency resolver, scheduler, result cache and the
//!   controller that owns them ([`pipeline`])
//! - **Engine**: lazy plans materialised by a [`engine::DataEngine`]
//! - **Scripting**: Rhai sandbox for custom script nodes
//! - **Communication**: crossbeam channels between workers, the scheduler and
//!   event subscribers
//!
//! ## Configuration
//!
//! Runtime settings (worker count, cache budget, preview rows, undo depth,
//! fingerprint algorithm, script limits) are read from `pipeline.toml`; see
//! [`config`].
//!
//! ## Example
//!
//! ```no_run
//! use witt_pipeline::config::PipelineConfig;
//! use witt_pipeline::pipeline::{NodeKind, ParamValue, Params, PipelineController};
//!
//! let mut controller = PipelineController::new(PipelineConfig::load_or_default(None));
//!
//! let mut csv = Params::new();
//! csv.insert("path".into(), ParamValue::from("orders.csv"));
//! let source = controller.add_node(NodeKind::SourceCsv, csv).unwrap();
//! let viewer = controller.add_node(NodeKind::SinkViewer, Params::new()).unwrap();
//! controller.connect(source, "table", viewer, "table").unwrap();
//!
//! let preview = controller.preview(viewer).unwrap();
//! println!("{} rows", preview.rows());
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod scripting;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use engine::{DataEngine, MemoryEngine};
pub use error::{Result, WittError};
pub use frame::{Frame, Value};
pub use pipeline::{NodeId, NodeKind, PipelineController, PipelineDefinition};
pub use scripting::ScriptSandbox;
