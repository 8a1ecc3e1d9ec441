//! Test data builders for pipelines, parameters and input files

use std::path::PathBuf;
use tempfile::TempDir;
use witt_pipeline::config::{PipelineConfig, SchedulerConfig};
use witt_pipeline::pipeline::{NodeId, NodeKind, ParamValue, Params, PipelineController};

/// Build a parameter map from pairs.
pub fn params(pairs: &[(&str, ParamValue)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn text_list(items: &[&str]) -> ParamValue {
    ParamValue::List(items.iter().map(|s| ParamValue::from(*s)).collect())
}

pub fn config(workers: usize) -> PipelineConfig {
    PipelineConfig {
        scheduler: SchedulerConfig { workers },
        ..PipelineConfig::default()
    }
}

/// Temporary directory holding CSV inputs.
pub struct CsvDir {
    dir: TempDir,
}

impl CsvDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write csv");
        path
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

pub const SALES_CSV: &str = "\
region,product,amount
north,apple,12
south,apple,4
north,pear,30
east,pear,18
south,plum,25
north,plum,7
";

/// `source.csv ─► filter(amount >= min) ─► aggregate(sum by region)`
pub struct SalesPipeline {
    pub csv: NodeId,
    pub filter: NodeId,
    pub aggregate: NodeId,
}

impl SalesPipeline {
    pub fn build(controller: &mut PipelineController, path: &std::path::Path, min: i64) -> Self {
        let csv = controller
            .add_node(
                NodeKind::SourceCsv,
                params(&[("path", ParamValue::from(path.to_string_lossy().to_string()))]),
            )
            .unwrap();
        let filter = controller
            .add_node(
                NodeKind::Filter,
                params(&[
                    ("column", "amount".into()),
                    ("op", "ge".into()),
                    ("value", min.into()),
                ]),
            )
            .unwrap();
        let aggregate = controller
            .add_node(
                NodeKind::Aggregate,
                params(&[
                    ("group_by", text_list(&["region"])),
                    ("aggregations", text_list(&["sum:amount:total", "count:*:orders"])),
                ]),
            )
            .unwrap();
        controller.connect(csv, "table", filter, "table").unwrap();
        controller
            .connect(filter, "table", aggregate, "table")
            .unwrap();
        Self {
            csv,
            filter,
            aggregate,
        }
    }
}

/// Literal table source with one integer column `n` holding `1..=rows`.
pub fn numbers(controller: &mut PipelineController, rows: i64) -> NodeId {
    controller
        .add_node(
            NodeKind::SourceTable,
            params(&[
                ("columns", text_list(&["n"])),
                (
                    "rows",
                    ParamValue::List((1..=rows).map(|i| ParamValue::List(vec![i.into()])).collect()),
                ),
            ]),
        )
        .unwrap()
}
