//! witt-pipeline - command line entry point
//!
//! Lists node kinds, shows the configuration, validates pipeline definitions
//! and evaluates a node of a saved pipeline.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use witt_pipeline::config::{config_path, format_size, PipelineConfig};
use witt_pipeline::pipeline::{
    param, registry, EvaluateOptions, Fingerprinter, NodeId, NodeOutcome, PipelineController,
    PipelineDefinition,
};

#[derive(Debug, Parser)]
#[command(name = "witt-pipeline", version, about = "Node-based dataframe pipelines")]
struct Cli {
    /// Configuration file (defaults to $WITT_PIPELINE_CONFIG, then the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write a daily rolling log file into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the available node kinds
    Kinds,
    /// Show the effective configuration
    Config {
        /// Write the defaults to the data directory
        #[arg(long)]
        init: bool,
    },
    /// Check that a pipeline definition loads
    Validate { file: PathBuf },
    /// Evaluate one node of a pipeline definition
    Run {
        file: PathBuf,
        /// Node to evaluate
        #[arg(long)]
        node: u32,
        /// Only materialise this many rows of the node
        #[arg(long)]
        preview: Option<usize>,
    },
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,witt_pipeline=debug"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "witt-pipeline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_dir.as_deref());
    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Kinds => list_kinds(),
        Command::Config { init } => show_config(&config, cli.config.as_deref(), init),
        Command::Validate { file } => validate(&config, &file),
        Command::Run {
            file,
            node,
            preview,
        } => run(config, &file, NodeId(node), preview),
    }
}

fn list_kinds() -> anyhow::Result<()> {
    for descriptor in registry().descriptors() {
        let inputs: Vec<&str> = descriptor.inputs.iter().map(|s| s.name).collect();
        let params: Vec<String> = descriptor
            .params
            .iter()
            .map(|p| if p.required { format!("{}*", p.name) } else { p.name.to_string() })
            .collect();
        println!(
            "{:<18} {:<10} in: [{}]  params: [{}]",
            descriptor.kind.id(),
            format!("{:?}", descriptor.kind.category()).to_lowercase(),
            inputs.join(", "),
            params.join(", ")
        );
    }
    Ok(())
}

fn show_config(config: &PipelineConfig, explicit: Option<&Path>, init: bool) -> anyhow::Result<()> {
    if init {
        let path = PipelineConfig::default().save_default()?;
        println!("wrote defaults to {}", path.display());
        return Ok(());
    }

    match config_path(explicit) {
        Some(path) if path.exists() => println!("# {}", path.display()),
        _ => println!("# defaults"),
    }
    println!(
        "# {} worker(s), cache budget {}",
        config.scheduler.worker_count(),
        format_size(config.cache.memory_budget_bytes)
    );
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn validate(config: &PipelineConfig, file: &Path) -> anyhow::Result<()> {
    let definition = PipelineDefinition::load(file)?;
    let graph = definition.to_graph(Fingerprinter::new(config.fingerprint.algorithm))?;

    let mut warnings = 0;
    for node in graph.nodes() {
        let descriptor = node.kind.descriptor();
        if let Some(name) = param::missing_required(descriptor.params, &node.params) {
            println!("warning: {} ({}) has no value for '{}'", node.id, node.kind.id(), name);
            warnings += 1;
        }
        for (spec, edges) in descriptor.inputs.iter().zip(graph.inputs_by_socket(node.id)) {
            if spec.required && edges.is_empty() {
                println!(
                    "warning: {} ({}) input '{}' is not connected",
                    node.id,
                    node.kind.id(),
                    spec.name
                );
                warnings += 1;
            }
        }
    }
    println!(
        "'{}': {} node(s), {} edge(s), {} warning(s)",
        definition.name,
        graph.node_count(),
        graph.edge_count(),
        warnings
    );
    Ok(())
}

fn run(config: PipelineConfig, file: &Path, node: NodeId, preview: Option<usize>) -> anyhow::Result<()> {
    let shown_rows = preview.unwrap_or(config.preview.rows);
    let mut controller = PipelineController::new(config);
    controller
        .open(file)
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let options = match preview {
        Some(rows) => EvaluateOptions::preview(rows),
        None => EvaluateOptions::full(),
    };
    let report = controller.run_with(node, options)?;

    for (id, outcome) in &report.outcomes {
        let kind = controller
            .graph()
            .node(*id)
            .map(|n| n.kind.id())
            .unwrap_or("?");
        let state = match outcome {
            NodeOutcome::Success(handle) if report.executed.contains(id) => {
                format!("ok, {} row(s)", handle.rows())
            }
            NodeOutcome::Success(handle) => format!("cached, {} row(s)", handle.rows()),
            NodeOutcome::Error(err) => format!("error: {}", err),
            NodeOutcome::Blocked { cause } => format!("blocked by {}", cause),
            NodeOutcome::Skipped => "skipped".to_string(),
        };
        println!("{:<14} {:<18} {}", id.to_string(), kind, state);
    }
    println!();

    match report.target_result() {
        Ok(handle) => {
            match (handle.frame(), handle.scalar()) {
                (Some(frame), _) => println!("{}", frame.to_table_string(shown_rows)),
                (None, Some(value)) => println!("{}", value),
                (None, None) => {}
            }
            Ok(())
        }
        Err(err) => bail!("Evaluation of {} failed: {}", node, err),
    }
}
