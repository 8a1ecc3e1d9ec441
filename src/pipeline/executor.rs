//! Execution scheduler: evaluates the ancestors of a target over a worker pool.
//!
//! One evaluation is driven by a single coordinator (the calling thread):
//!
//! ```text
//!   plan (topological, ancestors of target)
//!      │
//!      ▼
//!  ┌─────────────┐  claim   ┌─────────────┐
//!  │ coordinator │─────────►│ ResultCache │◄──── commit / abandon ───┐
//!  └──────┬──────┘          └─────────────┘                          │
//!         │ jobs                                                     │
//!         ▼                                                          │
//!  ┌─────────────┐  Completion  ┌─────────────────────────────┐       │
//!  │ WorkerPool  │─────────────►│ engine.collect / sandbox.run │──────┘
//!  └─────────────┘              └─────────────────────────────┘
//! ```
//!
//! A node is started once all its predecessors resolved. A failed predecessor
//! blocks it without running; independent branches keep going. Cancelling an
//! evaluation skips nodes that have not started and interrupts running ones.

use super::cache::{CacheState, Claim, ResultCache};
use super::compiled_plan::{ExecutionPlan, PlanStep};
use super::compiler::DependencyResolver;
use super::error::{ExecutionError, ExecutionResult, GraphError};
use super::fingerprint::Fingerprint;
use super::graph::PipelineGraph;
use super::id::{EvaluationId, NodeId};
use super::node::{BuildContext, Node, NodeOutput, Operation, ResultHandle};
use super::node_type::{BuildFn, NodeKind};
use super::param;
use crate::config::PipelineConfig;
use crate::engine::{DataEngine, EngineError, Interrupt};
use crate::scripting::{ScriptError, ScriptSandbox};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll interval while waiting on entries owned by another evaluation.
const WAIT_POLL: Duration = Duration::from_millis(20);

type Job = Box<dyn FnOnce() + Send + 'static>;

// ==================== Worker pool ====================

/// Fixed-size pool of worker threads fed through a channel.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let workers: Vec<JoinHandle<()>> = (0..size.max(1))
            .filter_map(|i| {
                let receiver: Receiver<Job> = receiver.clone();
                thread::Builder::new()
                    .name(format!("witt-worker-{}", i))
                    .spawn(move || {
                        for job in receiver.iter() {
                            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                                tracing::error!("Worker job panicked: {}", panic_message(&*payload));
                            }
                        }
                    })
                    .map_err(|e| tracing::error!("Failed to spawn worker {}: {}", i, e))
                    .ok()
            })
            .collect();
        tracing::debug!("Started worker pool with {} thread(s)", workers.len());
        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. Runs it inline when no worker could be started.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.workers.is_empty() {
            job();
            return;
        }
        if let Some(sender) = &self.sender {
            if let Err(err) = sender.send(Box::new(job)) {
                tracing::warn!("Worker pool is shut down, running job inline");
                (err.into_inner())();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ==================== Reports ====================

/// How an evaluation should treat its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluateOptions {
    /// Materialise at most this many target rows; the result is not cached.
    pub preview_rows: Option<usize>,
}

impl EvaluateOptions {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn preview(rows: usize) -> Self {
        Self {
            preview_rows: Some(rows),
        }
    }
}

/// Final state of one planned node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Success(ResultHandle),
    Error(ExecutionError),
    /// Not attempted because an upstream node failed.
    Blocked { cause: NodeId },
    /// Not attempted, or interrupted, because the evaluation was cancelled.
    Skipped,
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Success(_))
    }

    pub fn handle(&self) -> Option<&ResultHandle> {
        match self {
            NodeOutcome::Success(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Everything an evaluation did.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub id: EvaluationId,
    pub target: NodeId,
    pub outcomes: BTreeMap<NodeId, NodeOutcome>,
    /// Fingerprints of the planned nodes in the evaluated snapshot.
    pub fingerprints: BTreeMap<NodeId, Fingerprint>,
    /// Nodes whose operation was dispatched to a worker.
    pub executed: BTreeSet<NodeId>,
    pub cache_hits: usize,
    pub cancelled: bool,
    pub preview: bool,
    pub elapsed: Duration,
}

impl EvaluationReport {
    pub fn outcome(&self, node: NodeId) -> Option<&NodeOutcome> {
        self.outcomes.get(&node)
    }

    /// The target's result, or the error explaining why there is none.
    pub fn target_result(&self) -> ExecutionResult<ResultHandle> {
        match self.outcomes.get(&self.target) {
            Some(NodeOutcome::Success(handle)) => Ok(handle.clone()),
            Some(NodeOutcome::Error(err)) => Err(err.clone()),
            Some(NodeOutcome::Blocked { cause }) => Err(ExecutionError::Blocked {
                node: self.target,
                cause: *cause,
            }),
            Some(NodeOutcome::Skipped) | None => Err(ExecutionError::Cancelled(self.id)),
        }
    }
}

/// Handle on a started evaluation, used to cancel it.
#[derive(Debug, Clone)]
pub struct EvaluationTicket {
    pub id: EvaluationId,
    interrupt: Interrupt,
}

impl EvaluationTicket {
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }
}

/// Counters since the scheduler was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub evaluations: u64,
    pub executions: u64,
    pub cache_hits: u64,
}

// ==================== Scheduler ====================

/// Runs evaluations against graph snapshots.
pub struct Scheduler {
    engine: Arc<dyn DataEngine>,
    sandbox: Arc<ScriptSandbox>,
    cache: Arc<ResultCache>,
    pool: WorkerPool,
    next_id: AtomicU64,
    active: Mutex<HashMap<EvaluationId, Interrupt>>,
    evaluations: AtomicU64,
    executions: Arc<AtomicU64>,
    cache_hits: AtomicU64,
}

impl Scheduler {
    pub fn new(config: &PipelineConfig, engine: Arc<dyn DataEngine>) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache.clone()));
        Self::with_cache(config, engine, cache)
    }

    /// Scheduler sharing an existing cache.
    pub fn with_cache(
        config: &PipelineConfig,
        engine: Arc<dyn DataEngine>,
        cache: Arc<ResultCache>,
    ) -> Self {
        let workers = config.scheduler.worker_count();
        tracing::info!(
            "Scheduler using engine '{}' with {} worker(s)",
            engine.name(),
            workers
        );
        Self {
            engine,
            sandbox: Arc::new(ScriptSandbox::new(config.scripting.clone())),
            cache,
            pool: WorkerPool::new(workers),
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            evaluations: AtomicU64::new(0),
            executions: Arc::new(AtomicU64::new(0)),
            cache_hits: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Register a new evaluation so it can be cancelled before it runs.
    pub fn start(&self) -> EvaluationTicket {
        let id = EvaluationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let interrupt = Interrupt::new();
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, interrupt.clone());
        EvaluationTicket { id, interrupt }
    }

    /// Cancel a running evaluation. Returns false if it is unknown or done.
    pub fn cancel(&self, id: EvaluationId) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(&id) {
            Some(interrupt) => {
                tracing::info!("Cancelling {}", id);
                interrupt.trigger();
                true
            }
            None => false,
        }
    }

    /// Evaluate `target` and return its result.
    pub fn evaluate(&self, graph: &PipelineGraph, target: NodeId) -> ExecutionResult<ResultHandle> {
        self.run(graph, target, EvaluateOptions::full())?.target_result()
    }

    /// Evaluate `target` and report every planned node.
    pub fn run(
        &self,
        graph: &PipelineGraph,
        target: NodeId,
        options: EvaluateOptions,
    ) -> ExecutionResult<EvaluationReport> {
        let ticket = self.start();
        self.run_ticket(graph, target, options, ticket)
    }

    /// Evaluate with a ticket obtained from [`Scheduler::start`].
    pub fn run_ticket(
        &self,
        graph: &PipelineGraph,
        target: NodeId,
        options: EvaluateOptions,
        ticket: EvaluationTicket,
    ) -> ExecutionResult<EvaluationReport> {
        let result = self.coordinate(graph, target, options, &ticket);
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&ticket.id);
        result
    }

    fn coordinate(
        &self,
        graph: &PipelineGraph,
        target: NodeId,
        options: EvaluateOptions,
        ticket: &EvaluationTicket,
    ) -> ExecutionResult<EvaluationReport> {
        let start_time = Instant::now();
        let plan = DependencyResolver::plan(graph, target, &self.cache).map_err(|e| match e {
            GraphError::UnknownNode(node) => ExecutionError::UnknownNode(node),
            other => ExecutionError::Graph(other),
        })?;
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "{}: evaluating {} ({} node(s), {} cached{})",
            ticket.id,
            target,
            plan.len(),
            plan.stats.cached_nodes,
            if options.preview_rows.is_some() { ", preview" } else { "" }
        );

        let mut run = Coordinator::new(self, graph, &plan, ticket, options);
        run.drive();

        let protected: HashSet<Fingerprint> = plan.steps.iter().map(|s| s.fingerprint).collect();
        self.cache
            .evict_under(self.cache.config().memory_budget_bytes, &protected);
        self.cache_hits
            .fetch_add(run.cache_hits as u64, Ordering::Relaxed);

        let report = EvaluationReport {
            id: ticket.id,
            target,
            fingerprints: plan.steps.iter().map(|s| (s.node, s.fingerprint)).collect(),
            outcomes: run.outcomes,
            executed: run.executed,
            cache_hits: run.cache_hits,
            cancelled: ticket.interrupt.is_triggered(),
            preview: options.preview_rows.is_some(),
            elapsed: start_time.elapsed(),
        };
        tracing::info!(
            "{}: finished in {:.1}ms, {} executed, {} cache hit(s){}",
            report.id,
            report.elapsed.as_secs_f64() * 1000.0,
            report.executed.len(),
            report.cache_hits,
            if report.cancelled { ", cancelled" } else { "" }
        );
        Ok(report)
    }
}

// ==================== Coordinator ====================

/// Message from a worker back to the coordinator.
struct Completion {
    node: NodeId,
    result: Result<ResultHandle, Failure>,
}

enum Failure {
    Interrupted,
    Error(ExecutionError),
}

enum InputState {
    Pending,
    Blocked(NodeId),
    Skipped,
    Ready(Vec<Vec<NodeOutput>>),
}

struct Coordinator<'a> {
    scheduler: &'a Scheduler,
    graph: &'a PipelineGraph,
    plan: &'a ExecutionPlan,
    ticket: &'a EvaluationTicket,
    preview_rows: Option<usize>,
    outcomes: BTreeMap<NodeId, NodeOutcome>,
    /// In flight on a worker or waiting on another evaluation.
    started: BTreeSet<NodeId>,
    waiting: BTreeMap<NodeId, Fingerprint>,
    executed: BTreeSet<NodeId>,
    in_flight: usize,
    cache_hits: usize,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl<'a> Coordinator<'a> {
    fn new(
        scheduler: &'a Scheduler,
        graph: &'a PipelineGraph,
        plan: &'a ExecutionPlan,
        ticket: &'a EvaluationTicket,
        options: EvaluateOptions,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            scheduler,
            graph,
            plan,
            ticket,
            preview_rows: options.preview_rows,
            outcomes: BTreeMap::new(),
            started: BTreeSet::new(),
            waiting: BTreeMap::new(),
            executed: BTreeSet::new(),
            in_flight: 0,
            cache_hits: 0,
            tx,
            rx,
        }
    }

    fn cancelled(&self) -> bool {
        self.ticket.interrupt.is_triggered()
    }

    fn drive(&mut self) {
        loop {
            self.poll_waiting();
            self.dispatch_ready();

            if self.outcomes.len() >= self.plan.len() {
                break;
            }
            if self.in_flight == 0 && self.waiting.is_empty() {
                tracing::error!(
                    "{}: {} node(s) left unresolved",
                    self.ticket.id,
                    self.plan.len() - self.outcomes.len()
                );
                break;
            }

            let completion = if self.waiting.is_empty() {
                self.rx.recv().ok()
            } else {
                match self.rx.recv_timeout(WAIT_POLL) {
                    Ok(completion) => Some(completion),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            };
            match completion {
                Some(completion) => self.complete(completion),
                None => break,
            }
        }
    }

    fn resolve(&mut self, node: NodeId, outcome: NodeOutcome) {
        self.started.remove(&node);
        self.outcomes.insert(node, outcome);
    }

    fn input_state(&self, node: NodeId) -> InputState {
        let mut pending = false;
        for pred in self.graph.predecessors(node) {
            match self.outcomes.get(&pred) {
                None => pending = true,
                Some(NodeOutcome::Error(_)) => return InputState::Blocked(pred),
                Some(NodeOutcome::Blocked { cause }) => return InputState::Blocked(*cause),
                Some(NodeOutcome::Skipped) => return InputState::Skipped,
                Some(NodeOutcome::Success(_)) => {}
            }
        }
        if pending {
            return InputState::Pending;
        }

        let inputs = self
            .graph
            .inputs_by_socket(node)
            .into_iter()
            .map(|edges| {
                edges
                    .into_iter()
                    .filter_map(|edge| self.outcomes.get(&edge.source)?.handle())
                    .map(|handle| handle.output.clone())
                    .collect()
            })
            .collect();
        InputState::Ready(inputs)
    }

    fn dispatch_ready(&mut self) {
        let plan = self.plan;
        for step in &plan.steps {
            if self.outcomes.contains_key(&step.node) || self.started.contains(&step.node) {
                continue;
            }
            match self.input_state(step.node) {
                InputState::Pending => {}
                InputState::Blocked(cause) => {
                    tracing::debug!("{} blocked by {}", step.node, cause);
                    self.resolve(step.node, NodeOutcome::Blocked { cause });
                }
                InputState::Skipped => self.resolve(step.node, NodeOutcome::Skipped),
                InputState::Ready(inputs) => self.start_node(step, inputs),
            }
        }
    }

    fn start_node(&mut self, step: &PlanStep, inputs: Vec<Vec<NodeOutput>>) {
        if self.cancelled() {
            self.resolve(step.node, NodeOutcome::Skipped);
            return;
        }
        let graph = self.graph;
        let Some(node) = graph.node(step.node) else {
            self.resolve(
                step.node,
                NodeOutcome::Error(ExecutionError::UnknownNode(step.node)),
            );
            return;
        };

        if step.node == self.plan.target {
            if let Some(rows) = self.preview_rows {
                self.start_preview(node, inputs, rows);
                return;
            }
        }

        let scheduler = self.scheduler;
        let cache = &scheduler.cache;
        match cache.claim(step.fingerprint, step.node, step.kind) {
            Claim::Hit(handle) => {
                tracing::debug!("{} reused {}", step.node, step.fingerprint.short());
                self.cache_hits += 1;
                self.resolve(step.node, NodeOutcome::Success(handle));
            }
            Claim::Failed(err) => self.resolve(step.node, NodeOutcome::Error(err)),
            Claim::InFlight => {
                tracing::debug!(
                    "{} waits for {} computed elsewhere",
                    step.node,
                    step.fingerprint.short()
                );
                self.started.insert(step.node);
                self.waiting.insert(step.node, step.fingerprint);
            }
            Claim::Owner => match build(node, &inputs) {
                Ok(operation) => self.dispatch(node, operation, None, true),
                Err(err) => {
                    cache.commit(step.fingerprint, Err(err.clone()));
                    tracing::warn!("{} failed: {}", step.node, err);
                    self.resolve(step.node, NodeOutcome::Error(err));
                }
            },
        }
    }

    fn start_preview(&mut self, node: &Node, inputs: Vec<Vec<NodeOutput>>, rows: usize) {
        if let Some(handle) = self.scheduler.cache.get(&node.fingerprint) {
            self.cache_hits += 1;
            let preview = ResultHandle {
                output: handle.output.head(rows),
                ..handle
            };
            self.resolve(node.id, NodeOutcome::Success(preview));
            return;
        }
        match build(node, &inputs) {
            Ok(operation) => self.dispatch(node, operation, Some(rows), false),
            Err(err) => self.resolve(node.id, NodeOutcome::Error(err)),
        }
    }

    fn dispatch(&mut self, node: &Node, operation: Operation, limit: Option<usize>, commit: bool) {
        tracing::debug!(
            "{}: dispatching {} ({})",
            self.ticket.id,
            node.id,
            node.kind.id()
        );
        self.started.insert(node.id);
        self.executed.insert(node.id);
        self.in_flight += 1;
        self.scheduler.executions.fetch_add(1, Ordering::Relaxed);

        let engine = Arc::clone(&self.scheduler.engine);
        let sandbox = Arc::clone(&self.scheduler.sandbox);
        let cache = Arc::clone(&self.scheduler.cache);
        let interrupt = self.ticket.interrupt.clone();
        let tx = self.tx.clone();
        let (id, kind, fingerprint) = (node.id, node.kind, node.fingerprint);

        self.scheduler.pool.execute(move || {
            let result = catch_unwind(AssertUnwindSafe(|| {
                execute(
                    engine.as_ref(),
                    &sandbox,
                    id,
                    kind,
                    fingerprint,
                    operation,
                    limit,
                    &interrupt,
                )
            }))
            .unwrap_or_else(|payload| {
                Err(Failure::Error(failure(
                    id,
                    kind,
                    format!("panicked: {}", panic_message(&*payload)),
                )))
            });

            if commit {
                match &result {
                    Ok(handle) => cache.commit(fingerprint, Ok(handle.clone())),
                    Err(Failure::Error(err)) => cache.commit(fingerprint, Err(err.clone())),
                    Err(Failure::Interrupted) => cache.abandon(&fingerprint),
                }
            }
            let _ = tx.send(Completion { node: id, result });
        });
    }

    fn complete(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let outcome = match completion.result {
            Ok(handle) => {
                tracing::debug!("{} produced {} row(s)", completion.node, handle.rows());
                NodeOutcome::Success(handle)
            }
            Err(Failure::Error(err)) => {
                tracing::warn!("{} failed: {}", completion.node, err);
                NodeOutcome::Error(err)
            }
            Err(Failure::Interrupted) => {
                tracing::debug!("{} interrupted", completion.node);
                NodeOutcome::Skipped
            }
        };
        self.resolve(completion.node, outcome);
    }

    fn poll_waiting(&mut self) {
        if self.waiting.is_empty() {
            return;
        }
        let cache = Arc::clone(&self.scheduler.cache);
        for (node, fingerprint) in std::mem::take(&mut self.waiting) {
            if self.cancelled() {
                self.resolve(node, NodeOutcome::Skipped);
                continue;
            }
            match cache.state(&fingerprint) {
                Some(CacheState::Pending) => {
                    self.waiting.insert(node, fingerprint);
                }
                Some(CacheState::Ready(handle)) => {
                    cache.get(&fingerprint);
                    self.cache_hits += 1;
                    self.resolve(node, NodeOutcome::Success(handle));
                }
                Some(CacheState::Failed(err)) => self.resolve(node, NodeOutcome::Error(err)),
                None => {
                    // Owner gave up; claim again on the next pass.
                    self.started.remove(&node);
                }
            }
        }
    }
}

// ==================== Node execution ====================

/// Check declared requirements and build the node's operation.
fn build(node: &Node, inputs: &[Vec<NodeOutput>]) -> ExecutionResult<Operation> {
    let descriptor = node.kind.descriptor();
    if let Some(name) = param::missing_required(descriptor.params, &node.params) {
        return Err(ExecutionError::InvalidParameter {
            node: node.id,
            name: name.to_string(),
            message: "required parameter is not set".to_string(),
        });
    }
    for (i, spec) in descriptor.inputs.iter().enumerate() {
        if spec.required && inputs.get(i).map_or(true, Vec::is_empty) {
            return Err(ExecutionError::MissingInput {
                node: node.id,
                socket: spec.name.to_string(),
            });
        }
    }
    let ctx = BuildContext {
        node: node.id,
        kind: node.kind,
        params: &node.params,
        inputs,
    };
    guarded_build(descriptor.build, &ctx)
}

/// Builders run on the coordinator, so a panic becomes this node's error.
fn guarded_build(builder: BuildFn, ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    catch_unwind(AssertUnwindSafe(|| builder(ctx))).unwrap_or_else(|payload| {
        Err(failure(
            ctx.node,
            ctx.kind,
            format!("panicked while building: {}", panic_message(&*payload)),
        ))
    })
}

/// Errors of custom nodes are the user's; everything else is the engine's.
fn failure(node: NodeId, kind: NodeKind, message: String) -> ExecutionError {
    if kind.is_custom() {
        ExecutionError::UserCodeFailure { node, message }
    } else {
        ExecutionError::EngineExecution { node, message }
    }
}

#[allow(clippy::too_many_arguments)]
fn execute(
    engine: &dyn DataEngine,
    sandbox: &ScriptSandbox,
    node: NodeId,
    kind: NodeKind,
    fingerprint: Fingerprint,
    operation: Operation,
    limit: Option<usize>,
    interrupt: &Interrupt,
) -> Result<ResultHandle, Failure> {
    let output = match operation {
        Operation::Plan(plan) => {
            let frame = engine
                .collect(&plan, limit, interrupt)
                .map_err(|e| match e {
                    EngineError::Interrupted => Failure::Interrupted,
                    other => Failure::Error(failure(node, kind, other.to_string())),
                })?;
            NodeOutput::Frame(Arc::new(frame))
        }
        Operation::Scalar(value) => NodeOutput::Scalar(value),
        Operation::Script {
            source,
            inputs,
            params,
        } => {
            let frame = sandbox
                .run(&source, &inputs, &params, interrupt)
                .map_err(|e| match e {
                    ScriptError::Interrupted => Failure::Interrupted,
                    other => Failure::Error(ExecutionError::UserCodeFailure {
                        node,
                        message: other.to_string(),
                    }),
                })?;
            let output = NodeOutput::Frame(Arc::new(frame));
            match limit {
                Some(rows) => output.head(rows),
                None => output,
            }
        }
    };

    let cost = match &output {
        NodeOutput::Frame(frame) => engine.estimate_size(frame),
        NodeOutput::Scalar(value) => value.estimated_bytes(),
    };
    Ok(ResultHandle {
        fingerprint,
        output,
        cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::engine::{MemoryEngine, MockDataEngine};
    use crate::frame::{Frame, Value};
    use crate::pipeline::param::{ParamValue, Params};
    use std::sync::atomic::AtomicUsize;

    fn config(workers: usize) -> PipelineConfig {
        PipelineConfig {
            scheduler: SchedulerConfig { workers },
            ..PipelineConfig::default()
        }
    }

    fn params(pairs: &[(&str, ParamValue)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn table_params() -> Params {
        params(&[
            ("columns", ParamValue::List(vec!["city".into(), "amount".into()])),
            (
                "rows",
                ParamValue::List(vec![
                    ParamValue::List(vec!["Oslo".into(), 10i64.into()]),
                    ParamValue::List(vec!["Rome".into(), 25i64.into()]),
                    ParamValue::List(vec!["Oslo".into(), 5i64.into()]),
                ]),
            ),
        ])
    }

    /// table ─► filter(amount > 6) ─► first(1)
    fn chain() -> (PipelineGraph, NodeId, NodeId, NodeId) {
        let mut graph = PipelineGraph::default();
        let table = graph.add_node(NodeKind::SourceTable, table_params()).unwrap();
        let filter = graph
            .add_node(
                NodeKind::Filter,
                params(&[
                    ("column", "amount".into()),
                    ("op", "gt".into()),
                    ("value", 6i64.into()),
                ]),
            )
            .unwrap();
        let first = graph
            .add_node(NodeKind::RowsFirst, params(&[("count", 1i64.into())]))
            .unwrap();
        graph.connect(table, "table", filter, "table").unwrap();
        graph.connect(filter, "table", first, "table").unwrap();
        (graph, table, filter, first)
    }

    #[test]
    fn test_worker_pool_survives_panics() {
        let pool = WorkerPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));
        pool.execute(|| panic!("boom"));
        for _ in 0..4 {
            let done = Arc::clone(&done);
            pool.execute(move || {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_evaluate_chain() {
        let (graph, _, _, first) = chain();
        let scheduler = Scheduler::new(&config(2), Arc::new(MemoryEngine::new()));
        let handle = scheduler.evaluate(&graph, first).unwrap();
        let frame = handle.frame().unwrap();
        assert_eq!(frame.height(), 1);
        assert_eq!(frame.row(0), vec![Value::from("Oslo"), Value::Int(10)]);
    }

    #[test]
    fn test_second_run_is_all_cache_hits() {
        let (graph, table, filter, first) = chain();
        let scheduler = Scheduler::new(&config(2), Arc::new(MemoryEngine::new()));

        let cold = scheduler.run(&graph, first, EvaluateOptions::full()).unwrap();
        assert_eq!(cold.executed, [table, filter, first].into_iter().collect());

        let warm = scheduler.run(&graph, first, EvaluateOptions::full()).unwrap();
        assert!(warm.executed.is_empty());
        assert_eq!(warm.cache_hits, 3);
        assert_eq!(warm.target_result(), cold.target_result());
    }

    #[test]
    fn test_engine_failure_blocks_descendants() {
        let (graph, table, filter, first) = chain();
        let mut engine = MockDataEngine::new();
        engine.expect_name().return_const("mock");
        engine
            .expect_collect()
            .returning(|_, _, _| Err(EngineError::Io("disk on fire".into())));
        engine.expect_estimate_size().returning(|f| f.estimated_bytes());
        let scheduler = Scheduler::new(&config(1), Arc::new(engine));

        let report = scheduler.run(&graph, first, EvaluateOptions::full()).unwrap();
        assert!(matches!(
            report.outcome(table),
            Some(NodeOutcome::Error(ExecutionError::EngineExecution { .. }))
        ));
        assert_eq!(
            report.outcome(filter),
            Some(&NodeOutcome::Blocked { cause: table })
        );
        assert_eq!(
            report.outcome(first),
            Some(&NodeOutcome::Blocked { cause: table })
        );
        assert_eq!(report.executed, [table].into_iter().collect());
        assert_eq!(
            report.target_result(),
            Err(ExecutionError::Blocked {
                node: first,
                cause: table
            })
        );
    }

    struct PanickingEngine;

    impl DataEngine for PanickingEngine {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn collect(
            &self,
            _plan: &crate::engine::LazyPlan,
            _limit: Option<usize>,
            _interrupt: &Interrupt,
        ) -> crate::engine::EngineResult<Frame> {
            panic!("kernel bug")
        }

        fn estimate_size(&self, frame: &Frame) -> usize {
            frame.estimated_bytes()
        }
    }

    #[test]
    fn test_engine_panic_is_contained() {
        let (graph, table, filter, first) = chain();
        let scheduler = Scheduler::new(&config(1), Arc::new(PanickingEngine));

        let report = scheduler.run(&graph, first, EvaluateOptions::full()).unwrap();
        match report.outcome(table) {
            Some(NodeOutcome::Error(ExecutionError::EngineExecution { message, .. })) => {
                assert!(message.contains("kernel bug"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            report.outcome(filter),
            Some(&NodeOutcome::Blocked { cause: table })
        );
        // The worker is still alive.
        assert!(scheduler.run(&graph, first, EvaluateOptions::full()).is_ok());
    }

    fn broken_builder(_ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
        panic!("builder bug")
    }

    #[test]
    fn test_builder_panic_becomes_node_error() {
        let params = Params::new();
        let ctx = BuildContext {
            node: NodeId(4),
            kind: NodeKind::CustomSql,
            params: &params,
            inputs: &[],
        };
        match guarded_build(broken_builder, &ctx) {
            Err(ExecutionError::UserCodeFailure { node, message }) => {
                assert_eq!(node, NodeId(4));
                assert!(message.contains("builder bug"));
            }
            other => panic!("unexpected result {:?}", other),
        }

        let ctx = BuildContext {
            kind: NodeKind::Filter,
            ..ctx
        };
        assert!(matches!(
            guarded_build(broken_builder, &ctx),
            Err(ExecutionError::EngineExecution { .. })
        ));
    }

    #[test]
    fn test_build_failure_settles_cache_entry() {
        let (mut graph, table, _, _) = chain();
        let sql = graph
            .add_node(NodeKind::CustomSql, params(&[("query", "SELEKT".into())]))
            .unwrap();
        graph.connect(table, "table", sql, "tables").unwrap();
        let scheduler = Scheduler::new(&config(1), Arc::new(MemoryEngine::new()));

        let first = scheduler.run(&graph, sql, EvaluateOptions::full()).unwrap();
        let fingerprint = first.fingerprints[&sql];
        assert!(matches!(
            scheduler.cache().state(&fingerprint),
            Some(CacheState::Failed(ExecutionError::UserCodeFailure { .. }))
        ));

        let second = scheduler.run(&graph, sql, EvaluateOptions::full()).unwrap();
        assert!(second.executed.is_empty());
        assert_eq!(second.target_result(), first.target_result());
    }

    #[test]
    fn test_missing_input_is_reported() {
        let mut graph = PipelineGraph::default();
        let viewer = graph.add_node(NodeKind::SinkViewer, Params::new()).unwrap();
        let scheduler = Scheduler::new(&config(1), Arc::new(MemoryEngine::new()));
        assert_eq!(
            scheduler.evaluate(&graph, viewer),
            Err(ExecutionError::MissingInput {
                node: viewer,
                socket: "table".into()
            })
        );
    }

    #[test]
    fn test_unknown_target() {
        let graph = PipelineGraph::default();
        let scheduler = Scheduler::new(&config(1), Arc::new(MemoryEngine::new()));
        assert_eq!(
            scheduler.evaluate(&graph, NodeId(3)).unwrap_err(),
            ExecutionError::UnknownNode(NodeId(3))
        );
    }

    #[test]
    fn test_preview_is_limited_and_not_cached() {
        let (graph, table, filter, _) = chain();
        let scheduler = Scheduler::new(&config(2), Arc::new(MemoryEngine::new()));

        let report = scheduler.run(&graph, filter, EvaluateOptions::preview(1)).unwrap();
        assert!(report.preview);
        assert_eq!(report.target_result().unwrap().rows(), 1);
        assert!(scheduler.cache().get(&graph.fingerprint(table).unwrap()).is_some());
        assert!(scheduler.cache().get(&graph.fingerprint(filter).unwrap()).is_none());

        let full = scheduler.evaluate(&graph, filter).unwrap();
        assert_eq!(full.rows(), 2);
        let again = scheduler.run(&graph, filter, EvaluateOptions::preview(1)).unwrap();
        assert!(again.executed.is_empty());
        assert_eq!(again.target_result().unwrap().rows(), 1);
    }

    #[test]
    fn test_cancelled_before_start_skips_everything() {
        let (graph, table, filter, first) = chain();
        let scheduler = Scheduler::new(&config(1), Arc::new(MemoryEngine::new()));
        let ticket = scheduler.start();
        assert!(scheduler.cancel(ticket.id));
        let id = ticket.id;

        let report = scheduler
            .run_ticket(&graph, first, EvaluateOptions::full(), ticket)
            .unwrap();
        assert!(report.cancelled);
        for node in [table, filter, first] {
            assert_eq!(report.outcome(node), Some(&NodeOutcome::Skipped));
        }
        assert_eq!(report.target_result(), Err(ExecutionError::Cancelled(id)));
        assert!(!scheduler.cancel(id));
        assert!(scheduler.cache().is_empty());
    }

    #[test]
    fn test_constant_feeds_scalar_socket() {
        let (mut graph, _, filter, first) = chain();
        let count = graph
            .add_node(
                NodeKind::ConstantInteger,
                params(&[("value", 2i64.into())]),
            )
            .unwrap();
        graph.connect(count, "value", first, "count").unwrap();
        let scheduler = Scheduler::new(&config(2), Arc::new(MemoryEngine::new()));

        let report = scheduler.run(&graph, first, EvaluateOptions::full()).unwrap();
        assert_eq!(
            report.outcome(count).and_then(|o| o.handle()).and_then(|h| h.scalar()),
            Some(&Value::Int(2))
        );
        assert_eq!(report.target_result().unwrap().rows(), 2);
        assert!(report.outcome(filter).unwrap().is_success());
    }
}
