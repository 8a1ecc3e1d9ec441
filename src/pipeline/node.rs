//! Nodes, their outputs, and the context node builders work with.
//!
//! Two-layer design:
//! - **Builders** (`nodes/*`) turn a node's parameters and resolved inputs
//!   into an [`Operation`]: a lazy plan, a scalar, or a sandboxed script.
//!   Building never touches data.
//! - **The scheduler** executes operations against the data engine or the
//!   script sandbox and wraps the output in a [`ResultHandle`].

use super::error::{ExecutionError, ExecutionResult};
use super::fingerprint::Fingerprint;
use super::id::NodeId;
use super::node_type::NodeKind;
use super::param::{ParamValue, Params};
use super::port::SocketType;
use crate::engine::LazyPlan;
use crate::frame::{Frame, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Canvas position; view-only, never part of the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A node of the pipeline graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Complete parameter map (defaults included).
    pub params: Params,
    pub position: Position,
    pub fingerprint: Fingerprint,
}

/// The output of a node execution.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    Frame(Arc<Frame>),
    Scalar(Value),
}

impl NodeOutput {
    pub fn as_frame(&self) -> Option<&Arc<Frame>> {
        match self {
            NodeOutput::Frame(frame) => Some(frame),
            NodeOutput::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            NodeOutput::Scalar(value) => Some(value),
            NodeOutput::Frame(_) => None,
        }
    }

    pub fn socket_type(&self) -> SocketType {
        match self {
            NodeOutput::Frame(_) => SocketType::DataFrame,
            NodeOutput::Scalar(_) => SocketType::Scalar,
        }
    }

    /// Row count; scalars count as one row.
    pub fn rows(&self) -> usize {
        match self {
            NodeOutput::Frame(frame) => frame.height(),
            NodeOutput::Scalar(_) => 1,
        }
    }

    /// At most `rows` leading rows of the output.
    pub fn head(&self, rows: usize) -> NodeOutput {
        match self {
            NodeOutput::Frame(frame) if frame.height() > rows => {
                NodeOutput::Frame(Arc::new(frame.head(rows)))
            }
            other => other.clone(),
        }
    }
}

/// A materialised, cached node result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultHandle {
    pub fingerprint: Fingerprint,
    pub output: NodeOutput,
    /// Memory cost in bytes, as reported by the engine.
    pub cost: usize,
}

impl ResultHandle {
    pub fn frame(&self) -> Option<&Arc<Frame>> {
        self.output.as_frame()
    }

    pub fn scalar(&self) -> Option<&Value> {
        self.output.as_scalar()
    }

    pub fn rows(&self) -> usize {
        self.output.rows()
    }
}

/// Work a node performs, produced by its builder.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Materialised through the data engine.
    Plan(LazyPlan),
    Scalar(Value),
    /// Run in the script sandbox.
    Script {
        source: String,
        inputs: Vec<Arc<Frame>>,
        params: Params,
    },
}

/// Everything a builder may see: its own parameters and resolved inputs.
pub struct BuildContext<'a> {
    pub node: NodeId,
    pub kind: NodeKind,
    pub params: &'a Params,
    /// Upstream outputs per input socket (declaration order); multi-arity
    /// sockets list their edges in edge order.
    pub inputs: &'a [Vec<NodeOutput>],
}

impl<'a> BuildContext<'a> {
    pub fn invalid_param(&self, name: &str, message: impl Into<String>) -> ExecutionError {
        ExecutionError::InvalidParameter {
            node: self.node,
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&'a ParamValue> {
        self.params.get(name)
    }

    pub fn text(&self, name: &str) -> ExecutionResult<&'a str> {
        self.param(name)
            .and_then(ParamValue::as_str)
            .ok_or_else(|| self.invalid_param(name, "expected text"))
    }

    /// Text parameter that must be present and non-blank.
    pub fn non_empty_text(&self, name: &str) -> ExecutionResult<&'a str> {
        let text = self.text(name)?;
        if text.trim().is_empty() {
            return Err(self.invalid_param(name, "must not be empty"));
        }
        Ok(text)
    }

    pub fn bool(&self, name: &str) -> ExecutionResult<bool> {
        self.param(name)
            .and_then(ParamValue::as_bool)
            .ok_or_else(|| self.invalid_param(name, "expected boolean"))
    }

    pub fn int(&self, name: &str) -> ExecutionResult<i64> {
        self.param(name)
            .and_then(ParamValue::as_i64)
            .ok_or_else(|| self.invalid_param(name, "expected integer"))
    }

    /// Non-negative integer parameter, as a row count or offset.
    pub fn count(&self, name: &str) -> ExecutionResult<usize> {
        let n = self.int(name)?;
        usize::try_from(n).map_err(|_| self.invalid_param(name, "must not be negative"))
    }

    /// Text list parameter; unset means empty.
    pub fn text_list(&self, name: &str) -> ExecutionResult<Vec<String>> {
        match self.param(name) {
            None => Ok(Vec::new()),
            Some(value) => value
                .as_text_list()
                .ok_or_else(|| self.invalid_param(name, "expected a list of texts")),
        }
    }

    fn socket_name(&self, socket: usize) -> String {
        self.kind
            .descriptor()
            .inputs
            .get(socket)
            .map(|s| s.name.to_string())
            .unwrap_or_else(|| format!("#{}", socket))
    }

    fn missing(&self, socket: usize) -> ExecutionError {
        ExecutionError::MissingInput {
            node: self.node,
            socket: self.socket_name(socket),
        }
    }

    /// All frames connected to an input socket.
    pub fn frames(&self, socket: usize) -> ExecutionResult<Vec<Arc<Frame>>> {
        self.inputs
            .get(socket)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|out| out.as_frame().cloned().ok_or_else(|| self.missing(socket)))
            .collect()
    }

    /// The frame connected to a single-arity input socket.
    pub fn frame(&self, socket: usize) -> ExecutionResult<Arc<Frame>> {
        self.frames(socket)?
            .into_iter()
            .next()
            .ok_or_else(|| self.missing(socket))
    }

    /// Lazy plan over the frame of an input socket.
    pub fn plan(&self, socket: usize) -> ExecutionResult<LazyPlan> {
        Ok(LazyPlan::frame(self.frame(socket)?))
    }

    /// The scalar connected to an input socket, if any.
    pub fn scalar(&self, socket: usize) -> Option<&'a Value> {
        self.inputs.get(socket)?.first()?.as_scalar()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Arc<Frame> {
        Arc::new(
            Frame::from_rows(&["a"], (0..5).map(|i| vec![Value::Int(i)]).collect()).unwrap(),
        )
    }

    #[test]
    fn test_output_head() {
        let out = NodeOutput::Frame(frame());
        assert_eq!(out.head(2).rows(), 2);
        assert_eq!(out.head(10), out);
        assert_eq!(NodeOutput::Scalar(Value::Int(1)).head(0).rows(), 1);
    }

    #[test]
    fn test_build_context_accessors() {
        let mut params = Params::new();
        params.insert("count".into(), ParamValue::Int(-2));
        params.insert("columns".into(), ParamValue::from(vec!["a", "b"]));
        let inputs = vec![vec![NodeOutput::Frame(frame())], vec![]];
        let ctx = BuildContext {
            node: NodeId(3),
            kind: NodeKind::RowsFirst,
            params: &params,
            inputs: &inputs,
        };

        assert!(matches!(
            ctx.count("count"),
            Err(ExecutionError::InvalidParameter { .. })
        ));
        assert_eq!(ctx.text_list("columns").unwrap(), vec!["a", "b"]);
        assert_eq!(ctx.text_list("absent").unwrap(), Vec::<String>::new());
        assert_eq!(ctx.frame(0).unwrap().height(), 5);
        assert!(ctx.scalar(1).is_none());
        assert_eq!(
            ctx.frame(1).unwrap_err(),
            ExecutionError::MissingInput {
                node: NodeId(3),
                socket: "count".into()
            }
        );
    }
}
