//! Error handling for witt-pipeline
//!
//! Each layer has its own error enum (`GraphError`, `ExecutionError`,
//! `EngineError`, `SqlError`, `ScriptError`). This module defines the
//! crate-level [`WittError`] they convert into, and a Result alias for the
//! outer surfaces (configuration, persistence, the CLI).

use crate::engine::EngineError;
use crate::pipeline::error::{ExecutionError, GraphError};
use crate::scripting::ScriptError;
use thiserror::Error;

/// Main error type for witt-pipeline operations
#[derive(Error, Debug)]
pub enum WittError {
    /// Rejected graph edits
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Node execution failures
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Dataframe engine failures outside a node execution
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Script compilation or runtime failures
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or inconsistent pipeline definitions
    #[error("Definition error: {0}")]
    Definition(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<WittError>,
    },
}

impl WittError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        WittError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for WittError {
    fn from(err: serde_json::Error) -> Self {
        WittError::Serialization(err.to_string())
    }
}

/// Result type alias for witt-pipeline operations
pub type Result<T> = std::result::Result<T, WittError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<WittError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
