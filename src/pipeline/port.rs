//! Socket descriptors for the node system.
//!
//! Each node kind declares its sockets via static `SocketSpec` arrays.
//! The graph uses these to validate edge connections: sockets must exist,
//! types must match, and single-arity inputs accept one edge.

use std::fmt;

/// The kind of data flowing through a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    /// A table.
    DataFrame,
    /// A single value.
    Scalar,
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketType::DataFrame => write!(f, "dataframe"),
            SocketType::Scalar => write!(f, "scalar"),
        }
    }
}

/// How many edges an input socket accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    Single,
    /// Any number of edges, ordered by edge id.
    Multi,
}

/// Static descriptor for one socket of a node kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSpec {
    pub name: &'static str,
    pub ty: SocketType,
    pub arity: Arity,
    /// A required input without edges fails execution with `MissingInput`.
    pub required: bool,
}

impl SocketSpec {
    pub const fn input(name: &'static str, ty: SocketType) -> Self {
        Self {
            name,
            ty,
            arity: Arity::Single,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, ty: SocketType) -> Self {
        Self {
            name,
            ty,
            arity: Arity::Single,
            required: false,
        }
    }

    pub const fn multi(name: &'static str, ty: SocketType, required: bool) -> Self {
        Self {
            name,
            ty,
            arity: Arity::Multi,
            required,
        }
    }

    pub const fn output(name: &'static str, ty: SocketType) -> Self {
        Self {
            name,
            ty,
            arity: Arity::Multi,
            required: false,
        }
    }
}
