//! Node parameters and their schemas.
//!
//! Every node kind declares a static parameter schema (`&'static [ParamSpec]`).
//! A node always stores its complete parameter map: defaults are filled in
//! when the node is created, so two nodes whose parameters only differ by an
//! explicitly set default value have the same fingerprint.

use crate::frame::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A parameter value, as stored on nodes and in pipeline definitions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ParamValue]> {
        match self {
            ParamValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// A list of texts, e.g. column names.
    pub fn as_text_list(&self) -> Option<Vec<String>> {
        self.as_list()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// Convert a scalar parameter into a cell value. Lists have no cell form.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            ParamValue::Null => Some(Value::Null),
            ParamValue::Bool(b) => Some(Value::Bool(*b)),
            ParamValue::Int(i) => Some(Value::Int(*i)),
            ParamValue::Float(f) => Some(Value::Float(*f)),
            ParamValue::Text(s) => Some(Value::Text(s.clone())),
            ParamValue::List(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Null => "null",
            ParamValue::Bool(_) => "boolean",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "decimal",
            ParamValue::Text(_) => "text",
            ParamValue::List(_) => "list",
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        ParamValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "<{}>", self.type_name()),
        }
    }
}

/// Parameter map of a node, ordered by name.
pub type Params = BTreeMap<String, ParamValue>;

/// Type constraint of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Bool,
    Int { min: Option<i64>, max: Option<i64> },
    /// Integers are accepted and widened.
    Float,
    Text,
    /// One of a fixed set of texts.
    Choice(&'static [&'static str]),
    TextList,
    /// Any scalar (no lists).
    Scalar,
    /// Literal table rows: a list of lists of scalars.
    Rows,
}

/// Default value of a parameter, in a form usable in static schemas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
    EmptyList,
}

impl ParamDefault {
    pub fn to_value(self) -> Option<ParamValue> {
        match self {
            ParamDefault::None => None,
            ParamDefault::Bool(b) => Some(ParamValue::Bool(b)),
            ParamDefault::Int(i) => Some(ParamValue::Int(i)),
            ParamDefault::Float(f) => Some(ParamValue::Float(f)),
            ParamDefault::Text(s) => Some(ParamValue::Text(s.to_string())),
            ParamDefault::EmptyList => Some(ParamValue::List(Vec::new())),
        }
    }
}

/// Schema entry for one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    /// Execution fails with `InvalidParameter` while a required parameter is unset.
    pub required: bool,
    pub default: ParamDefault,
}

impl ParamSpec {
    pub const fn new(name: &'static str, kind: ParamKind, default: ParamDefault) -> Self {
        Self {
            name,
            kind,
            required: false,
            default,
        }
    }

    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: ParamDefault::None,
        }
    }

    /// Check `value` against the constraint, returning the coerced value.
    pub fn validate(&self, value: &ParamValue) -> Result<ParamValue, String> {
        let mismatch = |expected: &str| {
            Err(format!(
                "expected {}, found {}",
                expected,
                value.type_name()
            ))
        };

        match (&self.kind, value) {
            (ParamKind::Bool, ParamValue::Bool(_)) => Ok(value.clone()),
            (ParamKind::Bool, _) => mismatch("boolean"),

            (ParamKind::Int { min, max }, ParamValue::Int(_) | ParamValue::Float(_)) => {
                let i = match value {
                    ParamValue::Int(i) => *i,
                    ParamValue::Float(f) if f.fract() == 0.0 => *f as i64,
                    _ => return mismatch("integer"),
                };
                if let Some(min) = min {
                    if i < *min {
                        return Err(format!("{} is below the minimum {}", i, min));
                    }
                }
                if let Some(max) = max {
                    if i > *max {
                        return Err(format!("{} is above the maximum {}", i, max));
                    }
                }
                Ok(ParamValue::Int(i))
            }
            (ParamKind::Int { .. }, _) => mismatch("integer"),

            (ParamKind::Float, ParamValue::Int(i)) => Ok(ParamValue::Float(*i as f64)),
            (ParamKind::Float, ParamValue::Float(_)) => Ok(value.clone()),
            (ParamKind::Float, _) => mismatch("decimal"),

            (ParamKind::Text, ParamValue::Text(_)) => Ok(value.clone()),
            (ParamKind::Text, _) => mismatch("text"),

            (ParamKind::Choice(options), ParamValue::Text(s)) => {
                if options.contains(&s.as_str()) {
                    Ok(value.clone())
                } else {
                    Err(format!("'{}' is not one of {}", s, options.join(", ")))
                }
            }
            (ParamKind::Choice(_), _) => mismatch("text"),

            (ParamKind::TextList, ParamValue::List(items))
                if items.iter().all(|i| matches!(i, ParamValue::Text(_))) =>
            {
                Ok(value.clone())
            }
            (ParamKind::TextList, _) => mismatch("list of texts"),

            (ParamKind::Scalar, ParamValue::List(_)) => mismatch("scalar"),
            (ParamKind::Scalar, _) => Ok(value.clone()),

            (ParamKind::Rows, ParamValue::List(rows))
                if rows.iter().all(|r| {
                    r.as_list()
                        .map_or(false, |cells| cells.iter().all(|c| c.as_list().is_none()))
                }) =>
            {
                Ok(value.clone())
            }
            (ParamKind::Rows, _) => mismatch("list of rows"),
        }
    }
}

/// Complete parameter map holding the default of every parameter that has one.
pub fn defaults(schema: &[ParamSpec]) -> Params {
    schema
        .iter()
        .filter_map(|spec| spec.default.to_value().map(|v| (spec.name.to_string(), v)))
        .collect()
}

/// Merge `updates` into `current`. A `Null` update resets the parameter to its
/// default (or unsets it). Returns the offending name and message on failure;
/// `current` is never modified.
pub fn merge(
    schema: &[ParamSpec],
    current: &Params,
    updates: &Params,
) -> Result<Params, (String, String)> {
    let mut merged = current.clone();
    for (name, value) in updates {
        let spec = schema
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| (name.clone(), "unknown parameter".to_string()))?;
        if matches!(value, ParamValue::Null) {
            match spec.default.to_value() {
                Some(default) => merged.insert(name.clone(), default),
                None => merged.remove(name),
            };
            continue;
        }
        let coerced = spec.validate(value).map_err(|e| (name.clone(), e))?;
        merged.insert(name.clone(), coerced);
    }
    Ok(merged)
}

/// Name of the first required parameter missing from `params`.
pub fn missing_required<'a>(schema: &'a [ParamSpec], params: &Params) -> Option<&'a str> {
    schema
        .iter()
        .find(|s| s.required && !params.contains_key(s.name))
        .map(|s| s.name)
}
