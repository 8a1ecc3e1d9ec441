//! Rhai sandbox implementation
//!
//! Scripts are compiled once per source text on a shared compiler engine.
//! Each run gets its own engine so the interrupt hook belongs to exactly one
//! evaluation.

use super::{CompiledScript, ScriptCache, ScriptError, SharedScriptCache};
use crate::config::ScriptLimits;
use crate::engine::Interrupt;
use crate::frame::{Column, Frame, Value};
use crate::pipeline::param::ParamValue;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Scope};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

/// Sandbox for custom script nodes
pub struct ScriptSandbox {
    limits: ScriptLimits,
    /// Engine used only for compilation
    compiler: Engine,
    cache: SharedScriptCache,
}

impl ScriptSandbox {
    pub fn new(limits: ScriptLimits) -> Self {
        let mut compiler = Engine::new();
        Self::configure_engine(&mut compiler, &limits);

        Self {
            limits,
            compiler,
            cache: Arc::new(RwLock::new(ScriptCache::new())),
        }
    }

    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }

    /// Configure a Rhai engine with the sandbox limits and helper functions
    fn configure_engine(engine: &mut Engine, limits: &ScriptLimits) {
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);

        // ===== Table helpers =====

        engine.register_fn(
            "column",
            |rows: Array, name: &str| -> Result<Array, Box<EvalAltResult>> {
                rows.iter()
                    .enumerate()
                    .map(|(i, row)| match row.read_lock::<Map>() {
                        Some(map) => Ok(map.get(name).cloned().unwrap_or(Dynamic::UNIT)),
                        None => Err(format!("row {} is not a map", i).into()),
                    })
                    .collect()
            },
        );

        engine.register_fn("columns", |rows: Array| -> Array {
            rows.first()
                .and_then(|row| row.read_lock::<Map>().map(|m| m.keys().cloned().collect::<Vec<_>>()))
                .unwrap_or_default()
                .into_iter()
                .map(|k| Dynamic::from(k.to_string()))
                .collect()
        });

        engine.register_fn("is_null", |x: Dynamic| x.is_unit());

        // ===== Mathematical Functions =====

        engine.register_fn("abs", |x: f64| x.abs());
        engine.register_fn("sqrt", |x: f64| x.sqrt());
        engine.register_fn("pow", |x: f64, y: f64| x.powf(y));
        engine.register_fn("exp", |x: f64| x.exp());
        engine.register_fn("ln", |x: f64| x.ln());
        engine.register_fn("log10", |x: f64| x.log10());
        engine.register_fn("floor", |x: f64| x.floor());
        engine.register_fn("ceil", |x: f64| x.ceil());
        engine.register_fn("round", |x: f64| x.round());
        engine.register_fn("clamp", |x: f64, min: f64, max: f64| x.clamp(min, max));
        engine.register_fn("lerp", |a: f64, b: f64, t: f64| a + (b - a) * t);
    }

    /// Compile a script, reusing a cached AST for identical sources
    pub fn compile(&self, source: &str) -> Result<CompiledScript, ScriptError> {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.get_or_compile(&self.compiler, source)
    }

    /// Compile (or fetch) and execute `source`.
    pub fn run(
        &self,
        source: &str,
        inputs: &[Arc<Frame>],
        params: &BTreeMap<String, ParamValue>,
        interrupt: &Interrupt,
    ) -> Result<Frame, ScriptError> {
        let script = self.compile(source)?;
        self.execute(&script, inputs, params, interrupt)
    }

    /// Execute a compiled script against the node's inputs and parameters.
    pub fn execute(
        &self,
        script: &CompiledScript,
        inputs: &[Arc<Frame>],
        params: &BTreeMap<String, ParamValue>,
        interrupt: &Interrupt,
    ) -> Result<Frame, ScriptError> {
        if interrupt.is_triggered() {
            return Err(ScriptError::Interrupted);
        }

        let mut engine = Engine::new();
        Self::configure_engine(&mut engine, &self.limits);
        let flag = interrupt.clone();
        engine.on_progress(move |_ops| {
            if flag.is_triggered() {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        let tables: Array = inputs
            .iter()
            .map(|frame| Dynamic::from_array(frame_to_rows(frame)))
            .collect();
        let df = tables
            .first()
            .cloned()
            .unwrap_or_else(|| Dynamic::from_array(Array::new()));

        let mut scope = Scope::new();
        scope.push("df", df);
        scope.push("inputs", tables);
        scope.push_constant("params", params_to_map(params));

        let result = engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, script.ast())
            .map_err(|err| match *err {
                EvalAltResult::ErrorTerminated(..) => ScriptError::Interrupted,
                other => ScriptError::Runtime(other.to_string()),
            })?;

        let preferred: Vec<String> = inputs
            .first()
            .map(|f| f.column_names().into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        let frame = dynamic_to_frame(result, &preferred)?;
        tracing::debug!(
            "Script produced {} rows x {} columns",
            frame.height(),
            frame.width()
        );
        Ok(frame)
    }
}

// ==================== Conversions ====================

fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::Text(s) => Dynamic::from(s.clone()),
    }
}

fn dynamic_to_value(cell: &Dynamic) -> Result<Value, String> {
    if cell.is_unit() {
        return Ok(Value::Null);
    }
    if let Ok(b) = cell.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = cell.as_int() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = cell.as_float() {
        return Ok(Value::Float(f));
    }
    if let Ok(c) = cell.as_char() {
        return Ok(Value::Text(c.to_string()));
    }
    if cell.is_string() {
        return cell
            .clone()
            .into_string()
            .map(Value::Text)
            .map_err(|t| format!("unsupported cell type {}", t));
    }
    Err(format!("unsupported cell type {}", cell.type_name()))
}

fn frame_to_rows(frame: &Frame) -> Array {
    (0..frame.height())
        .map(|row| {
            let map: Map = frame
                .columns()
                .iter()
                .map(|c| (c.name.as_str().into(), value_to_dynamic(&c.values[row])))
                .collect();
            Dynamic::from_map(map)
        })
        .collect()
}

fn param_to_dynamic(value: &ParamValue) -> Dynamic {
    match value {
        ParamValue::Null => Dynamic::UNIT,
        ParamValue::Bool(b) => Dynamic::from(*b),
        ParamValue::Int(i) => Dynamic::from(*i),
        ParamValue::Float(f) => Dynamic::from(*f),
        ParamValue::Text(s) => Dynamic::from(s.clone()),
        ParamValue::List(items) => Dynamic::from_array(items.iter().map(param_to_dynamic).collect()),
    }
}

fn params_to_map(params: &BTreeMap<String, ParamValue>) -> Map {
    params
        .iter()
        .map(|(k, v)| (k.as_str().into(), param_to_dynamic(v)))
        .collect()
}

/// Order output columns: known input columns first, then the rest by name.
fn order_columns(keys: BTreeSet<String>, preferred: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = preferred
        .iter()
        .filter(|p| keys.contains(*p))
        .cloned()
        .collect();
    ordered.extend(keys.into_iter().filter(|k| !preferred.contains(k)));
    ordered
}

fn dynamic_to_frame(result: Dynamic, preferred: &[String]) -> Result<Frame, ScriptError> {
    let invalid = ScriptError::InvalidResult;

    if result.is_array() {
        let rows = result
            .try_cast::<Array>()
            .ok_or_else(|| invalid("expected an array".into()))?;
        if rows.is_empty() {
            let columns = preferred.iter().map(|n| Column::new(n.clone(), Vec::new())).collect();
            return Frame::new(columns).map_err(|e| invalid(e.to_string()));
        }

        let mut maps = Vec::with_capacity(rows.len());
        let mut keys = BTreeSet::new();
        for (i, row) in rows.into_iter().enumerate() {
            let map = row
                .try_cast::<Map>()
                .ok_or_else(|| invalid(format!("row {} is not a map", i)))?;
            keys.extend(map.keys().map(|k| k.to_string()));
            maps.push(map);
        }

        let names = order_columns(keys, preferred);
        let mut columns: Vec<Column> = names
            .iter()
            .map(|n| Column::new(n.clone(), Vec::with_capacity(maps.len())))
            .collect();
        for (i, map) in maps.iter().enumerate() {
            for column in columns.iter_mut() {
                let value = match map.get(column.name.as_str()) {
                    Some(cell) => dynamic_to_value(cell)
                        .map_err(|e| invalid(format!("row {}, column '{}': {}", i, column.name, e)))?,
                    None => Value::Null,
                };
                column.values.push(value);
            }
        }
        return Frame::new(columns).map_err(|e| invalid(e.to_string()));
    }

    if result.is_map() {
        let map = result
            .try_cast::<Map>()
            .ok_or_else(|| invalid("expected a map".into()))?;
        let names = order_columns(map.keys().map(|k| k.to_string()).collect(), preferred);
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let cells = map
                .get(name.as_str())
                .and_then(|d| d.clone().try_cast::<Array>())
                .ok_or_else(|| invalid(format!("column '{}' is not an array", name)))?;
            let values = cells
                .iter()
                .map(dynamic_to_value)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| invalid(format!("column '{}': {}", name, e)))?;
            columns.push(Column::new(name, values));
        }
        return Frame::new(columns).map_err(|e| invalid(e.to_string()));
    }

    Err(invalid(format!(
        "expected an array of row maps or a map of column arrays, got {}",
        result.type_name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::builtins;
    use std::time::Duration;

    fn sandbox() -> ScriptSandbox {
        ScriptSandbox::new(ScriptLimits::default())
    }

    fn orders() -> Arc<Frame> {
        Arc::new(
            Frame::from_rows(
                &["id", "amount"],
                vec![
                    vec![Value::Int(1), Value::Float(12.5)],
                    vec![Value::Int(2), Value::Float(3.0)],
                    vec![Value::Int(3), Value::Null],
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_passthrough() {
        let out = sandbox()
            .run(builtins::PASSTHROUGH, &[orders()], &BTreeMap::new(), &Interrupt::new())
            .unwrap();
        assert_eq!(out, *orders());
    }

    #[test]
    fn test_filter_with_params() {
        let mut params = BTreeMap::new();
        params.insert("threshold".to_string(), ParamValue::Float(5.0));
        let out = sandbox()
            .run(
                "df.filter(|r| !is_null(r.amount) && r.amount > params.threshold)",
                &[orders()],
                &params,
                &Interrupt::new(),
            )
            .unwrap();
        assert_eq!(out.height(), 1);
        assert_eq!(out.column_names(), vec!["id", "amount"]);
    }

    #[test]
    fn test_column_map_result() {
        let out = sandbox()
            .run(
                r#"#{ ids: column(df, "id"), tag: ["a", "b", "c"] }"#,
                &[orders()],
                &BTreeMap::new(),
                &Interrupt::new(),
            )
            .unwrap();
        assert_eq!(out.column_names(), vec!["ids", "tag"]);
        assert_eq!(out.row(2), vec![Value::Int(3), Value::Text("c".into())]);
    }

    #[test]
    fn test_concat_inputs() {
        let out = sandbox()
            .run(
                builtins::CONCAT_INPUTS,
                &[orders(), orders()],
                &BTreeMap::new(),
                &Interrupt::new(),
            )
            .unwrap();
        assert_eq!(out.height(), 6);
    }

    #[test]
    fn test_row_numbers() {
        let out = sandbox()
            .run(builtins::ROW_NUMBERS, &[orders()], &BTreeMap::new(), &Interrupt::new())
            .unwrap();
        assert_eq!(out.column_names(), vec!["row"]);
        assert_eq!(
            out.column("row").unwrap().values,
            vec![Value::Int(0), Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn test_invalid_result() {
        let err = sandbox()
            .run("42", &[orders()], &BTreeMap::new(), &Interrupt::new())
            .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidResult(_)));

        let err = sandbox()
            .run("#{ a: [1, 2], b: [1] }", &[], &BTreeMap::new(), &Interrupt::new())
            .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidResult(_)));
    }

    #[test]
    fn test_compile_and_runtime_errors() {
        let sandbox = sandbox();
        let err = sandbox
            .run("let x = ;", &[], &BTreeMap::new(), &Interrupt::new())
            .unwrap_err();
        assert!(matches!(err, ScriptError::Compile(_)));

        let err = sandbox
            .run("throw \"boom\"", &[], &BTreeMap::new(), &Interrupt::new())
            .unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(ref m) if m.contains("boom")));
    }

    #[test]
    fn test_operation_limit() {
        let limits = ScriptLimits {
            max_operations: 1_000,
            ..ScriptLimits::default()
        };
        let err = ScriptSandbox::new(limits)
            .run("loop { }", &[], &BTreeMap::new(), &Interrupt::new())
            .unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));
    }

    #[test]
    fn test_interrupt_stops_running_script() {
        let limits = ScriptLimits {
            max_operations: 0,
            ..ScriptLimits::default()
        };
        let sandbox = ScriptSandbox::new(limits);
        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.trigger();
        });
        let err = sandbox
            .run("loop { }", &[], &BTreeMap::new(), &interrupt)
            .unwrap_err();
        handle.join().unwrap();
        assert_eq!(err, ScriptError::Interrupted);
    }

    #[test]
    fn test_compiled_scripts_are_cached() {
        let sandbox = sandbox();
        sandbox.compile("df").unwrap();
        sandbox.compile("df").unwrap();
        assert_eq!(sandbox.cache.read().unwrap().len(), 1);
    }
}
