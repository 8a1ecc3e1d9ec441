//! Source and constant nodes.
//!
//! Sources produce tables from their parameters only; constants produce a
//! single scalar for scalar inputs such as row counts.

use super::{TABLE_OUT, VALUE_OUT};
use crate::engine::LazyPlan;
use crate::frame::{Frame, Value};
use crate::pipeline::error::ExecutionResult;
use crate::pipeline::node::{BuildContext, Operation};
use crate::pipeline::node_type::{NodeDescriptor, NodeKind};
use crate::pipeline::param::{ParamDefault, ParamKind, ParamSpec, ParamValue};
use std::sync::Arc;

pub static CSV: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::SourceCsv,
    inputs: &[],
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::required("path", ParamKind::Text),
        ParamSpec::new("delimiter", ParamKind::Text, ParamDefault::Text(",")),
        ParamSpec::new("has_header", ParamKind::Bool, ParamDefault::Bool(true)),
    ],
    build: build_csv,
};

pub static TABLE: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::SourceTable,
    inputs: &[],
    outputs: TABLE_OUT,
    params: &[
        ParamSpec::required("columns", ParamKind::TextList),
        ParamSpec::new("rows", ParamKind::Rows, ParamDefault::EmptyList),
    ],
    build: build_table,
};

pub static BOOLEAN: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::ConstantBoolean,
    inputs: &[],
    outputs: VALUE_OUT,
    params: &[ParamSpec::new("value", ParamKind::Bool, ParamDefault::Bool(false))],
    build: build_constant,
};

pub static INTEGER: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::ConstantInteger,
    inputs: &[],
    outputs: VALUE_OUT,
    params: &[ParamSpec::new(
        "value",
        ParamKind::Int {
            min: None,
            max: None,
        },
        ParamDefault::Int(0),
    )],
    build: build_constant,
};

pub static DECIMAL: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::ConstantDecimal,
    inputs: &[],
    outputs: VALUE_OUT,
    params: &[ParamSpec::new("value", ParamKind::Float, ParamDefault::Float(0.0))],
    build: build_constant,
};

pub static TEXT: NodeDescriptor = NodeDescriptor {
    kind: NodeKind::ConstantText,
    inputs: &[],
    outputs: VALUE_OUT,
    params: &[ParamSpec::new("value", ParamKind::Text, ParamDefault::Text(""))],
    build: build_constant,
};

/// `","`, `";"`, `"\t"` / `"tab"`, or any other single ASCII character.
fn parse_delimiter(raw: &str) -> Option<u8> {
    match raw {
        "\\t" | "\t" | "tab" => Some(b'\t'),
        _ => match raw.as_bytes() {
            [b] if b.is_ascii() && *b != b'"' && *b != b'\n' => Some(*b),
            _ => None,
        },
    }
}

fn build_csv(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let path = ctx.non_empty_text("path")?;
    let delimiter = parse_delimiter(ctx.text("delimiter")?)
        .ok_or_else(|| ctx.invalid_param("delimiter", "must be a single ASCII character"))?;
    let has_header = ctx.bool("has_header")?;
    Ok(Operation::Plan(LazyPlan::scan_csv(path, delimiter, has_header)))
}

fn build_table(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let columns = ctx.text_list("columns")?;
    let rows: &[ParamValue] = match ctx.param("rows") {
        None => &[],
        Some(value) => value
            .as_list()
            .ok_or_else(|| ctx.invalid_param("rows", "expected a list of rows"))?,
    };

    let mut data = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let cells = row
            .as_list()
            .ok_or_else(|| ctx.invalid_param("rows", format!("row {} is not a list", i)))?;
        if cells.len() != columns.len() {
            return Err(ctx.invalid_param(
                "rows",
                format!(
                    "row {} has {} cells, expected {}",
                    i,
                    cells.len(),
                    columns.len()
                ),
            ));
        }
        let values = cells
            .iter()
            .map(|cell| {
                cell.to_value()
                    .ok_or_else(|| ctx.invalid_param("rows", format!("row {} nests a list", i)))
            })
            .collect::<ExecutionResult<Vec<Value>>>()?;
        data.push(values);
    }

    let frame =
        Frame::from_rows(&columns, data).map_err(|e| ctx.invalid_param("columns", e.to_string()))?;
    Ok(Operation::Plan(LazyPlan::frame(Arc::new(frame))))
}

fn build_constant(ctx: &BuildContext<'_>) -> ExecutionResult<Operation> {
    let value = ctx
        .param("value")
        .and_then(ParamValue::to_value)
        .ok_or_else(|| ctx.invalid_param("value", "expected a scalar"))?;
    Ok(Operation::Scalar(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ExecutionError;
    use crate::pipeline::nodes::test_support::{build, run};

    #[test]
    fn test_delimiters() {
        assert_eq!(parse_delimiter(","), Some(b','));
        assert_eq!(parse_delimiter("tab"), Some(b'\t'));
        assert_eq!(parse_delimiter(";;"), None);
        assert_eq!(parse_delimiter("\""), None);
    }

    #[test]
    fn test_csv_builds_scan() {
        let op = build(NodeKind::SourceCsv, &[("path", "data/orders.csv".into())], vec![]).unwrap();
        match op {
            Operation::Plan(LazyPlan::CsvScan {
                path,
                delimiter,
                has_header,
            }) => {
                assert_eq!(path.to_str(), Some("data/orders.csv"));
                assert_eq!(delimiter, b',');
                assert!(has_header);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_csv_blank_path_rejected() {
        let err = build(NodeKind::SourceCsv, &[("path", "  ".into())], vec![]).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidParameter { ref name, .. } if name == "path"));
    }

    #[test]
    fn test_literal_table() {
        let rows = ParamValue::List(vec![
            ParamValue::List(vec![1i64.into(), "x".into()]),
            ParamValue::List(vec![2i64.into(), ParamValue::Null]),
        ]);
        let frame = run(
            NodeKind::SourceTable,
            &[("columns", vec!["id", "name"].into()), ("rows", rows)],
            vec![],
        );
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.row(1), vec![Value::Int(2), Value::Null]);
    }

    #[test]
    fn test_literal_table_ragged_row() {
        let rows = ParamValue::List(vec![ParamValue::List(vec![1i64.into()])]);
        let err = build(
            NodeKind::SourceTable,
            &[("columns", vec!["id", "name"].into()), ("rows", rows)],
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("row 0 has 1 cells"));
    }

    #[test]
    fn test_constants() {
        match build(NodeKind::ConstantInteger, &[("value", 7i64.into())], vec![]).unwrap() {
            Operation::Scalar(v) => assert_eq!(v, Value::Int(7)),
            other => panic!("unexpected {:?}", other),
        }
        match build(NodeKind::ConstantDecimal, &[("value", 2i64.into())], vec![]).unwrap() {
            Operation::Scalar(v) => assert_eq!(v, Value::Float(2.0)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
