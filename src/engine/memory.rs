//! In-process columnar implementation of [`DataEngine`].
//!
//! Plans are evaluated bottom-up, one operator at a time. The interrupt flag
//! is polled before every operator and every [`CHECK_INTERVAL`] rows inside
//! row loops.

use super::{
    AggExpr, AggFunc, DataEngine, EngineError, EngineResult, Interrupt, JoinHow, LazyPlan,
    Predicate, SortKey,
};
use crate::frame::{Column, Frame, Value, ValueKey};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Rows processed between two interrupt polls.
pub const CHECK_INTERVAL: usize = 4096;

/// Reference engine that keeps every frame in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryEngine;

impl MemoryEngine {
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, plan: &LazyPlan, interrupt: &Interrupt) -> EngineResult<Frame> {
        interrupt.check()?;
        tracing::trace!("memory engine: {}", plan.operator());

        match plan {
            LazyPlan::Materialized(frame) => Ok(frame.as_ref().clone()),
            LazyPlan::CsvScan {
                path,
                delimiter,
                has_header,
            } => Ok(Frame::read_csv(path, *delimiter, *has_header)?),
            LazyPlan::Filter { input, predicate } => {
                let frame = self.execute(input, interrupt)?;
                filter(&frame, predicate, interrupt)
            }
            LazyPlan::Project { input, columns } => {
                Ok(self.execute(input, interrupt)?.select(columns)?)
            }
            LazyPlan::Drop { input, columns } => {
                Ok(self.execute(input, interrupt)?.drop_columns(columns)?)
            }
            LazyPlan::Rename { input, pairs } => Ok(self.execute(input, interrupt)?.rename(pairs)?),
            LazyPlan::Slice { input, offset, len } => {
                Ok(self.execute(input, interrupt)?.slice(*offset, *len))
            }
            LazyPlan::Tail { input, len } => Ok(self.execute(input, interrupt)?.tail(*len)),
            LazyPlan::Exclude { input, offset, len } => {
                let frame = self.execute(input, interrupt)?;
                let end = offset.saturating_add(*len);
                let indices: Vec<usize> = (0..frame.height())
                    .filter(|i| i < offset || *i >= end)
                    .collect();
                Ok(frame.take(&indices))
            }
            LazyPlan::DropTail { input, len } => {
                let frame = self.execute(input, interrupt)?;
                Ok(frame.head(frame.height().saturating_sub(*len)))
            }
            LazyPlan::Step {
                input,
                every,
                offset,
            } => {
                if *every == 0 {
                    return Err(EngineError::InvalidPlan("step must be at least 1".into()));
                }
                let frame = self.execute(input, interrupt)?;
                let indices: Vec<usize> = (*offset..frame.height()).step_by(*every).collect();
                Ok(frame.take(&indices))
            }
            LazyPlan::Distinct { input, subset } => {
                let frame = self.execute(input, interrupt)?;
                distinct(&frame, subset, interrupt)
            }
            LazyPlan::Duplicated { input, subset } => {
                let frame = self.execute(input, interrupt)?;
                duplicated(&frame, subset, interrupt)
            }
            LazyPlan::Sort { input, keys } => {
                let frame = self.execute(input, interrupt)?;
                sort(&frame, keys)
            }
            LazyPlan::Join {
                left,
                right,
                left_on,
                right_on,
                how,
            } => {
                let l = self.execute(left, interrupt)?;
                let r = self.execute(right, interrupt)?;
                join(&l, &r, left_on, right_on, *how, interrupt)
            }
            LazyPlan::Aggregate {
                input,
                group_by,
                aggs,
            } => {
                let frame = self.execute(input, interrupt)?;
                aggregate(&frame, group_by, aggs, interrupt)
            }
            LazyPlan::Pivot {
                input,
                index,
                columns,
                values,
                agg,
            } => {
                let frame = self.execute(input, interrupt)?;
                pivot(&frame, index, columns, values, *agg, interrupt)
            }
            LazyPlan::Union { inputs } => {
                let frames = inputs
                    .iter()
                    .map(|p| self.execute(p, interrupt))
                    .collect::<EngineResult<Vec<_>>>()?;
                union(&frames)
            }
        }
    }
}

impl DataEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn collect(
        &self,
        plan: &LazyPlan,
        limit: Option<usize>,
        interrupt: &Interrupt,
    ) -> EngineResult<Frame> {
        // Cheap limit push-down for the common preview case.
        let frame = match (plan, limit) {
            (LazyPlan::Materialized(frame), Some(n)) => frame.head(n),
            _ => self.execute(plan, interrupt)?,
        };
        Ok(match limit {
            Some(n) if frame.height() > n => frame.head(n),
            _ => frame,
        })
    }

    fn estimate_size(&self, frame: &Frame) -> usize {
        frame.estimated_bytes()
    }
}

// ==================== Operators ====================

fn column_values<'a>(frame: &'a Frame, name: &str) -> EngineResult<&'a [Value]> {
    frame
        .column(name)
        .map(|c| c.values.as_slice())
        .map_err(|_| EngineError::ColumnNotFound(name.to_string()))
}

/// Predicate with column references resolved against one frame.
enum Bound<'a> {
    Compare {
        values: &'a [Value],
        op: super::CompareOp,
        literal: &'a Value,
    },
    IsNull(&'a [Value]),
    Not(Box<Bound<'a>>),
    And(Vec<Bound<'a>>),
    Or(Vec<Bound<'a>>),
}

impl<'a> Bound<'a> {
    fn bind(predicate: &'a Predicate, frame: &'a Frame) -> EngineResult<Self> {
        Ok(match predicate {
            Predicate::Compare { column, op, value } => Bound::Compare {
                values: column_values(frame, column)?,
                op: *op,
                literal: value,
            },
            Predicate::IsNull(column) => Bound::IsNull(column_values(frame, column)?),
            Predicate::Not(inner) => Bound::Not(Box::new(Bound::bind(inner, frame)?)),
            Predicate::And(parts) => Bound::And(
                parts
                    .iter()
                    .map(|p| Bound::bind(p, frame))
                    .collect::<EngineResult<_>>()?,
            ),
            Predicate::Or(parts) => Bound::Or(
                parts
                    .iter()
                    .map(|p| Bound::bind(p, frame))
                    .collect::<EngineResult<_>>()?,
            ),
        })
    }

    fn matches(&self, row: usize) -> bool {
        match self {
            Bound::Compare {
                values,
                op,
                literal,
            } => op.apply(&values[row], literal),
            Bound::IsNull(values) => values[row].is_null(),
            Bound::Not(inner) => !inner.matches(row),
            Bound::And(parts) => parts.iter().all(|p| p.matches(row)),
            Bound::Or(parts) => parts.iter().any(|p| p.matches(row)),
        }
    }
}

fn filter(frame: &Frame, predicate: &Predicate, interrupt: &Interrupt) -> EngineResult<Frame> {
    let bound = Bound::bind(predicate, frame)?;
    let mut keep = Vec::new();
    for row in 0..frame.height() {
        if row % CHECK_INTERVAL == 0 {
            interrupt.check()?;
        }
        if bound.matches(row) {
            keep.push(row);
        }
    }
    Ok(frame.take(&keep))
}

fn row_key(columns: &[&[Value]], row: usize) -> Vec<ValueKey> {
    columns.iter().map(|c| c[row].key()).collect()
}

fn resolve_columns<'a, S: AsRef<str>>(
    frame: &'a Frame,
    names: &[S],
) -> EngineResult<Vec<&'a [Value]>> {
    names
        .iter()
        .map(|n| column_values(frame, n.as_ref()))
        .collect()
}

fn key_columns(subset: &[String], frame: &Frame) -> Vec<String> {
    if subset.is_empty() {
        frame.column_names().into_iter().map(str::to_string).collect()
    } else {
        subset.to_vec()
    }
}

fn distinct(frame: &Frame, subset: &[String], interrupt: &Interrupt) -> EngineResult<Frame> {
    let names = key_columns(subset, frame);
    let columns = resolve_columns(frame, &names)?;
    let mut seen = HashSet::new();
    let mut keep = Vec::new();
    for row in 0..frame.height() {
        if row % CHECK_INTERVAL == 0 {
            interrupt.check()?;
        }
        if seen.insert(row_key(&columns, row)) {
            keep.push(row);
        }
    }
    Ok(frame.take(&keep))
}

fn duplicated(frame: &Frame, subset: &[String], interrupt: &Interrupt) -> EngineResult<Frame> {
    let names = key_columns(subset, frame);
    let columns = resolve_columns(frame, &names)?;
    let mut counts: HashMap<Vec<ValueKey>, usize> = HashMap::new();
    let mut keys = Vec::with_capacity(frame.height());
    for row in 0..frame.height() {
        if row % CHECK_INTERVAL == 0 {
            interrupt.check()?;
        }
        let key = row_key(&columns, row);
        *counts.entry(key.clone()).or_default() += 1;
        keys.push(key);
    }
    let keep: Vec<usize> = keys
        .iter()
        .enumerate()
        .filter(|(_, key)| counts.get(*key).is_some_and(|n| *n > 1))
        .map(|(row, _)| row)
        .collect();
    Ok(frame.take(&keep))
}

fn sort(frame: &Frame, keys: &[SortKey]) -> EngineResult<Frame> {
    let columns = keys
        .iter()
        .map(|k| column_values(frame, &k.column).map(|v| (v, k.descending)))
        .collect::<EngineResult<Vec<_>>>()?;
    let mut indices: Vec<usize> = (0..frame.height()).collect();
    indices.sort_by(|&a, &b| {
        for (values, descending) in &columns {
            let ord = values[a].total_cmp(&values[b]);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(frame.take(&indices))
}

fn join(
    left: &Frame,
    right: &Frame,
    left_on: &[String],
    right_on: &[String],
    how: JoinHow,
    interrupt: &Interrupt,
) -> EngineResult<Frame> {
    if left_on.is_empty() || left_on.len() != right_on.len() {
        return Err(EngineError::InvalidPlan(format!(
            "join needs matching key lists, got {} left and {} right",
            left_on.len(),
            right_on.len()
        )));
    }
    let left_keys = resolve_columns(left, left_on)?;
    let right_keys = resolve_columns(right, right_on)?;

    let mut index: HashMap<Vec<ValueKey>, Vec<usize>> = HashMap::new();
    for row in 0..right.height() {
        if right_keys.iter().any(|c| c[row].is_null()) {
            continue;
        }
        index.entry(row_key(&right_keys, row)).or_default().push(row);
    }

    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
    let mut matched_right = vec![false; right.height()];
    for row in 0..left.height() {
        if row % CHECK_INTERVAL == 0 {
            interrupt.check()?;
        }
        let has_null = left_keys.iter().any(|c| c[row].is_null());
        let matches = if has_null {
            None
        } else {
            index.get(&row_key(&left_keys, row))
        };
        match matches {
            Some(rows) => {
                for &r in rows {
                    matched_right[r] = true;
                    pairs.push((Some(row), Some(r)));
                }
            }
            None if how != JoinHow::Inner => pairs.push((Some(row), None)),
            None => {}
        }
    }
    if how == JoinHow::Outer {
        for (r, matched) in matched_right.iter().enumerate() {
            if !matched {
                pairs.push((None, Some(r)));
            }
        }
    }

    let mut out = Vec::new();
    let mut names: HashSet<String> = HashSet::new();
    for column in left.columns() {
        // Unmatched right rows still fill the shared key columns.
        let key_source = left_on
            .iter()
            .position(|k| *k == column.name)
            .and_then(|i| right.column(&right_on[i]).ok());
        let values = pairs
            .iter()
            .map(|(l, r)| match (l, r, key_source) {
                (Some(l), _, _) => column.values[*l].clone(),
                (None, Some(r), Some(src)) => src.values[*r].clone(),
                _ => Value::Null,
            })
            .collect();
        names.insert(column.name.clone());
        out.push(Column::new(column.name.clone(), values));
    }
    for column in right.columns() {
        if right_on.contains(&column.name) {
            continue;
        }
        let mut name = column.name.clone();
        while names.contains(&name) {
            name.push_str("_right");
        }
        let values = pairs
            .iter()
            .map(|(_, r)| r.map(|r| column.values[r].clone()).unwrap_or_default())
            .collect();
        names.insert(name.clone());
        out.push(Column::new(name, values));
    }
    Ok(Frame::new(out)?)
}

/// Group rows by key, keeping groups in first-appearance order.
fn group_rows(
    frame: &Frame,
    by: &[String],
    interrupt: &Interrupt,
) -> EngineResult<(Vec<usize>, Vec<Vec<usize>>)> {
    let columns = resolve_columns(frame, by)?;
    if columns.is_empty() {
        return Ok((vec![0], vec![(0..frame.height()).collect()]));
    }
    let mut slots: HashMap<Vec<ValueKey>, usize> = HashMap::new();
    let mut firsts = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for row in 0..frame.height() {
        if row % CHECK_INTERVAL == 0 {
            interrupt.check()?;
        }
        let slot = *slots.entry(row_key(&columns, row)).or_insert_with(|| {
            firsts.push(row);
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(row);
    }
    Ok((firsts, groups))
}

fn aggregate(
    frame: &Frame,
    group_by: &[String],
    aggs: &[AggExpr],
    interrupt: &Interrupt,
) -> EngineResult<Frame> {
    let (firsts, groups) = group_rows(frame, group_by, interrupt)?;

    let mut out = Vec::with_capacity(group_by.len() + aggs.len());
    if !group_by.is_empty() {
        for name in group_by {
            let values = column_values(frame, name)?;
            out.push(Column::new(
                name.clone(),
                firsts.iter().map(|&r| values[r].clone()).collect(),
            ));
        }
    }
    for agg in aggs {
        let (source, name) = match &agg.column {
            Some(c) => (Some(column_values(frame, c)?), c.as_str()),
            None => (None, "*"),
        };
        let values = groups
            .iter()
            .map(|rows| reduce(agg.func, name, source, rows))
            .collect::<EngineResult<Vec<_>>>()?;
        out.push(Column::new(agg.alias.clone(), values));
    }
    Ok(Frame::new(out)?)
}

/// Apply one aggregate function to the given rows of a column. Nulls are
/// ignored by every function except `count(*)`.
fn reduce(
    func: AggFunc,
    column: &str,
    source: Option<&[Value]>,
    rows: &[usize],
) -> EngineResult<Value> {
    let Some(values) = source else {
        return match func {
            AggFunc::Count => Ok(Value::Int(rows.len() as i64)),
            _ => Err(EngineError::InvalidPlan(format!(
                "{} needs a column",
                func.name()
            ))),
        };
    };
    let present = || rows.iter().map(|&r| &values[r]).filter(|v| !v.is_null());

    let numeric = |v: &Value| -> EngineResult<f64> {
        v.as_f64().ok_or_else(|| EngineError::TypeMismatch {
            column: column.to_string(),
            message: format!("{} needs numbers, found {}", func.name(), v.type_name()),
        })
    };

    Ok(match func {
        AggFunc::Count => Value::Int(present().count() as i64),
        AggFunc::Sum => {
            if present().all(|v| matches!(v, Value::Int(_))) {
                Value::Int(present().filter_map(Value::as_i64).sum())
            } else {
                let mut total = 0.0;
                for v in present() {
                    total += numeric(v)?;
                }
                Value::Float(total)
            }
        }
        AggFunc::Mean => {
            let mut total = 0.0;
            let mut n = 0usize;
            for v in present() {
                total += numeric(v)?;
                n += 1;
            }
            if n == 0 {
                Value::Null
            } else {
                Value::Float(total / n as f64)
            }
        }
        AggFunc::Min => present().min_by(|a, b| a.total_cmp(b)).cloned().unwrap_or_default(),
        AggFunc::Max => present().max_by(|a, b| a.total_cmp(b)).cloned().unwrap_or_default(),
        AggFunc::First => rows.first().map(|&r| values[r].clone()).unwrap_or_default(),
        AggFunc::Last => rows.last().map(|&r| values[r].clone()).unwrap_or_default(),
        AggFunc::NUnique => {
            let unique: HashSet<ValueKey> = present().map(Value::key).collect();
            Value::Int(unique.len() as i64)
        }
    })
}

fn pivot(
    frame: &Frame,
    index: &[String],
    columns: &str,
    values: &str,
    agg: AggFunc,
    interrupt: &Interrupt,
) -> EngineResult<Frame> {
    let pivot_values = column_values(frame, columns)?;
    let measure = column_values(frame, values)?;
    let (firsts, groups) = group_rows(frame, index, interrupt)?;

    // Output columns follow first appearance of each pivot value.
    let mut headers: Vec<(ValueKey, String)> = Vec::new();
    for value in pivot_values {
        let key = value.key();
        if !headers.iter().any(|(k, _)| *k == key) {
            headers.push((key, value.to_string()));
        }
    }

    let mut out = Vec::new();
    for name in index {
        let source = column_values(frame, name)?;
        out.push(Column::new(
            name.clone(),
            firsts.iter().map(|&r| source[r].clone()).collect(),
        ));
    }
    for (key, header) in &headers {
        interrupt.check()?;
        let cells = groups
            .iter()
            .map(|rows| {
                let selected: Vec<usize> = rows
                    .iter()
                    .copied()
                    .filter(|&r| pivot_values[r].key() == *key)
                    .collect();
                if selected.is_empty() {
                    Ok(Value::Null)
                } else {
                    reduce(agg, values, Some(measure), &selected)
                }
            })
            .collect::<EngineResult<Vec<_>>>()?;
        out.push(Column::new(header.clone(), cells));
    }
    Ok(Frame::new(out)?)
}

fn union(frames: &[Frame]) -> EngineResult<Frame> {
    let mut names: Vec<String> = Vec::new();
    for frame in frames {
        for name in frame.column_names() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    let total: usize = frames.iter().map(Frame::height).sum();
    let columns = names
        .into_iter()
        .map(|name| {
            let mut values = Vec::with_capacity(total);
            for frame in frames {
                match frame.column(&name) {
                    Ok(column) => values.extend(column.values.iter().cloned()),
                    Err(_) => values.extend(std::iter::repeat(Value::Null).take(frame.height())),
                }
            }
            Column::new(name, values)
        })
        .collect();
    Ok(Frame::new(columns)?)
}
