//! SQL subset used by custom SQL nodes.
//!
//! ```sql
//! SELECT [DISTINCT] * | item [, item ...]
//! FROM input0 | input1 | ... | df
//! [WHERE condition]
//! [GROUP BY column [, column ...]]
//! [ORDER BY column [ASC|DESC] [, ...]]
//! [LIMIT n [OFFSET m]]
//! ```
//!
//! Items are column names or `FUNC(column)` / `COUNT(*)`, each with an
//! optional `AS alias`. Conditions compare a column with a literal
//! (`= != <> < <= > >=`, `LIKE`, `IS [NOT] NULL`) and combine with `AND`,
//! `OR`, `NOT` and parentheses.
//!
//! A query is compiled into a [`LazyPlan`] over the node's input plans; it
//! never sees anything but those inputs.

use super::{AggExpr, AggFunc, CompareOp, LazyPlan, Predicate, SortKey};
use crate::frame::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SqlError {
    #[error("Syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Unknown table '{0}' (available: input0..input{1}, df)")]
    UnknownTable(String, usize),

    #[error("Unsupported query: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Symbol(&'static str),
}

fn tokenize(sql: &str) -> Result<Vec<(Token, usize)>, SqlError> {
    let chars: Vec<(usize, char)> = sql.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().map(|(_, c)| c).collect();
            tokens.push((Token::Ident(ident), pos));
            continue;
        }
        if c == '"' {
            // Quoted identifier.
            i += 1;
            let start = i;
            while i < chars.len() && chars[i].1 != '"' {
                i += 1;
            }
            if i == chars.len() {
                return Err(syntax(pos, "unterminated quoted identifier"));
            }
            let ident: String = chars[start..i].iter().map(|(_, c)| c).collect();
            tokens.push((Token::Ident(ident), pos));
            i += 1;
            continue;
        }
        if c.is_ascii_digit()
            || (c == '-' && chars.get(i + 1).map_or(false, |(_, n)| n.is_ascii_digit()))
        {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            let number: String = chars[start..i].iter().map(|(_, c)| c).collect();
            tokens.push((Token::Number(number), pos));
            continue;
        }
        if c == '\'' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(syntax(pos, "unterminated string literal")),
                    Some((_, '\'')) if chars.get(i + 1).map(|(_, c)| *c) == Some('\'') => {
                        text.push('\'');
                        i += 2;
                    }
                    Some((_, '\'')) => {
                        i += 1;
                        break;
                    }
                    Some((_, ch)) => {
                        text.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push((Token::Str(text), pos));
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let symbol = match (c, next) {
            ('<', Some('=')) => "<=",
            ('>', Some('=')) => ">=",
            ('!', Some('=')) => "!=",
            ('<', Some('>')) => "<>",
            ('=', Some('=')) => "==",
            (',', _) => ",",
            ('(', _) => "(",
            (')', _) => ")",
            ('*', _) => "*",
            ('=', _) => "=",
            ('<', _) => "<",
            ('>', _) => ">",
            (';', _) => ";",
            _ => return Err(syntax(pos, &format!("unexpected character '{}'", c))),
        };
        i += symbol.len();
        tokens.push((Token::Symbol(symbol), pos));
    }
    Ok(tokens)
}

fn syntax(position: usize, message: &str) -> SqlError {
    SqlError::Syntax {
        position,
        message: message.to_string(),
    }
}

// ==================== AST ====================

#[derive(Debug, Clone, PartialEq)]
enum SelectItem {
    Column { name: String, alias: Option<String> },
    Aggregate(AggExpr),
}

#[derive(Debug, Clone, PartialEq)]
struct Query {
    distinct: bool,
    /// Empty means `*`.
    items: Vec<SelectItem>,
    table: String,
    condition: Option<Predicate>,
    group_by: Vec<String>,
    order_by: Vec<SortKey>,
    limit: Option<usize>,
    offset: usize,
}

/// Deepest `NOT` / parenthesis nesting accepted in a condition.
pub const MAX_NESTING: usize = 128;

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn new(sql: &str) -> Result<Self, SqlError> {
        Ok(Self {
            tokens: tokenize(sql)?,
            pos: 0,
            end: sql.len(),
            depth: 0,
        })
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, p)| *p).unwrap_or(self.end)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), SqlError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(syntax(self.offset(), &format!("expected {}", keyword)))
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), SqlError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(syntax(self.offset(), &format!("expected '{}'", symbol)))
        }
    }

    fn identifier(&mut self) -> Result<String, SqlError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Ident(name)) if !is_reserved(&name) => Ok(name),
            _ => Err(syntax(offset, "expected identifier")),
        }
    }

    fn integer(&mut self) -> Result<usize, SqlError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => n
                .parse()
                .map_err(|_| syntax(offset, "expected non-negative integer")),
            _ => Err(syntax(offset, "expected integer")),
        }
    }

    fn query(&mut self) -> Result<Query, SqlError> {
        self.expect_keyword("SELECT")?;
        let distinct = self.eat_keyword("DISTINCT");

        let mut items = Vec::new();
        if !self.eat_symbol("*") {
            loop {
                items.push(self.select_item()?);
                if !self.eat_symbol(",") {
                    break;
                }
            }
        }

        self.expect_keyword("FROM")?;
        let table = self.identifier()?;

        let condition = if self.eat_keyword("WHERE") {
            Some(self.or_expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            loop {
                group_by.push(self.identifier()?);
                if !self.eat_symbol(",") {
                    break;
                }
            }
        }

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let column = self.identifier()?;
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                order_by.push(SortKey::new(column, descending));
                if !self.eat_symbol(",") {
                    break;
                }
            }
        }

        let mut limit = None;
        let mut offset = 0;
        if self.eat_keyword("LIMIT") {
            limit = Some(self.integer()?);
        }
        if self.eat_keyword("OFFSET") {
            offset = self.integer()?;
        }
        self.eat_symbol(";");
        if self.peek().is_some() {
            return Err(syntax(self.offset(), "unexpected trailing input"));
        }

        Ok(Query {
            distinct,
            items,
            table,
            condition,
            group_by,
            order_by,
            limit,
            offset,
        })
    }

    fn select_item(&mut self) -> Result<SelectItem, SqlError> {
        let offset = self.offset();
        let name = self.identifier()?;

        let item = if self.eat_symbol("(") {
            let func = AggFunc::parse(&name)
                .ok_or_else(|| syntax(offset, &format!("unknown function '{}'", name)))?;
            let column = if self.eat_symbol("*") {
                None
            } else {
                Some(self.identifier()?)
            };
            self.expect_symbol(")")?;
            if column.is_none() && func != AggFunc::Count {
                return Err(syntax(offset, &format!("{}(*) is not supported", func.name())));
            }
            let alias = self.alias()?;
            SelectItem::Aggregate(AggExpr::new(func, column, alias))
        } else {
            SelectItem::Column {
                name,
                alias: self.alias()?,
            }
        };
        Ok(item)
    }

    fn alias(&mut self) -> Result<Option<String>, SqlError> {
        if self.eat_keyword("AS") {
            Ok(Some(self.identifier()?))
        } else {
            Ok(None)
        }
    }

    fn or_expr(&mut self) -> Result<Predicate, SqlError> {
        let mut parts = vec![self.and_expr()?];
        while self.eat_keyword("OR") {
            parts.push(self.and_expr()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Predicate::Or(parts)
        })
    }

    fn and_expr(&mut self) -> Result<Predicate, SqlError> {
        let mut parts = vec![self.unary_expr()?];
        while self.eat_keyword("AND") {
            parts.push(self.unary_expr()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Predicate::And(parts)
        })
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, SqlError>,
    ) -> Result<T, SqlError> {
        if self.depth >= MAX_NESTING {
            return Err(SqlError::Unsupported(format!(
                "condition nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn unary_expr(&mut self) -> Result<Predicate, SqlError> {
        if self.eat_keyword("NOT") {
            let inner = self.nested(Self::unary_expr)?;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        if self.eat_symbol("(") {
            let inner = self.nested(Self::or_expr)?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }

        let column = self.identifier()?;
        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            let test = Predicate::IsNull(column);
            return Ok(if negated {
                Predicate::Not(Box::new(test))
            } else {
                test
            });
        }
        if self.eat_keyword("LIKE") {
            let offset = self.offset();
            let pattern = match self.advance() {
                Some(Token::Str(s)) => s,
                _ => return Err(syntax(offset, "LIKE needs a string pattern")),
            };
            let needle = pattern.trim_matches('%');
            if needle.contains('%') || needle.contains('_') {
                return Err(SqlError::Unsupported(format!(
                    "LIKE pattern '{}' (only '%text%' is supported)",
                    pattern
                )));
            }
            return Ok(Predicate::compare(column, CompareOp::Contains, needle));
        }

        let offset = self.offset();
        let op = match self.advance() {
            Some(Token::Symbol(s)) => CompareOp::parse(s),
            _ => None,
        }
        .ok_or_else(|| syntax(offset, "expected comparison operator"))?;
        let value = self.literal()?;
        Ok(Predicate::Compare { column, op, value })
    }

    fn literal(&mut self) -> Result<Value, SqlError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => n
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| n.parse::<f64>().map(Value::Float))
                .map_err(|_| syntax(offset, "malformed number")),
            Some(Token::Str(s)) => Ok(Value::Text(s)),
            Some(Token::Ident(k)) if k.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Some(Token::Ident(k)) if k.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            Some(Token::Ident(k)) if k.eq_ignore_ascii_case("null") => Ok(Value::Null),
            _ => Err(syntax(offset, "expected literal")),
        }
    }
}

const RESERVED: &[&str] = &[
    "select", "distinct", "from", "where", "group", "order", "by", "limit", "offset", "and", "or",
    "not", "is", "null", "as", "asc", "desc", "like",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}

// ==================== Compilation ====================

fn resolve_table<'a>(name: &str, inputs: &'a [LazyPlan]) -> Result<&'a LazyPlan, SqlError> {
    let index = if name.eq_ignore_ascii_case("df") {
        Some(0)
    } else {
        name.strip_prefix("input").and_then(|n| n.parse::<usize>().ok())
    };
    index
        .and_then(|i| inputs.get(i))
        .ok_or_else(|| SqlError::UnknownTable(name.to_string(), inputs.len().saturating_sub(1)))
}

/// Compile `sql` into a plan over `inputs` (`input0`, `input1`, ... in socket
/// order; `df` aliases `input0`).
pub fn compile(sql: &str, inputs: &[LazyPlan]) -> Result<LazyPlan, SqlError> {
    let query = Parser::new(sql)?.query()?;
    let mut plan = resolve_table(&query.table, inputs)?.clone();

    if let Some(condition) = query.condition {
        plan = plan.filter(condition);
    }

    let aggregated = !query.group_by.is_empty()
        || query
            .items
            .iter()
            .any(|i| matches!(i, SelectItem::Aggregate(_)));

    if aggregated {
        if query.items.is_empty() {
            return Err(SqlError::Unsupported(
                "SELECT * cannot be combined with GROUP BY".into(),
            ));
        }
        let mut aggs = Vec::new();
        let mut output = Vec::new();
        let mut renames = Vec::new();
        for item in &query.items {
            match item {
                SelectItem::Column { name, alias } => {
                    if !query.group_by.contains(name) {
                        return Err(SqlError::Unsupported(format!(
                            "column '{}' must appear in GROUP BY or inside an aggregate",
                            name
                        )));
                    }
                    output.push(name.clone());
                    if let Some(alias) = alias {
                        renames.push((name.clone(), alias.clone()));
                    }
                }
                SelectItem::Aggregate(expr) => {
                    output.push(expr.alias.clone());
                    aggs.push(expr.clone());
                }
            }
        }
        plan = plan.aggregate(query.group_by.clone(), aggs).select(output);
        if !renames.is_empty() {
            plan = plan.rename(renames);
        }
        if query.distinct {
            plan = plan.distinct(Vec::new());
        }
        if !query.order_by.is_empty() {
            plan = plan.sort(query.order_by);
        }
    } else {
        // Sort before projecting so ORDER BY may name unselected columns;
        // aliases are mapped back to their source column.
        if !query.order_by.is_empty() {
            let keys = query
                .order_by
                .into_iter()
                .map(|key| {
                    let source = query.items.iter().find_map(|item| match item {
                        SelectItem::Column {
                            name,
                            alias: Some(alias),
                        } if *alias == key.column => Some(name.clone()),
                        _ => None,
                    });
                    SortKey::new(source.unwrap_or(key.column), key.descending)
                })
                .collect();
            plan = plan.sort(keys);
        }
        if !query.items.is_empty() {
            let mut columns = Vec::new();
            let mut renames = Vec::new();
            for item in &query.items {
                if let SelectItem::Column { name, alias } = item {
                    columns.push(name.clone());
                    if let Some(alias) = alias {
                        renames.push((name.clone(), alias.clone()));
                    }
                }
            }
            plan = plan.select(columns);
            if !renames.is_empty() {
                plan = plan.rename(renames);
            }
        }
        if query.distinct {
            plan = plan.distinct(Vec::new());
        }
    }

    if query.offset > 0 || query.limit.is_some() {
        plan = plan.slice(query.offset, query.limit.unwrap_or(usize::MAX));
    }
    Ok(plan)
}
