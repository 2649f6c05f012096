//! Statement execution for the in-memory engine.
//!
//! Statements are parsed with the PostgreSQL dialect of `sqlparser` and
//! lowered into a small [`Statement`] tree. The supported subset:
//!
//! ```text
//! CREATE TABLE [IF NOT EXISTS] name ( column type ... , ... )
//! DROP TABLE [IF EXISTS] name [, ...]
//! INSERT INTO name [( column , ... )] VALUES ( expr , ... ) [, ( ... )]
//! UPDATE name SET column = expr [, ...] [WHERE expr]
//! DELETE FROM name [WHERE expr]
//! SELECT item , ... [FROM name] [WHERE expr] [LIMIT n]
//! ```
//!
//! A select item is `*`, an expression with an optional alias, or
//! `count(*)` / `count(expr)`. Expressions cover literals, column
//! references, arithmetic, comparison, `||`, `AND`/`OR`/`NOT` and
//! `IS [NOT] NULL`. Values are stored in text form; comparisons are
//! numeric when both sides parse as numbers.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::{Parser as SqlParser, ParserError};

use crate::error::{EngineError, EngineErrorKind, EngineResult};
use crate::spi::{SpiOutcome, SpiStatus};

/// A single value; `None` is SQL NULL.
pub(crate) type Datum = Option<String>;

/// A stored row.
pub(crate) type Row = Vec<Datum>;

/// A table of text values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Tables of one database, by name.
pub(crate) type Tables = BTreeMap<String, Table>;

/// Rows produced by a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

// =============================================================================
// Errors
// =============================================================================

fn syntax_error(err: ParserError) -> EngineError {
    let raw = match err {
        ParserError::TokenizerError(message) | ParserError::ParserError(message) => message,
        other => other.to_string(),
    };
    let message = match raw.split_once("found: ") {
        Some((_, rest)) => {
            let near = rest.split(" at Line").next().unwrap_or(rest).trim();
            if near == "EOF" {
                "syntax error at end of input".to_string()
            } else {
                format!("syntax error at or near \"{}\"", near)
            }
        }
        None => format!("syntax error: {}", raw),
    };
    EngineError::error(EngineErrorKind::Syntax, message).with_sqlstate("42601")
}

fn unsupported(what: impl fmt::Display) -> EngineError {
    EngineError::error(
        EngineErrorKind::FeatureNotSupported,
        format!("{} is not supported", what),
    )
    .with_sqlstate("0A000")
}

fn data_error(message: impl Into<String>, sqlstate: &'static str) -> EngineError {
    EngineError::error(EngineErrorKind::DataException, message).with_sqlstate(sqlstate)
}

fn undefined_table(name: &str) -> EngineError {
    EngineError::error(
        EngineErrorKind::UndefinedObject,
        format!("relation \"{}\" does not exist", name),
    )
    .with_sqlstate("42P01")
}

fn undefined_column(name: &str) -> EngineError {
    EngineError::error(
        EngineErrorKind::UndefinedObject,
        format!("column \"{}\" does not exist", name),
    )
    .with_sqlstate("42703")
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Compare(CompareOp),
    Arith(ArithOp),
    Concat,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expr {
    Literal(Datum),
    Column(String),
    Negate(Box<Expr>),
    Not(Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
}

/// The row an expression is evaluated against.
struct Scope<'a> {
    columns: &'a [String],
    row: &'a [Datum],
}

impl Scope<'static> {
    const EMPTY: Scope<'static> = Scope {
        columns: &[],
        row: &[],
    };
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn parse(text: &str) -> Option<Number> {
        let text = text.trim();
        if let Ok(i) = text.parse::<i64>() {
            return Some(Number::Int(i));
        }
        text.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Number::Float)
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn render(self) -> String {
        match self {
            Number::Int(i) => i.to_string(),
            Number::Float(f) => f.to_string(),
        }
    }
}

fn numeric(text: &str) -> EngineResult<Number> {
    Number::parse(text).ok_or_else(|| {
        data_error(
            format!("invalid input syntax for type numeric: \"{}\"", text),
            "22P02",
        )
    })
}

fn truth(text: &str) -> EngineResult<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "on" | "yes" | "1" => Ok(true),
        "f" | "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(data_error(
            format!("invalid input syntax for type boolean: \"{}\"", text),
            "22P02",
        )),
    }
}

fn render_bool(value: bool) -> String {
    let text = if value { "t" } else { "f" };
    text.to_string()
}

fn compare(left: &str, right: &str) -> Ordering {
    match (Number::parse(left), Number::parse(right)) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => a.cmp(&b),
        (Some(a), Some(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => left.cmp(right),
    }
}

fn arithmetic(op: ArithOp, left: &str, right: &str) -> EngineResult<String> {
    let out_of_range = || data_error("integer out of range", "22003");
    let division_by_zero = || data_error("division by zero", "22012");

    match (numeric(left)?, numeric(right)?) {
        (Number::Int(a), Number::Int(b)) => {
            let value = match op {
                ArithOp::Plus => a.checked_add(b),
                ArithOp::Minus => a.checked_sub(b),
                ArithOp::Multiply => a.checked_mul(b),
                ArithOp::Divide | ArithOp::Modulo if b == 0 => return Err(division_by_zero()),
                ArithOp::Divide => a.checked_div(b),
                ArithOp::Modulo => a.checked_rem(b),
            };
            value.map(|v| v.to_string()).ok_or_else(out_of_range)
        }
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            let value = match op {
                ArithOp::Plus => a + b,
                ArithOp::Minus => a - b,
                ArithOp::Multiply => a * b,
                ArithOp::Divide | ArithOp::Modulo if b == 0.0 => return Err(division_by_zero()),
                ArithOp::Divide => a / b,
                ArithOp::Modulo => a % b,
            };
            Ok(Number::Float(value).render())
        }
    }
}

/// Three-valued AND (`decisive == false`) or OR (`decisive == true`).
fn logic(left: Datum, right: Datum, decisive: bool) -> EngineResult<Datum> {
    let left = left.map(|v| truth(&v)).transpose()?;
    let right = right.map(|v| truth(&v)).transpose()?;
    Ok(if left == Some(decisive) || right == Some(decisive) {
        Some(render_bool(decisive))
    } else if left.is_some() && right.is_some() {
        Some(render_bool(!decisive))
    } else {
        None
    })
}

fn column_index(columns: &[String], name: &str) -> EngineResult<usize> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| undefined_column(name))
}

impl Expr {
    fn eval(&self, scope: &Scope<'_>) -> EngineResult<Datum> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Column(name) => {
                let index = column_index(scope.columns, name)?;
                Ok(scope.row.get(index).cloned().flatten())
            }
            Expr::Negate(inner) => match inner.eval(scope)? {
                None => Ok(None),
                Some(value) => match numeric(&value)? {
                    Number::Int(i) => i
                        .checked_neg()
                        .map(|n| Some(n.to_string()))
                        .ok_or_else(|| data_error("integer out of range", "22003")),
                    Number::Float(f) => Ok(Some(Number::Float(-f).render())),
                },
            },
            Expr::Not(inner) => Ok(inner
                .eval(scope)?
                .map(|v| truth(&v))
                .transpose()?
                .map(|b| render_bool(!b))),
            Expr::IsNull { expr, negated } => {
                Ok(Some(render_bool(expr.eval(scope)?.is_none() != *negated)))
            }
            Expr::Binary { left, op, right } => {
                let left = left.eval(scope)?;
                let right = right.eval(scope)?;
                match op {
                    BinaryOp::And => logic(left, right, false),
                    BinaryOp::Or => logic(left, right, true),
                    _ => {
                        let (Some(left), Some(right)) = (left, right) else {
                            return Ok(None);
                        };
                        match op {
                            BinaryOp::Compare(cmp) => {
                                Ok(Some(render_bool(cmp.holds(compare(&left, &right)))))
                            }
                            BinaryOp::Arith(arith) => arithmetic(*arith, &left, &right).map(Some),
                            _ => Ok(Some(left + &right)),
                        }
                    }
                }
            }
        }
    }
}

/// Returns true if `filter` is absent or evaluates to true; NULL rejects.
fn passes(filter: Option<&Expr>, scope: &Scope<'_>) -> EngineResult<bool> {
    match filter {
        None => Ok(true),
        Some(expr) => match expr.eval(scope)? {
            Some(value) => truth(&value),
            None => Ok(false),
        },
    }
}

// =============================================================================
// Statements
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Projection {
    Wildcard,
    Count { name: String, arg: Option<Expr> },
    Expr { name: String, expr: Expr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Select {
    pub from: Option<String>,
    pub projection: Vec<Projection>,
    pub filter: Option<Expr>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Statement {
    Empty,
    CreateTable {
        name: String,
        columns: Vec<String>,
        if_not_exists: bool,
    },
    DropTable {
        names: Vec<String>,
        if_exists: bool,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Expr>>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expr)>,
        filter: Option<Expr>,
    },
    Delete {
        table: String,
        filter: Option<Expr>,
    },
    Select(Select),
}

impl Statement {
    /// Returns true if executing the statement modifies data.
    pub fn is_write(&self) -> bool {
        !matches!(self, Statement::Empty | Statement::Select(_))
    }

    /// Returns the command tag, as used in read-only violations.
    fn tag(&self) -> &'static str {
        match self {
            Statement::Empty => "",
            Statement::CreateTable { .. } => "CREATE TABLE",
            Statement::DropTable { .. } => "DROP TABLE",
            Statement::Insert { .. } => "INSERT",
            Statement::Update { .. } => "UPDATE",
            Statement::Delete { .. } => "DELETE",
            Statement::Select(_) => "SELECT",
        }
    }
}

// =============================================================================
// Lowering
// =============================================================================

/// Parses one statement.
pub(crate) fn parse(sql: &str) -> EngineResult<Statement> {
    let mut statements = SqlParser::parse_sql(&PostgreSqlDialect {}, sql).map_err(syntax_error)?;
    match statements.len() {
        0 => Ok(Statement::Empty),
        1 => lower(statements.remove(0)),
        _ => Err(unsupported("more than one statement per call")),
    }
}

/// Unquoted identifiers fold to lower case.
fn ident(ident: &sql_ast::Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

fn relation_name(name: &sql_ast::ObjectName) -> EngineResult<String> {
    match name.0.as_slice() {
        [table] => Ok(ident(table)),
        [schema, table] if ident(schema) == "public" => Ok(ident(table)),
        [schema, _] => Err(EngineError::error(
            EngineErrorKind::UndefinedObject,
            format!("schema \"{}\" does not exist", ident(schema)),
        )
        .with_sqlstate("3F000")),
        _ => Err(unsupported(format!("cross-database reference {}", name))),
    }
}

fn table_name(table: &sql_ast::TableWithJoins) -> EngineResult<String> {
    if !table.joins.is_empty() {
        return Err(unsupported("JOIN"));
    }
    match &table.relation {
        sql_ast::TableFactor::Table { name, .. } => relation_name(name),
        other => Err(unsupported(format!("FROM item {}", other))),
    }
}

fn lower(statement: sql_ast::Statement) -> EngineResult<Statement> {
    match statement {
        sql_ast::Statement::Query(query) => lower_query(*query).map(Statement::Select),
        sql_ast::Statement::CreateTable {
            name,
            columns,
            if_not_exists,
            ..
        } => Ok(Statement::CreateTable {
            name: relation_name(&name)?,
            columns: columns.iter().map(|c| ident(&c.name)).collect(),
            if_not_exists,
        }),
        sql_ast::Statement::Drop {
            object_type: sql_ast::ObjectType::Table,
            if_exists,
            names,
            ..
        } => Ok(Statement::DropTable {
            names: names
                .iter()
                .map(relation_name)
                .collect::<EngineResult<_>>()?,
            if_exists,
        }),
        sql_ast::Statement::Insert {
            table_name,
            columns,
            source,
            returning,
            ..
        } => {
            if returning.is_some() {
                return Err(unsupported("RETURNING"));
            }
            let source = source.ok_or_else(|| unsupported("INSERT without VALUES"))?;
            let rows = match *source.body {
                sql_ast::SetExpr::Values(values) => values
                    .rows
                    .into_iter()
                    .map(|row| row.into_iter().map(lower_expr).collect::<EngineResult<Vec<_>>>())
                    .collect::<EngineResult<_>>()?,
                _ => return Err(unsupported("INSERT ... SELECT")),
            };
            Ok(Statement::Insert {
                table: relation_name(&table_name)?,
                columns: columns.iter().map(ident).collect(),
                rows,
            })
        }
        sql_ast::Statement::Update {
            table,
            assignments,
            from,
            selection,
            ..
        } => {
            if from.is_some() {
                return Err(unsupported("UPDATE ... FROM"));
            }
            let assignments = assignments
                .into_iter()
                .map(|assign| -> EngineResult<(String, Expr)> {
                    let column = assign
                        .id
                        .last()
                        .map(ident)
                        .ok_or_else(|| unsupported("empty assignment target"))?;
                    Ok((column, lower_expr(assign.value)?))
                })
                .collect::<EngineResult<_>>()?;
            Ok(Statement::Update {
                table: table_name(&table)?,
                assignments,
                filter: selection.map(lower_expr).transpose()?,
            })
        }
        sql_ast::Statement::Delete {
            from,
            selection,
            returning,
            ..
        } => {
            if returning.is_some() {
                return Err(unsupported("RETURNING"));
            }
            let table = match from.as_slice() {
                [table] => table_name(table)?,
                _ => return Err(unsupported("DELETE from more than one table")),
            };
            Ok(Statement::Delete {
                table,
                filter: selection.map(lower_expr).transpose()?,
            })
        }
        other => Err(unsupported(format!("statement \"{}\"", other))),
    }
}

fn lower_query(query: sql_ast::Query) -> EngineResult<Select> {
    if query.with.is_some() {
        return Err(unsupported("WITH"));
    }
    if !query.order_by.is_empty() {
        return Err(unsupported("ORDER BY"));
    }
    if query.offset.is_some() || query.fetch.is_some() {
        return Err(unsupported("OFFSET"));
    }
    let limit = query.limit.map(lower_limit).transpose()?;

    let select = match *query.body {
        sql_ast::SetExpr::Select(select) => *select,
        _ => return Err(unsupported("set operations")),
    };
    if select.distinct.is_some() {
        return Err(unsupported("DISTINCT"));
    }
    if select.having.is_some() {
        return Err(unsupported("HAVING"));
    }
    match &select.group_by {
        sql_ast::GroupByExpr::Expressions(exprs) if exprs.is_empty() => {}
        _ => return Err(unsupported("GROUP BY")),
    }

    let from = match select.from.as_slice() {
        [] => None,
        [table] => Some(table_name(table)?),
        _ => return Err(unsupported("more than one FROM item")),
    };
    Ok(Select {
        from,
        projection: select
            .projection
            .into_iter()
            .map(lower_item)
            .collect::<EngineResult<_>>()?,
        filter: select.selection.map(lower_expr).transpose()?,
        limit,
    })
}

fn lower_limit(expr: sql_ast::Expr) -> EngineResult<u64> {
    match &expr {
        sql_ast::Expr::Value(sql_ast::Value::Number(n, _)) => n
            .parse()
            .map_err(|_| data_error(format!("invalid LIMIT value: {}", n), "2201W")),
        _ => Err(unsupported(format!("LIMIT {}", expr))),
    }
}

fn lower_item(item: sql_ast::SelectItem) -> EngineResult<Projection> {
    let (expr, alias) = match item {
        sql_ast::SelectItem::Wildcard(_) => return Ok(Projection::Wildcard),
        sql_ast::SelectItem::UnnamedExpr(expr) => (expr, None),
        sql_ast::SelectItem::ExprWithAlias { expr, alias } => (expr, Some(ident(&alias))),
        other => return Err(unsupported(format!("select item {}", other))),
    };

    if let sql_ast::Expr::Function(function) = expr {
        return lower_count(function, alias);
    }
    let expr = lower_expr(expr)?;
    let name = alias.unwrap_or_else(|| match &expr {
        Expr::Column(column) => column.clone(),
        _ => "?column?".to_string(),
    });
    Ok(Projection::Expr { name, expr })
}

fn lower_count(function: sql_ast::Function, alias: Option<String>) -> EngineResult<Projection> {
    let name = function.name.to_string().to_lowercase();
    if name != "count" {
        return Err(EngineError::error(
            EngineErrorKind::UndefinedObject,
            format!("function {}() does not exist", name),
        )
        .with_sqlstate("42883"));
    }
    if function.distinct || function.over.is_some() {
        return Err(unsupported("DISTINCT or window aggregates"));
    }

    let mut args = function.args;
    if args.len() != 1 {
        return Err(EngineError::error(
            EngineErrorKind::UndefinedObject,
            "function count() takes exactly one argument",
        )
        .with_sqlstate("42883"));
    }
    let arg = match args.remove(0) {
        sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Wildcard) => None,
        sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Expr(expr)) => {
            Some(lower_expr(expr)?)
        }
        other => return Err(unsupported(format!("count argument {}", other))),
    };
    Ok(Projection::Count {
        name: alias.unwrap_or(name),
        arg,
    })
}

fn lower_value(value: sql_ast::Value) -> EngineResult<Datum> {
    match value {
        sql_ast::Value::Null => Ok(None),
        sql_ast::Value::Boolean(b) => Ok(Some(render_bool(b))),
        sql_ast::Value::Number(n, _) => Ok(Some(n)),
        sql_ast::Value::SingleQuotedString(s)
        | sql_ast::Value::EscapedStringLiteral(s)
        | sql_ast::Value::NationalStringLiteral(s) => Ok(Some(s)),
        other => Err(unsupported(format!("literal {}", other))),
    }
}

fn lower_expr(expr: sql_ast::Expr) -> EngineResult<Expr> {
    match expr {
        sql_ast::Expr::Value(value) => lower_value(value).map(Expr::Literal),
        sql_ast::Expr::Identifier(name) => Ok(Expr::Column(ident(&name))),
        sql_ast::Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|name| Expr::Column(ident(name)))
            .ok_or_else(|| unsupported("empty identifier")),
        sql_ast::Expr::Nested(inner) => lower_expr(*inner),
        sql_ast::Expr::IsNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(lower_expr(*inner)?),
            negated: false,
        }),
        sql_ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(lower_expr(*inner)?),
            negated: true,
        }),
        sql_ast::Expr::UnaryOp { op, expr } => {
            let inner = lower_expr(*expr)?;
            match op {
                sql_ast::UnaryOperator::Plus => Ok(inner),
                sql_ast::UnaryOperator::Minus => Ok(Expr::Negate(Box::new(inner))),
                sql_ast::UnaryOperator::Not => Ok(Expr::Not(Box::new(inner))),
                other => Err(unsupported(format!("operator {}", other))),
            }
        }
        sql_ast::Expr::BinaryOp { left, op, right } => {
            let op = match op {
                sql_ast::BinaryOperator::Eq => BinaryOp::Compare(CompareOp::Eq),
                sql_ast::BinaryOperator::NotEq => BinaryOp::Compare(CompareOp::NotEq),
                sql_ast::BinaryOperator::Lt => BinaryOp::Compare(CompareOp::Lt),
                sql_ast::BinaryOperator::LtEq => BinaryOp::Compare(CompareOp::LtEq),
                sql_ast::BinaryOperator::Gt => BinaryOp::Compare(CompareOp::Gt),
                sql_ast::BinaryOperator::GtEq => BinaryOp::Compare(CompareOp::GtEq),
                sql_ast::BinaryOperator::Plus => BinaryOp::Arith(ArithOp::Plus),
                sql_ast::BinaryOperator::Minus => BinaryOp::Arith(ArithOp::Minus),
                sql_ast::BinaryOperator::Multiply => BinaryOp::Arith(ArithOp::Multiply),
                sql_ast::BinaryOperator::Divide => BinaryOp::Arith(ArithOp::Divide),
                sql_ast::BinaryOperator::Modulo => BinaryOp::Arith(ArithOp::Modulo),
                sql_ast::BinaryOperator::StringConcat => BinaryOp::Concat,
                sql_ast::BinaryOperator::And => BinaryOp::And,
                sql_ast::BinaryOperator::Or => BinaryOp::Or,
                other => return Err(unsupported(format!("operator {}", other))),
            };
            Ok(Expr::Binary {
                left: Box::new(lower_expr(*left)?),
                op,
                right: Box::new(lower_expr(*right)?),
            })
        }
        sql_ast::Expr::Function(function) => Err(unsupported(format!(
            "function call {} outside the select list",
            function
        ))),
        other => Err(unsupported(format!("expression {}", other))),
    }
}

// =============================================================================
// Execution
// =============================================================================

fn table<'a>(tables: &'a Tables, name: &str) -> EngineResult<&'a Table> {
    tables.get(name).ok_or_else(|| undefined_table(name))
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> EngineResult<&'a mut Table> {
    tables.get_mut(name).ok_or_else(|| undefined_table(name))
}

/// Runs a statement against `tables`.
///
/// `count` limits the rows returned by a SELECT; 0 means no limit.
pub(crate) fn execute(
    tables: &mut Tables,
    statement: Statement,
    read_only: bool,
    count: u64,
) -> EngineResult<(SpiOutcome, Option<Rows>)> {
    if read_only && statement.is_write() {
        return Err(EngineError::error(
            EngineErrorKind::InvalidTransactionState,
            format!("{} is not allowed in a non-volatile function", statement.tag()),
        )
        .with_sqlstate("0A000"));
    }

    match statement {
        Statement::Empty => Ok((SpiOutcome::new(SpiStatus::Utility, 0), None)),

        Statement::CreateTable {
            name,
            columns,
            if_not_exists,
        } => {
            if tables.contains_key(&name) {
                if if_not_exists {
                    return Ok((SpiOutcome::new(SpiStatus::Utility, 0), None));
                }
                return Err(EngineError::error(
                    EngineErrorKind::DuplicateObject,
                    format!("relation \"{}\" already exists", name),
                )
                .with_sqlstate("42P07"));
            }
            for (i, column) in columns.iter().enumerate() {
                if columns[..i].contains(column) {
                    return Err(EngineError::error(
                        EngineErrorKind::DuplicateObject,
                        format!("column \"{}\" specified more than once", column),
                    )
                    .with_sqlstate("42701"));
                }
            }
            tables.insert(
                name,
                Table {
                    columns,
                    rows: Vec::new(),
                },
            );
            Ok((SpiOutcome::new(SpiStatus::Utility, 0), None))
        }

        Statement::DropTable { names, if_exists } => {
            if !if_exists {
                if let Some(missing) = names.iter().find(|n| !tables.contains_key(n.as_str())) {
                    return Err(undefined_table(missing));
                }
            }
            for name in &names {
                tables.remove(name);
            }
            Ok((SpiOutcome::new(SpiStatus::Utility, 0), None))
        }

        Statement::Insert {
            table: name,
            columns,
            rows,
        } => {
            let target = table_mut(tables, &name)?;
            let positions: Vec<usize> = if columns.is_empty() {
                (0..target.columns.len()).collect()
            } else {
                columns
                    .iter()
                    .map(|c| column_index(&target.columns, c))
                    .collect::<EngineResult<_>>()?
            };

            let mut inserted = Vec::with_capacity(rows.len());
            for exprs in &rows {
                if exprs.len() > positions.len() {
                    return Err(EngineError::error(
                        EngineErrorKind::Syntax,
                        "INSERT has more expressions than target columns",
                    )
                    .with_sqlstate("42601"));
                }
                let mut row = vec![None; target.columns.len()];
                for (expr, &index) in exprs.iter().zip(&positions) {
                    row[index] = expr.eval(&Scope::EMPTY)?;
                }
                inserted.push(row);
            }
            let processed = inserted.len() as u64;
            target.rows.extend(inserted);
            Ok((SpiOutcome::new(SpiStatus::Insert, processed), None))
        }

        Statement::Update {
            table: name,
            assignments,
            filter,
        } => {
            let target = table_mut(tables, &name)?;
            let targets: Vec<(usize, &Expr)> = assignments
                .iter()
                .map(|(column, expr)| -> EngineResult<(usize, &Expr)> {
                    Ok((column_index(&target.columns, column)?, expr))
                })
                .collect::<EngineResult<_>>()?;

            // Computed in full before replacing so a failing row changes nothing.
            let mut updated = Vec::with_capacity(target.rows.len());
            let mut processed = 0u64;
            for row in &target.rows {
                let scope = Scope {
                    columns: &target.columns,
                    row,
                };
                let mut new_row = row.clone();
                if passes(filter.as_ref(), &scope)? {
                    for (index, expr) in &targets {
                        if let Some(slot) = new_row.get_mut(*index) {
                            *slot = expr.eval(&scope)?;
                        }
                    }
                    processed += 1;
                }
                updated.push(new_row);
            }
            target.rows = updated;
            Ok((SpiOutcome::new(SpiStatus::Update, processed), None))
        }

        Statement::Delete {
            table: name,
            filter,
        } => {
            let target = table_mut(tables, &name)?;
            let mut doomed = Vec::with_capacity(target.rows.len());
            for row in &target.rows {
                let scope = Scope {
                    columns: &target.columns,
                    row,
                };
                doomed.push(passes(filter.as_ref(), &scope)?);
            }
            let processed = doomed.iter().filter(|d| **d).count() as u64;
            let mut flags = doomed.into_iter();
            target.rows.retain(|_| !flags.next().unwrap_or(false));
            Ok((SpiOutcome::new(SpiStatus::Delete, processed), None))
        }

        Statement::Select(select) => run_select(tables, select, count),
    }
}

fn run_select(
    tables: &Tables,
    select: Select,
    count: u64,
) -> EngineResult<(SpiOutcome, Option<Rows>)> {
    let no_row: Row = Vec::new();
    let (columns, candidates): (&[String], Vec<&Row>) = match &select.from {
        Some(name) => {
            let source = table(tables, name)?;
            (
                source.columns.as_slice(),
                source.rows.iter().collect::<Vec<_>>(),
            )
        }
        None => (&[] as &[String], vec![&no_row]),
    };

    let mut matching = Vec::new();
    for row in candidates {
        if passes(select.filter.as_ref(), &Scope { columns, row })? {
            matching.push(row);
        }
    }

    let rows = if select
        .projection
        .iter()
        .any(|p| matches!(p, Projection::Count { .. }))
    {
        aggregate(&select.projection, columns, &matching)?
    } else {
        project(&select, columns, &matching)?
    };

    let limit = match (select.limit, count) {
        (Some(limit), 0) => Some(limit),
        (Some(limit), count) => Some(limit.min(count)),
        (None, 0) => None,
        (None, count) => Some(count),
    };
    Ok(select_outcome(rows, limit))
}

fn aggregate(projection: &[Projection], columns: &[String], rows: &[&Row]) -> EngineResult<Rows> {
    let mut names = Vec::with_capacity(projection.len());
    let mut values = Vec::with_capacity(projection.len());
    for item in projection {
        match item {
            Projection::Count { name, arg } => {
                let mut n = 0u64;
                for row in rows {
                    let counted = match arg {
                        None => true,
                        Some(expr) => expr.eval(&Scope { columns, row })?.is_some(),
                    };
                    if counted {
                        n += 1;
                    }
                }
                names.push(name.clone());
                values.push(Some(n.to_string()));
            }
            Projection::Expr { name, .. } => return Err(ungrouped(name)),
            Projection::Wildcard => {
                return Err(ungrouped(columns.first().map_or("*", String::as_str)))
            }
        }
    }
    Ok(Rows {
        columns: names,
        rows: vec![values],
    })
}

fn ungrouped(column: &str) -> EngineError {
    EngineError::error(
        EngineErrorKind::Syntax,
        format!(
            "column \"{}\" must appear in the GROUP BY clause or be used in an aggregate function",
            column
        ),
    )
    .with_sqlstate("42803")
}

fn project(select: &Select, columns: &[String], rows: &[&Row]) -> EngineResult<Rows> {
    let mut names = Vec::new();
    for item in &select.projection {
        match item {
            Projection::Wildcard if select.from.is_none() => {
                return Err(EngineError::error(
                    EngineErrorKind::Syntax,
                    "SELECT * with no tables specified is not valid",
                )
                .with_sqlstate("42601"))
            }
            Projection::Wildcard => names.extend(columns.iter().cloned()),
            Projection::Expr { name, .. } | Projection::Count { name, .. } => {
                names.push(name.clone())
            }
        }
    }

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let scope = Scope { columns, row };
        let mut values = Vec::with_capacity(names.len());
        for item in &select.projection {
            match item {
                Projection::Wildcard => {
                    values.extend((0..columns.len()).map(|i| row.get(i).cloned().flatten()))
                }
                Projection::Expr { expr, .. } => values.push(expr.eval(&scope)?),
                Projection::Count { .. } => {}
            }
        }
        out.push(values);
    }
    Ok(Rows {
        columns: names,
        rows: out,
    })
}

fn select_outcome(mut rows: Rows, limit: Option<u64>) -> (SpiOutcome, Option<Rows>) {
    if let Some(limit) = limit {
        rows.rows
            .truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }
    let processed = rows.rows.len() as u64;
    (SpiOutcome::new(SpiStatus::Select, processed), Some(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(tables: &mut Tables, sql: &str) -> EngineResult<(SpiOutcome, Option<Rows>)> {
        execute(tables, parse(sql)?, false, 0)
    }

    fn select(tables: &mut Tables, sql: &str) -> Rows {
        run(tables, sql).unwrap().1.unwrap()
    }

    fn text(values: &[&str]) -> Row {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_parse_create_with_types() {
        let statement = parse("CREATE TABLE T (id INTEGER, \"Name\" VARCHAR(20) NOT NULL);").unwrap();
        assert_eq!(
            statement,
            Statement::CreateTable {
                name: "t".to_string(),
                columns: vec!["id".to_string(), "Name".to_string()],
                if_not_exists: false,
            }
        );
    }

    #[test]
    fn test_select_literals() {
        let mut tables = Tables::new();
        let rows = select(&mut tables, "SELECT NULL, '' AS empty, -5 AS n, 1.5, 'it''s'");
        assert_eq!(rows.columns, vec!["?column?", "empty", "n", "?column?", "?column?"]);
        assert_eq!(
            rows.rows,
            vec![vec![
                None,
                Some(String::new()),
                Some("-5".to_string()),
                Some("1.5".to_string()),
                Some("it's".to_string()),
            ]]
        );
    }

    #[test]
    fn test_parse_errors() {
        let err = parse("SELEC 1").unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Syntax);
        assert_eq!(err.sqlstate, Some("42601"));
        assert!(err.message.starts_with("syntax error at or near \"SELEC"));

        let err = parse("INSERT INTO t VALUES (1").unwrap_err();
        assert_eq!(err.message, "syntax error at end of input");

        let err = parse("SELECT 'open").unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Syntax);
        assert!(err.message.starts_with("syntax error"));
    }

    #[test]
    fn test_unsupported_constructs() {
        let err = parse("SELECT a FROM t ORDER BY a").unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::FeatureNotSupported);
        assert_eq!(err.message, "ORDER BY is not supported");

        let err = parse("SELECT 1; SELECT 2").unwrap_err();
        assert_eq!(err.sqlstate, Some("0A000"));

        assert_eq!(parse("  ;").unwrap(), Statement::Empty);
    }

    #[test]
    fn test_table_lifecycle() {
        let mut tables = Tables::new();
        run(&mut tables, "CREATE TABLE t (a int, b text)").unwrap();

        let (outcome, _) = run(&mut tables, "INSERT INTO t VALUES (1, 'x'), (2, NULL)").unwrap();
        assert_eq!(outcome, SpiOutcome::new(SpiStatus::Insert, 2));

        let rows = select(&mut tables, "SELECT b, a FROM t");
        assert_eq!(rows.columns, vec!["b", "a"]);
        assert_eq!(rows.rows[1], vec![None, Some("2".to_string())]);

        let rows = select(&mut tables, "SELECT count(*) FROM public.t");
        assert_eq!(rows.columns, vec!["count"]);
        assert_eq!(rows.rows, vec![text(&["2"])]);

        let (outcome, _) = run(&mut tables, "DELETE FROM t").unwrap();
        assert_eq!(outcome.processed, 2);

        run(&mut tables, "DROP TABLE t").unwrap();
        assert!(tables.is_empty());
    }

    #[test]
    fn test_where_clause() {
        let mut tables = Tables::new();
        run(&mut tables, "CREATE TABLE t (id int, name text)").unwrap();
        run(
            &mut tables,
            "INSERT INTO t VALUES (1, 'a'), (2, 'b'), (10, NULL)",
        )
        .unwrap();

        let rows = select(&mut tables, "SELECT id FROM t WHERE id = 1");
        assert_eq!(rows.rows, vec![text(&["1"])]);

        // Numeric, not lexical, ordering.
        let rows = select(&mut tables, "SELECT id FROM t WHERE id > 2");
        assert_eq!(rows.rows, vec![text(&["10"])]);

        let rows = select(&mut tables, "SELECT t.id FROM t WHERE name IS NULL OR id < 2");
        assert_eq!(rows.columns, vec!["id"]);
        assert_eq!(rows.rows, vec![text(&["1"]), text(&["10"])]);

        // Comparison with NULL is unknown and filters the row out.
        let rows = select(&mut tables, "SELECT count(*) FROM t WHERE name <> 'a'");
        assert_eq!(rows.rows, vec![text(&["1"])]);

        let rows = select(&mut tables, "SELECT count(name) AS named FROM t");
        assert_eq!(rows.columns, vec!["named"]);
        assert_eq!(rows.rows, vec![text(&["2"])]);
    }

    #[test]
    fn test_update_and_filtered_delete() {
        let mut tables = Tables::new();
        run(&mut tables, "CREATE TABLE t (id int, n int)").unwrap();
        run(&mut tables, "INSERT INTO t (n, id) VALUES (5, 1), (7, 2)").unwrap();

        let (outcome, _) = run(&mut tables, "UPDATE t SET n = n * 2 + 1 WHERE id = 2").unwrap();
        assert_eq!(outcome, SpiOutcome::new(SpiStatus::Update, 1));
        let rows = select(&mut tables, "SELECT * FROM t");
        assert_eq!(rows.rows, vec![text(&["1", "5"]), text(&["2", "15"])]);

        let (outcome, _) = run(&mut tables, "DELETE FROM t WHERE n < 10").unwrap();
        assert_eq!(outcome.processed, 1);
        let rows = select(&mut tables, "SELECT id FROM t");
        assert_eq!(rows.rows, vec![text(&["2"])]);
    }

    #[test]
    fn test_expression_errors() {
        let mut tables = Tables::new();
        let err = run(&mut tables, "SELECT 1 / 0").unwrap_err();
        assert_eq!(err.message, "division by zero");
        assert_eq!(err.kind, EngineErrorKind::DataException);

        let err = run(&mut tables, "SELECT 'x' + 1").unwrap_err();
        assert_eq!(err.sqlstate, Some("22P02"));

        let rows = select(&mut tables, "SELECT 1 + 2 AS three, 'a' || 'b', NULL || 'b'");
        assert_eq!(
            rows.rows,
            vec![vec![Some("3".to_string()), Some("ab".to_string()), None]]
        );
    }

    #[test]
    fn test_execution_errors() {
        let mut tables = Tables::new();
        let err = run(&mut tables, "SELECT * FROM missing").unwrap_err();
        assert_eq!(err.message, "relation \"missing\" does not exist");
        assert_eq!(err.sqlstate, Some("42P01"));

        run(&mut tables, "CREATE TABLE t (a int)").unwrap();
        let err = run(&mut tables, "CREATE TABLE t (a int)").unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::DuplicateObject);
        assert!(run(&mut tables, "CREATE TABLE IF NOT EXISTS t (a int)").is_ok());

        let err = run(&mut tables, "INSERT INTO t VALUES (1, 2)").unwrap_err();
        assert!(err.message.contains("more expressions"));

        let err = run(&mut tables, "SELECT b FROM t").unwrap_err();
        assert_eq!(err.message, "column \"b\" does not exist");

        let err = run(&mut tables, "SELECT a, count(*) FROM t").unwrap_err();
        assert_eq!(err.sqlstate, Some("42803"));

        let err = run(&mut tables, "SELECT * FROM other.t").unwrap_err();
        assert_eq!(err.message, "schema \"other\" does not exist");

        assert!(run(&mut tables, "DROP TABLE IF EXISTS nope").is_ok());
    }

    #[test]
    fn test_read_only_and_limit() {
        let mut tables = Tables::new();
        let err = execute(&mut tables, parse("CREATE TABLE t (a int)").unwrap(), true, 0)
            .unwrap_err();
        assert!(err.message.contains("CREATE TABLE is not allowed"));

        run(&mut tables, "CREATE TABLE t (a int)").unwrap();
        run(&mut tables, "INSERT INTO t VALUES (1), (2), (3)").unwrap();
        let (outcome, rows) = execute(&mut tables, parse("SELECT * FROM t").unwrap(), true, 2)
            .unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(rows.unwrap().rows.len(), 2);

        let rows = select(&mut tables, "SELECT a FROM t LIMIT 1");
        assert_eq!(rows.rows, vec![text(&["1"])]);
    }
}
