//! Clause-level column extraction using sqlparser-rs.
//!
//! The extractor does not bind or plan anything. It walks the statement AST
//! once, resolves table aliases per query scope and reports which columns
//! are referenced in WHERE, JOIN and ORDER BY positions.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlparser::ast::{self as sql_ast, ObjectName};
use sqlparser::dialect::{GenericDialect, MySqlDialect};
use sqlparser::parser::Parser as SqlParser;
use tracing::debug;

use super::normalize::StatementKind;
use crate::error::{QueryWatchError, Result};

/// A column reference, optionally qualified by the table it was written against.
///
/// After extraction the qualifier is always a real table name, never an alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn bare(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

/// Tables and per-clause column references of one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedClauses {
    pub kind: StatementKind,
    /// Referenced tables in order of first appearance
    pub tables: Vec<String>,
    pub where_columns: Vec<ColumnRef>,
    pub join_columns: Vec<ColumnRef>,
    pub order_by_columns: Vec<ColumnRef>,
    pub has_limit: bool,
}

impl Default for ExtractedClauses {
    fn default() -> Self {
        Self {
            kind: StatementKind::Other,
            tables: Vec::new(),
            where_columns: Vec::new(),
            join_columns: Vec::new(),
            order_by_columns: Vec::new(),
            has_limit: false,
        }
    }
}

impl ExtractedClauses {
    /// True when nothing usable was found.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.where_columns.is_empty()
            && self.join_columns.is_empty()
            && self.order_by_columns.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Clause {
    Where,
    Join,
    OrderBy,
}

/// Extracts table and column references from SQL text.
pub struct ClauseExtractor;

impl ClauseExtractor {
    /// Best-effort extraction: unparsable input yields an empty structure.
    pub fn extract(sql: &str) -> ExtractedClauses {
        match Self::try_extract(sql) {
            Ok(clauses) => clauses,
            Err(err) => {
                debug!(error = %err, "could not extract clauses, treating statement as opaque");
                ExtractedClauses::default()
            }
        }
    }

    /// Extract from the first statement in `sql`, surfacing parse errors.
    pub fn try_extract(sql: &str) -> Result<ExtractedClauses> {
        let statements = match SqlParser::parse_sql(&GenericDialect {}, sql) {
            Ok(statements) => statements,
            Err(_) => SqlParser::parse_sql(&MySqlDialect {}, sql)?,
        };
        let statement = statements
            .into_iter()
            .next()
            .ok_or_else(|| QueryWatchError::parse("empty statement"))?;

        let mut walker = Walker::default();
        walker.scopes.push(HashMap::new());
        walker.visit_statement(&statement);
        Ok(walker.finish())
    }
}

#[derive(Default)]
struct Walker {
    kind: Option<StatementKind>,
    tables: Vec<String>,
    /// Alias maps, innermost query last
    scopes: Vec<HashMap<String, String>>,
    cte_names: HashSet<String>,
    where_columns: Vec<ColumnRef>,
    join_columns: Vec<ColumnRef>,
    order_by_columns: Vec<ColumnRef>,
    has_limit: bool,
}

impl Walker {
    fn finish(self) -> ExtractedClauses {
        ExtractedClauses {
            kind: self.kind.unwrap_or(StatementKind::Other),
            tables: self.tables,
            where_columns: dedup(self.where_columns),
            join_columns: dedup(self.join_columns),
            order_by_columns: dedup(self.order_by_columns),
            has_limit: self.has_limit,
        }
    }

    /// Innermost alias wins; correlated references fall through to outer queries.
    fn resolve_qualifier(&self, qualifier: &str) -> String {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(qualifier))
            .cloned()
            .unwrap_or_else(|| qualifier.to_string())
    }

    fn set_kind(&mut self, kind: StatementKind) {
        if self.kind.is_none() {
            self.kind = Some(kind);
        }
    }

    fn visit_statement(&mut self, stmt: &sql_ast::Statement) {
        match stmt {
            sql_ast::Statement::Query(query) => {
                self.set_kind(StatementKind::Select);
                self.visit_query(query);
            }
            sql_ast::Statement::Update {
                table, selection, ..
            } => {
                self.set_kind(StatementKind::Update);
                self.visit_table_with_joins(table);
                if let Some(expr) = selection {
                    self.visit_expr(expr, Clause::Where);
                }
            }
            sql_ast::Statement::Delete(delete) => {
                self.set_kind(StatementKind::Delete);
                let tables = match &delete.from {
                    sql_ast::FromTable::WithFromKeyword(tables) => tables,
                    sql_ast::FromTable::WithoutKeyword(tables) => tables,
                };
                for twj in tables {
                    self.visit_table_with_joins(twj);
                }
                if let Some(expr) = &delete.selection {
                    self.visit_expr(expr, Clause::Where);
                }
                for ob in &delete.order_by {
                    self.visit_expr(&ob.expr, Clause::OrderBy);
                }
                if delete.limit.is_some() {
                    self.has_limit = true;
                }
            }
            _ => self.set_kind(StatementKind::Other),
        }
    }

    fn visit_query(&mut self, query: &sql_ast::Query) {
        self.scopes.push(HashMap::new());
        self.visit_query_body(query);
        self.scopes.pop();
    }

    fn visit_query_body(&mut self, query: &sql_ast::Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.clone());
                self.visit_query(&cte.query);
            }
        }

        self.visit_set_expr(&query.body);

        if let Some(order_by) = &query.order_by {
            for ob in &order_by.exprs {
                self.visit_expr(&ob.expr, Clause::OrderBy);
            }
        }
        if query.limit.is_some() || query.fetch.is_some() {
            self.has_limit = true;
        }
    }

    fn visit_set_expr(&mut self, set_expr: &sql_ast::SetExpr) {
        match set_expr {
            sql_ast::SetExpr::Select(select) => {
                for twj in &select.from {
                    self.visit_table_with_joins(twj);
                }
                if let Some(expr) = &select.selection {
                    self.visit_expr(expr, Clause::Where);
                }
            }
            sql_ast::SetExpr::SetOperation { left, right, .. } => {
                self.visit_set_expr(left);
                self.visit_set_expr(right);
            }
            sql_ast::SetExpr::Query(query) => self.visit_query(query),
            _ => {}
        }
    }

    fn visit_table_with_joins(&mut self, twj: &sql_ast::TableWithJoins) {
        self.visit_table_factor(&twj.relation);
        for join in &twj.joins {
            self.visit_table_factor(&join.relation);
            match join_constraint(&join.join_operator) {
                Some(sql_ast::JoinConstraint::On(expr)) => self.visit_expr(expr, Clause::Join),
                Some(sql_ast::JoinConstraint::Using(columns)) => {
                    for column in columns {
                        let name = column.to_string();
                        self.join_columns
                            .push(ColumnRef::bare(name.trim_matches(|c| c == '`' || c == '"')));
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_table_factor(&mut self, factor: &sql_ast::TableFactor) {
        match factor {
            sql_ast::TableFactor::Table { name, alias, .. } => {
                let Some(table) = object_name_last(name) else {
                    return;
                };
                if let Some(alias) = alias {
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.insert(alias.name.value.clone(), table.clone());
                    }
                }
                if !self.cte_names.contains(&table) && !self.tables.contains(&table) {
                    self.tables.push(table);
                }
            }
            sql_ast::TableFactor::Derived { subquery, .. } => self.visit_query(subquery),
            sql_ast::TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.visit_table_with_joins(table_with_joins),
            _ => {}
        }
    }

    fn push_column(&mut self, mut column: ColumnRef, clause: Clause) {
        if let Some(qualifier) = column.table.take() {
            column.table = Some(self.resolve_qualifier(&qualifier));
        }
        match clause {
            Clause::Where => self.where_columns.push(column),
            Clause::Join => self.join_columns.push(column),
            Clause::OrderBy => self.order_by_columns.push(column),
        }
    }

    fn visit_expr(&mut self, expr: &sql_ast::Expr, clause: Clause) {
        match expr {
            sql_ast::Expr::Identifier(ident) => {
                self.push_column(ColumnRef::bare(ident.value.clone()), clause)
            }
            sql_ast::Expr::CompoundIdentifier(idents) => {
                if let [.., qualifier, column] = idents.as_slice() {
                    self.push_column(
                        ColumnRef::qualified(qualifier.value.clone(), column.value.clone()),
                        clause,
                    );
                } else if let Some(column) = idents.last() {
                    self.push_column(ColumnRef::bare(column.value.clone()), clause);
                }
            }
            sql_ast::Expr::BinaryOp { left, right, .. } => {
                self.visit_expr(left, clause);
                self.visit_expr(right, clause);
            }
            sql_ast::Expr::UnaryOp { expr, .. }
            | sql_ast::Expr::Nested(expr)
            | sql_ast::Expr::IsNull(expr)
            | sql_ast::Expr::IsNotNull(expr)
            | sql_ast::Expr::IsTrue(expr)
            | sql_ast::Expr::IsFalse(expr)
            | sql_ast::Expr::Cast { expr, .. } => self.visit_expr(expr, clause),
            sql_ast::Expr::InList { expr, list, .. } => {
                self.visit_expr(expr, clause);
                for item in list {
                    self.visit_expr(item, clause);
                }
            }
            sql_ast::Expr::InSubquery { expr, subquery, .. } => {
                self.visit_expr(expr, clause);
                self.visit_query(subquery);
            }
            sql_ast::Expr::Between {
                expr, low, high, ..
            } => {
                self.visit_expr(expr, clause);
                self.visit_expr(low, clause);
                self.visit_expr(high, clause);
            }
            sql_ast::Expr::Like { expr, pattern, .. }
            | sql_ast::Expr::ILike { expr, pattern, .. } => {
                self.visit_expr(expr, clause);
                self.visit_expr(pattern, clause);
            }
            sql_ast::Expr::Case {
                operand,
                conditions,
                results,
                else_result,
                ..
            } => {
                for e in operand.iter().chain(else_result.iter()) {
                    self.visit_expr(e, clause);
                }
                for e in conditions.iter().chain(results.iter()) {
                    self.visit_expr(e, clause);
                }
            }
            sql_ast::Expr::Function(func) => {
                if let sql_ast::FunctionArguments::List(arg_list) = &func.args {
                    for arg in &arg_list.args {
                        match arg {
                            sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Expr(e))
                            | sql_ast::FunctionArg::Named {
                                arg: sql_ast::FunctionArgExpr::Expr(e),
                                ..
                            } => self.visit_expr(e, clause),
                            _ => {}
                        }
                    }
                }
            }
            sql_ast::Expr::Subquery(query) | sql_ast::Expr::Exists { subquery: query, .. } => {
                self.visit_query(query)
            }
            _ => {}
        }
    }
}

fn dedup(columns: Vec<ColumnRef>) -> Vec<ColumnRef> {
    let mut seen = HashSet::new();
    columns.into_iter().filter(|c| seen.insert(c.clone())).collect()
}

fn join_constraint(op: &sql_ast::JoinOperator) -> Option<&sql_ast::JoinConstraint> {
    match op {
        sql_ast::JoinOperator::Inner(c)
        | sql_ast::JoinOperator::LeftOuter(c)
        | sql_ast::JoinOperator::RightOuter(c)
        | sql_ast::JoinOperator::FullOuter(c)
        | sql_ast::JoinOperator::LeftSemi(c)
        | sql_ast::JoinOperator::RightSemi(c)
        | sql_ast::JoinOperator::LeftAnti(c)
        | sql_ast::JoinOperator::RightAnti(c) => Some(c),
        _ => None,
    }
}

fn object_name_last(name: &ObjectName) -> Option<String> {
    name.0.last().map(|ident| ident.value.clone())
}
