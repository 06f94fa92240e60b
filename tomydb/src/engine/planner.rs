/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! Query planning: resolves the target table, maps transport expressions to
//! typed expression trees, and validates the whole query, reporting every
//! detected problem at once.

use crate::api::models::ApiExpression;
use crate::api::models::CopyQuery;
use crate::api::models::LiteralValue;
use crate::api::models::OrderByExpression;
use crate::api::models::SelectQuery;
use crate::engine::chunk::ChunkColumnType;
use crate::engine::expr::BinaryOperator;
use crate::engine::expr::Expression;
use crate::engine::expr::FunctionName;
use crate::engine::expr::Literal;
use crate::engine::expr::UnaryOperator;
use crate::error::EngineError;
use crate::error::ValidationError;
use crate::metastore::Metastore;
use crate::metastore::TableSnapshot;
use std::collections::HashMap;
use std::sync::Arc;

/// One ORDER BY field: an index into the projection outputs plus a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortField {
    pub index: usize,
    pub ascending: bool,
}

/// A validated, fully typed SELECT query.
#[derive(Debug)]
pub struct SelectQueryDefinition {
    pub table_name: String,
    pub select_exprs: Vec<Expression>,
    pub where_expr: Option<Expression>,
    pub order_by: Vec<SortField>,
    pub limit: Option<u64>,
}

/// A validated COPY query.
#[derive(Debug)]
pub struct CopyPlan {
    pub table_name: String,
    pub csv_path: String,
    pub columns_mapping: Option<Vec<String>>,
    pub has_header: bool,
}

/// A validated SELECT query together with the table snapshot it will read.
/// Literal queries (no column references anywhere) carry no snapshot.
#[derive(Debug)]
pub struct SelectPlan {
    pub query: SelectQueryDefinition,
    pub snapshot: Option<TableSnapshot>,
}

#[derive(Debug)]
pub enum QueryPlan {
    Copy(CopyPlan),
    Select(SelectPlan),
}

pub struct Planner {
    metastore: Arc<Metastore>,
}

impl Planner {
    pub fn new(metastore: Arc<Metastore>) -> Self {
        Self { metastore }
    }

    /// Plan a COPY. The destination table must exist, and an explicit column
    /// mapping must cover every table column exactly once (a partial mapping
    /// would produce a ragged data file).
    pub fn plan_copy(&self, query: &CopyQuery) -> Result<CopyPlan, EngineError> {
        let table = self
            .metastore
            .get_table_by_name(&query.destination_table_name)
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "table {} does not exist",
                    query.destination_table_name
                ))
            })?;

        if let Some(mapping) = &query.destination_columns {
            let mut ve = ValidationError::new();
            let mut seen: HashMap<&str, usize> = HashMap::new();
            for name in mapping {
                if !table.columns.iter().any(|c| &c.name == name) {
                    ve.add(
                        format!("column {name} from CSV mapping not found in table definition"),
                        "destinationColumns",
                    );
                }
                *seen.entry(name.as_str()).or_insert(0) += 1;
            }
            for (name, count) in &seen {
                if *count > 1 {
                    ve.add(
                        format!("column {name} appears {count} times in CSV mapping"),
                        "destinationColumns",
                    );
                }
            }
            for col in &table.columns {
                if !seen.contains_key(col.name.as_str()) {
                    ve.add(
                        format!("table column {} is not covered by the CSV mapping", col.name),
                        "destinationColumns",
                    );
                }
            }
            ve.into_result()?;
        }

        Ok(CopyPlan {
            table_name: query.destination_table_name.clone(),
            csv_path: query.source_filepath.clone(),
            columns_mapping: query.destination_columns.clone(),
            has_header: query.does_csv_contain_header,
        })
    }

    /// Plan a SELECT. All qualified column references must agree on one
    /// table; unqualified references are resolved against it. A query without
    /// any column reference runs as a literal query with no table.
    pub fn plan_select(&self, query: &SelectQuery) -> Result<SelectPlan, EngineError> {
        let (table_name, has_column_refs) = extract_table_name(query);

        let table_name = match table_name {
            Some(name) => name,
            None => {
                if has_column_refs {
                    return Err(EngineError::validation(
                        "no table name specified and query contains column references",
                        "",
                    ));
                }
                let def = validate_and_map_query(query, "", None)?;
                return Ok(SelectPlan {
                    query: def,
                    snapshot: None,
                });
            }
        };

        let snapshot = self.metastore.get_table_snapshot(&table_name)?;
        let def = validate_and_map_query(query, &table_name, Some(&snapshot))?;
        Ok(SelectPlan {
            query: def,
            snapshot: Some(snapshot),
        })
    }
}

/// First qualified table name found in the query, plus whether any column
/// reference (qualified or not) exists at all.
fn extract_table_name(query: &SelectQuery) -> (Option<String>, bool) {
    let mut has_refs = false;
    for clause in &query.column_clauses {
        let (name, refs) = traverse_expression(clause);
        if name.is_some() {
            return (name, true);
        }
        has_refs = has_refs || refs;
    }
    if let Some(where_clause) = &query.where_clause {
        let (name, refs) = traverse_expression(where_clause);
        if name.is_some() {
            return (name, true);
        }
        has_refs = has_refs || refs;
    }
    (None, has_refs)
}

fn traverse_expression(expr: &ApiExpression) -> (Option<String>, bool) {
    match expr {
        ApiExpression::ColumnReference { table_name, .. } => match table_name {
            Some(name) if !name.is_empty() => (Some(name.clone()), true),
            _ => (None, true),
        },
        ApiExpression::Literal { .. } => (None, false),
        ApiExpression::UnaryOperation { operand, .. } => traverse_expression(operand),
        ApiExpression::BinaryOperation {
            left_operand,
            right_operand,
            ..
        } => {
            let (name, left_refs) = traverse_expression(left_operand);
            if name.is_some() {
                return (name, true);
            }
            let (name, right_refs) = traverse_expression(right_operand);
            if name.is_some() {
                return (name, true);
            }
            (None, left_refs || right_refs)
        }
        ApiExpression::Function { arguments, .. } => {
            let mut any = false;
            for arg in arguments {
                let (name, refs) = traverse_expression(arg);
                if name.is_some() {
                    return (name, true);
                }
                any = any || refs;
            }
            (None, any)
        }
    }
}

fn validate_and_map_query(
    query: &SelectQuery,
    table_name: &str,
    snapshot: Option<&TableSnapshot>,
) -> Result<SelectQueryDefinition, EngineError> {
    let mapper = ExpressionMapper::new(snapshot, table_name);
    let mut ve = ValidationError::new();

    let mut select_exprs = Vec::with_capacity(query.column_clauses.len());
    for clause in &query.column_clauses {
        match mapper.map_expression(clause) {
            Ok(expr) => select_exprs.push(expr),
            Err(e) => ve.extend(e),
        }
    }

    let mut where_expr = None;
    if let Some(clause) = &query.where_clause {
        match mapper.map_expression(clause) {
            Ok(expr) => {
                if expr.result_type() != ChunkColumnType::Boolean {
                    ve.add("where expression must return boolean", "whereClause");
                } else {
                    where_expr = Some(expr);
                }
            }
            Err(e) => ve.extend(e),
        }
    }

    let order_by =
        validate_order_by(query.order_by_clause.as_deref(), query.column_clauses.len(), &mut ve);

    let mut limit = None;
    if let Some(limit_clause) = &query.limit_clause {
        if limit_clause.limit < 0 {
            ve.add("limit must be non-negative", "limitClause");
        } else {
            limit = Some(limit_clause.limit as u64);
        }
    }

    ve.into_result()?;
    Ok(SelectQueryDefinition {
        table_name: table_name.to_string(),
        select_exprs,
        where_expr,
        order_by,
        limit,
    })
}

fn validate_order_by(
    clauses: Option<&[OrderByExpression]>,
    columns_count: usize,
    ve: &mut ValidationError,
) -> Vec<SortField> {
    let clauses = match clauses {
        Some(c) => c,
        None => return Vec::new(),
    };
    let mut fields = Vec::with_capacity(clauses.len());
    for (i, clause) in clauses.iter().enumerate() {
        if clause.column_index < 0 || clause.column_index as usize >= columns_count {
            ve.add(
                format!("invalid column index: {}", clause.column_index),
                format!("orderByClause[{i}]"),
            );
            continue;
        }
        fields.push(SortField {
            index: clause.column_index as usize,
            ascending: clause.ascending,
        });
    }
    fields
}

/// Maps transport expressions to typed engine expressions against one
/// table's schema.
struct ExpressionMapper {
    table_name: String,
    name_to_type: HashMap<String, ChunkColumnType>,
}

impl ExpressionMapper {
    fn new(snapshot: Option<&TableSnapshot>, table_name: &str) -> Self {
        let name_to_type = snapshot
            .map(|s| {
                s.columns
                    .iter()
                    .map(|c| (c.name.clone(), ChunkColumnType::from(c.column_type)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            table_name: table_name.to_string(),
            name_to_type,
        }
    }

    fn map_expression(&self, expr: &ApiExpression) -> Result<Expression, EngineError> {
        match expr {
            ApiExpression::ColumnReference {
                table_name,
                column_name,
            } => self.map_column_reference(table_name.as_deref(), column_name),
            ApiExpression::Literal { value } => Ok(map_literal(value)),
            ApiExpression::BinaryOperation {
                operator,
                left_operand,
                right_operand,
            } => self.map_binary(operator, left_operand, right_operand),
            ApiExpression::UnaryOperation { operator, operand } => {
                let operand = self.map_expression(operand)?;
                let op = UnaryOperator::from_str(operator)?;
                Expression::unary(op, operand)
            }
            ApiExpression::Function {
                function_name,
                arguments,
            } => self.map_function(function_name, arguments),
        }
    }

    fn map_column_reference(
        &self,
        table_name: Option<&str>,
        column_name: &str,
    ) -> Result<Expression, EngineError> {
        if let Some(qualifier) = table_name {
            if !qualifier.is_empty() && qualifier != self.table_name {
                return Err(EngineError::validation(
                    format!(
                        "column {column_name} refers to table {qualifier}, but query is on table {}",
                        self.table_name
                    ),
                    "",
                ));
            }
        }
        let column_type = self.name_to_type.get(column_name).ok_or_else(|| {
            EngineError::validation(
                format!("column {column_name} not found in table {}", self.table_name),
                "",
            )
        })?;
        Ok(Expression::ColumnRef {
            name: column_name.to_string(),
            column_type: *column_type,
        })
    }

    fn map_binary(
        &self,
        operator: &str,
        left: &ApiExpression,
        right: &ApiExpression,
    ) -> Result<Expression, EngineError> {
        let mut ve = ValidationError::new();
        let left = match self.map_expression(left) {
            Ok(e) => Some(e),
            Err(e) => {
                ve.extend(e);
                None
            }
        };
        let right = match self.map_expression(right) {
            Ok(e) => Some(e),
            Err(e) => {
                ve.extend(e);
                None
            }
        };
        ve.into_result()?;

        let op = BinaryOperator::from_str(operator)?;
        match (left, right) {
            (Some(l), Some(r)) => Expression::binary(op, l, r),
            _ => Err(EngineError::Runtime(
                "binary operands missing after validation".into(),
            )),
        }
    }

    fn map_function(
        &self,
        function_name: &str,
        arguments: &[ApiExpression],
    ) -> Result<Expression, EngineError> {
        let mut ve = ValidationError::new();
        let mut args = Vec::with_capacity(arguments.len());
        for arg in arguments {
            match self.map_expression(arg) {
                Ok(e) => args.push(e),
                Err(e) => ve.extend(e),
            }
        }
        ve.into_result()?;

        let name = FunctionName::from_str(function_name)?;
        Expression::function(name, args)
    }
}

fn map_literal(value: &LiteralValue) -> Expression {
    match value {
        LiteralValue::Int64(v) => Expression::Literal(Literal::Int64(*v)),
        LiteralValue::Boolean(v) => Expression::Literal(Literal::Boolean(*v)),
        LiteralValue::Varchar(v) => Expression::Literal(Literal::Varchar(v.clone())),
    }
}
