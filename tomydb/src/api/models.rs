/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # API Data Models
//!
//! Transport structures for the REST API: table schemas, query definitions
//! with their expression trees, query status, and error bodies.

use crate::engine::QueryState;
use crate::error::EngineError;
use crate::ColumnType;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// Table Schema
// ============================================================================

/// Description of a single column in a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Description of a table in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

/// Shallow representation of a table (without column details).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShallowTable {
    pub table_id: String,
    pub name: String,
}

// ============================================================================
// Query Status and Definitions
// ============================================================================

/// Transport-level query status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Created,
    Planning,
    Running,
    Completed,
    Failed,
}

impl From<QueryState> for QueryStatus {
    fn from(state: QueryState) -> Self {
        match state {
            QueryState::Pending => QueryStatus::Created,
            QueryState::Planning => QueryStatus::Planning,
            QueryState::Running => QueryStatus::Running,
            QueryState::Finished => QueryStatus::Completed,
            QueryState::Failed => QueryStatus::Failed,
        }
    }
}

/// Shallow representation of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShallowQuery {
    pub query_id: String,
    pub status: QueryStatus,
}

/// COPY query definition: bulk load a CSV file into a table. The optional
/// `destination_columns` list maps CSV column positions to table columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyQuery {
    pub source_filepath: String,
    pub destination_table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_columns: Option<Vec<String>>,
    #[serde(default)]
    pub does_csv_contain_header: bool,
}

/// SELECT query definition: projection expressions plus optional WHERE,
/// ORDER BY and LIMIT clauses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectQuery {
    pub column_clauses: Vec<ApiExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<ApiExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by_clause: Option<Vec<OrderByExpression>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_clause: Option<LimitExpression>,
}

/// One ORDER BY entry: an index into the projection list plus a direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByExpression {
    pub column_index: i64,
    pub ascending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitExpression {
    pub limit: i64,
}

/// Query definition - either COPY or SELECT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryDefinition {
    Copy(CopyQuery),
    Select(SelectQuery),
}

/// Full query description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub query_id: String,
    pub status: QueryStatus,
    pub is_result_available: bool,
    pub query_definition: QueryDefinition,
}

// ============================================================================
// Expression Transport
// ============================================================================

/// Tagged-by-shape expression union as it travels over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiExpression {
    #[serde(rename_all = "camelCase")]
    ColumnReference {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table_name: Option<String>,
        column_name: String,
    },
    Literal {
        value: LiteralValue,
    },
    #[serde(rename_all = "camelCase")]
    BinaryOperation {
        operator: String,
        left_operand: Box<ApiExpression>,
        right_operand: Box<ApiExpression>,
    },
    #[serde(rename_all = "camelCase")]
    UnaryOperation {
        operator: String,
        operand: Box<ApiExpression>,
    },
    #[serde(rename_all = "camelCase")]
    Function {
        function_name: String,
        arguments: Vec<ApiExpression>,
    },
}

/// A typed literal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Boolean(bool),
    Int64(i64),
    Varchar(String),
}

// ============================================================================
// Request/Response Bodies
// ============================================================================

/// Request to execute a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQueryRequest {
    pub query_definition: QueryDefinition,
}

/// Request to fetch a query result.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GetQueryResultRequest {
    #[serde(default)]
    pub row_limit: Option<i64>,
    #[serde(default)]
    pub flush_result: Option<bool>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Single problem in an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Error response carrying every detected problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipleProblemsError {
    pub problems: Vec<Problem>,
}

impl MultipleProblemsError {
    pub fn single(error: impl Into<String>) -> Self {
        Self {
            problems: vec![Problem {
                error: error.into(),
                context: None,
            }],
        }
    }
}

impl From<&EngineError> for MultipleProblemsError {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::Validation(v) => Self {
                problems: v
                    .problems
                    .iter()
                    .map(|p| Problem {
                        error: p.error.clone(),
                        context: if p.context.is_empty() {
                            None
                        } else {
                            Some(p.context.clone())
                        },
                    })
                    .collect(),
            },
            other => Self::single(other.to_string()),
        }
    }
}

/// Generic single-message error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ============================================================================
// System Information
// ============================================================================

/// System information response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInformation {
    pub version: String,
    pub author: String,
    pub uptime: i64,
}
