/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # HTTP Request Handlers
//!
//! All HTTP endpoint handlers for the TomyDB REST API: table management,
//! query submission and tracking, result retrieval, and system information.

use crate::api::models::*;
use crate::engine::QueryManager;
use crate::engine::QueryState;
use crate::metastore::ColumnDef;
use crate::metastore::Metastore;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Json;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

/// Application state shared across handlers.
pub struct AppState {
    pub metastore: Arc<Metastore>,
    pub query_manager: Arc<QueryManager>,
    pub start_time: Instant,
}

// ============================================================================
// Table Endpoints
// ============================================================================

/// GET /tables - Get list of all tables
#[instrument(skip(state))]
async fn get_tables(State(state): State<Arc<AppState>>) -> Json<Vec<ShallowTable>> {
    debug!("Listing all tables");
    let tables: Vec<ShallowTable> = state
        .metastore
        .get_tables()
        .into_iter()
        .map(|(table_id, name)| ShallowTable { table_id, name })
        .collect();

    info!(count = tables.len(), "Retrieved tables list");
    Json(tables)
}

/// GET /table/{tableId} - Get detailed table information
#[instrument(skip(state))]
async fn get_table_by_id(
    State(state): State<Arc<AppState>>,
    Path(table_id): Path<String>,
) -> impl IntoResponse {
    debug!(table_id = %table_id, "Getting table details");
    match state.metastore.get_table_by_id(&table_id) {
        Some(table) => {
            let schema = TableSchema {
                name: table.name,
                columns: table
                    .columns
                    .into_iter()
                    .map(|c| Column {
                        name: c.name,
                        column_type: c.column_type,
                    })
                    .collect(),
            };
            (StatusCode::OK, Json(schema)).into_response()
        }
        None => {
            warn!(table_id = %table_id, "Table not found");
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(format!("Table {table_id} not found"))),
            )
                .into_response()
        }
    }
}

/// PUT /table - Create a new table
#[instrument(skip(state, schema), fields(table_name = %schema.name))]
async fn create_table(
    State(state): State<Arc<AppState>>,
    Json(schema): Json<TableSchema>,
) -> impl IntoResponse {
    info!(table_name = %schema.name, columns = schema.columns.len(), "Creating new table");
    let mut problems = Vec::new();

    if schema.name.is_empty() {
        problems.push(Problem {
            error: "Table name cannot be empty".to_string(),
            context: Some("name".to_string()),
        });
    }
    if schema.columns.is_empty() {
        problems.push(Problem {
            error: "Table must have at least one column".to_string(),
            context: Some("columns".to_string()),
        });
    }
    let mut seen = std::collections::HashSet::new();
    for (i, col) in schema.columns.iter().enumerate() {
        if col.name.is_empty() {
            problems.push(Problem {
                error: "Column name cannot be empty".to_string(),
                context: Some(format!("columns[{i}]")),
            });
        }
        if !seen.insert(col.name.clone()) {
            problems.push(Problem {
                error: format!("Duplicate column name: {}", col.name),
                context: Some(format!("columns[{i}]")),
            });
        }
    }

    if !problems.is_empty() {
        warn!(table_name = %schema.name, "Table creation validation failed");
        return (
            StatusCode::BAD_REQUEST,
            Json(MultipleProblemsError { problems }),
        )
            .into_response();
    }

    let columns: Vec<ColumnDef> = schema
        .columns
        .into_iter()
        .map(|c| ColumnDef {
            name: c.name,
            column_type: c.column_type,
        })
        .collect();

    match state.metastore.create_table(&schema.name, columns) {
        Ok(table_id) => {
            info!(table_id = %table_id, "Table created successfully");
            (StatusCode::OK, Json(table_id)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Failed to create table");
            (
                StatusCode::BAD_REQUEST,
                Json(MultipleProblemsError::from(&e)),
            )
                .into_response()
        }
    }
}

/// DELETE /table/{tableId} - Delete a table
#[instrument(skip(state))]
async fn delete_table(
    State(state): State<Arc<AppState>>,
    Path(table_id): Path<String>,
) -> impl IntoResponse {
    info!(table_id = %table_id, "Deleting table");
    match state.metastore.delete_table(&table_id) {
        Ok(()) => {
            info!(table_id = %table_id, "Table deleted successfully");
            StatusCode::OK.into_response()
        }
        Err(e) => {
            warn!(table_id = %table_id, error = %e, "Failed to delete table");
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(e.to_string())),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Query Endpoints
// ============================================================================

/// GET /queries - Get list of all queries
#[instrument(skip(state))]
async fn get_queries(State(state): State<Arc<AppState>>) -> Json<Vec<ShallowQuery>> {
    debug!("Listing all queries");
    let queries: Vec<ShallowQuery> = state
        .query_manager
        .get_all_queries()
        .into_iter()
        .map(|info| ShallowQuery {
            query_id: info.id,
            status: info.state.into(),
        })
        .collect();

    info!(count = queries.len(), "Retrieved queries list");
    Json(queries)
}

/// GET /query/{queryId} - Get detailed query information
#[instrument(skip(state))]
async fn get_query_by_id(
    State(state): State<Arc<AppState>>,
    Path(query_id): Path<String>,
) -> impl IntoResponse {
    debug!(query_id = %query_id, "Getting query details");
    match state.query_manager.get_query_info(&query_id) {
        Some(info) => {
            let query = Query {
                query_id: info.id,
                status: info.state.into(),
                is_result_available: info.state == QueryState::Finished
                    && info.result.is_some(),
                query_definition: info.definition,
            };
            (StatusCode::OK, Json(query)).into_response()
        }
        None => {
            warn!(query_id = %query_id, "Query not found");
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(format!("Query {query_id} not found"))),
            )
                .into_response()
        }
    }
}

/// POST /query - Submit a new query for execution
#[instrument(skip(state, request))]
async fn submit_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteQueryRequest>,
) -> impl IntoResponse {
    let outcome = match request.query_definition {
        QueryDefinition::Select(select) => {
            if select.column_clauses.is_empty() {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(MultipleProblemsError::single(
                        "No columns specified for SELECT",
                    )),
                )
                    .into_response();
            }
            state.query_manager.submit_select(select)
        }
        QueryDefinition::Copy(copy) => {
            if copy.destination_table_name.is_empty() || copy.source_filepath.is_empty() {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(MultipleProblemsError::single(
                        "Missing destination table or source filepath for COPY",
                    )),
                )
                    .into_response();
            }
            state.query_manager.submit_copy(copy)
        }
    };

    match outcome {
        Ok(query_id) => {
            info!(query_id = %query_id, "Query submitted successfully");
            (StatusCode::OK, Json(query_id)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Failed to submit query");
            (
                StatusCode::BAD_REQUEST,
                Json(MultipleProblemsError::from(&e)),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Result and Error Endpoints
// ============================================================================

/// GET /result/{queryId} - Get result of a completed query
#[instrument(skip(state, body))]
async fn get_query_result(
    State(state): State<Arc<AppState>>,
    Path(query_id): Path<String>,
    body: Option<Json<GetQueryResultRequest>>,
) -> impl IntoResponse {
    let request = body.map(|b| b.0).unwrap_or_default();
    debug!(query_id = %query_id, row_limit = ?request.row_limit, "Getting query result");

    let info = match state.query_manager.get_query_info(&query_id) {
        Some(info) => info,
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(format!("Query {query_id} not found"))),
            )
                .into_response();
        }
    };

    if matches!(info.definition, QueryDefinition::Copy(_)) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("COPY queries do not return a result set")),
        )
            .into_response();
    }
    if info.state != QueryState::Finished {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!(
                "Query is in state {:?}",
                QueryStatus::from(info.state)
            ))),
        )
            .into_response();
    }

    let row_limit = request.row_limit.filter(|l| *l >= 0).map(|l| l as u64);
    let flush = request.flush_result.unwrap_or(false);
    match state
        .query_manager
        .get_query_result(&query_id, row_limit, flush)
    {
        Ok(Some(result)) => {
            info!(query_id = %query_id, rows = result.row_count, "Query result retrieved");
            (StatusCode::OK, Json(vec![result])).into_response()
        }
        Ok(None) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Result is not available for this query")),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(e.to_string())),
        )
            .into_response(),
    }
}

/// GET /error/{queryId} - Get error of a failed query
#[instrument(skip(state))]
async fn get_query_error(
    State(state): State<Arc<AppState>>,
    Path(query_id): Path<String>,
) -> impl IntoResponse {
    debug!(query_id = %query_id, "Getting query error");
    let info = match state.query_manager.get_query_info(&query_id) {
        Some(info) => info,
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(format!("Query {query_id} not found"))),
            )
                .into_response();
        }
    };

    if info.state != QueryState::Failed {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "Error is only available for failed queries",
            )),
        )
            .into_response();
    }

    match info.error {
        Some(e) => (StatusCode::OK, Json(MultipleProblemsError::from(&*e))).into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("No error information available")),
        )
            .into_response(),
    }
}

// ============================================================================
// System Endpoints
// ============================================================================

/// GET /system/info - Get system information
#[instrument(skip(state))]
async fn get_system_info(State(state): State<Arc<AppState>>) -> Json<SystemInformation> {
    debug!("Getting system information");
    Json(SystemInformation {
        version: env!("CARGO_PKG_VERSION").to_string(),
        author: "Dawid Pawlik".to_string(),
        uptime: state.start_time.elapsed().as_secs() as i64,
    })
}

/// Create all routes
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tables", get(get_tables))
        .route("/table/{tableId}", get(get_table_by_id))
        .route("/table", put(create_table))
        .route("/table/{tableId}", delete(delete_table))
        .route("/queries", get(get_queries))
        .route("/query/{queryId}", get(get_query_by_id))
        .route("/query", post(submit_query))
        .route("/result/{queryId}", get(get_query_result))
        .route("/error/{queryId}", get(get_query_error))
        .route("/system/info", get(get_system_info))
}
