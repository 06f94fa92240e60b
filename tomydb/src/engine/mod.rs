/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Query Engine
//!
//! The query manager tracks every submitted query through its lifecycle
//! (PENDING -> PLANNING -> RUNNING -> FINISHED | FAILED). Planning runs
//! synchronously inside submission, so an invalid query is rejected before
//! any background work starts; execution happens on a background task.

pub mod chunk;
pub mod executor;
pub mod expr;
pub mod planner;

use crate::api::models::CopyQuery;
use crate::api::models::QueryDefinition;
use crate::api::models::SelectQuery;
use crate::engine::chunk::ColumnarResult;
use crate::engine::chunk::ResultColumn;
use crate::engine::executor::Executor;
use crate::engine::planner::Planner;
use crate::engine::planner::QueryPlan;
use crate::error::EngineError;
use crate::metastore::Metastore;
use crate::monotonic_nanos;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::error;
use tracing::info;

/// Lifecycle states of a query. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Pending,
    Planning,
    Running,
    Finished,
    Failed,
}

/// Everything tracked about one submitted query. The result is shared and
/// never mutated after the query finishes.
#[derive(Debug, Clone)]
pub struct QueryInfo {
    pub id: String,
    pub state: QueryState,
    pub result: Option<Arc<ColumnarResult>>,
    pub error: Option<Arc<EngineError>>,
    pub definition: QueryDefinition,
}

pub struct QueryManager {
    planner: Planner,
    executor: Arc<Executor>,
    queries: Arc<RwLock<HashMap<String, QueryInfo>>>,
}

impl QueryManager {
    pub fn new(
        metastore: Arc<Metastore>,
        base_dir: impl AsRef<Path>,
        chunk_size: usize,
        sort_memory_limit_bytes: u64,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            planner: Planner::new(Arc::clone(&metastore)),
            executor: Arc::new(Executor::new(
                metastore,
                base_dir,
                chunk_size,
                sort_memory_limit_bytes,
            )?),
            queries: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Submit a COPY query. Planning failures are returned to the caller and
    /// recorded on the query; no background task starts for them.
    pub fn submit_copy(
        &self,
        query: CopyQuery,
    ) -> Result<String, EngineError> {
        let query_id = format!("COPY_{}", monotonic_nanos());
        self.create_query(&query_id, QueryDefinition::Copy(query.clone()));

        self.update_state(&query_id, QueryState::Planning);
        let plan = match self.planner.plan_copy(&query) {
            Ok(plan) => QueryPlan::Copy(plan),
            Err(e) => return Err(self.fail_at_submit(&query_id, e)),
        };

        self.spawn_execution(query_id.clone(), plan);
        Ok(query_id)
    }

    /// Submit a SELECT query. Same submission contract as COPY.
    pub fn submit_select(
        &self,
        query: SelectQuery,
    ) -> Result<String, EngineError> {
        let query_id = format!("SELECT_{}", monotonic_nanos());
        self.create_query(&query_id, QueryDefinition::Select(query.clone()));

        self.update_state(&query_id, QueryState::Planning);
        let plan = match self.planner.plan_select(&query) {
            Ok(plan) => QueryPlan::Select(plan),
            Err(e) => return Err(self.fail_at_submit(&query_id, e)),
        };

        self.spawn_execution(query_id.clone(), plan);
        Ok(query_id)
    }

    fn spawn_execution(&self, query_id: String, plan: QueryPlan) {
        let queries = Arc::clone(&self.queries);
        let executor = Arc::clone(&self.executor);

        tokio::spawn(async move {
            set_state(&queries, &query_id, QueryState::Running);

            let blocking_id = query_id.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                executor.execute(plan, &blocking_id)
            })
            .await;

            let mut guard = queries.write();
            let Some(info) = guard.get_mut(&query_id) else {
                return;
            };
            match outcome {
                Ok(Ok(result)) => {
                    info.state = QueryState::Finished;
                    info.result = result.map(Arc::new);
                    info!(query_id = %query_id, "query finished");
                }
                Ok(Err(e)) => {
                    error!(query_id = %query_id, error = %e, "query failed");
                    info.state = QueryState::Failed;
                    info.error = Some(Arc::new(e));
                }
                Err(join_err) => {
                    error!(query_id = %query_id, error = %join_err, "query execution panicked");
                    info.state = QueryState::Failed;
                    info.error = Some(Arc::new(EngineError::Runtime(format!(
                        "execution panicked: {join_err}"
                    ))));
                }
            }
        });
    }

    fn fail_at_submit(&self, query_id: &str, e: EngineError) -> EngineError {
        let returned = e.duplicate();
        let mut guard = self.queries.write();
        if let Some(info) = guard.get_mut(query_id) {
            info.state = QueryState::Failed;
            info.error = Some(Arc::new(e));
        }
        returned
    }

    fn create_query(&self, id: &str, definition: QueryDefinition) {
        self.queries.write().insert(
            id.to_string(),
            QueryInfo {
                id: id.to_string(),
                state: QueryState::Pending,
                result: None,
                error: None,
                definition,
            },
        );
    }

    fn update_state(&self, id: &str, state: QueryState) {
        set_state(&self.queries, id, state);
    }

    pub fn get_query_info(&self, query_id: &str) -> Option<QueryInfo> {
        self.queries.read().get(query_id).cloned()
    }

    pub fn get_all_queries(&self) -> Vec<QueryInfo> {
        self.queries.read().values().cloned().collect()
    }

    /// Fetch a finished query's result, trimmed to `row_limit` rows by
    /// copying the first rows of each column. With `flush` the record is
    /// removed afterwards. The copy happens outside the map lock.
    pub fn get_query_result(
        &self,
        query_id: &str,
        row_limit: Option<u64>,
        flush: bool,
    ) -> Result<Option<ColumnarResult>, EngineError> {
        let result = {
            let guard = self.queries.read();
            let info = guard.get(query_id).ok_or_else(|| {
                EngineError::NotFound(format!("query {query_id} not found"))
            })?;
            info.result.clone()
        };

        let trimmed = result.map(|r| trim_result(&r, row_limit));
        if flush {
            self.queries.write().remove(query_id);
        }
        Ok(trimmed)
    }

    /// Poll until the query reaches a terminal state.
    pub async fn wait_for_completion(&self, query_id: &str) -> Result<QueryState, EngineError> {
        loop {
            let state = self
                .get_query_info(query_id)
                .map(|info| info.state)
                .ok_or_else(|| {
                    EngineError::NotFound(format!("query {query_id} not found"))
                })?;
            match state {
                QueryState::Finished | QueryState::Failed => return Ok(state),
                _ => tokio::time::sleep(tokio::time::Duration::from_millis(10)).await,
            }
        }
    }
}

fn set_state(queries: &RwLock<HashMap<String, QueryInfo>>, id: &str, state: QueryState) {
    if let Some(info) = queries.write().get_mut(id) {
        info.state = state;
    }
}

fn trim_result(original: &ColumnarResult, row_limit: Option<u64>) -> ColumnarResult {
    let limit = match row_limit {
        Some(l) if l < original.row_count => l as usize,
        _ => original.row_count as usize,
    };
    let columns = original
        .columns
        .iter()
        .map(|col| match col {
            ResultColumn::Int64(v) => ResultColumn::Int64(v[..limit].to_vec()),
            ResultColumn::Varchar(v) => ResultColumn::Varchar(v[..limit].to_vec()),
            ResultColumn::Boolean(v) => ResultColumn::Boolean(v[..limit].to_vec()),
        })
        .collect();
    ColumnarResult {
        row_count: limit as u64,
        columns,
    }
}
