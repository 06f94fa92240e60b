/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! Pull-based operator pipeline.
//!
//! Every operator exposes the same interface: `next_batch` returns the next
//! chunk, `None` at end of stream, or an error; `close` is idempotent and
//! releases children plus any acquired resources (snapshot references, spill
//! files). Pipelines are built bottom-up and drained from the top.

use crate::engine::chunk::ChunkColumn;
use crate::engine::chunk::ChunkResult;
use crate::engine::chunk::ColumnarResult;
use crate::engine::expr::used_columns_from_expressions;
use crate::engine::expr::Expression;
use crate::engine::planner::SelectQueryDefinition;
use crate::error::EngineError;
use crate::metastore::TableSnapshot;
use crate::serialization::BatchReader;
use std::collections::HashMap;

pub trait Operator: Send {
    fn next_batch(&mut self) -> Result<Option<ChunkResult>, EngineError>;
    fn close(&mut self);
}

/// Scans the data files of one table snapshot, projecting only the columns
/// the query actually references. Owns the snapshot, so the underlying files
/// outlive the scan even if the table is deleted mid-query.
pub struct ReaderOperator {
    reader: Option<BatchReader>,
    chunk_size: usize,
    // Held for its Drop side effect: releasing it decrements the refcount of
    // every file the scan reads.
    snapshot: Option<TableSnapshot>,
}

impl ReaderOperator {
    pub fn new(snapshot: TableSnapshot, query: &SelectQueryDefinition, chunk_size: usize) -> Self {
        let mut exprs: Vec<&Expression> = query.select_exprs.iter().collect();
        if let Some(where_expr) = &query.where_expr {
            exprs.push(where_expr);
        }
        let columns = used_columns_from_expressions(&exprs);
        let reader = BatchReader::new(snapshot.file_paths(), Some(columns));
        Self {
            reader: Some(reader),
            chunk_size,
            snapshot: Some(snapshot),
        }
    }
}

impl Operator for ReaderOperator {
    fn next_batch(&mut self) -> Result<Option<ChunkResult>, EngineError> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Ok(None),
        };
        let batch = match reader.next_batch(self.chunk_size)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let columns = batch.columns.into_iter().map(ChunkColumn::from).collect();
        Ok(Some(ChunkResult {
            row_count: batch.num_rows,
            columns,
            select_idx: None,
            filter_idx: None,
        }))
    }

    fn close(&mut self) {
        self.reader = None;
        self.snapshot = None;
    }
}

/// Source for literal queries: one single-row chunk with no columns, so that
/// literal projections evaluate to exactly one output row.
#[derive(Default)]
pub struct LiteralSourceOperator {
    returned: bool,
}

impl Operator for LiteralSourceOperator {
    fn next_batch(&mut self) -> Result<Option<ChunkResult>, EngineError> {
        if self.returned {
            return Ok(None);
        }
        self.returned = true;
        Ok(Some(ChunkResult {
            row_count: 1,
            columns: Vec::new(),
            select_idx: None,
            filter_idx: None,
        }))
    }

    fn close(&mut self) {}
}

/// Evaluates expressions over each child chunk.
///
/// In filter mode the single predicate column is appended to the chunk and
/// `filter_idx` points at it; rows are not dropped here. In projection mode
/// the chunk columns are replaced by the projected ones and `select_idx`
/// covers all of them.
pub struct TransformationOperator {
    child: Option<Box<dyn Operator>>,
    expressions: Vec<Expression>,
    is_filter: bool,
}

impl TransformationOperator {
    pub fn new_filter(child: Box<dyn Operator>, where_expr: Expression) -> Self {
        Self {
            child: Some(child),
            expressions: vec![where_expr],
            is_filter: true,
        }
    }

    pub fn new_projection(child: Box<dyn Operator>, expressions: Vec<Expression>) -> Self {
        Self {
            child: Some(child),
            expressions,
            is_filter: false,
        }
    }
}

impl Operator for TransformationOperator {
    fn next_batch(&mut self) -> Result<Option<ChunkResult>, EngineError> {
        let child = match self.child.as_mut() {
            Some(c) => c,
            None => return Ok(None),
        };
        let mut batch = match child.next_batch()? {
            Some(b) => b,
            None => return Ok(None),
        };

        let col_mapping: HashMap<String, usize> = batch
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name().to_string(), i))
            .collect();

        let mut new_columns = Vec::with_capacity(self.expressions.len());
        for expr in &self.expressions {
            new_columns.push(expr.evaluate(&batch, &col_mapping)?);
        }

        if self.is_filter {
            batch.columns.extend(new_columns);
            let filter_idx = batch.columns.len() - 1;
            return Ok(Some(ChunkResult {
                row_count: batch.row_count,
                columns: batch.columns,
                select_idx: batch.select_idx,
                filter_idx: Some(filter_idx),
            }));
        }

        let select_idx = (0..new_columns.len()).collect();
        Ok(Some(ChunkResult {
            row_count: batch.row_count,
            columns: new_columns,
            select_idx: Some(select_idx),
            filter_idx: None,
        }))
    }

    fn close(&mut self) {
        if let Some(child) = self.child.as_mut() {
            child.close();
        }
        self.child = None;
        self.expressions.clear();
    }
}

/// Keeps only the rows whose predicate column is true. Passes full chunks
/// through untouched and pulls again instead of emitting empty chunks.
pub struct FilterOperator {
    child: Option<Box<dyn Operator>>,
}

impl FilterOperator {
    pub fn new(child: Box<dyn Operator>) -> Self {
        Self { child: Some(child) }
    }
}

impl Operator for FilterOperator {
    fn next_batch(&mut self) -> Result<Option<ChunkResult>, EngineError> {
        loop {
            let child = match self.child.as_mut() {
                Some(c) => c,
                None => return Ok(None),
            };
            let batch = match child.next_batch()? {
                Some(b) => b,
                None => return Ok(None),
            };

            let filter_idx = batch.filter_idx.ok_or_else(|| {
                EngineError::Runtime("filter received a chunk without a predicate column".into())
            })?;
            let predicate = match batch.columns.get(filter_idx) {
                Some(ChunkColumn::Boolean { values, .. }) => values,
                Some(other) => {
                    return Err(EngineError::Runtime(format!(
                        "filter predicate column has type {}, expected BOOLEAN",
                        other.column_type()
                    )))
                }
                None => {
                    return Err(EngineError::Runtime(format!(
                        "filter predicate index {filter_idx} out of bounds ({} columns)",
                        batch.columns.len()
                    )))
                }
            };

            let pass: Vec<usize> = predicate
                .iter()
                .enumerate()
                .filter_map(|(i, &v)| v.then_some(i))
                .collect();

            if pass.is_empty() {
                continue;
            }
            if pass.len() == batch.row_count as usize {
                return Ok(Some(batch));
            }

            let columns = batch.columns.iter().map(|c| c.gather(&pass)).collect();
            return Ok(Some(ChunkResult {
                row_count: pass.len() as u64,
                columns,
                select_idx: batch.select_idx,
                filter_idx: None,
            }));
        }
    }

    fn close(&mut self) {
        if let Some(child) = self.child.as_mut() {
            child.close();
        }
        self.child = None;
    }
}

/// Yields up to `limit` rows across all upstream chunks, slicing the last one
/// as necessary and closing the child on reaching the cap. A limit of zero
/// emits no rows; no limit passes everything through.
pub struct LimitOperator {
    child: Option<Box<dyn Operator>>,
    limit: Option<u64>,
    emitted: u64,
}

impl LimitOperator {
    pub fn new(child: Box<dyn Operator>, limit: Option<u64>) -> Self {
        Self {
            child: Some(child),
            limit,
            emitted: 0,
        }
    }
}

impl Operator for LimitOperator {
    fn next_batch(&mut self) -> Result<Option<ChunkResult>, EngineError> {
        if let Some(limit) = self.limit {
            if self.emitted >= limit {
                self.close();
                return Ok(None);
            }
        }
        let child = match self.child.as_mut() {
            Some(c) => c,
            None => return Ok(None),
        };
        let batch = match child.next_batch()? {
            Some(b) => b,
            None => return Ok(None),
        };

        let limit = match self.limit {
            Some(l) => l,
            None => return Ok(Some(batch)),
        };

        let remaining = limit - self.emitted;
        if batch.row_count <= remaining {
            self.emitted += batch.row_count;
            return Ok(Some(batch));
        }

        let columns = batch
            .columns
            .iter()
            .map(|c| c.slice(0, remaining as usize))
            .collect();
        self.emitted = limit;
        Ok(Some(ChunkResult {
            row_count: remaining,
            columns,
            select_idx: batch.select_idx,
            filter_idx: batch.filter_idx,
        }))
    }

    fn close(&mut self) {
        if let Some(child) = self.child.as_mut() {
            child.close();
        }
        self.child = None;
    }
}

/// Concatenate chunks that share one schema into a single chunk. The merged
/// chunk keeps the first chunk's projection and predicate indices.
pub fn merge_chunks(chunks: &[ChunkResult]) -> Result<Option<ChunkResult>, EngineError> {
    let first = match chunks.first() {
        Some(f) => f,
        None => return Ok(None),
    };

    let mut columns: Vec<ChunkColumn> = first.columns.iter().map(|c| c.clone_empty()).collect();
    let mut row_count = 0u64;
    for chunk in chunks {
        if chunk.columns.len() != columns.len() {
            return Err(EngineError::Runtime(format!(
                "cannot merge chunk with {} columns into schema of {} columns",
                chunk.columns.len(),
                columns.len()
            )));
        }
        for (dst, src) in columns.iter_mut().zip(&chunk.columns) {
            dst.append_from(src)?;
        }
        row_count += chunk.row_count;
    }

    Ok(Some(ChunkResult {
        row_count,
        columns,
        select_idx: first.select_idx.clone(),
        filter_idx: first.filter_idx,
    }))
}

/// Drain an operator to end of stream and shape the concatenated chunks into
/// a columnar result.
pub fn collect_all_batches(op: &mut dyn Operator) -> Result<ColumnarResult, EngineError> {
    let mut chunks = Vec::new();
    loop {
        match op.next_batch()? {
            None => break,
            Some(batch) if batch.row_count == 0 => continue,
            Some(batch) => chunks.push(batch),
        }
    }
    match merge_chunks(&chunks)? {
        None => Ok(ColumnarResult {
            row_count: 0,
            columns: Vec::new(),
        }),
        Some(chunk) => Ok(chunk.to_columnar_result()),
    }
}
