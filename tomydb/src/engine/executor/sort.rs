/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! Sorting operators: an in-memory permutation sort and an external merge
//! sort that spills sorted runs to disk and merges them back with a heap.
//!
//! Run files are streams of length-prefixed row records; each record is the
//! full row as a sequence of typed values in the child's column order. Merge
//! ties on equal keys break by run index, so the external sort emits exactly
//! the sequence a stable in-memory sort would.

use crate::engine::chunk::compare_cells;
use crate::engine::chunk::CellValue;
use crate::engine::chunk::ChunkColumn;
use crate::engine::chunk::ChunkColumnType;
use crate::engine::chunk::ChunkResult;
use crate::engine::executor::operators::merge_chunks;
use crate::engine::executor::operators::Operator;
use crate::engine::planner::SortField;
use crate::error::EngineError;
use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

type Row = Vec<CellValue>;

/// Stable lexicographic comparison of two rows under the sort fields.
fn compare_rows_in_chunk(columns: &[ChunkColumn], fields: &[SortField], i: usize, j: usize) -> Ordering {
    for field in fields {
        let ord = columns[field.index].compare_rows(i, j);
        let ord = if field.ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_cell_rows(a: &Row, b: &Row, fields: &[SortField]) -> Ordering {
    for field in fields {
        let ord = compare_cells(&a[field.index], &b[field.index]);
        let ord = if field.ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Sort a chunk's rows by a stable permutation over the sort fields, then
/// gather every column through the permutation.
pub fn sort_chunk(chunk: ChunkResult, fields: &[SortField]) -> ChunkResult {
    let mut perm: Vec<usize> = (0..chunk.row_count as usize).collect();
    perm.sort_by(|&a, &b| compare_rows_in_chunk(&chunk.columns, fields, a, b));
    let columns = chunk.columns.iter().map(|c| c.gather(&perm)).collect();
    ChunkResult {
        row_count: chunk.row_count,
        columns,
        select_idx: chunk.select_idx,
        filter_idx: chunk.filter_idx,
    }
}

/// In-memory sort: drains the child, sorts everything at once, then re-emits
/// the sorted rows in chunks.
pub struct SortOperator {
    child: Option<Box<dyn Operator>>,
    sort_fields: Vec<SortField>,
    chunk_size: usize,
    sorted: Option<ChunkResult>,
    offset: u64,
    drained: bool,
}

impl SortOperator {
    pub fn new(child: Box<dyn Operator>, sort_fields: Vec<SortField>, chunk_size: usize) -> Self {
        Self {
            child: Some(child),
            sort_fields,
            chunk_size,
            sorted: None,
            offset: 0,
            drained: false,
        }
    }

    fn drain_and_sort(&mut self) -> Result<(), EngineError> {
        let mut chunks = Vec::new();
        if let Some(child) = self.child.as_mut() {
            while let Some(batch) = child.next_batch()? {
                if batch.row_count == 0 {
                    continue;
                }
                chunks.push(batch);
            }
        }
        if let Some(merged) = merge_chunks(&chunks)? {
            self.sorted = Some(sort_chunk(merged, &self.sort_fields));
        }
        self.drained = true;
        Ok(())
    }
}

impl Operator for SortOperator {
    fn next_batch(&mut self) -> Result<Option<ChunkResult>, EngineError> {
        if !self.drained {
            self.drain_and_sort()?;
        }
        let sorted = match self.sorted.as_ref() {
            Some(s) => s,
            None => return Ok(None),
        };
        if self.offset >= sorted.row_count {
            return Ok(None);
        }

        let end = (self.offset + self.chunk_size as u64).min(sorted.row_count);
        let count = (end - self.offset) as usize;
        let columns = sorted
            .columns
            .iter()
            .map(|c| c.slice(self.offset as usize, count))
            .collect();
        let result = ChunkResult {
            row_count: count as u64,
            columns,
            select_idx: sorted.select_idx.clone(),
            filter_idx: sorted.filter_idx,
        };
        self.offset = end;
        Ok(Some(result))
    }

    fn close(&mut self) {
        if let Some(child) = self.child.as_mut() {
            child.close();
        }
        self.child = None;
        self.sorted = None;
    }
}

struct RunWriter {
    writer: BufWriter<File>,
}

impl RunWriter {
    fn create(path: &PathBuf) -> Result<Self, EngineError> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    fn write_row(&mut self, row: &Row) -> Result<(), EngineError> {
        let bytes = bincode::serialize(row)
            .map_err(|e| EngineError::Codec(format!("failed to encode run row: {e}")))?;
        self.writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.writer.write_all(&bytes)?;
        Ok(())
    }

    fn finish(mut self) -> Result<(), EngineError> {
        self.writer.flush()?;
        Ok(())
    }
}

struct RunReader {
    reader: BufReader<File>,
    eof: bool,
}

impl RunReader {
    fn open(path: &PathBuf) -> Result<Self, EngineError> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            eof: false,
        })
    }

    fn read_row(&mut self) -> Result<Option<Row>, EngineError> {
        if self.eof {
            return Ok(None);
        }
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.eof = true;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut row_buf = vec![0u8; len];
        self.reader.read_exact(&mut row_buf)?;
        let row = bincode::deserialize(&row_buf)
            .map_err(|e| EngineError::Codec(format!("failed to decode run row: {e}")))?;
        Ok(Some(row))
    }

    fn read_batch(&mut self, batch_size: usize) -> Result<Vec<Row>, EngineError> {
        let mut rows = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            match self.read_row()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }
}

/// Owns the spilled run files of one sort: creates them under a per-query
/// scratch directory and removes the whole directory on close.
struct RunFilesManager {
    dir: PathBuf,
    files: Vec<PathBuf>,
    readers: Vec<RunReader>,
    reader_batch_size: usize,
}

impl RunFilesManager {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            files: Vec::new(),
            readers: Vec::new(),
            reader_batch_size: 0,
        }
    }

    fn used(&self) -> bool {
        !self.files.is_empty()
    }

    fn save_chunk(&mut self, chunk: &ChunkResult) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("run_{}.bin", self.files.len()));
        let mut writer = RunWriter::create(&path)?;
        for i in 0..chunk.row_count as usize {
            let row: Row = chunk.columns.iter().map(|c| c.cell(i)).collect();
            writer.write_row(&row)?;
        }
        writer.finish()?;
        self.files.push(path);
        Ok(())
    }

    /// Open every run and read its first buffer. Each reader gets a buffer of
    /// `chunk_size / num_runs` rows (at least one).
    fn open_readers(&mut self, chunk_size: usize) -> Result<Vec<(usize, Vec<Row>)>, EngineError> {
        self.reader_batch_size = (chunk_size / self.files.len()).max(1);
        let mut initial = Vec::with_capacity(self.files.len());
        for i in 0..self.files.len() {
            let mut reader = RunReader::open(&self.files[i])?;
            let rows = reader.read_batch(self.reader_batch_size)?;
            self.readers.push(reader);
            if !rows.is_empty() {
                initial.push((i, rows));
            }
        }
        Ok(initial)
    }

    fn read_batch(&mut self, reader_idx: usize) -> Result<Vec<Row>, EngineError> {
        self.readers[reader_idx].read_batch(self.reader_batch_size)
    }

    fn close(&mut self) {
        self.readers.clear();
        if self.dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!(dir = %self.dir.display(), error = %e, "failed to remove sort scratch directory");
            }
        }
        self.files.clear();
    }
}

/// One run's cursor inside the merge heap. Ordering follows the sort fields
/// on the current row, with the run index breaking ties.
struct MergeNode {
    rows: Vec<Row>,
    next: usize,
    run_idx: usize,
    fields: Arc<Vec<SortField>>,
}

impl MergeNode {
    fn current(&self) -> &Row {
        &self.rows[self.next]
    }
}

impl PartialEq for MergeNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeNode {}

impl PartialOrd for MergeNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeNode {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_cell_rows(self.current(), other.current(), &self.fields)
            .then(self.run_idx.cmp(&other.run_idx))
    }
}

/// External merge sort.
///
/// Ingestion accumulates child chunks until the next one would push the
/// accumulated size over the memory limit, then sorts the accumulator and
/// spills it as a run. If nothing was spilled the sorted rows are served from
/// memory; otherwise every run is merged through a min-heap.
pub struct ExternalMergeSortOperator {
    child: Option<Box<dyn Operator>>,
    sort_fields: Arc<Vec<SortField>>,
    chunk_size: usize,
    memory_limit_bytes: u64,
    runs: RunFilesManager,
    heap: BinaryHeap<Reverse<MergeNode>>,
    saved_select_idx: Option<Vec<usize>>,
    saved_schema: Vec<(String, ChunkColumnType)>,
    sorted: Option<ChunkResult>,
    offset: u64,
    ingested: bool,
}

impl ExternalMergeSortOperator {
    pub fn new(
        child: Box<dyn Operator>,
        sort_fields: Vec<SortField>,
        chunk_size: usize,
        memory_limit_bytes: u64,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            child: Some(child),
            sort_fields: Arc::new(sort_fields),
            chunk_size,
            memory_limit_bytes,
            runs: RunFilesManager::new(scratch_dir),
            heap: BinaryHeap::new(),
            saved_select_idx: None,
            saved_schema: Vec::new(),
            sorted: None,
            offset: 0,
            ingested: false,
        }
    }

    fn ingest(&mut self) -> Result<(), EngineError> {
        let mut accumulated: Vec<ChunkResult> = Vec::new();
        let mut accumulated_bytes = 0u64;

        if let Some(child) = self.child.as_mut() {
            while let Some(batch) = child.next_batch()? {
                if batch.row_count == 0 {
                    continue;
                }
                if self.saved_select_idx.is_none() {
                    self.saved_select_idx = batch.select_idx.clone();
                }
                if self.saved_schema.is_empty() {
                    self.saved_schema = batch
                        .columns
                        .iter()
                        .map(|c| (c.name().to_string(), c.column_type()))
                        .collect();
                }

                let batch_bytes = batch.size_in_bytes();
                if accumulated_bytes > 0
                    && accumulated_bytes + batch_bytes > self.memory_limit_bytes
                {
                    spill(&mut self.runs, &accumulated, &self.sort_fields)?;
                    accumulated.clear();
                    accumulated_bytes = 0;
                }
                accumulated.push(batch);
                accumulated_bytes += batch_bytes;
            }
        }

        if self.runs.used() {
            if !accumulated.is_empty() {
                spill(&mut self.runs, &accumulated, &self.sort_fields)?;
            }
            self.init_merge()?;
        } else if let Some(merged) = merge_chunks(&accumulated)? {
            self.sorted = Some(sort_chunk(merged, &self.sort_fields));
        }
        self.ingested = true;
        Ok(())
    }

    fn init_merge(&mut self) -> Result<(), EngineError> {
        for (run_idx, rows) in self.runs.open_readers(self.chunk_size)? {
            self.heap.push(Reverse(MergeNode {
                rows,
                next: 0,
                run_idx,
                fields: Arc::clone(&self.sort_fields),
            }));
        }
        Ok(())
    }

    fn next_batch_from_memory(&mut self) -> Result<Option<ChunkResult>, EngineError> {
        let sorted = match self.sorted.as_ref() {
            Some(s) => s,
            None => return Ok(None),
        };
        if self.offset >= sorted.row_count {
            return Ok(None);
        }
        let end = (self.offset + self.chunk_size as u64).min(sorted.row_count);
        let count = (end - self.offset) as usize;
        let columns = sorted
            .columns
            .iter()
            .map(|c| c.slice(self.offset as usize, count))
            .collect();
        let result = ChunkResult {
            row_count: count as u64,
            columns,
            select_idx: sorted.select_idx.clone(),
            filter_idx: sorted.filter_idx,
        };
        self.offset = end;
        Ok(Some(result))
    }

    fn next_batch_from_merge(&mut self) -> Result<Option<ChunkResult>, EngineError> {
        let mut rows: Vec<Row> = Vec::with_capacity(self.chunk_size);
        while rows.len() < self.chunk_size {
            let Reverse(mut node) = match self.heap.pop() {
                Some(n) => n,
                None => break,
            };
            rows.push(std::mem::take(&mut node.rows[node.next]));
            node.next += 1;

            if node.next < node.rows.len() {
                self.heap.push(Reverse(node));
            } else {
                let refill = self.runs.read_batch(node.run_idx)?;
                if !refill.is_empty() {
                    node.rows = refill;
                    node.next = 0;
                    self.heap.push(Reverse(node));
                }
            }
        }

        if rows.is_empty() {
            return Ok(None);
        }
        self.rows_to_chunk(rows).map(Some)
    }

    fn rows_to_chunk(&self, rows: Vec<Row>) -> Result<ChunkResult, EngineError> {
        let mut columns: Vec<ChunkColumn> = self
            .saved_schema
            .iter()
            .map(|(name, column_type)| match column_type {
                ChunkColumnType::Int64 => ChunkColumn::Int64 {
                    name: name.clone(),
                    values: Vec::with_capacity(rows.len()),
                },
                ChunkColumnType::Varchar => ChunkColumn::Varchar {
                    name: name.clone(),
                    offsets: Vec::with_capacity(rows.len()),
                    data: Vec::new(),
                },
                ChunkColumnType::Boolean => ChunkColumn::Boolean {
                    name: name.clone(),
                    values: Vec::with_capacity(rows.len()),
                },
            })
            .collect();

        for row in &rows {
            for (column, cell) in columns.iter_mut().zip(row) {
                column.push_cell(cell)?;
            }
        }

        Ok(ChunkResult {
            row_count: rows.len() as u64,
            columns,
            select_idx: self.saved_select_idx.clone(),
            filter_idx: None,
        })
    }
}

fn spill(
    runs: &mut RunFilesManager,
    chunks: &[ChunkResult],
    fields: &[SortField],
) -> Result<(), EngineError> {
    if let Some(merged) = merge_chunks(chunks)? {
        let sorted = sort_chunk(merged, fields);
        runs.save_chunk(&sorted)?;
    }
    Ok(())
}

impl Operator for ExternalMergeSortOperator {
    fn next_batch(&mut self) -> Result<Option<ChunkResult>, EngineError> {
        if !self.ingested {
            self.ingest()?;
        }
        if self.runs.used() {
            self.next_batch_from_merge()
        } else {
            self.next_batch_from_memory()
        }
    }

    fn close(&mut self) {
        if let Some(child) = self.child.as_mut() {
            child.close();
        }
        self.child = None;
        self.sorted = None;
        self.heap.clear();
        self.runs.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::operators::tests::VecSourceOperator;
    use crate::engine::planner::SortField;
    use tempfile::tempdir;

    fn two_column_chunk(ids: &[i64], names: &[&str]) -> ChunkResult {
        ChunkResult {
            row_count: ids.len() as u64,
            columns: vec![
                ChunkColumn::Int64 {
                    name: "id".into(),
                    values: ids.to_vec(),
                },
                ChunkColumn::varchar_from_strings("name", names),
            ],
            select_idx: Some(vec![0, 1]),
            filter_idx: None,
        }
    }

    fn drain(op: &mut dyn Operator) -> Vec<ChunkResult> {
        let mut out = Vec::new();
        while let Some(batch) = op.next_batch().unwrap() {
            out.push(batch);
        }
        out
    }

    fn collected_ids(chunks: &[ChunkResult]) -> Vec<i64> {
        let mut out = Vec::new();
        for chunk in chunks {
            match &chunk.columns[0] {
                ChunkColumn::Int64 { values, .. } => out.extend_from_slice(values),
                other => panic!("expected int64 column, got {other:?}"),
            }
        }
        out
    }

    fn collected_names(chunks: &[ChunkResult]) -> Vec<String> {
        let mut out = Vec::new();
        for chunk in chunks {
            match &chunk.columns[1] {
                ChunkColumn::Varchar { offsets, data, .. } => {
                    for i in 0..offsets.len() {
                        out.push(
                            String::from_utf8(
                                ChunkColumn::varchar_row(offsets, data, i).to_vec(),
                            )
                            .unwrap(),
                        );
                    }
                }
                other => panic!("expected varchar column, got {other:?}"),
            }
        }
        out
    }

    #[test]
    fn test_in_memory_sort_ascending() {
        let source = VecSourceOperator::new(vec![
            two_column_chunk(&[3, 1], &["c", "a"]),
            two_column_chunk(&[2], &["b"]),
        ]);
        let mut sort = SortOperator::new(
            Box::new(source),
            vec![SortField {
                index: 0,
                ascending: true,
            }],
            10,
        );
        let chunks = drain(&mut sort);
        assert_eq!(collected_ids(&chunks), vec![1, 2, 3]);
        assert_eq!(collected_names(&chunks), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_by_varchar_descending() {
        let source = VecSourceOperator::new(vec![two_column_chunk(
            &[1, 2, 3],
            &["bob", "alice", "carol"],
        )]);
        let mut sort = SortOperator::new(
            Box::new(source),
            vec![SortField {
                index: 1,
                ascending: false,
            }],
            10,
        );
        let chunks = drain(&mut sort);
        assert_eq!(collected_names(&chunks), vec!["carol", "bob", "alice"]);
        assert_eq!(collected_ids(&chunks), vec![3, 1, 2]);
    }

    #[test]
    fn test_sort_is_stable_on_equal_keys() {
        // Equal ids keep their arrival order in the second column.
        let source = VecSourceOperator::new(vec![two_column_chunk(
            &[1, 1, 1, 0],
            &["first", "second", "third", "zero"],
        )]);
        let mut sort = SortOperator::new(
            Box::new(source),
            vec![SortField {
                index: 0,
                ascending: true,
            }],
            10,
        );
        let chunks = drain(&mut sort);
        assert_eq!(
            collected_names(&chunks),
            vec!["zero", "first", "second", "third"]
        );
    }

    #[test]
    fn test_sort_emits_chunk_size_batches() {
        let source = VecSourceOperator::new(vec![two_column_chunk(
            &[5, 4, 3, 2, 1],
            &["e", "d", "c", "b", "a"],
        )]);
        let mut sort = SortOperator::new(
            Box::new(source),
            vec![SortField {
                index: 0,
                ascending: true,
            }],
            2,
        );
        let chunks = drain(&mut sort);
        assert_eq!(
            chunks.iter().map(|c| c.row_count).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert_eq!(collected_ids(&chunks), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_multi_field_sort() {
        let source = VecSourceOperator::new(vec![two_column_chunk(
            &[1, 2, 1, 2],
            &["x", "x", "y", "y"],
        )]);
        // name DESC, then id ASC
        let mut sort = SortOperator::new(
            Box::new(source),
            vec![
                SortField {
                    index: 1,
                    ascending: false,
                },
                SortField {
                    index: 0,
                    ascending: true,
                },
            ],
            10,
        );
        let chunks = drain(&mut sort);
        assert_eq!(collected_names(&chunks), vec!["y", "y", "x", "x"]);
        assert_eq!(collected_ids(&chunks), vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_external_sort_spills_and_matches_in_memory() {
        let scratch = tempdir().unwrap();

        // Interleaved values across many small chunks; a tiny memory limit
        // forces several spilled runs.
        let mut chunks = Vec::new();
        for base in 0..50 {
            let ids: Vec<i64> = (0..20).map(|i| ((base * 20 + i) * 7919) % 1000).collect();
            let names: Vec<String> = ids.iter().map(|v| format!("name_{v:04}")).collect();
            let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
            chunks.push(two_column_chunk(&ids, &name_refs));
        }

        let fields = vec![
            SortField {
                index: 1,
                ascending: true,
            },
            SortField {
                index: 0,
                ascending: false,
            },
        ];

        let mut in_memory = SortOperator::new(
            Box::new(VecSourceOperator::new(chunks.clone())),
            fields.clone(),
            64,
        );
        let expected = drain(&mut in_memory);

        let mut external = ExternalMergeSortOperator::new(
            Box::new(VecSourceOperator::new(chunks)),
            fields,
            64,
            // each chunk is 20 rows * (8 + ~17) bytes, so this forces spills
            2_000,
            scratch.path().join("runs"),
        );
        let actual = drain(&mut external);
        external.close();

        assert_eq!(collected_ids(&expected), collected_ids(&actual));
        assert_eq!(collected_names(&expected), collected_names(&actual));
        assert!(
            !scratch.path().join("runs").exists(),
            "scratch directory must be removed on close"
        );
    }

    #[test]
    fn test_external_sort_in_memory_path_when_under_limit() {
        let scratch = tempdir().unwrap();
        let source = VecSourceOperator::new(vec![two_column_chunk(&[3, 1, 2], &["c", "a", "b"])]);
        let mut external = ExternalMergeSortOperator::new(
            Box::new(source),
            vec![SortField {
                index: 0,
                ascending: true,
            }],
            10,
            u64::MAX,
            scratch.path().join("runs"),
        );
        let chunks = drain(&mut external);
        external.close();
        assert_eq!(collected_ids(&chunks), vec![1, 2, 3]);
        assert!(!scratch.path().join("runs").exists());
    }

    #[test]
    fn test_external_sort_empty_input() {
        let scratch = tempdir().unwrap();
        let source = VecSourceOperator::new(vec![]);
        let mut external = ExternalMergeSortOperator::new(
            Box::new(source),
            vec![SortField {
                index: 0,
                ascending: true,
            }],
            10,
            1_000,
            scratch.path().join("runs"),
        );
        assert!(external.next_batch().unwrap().is_none());
        external.close();
    }

    #[test]
    fn test_external_sort_stable_across_runs() {
        let scratch = tempdir().unwrap();

        // All keys equal; the payload column records arrival order. The
        // external sort must preserve it even though every chunk spills.
        let chunks: Vec<ChunkResult> = (0..10)
            .map(|i| {
                let names = [format!("row_{i}_0"), format!("row_{i}_1")];
                let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
                two_column_chunk(&[7, 7], &name_refs)
            })
            .collect();

        let expected: Vec<String> = (0..10)
            .flat_map(|i| vec![format!("row_{i}_0"), format!("row_{i}_1")])
            .collect();

        let mut external = ExternalMergeSortOperator::new(
            Box::new(VecSourceOperator::new(chunks)),
            vec![SortField {
                index: 0,
                ascending: true,
            }],
            4,
            1,
            scratch.path().join("runs"),
        );
        let sorted = drain(&mut external);
        external.close();
        assert_eq!(collected_names(&sorted), expected);
    }

    #[test]
    fn test_run_file_roundtrip() {
        let scratch = tempdir().unwrap();
        let path = scratch.path().join("run_0.bin");

        let rows: Vec<Row> = vec![
            vec![
                CellValue::Int64(-4),
                CellValue::Varchar("żółw".into()),
                CellValue::Boolean(true),
            ],
            vec![
                CellValue::Int64(i64::MAX),
                CellValue::Varchar(String::new()),
                CellValue::Boolean(false),
            ],
        ];

        let mut writer = RunWriter::create(&path).unwrap();
        for row in &rows {
            writer.write_row(row).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = RunReader::open(&path).unwrap();
        let got = reader.read_batch(10).unwrap();
        assert_eq!(got, rows);
        assert!(reader.read_row().unwrap().is_none());
    }
}
