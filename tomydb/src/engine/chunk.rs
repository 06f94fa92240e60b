/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! In-memory batch representation passed between operators.
//!
//! A chunk is a fixed-size horizontal slice of rows. Columns are typed
//! vectors; varchar columns keep a contiguous byte buffer plus zero-based
//! row offsets. Slicing and gathering always produce compacted buffers that
//! never alias their source.

use crate::error::EngineError;
use crate::serialization::Column;
use crate::ColumnType;
use serde::Deserialize;
use serde::Serialize;
use std::cmp::Ordering;

/// Column types that can appear in a chunk. Boolean columns are produced by
/// expressions only and are never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkColumnType {
    Int64,
    Varchar,
    Boolean,
}

impl From<ColumnType> for ChunkColumnType {
    fn from(t: ColumnType) -> Self {
        match t {
            ColumnType::Int64 => ChunkColumnType::Int64,
            ColumnType::Varchar => ChunkColumnType::Varchar,
        }
    }
}

impl std::fmt::Display for ChunkColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkColumnType::Int64 => write!(f, "INT64"),
            ChunkColumnType::Varchar => write!(f, "VARCHAR"),
            ChunkColumnType::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

/// One typed cell, used for row-at-a-time work: sort run records and
/// heap-merge comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Int64(i64),
    Varchar(String),
    Boolean(bool),
}

/// Compare two cells of the same type; booleans order false before true,
/// varchars by lexicographic byte order.
pub fn compare_cells(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::Int64(x), CellValue::Int64(y)) => x.cmp(y),
        (CellValue::Varchar(x), CellValue::Varchar(y)) => x.as_bytes().cmp(y.as_bytes()),
        (CellValue::Boolean(x), CellValue::Boolean(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkColumn {
    Int64 {
        name: String,
        values: Vec<i64>,
    },
    Varchar {
        name: String,
        offsets: Vec<u64>,
        data: Vec<u8>,
    },
    Boolean {
        name: String,
        values: Vec<bool>,
    },
}

impl From<Column> for ChunkColumn {
    fn from(col: Column) -> Self {
        match col {
            Column::Int64 { name, values } => ChunkColumn::Int64 { name, values },
            Column::Varchar {
                name,
                offsets,
                data,
            } => ChunkColumn::Varchar {
                name,
                offsets,
                data,
            },
        }
    }
}

impl ChunkColumn {
    pub fn name(&self) -> &str {
        match self {
            ChunkColumn::Int64 { name, .. } => name,
            ChunkColumn::Varchar { name, .. } => name,
            ChunkColumn::Boolean { name, .. } => name,
        }
    }

    pub fn column_type(&self) -> ChunkColumnType {
        match self {
            ChunkColumn::Int64 { .. } => ChunkColumnType::Int64,
            ChunkColumn::Varchar { .. } => ChunkColumnType::Varchar,
            ChunkColumn::Boolean { .. } => ChunkColumnType::Boolean,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            ChunkColumn::Int64 { values, .. } => values.len(),
            ChunkColumn::Varchar { offsets, .. } => offsets.len(),
            ChunkColumn::Boolean { values, .. } => values.len(),
        }
    }

    pub fn size_in_bytes(&self) -> u64 {
        match self {
            ChunkColumn::Int64 { values, .. } => values.len() as u64 * 8,
            ChunkColumn::Varchar { offsets, data, .. } => {
                offsets.len() as u64 * 8 + data.len() as u64
            }
            ChunkColumn::Boolean { values, .. } => values.len() as u64,
        }
    }

    /// Build a varchar chunk column from string rows.
    pub fn varchar_from_strings(name: impl Into<String>, values: &[&str]) -> ChunkColumn {
        let mut offsets = Vec::with_capacity(values.len());
        let mut data = Vec::new();
        for v in values {
            offsets.push(data.len() as u64);
            data.extend_from_slice(v.as_bytes());
        }
        ChunkColumn::Varchar {
            name: name.into(),
            offsets,
            data,
        }
    }

    /// Bytes of one varchar row. Panics if called on a non-varchar column;
    /// callers dispatch on the variant first.
    pub(crate) fn varchar_row<'a>(offsets: &[u64], data: &'a [u8], row: usize) -> &'a [u8] {
        let start = offsets[row] as usize;
        let end = if row + 1 < offsets.len() {
            offsets[row + 1] as usize
        } else {
            data.len()
        };
        &data[start..end]
    }

    /// One cell as an owned value.
    pub fn cell(&self, row: usize) -> CellValue {
        match self {
            ChunkColumn::Int64 { values, .. } => CellValue::Int64(values[row]),
            ChunkColumn::Varchar { offsets, data, .. } => CellValue::Varchar(
                String::from_utf8_lossy(Self::varchar_row(offsets, data, row)).into_owned(),
            ),
            ChunkColumn::Boolean { values, .. } => CellValue::Boolean(values[row]),
        }
    }

    /// Append one cell; the cell type must match the column type.
    pub fn push_cell(&mut self, cell: &CellValue) -> Result<(), EngineError> {
        match (self, cell) {
            (ChunkColumn::Int64 { values, .. }, CellValue::Int64(v)) => values.push(*v),
            (
                ChunkColumn::Varchar { offsets, data, .. },
                CellValue::Varchar(v),
            ) => {
                offsets.push(data.len() as u64);
                data.extend_from_slice(v.as_bytes());
            }
            (ChunkColumn::Boolean { values, .. }, CellValue::Boolean(v)) => values.push(*v),
            (col, cell) => {
                return Err(EngineError::Runtime(format!(
                    "cell {cell:?} does not match column type {}",
                    col.column_type()
                )))
            }
        }
        Ok(())
    }

    /// Compare the cells at two rows of this column.
    pub fn compare_rows(&self, i: usize, j: usize) -> Ordering {
        match self {
            ChunkColumn::Int64 { values, .. } => values[i].cmp(&values[j]),
            ChunkColumn::Varchar { offsets, data, .. } => {
                Self::varchar_row(offsets, data, i).cmp(Self::varchar_row(offsets, data, j))
            }
            ChunkColumn::Boolean { values, .. } => values[i].cmp(&values[j]),
        }
    }

    /// Same name and type, no rows.
    pub fn clone_empty(&self) -> ChunkColumn {
        match self {
            ChunkColumn::Int64 { name, .. } => ChunkColumn::Int64 {
                name: name.clone(),
                values: Vec::new(),
            },
            ChunkColumn::Varchar { name, .. } => ChunkColumn::Varchar {
                name: name.clone(),
                offsets: Vec::new(),
                data: Vec::new(),
            },
            ChunkColumn::Boolean { name, .. } => ChunkColumn::Boolean {
                name: name.clone(),
                values: Vec::new(),
            },
        }
    }

    /// Collect the rows at `indices` (in order, duplicates allowed) into a
    /// fresh column. Varchar rows are copied into a compact buffer.
    pub fn gather(&self, indices: &[usize]) -> ChunkColumn {
        match self {
            ChunkColumn::Int64 { name, values } => ChunkColumn::Int64 {
                name: name.clone(),
                values: indices.iter().map(|&i| values[i]).collect(),
            },
            ChunkColumn::Boolean { name, values } => ChunkColumn::Boolean {
                name: name.clone(),
                values: indices.iter().map(|&i| values[i]).collect(),
            },
            ChunkColumn::Varchar {
                name,
                offsets,
                data,
            } => {
                let total: usize = indices
                    .iter()
                    .map(|&i| Self::varchar_row(offsets, data, i).len())
                    .sum();
                let mut new_offsets = Vec::with_capacity(indices.len());
                let mut new_data = Vec::with_capacity(total);
                for &i in indices {
                    new_offsets.push(new_data.len() as u64);
                    new_data.extend_from_slice(Self::varchar_row(offsets, data, i));
                }
                ChunkColumn::Varchar {
                    name: name.clone(),
                    offsets: new_offsets,
                    data: new_data,
                }
            }
        }
    }

    /// Copy out the contiguous row range `[start, start + count)`.
    pub fn slice(&self, start: usize, count: usize) -> ChunkColumn {
        match self {
            ChunkColumn::Int64 { name, values } => ChunkColumn::Int64 {
                name: name.clone(),
                values: values[start..start + count].to_vec(),
            },
            ChunkColumn::Boolean { name, values } => ChunkColumn::Boolean {
                name: name.clone(),
                values: values[start..start + count].to_vec(),
            },
            ChunkColumn::Varchar {
                name,
                offsets,
                data,
            } => {
                let data_start = if count == 0 { 0 } else { offsets[start] as usize };
                let data_end = if count == 0 {
                    0
                } else if start + count < offsets.len() {
                    offsets[start + count] as usize
                } else {
                    data.len()
                };
                ChunkColumn::Varchar {
                    name: name.clone(),
                    offsets: offsets[start..start + count]
                        .iter()
                        .map(|o| o - data_start as u64)
                        .collect(),
                    data: data[data_start..data_end].to_vec(),
                }
            }
        }
    }

    /// Append every row of `other` to this column; both must share a type.
    pub fn append_from(&mut self, other: &ChunkColumn) -> Result<(), EngineError> {
        match (self, other) {
            (ChunkColumn::Int64 { values, .. }, ChunkColumn::Int64 { values: src, .. }) => {
                values.extend_from_slice(src);
            }
            (ChunkColumn::Boolean { values, .. }, ChunkColumn::Boolean { values: src, .. }) => {
                values.extend_from_slice(src);
            }
            (
                ChunkColumn::Varchar { offsets, data, .. },
                ChunkColumn::Varchar {
                    offsets: src_offsets,
                    data: src_data,
                    ..
                },
            ) => {
                let base = data.len() as u64;
                offsets.extend(src_offsets.iter().map(|o| o + base));
                data.extend_from_slice(src_data);
            }
            (dst, src) => {
                return Err(EngineError::Runtime(format!(
                    "cannot merge column of type {} into column of type {}",
                    src.column_type(),
                    dst.column_type()
                )))
            }
        }
        Ok(())
    }

    /// Lower this column to the result-boundary shape.
    pub fn to_result_column(&self) -> ResultColumn {
        match self {
            ChunkColumn::Int64 { values, .. } => ResultColumn::Int64(values.clone()),
            ChunkColumn::Boolean { values, .. } => ResultColumn::Boolean(values.clone()),
            ChunkColumn::Varchar { offsets, data, .. } => {
                let mut out = Vec::with_capacity(offsets.len());
                for i in 0..offsets.len() {
                    out.push(
                        String::from_utf8_lossy(Self::varchar_row(offsets, data, i)).into_owned(),
                    );
                }
                ResultColumn::Varchar(out)
            }
        }
    }
}

/// One batch flowing through the operator pipeline.
///
/// `select_idx` names the projection-output columns; `filter_idx` names the
/// boolean column the next filter operator should apply. All columns share
/// `row_count` rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult {
    pub row_count: u64,
    pub columns: Vec<ChunkColumn>,
    pub select_idx: Option<Vec<usize>>,
    pub filter_idx: Option<usize>,
}

impl ChunkResult {
    pub fn size_in_bytes(&self) -> u64 {
        self.columns.iter().map(|c| c.size_in_bytes()).sum()
    }

    /// Lower the projection-output columns to the columnar result shape.
    /// Without a `select_idx` every column is part of the result.
    pub fn to_columnar_result(&self) -> ColumnarResult {
        let columns = match &self.select_idx {
            Some(idx) => idx
                .iter()
                .map(|&i| self.columns[i].to_result_column())
                .collect(),
            None => self.columns.iter().map(|c| c.to_result_column()).collect(),
        };
        ColumnarResult {
            row_count: self.row_count,
            columns,
        }
    }
}

/// Final query result: plain vectors in projection order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnarResult {
    pub row_count: u64,
    pub columns: Vec<ResultColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultColumn {
    Int64(Vec<i64>),
    Varchar(Vec<String>),
    Boolean(Vec<bool>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varchar_gather_compacts() {
        let col = ChunkColumn::varchar_from_strings("s", &["aa", "bbb", "c", "dddd"]);
        let gathered = col.gather(&[3, 1]);
        match &gathered {
            ChunkColumn::Varchar { offsets, data, .. } => {
                assert_eq!(offsets, &vec![0, 4]);
                assert_eq!(data, b"ddddbbb");
            }
            other => panic!("unexpected column {other:?}"),
        }
    }

    #[test]
    fn test_varchar_slice_compacts() {
        let col = ChunkColumn::varchar_from_strings("s", &["aa", "bbb", "c"]);
        let sliced = col.slice(1, 2);
        match &sliced {
            ChunkColumn::Varchar { offsets, data, .. } => {
                assert_eq!(offsets, &vec![0, 3]);
                assert_eq!(data, b"bbbc");
            }
            other => panic!("unexpected column {other:?}"),
        }
    }

    #[test]
    fn test_append_from_rebases_offsets() {
        let mut dst = ChunkColumn::varchar_from_strings("s", &["xy"]);
        let src = ChunkColumn::varchar_from_strings("s", &["", "abc"]);
        dst.append_from(&src).unwrap();
        match &dst {
            ChunkColumn::Varchar { offsets, data, .. } => {
                assert_eq!(offsets, &vec![0, 2, 2]);
                assert_eq!(data, b"xyabc");
            }
            other => panic!("unexpected column {other:?}"),
        }
    }

    #[test]
    fn test_append_type_mismatch() {
        let mut dst = ChunkColumn::Int64 {
            name: "a".into(),
            values: vec![1],
        };
        let src = ChunkColumn::Boolean {
            name: "b".into(),
            values: vec![true],
        };
        assert!(matches!(
            dst.append_from(&src),
            Err(EngineError::Runtime(_))
        ));
    }

    #[test]
    fn test_size_in_bytes() {
        let chunk = ChunkResult {
            row_count: 2,
            columns: vec![
                ChunkColumn::Int64 {
                    name: "a".into(),
                    values: vec![1, 2],
                },
                ChunkColumn::varchar_from_strings("b", &["xy", "z"]),
                ChunkColumn::Boolean {
                    name: "c".into(),
                    values: vec![true, false],
                },
            ],
            select_idx: None,
            filter_idx: None,
        };
        // 2*8 + (2*8 + 3) + 2
        assert_eq!(chunk.size_in_bytes(), 16 + 19 + 2);
    }

    #[test]
    fn test_to_columnar_result_respects_select_idx() {
        let chunk = ChunkResult {
            row_count: 2,
            columns: vec![
                ChunkColumn::Int64 {
                    name: "hidden".into(),
                    values: vec![7, 8],
                },
                ChunkColumn::varchar_from_strings("s", &["a", "b"]),
            ],
            select_idx: Some(vec![1]),
            filter_idx: None,
        };
        let result = chunk.to_columnar_result();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.columns.len(), 1);
        assert_eq!(
            result.columns[0],
            ResultColumn::Varchar(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_compare_cells() {
        use std::cmp::Ordering::*;
        assert_eq!(
            compare_cells(&CellValue::Int64(1), &CellValue::Int64(2)),
            Less
        );
        assert_eq!(
            compare_cells(
                &CellValue::Varchar("abc".into()),
                &CellValue::Varchar("abd".into())
            ),
            Less
        );
        assert_eq!(
            compare_cells(&CellValue::Boolean(false), &CellValue::Boolean(true)),
            Less
        );
    }

    #[test]
    fn test_result_column_json() {
        let result = ColumnarResult {
            row_count: 2,
            columns: vec![
                ResultColumn::Int64(vec![1, 2]),
                ResultColumn::Varchar(vec!["a".into(), "b".into()]),
                ResultColumn::Boolean(vec![true, false]),
            ],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["rowCount"], 2);
        assert_eq!(json["columns"][0][1], 2);
        assert_eq!(json["columns"][1][0], "a");
        assert_eq!(json["columns"][2][1], false);
    }
}
