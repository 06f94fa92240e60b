/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! Serialization of columnar tables to and from the Tomy file format.
//!
//! File layout, in order:
//!   1. 4-byte begin magic `Tomy`.
//!   2. Per-column compressed data blocks in schema order.
//!   3. Metadata block: `varint(num_rows) || varint(num_columns)` and per
//!      column `varint(name_len) || name || u8(type) || i64_le(data_offset)
//!      || varint(compressed_size)`.
//!   4. 8-byte little-endian offset of the metadata block.
//!   5. 4-byte end magic `EndT`.

use crate::compression::compress_int64_column;
use crate::compression::compress_varchar_column;
use crate::compression::decompress_int64_column;
use crate::compression::decompress_varchar_column;
use crate::compression::read_varint;
use crate::compression::write_varint;
use crate::error::EngineError;
use crate::ColumnType;
use std::fs::File;
use std::io::BufWriter;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;

pub const BEGIN_MAGIC: &[u8; 4] = b"Tomy";
pub const END_MAGIC: &[u8; 4] = b"EndT";

const TYPE_TAG_INT64: u8 = 0x01;
const TYPE_TAG_VARCHAR: u8 = 0x02;

/// Footer = 8-byte metadata offset + 4-byte end magic.
const FOOTER_LEN: u64 = 12;

/// A single persisted column. Varchar columns keep their rows as a contiguous
/// byte buffer plus the start offset of each row.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int64 {
        name: String,
        values: Vec<i64>,
    },
    Varchar {
        name: String,
        offsets: Vec<u64>,
        data: Vec<u8>,
    },
}

impl Column {
    pub fn name(&self) -> &str {
        match self {
            Column::Int64 { name, .. } => name,
            Column::Varchar { name, .. } => name,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Column::Int64 { .. } => ColumnType::Int64,
            Column::Varchar { .. } => ColumnType::Varchar,
        }
    }

    pub fn num_rows(&self) -> usize {
        match self {
            Column::Int64 { values, .. } => values.len(),
            Column::Varchar { offsets, .. } => offsets.len(),
        }
    }

    /// Build a varchar column from string rows.
    pub fn varchar_from_strings(name: impl Into<String>, values: &[&str]) -> Column {
        let mut offsets = Vec::with_capacity(values.len());
        let mut data = Vec::new();
        for v in values {
            offsets.push(data.len() as u64);
            data.extend_from_slice(v.as_bytes());
        }
        Column::Varchar {
            name: name.into(),
            offsets,
            data,
        }
    }

    /// Materialize varchar rows as strings. Returns None for int64 columns.
    pub fn string_values(&self) -> Option<Vec<String>> {
        match self {
            Column::Int64 { .. } => None,
            Column::Varchar { offsets, data, .. } => {
                let mut out = Vec::with_capacity(offsets.len());
                for i in 0..offsets.len() {
                    let start = offsets[i] as usize;
                    let end = if i + 1 < offsets.len() {
                        offsets[i + 1] as usize
                    } else {
                        data.len()
                    };
                    out.push(String::from_utf8_lossy(&data[start..end]).into_owned());
                }
                Some(out)
            }
        }
    }

    /// Copy out `count` rows starting at `start`. Varchar offsets are rebased
    /// to zero over a fresh sub-buffer so the slice never aliases the source.
    pub fn slice(&self, start: usize, count: usize) -> Result<Column, EngineError> {
        match self {
            Column::Int64 { name, values } => {
                if start + count > values.len() {
                    return Err(EngineError::Runtime(format!(
                        "slice [{start}, {}) out of bounds for int64 column of {} rows",
                        start + count,
                        values.len()
                    )));
                }
                Ok(Column::Int64 {
                    name: name.clone(),
                    values: values[start..start + count].to_vec(),
                })
            }
            Column::Varchar {
                name,
                offsets,
                data,
            } => {
                if start + count > offsets.len() {
                    return Err(EngineError::Runtime(format!(
                        "slice [{start}, {}) out of bounds for varchar column of {} rows",
                        start + count,
                        offsets.len()
                    )));
                }
                let data_start = if count == 0 {
                    0
                } else {
                    offsets[start] as usize
                };
                let data_end = if count == 0 {
                    0
                } else if start + count < offsets.len() {
                    offsets[start + count] as usize
                } else {
                    data.len()
                };
                let new_offsets = offsets[start..start + count]
                    .iter()
                    .map(|o| o - data_start as u64)
                    .collect();
                Ok(Column::Varchar {
                    name: name.clone(),
                    offsets: new_offsets,
                    data: data[data_start..data_end].to_vec(),
                })
            }
        }
    }

    fn compress(&self) -> Result<Vec<u8>, EngineError> {
        match self {
            Column::Int64 { values, .. } => Ok(compress_int64_column(values)),
            Column::Varchar { offsets, data, .. } => compress_varchar_column(offsets, data),
        }
    }
}

/// A whole table held in memory in columnar form.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarTable {
    pub num_rows: u64,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone)]
struct ColumnMeta {
    name: String,
    column_type: ColumnType,
    data_offset: i64,
    compressed_size: u64,
}

#[derive(Debug)]
struct FileMeta {
    num_rows: u64,
    columns: Vec<ColumnMeta>,
}

impl ColumnarTable {
    /// Serialize the table to `path` in the Tomy format.
    pub fn serialize(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        for col in &self.columns {
            if col.num_rows() as u64 != self.num_rows {
                return Err(EngineError::Format(format!(
                    "column {} has {} rows, table has {}",
                    col.name(),
                    col.num_rows(),
                    self.num_rows
                )));
            }
        }

        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_all(BEGIN_MAGIC)?;
        let mut position = BEGIN_MAGIC.len() as i64;

        let mut metas = Vec::with_capacity(self.columns.len());
        for col in &self.columns {
            let block = col.compress()?;
            metas.push(ColumnMeta {
                name: col.name().to_string(),
                column_type: col.column_type(),
                data_offset: position,
                compressed_size: block.len() as u64,
            });
            w.write_all(&block)?;
            position += block.len() as i64;
        }

        let metadata_offset = position;
        let mut meta_buf = Vec::new();
        write_varint(&mut meta_buf, self.num_rows);
        write_varint(&mut meta_buf, self.columns.len() as u64);
        for m in &metas {
            write_varint(&mut meta_buf, m.name.len() as u64);
            meta_buf.extend_from_slice(m.name.as_bytes());
            meta_buf.push(type_tag(m.column_type));
            meta_buf.extend_from_slice(&m.data_offset.to_le_bytes());
            write_varint(&mut meta_buf, m.compressed_size);
        }
        w.write_all(&meta_buf)?;
        w.write_all(&metadata_offset.to_le_bytes())?;
        w.write_all(END_MAGIC)?;
        w.flush()?;
        Ok(())
    }

    /// Deserialize the whole table.
    pub fn deserialize(path: impl AsRef<Path>) -> Result<ColumnarTable, EngineError> {
        Self::deserialize_columns(path, None)
    }

    /// Deserialize only the named columns, skipping the data blocks of every
    /// other column. The on-disk positional order is preserved in the result;
    /// `None` reads every column.
    pub fn deserialize_columns(
        path: impl AsRef<Path>,
        columns_to_read: Option<&[String]>,
    ) -> Result<ColumnarTable, EngineError> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        if size < (BEGIN_MAGIC.len() as u64 + FOOTER_LEN) {
            return Err(EngineError::Format(format!("file too short: {size} bytes")));
        }

        verify_magic(&mut file, BEGIN_MAGIC, 0)?;
        verify_magic(&mut file, END_MAGIC, size - END_MAGIC.len() as u64)?;

        let footer_start = size - FOOTER_LEN;
        file.seek(SeekFrom::Start(footer_start))?;
        let mut offset_buf = [0u8; 8];
        file.read_exact(&mut offset_buf)?;
        let metadata_offset = i64::from_le_bytes(offset_buf);

        if metadata_offset < BEGIN_MAGIC.len() as i64 || metadata_offset as u64 >= footer_start {
            return Err(EngineError::Format(format!(
                "metadata offset out of range: {metadata_offset}"
            )));
        }

        let metadata_len = footer_start - metadata_offset as u64;
        file.seek(SeekFrom::Start(metadata_offset as u64))?;
        let mut meta_buf = vec![0u8; metadata_len as usize];
        file.read_exact(&mut meta_buf)?;
        let meta = parse_metadata(&meta_buf)?;

        let mut columns = Vec::new();
        for col_meta in &meta.columns {
            if let Some(wanted) = columns_to_read {
                if !wanted.iter().any(|c| c == &col_meta.name) {
                    continue;
                }
            }
            let block_end = col_meta
                .data_offset
                .checked_add(col_meta.compressed_size as i64)
                .filter(|end| *end <= metadata_offset)
                .ok_or_else(|| {
                    EngineError::Format(format!(
                        "column {} block exceeds the data region",
                        col_meta.name
                    ))
                })?;
            if col_meta.data_offset < BEGIN_MAGIC.len() as i64 || block_end < col_meta.data_offset {
                return Err(EngineError::Format(format!(
                    "column {} has invalid data offset {}",
                    col_meta.name, col_meta.data_offset
                )));
            }

            file.seek(SeekFrom::Start(col_meta.data_offset as u64))?;
            let mut block = vec![0u8; col_meta.compressed_size as usize];
            file.read_exact(&mut block).map_err(|e| {
                EngineError::Format(format!("truncated block for column {}: {e}", col_meta.name))
            })?;

            let column = match col_meta.column_type {
                ColumnType::Int64 => {
                    let values = decompress_int64_column(&block, meta.num_rows)?;
                    Column::Int64 {
                        name: col_meta.name.clone(),
                        values,
                    }
                }
                ColumnType::Varchar => {
                    let (offsets, data) = decompress_varchar_column(&block, meta.num_rows)?;
                    Column::Varchar {
                        name: col_meta.name.clone(),
                        offsets,
                        data,
                    }
                }
            };
            columns.push(column);
        }

        Ok(ColumnarTable {
            num_rows: meta.num_rows,
            columns,
        })
    }
}

fn type_tag(t: ColumnType) -> u8 {
    match t {
        ColumnType::Int64 => TYPE_TAG_INT64,
        ColumnType::Varchar => TYPE_TAG_VARCHAR,
    }
}

fn type_from_tag(tag: u8) -> Result<ColumnType, EngineError> {
    match tag {
        TYPE_TAG_INT64 => Ok(ColumnType::Int64),
        TYPE_TAG_VARCHAR => Ok(ColumnType::Varchar),
        other => Err(EngineError::Format(format!("unknown column type tag: {other:#x}"))),
    }
}

fn verify_magic(file: &mut File, expected: &[u8; 4], offset: u64) -> Result<(), EngineError> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)
        .map_err(|e| EngineError::Format(format!("file too short to hold magic: {e}")))?;
    if &buf != expected {
        return Err(EngineError::Format(format!(
            "invalid magic at offset {offset}: expected {:?}, got {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(&buf)
        )));
    }
    Ok(())
}

fn parse_metadata(buf: &[u8]) -> Result<FileMeta, EngineError> {
    let mut pos = 0usize;
    let num_rows = read_varint(buf, &mut pos)?;
    let num_columns = read_varint(buf, &mut pos)?;

    let mut columns = Vec::with_capacity(num_columns as usize);
    for i in 0..num_columns {
        let name_len = read_varint(buf, &mut pos)? as usize;
        let name_end = pos
            .checked_add(name_len)
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| {
                EngineError::Format(format!("truncated name for column {i} in metadata"))
            })?;
        let name = String::from_utf8(buf[pos..name_end].to_vec())
            .map_err(|_| EngineError::Format(format!("column {i} name is not valid UTF-8")))?;
        pos = name_end;

        let tag = *buf
            .get(pos)
            .ok_or_else(|| EngineError::Format("metadata block truncated at column type".into()))?;
        pos += 1;
        let column_type = type_from_tag(tag)?;

        let offset_end = pos
            .checked_add(8)
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| EngineError::Format("metadata block truncated at data offset".into()))?;
        let mut offset_bytes = [0u8; 8];
        offset_bytes.copy_from_slice(&buf[pos..offset_end]);
        let data_offset = i64::from_le_bytes(offset_bytes);
        pos = offset_end;

        let compressed_size = read_varint(buf, &mut pos)?;
        columns.push(ColumnMeta {
            name,
            column_type,
            data_offset,
            compressed_size,
        });
    }

    Ok(FileMeta { num_rows, columns })
}

/// Concatenating, row-windowed reader over the data files of one table.
///
/// Files are loaded lazily one at a time; `next_batch` slices up to the
/// requested number of rows out of the currently loaded file and moves to the
/// next file once the current one is exhausted.
#[derive(Debug)]
pub struct BatchReader {
    file_paths: Vec<String>,
    columns_to_read: Option<Vec<String>>,
    current_file_idx: usize,
    current_table: Option<ColumnarTable>,
    current_row: u64,
}

impl BatchReader {
    pub fn new(file_paths: Vec<String>, columns_to_read: Option<Vec<String>>) -> Self {
        Self {
            file_paths,
            columns_to_read,
            current_file_idx: 0,
            current_table: None,
            current_row: 0,
        }
    }

    /// Next chunk of up to `batch_size` rows, or None at end of stream.
    pub fn next_batch(&mut self, batch_size: usize) -> Result<Option<ColumnarTable>, EngineError> {
        loop {
            if self.current_table.is_none() {
                if self.current_file_idx >= self.file_paths.len() {
                    return Ok(None);
                }
                let path = &self.file_paths[self.current_file_idx];
                let table =
                    ColumnarTable::deserialize_columns(path, self.columns_to_read.as_deref())
                        .map_err(|e| {
                            EngineError::Format(format!("failed to load file {path}: {e}"))
                        })?;
                self.current_table = Some(table);
                self.current_row = 0;
            }

            let table = match self.current_table.as_ref() {
                Some(t) => t,
                None => return Ok(None),
            };
            let remaining = table.num_rows - self.current_row;
            if remaining == 0 {
                self.current_file_idx += 1;
                self.current_table = None;
                continue;
            }

            let to_read = (batch_size as u64).min(remaining);
            let mut columns = Vec::with_capacity(table.columns.len());
            for col in &table.columns {
                columns.push(col.slice(self.current_row as usize, to_read as usize)?);
            }
            self.current_row += to_read;
            return Ok(Some(ColumnarTable {
                num_rows: to_read,
                columns,
            }));
        }
    }

    pub fn close(&mut self) {
        self.current_table = None;
        self.current_file_idx = self.file_paths.len();
    }
}
