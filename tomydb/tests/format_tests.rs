/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! File format integration tests: round-trips over larger tables, selective
//! reads, and batched scanning across several files.

use tempfile::tempdir;
use tomydb::serialization::BatchReader;
use tomydb::serialization::Column;
use tomydb::serialization::ColumnarTable;

fn big_table(rows: usize, seed: i64) -> ColumnarTable {
    let ids: Vec<i64> = (0..rows as i64).map(|i| i * seed).collect();
    let names: Vec<String> = (0..rows)
        .map(|i| format!("value_{}_{}", seed, (i * 31) % 997))
        .collect();
    let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    ColumnarTable {
        num_rows: rows as u64,
        columns: vec![
            Column::Int64 {
                name: "id".into(),
                values: ids,
            },
            Column::varchar_from_strings("name", &name_refs),
        ],
    }
}

#[test]
fn test_large_table_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("big.tomy");

    let table = big_table(50_000, 3);
    table.serialize(&path).unwrap();

    let loaded = ColumnarTable::deserialize(&path).unwrap();
    assert_eq!(loaded.num_rows, 50_000);
    assert_eq!(loaded, table);
}

#[test]
fn test_selective_read_skips_other_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.tomy");
    big_table(1_000, 7).serialize(&path).unwrap();

    let only_ids =
        ColumnarTable::deserialize_columns(&path, Some(&["id".to_string()])).unwrap();
    assert_eq!(only_ids.columns.len(), 1);
    assert_eq!(only_ids.columns[0].name(), "id");
    assert_eq!(only_ids.num_rows, 1_000);

    let only_names =
        ColumnarTable::deserialize_columns(&path, Some(&["name".to_string()])).unwrap();
    assert_eq!(only_names.columns.len(), 1);
    assert_eq!(
        only_names.columns[0].string_values().unwrap()[0],
        "value_7_0"
    );
}

#[test]
fn test_batch_reader_row_windows() {
    let dir = tempdir().unwrap();
    let mut paths = Vec::new();
    let mut expected = Vec::new();
    for f in 0..3i64 {
        let path = dir.path().join(format!("part_{f}.tomy"));
        let ids: Vec<i64> = (0..137).map(|i| f * 1_000 + i).collect();
        expected.extend_from_slice(&ids);
        let table = ColumnarTable {
            num_rows: ids.len() as u64,
            columns: vec![Column::Int64 {
                name: "id".into(),
                values: ids,
            }],
        };
        table.serialize(&path).unwrap();
        paths.push(path.to_str().unwrap().to_string());
    }

    let mut reader = BatchReader::new(paths, None);
    let mut seen = Vec::new();
    let mut batches = 0;
    while let Some(batch) = reader.next_batch(50).unwrap() {
        assert!(batch.num_rows <= 50);
        match &batch.columns[0] {
            Column::Int64 { values, .. } => seen.extend_from_slice(values),
            other => panic!("unexpected column {other:?}"),
        }
        batches += 1;
    }

    assert_eq!(seen, expected);
    // 137 rows per file -> 2 full batches and a 37-row tail, per file
    assert_eq!(batches, 9);
}

#[test]
fn test_batch_reader_missing_file_errors() {
    let mut reader = BatchReader::new(vec!["/nonexistent/file.tomy".to_string()], None);
    assert!(reader.next_batch(10).is_err());
}

#[test]
fn test_unicode_and_empty_strings_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("strings.tomy");

    let values = ["", "zażółć gęślą jaźń", "", "日本語テキスト", "plain"];
    let table = ColumnarTable {
        num_rows: values.len() as u64,
        columns: vec![Column::varchar_from_strings("s", &values)],
    };
    table.serialize(&path).unwrap();

    let loaded = ColumnarTable::deserialize(&path).unwrap();
    assert_eq!(
        loaded.columns[0].string_values().unwrap(),
        values.iter().map(|s| s.to_string()).collect::<Vec<_>>()
    );
}
