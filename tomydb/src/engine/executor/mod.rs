/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! Plan execution: COPY loads a CSV file into a freshly serialized data file
//! and atomically appends it to the catalog; SELECT builds the pull pipeline
//! bottom-up, drains it and shapes the collected batches into a result.

pub mod operators;
pub mod sort;

use crate::engine::chunk::ColumnarResult;
use crate::engine::planner::CopyPlan;
use crate::engine::planner::QueryPlan;
use crate::engine::planner::SelectPlan;
use crate::error::EngineError;
use crate::metastore::Metastore;
use crate::monotonic_nanos;
use crate::serialization::Column;
use crate::serialization::ColumnarTable;
use crate::ColumnType;
use operators::collect_all_batches;
use operators::FilterOperator;
use operators::LimitOperator;
use operators::LiteralSourceOperator;
use operators::Operator;
use operators::ReaderOperator;
use operators::TransformationOperator;
use sort::ExternalMergeSortOperator;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

const TABLES_DIR: &str = "tables";
const SCRATCH_DIR: &str = ".sort_runs";

pub struct Executor {
    metastore: Arc<Metastore>,
    tables_dir: PathBuf,
    scratch_dir: PathBuf,
    chunk_size: usize,
    sort_memory_limit_bytes: u64,
}

impl Executor {
    pub fn new(
        metastore: Arc<Metastore>,
        base_dir: impl AsRef<Path>,
        chunk_size: usize,
        sort_memory_limit_bytes: u64,
    ) -> Result<Self, EngineError> {
        let tables_dir = base_dir.as_ref().join(TABLES_DIR);
        fs::create_dir_all(&tables_dir)?;
        Ok(Self {
            metastore,
            tables_dir,
            scratch_dir: base_dir.as_ref().join(SCRATCH_DIR),
            chunk_size,
            sort_memory_limit_bytes,
        })
    }

    /// Execute a plan to completion. COPY produces no result set.
    pub fn execute(
        &self,
        plan: QueryPlan,
        query_id: &str,
    ) -> Result<Option<ColumnarResult>, EngineError> {
        match plan {
            QueryPlan::Copy(copy_plan) => {
                self.execute_copy(&copy_plan)?;
                Ok(None)
            }
            QueryPlan::Select(select_plan) => {
                Ok(Some(self.execute_select(select_plan, query_id)?))
            }
        }
    }

    fn execute_copy(&self, plan: &CopyPlan) -> Result<(), EngineError> {
        let table = self
            .metastore
            .get_table_by_name(&plan.table_name)
            .ok_or_else(|| {
                EngineError::NotFound(format!("table {} does not exist", plan.table_name))
            })?;

        // csv index -> table column index
        let csv_to_table: Vec<usize> = match &plan.columns_mapping {
            None => (0..table.columns.len()).collect(),
            Some(mapping) => mapping
                .iter()
                .map(|name| {
                    table
                        .columns
                        .iter()
                        .position(|c| &c.name == name)
                        .ok_or_else(|| {
                            EngineError::validation(
                                format!("column {name} from CSV mapping not found in table definition"),
                                "destinationColumns",
                            )
                        })
                })
                .collect::<Result<_, _>>()?,
        };
        let expected_fields = csv_to_table.len();

        let mut builders: Vec<Column> = table
            .columns
            .iter()
            .map(|col| match col.column_type {
                ColumnType::Int64 => Column::Int64 {
                    name: col.name.clone(),
                    values: Vec::new(),
                },
                ColumnType::Varchar => Column::Varchar {
                    name: col.name.clone(),
                    offsets: Vec::new(),
                    data: Vec::new(),
                },
            })
            .collect();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(plan.has_header)
            .flexible(true)
            .from_path(&plan.csv_path)?;

        let mut num_rows = 0u64;
        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != expected_fields {
                return Err(EngineError::Format(format!(
                    "row {row_idx} has {} fields, expected {expected_fields}",
                    record.len()
                )));
            }

            for (csv_idx, value) in record.iter().enumerate() {
                let table_idx = csv_to_table[csv_idx];
                match &mut builders[table_idx] {
                    Column::Int64 { name, values } => {
                        let parsed: i64 = value.parse().map_err(|_| {
                            EngineError::Format(format!(
                                "row {row_idx}, column {name}: failed to parse {value:?} as INT64"
                            ))
                        })?;
                        values.push(parsed);
                    }
                    Column::Varchar { offsets, data, .. } => {
                        offsets.push(data.len() as u64);
                        data.extend_from_slice(value.as_bytes());
                    }
                }
            }
            num_rows += 1;
        }

        let columnar = ColumnarTable {
            num_rows,
            columns: builders,
        };

        let file_name = format!("{}_{}.tomy", plan.table_name, monotonic_nanos());
        let out_path = self.tables_dir.join(file_name);
        columnar.serialize(&out_path)?;

        // Attach the finished file to the table. If the table vanished in the
        // meantime, the orphaned file is removed again.
        let out_path_str = out_path.to_string_lossy().into_owned();
        if let Err(e) = self.metastore.add_file(&plan.table_name, &out_path_str) {
            if let Err(rm_err) = fs::remove_file(&out_path) {
                warn!(path = %out_path.display(), error = %rm_err, "failed to remove orphaned data file");
            }
            return Err(e);
        }
        Ok(())
    }

    fn execute_select(
        &self,
        plan: SelectPlan,
        query_id: &str,
    ) -> Result<ColumnarResult, EngineError> {
        let SelectPlan { query, snapshot } = plan;

        let mut op: Box<dyn Operator> = match snapshot {
            None => Box::new(LiteralSourceOperator::default()),
            Some(snapshot) => Box::new(ReaderOperator::new(snapshot, &query, self.chunk_size)),
        };

        if let Some(where_expr) = query.where_expr {
            op = Box::new(TransformationOperator::new_filter(op, where_expr));
            op = Box::new(FilterOperator::new(op));
        }

        op = Box::new(TransformationOperator::new_projection(
            op,
            query.select_exprs,
        ));

        if !query.order_by.is_empty() {
            op = Box::new(ExternalMergeSortOperator::new(
                op,
                query.order_by,
                self.chunk_size,
                self.sort_memory_limit_bytes,
                self.scratch_dir.join(query_id),
            ));
        }

        op = Box::new(LimitOperator::new(op, query.limit));

        let result = collect_all_batches(op.as_mut());
        op.close();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::ApiExpression;
    use crate::api::models::CopyQuery;
    use crate::api::models::SelectQuery;
    use crate::engine::chunk::ResultColumn;
    use crate::engine::planner::Planner;
    use crate::metastore::ColumnDef;
    use std::io::Write;
    use tempfile::tempdir;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Metastore>, Planner, Executor) {
        let dir = tempdir().unwrap();
        let ms = Arc::new(Metastore::new(dir.path()).unwrap());
        let planner = Planner::new(Arc::clone(&ms));
        let executor = Executor::new(Arc::clone(&ms), dir.path(), 128, 1 << 20).unwrap();
        ms.create_table(
            "users",
            vec![
                ColumnDef {
                    name: "id".into(),
                    column_type: ColumnType::Int64,
                },
                ColumnDef {
                    name: "name".into(),
                    column_type: ColumnType::Varchar,
                },
            ],
        )
        .unwrap();
        (dir, ms, planner, executor)
    }

    fn write_csv(dir: &TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn copy_query(dir: &TempDir, csv_name: &str, content: &str) -> CopyQuery {
        CopyQuery {
            source_filepath: write_csv(dir, csv_name, content),
            destination_table_name: "users".into(),
            destination_columns: None,
            does_csv_contain_header: false,
        }
    }

    fn select_all() -> SelectQuery {
        SelectQuery {
            column_clauses: vec![
                ApiExpression::ColumnReference {
                    table_name: Some("users".into()),
                    column_name: "id".into(),
                },
                ApiExpression::ColumnReference {
                    table_name: None,
                    column_name: "name".into(),
                },
            ],
            where_clause: None,
            order_by_clause: None,
            limit_clause: None,
        }
    }

    fn run_copy(planner: &Planner, executor: &Executor, q: &CopyQuery) {
        let plan = planner.plan_copy(q).unwrap();
        executor
            .execute(QueryPlan::Copy(plan), "COPY_test")
            .unwrap();
    }

    #[test]
    fn test_copy_then_select_roundtrip() {
        let (dir, _ms, planner, executor) = setup();
        run_copy(
            &planner,
            &executor,
            &copy_query(&dir, "u.csv", "1,Alice\n2,Bob\n3,Charlie\n"),
        );

        let plan = planner.plan_select(&select_all()).unwrap();
        let result = executor
            .execute(QueryPlan::Select(plan), "SELECT_test")
            .unwrap()
            .unwrap();

        assert_eq!(result.row_count, 3);
        assert_eq!(result.columns[0], ResultColumn::Int64(vec![1, 2, 3]));
        assert_eq!(
            result.columns[1],
            ResultColumn::Varchar(vec!["Alice".into(), "Bob".into(), "Charlie".into()])
        );
    }

    #[test]
    fn test_copy_with_header_skips_first_row() {
        let (dir, _ms, planner, executor) = setup();
        let mut q = copy_query(&dir, "u.csv", "id,name\n7,Greg\n");
        q.does_csv_contain_header = true;
        run_copy(&planner, &executor, &q);

        let plan = planner.plan_select(&select_all()).unwrap();
        let result = executor
            .execute(QueryPlan::Select(plan), "SELECT_test")
            .unwrap()
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns[0], ResultColumn::Int64(vec![7]));
    }

    #[test]
    fn test_copy_with_column_mapping_reorders() {
        let (dir, _ms, planner, executor) = setup();
        let q = CopyQuery {
            source_filepath: write_csv(&dir, "u.csv", "Alice,1\nBob,2\n"),
            destination_table_name: "users".into(),
            destination_columns: Some(vec!["name".into(), "id".into()]),
            does_csv_contain_header: false,
        };
        run_copy(&planner, &executor, &q);

        let plan = planner.plan_select(&select_all()).unwrap();
        let result = executor
            .execute(QueryPlan::Select(plan), "SELECT_test")
            .unwrap()
            .unwrap();
        assert_eq!(result.columns[0], ResultColumn::Int64(vec![1, 2]));
        assert_eq!(
            result.columns[1],
            ResultColumn::Varchar(vec!["Alice".into(), "Bob".into()])
        );
    }

    #[test]
    fn test_copy_invalid_int_fails() {
        let (dir, _ms, planner, executor) = setup();
        let q = copy_query(&dir, "u.csv", "1,Alice\nnope,Bob\n");
        let plan = planner.plan_copy(&q).unwrap();
        let err = executor.execute(QueryPlan::Copy(plan), "COPY_test");
        assert!(matches!(err, Err(EngineError::Format(_))));
    }

    #[test]
    fn test_copy_wrong_field_count_fails() {
        let (dir, ms, planner, executor) = setup();
        let q = copy_query(&dir, "u.csv", "1,Alice\n2\n");
        let plan = planner.plan_copy(&q).unwrap();
        let err = executor.execute(QueryPlan::Copy(plan), "COPY_test");
        assert!(matches!(err, Err(EngineError::Format(_))));

        // a failed copy must not attach a file
        assert!(ms.get_table_by_name("users").unwrap().files.is_empty());
    }

    #[test]
    fn test_literal_select_without_table() {
        let (_dir, _ms, planner, executor) = setup();
        let q = SelectQuery {
            column_clauses: vec![ApiExpression::Literal {
                value: crate::api::models::LiteralValue::Int64(42),
            }],
            where_clause: None,
            order_by_clause: None,
            limit_clause: None,
        };
        let plan = planner.plan_select(&q).unwrap();
        let result = executor
            .execute(QueryPlan::Select(plan), "SELECT_test")
            .unwrap()
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns[0], ResultColumn::Int64(vec![42]));
    }

    #[test]
    fn test_select_empty_table() {
        let (_dir, _ms, planner, executor) = setup();
        let plan = planner.plan_select(&select_all()).unwrap();
        let result = executor
            .execute(QueryPlan::Select(plan), "SELECT_test")
            .unwrap()
            .unwrap();
        assert_eq!(result.row_count, 0);
    }
}
