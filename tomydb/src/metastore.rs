/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Metastore - Logical Database Structure
//!
//! Maps logical tables (name, columns) to the physical data files that hold
//! their rows. The metastore is persisted as a single JSON document at
//! `{base_dir}/ms_data/metastore.json` and reloaded on startup.
//!
//! Data files are reference counted: a query planning against a table takes a
//! snapshot that pre-increments every file entry, so a concurrent DeleteTable
//! only unlinks a file once the last snapshot holding it is released.

use crate::error::EngineError;
use crate::monotonic_nanos;
use crate::ColumnType;
use parking_lot::Mutex;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// A single column of a table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

#[derive(Debug, Default)]
struct FileState {
    ref_count: i64,
    deleted: bool,
}

/// A reference-counted handle to one immutable data file.
///
/// The catalog holds a strong reference inside the table definition; readers
/// add temporary strong references around a snapshot. The on-disk unlink
/// happens exactly when `deleted && ref_count == 0` first becomes true.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileEntry {
    path: String,
    #[serde(skip)]
    state: Mutex<FileState>,
}

impl FileEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(FileState::default()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn inc_ref(&self) {
        self.state.lock().ref_count += 1;
    }

    pub fn dec_ref(&self) {
        let mut state = self.state.lock();
        state.ref_count -= 1;
        self.try_cleanup(&mut state);
    }

    pub fn mark_deleted(&self) {
        let mut state = self.state.lock();
        state.deleted = true;
        self.try_cleanup(&mut state);
    }

    // Runs with the entry lock held. Unlinking is idempotent against a file
    // that is already missing.
    fn try_cleanup(&self, state: &mut FileState) {
        if state.deleted && state.ref_count == 0 {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path, error = %e, "failed to delete data file");
                }
            }
        }
    }

    #[cfg(test)]
    fn ref_count(&self) -> i64 {
        self.state.lock().ref_count
    }
}

/// Definition of one table: its schema and ordered data files. The column
/// order defines the positional read order in every data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub files: Vec<Arc<FileEntry>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Schema {
    tables: HashMap<String, TableDef>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetastoreState {
    schema: Schema,
    name_to_id: HashMap<String, String>,
}

/// A consistent view of one table's files and columns, taken at planning
/// time. Every file entry is pre-incremented; dropping the snapshot releases
/// all of them, which may trigger deferred unlinks.
#[derive(Debug)]
pub struct TableSnapshot {
    files: Vec<Arc<FileEntry>>,
    pub columns: Vec<ColumnDef>,
}

impl TableSnapshot {
    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path().to_string()).collect()
    }
}

impl Drop for TableSnapshot {
    fn drop(&mut self) {
        for f in &self.files {
            f.dec_ref();
        }
    }
}

/// Thread-safe metastore with JSON persistence.
#[derive(Debug)]
pub struct Metastore {
    state: RwLock<MetastoreState>,
    file_path: PathBuf,
}

impl Metastore {
    const METASTORE_DIR: &'static str = "ms_data";
    const METASTORE_FILENAME: &'static str = "metastore.json";

    /// Create or load the metastore under the given base directory. A missing
    /// metastore file is equivalent to an empty catalog.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        let metastore_dir = base_dir.as_ref().join(Self::METASTORE_DIR);
        fs::create_dir_all(&metastore_dir)?;
        let file_path = metastore_dir.join(Self::METASTORE_FILENAME);

        let state = if file_path.exists() {
            let content = fs::read_to_string(&file_path)?;
            serde_json::from_str(&content)
                .map_err(|e| EngineError::Format(format!("failed to parse metastore file: {e}")))?
        } else {
            MetastoreState::default()
        };

        Ok(Self {
            state: RwLock::new(state),
            file_path,
        })
    }

    // Persists the catalog while the caller still holds the lock, so a
    // mutation is on disk before it becomes visible to anyone else.
    fn save_locked(&self, state: &MetastoreState) -> Result<(), EngineError> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| EngineError::Format(format!("failed to serialize metastore: {e}")))?;
        fs::write(&self.file_path, content)?;
        Ok(())
    }

    /// Create a table and return its generated id.
    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<ColumnDef>,
    ) -> Result<String, EngineError> {
        let mut state = self.state.write();
        if state.name_to_id.contains_key(name) {
            return Err(EngineError::Conflict(format!(
                "table {name} already exists"
            )));
        }

        let table_id = format!("{}_{}", name, monotonic_nanos());
        state.name_to_id.insert(name.to_string(), table_id.clone());
        state.schema.tables.insert(
            table_id.clone(),
            TableDef {
                name: name.to_string(),
                columns,
                files: Vec::new(),
            },
        );
        self.save_locked(&state)?;
        Ok(table_id)
    }

    pub fn get_table_by_name(&self, name: &str) -> Option<TableDef> {
        let state = self.state.read();
        state
            .name_to_id
            .get(name)
            .and_then(|id| state.schema.tables.get(id))
            .cloned()
    }

    pub fn get_table_by_id(&self, id: &str) -> Option<TableDef> {
        let state = self.state.read();
        state.schema.tables.get(id).cloned()
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.state.read().name_to_id.contains_key(name)
    }

    /// Remove a table. Each of its file entries is marked deleted; an entry
    /// with no outstanding snapshot references is unlinked immediately, the
    /// rest are unlinked as their snapshots are released.
    pub fn delete_table(&self, table_id: &str) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let table = state
            .schema
            .tables
            .remove(table_id)
            .ok_or_else(|| EngineError::NotFound(format!("table {table_id} does not exist")))?;

        for f in &table.files {
            f.mark_deleted();
        }
        state.name_to_id.remove(&table.name);
        self.save_locked(&state)?;
        Ok(())
    }

    /// Append a data file to a table. The new entry starts with no references.
    pub fn add_file(&self, table_name: &str, file_path: &str) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let table_id = state
            .name_to_id
            .get(table_name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("table {table_name} does not exist")))?;
        let table = state
            .schema
            .tables
            .get_mut(&table_id)
            .ok_or_else(|| EngineError::NotFound(format!("table {table_name} does not exist")))?;
        table.files.push(Arc::new(FileEntry::new(file_path)));
        self.save_locked(&state)?;
        Ok(())
    }

    /// Snapshot a table's file list and columns with every entry's refcount
    /// pre-incremented. The snapshot releases the references when dropped.
    pub fn get_table_snapshot(&self, table_name: &str) -> Result<TableSnapshot, EngineError> {
        let state = self.state.read();
        let table = state
            .name_to_id
            .get(table_name)
            .and_then(|id| state.schema.tables.get(id))
            .ok_or_else(|| EngineError::NotFound(format!("table {table_name} does not exist")))?;

        let mut files = Vec::with_capacity(table.files.len());
        for f in &table.files {
            f.inc_ref();
            files.push(Arc::clone(f));
        }
        Ok(TableSnapshot {
            files,
            columns: table.columns.clone(),
        })
    }

    /// All tables as (id, name) pairs.
    pub fn get_tables(&self) -> Vec<(String, String)> {
        let state = self.state.read();
        state
            .schema
            .tables
            .iter()
            .map(|(id, t)| (id.clone(), t.name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn int_column(name: &str) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            column_type: ColumnType::Int64,
        }
    }

    fn varchar_column(name: &str) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            column_type: ColumnType::Varchar,
        }
    }

    #[test]
    fn test_create_and_get_table() {
        let dir = tempdir().unwrap();
        let ms = Metastore::new(dir.path()).unwrap();

        let id = ms
            .create_table("users", vec![int_column("id"), varchar_column("name")])
            .unwrap();
        assert!(id.starts_with("users_"));

        let by_name = ms.get_table_by_name("users").unwrap();
        assert_eq!(by_name.name, "users");
        assert_eq!(by_name.columns.len(), 2);

        let by_id = ms.get_table_by_id(&id).unwrap();
        assert_eq!(by_id.name, "users");

        assert!(ms.table_exists("users"));
        assert!(!ms.table_exists("products"));
        assert!(ms.get_table_by_name("products").is_none());
    }

    #[test]
    fn test_duplicate_table_name_conflict() {
        let dir = tempdir().unwrap();
        let ms = Metastore::new(dir.path()).unwrap();

        ms.create_table("users", vec![int_column("id")]).unwrap();
        let err = ms.create_table("users", vec![int_column("id")]);
        assert!(matches!(err, Err(EngineError::Conflict(_))));

        // The failed create must leave no side effects behind a restart.
        drop(ms);
        let ms = Metastore::new(dir.path()).unwrap();
        assert_eq!(ms.get_tables().len(), 1);
    }

    #[test]
    fn test_delete_table() {
        let dir = tempdir().unwrap();
        let ms = Metastore::new(dir.path()).unwrap();

        let id = ms.create_table("users", vec![int_column("id")]).unwrap();
        ms.delete_table(&id).unwrap();
        assert!(ms.get_tables().is_empty());
        assert!(!ms.table_exists("users"));

        assert!(matches!(
            ms.delete_table("nonexistent"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_persistence_across_restart() {
        let dir = tempdir().unwrap();
        let id = {
            let ms = Metastore::new(dir.path()).unwrap();
            let id = ms
                .create_table("users", vec![int_column("id"), varchar_column("name")])
                .unwrap();
            ms.add_file("users", "/data/users_1.tomy").unwrap();
            ms.add_file("users", "/data/users_2.tomy").unwrap();
            id
        };

        let ms = Metastore::new(dir.path()).unwrap();
        let table = ms.get_table_by_id(&id).unwrap();
        assert_eq!(table.files.len(), 2);
        assert_eq!(table.files[0].path(), "/data/users_1.tomy");
        assert_eq!(table.columns[1].column_type, ColumnType::Varchar);
    }

    #[test]
    fn test_delete_then_restart_table_absent() {
        let dir = tempdir().unwrap();
        {
            let ms = Metastore::new(dir.path()).unwrap();
            let id = ms.create_table("logs", vec![int_column("ts")]).unwrap();
            ms.delete_table(&id).unwrap();
        }
        let ms = Metastore::new(dir.path()).unwrap();
        assert!(ms.get_tables().is_empty());
    }

    #[test]
    fn test_metastore_json_shape() {
        let dir = tempdir().unwrap();
        let ms = Metastore::new(dir.path()).unwrap();
        let id = ms.create_table("t", vec![int_column("id")]).unwrap();
        ms.add_file("t", "/tmp/t_1.tomy").unwrap();

        let raw = std::fs::read_to_string(dir.path().join("ms_data/metastore.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["name_to_id"]["t"], id);
        let table = &json["schema"]["tables"][id.as_str()];
        assert_eq!(table["name"], "t");
        assert_eq!(table["columns"][0]["type"], "INT64");
        assert_eq!(table["files"][0]["path"], "/tmp/t_1.tomy");
    }

    #[test]
    fn test_add_file_to_missing_table() {
        let dir = tempdir().unwrap();
        let ms = Metastore::new(dir.path()).unwrap();
        assert!(matches!(
            ms.add_file("ghost", "/tmp/x.tomy"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_snapshot_keeps_files_alive_during_delete() {
        let dir = tempdir().unwrap();
        let ms = Metastore::new(dir.path()).unwrap();

        let id = ms.create_table("users", vec![int_column("id")]).unwrap();
        let data_file = dir.path().join("users_1.tomy");
        fs::write(&data_file, b"payload").unwrap();
        ms.add_file("users", data_file.to_str().unwrap()).unwrap();

        let snapshot = ms.get_table_snapshot("users").unwrap();
        assert_eq!(snapshot.file_paths().len(), 1);

        ms.delete_table(&id).unwrap();
        assert!(ms.get_table_by_id(&id).is_none());
        assert!(
            data_file.exists(),
            "file must survive while a snapshot holds it"
        );

        drop(snapshot);
        assert!(
            !data_file.exists(),
            "file must be unlinked once the last snapshot is released"
        );
    }

    #[test]
    fn test_delete_without_snapshots_unlinks_immediately() {
        let dir = tempdir().unwrap();
        let ms = Metastore::new(dir.path()).unwrap();

        let id = ms.create_table("users", vec![int_column("id")]).unwrap();
        let data_file = dir.path().join("users_1.tomy");
        fs::write(&data_file, b"payload").unwrap();
        ms.add_file("users", data_file.to_str().unwrap()).unwrap();

        ms.delete_table(&id).unwrap();
        assert!(!data_file.exists());
    }

    #[test]
    fn test_unlink_idempotent_against_missing_file() {
        let entry = FileEntry::new("/nonexistent/path/file.tomy");
        entry.inc_ref();
        entry.mark_deleted();
        entry.dec_ref();
    }

    #[test]
    fn test_balanced_refcounts() {
        let dir = tempdir().unwrap();
        let ms = Metastore::new(dir.path()).unwrap();

        ms.create_table("t", vec![int_column("id")]).unwrap();
        let data_file = dir.path().join("t_1.tomy");
        fs::write(&data_file, b"x").unwrap();
        ms.add_file("t", data_file.to_str().unwrap()).unwrap();

        let s1 = ms.get_table_snapshot("t").unwrap();
        let s2 = ms.get_table_snapshot("t").unwrap();
        let entry = Arc::clone(&s1.files[0]);
        assert_eq!(entry.ref_count(), 2);
        drop(s1);
        assert_eq!(entry.ref_count(), 1);
        drop(s2);
        assert_eq!(entry.ref_count(), 0);
        assert!(data_file.exists());
    }

    #[test]
    fn test_snapshot_of_missing_table() {
        let dir = tempdir().unwrap();
        let ms = Metastore::new(dir.path()).unwrap();
        assert!(matches!(
            ms.get_table_snapshot("ghost"),
            Err(EngineError::NotFound(_))
        ));
    }
}
