/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # TomyDB - A Columnar Analytical Database
//!
//! This library implements a small columnar analytical database: a persistent
//! columnar file format (`.tomy` files), a metastore that maps logical tables
//! to data files, and a vectorized query engine executing COPY and SELECT
//! queries on background tasks behind a REST API.

use serde::Deserialize;
use serde::Serialize;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

pub mod api;
pub mod compression;
pub mod engine;
pub mod error;
pub mod metastore;
pub mod serialization;

/// Logical column types that can be persisted in a table schema.
///
/// Boolean columns exist only as expression results inside the engine and are
/// never part of a table definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "INT64")]
    Int64,
    #[serde(rename = "VARCHAR")]
    Varchar,
}

static LAST_NANOS: AtomicI64 = AtomicI64::new(0);

/// Nanosecond timestamp that never repeats and never goes backwards within a
/// process, even if the wall clock does. Used for table ids, query ids and
/// data file names.
pub(crate) fn monotonic_nanos() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    match LAST_NANOS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
        Some(now.max(prev + 1))
    }) {
        Ok(prev) => now.max(prev + 1),
        Err(prev) => prev,
    }
}
