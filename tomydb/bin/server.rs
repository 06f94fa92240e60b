/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # TomyDB Server
//!
//! HTTP REST API server for the TomyDB database system.
//!
//! ## Usage
//!
//! ```bash
//! # Start server with default settings
//! cargo run --bin server
//!
//! # Start server with custom data directory
//! cargo run --bin server -- --data-dir /path/to/data
//!
//! # Start server on custom port
//! cargo run --bin server -- --port 8080
//! ```

use anyhow::Context;
use axum::Router;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tomydb::api::handlers::create_routes;
use tomydb::api::handlers::AppState;
use tomydb::engine::QueryManager;
use tomydb::metastore::Metastore;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATA_DIR: &str = "./tomydb_data";
const DEFAULT_CHUNK_SIZE: usize = 4096;
const DEFAULT_SORT_MEMORY_LIMIT: u64 = 64 << 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut port = DEFAULT_PORT;
    let mut data_dir = PathBuf::from(DEFAULT_DATA_DIR);

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().context("Invalid port number")?;
                    i += 2;
                } else {
                    anyhow::bail!("--port requires a value");
                }
            }
            "--data-dir" | "-d" => {
                if i + 1 < args.len() {
                    data_dir = PathBuf::from(&args[i + 1]);
                    i += 2;
                } else {
                    anyhow::bail!("--data-dir requires a value");
                }
            }
            "--help" | "-h" => {
                println!(
                    "TomyDB Server - Columnar Analytical Database\n\n\
                     USAGE:\n\
                     \tserver [OPTIONS]\n\n\
                     OPTIONS:\n\
                     \t-p, --port <PORT>         \tPort to listen on (default: {})\n\
                     \t-d, --data-dir <PATH>     \tData directory path (default: {})\n\
                     \t-h, --help                \tShow this help message",
                    DEFAULT_PORT, DEFAULT_DATA_DIR
                );
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {other}");
            }
        }
    }

    let metastore =
        Arc::new(Metastore::new(&data_dir).context("Failed to initialize metastore")?);
    let query_manager = Arc::new(
        QueryManager::new(
            Arc::clone(&metastore),
            &data_dir,
            DEFAULT_CHUNK_SIZE,
            DEFAULT_SORT_MEMORY_LIMIT,
        )
        .context("Failed to initialize query manager")?,
    );

    let app_state = Arc::new(AppState {
        metastore,
        query_manager,
        start_time: Instant::now(),
    });

    let app = Router::new()
        .merge(create_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    info!("Starting TomyDB server on port {}", port);
    info!("Data directory: {:?}", data_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
