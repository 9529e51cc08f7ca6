//! Minimal read-only RPC collaborator: `/status`, `/block` and
//! `/block_results`.
//!
//! The server never touches the engine's handle. It opens its own read-only
//! SQLite connections against the stores (WAL readers), so the executor's
//! writes proceed undisturbed. Startup waits for the stores to appear on a
//! bounded 100 ms polling interval.

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use containers::{GenesisDoc, Height};
use engine::comet::{block_store_path, genesis_path, state_store_path};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

#[derive(Clone)]
struct RpcState {
    home: Arc<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct HeightParam {
    height: Option<u64>,
}

/// Serve until the process exits. Waits for the engine to create its
/// stores before binding.
pub async fn serve(home: PathBuf, port: u16) -> Result<()> {
    while !block_store_path(&home).exists() {
        sleep(Duration::from_millis(100)).await;
    }

    let router = Router::new()
        .route("/status", get(status_handler))
        .route("/block", get(block_handler))
        .route("/block_results", get(block_results_handler))
        .with_state(RpcState {
            home: Arc::new(home),
        });

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind rpc server on port {port}"))?;
    info!(port, "rpc server listening");

    axum::serve(listener, router)
        .await
        .context("rpc server failed")
}

type RpcError = (StatusCode, String);

fn internal(err: impl std::fmt::Display) -> RpcError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

async fn status_handler(State(state): State<RpcState>) -> Response {
    respond(query_status(&state.home))
}

async fn block_handler(State(state): State<RpcState>, Query(param): Query<HeightParam>) -> Response {
    respond(query_block(&state.home, param.height))
}

async fn block_results_handler(
    State(state): State<RpcState>,
    Query(param): Query<HeightParam>,
) -> Response {
    respond(query_block_results(&state.home, param.height))
}

fn respond(result: Result<serde_json::Value, RpcError>) -> Response {
    match result {
        Ok(value) => Json(json!({ "result": value })).into_response(),
        Err((status, message)) => {
            (status, Json(json!({ "error": message }))).into_response()
        }
    }
}

fn open_read_only(path: &Path) -> Result<Connection, RpcError> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(internal)
}

fn store_heights(conn: &Connection) -> Result<(Height, Height), RpcError> {
    let (min, max): (Option<i64>, Option<i64>) = conn
        .query_row("SELECT MIN(height), MAX(height) FROM blocks", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .map_err(internal)?;
    Ok((
        Height(min.unwrap_or(0) as u64),
        Height(max.unwrap_or(0) as u64),
    ))
}

fn query_status(home: &Path) -> Result<serde_json::Value, RpcError> {
    let genesis = GenesisDoc::load(&genesis_path(home)).map_err(internal)?;
    let conn = open_read_only(&block_store_path(home))?;
    let (base, latest) = store_heights(&conn)?;

    Ok(json!({
        "node_info": {
            "network": genesis.chain_id,
        },
        "sync_info": {
            "earliest_block_height": base,
            "latest_block_height": latest,
            "catching_up": true,
        },
    }))
}

fn query_block(home: &Path, height: Option<u64>) -> Result<serde_json::Value, RpcError> {
    let conn = open_read_only(&block_store_path(home))?;
    let height = match height {
        Some(height) => Height(height),
        None => store_heights(&conn)?.1,
    };

    let raw: Option<String> = conn
        .query_row(
            "SELECT block FROM blocks WHERE height = ?1",
            params![height.0 as i64],
            |row| row.get(0),
        )
        .optional()
        .map_err(internal)?;

    let block: serde_json::Value = raw
        .ok_or((
            StatusCode::NOT_FOUND,
            format!("block at height {height} not found"),
        ))
        .and_then(|json| serde_json::from_str(&json).map_err(internal))?;

    Ok(json!({ "block": block }))
}

fn query_block_results(home: &Path, height: Option<u64>) -> Result<serde_json::Value, RpcError> {
    let conn = open_read_only(&state_store_path(home))?;
    let height = match height {
        Some(height) => Height(height),
        None => {
            let max: Option<i64> = conn
                .query_row("SELECT MAX(height) FROM block_results", [], |row| {
                    row.get(0)
                })
                .map_err(internal)?;
            Height(max.unwrap_or(0) as u64)
        }
    };

    let raw: Option<String> = conn
        .query_row(
            "SELECT results FROM block_results WHERE height = ?1",
            params![height.0 as i64],
            |row| row.get(0),
        )
        .optional()
        .map_err(internal)?;

    let results: serde_json::Value = raw
        .ok_or((
            StatusCode::NOT_FOUND,
            format!("block results at height {height} not found"),
        ))
        .and_then(|json| serde_json::from_str(&json).map_err(internal))?;

    Ok(json!({ "height": height, "txs_results": results }))
}
