//! HTTP status endpoint. Exposes receiver state as JSON.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use rejoin_core::{HsId, StreamPair};
use rejoin_services::{ConnectionTable, SizeClass, SnapshotDataReceiver};

use crate::consumer::AppliedLedger;

#[derive(Clone)]
pub struct StatusState {
    pub receiver: SnapshotDataReceiver,
    pub connections: ConnectionTable,
    pub ledger: AppliedLedger,
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub closed: bool,
    pub queue_depth: usize,
    pub watchdog_running: bool,
    pub pool: PoolInfo,
    pub stats: StatsInfo,
    pub connections: Vec<ConnectionInfo>,
}

#[derive(Serialize)]
pub struct PoolInfo {
    pub decompressed_available: usize,
    pub decompressed_capacity: usize,
    pub compressed_available: usize,
    pub compressed_capacity: usize,
}

#[derive(Serialize)]
pub struct StatsInfo {
    pub messages: u64,
    pub compressed_bytes: u64,
    pub decompressed_bytes: u64,
    pub decode_failures: u64,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub peer: String,
    pub messages: u64,
    pub bytes: u64,
    pub streams: Vec<String>,
    pub connected_secs: u64,
}

async fn handle_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    let receiver = &state.receiver;
    let pool = receiver.pool();
    let stats = receiver.stats();

    let connections = state
        .connections
        .iter()
        .map(|e| {
            let c = e.value();
            ConnectionInfo {
                peer: c.peer.to_string(),
                messages: c.messages,
                bytes: c.bytes,
                streams: c.pairs.iter().map(|p| p.to_string()).collect(),
                connected_secs: c.connected_at.elapsed().as_secs(),
            }
        })
        .collect();

    Json(StatusResponse {
        closed: receiver.is_closed(),
        queue_depth: receiver.size(),
        watchdog_running: receiver.watchdog_running(),
        pool: PoolInfo {
            decompressed_available: pool.available(SizeClass::Decompressed),
            decompressed_capacity: pool.capacity(SizeClass::Decompressed),
            compressed_available: pool.available(SizeClass::Compressed),
            compressed_capacity: pool.capacity(SizeClass::Compressed),
        },
        stats: StatsInfo {
            messages: stats.messages,
            compressed_bytes: stats.compressed_bytes,
            decompressed_bytes: stats.decompressed_bytes,
            decode_failures: stats.decode_failures,
        },
        connections,
    })
}

// ── /streams ─────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct StreamInfo {
    pub pair: String,
    pub source: u64,
    pub target: u64,
    pub bytes_since_last_check: u64,
    pub bytes_total: u64,
    pub applied_chunks: u64,
    pub applied_bytes: u64,
}

async fn handle_streams(State(state): State<StatusState>) -> Json<Vec<StreamInfo>> {
    let streams = state
        .receiver
        .tracking()
        .snapshot()
        .into_iter()
        .map(|s| {
            let applied = state.ledger.get(&s.pair);
            StreamInfo {
                pair: s.pair.to_string(),
                source: s.pair.source.0,
                target: s.pair.target.0,
                bytes_since_last_check: s.bytes_since_last_check,
                bytes_total: s.bytes_total,
                applied_chunks: applied.map_or(0, |a| a.chunks),
                applied_bytes: applied.map_or(0, |a| a.bytes),
            }
        })
        .collect();
    Json(streams)
}

// ── /streams/{source}/{target}/complete ──────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct CompleteResponse {
    pub pair: String,
    pub bytes_total: u64,
}

async fn handle_complete(
    State(state): State<StatusState>,
    Path((source, target)): Path<(u64, u64)>,
) -> Result<Json<CompleteResponse>, StatusCode> {
    let pair = StreamPair::new(HsId(source), HsId(target));
    let entry = state
        .receiver
        .complete_stream(&pair)
        .ok_or(StatusCode::NOT_FOUND)?;
    state.ledger.remove(&pair);
    Ok(Json(CompleteResponse {
        pair: pair.to_string(),
        bytes_total: entry.bytes_total,
    }))
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/streams", get(handle_streams))
        .route("/streams/{source}/{target}/complete", post(handle_complete))
        .with_state(state)
}

pub async fn serve(
    state: StatusState,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "status endpoint listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
