use std::net::SocketAddr;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tessera_common::env::{Command, SubmitReply};
use tessera_common::ErrorCode;
use tessera_consensus::Envelope;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::RAFT_PATH;
use crate::error::{NodeError, Result};
use crate::runtime::NodeHandle;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    start: Option<u64>,
    end: Option<u64>,
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            NodeError::Halted(_) => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::ChainCorruption),
            NodeError::Stopped => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::ClusterUnavailable),
            NodeError::Ledger(_) => (StatusCode::BAD_REQUEST, ErrorCode::ValidationFailed),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal),
        };
        let body = ErrorBody {
            code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(handle: NodeHandle) -> Router {
    Router::new()
        .route("/v1/submit", post(submit))
        .route("/v1/status", get(status))
        .route(RAFT_PATH, post(raft))
        .route("/v1/events", get(events))
        .route("/v1/anchors", get(anchors))
        .with_state(handle)
}

/// Binds `addr` and serves the node API in the background.
pub async fn start_rpc_server(addr: &str, handle: NodeHandle) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    Ok((local, serve(listener, handle)))
}

/// Serves on an already bound listener.
pub fn serve(listener: TcpListener, handle: NodeHandle) -> JoinHandle<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("🌐 API HTTP escutando em {}", addr);
    }
    let app = router(handle);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server stopped: {}", e);
        }
    })
}

async fn submit(State(node): State<NodeHandle>, Json(command): Json<Command>) -> Json<SubmitReply> {
    Json(node.submit(command).await)
}

async fn status(State(node): State<NodeHandle>) -> Response {
    match node.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn raft(State(node): State<NodeHandle>, Json(envelope): Json<Envelope>) -> StatusCode {
    if &envelope.to != node.node_id() {
        warn!("dropping envelope addressed to {} (this is {})", envelope.to, node.node_id());
        return StatusCode::BAD_REQUEST;
    }
    match node.deliver(envelope).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn events(State(node): State<NodeHandle>, Query(range): Query<RangeParams>) -> Response {
    match node.events(range.start, range.end).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn anchors(State(node): State<NodeHandle>) -> impl IntoResponse {
    Json(node.anchors().await)
}
