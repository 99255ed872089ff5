//! HTTP API Server
//!
//! Log dump, sequential read, status queries, and the writer WebSocket.

use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use super::ws::handle_master_socket;
use crate::config::{ApiConfig, NodeRole};
use crate::error::{Error, Result};
use crate::id::MessageId;
use crate::log::LogCursor;
use crate::replication::{PrimaryNode, ReplicationNode};

/// Shared application state
pub struct AppState {
    /// The node serving requests
    pub node: Arc<dyn ReplicationNode>,
    /// Set when the node is the master
    pub primary: Option<Arc<PrimaryNode>>,
    /// Cursor behind `GET /log/next`
    pub cursor: Mutex<LogCursor>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create an HTTP server for a secondary
    pub fn new(config: ApiConfig, node: Arc<dyn ReplicationNode>) -> Self {
        let state = Arc::new(AppState {
            node,
            primary: None,
            cursor: Mutex::new(LogCursor::new()),
        });

        Self { config, state }
    }

    /// Create an HTTP server for the master, with the writer channel enabled
    pub fn with_primary(config: ApiConfig, primary: Arc<PrimaryNode>) -> Self {
        let node: Arc<dyn ReplicationNode> = primary.clone();
        let state = Arc::new(AppState {
            node,
            primary: Some(primary),
            cursor: Mutex::new(LogCursor::new()),
        });

        Self { config, state }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        Router::new()
            // Log reads
            .route("/", get(handle_dump))
            .route("/log/next", get(handle_next))
            // Status and info
            .route("/status", get(handle_status))
            .route("/health", get(handle_health))
            .route("/messages/:id", get(handle_message_state))
            // Writer channel
            .route("/ws/master/:client_id", get(handle_master_socket))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub role: NodeRole,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

pub(super) fn error_response(status: StatusCode, error: String, code: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error,
            code: code.to_string(),
        }),
    )
        .into_response()
}

// ============ Handlers ============

async fn handle_dump(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.node.read_all().await.render()
}

async fn handle_next(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut cursor = state.cursor.lock().await;
    state.node.read_next(&mut cursor).await.to_string()
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.node.status().await)
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        node_id: state.node.node_id().to_string(),
        role: state.node.role(),
    })
}

async fn handle_message_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    let Some(primary) = &state.primary else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Replication state is only tracked on the master".into(),
            "NOT_MASTER",
        );
    };

    match primary.ack_record(MessageId(id)).await {
        Some(record) => Json(record).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Message {} not found", id),
            "MESSAGE_NOT_FOUND",
        ),
    }
}
