//! Writer WebSocket
//!
//! One connection per writer client. Frames are processed in arrival
//! order; responses are pushed through the client's handle.

use std::sync::Arc;
use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use futures::{SinkExt, StreamExt};

use super::http::{error_response, AppState};
use crate::log::{ClientId, LogCursor};
use crate::replication::{ClientFrame, PrimaryNode, ReplicationNode};
use crate::state::ClientHandle;

pub(super) async fn handle_master_socket(
    ws: WebSocketUpgrade,
    Path(client_id): Path<ClientId>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(primary) = state.primary.clone() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Writes are only accepted by the master".into(),
            "NOT_MASTER",
        );
    };

    ws.on_upgrade(move |socket| serve_writer(socket, client_id, primary))
}

async fn serve_writer(socket: WebSocket, client_id: ClientId, primary: Arc<PrimaryNode>) {
    let (handle, mut outbound) = ClientHandle::channel();
    primary
        .membership()
        .register_client(client_id.clone(), handle.clone())
        .await;
    tracing::info!("Writer client {} connected", client_id);

    let (mut sink, mut stream) = socket.split();
    let forward = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut cursor = LogCursor::new();
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                process_frame(&primary, &client_id, &handle, &mut cursor, &text).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket error from client {}: {}", client_id, e);
                break;
            }
        }
    }

    primary.membership().unregister_client(&client_id, &handle).await;
    forward.abort();
    tracing::info!("Writer client {} disconnected", client_id);
}

/// Handle one text frame from a writer
pub(crate) async fn process_frame(
    primary: &PrimaryNode,
    client_id: &str,
    handle: &ClientHandle,
    cursor: &mut LogCursor,
    frame: &str,
) {
    match ClientFrame::parse(frame) {
        Ok(ClientFrame::Write { text, wc }) => {
            if let Err(e) = primary.write(Some(client_id.to_string()), text, wc).await {
                tracing::error!("Write from client {} failed: {}", client_id, e);
                let _ = handle.send_text(format!("FAIL! {}", e));
            }
        }
        Ok(ClientFrame::GetLog) => {
            let read = primary.read_next(cursor).await;
            if let Err(e) = handle.send_text(read.to_string()) {
                tracing::debug!("Log read for client {} not delivered: {}", client_id, e);
            }
        }
        Err(e) => {
            tracing::warn!("Discarding frame from client {}: {}", client_id, e);
        }
    }
}
