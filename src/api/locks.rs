//! Lock sessions over WebSocket.
//!
//! The socket stays open for as long as the grant is held. The server never
//! sends application messages; it closes the socket when the grant ends, and
//! the client releases the grant by closing the socket.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::Uri;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use crate::master::Master;
use crate::rwlock::{LockConnection, LockMode, LockRequest};
use crate::types::{Error, Result};

/// GET /ws/data-layer/{*resource}?read_lock=true|false
///
/// The flag is checked before the upgrade, so a bad request never reaches the
/// coordinator.
pub async fn lock_session(
    State(master): State<Arc<Master>>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response> {
    let mode = LockMode::from_read_lock(params.get("read_lock").map(String::as_str))?;
    let ws = ws.map_err(|rejection| Error::bad_request(rejection.body_text()))?;
    let resource = uri.path().to_string();
    Ok(ws.on_upgrade(move |socket| hold_lock(socket, master, resource, mode)))
}

async fn hold_lock(socket: WebSocket, master: Arc<Master>, resource: String, mode: LockMode) {
    let connection = LockConnection::new();
    tracing::debug!(resource = %resource, mode = %mode, connection = %connection.id(), "lock_session_opened");

    let pump = tokio::spawn(pump(socket, connection.clone()));

    let request = LockRequest {
        resource: resource.clone(),
        mode,
        connection: connection.clone(),
    };
    match master.acquire_lock(request).await {
        Ok(session) => session.await_termination().await,
        Err(Error::Timeout(_)) => {
            // Still queued. If granted later, the session closes this
            // connection when the grant ends; until then only the client
            // closing gives up the place.
            tracing::debug!(resource = %resource, connection = %connection.id(), "lock_still_queued");
            connection.closed().await;
        }
        Err(err) => {
            tracing::info!(resource = %resource, connection = %connection.id(), error = %err, "lock_request_failed");
        }
    }

    connection.request_close();
    if let Err(err) = pump.await {
        tracing::warn!(error = %err, "lock_session_pump_failed");
    }
}

/// Owns the socket: drains client frames until the client goes away, or
/// sends a close frame once the lock side asks for it. Either way the
/// connection is marked closed on exit.
async fn pump(socket: WebSocket, connection: LockConnection) {
    let _closed = connection.close_on_drop();
    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            _ = connection.close_requested() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
