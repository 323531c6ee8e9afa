//! RPC server: connection cap, preface, and per-connection frame loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::master::Master;
use crate::rpc::codec::{read_frame, read_preface, write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE};
use crate::rpc::router;
use crate::transport::mux::MuxListener;
use crate::types::{Error, Result, RpcConfig};

/// Encode a JSON value to msgpack. Logs and returns an error on failure
/// instead of silently producing an empty vec.
fn encode_msgpack(value: &serde_json::Value) -> std::io::Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| {
        tracing::error!("msgpack encoding failed: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    })
}

fn error_body(id: &str, err: &Error) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "ok": false,
        "error": {
            "code": err.to_ipc_error_code(),
            "message": err.to_string(),
        }
    })
}

/// RPC server over the master context.
#[derive(Debug, Clone)]
pub struct RpcServer {
    master: Arc<Master>,
    config: RpcConfig,
}

impl RpcServer {
    pub fn new(master: Arc<Master>, config: RpcConfig) -> Self {
        Self { master, config }
    }

    /// Serve routed connections until the listener closes.
    pub async fn serve(self, mut listener: MuxListener) -> Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        tracing::info!(max_connections = self.config.max_connections, "rpc_server_started");

        while let Some((stream, peer)) = listener.accept().await {
            let permit = match conn_semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(
                        peer = %peer,
                        max_connections = self.config.max_connections,
                        "rpc_connection_rejected"
                    );
                    drop(stream);
                    continue;
                }
            };

            tracing::debug!(
                peer = %peer,
                active = self.config.max_connections - conn_semaphore.available_permits(),
                "rpc_connection_accepted"
            );
            let master = self.master.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, master, config, permit).await {
                    tracing::debug!(peer = %peer, error = %e, "rpc_connection_error");
                }
            });
        }
        Err(Error::internal("RPC listener closed"))
    }
}

/// Handle one connection: preface, then read frames → dispatch → write responses.
async fn handle_connection<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    master: Arc<Master>,
    config: RpcConfig,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> std::io::Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);
    tokio::time::timeout(config.read_timeout, read_preface(&mut reader))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "preface timeout"))??;

    loop {
        let frame = match tokio::time::timeout(
            config.read_timeout,
            read_frame(&mut reader, config.max_frame_bytes),
        )
        .await
        {
            Err(_elapsed) => {
                tracing::debug!(timeout = ?config.read_timeout, "rpc_read_timeout");
                break;
            }
            Ok(result) => match result? {
                Some(f) => f,
                None => break,
            },
        };

        let (msg_type, payload_bytes) = frame;

        if msg_type != MSG_REQUEST {
            let err = Error::bad_request(format!("unexpected message type: 0x{:02X}", msg_type));
            let encoded = encode_msgpack(&error_body("", &err))?;
            timed_write(&mut writer, MSG_ERROR, &encoded, config.write_timeout).await?;
            continue;
        }

        let request: serde_json::Value = match rmp_serde::from_slice(&payload_bytes) {
            Ok(v) => v,
            Err(e) => {
                let err = Error::bad_request(format!("invalid msgpack: {}", e));
                let encoded = encode_msgpack(&error_body("", &err))?;
                timed_write(&mut writer, MSG_ERROR, &encoded, config.write_timeout).await?;
                continue;
            }
        };

        let request_id = request
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let service = request.get("service").and_then(|v| v.as_str()).unwrap_or("");
        let method = request.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let body = request
            .get("body")
            .cloned()
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match router::route_request(&master, service, method, body).await {
            Ok(response_body) => {
                let response = serde_json::json!({
                    "id": request_id,
                    "ok": true,
                    "body": response_body,
                });
                let encoded = encode_msgpack(&response)?;
                timed_write(&mut writer, MSG_RESPONSE, &encoded, config.write_timeout).await?;
            }
            Err(e) => {
                let encoded = encode_msgpack(&error_body(&request_id, &e))?;
                timed_write(&mut writer, MSG_ERROR, &encoded, config.write_timeout).await?;
            }
        }
    }

    Ok(())
}

/// Write a frame with a timeout so a slow consumer cannot pin the connection.
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, msg_type, payload))
        .await
        .map_err(|_| {
            tracing::warn!(timeout = ?timeout, "rpc_write_timeout");
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
