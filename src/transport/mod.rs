//! One TCP port, two servers.
//!
//! ```text
//!   TcpListener ─▶ [TLS] ─▶ Demultiplexer ─┬─▶ RPC server   (content-type matches)
//!                                          └─▶ HTTP server  (everything else)
//! ```
//!
//! [`start_servers`] runs the RPC server, the HTTP server, and the
//! demultiplexer as three tasks and returns the first outcome any of them
//! reports. The other two are left running: the caller treats the return as
//! fatal and exits the process, and that exit is the only cleanup.

pub mod http;
pub mod mux;
pub mod tls;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

use crate::rpc::{RpcServer, RPC_CONTENT_TYPE};
use crate::types::{Error, Result, ServerConfig};
use mux::{AnyMatcher, Demultiplexer, HeaderFieldMatcher, SniffConfig};

pub const RPC_TASK: &str = "RPC server";
pub const HTTP_TASK: &str = "HTTP server";
pub const DEMUX_TASK: &str = "connection demultiplexer";

/// Terminal report of one top-level task.
pub type TaskOutcome = (&'static str, Result<()>);

/// Spawn `task`, reporting its outcome on `outcomes`.
pub fn spawn_reporting<F>(outcomes: &mpsc::UnboundedSender<TaskOutcome>, name: &'static str, task: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let outcomes = outcomes.clone();
    tokio::spawn(async move {
        let outcome = task.await;
        let _ = outcomes.send((name, outcome));
    });
}

/// Wait for the first reported outcome. An error is wrapped as `Fatal`,
/// naming the task.
pub async fn first_outcome(mut outcomes: mpsc::UnboundedReceiver<TaskOutcome>) -> Result<()> {
    match outcomes.recv().await {
        Some((_, Ok(()))) => Ok(()),
        Some((name, Err(err))) => Err(Error::fatal(name, err)),
        None => Err(Error::internal("no server tasks were started")),
    }
}

/// Start the demultiplexer and both servers on `listener`.
pub async fn start_servers(
    listener: TcpListener,
    tls: Option<Arc<rustls::ServerConfig>>,
    server: &ServerConfig,
    router: Router,
    rpc: RpcServer,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, tls = tls.is_some(), "master_listening");
    }

    let mut demux = Demultiplexer::new(
        listener,
        tls.map(TlsAcceptor::from),
        SniffConfig {
            timeout: server.sniff_timeout,
            max_bytes: server.max_sniff_bytes,
        },
    );
    let rpc_listener = demux.listener(HeaderFieldMatcher::new("content-type", RPC_CONTENT_TYPE));
    let http_listener = demux.listener(AnyMatcher);

    let (tx, rx) = mpsc::unbounded_channel();
    spawn_reporting(&tx, RPC_TASK, rpc.serve(rpc_listener));
    spawn_reporting(&tx, HTTP_TASK, http::serve(http_listener, router));
    spawn_reporting(&tx, DEMUX_TASK, demux.serve());
    drop(tx);

    first_outcome(rx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_failure_wins() {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_reporting(&tx, RPC_TASK, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        spawn_reporting(&tx, HTTP_TASK, async { Err(Error::internal("bind lost")) });
        spawn_reporting(&tx, DEMUX_TASK, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(Error::internal("late"))
        });

        let err = tokio::time::timeout(Duration::from_secs(5), first_outcome(rx))
            .await
            .unwrap()
            .unwrap_err();
        match err {
            Error::Fatal { task, source } => {
                assert_eq!(task, HTTP_TASK);
                assert!(source.to_string().contains("bind lost"));
            }
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clean_exit_is_reported_as_ok() {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_reporting(&tx, DEMUX_TASK, async { Ok(()) });
        assert!(first_outcome(rx).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_tasks() {
        let (tx, rx) = mpsc::unbounded_channel::<TaskOutcome>();
        drop(tx);
        assert!(first_outcome(rx).await.is_err());
    }
}
