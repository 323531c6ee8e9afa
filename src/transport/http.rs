use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tower::Service;

use super::mux::MuxListener;
use crate::types::{Error, Result};

/// Serve HTTP/1 and HTTP/2 (with upgrades) on every routed connection.
pub async fn serve(mut listener: MuxListener, router: Router) -> Result<()> {
    while let Some((stream, peer)) = listener.accept().await {
        let router = router.clone();
        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                router.clone().call(request)
            });
            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(peer = %peer, error = %err, "http_connection_closed");
            }
        });
    }
    Err(Error::internal("HTTP listener closed"))
}
