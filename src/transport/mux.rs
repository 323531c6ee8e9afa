//! Content-based connection demultiplexer.
//!
//! One accept loop owns the listener. Each accepted connection gets its own
//! task that (optionally) terminates TLS, reads just enough bytes for a
//! [`Matcher`] to decide, and hands the connection, with the sniffed bytes
//! replayed, to exactly one [`MuxListener`].

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

use crate::types::{Error, Result};

/// Byte stream the downstream servers consume.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Connection for T {}

/// Verdict of a matcher on the bytes sniffed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched,
    NoMatch,
    /// Undecidable yet; read more.
    NeedMore,
}

pub trait Matcher: Send + Sync + 'static {
    fn matches(&self, prefix: &[u8]) -> MatchOutcome;
}

/// Matches everything, including an empty prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyMatcher;

impl Matcher for AnyMatcher {
    fn matches(&self, _prefix: &[u8]) -> MatchOutcome {
        MatchOutcome::Matched
    }
}

/// Matches when the first header block carries `name: value` (name compared
/// case-insensitively, value by prefix, as with `application/x; charset=...`).
///
/// The header block is everything after the first line up to the first empty
/// line, which covers both HTTP/1 requests and the RPC preface.
#[derive(Debug, Clone)]
pub struct HeaderFieldMatcher {
    name: String,
    value: String,
}

impl HeaderFieldMatcher {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Matcher for HeaderFieldMatcher {
    fn matches(&self, prefix: &[u8]) -> MatchOutcome {
        let Some(end) = prefix.windows(4).position(|w| w == b"\r\n\r\n") else {
            return MatchOutcome::NeedMore;
        };
        let Ok(head) = std::str::from_utf8(&prefix[..end]) else {
            return MatchOutcome::NoMatch;
        };

        let found = head.split("\r\n").skip(1).any(|line| {
            line.split_once(':').is_some_and(|(name, value)| {
                name.trim().eq_ignore_ascii_case(&self.name)
                    && value.trim().starts_with(self.value.as_str())
            })
        });
        if found {
            MatchOutcome::Matched
        } else {
            MatchOutcome::NoMatch
        }
    }
}

/// Accepted connection with the sniffed bytes put back in front.
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> std::fmt::Debug for Rewind<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rewind")
            .field("buffered", &self.prefix.len())
            .finish()
    }
}

impl<S> Rewind<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() && buf.remaining() > 0 {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

/// A routed connection.
pub type MuxStream = Rewind<Box<dyn Connection>>;

/// Downstream end of one route.
#[derive(Debug)]
pub struct MuxListener {
    rx: mpsc::Receiver<(MuxStream, SocketAddr)>,
}

impl MuxListener {
    /// Next routed connection; `None` once the demultiplexer has stopped.
    pub async fn accept(&mut self) -> Option<(MuxStream, SocketAddr)> {
        self.rx.recv().await
    }
}

struct Route {
    matcher: Box<dyn Matcher>,
    tx: mpsc::Sender<(MuxStream, SocketAddr)>,
}

/// Sniffing limits.
#[derive(Debug, Clone, Copy)]
pub struct SniffConfig {
    pub timeout: Duration,
    pub max_bytes: usize,
}

const ROUTE_BACKLOG: usize = 128;

pub struct Demultiplexer {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    sniff: SniffConfig,
    routes: Vec<Route>,
}

impl std::fmt::Debug for Demultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demultiplexer")
            .field("tls", &self.tls.is_some())
            .field("sniff", &self.sniff)
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl Demultiplexer {
    pub fn new(listener: TcpListener, tls: Option<TlsAcceptor>, sniff: SniffConfig) -> Self {
        Self {
            listener,
            tls,
            sniff,
            routes: Vec::new(),
        }
    }

    /// Register a route. Routes are tried in registration order.
    pub fn listener(&mut self, matcher: impl Matcher) -> MuxListener {
        let (tx, rx) = mpsc::channel(ROUTE_BACKLOG);
        self.routes.push(Route {
            matcher: Box::new(matcher),
            tx,
        });
        MuxListener { rx }
    }

    /// Run the accept loop. Only an accept failure, or every route closing,
    /// ends it.
    pub async fn serve(self) -> Result<()> {
        let routes = Arc::new(self.routes);
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => match accept_action(&err) {
                    AcceptAction::Skip => {
                        tracing::debug!(error = %err, "mux_accept_skipped");
                        continue;
                    }
                    AcceptAction::Backoff => {
                        tracing::warn!(error = %err, "mux_accept_backoff");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                    AcceptAction::Fail => return Err(err.into()),
                },
            };
            if routes.iter().all(|r| r.tx.is_closed()) {
                return Err(Error::internal("every downstream listener has closed"));
            }
            let _ = stream.set_nodelay(true);

            let routes = routes.clone();
            let tls = self.tls.clone();
            let sniff = self.sniff;
            tokio::spawn(async move {
                let routed = tokio::time::timeout(sniff.timeout, classify(stream, tls, &routes, sniff.max_bytes)).await;
                match routed {
                    Ok(Ok(Some((index, conn)))) => {
                        if routes[index].tx.send((conn, peer)).await.is_err() {
                            tracing::debug!(peer = %peer, "mux_route_closed");
                        }
                    }
                    Ok(Ok(None)) => tracing::debug!(peer = %peer, "mux_no_route"),
                    Ok(Err(err)) => tracing::debug!(peer = %peer, error = %err, "mux_sniff_failed"),
                    Err(_) => tracing::debug!(peer = %peer, "mux_sniff_timeout"),
                }
            });
        }
    }
}

/// Pause before accepting again when the process is out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptAction {
    /// The failure belongs to one connection; keep accepting.
    Skip,
    /// Resource exhaustion; accept again after [`ACCEPT_BACKOFF`].
    Backoff,
    /// The listener itself is broken.
    Fail,
}

fn accept_action(err: &io::Error) -> AcceptAction {
    if matches!(err.raw_os_error(), Some(ENFILE | EMFILE)) {
        return AcceptAction::Backoff;
    }
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => AcceptAction::Skip,
        io::ErrorKind::OutOfMemory => AcceptAction::Backoff,
        _ => AcceptAction::Fail,
    }
}

/// Terminate TLS if configured, then sniff until some route decides.
async fn classify(
    stream: tokio::net::TcpStream,
    tls: Option<TlsAcceptor>,
    routes: &[Route],
    max_bytes: usize,
) -> io::Result<Option<(usize, MuxStream)>> {
    let mut conn: Box<dyn Connection> = match tls {
        Some(acceptor) => Box::new(acceptor.accept(stream).await?),
        None => Box::new(stream),
    };

    let mut buf = BytesMut::with_capacity(1024.min(max_bytes.max(1)));
    let mut exhausted = false;
    loop {
        match pick(routes, &buf, exhausted) {
            Pick::Route(index) => return Ok(Some((index, Rewind::new(buf.freeze(), conn)))),
            Pick::None => return Ok(None),
            Pick::NeedMore => {}
        }
        let room = max_bytes.saturating_sub(buf.len());
        let n = (&mut conn).take(room as u64).read_buf(&mut buf).await?;
        exhausted = n == 0 || buf.len() >= max_bytes;
    }
}

enum Pick {
    Route(usize),
    None,
    NeedMore,
}

fn pick(routes: &[Route], prefix: &[u8], exhausted: bool) -> Pick {
    for (index, route) in routes.iter().enumerate() {
        match route.matcher.matches(prefix) {
            MatchOutcome::Matched => return Pick::Route(index),
            MatchOutcome::NeedMore if !exhausted => return Pick::NeedMore,
            MatchOutcome::NeedMore | MatchOutcome::NoMatch => {}
        }
    }
    Pick::None
}
