use tokio_util::sync::{CancellationToken, DropGuard};

use crate::types::ConnectionId;

/// The coordinator's view of one remote socket.
///
/// The transport owns the socket. It marks the connection closed when the peer
/// goes away; the lock side asks the transport to close it through
/// `request_close`. Neither side touches the socket of the other.
#[derive(Debug, Clone)]
pub struct LockConnection {
    id: ConnectionId,
    closed: CancellationToken,
    close_requested: CancellationToken,
}

impl Default for LockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl LockConnection {
    pub fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            closed: CancellationToken::new(),
            close_requested: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Transport side: the socket is gone.
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Marks the connection closed when the returned guard drops.
    pub fn close_on_drop(&self) -> DropGuard {
        self.closed.clone().drop_guard()
    }

    /// Lock side: ask the transport to close the socket.
    pub fn request_close(&self) {
        self.close_requested.cancel();
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.is_cancelled()
    }

    pub async fn close_requested(&self) {
        self.close_requested.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drop_guard_marks_closed() {
        let conn = LockConnection::new();
        {
            let _guard = conn.close_on_drop();
            assert!(!conn.is_closed());
        }
        assert!(conn.is_closed());
        conn.closed().await;
    }

    #[test]
    fn test_close_request_is_separate_from_close() {
        let conn = LockConnection::new();
        conn.request_close();
        assert!(conn.is_close_requested());
        assert!(!conn.is_closed());
    }
}
