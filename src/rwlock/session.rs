use async_trait::async_trait;

use super::{LockConnection, LockMode};
use crate::actor::{Actor, Context};
use crate::types::Result;

#[derive(Debug)]
pub enum SessionMessage {
    /// The watched connection went away.
    ConnectionClosed,
    /// The coordinator revokes this grant.
    Evict,
}

/// Child of the coordinator holding one granted lock.
///
/// Lives exactly as long as the grant: its exit is what releases the lock.
#[derive(Debug)]
pub struct LockSession {
    resource: String,
    mode: LockMode,
    connection: LockConnection,
}

impl LockSession {
    pub fn new(resource: String, mode: LockMode, connection: LockConnection) -> Self {
        Self {
            resource,
            mode,
            connection,
        }
    }
}

#[async_trait]
impl Actor for LockSession {
    type Message = SessionMessage;

    async fn pre_start(&mut self, ctx: &mut Context<Self>) -> Result<()> {
        let connection = self.connection.clone();
        let myself = ctx.myself().clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = connection.closed() => {
                    myself.tell(SessionMessage::ConnectionClosed);
                }
                _ = myself.await_termination() => {}
            }
        });
        tracing::info!(
            resource = %self.resource,
            mode = %self.mode,
            connection = %self.connection.id(),
            "lock_granted"
        );
        Ok(())
    }

    async fn handle(&mut self, ctx: &mut Context<Self>, message: SessionMessage) {
        match message {
            SessionMessage::ConnectionClosed => {}
            SessionMessage::Evict => {
                tracing::info!(resource = %self.resource, connection = %self.connection.id(), "lock_evicted");
            }
        }
        ctx.stop();
    }

    async fn post_stop(&mut self, _ctx: &mut Context<Self>) {
        self.connection.request_close();
        tracing::info!(
            resource = %self.resource,
            connection = %self.connection.id(),
            "lock_released"
        );
    }
}
