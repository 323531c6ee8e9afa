use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ActorAddress;
use crate::types::{Error, Result};

/// What travels through a mailbox.
pub(crate) enum Envelope<M> {
    Message(M),
    ChildStopped(ActorAddress),
    Stop,
}

/// Copyable handle to exactly one actor instance.
///
/// Once the actor exits the handle stays valid as a value but every send fails;
/// a later actor spawned at the same address is never reachable through it.
pub struct ActorRef<M> {
    address: ActorAddress,
    tx: mpsc::UnboundedSender<Envelope<M>>,
    terminated: CancellationToken,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            address: self.address.clone(),
            tx: self.tx.clone(),
            terminated: self.terminated.clone(),
        }
    }
}

impl<M> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("address", &self.address)
            .field("terminated", &self.terminated.is_cancelled())
            .finish()
    }
}

impl<M: Send + 'static> ActorRef<M> {
    pub(crate) fn new(
        address: ActorAddress,
        tx: mpsc::UnboundedSender<Envelope<M>>,
        terminated: CancellationToken,
    ) -> Self {
        Self {
            address,
            tx,
            terminated,
        }
    }

    pub fn address(&self) -> &ActorAddress {
        &self.address
    }

    /// Fire-and-forget send. Returns `false` if the actor is gone.
    pub fn tell(&self, message: M) -> bool {
        if self.terminated.is_cancelled() || self.tx.send(Envelope::Message(message)).is_err() {
            tracing::debug!(target_actor = %self.address, "tell_dropped");
            return false;
        }
        true
    }

    /// Request/response with a caller-side bound.
    ///
    /// `make` wraps the reply slot into the actor's message type. Fails with
    /// `Timeout` when no reply arrives within `timeout`, and with
    /// `TargetTerminated` when the actor is (or becomes) dead.
    pub async fn ask<R, F>(&self, make: F, timeout: Duration) -> Result<R>
    where
        F: FnOnce(Reply<R>) -> M,
    {
        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        if !self.tell(make(Reply(tx))) {
            return Err(Error::target_terminated(self.address.to_string()));
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                // Reply slot dropped unanswered: the mailbox was drained on exit,
                // or the actor discarded the request.
                match tokio::time::timeout_at(deadline, self.terminated.cancelled()).await {
                    Ok(()) => Err(Error::target_terminated(self.address.to_string())),
                    Err(_) => Err(Error::internal(format!(
                        "{} dropped the request without replying",
                        self.address
                    ))),
                }
            }
            Err(_) => Err(Error::timeout(format!(
                "ask to {} timed out after {:?}",
                self.address, timeout
            ))),
        }
    }

    /// Ask the actor to exit after the messages already queued.
    pub fn stop(&self) {
        let _ = self.tx.send(Envelope::Stop);
    }

    /// Resolves once the actor has exited and its mailbox is drained.
    pub async fn await_termination(&self) {
        self.terminated.cancelled().await;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    pub(crate) fn send_envelope(&self, envelope: Envelope<M>) -> bool {
        self.tx.send(envelope).is_ok()
    }
}

/// One-shot reply slot carried inside an ask message.
pub struct Reply<R>(oneshot::Sender<R>);

impl<R> Reply<R> {
    /// Deliver the reply. Returns `false` if the asker already gave up.
    pub fn send(self, value: R) -> bool {
        self.0.send(value).is_ok()
    }

    /// The asker timed out or went away.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// Resolves when the asker stops waiting.
    pub async fn closed(&mut self) {
        self.0.closed().await;
    }
}

impl<R> fmt::Debug for Reply<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("closed", &self.0.is_closed())
            .finish()
    }
}
