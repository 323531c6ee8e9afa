use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{LockConnection, LockMode, LockSession, SessionMessage};
use crate::actor::{Actor, ActorAddress, ActorRef, Context, Reply};
use crate::types::ConnectionId;

/// Name of the coordinator under the root.
pub const COORDINATOR_NAME: &str = "rwCoordinator";

/// A remote caller asking for `mode` access to `resource`.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub resource: String,
    pub mode: LockMode,
    pub connection: LockConnection,
}

#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Replied to only once granted, with the session holding the grant.
    Acquire {
        request: LockRequest,
        reply: Reply<ActorRef<SessionMessage>>,
    },
    /// A queued connection went away.
    WaiterClosed {
        resource: String,
        connection: ConnectionId,
    },
    /// Revoke every current grant on `resource`; replies with how many.
    Evict {
        resource: String,
        reply: Reply<usize>,
    },
    GetState {
        resource: String,
        reply: Reply<Option<LockSnapshot>>,
    },
    /// Number of tracked resources.
    ResourceCount { reply: Reply<usize> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub connection: ConnectionId,
    pub mode: LockMode,
}

/// Point-in-time view of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub resource: String,
    pub holders: Vec<LockEntry>,
    pub waiters: Vec<LockEntry>,
}

#[derive(Debug)]
struct Holder {
    connection: LockConnection,
    mode: LockMode,
    session: ActorRef<SessionMessage>,
}

#[derive(Debug)]
struct Waiter {
    connection: LockConnection,
    mode: LockMode,
    reply: Reply<ActorRef<SessionMessage>>,
}

#[derive(Debug, Default)]
struct ResourceState {
    holders: Vec<Holder>,
    waiters: VecDeque<Waiter>,
}

impl ResourceState {
    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.waiters.is_empty()
    }

    fn snapshot(&self, resource: &str) -> LockSnapshot {
        LockSnapshot {
            resource: resource.to_string(),
            holders: self
                .holders
                .iter()
                .map(|h| LockEntry {
                    connection: h.connection.id().clone(),
                    mode: h.mode,
                })
                .collect(),
            waiters: self
                .waiters
                .iter()
                .map(|w| LockEntry {
                    connection: w.connection.id().clone(),
                    mode: w.mode,
                })
                .collect(),
        }
    }
}

/// Singleton owner of all lock state.
#[derive(Debug, Default)]
pub struct Coordinator {
    resources: HashMap<String, ResourceState>,
    sessions: HashMap<ActorAddress, (String, ConnectionId)>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant the head of `resource`'s queue while it is compatible with the
    /// current holders, skipping waiters whose connection already closed.
    fn admit(&mut self, ctx: &Context<Self>, resource: &str) {
        let Some(state) = self.resources.get_mut(resource) else {
            return;
        };

        while let Some(head) = state.waiters.front() {
            if head.connection.is_closed() {
                state.waiters.pop_front();
                continue;
            }
            if !head.mode.compatible_with(state.holders.iter().map(|h| h.mode)) {
                break;
            }
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };

            let name = format!("session-{}", waiter.connection.id());
            let session = LockSession::new(resource.to_string(), waiter.mode, waiter.connection.clone());
            match ctx.spawn_child(&name, session) {
                Ok(session) => {
                    self.sessions.insert(
                        session.address().clone(),
                        (resource.to_string(), waiter.connection.id().clone()),
                    );
                    state.holders.push(Holder {
                        connection: waiter.connection,
                        mode: waiter.mode,
                        session: session.clone(),
                    });
                    if !waiter.reply.send(session) {
                        // The caller stopped waiting; the grant still stands
                        // until its connection closes.
                        tracing::debug!(resource = %resource, "lock_grant_unobserved");
                    }
                }
                Err(err) => {
                    tracing::warn!(resource = %resource, error = %err, "lock_session_spawn_failed");
                    waiter.connection.request_close();
                }
            }
        }
    }

    fn collect_if_idle(&mut self, resource: &str) {
        if self.resources.get(resource).is_some_and(ResourceState::is_idle) {
            self.resources.remove(resource);
            tracing::debug!(resource = %resource, "lock_resource_collected");
        }
    }

    fn acquire(&mut self, ctx: &Context<Self>, request: LockRequest, reply: Reply<ActorRef<SessionMessage>>) {
        let LockRequest {
            resource,
            mode,
            connection,
        } = request;
        let id = connection.id().clone();

        self.resources
            .entry(resource.clone())
            .or_default()
            .waiters
            .push_back(Waiter {
                connection: connection.clone(),
                mode,
                reply,
            });
        self.admit(ctx, &resource);

        let queued = self
            .resources
            .get(&resource)
            .is_some_and(|s| s.waiters.iter().any(|w| w.connection.id() == &id));
        if !queued {
            // An acquire on an already-closed connection leaves nothing behind.
            self.collect_if_idle(&resource);
            return;
        }

        tracing::debug!(resource = %resource, mode = %mode, connection = %id, "lock_queued");
        let myself = ctx.myself().clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = connection.closed() => {
                    myself.tell(CoordinatorMessage::WaiterClosed { resource, connection: id });
                }
                _ = myself.await_termination() => {}
            }
        });
    }
}

#[async_trait]
impl Actor for Coordinator {
    type Message = CoordinatorMessage;

    async fn handle(&mut self, ctx: &mut Context<Self>, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Acquire { request, reply } => {
                self.acquire(ctx, request, reply);
            }
            CoordinatorMessage::WaiterClosed {
                resource,
                connection,
            } => {
                if let Some(state) = self.resources.get_mut(&resource) {
                    state.waiters.retain(|w| w.connection.id() != &connection);
                }
                self.admit(ctx, &resource);
                self.collect_if_idle(&resource);
            }
            CoordinatorMessage::Evict { resource, reply } => {
                let evicted = self.resources.get(&resource).map_or(0, |state| {
                    for holder in &state.holders {
                        holder.session.tell(SessionMessage::Evict);
                    }
                    state.holders.len()
                });
                reply.send(evicted);
            }
            CoordinatorMessage::GetState { resource, reply } => {
                reply.send(self.resources.get(&resource).map(|s| s.snapshot(&resource)));
            }
            CoordinatorMessage::ResourceCount { reply } => {
                reply.send(self.resources.len());
            }
        }
    }

    async fn child_stopped(&mut self, ctx: &mut Context<Self>, child: &ActorAddress) {
        let Some((resource, connection)) = self.sessions.remove(child) else {
            return;
        };
        if let Some(state) = self.resources.get_mut(&resource) {
            state.holders.retain(|h| h.connection.id() != &connection);
        }
        self.admit(ctx, &resource);
        self.collect_if_idle(&resource);
    }

    async fn post_stop(&mut self, _ctx: &mut Context<Self>) {
        for state in self.resources.values() {
            for waiter in &state.waiters {
                waiter.connection.request_close();
            }
        }
        self.resources.clear();
        self.sessions.clear();
    }
}
