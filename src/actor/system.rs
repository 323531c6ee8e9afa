use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::actor_ref::Envelope;
use super::recovery::with_recovery_async;
use super::{Actor, ActorAddress, ActorRef, Context, Reply};
use crate::types::{Error, Result};

/// Type-erased bookkeeping for one live actor.
struct Registration {
    handle: Box<dyn Any + Send + Sync>,
    stop: Box<dyn Fn() + Send + Sync>,
    notify_child_stopped: Box<dyn Fn(ActorAddress) + Send + Sync>,
    terminated: CancellationToken,
}

impl Registration {
    fn new<M: Send + 'static>(actor_ref: &ActorRef<M>, terminated: CancellationToken) -> Self {
        let stopper = actor_ref.clone();
        let notifier = actor_ref.clone();
        Self {
            handle: Box::new(actor_ref.clone()),
            stop: Box::new(move || stopper.stop()),
            notify_child_stopped: Box::new(move |child| {
                notifier.send_envelope(Envelope::ChildStopped(child));
            }),
            terminated,
        }
    }
}

struct Inner {
    name: String,
    registry: Mutex<HashMap<ActorAddress, Registration>>,
}

/// Process-wide actor runtime: address space plus supervision tree.
#[derive(Clone)]
pub struct ActorSystem {
    inner: Arc<Inner>,
}

impl fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorSystem")
            .field("name", &self.inner.name)
            .field("live_actors", &self.registry().len())
            .finish()
    }
}

impl ActorSystem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                registry: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<ActorAddress, Registration>> {
        self.inner.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start `actor` as child `name` of `parent` (use [`ActorAddress::root`] for
    /// top-level actors).
    pub fn spawn<A: Actor>(
        &self,
        parent: &ActorAddress,
        name: &str,
        actor: A,
    ) -> Result<ActorRef<A::Message>> {
        let address = parent.child(name)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let terminated = CancellationToken::new();
        let actor_ref = ActorRef::new(address.clone(), tx, terminated.clone());

        {
            let mut registry = self.registry();
            if !parent.is_root() && !registry.contains_key(parent) {
                return Err(Error::target_terminated(parent.to_string()));
            }
            if registry.contains_key(&address) {
                return Err(Error::duplicate_address(address.to_string()));
            }
            registry.insert(
                address.clone(),
                Registration::new(&actor_ref, terminated.clone()),
            );
        }

        let ctx = Context::new(self.clone(), actor_ref.clone());
        tokio::spawn(run(actor, ctx, rx, terminated));
        tracing::debug!(actor = %address, "actor_spawned");
        Ok(actor_ref)
    }

    /// Typed handle for a live actor, if its message type matches.
    pub fn lookup<M: Send + 'static>(&self, address: &ActorAddress) -> Option<ActorRef<M>> {
        self.registry()
            .get(address)
            .and_then(|r| r.handle.downcast_ref::<ActorRef<M>>())
            .cloned()
    }

    /// Tell by address. Returns `false` when nothing live answers there.
    pub fn tell_at<M: Send + 'static>(&self, address: &ActorAddress, message: M) -> bool {
        match self.lookup::<M>(address) {
            Some(actor_ref) => actor_ref.tell(message),
            None => false,
        }
    }

    /// Ask by address.
    pub async fn ask_at<M, R, F>(&self, address: &ActorAddress, make: F, timeout: Duration) -> Result<R>
    where
        M: Send + 'static,
        F: FnOnce(Reply<R>) -> M,
    {
        let actor_ref = self
            .lookup::<M>(address)
            .ok_or_else(|| Error::target_terminated(address.to_string()))?;
        actor_ref.ask(make, timeout).await
    }

    /// Addresses of the live direct children of `parent`.
    pub fn children(&self, parent: &ActorAddress) -> Vec<ActorAddress> {
        let mut children: Vec<ActorAddress> = self
            .registry()
            .keys()
            .filter(|a| a.is_child_of(parent))
            .cloned()
            .collect();
        children.sort();
        children
    }

    pub fn is_live(&self, address: &ActorAddress) -> bool {
        self.registry().contains_key(address)
    }

    /// Stop every top-level actor and wait for the whole tree to exit.
    pub async fn shutdown(&self) {
        let top_level: Vec<CancellationToken> = {
            let registry = self.registry();
            registry
                .iter()
                .filter(|(address, _)| address.is_child_of(&ActorAddress::root()))
                .map(|(_, r)| {
                    (r.stop)();
                    r.terminated.clone()
                })
                .collect()
        };
        for terminated in top_level {
            terminated.cancelled().await;
        }
        tracing::info!(system = %self.inner.name, "actor_system_stopped");
    }

    /// Remove `address` and stop its children, returning their termination tokens.
    fn deregister(&self, address: &ActorAddress) -> Vec<CancellationToken> {
        let mut registry = self.registry();
        registry.remove(address);
        registry
            .iter()
            .filter(|(child, _)| child.is_child_of(address))
            .map(|(_, r)| {
                (r.stop)();
                r.terminated.clone()
            })
            .collect()
    }

    fn notify_parent(&self, address: &ActorAddress) {
        let Some(parent) = address.parent() else {
            return;
        };
        if let Some(registration) = self.registry().get(&parent) {
            (registration.notify_child_stopped)(address.clone());
        }
    }
}

/// Drive one actor from `pre_start` to exit.
async fn run<A: Actor>(
    mut actor: A,
    mut ctx: Context<A>,
    mut rx: mpsc::UnboundedReceiver<Envelope<A::Message>>,
    terminated: CancellationToken,
) {
    let address = ctx.address().clone();

    let started = {
        let (a, c) = (&mut actor, &mut ctx);
        with_recovery_async(async move { a.pre_start(c).await }, "pre_start").await
    };
    if let Err(err) = started {
        tracing::error!(actor = %address, error = %err, "actor_start_failed");
        ctx.stopping = true;
    }

    while !ctx.stopping {
        let Some(envelope) = rx.recv().await else {
            break;
        };
        let (a, c) = (&mut actor, &mut ctx);
        let outcome = match envelope {
            Envelope::Message(message) => {
                with_recovery_async(
                    async move {
                        a.handle(c, message).await;
                        Ok(())
                    },
                    "handle",
                )
                .await
            }
            Envelope::ChildStopped(child) => {
                with_recovery_async(
                    async move {
                        a.child_stopped(c, &child).await;
                        Ok(())
                    },
                    "child_stopped",
                )
                .await
            }
            Envelope::Stop => break,
        };
        if let Err(err) = outcome {
            tracing::error!(actor = %address, error = %err, "actor_failed");
            break;
        }
    }

    ctx.stopping = true;
    rx.close();

    for child in ctx.system().deregister(&address) {
        child.cancelled().await;
    }

    let stopped = {
        let (a, c) = (&mut actor, &mut ctx);
        with_recovery_async(
            async move {
                a.post_stop(c).await;
                Ok(())
            },
            "post_stop",
        )
        .await
    };
    if let Err(err) = stopped {
        tracing::error!(actor = %address, error = %err, "actor_post_stop_failed");
    }

    // Anything still queued is dropped, which fails pending asks.
    while rx.try_recv().is_ok() {}
    terminated.cancel();
    ctx.system().notify_parent(&address);
    tracing::debug!(actor = %address, "actor_stopped");
}
