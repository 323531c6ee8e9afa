use std::fmt;

use super::{Actor, ActorAddress, ActorRef, ActorSystem};
use crate::types::Result;

/// Per-actor view of the runtime, handed to every callback.
pub struct Context<A: Actor> {
    system: ActorSystem,
    myself: ActorRef<A::Message>,
    pub(crate) stopping: bool,
}

impl<A: Actor> fmt::Debug for Context<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("address", self.myself.address())
            .field("stopping", &self.stopping)
            .finish()
    }
}

impl<A: Actor> Context<A> {
    pub(crate) fn new(system: ActorSystem, myself: ActorRef<A::Message>) -> Self {
        Self {
            system,
            myself,
            stopping: false,
        }
    }

    pub fn address(&self) -> &ActorAddress {
        self.myself.address()
    }

    pub fn myself(&self) -> &ActorRef<A::Message> {
        &self.myself
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Spawn a supervised child under this actor.
    pub fn spawn_child<C: Actor>(&self, name: &str, actor: C) -> Result<ActorRef<C::Message>> {
        self.system.spawn(self.address(), name, actor)
    }

    pub fn children(&self) -> Vec<ActorAddress> {
        self.system.children(self.address())
    }

    /// Exit once the current callback returns; queued messages are discarded.
    pub fn stop(&mut self) {
        self.stopping = true;
    }
}
