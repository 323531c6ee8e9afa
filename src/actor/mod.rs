//! Addressable actor runtime.
//!
//! Every stateful subsystem of the master is an [`Actor`]: it owns its state,
//! lives at a hierarchical [`ActorAddress`], and is reached only through an
//! [`ActorRef`] by `tell` (fire-and-forget) or `ask` (bounded request/response).
//!
//! ```text
//!   ActorSystem ── registry: address → registration
//!        │
//!        ├── /trialLogger
//!        └── /rwCoordinator
//!               ├── /rwCoordinator/session-…
//!               └── /rwCoordinator/session-…
//! ```
//!
//! Each actor runs as one tokio task draining an unbounded mailbox, so messages
//! to one actor are handled strictly one at a time and in arrival order.
//! Supervision is observational: a parent hears `child_stopped` when a child
//! exits, and nothing is restarted automatically. Stopping a parent stops its
//! children first. A panic in a callback stops only that actor.

mod actor_ref;
mod address;
mod context;
pub mod recovery;
mod system;

pub use actor_ref::{ActorRef, Reply};
pub use address::ActorAddress;
pub use context::Context;
pub use system::ActorSystem;

use async_trait::async_trait;

use crate::types::Result;

/// Behaviour of one actor.
#[async_trait]
pub trait Actor: Send + Sized + 'static {
    /// Closed set of messages this actor understands.
    type Message: Send + 'static;

    /// Runs before the first message. An error stops the actor.
    async fn pre_start(&mut self, _ctx: &mut Context<Self>) -> Result<()> {
        Ok(())
    }

    async fn handle(&mut self, ctx: &mut Context<Self>, message: Self::Message);

    /// A direct child has exited.
    async fn child_stopped(&mut self, _ctx: &mut Context<Self>, _child: &ActorAddress) {}

    /// Runs once on exit, after children have stopped, including after a panic.
    async fn post_stop(&mut self, _ctx: &mut Context<Self>) {}
}
