//! Per-service RPC handlers.

pub mod locks;
pub mod master;
pub mod trials;
