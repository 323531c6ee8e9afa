//! Core types for the cluster master.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (MasterId, ConnectionId, JobId, ...)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the listener, actors, and advertised integrations

mod config;
mod errors;
mod ids;

pub use config::{
    ActorConfig, Config, RpcConfig, SamlConfig, SecurityConfig, ServerConfig, TelemetryConfig,
    TlsConfig, TrialLoggerConfig, CONFIG_PATH_ENV,
};
pub use errors::{Error, Result};
pub use ids::{ClusterId, ConnectionId, JobId, MasterId};
