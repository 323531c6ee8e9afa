//! # Cluster Master - control-plane kernel of a training cluster
//!
//! Provides:
//! - An addressable actor runtime with bounded request/response and
//!   observational supervision
//! - A reader/writer lock coordinator over named resources, held by remote
//!   WebSocket connections
//! - One TCP port shared by a binary RPC server and an HTTP server, with
//!   optional TLS
//! - Startup recovery of jobs that were running when the master went down
//!
//! ## Architecture
//!
//! ```text
//!                 ┌───────────── Master ──────────────┐
//!   TCP ─▶ demux ─┤  RPC server ─┐                    │
//!                 │              ├─▶ /rwCoordinator   │
//!                 │  HTTP server ┘     └─ sessions    │
//!                 │              └───▶ /trialLogger ──┼─▶ Database
//!                 └───────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod actor;
pub mod api;
pub mod auth;
pub mod db;
pub mod logs;
pub mod master;
pub mod rpc;
pub mod rwlock;
pub mod transport;
pub mod trial_logger;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
