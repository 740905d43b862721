//! # fanout-server
//!
//! Axum WebSocket broadcast hub.
//!
//! - `WebSocket` gateway: every envelope a peer sends is fanned out to every
//!   other connected peer, in global enqueue order
//! - Join/leave notices from the server for every connection
//! - Lock-guarded connection registry, single distribution loop
//! - HTTP endpoints: health check, Prometheus metrics, optional static files
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;

pub use config::{ConfigError, OverflowPolicy, ServerConfig};
pub use error::ServerError;
pub use hub::{Hub, HubSettings, HubStats};
pub use server::FanoutServer;
