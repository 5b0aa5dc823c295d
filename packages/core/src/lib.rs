//! DbGate Core
//!
//! This crate provides the engine-facing half of the DbGate database
//! gateway: a uniform command contract over three storage engines, safe
//! shared access to the embedded key-value engine, and a scheduled snapshot
//! export of the networked database.
//!
//! # Architecture
//!
//! - **Local SQL**: SQLite-compatible files through libsql, one connection per call
//! - **Network SQL**: MySQL protocol through mysql_async, one connection per call
//! - **Embedded KV**: RocksDB directories behind a reference-counting connection manager
//! - **Canonical values**: every engine's output normalized into one value model
//!
//! # Modules
//!
//! - [`models`] - Command envelope and canonical value model
//! - [`db`] - Engine adapters, connection manager, normalizer, error taxonomy
//! - [`services`] - Command dispatcher and backup pipeline
//! - [`config`] - Engine and backup settings

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::GatewayConfig;
pub use db::{ErrorKind, GatewayError, GatewayResult};
pub use models::*;
pub use services::*;
