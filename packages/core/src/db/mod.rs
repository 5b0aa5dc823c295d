//! Database Layer
//!
//! This module handles all engine interactions:
//!
//! - `SqlAdapter` implementations for the local (libsql) and networked
//!   (MySQL protocol) relational engines
//! - `KvAdapter` over the embedded RocksDB engine, backed by the
//!   `ConnectionManager` that owns every embedded handle
//! - The result normalizer shared by both SQL adapters
//! - The error taxonomy every layer above reports in
//!
//! # Architecture
//!
//! SQL adapters are stateless: each call opens its own connection, runs one
//! statement under a deadline and closes it. The embedded engine cannot work
//! that way because it locks its data directory exclusively, so its handles
//! are reference counted per identifier instead.

mod connection_manager;
mod error;
mod kv_adapter;
mod kv_store;
mod local_sql;
pub mod network_sql;
pub mod normalizer;
pub mod placeholders;
mod sql_adapter;

pub use connection_manager::{ConnectionManager, KvLease};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use kv_adapter::KvAdapter;
pub use kv_store::KvStore;
pub use local_sql::LocalSqlAdapter;
pub use network_sql::NetworkSqlAdapter;
pub use placeholders::Dialect;
pub use sql_adapter::{with_deadline, SqlAdapter};
