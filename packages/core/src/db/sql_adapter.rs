//! SqlAdapter Trait - Relational Engine Abstraction
//!
//! This module defines the `SqlAdapter` trait that presents one uniform
//! contract over the relational engines. The dispatcher selects an adapter
//! once per command and never branches on engine specifics afterwards.
//!
//! # Contract
//!
//! - **Independent calls**: every call opens its own connection, runs exactly
//!   one statement and releases the connection before returning.
//! - **Positional binding**: the parameter count must equal the placeholder
//!   count, otherwise the call fails with `BadRequest` before reaching the
//!   engine.
//! - **Bounded**: every call carries the adapter's statement deadline.
//! - **Normalized results**: rows come back as [`ResultSet`] built by the
//!   shared normalizer.
//!
//! The embedded key-value engine has a different shape (point operations on
//! keys) and lives behind [`KvAdapter`](crate::db::KvAdapter) instead.

use crate::db::{GatewayError, GatewayResult};
use crate::models::{CanonicalValue, Engine, ResultSet};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Uniform request/response contract over a relational engine
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance serves all concurrent
/// requests for its engine.
#[async_trait]
pub trait SqlAdapter: Send + Sync {
    /// Engine this adapter serves
    fn engine(&self) -> Engine;

    /// Run a row-returning statement
    ///
    /// # Errors
    ///
    /// - `BadRequest` on parameter/placeholder mismatch or invalid target
    /// - `EngineUnavailable` if the database cannot be reached or opened
    /// - `StatementFailed` if the engine rejects the statement or the deadline passes
    async fn query(
        &self,
        target: &str,
        statement: &str,
        params: &[CanonicalValue],
    ) -> GatewayResult<ResultSet>;

    /// Run a mutating statement, returning the affected row count
    async fn execute(
        &self,
        target: &str,
        statement: &str,
        params: &[CanonicalValue],
    ) -> GatewayResult<u64>;

    /// Run an unparameterized schema statement
    async fn alter(&self, target: &str, statement: &str) -> GatewayResult<()>;
}

/// Await `fut`, failing with `StatementFailed` once `deadline` passes
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("⏱️ Statement exceeded its deadline of {} ms", deadline.as_millis());
            Err(GatewayError::statement_failed(format!(
                "statement exceeded its deadline of {} ms",
                deadline.as_millis()
            )))
        }
    }
}
