//! Command Dispatcher
//!
//! The single entry point from the transport into the core. It parses and
//! validates the envelope, picks the adapter for the engine, translates the
//! operation into an adapter call and wraps the outcome in the uniform
//! response envelope.
//!
//! # Operation Mapping
//!
//! | Operation | SQL engines        | embedded-kv               |
//! |-----------|--------------------|---------------------------|
//! | `select`  | `query` -> rows    | `get` -> document         |
//! | `exec`    | `execute` -> count | `put` (create) -> ack     |
//! | `alter`   | `alter` -> ack     | rejected                  |
//! | `update`  | rejected           | `update` -> ack           |
//! | `delete`  | rejected           | `delete` -> ack           |
//! | `scan`    | rejected           | `scan` -> key/document map|
//!
//! Rejected pairs are `BadRequest`. Nothing is retried: statements may have
//! side effects.
//!
//! # Fault Isolation
//!
//! A panic inside an adapter is caught here and answered as `Internal` for
//! that request only; the process keeps serving.

use crate::config::GatewayConfig;
use crate::db::{
    ConnectionManager, ErrorKind, GatewayError, GatewayResult, KvAdapter, LocalSqlAdapter,
    NetworkSqlAdapter, SqlAdapter,
};
use crate::models::{CanonicalValue, Command, Engine, Operation, ResultSet};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn, Span};
use uuid::Uuid;

/// Acknowledgement payload for operations without a result
pub const ACK: &str = "ok";

/// Successful result of one command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Rows(ResultSet),
    Affected(u64),
    Ack(&'static str),
    Document(Value),
    Entries(Map<String, Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Uniform response envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl Response {
    pub fn success(outcome: Outcome) -> Self {
        Self {
            status: Status::Success,
            data: Some(outcome),
            message: None,
            kind: None,
        }
    }

    pub fn error(err: &GatewayError) -> Self {
        Self {
            status: Status::Error,
            data: None,
            message: Some(err.message().to_string()),
            kind: Some(err.kind()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.kind
    }
}

/// Routes commands to engine adapters
#[derive(Clone)]
pub struct Dispatcher {
    local: Arc<dyn SqlAdapter>,
    network: Arc<dyn SqlAdapter>,
    kv: KvAdapter,
}

impl Dispatcher {
    pub fn new(local: Arc<dyn SqlAdapter>, network: Arc<dyn SqlAdapter>, kv: KvAdapter) -> Self {
        Self { local, network, kv }
    }

    /// Build the production adapters from configuration
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            Arc::new(LocalSqlAdapter::new(config.local_sql.clone())),
            Arc::new(NetworkSqlAdapter::new(config.network_sql.clone())),
            KvAdapter::new(ConnectionManager::new(config.embedded_kv.clone())),
        )
    }

    /// Manager owning the embedded-KV handles; shut it down on exit
    pub fn connection_manager(&self) -> &ConnectionManager {
        self.kv.manager()
    }

    /// Parse a raw envelope and execute it
    #[instrument(
        name = "dispatch",
        skip(self, raw),
        fields(request_id = %Uuid::new_v4(), engine, operation, target)
    )]
    pub async fn dispatch(&self, raw: Value) -> Response {
        let command = match Command::from_json(raw) {
            Ok(command) => command,
            Err(e) => {
                debug!("Rejected envelope: {}", e);
                return Response::error(&e);
            }
        };

        let span = Span::current();
        span.record("engine", command.engine.as_str());
        span.record("operation", command.operation.as_str());
        span.record("target", command.target.as_str());

        self.dispatch_command(command).await
    }

    /// Execute an already parsed command
    pub async fn dispatch_command(&self, command: Command) -> Response {
        debug!(statement = %command.statement, "Dispatching command");

        match AssertUnwindSafe(self.execute(&command)).catch_unwind().await {
            Ok(Ok(outcome)) => Response::success(outcome),
            Ok(Err(e)) => {
                match e.kind() {
                    ErrorKind::EngineUnavailable | ErrorKind::StatementFailed => {
                        warn!("⚠️ {} {} failed: {}", command.engine, command.operation, e)
                    }
                    ErrorKind::Internal => {
                        error!("❌ {} {} failed: {}", command.engine, command.operation, e)
                    }
                    _ => debug!("{} {} rejected: {}", command.engine, command.operation, e),
                }
                Response::error(&e)
            }
            Err(panic) => {
                error!(
                    "💥 Adapter panicked during {} {}: {}",
                    command.engine,
                    command.operation,
                    panic_message(&*panic)
                );
                Response::error(&GatewayError::internal(
                    "internal error while executing command",
                ))
            }
        }
    }

    async fn execute(&self, command: &Command) -> GatewayResult<Outcome> {
        command.validate()?;
        match command.engine {
            Engine::LocalSql => self.run_sql(self.local.as_ref(), command).await,
            Engine::NetworkSql => self.run_sql(self.network.as_ref(), command).await,
            Engine::EmbeddedKv => self.run_kv(command).await,
        }
    }

    async fn run_sql(&self, adapter: &dyn SqlAdapter, command: &Command) -> GatewayResult<Outcome> {
        let params = scalar_parameters(&command.parameters)?;
        let target = command.target.as_str();
        let statement = command.statement.as_str();

        match command.operation {
            Operation::Select => adapter
                .query(target, statement, &params)
                .await
                .map(Outcome::Rows),
            Operation::Exec => adapter
                .execute(target, statement, &params)
                .await
                .map(Outcome::Affected),
            Operation::Alter => {
                if !params.is_empty() {
                    return Err(GatewayError::bad_request("alter does not take parameters"));
                }
                adapter.alter(target, statement).await?;
                Ok(Outcome::Ack(ACK))
            }
            other => Err(unsupported(adapter.engine(), other)),
        }
    }

    async fn run_kv(&self, command: &Command) -> GatewayResult<Outcome> {
        let target = command.target.as_str();
        let key = command.statement.as_str();

        match command.operation {
            Operation::Select => self.kv.get(target, key).await.map(Outcome::Document),
            Operation::Exec => {
                let document = document_from(&command.parameters)?;
                self.kv.put(target, key, &document).await?;
                Ok(Outcome::Ack(ACK))
            }
            Operation::Update => {
                let document = document_from(&command.parameters)?;
                self.kv.update(target, key, &document).await?;
                Ok(Outcome::Ack(ACK))
            }
            Operation::Delete => {
                self.kv.delete(target, key).await?;
                Ok(Outcome::Ack(ACK))
            }
            Operation::Scan => {
                let entries = self.kv.scan(target, key).await?;
                Ok(Outcome::Entries(entries.into_iter().collect()))
            }
            Operation::Alter => Err(unsupported(Engine::EmbeddedKv, Operation::Alter)),
        }
    }
}

/// SQL parameters must be JSON scalars
fn scalar_parameters(parameters: &[Value]) -> GatewayResult<Vec<CanonicalValue>> {
    parameters
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            CanonicalValue::from_json_scalar(value).ok_or_else(|| {
                GatewayError::bad_request(format!(
                    "parameter {} is not a scalar (arrays and objects cannot be bound)",
                    idx + 1
                ))
            })
        })
        .collect()
}

/// Document written by `exec`/`update` on the embedded store
///
/// One parameter is stored as-is; several are stored as an array.
fn document_from(parameters: &[Value]) -> GatewayResult<Value> {
    match parameters {
        [] => Err(GatewayError::bad_request(
            "embedded-kv writes need the document as a parameter",
        )),
        [single] => Ok(single.clone()),
        many => Ok(Value::Array(many.to_vec())),
    }
}

fn unsupported(engine: Engine, operation: Operation) -> GatewayError {
    GatewayError::bad_request(format!(
        "operation '{}' is not supported by engine '{}'",
        operation, engine
    ))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
