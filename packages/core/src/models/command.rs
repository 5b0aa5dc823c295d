//! Command Envelope
//!
//! The immutable description of one database operation, created by the
//! transport layer and consumed once by the dispatcher.
//!
//! Both the current field names and the legacy ones are accepted:
//!
//! | Field        | Legacy alias | Values                                              |
//! |--------------|--------------|-----------------------------------------------------|
//! | `engine`     | `dbtype`     | `local-sql` (`sqlite3`), `network-sql` (`mysql`), `embedded-kv` (`badgerdb`) |
//! | `target`     | `dbname`     | database identifier                                 |
//! | `operation`  | `querytype`  | `select`, `exec`, `alter`, `update`, `delete`, `scan` |
//! | `statement`  | `dbquery`    | SQL text, or the key for `embedded-kv`              |
//! | `parameters` | `params`     | array of JSON values, `null` or absent              |

use crate::db::{GatewayError, GatewayResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Maximum length of a database identifier in bytes
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Storage engine a command is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Engine {
    #[serde(rename = "local-sql", alias = "sqlite3", alias = "sqlite")]
    LocalSql,
    #[serde(rename = "network-sql", alias = "mysql")]
    NetworkSql,
    #[serde(rename = "embedded-kv", alias = "badgerdb", alias = "kv")]
    EmbeddedKv,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::LocalSql => "local-sql",
            Engine::NetworkSql => "network-sql",
            Engine::EmbeddedKv => "embedded-kv",
        }
    }

    pub fn is_sql(&self) -> bool {
        !matches!(self, Engine::EmbeddedKv)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation requested against the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Read rows (SQL) or a single key (KV)
    Select,
    /// Mutating statement (SQL) or create-if-absent (KV)
    Exec,
    /// Schema statement, SQL engines only
    Alter,
    /// Replace an existing key, KV only
    Update,
    /// Remove a key, KV only
    Delete,
    /// Regex scan over keys, KV only
    Scan,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Select => "select",
            Operation::Exec => "exec",
            Operation::Alter => "alter",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Scan => "scan",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One database operation as received from the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(alias = "dbtype")]
    pub engine: Engine,
    #[serde(alias = "dbname")]
    pub target: String,
    #[serde(alias = "querytype")]
    pub operation: Operation,
    #[serde(alias = "dbquery")]
    pub statement: String,
    #[serde(default, alias = "params", deserialize_with = "null_as_empty")]
    pub parameters: Vec<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Command {
    pub fn new(
        engine: Engine,
        target: impl Into<String>,
        operation: Operation,
        statement: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            target: target.into(),
            operation,
            statement: statement.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Parse and validate a raw JSON envelope
    ///
    /// Missing fields, unknown engines or operations and malformed targets
    /// all surface as `BadRequest`.
    pub fn from_json(raw: Value) -> GatewayResult<Self> {
        if !raw.is_object() {
            return Err(GatewayError::bad_request("command must be a JSON object"));
        }
        let command: Command = serde_json::from_value(raw)
            .map_err(|e| GatewayError::bad_request(format!("invalid command: {}", e)))?;
        command.validate()?;
        Ok(command)
    }

    /// Check the envelope-level invariants that serde cannot express
    pub fn validate(&self) -> GatewayResult<()> {
        validate_identifier(&self.target)?;
        if self.operation != Operation::Scan && self.statement.trim().is_empty() {
            return Err(GatewayError::bad_request("statement must not be empty"));
        }
        Ok(())
    }
}

/// Validate a database identifier
///
/// Identifiers name files and directories under a configured root, so they
/// are restricted to a single safe path component.
pub fn validate_identifier(identifier: &str) -> GatewayResult<()> {
    if identifier.is_empty() {
        return Err(GatewayError::bad_request("target must not be empty"));
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(GatewayError::bad_request(format!(
            "target exceeds {} bytes",
            MAX_IDENTIFIER_LEN
        )));
    }
    if identifier.starts_with('.') {
        return Err(GatewayError::bad_request(format!(
            "invalid target '{}': must not start with '.'",
            identifier
        )));
    }
    if let Some(bad) = identifier
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(GatewayError::bad_request(format!(
            "invalid target '{}': character {:?} not allowed",
            identifier, bad
        )));
    }
    Ok(())
}
