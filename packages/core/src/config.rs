//! Core Configuration
//!
//! Settings consumed (not loaded) by the core. The server binary reads them
//! from its settings file and hands a `GatewayConfig` to
//! [`Dispatcher::from_config`](crate::services::Dispatcher::from_config).
//!
//! Every field has a default so a partial settings file is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Aggregate configuration for all engines and the backup pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub local_sql: LocalSqlConfig,
    pub network_sql: NetworkSqlConfig,
    pub embedded_kv: EmbeddedKvConfig,
    pub backup: BackupConfig,
}

impl GatewayConfig {
    /// Reject settings that would make an engine unusable
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.local_sql.statement_timeout_ms == 0 {
            anyhow::bail!("local_sql.statement_timeout_ms must be greater than 0");
        }
        if self.network_sql.statement_timeout_ms == 0 {
            anyhow::bail!("network_sql.statement_timeout_ms must be greater than 0");
        }
        if self.network_sql.connect_timeout_ms == 0 {
            anyhow::bail!("network_sql.connect_timeout_ms must be greater than 0");
        }
        if self.embedded_kv.acquire_timeout_ms == 0 {
            anyhow::bail!("embedded_kv.acquire_timeout_ms must be greater than 0");
        }
        if self.embedded_kv.release_policy == ReleasePolicyKind::Idle
            && self.embedded_kv.idle_grace_ms == 0
        {
            anyhow::bail!("embedded_kv.idle_grace_ms must be greater than 0 for the idle policy");
        }
        if self.backup.enabled {
            if self.backup.interval_secs == 0 {
                anyhow::bail!("backup.interval_secs must be greater than 0");
            }
            if self.backup.database.trim().is_empty() {
                anyhow::bail!("backup.database must be set when backups are enabled");
            }
        }
        Ok(())
    }
}

/// Locally embedded relational engine (SQLite-compatible files)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSqlConfig {
    /// Directory holding database files; targets resolve to `<root>/<target>`
    pub root: PathBuf,
    /// How long a connection waits on a locked database file
    pub busy_timeout_ms: u64,
    /// Deadline for a single statement
    pub statement_timeout_ms: u64,
}

impl Default for LocalSqlConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            busy_timeout_ms: 5_000,
            statement_timeout_ms: 30_000,
        }
    }
}

impl LocalSqlConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

/// Networked relational engine (MySQL protocol)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub connect_timeout_ms: u64,
    pub statement_timeout_ms: u64,
}

impl Default for NetworkSqlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "dbuser".to_string(),
            password: String::new(),
            connect_timeout_ms: 5_000,
            statement_timeout_ms: 30_000,
        }
    }
}

impl NetworkSqlConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

/// What happens to an embedded-KV handle once its last user releases it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleasePolicyKind {
    /// Close as soon as the reference count reaches zero
    Immediate,
    /// Keep the handle open for `idle_grace_ms` before closing
    Idle,
}

/// Embedded ordered key-value engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedKvConfig {
    /// Directory holding one data directory per target
    pub root: PathBuf,
    pub release_policy: ReleasePolicyKind,
    pub idle_grace_ms: u64,
    /// Upper bound for `acquire`, including the open itself
    pub acquire_timeout_ms: u64,
    /// Fsync every write before acknowledging it
    pub sync_writes: bool,
}

impl Default for EmbeddedKvConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            release_policy: ReleasePolicyKind::Idle,
            idle_grace_ms: 30_000,
            acquire_timeout_ms: 5_000,
            sync_writes: true,
        }
    }
}

impl EmbeddedKvConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }
}

/// Scheduled export of the networked database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    /// Networked database to export
    pub database: String,
    /// Directory receiving `<database>_<YYYY-MM-DD>.sql`
    pub output_dir: PathBuf,
    pub interval_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database: String::new(),
            output_dir: PathBuf::from("static"),
            interval_secs: 3_600,
        }
    }
}

impl BackupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
