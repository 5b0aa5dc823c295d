//! LocalSqlAdapter - SqlAdapter Implementation for the Embedded SQL Engine
//!
//! Each call opens the database file `<root>/<target>` with libsql, sets the
//! busy timeout so concurrent writers wait instead of failing immediately,
//! runs one statement and drops the connection. SQLite's own file locking
//! arbitrates between concurrent calls; no state is shared between them.
//!
//! # Deadlines
//!
//! libsql steps local statements synchronously inside its futures, so a
//! session never yields while the engine works. Every session therefore runs
//! on the blocking pool and the deadline is enforced from the async side.
//! Once the deadline passes the caller gets `StatementFailed` right away and
//! the session is abandoned:
//!
//! - a row-returning statement stops at its next row
//! - a data change runs inside a transaction that is rolled back instead of
//!   committed
//!
//! # Examples
//!
//! ```rust,no_run
//! use dbgate_core::config::LocalSqlConfig;
//! use dbgate_core::db::{LocalSqlAdapter, SqlAdapter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = LocalSqlAdapter::new(LocalSqlConfig::default());
//! adapter
//!     .alter("app.db", "CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT)")
//!     .await?;
//! let rows = adapter.query("app.db", "SELECT * FROM users", &[]).await?;
//! println!("{} users", rows.len());
//! # Ok(())
//! # }
//! ```

use crate::config::LocalSqlConfig;
use crate::db::normalizer;
use crate::db::placeholders::{ensure_parameter_count, Dialect};
use crate::db::sql_adapter::{with_deadline, SqlAdapter};
use crate::db::{GatewayError, GatewayResult};
use crate::models::{validate_identifier, CanonicalValue, Engine, ResultSet, Row, TIMESTAMP_FORMAT};
use async_trait::async_trait;
use libsql::params::Params;
use libsql::{Builder, Connection, Database};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Primary result codes that mean "the file cannot be used right now"
const SQLITE_UNAVAILABLE_CODES: [i32; 7] = [
    5,  // SQLITE_BUSY
    6,  // SQLITE_LOCKED
    10, // SQLITE_IOERR
    11, // SQLITE_CORRUPT
    13, // SQLITE_FULL
    14, // SQLITE_CANTOPEN
    26, // SQLITE_NOTADB
];

/// Open database plus connection; the database must outlive the connection
struct LocalSession {
    _db: Database,
    conn: Connection,
}

/// Raised by the caller once it stops waiting for a session
#[derive(Debug, Clone, Default)]
struct Abandoned(Arc<AtomicBool>);

impl Abandoned {
    fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn check(&self) -> GatewayResult<()> {
        if self.0.load(Ordering::Acquire) {
            Err(GatewayError::statement_failed(
                "statement abandoned after its deadline",
            ))
        } else {
            Ok(())
        }
    }
}

/// Adapter for SQLite-compatible database files under a root directory
#[derive(Debug, Clone)]
pub struct LocalSqlAdapter {
    config: LocalSqlConfig,
}

impl LocalSqlAdapter {
    pub fn new(config: LocalSqlConfig) -> Self {
        Self { config }
    }

    /// Resolve a target to its database file
    pub fn database_path(&self, target: &str) -> GatewayResult<PathBuf> {
        validate_identifier(target)?;
        Ok(self.config.root.join(target))
    }

    /// Run `work` against a fresh session on the blocking pool, bounded by
    /// the statement deadline
    async fn run<T, F, Fut>(&self, target: &str, work: F) -> GatewayResult<T>
    where
        T: Send + 'static,
        F: FnOnce(LocalSession, Abandoned) -> Fut + Send + 'static,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let path = self.database_path(target)?;
        let config = self.config.clone();
        let owned_target = target.to_string();
        let abandoned = Abandoned::default();
        let flag = abandoned.clone();
        let runtime = tokio::runtime::Handle::current();

        let task = tokio::task::spawn_blocking(move || {
            runtime.block_on(async move {
                let session = open_session(&config, &path, &owned_target).await?;
                work(session, flag).await
            })
        });

        let result = with_deadline(self.config.statement_timeout(), async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            }
        })
        .await;

        // A session that already finished never looks at the flag again
        abandoned.set();
        result
    }
}

async fn open_session(
    config: &LocalSqlConfig,
    path: &Path,
    target: &str,
) -> GatewayResult<LocalSession> {
    if !config.root.exists() {
        std::fs::create_dir_all(&config.root).map_err(|e| {
            GatewayError::engine_unavailable(format!(
                "failed to create database root {}: {}",
                config.root.display(),
                e
            ))
        })?;
    }

    let db = Builder::new_local(path).build().await.map_err(|e| {
        GatewayError::engine_unavailable(format!(
            "failed to open local database '{}': {}",
            target, e
        ))
    })?;
    let conn = db.connect().map_err(|e| {
        GatewayError::engine_unavailable(format!(
            "failed to connect to local database '{}': {}",
            target, e
        ))
    })?;

    // PRAGMA returns a row, so it has to go through query()
    conn.query(
        &format!("PRAGMA busy_timeout = {}", config.busy_timeout_ms),
        (),
    )
    .await
    .map_err(|e| {
        GatewayError::engine_unavailable(format!(
            "failed to configure local database '{}': {}",
            target, e
        ))
    })?;

    Ok(LocalSession { _db: db, conn })
}

#[async_trait]
impl SqlAdapter for LocalSqlAdapter {
    fn engine(&self) -> Engine {
        Engine::LocalSql
    }

    async fn query(
        &self,
        target: &str,
        statement: &str,
        params: &[CanonicalValue],
    ) -> GatewayResult<ResultSet> {
        ensure_parameter_count(Dialect::Sqlite, statement, params.len())?;
        debug!(target, statement, "local-sql query");

        let statement = statement.to_string();
        let params = params.to_vec();
        self.run(target, move |session, abandoned| async move {
            let mut rows = session
                .conn
                .query(&statement, bind(&params))
                .await
                .map_err(statement_error)?;

            let names: Vec<String> = (0..rows.column_count())
                .map(|i| rows.column_name(i).unwrap_or_default().to_string())
                .collect();

            let mut result = Vec::new();
            while let Some(row) = rows.next().await.map_err(statement_error)? {
                abandoned.check()?;
                let mut out = Row::with_capacity(names.len());
                for (idx, name) in names.iter().enumerate() {
                    let value = row.get_value(idx as i32).map_err(statement_error)?;
                    out.push(name.clone(), normalizer::from_libsql(value));
                }
                result.push(out);
            }
            Ok(ResultSet::new(result))
        })
        .await
    }

    async fn execute(
        &self,
        target: &str,
        statement: &str,
        params: &[CanonicalValue],
    ) -> GatewayResult<u64> {
        ensure_parameter_count(Dialect::Sqlite, statement, params.len())?;
        debug!(target, statement, "local-sql execute");

        let statement = statement.to_string();
        let params = params.to_vec();
        self.run(target, move |session, abandoned| async move {
            if !is_data_change(&statement) {
                return session
                    .conn
                    .execute(&statement, bind(&params))
                    .await
                    .map_err(statement_error);
            }

            let tx = session.conn.transaction().await.map_err(statement_error)?;
            let affected = tx
                .execute(&statement, bind(&params))
                .await
                .map_err(statement_error)?;
            if let Err(err) = abandoned.check() {
                tx.rollback().await.map_err(statement_error)?;
                return Err(err);
            }
            tx.commit().await.map_err(statement_error)?;
            Ok(affected)
        })
        .await
    }

    async fn alter(&self, target: &str, statement: &str) -> GatewayResult<()> {
        debug!(target, statement, "local-sql alter");

        let statement = statement.to_string();
        self.run(target, move |session, _| async move {
            session
                .conn
                .execute_batch(&statement)
                .await
                .map(|_| ())
                .map_err(statement_error)
        })
        .await
    }
}

/// INSERT, UPDATE, DELETE and REPLACE run inside a transaction so an
/// abandoned one can be rolled back
fn is_data_change(statement: &str) -> bool {
    let keyword: String = statement
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    matches!(
        keyword.to_ascii_uppercase().as_str(),
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE"
    )
}

/// Convert canonical parameters into positional libsql parameters
fn bind(params: &[CanonicalValue]) -> Params {
    if params.is_empty() {
        return Params::None;
    }
    Params::Positional(
        params
            .iter()
            .map(|value| match value {
                CanonicalValue::Null => libsql::Value::Null,
                CanonicalValue::Integer(i) => libsql::Value::Integer(*i),
                CanonicalValue::Float(f) => libsql::Value::Real(*f),
                CanonicalValue::Text(s) => libsql::Value::Text(s.clone()),
                CanonicalValue::Blob(b) => libsql::Value::Blob(b.clone()),
                CanonicalValue::Timestamp(at) => {
                    libsql::Value::Text(at.format(TIMESTAMP_FORMAT).to_string())
                }
            })
            .collect(),
    )
}

fn statement_error(err: libsql::Error) -> GatewayError {
    match &err {
        libsql::Error::SqliteFailure(code, message)
            if SQLITE_UNAVAILABLE_CODES.contains(&(code & 0xff)) =>
        {
            GatewayError::engine_unavailable(format!("local database unavailable: {}", message))
        }
        libsql::Error::SqliteFailure(_, message) => GatewayError::statement_failed(message.clone()),
        _ => GatewayError::statement_failed(err.to_string()),
    }
}
