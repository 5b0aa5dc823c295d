//! NetworkSqlAdapter - SqlAdapter Implementation for the Networked SQL Engine
//!
//! Speaks the MySQL protocol through `mysql_async`. Every call opens a private
//! connection with the target as its default schema, runs one statement and
//! disconnects, so no call can see another call's session state.
//!
//! Unparameterized statements go over the text protocol; parameterized ones
//! are prepared and bound positionally over the binary protocol. Both paths
//! end up in the shared normalizer.

use crate::config::NetworkSqlConfig;
use crate::db::normalizer::{self, MysqlColumnInfo};
use crate::db::placeholders::{ensure_parameter_count, Dialect};
use crate::db::sql_adapter::{with_deadline, SqlAdapter};
use crate::db::{GatewayError, GatewayResult};
use crate::models::{validate_identifier, CanonicalValue, Engine, ResultSet, Row};
use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Params};
use tracing::{debug, warn};

/// Open a connection to `database` on the configured server
///
/// Shared with the backup pipeline, which needs one long-lived connection
/// for its snapshot instead of one per statement.
pub async fn connect(config: &NetworkSqlConfig, database: &str) -> GatewayResult<Conn> {
    validate_identifier(database)?;

    let opts = OptsBuilder::default()
        .ip_or_hostname(config.host.clone())
        .tcp_port(config.port)
        .user(Some(config.user.clone()))
        .pass(Some(config.password.clone()))
        .db_name(Some(database.to_string()));

    match tokio::time::timeout(config.connect_timeout(), Conn::new(opts)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(GatewayError::engine_unavailable(format!(
            "failed to connect to networked database '{}': {}",
            database, e
        ))),
        Err(_) => Err(GatewayError::engine_unavailable(format!(
            "timed out connecting to networked database '{}' after {} ms",
            database, config.connect_timeout_ms
        ))),
    }
}

/// Adapter for databases on a MySQL-compatible server
#[derive(Debug, Clone)]
pub struct NetworkSqlAdapter {
    config: NetworkSqlConfig,
}

impl NetworkSqlAdapter {
    pub fn new(config: NetworkSqlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NetworkSqlConfig {
        &self.config
    }
}

#[async_trait]
impl SqlAdapter for NetworkSqlAdapter {
    fn engine(&self) -> Engine {
        Engine::NetworkSql
    }

    async fn query(
        &self,
        target: &str,
        statement: &str,
        params: &[CanonicalValue],
    ) -> GatewayResult<ResultSet> {
        ensure_parameter_count(Dialect::Mysql, statement, params.len())?;
        debug!(target, statement, "network-sql query");

        with_deadline(self.config.statement_timeout(), async {
            let mut conn = connect(&self.config, target).await?;
            let result = if params.is_empty() {
                conn.query::<mysql_async::Row, _>(statement).await
            } else {
                conn.exec::<mysql_async::Row, _, _>(statement, bind(params))
                    .await
            };
            close(conn).await;

            let rows = result.map_err(statement_error)?;
            Ok(ResultSet::new(rows.into_iter().map(normalize_row).collect()))
        })
        .await
    }

    async fn execute(
        &self,
        target: &str,
        statement: &str,
        params: &[CanonicalValue],
    ) -> GatewayResult<u64> {
        ensure_parameter_count(Dialect::Mysql, statement, params.len())?;
        debug!(target, statement, "network-sql execute");

        with_deadline(self.config.statement_timeout(), async {
            let mut conn = connect(&self.config, target).await?;
            let result = if params.is_empty() {
                conn.query_drop(statement).await
            } else {
                conn.exec_drop(statement, bind(params)).await
            };
            let affected = conn.affected_rows();
            close(conn).await;

            result.map_err(statement_error)?;
            Ok(affected)
        })
        .await
    }

    async fn alter(&self, target: &str, statement: &str) -> GatewayResult<()> {
        debug!(target, statement, "network-sql alter");

        with_deadline(self.config.statement_timeout(), async {
            let mut conn = connect(&self.config, target).await?;
            let result = conn.query_drop(statement).await;
            close(conn).await;
            result.map_err(statement_error)
        })
        .await
    }
}

async fn close(conn: Conn) {
    if let Err(e) = conn.disconnect().await {
        warn!("⚠️ Failed to close networked database connection cleanly: {}", e);
    }
}

/// Convert one driver row, keeping engine column order
pub(crate) fn normalize_row(mut row: mysql_async::Row) -> Row {
    let columns = row.columns();
    let mut out = Row::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        let value = row
            .take::<mysql_async::Value, _>(idx)
            .unwrap_or(mysql_async::Value::NULL);
        out.push(
            column.name_str().into_owned(),
            normalizer::from_mysql(&MysqlColumnInfo::from_column(column), value),
        );
    }
    out
}

fn bind(params: &[CanonicalValue]) -> Params {
    use mysql_async::Value;
    Params::Positional(
        params
            .iter()
            .map(|value| match value {
                CanonicalValue::Null => Value::NULL,
                CanonicalValue::Integer(i) => Value::Int(*i),
                CanonicalValue::Float(f) => Value::Double(*f),
                CanonicalValue::Text(s) => Value::Bytes(s.clone().into_bytes()),
                CanonicalValue::Blob(b) => Value::Bytes(b.clone()),
                CanonicalValue::Timestamp(at) => Value::Date(
                    u16::try_from(at.year()).unwrap_or(0),
                    at.month() as u8,
                    at.day() as u8,
                    at.hour() as u8,
                    at.minute() as u8,
                    at.second() as u8,
                    0,
                ),
            })
            .collect(),
    )
}

/// Map an error raised after the connection was established
fn statement_error(err: mysql_async::Error) -> GatewayError {
    match err {
        mysql_async::Error::Server(e) => {
            GatewayError::statement_failed(format!("{} (error {})", e.message, e.code))
        }
        mysql_async::Error::Io(e) => {
            GatewayError::engine_unavailable(format!("networked database connection lost: {}", e))
        }
        other => GatewayError::statement_failed(other.to_string()),
    }
}
