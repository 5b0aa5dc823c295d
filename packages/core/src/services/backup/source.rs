//! Snapshot sources for exports
//!
//! A [`SnapshotSource`] reads one database through a single connection inside
//! one read-only snapshot, so every table in an export reflects the same
//! instant.

use crate::config::NetworkSqlConfig;
use crate::db::network_sql::{self, normalize_row};
use crate::services::backup::script::{quote_identifier, TableRows};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use tracing::debug;

/// A table discovered at job start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    /// Whether the table's storage engine honors the snapshot
    pub transactional: bool,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, transactional: bool) -> Self {
        Self {
            name: name.into(),
            transactional,
        }
    }
}

/// Consistent read view over one database
#[async_trait]
pub trait SnapshotSource: Send {
    /// Open the snapshot and list base tables in name order
    async fn begin(&mut self) -> Result<Vec<TableInfo>>;

    /// Statement that recreates `table`
    async fn table_structure(&mut self, table: &str) -> Result<String>;

    /// Stream every row of `table` into `rows`
    async fn dump_rows(&mut self, table: &str, rows: &mut TableRows<'_>) -> Result<()>;

    /// End the snapshot
    async fn finish(&mut self) -> Result<()>;
}

/// Snapshot over a MySQL database
///
/// Uses `START TRANSACTION WITH CONSISTENT SNAPSHOT, READ ONLY` at
/// `REPEATABLE READ`. Only InnoDB tables are covered by the snapshot.
pub struct MysqlSnapshotSource {
    conn: Option<Conn>,
}

impl MysqlSnapshotSource {
    pub async fn connect(config: &NetworkSqlConfig, database: &str) -> Result<Self> {
        let conn = network_sql::connect(config, database).await?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| anyhow!("snapshot connection already closed"))
    }
}

#[async_trait]
impl SnapshotSource for MysqlSnapshotSource {
    async fn begin(&mut self) -> Result<Vec<TableInfo>> {
        let conn = self.conn()?;
        conn.query_drop("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .await
            .context("failed to set isolation level")?;
        conn.query_drop("START TRANSACTION WITH CONSISTENT SNAPSHOT, READ ONLY")
            .await
            .context("failed to start snapshot transaction")?;

        let tables: Vec<(String, Option<String>)> = conn
            .query(
                "SELECT TABLE_NAME, ENGINE FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME",
            )
            .await
            .context("failed to list tables")?;

        Ok(tables
            .into_iter()
            .map(|(name, engine)| {
                let transactional = engine
                    .as_deref()
                    .map_or(false, |e| e.eq_ignore_ascii_case("InnoDB"));
                TableInfo::new(name, transactional)
            })
            .collect())
    }

    async fn table_structure(&mut self, table: &str) -> Result<String> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_first(format!("SHOW CREATE TABLE {}", quote_identifier(table)))
            .await
            .with_context(|| format!("failed to read structure of {}", table))?;
        row.map(|(_, create)| create)
            .ok_or_else(|| anyhow!("no structure returned for table {}", table))
    }

    async fn dump_rows(&mut self, table: &str, rows: &mut TableRows<'_>) -> Result<()> {
        let conn = self.conn()?;

        // Generated columns are recomputed on replay and reject explicit values
        let columns: Vec<String> = conn
            .exec(
                "SELECT COLUMN_NAME FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 AND EXTRA NOT LIKE '%VIRTUAL GENERATED%' \
                 AND EXTRA NOT LIKE '%STORED GENERATED%' \
                 ORDER BY ORDINAL_POSITION",
                (table,),
            )
            .await
            .with_context(|| format!("failed to list columns of {}", table))?;
        if columns.is_empty() {
            return Err(anyhow!("table {} has no writable columns", table));
        }

        let select_list: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
        let mut result = conn
            .query_iter(format!(
                "SELECT {} FROM {}",
                select_list.join(", "),
                quote_identifier(table)
            ))
            .await
            .with_context(|| format!("failed to read rows of {}", table))?;
        rows.set_columns(columns);

        while let Some(row) = result.next().await? {
            rows.push(&normalize_row(row).into_values()).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            conn.query_drop("COMMIT").await.context("failed to end snapshot")?;
            conn.disconnect().await?;
            debug!("Snapshot connection closed");
        }
        Ok(())
    }
}
