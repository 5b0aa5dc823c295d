//! Backup/Export Pipeline
//!
//! Produces a portable SQL script that rebuilds the schema and data of the
//! networked database, on a fixed schedule and independent of request
//! traffic.
//!
//! # Job Algorithm
//!
//! 1. Open one connection and start a read-only consistent snapshot
//! 2. List base tables in name order
//! 3. For each table, write `DROP TABLE IF EXISTS`, its structure, and its
//!    rows as a single multi-row insert
//! 4. Write to `<database>_<YYYY-MM-DD>.sql.partial`, flush, fsync, then
//!    rename over `<database>_<YYYY-MM-DD>.sql`
//!
//! Same-day runs overwrite the day's file. A failed job removes its partial
//! file and leaves the previous complete file untouched.
//!
//! # Consistency
//!
//! The snapshot covers transactional (InnoDB) tables only. Tables on other
//! engines are still exported but may reflect a different instant; they are
//! listed in the script header and logged as warnings.

mod scheduler;
pub mod script;
mod source;

pub use scheduler::BackupScheduler;
pub use source::{MysqlSnapshotSource, SnapshotSource, TableInfo};

use crate::config::{BackupConfig, NetworkSqlConfig};
use crate::models::time::TimeProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use script::{render_header, render_structure, ScriptWriter, FOOTER};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Result of one successful export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub tables: usize,
    pub rows: u64,
    /// Tables exported outside the snapshot
    pub unsnapshotted: Vec<String>,
}

/// Unit of work the scheduler runs on every tick
#[async_trait]
pub trait ExportJob: Send + Sync {
    async fn run(&self) -> Result<ExportSummary>;
}

/// Export of the configured networked database
pub struct BackupJob {
    backup: BackupConfig,
    network: NetworkSqlConfig,
    clock: Arc<dyn TimeProvider>,
}

impl BackupJob {
    pub fn new(backup: BackupConfig, network: NetworkSqlConfig, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            backup,
            network,
            clock,
        }
    }
}

#[async_trait]
impl ExportJob for BackupJob {
    async fn run(&self) -> Result<ExportSummary> {
        let mut source = MysqlSnapshotSource::connect(&self.network, &self.backup.database).await?;
        export(
            &mut source,
            &self.backup.database,
            &self.backup.output_dir,
            self.clock.as_ref(),
        )
        .await
    }
}

/// Path of the export file for `database` on `date`
pub fn export_path(output_dir: &Path, database: &str, date: &str) -> PathBuf {
    output_dir.join(format!("{}_{}.sql", database, date))
}

/// Run one export job from `source` into `output_dir`
#[instrument(skip_all, fields(job_id = %Uuid::new_v4(), database = %database))]
pub async fn export(
    source: &mut dyn SnapshotSource,
    database: &str,
    output_dir: &Path,
    clock: &dyn TimeProvider,
) -> Result<ExportSummary> {
    let date = clock.today_stamp();
    let path = export_path(output_dir, database, &date);
    let partial = path.with_extension("sql.partial");

    info!("💾 Starting export of '{}' to {}", database, path.display());

    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    match write_script(source, database, &date, &partial).await {
        Ok((tables, rows, unsnapshotted)) => {
            tokio::fs::rename(&partial, &path)
                .await
                .with_context(|| format!("failed to move export into {}", path.display()))?;
            info!(
                "✅ Export of '{}' written to {} ({} tables, {} rows)",
                database,
                path.display(),
                tables,
                rows
            );
            Ok(ExportSummary {
                path,
                tables,
                rows,
                unsnapshotted,
            })
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e.context(format!("export of '{}' failed", database)))
        }
    }
}

async fn write_script(
    source: &mut dyn SnapshotSource,
    database: &str,
    date: &str,
    partial: &Path,
) -> Result<(usize, u64, Vec<String>)> {
    let tables = source.begin().await?;
    let unsnapshotted: Vec<String> = tables
        .iter()
        .filter(|t| !t.transactional)
        .map(|t| t.name.clone())
        .collect();
    if !unsnapshotted.is_empty() {
        warn!(
            "⚠️ Tables outside the snapshot (non-transactional engine): {}",
            unsnapshotted.join(", ")
        );
    }

    let mut writer = ScriptWriter::create(partial).await?;
    writer
        .write(&render_header(database, date, &unsnapshotted))
        .await?;

    let mut total_rows = 0;
    for table in &tables {
        let structure = source.table_structure(&table.name).await?;
        writer.write(&render_structure(&table.name, &structure)).await?;

        let mut rows = writer.rows(&table.name);
        source.dump_rows(&table.name, &mut rows).await?;
        let count = rows.finish().await?;
        total_rows += count;
        debug!("Exported table {} ({} rows)", table.name, count);
    }

    writer.write(FOOTER).await?;
    writer.finish().await?;
    source.finish().await?;

    Ok((tables.len(), total_rows, unsnapshotted))
}
