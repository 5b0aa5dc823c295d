//! SQL script rendering for exports
//!
//! Produces a MySQL-compatible script: header, `CREATE DATABASE IF NOT
//! EXISTS`/`USE` preamble, then per table `DROP TABLE IF EXISTS`, the
//! structure statement and one multi-row `INSERT INTO` block.

use crate::models::{CanonicalValue, TIMESTAMP_FORMAT};
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Quote an identifier with backticks, doubling embedded backticks
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a string literal with MySQL escaping
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Render one value as an SQL literal
///
/// Blobs that are valid UTF-8 are quoted like text; anything else becomes a
/// hex literal so the script itself stays valid UTF-8.
pub fn render_literal(value: &CanonicalValue) -> String {
    match value {
        CanonicalValue::Null => "NULL".to_string(),
        CanonicalValue::Integer(i) => i.to_string(),
        CanonicalValue::Float(f) if f.is_finite() => f.to_string(),
        CanonicalValue::Float(_) => "NULL".to_string(),
        CanonicalValue::Text(s) => quote_string(s),
        CanonicalValue::Blob(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => quote_string(s),
            Err(_) => {
                let mut out = String::with_capacity(bytes.len() * 2 + 3);
                out.push_str("X'");
                for b in bytes {
                    let _ = write!(out, "{:02X}", b);
                }
                out.push('\'');
                out
            }
        },
        CanonicalValue::Timestamp(at) => format!("'{}'", at.format(TIMESTAMP_FORMAT)),
    }
}

/// Render a row as `(v1,v2,...)`
pub fn render_tuple(values: &[CanonicalValue]) -> String {
    let mut out = String::from("(");
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(&render_literal(value));
    }
    out.push(')');
    out
}

/// Header and preamble of an export script
pub fn render_header(database: &str, date: &str, unsnapshotted: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "-- Backup of {}", database);
    let _ = writeln!(out, "-- Date: {}", date);
    if !unsnapshotted.is_empty() {
        let _ = writeln!(
            out,
            "-- Not covered by the snapshot (non-transactional engine): {}",
            unsnapshotted.join(", ")
        );
    }
    out.push('\n');
    let _ = writeln!(out, "CREATE DATABASE IF NOT EXISTS {};", quote_identifier(database));
    let _ = writeln!(out, "USE {};", quote_identifier(database));
    out.push('\n');
    out.push_str("SET FOREIGN_KEY_CHECKS=0;\n");
    out
}

/// Drop and create statements for one table
pub fn render_structure(table: &str, create_statement: &str) -> String {
    let create = create_statement.trim_end().trim_end_matches(';');
    format!(
        "\n-- Structure of table: {table}\nDROP TABLE IF EXISTS {ident};\n{create};\n",
        table = table,
        ident = quote_identifier(table),
        create = create
    )
}

pub const FOOTER: &str = "\nSET FOREIGN_KEY_CHECKS=1;\n";

/// Buffered writer for one script file
pub struct ScriptWriter {
    out: BufWriter<File>,
}

impl ScriptWriter {
    pub async fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub async fn write(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        Ok(())
    }

    /// Start the insert block for `table`
    pub fn rows<'a>(&'a mut self, table: &'a str) -> TableRows<'a> {
        TableRows {
            writer: self,
            table,
            columns: Vec::new(),
            count: 0,
        }
    }

    /// Flush and fsync; the file is complete afterwards
    pub async fn finish(mut self) -> Result<()> {
        self.out.flush().await?;
        self.out.get_mut().sync_all().await?;
        Ok(())
    }
}

/// Receives the rows of one table and writes a single multi-row insert
pub struct TableRows<'a> {
    writer: &'a mut ScriptWriter,
    table: &'a str,
    /// Explicit insert column list; empty means every column in table order
    columns: Vec<String>,
    count: u64,
}

impl TableRows<'_> {
    /// Name the columns the pushed values belong to
    ///
    /// Required when the table has columns that cannot be written, such as
    /// generated ones. Must be called before the first row.
    pub fn set_columns(&mut self, columns: Vec<String>) {
        self.columns = columns;
    }

    pub async fn push(&mut self, values: &[CanonicalValue]) -> Result<()> {
        if self.count == 0 {
            let column_list = if self.columns.is_empty() {
                String::new()
            } else {
                let quoted: Vec<String> =
                    self.columns.iter().map(|c| quote_identifier(c)).collect();
                format!(" ({})", quoted.join(","))
            };
            let opening = format!(
                "\n-- Data of table: {}\nINSERT INTO {}{} VALUES\n",
                self.table,
                quote_identifier(self.table),
                column_list
            );
            self.writer.write(&opening).await?;
        } else {
            self.writer.write(",\n").await?;
        }
        self.writer.write(&render_tuple(values)).await?;
        self.count += 1;
        Ok(())
    }

    /// Terminate the insert block; returns the number of rows written
    pub async fn finish(self) -> Result<u64> {
        if self.count > 0 {
            self.writer.write(";\n").await?;
        }
        Ok(self.count)
    }
}
