//! Placeholder Counting
//!
//! SQL adapters reject a parameter list whose length differs from the number
//! of placeholders in the statement before the driver ever sees it. The
//! scanner skips string literals, quoted identifiers and comments so a `?`
//! inside `'what?'` or `-- why?` is not counted.
//!
//! SQLite numbering rules apply to the local dialect: `?NNN` binds index NNN,
//! a bare `?` binds one past the highest index so far, and each distinct
//! `:name`, `@name` or `$name` takes the next free index. MySQL only knows `?`.

use crate::db::{GatewayError, GatewayResult};
use std::collections::HashSet;

/// SQL dialect, which decides quoting and placeholder syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Mysql,
}

/// Count the parameters a statement expects
pub fn count_placeholders(dialect: Dialect, sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut highest = 0usize;
    let mut named: HashSet<&str> = HashSet::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\'' => i = skip_quoted(bytes, i, b'\'', dialect == Dialect::Mysql),
            b'"' => i = skip_quoted(bytes, i, b'"', dialect == Dialect::Mysql),
            b'`' => i = skip_quoted(bytes, i, b'`', false),
            b'[' if dialect == Dialect::Sqlite => {
                i = match bytes[i + 1..].iter().position(|&b| b == b']') {
                    Some(offset) => i + offset + 2,
                    None => bytes.len(),
                };
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line(bytes, i),
            b'#' if dialect == Dialect::Mysql => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = match find(bytes, i + 2, b"*/") {
                    Some(end) => end + 2,
                    None => bytes.len(),
                };
            }
            b'?' => {
                let start = i + 1;
                let mut end = start;
                if dialect == Dialect::Sqlite {
                    while end < bytes.len() && bytes[end].is_ascii_digit() {
                        end += 1;
                    }
                }
                if end > start {
                    let index = sql[start..end].parse::<usize>().unwrap_or(0);
                    highest = highest.max(index);
                } else {
                    highest += 1;
                }
                i = end;
            }
            b':' | b'@' | b'$' if dialect == Dialect::Sqlite => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                if end > start && named.insert(&sql[i..end]) {
                    highest += 1;
                }
                i = end.max(i + 1);
            }
            _ => i += 1,
        }
    }

    highest
}

/// Fail with `BadRequest` unless `supplied` matches the statement's placeholders
pub fn ensure_parameter_count(dialect: Dialect, sql: &str, supplied: usize) -> GatewayResult<()> {
    let expected = count_placeholders(dialect, sql);
    if expected != supplied {
        return Err(GatewayError::bad_request(format!(
            "statement expects {} parameter(s) but {} were supplied",
            expected, supplied
        )));
    }
    Ok(())
}

/// Index just past the closing quote; doubled quotes stay inside the literal
fn skip_quoted(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        let c = bytes[i];
        if backslash_escapes && c == b'\\' {
            i += 2;
            continue;
        }
        if c == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line(bytes: &[u8], from: usize) -> usize {
    match bytes[from..].iter().position(|&b| b == b'\n') {
        Some(offset) => from + offset + 1,
        None => bytes.len(),
    }
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|offset| from + offset)
}
