//! Result Normalizer
//!
//! Pure conversions from native column values into [`CanonicalValue`]. Both
//! SQL adapters and the backup pipeline go through here so numeric, textual,
//! null and binary handling is identical everywhere.
//!
//! The MySQL text protocol delivers every non-null value as bytes, so the
//! column metadata decides the variant: integer columns parse to `Integer`,
//! floating columns to `Float`, date-time columns to `Timestamp`, and string
//! columns split on the binary character set into `Blob` or `Text`. DECIMAL
//! stays `Text` to keep it exact.

use crate::models::CanonicalValue;
use chrono::{NaiveDate, NaiveDateTime};
use mysql_async::consts::ColumnType;

/// MySQL character set number of the `binary` collation
pub const MYSQL_BINARY_CHARSET: u16 = 63;

/// The parts of a MySQL column definition the normalizer looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MysqlColumnInfo {
    pub column_type: ColumnType,
    /// Column uses the `binary` character set (BLOB, BINARY, VARBINARY)
    pub binary: bool,
}

impl MysqlColumnInfo {
    pub fn new(column_type: ColumnType, binary: bool) -> Self {
        Self {
            column_type,
            binary,
        }
    }

    pub fn from_column(column: &mysql_async::Column) -> Self {
        Self {
            column_type: column.column_type(),
            binary: column.character_set() == MYSQL_BINARY_CHARSET,
        }
    }
}

/// Normalize a local engine value; the engine's own storage classes map 1:1
pub fn from_libsql(value: libsql::Value) -> CanonicalValue {
    match value {
        libsql::Value::Null => CanonicalValue::Null,
        libsql::Value::Integer(i) => CanonicalValue::Integer(i),
        libsql::Value::Real(f) => CanonicalValue::Float(f),
        libsql::Value::Text(s) => CanonicalValue::Text(s),
        libsql::Value::Blob(b) => CanonicalValue::Blob(b),
    }
}

/// Normalize a networked engine value using its column metadata
pub fn from_mysql(column: &MysqlColumnInfo, value: mysql_async::Value) -> CanonicalValue {
    use mysql_async::Value;
    match value {
        Value::NULL => CanonicalValue::Null,
        Value::Int(i) => CanonicalValue::Integer(i),
        Value::UInt(u) => match i64::try_from(u) {
            Ok(i) => CanonicalValue::Integer(i),
            Err(_) => CanonicalValue::Text(u.to_string()),
        },
        // Round-trip through the shortest decimal form so 0.1f32 stays 0.1
        Value::Float(f) => CanonicalValue::Float(f.to_string().parse().unwrap_or(f as f64)),
        Value::Double(d) => CanonicalValue::Float(d),
        Value::Date(year, month, day, hour, minute, second, _micros) => {
            civil(year, month, day, hour, minute, second)
                .map(CanonicalValue::Timestamp)
                .unwrap_or_else(|| {
                    CanonicalValue::Text(format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        year, month, day, hour, minute, second
                    ))
                })
        }
        Value::Time(negative, days, hours, minutes, seconds, _micros) => {
            let total_hours = u64::from(days) * 24 + u64::from(hours);
            CanonicalValue::Text(format!(
                "{}{:02}:{:02}:{:02}",
                if negative { "-" } else { "" },
                total_hours,
                minutes,
                seconds
            ))
        }
        Value::Bytes(bytes) => from_mysql_bytes(column, bytes),
    }
}

fn from_mysql_bytes(column: &MysqlColumnInfo, bytes: Vec<u8>) -> CanonicalValue {
    match column.column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_YEAR => {
            let parsed = std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok());
            match parsed {
                Some(i) => CanonicalValue::Integer(i),
                None => text_or_blob(bytes),
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            let parsed = std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok());
            match parsed {
                Some(f) => CanonicalValue::Float(f),
                None => text_or_blob(bytes),
            }
        }
        ColumnType::MYSQL_TYPE_DATE
        | ColumnType::MYSQL_TYPE_NEWDATE
        | ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            match std::str::from_utf8(&bytes).ok().and_then(parse_civil) {
                Some(at) => CanonicalValue::timestamp(at),
                None => text_or_blob(bytes),
            }
        }
        // The server tags these with the binary charset, yet they are textual
        ColumnType::MYSQL_TYPE_DECIMAL
        | ColumnType::MYSQL_TYPE_NEWDECIMAL
        | ColumnType::MYSQL_TYPE_TIME
        | ColumnType::MYSQL_TYPE_TIME2
        | ColumnType::MYSQL_TYPE_JSON => text_or_blob(bytes),
        ColumnType::MYSQL_TYPE_BIT | ColumnType::MYSQL_TYPE_GEOMETRY => {
            CanonicalValue::Blob(bytes)
        }
        _ if column.binary => CanonicalValue::Blob(bytes),
        _ => text_or_blob(bytes),
    }
}

/// Valid UTF-8 is text; anything else keeps its bytes
fn text_or_blob(bytes: Vec<u8>) -> CanonicalValue {
    match String::from_utf8(bytes) {
        Ok(s) => CanonicalValue::Text(s),
        Err(e) => CanonicalValue::Blob(e.into_bytes()),
    }
}

fn civil(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))?.and_hms_opt(
        u32::from(hour),
        u32::from(minute),
        u32::from(second),
    )
}

fn parse_civil(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(at) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(at);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysql_async::Value;

    /// Non-string columns arrive with the binary charset, as a real server sends them
    fn col(column_type: ColumnType) -> MysqlColumnInfo {
        MysqlColumnInfo::new(column_type, true)
    }

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> CanonicalValue {
        CanonicalValue::Timestamp(
            NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(h, mi, s)
                .unwrap(),
        )
    }

    #[test]
    fn test_libsql_storage_classes() {
        assert_eq!(from_libsql(libsql::Value::Null), CanonicalValue::Null);
        assert_eq!(
            from_libsql(libsql::Value::Integer(7)),
            CanonicalValue::Integer(7)
        );
        assert_eq!(
            from_libsql(libsql::Value::Real(1.5)),
            CanonicalValue::Float(1.5)
        );
        assert_eq!(
            from_libsql(libsql::Value::Text("a".into())),
            CanonicalValue::Text("a".into())
        );
        assert_eq!(
            from_libsql(libsql::Value::Blob(vec![0, 159])),
            CanonicalValue::Blob(vec![0, 159])
        );
    }

    #[test]
    fn test_mysql_text_protocol_numbers() {
        assert_eq!(
            from_mysql(&col(ColumnType::MYSQL_TYPE_LONG), Value::Bytes(b"-42".to_vec())),
            CanonicalValue::Integer(-42)
        );
        assert_eq!(
            from_mysql(&col(ColumnType::MYSQL_TYPE_DOUBLE), Value::Bytes(b"2.25".to_vec())),
            CanonicalValue::Float(2.25)
        );
        assert_eq!(
            from_mysql(
                &col(ColumnType::MYSQL_TYPE_NEWDECIMAL),
                Value::Bytes(b"10.10".to_vec())
            ),
            CanonicalValue::Text("10.10".into())
        );
    }

    #[test]
    fn test_mysql_binary_charset_textual_types() {
        assert_eq!(
            from_mysql(
                &col(ColumnType::MYSQL_TYPE_DECIMAL),
                Value::Bytes(b"-0.5".to_vec())
            ),
            CanonicalValue::Text("-0.5".into())
        );
        assert_eq!(
            from_mysql(&col(ColumnType::MYSQL_TYPE_TIME), Value::Bytes(b"12:30:00".to_vec())),
            CanonicalValue::Text("12:30:00".into())
        );
        assert_eq!(
            from_mysql(
                &col(ColumnType::MYSQL_TYPE_TIME2),
                Value::Bytes(b"-838:59:59".to_vec())
            ),
            CanonicalValue::Text("-838:59:59".into())
        );
        assert_eq!(
            from_mysql(
                &col(ColumnType::MYSQL_TYPE_JSON),
                Value::Bytes(br#"{"a":1}"#.to_vec())
            ),
            CanonicalValue::Text(r#"{"a":1}"#.into())
        );
    }

    #[test]
    fn test_mysql_unsigned_overflow_stays_exact() {
        assert_eq!(
            from_mysql(&col(ColumnType::MYSQL_TYPE_LONGLONG), Value::UInt(u64::MAX)),
            CanonicalValue::Text(u64::MAX.to_string())
        );
        assert_eq!(
            from_mysql(
                &col(ColumnType::MYSQL_TYPE_LONGLONG),
                Value::Bytes(u64::MAX.to_string().into_bytes())
            ),
            CanonicalValue::Text(u64::MAX.to_string())
        );
    }

    #[test]
    fn test_mysql_binary_vs_text_strings() {
        let blob_col = MysqlColumnInfo::new(ColumnType::MYSQL_TYPE_BLOB, true);
        let text_col = MysqlColumnInfo::new(ColumnType::MYSQL_TYPE_BLOB, false);

        assert_eq!(
            from_mysql(&blob_col, Value::Bytes(b"abc".to_vec())),
            CanonicalValue::Blob(b"abc".to_vec())
        );
        assert_eq!(
            from_mysql(&text_col, Value::Bytes(b"abc".to_vec())),
            CanonicalValue::Text("abc".into())
        );
        // invalid UTF-8 in a text column still keeps its bytes
        assert_eq!(
            from_mysql(&text_col, Value::Bytes(vec![0xff, 0xfe])),
            CanonicalValue::Blob(vec![0xff, 0xfe])
        );
    }

    #[test]
    fn test_mysql_datetimes() {
        assert_eq!(
            from_mysql(
                &col(ColumnType::MYSQL_TYPE_DATETIME),
                Value::Bytes(b"2024-02-29 13:14:15.123456".to_vec())
            ),
            ts(2024, 2, 29, 13, 14, 15)
        );
        assert_eq!(
            from_mysql(
                &col(ColumnType::MYSQL_TYPE_DATE),
                Value::Bytes(b"2024-02-29".to_vec())
            ),
            ts(2024, 2, 29, 0, 0, 0)
        );
        assert_eq!(
            from_mysql(
                &col(ColumnType::MYSQL_TYPE_DATETIME),
                Value::Date(2023, 1, 2, 3, 4, 5, 999)
            ),
            ts(2023, 1, 2, 3, 4, 5)
        );
    }

    #[test]
    fn test_mysql_zero_date_is_text() {
        assert_eq!(
            from_mysql(
                &col(ColumnType::MYSQL_TYPE_DATETIME),
                Value::Date(0, 0, 0, 0, 0, 0, 0)
            ),
            CanonicalValue::Text("0000-00-00 00:00:00".into())
        );
    }

    #[test]
    fn test_mysql_time_and_float() {
        assert_eq!(
            from_mysql(
                &col(ColumnType::MYSQL_TYPE_TIME),
                Value::Time(true, 1, 2, 3, 4, 0)
            ),
            CanonicalValue::Text("-26:03:04".into())
        );
        assert_eq!(
            from_mysql(&col(ColumnType::MYSQL_TYPE_FLOAT), Value::Float(0.1)),
            CanonicalValue::Float(0.1)
        );
        assert_eq!(
            from_mysql(&col(ColumnType::MYSQL_TYPE_NULL), Value::NULL),
            CanonicalValue::Null
        );
    }
}
