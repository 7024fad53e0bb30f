use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use shiftdb_common::{Error, Result};

/// The closed set of value kinds a model field can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Integer,
    Real,
    Text,
    Boolean,
    Timestamp,
    Blob,
}

impl ValueKind {
    /// Column type used when creating a table for this kind.
    /// Booleans are stored as 0/1 integers and timestamps as RFC 3339 text.
    pub fn sql_type(self) -> &'static str {
        match self {
            ValueKind::Integer | ValueKind::Boolean => "INTEGER",
            ValueKind::Real => "REAL",
            ValueKind::Text | ValueKind::Timestamp => "TEXT",
            ValueKind::Blob => "BLOB",
        }
    }

    /// The value a required field holds when nothing was assigned to it.
    pub fn zero(self) -> Value {
        match self {
            ValueKind::Integer => Value::Integer(0),
            ValueKind::Real => Value::Real(0.0),
            ValueKind::Text => Value::Text(String::new()),
            ValueKind::Boolean => Value::Boolean(false),
            ValueKind::Timestamp => Value::Timestamp(DateTime::<Utc>::UNIX_EPOCH),
            ValueKind::Blob => Value::Blob(Vec::new()),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Integer => "integer",
            ValueKind::Real => "real",
            ValueKind::Text => "text",
            ValueKind::Boolean => "boolean",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// A single column value, either read from a stored row or produced by a
/// migrator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Blob(Vec<u8>),
}

impl Value {
    /// `None` for `Null`.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ValueKind::Integer),
            Value::Real(_) => Some(ValueKind::Real),
            Value::Text(_) => Some(ValueKind::Text),
            Value::Boolean(_) => Some(ValueKind::Boolean),
            Value::Timestamp(_) => Some(ValueKind::Timestamp),
            Value::Blob(_) => Some(ValueKind::Blob),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Human readable rendering used when folding values into text.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => r.to_string(),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::Timestamp(ts) => format_timestamp(ts),
            Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

/// Fails on text that is not valid UTF-8 rather than replacing bytes.
impl TryFrom<ValueRef<'_>> for Value {
    type Error = Error;

    fn try_from(value: ValueRef<'_>) -> Result<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(s) => Value::Text(s.to_string()),
                Err(e) => {
                    return Err(Error::Coercion(format!(
                        "stored text is not valid UTF-8: {e}"
                    )));
                }
            },
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Boolean(b) => ToSqlOutput::from(i64::from(*b)),
            Value::Timestamp(ts) => ToSqlOutput::from(format_timestamp(ts)),
            Value::Blob(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Accepts RFC 3339 as well as SQLite's `datetime('now')` layout.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .map(|naive| naive.and_utc())
                .ok()
        })
}

/// Convert `value` to `kind`.
///
/// `Null` converts to `Null` for every kind; whether a null is acceptable is
/// the caller's decision. Every other pair either converts or fails with
/// [`Error::Coercion`]:
///
/// - anything converts to text, blobs only when they hold UTF-8;
/// - text converts to integer, real, boolean or timestamp only when it
///   parses (`"true"`, `"false"`, `"1"`, `"0"` for booleans); text that
///   parses as a timestamp stays text, byte for byte;
/// - reals convert to integers only when they have no fractional part;
/// - integers and reals convert to booleans as `!= 0`, booleans to 0/1;
/// - integers are read as unix seconds when a timestamp is expected and
///   timestamps become unix seconds as integers;
/// - the remaining pairs (e.g. boolean to timestamp, real to blob) fail.
pub fn coerce(value: Value, kind: ValueKind) -> Result<Value> {
    if value.kind() == Some(kind) {
        return Ok(value);
    }

    let converted = match (&value, kind) {
        (Value::Null, _) => Some(Value::Null),

        (Value::Blob(b), ValueKind::Text) => std::str::from_utf8(b)
            .ok()
            .map(|s| Value::Text(s.to_string())),
        (_, ValueKind::Text) => Some(Value::Text(value.to_display_string())),

        (Value::Real(r), ValueKind::Integer) => {
            let in_range = *r >= i64::MIN as f64 && *r < i64::MAX as f64;
            (r.fract() == 0.0 && in_range).then(|| Value::Integer(*r as i64))
        }
        (Value::Text(s), ValueKind::Integer) => s.trim().parse::<i64>().ok().map(Value::Integer),
        (Value::Boolean(b), ValueKind::Integer) => Some(Value::Integer(i64::from(*b))),
        (Value::Timestamp(ts), ValueKind::Integer) => Some(Value::Integer(ts.timestamp())),

        (Value::Integer(i), ValueKind::Real) => Some(Value::Real(*i as f64)),
        (Value::Text(s), ValueKind::Real) => s.trim().parse::<f64>().ok().map(Value::Real),
        (Value::Boolean(b), ValueKind::Real) => Some(Value::Real(if *b { 1.0 } else { 0.0 })),

        (Value::Integer(i), ValueKind::Boolean) => Some(Value::Boolean(*i != 0)),
        (Value::Real(r), ValueKind::Boolean) => Some(Value::Boolean(*r != 0.0)),
        (Value::Text(s), ValueKind::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Value::Boolean(true)),
            "false" | "0" => Some(Value::Boolean(false)),
            _ => None,
        },

        (Value::Integer(i), ValueKind::Timestamp) => {
            DateTime::from_timestamp(*i, 0).map(Value::Timestamp)
        }
        // Timestamps are stored as text; valid text is kept verbatim.
        (Value::Text(s), ValueKind::Timestamp) => parse_timestamp(s).map(|_| value.clone()),

        (Value::Text(s), ValueKind::Blob) => Some(Value::Blob(s.as_bytes().to_vec())),

        _ => None,
    };

    converted.ok_or_else(|| {
        let from = value.kind().map(|k| k.to_string()).unwrap_or_default();
        Error::Coercion(format!(
            "{from} value `{}` cannot be stored as {kind}",
            value.to_display_string()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_to_text_is_always_safe() {
        assert_eq!(
            coerce(Value::Integer(42), ValueKind::Text).unwrap(),
            Value::Text("42".into())
        );
        assert_eq!(
            coerce(Value::Integer(-7), ValueKind::Text).unwrap(),
            Value::Text("-7".into())
        );
    }

    #[test]
    fn numeric_text_converts_to_integer() {
        assert_eq!(
            coerce(Value::Text(" 17 ".into()), ValueKind::Integer).unwrap(),
            Value::Integer(17)
        );
    }

    #[test]
    fn non_numeric_text_to_integer_fails() {
        let err = coerce(Value::Text("forty two".into()), ValueKind::Integer).unwrap_err();
        assert!(matches!(err, Error::Coercion(_)));
        assert!(err.to_string().contains("forty two"));
    }

    #[test]
    fn null_passes_through_every_kind() {
        for kind in [
            ValueKind::Integer,
            ValueKind::Real,
            ValueKind::Text,
            ValueKind::Boolean,
            ValueKind::Timestamp,
            ValueKind::Blob,
        ] {
            assert_eq!(coerce(Value::Null, kind).unwrap(), Value::Null);
        }
    }

    #[test]
    fn reals_only_become_integers_when_whole() {
        assert_eq!(
            coerce(Value::Real(3.0), ValueKind::Integer).unwrap(),
            Value::Integer(3)
        );
        assert!(coerce(Value::Real(3.5), ValueKind::Integer).is_err());
    }

    #[test]
    fn booleans_round_through_integers_and_text() {
        assert_eq!(
            coerce(Value::Integer(1), ValueKind::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            coerce(Value::Text("FALSE".into()), ValueKind::Boolean).unwrap(),
            Value::Boolean(false)
        );
        assert!(coerce(Value::Text("maybe".into()), ValueKind::Boolean).is_err());
        assert_eq!(
            coerce(Value::Boolean(true), ValueKind::Integer).unwrap(),
            Value::Integer(1)
        );
    }

    #[test]
    fn timestamps_parse_from_rfc3339_and_sqlite_layout() {
        assert_eq!(
            parse_timestamp("2024-01-01T00:00:00Z"),
            parse_timestamp("2024-01-01 00:00:00")
        );
        let ts = parse_timestamp("2024-01-01 00:00:00").unwrap();
        assert_eq!(
            coerce(Value::Timestamp(ts), ValueKind::Integer).unwrap(),
            Value::Integer(1_704_067_200)
        );
    }

    #[test]
    fn timestamp_text_is_kept_verbatim() {
        for text in ["2024-01-01 10:00:00", "2024-01-01T10:00:00+02:00"] {
            assert_eq!(
                coerce(Value::Text(text.into()), ValueKind::Timestamp).unwrap(),
                Value::Text(text.into())
            );
        }
        assert!(coerce(Value::Text("yesterday".into()), ValueKind::Timestamp).is_err());
    }

    #[test]
    fn invalid_utf8_text_is_rejected() {
        let err = Value::try_from(ValueRef::Text(b"hi\xff")).unwrap_err();
        assert!(matches!(err, Error::Coercion(_)));
        assert_eq!(
            Value::try_from(ValueRef::Text(b"hi")).unwrap(),
            Value::Text("hi".into())
        );
    }

    #[test]
    fn incompatible_pairs_fail() {
        assert!(coerce(Value::Boolean(true), ValueKind::Timestamp).is_err());
        assert!(coerce(Value::Real(1.5), ValueKind::Blob).is_err());
        assert!(coerce(Value::Blob(vec![0xff, 0xfe]), ValueKind::Text).is_err());
    }

    #[test]
    fn zero_values_match_their_kind() {
        assert_eq!(ValueKind::Text.zero(), Value::Text(String::new()));
        assert_eq!(ValueKind::Integer.zero().kind(), Some(ValueKind::Integer));
        assert_eq!(ValueKind::Boolean.sql_type(), "INTEGER");
        assert_eq!(ValueKind::Timestamp.sql_type(), "TEXT");
    }
}
