//! Column types and bind values.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// JDBC-style type tag carried by every bound expression and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JdbcType {
    Null,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal,
    Char,
    Varchar,
    LongVarchar,
    Date,
    Time,
    Timestamp,
    Guid,
    Binary,
    Other,
}

impl JdbcType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            JdbcType::TinyInt
                | JdbcType::SmallInt
                | JdbcType::Integer
                | JdbcType::BigInt
                | JdbcType::Real
                | JdbcType::Double
                | JdbcType::Decimal
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            JdbcType::TinyInt | JdbcType::SmallInt | JdbcType::Integer | JdbcType::BigInt
        )
    }

    pub fn is_text(self) -> bool {
        matches!(
            self,
            JdbcType::Char | JdbcType::Varchar | JdbcType::LongVarchar | JdbcType::Guid
        )
    }

    pub fn is_date_time(self) -> bool {
        matches!(self, JdbcType::Date | JdbcType::Time | JdbcType::Timestamp)
    }

    fn numeric_rank(self) -> u8 {
        match self {
            JdbcType::TinyInt => 1,
            JdbcType::SmallInt => 2,
            JdbcType::Integer => 3,
            JdbcType::BigInt => 4,
            JdbcType::Decimal => 5,
            JdbcType::Real => 6,
            JdbcType::Double => 7,
            _ => 0,
        }
    }

    /// Result type of an arithmetic operator applied to two operands.
    pub fn promote_numeric(a: JdbcType, b: JdbcType) -> JdbcType {
        match (a, b) {
            (JdbcType::Null, other) | (other, JdbcType::Null) => {
                if other.is_numeric() {
                    other
                } else {
                    JdbcType::Double
                }
            }
            _ if a.is_numeric() && b.is_numeric() => {
                if a.numeric_rank() >= b.numeric_rank() {
                    a
                } else {
                    b
                }
            }
            _ => JdbcType::Double,
        }
    }

    /// Common type of two values that meet in one column (UNION, CASE, COALESCE).
    ///
    /// Returns `Other` when the two types cannot share a column.
    pub fn promote(a: JdbcType, b: JdbcType) -> JdbcType {
        if a == b {
            return a;
        }
        match (a, b) {
            (JdbcType::Null, other) | (other, JdbcType::Null) => other,
            (JdbcType::Other, _) | (_, JdbcType::Other) => JdbcType::Other,
            _ if a.is_numeric() && b.is_numeric() => Self::promote_numeric(a, b),
            _ if a.is_text() && b.is_text() => JdbcType::Varchar,
            _ if a.is_date_time() && b.is_date_time() => JdbcType::Timestamp,
            _ => JdbcType::Other,
        }
    }

    /// Whether values of the two types may appear in the same output column.
    pub fn is_compatible(a: JdbcType, b: JdbcType) -> bool {
        a == JdbcType::Other || b == JdbcType::Other || Self::promote(a, b) != JdbcType::Other
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            JdbcType::Null => "NULL",
            JdbcType::Boolean => "BOOLEAN",
            JdbcType::TinyInt => "TINYINT",
            JdbcType::SmallInt => "SMALLINT",
            JdbcType::Integer => "INTEGER",
            JdbcType::BigInt => "BIGINT",
            JdbcType::Real => "REAL",
            JdbcType::Double => "DOUBLE",
            JdbcType::Decimal => "DECIMAL",
            JdbcType::Char => "CHAR",
            JdbcType::Varchar => "VARCHAR",
            JdbcType::LongVarchar => "LONGVARCHAR",
            JdbcType::Date => "DATE",
            JdbcType::Time => "TIME",
            JdbcType::Timestamp => "TIMESTAMP",
            JdbcType::Guid => "GUID",
            JdbcType::Binary => "BINARY",
            JdbcType::Other => "OTHER",
        }
    }

    /// Map a type name as written in LabKey SQL (`INTEGER`, `SQL_VARCHAR`, ...).
    pub fn from_sql_name(name: &str) -> Option<JdbcType> {
        let upper = name.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SQL_").unwrap_or(&upper);
        let ty = match bare {
            "BOOLEAN" | "BIT" => JdbcType::Boolean,
            "TINYINT" => JdbcType::TinyInt,
            "SMALLINT" => JdbcType::SmallInt,
            "INT" | "INTEGER" => JdbcType::Integer,
            "BIGINT" | "LONG" => JdbcType::BigInt,
            "REAL" | "FLOAT4" => JdbcType::Real,
            "DOUBLE" | "FLOAT" | "DOUBLE PRECISION" => JdbcType::Double,
            "DECIMAL" | "NUMERIC" => JdbcType::Decimal,
            "CHAR" => JdbcType::Char,
            "VARCHAR" | "STRING" | "TEXT" => JdbcType::Varchar,
            "LONGVARCHAR" | "LONGNVARCHAR" => JdbcType::LongVarchar,
            "DATE" => JdbcType::Date,
            "TIME" => JdbcType::Time,
            "TIMESTAMP" | "DATETIME" => JdbcType::Timestamp,
            "GUID" | "ENTITYID" | "UNIQUEIDENTIFIER" => JdbcType::Guid,
            "BINARY" | "VARBINARY" | "LONGVARBINARY" => JdbcType::Binary,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for JdbcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A value passed out of band as a bind parameter, or read back from a pivot discovery query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(String),
    String(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn jdbc_type(&self) -> JdbcType {
        match self {
            Value::Null => JdbcType::Null,
            Value::Bool(_) => JdbcType::Boolean,
            Value::Int(_) => JdbcType::BigInt,
            Value::Float(_) => JdbcType::Double,
            Value::Decimal(_) => JdbcType::Decimal,
            Value::String(_) => JdbcType::Varchar,
            Value::Date(_) => JdbcType::Date,
            Value::Timestamp(_) => JdbcType::Timestamp,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Parse caller-supplied text as a value of the given type.
    pub fn parse_as(text: &str, ty: JdbcType) -> Result<Value, String> {
        let bad = || format!("Could not convert '{}' to {}", text, ty);
        if ty.is_integer() {
            return text.trim().parse::<i64>().map(Value::Int).map_err(|_| bad());
        }
        match ty {
            JdbcType::Null => Ok(Value::Null),
            JdbcType::Real | JdbcType::Double => {
                text.trim().parse::<f64>().map(Value::Float).map_err(|_| bad())
            }
            JdbcType::Decimal => text
                .trim()
                .parse::<f64>()
                .map(|_| Value::Decimal(text.trim().to_string()))
                .map_err(|_| bad()),
            JdbcType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(bad()),
            },
            JdbcType::Date => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| bad()),
            JdbcType::Timestamp => {
                let t = text.trim();
                NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S"))
                    .or_else(|_| {
                        NaiveDate::parse_from_str(t, "%Y-%m-%d")
                            .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
                    })
                    .map(Value::Timestamp)
                    .map_err(|_| bad())
            }
            _ => Ok(Value::String(text.to_string())),
        }
    }

    /// The display name of the value, as used for generated pivot column names.
    pub fn display_name(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Decimal(s) => f.write_str(s),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_promotion() {
        assert_eq!(
            JdbcType::promote_numeric(JdbcType::Integer, JdbcType::Double),
            JdbcType::Double
        );
        assert_eq!(
            JdbcType::promote_numeric(JdbcType::Integer, JdbcType::BigInt),
            JdbcType::BigInt
        );
        assert_eq!(
            JdbcType::promote_numeric(JdbcType::Null, JdbcType::Integer),
            JdbcType::Integer
        );
    }

    #[test]
    fn test_union_compatibility() {
        assert!(JdbcType::is_compatible(JdbcType::Integer, JdbcType::Double));
        assert!(JdbcType::is_compatible(JdbcType::Null, JdbcType::Timestamp));
        assert!(JdbcType::is_compatible(JdbcType::Date, JdbcType::Timestamp));
        assert!(!JdbcType::is_compatible(JdbcType::Integer, JdbcType::Timestamp));
    }

    #[test]
    fn test_from_sql_name() {
        assert_eq!(JdbcType::from_sql_name("sql_integer"), Some(JdbcType::Integer));
        assert_eq!(JdbcType::from_sql_name("VARCHAR"), Some(JdbcType::Varchar));
        assert_eq!(JdbcType::from_sql_name("datetime"), Some(JdbcType::Timestamp));
        assert_eq!(JdbcType::from_sql_name("widget"), None);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(Value::parse_as("42", JdbcType::Integer), Ok(Value::Int(42)));
        assert_eq!(
            Value::parse_as("yes", JdbcType::Boolean),
            Ok(Value::Bool(true))
        );
        assert!(Value::parse_as("abc", JdbcType::Integer).is_err());
        assert_eq!(Value::Null.display_name(), "NULL");
    }
}
