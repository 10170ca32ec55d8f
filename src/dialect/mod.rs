//! Target database dialects.
//!
//! Generated SQL is dialect-neutral up to the points where backends differ:
//! identifier quoting, placeholders, boolean values, string concatenation,
//! row limiting, native function spelling and capability flags. Each backend
//! implements [`SqlDialect`]; [`Dialect`] names them.

pub mod oracle;
pub mod postgres;
pub mod sqlite;
pub mod sqlserver;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, SetOp};
use crate::fragment::SqlFragment;
use crate::types::JdbcType;

pub use oracle::OracleDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;
pub use sqlserver::SqlServerDialect;

/// SQL reserved words that must be quoted when used as identifiers.
pub const RESERVED_WORDS: &[&str] = &[
    "all", "and", "any", "as", "asc", "between", "by", "case", "cast", "check", "column",
    "constraint", "create", "cross", "current", "default", "delete", "desc", "distinct", "drop",
    "else", "end", "except", "exists", "false", "fetch", "for", "foreign", "from", "full",
    "group", "having", "in", "index", "inner", "insert", "intersect", "into", "is", "join",
    "key", "left", "like", "limit", "not", "null", "offset", "on", "or", "order", "outer",
    "pivot", "primary", "references", "right", "select", "some", "table", "then", "to", "true",
    "union", "update", "user", "using", "values", "when", "where", "with",
];

/// Quote an identifier if it's a reserved word or contains special chars.
pub fn escape_identifier(name: &str) -> String {
    if needs_quoting(name) {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

fn needs_quoting(name: &str) -> bool {
    let lower = name.to_lowercase();
    name.is_empty()
        || RESERVED_WORDS.contains(&lower.as_str())
        || name.chars().any(|c| !c.is_ascii_alphanumeric() && c != '_')
        || name.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Row-limiting inputs for one SELECT.
///
/// `body` is everything after the select list (FROM, WHERE, GROUP BY,
/// HAVING), possibly empty.
#[derive(Debug, Clone, Default)]
pub struct SelectParts {
    pub distinct: bool,
    pub columns: SqlFragment,
    pub body: SqlFragment,
    pub order_by: Option<SqlFragment>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Date part named by a `SQL_TSI_*` interval keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    FracSecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Interval {
    /// Parse `SQL_TSI_DAY`, `'SQL_TSI_DAY'` or `DAY`.
    pub fn parse(text: &str) -> Option<Interval> {
        let t = text.trim().trim_matches('\'').to_ascii_uppercase();
        let bare = t.strip_prefix("SQL_TSI_").unwrap_or(&t);
        let i = match bare {
            "FRAC_SECOND" => Interval::FracSecond,
            "SECOND" => Interval::Second,
            "MINUTE" => Interval::Minute,
            "HOUR" => Interval::Hour,
            "DAY" => Interval::Day,
            "WEEK" => Interval::Week,
            "MONTH" => Interval::Month,
            "QUARTER" => Interval::Quarter,
            "YEAR" => Interval::Year,
            _ => return None,
        };
        Some(i)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Interval::FracSecond => "MILLISECOND",
            Interval::Second => "SECOND",
            Interval::Minute => "MINUTE",
            Interval::Hour => "HOUR",
            Interval::Day => "DAY",
            Interval::Week => "WEEK",
            Interval::Month => "MONTH",
            Interval::Quarter => "QUARTER",
            Interval::Year => "YEAR",
        }
    }

    /// Length in seconds for fixed-size intervals.
    pub fn seconds(self) -> Option<f64> {
        match self {
            Interval::FracSecond => Some(0.001),
            Interval::Second => Some(1.0),
            Interval::Minute => Some(60.0),
            Interval::Hour => Some(3600.0),
            Interval::Day => Some(86400.0),
            Interval::Week => Some(604800.0),
            _ => None,
        }
    }

    /// Length in months for calendar intervals.
    pub fn months(self) -> Option<u32> {
        match self {
            Interval::Month => Some(1),
            Interval::Quarter => Some(3),
            Interval::Year => Some(12),
            _ => None,
        }
    }
}

/// Trait for dialect-specific SQL generation.
pub trait SqlDialect: Send + Sync {
    fn kind(&self) -> Dialect;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Quote an identifier (table, column or alias) when needed.
    fn quote_identifier(&self, name: &str) -> String;

    /// Generate the parameter placeholder for a 1-based index.
    fn placeholder(&self, index: usize) -> String;

    fn bool_literal(&self, val: bool) -> String;

    /// Whether a predicate may be used directly as a select-list value.
    fn supports_boolean_values(&self) -> bool {
        true
    }

    fn max_identifier_length(&self) -> usize {
        63
    }

    /// Turn an arbitrary name into one usable as an unquoted alias.
    fn legal_name(&self, name: &str) -> String {
        let mut out: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
            out.insert(0, '_');
        }
        out.truncate(self.max_identifier_length());
        out
    }

    /// Concatenate string parts, given with their types.
    fn string_concat(&self, parts: &[(SqlFragment, JdbcType)]) -> SqlFragment {
        join_fragments(parts.iter().map(|(f, _)| f), " || ")
    }

    /// Operator spelling when it differs from the portable one.
    fn operator_symbol(&self, op: BinaryOp) -> &'static str {
        op.symbol()
    }

    /// Assemble a SELECT and apply ORDER BY / LIMIT / OFFSET.
    fn limit_rows(&self, parts: SelectParts) -> SqlFragment {
        let mut sql = select_head(&parts, None);
        if let Some(order) = &parts.order_by {
            sql.append("\nORDER BY ").append_fragment(order);
        }
        match (parts.limit, parts.offset) {
            (Some(n), Some(m)) => {
                sql.append(&format!("\nLIMIT {} OFFSET {}", n, m));
            }
            (Some(n), None) => {
                sql.append(&format!("\nLIMIT {}", n));
            }
            (None, Some(m)) => {
                sql.append(&format!("\nOFFSET {}", m));
            }
            (None, None) => {}
        }
        sql
    }

    /// Keyword joining the terms of a set operation.
    fn set_operator(&self, op: SetOp) -> &'static str {
        op.keyword()
    }

    /// A literal row list in FROM, exposing `columns` under `alias`.
    fn values_list(&self, rows: &[Vec<SqlFragment>], columns: &[String], alias: &str) -> SqlFragment {
        let mut sql = SqlFragment::from_sql("(VALUES ");
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                sql.append(", ");
            }
            sql.append("(")
                .append_fragment(&join_fragments(row.iter(), ", "))
                .append(")");
        }
        let names: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        sql.append(&format!(") {}({})", alias, names.join(", ")));
        sql
    }

    fn supports_recursive_cte(&self) -> bool {
        true
    }

    fn recursive_keyword(&self) -> &'static str {
        "RECURSIVE "
    }

    fn is_case_sensitive(&self) -> bool {
        true
    }

    /// Case-insensitive LIKE operator.
    fn case_insensitive_like(&self) -> &'static str {
        "LIKE"
    }

    fn supports_greatest_least(&self) -> bool {
        true
    }

    /// Whether ORDER BY is legal in a subquery that has no row limit.
    fn supports_unlimited_subquery_order_by(&self) -> bool {
        true
    }

    /// Whether ROUND accepts a scale for floating point arguments.
    fn supports_round_double(&self) -> bool {
        true
    }

    fn sql_type_name(&self, ty: JdbcType) -> &'static str;

    /// Native spelling of a portable (JDBC escape) function.
    fn jdbc_function(&self, name: &str, args: &[SqlFragment]) -> SqlFragment;

    fn timestamp_add(&self, interval: Interval, count: &SqlFragment, ts: &SqlFragment) -> SqlFragment;

    fn timestamp_diff(&self, interval: Interval, start: &SqlFragment, end: &SqlFragment) -> SqlFragment;

    /// GREATEST/LEAST for backends without the native functions.
    fn greatest_least(&self, name: &str, args: &[SqlFragment]) -> SqlFragment {
        call(&name.to_uppercase(), args)
    }
}

/// `SELECT [DISTINCT] [prefix] columns body`.
pub fn select_head(parts: &SelectParts, prefix: Option<&str>) -> SqlFragment {
    let mut sql = SqlFragment::from_sql("SELECT ");
    if parts.distinct {
        sql.append("DISTINCT ");
    }
    if let Some(prefix) = prefix {
        sql.append(prefix);
    }
    sql.append_fragment(&parts.columns);
    if !parts.body.is_empty() {
        sql.append("\n").append_fragment(&parts.body);
    }
    sql
}

/// `NAME(a, b, ...)`
pub fn call(name: &str, args: &[SqlFragment]) -> SqlFragment {
    let mut sql = SqlFragment::from_sql(name);
    sql.append("(");
    sql.append_fragment(&join_fragments(args.iter(), ", "));
    sql.append(")");
    sql
}

pub fn join_fragments<'a>(
    parts: impl IntoIterator<Item = &'a SqlFragment>,
    separator: &str,
) -> SqlFragment {
    let mut sql = SqlFragment::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            sql.append(separator);
        }
        sql.append_fragment(part);
    }
    sql
}

/// Expand a pattern where `{0}`, `{1}`, ... stand for argument fragments.
pub fn template(pattern: &str, args: &[SqlFragment]) -> SqlFragment {
    let mut sql = SqlFragment::new();
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let index = rest[open + 1..open + close].parse::<usize>().ok();
        sql.append(&rest[..open]);
        match index.and_then(|i| args.get(i)) {
            Some(arg) => {
                sql.append_fragment(arg);
            }
            None => {
                sql.append(&rest[open..open + close + 1]);
            }
        }
        rest = &rest[open + close + 1..];
    }
    sql.append(rest);
    sql
}

/// Supported target dialects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    SqlServer,
    Oracle,
    Sqlite,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::Postgres,
        Dialect::SqlServer,
        Dialect::Oracle,
        Dialect::Sqlite,
    ];

    pub fn generator(&self) -> Box<dyn SqlDialect> {
        match self {
            Dialect::Postgres => Box::new(PostgresDialect),
            Dialect::SqlServer => Box::new(SqlServerDialect),
            Dialect::Oracle => Box::new(OracleDialect),
            Dialect::Sqlite => Box::new(SqliteDialect),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::SqlServer => "sqlserver",
            Dialect::Oracle => "oracle",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "oracle" => Ok(Dialect::Oracle),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(format!("Unknown dialect: {}", other)),
        }
    }
}
