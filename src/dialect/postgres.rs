use super::{call, escape_identifier, template, Dialect, Interval, SqlDialect};
use crate::ast::BinaryOp;
use crate::fragment::SqlFragment;
use crate::types::JdbcType;

pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn kind(&self) -> Dialect {
        Dialect::Postgres
    }

    fn quote_identifier(&self, name: &str) -> String {
        // unquoted names fold to lower case
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return format!("\"{}\"", name.replace('"', "\"\""));
        }
        escape_identifier(name)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn bool_literal(&self, val: bool) -> String {
        if val {
            "true".to_string()
        } else {
            "false".to_string()
        }
    }

    fn operator_symbol(&self, op: BinaryOp) -> &'static str {
        match op {
            BinaryOp::BitXor => "#",
            other => other.symbol(),
        }
    }

    fn case_insensitive_like(&self) -> &'static str {
        "ILIKE"
    }

    fn supports_round_double(&self) -> bool {
        false
    }

    fn sql_type_name(&self, ty: JdbcType) -> &'static str {
        match ty {
            JdbcType::Boolean => "BOOLEAN",
            JdbcType::TinyInt | JdbcType::SmallInt => "SMALLINT",
            JdbcType::Integer => "INTEGER",
            JdbcType::BigInt => "BIGINT",
            JdbcType::Real => "REAL",
            JdbcType::Double => "DOUBLE PRECISION",
            JdbcType::Decimal => "NUMERIC",
            JdbcType::Char => "CHAR",
            JdbcType::Varchar | JdbcType::Null | JdbcType::Other => "VARCHAR",
            JdbcType::LongVarchar => "TEXT",
            JdbcType::Date => "DATE",
            JdbcType::Time => "TIME",
            JdbcType::Timestamp => "TIMESTAMP",
            JdbcType::Guid => "ENTITYID",
            JdbcType::Binary => "BYTEA",
        }
    }

    fn jdbc_function(&self, name: &str, args: &[SqlFragment]) -> SqlFragment {
        let extract = |part: &str| {
            template(
                &format!("CAST(EXTRACT({} FROM {{0}}) AS INTEGER)", part),
                args,
            )
        };
        match name.to_ascii_lowercase().as_str() {
            "lcase" | "lower" => call("LOWER", args),
            "ucase" | "upper" => call("UPPER", args),
            "ceiling" => call("CEIL", args),
            "log" => call("LN", args),
            "log10" => call("LOG", args),
            "rand" => call("RANDOM", &[]),
            "truncate" => call("TRUNC", args),
            "concat" => template("({0} || {1})", args),
            "substring" => call("SUBSTR", args),
            "curdate" => SqlFragment::from_sql("CURRENT_DATE"),
            "curtime" => SqlFragment::from_sql("CURRENT_TIME"),
            "now" => SqlFragment::from_sql("CURRENT_TIMESTAMP"),
            "year" => extract("YEAR"),
            "month" => extract("MONTH"),
            "dayofmonth" => extract("DAY"),
            "dayofyear" => extract("DOY"),
            "dayofweek" => template("(CAST(EXTRACT(DOW FROM {0}) AS INTEGER) + 1)", args),
            "hour" => extract("HOUR"),
            "minute" => extract("MINUTE"),
            "second" => template("CAST(FLOOR(EXTRACT(SECOND FROM {0})) AS INTEGER)", args),
            "quarter" => extract("QUARTER"),
            "week" => extract("WEEK"),
            "monthname" => template("TO_CHAR({0}, 'FMMonth')", args),
            "ifnull" => call("COALESCE", args),
            "locate" if args.len() == 3 => template(
                "(CASE WHEN STRPOS(SUBSTR({1}, {2}), {0}) > 0 THEN STRPOS(SUBSTR({1}, {2}), {0}) + {2} - 1 ELSE 0 END)",
                args,
            ),
            "locate" => template("POSITION({0} IN {1})", args),
            other => call(&other.to_uppercase(), args),
        }
    }

    fn timestamp_add(&self, interval: Interval, count: &SqlFragment, ts: &SqlFragment) -> SqlFragment {
        let unit = match interval {
            Interval::FracSecond => "1 millisecond",
            Interval::Second => "1 second",
            Interval::Minute => "1 minute",
            Interval::Hour => "1 hour",
            Interval::Day => "1 day",
            Interval::Week => "1 week",
            Interval::Month => "1 month",
            Interval::Quarter => "3 months",
            Interval::Year => "1 year",
        };
        template(
            &format!("({{1}} + ({{0}}) * INTERVAL '{}')", unit),
            &[count.clone(), ts.clone()],
        )
    }

    fn timestamp_diff(&self, interval: Interval, start: &SqlFragment, end: &SqlFragment) -> SqlFragment {
        let args = [start.clone(), end.clone()];
        if let Some(months) = interval.months() {
            return template(
                &format!(
                    "CAST(((EXTRACT(YEAR FROM {{1}}) - EXTRACT(YEAR FROM {{0}})) * 12 + EXTRACT(MONTH FROM {{1}}) - EXTRACT(MONTH FROM {{0}})) / {} AS INTEGER)",
                    months
                ),
                &args,
            );
        }
        let seconds = interval.seconds().unwrap_or(1.0);
        template(
            &format!(
                "CAST(TRUNC(EXTRACT(EPOCH FROM ({{1}} - {{0}})) / {}) AS INTEGER)",
                seconds
            ),
            &args,
        )
    }
}
