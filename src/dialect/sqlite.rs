use super::{call, join_fragments, select_head, template, Dialect, Interval, SelectParts, SqlDialect};
use crate::fragment::SqlFragment;
use crate::types::JdbcType;

pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn kind(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn quote_identifier(&self, id: &str) -> String {
        format!("\"{}\"", id.replace('"', "\"\""))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn bool_literal(&self, val: bool) -> String {
        if val {
            "1".to_string()
        } else {
            "0".to_string()
        }
    }

    fn max_identifier_length(&self) -> usize {
        255
    }

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
                sql.append(&format!("\nLIMIT -1 OFFSET {}", m));
            }
            (None, None) => {}
        }
        sql
    }

    /// SQLite names VALUES columns `column1..N` itself and rejects a column list.
    fn values_list(&self, rows: &[Vec<SqlFragment>], _columns: &[String], alias: &str) -> SqlFragment {
        let mut sql = SqlFragment::from_sql("(VALUES ");
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                sql.append(", ");
            }
            sql.append("(")
                .append_fragment(&join_fragments(row.iter(), ", "))
                .append(")");
        }
        sql.append(&format!(") {}", alias));
        sql
    }

    fn is_case_sensitive(&self) -> bool {
        false
    }

    fn supports_greatest_least(&self) -> bool {
        false
    }

    fn sql_type_name(&self, ty: JdbcType) -> &'static str {
        match ty {
            JdbcType::Boolean
            | JdbcType::TinyInt
            | JdbcType::SmallInt
            | JdbcType::Integer
            | JdbcType::BigInt => "INTEGER",
            JdbcType::Real | JdbcType::Double => "REAL",
            JdbcType::Decimal => "NUMERIC",
            JdbcType::Binary => "BLOB",
            _ => "TEXT",
        }
    }

    fn jdbc_function(&self, name: &str, args: &[SqlFragment]) -> SqlFragment {
        let strftime = |fmt: &str| {
            template(&format!("CAST(STRFTIME('{}', {{0}}) AS INTEGER)", fmt), args)
        };
        match name.to_ascii_lowercase().as_str() {
            "lcase" | "lower" => call("LOWER", args),
            "ucase" | "upper" => call("UPPER", args),
            "ceiling" => call("CEIL", args),
            "log" => call("LN", args),
            "rand" => call("RANDOM", &[]),
            "mod" => template("({0} % {1})", args),
            "truncate" => template("(CAST(({0}) * POWER(10, {1}) AS INTEGER) / POWER(10, {1}))", args),
            "left" => template("SUBSTR({0}, 1, {1})", args),
            "concat" => template("({0} || {1})", args),
            "substring" => call("SUBSTR", args),
            "curdate" => SqlFragment::from_sql("DATE('now')"),
            "curtime" => SqlFragment::from_sql("TIME('now')"),
            "now" => SqlFragment::from_sql("DATETIME('now')"),
            "year" => strftime("%Y"),
            "month" => strftime("%m"),
            "dayofmonth" => strftime("%d"),
            "dayofyear" => strftime("%j"),
            "hour" => strftime("%H"),
            "minute" => strftime("%M"),
            "second" => strftime("%S"),
            "week" => strftime("%W"),
            "dayofweek" => template("(CAST(STRFTIME('%w', {0}) AS INTEGER) + 1)", args),
            "quarter" => template("((CAST(STRFTIME('%m', {0}) AS INTEGER) + 2) / 3)", args),
            "locate" => template("INSTR({1}, {0})", args),
            "repeat" => template("REPLACE(PRINTF('%.*c', {1}, 'x'), 'x', {0})", args),
            other => call(&other.to_uppercase(), args),
        }
    }

    fn timestamp_add(&self, interval: Interval, count: &SqlFragment, ts: &SqlFragment) -> SqlFragment {
        let args = [count.clone(), ts.clone()];
        if let Some(months) = interval.months() {
            return template(
                &format!("DATETIME({{1}}, '+' || (({{0}}) * {}) || ' months')", months),
                &args,
            );
        }
        let seconds = interval.seconds().unwrap_or(1.0);
        template(
            &format!("DATETIME({{1}}, '+' || (({{0}}) * {}) || ' seconds')", seconds),
            &args,
        )
    }

    fn timestamp_diff(&self, interval: Interval, start: &SqlFragment, end: &SqlFragment) -> SqlFragment {
        let args = [start.clone(), end.clone()];
        if let Some(months) = interval.months() {
            return template(
                &format!(
                    "(((CAST(STRFTIME('%Y', {{1}}) AS INTEGER) - CAST(STRFTIME('%Y', {{0}}) AS INTEGER)) * 12 + CAST(STRFTIME('%m', {{1}}) AS INTEGER) - CAST(STRFTIME('%m', {{0}}) AS INTEGER)) / {})",
                    months
                ),
                &args,
            );
        }
        let seconds = interval.seconds().unwrap_or(1.0);
        template(
            &format!(
                "CAST((JULIANDAY({{1}}) - JULIANDAY({{0}})) * 86400 / {} AS INTEGER)",
                seconds
            ),
            &args,
        )
    }

    fn greatest_least(&self, name: &str, args: &[SqlFragment]) -> SqlFragment {
        // scalar MAX/MIN take several arguments in SQLite
        let f = if name.eq_ignore_ascii_case("greatest") { "MAX" } else { "MIN" };
        call(f, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sqlite_functions() {
        let d = SqliteDialect;
        let x = SqlFragment::from_sql("\"r\".\"date\"");
        assert_eq!(
            d.jdbc_function("month", &[x]).sql(),
            "CAST(STRFTIME('%m', \"r\".\"date\") AS INTEGER)"
        );
        assert_eq!(
            d.greatest_least("least", &[SqlFragment::from_sql("1"), SqlFragment::from_sql("2")])
                .sql(),
            "MIN(1, 2)"
        );
    }
}
