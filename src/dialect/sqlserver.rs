use super::{call, join_fragments, select_head, template, Dialect, Interval, SelectParts, SqlDialect};
use crate::fragment::SqlFragment;
use crate::types::JdbcType;

pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn kind(&self) -> Dialect {
        Dialect::SqlServer
    }

    fn quote_identifier(&self, name: &str) -> String {
        if super::needs_quoting(name) {
            format!("[{}]", name.replace(']', "]]"))
        } else {
            name.to_string()
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn bool_literal(&self, val: bool) -> String {
        if val { "1".to_string() } else { "0".to_string() }
    }

    fn supports_boolean_values(&self) -> bool {
        false
    }

    fn max_identifier_length(&self) -> usize {
        128
    }

    fn string_concat(&self, parts: &[(SqlFragment, JdbcType)]) -> SqlFragment {
        let cast: Vec<SqlFragment> = parts
            .iter()
            .map(|(f, ty)| {
                if ty.is_text() {
                    f.clone()
                } else {
                    f.clone().wrap("CAST(", " AS NVARCHAR(MAX))")
                }
            })
            .collect();
        join_fragments(cast.iter(), " + ")
    }

    fn limit_rows(&self, parts: SelectParts) -> SqlFragment {
        // TOP when there is no offset, OFFSET/FETCH otherwise
        if parts.offset.is_none() {
            let top = parts.limit.map(|n| format!("TOP {} ", n));
            let mut sql = select_head(&parts, top.as_deref());
            if let Some(order) = &parts.order_by {
                sql.append("\nORDER BY ").append_fragment(order);
            }
            return sql;
        }
        let mut sql = select_head(&parts, None);
        match &parts.order_by {
            Some(order) => {
                sql.append("\nORDER BY ").append_fragment(order);
            }
            None => {
                sql.append("\nORDER BY (SELECT NULL)");
            }
        }
        sql.append(&format!("\nOFFSET {} ROWS", parts.offset.unwrap_or(0)));
        if let Some(n) = parts.limit {
            sql.append(&format!(" FETCH NEXT {} ROWS ONLY", n));
        }
        sql
    }

    fn is_case_sensitive(&self) -> bool {
        false
    }

    fn supports_greatest_least(&self) -> bool {
        false
    }

    fn supports_unlimited_subquery_order_by(&self) -> bool {
        false
    }

    fn sql_type_name(&self, ty: JdbcType) -> &'static str {
        match ty {
            JdbcType::Boolean => "BIT",
            JdbcType::TinyInt => "TINYINT",
            JdbcType::SmallInt => "SMALLINT",
            JdbcType::Integer => "INT",
            JdbcType::BigInt => "BIGINT",
            JdbcType::Real => "REAL",
            JdbcType::Double => "FLOAT",
            JdbcType::Decimal => "DECIMAL",
            JdbcType::Char => "NCHAR",
            JdbcType::Varchar | JdbcType::Null | JdbcType::Other => "NVARCHAR",
            JdbcType::LongVarchar => "NVARCHAR(MAX)",
            JdbcType::Date => "DATE",
            JdbcType::Time => "TIME",
            JdbcType::Timestamp => "DATETIME",
            JdbcType::Guid => "UNIQUEIDENTIFIER",
            JdbcType::Binary => "VARBINARY(MAX)",
        }
    }

    fn jdbc_function(&self, name: &str, args: &[SqlFragment]) -> SqlFragment {
        let datepart = |part: &str| template(&format!("DATEPART({}, {{0}})", part), args);
        match name.to_ascii_lowercase().as_str() {
            "lcase" | "lower" => call("LOWER", args),
            "ucase" | "upper" => call("UPPER", args),
            "length" => call("LEN", args),
            "mod" => template("({0} % {1})", args),
            "truncate" => template("ROUND({0}, {1}, 1)", args),
            "concat" => template("({0} + {1})", args),
            "repeat" => call("REPLICATE", args),
            "curdate" => SqlFragment::from_sql("CAST(GETDATE() AS DATE)"),
            "curtime" => SqlFragment::from_sql("CAST(GETDATE() AS TIME)"),
            "now" => SqlFragment::from_sql("GETDATE()"),
            "year" => datepart("year"),
            "month" => datepart("month"),
            "dayofmonth" => datepart("day"),
            "dayofyear" => datepart("dayofyear"),
            "dayofweek" => datepart("weekday"),
            "hour" => datepart("hour"),
            "minute" => datepart("minute"),
            "second" => datepart("second"),
            "quarter" => datepart("quarter"),
            "week" => datepart("week"),
            "monthname" => template("DATENAME(month, {0})", args),
            "ifnull" => call("ISNULL", args),
            "locate" => call("CHARINDEX", args),
            "log" => call("LOG", args),
            other => call(&other.to_uppercase(), args),
        }
    }

    fn timestamp_add(&self, interval: Interval, count: &SqlFragment, ts: &SqlFragment) -> SqlFragment {
        template(
            &format!("DATEADD({}, {{0}}, {{1}})", interval.keyword()),
            &[count.clone(), ts.clone()],
        )
    }

    fn timestamp_diff(&self, interval: Interval, start: &SqlFragment, end: &SqlFragment) -> SqlFragment {
        template(
            &format!("DATEDIFF({}, {{0}}, {{1}})", interval.keyword()),
            &[start.clone(), end.clone()],
        )
    }

    fn greatest_least(&self, name: &str, args: &[SqlFragment]) -> SqlFragment {
        let agg = if name.eq_ignore_ascii_case("greatest") { "MAX" } else { "MIN" };
        let mut sql = SqlFragment::from_sql(format!("(SELECT {}(x) FROM (VALUES ", agg));
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                sql.append(", ");
            }
            sql.append("(").append_fragment(arg).append(")");
        }
        sql.append(") AS _values(x))");
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bracket_quoting() {
        let d = SqlServerDialect;
        assert_eq!(d.quote_identifier("order"), "[order]");
        assert_eq!(d.quote_identifier("Seven"), "Seven");
    }

    #[test]
    fn test_concat_casts_non_text() {
        let d = SqlServerDialect;
        let out = d.string_concat(&[
            (SqlFragment::from_sql("r.name"), JdbcType::Varchar),
            (SqlFragment::from_sql("r.d"), JdbcType::Integer),
        ]);
        assert_eq!(out.sql(), "r.name + CAST(r.d AS NVARCHAR(MAX))");
    }

    #[test]
    fn test_greatest_without_native_support() {
        let d = SqlServerDialect;
        let out = d.greatest_least(
            "greatest",
            &[SqlFragment::from_sql("a"), SqlFragment::from_sql("b")],
        );
        assert_eq!(out.sql(), "(SELECT MAX(x) FROM (VALUES (a), (b)) AS _values(x))");
    }
}
