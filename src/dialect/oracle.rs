use super::{
    call, escape_identifier, join_fragments, select_head, template, Dialect, Interval, SelectParts,
    SqlDialect,
};
use crate::ast::SetOp;
use crate::fragment::SqlFragment;
use crate::types::JdbcType;

pub struct OracleDialect;

impl SqlDialect for OracleDialect {
    fn kind(&self) -> Dialect {
        Dialect::Oracle
    }

    fn quote_identifier(&self, name: &str) -> String {
        // Oracle does not accept a leading underscore unquoted
        if name.starts_with('_') {
            return format!("\"{}\"", name.replace('"', "\"\""));
        }
        escape_identifier(name)
    }

    fn placeholder(&self, index: usize) -> String {
        format!(":{}", index)
    }

    fn bool_literal(&self, val: bool) -> String {
        if val { "1".to_string() } else { "0".to_string() }
    }

    fn supports_boolean_values(&self) -> bool {
        false
    }

    fn max_identifier_length(&self) -> usize {
        30
    }

    fn limit_rows(&self, parts: SelectParts) -> SqlFragment {
        let mut sql = select_head(&parts, None);
        if parts.body.is_empty() {
            sql.append(" FROM DUAL");
        }
        if let Some(order) = &parts.order_by {
            sql.append("\nORDER BY ").append_fragment(order);
        }
        match (parts.limit, parts.offset) {
            (Some(n), Some(m)) => {
                sql.append(&format!("\nOFFSET {} ROWS FETCH NEXT {} ROWS ONLY", m, n));
            }
            (Some(n), None) => {
                sql.append(&format!("\nFETCH FIRST {} ROWS ONLY", n));
            }
            (None, Some(m)) => {
                sql.append(&format!("\nOFFSET {} ROWS", m));
            }
            (None, None) => {}
        }
        sql
    }

    fn set_operator(&self, op: SetOp) -> &'static str {
        match op {
            SetOp::Except => "MINUS",
            other => other.keyword(),
        }
    }

    fn values_list(&self, rows: &[Vec<SqlFragment>], columns: &[String], alias: &str) -> SqlFragment {
        let selects: Vec<SqlFragment> = rows
            .iter()
            .map(|row| {
                let mut sql = SqlFragment::from_sql("SELECT ");
                for (i, (value, name)) in row.iter().zip(columns).enumerate() {
                    if i > 0 {
                        sql.append(", ");
                    }
                    sql.append_fragment(value)
                        .append(&format!(" AS {}", self.quote_identifier(name)));
                }
                sql.append(" FROM DUAL");
                sql
            })
            .collect();
        join_fragments(selects.iter(), " UNION ALL ").wrap("(", &format!(") {}", alias))
    }

    fn supports_recursive_cte(&self) -> bool {
        false
    }

    fn recursive_keyword(&self) -> &'static str {
        ""
    }

    fn sql_type_name(&self, ty: JdbcType) -> &'static str {
        match ty {
            JdbcType::Boolean | JdbcType::TinyInt | JdbcType::SmallInt => "NUMBER(5)",
            JdbcType::Integer => "NUMBER(10)",
            JdbcType::BigInt => "NUMBER(19)",
            JdbcType::Real => "BINARY_FLOAT",
            JdbcType::Double => "BINARY_DOUBLE",
            JdbcType::Decimal => "NUMBER",
            JdbcType::Char => "CHAR",
            JdbcType::Varchar | JdbcType::Null | JdbcType::Other | JdbcType::Guid => "VARCHAR2(4000)",
            JdbcType::LongVarchar => "CLOB",
            JdbcType::Date => "DATE",
            JdbcType::Time | JdbcType::Timestamp => "TIMESTAMP",
            JdbcType::Binary => "BLOB",
        }
    }

    fn jdbc_function(&self, name: &str, args: &[SqlFragment]) -> SqlFragment {
        let extract = |part: &str| {
            template(
                &format!("EXTRACT({} FROM CAST({{0}} AS TIMESTAMP))", part),
                args,
            )
        };
        match name.to_ascii_lowercase().as_str() {
            "lcase" | "lower" => call("LOWER", args),
            "ucase" | "upper" => call("UPPER", args),
            "ceiling" => call("CEIL", args),
            "log" => call("LN", args),
            "log10" => template("LOG(10, {0})", args),
            "rand" => SqlFragment::from_sql("DBMS_RANDOM.VALUE"),
            "truncate" => call("TRUNC", args),
            "pi" => SqlFragment::from_sql("ACOS(-1)"),
            "left" => template("SUBSTR({0}, 1, {1})", args),
            "concat" => template("({0} || {1})", args),
            "substring" => call("SUBSTR", args),
            "repeat" => template("RPAD({0}, LENGTH({0}) * {1}, {0})", args),
            "curdate" => SqlFragment::from_sql("TRUNC(SYSDATE)"),
            "curtime" | "now" => SqlFragment::from_sql("SYSTIMESTAMP"),
            "year" => extract("YEAR"),
            "month" => extract("MONTH"),
            "dayofmonth" => extract("DAY"),
            "hour" => extract("HOUR"),
            "minute" => extract("MINUTE"),
            "second" => template("FLOOR(EXTRACT(SECOND FROM CAST({0} AS TIMESTAMP)))", args),
            "dayofyear" => template("TO_NUMBER(TO_CHAR({0}, 'DDD'))", args),
            "dayofweek" => template("TO_NUMBER(TO_CHAR({0}, 'D'))", args),
            "quarter" => template("TO_NUMBER(TO_CHAR({0}, 'Q'))", args),
            "week" => template("TO_NUMBER(TO_CHAR({0}, 'WW'))", args),
            "monthname" => template("TRIM(TO_CHAR({0}, 'Month'))", args),
            "ifnull" => call("NVL", args),
            "locate" if args.len() == 3 => template("INSTR({1}, {0}, {2})", args),
            "locate" => template("INSTR({1}, {0})", args),
            other => call(&other.to_uppercase(), args),
        }
    }

    fn timestamp_add(&self, interval: Interval, count: &SqlFragment, ts: &SqlFragment) -> SqlFragment {
        let args = [count.clone(), ts.clone()];
        if let Some(months) = interval.months() {
            return template(&format!("ADD_MONTHS({{1}}, ({{0}}) * {})", months), &args);
        }
        let seconds = interval.seconds().unwrap_or(1.0);
        template(
            &format!("({{1}} + NUMTODSINTERVAL(({{0}}) * {}, 'SECOND'))", seconds),
            &args,
        )
    }

    fn timestamp_diff(&self, interval: Interval, start: &SqlFragment, end: &SqlFragment) -> SqlFragment {
        let args = [start.clone(), end.clone()];
        if let Some(months) = interval.months() {
            return template(
                &format!("TRUNC(MONTHS_BETWEEN({{1}}, {{0}}) / {})", months),
                &args,
            );
        }
        let seconds = interval.seconds().unwrap_or(1.0);
        template(
            &format!(
                "TRUNC((CAST({{1}} AS DATE) - CAST({{0}} AS DATE)) * 86400 / {})",
                seconds
            ),
            &args,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_select_without_from_uses_dual() {
        let d = OracleDialect;
        let sql = d.limit_rows(SelectParts {
            columns: SqlFragment::from_sql("1 AS one"),
            ..SelectParts::default()
        });
        assert_eq!(sql.sql(), "SELECT 1 AS one FROM DUAL");
    }

    #[test]
    fn test_no_recursive_with() {
        assert!(!OracleDialect.supports_recursive_cte());
        assert_eq!(OracleDialect.quote_identifier("_t"), "\"_t\"");
    }
}
