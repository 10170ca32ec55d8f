//! Aggregate functions and their per-dialect spelling.

use crate::dialect::{call, join_fragments, Dialect};
use crate::fragment::SqlFragment;
use crate::types::JdbcType;

use super::ResultType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateInfo {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub result: ResultType,
    pub postgres_only: bool,
}

/// How a pivot summarizes an aggregate across all pivot values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollup {
    Sum,
    Min,
    Max,
    /// Illegal in a pivot summary column.
    Reject,
    /// No meaningful summary; the column is NULL.
    Null,
}

const fn agg(name: &'static str, min_args: usize, max_args: usize, result: ResultType) -> AggregateInfo {
    AggregateInfo {
        name,
        min_args,
        max_args,
        result,
        postgres_only: false,
    }
}

const fn pg(name: &'static str, min_args: usize, max_args: usize, result: ResultType) -> AggregateInfo {
    AggregateInfo {
        name,
        min_args,
        max_args,
        result,
        postgres_only: true,
    }
}

const DOUBLE: ResultType = ResultType::Fixed(JdbcType::Double);

static AGGREGATES: &[AggregateInfo] = &[
    agg("count", 1, 1, ResultType::Fixed(JdbcType::BigInt)),
    agg("sum", 1, 1, ResultType::FirstArg),
    agg("min", 1, 1, ResultType::FirstArg),
    agg("max", 1, 1, ResultType::FirstArg),
    agg("avg", 1, 1, DOUBLE),
    agg("stddev", 1, 1, DOUBLE),
    agg("stddev_pop", 1, 1, DOUBLE),
    agg("stddev_samp", 1, 1, DOUBLE),
    agg("variance", 1, 1, DOUBLE),
    agg("var_pop", 1, 1, DOUBLE),
    agg("var_samp", 1, 1, DOUBLE),
    agg("median", 1, 1, DOUBLE),
    agg("group_concat", 1, 2, ResultType::Fixed(JdbcType::Varchar)),
    pg("bool_and", 1, 1, ResultType::Fixed(JdbcType::Boolean)),
    pg("bool_or", 1, 1, ResultType::Fixed(JdbcType::Boolean)),
    pg("every", 1, 1, ResultType::Fixed(JdbcType::Boolean)),
    pg("bit_and", 1, 1, ResultType::FirstArg),
    pg("bit_or", 1, 1, ResultType::FirstArg),
    pg("mode", 1, 1, ResultType::FirstArg),
    pg("corr", 2, 2, DOUBLE),
    pg("covar_pop", 2, 2, DOUBLE),
    pg("covar_samp", 2, 2, DOUBLE),
    pg("regr_avgx", 2, 2, DOUBLE),
    pg("regr_avgy", 2, 2, DOUBLE),
    pg("regr_count", 2, 2, ResultType::Fixed(JdbcType::BigInt)),
    pg("regr_intercept", 2, 2, DOUBLE),
    pg("regr_r2", 2, 2, DOUBLE),
    pg("regr_slope", 2, 2, DOUBLE),
    pg("regr_sxx", 2, 2, DOUBLE),
    pg("regr_sxy", 2, 2, DOUBLE),
    pg("regr_syy", 2, 2, DOUBLE),
];

pub fn lookup(name: &str) -> Option<&'static AggregateInfo> {
    AGGREGATES.iter().find(|a| a.name.eq_ignore_ascii_case(name))
}

pub fn is_aggregate(name: &str) -> bool {
    lookup(name).is_some()
}

/// Aggregate names usable with a dialect.
pub fn names(dialect: Dialect) -> impl Iterator<Item = &'static str> {
    AGGREGATES
        .iter()
        .filter(move |a| !a.postgres_only || dialect == Dialect::Postgres)
        .map(|a| a.name)
}

impl AggregateInfo {
    pub fn rollup(&self) -> Rollup {
        match self.name {
            "count" | "sum" => Rollup::Sum,
            "min" => Rollup::Min,
            "max" => Rollup::Max,
            "avg" | "stddev" | "stddev_pop" | "stddev_samp" | "group_concat" => Rollup::Reject,
            _ => Rollup::Null,
        }
    }

    /// Native SQL for the aggregate, or `None` when the dialect cannot express it.
    pub fn render(
        &self,
        dialect: Dialect,
        distinct: bool,
        star: bool,
        args: &[SqlFragment],
    ) -> Option<SqlFragment> {
        if self.postgres_only && dialect != Dialect::Postgres {
            return None;
        }
        if star {
            return (self.name == "count").then(|| SqlFragment::from_sql("COUNT(*)"));
        }
        let first = args.first().cloned().unwrap_or_default();
        match self.name {
            "median" => {
                return match dialect {
                    Dialect::Postgres if !distinct => Some(first.wrap(
                        "PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY ",
                        ")",
                    )),
                    Dialect::Oracle => Some(plain("MEDIAN", distinct, args)),
                    _ => None,
                };
            }
            "mode" => {
                return Some(first.wrap("MODE() WITHIN GROUP (ORDER BY ", ")"));
            }
            "group_concat" => return group_concat(dialect, distinct, args),
            _ => {}
        }
        let native = match (dialect, self.name) {
            (Dialect::SqlServer, "stddev" | "stddev_samp") => "STDEV",
            (Dialect::SqlServer, "stddev_pop") => "STDEVP",
            (Dialect::SqlServer, "variance" | "var_samp") => "VAR",
            (Dialect::SqlServer, "var_pop") => "VARP",
            (
                Dialect::Sqlite,
                "stddev" | "stddev_pop" | "stddev_samp" | "variance" | "var_pop" | "var_samp",
            ) => return None,
            (_, name) => return Some(plain(&name.to_uppercase(), distinct, args)),
        };
        Some(plain(native, distinct, args))
    }
}

fn plain(name: &str, distinct: bool, args: &[SqlFragment]) -> SqlFragment {
    if !distinct {
        return call(name, args);
    }
    let mut sql = SqlFragment::from_sql(format!("{}(DISTINCT ", name));
    sql.append_fragment(&join_fragments(args.iter(), ", "))
        .append(")");
    sql
}

fn group_concat(dialect: Dialect, distinct: bool, args: &[SqlFragment]) -> Option<SqlFragment> {
    let value = args.first().cloned().unwrap_or_default();
    let separator = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| SqlFragment::from_sql("','"));
    let keyword = if distinct { "DISTINCT " } else { "" };
    let mut sql = SqlFragment::new();
    match dialect {
        Dialect::Postgres => {
            sql.append(&format!("ARRAY_TO_STRING(ARRAY_AGG({}", keyword))
                .append_fragment(&value)
                .append("), ")
                .append_fragment(&separator)
                .append(")");
        }
        Dialect::SqlServer => {
            if distinct {
                return None;
            }
            sql.append("STRING_AGG(CAST(")
                .append_fragment(&value)
                .append(" AS NVARCHAR(MAX)), ")
                .append_fragment(&separator)
                .append(")");
        }
        Dialect::Oracle => {
            sql.append(&format!("LISTAGG({}", keyword))
                .append_fragment(&value)
                .append(", ")
                .append_fragment(&separator)
                .append(") WITHIN GROUP (ORDER BY ")
                .append_fragment(&value)
                .append(")");
        }
        Dialect::Sqlite => {
            if distinct && args.len() > 1 {
                return None;
            }
            sql.append(&format!("GROUP_CONCAT({}", keyword))
                .append_fragment(&value);
            if !distinct {
                sql.append(", ").append_fragment(&separator);
            }
            sql.append(")");
        }
    }
    Some(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn x() -> Vec<SqlFragment> {
        vec![SqlFragment::from_sql("x")]
    }

    #[test]
    fn test_count_forms() {
        let count = lookup("COUNT").unwrap();
        assert_eq!(
            count.render(Dialect::Postgres, false, true, &[]).unwrap().sql(),
            "COUNT(*)"
        );
        assert_eq!(
            count.render(Dialect::Oracle, true, false, &x()).unwrap().sql(),
            "COUNT(DISTINCT x)"
        );
    }

    #[test]
    fn test_dialect_spellings() {
        let stddev = lookup("stddev").unwrap();
        assert_eq!(stddev.render(Dialect::SqlServer, false, false, &x()).unwrap().sql(), "STDEV(x)");
        assert!(stddev.render(Dialect::Sqlite, false, false, &x()).is_none());

        let median = lookup("median").unwrap();
        assert_eq!(
            median.render(Dialect::Postgres, false, false, &x()).unwrap().sql(),
            "PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY x)"
        );
        assert!(median.render(Dialect::SqlServer, false, false, &x()).is_none());

        assert!(lookup("bool_and").unwrap().render(Dialect::Oracle, false, false, &x()).is_none());
    }

    #[test]
    fn test_group_concat() {
        let gc = lookup("group_concat").unwrap();
        assert_eq!(
            gc.render(Dialect::Postgres, false, false, &x()).unwrap().sql(),
            "ARRAY_TO_STRING(ARRAY_AGG(x), ',')"
        );
        assert_eq!(
            gc.render(Dialect::Oracle, false, false, &x()).unwrap().sql(),
            "LISTAGG(x, ',') WITHIN GROUP (ORDER BY x)"
        );
        assert_eq!(
            gc.render(Dialect::Sqlite, true, false, &x()).unwrap().sql(),
            "GROUP_CONCAT(DISTINCT x)"
        );
    }

    #[test]
    fn test_rollup() {
        assert_eq!(lookup("count").unwrap().rollup(), Rollup::Sum);
        assert_eq!(lookup("max").unwrap().rollup(), Rollup::Max);
        assert_eq!(lookup("avg").unwrap().rollup(), Rollup::Reject);
        assert_eq!(lookup("median").unwrap().rollup(), Rollup::Null);
        assert!(is_aggregate("Group_Concat"));
        assert!(!is_aggregate("abs"));
    }
}
