//! Functions expanded into multi-step SQL, and environment constants.

use crate::dialect::{call, template, Dialect, Interval, SqlDialect};
use crate::fragment::SqlFragment;
use crate::types::{JdbcType, Value};

use super::{CallArgs, EnvValue};

/// Operators `json_op` may spell.
pub const JSON_OPERATORS: &[&str] = &[
    "->", "->>", "#>", "#>>", "@>", "<@", "?", "?|", "?&", "||", "-", "#-",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synth {
    Age,
    AgeInYears,
    AgeInMonths,
    Round,
    StartsWith,
    Greatest,
    Least,
    IsEqual,
    IsDistinctFrom,
    IsNotDistinctFrom,
    TimestampAdd,
    TimestampDiff,
    Overlaps,
    SimilarTo,
    JsonOp,
    ParseJson,
    ParseJsonb,
    RegexpLike,
    /// A bare keyword such as `SYSDATE`.
    Keyword,
    /// Another function name.
    Alias(&'static str),
}

impl Synth {
    pub fn render(self, name: &str, c: &CallArgs<'_>) -> Result<SqlFragment, String> {
        let args = &c.args;
        let sql = match self {
            Synth::Age => match c.interval {
                None | Some(Interval::Year) => age_in_years(c),
                Some(Interval::Month) => age_in_months(c),
                Some(other) => {
                    return Err(format!(
                        "AGE only supports SQL_TSI_YEAR and SQL_TSI_MONTH, not {}",
                        other.keyword()
                    ));
                }
            },
            Synth::AgeInYears => age_in_years(c),
            Synth::AgeInMonths => age_in_months(c),
            Synth::Round => round(c),
            Synth::StartsWith => starts_with(c),
            Synth::Greatest | Synth::Least => {
                if c.dialect.supports_greatest_least() {
                    call(&name.to_uppercase(), args)
                } else {
                    c.dialect.greatest_least(name, args)
                }
            }
            Synth::IsEqual => is_equal(args),
            Synth::IsDistinctFrom => {
                if c.dialect.kind() == Dialect::Postgres {
                    template("(({0}) IS DISTINCT FROM ({1}))", args)
                } else {
                    is_equal(args).wrap("NOT (", ")")
                }
            }
            Synth::IsNotDistinctFrom => {
                if c.dialect.kind() == Dialect::Postgres {
                    template("(({0}) IS NOT DISTINCT FROM ({1}))", args)
                } else {
                    is_equal(args)
                }
            }
            Synth::TimestampAdd => {
                let interval = c.interval.ok_or("TIMESTAMPADD requires an interval")?;
                c.dialect.timestamp_add(interval, &c.arg(0), &c.arg(1))
            }
            Synth::TimestampDiff => {
                let interval = c.interval.ok_or("TIMESTAMPDIFF requires an interval")?;
                c.dialect.timestamp_diff(interval, &c.arg(0), &c.arg(1))
            }
            Synth::Overlaps => template("(({0}, {1}) OVERLAPS ({2}, {3}))", args),
            Synth::SimilarTo if args.len() == 3 => {
                template("(({0}) SIMILAR TO ({1}) ESCAPE ({2}))", args)
            }
            Synth::SimilarTo => template("(({0}) SIMILAR TO ({1}))", args),
            Synth::JsonOp => json_op(c)?,
            Synth::ParseJson => template("({0})::json", args),
            Synth::ParseJsonb => template("({0})::jsonb", args),
            Synth::RegexpLike => call("REGEXP_LIKE", args),
            Synth::Keyword => SqlFragment::from_sql(name.to_uppercase()),
            Synth::Alias(native) => call(native, args),
        };
        Ok(sql)
    }
}

/// Year, month and day of both arguments, in the order the AGE templates use.
fn date_parts(c: &CallArgs<'_>) -> Vec<SqlFragment> {
    let (a, b) = (c.arg(0), c.arg(1));
    let part = |f: &str, x: &SqlFragment| c.dialect.jdbc_function(f, std::slice::from_ref(x));
    vec![
        part("year", &a),
        part("year", &b),
        part("month", &a),
        part("month", &b),
        part("dayofmonth", &a),
        part("dayofmonth", &b),
    ]
}

fn age_in_years(c: &CallArgs<'_>) -> SqlFragment {
    template(
        "(CASE WHEN ({2} > {3} OR {2} = {3} AND {4} > {5}) THEN ({1} - {0} - 1) ELSE ({1} - {0}) END)",
        &date_parts(c),
    )
}

fn age_in_months(c: &CallArgs<'_>) -> SqlFragment {
    template(
        "(CASE WHEN ({4} > {5}) THEN (({1} - {0}) * 12 + {3} - {2} - 1) ELSE (({1} - {0}) * 12 + {3} - {2}) END)",
        &date_parts(c),
    )
}

fn round(c: &CallArgs<'_>) -> SqlFragment {
    if c.args.len() < 2 {
        return call("ROUND", &c.args);
    }
    let floating = matches!(
        c.types.first(),
        Some(JdbcType::Real | JdbcType::Double)
    );
    if floating && !c.dialect.supports_round_double() {
        let cast = format!("ROUND(CAST({{0}} AS {}), {{1}})", c.dialect.sql_type_name(JdbcType::Decimal));
        return template(&cast, &c.args);
    }
    call("ROUND", &c.args)
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '!' | '%' | '_') {
            out.push('!');
        }
        out.push(ch);
    }
    out
}

fn starts_with(c: &CallArgs<'_>) -> SqlFragment {
    let pattern = match c.literals.get(1).cloned().flatten() {
        Some(prefix) => SqlFragment::from_sql(format!(
            "'{}%'",
            escape_like(&prefix).replace('\'', "''")
        )),
        None => {
            let escaped = template(
                "REPLACE(REPLACE(REPLACE({0}, '!', '!!'), '%', '!%'), '_', '!_')",
                &[c.arg(1)],
            );
            c.dialect.string_concat(&[
                (escaped, JdbcType::Varchar),
                (SqlFragment::from_sql("'%'"), JdbcType::Varchar),
            ])
        }
    };
    template("(({0}) LIKE {1} ESCAPE '!')", &[c.arg(0), pattern])
}

fn is_equal(args: &[SqlFragment]) -> SqlFragment {
    template("(({0}) = ({1}) OR (({0}) IS NULL AND ({1}) IS NULL))", args)
}

fn json_op(c: &CallArgs<'_>) -> Result<SqlFragment, String> {
    let op = c
        .literals
        .get(1)
        .cloned()
        .flatten()
        .ok_or("JSON_OP requires a string literal operator")?;
    if !JSON_OPERATORS.contains(&op.as_str()) {
        return Err(format!("Unsupported JSON operator: {}", op));
    }
    let operands = [c.arg(0), c.arg(2)];
    // `?` would be read as a bind placeholder
    let sql = match op.as_str() {
        "?" => call("jsonb_exists", &operands),
        "?|" => call("jsonb_exists_any", &operands),
        "?&" => call("jsonb_exists_all", &operands),
        _ => template(&format!("(({{0}}) {} ({{1}}))", op), &operands),
    };
    Ok(sql)
}

fn text_type(dialect: &dyn SqlDialect) -> String {
    match dialect.kind() {
        Dialect::SqlServer => "NVARCHAR(4000)".to_string(),
        _ => dialect.sql_type_name(JdbcType::Varchar).to_string(),
    }
}

fn bound(value: Value, sql_type: &str) -> SqlFragment {
    let mut sql = SqlFragment::from_sql("CAST(");
    sql.append_value(value).append(&format!(" AS {})", sql_type));
    sql
}

fn text_value(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.to_string()))
}

/// Environment methods: the value is resolved now and bound as a parameter.
pub fn environment(e: EnvValue, c: &CallArgs<'_>) -> Result<SqlFragment, String> {
    let env = c.env;
    let text = text_type(c.dialect);
    let sql = match e {
        EnvValue::UserId => bound(
            env.user_id.map_or(Value::Null, Value::Int),
            c.dialect.sql_type_name(JdbcType::Integer),
        ),
        EnvValue::UserName => bound(text_value(env.user_name.as_deref()), &text),
        EnvValue::FolderName => bound(
            text_value(env.container.as_ref().map(|f| f.name.as_str())),
            &text,
        ),
        EnvValue::FolderPath => bound(
            text_value(env.container.as_ref().map(|f| f.path.as_str())),
            &text,
        ),
        EnvValue::ContextPath => bound(Value::String(env.context_path.clone()), &text),
        EnvValue::Version => bound(
            Value::Decimal(env.numeric_version()),
            &format!("{}(15,4)", c.dialect.sql_type_name(JdbcType::Decimal)),
        ),
        EnvValue::ModuleProperty => {
            let (Some(Some(module)), Some(Some(property))) = (c.literals.first(), c.literals.get(1))
            else {
                return Err("MODULEPROPERTY requires string literal arguments".to_string());
            };
            bound(text_value(env.module_property(module, property)), &text)
        }
        EnvValue::IsMemberOf => {
            if env.groups.is_empty() {
                return Ok(SqlFragment::from_sql("(1 = 0)"));
            }
            let mut sql = template("(({0}) IN (", &[c.arg(0)]);
            for (i, group) in env.groups.iter().enumerate() {
                if i > 0 {
                    sql.append(", ");
                }
                sql.append_value(Value::Int(*group));
            }
            sql.append("))");
            sql
        }
    };
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::method::{MethodRegistry, MethodKind};
    use pretty_assertions::assert_eq;

    fn args<'a>(
        dialect: &'a dyn SqlDialect,
        env: &'a Environment,
        args: &[&str],
        literals: Vec<Option<String>>,
    ) -> CallArgs<'a> {
        CallArgs {
            dialect,
            env,
            args: args.iter().map(|a| SqlFragment::from_sql(*a)).collect(),
            types: vec![JdbcType::Timestamp; args.len()],
            literals,
            interval: None,
        }
    }

    #[test]
    fn test_age_expands_to_case() {
        let pg = Dialect::Postgres.generator();
        let env = Environment::default();
        let c = args(pg.as_ref(), &env, &["a", "b"], vec![None, None]);
        let sql = Synth::AgeInYears.render("age_in_years", &c).unwrap();
        assert_eq!(
            sql.sql(),
            "(CASE WHEN (CAST(EXTRACT(MONTH FROM a) AS INTEGER) > CAST(EXTRACT(MONTH FROM b) AS INTEGER) \
             OR CAST(EXTRACT(MONTH FROM a) AS INTEGER) = CAST(EXTRACT(MONTH FROM b) AS INTEGER) \
             AND CAST(EXTRACT(DAY FROM a) AS INTEGER) > CAST(EXTRACT(DAY FROM b) AS INTEGER)) \
             THEN (CAST(EXTRACT(YEAR FROM b) AS INTEGER) - CAST(EXTRACT(YEAR FROM a) AS INTEGER) - 1) \
             ELSE (CAST(EXTRACT(YEAR FROM b) AS INTEGER) - CAST(EXTRACT(YEAR FROM a) AS INTEGER)) END)"
        );

        let mut c = args(pg.as_ref(), &env, &["a", "b"], vec![None, None]);
        c.interval = Some(Interval::Day);
        assert!(Synth::Age.render("age", &c).is_err());
    }

    #[test]
    fn test_starts_with_escapes_literal() {
        let lite = Dialect::Sqlite.generator();
        let env = Environment::default();
        let c = args(
            lite.as_ref(),
            &env,
            &["x", "'50%_'"],
            vec![None, Some("50%_".to_string())],
        );
        let sql = Synth::StartsWith.render("startswith", &c).unwrap();
        assert_eq!(sql.sql(), "((x) LIKE '50!%!_%' ESCAPE '!')");
    }

    #[test]
    fn test_is_distinct_from_fallback() {
        let ms = Dialect::SqlServer.generator();
        let env = Environment::default();
        let c = args(ms.as_ref(), &env, &["a", "b"], vec![None, None]);
        assert_eq!(
            Synth::IsDistinctFrom.render("is_distinct_from", &c).unwrap().sql(),
            "NOT (((a) = (b) OR ((a) IS NULL AND (b) IS NULL)))"
        );
    }

    #[test]
    fn test_json_op() {
        let pg = Dialect::Postgres.generator();
        let env = Environment::default();
        let c = args(pg.as_ref(), &env, &["j", "'->>'", "'k'"], vec![None, Some("->>".into()), Some("k".into())]);
        assert_eq!(Synth::JsonOp.render("json_op", &c).unwrap().sql(), "((j) ->> ('k'))");
        let c = args(pg.as_ref(), &env, &["j", "'?'", "'k'"], vec![None, Some("?".into()), Some("k".into())]);
        assert_eq!(Synth::JsonOp.render("json_op", &c).unwrap().sql(), "jsonb_exists(j, 'k')");
        let c = args(pg.as_ref(), &env, &["j", "';'", "'k'"], vec![None, Some(";".into()), Some("k".into())]);
        assert!(Synth::JsonOp.render("json_op", &c).is_err());
    }

    #[test]
    fn test_environment_values_are_bound() {
        let pg = Dialect::Postgres.generator();
        let mut env = Environment::default()
            .with_user(1001, "ann")
            .with_module_property("core", "color", "blue");
        env.groups = vec![-1, 7];

        let c = args(pg.as_ref(), &env, &[], vec![]);
        let sql = environment(EnvValue::UserId, &c).unwrap();
        assert_eq!(sql.sql(), "CAST(? AS INTEGER)");
        assert_eq!(sql.params(), &[crate::fragment::SqlParam::Value(Value::Int(1001))]);

        let c = args(pg.as_ref(), &env, &["'core'", "'color'"], vec![Some("core".into()), Some("color".into())]);
        let sql = environment(EnvValue::ModuleProperty, &c).unwrap();
        assert_eq!(sql.sql(), "CAST(? AS VARCHAR)");
        assert_eq!(sql.params(), &[crate::fragment::SqlParam::Value(Value::String("blue".into()))]);

        let c = args(pg.as_ref(), &env, &["g.id"], vec![None]);
        let sql = environment(EnvValue::IsMemberOf, &c).unwrap();
        assert_eq!(sql.sql(), "((g.id) IN (?, ?))");
        assert_eq!(sql.params().len(), 2);

        let reg = MethodRegistry::shared();
        let version = reg.lookup("version", Dialect::Postgres).unwrap();
        assert_eq!(version.kind, MethodKind::Environment(EnvValue::Version));
        let sql = version.render(&args(pg.as_ref(), &env, &[], vec![])).unwrap();
        assert_eq!(sql.sql(), "CAST(? AS NUMERIC(15,4))");
    }

    #[test]
    fn test_round_double_on_postgres() {
        let pg = Dialect::Postgres.generator();
        let env = Environment::default();
        let mut c = args(pg.as_ref(), &env, &["x", "2"], vec![None, None]);
        c.types = vec![JdbcType::Double, JdbcType::Integer];
        assert_eq!(Synth::Round.render("round", &c).unwrap().sql(), "ROUND(CAST(x AS NUMERIC), 2)");
        c.types = vec![JdbcType::Decimal, JdbcType::Integer];
        assert_eq!(Synth::Round.render("round", &c).unwrap().sql(), "ROUND(x, 2)");
    }
}
