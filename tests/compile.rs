//! End-to-end compilation against the fixture catalog.

mod common;

use std::collections::{HashMap, HashSet};

use common::{compile, compile_with, context, errors};
use lksql::prelude::*;
use pretty_assertions::assert_eq;

fn names(c: &CompiledQuery) -> Vec<&str> {
    c.columns.iter().map(|c| c.name.as_str()).collect()
}

#[test]
fn test_ambiguous_unqualified_column() {
    let errs = errors("SELECT d FROM R A INNER JOIN R B ON 1=1");
    assert!(errs.contains(&"Ambiguous field: d".to_string()), "{:?}", errs);

    let ok = compile("SELECT A.d, B.d FROM R A, R B");
    assert_eq!(names(&ok), ["d", "d_1"]);
}

#[test]
fn test_join_conditions_see_both_sides() {
    let c = compile("SELECT A.d FROM R A INNER JOIN R B ON A.d = B.d");
    assert_eq!(names(&c), ["d"]);
    assert!(c.sql().contains("INNER JOIN"), "{}", c.sql());
    assert!(c.sql().contains(" ON "), "{}", c.sql());

    let c = compile("SELECT r.d, s.seven FROM R r LEFT JOIN S s ON r.d = s.d AND s.seven > 2");
    assert_eq!(names(&c), ["d", "seven"]);
    assert!(c.sql().contains("LEFT OUTER JOIN"), "{}", c.sql());
}

#[test]
fn test_selected_columns_are_all_emitted() {
    let c = compile("SELECT rowid, d, seven FROM R");
    assert_eq!(names(&c), ["rowid", "d", "seven"]);
    assert!(c.sql().contains("seven"), "{}", c.sql());

    let c = compile("SELECT day, twelve FROM R WHERE d > 1");
    assert_eq!(names(&c), ["day", "twelve"]);
}

#[test]
fn test_decimal_literal_at_end_of_query() {
    let c = compile("SELECT d FROM R WHERE d = 2.5");
    assert!(c.sql().contains("= 2.5"), "{}", c.sql());
}

#[test]
fn test_exists_subquery() {
    let c = compile("SELECT d FROM R WHERE EXISTS (SELECT S.seven FROM S WHERE S.d > 3)");
    assert!(c.sql().contains("EXISTS ("), "{}", c.sql());

    let errs = errors("SELECT d FROM R WHERE EXISTS (SELECT nosuch FROM S)");
    assert!(errs.contains(&"Unknown field [nosuch]".to_string()), "{:?}", errs);
}

#[test]
fn test_union_column_count() {
    let ok = compile("SELECT d FROM R UNION SELECT seven FROM S");
    assert_eq!(names(&ok), ["d"]);
    assert!(ok.sql().contains("\nUNION\n"));

    let errs = errors("SELECT d FROM R UNION SELECT seven, d FROM S");
    assert!(errs.contains(&"Queries in a UNION must have the same number of columns".to_string()));
}

#[test]
fn test_unreferenced_columns_are_omitted() {
    let c = compile("SELECT x.d FROM (SELECT d, seven, twelve FROM R) x");
    assert!(!c.sql().contains("seven"), "{}", c.sql());
    assert!(!c.sql().contains("twelve"), "{}", c.sql());

    // ORDER BY keeps its column alive in a limited subquery
    let c = compile("SELECT x.d FROM (SELECT d, seven FROM R ORDER BY seven LIMIT 3) x");
    assert!(c.sql().contains("seven"), "{}", c.sql());
}

#[test]
fn test_generation_is_deterministic() {
    let sql = "WITH w AS (SELECT d, seven FROM R WHERE d > 1) \
               SELECT a.d, b.seven FROM w a INNER JOIN w b ON a.d = b.seven ORDER BY a.d";
    let mut q = Query::new(context(Dialect::Postgres), None, sql);
    let first = q.compile().unwrap();
    let second = q.compile().unwrap();
    assert_eq!(first.sql(), second.sql());
    assert_eq!(first.sql().matches("WITH").count(), 1);
}

#[test]
fn test_output_aliases_are_unique() {
    let c = compile("SELECT d, d, seven AS d, twelve AS \"select\" FROM R");
    let aliases: HashSet<&str> = c.columns.iter().map(|c| c.alias.as_str()).collect();
    assert_eq!(aliases.len(), c.columns.len());
}

#[test]
fn test_parenthesized_operands() {
    let c = compile("SELECT 1 - (2 - 3) AS a, (d + 1) * 2 AS b, d + seven * 2 AS c FROM R");
    assert!(c.sql().contains("1 - (2 - 3)"), "{}", c.sql());
    assert!(c.sql().contains(".d + 1) * 2"), "{}", c.sql());
    assert!(!c.sql().contains("(R.seven * 2)"), "{}", c.sql());
}

#[test]
fn test_order_by_with_limit_is_kept() {
    let c = compile("SELECT d FROM R ORDER BY d LIMIT 5");
    assert!(c.sql().contains("ORDER BY"));
    assert!(c.sql().ends_with("LIMIT 5"), "{}", c.sql());

    let ctx = context(Dialect::SqlServer);
    let c = compile_with(ctx, "SELECT x.d FROM (SELECT d FROM R ORDER BY d LIMIT 5) x");
    assert!(c.sql().contains("ORDER BY"), "{}", c.sql());
    assert!(c.warnings.is_empty());
}

#[test]
fn test_unlimited_nested_order_by_is_dropped_with_warning() {
    let ctx = context(Dialect::SqlServer);
    let c = compile_with(ctx, "SELECT x.d FROM (SELECT d FROM R ORDER BY d) x");
    assert!(!c.sql().contains("ORDER BY"), "{}", c.sql());
    assert_eq!(
        c.warnings[0].message,
        "ORDER BY without LIMIT is not supported in a subquery by sqlserver and was ignored"
    );

    let c = compile("SELECT x.d FROM (SELECT d FROM R ORDER BY d) x");
    assert!(c.sql().contains("ORDER BY"), "{}", c.sql());
}

#[test]
fn test_having_needs_an_aggregate() {
    let errs = errors("SELECT d FROM R HAVING d > 1");
    assert_eq!(errs[0], "HAVING requires an aggregate in the select list");

    let errs = errors("SELECT seven FROM R GROUP BY seven HAVING seven > 1");
    assert_eq!(errs[0], "HAVING requires an aggregate in the select list");

    compile("SELECT seven, COUNT(*) AS n FROM R GROUP BY seven HAVING COUNT(*) > 1");
}

#[test]
fn test_lookup_through_foreign_key() {
    let c = compile("SELECT d, createdby.displayname AS who FROM R");
    assert!(c.sql().contains("LEFT OUTER JOIN"), "{}", c.sql());
    assert!(c.sql().contains("core.users"), "{}", c.sql());
    assert!(c.resolved_tables.contains(&"core.users".to_string()));
    assert_eq!(names(&c), ["d", "who"]);
    assert_eq!(c.max_phi(), PhiLevel::NotPhi);

    let c = compile("SELECT createdby.email FROM R");
    assert_eq!(c.columns[0].phi, PhiLevel::Phi);
    assert_eq!(c.max_phi(), PhiLevel::Phi);

    let errs = errors("SELECT d.nosuch FROM R");
    assert_eq!(errs[0], "Unknown field [d.nosuch]");
}

#[test]
fn test_container_filter() {
    let env = Environment::default().with_container("c1", "/home/lab");
    let ctx = context(Dialect::Postgres)
        .with_environment(env.clone())
        .with_container_filter(ContainerFilter::Current);
    let c = compile_with(ctx, "SELECT d FROM R");
    assert!(c.sql().contains("container IN (?)"), "{}", c.sql());
    assert_eq!(c.params(), [SqlParam::Value(Value::String("c1".into()))]);

    let ctx = context(Dialect::Postgres)
        .with_environment(env)
        .with_container_filter(ContainerFilter::Current);
    let c = compile_with(ctx, "SELECT d FROM R [ContainerFilter='AllFolders']");
    assert!(c.params().is_empty(), "{}", c.sql());
}

#[test]
fn test_changing_the_filter_regenerates_with_bodies() {
    let mut env = Environment::default().with_container("c1", "/home/lab");
    env.subfolders = vec!["c2".into()];
    let ctx = context(Dialect::Postgres)
        .with_environment(env)
        .with_container_filter(ContainerFilter::Current);
    let mut q = Query::new(ctx, None, "WITH w AS (SELECT d FROM R) SELECT d FROM w");
    assert_eq!(q.compile().unwrap().params().len(), 1);
    q.set_container_filter(Some(ContainerFilter::CurrentAndSubfolders));
    assert_eq!(q.compile().unwrap().params().len(), 2);
}

#[test]
fn test_parameters_and_defaults() {
    let c = compile("PARAMETERS (lo INTEGER DEFAULT 3, who VARCHAR) SELECT d FROM R WHERE d > lo AND day = who");
    assert_eq!(c.parameters.len(), 2);
    let err = c.bind_parameters(&HashMap::new()).unwrap_err();
    assert!(matches!(err, LkError::MissingParameter(ref p) if p == "who"));
    let values = HashMap::from([("WHO".to_string(), Value::String("Monday".into()))]);
    assert_eq!(
        c.bind_parameters(&values).unwrap(),
        [Value::Int(3), Value::String("Monday".into())]
    );
}

#[test]
fn test_environment_values_are_bound() {
    let env = Environment::default().with_user(1001, "dev@example.com");
    let ctx = context(Dialect::Postgres).with_environment(env);
    let c = compile_with(ctx, "SELECT d FROM R WHERE createdby = USERID()");
    assert!(c.params().contains(&SqlParam::Value(Value::Int(1001))));
    assert!(!c.sql().contains("1001"));
}

#[test]
fn test_dialect_function_tables() {
    let errs = errors("SELECT charindex('a', day) AS n FROM R");
    assert!(errs[0].starts_with("Unknown method: charindex"), "{:?}", errs);
    compile_with(context(Dialect::SqlServer), "SELECT charindex('a', day) AS n FROM R");
    compile("SELECT split_part(day, 'a', 1) AS p FROM R");
}

#[test]
fn test_scalar_subquery_has_one_column() {
    let errs = errors("SELECT (SELECT d, seven FROM S) AS x FROM R");
    assert!(errs.contains(&"Subquery can have only one column.".to_string()));
    let c = compile("SELECT d, (SELECT MAX(S.d) FROM S) AS top FROM R");
    assert_eq!(names(&c), ["d", "top"]);
}

#[test]
fn test_recursive_with() {
    let sql = "WITH t AS (SELECT 1 AS n UNION ALL SELECT n + 1 FROM t WHERE n < 5) SELECT n FROM t";
    let c = compile(sql);
    assert!(c.sql().starts_with("WITH RECURSIVE"), "{}", c.sql());

    let mut q = Query::new(context(Dialect::Oracle), None, sql);
    assert!(matches!(q.compile(), Err(LkError::Invalid(_))));
}

#[test]
fn test_duplicate_columns_can_be_rejected() {
    let c = compile("SELECT d, seven, d, seven FROM R");
    assert_eq!(names(&c), ["d", "seven", "d_1", "seven_1"]);

    let q = Query::new(
        context(Dialect::Postgres).allow_duplicate_columns(false),
        None,
        "SELECT d, seven, d FROM R",
    );
    assert_eq!(q.diagnostics().errors[0].message, "Duplicate column 'd'");
}

#[test]
fn test_syntax_errors_are_diagnostics() {
    let q = Query::new(context(Dialect::Postgres), Some("broken"), "SELECT d FROM R WHERE");
    let diags = q.diagnostics();
    assert!(diags.errors[0].message.starts_with("Syntax error"));
    assert_eq!(diags.errors[0].query_name.as_deref(), Some("broken"));
}
