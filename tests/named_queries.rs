//! Saved queries referenced from FROM clauses and lookups.

mod common;

use std::collections::HashMap;

use common::{compile, compile_with, context, errors};
use lksql::prelude::*;
use pretty_assertions::assert_eq;

#[test]
fn test_simple_query_is_inlined() {
    let c = compile("SELECT d FROM Rsimple WHERE seven = 1");
    assert_eq!(c.sql().matches("SELECT").count(), 2, "{}", c.sql());
    assert!(c.sql().contains("FROM lists.r"), "{}", c.sql());
    assert_eq!(c.resolved_tables, ["lists.Rsimple", "lists.R"]);
}

#[test]
fn test_grouped_query_stays_a_subquery() {
    let c = compile("SELECT n FROM Rgrouped WHERE seven > 2");
    assert!(c.sql().contains("GROUP BY"), "{}", c.sql());
    assert!(c.sql().matches("SELECT").count() >= 2, "{}", c.sql());
}

#[test]
fn test_column_metadata_adds_lookup() {
    let c = compile("SELECT rowid.twelve AS t FROM Rquery");
    assert!(c.sql().contains("LEFT OUTER JOIN"), "{}", c.sql());
    assert!(c.sql().contains("lists.s"), "{}", c.sql());
    assert!(c.resolved_tables.contains(&"lists.S".to_string()));
}

#[test]
fn test_nested_errors_point_at_the_reference() {
    let q = Query::new(context(Dialect::Postgres), None, "SELECT d\nFROM Rbroken");
    let errs = q.diagnostics().errors;
    assert_eq!(errs[0].message, "Query 'Rbroken' has errors");
    assert_eq!((errs[0].line, errs[0].column), (2, 5));
    let cause = errs[0].cause.as_deref().expect("nested cause");
    assert_eq!(cause.message, "Unknown field [nosuch]");
    assert_eq!(cause.query_name.as_deref(), Some("Rbroken"));
    assert!(
        errs.iter().all(|e| e.message != "Unknown field [d]"),
        "{:?}",
        errs
    );

    let mut q = Query::new(context(Dialect::Postgres), None, "SELECT d FROM Rbroken");
    assert!(matches!(q.compile(), Err(LkError::Invalid(_))));
}

#[test]
fn test_recursive_queries_are_stopped() {
    for sql in ["SELECT d FROM Rself", "SELECT d FROM Ping"] {
        let q = Query::new(context(Dialect::Postgres), None, sql);
        let diags = q.diagnostics();
        assert!(diags.has_errors(), "{}", sql);
        let mut e = &diags.errors[0];
        while let Some(cause) = e.cause.as_deref() {
            e = cause;
        }
        assert!(e.message.contains("recursive?"), "{}: {}", sql, e.message);
    }
}

#[test]
fn test_table_limit() {
    let ctx = context(Dialect::Postgres).with_limits(3, 20);
    let q = Query::new(ctx, None, "SELECT a.d FROM R a, S b, R c, S d2, Rsimple e");
    assert!(q
        .diagnostics()
        .errors
        .iter()
        .any(|e| e.message == "Too many tables used in this query (query may be recursive?)"));
}

#[test]
fn test_parameters_are_merged_from_nested_queries() {
    let c = compile("SELECT d FROM Rparam");
    assert_eq!(c.parameters.len(), 1);
    assert_eq!(c.parameters[0].name, "lo");
    assert_eq!(c.parameters[0].default, Some(Value::Int(1)));
    assert_eq!(c.bind_parameters(&HashMap::new()).unwrap(), [Value::Int(1)]);

    let c = compile("PARAMETERS (LO INTEGER) SELECT d FROM Rparam WHERE d < LO");
    assert_eq!(c.parameters.len(), 1);

    let errs = errors("PARAMETERS (lo VARCHAR) SELECT d FROM Rparam");
    assert!(
        errs.iter().any(|e| e.contains("declared as both")),
        "{:?}",
        errs
    );
}

#[test]
fn test_unknown_tables_and_schemas() {
    assert_eq!(errors("SELECT * FROM nosuch")[0], "Table or query not found: nosuch");
    assert_eq!(errors("SELECT * FROM other.R")[0], "Unknown schema: other");
}

#[test]
fn test_denied_tables_fail_authorization() {
    let denied = common::CATALOG.replace("name = \"lists\"\n", "name = \"lists\"\ndenied = [\"S\"]\n");
    let schema = MemorySchema::from_toml(&denied).unwrap();
    let ctx = QueryContext::new(std::sync::Arc::new(schema), Dialect::Postgres)
        .with_current_schema(FieldKey::from_name("lists"));
    let mut q = Query::new(ctx, None, "SELECT d FROM R WHERE d IN (SELECT d FROM S)");
    assert!(matches!(q.compile(), Err(LkError::Unauthorized(_))));
}

#[test]
fn test_qualified_names_resolve_from_the_root() {
    let c = compile_with(
        context(Dialect::Postgres).with_current_schema(FieldKey::from_name("core")),
        "SELECT u.displayname, r.d FROM users u INNER JOIN lists.R r ON r.createdby = u.userid",
    );
    assert_eq!(c.resolved_tables, ["core.users", "lists.R"]);
}
