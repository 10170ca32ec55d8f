//! PIVOT over catalog tables.

mod common;

use std::sync::{Arc, Mutex};

use common::{compile, context, errors};
use lksql::prelude::*;
use pretty_assertions::assert_eq;

fn names(c: &CompiledQuery) -> Vec<String> {
    c.columns.iter().map(|c| c.name.clone()).collect()
}

#[test]
fn test_explicit_values() {
    let c = compile(
        "SELECT month, day, COUNT(*) AS n FROM R GROUP BY month, day \
         PIVOT n BY day IN ('Monday' AS mon, 'Tuesday')",
    );
    assert_eq!(names(&c), ["month", "n", "mon::n", "Tuesday::n"]);
    assert!(c.sql().contains("MAX(CASE WHEN"), "{}", c.sql());
}

#[test]
fn test_discovered_values_cover_every_distinct_value() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let source = move |sql: &str, _: &[Value]| -> Result<Vec<Value>, PivotSourceError> {
        log.lock().unwrap().push(sql.to_string());
        Ok(vec![Value::Int(0), Value::Int(3), Value::Int(6)])
    };
    let ctx = context(Dialect::Postgres).with_pivot_source(Arc::new(source));
    let mut q = Query::new(
        ctx,
        None,
        "SELECT twelve, seven, SUM(d) AS total FROM R GROUP BY twelve, seven PIVOT total BY seven",
    );
    let c = q.compile().unwrap();
    assert_eq!(names(&c), ["twelve", "total", "0::total", "3::total", "6::total"]);

    let queries = seen.lock().unwrap();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].starts_with("SELECT DISTINCT"), "{}", queries[0]);
}

#[test]
fn test_missing_source_is_an_error() {
    let errs = errors("SELECT seven, COUNT(*) AS n FROM R GROUP BY seven PIVOT n BY seven");
    assert_eq!(
        errs[0],
        "PIVOT values cannot be computed without a data source; list them with IN (...)"
    );
}

#[test]
fn test_pivot_column_must_be_grouped() {
    let errs = errors(
        "SELECT month, MAX(day) AS day, COUNT(*) AS n FROM R GROUP BY month PIVOT n BY day IN ('x')",
    );
    assert_eq!(errs[0], "PIVOT column day must appear in the GROUP BY");
}
