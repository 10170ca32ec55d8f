//! Compiled queries executed against an in-memory SQLite database.

use std::collections::HashMap;
use std::sync::Arc;

use lksql::prelude::*;
use pretty_assertions::assert_eq;
use tokio::runtime::Handle;

fn context() -> QueryContext {
    let lab = MemorySchema::new("lab").with_table(
        TableDescriptor::new("Measurements", "measurements")
            .column(ColumnDescriptor::new("k", JdbcType::Integer))
            .column(ColumnDescriptor::new("grp", JdbcType::Varchar))
            .column(ColumnDescriptor::new("val", JdbcType::Integer))
            .key(&["k"]),
    );
    QueryContext::new(Arc::new(MemorySchema::new("").with_schema(lab)), Dialect::Sqlite)
        .with_current_schema(FieldKey::from_name("lab"))
}

async fn seeded() -> LkDb {
    let db = LkDb::connect("sqlite::memory:").await.unwrap();
    db.execute("CREATE TABLE measurements (k INTEGER, grp TEXT, val INTEGER)")
        .await
        .unwrap();
    db.execute("INSERT INTO measurements VALUES (1, 'a', 10), (2, 'a', 20), (3, 'b', 5), (4, 'c', 7)")
        .await
        .unwrap();
    db
}

fn get<'a>(row: &'a HashMap<String, serde_json::Value>, name: &str) -> &'a serde_json::Value {
    row.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
        .unwrap_or(&serde_json::Value::Null)
}

#[tokio::test]
async fn test_parameterized_query() {
    let db = seeded().await;
    let compiled = lksql::compile(
        context(),
        "PARAMETERS (lo INTEGER DEFAULT 6) SELECT k, val FROM Measurements WHERE val > lo ORDER BY k",
    )
    .unwrap();

    let rows = db.fetch_all(&compiled, &HashMap::new()).await.unwrap();
    let keys: Vec<&serde_json::Value> = rows.iter().map(|r| get(r, "k")).collect();
    assert_eq!(keys, [&serde_json::json!(1), &serde_json::json!(2), &serde_json::json!(4)]);

    let values = HashMap::from([("lo".to_string(), Value::Int(15))]);
    let rows = db.fetch_all(&compiled, &values).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(get(&rows[0], "val"), &serde_json::json!(20));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pivot_values_come_from_the_database() {
    let db = seeded().await;
    let ctx = context().with_pivot_source(Arc::new(db.value_source(Handle::current())));
    let compiled = tokio::task::spawn_blocking(move || {
        lksql::compile(
            ctx,
            "SELECT k, grp, SUM(val) AS total FROM Measurements GROUP BY k, grp PIVOT total BY grp",
        )
    })
    .await
    .unwrap()
    .unwrap();

    let names: Vec<&str> = compiled.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["k", "total", "a::total", "b::total", "c::total"]);

    let rows = db.fetch_all(&compiled, &HashMap::new()).await.unwrap();
    assert_eq!(rows.len(), 4);
}
