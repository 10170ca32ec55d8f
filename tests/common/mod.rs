//! Shared fixture catalog for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use lksql::prelude::*;

/// Two list tables with the same shape, the users table their `createdby`
/// columns point at, and a few saved queries over them.
pub const CATALOG: &str = r#"
[[schema]]
name = "core"

[[schema.table]]
name = "users"
primary_key = ["userid"]

[[schema.table.column]]
name = "userid"
type = "INTEGER"

[[schema.table.column]]
name = "displayname"
type = "VARCHAR"

[[schema.table.column]]
name = "email"
type = "VARCHAR"
phi = "phi"

[[schema]]
name = "lists"

[[schema.table]]
name = "R"
primary_key = ["rowid"]
container_column = "container"

[[schema.table.column]]
name = "rowid"
type = "INTEGER"

[[schema.table.column]]
name = "d"
type = "INTEGER"

[[schema.table.column]]
name = "seven"
type = "INTEGER"

[[schema.table.column]]
name = "twelve"
type = "INTEGER"

[[schema.table.column]]
name = "day"
type = "VARCHAR"

[[schema.table.column]]
name = "month"
type = "VARCHAR"

[[schema.table.column]]
name = "date"
type = "TIMESTAMP"

[[schema.table.column]]
name = "duration"
type = "INTEGER"

[[schema.table.column]]
name = "guid"
type = "GUID"

[[schema.table.column]]
name = "created"
type = "TIMESTAMP"

[[schema.table.column]]
name = "createdby"
type = "INTEGER"
fk = { schema = "core", table = "users", column = "userid" }

[[schema.table.column]]
name = "container"
type = "VARCHAR"
hidden = true

[[schema.table]]
name = "S"
primary_key = ["rowid"]

[[schema.table.column]]
name = "rowid"
type = "INTEGER"

[[schema.table.column]]
name = "d"
type = "INTEGER"

[[schema.table.column]]
name = "seven"
type = "INTEGER"

[[schema.table.column]]
name = "twelve"
type = "INTEGER"

[[schema.table.column]]
name = "day"
type = "VARCHAR"

[[schema.table.column]]
name = "month"
type = "VARCHAR"

[[schema.table.column]]
name = "date"
type = "TIMESTAMP"

[[schema.table.column]]
name = "duration"
type = "INTEGER"

[[schema.table.column]]
name = "guid"
type = "GUID"

[[schema.table.column]]
name = "created"
type = "TIMESTAMP"

[[schema.table.column]]
name = "createdby"
type = "INTEGER"
fk = { schema = "core", table = "users", column = "userid" }

[[schema.query]]
name = "Rsimple"
sql = "SELECT rowid, d, seven, createdby FROM R WHERE d > 0"

[[schema.query]]
name = "Rgrouped"
sql = "SELECT seven, COUNT(*) AS n FROM R GROUP BY seven"

[[schema.query]]
name = "Rquery"
sql = "SELECT rowid, d, duration FROM R"

[[schema.query.column]]
name = "rowid"
fk = { schema = "lists", table = "S", column = "rowid" }

[[schema.query]]
name = "Rbroken"
sql = "SELECT nosuch FROM R"

[[schema.query]]
name = "Rparam"
sql = "PARAMETERS (lo INTEGER DEFAULT 1) SELECT d FROM R WHERE d >= lo"

[[schema.query]]
name = "Rself"
sql = "SELECT a.d FROM Rself a"

[[schema.query]]
name = "Ping"
sql = "SELECT d FROM Pong"

[[schema.query]]
name = "Pong"
sql = "SELECT seven AS d FROM Ping GROUP BY seven"
"#;

pub fn catalog() -> MemorySchema {
    MemorySchema::from_toml(CATALOG).expect("fixture catalog parses")
}

pub fn context(dialect: Dialect) -> QueryContext {
    QueryContext::new(Arc::new(catalog()), dialect)
        .with_current_schema(FieldKey::from_name("lists"))
}

pub fn compile(sql: &str) -> CompiledQuery {
    compile_with(context(Dialect::Postgres), sql)
}

pub fn compile_with(ctx: QueryContext, sql: &str) -> CompiledQuery {
    match Query::new(ctx, None, sql).compile() {
        Ok(c) => c,
        Err(e) => panic!("{} failed to compile: {}", sql, e),
    }
}

/// Error messages of a query that must not compile.
pub fn errors(sql: &str) -> Vec<String> {
    Query::new(context(Dialect::Postgres), None, sql)
        .diagnostics()
        .errors
        .into_iter()
        .map(|e| e.message)
        .collect()
}
