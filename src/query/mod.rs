//! Query driver.
//!
//! A [`Query`] owns one [`Binder`]: it parses the LabKey SQL text, builds
//! and binds the relation tree, and hands out a [`CompiledQuery`] with the
//! generated SQL, its bind slots and the output column metadata.

mod resolve;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::ast::FieldKey;
use crate::catalog::{ContainerFilter, PhiLevel, Schema};
use crate::dialect::Dialect;
use crate::environment::Environment;
use crate::error::{Diagnostics, LkError, LkResult};
use crate::fragment::{SqlFragment, SqlParam};
use crate::method::MethodRegistry;
use crate::parser::parse;
use crate::relation::{Binder, PivotValueSource, RelationId};
use crate::types::{JdbcType, Value};

/// Default ceiling on catalog lookups per compilation.
pub const DEFAULT_MAX_TABLES: usize = 200;
/// Default ceiling on named-query nesting.
pub const DEFAULT_MAX_DEPTH: usize = 20;

/// Everything a compilation reads but never changes.
#[derive(Clone)]
pub struct QueryContext {
    pub schema: Arc<dyn Schema>,
    /// Schema path unqualified table names resolve in.
    pub current_schema: FieldKey,
    pub dialect: Dialect,
    pub methods: Arc<MethodRegistry>,
    pub environment: Arc<Environment>,
    /// Default filter for container-scoped tables.
    pub container_filter: Option<ContainerFilter>,
    pub allow_duplicate_columns: bool,
    /// Runs the value discovery query of a PIVOT without an IN list.
    pub pivot_source: Option<Arc<dyn PivotValueSource>>,
    pub max_tables: usize,
    pub max_depth: usize,
}

impl QueryContext {
    pub fn new(schema: Arc<dyn Schema>, dialect: Dialect) -> Self {
        Self {
            schema,
            current_schema: FieldKey::default(),
            dialect,
            methods: MethodRegistry::shared(),
            environment: Arc::new(Environment::default()),
            container_filter: None,
            allow_duplicate_columns: true,
            pivot_source: None,
            max_tables: DEFAULT_MAX_TABLES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_current_schema(mut self, schema: FieldKey) -> Self {
        self.current_schema = schema;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Arc::new(environment);
        self
    }

    pub fn with_container_filter(mut self, filter: ContainerFilter) -> Self {
        self.container_filter = Some(filter);
        self
    }

    pub fn with_pivot_source(mut self, source: Arc<dyn PivotValueSource>) -> Self {
        self.pivot_source = Some(source);
        self
    }

    pub fn with_limits(mut self, max_tables: usize, max_depth: usize) -> Self {
        self.max_tables = max_tables;
        self.max_depth = max_depth;
        self
    }

    pub fn allow_duplicate_columns(mut self, allow: bool) -> Self {
        self.allow_duplicate_columns = allow;
        self
    }
}

/// A `PARAMETERS` declaration, possibly merged from a nested query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryParameter {
    pub name: String,
    pub jdbc_type: JdbcType,
    pub default: Option<Value>,
    /// `@@` system parameters are not shown to users.
    pub hidden: bool,
}

/// One column of a compiled query's result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputColumn {
    pub name: String,
    pub alias: String,
    pub jdbc_type: JdbcType,
    pub phi: PhiLevel,
    pub hidden: bool,
}

/// A parsed and bound LabKey SQL query.
pub struct Query {
    binder: Binder,
    root: Option<RelationId>,
}

impl Query {
    /// Parse and bind `sql`. Problems are collected in [`Query::diagnostics`];
    /// [`Query::compile`] refuses to generate SQL while any error remains.
    pub fn new(ctx: QueryContext, name: Option<&str>, sql: &str) -> Self {
        let mut binder = Binder::new(ctx, name, sql);
        let root = match parse(sql) {
            Ok(stmt) => binder.build_statement(&stmt).ok(),
            Err(diag) => {
                binder.record(diag);
                None
            }
        };
        let root = root.filter(|r| binder.resolve_relation(*r).is_ok());
        if let Some(r) = root {
            if !binder.has_errors() {
                binder.prepare(r);
            }
        }
        debug!(
            query = name.unwrap_or("<root>"),
            errors = binder.diagnostics().errors.len(),
            "query bound"
        );
        Self { binder, root }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.binder.diagnostics()
    }

    pub fn has_errors(&self) -> bool {
        self.binder.has_errors()
    }

    /// Declared parameters, including those merged from nested queries.
    pub fn parameters(&self) -> &[QueryParameter] {
        &self.binder.scope(Binder::ROOT_SCOPE).parameters
    }

    /// Every catalog table and named query the compilation touched.
    pub fn resolved_tables(&self) -> &[String] {
        &self.binder.resolved_tables
    }

    pub fn binder(&self) -> &Binder {
        &self.binder
    }

    pub fn root(&self) -> Option<RelationId> {
        self.root
    }

    /// Relation tree with column reference counts.
    pub fn explain(&self) -> String {
        self.root.map(|r| self.binder.explain(r)).unwrap_or_default()
    }

    /// Change the default container filter; cached WITH bodies are rebuilt.
    pub fn set_container_filter(&mut self, filter: Option<ContainerFilter>) {
        self.binder.ctx.container_filter = filter;
        self.binder.invalidate_ctes();
    }

    /// Generate SQL, or report why it cannot be generated.
    pub fn compile(&mut self) -> LkResult<CompiledQuery> {
        if let Some(table) = &self.binder.unauthorized {
            return Err(LkError::Unauthorized(table.clone()));
        }
        let diagnostics = self.binder.diagnostics();
        let root = match self.root {
            Some(root) if !diagnostics.has_errors() => root,
            _ => {
                warn!(errors = diagnostics.errors.len(), "query has errors");
                return Err(LkError::Invalid(diagnostics));
            }
        };
        let fragment = self.binder.relation_sql(root).finalize(self.binder.dialect());
        // generation may add warnings (dropped ORDER BY)
        let warnings = self.binder.diagnostics().warnings;
        let b = &self.binder;
        let columns = b
            .emitted_columns(root)
            .into_iter()
            .map(|c| {
                let col = b.column(c);
                OutputColumn {
                    name: col.name().to_string(),
                    alias: col.alias().to_string(),
                    jdbc_type: col.jdbc_type(),
                    phi: col.phi(),
                    hidden: col.hidden,
                }
            })
            .collect();
        let max_phi = b
            .columns
            .iter()
            .filter(|c| c.ref_count() > 0)
            .map(|c| c.phi())
            .max()
            .unwrap_or_default();
        Ok(CompiledQuery {
            fragment,
            dialect: b.ctx.dialect,
            columns,
            parameters: self.parameters().to_vec(),
            warnings,
            resolved_tables: b.resolved_tables.clone(),
            max_phi,
        })
    }
}

/// Generated SQL ready to execute.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    fragment: SqlFragment,
    dialect: Dialect,
    pub columns: Vec<OutputColumn>,
    pub parameters: Vec<QueryParameter>,
    pub warnings: Vec<crate::error::QueryDiagnostic>,
    pub resolved_tables: Vec<String>,
    max_phi: PhiLevel,
}

impl CompiledQuery {
    /// SQL with `?` placeholders.
    pub fn sql(&self) -> &str {
        self.fragment.sql()
    }

    /// SQL with the dialect's own placeholder syntax (`$1`, `@p1`, `:1`).
    pub fn rendered(&self) -> String {
        self.fragment.render(self.dialect.generator().as_ref())
    }

    pub fn params(&self) -> &[SqlParam] {
        self.fragment.params()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Highest PHI level of any column the query reads.
    pub fn max_phi(&self) -> PhiLevel {
        self.max_phi
    }

    /// Bind values in placeholder order: compile-time values as they are,
    /// named slots from `values` (case-insensitive) or the declared default.
    pub fn bind_parameters(&self, values: &HashMap<String, Value>) -> LkResult<Vec<Value>> {
        let lookup = |name: &str| {
            values
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        self.params()
            .iter()
            .map(|p| match p {
                SqlParam::Value(v) => Ok(v.clone()),
                SqlParam::Named { name, .. } => lookup(name)
                    .or_else(|| {
                        self.parameters
                            .iter()
                            .find(|q| q.name.eq_ignore_ascii_case(name))
                            .and_then(|q| q.default.clone())
                    })
                    .ok_or_else(|| LkError::MissingParameter(name.clone())),
            })
            .collect()
    }
}

/// Compile `sql` in one step.
pub fn compile(ctx: QueryContext, sql: &str) -> LkResult<CompiledQuery> {
    Query::new(ctx, None, sql).compile()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::catalog::{
        ColumnDescriptor, ColumnOverride, ForeignKey, MemorySchema, NamedQuery, TableDescriptor,
    };
    use crate::relation::PivotSourceError;
    use pretty_assertions::assert_eq;

    fn catalog() -> MemorySchema {
        let r = TableDescriptor::new("R", "")
            .column(ColumnDescriptor::new("rowid", JdbcType::Integer))
            .column(ColumnDescriptor::new("d", JdbcType::Integer))
            .column(ColumnDescriptor::new("seven", JdbcType::Integer))
            .column(
                ColumnDescriptor::new("createdby", JdbcType::Integer)
                    .fk(ForeignKey::new("core", "users", "userid")),
            )
            .key(&["rowid"]);
        let users = TableDescriptor::new("users", "")
            .column(ColumnDescriptor::new("userid", JdbcType::Integer))
            .column(ColumnDescriptor::new("displayname", JdbcType::Varchar))
            .key(&["userid"]);
        let meta = NamedQuery::new("Rmeta", "SELECT rowid, d FROM R").with_override(ColumnOverride {
            name: "d".to_string(),
            fk: Some(ForeignKey::new("core", "users", "userid")),
            hidden: false,
        });
        let lists = MemorySchema::new("lists")
            .with_table(r)
            .with_query(NamedQuery::new("Rsimple", "SELECT d, seven FROM R"))
            .with_query(NamedQuery::new(
                "Rgrouped",
                "SELECT seven, COUNT(*) AS n FROM R GROUP BY seven",
            ))
            .with_query(NamedQuery::new("Loop", "SELECT * FROM Loop"))
            .with_query(NamedQuery::new("Rbroken", "SELECT nosuch FROM R"))
            .with_query(NamedQuery::new(
                "Pint",
                "PARAMETERS (x INTEGER) SELECT d FROM R WHERE d = x",
            ))
            .with_query(NamedQuery::new(
                "Ptext",
                "PARAMETERS (x VARCHAR) SELECT d FROM R WHERE seven = x",
            ))
            .with_query(meta)
            .deny("Secret");
        MemorySchema::new("")
            .with_schema(MemorySchema::new("core").with_table(users))
            .with_schema(lists)
    }

    fn context() -> QueryContext {
        QueryContext::new(Arc::new(catalog()), Dialect::Postgres)
            .with_current_schema(FieldKey::from_name("lists"))
    }

    #[test]
    fn test_simple_named_query_is_spliced() {
        let mut q = Query::new(context(), None, "SELECT q.d FROM Rsimple q WHERE q.seven = 1");
        let compiled = q.compile().unwrap();
        // outer select and the spliced body; no wrapper table in between
        assert_eq!(compiled.sql().matches("SELECT").count(), 2, "{}", compiled.sql());
        assert_eq!(q.resolved_tables(), ["lists.Rsimple", "lists.R"]);
    }

    #[test]
    fn test_grouped_named_query_is_opaque() {
        let mut q = Query::new(context(), None, "SELECT g.n FROM Rgrouped g");
        let compiled = q.compile().unwrap();
        assert!(compiled.sql().contains("GROUP BY"));
        assert_eq!(compiled.sql().matches("SELECT").count(), 3, "{}", compiled.sql());
    }

    #[test]
    fn test_metadata_lookup_through_opaque_query() {
        let mut q = Query::new(context(), None, "SELECT m.d.displayname FROM Rmeta m");
        let compiled = q.compile().unwrap();
        assert!(compiled.sql().contains("LEFT OUTER JOIN"), "{}", compiled.sql());
        assert!(q.resolved_tables().contains(&"core.users".to_string()));
    }

    #[test]
    fn test_recursive_named_query_is_stopped() {
        let mut q = Query::new(context(), None, "SELECT * FROM Loop");
        let err = q.compile().unwrap_err();
        let LkError::Invalid(diags) = err else {
            panic!("expected a compile error");
        };
        let mut cause = diags.errors[0].cause.as_deref();
        let mut deepest = &diags.errors[0];
        while let Some(c) = cause {
            deepest = c;
            cause = c.cause.as_deref();
        }
        assert!(deepest.message.contains("recursive?"), "{}", deepest.message);
    }

    #[test]
    fn test_nested_errors_are_reported_at_the_reference() {
        let q = Query::new(context(), None, "SELECT *\nFROM Rbroken");
        let diags = q.diagnostics();
        let first = &diags.errors[0];
        assert_eq!(first.message, "Query 'Rbroken' has errors");
        assert_eq!((first.line, first.column), (2, 5));
        let cause = first.cause.as_deref().unwrap();
        assert_eq!(cause.query_name.as_deref(), Some("Rbroken"));
    }

    #[test]
    fn test_parameter_merge() {
        let q = Query::new(context(), None, "SELECT a.d FROM Pint a, Pint b");
        assert_eq!(q.parameters().len(), 1);
        assert!(!q.has_errors());

        let q = Query::new(context(), None, "SELECT a.d FROM Pint a, Ptext b");
        assert_eq!(
            q.diagnostics().errors[0].message,
            "Parameter x is declared as both INTEGER and VARCHAR"
        );
    }

    #[test]
    fn test_bind_parameters() {
        let mut q = Query::new(
            context(),
            None,
            "PARAMETERS (lo INTEGER DEFAULT 3, hi INTEGER) SELECT d FROM R WHERE d BETWEEN lo AND hi",
        );
        let compiled = q.compile().unwrap();
        let err = compiled.bind_parameters(&HashMap::new()).unwrap_err();
        assert!(matches!(err, LkError::MissingParameter(ref p) if p == "hi"));
        let values = HashMap::from([("HI".to_string(), Value::Int(9))]);
        assert_eq!(
            compiled.bind_parameters(&values).unwrap(),
            vec![Value::Int(3), Value::Int(9)]
        );
    }

    #[test]
    fn test_unauthorized_table() {
        let mut q = Query::new(context(), None, "SELECT * FROM Secret");
        let err = q.compile().unwrap_err();
        assert!(matches!(err, LkError::Unauthorized(_)), "{err}");
    }

    #[test]
    fn test_unknown_names() {
        let q = Query::new(context(), None, "SELECT * FROM nosuch.R");
        assert_eq!(q.diagnostics().errors[0].message, "Unknown schema: nosuch");
        let q = Query::new(context(), None, "SELECT * FROM Nope");
        assert_eq!(
            q.diagnostics().errors[0].message,
            "Table or query not found: Nope"
        );
    }

    #[test]
    fn test_resolve_cache_counts_every_reference() {
        let ctx = context().with_limits(2, DEFAULT_MAX_DEPTH);
        let q = Query::new(ctx, None, "SELECT a.d FROM R a, R b, R c");
        assert_eq!(
            q.diagnostics().errors[0].message,
            "Too many tables used in this query (query may be recursive?)"
        );
        let q = Query::new(context(), None, "SELECT a.d FROM R a, lists.R b");
        assert!(!q.has_errors());
        assert_eq!(q.binder().table_cache.len(), 2);
        assert_eq!(q.resolved_tables(), ["lists.R"]);
    }

    #[test]
    fn test_pivot_source_from_context() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let source = move |_sql: &str, _params: &[Value]| -> Result<Vec<Value>, PivotSourceError> {
            *counter.lock().unwrap() += 1;
            Ok(vec![Value::Int(1), Value::Int(2)])
        };
        let ctx = context().with_pivot_source(Arc::new(source));
        let mut q = Query::new(
            ctx,
            None,
            "SELECT seven, d, COUNT(*) AS c FROM R GROUP BY seven, d PIVOT c BY d",
        );
        let compiled = q.compile().unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
        let names: Vec<&str> = compiled.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["seven", "c", "1::c", "2::c"]);
    }
}
