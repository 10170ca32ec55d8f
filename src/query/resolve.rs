//! Table resolution: WITH names, catalog tables and named queries.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::ast::{Expr, ExprKind, FieldKey, QueryExpr, Span, Statement};
use crate::catalog::{CatalogEntry, CatalogError, ContainerFilter, ForeignKey, NamedQuery, Schema};
use crate::error::QueryDiagnostic;
use crate::method::aggregate;
use crate::parser::parse;
use crate::relation::{
    BindResult, Binder, BuildCtx, Halt, Place, RelationId, RelationKind, ScopeId, TableRel,
};

fn find_schema<'a>(root: &'a dyn Schema, path: &[String]) -> Option<&'a dyn Schema> {
    path.iter().try_fold(root, |schema, part| schema.schema(part))
}

/// Whether an aggregate call appears outside any subquery.
fn mentions_aggregate(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Call { name, args, .. } => {
            aggregate::is_aggregate(name) || args.iter().any(mentions_aggregate)
        }
        ExprKind::Unary { operand, .. } => mentions_aggregate(operand),
        ExprKind::Binary { left, right, .. } => mentions_aggregate(left) || mentions_aggregate(right),
        ExprKind::Like { expr, pattern, .. } => {
            mentions_aggregate(expr) || mentions_aggregate(pattern)
        }
        ExprKind::Between {
            expr, low, high, ..
        } => mentions_aggregate(expr) || mentions_aggregate(low) || mentions_aggregate(high),
        ExprKind::InList { expr, list, .. } => {
            mentions_aggregate(expr) || list.iter().any(mentions_aggregate)
        }
        ExprKind::IsNull { expr, .. }
        | ExprKind::InSubquery { expr, .. }
        | ExprKind::Cast { expr, .. }
        | ExprKind::IfDefined(expr) => mentions_aggregate(expr),
        ExprKind::Case {
            operand,
            whens,
            else_expr,
        } => {
            operand.as_deref().is_some_and(mentions_aggregate)
                || whens
                    .iter()
                    .any(|(w, t)| mentions_aggregate(w) || mentions_aggregate(t))
                || else_expr.as_deref().is_some_and(mentions_aggregate)
        }
        _ => false,
    }
}

/// A named query whose tree can replace the table reference directly:
/// a plain select with no DISTINCT, aggregation, pivot or column metadata.
fn splice_candidate(stmt: &Statement, query: &NamedQuery) -> bool {
    if query.has_metadata() {
        return false;
    }
    let QueryExpr::Select(s) = &stmt.body else {
        return false;
    };
    !s.distinct
        && s.group_by.is_empty()
        && s.having.is_none()
        && s.pivot.is_none()
        && !s.columns.iter().any(|i| mentions_aggregate(&i.expr))
}

impl Binder {
    /// A FROM-clause table name: a WITH query when one is visible, a
    /// catalog table or named query otherwise.
    pub(crate) fn resolve_table(
        &mut self,
        name: &FieldKey,
        filter: Option<ContainerFilter>,
        bctx: BuildCtx,
        span: Span,
    ) -> BindResult<RelationId> {
        if name.len() == 1 {
            if let Some(cte) = self.find_cte(name.name()) {
                trace!(cte = name.name(), "reference to WITH query");
                return self.cte_reference(cte, name.name(), bctx, span);
            }
        }
        self.resolve_catalog_table(name, filter, bctx, span)
    }

    /// The relation a foreign key points at, declared and resolved.
    pub(crate) fn resolve_lookup_target(
        &mut self,
        owner: RelationId,
        fk: &ForeignKey,
        span: Span,
    ) -> Option<RelationId> {
        let name = FieldKey::from_dotted(&fk.schema).child(fk.table.clone());
        self.enter_scope(self.relations[owner.0].scope);
        let bctx = BuildCtx::new(Place::Lookup, Some(owner));
        let target = self
            .resolve_catalog_table(&name, None, bctx, span)
            .and_then(|t| self.resolve_relation(t).map(|_| t));
        self.leave_scope();
        target.ok()
    }

    fn resolve_catalog_table(
        &mut self,
        name: &FieldKey,
        filter: Option<ContainerFilter>,
        bctx: BuildCtx,
        span: Span,
    ) -> BindResult<RelationId> {
        self.tables_resolved += 1;
        if self.tables_resolved > self.ctx.max_tables {
            self.error(span, "Too many tables used in this query (query may be recursive?)");
            return Err(Halt);
        }
        let filter = filter.or(self.scopes[self.current_scope().0].container_filter);
        let (entry, schema) = self.catalog_entry(name, filter, span)?;
        let qualified = schema.child(entry.name()).to_string();
        if !self.resolved_tables.contains(&qualified) {
            self.resolved_tables.push(qualified);
        }
        match entry {
            CatalogEntry::Table(desc) => Ok(self.add_relation(
                name.name(),
                RelationKind::Table(TableRel::physical(desc, filter)),
                &bctx,
                span,
            )),
            CatalogEntry::Query(query) => self.named_query(query, schema, filter, bctx, span),
        }
    }

    /// Catalog lookup through the per-compilation cache. Qualified names
    /// are tried from the catalog root, then below the current schema.
    fn catalog_entry(
        &mut self,
        name: &FieldKey,
        filter: Option<ContainerFilter>,
        span: Span,
    ) -> BindResult<(CatalogEntry, FieldKey)> {
        let scope_schema = self.scopes[self.current_scope().0].schema.clone();
        let key = format!(
            "{}|{}|{}",
            scope_schema.cache_key(),
            name.cache_key(),
            filter.map_or("", ContainerFilter::name)
        );
        if let Some(hit) = self.table_cache.get(&key) {
            trace!(table = %name, "resolve cache hit");
            return Ok(hit.clone());
        }

        let candidates = match name.parent() {
            Some(parent) => {
                let relative = FieldKey::new(
                    scope_schema
                        .parts()
                        .iter()
                        .chain(parent.parts())
                        .cloned()
                        .collect(),
                );
                vec![parent, relative]
            }
            None => vec![scope_schema.clone()],
        };
        let root = Arc::clone(&self.ctx.schema);
        let mut schema_found = false;
        for path in candidates {
            let Some(schema) = find_schema(root.as_ref(), path.parts()) else {
                continue;
            };
            schema_found = true;
            match schema.table(name.name()) {
                Ok(Some(entry)) => {
                    debug!(table = %name, schema = %path, "resolved table");
                    self.table_cache.insert(key, (entry.clone(), path.clone()));
                    return Ok((entry, path));
                }
                Ok(None) => {}
                Err(e) => return Err(self.catalog_failure(e, span)),
            }
        }
        if schema_found {
            self.error(span, format!("Table or query not found: {}", name));
        } else {
            let schema = name.parent().unwrap_or(scope_schema);
            self.error(span, format!("Unknown schema: {}", schema));
        }
        Err(Halt)
    }

    fn catalog_failure(&mut self, e: CatalogError, span: Span) -> Halt {
        warn!(error = %e, "catalog failure");
        if let CatalogError::Unauthorized(table) = &e {
            self.unauthorized.get_or_insert_with(|| table.clone());
        }
        self.error(span, e.to_string());
        Halt
    }

    /// Compile a named query in its own scope. Simple queries in a FROM
    /// clause are spliced into the tree; the rest become opaque tables.
    fn named_query(
        &mut self,
        query: Arc<NamedQuery>,
        schema: FieldKey,
        filter: Option<ContainerFilter>,
        bctx: BuildCtx,
        span: Span,
    ) -> BindResult<RelationId> {
        let outer = self.current_scope();
        let depth = self.scopes[outer.0].depth + 1;
        if depth > self.ctx.max_depth {
            self.error(span, "Too many nested queries (query may be recursive?)");
            return Err(Halt);
        }
        let stmt = parse(&query.sql);
        let splice =
            bctx.place == Place::From && stmt.as_ref().is_ok_and(|s| splice_candidate(s, &query));
        debug!(query = %query.name, depth, splice, "compiling nested query");

        let table = (!splice).then(|| {
            self.add_relation(
                &query.name,
                RelationKind::Table(TableRel::query(Arc::clone(&query), RelationId(usize::MAX))),
                &bctx,
                span,
            )
        });
        let sid = self.new_scope(&query.name, &query.sql, schema, filter);
        self.enter_scope(sid);
        let built = match stmt {
            Err(diag) => {
                self.record(diag);
                Err(Halt)
            }
            Ok(stmt) => {
                let inner = match table {
                    Some(t) => BuildCtx::new(Place::From, Some(t)),
                    None => BuildCtx {
                        outer: None,
                        cte_branch: None,
                        ..bctx
                    },
                };
                self.build_statement_at(&stmt, inner)
                    .and_then(|root| self.resolve_relation(root).map(|_| root))
            }
        };
        self.leave_scope();

        // declare and resolve collect errors without halting
        let built = built.and_then(|root| {
            if self.scopes[sid.0].diagnostics.errors.is_empty() {
                Ok(root)
            } else {
                Err(Halt)
            }
        });
        let Ok(root) = built else {
            self.nested_failure(&query.name, sid, span);
            return Err(Halt);
        };
        self.merge_parameters(sid, span);
        match table {
            Some(t) => {
                self.relations[t.0].kind = RelationKind::Table(TableRel::query(query, root));
                Ok(t)
            }
            None => Ok(root),
        }
    }

    /// Report a nested query that failed to build at the referencing site.
    fn nested_failure(&mut self, name: &str, nested: ScopeId, span: Span) {
        let source = &self.scopes[self.current_scope().0].source;
        let (line, column) = span.locate(source);
        let mut diag = QueryDiagnostic::new(format!("Query '{}' has errors", name), line, column);
        let inner = &self.scopes[nested.0];
        if let Some(first) = inner.diagnostics.errors.first() {
            let mut cause = first.clone();
            cause.decorate(inner.name.as_deref(), &inner.source);
            diag = diag.with_cause(cause);
        }
        self.record(diag);
    }

    /// Add a nested query's parameters to the current scope.
    fn merge_parameters(&mut self, from: ScopeId, span: Span) {
        let into = self.current_scope();
        for p in self.scopes[from.0].parameters.clone() {
            let existing = self.scopes[into.0]
                .parameters
                .iter()
                .find(|q| q.name.eq_ignore_ascii_case(&p.name))
                .map(|q| q.jdbc_type);
            match existing {
                Some(ty) if ty != p.jdbc_type => self.error(
                    span,
                    format!(
                        "Parameter {} is declared as both {} and {}",
                        p.name, ty, p.jdbc_type
                    ),
                ),
                Some(_) => {}
                None => self.scopes[into.0].parameters.push(p),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    #[test]
    fn test_mentions_aggregate_skips_subqueries() {
        let agg = parse_expression("1 + CASE WHEN x > 0 THEN SUM(x) END").unwrap();
        assert!(mentions_aggregate(&agg));
        let plain = parse_expression("(SELECT MAX(d) FROM R) + 1").unwrap();
        assert!(!mentions_aggregate(&plain));
    }

    #[test]
    fn test_splice_candidates() {
        let q = NamedQuery::new("q", "");
        let simple = parse("SELECT d, seven FROM R WHERE d > 1").unwrap();
        assert!(splice_candidate(&simple, &q));
        let grouped = parse("SELECT seven, COUNT(*) AS c FROM R GROUP BY seven").unwrap();
        assert!(!splice_candidate(&grouped, &q));
        let distinct = parse("SELECT DISTINCT d FROM R").unwrap();
        assert!(!splice_candidate(&distinct, &q));
        let with_metadata = q.with_override(crate::catalog::ColumnOverride {
            name: "d".to_string(),
            fk: None,
            hidden: true,
        });
        assert!(!splice_candidate(&simple, &with_metadata));
    }
}
