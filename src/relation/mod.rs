//! Relation tree, binder and SQL generation.
//!
//! Relations live in an arena owned by a [`Binder`] and refer to each other
//! by [`RelationId`]. Each variant (table, select, union, pivot, lookup
//! wrapper, CTE reference, VALUES list) implements [`RelationOps`] and the
//! binder dispatches on the variant tag.
//!
//! Compilation runs in phases:
//! 1. build: parse tree to relations ([`build`]);
//! 2. declare: bind identifiers to columns and take references;
//! 3. resolve: compute types and validate;
//! 4. prepare: force suggested columns, then assign aliases;
//! 5. generate: emit [`SqlFragment`]s.
//!
//! Declare and resolve are idempotent per relation.

mod alias;
mod bound;
mod build;
mod column;
mod cte;
mod lookup;
mod pivot;
mod select;
mod table;
mod union;
mod values;
mod wrapper;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::Write as _;

use tracing::trace;

use crate::ast::{FieldKey, Span};
use crate::catalog::{CatalogEntry, ContainerFilter};
use crate::dialect::SqlDialect;
use crate::error::{Diagnostics, QueryDiagnostic};
use crate::fragment::SqlFragment;
use crate::query::{QueryContext, QueryParameter};

pub use alias::AliasManager;
pub use bound::{BoundExpr, BoundKind, CallTarget};
pub use column::{ColumnOrigin, ColumnRef, RelationColumn};
pub use pivot::{PivotSourceError, PivotValueSource};

pub(crate) use build::BuildCtx;
pub(crate) use cte::{CteEntry, CteRef};
pub(crate) use pivot::PivotRel;
pub(crate) use select::SelectRel;
pub(crate) use table::TableRel;
pub(crate) use union::UnionRel;
pub(crate) use values::ValuesRel;
pub(crate) use wrapper::LookupWrapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CteId(pub(crate) usize);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An error has been recorded; stop working on the current relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Halt;

pub(crate) type BindResult<T> = Result<T, Halt>;

/// Where a relation sits in the tree. Drives wrapping, elision, ORDER BY
/// handling and which relations must emit every column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Place {
    Root,
    From,
    Expression,
    UnionBranch,
    CteBody,
    PivotSource,
    Lookup,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Pass {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug)]
pub enum RelationKind {
    Table(TableRel),
    Select(SelectRel),
    Union(UnionRel),
    Pivot(PivotRel),
    Lookup(LookupWrapper),
    CteRef(CteRef),
    Values(ValuesRel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tag {
    Table,
    Select,
    Union,
    Pivot,
    Lookup,
    CteRef,
    Values,
}

impl RelationKind {
    pub(crate) fn tag(&self) -> Tag {
        match self {
            RelationKind::Table(_) => Tag::Table,
            RelationKind::Select(_) => Tag::Select,
            RelationKind::Union(_) => Tag::Union,
            RelationKind::Pivot(_) => Tag::Pivot,
            RelationKind::Lookup(_) => Tag::Lookup,
            RelationKind::CteRef(_) => Tag::CteRef,
            RelationKind::Values(_) => Tag::Values,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RelationKind::Table(_) => "Table",
            RelationKind::Select(_) => "Select",
            RelationKind::Union(_) => "Union",
            RelationKind::Pivot(_) => "Pivot",
            RelationKind::Lookup(_) => "LookupWrapper",
            RelationKind::CteRef(_) => "CteRef",
            RelationKind::Values(_) => "Values",
        }
    }
}

#[derive(Debug)]
pub struct RelationNode {
    /// Name as written (alias or table name).
    pub(crate) name: String,
    /// SQL alias, assigned by the naming pass.
    pub(crate) alias: Option<String>,
    /// Keys that address this relation from the enclosing FROM clause.
    pub(crate) names: Vec<FieldKey>,
    pub(crate) parent: Option<RelationId>,
    /// Select searched for correlated references.
    pub(crate) outer: Option<RelationId>,
    pub(crate) place: Place,
    pub(crate) scope: ScopeId,
    pub(crate) span: Span,
    pub(crate) declare: Pass,
    pub(crate) resolve: Pass,
    pub(crate) named: bool,
    pub(crate) suggested: bool,
    pub(crate) columns: Vec<ColumnId>,
    pub(crate) by_name: HashMap<String, ColumnId>,
    pub(crate) column_aliases: HashSet<String>,
    /// References owned by the relation itself (WHERE, ORDER BY, ...).
    pub(crate) holds: Vec<ColumnRef>,
    /// Relations of subqueries used as expressions.
    pub(crate) subqueries: Vec<RelationId>,
    pub(crate) kind: RelationKind,
}

impl RelationNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn kind(&self) -> &RelationKind {
        &self.kind
    }

    pub fn columns(&self) -> &[ColumnId] {
        &self.columns
    }

    pub fn in_from_clause(&self) -> bool {
        self.place == Place::From
    }
}

/// The capabilities every relation variant provides.
pub(crate) trait RelationOps {
    fn declare(b: &mut Binder, id: RelationId) -> BindResult<()>;

    fn resolve(b: &mut Binder, id: RelationId) -> BindResult<()>;

    /// A complete SELECT statement for the relation.
    fn select_sql(b: &mut Binder, id: RelationId) -> SqlFragment;

    /// The relation as a FROM item, including its alias.
    fn from_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        let alias = b.sql_alias(id);
        Self::select_sql(b, id).wrap("(", &format!(") {}", alias))
    }

    /// Columns present in the generated SQL, in order.
    fn emitted_columns(b: &Binder, id: RelationId) -> Vec<ColumnId>;

    fn children(b: &Binder, id: RelationId) -> Vec<RelationId>;
}

macro_rules! dispatch {
    ($b:expr, $id:expr, $method:ident) => {{
        let id = $id;
        match $b.relations[id.0].kind.tag() {
            Tag::Table => <TableRel as RelationOps>::$method($b, id),
            Tag::Select => <SelectRel as RelationOps>::$method($b, id),
            Tag::Union => <UnionRel as RelationOps>::$method($b, id),
            Tag::Pivot => <PivotRel as RelationOps>::$method($b, id),
            Tag::Lookup => <LookupWrapper as RelationOps>::$method($b, id),
            Tag::CteRef => <CteRef as RelationOps>::$method($b, id),
            Tag::Values => <ValuesRel as RelationOps>::$method($b, id),
        }
    }};
}

/// One compilation unit's source: the root query or a named query it uses.
#[derive(Debug)]
pub struct Scope {
    pub(crate) name: Option<String>,
    pub(crate) source: String,
    pub(crate) depth: usize,
    pub(crate) parent: Option<ScopeId>,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) parameters: Vec<QueryParameter>,
    pub(crate) ctes: Vec<(String, CteId)>,
    /// Schema path unqualified table names resolve in.
    pub(crate) schema: FieldKey,
    /// Container filter inherited from an annotated named-query reference.
    pub(crate) container_filter: Option<ContainerFilter>,
}

/// Owner of every relation and column of one compilation.
pub struct Binder {
    pub(crate) ctx: QueryContext,
    pub(crate) dialect: Box<dyn SqlDialect>,
    pub(crate) relations: Vec<RelationNode>,
    pub(crate) columns: Vec<RelationColumn>,
    pub(crate) scopes: Vec<Scope>,
    scope_stack: Vec<ScopeId>,
    pub(crate) ctes: Vec<CteEntry>,
    pub(crate) aliases: AliasManager,
    pub(crate) table_cache: HashMap<String, (CatalogEntry, FieldKey)>,
    pub(crate) tables_resolved: usize,
    pub(crate) resolved_tables: Vec<String>,
    pub(crate) unauthorized: Option<String>,
}

/// Aliases the generated SQL uses internally.
pub(crate) const BASE_ALIAS: &str = "base";
pub(crate) const PIVOT_SOURCE_ALIAS: &str = "_t";
pub(crate) const PIVOT_VALUES_ALIAS: &str = "_pivotValues";

impl Binder {
    pub fn new(ctx: QueryContext, name: Option<&str>, source: &str) -> Self {
        let dialect = ctx.dialect.generator();
        let schema = ctx.current_schema.clone();
        let mut aliases = AliasManager::new();
        for reserved in [BASE_ALIAS, PIVOT_SOURCE_ALIAS, PIVOT_VALUES_ALIAS] {
            aliases.reserve(reserved);
        }
        Self {
            ctx,
            dialect,
            relations: Vec::new(),
            columns: Vec::new(),
            scopes: vec![Scope {
                name: name.map(str::to_string),
                source: source.to_string(),
                depth: 0,
                parent: None,
                diagnostics: Diagnostics::default(),
                parameters: Vec::new(),
                ctes: Vec::new(),
                schema,
                container_filter: None,
            }],
            scope_stack: Vec::new(),
            ctes: Vec::new(),
            aliases,
            table_cache: HashMap::new(),
            tables_resolved: 0,
            resolved_tables: Vec::new(),
            unauthorized: None,
        }
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    // ---- scopes and diagnostics ----

    pub(crate) const ROOT_SCOPE: ScopeId = ScopeId(0);

    pub(crate) fn current_scope(&self) -> ScopeId {
        self.scope_stack.last().copied().unwrap_or(Self::ROOT_SCOPE)
    }

    pub(crate) fn enter_scope(&mut self, scope: ScopeId) {
        self.scope_stack.push(scope);
    }

    pub(crate) fn leave_scope(&mut self) {
        self.scope_stack.pop();
    }

    /// A child of the current scope for a named query found in `schema`.
    pub(crate) fn new_scope(
        &mut self,
        name: &str,
        source: &str,
        schema: FieldKey,
        container_filter: Option<ContainerFilter>,
    ) -> ScopeId {
        let parent = self.current_scope();
        let depth = self.scopes[parent.0].depth + 1;
        self.scopes.push(Scope {
            name: Some(name.to_string()),
            source: source.to_string(),
            depth,
            parent: Some(parent),
            diagnostics: Diagnostics::default(),
            parameters: Vec::new(),
            ctes: Vec::new(),
            schema,
            container_filter,
        });
        ScopeId(self.scopes.len() - 1)
    }

    pub(crate) fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    /// Record an error at `span` in the current scope.
    pub(crate) fn error(&mut self, span: Span, message: impl Into<String>) {
        let sid = self.current_scope();
        let scope = &mut self.scopes[sid.0];
        let (line, column) = span.locate(&scope.source);
        let diag = QueryDiagnostic::new(message, line, column);
        if !scope.diagnostics.errors.contains(&diag) {
            trace!(error = %diag, "binder error");
            scope.diagnostics.errors.push(diag);
        }
    }

    pub(crate) fn warning(&mut self, span: Span, message: impl Into<String>) {
        let sid = self.current_scope();
        let scope = &mut self.scopes[sid.0];
        let (line, column) = span.locate(&scope.source);
        let diag = QueryDiagnostic::new(message, line, column);
        if !scope.diagnostics.warnings.contains(&diag) {
            scope.diagnostics.warnings.push(diag);
        }
    }

    /// Record a diagnostic produced outside the binder (syntax errors).
    pub(crate) fn record(&mut self, diag: QueryDiagnostic) {
        let sid = self.current_scope();
        let scope = &mut self.scopes[sid.0];
        if !scope.diagnostics.errors.contains(&diag) {
            scope.diagnostics.errors.push(diag);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.scopes.iter().any(|s| s.diagnostics.has_errors())
    }

    /// Errors and warnings of every scope, root first, decorated with the
    /// query name and source text they belong to.
    pub fn diagnostics(&self) -> Diagnostics {
        let mut out = Diagnostics::default();
        for scope in &self.scopes {
            for (from, to) in [
                (&scope.diagnostics.errors, &mut out.errors),
                (&scope.diagnostics.warnings, &mut out.warnings),
            ] {
                for diag in from {
                    let mut diag = diag.clone();
                    diag.decorate(scope.name.as_deref(), &scope.source);
                    if !to.contains(&diag) {
                        to.push(diag);
                    }
                }
            }
        }
        out
    }

    pub(crate) fn find_parameter(&self, name: &str) -> Option<&QueryParameter> {
        self.scopes[self.current_scope().0]
            .parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    // ---- arena ----

    pub fn node(&self, id: RelationId) -> &RelationNode {
        &self.relations[id.0]
    }

    pub(crate) fn tag(&self, id: RelationId) -> Tag {
        self.relations[id.0].kind.tag()
    }

    pub(crate) fn add_relation(
        &mut self,
        name: &str,
        kind: RelationKind,
        bctx: &BuildCtx,
        span: Span,
    ) -> RelationId {
        let id = RelationId(self.relations.len());
        self.relations.push(RelationNode {
            name: name.to_string(),
            alias: None,
            names: Vec::new(),
            parent: bctx.parent,
            outer: bctx.outer,
            place: bctx.place,
            scope: self.current_scope(),
            span,
            declare: Pass::Pending,
            resolve: Pass::Pending,
            named: false,
            suggested: false,
            columns: Vec::new(),
            by_name: HashMap::new(),
            column_aliases: HashSet::new(),
            holds: Vec::new(),
            subqueries: Vec::new(),
            kind,
        });
        id
    }

    pub(crate) fn find_column(&self, rel: RelationId, name: &str) -> Option<ColumnId> {
        self.relations[rel.0]
            .by_name
            .get(&name.to_lowercase())
            .copied()
    }

    /// Columns expanded by `*`: every declared column that is neither
    /// hidden nor a lookup.
    pub(crate) fn star_columns(&self, rel: RelationId) -> Vec<ColumnId> {
        self.relations[rel.0]
            .columns
            .iter()
            .copied()
            .filter(|c| {
                let col = &self.columns[c.0];
                !col.hidden && !col.is_lookup()
            })
            .collect()
    }

    /// Declared columns that are not lookups, in declaration order.
    pub(crate) fn base_columns(&self, rel: RelationId) -> Vec<ColumnId> {
        self.relations[rel.0]
            .columns
            .iter()
            .copied()
            .filter(|c| !self.columns[c.0].is_lookup())
            .collect()
    }

    /// Live columns, or every base column when none is live.
    pub(crate) fn live_or_all(&self, rel: RelationId) -> Vec<ColumnId> {
        let base = self.base_columns(rel);
        let live: Vec<ColumnId> = base.iter().copied().filter(|c| self.is_live(*c)).collect();
        if live.is_empty() { base } else { live }
    }

    // ---- phases ----

    pub(crate) fn declare_relation(&mut self, id: RelationId) -> BindResult<()> {
        match self.relations[id.0].declare {
            Pass::Done | Pass::Running => return Ok(()),
            Pass::Failed => return Err(Halt),
            Pass::Pending => {}
        }
        self.relations[id.0].declare = Pass::Running;
        self.enter_scope(self.relations[id.0].scope);
        let result = dispatch!(self, id, declare);
        self.leave_scope();
        self.relations[id.0].declare = if result.is_ok() {
            Pass::Done
        } else {
            Pass::Failed
        };
        result
    }

    pub(crate) fn resolve_relation(&mut self, id: RelationId) -> BindResult<()> {
        self.declare_relation(id)?;
        match self.relations[id.0].resolve {
            Pass::Done | Pass::Running => return Ok(()),
            Pass::Failed => return Err(Halt),
            Pass::Pending => {}
        }
        self.relations[id.0].resolve = Pass::Running;
        self.enter_scope(self.relations[id.0].scope);
        let result = dispatch!(self, id, resolve);
        self.leave_scope();
        self.relations[id.0].resolve = if result.is_ok() {
            Pass::Done
        } else {
            Pass::Failed
        };
        result
    }

    pub(crate) fn relation_sql(&mut self, id: RelationId) -> SqlFragment {
        self.enter_scope(self.relations[id.0].scope);
        let sql = dispatch!(self, id, select_sql);
        self.leave_scope();
        sql
    }

    pub(crate) fn relation_from_sql(&mut self, id: RelationId) -> SqlFragment {
        self.enter_scope(self.relations[id.0].scope);
        let sql = dispatch!(self, id, from_sql);
        self.leave_scope();
        sql
    }

    pub(crate) fn emitted_columns(&self, id: RelationId) -> Vec<ColumnId> {
        dispatch!(self, id, emitted_columns)
    }

    pub(crate) fn children(&self, id: RelationId) -> Vec<RelationId> {
        let mut out = dispatch!(self, id, children);
        out.extend(self.relations[id.0].subqueries.iter().copied());
        out
    }

    /// Force suggested columns top-down so each relation sees the final
    /// liveness of its parent before deciding.
    pub(crate) fn suggest_columns(&mut self, id: RelationId) {
        if self.relations[id.0].suggested {
            return;
        }
        self.relations[id.0].suggested = true;
        if self.tag(id) == Tag::Select {
            SelectRel::suggest(self, id);
        }
        for child in self.children(id) {
            self.suggest_columns(child);
        }
    }

    /// Give every aliased relation below `id` a unique alias.
    pub(crate) fn assign_names(&mut self, id: RelationId) {
        if self.relations[id.0].named {
            return;
        }
        self.relations[id.0].named = true;
        if !matches!(self.tag(id), Tag::Select | Tag::Pivot) {
            let base = self.dialect.legal_name(&self.relations[id.0].name);
            let alias = self.aliases.unique(&base);
            self.relations[id.0].alias = Some(alias);
        }
        for child in self.children(id) {
            self.assign_names(child);
        }
    }

    /// Run the suggested-column and naming passes ahead of generation.
    pub(crate) fn prepare(&mut self, root: RelationId) {
        let bodies: Vec<RelationId> = self.ctes.iter().filter_map(|c| c.body).collect();
        for body in &bodies {
            self.suggest_columns(*body);
        }
        self.suggest_columns(root);
        for body in &bodies {
            self.assign_names(*body);
        }
        self.assign_names(root);
    }

    /// Quoted alias for use in SQL.
    pub(crate) fn sql_alias(&self, id: RelationId) -> String {
        let node = &self.relations[id.0];
        let alias = node.alias.as_deref().unwrap_or(&node.name);
        self.dialect.quote_identifier(alias)
    }

    /// `alias.column` for a column reference.
    pub(crate) fn column_sql(&self, id: ColumnId) -> String {
        let col = &self.columns[id.0];
        format!(
            "{}.{}",
            self.sql_alias(col.owner),
            self.dialect.quote_identifier(&col.alias)
        )
    }

    /// Whether a Select or Union above `id` orders its rows.
    pub(crate) fn ancestor_orders(&self, id: RelationId) -> bool {
        let mut current = self.relations[id.0].parent;
        while let Some(p) = current {
            let ordered = match &self.relations[p.0].kind {
                RelationKind::Select(s) => !s.order_by.is_empty(),
                RelationKind::Union(u) => !u.order_by.is_empty(),
                _ => false,
            };
            if ordered {
                return true;
            }
            current = self.relations[p.0].parent;
        }
        false
    }

    /// Indented dump of the tree below `id`, with column reference counts.
    pub fn explain(&self, id: RelationId) -> String {
        let mut out = String::new();
        self.explain_into(id, 0, &mut out);
        out
    }

    fn explain_into(&self, id: RelationId, depth: usize, out: &mut String) {
        let node = &self.relations[id.0];
        let _ = write!(
            out,
            "{}{} {}",
            "  ".repeat(depth),
            node.kind.label(),
            node.alias.as_deref().unwrap_or(&node.name)
        );
        let cols: Vec<String> = node
            .columns
            .iter()
            .map(|c| {
                let col = &self.columns[c.0];
                format!("{}:{}", col.name, col.ref_count())
            })
            .collect();
        let _ = writeln!(out, " [{}]", cols.join(", "));
        for child in self.children(id) {
            self.explain_into(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::MemorySchema;
    use crate::dialect::Dialect;

    pub(crate) fn test_binder() -> Binder {
        let ctx = QueryContext::new(Arc::new(MemorySchema::new("")), Dialect::Postgres);
        Binder::new(ctx, None, "")
    }

    impl Binder {
        pub(crate) fn new_test_relation(&mut self, name: &str) -> RelationId {
            let bctx = BuildCtx::new(Place::From, None);
            self.add_relation(
                name,
                RelationKind::Values(ValuesRel::default()),
                &bctx,
                Span::NONE,
            )
        }
    }

    #[test]
    fn test_naming_pass_uniquifies() {
        let mut b = test_binder();
        let a = b.new_test_relation("R");
        let c = b.new_test_relation("r");
        b.assign_names(a);
        b.assign_names(c);
        b.assign_names(a);
        assert_eq!(b.node(a).alias(), Some("R"));
        assert_eq!(b.node(c).alias(), Some("r_1"));
        assert_eq!(b.sql_alias(a), "\"R\"");
    }

    #[test]
    fn test_errors_are_located_and_deduplicated() {
        let ctx = QueryContext::new(Arc::new(MemorySchema::new("")), Dialect::Postgres);
        let source = "SELECT x\nFROM R";
        let mut b = Binder::new(ctx, Some("q"), source);
        let span = Span::at(&source[9..]);
        b.error(span, "Unknown field [x]");
        b.error(span, "Unknown field [x]");
        let diags = b.diagnostics();
        assert_eq!(diags.errors.len(), 1);
        assert_eq!((diags.errors[0].line, diags.errors[0].column), (2, 0));
        assert_eq!(diags.errors[0].query_name.as_deref(), Some("q"));
    }
}
