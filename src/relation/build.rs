//! Parse tree to relation tree.
//!
//! A select with a PIVOT clause becomes `Select -> Pivot -> LookupWrapper`,
//! plus one more Select on top when ORDER BY or LIMIT must apply after
//! pivoting. Selects in a FROM clause or at the root are wrapped in a
//! [`LookupWrapper`] so their foreign keys can be followed.

use std::sync::Arc;

use tracing::trace;

use crate::ast::{
    Expr, ExprKind, FieldKey, FromItem, JoinKind, Literal, ParamDecl, QueryExpr, SelectItem,
    SelectStmt, SetOpQuery, Span, Statement,
};
use crate::catalog::ContainerFilter;
use crate::query::QueryParameter;
use crate::types::Value;

use super::bound::BoundExpr;
use super::{
    BindResult, Binder, CteId, Halt, LookupWrapper, PivotRel, Place, RelationId, RelationKind,
    SelectRel, UnionRel, ValuesRel,
};

/// Where a relation is being built.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuildCtx {
    pub place: Place,
    pub parent: Option<RelationId>,
    /// Select whose FROM clause correlated references fall back to.
    pub outer: Option<RelationId>,
    /// Set inside a CTE body: the CTE and the union branch being built.
    pub cte_branch: Option<(CteId, usize)>,
}

impl BuildCtx {
    pub fn new(place: Place, parent: Option<RelationId>) -> Self {
        Self {
            place,
            parent,
            outer: None,
            cte_branch: None,
        }
    }

    pub fn with_outer(mut self, outer: Option<RelationId>) -> Self {
        self.outer = outer;
        self
    }

    fn child(self, place: Place, parent: RelationId) -> Self {
        Self {
            place,
            parent: Some(parent),
            ..self
        }
    }
}

/// One entry of a FROM clause, in join-tree shape.
#[derive(Debug, Clone)]
pub(crate) enum FromNode {
    Relation(RelationId),
    Join {
        kind: JoinKind,
        left: Box<FromNode>,
        right: Box<FromNode>,
        on: Option<Expr>,
        bound_on: Option<BoundExpr>,
    },
}

impl FromNode {
    /// Relations in the subtree, left to right.
    pub fn relations(&self, out: &mut Vec<RelationId>) {
        match self {
            FromNode::Relation(id) => out.push(*id),
            FromNode::Join { left, right, .. } => {
                left.relations(out);
                right.relations(out);
            }
        }
    }
}

pub(crate) fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Integer(n) => Value::Int(*n),
        Literal::Decimal(d) => Value::Decimal(d.clone()),
        Literal::String(s) => Value::String(s.clone()),
    }
}

impl Binder {
    /// Build the relation tree of a whole statement in the current scope.
    pub(crate) fn build_statement(&mut self, stmt: &Statement) -> BindResult<RelationId> {
        self.build_statement_at(stmt, BuildCtx::new(Place::Root, None))
    }

    /// Build a statement whose body sits at `bctx`, as a nested named query does.
    pub(crate) fn build_statement_at(
        &mut self,
        stmt: &Statement,
        bctx: BuildCtx,
    ) -> BindResult<RelationId> {
        self.register_parameters(&stmt.parameters);
        let mut failed = false;
        for def in &stmt.with {
            let cte = self.register_cte(def)?;
            let bctx = BuildCtx {
                place: Place::CteBody,
                parent: None,
                outer: None,
                cte_branch: Some((cte, 0)),
            };
            self.ctes[cte.0].building = true;
            let body = self.build_query(&def.query, bctx);
            self.ctes[cte.0].building = false;
            match body {
                Ok(body) => {
                    self.relations[body.0].name = def.name.clone();
                    self.ctes[cte.0].body = Some(body);
                }
                Err(Halt) => failed = true,
            }
        }
        let root = self.build_query(&stmt.body, bctx)?;
        if failed {
            return Err(Halt);
        }
        Ok(root)
    }

    fn register_parameters(&mut self, params: &[ParamDecl]) {
        let sid = self.current_scope();
        for p in params {
            if self.scopes[sid.0]
                .parameters
                .iter()
                .any(|q| q.name.eq_ignore_ascii_case(&p.name))
            {
                self.error(p.span, format!("Duplicate parameter: {}", p.name));
                continue;
            }
            self.scopes[sid.0].parameters.push(QueryParameter {
                name: p.name.clone(),
                jdbc_type: p.jdbc_type,
                default: p.default.as_ref().map(literal_value),
                hidden: p.name.starts_with("@@"),
            });
        }
    }

    pub(crate) fn build_query(&mut self, query: &QueryExpr, bctx: BuildCtx) -> BindResult<RelationId> {
        match query {
            QueryExpr::Select(s) => self.build_select_tree(s, bctx),
            QueryExpr::SetOp(u) => {
                let id = self.build_union(u, bctx)?;
                if matches!(bctx.place, Place::Root | Place::From) {
                    return Ok(self.wrap_lookups(id, bctx));
                }
                Ok(id)
            }
        }
    }

    fn build_select_tree(&mut self, stmt: &SelectStmt, bctx: BuildCtx) -> BindResult<RelationId> {
        let Some(clause) = &stmt.pivot else {
            let id = self.build_select(Arc::new(stmt.clone()), bctx, None)?;
            if matches!(bctx.place, Place::Root | Place::From) {
                return Ok(self.wrap_lookups(id, bctx));
            }
            return Ok(id);
        };

        let post_pivot = !stmt.order_by.is_empty() || stmt.limit.is_some();
        let mut source = stmt.clone();
        source.pivot = None;
        source.order_by.clear();
        source.limit = None;

        // outermost first so every layer knows its parent
        let top_ctx = bctx;
        let outer_select = if post_pivot {
            Some(self.add_relation(
                "select",
                RelationKind::Select(SelectRel::new(Arc::new(post_pivot_stmt(stmt)))),
                &top_ctx,
                stmt.span,
            ))
        } else {
            None
        };
        let wrapper_ctx = match outer_select {
            Some(o) => bctx.child(Place::From, o),
            None => bctx,
        };
        let wrapper = self.add_relation(
            "pivot",
            RelationKind::Lookup(LookupWrapper::new(RelationId(usize::MAX))),
            &wrapper_ctx,
            clause.span,
        );
        let pivot = self.add_relation(
            "pivot",
            RelationKind::Pivot(PivotRel::new(clause.clone())),
            &bctx.child(Place::From, wrapper),
            clause.span,
        );
        let source = self.build_select(Arc::new(source), bctx.child(Place::PivotSource, pivot), None)?;
        if let RelationKind::Pivot(p) = &mut self.relations[pivot.0].kind {
            p.source = source;
        }
        if let RelationKind::Lookup(w) = &mut self.relations[wrapper.0].kind {
            w.child = pivot;
        }
        let Some(outer_select) = outer_select else {
            return Ok(wrapper);
        };
        self.relations[wrapper.0].names = vec![FieldKey::from_name("pivot")];
        if let RelationKind::Select(s) = &mut self.relations[outer_select.0].kind {
            s.from = vec![FromNode::Relation(wrapper)];
        }
        if matches!(bctx.place, Place::Root | Place::From) {
            return Ok(self.wrap_lookups(outer_select, bctx));
        }
        Ok(outer_select)
    }

    /// Put a lookup wrapper between `child` and its parent.
    pub(crate) fn wrap_lookups(&mut self, child: RelationId, bctx: BuildCtx) -> RelationId {
        let span = self.relations[child.0].span;
        let name = self.relations[child.0].name.clone();
        let wrapper = self.add_relation(
            &name,
            RelationKind::Lookup(LookupWrapper::new(child)),
            &bctx,
            span,
        );
        self.relations[child.0].parent = Some(wrapper);
        wrapper
    }

    pub(crate) fn build_select(
        &mut self,
        stmt: Arc<SelectStmt>,
        bctx: BuildCtx,
        from: Option<Vec<FromNode>>,
    ) -> BindResult<RelationId> {
        let id = self.add_relation(
            "select",
            RelationKind::Select(SelectRel::new(Arc::clone(&stmt))),
            &bctx,
            stmt.span,
        );
        let nodes = match from {
            Some(nodes) => nodes,
            None => {
                let child = bctx.child(Place::From, id);
                let mut nodes = Vec::new();
                let mut failed = false;
                for item in &stmt.from {
                    match self.build_from(item, child) {
                        Ok(node) => nodes.push(node),
                        Err(Halt) => failed = true,
                    }
                }
                if failed {
                    return Err(Halt);
                }
                nodes
            }
        };
        self.check_from_names(&nodes, stmt.span)?;
        if let RelationKind::Select(s) = &mut self.relations[id.0].kind {
            s.from = nodes;
        }
        Ok(id)
    }

    fn check_from_names(&mut self, nodes: &[FromNode], span: Span) -> BindResult<()> {
        let mut ids = Vec::new();
        for node in nodes {
            node.relations(&mut ids);
        }
        let mut seen: Vec<String> = Vec::new();
        for id in ids {
            let name = self.relations[id.0].name.to_lowercase();
            if self.relations[id.0].names.is_empty() {
                continue;
            }
            if seen.contains(&name) {
                let shown = self.relations[id.0].name.clone();
                self.error(
                    span,
                    format!("{} was specified more than once in the FROM clause", shown),
                );
                return Err(Halt);
            }
            seen.push(name);
        }
        Ok(())
    }

    fn build_from(&mut self, item: &FromItem, bctx: BuildCtx) -> BindResult<FromNode> {
        match item {
            FromItem::Table {
                name,
                alias,
                annotations,
                span,
            } => {
                let filter = self.container_filter_annotation(annotations, *span);
                let id = self.resolve_table(name, filter, bctx, *span)?;
                let node = &mut self.relations[id.0];
                match alias {
                    Some(a) => {
                        node.name = a.clone();
                        node.names = vec![FieldKey::from_name(a.clone())];
                    }
                    None => {
                        node.name = name.name().to_string();
                        node.names = vec![FieldKey::from_name(name.name())];
                        if name.len() > 1 {
                            node.names.push(name.clone());
                        }
                    }
                }
                Ok(FromNode::Relation(id))
            }
            FromItem::Subquery { query, alias, .. } => {
                let id = self.build_query(query, bctx)?;
                let node = &mut self.relations[id.0];
                match alias {
                    Some(a) => {
                        node.name = a.clone();
                        node.names = vec![FieldKey::from_name(a.clone())];
                    }
                    None => node.name = "_subquery".to_string(),
                }
                Ok(FromNode::Relation(id))
            }
            FromItem::Values { rows, alias, span } => {
                let Some(alias) = alias else {
                    self.error(*span, "VALUES list in FROM clause requires an alias");
                    return Err(Halt);
                };
                let id = self.add_relation(
                    alias,
                    RelationKind::Values(ValuesRel::new(rows.clone())),
                    &bctx,
                    *span,
                );
                self.relations[id.0].names = vec![FieldKey::from_name(alias.clone())];
                Ok(FromNode::Relation(id))
            }
            FromItem::Join {
                kind,
                left,
                right,
                on,
                span,
            } => {
                if *kind == JoinKind::Cross && on.is_some() {
                    self.error(*span, "CROSS JOIN does not take an ON clause");
                    return Err(Halt);
                }
                if *kind != JoinKind::Cross && on.is_none() {
                    self.error(*span, format!("{} requires an ON clause", kind.keyword()));
                    return Err(Halt);
                }
                let left = self.build_from(left, bctx);
                let right = self.build_from(right, bctx);
                Ok(FromNode::Join {
                    kind: *kind,
                    left: Box::new(left?),
                    right: Box::new(right?),
                    on: on.clone(),
                    bound_on: None,
                })
            }
        }
    }

    fn container_filter_annotation(
        &mut self,
        annotations: &[(String, Literal)],
        span: Span,
    ) -> Option<ContainerFilter> {
        let mut filter = None;
        for (name, value) in annotations {
            if !name.eq_ignore_ascii_case("ContainerFilter") {
                self.warning(span, format!("Unknown table annotation: {}", name));
                continue;
            }
            let Literal::String(text) = value else {
                self.error(span, "ContainerFilter annotation requires a string value");
                continue;
            };
            match text.parse::<ContainerFilter>() {
                Ok(cf) => filter = Some(cf),
                Err(message) => self.error(span, message),
            }
        }
        filter
    }

    fn build_union(&mut self, query: &SetOpQuery, bctx: BuildCtx) -> BindResult<RelationId> {
        let id = self.add_relation(
            "union",
            RelationKind::Union(UnionRel::new(query)),
            &bctx,
            query.span,
        );
        let mut branches = Vec::new();
        let mut failed = false;
        for (i, term) in query.terms.iter().enumerate() {
            let cte_branch = bctx.cte_branch.map(|(cte, branch)| {
                if bctx.place == Place::CteBody {
                    (cte, i)
                } else {
                    (cte, branch)
                }
            });
            let child = BuildCtx {
                cte_branch,
                ..bctx.child(Place::UnionBranch, id)
            };
            match self.build_query(term, child) {
                Ok(b) => branches.push(b),
                Err(Halt) => failed = true,
            }
        }
        trace!(branches = branches.len(), "built union");
        if let RelationKind::Union(u) = &mut self.relations[id.0].kind {
            u.branches = branches;
        }
        if failed {
            return Err(Halt);
        }
        Ok(id)
    }
}

/// `SELECT * ... ORDER BY ... LIMIT ...` applied on top of a pivot.
fn post_pivot_stmt(stmt: &SelectStmt) -> SelectStmt {
    SelectStmt {
        distinct: false,
        columns: vec![SelectItem {
            expr: Expr::new(ExprKind::Star(None), stmt.span),
            alias: None,
            span: stmt.span,
        }],
        from: Vec::new(),
        where_clause: None,
        group_by: Vec::new(),
        having: None,
        pivot: None,
        order_by: stmt.order_by.clone(),
        limit: stmt.limit,
        span: stmt.span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::relation::tests::test_binder;
    use crate::relation::Tag;

    #[test]
    fn test_values_requires_alias() {
        let mut b = test_binder();
        let stmt = parse("SELECT * FROM (VALUES (1, 2))").unwrap();
        assert!(b.build_statement(&stmt).is_err());
        assert_eq!(
            b.diagnostics().errors[0].message,
            "VALUES list in FROM clause requires an alias"
        );
    }

    #[test]
    fn test_pivot_layers() {
        let mut b = test_binder();
        let stmt = parse(
            "SELECT column1, column2, COUNT(*) AS c FROM (VALUES (1, 2)) v \
             GROUP BY column1, column2 PIVOT c BY column2 IN (1, 2) ORDER BY column1 LIMIT 3",
        )
        .unwrap();
        let root = b.build_statement(&stmt).unwrap();
        assert_eq!(b.tag(root), Tag::Lookup);
        let outer = b.children(root)[0];
        assert_eq!(b.tag(outer), Tag::Select);
        let wrapper = b.children(outer)[0];
        assert_eq!(b.tag(wrapper), Tag::Lookup);
        let pivot = b.children(wrapper)[0];
        assert_eq!(b.tag(pivot), Tag::Pivot);
        assert_eq!(b.node(pivot).parent, Some(wrapper));
        let source = b.children(pivot)[0];
        assert_eq!(b.node(source).place, Place::PivotSource);
    }

    #[test]
    fn test_join_on_validation() {
        let mut b = test_binder();
        let stmt = parse("SELECT * FROM (VALUES (1)) a INNER JOIN (VALUES (2)) b").unwrap();
        assert!(b.build_statement(&stmt).is_err());
        assert_eq!(
            b.diagnostics().errors[0].message,
            "INNER JOIN requires an ON clause"
        );
    }
}
