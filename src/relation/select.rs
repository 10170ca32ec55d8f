//! The Select relation.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::ast::{BinaryOp, ExprKind, FieldKey, Literal, SelectStmt, Span};
use crate::dialect::{join_fragments, SelectParts};
use crate::fragment::SqlFragment;
use crate::types::JdbcType;

use super::bound::{BindCtx, BoundExpr, BoundKind, ResolveCtx};
use super::build::FromNode;
use super::{
    BindResult, Binder, ColumnId, ColumnOrigin, Halt, Place, RelationId, RelationKind,
    RelationOps, Tag,
};

#[derive(Debug)]
pub(crate) struct SelectRel {
    pub stmt: Arc<SelectStmt>,
    pub from: Vec<FromNode>,
    pub items: Vec<SelectItemData>,
    pub where_clause: Option<BoundExpr>,
    pub group_by: Vec<BoundExpr>,
    pub having: Option<BoundExpr>,
    pub order_by: Vec<OrderData>,
    /// GROUP BY present or an aggregate in the select list.
    pub aggregate: bool,
}

#[derive(Debug)]
pub(crate) struct SelectItemData {
    pub column: ColumnId,
    pub expr: BoundExpr,
}

#[derive(Debug)]
pub(crate) enum OrderTarget {
    /// A select-list column, emitted by alias.
    Item(usize),
    Expr(BoundExpr),
}

#[derive(Debug)]
pub(crate) struct OrderData {
    pub target: OrderTarget,
    pub descending: bool,
}

impl SelectRel {
    pub fn new(stmt: Arc<SelectStmt>) -> Self {
        Self {
            stmt,
            from: Vec::new(),
            items: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            aggregate: false,
        }
    }

    /// Add the columns every consumer implicitly needs: GUIDs and keys.
    /// A select nobody reads from emits its whole list.
    pub(crate) fn suggest(b: &mut Binder, id: RelationId) {
        let items: Vec<ColumnId> = sel(b, id).items.iter().map(|i| i.column).collect();
        for &c in &items {
            let col = b.column(c);
            if (col.jdbc_type == JdbcType::Guid || col.is_key) && !b.is_live(c) {
                b.hold(id, c);
            }
        }
        if !items.iter().any(|c| b.is_live(*c)) {
            for c in items {
                b.hold(id, c);
            }
        }
    }
}

fn sel(b: &Binder, id: RelationId) -> &SelectRel {
    match &b.relations[id.0].kind {
        RelationKind::Select(s) => s,
        other => unreachable!("select relation expected, found {}", other.label()),
    }
}

fn sel_mut(b: &mut Binder, id: RelationId) -> &mut SelectRel {
    match &mut b.relations[id.0].kind {
        RelationKind::Select(s) => s,
        other => unreachable!("select relation expected, found {}", other.label()),
    }
}

impl Binder {
    /// Relations in a select's FROM clause; empty for other relations.
    pub(crate) fn from_relations(&self, id: RelationId) -> Vec<RelationId> {
        let mut out = Vec::new();
        if let RelationKind::Select(s) = &self.relations[id.0].kind {
            for node in &s.from {
                node.relations(&mut out);
            }
        }
        out
    }

    /// Resolve a possibly dotted field against the FROM clause of `sel`,
    /// falling back to enclosing selects for correlated references.
    pub(crate) fn declare_field(
        &mut self,
        sel: RelationId,
        key: &FieldKey,
        span: Span,
        quiet: bool,
    ) -> Option<ColumnId> {
        if let Some(c) = self.find_field(sel, key, span) {
            return c;
        }
        if let Some(outer) = self.relations[sel.0].outer {
            if let Some(c) = self.declare_field(outer, key, span, true) {
                return Some(c);
            }
        }
        if !quiet {
            self.error(span, format!("Unknown field [{}]", key));
        }
        None
    }

    /// `None` when nothing in this FROM clause matched; `Some(None)` when a
    /// match was found but the reference is invalid (already reported).
    fn find_field(&mut self, sel: RelationId, key: &FieldKey, span: Span) -> Option<Option<ColumnId>> {
        let from = self.from_relations(sel);
        let parts = key.parts();

        // longest table prefix first
        for k in (1..parts.len()).rev() {
            let prefix = key.prefix(k);
            let hit = from
                .iter()
                .copied()
                .find(|r| self.relations[r.0].names.iter().any(|n| *n == prefix));
            if let Some(rel) = hit {
                let Some(first) = self.find_column(rel, &parts[k]) else {
                    continue;
                };
                return Some(self.follow_lookups(first, &parts[k + 1..], key, span));
            }
        }

        let hits: Vec<ColumnId> = from
            .iter()
            .filter_map(|r| self.find_column(*r, &parts[0]))
            .collect();
        match hits.as_slice() {
            [] => None,
            [only] => Some(self.follow_lookups(*only, &parts[1..], key, span)),
            _ => {
                self.error(span, format!("Ambiguous field: {}", parts[0]));
                Some(None)
            }
        }
    }

    fn follow_lookups(
        &mut self,
        mut col: ColumnId,
        rest: &[String],
        key: &FieldKey,
        span: Span,
    ) -> Option<ColumnId> {
        for part in rest {
            match self.lookup_column(col, part) {
                Some(next) => col = next,
                None => {
                    self.error(span, format!("Unknown field [{}]", key));
                    return None;
                }
            }
        }
        Some(col)
    }

    /// Bind an expression of a select clause and keep its columns alive.
    fn bind_held(&mut self, id: RelationId, expr: &crate::ast::Expr) -> BoundExpr {
        let mut deps = Vec::new();
        let bound = self.bind_expr(BindCtx::new(id), expr, &mut deps);
        for d in deps {
            self.hold(id, d);
        }
        bound
    }

    fn bind_from_node(&mut self, id: RelationId, node: &mut FromNode) {
        if let FromNode::Join {
            left,
            right,
            on,
            bound_on,
            ..
        } = node
        {
            self.bind_from_node(id, left);
            self.bind_from_node(id, right);
            if let Some(on) = on {
                *bound_on = Some(self.bind_held(id, on));
            }
        }
    }

    fn resolve_from_node(&mut self, node: &mut FromNode) {
        if let FromNode::Join {
            left,
            right,
            bound_on,
            ..
        } = node
        {
            self.resolve_from_node(left);
            self.resolve_from_node(right);
            if let Some(on) = bound_on {
                self.resolve_expr(on, ResolveCtx::clause("ON", false));
            }
        }
    }

    /// Create the output column of one select-list entry.
    fn add_item(
        &mut self,
        id: RelationId,
        name: &str,
        expr: BoundExpr,
        deps: Vec<ColumnId>,
        items: &mut Vec<SelectItemData>,
    ) {
        let column = self.add_column(id, name, name, expr.ty, ColumnOrigin::Base);
        if let BoundKind::Column(src) = expr.kind {
            let (fk, is_key, hidden) = {
                let s = self.column(src);
                (s.fk.clone(), s.is_key, s.hidden && s.name.eq_ignore_ascii_case(name))
            };
            let col = self.column_mut(column);
            col.fk = fk;
            col.is_key = is_key;
            col.hidden = hidden;
        }
        let phi = self.derived_phi(&deps);
        self.column_mut(column).phi = phi;
        for d in deps {
            self.add_dep(column, d);
        }
        items.push(SelectItemData { column, expr });
    }

    /// Unique output name, or `None` when duplicates are rejected.
    fn item_name(&mut self, wanted: &str, taken: &mut Vec<String>, span: Span) -> Option<String> {
        let mut name = wanted.to_string();
        if taken.contains(&name.to_lowercase()) {
            if !self.ctx.allow_duplicate_columns {
                self.error(span, format!("Duplicate column '{}'", wanted));
                return None;
            }
            let mut n = 1;
            while taken.contains(&format!("{}_{}", wanted, n).to_lowercase()) {
                n += 1;
            }
            name = format!("{}_{}", wanted, n);
        }
        taken.push(name.to_lowercase());
        Some(name)
    }

    /// Whether the select is a no-op over its single FROM relation.
    fn elided_child(&self, id: RelationId) -> Option<RelationId> {
        let node = &self.relations[id.0];
        if matches!(
            node.place,
            Place::UnionBranch | Place::CteBody | Place::PivotSource
        ) {
            return None;
        }
        if let Some(p) = node.parent {
            if self.tag(p) == Tag::Union {
                return None;
            }
        }
        let s = sel(self, id);
        let stmt = &s.stmt;
        if stmt.distinct
            || s.where_clause.is_some()
            || !s.group_by.is_empty()
            || s.having.is_some()
            || !s.order_by.is_empty()
            || stmt.limit.is_some()
            || s.aggregate
        {
            return None;
        }
        let [FromNode::Relation(child)] = s.from.as_slice() else {
            return None;
        };
        if !matches!(self.tag(*child), Tag::Lookup | Tag::Union) {
            return None;
        }
        let mut sources = Vec::new();
        for item in s.items.iter().filter(|i| self.is_live(i.column)) {
            let BoundKind::Column(src) = item.expr.kind else {
                return None;
            };
            let src_col = self.column(src);
            if src_col.owner != *child || src_col.alias != self.column(item.column).alias {
                return None;
            }
            sources.push(src);
        }
        (sources == self.emitted_columns(*child)).then_some(*child)
    }

    fn from_node_sql(&mut self, node: &FromNode) -> SqlFragment {
        match node {
            FromNode::Relation(r) => self.relation_from_sql(*r),
            FromNode::Join {
                kind,
                left,
                right,
                bound_on,
                ..
            } => {
                let mut sql = self.from_node_sql(left);
                let mut rhs = self.from_node_sql(right);
                if matches!(**right, FromNode::Join { .. }) {
                    rhs = rhs.wrap("(", ")");
                }
                sql.append("\n")
                    .append(kind.keyword())
                    .append(" ")
                    .append_fragment(&rhs);
                if let Some(on) = bound_on {
                    let on = self.predicate_sql(on);
                    sql.append(" ON ").append_fragment(&on);
                }
                sql
            }
        }
    }

    /// ORDER BY after dropping what the context makes meaningless.
    fn effective_order(&mut self, id: RelationId) -> bool {
        let s = sel(self, id);
        if s.order_by.is_empty() {
            return false;
        }
        let limited = s.stmt.limit.is_some();
        self.keep_order_by(id, limited)
    }

    /// Whether an ORDER BY on `id` is emitted. Only the root, a limited
    /// query or the outermost ordering in a nested stack keeps it.
    pub(crate) fn keep_order_by(&mut self, id: RelationId, limited: bool) -> bool {
        if self.relations[id.0].place == Place::Root || limited {
            return true;
        }
        if self.ancestor_orders(id) {
            trace!(relation = %id, "dropping ORDER BY overridden by an enclosing query");
            return false;
        }
        if !self.dialect.supports_unlimited_subquery_order_by() {
            let span = self.relations[id.0].span;
            let message = format!(
                "ORDER BY without LIMIT is not supported in a subquery by {} and was ignored",
                self.ctx.dialect
            );
            debug!(relation = %id, "{}", message);
            self.warning(span, message);
            return false;
        }
        true
    }
}

/// Top-level AND terms of a predicate.
fn conjuncts(e: &BoundExpr) -> Vec<&BoundExpr> {
    match &e.kind {
        BoundKind::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            let mut out = conjuncts(left);
            out.extend(conjuncts(right));
            out
        }
        _ => vec![e],
    }
}

impl RelationOps for SelectRel {
    fn declare(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let stmt = Arc::clone(&sel(b, id).stmt);
        let place = b.relations[id.0].place;

        let mut failed = false;
        for r in b.from_relations(id) {
            if b.declare_relation(r).is_err() {
                failed = true;
            }
        }
        if failed {
            return Err(Halt);
        }

        // ON predicates see the whole FROM clause, so bind against a copy
        let mut from = sel(b, id).from.clone();
        for node in from.iter_mut() {
            b.bind_from_node(id, node);
        }
        sel_mut(b, id).from = from;

        // select list
        let mut items = Vec::new();
        let mut taken = Vec::new();
        let mut unnamed = 0;
        for item in &stmt.columns {
            if let ExprKind::Star(table) = &item.expr.kind {
                let sources = match table {
                    None => b.from_relations(id),
                    Some(t) => {
                        let found = b
                            .from_relations(id)
                            .into_iter()
                            .find(|r| b.relations[r.0].names.iter().any(|n| n == t));
                        match found {
                            Some(r) => vec![r],
                            None => {
                                b.error(item.span, format!("Unknown table: {}", t));
                                continue;
                            }
                        }
                    }
                };
                for r in sources {
                    for src in b.star_columns(r) {
                        let (name, ty) = {
                            let c = b.column(src);
                            (c.name.clone(), c.jdbc_type)
                        };
                        let Some(name) = b.item_name(&name, &mut taken, item.span) else {
                            continue;
                        };
                        let expr = BoundExpr::new(BoundKind::Column(src), ty, item.span);
                        b.add_item(id, &name, expr, vec![src], &mut items);
                    }
                }
                continue;
            }

            let mut deps = Vec::new();
            let expr = b.bind_expr(BindCtx::new(id), &item.expr, &mut deps);
            let wanted = match (&item.alias, item.expr.as_identifier()) {
                (Some(alias), _) => alias.clone(),
                (None, Some(key)) => key.name().to_string(),
                (None, None) => {
                    unnamed += 1;
                    let name = format!("Expr{}", unnamed);
                    if place != Place::Expression {
                        b.warning(
                            item.span,
                            format!("Expression column requires an alias; using {}", name),
                        );
                    }
                    name
                }
            };
            let Some(name) = b.item_name(&wanted, &mut taken, item.span) else {
                continue;
            };
            b.add_item(id, &name, expr, deps, &mut items);
        }
        if items.is_empty() && !b.has_errors() {
            b.error(stmt.span, "SELECT list is empty");
        }
        if matches!(
            place,
            Place::Root
                | Place::UnionBranch
                | Place::CteBody
                | Place::PivotSource
                | Place::Expression
        ) {
            for item in &items {
                b.hold(id, item.column);
            }
        }

        let where_clause = stmt.where_clause.as_ref().map(|w| b.bind_held(id, w));

        let mut group_by = Vec::new();
        for g in &stmt.group_by {
            if g.is_constant() {
                b.error(g.span, "GROUP BY expression cannot be a constant");
                continue;
            }
            group_by.push(b.bind_held(id, g));
        }

        let having = stmt.having.as_ref().map(|h| b.bind_held(id, h));

        let mut order_by = Vec::new();
        for o in &stmt.order_by {
            let target = match &o.expr.kind {
                ExprKind::Literal(Literal::Integer(n)) => {
                    match usize::try_from(*n).ok().filter(|n| (1..=items.len()).contains(n)) {
                        Some(n) => OrderTarget::Item(n - 1),
                        None => continue,
                    }
                }
                _ if o.expr.is_constant() => continue,
                ExprKind::Identifier(key) if key.len() == 1 => {
                    let by_alias = items.iter().position(|i| {
                        b.column(i.column).name.eq_ignore_ascii_case(key.name())
                    });
                    match by_alias {
                        Some(i) => OrderTarget::Item(i),
                        None => OrderTarget::Expr(b.bind_held(id, &o.expr)),
                    }
                }
                _ => OrderTarget::Expr(b.bind_held(id, &o.expr)),
            };
            if let OrderTarget::Item(i) = target {
                b.hold(id, items[i].column);
            }
            order_by.push(OrderData {
                target,
                descending: o.descending,
            });
        }

        let aggregate = !group_by.is_empty()
            || items.iter().any(|i| i.expr.contains_aggregate())
            || having.as_ref().is_some_and(BoundExpr::contains_aggregate);
        if having.is_some() && !items.iter().any(|i| i.expr.contains_aggregate()) {
            b.error(
                stmt.having.as_ref().map_or(stmt.span, |h| h.span),
                "HAVING requires an aggregate in the select list",
            );
        }

        let s = sel_mut(b, id);
        s.items = items;
        s.where_clause = where_clause;
        s.group_by = group_by;
        s.having = having;
        s.order_by = order_by;
        s.aggregate = aggregate;
        Ok(())
    }

    fn resolve(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let mut failed = false;
        for r in b.from_relations(id) {
            if b.resolve_relation(r).is_err() {
                failed = true;
            }
        }
        if failed {
            return Err(Halt);
        }

        let mut from = sel(b, id).from.clone();
        for node in from.iter_mut() {
            b.resolve_from_node(node);
        }
        sel_mut(b, id).from = from;

        let mut items = std::mem::take(&mut sel_mut(b, id).items);
        for item in items.iter_mut() {
            b.resolve_expr(&mut item.expr, ResolveCtx::clause("SELECT", true));
            b.column_mut(item.column).jdbc_type = item.expr.ty;
        }
        sel_mut(b, id).items = items;

        if let Some(mut w) = sel_mut(b, id).where_clause.take() {
            b.resolve_expr(&mut w, ResolveCtx::clause("WHERE", false));
            sel_mut(b, id).where_clause = Some(w);
        }
        let mut group_by = std::mem::take(&mut sel_mut(b, id).group_by);
        for g in group_by.iter_mut() {
            b.resolve_expr(g, ResolveCtx::clause("GROUP BY", false));
        }
        sel_mut(b, id).group_by = group_by;
        if let Some(mut h) = sel_mut(b, id).having.take() {
            b.resolve_expr(&mut h, ResolveCtx::clause("HAVING", true));
            sel_mut(b, id).having = Some(h);
        }
        let mut order_by = std::mem::take(&mut sel_mut(b, id).order_by);
        for o in order_by.iter_mut() {
            if let OrderTarget::Expr(e) = &mut o.target {
                b.resolve_expr(e, ResolveCtx::clause("ORDER BY", true));
            }
        }
        sel_mut(b, id).order_by = order_by;
        Ok(())
    }

    fn select_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        if let Some(child) = b.elided_child(id) {
            trace!(relation = %id, child = %child, "eliding pass-through select");
            return b.relation_sql(child);
        }

        let columns: Vec<(BoundExpr, ColumnId)> = {
            let emitted = Self::emitted_columns(b, id);
            sel(b, id)
                .items
                .iter()
                .filter(|i| emitted.contains(&i.column))
                .map(|i| (i.expr.clone(), i.column))
                .collect()
        };
        let mut list = Vec::new();
        for (expr, column) in &columns {
            let mut sql = b.value_sql(expr);
            let alias = b.dialect.quote_identifier(&b.column(*column).alias);
            sql.append(" AS ").append(&alias);
            list.push(sql);
        }
        let columns_sql = join_fragments(list.iter(), ",\n");

        let mut body = SqlFragment::new();
        let from = sel(b, id).from.clone();
        if !from.is_empty() {
            let nodes: Vec<SqlFragment> = from.iter().map(|n| b.from_node_sql(n)).collect();
            body.append("FROM ").append_fragment(&join_fragments(nodes.iter(), ",\n"));
        }

        if let Some(w) = sel(b, id).where_clause.clone() {
            let terms: Vec<SqlFragment> = conjuncts(&w)
                .into_iter()
                .map(|t| b.predicate_sql(t).wrap("(", ")"))
                .collect();
            body.append("\nWHERE ")
                .append_fragment(&join_fragments(terms.iter(), " AND "));
        }
        let group_by = sel(b, id).group_by.clone();
        if !group_by.is_empty() {
            let keys: Vec<SqlFragment> = group_by.iter().map(|g| b.expr_sql(g)).collect();
            body.append("\nGROUP BY ")
                .append_fragment(&join_fragments(keys.iter(), ", "));
        }
        if let Some(h) = sel(b, id).having.clone() {
            let h = b.predicate_sql(&h);
            body.append("\nHAVING ").append_fragment(&h);
        }

        let order_by = if b.effective_order(id) {
            let targets: Vec<(Option<usize>, Option<BoundExpr>, bool)> = sel(b, id)
                .order_by
                .iter()
                .map(|o| match &o.target {
                    OrderTarget::Item(i) => (Some(*i), None, o.descending),
                    OrderTarget::Expr(e) => (None, Some(e.clone()), o.descending),
                })
                .collect();
            let mut keys = Vec::new();
            for (item, expr, descending) in targets {
                let mut key = match (item, expr) {
                    (Some(i), _) => {
                        let column = sel(b, id).items[i].column;
                        SqlFragment::from_sql(b.dialect.quote_identifier(&b.column(column).alias))
                    }
                    (None, Some(e)) => b.expr_sql(&e),
                    (None, None) => continue,
                };
                if descending {
                    key.append(" DESC");
                }
                keys.push(key);
            }
            (!keys.is_empty()).then(|| join_fragments(keys.iter(), ", "))
        } else {
            None
        };

        let s = sel(b, id);
        let parts = SelectParts {
            distinct: s.stmt.distinct,
            columns: columns_sql,
            body,
            order_by,
            limit: s.stmt.limit.map(|l| l.count),
            offset: s.stmt.limit.and_then(|l| l.offset),
        };
        b.dialect.limit_rows(parts)
    }

    fn emitted_columns(b: &Binder, id: RelationId) -> Vec<ColumnId> {
        let items: Vec<ColumnId> = sel(b, id).items.iter().map(|i| i.column).collect();
        let live: Vec<ColumnId> = items.iter().copied().filter(|c| b.is_live(*c)).collect();
        if live.is_empty() {
            items
        } else {
            live
        }
    }

    fn children(b: &Binder, id: RelationId) -> Vec<RelationId> {
        b.from_relations(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::tests::test_binder;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_conjuncts_split_top_level_and() {
        let lit = |n| BoundExpr::new(BoundKind::Literal(Literal::Integer(n)), JdbcType::Integer, Span::NONE);
        let and = |l, r| {
            BoundExpr::new(
                BoundKind::Binary {
                    op: BinaryOp::And,
                    left: Box::new(l),
                    right: Box::new(r),
                },
                JdbcType::Boolean,
                Span::NONE,
            )
        };
        let e = and(and(lit(1), lit(2)), lit(3));
        assert_eq!(conjuncts(&e).len(), 3);
    }

    #[test]
    fn test_duplicate_names_are_suffixed() {
        let mut b = test_binder();
        let mut taken = Vec::new();
        let names: Vec<String> = ["d", "seven", "D", "d"]
            .iter()
            .filter_map(|n| b.item_name(n, &mut taken, Span::NONE))
            .collect();
        assert_eq!(names, vec!["d", "seven", "D_1", "d_2"]);
    }

    #[test]
    fn test_duplicate_names_rejected_when_disallowed() {
        let mut b = test_binder();
        b.ctx.allow_duplicate_columns = false;
        let mut taken = Vec::new();
        assert!(b.item_name("d", &mut taken, Span::NONE).is_some());
        assert!(b.item_name("d", &mut taken, Span::NONE).is_none());
        assert_eq!(b.diagnostics().errors[0].message, "Duplicate column 'd'");
    }
}
