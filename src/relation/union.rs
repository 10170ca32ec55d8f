//! UNION / UNION ALL / INTERSECT / EXCEPT.

use tracing::trace;

use crate::ast::{ExprKind, Limit, Literal, SetOp, SetOpQuery, Span};
use crate::dialect::{join_fragments, SelectParts};
use crate::fragment::SqlFragment;
use crate::types::JdbcType;

use super::{BindResult, Binder, ColumnId, ColumnOrigin, Halt, RelationId, RelationKind, RelationOps};

#[derive(Debug)]
pub(crate) struct UnionRel {
    pub op: SetOp,
    pub branches: Vec<RelationId>,
    query: SetOpQuery,
    /// Output column index and direction.
    pub order_by: Vec<(usize, bool)>,
    pub limit: Option<Limit>,
    pub span: Span,
}

impl UnionRel {
    pub fn new(query: &SetOpQuery) -> Self {
        Self {
            op: query.op,
            branches: Vec::new(),
            query: SetOpQuery {
                terms: Vec::new(),
                ..query.clone()
            },
            order_by: Vec::new(),
            limit: query.limit,
            span: query.span,
        }
    }
}

fn union(b: &Binder, id: RelationId) -> &UnionRel {
    match &b.relations[id.0].kind {
        RelationKind::Union(u) => u,
        other => unreachable!("union relation expected, found {}", other.label()),
    }
}

fn union_mut(b: &mut Binder, id: RelationId) -> &mut UnionRel {
    match &mut b.relations[id.0].kind {
        RelationKind::Union(u) => u,
        other => unreachable!("union relation expected, found {}", other.label()),
    }
}

impl Binder {
    /// Whether a branch must be nested as `SELECT * FROM (...)` to keep
    /// its own ORDER BY, LIMIT or set operation.
    fn nested_branch(&self, branch: RelationId) -> bool {
        match &self.relations[branch.0].kind {
            RelationKind::Select(s) => !s.stmt.order_by.is_empty() || s.stmt.limit.is_some(),
            RelationKind::Union(_) => true,
            _ => false,
        }
    }
}

impl RelationOps for UnionRel {
    /// The first branch defines the output columns before the others are
    /// declared, so a recursive reference in a later branch can see them.
    fn declare(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let branches = union(b, id).branches.clone();
        let Some((&first, rest)) = branches.split_first() else {
            return Err(Halt);
        };
        b.declare_relation(first)?;
        let first_columns = b.base_columns(first);
        for src in &first_columns {
            let (name, alias, ty, fk, phi) = {
                let s = b.column(*src);
                (s.name.clone(), s.alias.clone(), s.jdbc_type, s.fk.clone(), s.phi)
            };
            let c = b.add_column(id, &name, &alias, ty, ColumnOrigin::Base);
            let col = b.column_mut(c);
            col.fk = fk;
            col.phi = phi;
            b.add_dep(c, *src);
        }

        let mut failed = false;
        for branch in rest {
            if b.declare_relation(*branch).is_err() {
                failed = true;
            }
        }
        if failed {
            return Err(Halt);
        }
        let span = union(b, id).span;
        let columns = b.relations[id.0].columns.clone();
        for branch in rest {
            let branch_columns = b.base_columns(*branch);
            if branch_columns.len() != first_columns.len() {
                b.error(span, "Queries in a UNION must have the same number of columns");
                return Err(Halt);
            }
            for (c, d) in columns.iter().zip(branch_columns) {
                let phi = b.column(*c).phi.max(b.column(d).phi);
                b.column_mut(*c).phi = phi;
                b.add_dep(*c, d);
            }
        }

        let items = union(b, id).query.order_by.clone();
        let mut order_by = Vec::new();
        for item in &items {
            let index = match &item.expr.kind {
                ExprKind::Literal(Literal::Integer(n)) => usize::try_from(*n)
                    .ok()
                    .filter(|n| (1..=columns.len()).contains(n))
                    .map(|n| n - 1),
                ExprKind::Identifier(key) if key.len() == 1 => columns
                    .iter()
                    .position(|c| b.column(*c).name.eq_ignore_ascii_case(key.name())),
                _ => None,
            };
            match index {
                Some(i) => order_by.push((i, item.descending)),
                None => b.error(
                    item.expr.span,
                    format!(
                        "ORDER BY of a {} must name one of its output columns",
                        union(b, id).op.keyword()
                    ),
                ),
            }
        }
        union_mut(b, id).order_by = order_by;
        Ok(())
    }

    fn resolve(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let branches = union(b, id).branches.clone();
        let Some((&first, rest)) = branches.split_first() else {
            return Err(Halt);
        };
        b.resolve_relation(first)?;
        let columns = b.relations[id.0].columns.clone();
        for c in &columns {
            if let Some(src) = b.column(*c).deps().first().copied() {
                b.column_mut(*c).jdbc_type = b.column(src).jdbc_type;
            }
        }
        let mut failed = false;
        for branch in rest {
            if b.resolve_relation(*branch).is_err() {
                failed = true;
            }
        }
        if failed {
            return Err(Halt);
        }
        for c in columns {
            let ty = b
                .column(c)
                .deps()
                .iter()
                .map(|d| b.column(*d).jdbc_type)
                .reduce(JdbcType::promote)
                .unwrap_or(JdbcType::Other);
            b.column_mut(c).jdbc_type = ty;
        }
        Ok(())
    }

    fn select_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        let branches = union(b, id).branches.clone();
        let op = b.dialect.set_operator(union(b, id).op);
        let mut terms = Vec::new();
        for (i, branch) in branches.iter().enumerate() {
            let sql = b.relation_sql(*branch);
            if b.nested_branch(*branch) {
                trace!(relation = %id, branch = i, "nesting set operation branch");
                terms.push(sql.wrap("SELECT * FROM (", &format!(") _b{}", i)));
            } else {
                terms.push(sql);
            }
        }
        let body = join_fragments(terms.iter(), &format!("\n{}\n", op));

        let (order_by, limit) = {
            let u = union(b, id);
            (u.order_by.clone(), u.limit)
        };
        let keep_order = !order_by.is_empty() && b.keep_order_by(id, limit.is_some());
        if !keep_order && limit.is_none() {
            return body;
        }

        let columns = b.relations[id.0].columns.clone();
        let order = keep_order.then(|| {
            let keys: Vec<SqlFragment> = order_by
                .iter()
                .map(|(i, descending)| {
                    let alias = b.dialect.quote_identifier(&b.column(columns[*i]).alias);
                    SqlFragment::from_sql(if *descending {
                        format!("{} DESC", alias)
                    } else {
                        alias
                    })
                })
                .collect();
            join_fragments(keys.iter(), ", ")
        });
        let list: Vec<String> = columns
            .iter()
            .map(|c| b.dialect.quote_identifier(&b.column(*c).alias))
            .collect();
        let parts = SelectParts {
            distinct: false,
            columns: SqlFragment::from_sql(list.join(", ")),
            body: body.wrap("FROM (", ") _u"),
            order_by: order,
            limit: limit.map(|l| l.count),
            offset: limit.and_then(|l| l.offset),
        };
        b.dialect.limit_rows(parts)
    }

    fn emitted_columns(b: &Binder, id: RelationId) -> Vec<ColumnId> {
        b.relations[id.0].columns.clone()
    }

    fn children(b: &Binder, id: RelationId) -> Vec<RelationId> {
        union(b, id).branches.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::relation::tests::test_binder;
    use crate::relation::Tag;
    use pretty_assertions::assert_eq;

    fn compile(b: &mut Binder, sql: &str) -> BindResult<RelationId> {
        let stmt = parse(sql).unwrap();
        let root = b.build_statement(&stmt)?;
        b.resolve_relation(root)?;
        b.prepare(root);
        Ok(root)
    }

    #[test]
    fn test_union_column_count_mismatch() {
        let mut b = test_binder();
        let sql = "SELECT column1 FROM (VALUES (1)) a UNION SELECT column1, column2 FROM (VALUES (1, 2)) b";
        assert!(compile(&mut b, sql).is_err());
        assert_eq!(
            b.diagnostics().errors[0].message,
            "Queries in a UNION must have the same number of columns"
        );
    }

    #[test]
    fn test_union_order_and_types() {
        let mut b = test_binder();
        let sql = "SELECT column1 AS x FROM (VALUES (1)) a \
                   UNION ALL SELECT column1 FROM (VALUES (2.5)) b ORDER BY x DESC LIMIT 1";
        let root = compile(&mut b, sql).unwrap();
        let union = b.children(root)[0];
        assert_eq!(b.tag(union), Tag::Union);
        let x = b.node(union).columns()[0];
        assert_eq!(b.column(x).jdbc_type(), JdbcType::Decimal);
        let sql = b.relation_sql(root);
        assert!(sql.sql().starts_with("SELECT x\nFROM (SELECT a.column1 AS x"));
        assert!(sql.sql().contains("\nUNION ALL\n"));
        assert!(sql.sql().ends_with(") _u\nORDER BY x DESC\nLIMIT 1"));
    }
}
