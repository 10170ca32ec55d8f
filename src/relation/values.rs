//! `(VALUES (...), ...) alias` in a FROM clause.

use crate::ast::Expr;
use crate::fragment::SqlFragment;
use crate::types::JdbcType;

use super::bound::{BindCtx, BoundExpr, ResolveCtx};
use super::{BindResult, Binder, ColumnId, ColumnOrigin, Halt, RelationId, RelationKind, RelationOps};

#[derive(Debug, Default)]
pub(crate) struct ValuesRel {
    pub rows: Vec<Vec<Expr>>,
    pub bound: Vec<Vec<BoundExpr>>,
}

impl ValuesRel {
    pub fn new(rows: Vec<Vec<Expr>>) -> Self {
        Self {
            rows,
            bound: Vec::new(),
        }
    }
}

fn values(b: &Binder, id: RelationId) -> &ValuesRel {
    match &b.relations[id.0].kind {
        RelationKind::Values(v) => v,
        other => unreachable!("values relation expected, found {}", other.label()),
    }
}

fn values_mut(b: &mut Binder, id: RelationId) -> &mut ValuesRel {
    match &mut b.relations[id.0].kind {
        RelationKind::Values(v) => v,
        other => unreachable!("values relation expected, found {}", other.label()),
    }
}

impl RelationOps for ValuesRel {
    fn declare(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let rows = values(b, id).rows.clone();
        let span = b.relations[id.0].span;
        let Some(width) = rows.first().map(Vec::len) else {
            b.error(span, "VALUES list is empty");
            return Err(Halt);
        };
        if rows.iter().any(|r| r.len() != width) {
            b.error(span, "Every row of a VALUES list must have the same number of values");
            return Err(Halt);
        }
        let ctx = BindCtx {
            no_columns: true,
            ..BindCtx::new(id)
        };
        let mut bound = Vec::new();
        for row in &rows {
            let mut deps = Vec::new();
            bound.push(
                row.iter()
                    .map(|e| b.bind_expr(ctx, e, &mut deps))
                    .collect::<Vec<_>>(),
            );
        }
        for i in 1..=width {
            let name = format!("column{}", i);
            b.add_column(id, &name, &name, JdbcType::Other, ColumnOrigin::Base);
        }
        values_mut(b, id).bound = bound;
        Ok(())
    }

    fn resolve(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let mut bound = std::mem::take(&mut values_mut(b, id).bound);
        for row in bound.iter_mut() {
            for e in row.iter_mut() {
                b.resolve_expr(e, ResolveCtx::clause("VALUES", false));
            }
        }
        let columns = b.relations[id.0].columns.clone();
        for (i, c) in columns.into_iter().enumerate() {
            let ty = bound
                .iter()
                .filter_map(|row| row.get(i))
                .map(|e| e.ty)
                .reduce(JdbcType::promote)
                .unwrap_or(JdbcType::Null);
            b.column_mut(c).jdbc_type = ty;
        }
        values_mut(b, id).bound = bound;
        Ok(())
    }

    fn select_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        let from = Self::from_sql(b, id);
        let columns: Vec<String> = b.relations[id.0]
            .columns
            .iter()
            .map(|c| b.column_sql(*c))
            .collect();
        let mut sql = SqlFragment::from_sql(format!("SELECT {}\nFROM ", columns.join(", ")));
        sql.append_fragment(&from);
        sql
    }

    fn from_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        let bound = values(b, id).bound.clone();
        let rows: Vec<Vec<SqlFragment>> = bound
            .iter()
            .map(|row| row.iter().map(|e| b.value_sql(e)).collect())
            .collect();
        let columns: Vec<String> = b.relations[id.0]
            .columns
            .iter()
            .map(|c| b.column(*c).alias.clone())
            .collect();
        let alias = b.sql_alias(id);
        b.dialect.values_list(&rows, &columns, &alias)
    }

    fn emitted_columns(b: &Binder, id: RelationId) -> Vec<ColumnId> {
        b.relations[id.0].columns.clone()
    }

    fn children(_b: &Binder, _id: RelationId) -> Vec<RelationId> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::parser::parse_expression;
    use crate::relation::tests::test_binder;
    use crate::relation::{BuildCtx, Place};
    use pretty_assertions::assert_eq;

    fn values_relation(b: &mut Binder, rows: &[&[&str]]) -> RelationId {
        let rows = rows
            .iter()
            .map(|r| r.iter().map(|e| parse_expression(e).unwrap()).collect())
            .collect();
        b.add_relation(
            "v",
            RelationKind::Values(ValuesRel::new(rows)),
            &BuildCtx::new(Place::From, None),
            Span::NONE,
        )
    }

    #[test]
    fn test_values_columns_and_types() {
        let mut b = test_binder();
        let id = values_relation(&mut b, &[&["1", "'a'"], &["2.5", "NULL"]]);
        b.resolve_relation(id).unwrap();
        b.assign_names(id);
        let cols = b.node(id).columns().to_vec();
        assert_eq!(b.column(cols[0]).name(), "column1");
        assert_eq!(b.column(cols[1]).jdbc_type(), JdbcType::Varchar);
        assert_eq!(
            b.relation_from_sql(id).sql(),
            "(VALUES (1, 'a'), (2.5, NULL)) v(column1, column2)"
        );
    }

    #[test]
    fn test_values_reject_columns_and_ragged_rows() {
        let mut b = test_binder();
        let id = values_relation(&mut b, &[&["x"]]);
        assert!(b.declare_relation(id).is_ok());
        assert_eq!(
            b.diagnostics().errors[0].message,
            "Column references are not allowed in a VALUES list: x"
        );

        let mut b = test_binder();
        let id = values_relation(&mut b, &[&["1", "2"], &["3"]]);
        assert!(b.declare_relation(id).is_err());
    }
}
