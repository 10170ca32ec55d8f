//! WITH clauses.
//!
//! Each CTE has one body relation shared by every reference. References
//! render as a placeholder token; the body SQL travels with the fragment and
//! is hoisted into a single `WITH` prefix by [`SqlFragment::finalize`].

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::ast::{CteDef, Span};
use crate::fragment::{CteDefinition, SqlFragment};

use super::{
    BindResult, Binder, BuildCtx, ColumnId, ColumnOrigin, CteId, Halt, Pass, Place, RelationId,
    RelationKind, RelationOps, ScopeId,
};

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug)]
pub(crate) struct CteEntry {
    pub name: String,
    /// Name in the generated WITH clause.
    pub sql_name: String,
    pub token: String,
    pub scope: ScopeId,
    pub body: Option<RelationId>,
    pub building: bool,
    pub declaring: bool,
    pub recursive: bool,
    pub recursive_refs: usize,
    pub sql: Option<SqlFragment>,
    /// Cached SQL must be regenerated (container filter changed).
    pub dirty: bool,
    pub generating: bool,
}

#[derive(Debug)]
pub(crate) struct CteRef {
    pub cte: CteId,
    /// (body column, mirror) pairs.
    pub mirrors: Vec<(ColumnId, ColumnId)>,
}

fn cte_ref(b: &Binder, id: RelationId) -> &CteRef {
    match &b.relations[id.0].kind {
        RelationKind::CteRef(r) => r,
        other => unreachable!("CTE reference expected, found {}", other.label()),
    }
}

impl Binder {
    pub(crate) fn register_cte(&mut self, def: &CteDef) -> BindResult<CteId> {
        let sid = self.current_scope();
        if self.scopes[sid.0]
            .ctes
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(&def.name))
        {
            self.error(def.span, format!("Duplicate WITH name: {}", def.name));
            return Err(Halt);
        }
        let legal = self.dialect.legal_name(&def.name);
        let sql_name = self.aliases.unique(&legal);
        let token = format!("/*$cte:{}$*/", NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
        let id = CteId(self.ctes.len());
        self.ctes.push(CteEntry {
            name: def.name.clone(),
            sql_name,
            token,
            scope: sid,
            body: None,
            building: false,
            declaring: false,
            recursive: false,
            recursive_refs: 0,
            sql: None,
            dirty: false,
            generating: false,
        });
        self.scopes[sid.0].ctes.push((def.name.clone(), id));
        Ok(id)
    }

    /// The CTE named `name` visible from the current scope.
    pub(crate) fn find_cte(&self, name: &str) -> Option<CteId> {
        let mut scope = Some(self.current_scope());
        while let Some(sid) = scope {
            let s = &self.scopes[sid.0];
            if let Some((_, id)) = s.ctes.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                return Some(*id);
            }
            scope = s.parent;
        }
        None
    }

    /// A FROM-clause reference to a CTE. Self references are only legal
    /// once, from a later term of the body's UNION.
    pub(crate) fn cte_reference(
        &mut self,
        cte: CteId,
        name: &str,
        bctx: BuildCtx,
        span: Span,
    ) -> BindResult<RelationId> {
        let entry = &self.ctes[cte.0];
        if entry.building || entry.declaring {
            if !self.dialect.supports_recursive_cte() {
                let message = format!("Recursive WITH is not supported by {}", self.ctx.dialect);
                self.error(span, message);
                return Err(Halt);
            }
            let in_later_term = bctx.place != Place::Expression
                && matches!(bctx.cte_branch, Some((c, i)) if c == cte && i >= 1);
            if !in_later_term {
                let message = format!(
                    "Recursive reference to {} must be in a later term of a UNION",
                    entry.name
                );
                self.error(span, message);
                return Err(Halt);
            }
            if entry.recursive_refs > 0 {
                self.error(span, "A recursive CTE can only be referenced once");
                return Err(Halt);
            }
            debug!(cte = %entry.name, "recursive reference");
            let entry = &mut self.ctes[cte.0];
            entry.recursive_refs += 1;
            entry.recursive = true;
        }
        Ok(self.add_relation(
            name,
            RelationKind::CteRef(CteRef {
                cte,
                mirrors: Vec::new(),
            }),
            &bctx,
            span,
        ))
    }

    /// Declare a CTE body, flagging self references made meanwhile.
    pub(crate) fn declare_cte_body(&mut self, cte: CteId) -> BindResult<RelationId> {
        let body = self.ctes[cte.0].body.ok_or(Halt)?;
        if self.relations[body.0].declare != Pass::Pending {
            return self.declare_relation(body).map(|_| body);
        }
        self.ctes[cte.0].declaring = true;
        let result = self.declare_relation(body);
        self.ctes[cte.0].declaring = false;
        result.map(|_| body)
    }

    /// Body SQL, generated once and shared by every reference.
    fn cte_sql(&mut self, cte: CteId) -> SqlFragment {
        let entry = &self.ctes[cte.0];
        if let (Some(sql), false) = (&entry.sql, entry.dirty) {
            return sql.clone();
        }
        let Some(body) = entry.body else {
            return SqlFragment::new();
        };
        self.ctes[cte.0].generating = true;
        let sql = self.relation_sql(body);
        let entry = &mut self.ctes[cte.0];
        entry.generating = false;
        entry.sql = Some(sql.clone());
        entry.dirty = false;
        sql
    }

    /// Force regeneration of every CTE body.
    pub(crate) fn invalidate_ctes(&mut self) {
        for entry in &mut self.ctes {
            entry.dirty = true;
        }
    }
}

impl RelationOps for CteRef {
    fn declare(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let cte = cte_ref(b, id).cte;
        let body = b.declare_cte_body(cte)?;
        let mut mirrors = Vec::new();
        for src in b.base_columns(body) {
            let (name, alias, ty, fk, phi) = {
                let s = b.column(src);
                (s.name.clone(), s.alias.clone(), s.jdbc_type, s.fk.clone(), s.phi)
            };
            let c = b.add_column(id, &name, &alias, ty, ColumnOrigin::Base);
            let col = b.column_mut(c);
            col.fk = fk;
            col.phi = phi;
            b.add_dep(c, src);
            mirrors.push((src, c));
        }
        if let RelationKind::CteRef(r) = &mut b.relations[id.0].kind {
            r.mirrors = mirrors;
        }
        Ok(())
    }

    fn resolve(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let cte = cte_ref(b, id).cte;
        if let Some(body) = b.ctes[cte.0].body {
            b.resolve_relation(body)?;
        }
        for (src, mirror) in cte_ref(b, id).mirrors.clone() {
            let ty = b.column(src).jdbc_type;
            b.column_mut(mirror).jdbc_type = ty;
        }
        Ok(())
    }

    fn select_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        let columns: Vec<String> = b.relations[id.0]
            .columns
            .iter()
            .map(|c| b.column_sql(*c))
            .collect();
        let mut sql = SqlFragment::from_sql(format!("SELECT {}\nFROM ", columns.join(", ")));
        sql.append_fragment(&Self::from_sql(b, id));
        sql
    }

    fn from_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        let cte = cte_ref(b, id).cte;
        let alias = b.sql_alias(id);
        let (token, name, recursive, generating) = {
            let e = &b.ctes[cte.0];
            (e.token.clone(), e.sql_name.clone(), e.recursive, e.generating)
        };
        let mut sql = SqlFragment::from_sql(format!("{} {}", token, alias));
        if !generating {
            let body = b.cte_sql(cte);
            sql.add_cte(CteDefinition {
                token,
                name,
                recursive,
                body,
            });
        }
        sql
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
    use crate::dialect::Dialect;
    use crate::parser::parse;
    use crate::relation::tests::test_binder;
    use pretty_assertions::assert_eq;

    fn compile(b: &mut Binder, sql: &str) -> BindResult<RelationId> {
        let stmt = parse(sql).unwrap();
        let root = b.build_statement(&stmt)?;
        b.resolve_relation(root)?;
        b.prepare(root);
        Ok(root)
    }

    #[test]
    fn test_shared_body_is_hoisted_once() {
        let mut b = test_binder();
        let root = compile(
            &mut b,
            "WITH q AS (SELECT column1 AS n FROM (VALUES (1)) v) \
             SELECT a.n, c.n AS m FROM q a, q c",
        )
        .unwrap();
        let sql = b.relation_sql(root).finalize(b.dialect());
        assert!(sql.sql().starts_with("WITH q AS (SELECT v.column1 AS n"));
        assert_eq!(sql.sql().matches("WITH").count(), 1);
        assert!(sql.sql().contains("FROM q a,\nq c"));
    }

    #[test]
    fn test_recursive_reference_rules() {
        let mut b = test_binder();
        let ok = compile(
            &mut b,
            "WITH t AS (SELECT 1 AS n UNION ALL SELECT n + 1 FROM t WHERE n < 5) SELECT n FROM t",
        );
        assert!(ok.is_ok(), "{:?}", b.diagnostics());
        let root = ok.unwrap();
        let sql = b.relation_sql(root).finalize(b.dialect());
        assert!(sql.sql().starts_with("WITH RECURSIVE t AS ("));

        let mut b = test_binder();
        let twice = compile(
            &mut b,
            "WITH t AS (SELECT 1 AS n UNION ALL SELECT a.n FROM t a, t c) SELECT n FROM t",
        );
        assert!(twice.is_err());
        assert_eq!(
            b.diagnostics().errors[0].message,
            "A recursive CTE can only be referenced once"
        );

        let mut b = test_binder();
        b.ctx.dialect = Dialect::Oracle;
        b.dialect = Dialect::Oracle.generator();
        let oracle = compile(
            &mut b,
            "WITH t AS (SELECT 1 AS n UNION ALL SELECT n + 1 FROM t) SELECT n FROM t",
        );
        assert!(oracle.is_err());
        assert_eq!(
            b.diagnostics().errors[0].message,
            "Recursive WITH is not supported by oracle"
        );
    }
}
