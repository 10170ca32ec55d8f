//! Lookup wrapper: foreign-key joins on top of any relation.
//!
//! The wrapper mirrors every column of its child. Until a lookup through it
//! is used it emits exactly the child's SQL.

use crate::fragment::SqlFragment;

use super::lookup::LookupSet;
use super::{BindResult, Binder, ColumnId, ColumnOrigin, RelationId, RelationKind, RelationOps, BASE_ALIAS};

#[derive(Debug)]
pub(crate) struct LookupWrapper {
    pub child: RelationId,
    /// (child column, mirror) pairs in child order.
    pub mirrors: Vec<(ColumnId, ColumnId)>,
    pub lookups: LookupSet,
}

impl LookupWrapper {
    pub fn new(child: RelationId) -> Self {
        Self {
            child,
            mirrors: Vec::new(),
            lookups: LookupSet::default(),
        }
    }
}

fn wrapper(b: &Binder, id: RelationId) -> &LookupWrapper {
    match &b.relations[id.0].kind {
        RelationKind::Lookup(w) => w,
        other => unreachable!("lookup wrapper expected, found {}", other.label()),
    }
}

impl RelationOps for LookupWrapper {
    fn declare(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let child = wrapper(b, id).child;
        b.declare_relation(child)?;
        let mut mirrors = Vec::new();
        for src in b.base_columns(child) {
            let (name, alias, ty, fk, phi, hidden, is_key) = {
                let s = b.column(src);
                (
                    s.name.clone(),
                    s.alias.clone(),
                    s.jdbc_type,
                    s.fk.clone(),
                    s.phi,
                    s.hidden,
                    s.is_key,
                )
            };
            let c = b.add_column(id, &name, &alias, ty, ColumnOrigin::Base);
            let col = b.column_mut(c);
            col.fk = fk;
            col.phi = phi;
            col.hidden = hidden;
            col.is_key = is_key;
            b.add_dep(c, src);
            mirrors.push((src, c));
        }
        if let RelationKind::Lookup(w) = &mut b.relations[id.0].kind {
            w.mirrors = mirrors;
        }
        Ok(())
    }

    fn resolve(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let child = wrapper(b, id).child;
        b.resolve_relation(child)?;
        let mirrors = wrapper(b, id).mirrors.clone();
        for (src, mirror) in mirrors {
            let (ty, phi) = (b.column(src).jdbc_type, b.column(src).phi);
            let col = b.column_mut(mirror);
            col.jdbc_type = ty;
            col.phi = phi;
        }
        Ok(())
    }

    fn select_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        let child = wrapper(b, id).child;
        if !b.has_live_lookups(id) {
            return b.relation_sql(child);
        }
        let base_from = b.relation_sql(child).wrap("(", &format!(") {}", BASE_ALIAS));
        b.derived_select(id, base_from, None)
    }

    fn emitted_columns(b: &Binder, id: RelationId) -> Vec<ColumnId> {
        if b.has_live_lookups(id) {
            return b.lookup_owner_columns(id);
        }
        let w = wrapper(b, id);
        b.emitted_columns(w.child)
            .into_iter()
            .filter_map(|c| w.mirrors.iter().find(|(src, _)| *src == c).map(|(_, m)| *m))
            .collect()
    }

    fn children(b: &Binder, id: RelationId) -> Vec<RelationId> {
        let w = wrapper(b, id);
        let mut out = vec![w.child];
        out.extend(w.lookups.targets());
        out
    }
}
