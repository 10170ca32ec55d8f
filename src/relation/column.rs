//! Relation columns and reference counting.
//!
//! A column is emitted only while something holds a [`ColumnRef`] on it.
//! Taking the first reference acquires references on every column it
//! depends on; dropping the last one releases them again, so liveness flows
//! down the relation tree.

use crate::catalog::{ForeignKey, PhiLevel};
use crate::types::JdbcType;

use super::{Binder, ColumnId, RelationId};

/// An owned reference on a column. Hand it back with [`Binder::release`].
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct ColumnRef {
    column: ColumnId,
}

impl ColumnRef {
    pub fn column(&self) -> ColumnId {
        self.column
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOrigin {
    /// Declared by the relation itself.
    Base,
    /// Pulled through a foreign key of the owning relation.
    Lookup { join: usize, target: ColumnId },
}

#[derive(Debug)]
pub struct RelationColumn {
    pub(crate) owner: RelationId,
    /// Name used to address the column from LabKey SQL.
    pub(crate) name: String,
    /// SQL alias, unique within the owner.
    pub(crate) alias: String,
    pub(crate) jdbc_type: JdbcType,
    pub(crate) fk: Option<ForeignKey>,
    pub(crate) phi: PhiLevel,
    pub(crate) is_key: bool,
    pub(crate) hidden: bool,
    pub(crate) origin: ColumnOrigin,
    refs: usize,
    deps: Vec<ColumnId>,
    held: Vec<ColumnRef>,
}

impl RelationColumn {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn jdbc_type(&self) -> JdbcType {
        self.jdbc_type
    }

    pub fn fk(&self) -> Option<&ForeignKey> {
        self.fk.as_ref()
    }

    pub fn phi(&self) -> PhiLevel {
        self.phi
    }

    pub fn ref_count(&self) -> usize {
        self.refs
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self.origin, ColumnOrigin::Lookup { .. })
    }

    pub(crate) fn deps(&self) -> &[ColumnId] {
        &self.deps
    }
}

impl Binder {
    /// Create a column on `owner` with an alias that is unique within it.
    pub(crate) fn add_column(
        &mut self,
        owner: RelationId,
        name: &str,
        alias: &str,
        jdbc_type: JdbcType,
        origin: ColumnOrigin,
    ) -> ColumnId {
        let id = ColumnId(self.columns.len());
        let alias = self.unique_column_alias(owner, alias);
        self.columns.push(RelationColumn {
            owner,
            name: name.to_string(),
            alias,
            jdbc_type,
            fk: None,
            phi: PhiLevel::NotPhi,
            is_key: false,
            hidden: false,
            origin,
            refs: 0,
            deps: Vec::new(),
            held: Vec::new(),
        });
        let node = &mut self.relations[owner.0];
        node.columns.push(id);
        if origin == ColumnOrigin::Base {
            node.by_name.entry(name.to_lowercase()).or_insert(id);
        }
        id
    }

    fn unique_column_alias(&mut self, owner: RelationId, alias: &str) -> String {
        let legal = self.dialect.legal_name(alias);
        let node = &mut self.relations[owner.0];
        let mut candidate = legal.clone();
        let mut n = 1;
        while node.column_aliases.contains(&candidate.to_lowercase()) {
            candidate = format!("{}_{}", legal, n);
            n += 1;
        }
        node.column_aliases.insert(candidate.to_lowercase());
        candidate
    }

    pub fn column(&self, id: ColumnId) -> &RelationColumn {
        &self.columns[id.0]
    }

    pub(crate) fn column_mut(&mut self, id: ColumnId) -> &mut RelationColumn {
        &mut self.columns[id.0]
    }

    /// Take a reference on `id`; the first one pulls in its dependencies.
    pub fn add_ref(&mut self, id: ColumnId) -> ColumnRef {
        self.columns[id.0].refs += 1;
        if self.columns[id.0].refs == 1 {
            let deps = self.columns[id.0].deps.clone();
            let held: Vec<ColumnRef> = deps.into_iter().map(|d| self.add_ref(d)).collect();
            self.columns[id.0].held.extend(held);
        }
        ColumnRef { column: id }
    }

    /// Give a reference back; the last one releases the dependencies.
    pub fn release(&mut self, r: ColumnRef) {
        let col = &mut self.columns[r.column.0];
        col.refs = col.refs.saturating_sub(1);
        if col.refs == 0 {
            let held = std::mem::take(&mut col.held);
            for h in held {
                self.release(h);
            }
        }
    }

    /// Record that `id` is computed from `dep`.
    pub(crate) fn add_dep(&mut self, id: ColumnId, dep: ColumnId) {
        if id == dep || self.columns[id.0].deps.contains(&dep) {
            return;
        }
        self.columns[id.0].deps.push(dep);
        if self.columns[id.0].refs > 0 {
            let r = self.add_ref(dep);
            self.columns[id.0].held.push(r);
        }
    }

    pub(crate) fn is_live(&self, id: ColumnId) -> bool {
        self.columns[id.0].refs > 0
    }

    /// Keep a reference for as long as the relation exists.
    pub(crate) fn hold(&mut self, rel: RelationId, col: ColumnId) {
        let r = self.add_ref(col);
        self.relations[rel.0].holds.push(r);
    }

    /// Highest sensitivity among a column's transitive dependencies.
    pub(crate) fn derived_phi(&self, deps: &[ColumnId]) -> PhiLevel {
        deps.iter()
            .map(|d| self.columns[d.0].phi)
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::tests::test_binder;

    #[test]
    fn test_refs_flow_through_deps() {
        let mut b = test_binder();
        let base = b.new_test_relation("base");
        let top = b.new_test_relation("top");
        let d = b.add_column(base, "d", "d", JdbcType::Integer, ColumnOrigin::Base);
        let seven = b.add_column(base, "seven", "seven", JdbcType::Integer, ColumnOrigin::Base);
        let x = b.add_column(top, "x", "x", JdbcType::Integer, ColumnOrigin::Base);
        b.add_dep(x, d);
        b.add_dep(x, seven);

        let r1 = b.add_ref(x);
        let r2 = b.add_ref(x);
        assert_eq!(b.column(d).ref_count(), 1);
        b.release(r1);
        assert!(b.is_live(seven));
        b.release(r2);
        assert!(!b.is_live(d));
        assert!(!b.is_live(seven));
    }

    #[test]
    fn test_dep_added_while_live() {
        let mut b = test_binder();
        let base = b.new_test_relation("base");
        let top = b.new_test_relation("top");
        let d = b.add_column(base, "d", "d", JdbcType::Integer, ColumnOrigin::Base);
        let x = b.add_column(top, "x", "x", JdbcType::Integer, ColumnOrigin::Base);
        let r = b.add_ref(x);
        b.add_dep(x, d);
        assert!(b.is_live(d));
        b.release(r);
        assert!(!b.is_live(d));
    }

    #[test]
    fn test_unique_aliases() {
        let mut b = test_binder();
        let rel = b.new_test_relation("t");
        let a = b.add_column(rel, "a b", "a b", JdbcType::Integer, ColumnOrigin::Base);
        let c = b.add_column(rel, "a_b", "a_b", JdbcType::Integer, ColumnOrigin::Base);
        assert_eq!(b.column(a).alias(), "a_b");
        assert_eq!(b.column(c).alias(), "a_b_1");
    }
}
