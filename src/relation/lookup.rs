//! Foreign-key lookups.
//!
//! A dotted reference `fk.col` through a column with a foreign key adds a
//! LEFT OUTER JOIN to the target table and a lookup column on the relation
//! that owns `fk`. Deeper paths are delegated to the target, which joins its
//! own targets.

use std::collections::HashMap;

use crate::dialect::join_fragments;
use crate::fragment::SqlFragment;

use super::table::TableSource;
use super::{Binder, ColumnId, ColumnOrigin, RelationId, RelationKind, BASE_ALIAS};

#[derive(Debug)]
pub(crate) struct LookupJoin {
    pub fk_column: ColumnId,
    pub target: RelationId,
    pub key: ColumnId,
}

#[derive(Debug, Default)]
pub(crate) struct LookupSet {
    pub joins: Vec<LookupJoin>,
    by_path: HashMap<(ColumnId, String), ColumnId>,
}

impl LookupSet {
    pub fn targets(&self) -> impl Iterator<Item = RelationId> + '_ {
        self.joins.iter().map(|j| j.target)
    }
}

impl Binder {
    fn lookup_set(&self, id: RelationId) -> Option<&LookupSet> {
        match &self.relations[id.0].kind {
            RelationKind::Table(t) => Some(&t.lookups),
            RelationKind::Lookup(w) => Some(&w.lookups),
            _ => None,
        }
    }

    fn lookup_set_mut(&mut self, id: RelationId) -> Option<&mut LookupSet> {
        match &mut self.relations[id.0].kind {
            RelationKind::Table(t) => Some(&mut t.lookups),
            RelationKind::Lookup(w) => Some(&mut w.lookups),
            _ => None,
        }
    }

    /// The column reached by following `col`'s foreign key to `name`.
    pub(crate) fn lookup_column(&mut self, col: ColumnId, name: &str) -> Option<ColumnId> {
        let owner = self.columns[col.0].owner;
        let path = (col, name.to_lowercase());
        if let Some(found) = self.lookup_set(owner)?.by_path.get(&path) {
            return Some(*found);
        }
        let (join, target_col) = match self.columns[col.0].origin {
            ColumnOrigin::Lookup { join, target } => (join, self.lookup_column(target, name)?),
            ColumnOrigin::Base => {
                let join = self.lookup_join(owner, col)?;
                let target = self.lookup_set(owner)?.joins[join].target;
                (join, self.find_column(target, name)?)
            }
        };
        let (fk_column, key) = {
            let j = &self.lookup_set(owner)?.joins[join];
            (j.fk_column, j.key)
        };

        let (lookup_name, alias, ty, fk, phi) = {
            let from = &self.columns[col.0];
            let to = &self.columns[target_col.0];
            (
                format!("{}/{}", from.name, to.name),
                format!("{}_{}", from.alias, to.alias),
                to.jdbc_type,
                to.fk.clone(),
                to.phi,
            )
        };
        let id = self.add_column(
            owner,
            &lookup_name,
            &alias,
            ty,
            ColumnOrigin::Lookup {
                join,
                target: target_col,
            },
        );
        let column = self.column_mut(id);
        column.fk = fk;
        column.phi = phi;
        for dep in [fk_column, key, target_col] {
            self.add_dep(id, dep);
        }
        self.lookup_set_mut(owner)?.by_path.insert(path, id);
        Some(id)
    }

    /// Index of the join for `fk_column`, creating it on first use.
    fn lookup_join(&mut self, owner: RelationId, fk_column: ColumnId) -> Option<usize> {
        if let Some(i) = self
            .lookup_set(owner)?
            .joins
            .iter()
            .position(|j| j.fk_column == fk_column)
        {
            return Some(i);
        }
        let fk = self.columns[fk_column.0].fk.clone()?;
        let span = self.relations[owner.0].span;
        let target = self.resolve_lookup_target(owner, &fk, span)?;
        let key = match &fk.column {
            Some(c) => self.find_column(target, c)?,
            None => self.relations[target.0]
                .columns
                .iter()
                .copied()
                .find(|c| self.columns[c.0].is_key)?,
        };
        let set = self.lookup_set_mut(owner)?;
        set.joins.push(LookupJoin {
            fk_column,
            target,
            key,
        });
        Some(set.joins.len() - 1)
    }

    /// Whether any lookup column of `id` is emitted.
    pub(crate) fn has_live_lookups(&self, id: RelationId) -> bool {
        self.relations[id.0]
            .columns
            .iter()
            .any(|c| self.columns[c.0].is_lookup() && self.is_live(*c))
    }

    /// Emitted columns of a relation with lookups: live base columns (all
    /// of them when none is live) followed by live lookup columns.
    pub(crate) fn lookup_owner_columns(&self, id: RelationId) -> Vec<ColumnId> {
        let mut out = self.live_or_all(id);
        out.extend(
            self.relations[id.0]
                .columns
                .iter()
                .copied()
                .filter(|c| self.columns[c.0].is_lookup() && self.is_live(*c)),
        );
        out
    }

    /// Where a base column of a table or wrapper is read from inside its
    /// derived SELECT.
    pub(crate) fn base_column_sql(&self, c: ColumnId) -> String {
        let col = &self.columns[c.0];
        match &self.relations[col.owner.0].kind {
            RelationKind::Table(t) => match &t.source {
                TableSource::Physical(table) => {
                    let physical = table
                        .find_column(&col.name)
                        .map_or(col.name.as_str(), |d| d.physical_name());
                    format!("{}.{}", BASE_ALIAS, self.dialect.quote_identifier(physical))
                }
                TableSource::Query { .. } => match col.deps().first() {
                    Some(src) => self.column_sql(*src),
                    None => self.column_sql(c),
                },
            },
            _ => {
                let alias = col
                    .deps()
                    .first()
                    .map_or(col.alias.as_str(), |src| self.columns[src.0].alias.as_str());
                format!("{}.{}", BASE_ALIAS, self.dialect.quote_identifier(alias))
            }
        }
    }

    /// `SELECT cols FROM <base> LEFT OUTER JOIN ... [WHERE filter]`.
    pub(crate) fn derived_select(
        &mut self,
        id: RelationId,
        base_from: SqlFragment,
        filter: Option<SqlFragment>,
    ) -> SqlFragment {
        let emitted = self.lookup_owner_columns(id);
        let mut list = Vec::new();
        let mut used_joins = Vec::new();
        for c in &emitted {
            let col = &self.columns[c.0];
            let source = match col.origin {
                ColumnOrigin::Base => self.base_column_sql(*c),
                ColumnOrigin::Lookup { join, target } => {
                    if !used_joins.contains(&join) {
                        used_joins.push(join);
                    }
                    self.column_sql(target)
                }
            };
            list.push(SqlFragment::from_sql(format!(
                "{} AS {}",
                source,
                self.dialect.quote_identifier(&col.alias)
            )));
        }
        used_joins.sort_unstable();

        let mut sql = SqlFragment::from_sql("SELECT ");
        sql.append_fragment(&join_fragments(list.iter(), ", "))
            .append("\nFROM ")
            .append_fragment(&base_from);
        let joins: Vec<(ColumnId, RelationId, ColumnId)> = match self.lookup_set(id) {
            Some(set) => used_joins
                .iter()
                .map(|j| {
                    let join = &set.joins[*j];
                    (join.fk_column, join.target, join.key)
                })
                .collect(),
            None => Vec::new(),
        };
        for (fk_column, target, key) in joins {
            let target_sql = self.relation_from_sql(target);
            let on = format!("{} = {}", self.base_column_sql(fk_column), self.column_sql(key));
            sql.append("\nLEFT OUTER JOIN ")
                .append_fragment(&target_sql)
                .append(" ON ")
                .append(&on);
        }
        if let Some(filter) = filter {
            sql.append("\nWHERE ").append_fragment(&filter);
        }
        sql
    }
}
