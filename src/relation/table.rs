//! Catalog tables, and named queries compiled into opaque tables.

use std::sync::Arc;

use crate::catalog::{ContainerFilter, NamedQuery, TableDescriptor};
use crate::fragment::SqlFragment;
use crate::types::Value;

use super::lookup::LookupSet;
use super::{
    BindResult, Binder, ColumnId, ColumnOrigin, RelationId, RelationKind, RelationOps, BASE_ALIAS,
};

#[derive(Debug)]
pub(crate) enum TableSource {
    Physical(Arc<TableDescriptor>),
    /// A named query that could not be spliced, compiled in its own scope.
    Query {
        query: Arc<NamedQuery>,
        root: RelationId,
    },
}

#[derive(Debug)]
pub(crate) struct TableRel {
    pub source: TableSource,
    /// `[ContainerFilter='...']` on this table; the query default otherwise.
    pub filter: Option<ContainerFilter>,
    pub lookups: LookupSet,
}

impl TableRel {
    pub fn physical(table: Arc<TableDescriptor>, filter: Option<ContainerFilter>) -> Self {
        Self {
            source: TableSource::Physical(table),
            filter,
            lookups: LookupSet::default(),
        }
    }

    pub fn query(query: Arc<NamedQuery>, root: RelationId) -> Self {
        Self {
            source: TableSource::Query { query, root },
            filter: None,
            lookups: LookupSet::default(),
        }
    }
}

fn table(b: &Binder, id: RelationId) -> &TableRel {
    match &b.relations[id.0].kind {
        RelationKind::Table(t) => t,
        other => unreachable!("table relation expected, found {}", other.label()),
    }
}

/// `schema.table` with every part quoted as needed.
pub(crate) fn physical_sql(b: &Binder, physical: &str) -> String {
    physical
        .split('.')
        .map(|p| b.dialect.quote_identifier(p))
        .collect::<Vec<_>>()
        .join(".")
}

impl Binder {
    /// `base.container IN (?, ...)` for a container-scoped table.
    fn container_condition(&self, id: RelationId) -> Option<SqlFragment> {
        let t = table(self, id);
        let TableSource::Physical(desc) = &t.source else {
            return None;
        };
        let column = desc.container_column.as_ref()?;
        let filter = t
            .filter
            .or(self.ctx.container_filter)
            .unwrap_or_default();
        let ids = self.ctx.environment.container_ids(filter)?;
        let physical = desc
            .find_column(column)
            .map_or(column.as_str(), |c| c.physical_name());
        let mut sql = SqlFragment::from_sql(format!(
            "({}.{} IN (",
            BASE_ALIAS,
            self.dialect.quote_identifier(physical)
        ));
        for (i, container) in ids.into_iter().enumerate() {
            if i > 0 {
                sql.append(", ");
            }
            sql.append_value(Value::String(container));
        }
        sql.append("))");
        Some(sql)
    }

    /// Whether the table can appear as `schema.table alias` without a
    /// derived SELECT: no lookups, no filter, and every emitted column
    /// already named as in the physical table.
    fn plain_table(&self, id: RelationId) -> bool {
        let TableSource::Physical(desc) = &table(self, id).source else {
            return false;
        };
        if self.has_live_lookups(id) || self.container_condition(id).is_some() {
            return false;
        }
        self.live_or_all(id).iter().all(|c| {
            let col = self.column(*c);
            desc.find_column(&col.name)
                .is_some_and(|d| d.physical_name() == col.alias)
        })
    }
}

impl RelationOps for TableRel {
    fn declare(b: &mut Binder, id: RelationId) -> BindResult<()> {
        match &table(b, id).source {
            TableSource::Physical(desc) => {
                let desc = Arc::clone(desc);
                for d in &desc.columns {
                    let c = b.add_column(id, &d.name, &d.name, d.jdbc_type, ColumnOrigin::Base);
                    let col = b.column_mut(c);
                    col.fk = d.fk.clone();
                    col.phi = d.phi;
                    col.hidden = d.hidden;
                    col.is_key = desc.is_key(&d.name);
                }
            }
            TableSource::Query { query, root } => {
                let (query, root) = (Arc::clone(query), *root);
                b.declare_relation(root)?;
                for src in b.base_columns(root) {
                    let (name, ty, fk, phi, hidden, is_key) = {
                        let s = b.column(src);
                        (s.name.clone(), s.jdbc_type, s.fk.clone(), s.phi, s.hidden, s.is_key)
                    };
                    let c = b.add_column(id, &name, &name, ty, ColumnOrigin::Base);
                    let over = query.override_for(&name);
                    let col = b.column_mut(c);
                    col.fk = over.and_then(|o| o.fk.clone()).or(fk);
                    col.hidden = over.map_or(hidden, |o| o.hidden || hidden);
                    col.phi = phi;
                    col.is_key = is_key;
                    b.add_dep(c, src);
                }
            }
        }
        Ok(())
    }

    fn resolve(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let TableSource::Query { root, .. } = table(b, id).source else {
            return Ok(());
        };
        b.resolve_relation(root)?;
        let columns: Vec<ColumnId> = b.base_columns(id);
        for c in columns {
            if let Some(src) = b.column(c).deps().first().copied() {
                b.column_mut(c).jdbc_type = b.column(src).jdbc_type;
            }
        }
        Ok(())
    }

    fn select_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        let base_from = match &table(b, id).source {
            TableSource::Physical(desc) => SqlFragment::from_sql(format!(
                "{} {}",
                physical_sql(b, &desc.physical),
                BASE_ALIAS
            )),
            TableSource::Query { root, .. } => {
                let root = *root;
                b.relation_from_sql(root)
            }
        };
        let filter = b.container_condition(id);
        b.derived_select(id, base_from, filter)
    }

    fn from_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        let alias = b.sql_alias(id);
        if b.plain_table(id) {
            if let TableSource::Physical(desc) = &table(b, id).source {
                return SqlFragment::from_sql(format!("{} {}", physical_sql(b, &desc.physical), alias));
            }
        }
        Self::select_sql(b, id).wrap("(", &format!(") {}", alias))
    }

    fn emitted_columns(b: &Binder, id: RelationId) -> Vec<ColumnId> {
        b.lookup_owner_columns(id)
    }

    fn children(b: &Binder, id: RelationId) -> Vec<RelationId> {
        let t = table(b, id);
        let mut out = Vec::new();
        if let TableSource::Query { root, .. } = &t.source {
            out.push(*root);
        }
        out.extend(t.lookups.targets());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::catalog::ColumnDescriptor;
    use crate::environment::Environment;
    use crate::relation::tests::test_binder;
    use crate::relation::{BuildCtx, Place};
    use crate::types::JdbcType;
    use pretty_assertions::assert_eq;

    fn users() -> Arc<TableDescriptor> {
        Arc::new(
            TableDescriptor::new("users", "core.users")
                .column(ColumnDescriptor::new("userid", JdbcType::Integer))
                .column(ColumnDescriptor {
                    physical: Some("display_name".to_string()),
                    ..ColumnDescriptor::new("displayname", JdbcType::Varchar)
                })
                .column(ColumnDescriptor::new("container", JdbcType::Guid))
                .key(&["userid"])
                .container_column("container"),
        )
    }

    fn add_table(b: &mut Binder, desc: Arc<TableDescriptor>) -> RelationId {
        let id = b.add_relation(
            "users",
            RelationKind::Table(TableRel::physical(desc, None)),
            &BuildCtx::new(Place::From, None),
            Span::NONE,
        );
        b.declare_relation(id).unwrap();
        b.assign_names(id);
        id
    }

    #[test]
    fn test_plain_table_reference() {
        let mut b = test_binder();
        let id = add_table(&mut b, users());
        let userid = b.find_column(id, "userid").unwrap();
        let _r = b.add_ref(userid);
        assert!(b.column(userid).is_key);
        assert_eq!(b.relation_from_sql(id).sql(), "core.users users");
    }

    #[test]
    fn test_renamed_column_needs_derived_select() {
        let mut b = test_binder();
        let id = add_table(&mut b, users());
        let name = b.find_column(id, "displayname").unwrap();
        let _r = b.add_ref(name);
        assert_eq!(
            b.relation_from_sql(id).sql(),
            "(SELECT base.display_name AS displayname\nFROM core.users base) users"
        );
    }

    #[test]
    fn test_container_filter_binds_ids() {
        let mut b = test_binder();
        let mut env = Environment::default().with_container("c1", "/home");
        env.subfolders = vec!["c2".to_string()];
        b.ctx.environment = Arc::new(env);
        b.ctx.container_filter = Some(ContainerFilter::CurrentAndSubfolders);
        let id = add_table(&mut b, users());
        let userid = b.find_column(id, "userid").unwrap();
        let _r = b.add_ref(userid);
        let sql = b.relation_from_sql(id);
        assert_eq!(
            sql.sql(),
            "(SELECT base.userid AS userid\nFROM core.users base\nWHERE (base.container IN (?, ?))) users"
        );
        assert_eq!(sql.params().len(), 2);
    }
}
