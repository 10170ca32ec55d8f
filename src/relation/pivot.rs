//! PIVOT: one output column per pivot value and pivoted aggregate.
//!
//! The source select keeps its GROUP BY. The pivot regroups its rows by the
//! remaining non-aggregate columns and spreads each pivoted aggregate over
//! the pivot values with `MAX(CASE WHEN ... END)`. When no IN list is given
//! the values are read from the data store while the pivot is declared.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, trace};

use crate::ast::{PivotClause, PivotValues, Span};
use crate::dialect::join_fragments;
use crate::fragment::{SqlFragment, SqlParam};
use crate::method::aggregate::Rollup;
use crate::types::{JdbcType, Value};

use super::bound::BoundExpr;
use super::build::{literal_value, BuildCtx};
use super::{
    BindResult, Binder, ColumnId, ColumnOrigin, Halt, Place, RelationId, RelationKind,
    RelationOps, PIVOT_SOURCE_ALIAS,
};

/// Failure of a pivot value discovery query.
#[derive(Debug, Error)]
pub enum PivotSourceError {
    #[error("permission denied: {0}")]
    Unauthorized(String),
    #[error("parameter {0} has no value")]
    MissingParameter(String),
    #[error("{0}")]
    Query(String),
}

/// Runs the query listing the distinct values of a pivot column.
pub trait PivotValueSource: Send + Sync {
    /// `sql` uses the dialect's placeholders, bound in order by `params`.
    /// Returns the first column of every row.
    fn distinct_values(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, PivotSourceError>;
}

impl<F> PivotValueSource for F
where
    F: Fn(&str, &[Value]) -> Result<Vec<Value>, PivotSourceError> + Send + Sync,
{
    fn distinct_values(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, PivotSourceError> {
        self(sql, params)
    }
}

#[derive(Debug, Clone)]
struct PivotValueData {
    name: String,
    value: Value,
}

/// What one output column computes from the source row set.
#[derive(Debug, Clone, Copy)]
enum PivotOutput {
    Group(ColumnId),
    Summary { source: ColumnId, rollup: Rollup },
    Value { value: usize, aggregate: ColumnId },
}

#[derive(Debug)]
pub(crate) struct PivotRel {
    pub clause: PivotClause,
    pub source: RelationId,
    by: Option<ColumnId>,
    values: Vec<PivotValueData>,
    outputs: Vec<(ColumnId, PivotOutput)>,
    /// The `IN (SELECT ...)` relation, used only for value discovery.
    values_query: Option<RelationId>,
}

impl PivotRel {
    pub fn new(clause: PivotClause) -> Self {
        Self {
            clause,
            source: RelationId(usize::MAX),
            by: None,
            values: Vec::new(),
            outputs: Vec::new(),
            values_query: None,
        }
    }
}

fn pivot(b: &Binder, id: RelationId) -> &PivotRel {
    match &b.relations[id.0].kind {
        RelationKind::Pivot(p) => p,
        other => unreachable!("pivot relation expected, found {}", other.label()),
    }
}

fn pivot_mut(b: &mut Binder, id: RelationId) -> &mut PivotRel {
    match &mut b.relations[id.0].kind {
        RelationKind::Pivot(p) => p,
        other => unreachable!("pivot relation expected, found {}", other.label()),
    }
}

impl Binder {
    /// Select-list columns of the pivot source with their expressions.
    fn source_items(&self, source: RelationId) -> Vec<(ColumnId, BoundExpr)> {
        match &self.relations[source.0].kind {
            RelationKind::Select(s) => s.items.iter().map(|i| (i.column, i.expr.clone())).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether `expr` is one of the source's GROUP BY expressions.
    fn grouped_by(&mut self, source: RelationId, expr: &BoundExpr) -> bool {
        let group_by = match &self.relations[source.0].kind {
            RelationKind::Select(s) => s.group_by.clone(),
            _ => return false,
        };
        if let Some(c) = expr.as_column() {
            if group_by.iter().any(|g| g.as_column() == Some(c)) {
                return true;
            }
        }
        let wanted = self.expr_sql(expr);
        group_by.iter().any(|g| self.expr_sql(g).sql() == wanted.sql())
    }

    /// Aliases for a subtree that must generate SQL before the naming pass.
    fn name_early(&mut self, rel: RelationId) {
        let bodies: Vec<RelationId> = self.ctes.iter().filter_map(|c| c.body).collect();
        for body in bodies {
            self.assign_names(body);
        }
        self.suggest_columns(rel);
        self.assign_names(rel);
    }

    /// `SELECT DISTINCT` over the source, without its HAVING clause.
    fn discovery_sql(&mut self, source: RelationId, by: ColumnId) -> SqlFragment {
        self.name_early(source);
        let having = match &mut self.relations[source.0].kind {
            RelationKind::Select(s) => s.having.take(),
            _ => None,
        };
        let body = self.relation_sql(source);
        if let RelationKind::Select(s) = &mut self.relations[source.0].kind {
            s.having = having;
        }
        let column = self.dialect.quote_identifier(&self.column(by).alias);
        let mut sql = SqlFragment::from_sql(format!(
            "SELECT DISTINCT {}.{}\nFROM (",
            PIVOT_SOURCE_ALIAS, column
        ));
        sql.append_fragment(&body)
            .append(&format!(") {}\nORDER BY 1", PIVOT_SOURCE_ALIAS));
        sql
    }

    fn parameter_default(&self, name: &str) -> Option<Value> {
        self.scopes
            .iter()
            .flat_map(|s| s.parameters.iter())
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .and_then(|p| p.default.clone())
    }

    fn run_discovery(&mut self, sql: SqlFragment, span: Span) -> BindResult<Vec<PivotValueData>> {
        // cached CTE bodies were generated before every reference was taken
        self.invalidate_ctes();
        let Some(source) = self.ctx.pivot_source.clone() else {
            self.error(
                span,
                "PIVOT values cannot be computed without a data source; list them with IN (...)",
            );
            return Err(Halt);
        };
        let sql = sql.finalize(self.dialect());
        let text = sql.render(self.dialect());
        let mut params = Vec::new();
        for p in sql.params() {
            match p {
                SqlParam::Value(v) => params.push(v.clone()),
                SqlParam::Named { name, .. } => match self.parameter_default(name) {
                    Some(v) => params.push(v),
                    None => {
                        let e = PivotSourceError::MissingParameter(name.clone());
                        self.error(span, format!("Could not compute PIVOT values: {}", e));
                        return Err(Halt);
                    }
                },
            }
        }
        debug!(sql = %text, params = params.len(), "discovering pivot values");
        match source.distinct_values(&text, &params) {
            Ok(values) => {
                trace!(count = values.len(), "pivot values");
                Ok(values
                    .into_iter()
                    .map(|value| PivotValueData {
                        name: value.display_name(),
                        value,
                    })
                    .collect())
            }
            Err(e) => {
                if let PivotSourceError::Unauthorized(message) = &e {
                    self.unauthorized.get_or_insert_with(|| message.clone());
                }
                self.error(span, format!("Could not compute PIVOT values: {}", e));
                Err(Halt)
            }
        }
    }

    fn pivot_values(
        &mut self,
        id: RelationId,
        clause: &PivotClause,
        source: RelationId,
        by: ColumnId,
    ) -> BindResult<Vec<PivotValueData>> {
        match &clause.values {
            PivotValues::List(list) => Ok(list
                .iter()
                .map(|v| {
                    let value = literal_value(&v.value);
                    PivotValueData {
                        name: v.alias.clone().unwrap_or_else(|| value.display_name()),
                        value,
                    }
                })
                .collect()),
            PivotValues::Implicit => {
                let sql = self.discovery_sql(source, by);
                self.run_discovery(sql, clause.span)
            }
            PivotValues::Query(query) => {
                let rel = self.build_query(query, BuildCtx::new(Place::Expression, Some(id)))?;
                pivot_mut(self, id).values_query = Some(rel);
                self.resolve_relation(rel)?;
                if self.base_columns(rel).len() != 1 {
                    self.error(clause.span, "PIVOT IN subquery must return exactly one column");
                    return Err(Halt);
                }
                self.name_early(rel);
                let sql = self.relation_sql(rel);
                self.run_discovery(sql, clause.span)
            }
        }
    }

    /// A pivot value as SQL; dates and timestamps are bound.
    fn pivot_value_sql(&self, value: &Value) -> SqlFragment {
        match value {
            Value::Null => SqlFragment::from_sql("NULL"),
            Value::Bool(v) => SqlFragment::from_sql(self.dialect.bool_literal(*v)),
            Value::Int(_) | Value::Float(_) | Value::Decimal(_) => {
                SqlFragment::from_sql(value.to_string())
            }
            Value::String(s) => SqlFragment::from_sql(format!("'{}'", s.replace('\'', "''"))),
            Value::Date(_) | Value::Timestamp(_) => {
                let mut sql = SqlFragment::new();
                sql.append_value(value.clone());
                sql
            }
        }
    }

    fn pivot_source_sql(&self, c: ColumnId) -> String {
        format!(
            "{}.{}",
            PIVOT_SOURCE_ALIAS,
            self.dialect.quote_identifier(&self.column(c).alias)
        )
    }

    fn add_pivot_column(
        &mut self,
        id: RelationId,
        name: &str,
        ty: JdbcType,
        deps: &[ColumnId],
    ) -> ColumnId {
        let c = self.add_column(id, name, name, ty, ColumnOrigin::Base);
        let phi = self.derived_phi(deps);
        self.column_mut(c).phi = phi;
        for d in deps {
            self.add_dep(c, *d);
        }
        c
    }
}

impl RelationOps for PivotRel {
    fn declare(b: &mut Binder, id: RelationId) -> BindResult<()> {
        let source = pivot(b, id).source;
        b.declare_relation(source)?;
        b.resolve_relation(source)?;
        let clause = pivot(b, id).clause.clone();
        let items = b.source_items(source);
        let find = |b: &Binder, name: &str| {
            items
                .iter()
                .find(|(c, _)| b.column(*c).name.eq_ignore_ascii_case(name))
                .cloned()
        };

        let Some((by, by_expr)) = find(b, &clause.by) else {
            b.error(clause.span, format!("Unknown PIVOT column: {}", clause.by));
            return Err(Halt);
        };
        if !b.grouped_by(source, &by_expr) {
            b.error(
                clause.span,
                format!("PIVOT column {} must appear in the GROUP BY", clause.by),
            );
            return Err(Halt);
        }
        let mut failed = false;
        let mut pivoted = Vec::new();
        for (name, span) in &clause.aggregates {
            match find(b, name) {
                Some((c, _)) if c == by => {
                    b.error(*span, format!("Cannot pivot the PIVOT BY column: {}", name));
                    failed = true;
                }
                Some((c, _)) => pivoted.push(c),
                None => {
                    b.error(*span, format!("Unknown PIVOT aggregate: {}", name));
                    failed = true;
                }
            }
        }
        if failed {
            return Err(Halt);
        }

        let values = b.pivot_values(id, &clause, source, by)?;
        let mut seen = HashSet::new();
        for v in &values {
            if !seen.insert(v.name.to_lowercase()) {
                b.error(clause.span, format!("Duplicate PIVOT column name: {}", v.name));
                failed = true;
            }
        }

        let mut outputs = Vec::new();
        for (c, expr) in &items {
            if *c == by {
                continue;
            }
            let (name, ty, fk) = {
                let col = b.column(*c);
                (col.name.clone(), col.jdbc_type, col.fk.clone())
            };
            let output = if expr.contains_aggregate() {
                let rollup = expr.aggregate().map_or(Rollup::Null, |a| a.rollup());
                if rollup == Rollup::Reject {
                    b.error(
                        expr.span,
                        format!(
                            "{} cannot be summarized across PIVOT values: {}",
                            expr.aggregate().map_or("aggregate", |a| a.name).to_uppercase(),
                            name
                        ),
                    );
                    failed = true;
                    continue;
                }
                PivotOutput::Summary { source: *c, rollup }
            } else {
                PivotOutput::Group(*c)
            };
            let out = b.add_pivot_column(id, &name, ty, &[*c]);
            if matches!(output, PivotOutput::Group(_)) {
                b.column_mut(out).fk = fk;
            }
            outputs.push((out, output));
        }
        for (i, v) in values.iter().enumerate() {
            for agg in &pivoted {
                let (agg_name, ty) = {
                    let col = b.column(*agg);
                    (col.name.clone(), col.jdbc_type)
                };
                let name = format!("{}::{}", v.name, agg_name);
                let out = b.add_pivot_column(id, &name, ty, &[*agg, by]);
                outputs.push((
                    out,
                    PivotOutput::Value {
                        value: i,
                        aggregate: *agg,
                    },
                ));
            }
        }
        if failed {
            return Err(Halt);
        }
        debug!(relation = %id, values = values.len(), columns = outputs.len(), "declared pivot");
        let p = pivot_mut(b, id);
        p.by = Some(by);
        p.values = values;
        p.outputs = outputs;
        Ok(())
    }

    fn resolve(b: &mut Binder, id: RelationId) -> BindResult<()> {
        b.resolve_relation(pivot(b, id).source)
    }

    fn select_sql(b: &mut Binder, id: RelationId) -> SqlFragment {
        let (source, by, outputs, values) = {
            let p = pivot(b, id);
            (p.source, p.by, p.outputs.clone(), p.values.clone())
        };
        let Some(by) = by else {
            return SqlFragment::new();
        };
        let mut list = Vec::new();
        let mut group = Vec::new();
        for (column, output) in outputs {
            let mut item = match output {
                PivotOutput::Group(c) => {
                    group.push(b.pivot_source_sql(c));
                    SqlFragment::from_sql(b.pivot_source_sql(c))
                }
                PivotOutput::Summary { source, rollup } => {
                    let src = b.pivot_source_sql(source);
                    SqlFragment::from_sql(match rollup {
                        Rollup::Sum => format!("SUM({})", src),
                        Rollup::Min => format!("MIN({})", src),
                        Rollup::Max => format!("MAX({})", src),
                        Rollup::Null | Rollup::Reject => "NULL".to_string(),
                    })
                }
                PivotOutput::Value { value, aggregate } => {
                    let mut sql =
                        SqlFragment::from_sql(format!("MAX(CASE WHEN {} ", b.pivot_source_sql(by)));
                    let value = &values[value].value;
                    if value.is_null() {
                        sql.append("IS NULL");
                    } else {
                        sql.append("= ").append_fragment(&b.pivot_value_sql(value));
                    }
                    sql.append(&format!(
                        " THEN {} ELSE NULL END)",
                        b.pivot_source_sql(aggregate)
                    ));
                    sql
                }
            };
            let alias = b.dialect.quote_identifier(&b.column(column).alias);
            item.append(" AS ").append(&alias);
            list.push(item);
        }

        let mut sql = SqlFragment::from_sql("SELECT ");
        sql.append_fragment(&join_fragments(list.iter(), ",\n"));
        let body = b
            .relation_sql(source)
            .wrap("(", &format!(") {}", PIVOT_SOURCE_ALIAS));
        sql.append("\nFROM ").append_fragment(&body);
        if !group.is_empty() {
            sql.append("\nGROUP BY ").append(&group.join(", "));
        }
        sql
    }

    fn emitted_columns(b: &Binder, id: RelationId) -> Vec<ColumnId> {
        b.relations[id.0].columns.clone()
    }

    fn children(b: &Binder, id: RelationId) -> Vec<RelationId> {
        vec![pivot(b, id).source]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::parser::parse;
    use crate::relation::tests::test_binder;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "(VALUES (1, 10, 100), (2, 10, 200), (1, 20, 300)) v";

    fn compile(b: &mut Binder, sql: &str) -> BindResult<RelationId> {
        let stmt = parse(sql).unwrap();
        let root = b.build_statement(&stmt)?;
        b.resolve_relation(root)?;
        b.prepare(root);
        Ok(root)
    }

    fn output_names(b: &Binder, root: RelationId) -> Vec<String> {
        b.node(root)
            .columns()
            .iter()
            .map(|c| b.column(*c).name().to_string())
            .collect()
    }

    #[test]
    fn test_explicit_values() {
        let mut b = test_binder();
        let sql = format!(
            "SELECT column1 AS k, column2 AS seven, COUNT(*) AS c FROM {} \
             GROUP BY column1, column2 PIVOT c BY seven IN (10, 20 AS twenty)",
            SOURCE
        );
        let root = compile(&mut b, &sql).unwrap();
        assert_eq!(output_names(&b, root), vec!["k", "c", "10::c", "twenty::c"]);
        let sql = b.relation_sql(root);
        assert!(sql.sql().starts_with("SELECT _t.k AS k,\nSUM(_t.c) AS c,\n"));
        assert!(sql
            .sql()
            .contains("MAX(CASE WHEN _t.seven = 10 THEN _t.c ELSE NULL END) AS _10__c"));
        assert!(sql.sql().ends_with(") _t\nGROUP BY _t.k"));
    }

    #[test]
    fn test_pivot_column_must_be_grouped() {
        let mut b = test_binder();
        let sql = format!(
            "SELECT column1 AS k, MAX(column2) AS seven, COUNT(*) AS c FROM {} \
             GROUP BY column1 PIVOT c BY seven IN (10)",
            SOURCE
        );
        assert!(compile(&mut b, &sql).is_err());
        assert_eq!(
            b.diagnostics().errors[0].message,
            "PIVOT column seven must appear in the GROUP BY"
        );
    }

    #[test]
    fn test_duplicate_value_names_and_rejected_rollup() {
        let mut b = test_binder();
        let sql = format!(
            "SELECT column2 AS seven, COUNT(*) AS c FROM {} \
             GROUP BY column2 PIVOT c BY seven IN (10 AS x, 20 AS X)",
            SOURCE
        );
        assert!(compile(&mut b, &sql).is_err());
        assert_eq!(b.diagnostics().errors[0].message, "Duplicate PIVOT column name: X");

        let mut b = test_binder();
        let sql = format!(
            "SELECT column2 AS seven, AVG(column3) AS a FROM {} \
             GROUP BY column2 PIVOT a BY seven IN (10)",
            SOURCE
        );
        assert!(compile(&mut b, &sql).is_err());
        assert_eq!(
            b.diagnostics().errors[0].message,
            "AVG cannot be summarized across PIVOT values: a"
        );
    }

    #[test]
    fn test_discovered_values() {
        let seen = Arc::new(Mutex::new(String::new()));
        let log = Arc::clone(&seen);
        let source = move |sql: &str, _: &[Value]| -> Result<Vec<Value>, PivotSourceError> {
            *log.lock().unwrap() = sql.to_string();
            Ok(vec![Value::Int(10), Value::Int(20), Value::Null])
        };
        let mut b = test_binder();
        b.ctx.pivot_source = Some(Arc::new(source));
        let sql = format!(
            "SELECT column1 AS k, column2 AS seven, COUNT(*) AS c FROM {} \
             GROUP BY column1, column2 HAVING COUNT(*) > 0 PIVOT c BY seven",
            SOURCE
        );
        let root = compile(&mut b, &sql).unwrap();
        assert_eq!(
            output_names(&b, root),
            vec!["k", "c", "10::c", "20::c", "NULL::c"]
        );
        let discovery = seen.lock().unwrap().clone();
        assert!(discovery.starts_with("SELECT DISTINCT _t.seven\nFROM ("));
        assert!(discovery.ends_with(") _t\nORDER BY 1"));
        assert!(!discovery.contains("HAVING"));
        let sql = b.relation_sql(root);
        assert!(sql.sql().contains("MAX(CASE WHEN _t.seven IS NULL THEN _t.c ELSE NULL END)"));
    }

    #[test]
    fn test_discovery_failure_is_a_compile_error() {
        let source = |_: &str, _: &[Value]| -> Result<Vec<Value>, PivotSourceError> {
            Err(PivotSourceError::Unauthorized("R".into()))
        };
        let mut b = test_binder();
        b.ctx.pivot_source = Some(Arc::new(source));
        let sql = format!(
            "SELECT column2 AS seven, COUNT(*) AS c FROM {} GROUP BY column2 PIVOT c BY seven",
            SOURCE
        );
        assert!(compile(&mut b, &sql).is_err());
        assert_eq!(
            b.diagnostics().errors[0].message,
            "Could not compute PIVOT values: permission denied: R"
        );
        assert_eq!(b.unauthorized.as_deref(), Some("R"));
    }
}
