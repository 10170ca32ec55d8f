//! Bound expressions.
//!
//! Binding replaces identifiers with column or parameter leaves and builds
//! relations for subqueries. Resolving assigns types and validates calls.
//! Emission turns the bound tree into SQL with the minimal parentheses.

use crate::ast::{
    needs_parens, BinaryOp, Expr, ExprKind, FieldKey, Literal, OpShape, QueryExpr, Quantifier,
    ResultKind, Span, UnaryOp, PREC_COMPARISON,
};
use crate::dialect::{Dialect, Interval};
use crate::fragment::{SqlFragment, SqlParam};
use crate::method::{aggregate, AggregateInfo, CallArgs, MethodInfo};
use crate::types::JdbcType;

use super::{Binder, BuildCtx, ColumnId, Place, RelationId};

#[derive(Debug, Clone, PartialEq)]
pub struct BoundExpr {
    pub kind: BoundKind,
    pub ty: JdbcType,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundKind {
    Column(ColumnId),
    Param(String),
    Literal(Literal),
    /// An undefined `IFDEFINED` column, or the placeholder left by an error.
    Null,
    Interval(Interval),
    Unary {
        op: UnaryOp,
        operand: Box<BoundExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    Like {
        expr: Box<BoundExpr>,
        pattern: Box<BoundExpr>,
        escape: Option<Box<BoundExpr>>,
        negated: bool,
    },
    Between {
        expr: Box<BoundExpr>,
        low: Box<BoundExpr>,
        high: Box<BoundExpr>,
        negated: bool,
    },
    InList {
        expr: Box<BoundExpr>,
        list: Vec<BoundExpr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<BoundExpr>,
        query: RelationId,
        negated: bool,
    },
    IsNull {
        expr: Box<BoundExpr>,
        negated: bool,
    },
    Exists(RelationId),
    Subquery(RelationId),
    Quantified {
        left: Box<BoundExpr>,
        op: BinaryOp,
        quantifier: Quantifier,
        query: RelationId,
    },
    Call {
        name: String,
        args: Vec<BoundExpr>,
        distinct: bool,
        star: bool,
        target: CallTarget,
    },
    Cast {
        expr: Box<BoundExpr>,
        ty: JdbcType,
        precision: Option<(u32, Option<u32>)>,
    },
    Case {
        operand: Option<Box<BoundExpr>>,
        whens: Vec<(BoundExpr, BoundExpr)>,
        else_expr: Option<Box<BoundExpr>>,
    },
}

/// What a call was resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    Unresolved,
    Method(MethodInfo),
    Aggregate(&'static AggregateInfo),
}

impl BoundExpr {
    pub fn new(kind: BoundKind, ty: JdbcType, span: Span) -> Self {
        Self { kind, ty, span }
    }

    pub fn null(span: Span) -> Self {
        Self::new(BoundKind::Null, JdbcType::Null, span)
    }

    pub fn as_column(&self) -> Option<ColumnId> {
        match self.kind {
            BoundKind::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        match &self.kind {
            BoundKind::Literal(_) | BoundKind::Null => true,
            BoundKind::Unary { operand, .. } => operand.is_constant(),
            BoundKind::Binary { left, right, .. } => left.is_constant() && right.is_constant(),
            BoundKind::Cast { expr, .. } => expr.is_constant(),
            _ => false,
        }
    }

    fn string_literal(&self) -> Option<String> {
        match &self.kind {
            BoundKind::Literal(Literal::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Direct operands, not descending into subquery relations.
    pub fn children(&self) -> Vec<&BoundExpr> {
        match &self.kind {
            BoundKind::Column(_)
            | BoundKind::Param(_)
            | BoundKind::Literal(_)
            | BoundKind::Null
            | BoundKind::Interval(_)
            | BoundKind::Exists(_)
            | BoundKind::Subquery(_) => vec![],
            BoundKind::Unary { operand, .. } => vec![operand],
            BoundKind::Binary { left, right, .. } => vec![left, right],
            BoundKind::Like {
                expr,
                pattern,
                escape,
                ..
            } => {
                let mut out: Vec<&BoundExpr> = vec![expr, pattern];
                out.extend(escape.as_deref());
                out
            }
            BoundKind::Between {
                expr, low, high, ..
            } => vec![expr, low, high],
            BoundKind::InList { expr, list, .. } => {
                let mut out: Vec<&BoundExpr> = vec![expr];
                out.extend(list.iter());
                out
            }
            BoundKind::InSubquery { expr, .. } | BoundKind::IsNull { expr, .. } => vec![expr],
            BoundKind::Quantified { left, .. } => vec![left],
            BoundKind::Call { args, .. } => args.iter().collect(),
            BoundKind::Cast { expr, .. } => vec![expr],
            BoundKind::Case {
                operand,
                whens,
                else_expr,
            } => {
                let mut out: Vec<&BoundExpr> = operand.as_deref().into_iter().collect();
                for (w, t) in whens {
                    out.push(w);
                    out.push(t);
                }
                out.extend(else_expr.as_deref());
                out
            }
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        match &self.kind {
            BoundKind::Call { name, target, .. }
                if matches!(target, CallTarget::Aggregate(_)) || aggregate::is_aggregate(name) =>
            {
                true
            }
            _ => self.children().into_iter().any(BoundExpr::contains_aggregate),
        }
    }

    /// The aggregate this expression is a direct call of.
    pub fn aggregate(&self) -> Option<&'static AggregateInfo> {
        match &self.kind {
            BoundKind::Call { name, .. } => aggregate::lookup(name),
            _ => None,
        }
    }

    /// Whether the emitted SQL is a truth value rather than a scalar.
    pub fn is_predicate(&self) -> bool {
        match &self.kind {
            BoundKind::Binary { op, .. } => op.result_kind() == ResultKind::Boolean,
            BoundKind::Unary { op, .. } => *op == UnaryOp::Not,
            BoundKind::Like { .. }
            | BoundKind::Between { .. }
            | BoundKind::InList { .. }
            | BoundKind::InSubquery { .. }
            | BoundKind::IsNull { .. }
            | BoundKind::Exists(_)
            | BoundKind::Quantified { .. } => true,
            BoundKind::Call {
                target: CallTarget::Method(m),
                ..
            } => m.is_predicate(),
            _ => false,
        }
    }

    pub fn shape(&self) -> OpShape {
        match &self.kind {
            BoundKind::Binary { op, .. } => OpShape::Binary(*op),
            BoundKind::Unary { op, .. } => OpShape::Fixed(op.precedence()),
            BoundKind::Like { .. }
            | BoundKind::Between { .. }
            | BoundKind::InList { .. }
            | BoundKind::InSubquery { .. }
            | BoundKind::IsNull { .. }
            | BoundKind::Quantified { .. } => OpShape::Fixed(PREC_COMPARISON),
            _ => OpShape::Atom,
        }
    }
}

fn literal_type(lit: &Literal) -> JdbcType {
    match lit {
        Literal::Null => JdbcType::Null,
        Literal::Bool(_) => JdbcType::Boolean,
        Literal::Integer(n) if i32::try_from(*n).is_ok() => JdbcType::Integer,
        Literal::Integer(_) => JdbcType::BigInt,
        Literal::Decimal(_) => JdbcType::Decimal,
        Literal::String(_) => JdbcType::Varchar,
    }
}

/// Binding context for one expression.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BindCtx {
    /// Relation whose FROM clause names are searched.
    pub sel: RelationId,
    /// Inside `IFDEFINED`: unknown fields become NULL silently.
    pub if_defined: bool,
    /// Inside a VALUES list: no column references at all.
    pub no_columns: bool,
}

impl BindCtx {
    pub fn new(sel: RelationId) -> Self {
        Self {
            sel,
            if_defined: false,
            no_columns: false,
        }
    }
}

/// Where an expression being resolved appears.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolveCtx {
    pub aggregates: bool,
    pub in_aggregate: bool,
    pub clause: &'static str,
}

impl ResolveCtx {
    pub fn clause(clause: &'static str, aggregates: bool) -> Self {
        Self {
            aggregates,
            in_aggregate: false,
            clause,
        }
    }
}

impl Binder {
    // ---- declare ----

    /// Bind `expr`, pushing every column it reads onto `deps`.
    pub(crate) fn bind_expr(
        &mut self,
        ctx: BindCtx,
        expr: &Expr,
        deps: &mut Vec<ColumnId>,
    ) -> BoundExpr {
        let span = expr.span;
        let kind = match &expr.kind {
            ExprKind::Identifier(key) => return self.bind_identifier(ctx, key, span, deps),
            ExprKind::Star(_) => {
                self.error(span, "* is only allowed in the select list or in COUNT(*)");
                return BoundExpr::null(span);
            }
            ExprKind::Literal(lit) => {
                return BoundExpr::new(BoundKind::Literal(lit.clone()), literal_type(lit), span);
            }
            ExprKind::Unary { op, operand } => BoundKind::Unary {
                op: *op,
                operand: Box::new(self.bind_expr(ctx, operand, deps)),
            },
            ExprKind::Binary { op, left, right } => BoundKind::Binary {
                op: *op,
                left: Box::new(self.bind_expr(ctx, left, deps)),
                right: Box::new(self.bind_expr(ctx, right, deps)),
            },
            ExprKind::Like {
                expr: e,
                pattern,
                escape,
                negated,
            } => BoundKind::Like {
                expr: Box::new(self.bind_expr(ctx, e, deps)),
                pattern: Box::new(self.bind_expr(ctx, pattern, deps)),
                escape: escape
                    .as_ref()
                    .map(|x| Box::new(self.bind_expr(ctx, x, deps))),
                negated: *negated,
            },
            ExprKind::Between {
                expr: e,
                low,
                high,
                negated,
            } => BoundKind::Between {
                expr: Box::new(self.bind_expr(ctx, e, deps)),
                low: Box::new(self.bind_expr(ctx, low, deps)),
                high: Box::new(self.bind_expr(ctx, high, deps)),
                negated: *negated,
            },
            ExprKind::InList {
                expr: e,
                list,
                negated,
            } => BoundKind::InList {
                expr: Box::new(self.bind_expr(ctx, e, deps)),
                list: list.iter().map(|x| self.bind_expr(ctx, x, deps)).collect(),
                negated: *negated,
            },
            ExprKind::InSubquery {
                expr: e,
                query,
                negated,
            } => {
                let e = self.bind_expr(ctx, e, deps);
                let Some(query) = self.bind_subquery(ctx, query) else {
                    return BoundExpr::null(span);
                };
                BoundKind::InSubquery {
                    expr: Box::new(e),
                    query,
                    negated: *negated,
                }
            }
            ExprKind::IsNull { expr: e, negated } => BoundKind::IsNull {
                expr: Box::new(self.bind_expr(ctx, e, deps)),
                negated: *negated,
            },
            ExprKind::Exists(query) => match self.bind_subquery(ctx, query) {
                Some(q) => BoundKind::Exists(q),
                None => return BoundExpr::null(span),
            },
            ExprKind::Subquery(query) => match self.bind_subquery(ctx, query) {
                Some(q) => BoundKind::Subquery(q),
                None => return BoundExpr::null(span),
            },
            ExprKind::Quantified {
                left,
                op,
                quantifier,
                query,
            } => {
                let left = self.bind_expr(ctx, left, deps);
                let Some(query) = self.bind_subquery(ctx, query) else {
                    return BoundExpr::null(span);
                };
                BoundKind::Quantified {
                    left: Box::new(left),
                    op: *op,
                    quantifier: *quantifier,
                    query,
                }
            }
            ExprKind::Call {
                name,
                args,
                distinct,
                star,
            } => {
                let interval_arg = if aggregate::is_aggregate(name) {
                    None
                } else {
                    self.ctx
                        .methods
                        .lookup(name, self.ctx.dialect)
                        .and_then(|m| m.interval_arg)
                };
                let args = args
                    .iter()
                    .enumerate()
                    .map(|(i, a)| {
                        if Some(i) == interval_arg {
                            self.bind_interval(a)
                        } else {
                            self.bind_expr(ctx, a, deps)
                        }
                    })
                    .collect();
                BoundKind::Call {
                    name: name.clone(),
                    args,
                    distinct: *distinct,
                    star: *star,
                    target: CallTarget::Unresolved,
                }
            }
            ExprKind::Cast {
                expr: e,
                type_name,
                precision,
            } => {
                let inner = self.bind_expr(ctx, e, deps);
                let ty = JdbcType::from_sql_name(type_name).unwrap_or_else(|| {
                    self.error(span, format!("Unknown type: {}", type_name));
                    JdbcType::Other
                });
                return BoundExpr::new(
                    BoundKind::Cast {
                        expr: Box::new(inner),
                        ty,
                        precision: *precision,
                    },
                    ty,
                    span,
                );
            }
            ExprKind::Case {
                operand,
                whens,
                else_expr,
            } => BoundKind::Case {
                operand: operand
                    .as_ref()
                    .map(|o| Box::new(self.bind_expr(ctx, o, deps))),
                whens: whens
                    .iter()
                    .map(|(w, t)| (self.bind_expr(ctx, w, deps), self.bind_expr(ctx, t, deps)))
                    .collect(),
                else_expr: else_expr
                    .as_ref()
                    .map(|e| Box::new(self.bind_expr(ctx, e, deps))),
            },
            ExprKind::IfDefined(inner) => {
                let quiet = BindCtx {
                    if_defined: true,
                    ..ctx
                };
                return self.bind_expr(quiet, inner, deps);
            }
        };
        BoundExpr::new(kind, JdbcType::Other, span)
    }

    fn bind_identifier(
        &mut self,
        ctx: BindCtx,
        key: &FieldKey,
        span: Span,
        deps: &mut Vec<ColumnId>,
    ) -> BoundExpr {
        // parameters shadow columns at the unqualified top level
        if key.len() == 1 {
            if let Some(p) = self.find_parameter(key.name()) {
                return BoundExpr::new(BoundKind::Param(p.name.clone()), p.jdbc_type, span);
            }
        }
        if ctx.no_columns {
            self.error(
                span,
                format!("Column references are not allowed in a VALUES list: {}", key),
            );
            return BoundExpr::null(span);
        }
        match self.declare_field(ctx.sel, key, span, ctx.if_defined) {
            Some(c) => {
                deps.push(c);
                BoundExpr::new(BoundKind::Column(c), self.columns[c.0].jdbc_type, span)
            }
            None => BoundExpr::null(span),
        }
    }

    fn bind_interval(&mut self, arg: &Expr) -> BoundExpr {
        let text = match &arg.kind {
            ExprKind::Identifier(k) if k.len() == 1 => Some(k.name().to_string()),
            ExprKind::Literal(Literal::String(s)) => Some(s.clone()),
            _ => None,
        };
        match text.as_deref().and_then(Interval::parse) {
            Some(i) => BoundExpr::new(BoundKind::Interval(i), JdbcType::Other, arg.span),
            None => {
                self.error(arg.span, "Expected an interval such as SQL_TSI_DAY");
                BoundExpr::null(arg.span)
            }
        }
    }

    fn bind_subquery(&mut self, ctx: BindCtx, query: &QueryExpr) -> Option<RelationId> {
        let bctx = BuildCtx::new(Place::Expression, Some(ctx.sel)).with_outer(Some(ctx.sel));
        let id = self.build_query(query, bctx).ok()?;
        self.relations[ctx.sel.0].subqueries.push(id);
        self.declare_relation(id).ok()?;
        Some(id)
    }

    // ---- resolve ----

    pub(crate) fn resolve_expr(&mut self, e: &mut BoundExpr, rc: ResolveCtx) {
        let span = e.span;
        match &mut e.kind {
            BoundKind::Column(c) => e.ty = self.columns[c.0].jdbc_type,
            BoundKind::Param(_)
            | BoundKind::Literal(_)
            | BoundKind::Null
            | BoundKind::Interval(_) => {}
            BoundKind::Unary { op, operand } => {
                self.resolve_expr(operand, rc);
                e.ty = match op {
                    UnaryOp::Not => JdbcType::Boolean,
                    _ => operand.ty,
                };
            }
            BoundKind::Binary { op, left, right } => {
                self.resolve_expr(left, rc);
                self.resolve_expr(right, rc);
                e.ty = match op.result_kind() {
                    ResultKind::Boolean => JdbcType::Boolean,
                    ResultKind::String => JdbcType::Varchar,
                    ResultKind::SameAsArgument => {
                        if left.ty.is_date_time() && matches!(op, BinaryOp::Add | BinaryOp::Sub) {
                            left.ty
                        } else {
                            JdbcType::promote_numeric(left.ty, right.ty)
                        }
                    }
                };
            }
            BoundKind::Like {
                expr,
                pattern,
                escape,
                ..
            } => {
                self.resolve_expr(expr, rc);
                self.resolve_expr(pattern, rc);
                if let Some(x) = escape {
                    self.resolve_expr(x, rc);
                }
                e.ty = JdbcType::Boolean;
            }
            BoundKind::Between {
                expr, low, high, ..
            } => {
                self.resolve_expr(expr, rc);
                self.resolve_expr(low, rc);
                self.resolve_expr(high, rc);
                e.ty = JdbcType::Boolean;
            }
            BoundKind::InList { expr, list, .. } => {
                self.resolve_expr(expr, rc);
                for x in list.iter_mut() {
                    self.resolve_expr(x, rc);
                }
                e.ty = JdbcType::Boolean;
            }
            BoundKind::InSubquery { expr, query, .. } => {
                self.resolve_expr(expr, rc);
                self.resolve_subquery(*query, span);
                e.ty = JdbcType::Boolean;
            }
            BoundKind::IsNull { expr, .. } => {
                self.resolve_expr(expr, rc);
                e.ty = JdbcType::Boolean;
            }
            BoundKind::Exists(query) => {
                e.ty = if self.resolve_relation(*query).is_ok() {
                    JdbcType::Boolean
                } else {
                    JdbcType::Other
                };
            }
            BoundKind::Subquery(query) => {
                e.ty = self.resolve_subquery(*query, span);
            }
            BoundKind::Quantified { left, query, .. } => {
                self.resolve_expr(left, rc);
                self.resolve_subquery(*query, span);
                e.ty = JdbcType::Boolean;
            }
            BoundKind::Call {
                name,
                args,
                distinct,
                star,
                target,
            } => {
                e.ty = self.resolve_call(name, args, *distinct, *star, target, span, rc);
            }
            BoundKind::Cast { expr, .. } => self.resolve_expr(expr, rc),
            BoundKind::Case {
                operand,
                whens,
                else_expr,
            } => {
                if let Some(o) = operand {
                    self.resolve_expr(o, rc);
                }
                let mut ty = JdbcType::Null;
                for (w, t) in whens.iter_mut() {
                    self.resolve_expr(w, rc);
                    self.resolve_expr(t, rc);
                    ty = JdbcType::promote(ty, t.ty);
                }
                if let Some(x) = else_expr {
                    self.resolve_expr(x, rc);
                    ty = JdbcType::promote(ty, x.ty);
                }
                e.ty = ty;
            }
        }
    }

    /// Resolve a subquery used as a value; it must have exactly one column.
    fn resolve_subquery(&mut self, query: RelationId, span: Span) -> JdbcType {
        if self.resolve_relation(query).is_err() {
            return JdbcType::Other;
        }
        let columns = self.base_columns(query);
        if columns.len() != 1 {
            self.error(span, "Subquery can have only one column.");
            return JdbcType::Other;
        }
        self.columns[columns[0].0].jdbc_type
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_call(
        &mut self,
        name: &str,
        args: &mut [BoundExpr],
        distinct: bool,
        star: bool,
        target: &mut CallTarget,
        span: Span,
        rc: ResolveCtx,
    ) -> JdbcType {
        if let Some(agg) = aggregate::lookup(name) {
            let upper = agg.name.to_uppercase();
            if !rc.aggregates {
                self.error(
                    span,
                    format!(
                        "Aggregate function {} is not allowed in the {} clause",
                        upper, rc.clause
                    ),
                );
            } else if rc.in_aggregate {
                self.error(
                    span,
                    format!("Aggregate function {} cannot be nested in another aggregate", upper),
                );
            }
            let count = if star { 1 } else { args.len() };
            if star && agg.name != "count" {
                self.error(span, format!("{}(*) is not supported", upper));
            } else if count < agg.min_args || count > agg.max_args {
                self.error(
                    span,
                    format!(
                        "{} expects {} argument(s), found {}",
                        upper,
                        arity(agg.min_args, agg.max_args),
                        count
                    ),
                );
            }
            let inner = ResolveCtx {
                in_aggregate: true,
                ..rc
            };
            for a in args.iter_mut() {
                self.resolve_expr(a, inner);
            }
            let dummy = vec![SqlFragment::from_sql("x"); args.len()];
            if agg.render(self.ctx.dialect, distinct, star, &dummy).is_none() {
                self.error(
                    span,
                    format!("{} is not supported by {}", upper, self.ctx.dialect),
                );
            }
            *target = CallTarget::Aggregate(agg);
            let types: Vec<JdbcType> = args.iter().map(|a| a.ty).collect();
            return agg.result.resolve(&types);
        }

        let Some(method) = self.ctx.methods.lookup(name, self.ctx.dialect).cloned() else {
            let mut message = format!("Unknown method: {}", name);
            if let Some(s) = self.ctx.methods.suggest(name, self.ctx.dialect) {
                message.push_str(&format!(". Did you mean '{}'?", s));
            }
            self.error(span, message);
            for a in args.iter_mut() {
                self.resolve_expr(a, rc);
            }
            return JdbcType::Other;
        };
        let upper = method.name.to_uppercase();
        if !method.accepts(args.len()) {
            self.error(
                span,
                format!(
                    "{} expects {} argument(s), found {}",
                    upper,
                    method.arity(),
                    args.len()
                ),
            );
        }
        if distinct || star {
            self.error(
                span,
                format!("{} is not an aggregate; DISTINCT and * are not allowed", upper),
            );
        }
        for a in args.iter_mut() {
            self.resolve_expr(a, rc);
        }

        // a trial render reports bad literal arguments and unsupported forms now
        let values: Vec<&BoundExpr> = args
            .iter()
            .filter(|a| !matches!(a.kind, BoundKind::Interval(_)))
            .collect();
        let failure = {
            let call = CallArgs {
                dialect: self.dialect.as_ref(),
                env: self.ctx.environment.as_ref(),
                args: values.iter().map(|_| SqlFragment::from_sql("x")).collect(),
                types: values.iter().map(|a| a.ty).collect(),
                literals: values.iter().map(|a| a.string_literal()).collect(),
                interval: interval_of(args),
            };
            method.render(&call).err()
        };
        if let Some(message) = failure {
            self.error(span, message);
        }
        let types: Vec<JdbcType> = values.iter().map(|a| a.ty).collect();
        let ty = method.result.resolve(&types);
        *target = CallTarget::Method(method);
        ty
    }

    // ---- generate ----

    pub(crate) fn expr_sql(&mut self, e: &BoundExpr) -> SqlFragment {
        match &e.kind {
            BoundKind::Column(c) => SqlFragment::from_sql(self.column_sql(*c)),
            BoundKind::Param(name) => {
                let mut sql = SqlFragment::new();
                sql.append_param(SqlParam::Named {
                    name: name.clone(),
                    jdbc_type: e.ty,
                });
                sql
            }
            BoundKind::Literal(lit) => self.literal_sql(lit),
            BoundKind::Null => SqlFragment::from_sql("NULL"),
            BoundKind::Interval(i) => SqlFragment::from_sql(i.keyword()),
            BoundKind::Unary { op, operand } => {
                let inner = self.operand_sql(OpShape::Fixed(op.precedence()), operand, false);
                let mut sql = SqlFragment::from_sql(op.symbol());
                sql.append_fragment(&inner);
                sql
            }
            BoundKind::Binary {
                op: BinaryOp::Concat,
                ..
            } => self.concat_sql(e),
            BoundKind::Binary { op, left, right } => {
                let shape = OpShape::Binary(*op);
                let mut sql = self.operand_sql(shape, left, true);
                let rhs = self.operand_sql(shape, right, false);
                sql.append(&format!(" {} ", self.dialect.operator_symbol(*op)))
                    .append_fragment(&rhs);
                sql
            }
            BoundKind::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                let shape = e.shape();
                let mut sql = self.operand_sql(shape, expr, true);
                let pattern = self.operand_sql(shape, pattern, false);
                sql.append(if *negated { " NOT LIKE " } else { " LIKE " })
                    .append_fragment(&pattern);
                if let Some(x) = escape {
                    let x = self.operand_sql(shape, x, false);
                    sql.append(" ESCAPE ").append_fragment(&x);
                }
                sql
            }
            BoundKind::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let shape = e.shape();
                let mut sql = self.operand_sql(shape, expr, true);
                let low = self.operand_sql(shape, low, false);
                let high = self.operand_sql(shape, high, false);
                sql.append(if *negated { " NOT BETWEEN " } else { " BETWEEN " })
                    .append_fragment(&low)
                    .append(" AND ")
                    .append_fragment(&high);
                sql
            }
            BoundKind::InList {
                expr,
                list,
                negated,
            } => {
                let mut sql = self.operand_sql(e.shape(), expr, true);
                sql.append(if *negated { " NOT IN (" } else { " IN (" });
                for (i, x) in list.iter().enumerate() {
                    if i > 0 {
                        sql.append(", ");
                    }
                    let x = self.expr_sql(x);
                    sql.append_fragment(&x);
                }
                sql.append(")");
                sql
            }
            BoundKind::InSubquery {
                expr,
                query,
                negated,
            } => {
                let mut sql = self.operand_sql(e.shape(), expr, true);
                let sub = self.relation_sql(*query);
                sql.append(if *negated { " NOT IN (" } else { " IN (" })
                    .append_fragment(&sub)
                    .append(")");
                sql
            }
            BoundKind::IsNull { expr, negated } => {
                let mut sql = self.operand_sql(e.shape(), expr, true);
                sql.append(if *negated { " IS NOT NULL" } else { " IS NULL" });
                sql
            }
            BoundKind::Exists(query) => self.relation_sql(*query).wrap("EXISTS (", ")"),
            BoundKind::Subquery(query) => self.relation_sql(*query).wrap("(", ")"),
            BoundKind::Quantified {
                left,
                op,
                quantifier,
                query,
            } => {
                let mut sql = self.operand_sql(e.shape(), left, true);
                let sub = self.relation_sql(*query);
                sql.append(&format!(
                    " {} {} (",
                    self.dialect.operator_symbol(*op),
                    quantifier.keyword()
                ))
                .append_fragment(&sub)
                .append(")");
                sql
            }
            BoundKind::Call { .. } => self.call_sql(e),
            BoundKind::Cast {
                expr,
                ty,
                precision,
            } => {
                let inner = self.expr_sql(expr);
                let type_sql = self.cast_type_sql(*ty, *precision);
                inner.wrap("CAST(", &format!(" AS {})", type_sql))
            }
            BoundKind::Case {
                operand,
                whens,
                else_expr,
            } => {
                let mut sql = SqlFragment::from_sql("CASE");
                if let Some(o) = operand {
                    let o = self.expr_sql(o);
                    sql.append(" ").append_fragment(&o);
                }
                for (w, t) in whens {
                    let w = if operand.is_some() {
                        self.expr_sql(w)
                    } else {
                        self.predicate_sql(w)
                    };
                    let t = self.value_sql(t);
                    sql.append(" WHEN ")
                        .append_fragment(&w)
                        .append(" THEN ")
                        .append_fragment(&t);
                }
                if let Some(x) = else_expr {
                    let x = self.value_sql(x);
                    sql.append(" ELSE ").append_fragment(&x);
                }
                sql.append(" END");
                sql
            }
        }
    }

    /// An operand, parenthesized when precedence requires it.
    fn operand_sql(&mut self, parent: OpShape, child: &BoundExpr, first: bool) -> SqlFragment {
        let sql = self.expr_sql(child);
        if needs_parens(parent, child.shape(), first) {
            sql.wrap("(", ")")
        } else {
            sql
        }
    }

    /// An expression used as a value; predicates become 1/0 on backends
    /// without boolean values.
    pub(crate) fn value_sql(&mut self, e: &BoundExpr) -> SqlFragment {
        let sql = self.expr_sql(e);
        if !self.dialect.supports_boolean_values() && e.is_predicate() {
            return sql.wrap("CASE WHEN ", " THEN 1 ELSE 0 END");
        }
        sql
    }

    /// An expression used as a condition; values are compared with 1 on
    /// backends without boolean values.
    pub(crate) fn predicate_sql(&mut self, e: &BoundExpr) -> SqlFragment {
        if !self.dialect.supports_boolean_values() && !e.is_predicate() {
            let sql = self.operand_sql(OpShape::Binary(BinaryOp::Eq), e, true);
            return sql.wrap("", " = 1");
        }
        self.expr_sql(e)
    }

    fn literal_sql(&self, lit: &Literal) -> SqlFragment {
        match lit {
            Literal::Null => SqlFragment::from_sql("NULL"),
            Literal::Bool(b) => SqlFragment::from_sql(self.dialect.bool_literal(*b)),
            Literal::Integer(n) => SqlFragment::from_sql(n.to_string()),
            Literal::Decimal(d) => SqlFragment::from_sql(d.clone()),
            Literal::String(s) => SqlFragment::from_sql(format!("'{}'", s.replace('\'', "''"))),
        }
    }

    fn concat_sql(&mut self, e: &BoundExpr) -> SqlFragment {
        let mut parts = Vec::new();
        flatten_concat(e, &mut parts);
        let shape = OpShape::Binary(BinaryOp::Concat);
        let rendered: Vec<(SqlFragment, JdbcType)> = parts
            .iter()
            .enumerate()
            .map(|(i, p)| (self.operand_sql(shape, p, i == 0), p.ty))
            .collect();
        self.dialect.string_concat(&rendered)
    }

    fn call_sql(&mut self, e: &BoundExpr) -> SqlFragment {
        let BoundKind::Call {
            args,
            distinct,
            star,
            target,
            ..
        } = &e.kind
        else {
            return SqlFragment::from_sql("NULL");
        };
        match target {
            CallTarget::Aggregate(agg) => {
                let sql: Vec<SqlFragment> = args.iter().map(|a| self.expr_sql(a)).collect();
                agg.render(self.ctx.dialect, *distinct, *star, &sql)
                    .unwrap_or_else(|| SqlFragment::from_sql("NULL"))
            }
            CallTarget::Method(method) => {
                let values: Vec<&BoundExpr> = args
                    .iter()
                    .filter(|a| !matches!(a.kind, BoundKind::Interval(_)))
                    .collect();
                let sql: Vec<SqlFragment> = values.iter().map(|a| self.expr_sql(a)).collect();
                let rendered = {
                    let call = CallArgs {
                        dialect: self.dialect.as_ref(),
                        env: self.ctx.environment.as_ref(),
                        args: sql,
                        types: values.iter().map(|a| a.ty).collect(),
                        literals: values.iter().map(|a| a.string_literal()).collect(),
                        interval: interval_of(args),
                    };
                    method.render(&call)
                };
                match rendered {
                    Ok(sql) => sql,
                    Err(message) => {
                        self.error(e.span, message);
                        SqlFragment::from_sql("NULL")
                    }
                }
            }
            CallTarget::Unresolved => SqlFragment::from_sql("NULL"),
        }
    }

    fn cast_type_sql(&self, ty: JdbcType, precision: Option<(u32, Option<u32>)>) -> String {
        let name = self.dialect.sql_type_name(ty);
        if name.contains('(') {
            return name.to_string();
        }
        match precision {
            Some((p, Some(s))) => format!("{}({}, {})", name, p, s),
            Some((p, None)) => format!("{}({})", name, p),
            None if self.ctx.dialect == Dialect::SqlServer && ty.is_text() => {
                format!("{}(4000)", name)
            }
            None => name.to_string(),
        }
    }
}

fn flatten_concat<'a>(e: &'a BoundExpr, out: &mut Vec<&'a BoundExpr>) {
    match &e.kind {
        BoundKind::Binary {
            op: BinaryOp::Concat,
            left,
            right,
        } => {
            flatten_concat(left, out);
            flatten_concat(right, out);
        }
        _ => out.push(e),
    }
}

fn interval_of(args: &[BoundExpr]) -> Option<Interval> {
    args.iter().find_map(|a| match a.kind {
        BoundKind::Interval(i) => Some(i),
        _ => None,
    })
}

fn arity(min: usize, max: usize) -> String {
    if min == max {
        min.to_string()
    } else {
        format!("{} to {}", min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use crate::relation::tests::test_binder;
    use pretty_assertions::assert_eq;

    /// Bind, resolve and emit a column-free expression.
    fn emit(b: &mut Binder, source: &str) -> String {
        let rel = b.new_test_relation("t");
        let expr = parse_expression(source).unwrap();
        let mut deps = Vec::new();
        let mut bound = b.bind_expr(BindCtx::new(rel), &expr, &mut deps);
        b.resolve_expr(&mut bound, ResolveCtx::clause("SELECT", true));
        b.value_sql(&bound).sql().to_string()
    }

    #[test]
    fn test_minimal_parentheses() {
        let mut b = test_binder();
        assert_eq!(emit(&mut b, "1 + 2 * 3"), "1 + 2 * 3");
        assert_eq!(emit(&mut b, "(1 + 2) * 3"), "(1 + 2) * 3");
        assert_eq!(emit(&mut b, "1 - (2 - 3)"), "1 - (2 - 3)");
        assert_eq!(emit(&mut b, "(1 - 2) - 3"), "1 - 2 - 3");
        assert_eq!(emit(&mut b, "1 + (2 + 3)"), "1 + 2 + 3");
        assert_eq!(emit(&mut b, "NOT (1 = 1 OR 2 = 2)"), "NOT (1 = 1 OR 2 = 2)");
        assert_eq!(emit(&mut b, "-(1 + 2)"), "-(1 + 2)");
        assert_eq!(emit(&mut b, "-(-1)"), "1");
        assert!(!b.has_errors());
    }

    #[test]
    fn test_special_forms() {
        let mut b = test_binder();
        assert_eq!(
            emit(&mut b, "'a' LIKE 'b%' ESCAPE '!'"),
            "'a' LIKE 'b%' ESCAPE '!'"
        );
        assert_eq!(
            emit(&mut b, "1 + 1 NOT BETWEEN 0 AND 5"),
            "1 + 1 NOT BETWEEN 0 AND 5"
        );
        assert_eq!(emit(&mut b, "3 IN (1, 2, 3)"), "3 IN (1, 2, 3)");
        assert_eq!(emit(&mut b, "NULL IS NOT NULL"), "NULL IS NOT NULL");
        assert_eq!(emit(&mut b, "'it''s'"), "'it''s'");
    }

    #[test]
    fn test_predicate_value_on_sqlserver() {
        let mut b = test_binder();
        b.ctx.dialect = Dialect::SqlServer;
        b.dialect = Dialect::SqlServer.generator();
        assert_eq!(emit(&mut b, "1 < 2"), "CASE WHEN 1 < 2 THEN 1 ELSE 0 END");
        assert_eq!(emit(&mut b, "'a' || 1"), "'a' + CAST(1 AS NVARCHAR(MAX))");
    }

    #[test]
    fn test_call_resolution_errors() {
        let mut b = test_binder();
        emit(&mut b, "flor(1.5)");
        emit(&mut b, "abs(1, 2)");
        let errors: Vec<String> = b
            .diagnostics()
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(
            errors,
            vec![
                "Unknown method: flor. Did you mean 'floor'?".to_string(),
                "ABS expects 1 argument(s), found 2".to_string(),
            ]
        );
    }

    #[test]
    fn test_interval_argument() {
        let mut b = test_binder();
        let sql = emit(&mut b, "TIMESTAMPADD(SQL_TSI_DAY, 1, CAST('2024-01-01' AS TIMESTAMP))");
        assert!(!b.has_errors(), "{:?}", b.diagnostics());
        assert!(sql.contains("INTERVAL"), "{}", sql);
    }

    #[test]
    fn test_aggregate_placement() {
        let mut b = test_binder();
        let rel = b.new_test_relation("t");
        let expr = parse_expression("COUNT(*) + 1").unwrap();
        let mut bound = b.bind_expr(BindCtx::new(rel), &expr, &mut Vec::new());
        assert!(bound.contains_aggregate());
        b.resolve_expr(&mut bound, ResolveCtx::clause("WHERE", false));
        assert_eq!(
            b.diagnostics().errors[0].message,
            "Aggregate function COUNT is not allowed in the WHERE clause"
        );
    }
}
