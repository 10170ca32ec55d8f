use super::{Expr, FieldKey, Literal, Span};
use crate::types::JdbcType;

/// A complete LabKey SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub parameters: Vec<ParamDecl>,
    pub with: Vec<CteDef>,
    pub body: QueryExpr,
}

/// One `PARAMETERS (...)` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: String,
    pub jdbc_type: JdbcType,
    pub default: Option<Literal>,
    pub span: Span,
}

/// One `WITH name AS (...)` term.
#[derive(Debug, Clone, PartialEq)]
pub struct CteDef {
    pub name: String,
    pub query: QueryExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    Select(Box<SelectStmt>),
    SetOp(Box<SetOpQuery>),
}

impl QueryExpr {
    pub fn span(&self) -> Span {
        match self {
            QueryExpr::Select(s) => s.span,
            QueryExpr::SetOp(u) => u.span,
        }
    }

    pub fn has_order_or_limit(&self) -> bool {
        match self {
            QueryExpr::Select(s) => !s.order_by.is_empty() || s.limit.is_some(),
            QueryExpr::SetOp(u) => !u.order_by.is_empty() || u.limit.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    UnionAll,
    Intersect,
    Except,
}

impl SetOp {
    pub fn keyword(self) -> &'static str {
        match self {
            SetOp::Union => "UNION",
            SetOp::UnionAll => "UNION ALL",
            SetOp::Intersect => "INTERSECT",
            SetOp::Except => "EXCEPT",
        }
    }
}

/// Terms joined by one set operator. Mixed operators nest left-deep.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOpQuery {
    pub op: SetOp,
    pub terms: Vec<QueryExpr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Limit>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub distinct: bool,
    pub columns: Vec<SelectItem>,
    pub from: Vec<FromItem>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub pivot: Option<PivotClause>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Limit>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinKind {
    pub fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT OUTER JOIN",
            JoinKind::Right => "RIGHT OUTER JOIN",
            JoinKind::Full => "FULL OUTER JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Table {
        name: FieldKey,
        alias: Option<String>,
        /// `[ContainerFilter='CurrentAndSubfolders']`
        annotations: Vec<(String, Literal)>,
        span: Span,
    },
    Subquery {
        query: QueryExpr,
        alias: Option<String>,
        span: Span,
    },
    Values {
        rows: Vec<Vec<Expr>>,
        alias: Option<String>,
        span: Span,
    },
    Join {
        kind: JoinKind,
        left: Box<FromItem>,
        right: Box<FromItem>,
        on: Option<Expr>,
        span: Span,
    },
}

impl FromItem {
    pub fn span(&self) -> Span {
        match self {
            FromItem::Table { span, .. }
            | FromItem::Subquery { span, .. }
            | FromItem::Values { span, .. }
            | FromItem::Join { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotClause {
    /// Select-list names of the pivoted aggregate columns.
    pub aggregates: Vec<(String, Span)>,
    /// Select-list name of the pivot column.
    pub by: String,
    pub values: PivotValues,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PivotValues {
    /// Discovered with a `SELECT DISTINCT` query.
    Implicit,
    List(Vec<PivotValue>),
    Query(Box<QueryExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotValue {
    pub value: Literal,
    pub alias: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub count: u64,
    pub offset: Option<u64>,
}
