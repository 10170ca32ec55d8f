use super::{BinaryOp, FieldKey, QueryExpr, Span, UnaryOp};

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn is_constant(&self) -> bool {
        match &self.kind {
            ExprKind::Literal(_) => true,
            ExprKind::Unary { operand, .. } => operand.is_constant(),
            ExprKind::Binary { left, right, .. } => left.is_constant() && right.is_constant(),
            ExprKind::Cast { expr, .. } => expr.is_constant(),
            _ => false,
        }
    }

    pub fn as_identifier(&self) -> Option<&FieldKey> {
        match &self.kind {
            ExprKind::Identifier(key) => Some(key),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(String),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Any,
    All,
    Some,
}

impl Quantifier {
    pub fn keyword(self) -> &'static str {
        match self {
            Quantifier::Any => "ANY",
            Quantifier::All => "ALL",
            Quantifier::Some => "SOME",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Identifier(FieldKey),
    /// `*` or `T.*`.
    Star(Option<FieldKey>),
    Literal(Literal),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<Box<Expr>>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        query: Box<QueryExpr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Exists(Box<QueryExpr>),
    Subquery(Box<QueryExpr>),
    Quantified {
        left: Box<Expr>,
        op: BinaryOp,
        quantifier: Quantifier,
        query: Box<QueryExpr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
        /// `COUNT(*)`
        star: bool,
    },
    Cast {
        expr: Box<Expr>,
        type_name: String,
        precision: Option<(u32, Option<u32>)>,
    },
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    /// `IFDEFINED(col)`: NULL when the column does not exist.
    IfDefined(Box<Expr>),
}
