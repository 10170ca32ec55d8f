//! Operator table: spelling, precedence, associativity and result type.
//!
//! Precedence values are tiers where a lower number binds tighter.

use std::fmt;

pub const PREC_UNARY: u8 = 10;
pub const PREC_MULTIPLY: u8 = 20;
pub const PREC_ADD: u8 = 30;
pub const PREC_BIT_AND: u8 = 40;
pub const PREC_BIT_XOR: u8 = 41;
pub const PREC_BIT_OR: u8 = 42;
pub const PREC_COMPARISON: u8 = 50;
pub const PREC_NOT: u8 = 60;
pub const PREC_AND: u8 = 70;
pub const PREC_OR: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Left,
    Right,
    /// Same-operator children may be emitted flat.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Boolean,
    SameAsArgument,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => PREC_OR,
            BinaryOp::And => PREC_AND,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => PREC_COMPARISON,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Concat => PREC_ADD,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => PREC_MULTIPLY,
            BinaryOp::BitAnd => PREC_BIT_AND,
            BinaryOp::BitXor => PREC_BIT_XOR,
            BinaryOp::BitOr => PREC_BIT_OR,
        }
    }

    pub fn assoc(self) -> Assoc {
        match self {
            BinaryOp::Or
            | BinaryOp::And
            | BinaryOp::Add
            | BinaryOp::Mul
            | BinaryOp::Concat
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor => Assoc::Full,
            _ => Assoc::Left,
        }
    }

    pub fn result_kind(self) -> ResultKind {
        match self {
            BinaryOp::Or
            | BinaryOp::And
            | BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => ResultKind::Boolean,
            BinaryOp::Concat => ResultKind::String,
            _ => ResultKind::SameAsArgument,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == PREC_COMPARISON
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "NOT ",
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::BitNot => "~",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            UnaryOp::Not => PREC_NOT,
            _ => PREC_UNARY,
        }
    }
}

/// The operator shape of an emitted expression, used to decide parentheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpShape {
    /// Not an operator expression: literals, columns, calls, CASE.
    Atom,
    Binary(BinaryOp),
    /// Unary, BETWEEN, LIKE, IN, IS NULL: fixed precedence, no associativity.
    Fixed(u8),
}

impl OpShape {
    pub fn precedence(self) -> Option<u8> {
        match self {
            OpShape::Atom => None,
            OpShape::Binary(op) => Some(op.precedence()),
            OpShape::Fixed(p) => Some(p),
        }
    }
}

/// Whether `child`, emitted as an operand of `parent`, needs parentheses.
///
/// `first` is true for the leftmost operand of a binary operator. Operands
/// of prefix operators are never first.
pub fn needs_parens(parent: OpShape, child: OpShape, first: bool) -> bool {
    let (Some(parent_prec), Some(child_prec)) = (parent.precedence(), child.precedence()) else {
        return false;
    };
    if let (OpShape::Binary(p), OpShape::Binary(c)) = (parent, child) {
        if p == c && p.assoc() == Assoc::Full {
            return false;
        }
    }
    if child_prec < parent_prec {
        return false;
    }
    !(child_prec == parent_prec && first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tighter_child_needs_no_parens() {
        // 1 + 2 * 3
        assert!(!needs_parens(
            OpShape::Binary(BinaryOp::Add),
            OpShape::Binary(BinaryOp::Mul),
            false
        ));
        // (1 + 2) * 3
        assert!(needs_parens(
            OpShape::Binary(BinaryOp::Mul),
            OpShape::Binary(BinaryOp::Add),
            true
        ));
    }

    #[test]
    fn test_associativity() {
        // a - b - c keeps the left operand bare, a - (b - c) keeps parens
        assert!(!needs_parens(
            OpShape::Binary(BinaryOp::Sub),
            OpShape::Binary(BinaryOp::Sub),
            true
        ));
        assert!(needs_parens(
            OpShape::Binary(BinaryOp::Sub),
            OpShape::Binary(BinaryOp::Sub),
            false
        ));
        // AND chains are flat
        assert!(!needs_parens(
            OpShape::Binary(BinaryOp::And),
            OpShape::Binary(BinaryOp::And),
            false
        ));
        // a - (b + c)
        assert!(needs_parens(
            OpShape::Binary(BinaryOp::Sub),
            OpShape::Binary(BinaryOp::Add),
            false
        ));
    }

    #[test]
    fn test_unary_operand() {
        assert!(needs_parens(
            OpShape::Fixed(PREC_UNARY),
            OpShape::Fixed(PREC_UNARY),
            false
        ));
        assert!(!needs_parens(
            OpShape::Fixed(PREC_NOT),
            OpShape::Binary(BinaryOp::Eq),
            false
        ));
        assert!(!needs_parens(OpShape::Fixed(PREC_NOT), OpShape::Atom, false));
    }
}
