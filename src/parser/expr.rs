//! Expression grammar.
//!
//! Precedence, loosest first: OR, AND, NOT, comparison and predicates,
//! `|`, `^`, `&`, `+ - ||`, `* / %`, unary.

use super::lexer::*;
use super::query::{parse_query_expr, starts_query};
use crate::ast::*;

pub fn parse_expr(input: &str) -> PResult<'_, Expr> {
    parse_or(input)
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span;
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

/// Match one of `ops` at the head of `input`, longest spelling first.
fn operator_token<'a>(input: &'a str, ops: &[(&'static str, BinaryOp)]) -> Option<(&'a str, BinaryOp)> {
    let (input, _) = ws(input).ok()?;
    for (spelling, op) in ops {
        if let Some(rest) = input.strip_prefix(spelling) {
            // `|` must not swallow the first half of `||`
            if *spelling == "|" && rest.starts_with('|') {
                continue;
            }
            return Some((rest, *op));
        }
    }
    None
}

/// Generic left-associative binary chain parser.
fn parse_binary_chain<'a, F>(
    mut input: &'a str,
    mut left: Expr,
    parse_operand: F,
    operators: &[(&'static str, BinaryOp)],
) -> PResult<'a, Expr>
where
    F: Fn(&'a str) -> PResult<'a, Expr>,
{
    while let Some((after_op, op)) = operator_token(input, operators) {
        let (after_right, right) = parse_operand(after_op)?;
        left = binary(op, left, right);
        input = after_right;
    }
    Ok((input, left))
}

fn parse_or(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut left) = parse_and(input)?;
    while let Ok((rest, _)) = kw("or")(input) {
        let (rest, right) = parse_and(rest)?;
        left = binary(BinaryOp::Or, left, right);
        input = rest;
    }
    Ok((input, left))
}

fn parse_and(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut left) = parse_not(input)?;
    while let Ok((rest, _)) = kw("and")(input) {
        let (rest, right) = parse_not(rest)?;
        left = binary(BinaryOp::And, left, right);
        input = rest;
    }
    Ok((input, left))
}

fn parse_not(input: &str) -> PResult<'_, Expr> {
    let (start, _) = ws(input)?;
    if let Ok((rest, _)) = kw("not")(start) {
        let (rest, operand) = parse_not(rest)?;
        return Ok((
            rest,
            Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                Span::at(start),
            ),
        ));
    }
    parse_predicate(input)
}

const COMPARISONS: &[(&str, BinaryOp)] = &[
    ("<>", BinaryOp::Ne),
    ("!=", BinaryOp::Ne),
    ("<=", BinaryOp::Le),
    (">=", BinaryOp::Ge),
    ("=", BinaryOp::Eq),
    ("<", BinaryOp::Lt),
    (">", BinaryOp::Gt),
];

fn parse_quantifier(input: &str) -> PResult<'_, Quantifier> {
    if let Ok((rest, _)) = kw("any")(input) {
        return Ok((rest, Quantifier::Any));
    }
    if let Ok((rest, _)) = kw("all")(input) {
        return Ok((rest, Quantifier::All));
    }
    if let Ok((rest, _)) = kw("some")(input) {
        return Ok((rest, Quantifier::Some));
    }
    fail(input)
}

/// `( query )`
pub fn parenthesized_query(input: &str) -> PResult<'_, QueryExpr> {
    let (rest, _) = sym("(")(input)?;
    if !starts_query(rest) {
        return fail(input);
    }
    let (rest, query) = parse_query_expr(rest)?;
    let (rest, _) = sym(")")(rest)?;
    Ok((rest, query))
}

fn parse_predicate(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut left) = parse_bit_or(input)?;
    loop {
        if let Some((rest, op)) = operator_token(input, COMPARISONS) {
            if let Ok((rest, quantifier)) = parse_quantifier(rest) {
                let (rest, query) = parenthesized_query(rest)?;
                let span = left.span;
                left = Expr::new(
                    ExprKind::Quantified {
                        left: Box::new(left),
                        op,
                        quantifier,
                        query: Box::new(query),
                    },
                    span,
                );
                input = rest;
                continue;
            }
            let (rest, right) = parse_bit_or(rest)?;
            left = binary(op, left, right);
            input = rest;
            continue;
        }

        if let Ok((rest, _)) = kw("is")(input) {
            let (rest, negated) = match kw("not")(rest) {
                Ok((r, _)) => (r, true),
                Err(_) => (rest, false),
            };
            let (rest, _) = kw("null")(rest)?;
            let span = left.span;
            left = Expr::new(
                ExprKind::IsNull {
                    expr: Box::new(left),
                    negated,
                },
                span,
            );
            input = rest;
            continue;
        }

        let (after_not, negated) = match kw("not")(input) {
            Ok((r, _)) => (r, true),
            Err(_) => (input, false),
        };
        let span = left.span;

        if let Ok((rest, _)) = kw("like")(after_not) {
            let (rest, pattern) = parse_bit_or(rest)?;
            let (rest, escape) = match kw("escape")(rest) {
                Ok((r, _)) => {
                    let (r, e) = parse_bit_or(r)?;
                    (r, Some(Box::new(e)))
                }
                Err(_) => (rest, None),
            };
            left = Expr::new(
                ExprKind::Like {
                    expr: Box::new(left),
                    pattern: Box::new(pattern),
                    escape,
                    negated,
                },
                span,
            );
            input = rest;
            continue;
        }

        if let Ok((rest, _)) = kw("between")(after_not) {
            let (rest, low) = parse_bit_or(rest)?;
            let (rest, _) = kw("and")(rest)?;
            let (rest, high) = parse_bit_or(rest)?;
            left = Expr::new(
                ExprKind::Between {
                    expr: Box::new(left),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                },
                span,
            );
            input = rest;
            continue;
        }

        if let Ok((rest, _)) = kw("in")(after_not) {
            if let Ok((rest, query)) = parenthesized_query(rest) {
                left = Expr::new(
                    ExprKind::InSubquery {
                        expr: Box::new(left),
                        query: Box::new(query),
                        negated,
                    },
                    span,
                );
                input = rest;
                continue;
            }
            let (rest, _) = sym("(")(rest)?;
            let (rest, list) = expr_list(rest)?;
            let (rest, _) = sym(")")(rest)?;
            left = Expr::new(
                ExprKind::InList {
                    expr: Box::new(left),
                    list,
                    negated,
                },
                span,
            );
            input = rest;
            continue;
        }

        break;
    }
    Ok((input, left))
}

/// Comma-separated expressions, at least one.
pub fn expr_list(input: &str) -> PResult<'_, Vec<Expr>> {
    let (mut input, first) = parse_expr(input)?;
    let mut list = vec![first];
    while let Ok((rest, _)) = sym(",")(input) {
        let (rest, next) = parse_expr(rest)?;
        list.push(next);
        input = rest;
    }
    Ok((input, list))
}

fn parse_bit_or(input: &str) -> PResult<'_, Expr> {
    let (input, left) = parse_bit_xor(input)?;
    parse_binary_chain(input, left, parse_bit_xor, &[("|", BinaryOp::BitOr)])
}

fn parse_bit_xor(input: &str) -> PResult<'_, Expr> {
    let (input, left) = parse_bit_and(input)?;
    parse_binary_chain(input, left, parse_bit_and, &[("^", BinaryOp::BitXor)])
}

fn parse_bit_and(input: &str) -> PResult<'_, Expr> {
    let (input, left) = parse_additive(input)?;
    parse_binary_chain(input, left, parse_additive, &[("&", BinaryOp::BitAnd)])
}

fn parse_additive(input: &str) -> PResult<'_, Expr> {
    let (input, left) = parse_multiplicative(input)?;
    parse_binary_chain(
        input,
        left,
        parse_multiplicative,
        &[
            ("||", BinaryOp::Concat),
            ("+", BinaryOp::Add),
            ("-", BinaryOp::Sub),
        ],
    )
}

fn parse_multiplicative(input: &str) -> PResult<'_, Expr> {
    let (input, left) = parse_unary(input)?;
    parse_binary_chain(
        input,
        left,
        parse_unary,
        &[
            ("*", BinaryOp::Mul),
            ("/", BinaryOp::Div),
            ("%", BinaryOp::Mod),
        ],
    )
}

fn parse_unary(input: &str) -> PResult<'_, Expr> {
    let (start, _) = ws(input)?;
    let op = match start.chars().next() {
        Some('-') => UnaryOp::Neg,
        Some('+') => UnaryOp::Plus,
        Some('~') => UnaryOp::BitNot,
        _ => return parse_primary(start),
    };
    let (rest, operand) = parse_unary(&start[1..])?;
    if op == UnaryOp::Neg {
        // fold negative numeric literals
        match operand.kind {
            ExprKind::Literal(Literal::Integer(n)) => {
                return Ok((
                    rest,
                    Expr::new(ExprKind::Literal(Literal::Integer(-n)), Span::at(start)),
                ));
            }
            ExprKind::Literal(Literal::Decimal(ref d)) => {
                return Ok((
                    rest,
                    Expr::new(
                        ExprKind::Literal(Literal::Decimal(format!("-{}", d))),
                        Span::at(start),
                    ),
                ));
            }
            _ => {}
        }
    }
    Ok((
        rest,
        Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            Span::at(start),
        ),
    ))
}

fn parse_primary(input: &str) -> PResult<'_, Expr> {
    let (start, _) = ws(input)?;
    let span = Span::at(start);

    if start.starts_with('(') {
        if let Ok((rest, query)) = parenthesized_query(start) {
            return Ok((rest, Expr::new(ExprKind::Subquery(Box::new(query)), span)));
        }
        let (rest, _) = sym("(")(start)?;
        let (rest, inner) = parse_expr(rest)?;
        let (rest, _) = sym(")")(rest)?;
        return Ok((rest, inner));
    }

    if start.starts_with('*') {
        return Ok((&start[1..], Expr::new(ExprKind::Star(None), span)));
    }

    if let Ok((rest, lit)) = literal(start) {
        return Ok((rest, Expr::new(ExprKind::Literal(lit), span)));
    }

    if let Ok((rest, _)) = kw("case")(start) {
        return parse_case(rest, span);
    }
    if let Ok((rest, _)) = kw("cast")(start) {
        return parse_cast(rest, span);
    }
    if let Ok((rest, _)) = kw("convert")(start) {
        return parse_convert(rest, span);
    }
    if let Ok((rest, _)) = kw("exists")(start) {
        let (rest, query) = parenthesized_query(rest)?;
        return Ok((rest, Expr::new(ExprKind::Exists(Box::new(query)), span)));
    }

    // LEFT( and RIGHT( are keywords and functions
    if let Ok((rest, word)) = any_word(start) {
        if (word.eq_ignore_ascii_case("left") || word.eq_ignore_ascii_case("right"))
            && peek_sym(rest, "(")
        {
            return parse_call(rest, word.to_string(), span);
        }
        if word.eq_ignore_ascii_case("ifdefined") && peek_sym(rest, "(") {
            let (rest, _) = sym("(")(rest)?;
            let (rest, inner) = parse_expr(rest)?;
            let (rest, _) = sym(")")(rest)?;
            return Ok((rest, Expr::new(ExprKind::IfDefined(Box::new(inner)), span)));
        }
    }

    parse_path(start, span)
}

/// Identifier path, `T.*`, or a (possibly dotted) function call.
fn parse_path(input: &str, span: Span) -> PResult<'_, Expr> {
    let (mut input, first) = identifier(input)?;
    let mut parts = vec![first];
    loop {
        let Ok((after_dot, _)) = sym(".")(input) else {
            break;
        };
        if let Ok((rest, _)) = sym("*")(after_dot) {
            return Ok((
                rest,
                Expr::new(ExprKind::Star(Some(FieldKey::new(parts))), span),
            ));
        }
        let (rest, part) = identifier(after_dot)?;
        parts.push(part);
        input = rest;
    }
    if peek_sym(input, "(") {
        return parse_call(input, parts.join("."), span);
    }
    Ok((input, Expr::new(ExprKind::Identifier(FieldKey::new(parts)), span)))
}

fn parse_call(input: &str, name: String, span: Span) -> PResult<'_, Expr> {
    let (input, _) = sym("(")(input)?;
    if let Ok((rest, _)) = sym(")")(input) {
        return Ok((
            rest,
            Expr::new(
                ExprKind::Call {
                    name,
                    args: vec![],
                    distinct: false,
                    star: false,
                },
                span,
            ),
        ));
    }
    if let Ok((rest, _)) = sym("*")(input) {
        if let Ok((rest, _)) = sym(")")(rest) {
            return Ok((
                rest,
                Expr::new(
                    ExprKind::Call {
                        name,
                        args: vec![],
                        distinct: false,
                        star: true,
                    },
                    span,
                ),
            ));
        }
    }
    let (input, distinct) = match kw("distinct")(input) {
        Ok((rest, _)) => (rest, true),
        Err(_) => match kw("all")(input) {
            Ok((rest, _)) => (rest, false),
            Err(_) => (input, false),
        },
    };
    let (input, args) = expr_list(input)?;
    let (input, _) = sym(")")(input)?;
    Ok((
        input,
        Expr::new(
            ExprKind::Call {
                name,
                args,
                distinct,
                star: false,
            },
            span,
        ),
    ))
}

fn parse_case(input: &str, span: Span) -> PResult<'_, Expr> {
    let (mut input, operand) = if peek_kw(input, "when") {
        (input, None)
    } else {
        let (rest, operand) = parse_expr(input)?;
        (rest, Some(Box::new(operand)))
    };
    let mut whens = Vec::new();
    while let Ok((rest, _)) = kw("when")(input) {
        let (rest, cond) = parse_expr(rest)?;
        let (rest, _) = kw("then")(rest)?;
        let (rest, result) = parse_expr(rest)?;
        whens.push((cond, result));
        input = rest;
    }
    if whens.is_empty() {
        return fail(input);
    }
    let (input, else_expr) = match kw("else")(input) {
        Ok((rest, _)) => {
            let (rest, e) = parse_expr(rest)?;
            (rest, Some(Box::new(e)))
        }
        Err(_) => (input, None),
    };
    let (input, _) = kw("end")(input)?;
    Ok((
        input,
        Expr::new(
            ExprKind::Case {
                operand,
                whens,
                else_expr,
            },
            span,
        ),
    ))
}

/// A type name, bare or quoted: `INTEGER`, `SQL_VARCHAR`, `'DOUBLE'`.
fn type_name(input: &str) -> PResult<'_, String> {
    if let Ok((rest, name)) = string_literal(input) {
        return Ok((rest, name));
    }
    let (rest, word) = any_word(input)?;
    Ok((rest, word.to_string()))
}

fn type_precision(input: &str) -> PResult<'_, Option<(u32, Option<u32>)>> {
    let Ok((rest, _)) = sym("(")(input) else {
        return Ok((input, None));
    };
    let (rest, p) = unsigned_integer(rest)?;
    let (rest, s) = match sym(",")(rest) {
        Ok((r, _)) => {
            let (r, s) = unsigned_integer(r)?;
            (r, Some(s as u32))
        }
        Err(_) => (rest, None),
    };
    let (rest, _) = sym(")")(rest)?;
    Ok((rest, Some((p as u32, s))))
}

fn parse_cast(input: &str, span: Span) -> PResult<'_, Expr> {
    let (input, _) = sym("(")(input)?;
    let (input, expr) = parse_expr(input)?;
    let (input, _) = kw("as")(input)?;
    let (input, type_name) = type_name(input)?;
    let (input, precision) = type_precision(input)?;
    let (input, _) = sym(")")(input)?;
    Ok((
        input,
        Expr::new(
            ExprKind::Cast {
                expr: Box::new(expr),
                type_name,
                precision,
            },
            span,
        ),
    ))
}

fn parse_convert(input: &str, span: Span) -> PResult<'_, Expr> {
    let (input, _) = sym("(")(input)?;
    let (input, expr) = parse_expr(input)?;
    let (input, _) = sym(",")(input)?;
    let (input, type_name) = type_name(input)?;
    let (input, precision) = type_precision(input)?;
    let (input, _) = sym(")")(input)?;
    Ok((
        input,
        Expr::new(
            ExprKind::Cast {
                expr: Box::new(expr),
                type_name,
                precision,
            },
            span,
        ),
    ))
}
