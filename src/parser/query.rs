//! Statement, set operation, SELECT and FROM grammar.

use super::expr::{expr_list, parenthesized_query, parse_expr};
use super::lexer::*;
use crate::ast::*;
use crate::types::JdbcType;

/// Whether the input starts a query: `SELECT`, or a parenthesized query.
pub fn starts_query(input: &str) -> bool {
    if peek_kw(input, "select") {
        return true;
    }
    match sym("(")(input) {
        Ok((rest, _)) => starts_query(rest),
        Err(_) => false,
    }
}

/// `[PARAMETERS (...)] [WITH ...] query [;]`
pub fn parse_statement(input: &str) -> PResult<'_, Statement> {
    let (input, parameters) = match kw("parameters")(input) {
        Ok((rest, _)) => parse_parameters(rest)?,
        Err(_) => (input, vec![]),
    };
    let (input, with) = match kw("with")(input) {
        Ok((rest, _)) => parse_with(rest)?,
        Err(_) => (input, vec![]),
    };
    let (input, body) = parse_query_expr(input)?;
    let (input, _) = match sym(";")(input) {
        Ok((rest, _)) => (rest, ()),
        Err(_) => (input, ()),
    };
    let (input, _) = ws(input)?;
    Ok((
        input,
        Statement {
            parameters,
            with,
            body,
        },
    ))
}

fn parse_parameters(input: &str) -> PResult<'_, Vec<ParamDecl>> {
    let (mut input, _) = sym("(")(input)?;
    let mut params = Vec::new();
    loop {
        let (start, _) = ws(input)?;
        let (rest, name) = identifier(start)?;
        let (rest, type_word) = any_word(rest)?;
        let Some(jdbc_type) = JdbcType::from_sql_name(type_word) else {
            return fail(rest);
        };
        let (rest, default) = match kw("default")(rest) {
            Ok((r, _)) => {
                let (r, lit) = literal(r)?;
                (r, Some(lit))
            }
            Err(_) => (rest, None),
        };
        params.push(ParamDecl {
            name,
            jdbc_type,
            default,
            span: Span::at(start),
        });
        match sym(",")(rest) {
            Ok((r, _)) => input = r,
            Err(_) => {
                input = rest;
                break;
            }
        }
    }
    let (input, _) = sym(")")(input)?;
    Ok((input, params))
}

fn parse_with(mut input: &str) -> PResult<'_, Vec<CteDef>> {
    let mut ctes = Vec::new();
    loop {
        let (start, _) = ws(input)?;
        let (rest, name) = identifier(start)?;
        let (rest, _) = kw("as")(rest)?;
        let (rest, query) = parenthesized_query(rest)?;
        ctes.push(CteDef {
            name,
            query,
            span: Span::at(start),
        });
        match sym(",")(rest) {
            Ok((r, _)) => input = r,
            Err(_) => return Ok((rest, ctes)),
        }
    }
}

fn set_operator(input: &str) -> PResult<'_, SetOp> {
    if let Ok((rest, _)) = kw("union")(input) {
        return match kw("all")(rest) {
            Ok((r, _)) => Ok((r, SetOp::UnionAll)),
            Err(_) => Ok((rest, SetOp::Union)),
        };
    }
    if let Ok((rest, _)) = kw("intersect")(input) {
        return Ok((rest, SetOp::Intersect));
    }
    if let Ok((rest, _)) = kw("except")(input) {
        return Ok((rest, SetOp::Except));
    }
    fail(input)
}

/// One operand of a set operation: a bare SELECT or a parenthesized query.
fn set_term(input: &str) -> PResult<'_, QueryExpr> {
    let (start, _) = ws(input)?;
    if start.starts_with('(') {
        return parenthesized_query(start);
    }
    let (rest, select) = parse_select_core(start)?;
    Ok((rest, QueryExpr::Select(Box::new(select))))
}

/// A query expression with an optional trailing ORDER BY / LIMIT.
pub fn parse_query_expr(input: &str) -> PResult<'_, QueryExpr> {
    let (start, _) = ws(input)?;
    let span = Span::at(start);
    let (mut input, first) = set_term(start)?;
    let mut current = first;
    let mut current_is_set: Option<SetOp> = None;
    let mut bare_first = !start.starts_with('(');

    while let Ok((rest, op)) = set_operator(input) {
        let (rest, next) = set_term(rest)?;
        current = match (current, current_is_set) {
            (QueryExpr::SetOp(mut set), Some(prev)) if prev == op => {
                set.terms.push(next);
                QueryExpr::SetOp(set)
            }
            (left, _) => QueryExpr::SetOp(Box::new(SetOpQuery {
                op,
                terms: vec![left, next],
                order_by: vec![],
                limit: None,
                span,
            })),
        };
        current_is_set = Some(op);
        bare_first = false;
        input = rest;
    }

    let (input, order_by) = parse_order_by(input)?;
    let (input, limit) = parse_limit(input)?;
    if order_by.is_empty() && limit.is_none() {
        return Ok((input, current));
    }

    let query = match current {
        QueryExpr::Select(mut select) if bare_first => {
            select.order_by = order_by;
            select.limit = limit;
            QueryExpr::Select(select)
        }
        QueryExpr::SetOp(mut set) if current_is_set.is_some() => {
            set.order_by = order_by;
            set.limit = limit;
            QueryExpr::SetOp(set)
        }
        other if !other.has_order_or_limit() => match other {
            QueryExpr::Select(mut select) => {
                select.order_by = order_by;
                select.limit = limit;
                QueryExpr::Select(select)
            }
            QueryExpr::SetOp(mut set) => {
                set.order_by = order_by;
                set.limit = limit;
                QueryExpr::SetOp(set)
            }
        },
        // `(SELECT ... LIMIT 5) ORDER BY x`: a one-term set keeps both
        other => QueryExpr::SetOp(Box::new(SetOpQuery {
            op: SetOp::UnionAll,
            terms: vec![other],
            order_by,
            limit,
            span,
        })),
    };
    Ok((input, query))
}

fn parse_order_by(input: &str) -> PResult<'_, Vec<OrderItem>> {
    let Ok((rest, _)) = kw("order")(input) else {
        return Ok((input, vec![]));
    };
    let (mut input, _) = kw("by")(rest)?;
    let mut items = Vec::new();
    loop {
        let (rest, expr) = parse_expr(input)?;
        let (rest, descending) = if let Ok((r, _)) = kw("desc")(rest) {
            (r, true)
        } else if let Ok((r, _)) = kw("asc")(rest) {
            (r, false)
        } else {
            (rest, false)
        };
        items.push(OrderItem { expr, descending });
        match sym(",")(rest) {
            Ok((r, _)) => input = r,
            Err(_) => return Ok((rest, items)),
        }
    }
}

fn parse_limit(input: &str) -> PResult<'_, Option<Limit>> {
    let Ok((rest, _)) = kw("limit")(input) else {
        return Ok((input, None));
    };
    let (rest, count) = unsigned_integer(rest)?;
    let (rest, offset) = match kw("offset")(rest) {
        Ok((r, _)) => {
            let (r, n) = unsigned_integer(r)?;
            (r, Some(n))
        }
        Err(_) => (rest, None),
    };
    Ok((rest, Some(Limit { count, offset })))
}

/// An alias: `[AS] name`. Bare aliases may not be keywords.
fn parse_alias(input: &str) -> PResult<'_, Option<String>> {
    if let Ok((rest, _)) = kw("as")(input) {
        if let Ok((r, name)) = string_literal(rest) {
            return Ok((r, Some(name)));
        }
        let (rest, name) = identifier(rest)?;
        return Ok((rest, Some(name)));
    }
    match identifier(input) {
        Ok((rest, name)) => Ok((rest, Some(name))),
        Err(_) => Ok((input, None)),
    }
}

fn parse_select_core(input: &str) -> PResult<'_, SelectStmt> {
    let (start, _) = ws(input)?;
    let span = Span::at(start);
    let (input, _) = kw("select")(start)?;
    let (input, distinct) = match kw("distinct")(input) {
        Ok((rest, _)) => (rest, true),
        Err(_) => match kw("all")(input) {
            Ok((rest, _)) => (rest, false),
            Err(_) => (input, false),
        },
    };

    let (input, columns) = parse_select_list(input)?;

    let (input, from) = match kw("from")(input) {
        Ok((rest, _)) => parse_from_list(rest)?,
        Err(_) => (input, vec![]),
    };
    let (input, where_clause) = match kw("where")(input) {
        Ok((rest, _)) => {
            let (rest, e) = parse_expr(rest)?;
            (rest, Some(e))
        }
        Err(_) => (input, None),
    };
    let (input, group_by) = match kw("group")(input) {
        Ok((rest, _)) => {
            let (rest, _) = kw("by")(rest)?;
            expr_list(rest)?
        }
        Err(_) => (input, vec![]),
    };
    let (input, having) = match kw("having")(input) {
        Ok((rest, _)) => {
            let (rest, e) = parse_expr(rest)?;
            (rest, Some(e))
        }
        Err(_) => (input, None),
    };
    let (input, pivot) = parse_pivot(input)?;

    Ok((
        input,
        SelectStmt {
            distinct,
            columns,
            from,
            where_clause,
            group_by,
            having,
            pivot,
            order_by: vec![],
            limit: None,
            span,
        },
    ))
}

/// Select items; a trailing comma before FROM is accepted.
fn parse_select_list(mut input: &str) -> PResult<'_, Vec<SelectItem>> {
    let mut items = Vec::new();
    loop {
        let (start, _) = ws(input)?;
        if !items.is_empty() && (peek_kw(start, "from") || start.is_empty() || peek_sym(start, ")")) {
            return Ok((start, items));
        }
        let (rest, expr) = parse_expr(start)?;
        let (rest, alias) = parse_alias(rest)?;
        items.push(SelectItem {
            expr,
            alias,
            span: Span::at(start),
        });
        match sym(",")(rest) {
            Ok((r, _)) => input = r,
            Err(_) => return Ok((rest, items)),
        }
    }
}

fn parse_from_list(mut input: &str) -> PResult<'_, Vec<FromItem>> {
    let mut items = Vec::new();
    loop {
        let (rest, item) = parse_from_item(input)?;
        items.push(item);
        match sym(",")(rest) {
            Ok((r, _)) => input = r,
            Err(_) => return Ok((rest, items)),
        }
    }
}

fn join_kind(input: &str) -> PResult<'_, JoinKind> {
    let (input, kind) = if let Ok((rest, _)) = kw("inner")(input) {
        (rest, JoinKind::Inner)
    } else if let Ok((rest, _)) = kw("left")(input) {
        (kw("outer")(rest).map(|(r, _)| r).unwrap_or(rest), JoinKind::Left)
    } else if let Ok((rest, _)) = kw("right")(input) {
        (kw("outer")(rest).map(|(r, _)| r).unwrap_or(rest), JoinKind::Right)
    } else if let Ok((rest, _)) = kw("full")(input) {
        (kw("outer")(rest).map(|(r, _)| r).unwrap_or(rest), JoinKind::Full)
    } else if let Ok((rest, _)) = kw("cross")(input) {
        (rest, JoinKind::Cross)
    } else {
        (input, JoinKind::Inner)
    };
    let (input, _) = kw("join")(input)?;
    Ok((input, kind))
}

/// A FROM primary followed by any number of joins.
fn parse_from_item(input: &str) -> PResult<'_, FromItem> {
    let (mut input, mut left) = parse_from_primary(input)?;
    loop {
        let (start, _) = ws(input)?;
        let Ok((rest, kind)) = join_kind(start) else {
            return Ok((input, left));
        };
        let (rest, right) = parse_from_primary(rest)?;
        let (rest, on) = match kw("on")(rest) {
            Ok((r, _)) => {
                let (r, e) = parse_expr(r)?;
                (r, Some(e))
            }
            Err(_) => (rest, None),
        };
        left = FromItem::Join {
            kind,
            left: Box::new(left),
            right: Box::new(right),
            on,
            span: Span::at(start),
        };
        input = rest;
    }
}

fn parse_annotations(input: &str) -> PResult<'_, Vec<(String, Literal)>> {
    let Ok((mut input, _)) = sym("[")(input) else {
        return Ok((input, vec![]));
    };
    let mut annotations = Vec::new();
    loop {
        let (rest, name) = identifier(input)?;
        let (rest, _) = sym("=")(rest)?;
        let (rest, value) = literal(rest)?;
        annotations.push((name, value));
        match sym(",")(rest) {
            Ok((r, _)) => input = r,
            Err(_) => {
                let (rest, _) = sym("]")(rest)?;
                return Ok((rest, annotations));
            }
        }
    }
}

fn parse_values(input: &str) -> PResult<'_, Vec<Vec<Expr>>> {
    let mut rows = Vec::new();
    let mut input = input;
    loop {
        let (rest, _) = sym("(")(input)?;
        let (rest, row) = expr_list(rest)?;
        let (rest, _) = sym(")")(rest)?;
        rows.push(row);
        match sym(",")(rest) {
            Ok((r, _)) => input = r,
            Err(_) => return Ok((rest, rows)),
        }
    }
}

fn parse_from_primary(input: &str) -> PResult<'_, FromItem> {
    let (start, _) = ws(input)?;
    let span = Span::at(start);

    if let Ok((after_paren, _)) = sym("(")(start) {
        if starts_query(after_paren) {
            let (rest, query) = parenthesized_query(start)?;
            let (rest, alias) = parse_alias(rest)?;
            return Ok((rest, FromItem::Subquery { query, alias, span }));
        }
        if let Ok((rest, _)) = kw("values")(after_paren) {
            let (rest, rows) = parse_values(rest)?;
            let (rest, _) = sym(")")(rest)?;
            let (rest, alias) = parse_alias(rest)?;
            return Ok((rest, FromItem::Values { rows, alias, span }));
        }
        let (rest, inner) = parse_from_item(after_paren)?;
        let (rest, _) = sym(")")(rest)?;
        return Ok((rest, inner));
    }

    let (mut input, first) = identifier(start)?;
    let mut parts = vec![first];
    while let Ok((rest, _)) = sym(".")(input) {
        let (rest, part) = identifier(rest)?;
        parts.push(part);
        input = rest;
    }
    let (input, mut annotations) = parse_annotations(input)?;
    let (input, alias) = parse_alias(input)?;
    let (input, trailing) = parse_annotations(input)?;
    annotations.extend(trailing);
    Ok((
        input,
        FromItem::Table {
            name: FieldKey::new(parts),
            alias,
            annotations,
            span,
        },
    ))
}

fn pivot_value(input: &str) -> PResult<'_, PivotValue> {
    let (start, _) = ws(input)?;
    let negative = start.starts_with('-');
    let (rest, value) = literal(if negative { &start[1..] } else { start })?;
    let value = match (negative, value) {
        (true, Literal::Integer(n)) => Literal::Integer(-n),
        (true, Literal::Decimal(d)) => Literal::Decimal(format!("-{}", d)),
        (true, _) => return fail(start),
        (false, v) => v,
    };
    let (rest, alias) = parse_alias(rest)?;
    Ok((
        rest,
        PivotValue {
            value,
            alias,
            span: Span::at(start),
        },
    ))
}

/// `PIVOT agg [, agg] BY col [IN (values | query)]`
fn parse_pivot(input: &str) -> PResult<'_, Option<PivotClause>> {
    let (start, _) = ws(input)?;
    let Ok((mut input, _)) = kw("pivot")(start) else {
        return Ok((input, None));
    };
    let mut aggregates = Vec::new();
    loop {
        let (at, _) = ws(input)?;
        let (rest, name) = identifier(at)?;
        aggregates.push((name, Span::at(at)));
        match sym(",")(rest) {
            Ok((r, _)) => input = r,
            Err(_) => {
                input = rest;
                break;
            }
        }
    }
    let (input, _) = kw("by")(input)?;
    let (input, by) = identifier(input)?;
    let (input, values) = match kw("in")(input) {
        Ok((rest, _)) => {
            if let Ok((rest, query)) = parenthesized_query(rest) {
                (rest, PivotValues::Query(Box::new(query)))
            } else {
                let (mut rest, _) = sym("(")(rest)?;
                let mut values = Vec::new();
                loop {
                    let (r, v) = pivot_value(rest)?;
                    values.push(v);
                    match sym(",")(r) {
                        Ok((r2, _)) => rest = r2,
                        Err(_) => {
                            rest = r;
                            break;
                        }
                    }
                }
                let (rest, _) = sym(")")(rest)?;
                (rest, PivotValues::List(values))
            }
        }
        Err(_) => (input, PivotValues::Implicit),
    };
    Ok((
        input,
        Some(PivotClause {
            aggregates,
            by,
            values,
            span: Span::at(start),
        }),
    ))
}
