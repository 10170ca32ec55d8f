//! LabKey SQL parser built on nom.
//!
//! The grammar is split into token parsers ([`lexer`]), expressions
//! ([`expr`]) and statements ([`query`]). Comments are skipped by the
//! whitespace parser so spans always point into the original text.

pub mod expr;
pub mod lexer;
pub mod query;

#[cfg(test)]
mod tests;

use crate::ast::{Expr, Span, Statement};
use crate::error::QueryDiagnostic;

/// Parse a complete LabKey SQL statement.
///
/// # Example
///
/// ```
/// let stmt = lksql::parser::parse("SELECT d FROM R").unwrap();
/// assert!(stmt.with.is_empty());
/// ```
pub fn parse(source: &str) -> Result<Statement, QueryDiagnostic> {
    if source.trim().is_empty() {
        return Err(QueryDiagnostic::general("Query is empty"));
    }
    match query::parse_statement(source) {
        Ok(("", stmt)) => Ok(stmt),
        Ok((rest, _)) => Err(syntax_error(source, rest)),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(syntax_error(source, e.input)),
        Err(nom::Err::Incomplete(_)) => Err(QueryDiagnostic::general(
            "Syntax error: unexpected end of input",
        )),
    }
}

/// Parse a single expression (used for metadata and tests).
pub fn parse_expression(source: &str) -> Result<Expr, QueryDiagnostic> {
    match expr::parse_expr(source) {
        Ok((rest, e)) if rest.trim().is_empty() => Ok(e),
        Ok((rest, _)) => Err(syntax_error(source, rest)),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(syntax_error(source, e.input)),
        Err(nom::Err::Incomplete(_)) => Err(QueryDiagnostic::general(
            "Syntax error: unexpected end of input",
        )),
    }
}

fn syntax_error(source: &str, rest: &str) -> QueryDiagnostic {
    let rest = rest.trim_start();
    let (line, column) = Span::at(rest).locate(source);
    if rest.is_empty() {
        return QueryDiagnostic::new("Syntax error: unexpected end of input", line, column);
    }
    let token: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace())
        .take(24)
        .collect();
    QueryDiagnostic::new(format!("Syntax error near '{}'", token), line, column)
}
