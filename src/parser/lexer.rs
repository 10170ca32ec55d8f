//! Token-level parsers: whitespace and comments, keywords, identifiers, literals.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{opt, recognize},
    error::{Error, ErrorKind},
};

use crate::ast::Literal;

pub type PResult<'a, T> = IResult<&'a str, T>;

/// Words that cannot be used as bare identifiers or aliases.
pub const KEYWORDS: &[&str] = &[
    "all", "and", "any", "as", "asc", "between", "by", "case", "cast", "convert", "cross", "desc",
    "distinct", "else", "end", "escape", "except", "exists", "false", "from", "full", "group",
    "having", "in", "inner", "intersect", "is", "join", "left", "like", "limit", "not", "null",
    "offset", "on", "or", "order", "outer", "parameters", "pivot", "right", "select", "some",
    "then", "true", "union", "values", "when", "where", "with",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

pub fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

pub fn fail<T>(input: &str) -> PResult<'_, T> {
    Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)))
}

/// Skip whitespace, `--` line comments and `/* */` block comments.
pub fn ws(mut input: &str) -> PResult<'_, ()> {
    loop {
        let rest = input.trim_start();
        if let Some(after) = rest.strip_prefix("--") {
            input = match after.find('\n') {
                Some(nl) => &after[nl..],
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("/*") {
            match after.find("*/") {
                Some(end) => input = &after[end + 2..],
                None => return Err(nom::Err::Failure(Error::new(rest, ErrorKind::Tag))),
            }
        } else {
            return Ok((rest, ()));
        }
    }
}

/// Match a keyword (case-insensitive, not followed by an identifier char).
pub fn kw<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input: &'a str| {
        let (input, _) = ws(input)?;
        let (rest, matched) = tag_no_case::<_, _, Error<&str>>(word).parse(input)?;
        if rest.starts_with(is_ident_char) {
            return fail(input);
        }
        Ok((rest, matched))
    }
}

/// Whether the next token is the given keyword, without consuming it.
pub fn peek_kw(input: &str, word: &'static str) -> bool {
    kw(word)(input).is_ok()
}

/// Match a punctuation symbol.
pub fn sym<'a>(symbol: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input: &'a str| {
        let (input, _) = ws(input)?;
        tag::<_, _, Error<&str>>(symbol).parse(input)
    }
}

pub fn peek_sym(input: &str, symbol: &'static str) -> bool {
    sym(symbol)(input).is_ok()
}

fn quoted_identifier(input: &str) -> PResult<'_, String> {
    let (mut rest, _) = char::<_, Error<&str>>('"').parse(input)?;
    let mut out = String::new();
    loop {
        match rest.find('"') {
            Some(pos) => {
                out.push_str(&rest[..pos]);
                let after = &rest[pos + 1..];
                if let Some(escaped) = after.strip_prefix('"') {
                    out.push('"');
                    rest = escaped;
                } else {
                    return Ok((after, out));
                }
            }
            None => return Err(nom::Err::Failure(Error::new(input, ErrorKind::Char))),
        }
    }
}

fn bare_word(input: &str) -> PResult<'_, &str> {
    recognize((
        take_while(|c: char| c == '@'),
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))
    .parse(input)
}

/// An identifier: quoted (`"My Column"`) or bare and not a keyword.
pub fn identifier(input: &str) -> PResult<'_, String> {
    let (input, _) = ws(input)?;
    if input.starts_with('"') {
        return quoted_identifier(input);
    }
    let (rest, word) = bare_word(input)?;
    if is_keyword(word) {
        return fail(input);
    }
    Ok((rest, word.to_string()))
}

/// A bare word including keywords, used for function names like `LEFT(`.
pub fn any_word(input: &str) -> PResult<'_, &str> {
    let (input, _) = ws(input)?;
    bare_word(input)
}

pub fn string_literal(input: &str) -> PResult<'_, String> {
    let (input, _) = ws(input)?;
    let (mut rest, _) = char::<_, Error<&str>>('\'').parse(input)?;
    let mut out = String::new();
    loop {
        match rest.find('\'') {
            Some(pos) => {
                out.push_str(&rest[..pos]);
                let after = &rest[pos + 1..];
                if let Some(escaped) = after.strip_prefix('\'') {
                    out.push('\'');
                    rest = escaped;
                } else {
                    return Ok((after, out));
                }
            }
            None => return Err(nom::Err::Failure(Error::new(input, ErrorKind::Char))),
        }
    }
}

fn exponent(input: &str) -> PResult<'_, &str> {
    recognize((
        alt((char('e'), char('E'))),
        opt(alt((char('+'), char('-')))),
        digit1,
    ))
    .parse(input)
}

fn digit_count(input: &str) -> usize {
    input.len() - input.trim_start_matches(|c: char| c.is_ascii_digit()).len()
}

/// Unsigned numeric literal: `12`, `12.`, `12.75`, `.5`, `4.5e3`.
pub fn number_literal(input: &str) -> PResult<'_, Literal> {
    let (input, _) = ws(input)?;
    let whole = digit_count(input);
    let mut end = whole;
    if input[end..].starts_with('.') {
        end += 1 + digit_count(&input[end + 1..]);
    }
    if whole == 0 && end <= 1 {
        return fail(input);
    }
    if let Ok((after, _)) = exponent(&input[end..]) {
        end = input.len() - after.len();
    }
    let (text, rest) = input.split_at(end);
    if rest.starts_with(is_ident_char) {
        return fail(input);
    }
    let literal = if text.chars().all(|c| c.is_ascii_digit()) {
        match text.parse::<i64>() {
            Ok(n) => Literal::Integer(n),
            Err(_) => Literal::Decimal(text.to_string()),
        }
    } else {
        Literal::Decimal(text.to_string())
    };
    Ok((rest, literal))
}

pub fn unsigned_integer(input: &str) -> PResult<'_, u64> {
    let (input, _) = ws(input)?;
    let (rest, digits) = digit1::<_, Error<&str>>(input)?;
    match digits.parse::<u64>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => fail(input),
    }
}

fn quoted_literal(input: &str) -> PResult<'_, Literal> {
    let (rest, text) = string_literal(input)?;
    Ok((rest, Literal::String(text)))
}

fn keyword_literal(input: &str) -> PResult<'_, Literal> {
    if let Ok((rest, _)) = kw("true")(input) {
        return Ok((rest, Literal::Bool(true)));
    }
    if let Ok((rest, _)) = kw("false")(input) {
        return Ok((rest, Literal::Bool(false)));
    }
    if let Ok((rest, _)) = kw("null")(input) {
        return Ok((rest, Literal::Null));
    }
    fail(input)
}

/// `'text'`, a number, TRUE, FALSE or NULL.
pub fn literal(input: &str) -> PResult<'_, Literal> {
    alt((quoted_literal, number_literal, keyword_literal)).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_skips_comments() {
        let (rest, _) = ws("  -- note\n /* block */ SELECT").unwrap();
        assert_eq!(rest, "SELECT");
    }

    #[test]
    fn test_keyword_boundary() {
        assert!(kw("select")(" SELECT x").is_ok());
        assert!(kw("select")("selection").is_err());
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(identifier(" \"My \"\"Col\"\"\"").unwrap().1, "My \"Col\"");
        assert_eq!(identifier("twelve,").unwrap(), (",", "twelve".to_string()));
        assert_eq!(identifier("@@hidden").unwrap().1, "@@hidden");
        assert!(identifier("from").is_err());
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal("'it''s'").unwrap().1, Literal::String("it's".into()));
        assert_eq!(literal("42").unwrap().1, Literal::Integer(42));
        assert_eq!(literal("4.5e3").unwrap().1, Literal::Decimal("4.5e3".into()));
        assert_eq!(literal("NULL").unwrap().1, Literal::Null);
    }

    #[test]
    fn test_decimals_at_end_of_input() {
        assert_eq!(literal("12.75").unwrap(), ("", Literal::Decimal("12.75".into())));
        assert_eq!(literal("0.5").unwrap(), ("", Literal::Decimal("0.5".into())));
        assert_eq!(literal(".5").unwrap(), ("", Literal::Decimal(".5".into())));
        assert_eq!(literal("12.").unwrap(), ("", Literal::Decimal("12.".into())));
        assert_eq!(literal("1e9").unwrap(), ("", Literal::Decimal("1e9".into())));
        assert_eq!(number_literal("2.5)").unwrap(), (")", Literal::Decimal("2.5".into())));
        assert!(number_literal(".").is_err());
        assert!(number_literal("12abc").is_err());
    }
}
