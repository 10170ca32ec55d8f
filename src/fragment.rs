//! SQL text plus out-of-band bind parameters.
//!
//! Generated SQL never inlines bind values: every `?` in the text has a
//! matching [`SqlParam`], in order. Common table expressions are carried as
//! placeholder tokens until [`SqlFragment::finalize`] hoists them into a
//! single `WITH` prefix.

use serde::Serialize;

use crate::dialect::SqlDialect;
use crate::types::{JdbcType, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlParam {
    /// A value known at compile time (environment methods, special literals).
    Value(Value),
    /// A query parameter filled at execution time.
    Named { name: String, jdbc_type: JdbcType },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CteDefinition {
    pub token: String,
    pub name: String,
    pub recursive: bool,
    pub body: SqlFragment,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    sql: String,
    params: Vec<SqlParam>,
    ctes: Vec<CteDefinition>,
}

impl SqlFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sql(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn ctes(&self) -> &[CteDefinition] {
        &self.ctes
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    pub fn append(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append another fragment's text, parameters and CTEs.
    pub fn append_fragment(&mut self, other: &SqlFragment) -> &mut Self {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params.iter().cloned());
        for cte in &other.ctes {
            self.add_cte(cte.clone());
        }
        self
    }

    /// Append a `?` placeholder bound to `param`.
    pub fn append_param(&mut self, param: SqlParam) -> &mut Self {
        self.sql.push('?');
        self.params.push(param);
        self
    }

    pub fn append_value(&mut self, value: Value) -> &mut Self {
        self.append_param(SqlParam::Value(value))
    }

    /// Register a CTE; a token already present is kept once.
    pub fn add_cte(&mut self, cte: CteDefinition) {
        if !self.ctes.iter().any(|c| c.token == cte.token) {
            self.ctes.push(cte);
        }
    }

    /// Surround the text, keeping parameters in place.
    pub fn wrap(mut self, prefix: &str, suffix: &str) -> SqlFragment {
        self.sql.insert_str(0, prefix);
        self.sql.push_str(suffix);
        self
    }

    pub fn has_named_params(&self) -> bool {
        self.params
            .iter()
            .chain(self.ctes.iter().flat_map(|c| c.body.params.iter()))
            .any(|p| matches!(p, SqlParam::Named { .. }))
    }

    fn collect_ctes(&self, out: &mut Vec<CteDefinition>) {
        for cte in &self.ctes {
            if out.iter().any(|c| c.token == cte.token) {
                continue;
            }
            cte.body.collect_ctes(out);
            if !out.iter().any(|c| c.token == cte.token) {
                out.push(cte.clone());
            }
        }
    }

    /// Hoist every CTE into one `WITH` prefix and substitute the tokens.
    ///
    /// The result has no pending CTEs; CTE parameters come first.
    pub fn finalize(&self, dialect: &dyn SqlDialect) -> SqlFragment {
        let mut ctes = Vec::new();
        self.collect_ctes(&mut ctes);
        if ctes.is_empty() {
            return SqlFragment {
                sql: self.sql.clone(),
                params: self.params.clone(),
                ctes: vec![],
            };
        }

        let substitute = |text: &str| -> String {
            let mut text = text.to_string();
            for cte in &ctes {
                text = text.replace(&cte.token, &dialect.quote_identifier(&cte.name));
            }
            text
        };

        let recursive = ctes.iter().any(|c| c.recursive);
        let mut out = SqlFragment::new();
        out.append("WITH ");
        if recursive {
            out.append(dialect.recursive_keyword());
        }
        for (i, cte) in ctes.iter().enumerate() {
            if i > 0 {
                out.append(",\n");
            }
            out.append(&dialect.quote_identifier(&cte.name));
            out.append(" AS (");
            out.append(&substitute(&cte.body.sql));
            out.append(")");
            out.params.extend(cte.body.params.iter().cloned());
        }
        out.append("\n");
        out.append(&substitute(&self.sql));
        out.params.extend(self.params.iter().cloned());
        out
    }

    /// The SQL text with `?` rewritten to the dialect's placeholder syntax.
    /// Quoted strings, quoted identifiers and comments are left untouched.
    pub fn render(&self, dialect: &dyn SqlDialect) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut chars = self.sql.chars().peekable();
        let mut index = 0;
        while let Some(c) = chars.next() {
            match c {
                '\'' | '"' => {
                    out.push(c);
                    for inner in chars.by_ref() {
                        out.push(inner);
                        if inner == c {
                            break;
                        }
                    }
                }
                '-' if chars.peek() == Some(&'-') => {
                    out.push(c);
                    for inner in chars.by_ref() {
                        out.push(inner);
                        if inner == '\n' {
                            break;
                        }
                    }
                }
                '/' if chars.peek() == Some(&'*') => {
                    out.push(c);
                    let mut prev = ' ';
                    for inner in chars.by_ref() {
                        out.push(inner);
                        if prev == '*' && inner == '/' {
                            break;
                        }
                        prev = inner;
                    }
                }
                '?' => {
                    index += 1;
                    out.push_str(&dialect.placeholder(index));
                }
                _ => out.push(c),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_append_keeps_param_order() {
        let mut a = SqlFragment::from_sql("x = ");
        a.append_value(Value::Int(1));
        let mut b = SqlFragment::from_sql(" AND y = ");
        b.append_value(Value::String("q".into()));
        a.append_fragment(&b);
        assert_eq!(a.sql(), "x = ? AND y = ?");
        assert_eq!(
            a.params(),
            &[
                SqlParam::Value(Value::Int(1)),
                SqlParam::Value(Value::String("q".into()))
            ]
        );
    }

    #[test]
    fn test_render_skips_quoted_text() {
        let frag = SqlFragment::from_sql("SELECT '?', \"a?\" FROM t WHERE a = ? -- ?\n AND b = ?");
        let pg = Dialect::Postgres.generator();
        assert_eq!(
            frag.render(pg.as_ref()),
            "SELECT '?', \"a?\" FROM t WHERE a = $1 -- ?\n AND b = $2"
        );
    }

    #[test]
    fn test_finalize_hoists_ctes() {
        let mut body = SqlFragment::from_sql("SELECT d FROM r WHERE c = ");
        body.append_value(Value::Int(7));
        let mut main = SqlFragment::from_sql("SELECT * FROM /*$cte:1$*/ q WHERE z = ");
        main.append_value(Value::Int(8));
        main.add_cte(CteDefinition {
            token: "/*$cte:1$*/".into(),
            name: "q".into(),
            recursive: false,
            body,
        });
        let pg = Dialect::Postgres.generator();
        let done = main.finalize(pg.as_ref());
        assert_eq!(
            done.sql(),
            "WITH q AS (SELECT d FROM r WHERE c = ?)\nSELECT * FROM q q WHERE z = ?"
        );
        assert_eq!(
            done.params(),
            &[SqlParam::Value(Value::Int(7)), SqlParam::Value(Value::Int(8))]
        );
        assert!(done.ctes().is_empty());
    }
}
