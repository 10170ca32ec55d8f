//! LabKey SQL parse tree.
//!
//! Nodes are immutable once parsed. Every node carries a [`Span`] so the
//! binder can report errors at the right source position.

pub mod expr;
pub mod field_key;
pub mod operators;
pub mod query;

pub use expr::*;
pub use field_key::FieldKey;
pub use operators::*;
pub use query::*;

/// Source position of a node, stored as the length of the input remaining
/// when the node started. Resolved to line/column against the source text.
///
/// Spans never take part in equality, so two parse trees compare equal when
/// they have the same shape regardless of where they were written.
#[derive(Debug, Clone, Copy, Default)]
pub struct Span {
    rest: Option<usize>,
}

impl Span {
    pub const NONE: Span = Span { rest: None };

    /// Span of a node starting at `rest`, the unparsed tail of the source.
    pub fn at(rest: &str) -> Self {
        Span {
            rest: Some(rest.len()),
        }
    }

    pub fn is_none(&self) -> bool {
        self.rest.is_none()
    }

    /// 1-based line and 0-based column within `source`; `(0, 0)` when unknown.
    pub fn locate(&self, source: &str) -> (usize, usize) {
        let Some(rest) = self.rest else {
            return (0, 0);
        };
        let offset = source.len().saturating_sub(rest);
        let Some(before) = source.get(..offset) else {
            return (0, 0);
        };
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count(),
            None => before.chars().count(),
        };
        (line, column)
    }
}

impl PartialEq for Span {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_locate() {
        let source = "SELECT a\nFROM R\nWHERE x";
        let span = Span::at(&source[16..]);
        assert_eq!(span.locate(source), (3, 0));
        let span = Span::at(&source[7..]);
        assert_eq!(span.locate(source), (1, 7));
        assert_eq!(Span::NONE.locate(source), (0, 0));
    }
}
