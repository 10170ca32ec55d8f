//! Error types for lksql.

use std::fmt;

use thiserror::Error;

/// The main error type for lksql operations.
#[derive(Debug, Error)]
pub enum LkError {
    /// The query failed to compile; carries every collected diagnostic.
    #[error("{0}")]
    Invalid(Diagnostics),

    /// The user may not read one of the tables the query touches.
    #[error("No permission to read table: {0}")]
    Unauthorized(String),

    /// A named parameter has no value and no default.
    #[error("Missing value for parameter: {0}")]
    MissingParameter(String),

    /// Catalog file or catalog service failure outside of a compile.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for lksql operations.
pub type LkResult<T> = Result<T, LkError>;

/// One error or warning produced while compiling a query.
///
/// Lines are 1-based, columns 0-based; both are 0 when the problem has no
/// source position (for example a catalog failure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDiagnostic {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub cause: Option<Box<QueryDiagnostic>>,
    /// Logical name of the query the diagnostic belongs to.
    pub query_name: Option<String>,
    /// SQL text of the query the diagnostic belongs to.
    pub source: Option<String>,
}

impl QueryDiagnostic {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            cause: None,
            query_name: None,
            source: None,
        }
    }

    /// A diagnostic without a source position.
    pub fn general(message: impl Into<String>) -> Self {
        Self::new(message, 0, 0)
    }

    pub fn with_cause(mut self, cause: QueryDiagnostic) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach the query name and SQL text, keeping any decoration already present.
    pub fn decorate(&mut self, query_name: Option<&str>, source: &str) {
        if self.query_name.is_none() {
            self.query_name = query_name.map(str::to_string);
        }
        if self.source.is_none() {
            self.source = Some(source.to_string());
        }
    }

    /// The source line the diagnostic points at, if known.
    pub fn source_line(&self) -> Option<&str> {
        if self.line == 0 {
            return None;
        }
        self.source
            .as_deref()
            .and_then(|s| s.lines().nth(self.line - 1))
    }
}

impl fmt::Display for QueryDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if self.line > 0 {
            write!(f, " (line {}, column {})", self.line, self.column)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// The ordered error and warning lists of one compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub errors: Vec<QueryDiagnostic>,
    pub warnings: Vec<QueryDiagnostic>,
}

impl Diagnostics {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn first_error(&self) -> Option<&QueryDiagnostic> {
        self.errors.first()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "Query has no errors"),
            [only] => write!(f, "{}", only),
            [first, rest @ ..] => write!(f, "{} (and {} more)", first, rest.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let err = QueryDiagnostic::new("Unknown field x", 2, 7);
        assert_eq!(err.to_string(), "Unknown field x (line 2, column 7)");
    }

    #[test]
    fn test_diagnostic_cause_chain() {
        let inner = QueryDiagnostic::new("Unknown field q", 1, 7);
        let outer = QueryDiagnostic::new("Query 'Rquery' has errors", 3, 14).with_cause(inner);
        assert_eq!(
            outer.to_string(),
            "Query 'Rquery' has errors (line 3, column 14): Unknown field q (line 1, column 7)"
        );
    }

    #[test]
    fn test_decorate_keeps_source_line() {
        let mut err = QueryDiagnostic::new("bad", 2, 0);
        err.decorate(Some("q1"), "SELECT a\nFROM nowhere");
        assert_eq!(err.query_name.as_deref(), Some("q1"));
        assert_eq!(err.source_line(), Some("FROM nowhere"));
    }

    #[test]
    fn test_invalid_error_display() {
        let diags = Diagnostics {
            errors: vec![
                QueryDiagnostic::general("first"),
                QueryDiagnostic::general("second"),
            ],
            warnings: vec![],
        };
        assert_eq!(LkError::Invalid(diags).to_string(), "first (and 1 more)");
    }
}
