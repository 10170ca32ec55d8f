use std::fmt;
use std::hash::{Hash, Hasher};

/// A dotted, order-preserving path naming a column or table, possibly
/// through one or more lookups. Comparison ignores ASCII case.
#[derive(Debug, Clone, Default)]
pub struct FieldKey {
    parts: Vec<String>,
}

impl FieldKey {
    pub fn new(parts: Vec<String>) -> Self {
        Self { parts }
    }

    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            parts: vec![name.into()],
        }
    }

    /// Split on dots. Only for trusted names (catalog paths, CLI input).
    pub fn from_dotted(path: &str) -> Self {
        Self {
            parts: path
                .split('.')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The last part.
    pub fn name(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or("")
    }

    pub fn parent(&self) -> Option<FieldKey> {
        if self.parts.len() < 2 {
            return None;
        }
        Some(FieldKey::new(self.parts[..self.parts.len() - 1].to_vec()))
    }

    pub fn child(&self, name: impl Into<String>) -> FieldKey {
        let mut parts = self.parts.clone();
        parts.push(name.into());
        FieldKey::new(parts)
    }

    /// The first `n` parts.
    pub fn prefix(&self, n: usize) -> FieldKey {
        FieldKey::new(self.parts[..n.min(self.parts.len())].to_vec())
    }

    /// Lowercased `/`-joined form used as a map key.
    pub fn cache_key(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.to_lowercase())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn starts_with(&self, prefix: &FieldKey) -> bool {
        prefix.parts.len() <= self.parts.len()
            && prefix
                .parts
                .iter()
                .zip(&self.parts)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl PartialEq for FieldKey {
    fn eq(&self, other: &Self) -> bool {
        self.parts.len() == other.parts.len()
            && self
                .parts
                .iter()
                .zip(&other.parts)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for FieldKey {}

impl Hash for FieldKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for part in &self.parts {
            part.to_ascii_lowercase().hash(state);
        }
        self.parts.len().hash(state);
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parts.join("."))
    }
}
