use std::collections::HashSet;

/// Hands out table aliases that are unique across one compilation.
///
/// Comparison ignores case so the same alias never appears twice on a
/// case-insensitive backend.
#[derive(Debug, Default)]
pub struct AliasManager {
    used: HashSet<String>,
}

impl AliasManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark names that generated SQL uses on its own (`base`, `_t`, ...).
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_lowercase());
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(&name.to_lowercase())
    }

    /// `base`, else `base_1`, `base_2`, ...
    pub fn unique(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 1;
        while self.is_used(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.reserve(&candidate);
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_aliases() {
        let mut aliases = AliasManager::new();
        aliases.reserve("base");
        assert_eq!(aliases.unique("R"), "R");
        assert_eq!(aliases.unique("r"), "r_1");
        assert_eq!(aliases.unique("BASE"), "BASE_1");
        assert_eq!(aliases.unique("R"), "R_2");
    }
}
