//! Ambient values fixed at compile time.
//!
//! Environment methods (`USERID()`, `FOLDERPATH()`, `ISMEMBEROF(g)`, ...) and
//! container filters read from here. The values are emitted as bind
//! parameters, never inlined into the SQL text.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::ContainerFilter;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    /// Group ids the user belongs to, for `ISMEMBEROF`.
    pub groups: Vec<i64>,
    pub container: Option<Container>,
    /// Ids of every container below the current one.
    pub subfolders: Vec<String>,
    /// Ids of every container above the current one, nearest first.
    pub parents: Vec<String>,
    pub context_path: String,
    pub version: String,
    /// Keyed by `module/property`, case-insensitive.
    pub module_properties: HashMap<String, String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            user_id: None,
            user_name: None,
            groups: Vec::new(),
            container: None,
            subfolders: Vec::new(),
            parents: Vec::new(),
            context_path: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            module_properties: HashMap::new(),
        }
    }
}

impl Environment {
    pub fn with_user(mut self, id: i64, name: &str) -> Self {
        self.user_id = Some(id);
        self.user_name = Some(name.to_string());
        self
    }

    pub fn with_container(mut self, id: &str, path: &str) -> Self {
        let name = path.rsplit('/').find(|p| !p.is_empty()).unwrap_or("");
        self.container = Some(Container {
            id: id.to_string(),
            name: name.to_string(),
            path: path.to_string(),
        });
        self
    }

    pub fn with_module_property(mut self, module: &str, property: &str, value: &str) -> Self {
        self.module_properties
            .insert(property_key(module, property), value.to_string());
        self
    }

    pub fn module_property(&self, module: &str, property: &str) -> Option<&str> {
        self.module_properties
            .get(&property_key(module, property))
            .or_else(|| {
                // keys loaded from config files keep their case
                self.module_properties
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(&property_key(module, property)))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// Container ids a filter admits; `None` means no restriction.
    pub fn container_ids(&self, filter: ContainerFilter) -> Option<Vec<String>> {
        let current = self.container.as_ref()?;
        let mut ids = vec![current.id.clone()];
        match filter {
            ContainerFilter::Current => {}
            ContainerFilter::CurrentAndSubfolders => ids.extend(self.subfolders.iter().cloned()),
            ContainerFilter::CurrentAndParents => ids.extend(self.parents.iter().cloned()),
            ContainerFilter::AllFolders => return None,
        }
        Some(ids)
    }

    /// Version as a number, the way `VERSION()` reports it.
    pub fn numeric_version(&self) -> String {
        let mut parts = self.version.split('.');
        let major = parts.next().unwrap_or("0");
        match parts.next() {
            Some(minor) => format!("{}.{}", major, minor),
            None => major.to_string(),
        }
    }
}

fn property_key(module: &str, property: &str) -> String {
    format!("{}/{}", module, property).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_ids() {
        let mut env = Environment::default().with_container("c1", "/home/lab");
        env.subfolders = vec!["c2".into(), "c3".into()];
        env.parents = vec!["c0".into()];
        assert_eq!(env.container_ids(ContainerFilter::Current), Some(vec!["c1".into()]));
        assert_eq!(
            env.container_ids(ContainerFilter::CurrentAndSubfolders),
            Some(vec!["c1".into(), "c2".into(), "c3".into()])
        );
        assert_eq!(
            env.container_ids(ContainerFilter::CurrentAndParents),
            Some(vec!["c1".into(), "c0".into()])
        );
        assert_eq!(env.container_ids(ContainerFilter::AllFolders), None);
        assert_eq!(env.container.as_ref().unwrap().name, "lab");
    }

    #[test]
    fn test_module_property_lookup() {
        let mut env = Environment::default().with_module_property("Core", "Color", "blue");
        env.module_properties
            .insert("Study/Mode".to_string(), "strict".to_string());
        assert_eq!(env.module_property("core", "color"), Some("blue"));
        assert_eq!(env.module_property("study", "MODE"), Some("strict"));
        assert_eq!(env.module_property("core", "size"), None);
    }

    #[test]
    fn test_numeric_version() {
        let env = Environment {
            version: "24.3.1".to_string(),
            ..Environment::default()
        };
        assert_eq!(env.numeric_version(), "24.3");
    }
}
