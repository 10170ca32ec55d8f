//! `lksql.toml` configuration.
//!
//! ```toml
//! dialect = "postgres"
//! database_url = "postgres://localhost/labkey"
//! catalog = "catalog.toml"
//! schema = "lists"
//! container_filter = "CurrentAndSubfolders"
//!
//! [limits]
//! max_tables = 200
//! max_depth = 20
//!
//! [environment]
//! user_id = 1001
//! user_name = "dev@example.com"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::ast::FieldKey;
use crate::catalog::{ContainerFilter, MemorySchema};
use crate::dialect::Dialect;
use crate::environment::Environment;
use crate::error::{LkError, LkResult};
use crate::query::{QueryContext, DEFAULT_MAX_DEPTH, DEFAULT_MAX_TABLES};

pub const CONFIG_FILE: &str = "lksql.toml";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Limits {
    pub max_tables: usize,
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tables: DEFAULT_MAX_TABLES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct LksqlConfig {
    pub dialect: Dialect,

    /// Database for `lksql run` and PIVOT value discovery.
    pub database_url: Option<String>,

    /// Catalog file; relative paths are taken from the config file's directory.
    pub catalog: Option<PathBuf>,

    /// Dotted schema path unqualified table names resolve in.
    pub schema: Option<String>,

    pub container_filter: Option<ContainerFilter>,

    pub limits: Limits,

    pub environment: Environment,
}

impl LksqlConfig {
    pub fn from_toml(text: &str) -> LkResult<Self> {
        toml::from_str(text).map_err(|e| LkError::Config(e.to_string()))
    }

    /// Load `path`, or the first of `./lksql.toml` and the user config
    /// directory's `lksql/lksql.toml` that exists. No file is not an error.
    pub fn load(path: Option<&Path>) -> LkResult<Self> {
        let found = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(LkError::Config(format!("{} not found", p.display())));
                }
                Some(p.to_path_buf())
            }
            None => Self::search_path().into_iter().find(|p| p.exists()),
        };
        let Some(file) = found else {
            debug!("no configuration file, using defaults");
            return Ok(Self::default());
        };
        debug!(path = %file.display(), "loading configuration");
        let text = std::fs::read_to_string(&file)?;
        let mut config = Self::from_toml(&text)?;
        if let (Some(catalog), Some(dir)) = (&config.catalog, file.parent()) {
            if catalog.is_relative() {
                config.catalog = Some(dir.join(catalog));
            }
        }
        Ok(config)
    }

    fn search_path() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("lksql").join(CONFIG_FILE));
        }
        paths
    }

    /// The catalog file's schemas, or an empty catalog.
    pub fn load_catalog(&self) -> LkResult<MemorySchema> {
        match &self.catalog {
            Some(path) => MemorySchema::load(path),
            None => Ok(MemorySchema::new("")),
        }
    }

    /// A compile context over `catalog` with every configured setting applied.
    pub fn query_context(&self, catalog: MemorySchema) -> QueryContext {
        let mut ctx = QueryContext::new(Arc::new(catalog), self.dialect)
            .with_environment(self.environment.clone())
            .with_limits(self.limits.max_tables, self.limits.max_depth);
        if let Some(schema) = &self.schema {
            ctx = ctx.with_current_schema(FieldKey::from_dotted(schema));
        }
        if let Some(filter) = self.container_filter {
            ctx = ctx.with_container_filter(filter);
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = LksqlConfig::from_toml("").unwrap();
        assert_eq!(config.dialect, Dialect::Postgres);
        assert_eq!(config.limits, Limits::default());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_full_file() {
        let config = LksqlConfig::from_toml(
            r#"
            dialect = "sqlserver"
            database_url = "sqlite::memory:"
            schema = "lists"
            container_filter = "AllFolders"

            [limits]
            max_depth = 5

            [environment]
            user_id = 7
            user_name = "dev@example.com"

            [environment.container]
            id = "c1"
            name = "lab"
            path = "/home/lab"
            "#,
        )
        .unwrap();
        assert_eq!(config.dialect, Dialect::SqlServer);
        assert_eq!(config.container_filter, Some(ContainerFilter::AllFolders));
        assert_eq!(config.limits.max_depth, 5);
        assert_eq!(config.limits.max_tables, DEFAULT_MAX_TABLES);
        assert_eq!(config.environment.user_id, Some(7));

        let ctx = config.query_context(MemorySchema::new(""));
        assert_eq!(ctx.current_schema, FieldKey::from_name("lists"));
        assert_eq!(ctx.max_depth, 5);
        assert_eq!(ctx.dialect, Dialect::SqlServer);
    }

    #[test]
    fn test_bad_file() {
        let err = LksqlConfig::from_toml("dialect = \"db2\"").unwrap_err();
        assert!(matches!(err, LkError::Config(_)));
    }
}
