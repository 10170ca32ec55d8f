//! Catalog interface: schemas, tables, named queries.
//!
//! The compiler only ever asks a [`Schema`] for child schemas and for a
//! table or named query by name. [`MemorySchema`] is the in-process
//! implementation used by tests and by the CLI, loaded from a TOML file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{LkError, LkResult};
use crate::types::JdbcType;

/// Failure reported by a catalog service while resolving a name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("No permission to read table: {0}")]
    Unauthorized(String),

    #[error("Schema '{schema}' is unavailable: {reason}")]
    Unavailable { schema: String, reason: String },
}

/// Row-scoping policy applied to every table that has a container column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerFilter {
    #[default]
    Current,
    CurrentAndSubfolders,
    CurrentAndParents,
    AllFolders,
}

impl ContainerFilter {
    pub fn name(self) -> &'static str {
        match self {
            ContainerFilter::Current => "Current",
            ContainerFilter::CurrentAndSubfolders => "CurrentAndSubfolders",
            ContainerFilter::CurrentAndParents => "CurrentAndParents",
            ContainerFilter::AllFolders => "AllFolders",
        }
    }
}

impl fmt::Display for ContainerFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ContainerFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        [
            ContainerFilter::Current,
            ContainerFilter::CurrentAndSubfolders,
            ContainerFilter::CurrentAndParents,
            ContainerFilter::AllFolders,
        ]
        .into_iter()
        .find(|cf| cf.name().to_ascii_lowercase() == lower)
        .ok_or_else(|| format!("Unknown container filter: {}", s))
    }
}

/// Sensitivity of a column. Ordered from least to most restricted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PhiLevel {
    #[default]
    NotPhi,
    Limited,
    Phi,
    Restricted,
}

impl fmt::Display for PhiLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhiLevel::NotPhi => "NotPHI",
            PhiLevel::Limited => "Limited",
            PhiLevel::Phi => "PHI",
            PhiLevel::Restricted => "Restricted",
        };
        f.write_str(s)
    }
}

/// Target of a lookup column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Dotted schema path of the target table.
    pub schema: String,
    pub table: String,
    /// Key column in the target; the target's primary key when absent.
    #[serde(default)]
    pub column: Option<String>,
}

impl ForeignKey {
    pub fn new(schema: &str, table: &str, column: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            column: Some(column.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub jdbc_type: JdbcType,
    /// Physical column name when it differs from `name`.
    #[serde(default)]
    pub physical: Option<String>,
    #[serde(default)]
    pub fk: Option<ForeignKey>,
    #[serde(default)]
    pub phi: PhiLevel,
    #[serde(default)]
    pub hidden: bool,
}

impl ColumnDescriptor {
    pub fn new(name: &str, jdbc_type: JdbcType) -> Self {
        Self {
            name: name.to_string(),
            jdbc_type,
            physical: None,
            fk: None,
            phi: PhiLevel::NotPhi,
            hidden: false,
        }
    }

    pub fn fk(mut self, fk: ForeignKey) -> Self {
        self.fk = Some(fk);
        self
    }

    pub fn phi(mut self, phi: PhiLevel) -> Self {
        self.phi = phi;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn physical_name(&self) -> &str {
        self.physical.as_deref().unwrap_or(&self.name)
    }
}

/// A physical table as the catalog describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    /// Schema-qualified physical name, e.g. `lists.r`.
    #[serde(default)]
    pub physical: String,
    #[serde(default, rename = "column")]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Column holding the owning container id, if the table is container-scoped.
    #[serde(default)]
    pub container_column: Option<String>,
}

impl TableDescriptor {
    pub fn new(name: &str, physical: &str) -> Self {
        Self {
            name: name.to_string(),
            physical: physical.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            container_column: None,
        }
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    pub fn key(mut self, names: &[&str]) -> Self {
        self.primary_key = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn container_column(mut self, name: &str) -> Self {
        self.container_column = Some(name.to_string());
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k.eq_ignore_ascii_case(name))
    }
}

/// Per-column metadata layered over a named query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnOverride {
    pub name: String,
    #[serde(default)]
    pub fk: Option<ForeignKey>,
    #[serde(default)]
    pub hidden: bool,
}

/// A saved LabKey SQL query, addressable like a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedQuery {
    pub name: String,
    pub sql: String,
    #[serde(default, rename = "column")]
    pub metadata: Vec<ColumnOverride>,
}

impl NamedQuery {
    pub fn new(name: &str, sql: &str) -> Self {
        Self {
            name: name.to_string(),
            sql: sql.to_string(),
            metadata: Vec::new(),
        }
    }

    pub fn with_override(mut self, column: ColumnOverride) -> Self {
        self.metadata.push(column);
        self
    }

    pub fn has_metadata(&self) -> bool {
        !self.metadata.is_empty()
    }

    pub fn override_for(&self, column: &str) -> Option<&ColumnOverride> {
        self.metadata
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(column))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEntry {
    Table(Arc<TableDescriptor>),
    Query(Arc<NamedQuery>),
}

impl CatalogEntry {
    pub fn name(&self) -> &str {
        match self {
            CatalogEntry::Table(t) => &t.name,
            CatalogEntry::Query(q) => &q.name,
        }
    }
}

/// The catalog service consumed by the compiler.
pub trait Schema: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// A child schema.
    fn schema(&self, name: &str) -> Option<&dyn Schema>;

    /// A table or named query in this schema.
    fn table(&self, name: &str) -> Result<Option<CatalogEntry>, CatalogError>;

    fn schema_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn table_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// In-memory schema tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemorySchema {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "schema")]
    schemas: Vec<MemorySchema>,
    #[serde(default, rename = "table")]
    tables: Vec<TableDescriptor>,
    #[serde(default, rename = "query")]
    queries: Vec<NamedQuery>,
    /// Tables the current user may not read.
    #[serde(default)]
    denied: Vec<String>,
    /// When set, every table lookup fails with this reason.
    #[serde(default)]
    unavailable: Option<String>,
}

impl MemorySchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema: MemorySchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn with_table(mut self, mut table: TableDescriptor) -> Self {
        if table.physical.is_empty() {
            table.physical = format!("{}.{}", self.name, table.name).to_lowercase();
        }
        self.tables.push(table);
        self
    }

    pub fn with_query(mut self, query: NamedQuery) -> Self {
        self.queries.push(query);
        self
    }

    pub fn deny(mut self, table: &str) -> Self {
        self.denied.push(table.to_string());
        self
    }

    pub fn unavailable(mut self, reason: &str) -> Self {
        self.unavailable = Some(reason.to_string());
        self
    }

    /// Parse a catalog file. The document's top-level `[[schema]]` entries
    /// become children of an unnamed root.
    pub fn from_toml(text: &str) -> LkResult<MemorySchema> {
        let mut root: MemorySchema =
            toml::from_str(text).map_err(|e| LkError::Catalog(e.to_string()))?;
        root.name.clear();
        root.fill_physical_names("");
        Ok(root)
    }

    pub fn load(path: &Path) -> LkResult<MemorySchema> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    fn fill_physical_names(&mut self, prefix: &str) {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", prefix, self.name)
        };
        for table in &mut self.tables {
            if table.physical.is_empty() {
                table.physical = format!("{}.{}", path, table.name).to_lowercase();
            }
        }
        for child in &mut self.schemas {
            child.fill_physical_names(&path);
        }
    }
}

impl Schema for MemorySchema {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self, name: &str) -> Option<&dyn Schema> {
        self.schemas
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s as &dyn Schema)
    }

    fn table(&self, name: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        if let Some(reason) = &self.unavailable {
            return Err(CatalogError::Unavailable {
                schema: self.name.clone(),
                reason: reason.clone(),
            });
        }
        if self.denied.iter().any(|d| d.eq_ignore_ascii_case(name)) {
            return Err(CatalogError::Unauthorized(format!("{}.{}", self.name, name)));
        }
        if let Some(t) = self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name)) {
            return Ok(Some(CatalogEntry::Table(Arc::new(t.clone()))));
        }
        Ok(self
            .queries
            .iter()
            .find(|q| q.name.eq_ignore_ascii_case(name))
            .map(|q| CatalogEntry::Query(Arc::new(q.clone()))))
    }

    fn schema_names(&self) -> Vec<String> {
        self.schemas.iter().map(|s| s.name.clone()).collect()
    }

    fn table_names(&self) -> Vec<String> {
        self.tables
            .iter()
            .map(|t| t.name.clone())
            .chain(self.queries.iter().map(|q| q.name.clone()))
            .collect()
    }
}
