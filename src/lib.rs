//! # lksql: a LabKey SQL compiler
//!
//! lksql binds portable LabKey SQL against a catalog of schemas, tables and
//! saved queries, and generates SQL for a target database.
//!
//! ## Quick Example
//!
//! ```rust
//! use std::sync::Arc;
//! use lksql::prelude::*;
//!
//! let lists = MemorySchema::new("lists").with_table(
//!     TableDescriptor::new("R", "")
//!         .column(ColumnDescriptor::new("d", JdbcType::Integer))
//!         .column(ColumnDescriptor::new("seven", JdbcType::Integer)),
//! );
//! let ctx = QueryContext::new(Arc::new(MemorySchema::new("").with_schema(lists)), Dialect::Postgres)
//!     .with_current_schema(FieldKey::from_name("lists"));
//!
//! let compiled = lksql::compile(ctx, "SELECT d FROM R WHERE seven > 3").unwrap();
//! assert!(compiled.sql().contains("FROM lists.r"));
//! ```
//!
//! ## Pipeline
//!
//! | Stage    | Module       | Output                                 |
//! |----------|--------------|----------------------------------------|
//! | Parse    | [`parser`]   | [`ast::Statement`]                     |
//! | Build    | [`relation`] | relation tree, tables resolved         |
//! | Declare  | [`relation`] | columns of every relation              |
//! | Resolve  | [`relation`] | bound expressions, column references   |
//! | Generate | [`query`]    | [`query::CompiledQuery`]               |

pub mod ast;
pub mod catalog;
pub mod config;
pub mod dialect;
pub mod engine;
pub mod environment;
pub mod error;
pub mod fragment;
pub mod method;
pub mod parser;
pub mod query;
pub mod relation;
pub mod types;

pub mod prelude {
    pub use crate::ast::FieldKey;
    pub use crate::catalog::{
        CatalogEntry, ColumnDescriptor, ColumnOverride, ContainerFilter, ForeignKey,
        MemorySchema, NamedQuery, PhiLevel, Schema, TableDescriptor,
    };
    pub use crate::config::LksqlConfig;
    pub use crate::dialect::Dialect;
    pub use crate::engine::{LkDb, SqlxValueSource};
    pub use crate::environment::Environment;
    pub use crate::error::{Diagnostics, LkError, LkResult, QueryDiagnostic};
    pub use crate::fragment::{SqlFragment, SqlParam};
    pub use crate::method::MethodRegistry;
    pub use crate::query::{CompiledQuery, OutputColumn, Query, QueryContext, QueryParameter};
    pub use crate::relation::{PivotSourceError, PivotValueSource};
    pub use crate::types::{JdbcType, Value};
}

pub use query::compile;
