//! Catalog connector abstraction.
//!
//! A [`CatalogConnector`] is a database driver plug-in: it owns one session
//! against a configured database and exposes schema enumeration, metadata
//! extraction, relationship discovery, and ad-hoc reads for sampling.
//! Normalization of engine-specific shapes happens inside the driver; the
//! rest of the pipeline only ever sees [`TableMetadata`] and [`QueryRows`].
//!
//! Drivers that cannot provide a capability (e.g. relationships) return an
//! empty list with a warning instead of erroring.

use anyhow::Result;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::DatabaseConfig;
use crate::connector_sqlite::SqliteCatalog;
use crate::error::{AgentError, AgentResult, ErrorCode};
use crate::models::{Relationship, TableMetadata};

/// Ad-hoc query result: ordered column names plus rows of JSON-typed cells.
/// This is the narrow row abstraction the sampler consumes; nothing else in
/// the pipeline touches raw driver rows.
#[derive(Debug, Clone, Default)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Table enumeration filters, resolved from [`DatabaseConfig`].
#[derive(Debug, Clone)]
pub struct TableFilter {
    schemas_include: Option<Vec<String>>,
    schemas_exclude: Vec<String>,
    tables_exclude: GlobSet,
    pub include_system_tables: bool,
}

impl TableFilter {
    pub fn from_config(db: &DatabaseConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &db.tables_exclude {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            schemas_include: db.schemas_include.clone(),
            schemas_exclude: db.schemas_exclude.clone(),
            tables_exclude: builder.build()?,
            include_system_tables: db.include_system_tables,
        })
    }

    /// Whether a table survives the configured filters. `system_schemas`
    /// lists the engine's internal schemas, elided unless explicitly
    /// included.
    pub fn admits(&self, schema: &str, table: &str, system_schemas: &[&str]) -> bool {
        if !self.include_system_tables && system_schemas.contains(&schema) {
            return false;
        }
        if let Some(include) = &self.schemas_include {
            if !include.iter().any(|s| s == schema) {
                return false;
            }
        }
        if self.schemas_exclude.iter().any(|s| s == schema) {
            return false;
        }
        !self.tables_exclude.is_match(table)
    }
}

/// A live database session. One connector instance serves one work unit (or
/// one planner analysis pass); sessions are never shared across unit workers.
#[async_trait]
pub trait CatalogConnector: Send + Sync {
    /// Engine identifier (e.g. `"sqlite"`).
    fn engine(&self) -> &str;

    /// Database name from the catalog entry.
    fn database_name(&self) -> &str;

    /// Open the session. Classified as `DOC_DB_CONNECTION_LOST` on failure.
    async fn connect(&mut self) -> AgentResult<()>;

    async fn disconnect(&mut self);

    /// Enumerate tables with full metadata, honoring the filter. Engine
    /// internal schemas are elided unless the filter says otherwise.
    async fn list_tables(&self, filter: &TableFilter) -> AgentResult<Vec<TableMetadata>>;

    /// Metadata for one table: ordered columns, primary key, outgoing
    /// foreign keys, indexes.
    async fn get_table_metadata(&self, schema: &str, table: &str) -> AgentResult<TableMetadata>;

    /// All FK edges visible from the session for the given tables, both
    /// outgoing and incoming. Engines without FK introspection return an
    /// empty list (the caller logs the warning).
    async fn get_relationships(&self, tables: &[TableMetadata]) -> AgentResult<Vec<Relationship>>;

    /// Ad-hoc read used only for sampling. `max_rows` caps the result.
    async fn query(&self, sql: &str, max_rows: usize) -> AgentResult<QueryRows>;
}

/// Instantiate the driver for a catalog entry. Unknown engines are a
/// configuration error, not a connection error.
pub fn create_connector(db: &DatabaseConfig) -> AgentResult<Box<dyn CatalogConnector>> {
    match db.engine.as_str() {
        "sqlite" => Ok(Box::new(SqliteCatalog::new(db.clone()))),
        other => Err(AgentError::new(
            ErrorCode::DocPlanInvalid,
            format!("Unsupported engine '{}' for database '{}' (supported: sqlite)", other, db.name),
        )
        .with_context(serde_json::json!({"database": db.name, "engine": other}))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionRef, TimeoutConfig};

    fn db_config(tables_exclude: Vec<&str>) -> DatabaseConfig {
        DatabaseConfig {
            name: "demo".into(),
            engine: "sqlite".into(),
            connection: ConnectionRef::Path {
                path: "./demo.sqlite".into(),
            },
            schemas_include: None,
            schemas_exclude: vec![],
            tables_exclude: tables_exclude.into_iter().map(String::from).collect(),
            include_system_tables: false,
            timeouts: TimeoutConfig::default(),
        }
    }

    #[test]
    fn filter_elides_system_schemas_by_default() {
        let filter = TableFilter::from_config(&db_config(vec![])).unwrap();
        assert!(!filter.admits("information_schema", "tables", &["information_schema"]));
        assert!(filter.admits("main", "users", &["information_schema"]));
    }

    #[test]
    fn filter_applies_table_globs() {
        let filter = TableFilter::from_config(&db_config(vec!["tmp_*", "_migrations"])).unwrap();
        assert!(!filter.admits("main", "tmp_scratch", &[]));
        assert!(!filter.admits("main", "_migrations", &[]));
        assert!(filter.admits("main", "orders", &[]));
    }

    #[test]
    fn filter_schema_include_wins_over_default() {
        let mut cfg = db_config(vec![]);
        cfg.schemas_include = Some(vec!["sales".into()]);
        let filter = TableFilter::from_config(&cfg).unwrap();
        assert!(filter.admits("sales", "orders", &[]));
        assert!(!filter.admits("main", "orders", &[]));
    }

    #[test]
    fn unknown_engine_is_config_error() {
        let mut cfg = db_config(vec![]);
        cfg.engine = "oracle".into();
        let err = create_connector(&cfg).err().unwrap();
        assert_eq!(err.code, ErrorCode::DocPlanInvalid);
    }
}
