//! Core data models shared by the planner, documenter, and indexer.
//!
//! These types mirror the on-disk JSON formats (plan, progress files,
//! manifest) exactly; all timestamps are ISO-8601 strings via chrono serde
//! and all hashes are lowercase hex SHA-256.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Schema version stamped into plan and manifest files.
pub const SCHEMA_VERSION: &str = "1.0";

// ============ Live catalog metadata ============

/// A single column as reported by a catalog connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// An outgoing foreign key edge on a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
}

/// Full table metadata pulled from a live database session. Owned by the
/// session; only derived hashes outlive the planner run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnMetadata>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyRef>,
    pub indexes: Vec<String>,
    pub row_count_approx: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TableMetadata {
    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// One endpoint of a relationship edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub schema: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    ForeignKey,
    Documented,
    Computed,
}

/// A join edge between two tables. `hop_count == 1` iff the kind is not
/// `computed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: ColumnRef,
    pub target: ColumnRef,
    pub kind: RelationshipKind,
    pub hop_count: u32,
    pub confidence: f64,
    pub join_expression: String,
}

// ============ Plan ============

/// Per-table contract consumed by the documenter. All fields required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub fully_qualified_name: String,
    pub schema: String,
    pub table: String,
    pub domain: String,
    pub priority: u8,
    pub column_count: usize,
    pub row_count_approx: i64,
    pub incoming_fk_count: usize,
    pub outgoing_fk_count: usize,
    pub metadata_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_comment: Option<String>,
}

/// The smallest independently schedulable slice of documentation work: all
/// tables of one domain within one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: String,
    pub database: String,
    pub domain: String,
    pub tables: Vec<TableSpec>,
    pub estimated_minutes: u64,
    pub output_directory: String,
    pub priority_order: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub content_hash: String,
}

impl WorkUnit {
    pub fn expected_id(database: &str, domain: &str) -> String {
        format!("{}_{}", database, domain)
    }

    pub fn expected_output_directory(database: &str, domain: &str) -> String {
        format!("databases/{}/domains/{}", database, domain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Reachable,
    Unreachable,
}

/// Per-database analysis result recorded in the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseAnalysis {
    pub name: String,
    pub status: DatabaseStatus,
    pub table_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
    /// Domain name to table count for this database.
    #[serde(default)]
    pub domains: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AgentError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// Summary counters. The validator rejects plans whose counters do not
/// match the derived quantities exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_databases: usize,
    pub reachable_databases: usize,
    pub total_tables: usize,
    pub total_work_units: usize,
    pub total_estimated_minutes: u64,
    pub recommended_parallelism: usize,
}

/// The planner's output, written to `progress/documentation-plan.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentationPlan {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub config_hash: String,
    pub complexity: Complexity,
    pub databases: Vec<DatabaseAnalysis>,
    pub work_units: Vec<WorkUnit>,
    pub summary: PlanSummary,
    #[serde(default)]
    pub errors: Vec<AgentError>,
}

// ============ Progress ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkUnitStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

/// Rollup status for a whole stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnitProgress {
    pub id: String,
    pub status: WorkUnitStatus,
    pub tables_total: usize,
    pub tables_completed: usize,
    pub tables_failed: usize,
    pub tables_skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_table: Option<String>,
    #[serde(default)]
    pub errors: Vec<AgentError>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkUnitProgress {
    pub fn new(id: &str, tables_total: usize) -> Self {
        Self {
            id: id.to_string(),
            status: WorkUnitStatus::Pending,
            tables_total,
            tables_completed: 0,
            tables_failed: 0,
            tables_skipped: 0,
            current_table: None,
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Global documenter progress, written to
/// `progress/documenter-progress.json` at each checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumenterProgress {
    pub status: RunStatus,
    pub plan_hash: String,
    pub work_units: Vec<WorkUnitProgress>,
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub started_at: DateTime<Utc>,
    pub last_checkpoint: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPhase {
    Validating,
    Parsing,
    Embedding,
    Indexing,
    Relationships,
    Optimizing,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerProgress {
    pub phase: IndexPhase,
    pub manifest_hash: String,
    pub files_total: usize,
    pub files_indexed: usize,
    pub started_at: DateTime<Utc>,
    pub last_checkpoint: DateTime<Utc>,
}

// ============ Manifest ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Table,
    Domain,
    Overview,
    Relationship,
}

/// One indexable artifact listed in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexableFile {
    /// Path relative to the docs root.
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub content_hash: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDatabase {
    pub name: String,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestWorkUnit {
    pub id: String,
    pub status: WorkUnitStatus,
    pub file_count: usize,
    /// SHA-256 over the concatenated content hashes of the unit's files,
    /// sorted by path. 64 zeros for an empty unit.
    pub output_hash: String,
}

/// The documenter's handoff to the indexer, written to
/// `{docs_root}/documentation-manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: String,
    pub completed_at: DateTime<Utc>,
    pub plan_hash: String,
    pub status: ManifestStatus,
    pub databases: Vec<ManifestDatabase>,
    pub work_units: Vec<ManifestWorkUnit>,
    pub total_files: usize,
    pub indexable_files: Vec<IndexableFile>,
}

// ============ Index documents ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Table,
    Column,
    Domain,
    Relationship,
    Overview,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Table => "table",
            DocType::Column => "column",
            DocType::Domain => "domain",
            DocType::Relationship => "relationship",
            DocType::Overview => "overview",
        }
    }
}

/// A logical row in the index's `documents` container. Column documents are
/// synthesized from their parent table document and carry a virtual
/// `file_path` of `{table_path}#{column}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub doc_type: DocType,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub content: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub file_path: String,
    pub content_hash: String,
    pub source_modified_at: DateTime<Utc>,
    /// Path of the parent table document, for column docs only. Resolved to
    /// a surrogate id at insert time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_table_path: Option<String>,
}

impl IndexDocument {
    /// Deterministic identity used to key embeddings to logical documents
    /// independently of file paths.
    pub fn identity(&self) -> String {
        let db = &self.database;
        match self.doc_type {
            DocType::Table => format!(
                "{}.{}.{}",
                db,
                self.schema.as_deref().unwrap_or(""),
                self.table.as_deref().unwrap_or("")
            ),
            DocType::Column => format!(
                "{}.{}.{}.{}",
                db,
                self.schema.as_deref().unwrap_or(""),
                self.table.as_deref().unwrap_or(""),
                self.column.as_deref().unwrap_or("")
            ),
            DocType::Domain => format!("{}.{}", db, self.domain.as_deref().unwrap_or("")),
            DocType::Relationship => format!("{}.{}", db, self.table.as_deref().unwrap_or("")),
            DocType::Overview => format!("{}.overview", db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_unit_id_format() {
        assert_eq!(WorkUnit::expected_id("shop", "orders"), "shop_orders");
        assert_eq!(
            WorkUnit::expected_output_directory("shop", "orders"),
            "databases/shop/domains/orders"
        );
    }

    #[test]
    fn column_type_field_serializes_as_type() {
        let col = ColumnMetadata {
            name: "id".into(),
            data_type: "INTEGER".into(),
            nullable: false,
            default: None,
            comment: None,
        };
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["type"], "INTEGER");
        assert!(json.get("data_type").is_none());
    }

    #[test]
    fn document_identity_per_type() {
        let mut doc = IndexDocument {
            doc_type: DocType::Table,
            database: "demo".into(),
            schema: Some("public".into()),
            table: Some("users".into()),
            column: None,
            domain: None,
            content: String::new(),
            summary: String::new(),
            keywords: vec![],
            file_path: "databases/demo/domains/d/tables/public.users.md".into(),
            content_hash: String::new(),
            source_modified_at: Utc::now(),
            parent_table_path: None,
        };
        assert_eq!(doc.identity(), "demo.public.users");

        doc.doc_type = DocType::Column;
        doc.column = Some("email".into());
        assert_eq!(doc.identity(), "demo.public.users.email");

        doc.doc_type = DocType::Overview;
        assert_eq!(doc.identity(), "demo.overview");
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(WorkUnitStatus::Partial).unwrap(),
            "partial"
        );
        assert_eq!(
            serde_json::to_value(ManifestStatus::Complete).unwrap(),
            "complete"
        );
        assert_eq!(
            serde_json::to_value(RelationshipKind::ForeignKey).unwrap(),
            "foreign_key"
        );
    }
}
