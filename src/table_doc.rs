//! Per-table documentation: extract → sample → infer → emit.
//!
//! Two sub-agents enforce context quarantine: the [`ColumnInferencer`]
//! returns only a description string per column, and the [`TableDocumenter`]
//! returns only a [`TableSummary`]. Raw sample data may be persisted inside
//! the JSON artifact (bounded to 5 rows) but never travels upward in a
//! return value; the invariant is asserted at runtime before the summary is
//! handed back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::catalog::{CatalogConnector, QueryRows};
use crate::config::DocumenterConfig;
use crate::error::{AgentError, ErrorCode};
use crate::fsio::{artifact_file_name, atomic_write_with_retry};
use crate::llm::{Completion, LlmClient, TokenUsage};
use crate::models::{ColumnMetadata, TableMetadata, TableSpec};
use crate::prompts;

/// Maximum rows persisted into the JSON artifact.
const SAMPLE_ROWS_PERSISTED: usize = 5;

/// Field-wise cap on sampled scalar strings.
const SAMPLE_VALUE_MAX_CHARS: usize = 100;

/// Sampled rows after field-wise truncation. Never crosses the sub-agent
/// boundary in a return value.
#[derive(Debug, Clone, Default)]
pub struct SampleData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl SampleData {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values observed for one column, as display strings.
    fn column_values(&self, column: &str) -> Vec<String> {
        let Some(idx) = self.columns.iter().position(|c| c == column) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(idx))
            .filter(|v| !v.is_null())
            .map(display_value)
            .collect()
    }

    /// First rows as JSON objects for artifact persistence.
    fn json_rows(&self, limit: usize) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                let map: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                serde_json::Value::Object(map)
            })
            .collect()
    }
}

/// What the table sub-agent is allowed to return upward: derived fields only.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TableSummary {
    pub schema: String,
    pub table: String,
    pub description: String,
    pub column_count: usize,
    pub output_files: Vec<String>,
}

/// Outcome of one table, rolled up by the work-unit processor.
#[derive(Debug)]
pub struct TableOutcome {
    pub table: String,
    pub succeeded: bool,
    pub skipped: bool,
    pub connection_lost: bool,
    pub errors: Vec<AgentError>,
    pub tokens: TokenUsage,
}

impl TableOutcome {
    fn failed(table: &str, err: AgentError) -> Self {
        Self {
            table: table.to_string(),
            succeeded: false,
            skipped: false,
            connection_lost: err.code == ErrorCode::DocDbConnectionLost,
            errors: vec![err],
            tokens: TokenUsage::default(),
        }
    }
}

pub struct TableContext<'a> {
    pub config: &'a DocumenterConfig,
    pub llm: &'a LlmClient,
    pub connector: &'a dyn CatalogConnector,
    pub database: &'a str,
    pub spec: &'a TableSpec,
    /// `{docs_root}/{output_directory}/tables`
    pub tables_dir: &'a Path,
}

/// Both artifact paths for a table spec.
pub fn artifact_paths(tables_dir: &Path, spec: &TableSpec) -> (PathBuf, PathBuf) {
    (
        tables_dir.join(artifact_file_name(&spec.schema, &spec.table, "md")),
        tables_dir.join(artifact_file_name(&spec.schema, &spec.table, "json")),
    )
}

/// Process one table through the three phases. Never panics on external
/// failures; everything lands in the outcome.
pub async fn process_table(ctx: &TableContext<'_>) -> TableOutcome {
    let fqn = &ctx.spec.fully_qualified_name;

    // Idempotent replay: both artifacts already present counts as success.
    let (md_path, json_path) = artifact_paths(ctx.tables_dir, ctx.spec);
    if md_path.is_file() && json_path.is_file() {
        debug!(table = %fqn, "artifacts already exist, skipping");
        return TableOutcome {
            table: fqn.clone(),
            succeeded: true,
            skipped: true,
            connection_lost: false,
            errors: Vec::new(),
            tokens: TokenUsage::default(),
        };
    }

    // Phase A: extract.
    let meta = match ctx
        .connector
        .get_table_metadata(&ctx.spec.schema, &ctx.spec.table)
        .await
    {
        Ok(meta) => meta,
        Err(e) => {
            let err = if e.code == ErrorCode::DocDbConnectionLost {
                e
            } else {
                AgentError::new(
                    ErrorCode::DocTableExtractionFailed,
                    format!("Metadata extraction failed for {}: {}", fqn, e.message),
                )
            };
            warn!(table = %fqn, err = %err, "table extraction failed");
            return TableOutcome::failed(fqn, err);
        }
    };

    // Phase B: sample (warnings only; the table continues with an empty
    // sample either way).
    let mut errors = Vec::new();
    let sample = match sample_table(ctx, &meta).await {
        Ok(sample) => sample,
        Err(e) => {
            warn!(table = %fqn, err = %e, "sampling unavailable");
            errors.push(e);
            SampleData::default()
        }
    };

    // Phase C: infer and emit.
    let documenter = TableDocumenter {
        llm: ctx.llm,
        config: ctx.config,
        database: ctx.database,
    };
    let (summary, tokens, mut write_errors) =
        documenter.document_table(&meta, &sample, ctx.tables_dir).await;
    errors.append(&mut write_errors);

    let succeeded = !summary.output_files.is_empty();
    if !succeeded {
        errors.push(AgentError::new(
            ErrorCode::DocFileWriteFailed,
            format!("No artifact could be written for {}", fqn),
        ));
    }

    TableOutcome {
        table: fqn.clone(),
        succeeded,
        skipped: false,
        connection_lost: false,
        errors,
        tokens,
    }
}

/// Run the sampling query under the hard deadline. Timeouts and failures
/// are warnings; the caller continues with an empty sample.
async fn sample_table(ctx: &TableContext<'_>, meta: &TableMetadata) -> Result<SampleData, AgentError> {
    let sql = format!(
        "SELECT * FROM \"{}\".\"{}\" LIMIT {}",
        meta.schema.replace('"', "\"\""),
        meta.table.replace('"', "\"\""),
        ctx.config.sample_rows
    );

    let deadline = Duration::from_millis(ctx.config.sample_timeout_ms);
    let rows: QueryRows =
        match tokio::time::timeout(deadline, ctx.connector.query(&sql, ctx.config.sample_rows)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                return Err(AgentError::new(
                    ErrorCode::DocSamplingFailed,
                    format!("Sampling failed for {}: {}", meta.fully_qualified_name(), e.message),
                ))
            }
            Err(_) => {
                return Err(AgentError::new(
                    ErrorCode::DocSamplingTimeout,
                    format!(
                        "Sampling for {} exceeded {} ms",
                        meta.fully_qualified_name(),
                        ctx.config.sample_timeout_ms
                    ),
                ))
            }
        };

    Ok(SampleData {
        columns: rows.columns,
        rows: rows
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(truncate_sample_value).collect())
            .collect(),
    })
}

/// Field-wise truncation: scalars whose string form exceeds 100 chars are
/// cut to 97 chars plus `...`.
pub fn truncate_sample_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            if s.chars().count() > SAMPLE_VALUE_MAX_CHARS {
                let head: String = s.chars().take(SAMPLE_VALUE_MAX_CHARS - 3).collect();
                serde_json::Value::String(format!("{}...", head))
            } else {
                serde_json::Value::String(s)
            }
        }
        other => other,
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Deterministic metadata-only description used whenever the LLM response is
/// unusable.
pub fn fallback_column_description(column: &ColumnMetadata) -> String {
    format!("Column {} of type {}.", column.name, column.data_type)
}

pub fn fallback_table_description(meta: &TableMetadata) -> String {
    format!(
        "Table {} with {} columns.",
        meta.fully_qualified_name(),
        meta.columns.len()
    )
}

/// Normalize an LLM description: trim, terminal punctuation, at most two
/// sentences beyond 500 chars, deterministic fallback below 10 chars.
pub fn validate_description(raw: &str, fallback: &str) -> String {
    let mut text = raw.trim().to_string();
    if !text.ends_with(['.', '!', '?']) {
        text.push('.');
    }
    if text.chars().count() > 500 {
        text = first_sentences(&text, 2);
    }
    if text.chars().count() < 10 {
        return fallback.to_string();
    }
    text
}

fn first_sentences(text: &str, count: usize) -> String {
    let mut out = String::new();
    let mut taken = 0;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if matches!(c, '.' | '!' | '?') {
            let boundary = chars.peek().map(|n| n.is_whitespace()).unwrap_or(true);
            if boundary {
                taken += 1;
                if taken >= count {
                    break;
                }
            }
        }
    }
    out.trim().to_string()
}

// ============ ColumnInferencer ============

/// Sub-agent that produces exactly one description string per column.
pub struct ColumnInferencer<'a> {
    pub llm: &'a LlmClient,
    pub database: &'a str,
}

impl ColumnInferencer<'_> {
    /// Infer a description for one column. Errors degrade to the
    /// deterministic fallback; nothing else escapes.
    pub async fn infer_column(
        &self,
        meta: &TableMetadata,
        column: &ColumnMetadata,
        sample_values: &[String],
    ) -> (String, TokenUsage) {
        let fallback = fallback_column_description(column);

        let template = match prompts::get_template(prompts::COLUMN_DESCRIPTION) {
            Ok(t) => t,
            Err(e) => {
                warn!(err = %e, "column prompt template missing");
                return (fallback, TokenUsage::default());
            }
        };
        let prompt = prompts::render(
            template,
            &[
                ("database", self.database.to_string()),
                ("schema", meta.schema.clone()),
                ("table", meta.table.clone()),
                ("column", column.name.clone()),
                ("data_type", column.data_type.clone()),
                ("nullable", column.nullable.to_string()),
                ("default", column.default.clone().unwrap_or_else(|| "none".into())),
                (
                    "existing_comment",
                    column.comment.clone().unwrap_or_else(|| "none".into()),
                ),
                ("sample_values", format_samples(sample_values)),
            ],
        );

        match self.llm.complete(&prompt).await {
            Ok(Completion { content, tokens, .. }) => {
                (validate_description(&content, &fallback), tokens)
            }
            Err(e) => {
                debug!(column = %column.name, err = %e, "column inference fell back");
                (fallback, TokenUsage::default())
            }
        }
    }
}

fn format_samples(values: &[String]) -> String {
    if values.is_empty() {
        "none".to_string()
    } else {
        values
            .iter()
            .take(8)
            .map(|v| format!("'{}'", v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ============ TableDocumenter ============

/// Sub-agent that orchestrates column inference, describes the table, and
/// emits both artifacts. Returns only the summary object.
pub struct TableDocumenter<'a> {
    pub llm: &'a LlmClient,
    pub config: &'a DocumenterConfig,
    pub database: &'a str,
}

impl TableDocumenter<'_> {
    pub async fn document_table(
        &self,
        meta: &TableMetadata,
        sample: &SampleData,
        tables_dir: &Path,
    ) -> (TableSummary, TokenUsage, Vec<AgentError>) {
        let mut tokens = TokenUsage::default();

        // Columns in small parallel batches; results rekeyed by name because
        // batch completion order is unspecified.
        let inferencer = ColumnInferencer {
            llm: self.llm,
            database: self.database,
        };
        let descriptions: BTreeMap<String, String> = stream::iter(meta.columns.iter())
            .map(|column| {
                let values = sample.column_values(&column.name);
                let inferencer = &inferencer;
                async move {
                    let (description, usage) =
                        inferencer.infer_column(meta, column, &values).await;
                    (column.name.clone(), description, usage)
                }
            })
            .buffer_unordered(self.config.column_batch_size.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|(name, description, usage)| {
                tokens.add(&usage);
                (name, description)
            })
            .collect();

        let (table_description, table_usage) = self.describe_table(meta, sample).await;
        tokens.add(&table_usage);

        let artifact = TableArtifact {
            database: self.database.to_string(),
            meta: meta.clone(),
            description: table_description,
            column_descriptions: descriptions,
            sample: sample.clone(),
            generated_at: Utc::now(),
        };

        let mut errors = Vec::new();
        let mut output_files = Vec::new();
        let (md_path, json_path) = (
            tables_dir.join(artifact_file_name(&meta.schema, &meta.table, "md")),
            tables_dir.join(artifact_file_name(&meta.schema, &meta.table, "json")),
        );

        // The two writes are independent; one failing must not stop the other.
        match atomic_write_with_retry(&md_path, render_markdown(&artifact).as_bytes()) {
            Ok(()) => output_files.push(md_path.to_string_lossy().to_string()),
            Err(e) => errors.push(AgentError::new(
                ErrorCode::DocFileWriteFailed,
                format!("Markdown write failed: {}", e),
            )),
        }
        let json_bytes = serde_json::to_vec_pretty(&render_json(&artifact)).unwrap_or_default();
        match atomic_write_with_retry(&json_path, &json_bytes) {
            Ok(()) => output_files.push(json_path.to_string_lossy().to_string()),
            Err(e) => errors.push(AgentError::new(
                ErrorCode::DocFileWriteFailed,
                format!("JSON write failed: {}", e),
            )),
        }

        let summary = TableSummary {
            schema: meta.schema.clone(),
            table: meta.table.clone(),
            description: artifact.description.clone(),
            column_count: meta.columns.len(),
            output_files,
        };
        assert_context_quarantine(&summary, sample);

        (summary, tokens, errors)
    }

    async fn describe_table(&self, meta: &TableMetadata, sample: &SampleData) -> (String, TokenUsage) {
        let fallback = fallback_table_description(meta);

        let template = match prompts::get_template(prompts::TABLE_DESCRIPTION) {
            Ok(t) => t,
            Err(e) => {
                warn!(err = %e, "table prompt template missing");
                return (fallback, TokenUsage::default());
            }
        };

        let column_list = meta
            .columns
            .iter()
            .map(|c| format!("- {} {}{}", c.name, c.data_type, if c.nullable { "" } else { " NOT NULL" }))
            .collect::<Vec<_>>()
            .join("\n");
        let foreign_keys = meta
            .foreign_keys
            .iter()
            .map(|fk| format!("{} -> {}.{}.{}", fk.column, fk.target_schema, fk.target_table, fk.target_column))
            .collect::<Vec<_>>()
            .join("; ");
        let sample_data = serde_json::to_string(&sample.json_rows(3)).unwrap_or_default();

        let prompt = prompts::render(
            template,
            &[
                ("database", self.database.to_string()),
                ("schema", meta.schema.clone()),
                ("table", meta.table.clone()),
                ("row_count", meta.row_count_approx.to_string()),
                ("column_list", column_list),
                ("primary_key", meta.primary_key.join(", ")),
                ("foreign_keys", if foreign_keys.is_empty() { "none".into() } else { foreign_keys }),
                ("sample_data", sample_data),
            ],
        );

        match self.llm.complete(&prompt).await {
            Ok(Completion { content, tokens, .. }) => {
                (validate_description(&content, &fallback), tokens)
            }
            Err(e) => {
                debug!(table = %meta.table, err = %e, "table description fell back");
                (fallback, TokenUsage::default())
            }
        }
    }
}

/// Context quarantine: the summary that travels upward must never carry raw
/// sampled values.
fn assert_context_quarantine(summary: &TableSummary, sample: &SampleData) {
    let rendered = serde_json::to_string(summary).unwrap_or_default();
    for row in &sample.rows {
        for value in row {
            if let serde_json::Value::String(s) = value {
                assert!(
                    s.len() < 30 || !rendered.contains(s.as_str()),
                    "sample value leaked through the sub-agent boundary"
                );
            }
        }
    }
}

// ============ Artifact rendering ============

/// Everything needed to render both artifact files for one table.
pub struct TableArtifact {
    pub database: String,
    pub meta: TableMetadata,
    pub description: String,
    pub column_descriptions: BTreeMap<String, String>,
    pub sample: SampleData,
    pub generated_at: DateTime<Utc>,
}

fn md_escape(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Render the Markdown artifact. Section shapes are load-bearing: the
/// indexer's parser reads them back.
pub fn render_markdown(artifact: &TableArtifact) -> String {
    let meta = &artifact.meta;
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", meta.table));
    out.push_str(&format!("**Database:** {}\n", artifact.database));
    out.push_str(&format!("**Schema:** {}\n", meta.schema));
    out.push_str(&format!("**Description:** {}\n", md_escape(&artifact.description)));
    if meta.row_count_approx > 0 {
        out.push_str(&format!("**Row Count:** ~{}\n", meta.row_count_approx));
    }
    out.push('\n');

    out.push_str("## Columns\n\n");
    out.push_str("| Column | Type | Nullable | Description |\n");
    out.push_str("|--------|------|----------|-------------|\n");
    for column in &meta.columns {
        let description = artifact
            .column_descriptions
            .get(&column.name)
            .cloned()
            .unwrap_or_default();
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            md_escape(&column.name),
            md_escape(&column.data_type),
            if column.nullable { "Yes" } else { "No" },
            md_escape(&description)
        ));
    }
    out.push('\n');

    if !meta.primary_key.is_empty() {
        out.push_str("## Primary Key\n\n");
        for key in &meta.primary_key {
            out.push_str(&format!("- {}\n", key));
        }
        out.push('\n');
    }

    if !meta.foreign_keys.is_empty() {
        out.push_str("## Foreign Keys\n\n");
        for fk in &meta.foreign_keys {
            out.push_str(&format!(
                "- {} -> {}.{}.{}\n",
                fk.column, fk.target_schema, fk.target_table, fk.target_column
            ));
        }
        out.push('\n');
    }

    if !meta.indexes.is_empty() {
        out.push_str("## Indexes\n\n");
        for index in &meta.indexes {
            out.push_str(&format!("- {}\n", index));
        }
        out.push('\n');
    }

    if !artifact.sample.is_empty() {
        out.push_str("## Sample Data\n\n");
        let columns = &artifact.sample.columns;
        out.push_str(&format!("| {} |\n", columns.iter().map(|c| md_escape(c)).collect::<Vec<_>>().join(" | ")));
        out.push_str(&format!("|{}\n", "---|".repeat(columns.len())));
        for row in artifact.sample.rows.iter().take(SAMPLE_ROWS_PERSISTED) {
            let cells: Vec<String> = row.iter().map(|v| md_escape(&display_value(v))).collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "*Generated at: {}*\n",
        artifact.generated_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    ));
    out
}

/// Render the JSON artifact.
pub fn render_json(artifact: &TableArtifact) -> serde_json::Value {
    let meta = &artifact.meta;
    serde_json::json!({
        "table": meta.table,
        "schema": meta.schema,
        "database": artifact.database,
        "description": artifact.description,
        "row_count": meta.row_count_approx,
        "columns": meta.columns.iter().map(|c| serde_json::json!({
            "name": c.name,
            "type": c.data_type,
            "nullable": c.nullable,
            "description": artifact.column_descriptions.get(&c.name).cloned().unwrap_or_default(),
            "default": c.default,
        })).collect::<Vec<_>>(),
        "primary_key": meta.primary_key,
        "foreign_keys": meta.foreign_keys.iter().map(|fk| serde_json::json!({
            "column": fk.column,
            "target_schema": fk.target_schema,
            "target_table": fk.target_table,
            "target_column": fk.target_column,
        })).collect::<Vec<_>>(),
        "indexes": meta.indexes,
        "sample_data": artifact.sample.json_rows(SAMPLE_ROWS_PERSISTED),
        "generated_at": artifact.generated_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str, nullable: bool) -> ColumnMetadata {
        ColumnMetadata {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default: None,
            comment: None,
        }
    }

    fn users_meta() -> TableMetadata {
        TableMetadata {
            schema: "public".into(),
            table: "users".into(),
            columns: vec![column("id", "INTEGER", false), column("email", "VARCHAR", false)],
            primary_key: vec!["id".into()],
            foreign_keys: vec![crate::models::ForeignKeyRef {
                column: "org_id".into(),
                target_schema: "public".into(),
                target_table: "orgs".into(),
                target_column: "id".into(),
            }],
            indexes: vec!["users_email_idx".into()],
            row_count_approx: 42,
            comment: None,
        }
    }

    #[test]
    fn sample_value_boundary_truncation() {
        let exactly_100 = "x".repeat(100);
        let over = "x".repeat(101);

        let kept = truncate_sample_value(serde_json::Value::String(exactly_100.clone()));
        assert_eq!(kept, serde_json::Value::String(exactly_100));

        let cut = truncate_sample_value(serde_json::Value::String(over));
        let s = cut.as_str().unwrap();
        assert_eq!(s.chars().count(), 100);
        assert!(s.ends_with("..."));
        assert_eq!(&s[..97], &"x".repeat(97));
    }

    #[test]
    fn numbers_pass_through_untruncated() {
        let v = truncate_sample_value(serde_json::json!(123456));
        assert_eq!(v, serde_json::json!(123456));
    }

    #[test]
    fn description_validation_boundaries() {
        let fallback = "Column x of type TEXT.";

        // 9 chars → fallback
        assert_eq!(validate_description("too short", fallback), fallback);

        // exactly 500 accepted (choose content that ends with '.')
        let body = "a".repeat(499);
        let five_hundred = format!("{}.", body);
        assert_eq!(validate_description(&five_hundred, fallback).chars().count(), 500);

        // 501+ truncated to at most two sentences
        let long = format!("{}. {}. {}.", "b".repeat(200), "c".repeat(200), "d".repeat(200));
        let validated = validate_description(&long, fallback);
        assert!(validated.chars().count() <= 404);
        assert!(validated.ends_with('.'));
        assert!(!validated.contains('d'));
    }

    #[test]
    fn missing_terminal_punctuation_gets_period() {
        let out = validate_description("Stores user email addresses", "fb");
        assert!(out.ends_with('.'));
    }

    #[test]
    fn fallback_texts_are_deterministic() {
        let c = column("email", "VARCHAR", true);
        assert_eq!(fallback_column_description(&c), "Column email of type VARCHAR.");
        assert_eq!(
            fallback_table_description(&users_meta()),
            "Table public.users with 2 columns."
        );
    }

    #[test]
    fn markdown_has_all_sections_and_trailer() {
        let mut descriptions = BTreeMap::new();
        descriptions.insert("id".to_string(), "Surrogate key.".to_string());
        descriptions.insert("email".to_string(), "Login email.".to_string());

        let artifact = TableArtifact {
            database: "demo".into(),
            meta: users_meta(),
            description: "Registered user accounts.".into(),
            column_descriptions: descriptions,
            sample: SampleData {
                columns: vec!["id".into(), "email".into()],
                rows: vec![vec![serde_json::json!(1), serde_json::json!("a@example.com")]],
            },
            generated_at: Utc::now(),
        };
        let md = render_markdown(&artifact);

        assert!(md.starts_with("# users\n"));
        assert!(md.contains("**Database:** demo"));
        assert!(md.contains("**Schema:** public"));
        assert!(md.contains("**Description:** Registered user accounts."));
        assert!(md.contains("**Row Count:** ~42"));
        assert!(md.contains("| Column | Type | Nullable | Description |"));
        assert!(md.contains("| id | INTEGER | No | Surrogate key. |"));
        assert!(md.contains("## Primary Key"));
        assert!(md.contains("## Foreign Keys"));
        assert!(md.contains("- org_id -> public.orgs.id"));
        assert!(md.contains("## Indexes"));
        assert!(md.contains("## Sample Data"));
        assert!(md.contains("*Generated at: "));
    }

    #[test]
    fn empty_sample_omits_sample_section() {
        let artifact = TableArtifact {
            database: "demo".into(),
            meta: users_meta(),
            description: "Registered user accounts.".into(),
            column_descriptions: BTreeMap::new(),
            sample: SampleData::default(),
            generated_at: Utc::now(),
        };
        let md = render_markdown(&artifact);
        assert!(!md.contains("## Sample Data"));
    }

    #[test]
    fn json_artifact_shape() {
        let artifact = TableArtifact {
            database: "demo".into(),
            meta: users_meta(),
            description: "Registered user accounts.".into(),
            column_descriptions: BTreeMap::new(),
            sample: SampleData {
                columns: vec!["id".into()],
                rows: (0..10).map(|i| vec![serde_json::json!(i)]).collect(),
            },
            generated_at: Utc::now(),
        };
        let json = render_json(&artifact);
        assert_eq!(json["table"], "users");
        assert_eq!(json["schema"], "public");
        assert_eq!(json["database"], "demo");
        assert_eq!(json["row_count"], 42);
        assert_eq!(json["columns"].as_array().unwrap().len(), 2);
        assert_eq!(json["columns"][0]["type"], "INTEGER");
        // sample_data bounded to 5 rows
        assert_eq!(json["sample_data"].as_array().unwrap().len(), 5);
        assert!(json["generated_at"].is_string());
    }

    #[test]
    fn quarantine_assert_accepts_derived_summaries() {
        let summary = TableSummary {
            schema: "public".into(),
            table: "users".into(),
            description: "Registered user accounts.".into(),
            column_count: 2,
            output_files: vec!["a.md".into()],
        };
        let sample = SampleData {
            columns: vec!["secret".into()],
            rows: vec![vec![serde_json::json!(
                "this is a long confidential sampled value nobody should see"
            )]],
        };
        assert_context_quarantine(&summary, &sample);
    }

    #[test]
    #[should_panic(expected = "sample value leaked")]
    fn quarantine_assert_catches_leaks() {
        let leaked = "this is a long confidential sampled value nobody should see";
        let summary = TableSummary {
            schema: "public".into(),
            table: "users".into(),
            description: format!("Contains {}", leaked),
            column_count: 2,
            output_files: vec![],
        };
        let sample = SampleData {
            columns: vec!["secret".into()],
            rows: vec![vec![serde_json::json!(leaked)]],
        };
        assert_context_quarantine(&summary, &sample);
    }

    #[test]
    fn column_values_extracts_by_name() {
        let sample = SampleData {
            columns: vec!["id".into(), "email".into()],
            rows: vec![
                vec![serde_json::json!(1), serde_json::json!("a@x.co")],
                vec![serde_json::json!(2), serde_json::Value::Null],
            ],
        };
        assert_eq!(sample.column_values("email"), vec!["a@x.co"]);
        assert_eq!(sample.column_values("id"), vec!["1", "2"]);
        assert!(sample.column_values("missing").is_empty());
    }
}
