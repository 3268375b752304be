//! Artifact parsers: Markdown/JSON artifacts into typed index documents.
//!
//! One parser per manifest file type. Column documents have no standalone
//! files; they are synthesized from the parent table document and carry a
//! virtual path of `{table_path}#{column}` for identity and hashing.
//!
//! Foreign-key notation appears in several shapes in the wild; the regexes
//! here accept both the ASCII arrow (`->`) and the Unicode arrow (`→`), plus
//! inline `references table(column)` annotations in column descriptions.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AgentError, AgentResult, ErrorCode};
use crate::hash::sha256_hex;
use crate::keywords::{extract_keywords, KeywordInput};
use crate::models::{DocType, FileType, IndexDocument, IndexableFile};

/// A direct foreign-key edge recovered from an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct FkEdge {
    pub database: String,
    pub source_schema: String,
    pub source_table: String,
    pub source_column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
    /// 1.0 for FKs read out of table docs, 0.9 for explicit relationship docs.
    pub confidence: f64,
}

/// Result of parsing one artifact file.
#[derive(Debug, Default)]
pub struct ParsedArtifact {
    pub documents: Vec<IndexDocument>,
    pub fk_edges: Vec<FkEdge>,
}

/// A column row recovered from the `## Columns` Markdown table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub description: String,
}

/// Dispatch on the manifest's file type.
pub fn parse_artifact(file: &IndexableFile, content_hash: &str, text: &str) -> AgentResult<ParsedArtifact> {
    match file.file_type {
        FileType::Table => parse_table_artifact(file, content_hash, text),
        FileType::Domain => parse_domain_artifact(file, content_hash, text),
        FileType::Relationship => parse_relationship_artifact(file, content_hash, text),
        FileType::Overview => parse_overview_artifact(file, content_hash, text),
    }
}

// ============ table ============

fn parse_table_artifact(
    file: &IndexableFile,
    content_hash: &str,
    text: &str,
) -> AgentResult<ParsedArtifact> {
    let parsed = if file.path.ends_with(".json") {
        parse_table_json(text)?
    } else {
        parse_table_markdown(text)
    };

    let schema = file
        .schema
        .clone()
        .or(parsed.schema)
        .ok_or_else(|| bad_file(file, "table artifact without a schema"))?;
    let table = file
        .table
        .clone()
        .or(parsed.table)
        .ok_or_else(|| bad_file(file, "table artifact without a table name"))?;

    let mut documents = Vec::new();

    let table_keywords = extract_keywords(&KeywordInput {
        identifiers: vec![table.as_str()],
        data_type: None,
        sample_values: &[],
        description: &parsed.description,
        parent_terms: file.domain.as_deref().into_iter().collect(),
    });
    documents.push(IndexDocument {
        doc_type: DocType::Table,
        database: file.database.clone(),
        schema: Some(schema.clone()),
        table: Some(table.clone()),
        column: None,
        domain: file.domain.clone(),
        content: text.to_string(),
        summary: parsed.description.clone(),
        keywords: table_keywords,
        file_path: file.path.clone(),
        content_hash: content_hash.to_string(),
        source_modified_at: file.modified_at,
        parent_table_path: None,
    });

    // Synthesize one column document per parsed column.
    for column in &parsed.columns {
        let samples = parsed
            .sample_values
            .iter()
            .filter(|(col, _)| col == &column.name)
            .map(|(_, v)| v.clone())
            .collect::<Vec<_>>();
        let keywords = extract_keywords(&KeywordInput {
            identifiers: vec![column.name.as_str(), table.as_str()],
            data_type: Some(&column.data_type),
            sample_values: &samples,
            description: &column.description,
            parent_terms: file.domain.as_deref().into_iter().collect(),
        });
        let content = format!(
            "{}.{}.{} ({}{}): {}",
            schema,
            table,
            column.name,
            column.data_type,
            if column.nullable { ", nullable" } else { "" },
            column.description
        );
        let virtual_path = format!("{}#{}", file.path, column.name);
        documents.push(IndexDocument {
            doc_type: DocType::Column,
            database: file.database.clone(),
            schema: Some(schema.clone()),
            table: Some(table.clone()),
            column: Some(column.name.clone()),
            domain: file.domain.clone(),
            summary: column.description.clone(),
            keywords,
            content_hash: sha256_hex(format!("{}:{}", content_hash, content).as_bytes()),
            file_path: virtual_path,
            content,
            source_modified_at: file.modified_at,
            parent_table_path: Some(file.path.clone()),
        });
    }

    let fk_edges = parsed
        .foreign_keys
        .into_iter()
        .map(|(source_column, target_schema, target_table, target_column)| FkEdge {
            database: file.database.clone(),
            source_schema: schema.clone(),
            source_table: table.clone(),
            source_column,
            target_schema: target_schema.unwrap_or_else(|| schema.clone()),
            target_table,
            target_column,
            confidence: 1.0,
        })
        .collect();

    Ok(ParsedArtifact { documents, fk_edges })
}

/// Intermediate result shared by the Markdown and JSON table parsers.
#[derive(Debug, Default)]
struct ParsedTable {
    schema: Option<String>,
    table: Option<String>,
    description: String,
    columns: Vec<ParsedColumn>,
    /// (source column, target schema?, target table, target column)
    foreign_keys: Vec<(String, Option<String>, String, String)>,
    /// (column, sample display value)
    sample_values: Vec<(String, String)>,
}

fn fk_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `- order_id -> public.orders.id` or `* order_id → orders.id`
    RE.get_or_init(|| {
        Regex::new(r#"^\s*[-*]\s*`?([\w"]+)`?\s*(?:->|→)\s*([\w".]+)\s*$"#).unwrap()
    })
}

fn inline_reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `references orders(id)` inside a column description
    RE.get_or_init(|| Regex::new(r"(?i)references\s+([\w.]+)\s*\(\s*(\w+)\s*\)").unwrap())
}

fn bold_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\*\*([^:*]+):\*\*\s*(.*)$").unwrap())
}

/// Parse a table Markdown artifact. Missing sections yield empty fields
/// rather than errors.
fn parse_table_markdown(text: &str) -> ParsedTable {
    let mut parsed = ParsedTable::default();
    let (front_matter, body) = split_front_matter(text);

    for (key, value) in front_matter {
        match key.as_str() {
            "schema" => parsed.schema = Some(value),
            "table" => parsed.table = Some(value),
            _ => {}
        }
    }

    let mut section = String::new();
    let mut lead_paragraph: Option<String> = None;
    let mut sample_headers: Vec<String> = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if let Some(title) = trimmed.strip_prefix("# ") {
            if parsed.table.is_none() {
                parsed.table = Some(title.trim().to_string());
            }
            continue;
        }
        if let Some(heading) = trimmed.strip_prefix("## ") {
            section = heading.trim().to_lowercase();
            continue;
        }

        if let Some(caps) = bold_field_re().captures(trimmed) {
            let key = caps[1].trim().to_lowercase();
            let value = caps[2].trim().to_string();
            match key.as_str() {
                "schema" => parsed.schema = Some(value),
                "description" => parsed.description = value,
                _ => {}
            }
            continue;
        }

        match section.as_str() {
            "columns" => {
                if let Some(cells) = parse_md_row(trimmed) {
                    if cells.len() >= 4 && cells[0] != "Column" && !cells[0].starts_with('-') {
                        let description = cells[3].clone();
                        // Inline FK annotation inside the description.
                        for caps in inline_reference_re().captures_iter(&description) {
                            let (target_schema, target_table) = split_target_table(&caps[1]);
                            parsed.foreign_keys.push((
                                cells[0].clone(),
                                target_schema,
                                target_table,
                                caps[2].to_string(),
                            ));
                        }
                        parsed.columns.push(ParsedColumn {
                            name: cells[0].clone(),
                            data_type: cells[1].clone(),
                            nullable: cells[2].eq_ignore_ascii_case("yes"),
                            description,
                        });
                    }
                }
            }
            "foreign keys" | "relationships" => {
                if let Some(caps) = fk_line_re().captures(trimmed) {
                    let source = caps[1].trim_matches('"').to_string();
                    let target: Vec<&str> = caps[2].trim_matches('"').split('.').collect();
                    match target.as_slice() {
                        [schema, table, column] => parsed.foreign_keys.push((
                            source,
                            Some(schema.to_string()),
                            table.to_string(),
                            column.to_string(),
                        )),
                        [table, column] => parsed.foreign_keys.push((
                            source,
                            None,
                            table.to_string(),
                            column.to_string(),
                        )),
                        _ => {}
                    }
                }
            }
            "sample data" => {
                if let Some(cells) = parse_md_row(trimmed) {
                    let is_separator =
                        cells.iter().all(|c| !c.is_empty() && c.chars().all(|ch| ch == '-'));
                    if sample_headers.is_empty() {
                        sample_headers = cells;
                    } else if !is_separator {
                        for (i, cell) in cells.iter().enumerate() {
                            if let Some(column) = sample_headers.get(i) {
                                parsed.sample_values.push((column.clone(), cell.clone()));
                            }
                        }
                    }
                }
            }
            "overview" | "description" => {
                if !trimmed.is_empty() && parsed.description.is_empty() {
                    parsed.description = trimmed.to_string();
                }
            }
            _ => {
                if section.is_empty()
                    && !trimmed.is_empty()
                    && !trimmed.starts_with('*')
                    && !trimmed.starts_with('|')
                    && lead_paragraph.is_none()
                {
                    lead_paragraph = Some(trimmed.to_string());
                }
            }
        }
    }

    if parsed.description.is_empty() {
        if let Some(lead) = lead_paragraph {
            parsed.description = lead;
        }
    }
    parsed
}

fn parse_table_json(text: &str) -> AgentResult<ParsedTable> {
    let json: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        AgentError::new(ErrorCode::IdxFileFailed, format!("table JSON unparseable: {}", e))
    })?;

    let mut parsed = ParsedTable {
        schema: json["schema"].as_str().map(String::from),
        table: json["table"].as_str().map(String::from),
        description: json["description"].as_str().unwrap_or_default().to_string(),
        ..Default::default()
    };

    for column in json["columns"].as_array().into_iter().flatten() {
        parsed.columns.push(ParsedColumn {
            name: column["name"].as_str().unwrap_or_default().to_string(),
            data_type: column["type"].as_str().unwrap_or_default().to_string(),
            nullable: column["nullable"].as_bool().unwrap_or(true),
            description: column["description"].as_str().unwrap_or_default().to_string(),
        });
    }
    for fk in json["foreign_keys"].as_array().into_iter().flatten() {
        parsed.foreign_keys.push((
            fk["column"].as_str().unwrap_or_default().to_string(),
            fk["target_schema"].as_str().map(String::from),
            fk["target_table"].as_str().unwrap_or_default().to_string(),
            fk["target_column"].as_str().unwrap_or_default().to_string(),
        ));
    }
    for row in json["sample_data"].as_array().into_iter().flatten() {
        if let Some(object) = row.as_object() {
            for (column, value) in object {
                let display = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                parsed.sample_values.push((column.clone(), display));
            }
        }
    }
    Ok(parsed)
}

// ============ domain ============

fn parse_domain_artifact(
    file: &IndexableFile,
    content_hash: &str,
    text: &str,
) -> AgentResult<ParsedArtifact> {
    let domain = file
        .domain
        .clone()
        .ok_or_else(|| bad_file(file, "domain artifact without a domain"))?;

    let description = leading_paragraph(text);
    let tables = list_items(text);
    let keywords = extract_keywords(&KeywordInput {
        identifiers: std::iter::once(domain.as_str())
            .chain(tables.iter().map(String::as_str))
            .collect(),
        data_type: None,
        sample_values: &[],
        description: &description,
        parent_terms: vec![file.database.as_str()],
    });

    Ok(ParsedArtifact {
        documents: vec![IndexDocument {
            doc_type: DocType::Domain,
            database: file.database.clone(),
            schema: None,
            table: None,
            column: None,
            domain: Some(domain),
            content: text.to_string(),
            summary: description,
            keywords,
            file_path: file.path.clone(),
            content_hash: content_hash.to_string(),
            source_modified_at: file.modified_at,
            parent_table_path: None,
        }],
        fk_edges: Vec::new(),
    })
}

// ============ relationship ============

fn relationship_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `public.orders.user_id -> public.users.id` (or `→`)
    RE.get_or_init(|| {
        Regex::new(r"(\w+)\.(\w+)\.(\w+)\s*(?:->|→)\s*(\w+)\.(\w+)\.(\w+)").unwrap()
    })
}

fn parse_relationship_artifact(
    file: &IndexableFile,
    content_hash: &str,
    text: &str,
) -> AgentResult<ParsedArtifact> {
    let mut fk_edges = Vec::new();
    let mut summary = String::new();

    for caps in relationship_line_re().captures_iter(text) {
        let edge = FkEdge {
            database: file.database.clone(),
            source_schema: caps[1].to_string(),
            source_table: caps[2].to_string(),
            source_column: caps[3].to_string(),
            target_schema: caps[4].to_string(),
            target_table: caps[5].to_string(),
            target_column: caps[6].to_string(),
            confidence: 0.9,
        };
        if summary.is_empty() {
            summary = format!(
                "{}.{} relates to {}.{}",
                edge.source_schema, edge.source_table, edge.target_schema, edge.target_table
            );
        }
        fk_edges.push(edge);
    }

    if fk_edges.is_empty() {
        return Err(bad_file(file, "relationship artifact with no parseable edges"));
    }

    let source_table = fk_edges[0].source_table.clone();
    let target_table = fk_edges[0].target_table.clone();
    let keywords = extract_keywords(&KeywordInput {
        identifiers: vec![source_table.as_str(), target_table.as_str()],
        data_type: None,
        sample_values: &[],
        description: &summary,
        parent_terms: vec![file.database.as_str()],
    });

    Ok(ParsedArtifact {
        documents: vec![IndexDocument {
            doc_type: DocType::Relationship,
            database: file.database.clone(),
            schema: None,
            // Identity for relationship docs is `{source}_to_{target}`.
            table: Some(format!("{}_to_{}", source_table, target_table)),
            column: None,
            domain: None,
            content: text.to_string(),
            summary,
            keywords,
            file_path: file.path.clone(),
            content_hash: content_hash.to_string(),
            source_modified_at: file.modified_at,
            parent_table_path: None,
        }],
        fk_edges,
    })
}

// ============ overview ============

fn parse_overview_artifact(
    file: &IndexableFile,
    content_hash: &str,
    text: &str,
) -> AgentResult<ParsedArtifact> {
    let summary = leading_paragraph(text);
    let keywords = extract_keywords(&KeywordInput {
        identifiers: vec![file.database.as_str()],
        data_type: None,
        sample_values: &[],
        description: &summary,
        parent_terms: vec![],
    });

    Ok(ParsedArtifact {
        documents: vec![IndexDocument {
            doc_type: DocType::Overview,
            database: file.database.clone(),
            schema: None,
            table: None,
            column: None,
            domain: None,
            content: text.to_string(),
            summary,
            keywords,
            file_path: file.path.clone(),
            content_hash: content_hash.to_string(),
            source_modified_at: file.modified_at,
            parent_table_path: None,
        }],
        fk_edges: Vec::new(),
    })
}

// ============ shared helpers ============

fn bad_file(file: &IndexableFile, message: &str) -> AgentError {
    AgentError::new(ErrorCode::IdxFileFailed, format!("{}: {}", file.path, message))
}

/// Split optional YAML-style front matter (`---` fences) off the body,
/// returning simple `key: value` pairs.
fn split_front_matter(text: &str) -> (Vec<(String, String)>, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (Vec::new(), text);
    };
    let Some(end) = rest.find("\n---") else {
        return (Vec::new(), text);
    };
    let block = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('\n');

    let pairs = block
        .lines()
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            Some((k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        })
        .collect();
    (pairs, body)
}

/// Cells of a `| a | b |` Markdown table row.
fn parse_md_row(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') || !trimmed.ends_with('|') {
        return None;
    }
    let inner = &trimmed[1..trimmed.len() - 1];
    Some(
        split_unescaped_pipes(inner)
            .into_iter()
            .map(|cell| cell.trim().replace("\\|", "|"))
            .collect(),
    )
}

fn split_unescaped_pipes(s: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '|' {
            cells.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    cells.push(current);
    cells
}

/// First non-heading, non-markup paragraph of a document.
fn leading_paragraph(text: &str) -> String {
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with('|')
            || trimmed.starts_with("**")
            || trimmed.starts_with('-')
            || trimmed.starts_with('*')
        {
            continue;
        }
        return trimmed.to_string();
    }
    String::new()
}

/// `- item` list entries anywhere in the document.
fn list_items(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("- "))
        .map(|item| item.trim().trim_matches('`').to_string())
        .collect()
}

fn split_target_table(raw: &str) -> (Option<String>, String) {
    match raw.rsplit_once('.') {
        Some((schema, table)) => (Some(schema.to_string()), table.to_string()),
        None => (None, raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn table_file(path: &str) -> IndexableFile {
        IndexableFile {
            path: path.to_string(),
            file_type: FileType::Table,
            database: "demo".into(),
            schema: Some("public".into()),
            table: Some("orders".into()),
            domain: Some("orders".into()),
            content_hash: "f".repeat(64),
            size_bytes: 0,
            modified_at: Utc::now(),
        }
    }

    const ORDERS_MD: &str = r#"# orders

**Database:** demo
**Schema:** public
**Description:** Customer purchase orders.
**Row Count:** ~100

## Columns

| Column | Type | Nullable | Description |
|--------|------|----------|-------------|
| id | INTEGER | No | Surrogate order key. |
| user_id | INTEGER | No | Purchasing user, references users(id). |
| total_cents | INTEGER | No | Order total in cents. |

## Primary Key

- id

## Foreign Keys

- user_id -> public.users.id

## Sample Data

| id | user_id | total_cents |
|---|---|---|
| 1 | 7 | 1999 |

*Generated at: 2026-08-01T00:00:00Z*
"#;

    #[test]
    fn table_markdown_parses_columns_and_description() {
        let parsed = parse_table_markdown(ORDERS_MD);
        assert_eq!(parsed.table.as_deref(), Some("orders"));
        assert_eq!(parsed.schema.as_deref(), Some("public"));
        assert_eq!(parsed.description, "Customer purchase orders.");
        assert_eq!(parsed.columns.len(), 3);
        assert_eq!(parsed.columns[0], ParsedColumn {
            name: "id".into(),
            data_type: "INTEGER".into(),
            nullable: false,
            description: "Surrogate order key.".into(),
        });
    }

    #[test]
    fn table_markdown_extracts_fk_shapes() {
        let parsed = parse_table_markdown(ORDERS_MD);
        // Explicit FK section plus the inline `references users(id)`.
        assert!(parsed.foreign_keys.contains(&(
            "user_id".into(),
            Some("public".into()),
            "users".into(),
            "id".into()
        )));
        assert!(parsed.foreign_keys.contains(&(
            "user_id".into(),
            None,
            "users".into(),
            "id".into()
        )));
    }

    #[test]
    fn unicode_arrow_accepted() {
        let md = "# t\n\n## Foreign Keys\n\n- a_id → other.b.id\n";
        let parsed = parse_table_markdown(md);
        assert_eq!(parsed.foreign_keys.len(), 1);
        assert_eq!(parsed.foreign_keys[0].2, "b");
    }

    #[test]
    fn two_part_fk_target_defaults_schema() {
        let md = "# t\n\n## Foreign Keys\n\n- a_id -> users.id\n";
        let parsed = parse_table_markdown(md);
        assert_eq!(parsed.foreign_keys[0], ("a_id".into(), None, "users".into(), "id".into()));
    }

    #[test]
    fn sample_section_maps_values_to_columns() {
        let parsed = parse_table_markdown(ORDERS_MD);
        assert!(parsed.sample_values.contains(&("total_cents".into(), "1999".into())));
    }

    #[test]
    fn front_matter_overrides_nothing_but_is_read() {
        let md = "---\nschema: sales\ntable: deals\n---\n# deals\n";
        let parsed = parse_table_markdown(md);
        assert_eq!(parsed.schema.as_deref(), Some("sales"));
        assert_eq!(parsed.table.as_deref(), Some("deals"));
    }

    #[test]
    fn table_artifact_synthesizes_column_documents() {
        let file = table_file("databases/demo/domains/orders/tables/public.orders.md");
        let artifact = parse_artifact(&file, &"f".repeat(64), ORDERS_MD).unwrap();

        let tables: Vec<_> = artifact
            .documents
            .iter()
            .filter(|d| d.doc_type == DocType::Table)
            .collect();
        let columns: Vec<_> = artifact
            .documents
            .iter()
            .filter(|d| d.doc_type == DocType::Column)
            .collect();
        assert_eq!(tables.len(), 1);
        assert_eq!(columns.len(), 3);

        let user_id = columns.iter().find(|d| d.column.as_deref() == Some("user_id")).unwrap();
        assert_eq!(
            user_id.file_path,
            "databases/demo/domains/orders/tables/public.orders.md#user_id"
        );
        assert_eq!(
            user_id.parent_table_path.as_deref(),
            Some("databases/demo/domains/orders/tables/public.orders.md")
        );
        assert_eq!(user_id.identity(), "demo.public.orders.user_id");
    }

    #[test]
    fn table_json_artifact_parses() {
        let json = serde_json::json!({
            "table": "orders",
            "schema": "public",
            "database": "demo",
            "description": "Customer purchase orders.",
            "row_count": 100,
            "columns": [
                {"name": "id", "type": "INTEGER", "nullable": false, "description": "Key.", "default": null}
            ],
            "primary_key": ["id"],
            "foreign_keys": [
                {"column": "user_id", "target_schema": "public", "target_table": "users", "target_column": "id"}
            ],
            "indexes": [],
            "sample_data": [{"id": 1}],
            "generated_at": "2026-08-01T00:00:00Z"
        });
        let mut file = table_file("databases/demo/domains/orders/tables/public.orders.json");
        file.path = "databases/demo/domains/orders/tables/public.orders.json".into();
        let artifact = parse_artifact(&file, &"f".repeat(64), &json.to_string()).unwrap();
        assert_eq!(artifact.fk_edges.len(), 1);
        assert_eq!(artifact.fk_edges[0].target_table, "users");
        assert_eq!(artifact.documents.len(), 2);
    }

    #[test]
    fn roundtrip_documenter_artifact_preserves_essentials() {
        // Render with the documenter, parse back, re-render: essential
        // fields must survive.
        use crate::table_doc::{render_markdown, TableArtifact};
        use std::collections::BTreeMap;

        let meta = crate::models::TableMetadata {
            schema: "public".into(),
            table: "users".into(),
            columns: vec![
                crate::models::ColumnMetadata {
                    name: "id".into(),
                    data_type: "INT".into(),
                    nullable: false,
                    default: None,
                    comment: None,
                },
                crate::models::ColumnMetadata {
                    name: "email".into(),
                    data_type: "VARCHAR".into(),
                    nullable: false,
                    default: None,
                    comment: None,
                },
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
            indexes: vec![],
            row_count_approx: 2,
            comment: None,
        };
        let mut descriptions = BTreeMap::new();
        descriptions.insert("id".to_string(), "Surrogate key.".to_string());
        descriptions.insert("email".to_string(), "Login email address.".to_string());

        let md = render_markdown(&TableArtifact {
            database: "demo".into(),
            meta: meta.clone(),
            description: "Registered accounts.".into(),
            column_descriptions: descriptions,
            sample: Default::default(),
            generated_at: Utc::now(),
        });

        let parsed = parse_table_markdown(&md);
        assert_eq!(parsed.schema.as_deref(), Some("public"));
        assert_eq!(parsed.table.as_deref(), Some("users"));
        assert_eq!(parsed.description, "Registered accounts.");
        assert_eq!(parsed.columns.len(), 2);
        assert_eq!(parsed.columns[0].name, "id");
        assert_eq!(parsed.columns[0].data_type, "INT");
        assert!(!parsed.columns[0].nullable);
        assert_eq!(parsed.columns[1].description, "Login email address.");
    }

    #[test]
    fn relationship_artifact_parses_edges() {
        let file = IndexableFile {
            path: "databases/demo/relationships/orders_users.md".into(),
            file_type: FileType::Relationship,
            database: "demo".into(),
            schema: None,
            table: None,
            domain: None,
            content_hash: "f".repeat(64),
            size_bytes: 0,
            modified_at: Utc::now(),
        };
        let text = "# orders to users\n\npublic.orders.user_id -> public.users.id\n";
        let artifact = parse_artifact(&file, &"f".repeat(64), text).unwrap();
        assert_eq!(artifact.fk_edges.len(), 1);
        assert!((artifact.fk_edges[0].confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(artifact.documents[0].doc_type, DocType::Relationship);
        assert_eq!(artifact.documents[0].identity(), "demo.orders_to_users");
    }

    #[test]
    fn domain_artifact_lists_tables() {
        let file = IndexableFile {
            path: "databases/demo/domains/orders/README.md".into(),
            file_type: FileType::Domain,
            database: "demo".into(),
            schema: None,
            table: None,
            domain: Some("orders".into()),
            content_hash: "f".repeat(64),
            size_bytes: 0,
            modified_at: Utc::now(),
        };
        let text = "# orders domain\n\nEverything about purchasing.\n\n- orders\n- order_items\n";
        let artifact = parse_artifact(&file, &"f".repeat(64), text).unwrap();
        assert_eq!(artifact.documents[0].doc_type, DocType::Domain);
        assert_eq!(artifact.documents[0].summary, "Everything about purchasing.");
        assert!(artifact.documents[0].keywords.contains(&"items".to_string()));
    }
}
