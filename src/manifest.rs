//! Manifest generation (documenter side) and validation (indexer side).
//!
//! The manifest is the only contract between the documenter and the indexer:
//! a walk of the docs tree with content hashes, classified by path pattern,
//! plus per-database and per-work-unit aggregates.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{AgentError, AgentResult, ErrorCode};
use crate::fsio::atomic_write;
use crate::hash::{output_hash, sha256_file};
use crate::models::{
    DocumentationPlan, FileType, IndexableFile, Manifest, ManifestDatabase, ManifestStatus,
    ManifestWorkUnit, RunStatus, WorkUnitProgress, WorkUnitStatus, SCHEMA_VERSION,
};

/// Classification of one artifact path, relative to the docs root.
pub fn classify_path(rel_path: &str) -> Option<(FileType, String, Option<String>, Option<String>, Option<String>)> {
    let parts: Vec<&str> = rel_path.split('/').collect();
    if parts.first() != Some(&"databases") || parts.len() < 3 {
        return None;
    }
    let database = parts[1].to_string();

    // databases/{db}/domains/{domain}/tables/{schema}.{table}.{ext}
    if parts.len() == 6 && parts[2] == "domains" && parts[4] == "tables" {
        let domain = parts[3].to_string();
        let stem = parts[5].rsplit_once('.').map(|(stem, _ext)| stem)?;
        let (schema, table) = stem.split_once('.')?;
        return Some((
            FileType::Table,
            database,
            Some(schema.to_string()),
            Some(table.to_string()),
            Some(domain),
        ));
    }

    // databases/{db}/domains/{domain}/{file} is a domain-level doc
    if parts.len() == 5 && parts[2] == "domains" {
        return Some((FileType::Domain, database, None, None, Some(parts[3].to_string())));
    }

    // databases/{db}/relationships/{file}
    if parts.len() == 4 && parts[2] == "relationships" {
        return Some((FileType::Relationship, database, None, None, None));
    }

    // databases/{db}/{file} is a database overview
    if parts.len() == 3 {
        return Some((FileType::Overview, database, None, None, None));
    }

    None
}

/// Walk the docs root and emit the manifest atomically. Fatal on write
/// failure (`DOC_MANIFEST_WRITE_FAILED`).
pub fn generate_manifest(
    config: &Config,
    plan: &DocumentationPlan,
    plan_hash: &str,
    overall: RunStatus,
    unit_progress: &[WorkUnitProgress],
) -> AgentResult<Manifest> {
    let docs_root = config.docs_root();
    let mut indexable_files = Vec::new();

    for entry in WalkDir::new(&docs_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        if name == "documentation-manifest.json" || name.ends_with(".tmp") || name.starts_with('.') {
            continue;
        }
        let ext_ok = path
            .extension()
            .map(|e| e == "md" || e == "json")
            .unwrap_or(false);
        if !ext_ok {
            continue;
        }

        let rel = path
            .strip_prefix(&docs_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let Some((file_type, database, schema, table, domain)) = classify_path(&rel) else {
            warn!(path = %rel, "unclassifiable artifact excluded from manifest");
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %rel, err = %e, "stat failed, excluding file");
                continue;
            }
        };
        let content_hash = match sha256_file(path) {
            Ok(h) => h,
            Err(e) => {
                warn!(path = %rel, err = %e, "hash failed, excluding file");
                continue;
            }
        };
        let modified_at: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        indexable_files.push(IndexableFile {
            path: rel,
            file_type,
            database,
            schema,
            table,
            domain,
            content_hash,
            size_bytes: metadata.len(),
            modified_at,
        });
    }

    indexable_files.sort_by(|a, b| a.path.cmp(&b.path));

    // Per-database aggregates.
    let mut db_counts: BTreeMap<String, usize> = BTreeMap::new();
    for file in &indexable_files {
        *db_counts.entry(file.database.clone()).or_default() += 1;
    }
    let databases = db_counts
        .into_iter()
        .map(|(name, file_count)| ManifestDatabase { name, file_count })
        .collect();

    // Per-work-unit aggregates with output hashes.
    let status_by_unit: HashMap<&str, WorkUnitStatus> =
        unit_progress.iter().map(|p| (p.id.as_str(), p.status)).collect();
    let work_units = plan
        .work_units
        .iter()
        .map(|unit| {
            let prefix = format!("{}/", unit.output_directory);
            let files: Vec<(String, String)> = indexable_files
                .iter()
                .filter(|f| f.path.starts_with(&prefix))
                .map(|f| (f.path.clone(), f.content_hash.clone()))
                .collect();
            ManifestWorkUnit {
                id: unit.id.clone(),
                status: status_by_unit
                    .get(unit.id.as_str())
                    .copied()
                    .unwrap_or(WorkUnitStatus::Pending),
                file_count: files.len(),
                output_hash: output_hash(files),
            }
        })
        .collect();

    let manifest = Manifest {
        schema_version: SCHEMA_VERSION.to_string(),
        completed_at: Utc::now(),
        plan_hash: plan_hash.to_string(),
        status: if overall == RunStatus::Completed {
            ManifestStatus::Complete
        } else {
            ManifestStatus::Partial
        },
        databases,
        work_units,
        total_files: indexable_files.len(),
        indexable_files,
    };

    let bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| {
        AgentError::new(ErrorCode::DocManifestWriteFailed, format!("Manifest serialization: {}", e))
    })?;
    atomic_write(&config.manifest_path(), &bytes).map_err(|e| {
        AgentError::new(ErrorCode::DocManifestWriteFailed, format!("Manifest write: {}", e))
    })?;

    Ok(manifest)
}

/// A manifest entry verified against the filesystem.
pub struct ValidatedFile {
    pub file: IndexableFile,
    /// Hash of the bytes currently on disk.
    pub actual_hash: String,
    /// Stored hash no longer matches the file (present but changed).
    pub changed: bool,
}

/// Load the manifest and verify the listed files. Missing files are excluded
/// from the working set; changed files are flagged and re-index.
pub fn validate_manifest(config: &Config) -> AgentResult<(Manifest, Vec<ValidatedFile>)> {
    let path = config.manifest_path();
    let bytes = std::fs::read(&path).map_err(|e| {
        AgentError::new(
            ErrorCode::IdxManifestNotFound,
            format!("Manifest not found at {}: {}", path.display(), e),
        )
    })?;

    let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| {
        AgentError::new(ErrorCode::IdxManifestInvalid, format!("Manifest is not valid JSON: {}", e))
    })?;

    if manifest.schema_version != SCHEMA_VERSION {
        return Err(AgentError::new(
            ErrorCode::IdxManifestInvalid,
            format!("Unsupported manifest schema_version '{}'", manifest.schema_version),
        ));
    }
    if manifest.indexable_files.is_empty() {
        return Err(AgentError::new(
            ErrorCode::IdxManifestInvalid,
            "Manifest lists no indexable files",
        ));
    }

    let docs_root = config.docs_root();
    let mut validated = Vec::new();
    for file in &manifest.indexable_files {
        let full = docs_root.join(&file.path);
        if !full.is_file() {
            warn!(path = %file.path, "manifest file missing on disk, excluding");
            continue;
        }
        match sha256_file(&full) {
            Ok(actual_hash) => {
                let changed = actual_hash != file.content_hash;
                if changed {
                    warn!(path = %file.path, "content hash mismatch, treating as changed");
                }
                validated.push(ValidatedFile { file: file.clone(), actual_hash, changed });
            }
            Err(e) => {
                warn!(path = %file.path, err = %e, "unreadable file excluded");
            }
        }
    }

    Ok((manifest, validated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_table_paths() {
        let (ty, db, schema, table, domain) =
            classify_path("databases/shop/domains/orders/tables/public.orders.md").unwrap();
        assert_eq!(ty, FileType::Table);
        assert_eq!(db, "shop");
        assert_eq!(schema.as_deref(), Some("public"));
        assert_eq!(table.as_deref(), Some("orders"));
        assert_eq!(domain.as_deref(), Some("orders"));
    }

    #[test]
    fn classify_table_json_twin() {
        let (ty, _, _, table, _) =
            classify_path("databases/shop/domains/orders/tables/public.orders.json").unwrap();
        assert_eq!(ty, FileType::Table);
        assert_eq!(table.as_deref(), Some("orders"));
    }

    #[test]
    fn classify_domain_overview_relationship() {
        assert_eq!(
            classify_path("databases/shop/domains/orders/README.md").unwrap().0,
            FileType::Domain
        );
        assert_eq!(
            classify_path("databases/shop/overview.md").unwrap().0,
            FileType::Overview
        );
        assert_eq!(
            classify_path("databases/shop/relationships/fk.md").unwrap().0,
            FileType::Relationship
        );
    }

    #[test]
    fn classify_rejects_foreign_paths() {
        assert!(classify_path("random/notes.md").is_none());
        assert!(classify_path("databases").is_none());
    }

    #[test]
    fn table_with_dotted_table_name() {
        // First dot separates schema from table; the rest stays in the table.
        let (_, _, schema, table, _) =
            classify_path("databases/d/domains/x/tables/main.v1.events.md").unwrap();
        assert_eq!(schema.as_deref(), Some("main"));
        assert_eq!(table.as_deref(), Some("v1.events"));
    }
}
