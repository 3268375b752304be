//! Canonical hashing for plans, schemas, and artifacts.
//!
//! Everything that participates in staleness or change detection hashes the
//! same way: lowercase hex SHA-256. "Canonical" means the serde_json encoding
//! of the typed value, which is deterministic because struct field order is
//! fixed at compile time.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::models::TableMetadata;

/// 64 zeros, used as the output hash of an empty work unit.
pub const EMPTY_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

/// Hash of a table's full metadata; persisted into the plan as
/// `TableSpec.metadata_hash`.
pub fn metadata_hash(meta: &TableMetadata) -> String {
    let canonical = serde_json::to_string(meta).unwrap_or_default();
    sha256_hex(canonical.as_bytes())
}

/// Structural hash of a database: sorted `(table, column, type, nullable)`
/// tuples. Used for staleness detection without full metadata extraction.
pub fn schema_hash(tables: &[TableMetadata]) -> String {
    let mut tuples: Vec<String> = tables
        .iter()
        .flat_map(|t| {
            t.columns.iter().map(move |c| {
                format!("{}\x1f{}\x1f{}\x1f{}", t.table, c.name, c.data_type, c.nullable)
            })
        })
        .collect();
    tuples.sort();
    sha256_hex(tuples.join("\x1e").as_bytes())
}

/// Work-unit content hash: SHA-256 over the ordered list of per-table
/// metadata hashes.
pub fn content_hash_of(metadata_hashes: &[String]) -> String {
    sha256_hex(metadata_hashes.join("").as_bytes())
}

/// Per-work-unit output hash: concatenated artifact content hashes sorted by
/// path. 64 zeros when the unit produced no files.
pub fn output_hash(mut hashes_by_path: Vec<(String, String)>) -> String {
    if hashes_by_path.is_empty() {
        return EMPTY_HASH.to_string();
    }
    hashes_by_path.sort_by(|a, b| a.0.cmp(&b.0));
    let concatenated: String = hashes_by_path.into_iter().map(|(_, h)| h).collect();
    sha256_hex(concatenated.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnMetadata;

    fn table(name: &str, cols: &[(&str, &str, bool)]) -> TableMetadata {
        TableMetadata {
            schema: "main".into(),
            table: name.into(),
            columns: cols
                .iter()
                .map(|(n, t, null)| ColumnMetadata {
                    name: n.to_string(),
                    data_type: t.to_string(),
                    nullable: *null,
                    default: None,
                    comment: None,
                })
                .collect(),
            primary_key: vec![],
            foreign_keys: vec![],
            indexes: vec![],
            row_count_approx: 0,
            comment: None,
        }
    }

    #[test]
    fn sha256_is_lowercase_hex_64() {
        let h = sha256_hex(b"hello");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn schema_hash_ignores_table_order() {
        let a = table("users", &[("id", "INTEGER", false)]);
        let b = table("orders", &[("id", "INTEGER", false)]);
        assert_eq!(
            schema_hash(&[a.clone(), b.clone()]),
            schema_hash(&[b, a])
        );
    }

    #[test]
    fn schema_hash_sees_nullability_changes() {
        let a = table("users", &[("id", "INTEGER", false)]);
        let b = table("users", &[("id", "INTEGER", true)]);
        assert_ne!(schema_hash(&[a]), schema_hash(&[b]));
    }

    #[test]
    fn metadata_hash_is_stable() {
        let t = table("users", &[("id", "INTEGER", false), ("email", "TEXT", true)]);
        assert_eq!(metadata_hash(&t), metadata_hash(&t.clone()));
    }

    #[test]
    fn empty_output_hash_is_zeros() {
        assert_eq!(output_hash(vec![]), EMPTY_HASH);
        assert_eq!(EMPTY_HASH.len(), 64);
    }

    #[test]
    fn output_hash_sorts_by_path() {
        let a = vec![
            ("b.md".to_string(), "22".to_string()),
            ("a.md".to_string(), "11".to_string()),
        ];
        let b = vec![
            ("a.md".to_string(), "11".to_string()),
            ("b.md".to_string(), "22".to_string()),
        ];
        assert_eq!(output_hash(a), output_hash(b));
    }
}
