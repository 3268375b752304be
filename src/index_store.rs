//! On-disk search index over SQLite: documents, trigger-synced FTS5,
//! vector blobs, relationships, and provenance metadata.
//!
//! Deletion of a document cascades to its vector row and, via
//! `parent_doc_id`, to its column rows. The physical schema mirrors the
//! logical one the rest of the pipeline depends on; nothing outside this
//! module issues SQL against the index.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, warn};

use crate::embedding::vec_to_blob;
use crate::models::IndexDocument;
use crate::relationships::RelationshipRow;

pub struct IndexStore {
    pool: SqlitePool,
}

/// Counters for one population pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PopulateCounts {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub vectors_written: u64,
    pub parents_unresolved: u64,
}

#[derive(Debug, Default)]
pub struct IndexStats {
    pub documents_by_type: Vec<(String, i64)>,
    pub relationships_by_hop: Vec<(i64, i64)>,
    pub total_documents: i64,
    pub total_vectors: i64,
    pub total_relationships: i64,
}

/// Existing row snapshot used for incremental change detection.
#[derive(Debug, Clone)]
pub struct StoredDoc {
    pub id: i64,
    pub content_hash: String,
}

impl IndexStore {
    /// Open (and migrate) the index. `force` clears all prior state.
    pub async fn open(path: &Path, force: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create index directory {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        if force {
            store.clear().await?;
        }
        Ok(store)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_type TEXT NOT NULL,
                database_name TEXT NOT NULL,
                schema_name TEXT,
                table_name TEXT,
                column_name TEXT,
                domain TEXT,
                content TEXT NOT NULL,
                summary TEXT NOT NULL,
                keywords TEXT NOT NULL DEFAULT '[]',
                file_path TEXT NOT NULL UNIQUE,
                content_hash TEXT NOT NULL,
                source_modified_at TEXT NOT NULL,
                parent_doc_id INTEGER REFERENCES documents(id),
                indexed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'documents_fts'",
        )
        .fetch_one(&self.pool)
        .await?;
        if !fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE documents_fts USING fts5(
                    content, summary, keywords,
                    content='documents', content_rowid='id',
                    tokenize='porter unicode61'
                )
                "#,
            )
            .execute(&self.pool)
            .await?;

            // Trigger-style sync between documents and the full-text index.
            sqlx::query(
                r#"
                CREATE TRIGGER documents_ai AFTER INSERT ON documents BEGIN
                    INSERT INTO documents_fts(rowid, content, summary, keywords)
                    VALUES (new.id, new.content, new.summary, new.keywords);
                END
                "#,
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                r#"
                CREATE TRIGGER documents_ad AFTER DELETE ON documents BEGIN
                    INSERT INTO documents_fts(documents_fts, rowid, content, summary, keywords)
                    VALUES ('delete', old.id, old.content, old.summary, old.keywords);
                END
                "#,
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                r#"
                CREATE TRIGGER documents_au AFTER UPDATE ON documents BEGIN
                    INSERT INTO documents_fts(documents_fts, rowid, content, summary, keywords)
                    VALUES ('delete', old.id, old.content, old.summary, old.keywords);
                    INSERT INTO documents_fts(rowid, content, summary, keywords)
                    VALUES (new.id, new.content, new.summary, new.keywords);
                END
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents_vec (
                doc_id INTEGER PRIMARY KEY REFERENCES documents(id),
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                database_name TEXT NOT NULL,
                source_schema TEXT NOT NULL,
                source_table TEXT NOT NULL,
                source_column TEXT NOT NULL,
                target_schema TEXT NOT NULL,
                target_table TEXT NOT NULL,
                target_column TEXT NOT NULL,
                relationship_type TEXT NOT NULL,
                hop_count INTEGER NOT NULL,
                join_expression TEXT NOT NULL,
                confidence REAL NOT NULL,
                UNIQUE(database_name, source_schema, source_table, source_column,
                       target_schema, target_table, target_column)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS keywords (
                term TEXT NOT NULL,
                source_type TEXT NOT NULL,
                frequency INTEGER NOT NULL,
                PRIMARY KEY (term, source_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent_doc_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_identity
             ON documents(database_name, schema_name, table_name, column_name)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        for table in ["documents_vec", "relationships", "keywords", "index_metadata"] {
            sqlx::query(&format!("DELETE FROM {}", table)).execute(&self.pool).await?;
        }
        // Children first so the self-referencing parent FK stays satisfied.
        sqlx::query("DELETE FROM documents WHERE parent_doc_id IS NOT NULL")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM documents").execute(&self.pool).await?;
        Ok(())
    }

    /// Snapshot of every file-backed document (column docs excluded) for
    /// incremental change detection.
    pub async fn stored_docs(&self) -> Result<HashMap<String, StoredDoc>> {
        let rows = sqlx::query(
            "SELECT id, file_path, content_hash FROM documents WHERE parent_doc_id IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let path: String = row.get("file_path");
                (
                    path,
                    StoredDoc { id: row.get("id"), content_hash: row.get("content_hash") },
                )
            })
            .collect())
    }

    /// Upsert documents (sorted parents-first by the caller) and their
    /// vectors in a single transaction. `embeddings` is keyed by document
    /// identity.
    pub async fn populate(
        &self,
        documents: &[IndexDocument],
        embeddings: &HashMap<String, Vec<f32>>,
    ) -> Result<PopulateCounts> {
        let mut counts = PopulateCounts::default();
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        // Parent ids resolved within this same transaction; tables come
        // before their columns in the input ordering.
        let mut ids_by_path: HashMap<String, i64> = HashMap::new();

        for doc in documents {
            let parent_doc_id = match &doc.parent_table_path {
                Some(parent_path) => {
                    let id = match ids_by_path.get(parent_path) {
                        Some(id) => Some(*id),
                        None => {
                            sqlx::query_scalar::<_, i64>(
                                "SELECT id FROM documents WHERE file_path = ?",
                            )
                            .bind(parent_path)
                            .fetch_optional(&mut *tx)
                            .await?
                        }
                    };
                    if id.is_none() {
                        warn!(column = %doc.file_path, parent = %parent_path, "parent table document not found, indexing column without linkage");
                        counts.parents_unresolved += 1;
                    }
                    id
                }
                None => None,
            };

            let existing: Option<i64> =
                sqlx::query_scalar("SELECT id FROM documents WHERE file_path = ?")
                    .bind(&doc.file_path)
                    .fetch_optional(&mut *tx)
                    .await?;

            let keywords_json = serde_json::to_string(&doc.keywords).unwrap_or_else(|_| "[]".into());
            sqlx::query(
                r#"
                INSERT INTO documents (
                    doc_type, database_name, schema_name, table_name, column_name, domain,
                    content, summary, keywords, file_path, content_hash,
                    source_modified_at, parent_doc_id, indexed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(file_path) DO UPDATE SET
                    doc_type = excluded.doc_type,
                    database_name = excluded.database_name,
                    schema_name = excluded.schema_name,
                    table_name = excluded.table_name,
                    column_name = excluded.column_name,
                    domain = excluded.domain,
                    content = excluded.content,
                    summary = excluded.summary,
                    keywords = excluded.keywords,
                    content_hash = excluded.content_hash,
                    source_modified_at = excluded.source_modified_at,
                    parent_doc_id = excluded.parent_doc_id,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(doc.doc_type.as_str())
            .bind(&doc.database)
            .bind(&doc.schema)
            .bind(&doc.table)
            .bind(&doc.column)
            .bind(&doc.domain)
            .bind(&doc.content)
            .bind(&doc.summary)
            .bind(&keywords_json)
            .bind(&doc.file_path)
            .bind(&doc.content_hash)
            .bind(doc.source_modified_at.to_rfc3339())
            .bind(parent_doc_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            let id: i64 = sqlx::query_scalar("SELECT id FROM documents WHERE file_path = ?")
                .bind(&doc.file_path)
                .fetch_one(&mut *tx)
                .await?;
            ids_by_path.insert(doc.file_path.clone(), id);

            if existing.is_some() {
                counts.updated += 1;
            } else {
                counts.inserted += 1;
            }

            // Vector row follows the document: present embedding upserts,
            // missing embedding deletes any stale row.
            match embeddings.get(&doc.identity()) {
                Some(vector) if !vector.is_empty() => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents_vec (doc_id, embedding) VALUES (?, ?)
                        ON CONFLICT(doc_id) DO UPDATE SET embedding = excluded.embedding
                        "#,
                    )
                    .bind(id)
                    .bind(vec_to_blob(vector))
                    .execute(&mut *tx)
                    .await?;
                    counts.vectors_written += 1;
                }
                _ => {
                    sqlx::query("DELETE FROM documents_vec WHERE doc_id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(counts)
    }

    /// Delete a file-backed document, cascading to its column rows and all
    /// affected vectors. Returns the number of document rows removed.
    pub async fn delete_document(&self, file_path: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let Some(id) = sqlx::query_scalar::<_, i64>("SELECT id FROM documents WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.commit().await?;
            return Ok(0);
        };

        sqlx::query(
            "DELETE FROM documents_vec WHERE doc_id IN
             (SELECT id FROM documents WHERE parent_doc_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let children = sqlx::query("DELETE FROM documents WHERE parent_doc_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM documents_vec WHERE doc_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(path = file_path, children, "deleted document with cascade");
        Ok(children + 1)
    }

    /// Replace all relationship rows for one database.
    pub async fn replace_relationships(
        &self,
        database: &str,
        rows: &[RelationshipRow],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM relationships WHERE database_name = ?")
            .bind(database)
            .execute(&mut *tx)
            .await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO relationships (
                    database_name, source_schema, source_table, source_column,
                    target_schema, target_table, target_column,
                    relationship_type, hop_count, join_expression, confidence
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&row.database)
            .bind(&row.source_schema)
            .bind(&row.source_table)
            .bind(&row.source_column)
            .bind(&row.target_schema)
            .bind(&row.target_table)
            .bind(&row.target_column)
            .bind(&row.relationship_type)
            .bind(row.hop_count as i64)
            .bind(&row.join_expression)
            .bind(row.confidence)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Refresh the optional keyword frequency cache from the documents.
    pub async fn rebuild_keyword_cache(&self, documents: &[IndexDocument]) -> Result<()> {
        let mut frequencies: HashMap<(String, &'static str), i64> = HashMap::new();
        for doc in documents {
            for keyword in &doc.keywords {
                *frequencies
                    .entry((keyword.clone(), doc.doc_type.as_str()))
                    .or_default() += 1;
            }
        }
        let mut tx = self.pool.begin().await?;
        for ((term, source_type), frequency) in frequencies {
            sqlx::query(
                r#"
                INSERT INTO keywords (term, source_type, frequency) VALUES (?, ?, ?)
                ON CONFLICT(term, source_type) DO UPDATE SET frequency = excluded.frequency
                "#,
            )
            .bind(&term)
            .bind(source_type)
            .bind(frequency)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_metadata (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT value FROM index_metadata WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Rebuild FTS, recompute statistics, compact. Callers treat failure as
    /// non-fatal.
    pub async fn optimize(&self) -> Result<()> {
        sqlx::query("INSERT INTO documents_fts(documents_fts) VALUES ('rebuild')")
            .execute(&self.pool)
            .await?;
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let mut stats = IndexStats::default();

        let rows = sqlx::query(
            "SELECT doc_type, COUNT(*) AS n FROM documents GROUP BY doc_type ORDER BY doc_type",
        )
        .fetch_all(&self.pool)
        .await?;
        stats.documents_by_type =
            rows.iter().map(|r| (r.get::<String, _>("doc_type"), r.get::<i64, _>("n"))).collect();

        let rows = sqlx::query(
            "SELECT hop_count, COUNT(*) AS n FROM relationships GROUP BY hop_count ORDER BY hop_count",
        )
        .fetch_all(&self.pool)
        .await?;
        stats.relationships_by_hop =
            rows.iter().map(|r| (r.get::<i64, _>("hop_count"), r.get::<i64, _>("n"))).collect();

        stats.total_documents = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        stats.total_vectors = sqlx::query_scalar("SELECT COUNT(*) FROM documents_vec")
            .fetch_one(&self.pool)
            .await?;
        stats.total_relationships = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
            .fetch_one(&self.pool)
            .await?;

        Ok(stats)
    }

    /// Parent linkage check used by `--verify` and the test suite: every
    /// column document must point at a table document with matching
    /// database/schema/table.
    pub async fn orphan_columns(&self) -> Result<i64> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM documents c
            WHERE c.doc_type = 'column' AND (
                c.parent_doc_id IS NULL OR NOT EXISTS (
                    SELECT 1 FROM documents t
                    WHERE t.id = c.parent_doc_id
                      AND t.doc_type = 'table'
                      AND t.database_name = c.database_name
                      AND t.schema_name IS c.schema_name
                      AND t.table_name IS c.table_name
                )
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?)
    }

    /// Full-text search over `(content, summary, keywords)`. Used by
    /// `--verify` smoke checks and exposed for downstream consumers.
    pub async fn search_fulltext(&self, query: &str, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT d.file_path
            FROM documents_fts
            JOIN documents d ON d.id = documents_fts.rowid
            WHERE documents_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("file_path")).collect())
    }
}
