//! Manifest-driven index build: validate → parse → embed → index →
//! relationships → optimize, with hash-based incremental change detection.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::checkpoint::save_indexer_progress;
use crate::config::Config;
use crate::embedding::embed_texts;
use crate::hash::sha256_file;
use crate::index_store::IndexStore;
use crate::manifest::{validate_manifest, ValidatedFile};
use crate::models::{DocType, FileType, IndexDocument, IndexPhase, IndexerProgress};
use crate::parse::{parse_artifact, FkEdge};
use crate::relationships::build_relationships;

#[derive(Debug, Clone, Default)]
pub struct IndexerOptions {
    pub incremental: bool,
    pub resume: bool,
    pub force: bool,
    pub skip_embeddings: bool,
    pub dry_run: bool,
    pub work_unit: Option<String>,
}

/// Partition of the manifest's working set against the current index.
#[derive(Debug, Default)]
struct ChangeSet {
    new: Vec<usize>,
    changed: Vec<usize>,
    unchanged: Vec<usize>,
    deleted: Vec<String>,
}

pub async fn run_indexer(config: &Config, options: IndexerOptions) -> Result<()> {
    // Read the prior checkpoint before the first write clobbers it.
    let prior = crate::checkpoint::load_indexer_progress(config);

    let mut progress = IndexerProgress {
        phase: IndexPhase::Validating,
        manifest_hash: String::new(),
        files_total: 0,
        files_indexed: 0,
        started_at: Utc::now(),
        last_checkpoint: Utc::now(),
    };

    // ---- validating ----
    let (manifest, mut validated) = validate_manifest(config).map_err(|e| anyhow::anyhow!("{}", e))?;
    progress.manifest_hash = sha256_file(&config.manifest_path()).unwrap_or_default();

    if options.resume {
        if let Some(prior) = &prior {
            if prior.manifest_hash == progress.manifest_hash && prior.phase == IndexPhase::Done {
                println!("index");
                println!("  already indexed for this manifest");
                println!("ok");
                return Ok(());
            }
        }
    }
    save_indexer_progress(config, &mut progress);

    if let Some(unit) = &options.work_unit {
        validated.retain(|v| {
            v.file
                .domain
                .as_ref()
                .map(|d| format!("{}_{}", v.file.database, d) == *unit)
                .unwrap_or(false)
        });
        info!(unit = %unit, files = validated.len(), "restricted to one work unit");
    }

    // The Markdown artifact is the document source; a JSON twin alongside it
    // is the machine copy and produces no separate document.
    let sources = document_sources(&validated);
    progress.files_total = sources.len();

    let index_exists = config.indexer.index_path.is_file();
    let store = if options.dry_run && !index_exists {
        None
    } else {
        Some(IndexStore::open(&config.indexer.index_path, options.force && !options.dry_run).await?)
    };
    let stored = match &store {
        Some(s) => s.stored_docs().await?,
        None => HashMap::new(),
    };

    // ---- change detection ----
    let mut changes = ChangeSet::default();
    let mut manifest_paths: HashSet<&str> = HashSet::new();
    for (i, source) in sources.iter().enumerate() {
        manifest_paths.insert(source.file.path.as_str());
        match stored.get(&source.file.path) {
            None => changes.new.push(i),
            Some(doc) if doc.content_hash != source.actual_hash => changes.changed.push(i),
            Some(_) if source.changed => changes.changed.push(i),
            Some(_) => changes.unchanged.push(i),
        }
    }
    // Rows outside the selected work unit are left alone; only a full-scope
    // run may delete.
    if options.work_unit.is_none() {
        for path in stored.keys() {
            if !manifest_paths.contains(path.as_str()) {
                changes.deleted.push(path.clone());
            }
        }
        changes.deleted.sort();
    }

    let to_process: Vec<usize> = if options.incremental {
        changes.new.iter().chain(changes.changed.iter()).copied().collect()
    } else {
        (0..sources.len()).collect()
    };

    if options.dry_run {
        println!("index (dry-run)");
        print_changes(&changes, sources.len());
        println!("  would process: {} files", to_process.len());
        println!("ok");
        if let Some(store) = store {
            store.close().await;
        }
        return Ok(());
    }
    let store = store.expect("store is opened for non-dry runs");

    // ---- parsing ----
    progress.phase = IndexPhase::Parsing;
    save_indexer_progress(config, &mut progress);

    let docs_root = config.docs_root();
    let mut documents: Vec<IndexDocument> = Vec::new();
    let mut edges_by_db: BTreeMap<String, Vec<FkEdge>> = BTreeMap::new();
    let mut parse_failures = 0usize;
    let mut table_docs_touched = changes.deleted.iter().any(|p| p.contains("/tables/"));

    for &i in &to_process {
        let source = &sources[i];
        let full = docs_root.join(&source.file.path);
        let text = match std::fs::read_to_string(&full) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %source.file.path, err = %e, "unreadable artifact skipped");
                parse_failures += 1;
                continue;
            }
        };
        match parse_artifact(&source.file, &source.actual_hash, &text) {
            Ok(parsed) => {
                if source.file.file_type == FileType::Table {
                    table_docs_touched = true;
                }
                documents.extend(parsed.documents);
                for edge in parsed.fk_edges {
                    edges_by_db.entry(edge.database.clone()).or_default().push(edge);
                }
            }
            Err(e) => {
                warn!(path = %source.file.path, err = %e, "artifact parse failed");
                parse_failures += 1;
            }
        }
        progress.files_indexed += 1;
        if progress.files_indexed % 25 == 0 {
            save_indexer_progress(config, &mut progress);
        }
    }

    // Relationships rebuild needs edges from the unchanged table docs too.
    let rebuild_relationships = !options.incremental || table_docs_touched;
    if rebuild_relationships && options.incremental {
        for &i in &changes.unchanged {
            let source = &sources[i];
            if source.file.file_type != FileType::Table {
                continue;
            }
            let full = docs_root.join(&source.file.path);
            let Ok(text) = std::fs::read_to_string(&full) else { continue };
            if let Ok(parsed) = parse_artifact(&source.file, &source.actual_hash, &text) {
                for edge in parsed.fk_edges {
                    edges_by_db.entry(edge.database.clone()).or_default().push(edge);
                }
            }
        }
    }

    // ---- embedding ----
    progress.phase = IndexPhase::Embedding;
    save_indexer_progress(config, &mut progress);

    let mut embeddings: HashMap<String, Vec<f32>> = HashMap::new();
    if !options.skip_embeddings && config.embedding.is_enabled() && !documents.is_empty() {
        let identities: Vec<String> = documents.iter().map(|d| d.identity()).collect();
        let texts: Vec<String> = documents.iter().map(compose_embedding_text).collect();
        match embed_texts(&config.embedding, &texts).await {
            Ok(vectors) => {
                for (identity, vector) in identities.into_iter().zip(vectors) {
                    if let Some(vector) = vector {
                        embeddings.insert(identity, vector);
                    }
                }
            }
            Err(e) => {
                // Missing embeddings must never block indexing.
                warn!(err = %e, "embedding generation failed, indexing without vectors");
            }
        }
    }

    // ---- indexing ----
    progress.phase = IndexPhase::Indexing;
    save_indexer_progress(config, &mut progress);

    sort_parents_first(&mut documents);
    let mut counts = store.populate(&documents, &embeddings).await?;
    for path in &changes.deleted {
        match store.delete_document(path).await {
            Ok(removed) if removed > 0 => counts.deleted += 1,
            Ok(_) => {}
            Err(e) => warn!(path = %path, err = %e, "delete failed"),
        }
    }
    store.rebuild_keyword_cache(&documents).await?;

    // ---- relationships ----
    progress.phase = IndexPhase::Relationships;
    save_indexer_progress(config, &mut progress);

    let mut relationship_count = 0usize;
    if rebuild_relationships {
        for (database, edges) in &edges_by_db {
            let rows = build_relationships(edges, config.indexer.max_hops);
            relationship_count += rows.len();
            store.replace_relationships(database, &rows).await?;
        }
    }

    store.set_metadata("plan_hash", &manifest.plan_hash).await?;
    store.set_metadata("manifest_hash", &progress.manifest_hash).await?;
    store.set_metadata("indexed_at", &Utc::now().to_rfc3339()).await?;

    // ---- optimizing (best effort) ----
    progress.phase = IndexPhase::Optimizing;
    save_indexer_progress(config, &mut progress);
    if let Err(e) = store.optimize().await {
        warn!(err = %e, "index optimization failed, continuing");
    }

    progress.phase = IndexPhase::Done;
    save_indexer_progress(config, &mut progress);

    println!("index");
    print_changes(&changes, sources.len());
    println!("  documents inserted: {}", counts.inserted);
    println!("  documents updated: {}", counts.updated);
    println!("  documents deleted: {}", counts.deleted);
    println!("  vectors written: {}", counts.vectors_written);
    if rebuild_relationships {
        println!("  relationships: {}", relationship_count);
    }
    if parse_failures > 0 {
        println!("  parse failures: {}", parse_failures);
    }
    println!("ok");

    store.close().await;
    Ok(())
}

fn print_changes(changes: &ChangeSet, total: usize) {
    println!("  files: {}", total);
    println!(
        "  new: {}, changed: {}, deleted: {}, unchanged: {}",
        changes.new.len(),
        changes.changed.len(),
        changes.deleted.len(),
        changes.unchanged.len()
    );
}

/// Keep the document-producing subset of the manifest: everything except a
/// table's `.json` twin when its `.md` sibling is also present.
fn document_sources(validated: &[ValidatedFile]) -> Vec<&ValidatedFile> {
    let md_tables: HashSet<&str> = validated
        .iter()
        .filter(|v| v.file.file_type == FileType::Table && v.file.path.ends_with(".md"))
        .map(|v| v.file.path.strip_suffix(".md").unwrap_or(&v.file.path))
        .collect();

    validated
        .iter()
        .filter(|v| {
            if v.file.file_type != FileType::Table || v.file.path.ends_with(".md") {
                return true;
            }
            let stem = v.file.path.strip_suffix(".json").unwrap_or(&v.file.path);
            !md_tables.contains(stem)
        })
        .collect()
}

/// Parent entities precede dependents: tables → domains → overviews →
/// relationships → columns.
fn sort_parents_first(documents: &mut [IndexDocument]) {
    fn rank(doc_type: DocType) -> u8 {
        match doc_type {
            DocType::Table => 0,
            DocType::Domain => 1,
            DocType::Overview => 2,
            DocType::Relationship => 3,
            DocType::Column => 4,
        }
    }
    documents.sort_by(|a, b| {
        rank(a.doc_type)
            .cmp(&rank(b.doc_type))
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
}

/// Per-type embedding text: structured fields plus keywords.
fn compose_embedding_text(doc: &IndexDocument) -> String {
    let keywords = doc.keywords.join(", ");
    match doc.doc_type {
        DocType::Table => format!(
            "Table {} in database {}. {} Keywords: {}",
            doc.table.as_deref().unwrap_or(""),
            doc.database,
            doc.summary,
            keywords
        ),
        DocType::Column => format!(
            "Column {} of table {} in database {}. {} Keywords: {}",
            doc.column.as_deref().unwrap_or(""),
            doc.table.as_deref().unwrap_or(""),
            doc.database,
            doc.summary,
            keywords
        ),
        DocType::Domain => format!(
            "Domain {} in database {}. {} Keywords: {}",
            doc.domain.as_deref().unwrap_or(""),
            doc.database,
            doc.summary,
            keywords
        ),
        DocType::Relationship => format!(
            "Relationship {} in database {}. {} Keywords: {}",
            doc.table.as_deref().unwrap_or(""),
            doc.database,
            doc.summary,
            keywords
        ),
        DocType::Overview => format!(
            "Overview of database {}. {} Keywords: {}",
            doc.database, doc.summary, keywords
        ),
    }
}

/// `--stats`: index contents at a glance.
pub async fn run_indexer_stats(config: &Config) -> Result<()> {
    let store = IndexStore::open(&config.indexer.index_path, false).await?;
    let stats = store.stats().await?;

    println!("index stats");
    println!("  path: {}", config.indexer.index_path.display());
    let size = std::fs::metadata(&config.indexer.index_path).map(|m| m.len()).unwrap_or(0);
    println!("  size bytes: {}", size);
    println!("  documents: {}", stats.total_documents);
    for (doc_type, count) in &stats.documents_by_type {
        println!("    {}: {}", doc_type, count);
    }
    println!("  vectors: {}", stats.total_vectors);
    println!("  relationships: {}", stats.total_relationships);
    for (hops, count) in &stats.relationships_by_hop {
        println!("    {} hop: {}", hops, count);
    }
    if let Some(indexed_at) = store.get_metadata("indexed_at").await? {
        println!("  last indexed: {}", indexed_at);
    }
    println!("ok");

    store.close().await;
    Ok(())
}

/// `--verify`: re-check manifest hashes and index integrity without writing.
pub async fn run_indexer_verify(config: &Config) -> Result<()> {
    let (manifest, validated) = validate_manifest(config).map_err(|e| anyhow::anyhow!("{}", e))?;

    let missing = manifest.total_files.saturating_sub(validated.len());
    let drifted = validated.iter().filter(|v| v.changed).count();

    if !config.indexer.index_path.is_file() {
        anyhow::bail!("index not found; run `dbscribe index` first");
    }
    let store = IndexStore::open(&config.indexer.index_path, false)
        .await
        .context("failed to open index")?;
    let stats = store.stats().await?;
    let orphans = store.orphan_columns().await?;
    let stored = store.stored_docs().await?;

    let sources = document_sources(&validated);
    let unindexed = sources.iter().filter(|s| !stored.contains_key(&s.file.path)).count();

    println!("index verify");
    println!("  manifest files: {}", manifest.total_files);
    println!("  missing on disk: {}", missing);
    println!("  hash drift: {}", drifted);
    println!("  indexed documents: {}", stats.total_documents);
    println!("  manifest files not indexed: {}", unindexed);
    println!("  orphan column documents: {}", orphans);
    let healthy = missing == 0 && drifted == 0 && unindexed == 0 && orphans == 0;
    println!("{}", if healthy { "ok" } else { "verify found issues" });

    store.close().await;
    if healthy {
        Ok(())
    } else {
        anyhow::bail!("index verification found issues")
    }
}
