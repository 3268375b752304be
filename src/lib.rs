//! # dbscribe
//!
//! **An automated pipeline that turns relational database schemas into
//! searchable semantic documentation.**
//!
//! Given a catalog of database connections, dbscribe discovers each schema,
//! groups tables into business domains, generates natural-language
//! descriptions of every table and column with an LLM, and loads the
//! resulting artifacts into an on-disk search index combining full-text and
//! vector search.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌──────────┐
//! │ Planner  │──▶│ Documenter  │──▶│ Indexer   │
//! │ discover │    │ sample+LLM │    │ parse+FTS │
//! └──────────┘    └────────────┘    └──────────┘
//!      plan.json      artifacts + manifest   SQLite FTS5 + vectors
//! ```
//!
//! The three stages communicate only through files on disk: the plan
//! (`progress/documentation-plan.json`), per-table Markdown/JSON artifacts
//! under the docs root, and the manifest
//! (`documentation-manifest.json`). Each stage writes an atomically
//! checkpointed progress file and can resume after interruption.
//!
//! ## Data Flow
//!
//! 1. The **planner** ([`planner`]) connects to every cataloged database via
//!    a [`catalog::CatalogConnector`], groups tables into domains (LLM with
//!    a rule-based fallback), and emits prioritized [`models::WorkUnit`]s.
//! 2. The **documenter** ([`documenter`]) executes work units serially: per
//!    table it extracts metadata, samples rows under a hard deadline, infers
//!    descriptions through context-quarantined sub-agents
//!    ([`table_doc`]), and writes artifacts atomically. A manifest
//!    ([`manifest`]) hashes everything it produced.
//! 3. The **indexer** ([`indexer`]) parses artifacts into typed documents
//!    ([`parse`]), derives keywords ([`keywords`]), batches embeddings with
//!    chunk-and-average ([`embedding`]), populates the SQLite index
//!    ([`index_store`]), and computes multi-hop join paths
//!    ([`relationships`]). Re-runs are incremental by content hash.

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod connector_sqlite;
pub mod documenter;
pub mod embedding;
pub mod error;
pub mod fsio;
pub mod hash;
pub mod index_store;
pub mod indexer;
pub mod keywords;
pub mod llm;
pub mod manifest;
pub mod models;
pub mod parse;
pub mod plan;
pub mod planner;
pub mod prompts;
pub mod relationships;
pub mod table_doc;
pub mod work_unit;
