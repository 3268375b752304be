//! Configuration parsing and validation.
//!
//! The pipeline is configured via a TOML file (default:
//! `config/dbscribe.toml`). The config defines the database catalog, planner
//! tuning, documenter batching knobs, LLM and embedding provider settings,
//! and the index location.
//!
//! # Catalog
//!
//! ```toml
//! [[databases]]
//! name = "shop"
//! engine = "sqlite"
//! connection = { path = "./data/shop.sqlite" }
//! schemas_exclude = ["archive"]
//! tables_exclude = ["_migrations", "tmp_*"]
//! ```
//!
//! Credentials never live in the config: a `connection = { env = "SHOP_DB" }`
//! entry names an environment variable resolved at connect time.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::hash::sha256_hex;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub documenter: DocumenterConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
}

/// One entry in the database catalog. Immutable during a run.
#[derive(Debug, Deserialize, Clone, serde::Serialize)]
pub struct DatabaseConfig {
    pub name: String,
    /// Engine kind. The built-in driver set currently covers `sqlite`;
    /// unknown engines are rejected by the connector factory.
    pub engine: String,
    pub connection: ConnectionRef,
    #[serde(default)]
    pub schemas_include: Option<Vec<String>>,
    #[serde(default)]
    pub schemas_exclude: Vec<String>,
    /// Glob patterns matched against bare table names.
    #[serde(default)]
    pub tables_exclude: Vec<String>,
    #[serde(default)]
    pub include_system_tables: bool,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Either an indirect credential reference (env var name) or a structured
/// per-engine bundle.
#[derive(Debug, Deserialize, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum ConnectionRef {
    Env { env: String },
    Path { path: PathBuf },
}

impl ConnectionRef {
    /// Resolve to a connection string, reading the environment for indirect
    /// references.
    pub fn resolve(&self) -> Result<String> {
        match self {
            ConnectionRef::Env { env } => std::env::var(env)
                .with_context(|| format!("Connection env var {} not set", env)),
            ConnectionRef::Path { path } => Ok(path.to_string_lossy().to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone, serde::Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_query_timeout_ms")]
    pub query_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout_ms(),
            query_ms: default_query_timeout_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_query_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlannerConfig {
    #[serde(default = "default_max_tables")]
    pub max_tables_per_database: usize,
    #[serde(default = "default_true")]
    pub domain_inference_enabled: bool,
    #[serde(default)]
    pub llm_model: Option<String>,
    /// Tables per LLM domain-inference batch.
    #[serde(default = "default_domain_batch")]
    pub batch_size: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_tables_per_database: default_max_tables(),
            domain_inference_enabled: true,
            llm_model: None,
            batch_size: default_domain_batch(),
        }
    }
}

fn default_max_tables() -> usize {
    500
}
fn default_domain_batch() -> usize {
    20
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumenterConfig {
    /// Tables processed concurrently within one work unit.
    #[serde(default = "default_table_batch")]
    pub table_batch_size: usize,
    /// Columns inferred concurrently within one table.
    #[serde(default = "default_column_batch")]
    pub column_batch_size: usize,
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    #[serde(default = "default_sample_timeout_ms")]
    pub sample_timeout_ms: u64,
    /// Checkpoint cadence within a unit, in tables.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every_tables: usize,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for DocumenterConfig {
    fn default() -> Self {
        Self {
            table_batch_size: default_table_batch(),
            column_batch_size: default_column_batch(),
            sample_rows: default_sample_rows(),
            sample_timeout_ms: default_sample_timeout_ms(),
            checkpoint_every_tables: default_checkpoint_every(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_table_batch() -> usize {
    3
}
fn default_column_batch() -> usize {
    5
}
fn default_sample_rows() -> usize {
    100
}
fn default_sample_timeout_ms() -> u64 {
    5_000
}
fn default_checkpoint_every() -> usize {
    10
}
fn default_shutdown_grace_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `api` for live providers, `disabled` for offline runs (every call
    /// fails unrecoverably and deterministic fallbacks kick in).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_anthropic_key_env")]
    pub anthropic_api_key_env: String,
    #[serde(default = "default_openai_key_env")]
    pub openai_api_key_env: String,
    #[serde(default = "default_anthropic_base")]
    pub anthropic_base_url: String,
    #[serde(default = "default_openai_base")]
    pub openai_base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            primary_model: default_primary_model(),
            fallback_model: default_fallback_model(),
            fallback_enabled: true,
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout_secs(),
            anthropic_api_key_env: default_anthropic_key_env(),
            openai_api_key_env: default_openai_key_env(),
            anthropic_base_url: default_anthropic_base(),
            openai_base_url: default_openai_base(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Apply `LLM_PRIMARY_MODEL`, `LLM_FALLBACK_MODEL`, and
    /// `LLM_FALLBACK_ENABLED` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("LLM_PRIMARY_MODEL") {
            if !model.trim().is_empty() {
                self.primary_model = model;
            }
        }
        if let Ok(model) = std::env::var("LLM_FALLBACK_MODEL") {
            if !model.trim().is_empty() {
                self.fallback_model = model;
            }
        }
        if let Ok(flag) = std::env::var("LLM_FALLBACK_ENABLED") {
            self.fallback_enabled = flag != "false";
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_primary_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_fallback_model() -> String {
    "gpt-4o".to_string()
}
fn default_llm_retries() -> u32 {
    2
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_anthropic_base() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openai_base() -> String {
    "https://api.openai.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub dims: usize,
    /// Inputs longer than this are chunked and the chunk vectors averaged.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Cumulative character budget per API batch.
    #[serde(default = "default_batch_char_budget")]
    pub batch_char_budget: usize,
    /// Pause between batches.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            max_input_chars: default_max_input_chars(),
            batch_char_budget: default_batch_char_budget(),
            pacing_ms: default_pacing_ms(),
            timeout_secs: default_embed_timeout_secs(),
            api_key_env: default_openai_key_env(),
            base_url: default_openai_base(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dims() -> usize {
    1536
}
fn default_max_input_chars() -> usize {
    30_000
}
fn default_batch_char_budget() -> usize {
    80_000
}
fn default_pacing_ms() -> u64 {
    100
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            max_hops: default_max_hops(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("data/index.sqlite")
}
fn default_max_hops() -> u32 {
    3
}

impl Config {
    /// Base directory for plan and progress files. `TEST_PROGRESS_DIR`
    /// overrides the working directory (test affordance).
    pub fn progress_dir(&self) -> PathBuf {
        let base = std::env::var("TEST_PROGRESS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        base.join("progress")
    }

    pub fn plan_path(&self) -> PathBuf {
        self.progress_dir().join("documentation-plan.json")
    }

    pub fn documenter_progress_path(&self) -> PathBuf {
        self.progress_dir().join("documenter-progress.json")
    }

    pub fn work_unit_progress_path(&self, unit_id: &str) -> PathBuf {
        self.progress_dir()
            .join("work_units")
            .join(unit_id)
            .join("progress.json")
    }

    pub fn indexer_progress_path(&self) -> PathBuf {
        self.progress_dir().join("indexer-progress.json")
    }

    /// Documentation output root. `DBSCRIBE_DOCS_ROOT` overrides the default
    /// `docs/` relative to the working directory.
    pub fn docs_root(&self) -> PathBuf {
        std::env::var("DBSCRIBE_DOCS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("docs"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.docs_root().join("documentation-manifest.json")
    }

    /// Hash over the canonical form of the catalog. Staleness detection
    /// compares this against the `config_hash` stored in a prior plan.
    pub fn catalog_hash(&self) -> String {
        let canonical = serde_json::to_string(&self.databases).unwrap_or_default();
        sha256_hex(canonical.as_bytes())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.databases.is_empty() {
        bail!("At least one [[databases]] entry is required");
    }

    let mut seen = std::collections::HashSet::new();
    for db in &config.databases {
        if db.name.trim().is_empty() {
            bail!("Database name must not be empty");
        }
        if !seen.insert(db.name.clone()) {
            bail!("Duplicate database name: '{}'", db.name);
        }
    }

    if config.documenter.table_batch_size == 0 || config.documenter.column_batch_size == 0 {
        bail!("documenter batch sizes must be > 0");
    }
    if config.planner.batch_size == 0 {
        bail!("planner.batch_size must be > 0");
    }

    match config.llm.provider.as_str() {
        "disabled" | "api" => {}
        other => bail!("Unknown llm provider: '{}'. Must be api or disabled.", other),
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai or disabled.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0 when the provider is enabled");
    }
    if config.indexer.max_hops == 0 {
        bail!("indexer.max_hops must be >= 1");
    }

    config.llm.apply_env_overrides();

    Ok(config)
}
