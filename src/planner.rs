//! Schema discovery, domain grouping, and work-unit generation.
//!
//! A planner run is a linear computation: load catalog → staleness check →
//! per-database analysis → domain inference → work-unit generation →
//! validation → atomic plan write. Unreachable databases are recorded and
//! skipped, never fatal; LLM failures degrade to rule-based domain grouping.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::catalog::{create_connector, TableFilter};
use crate::config::{Config, DatabaseConfig};
use crate::error::{AgentError, ErrorCode, Severity};
use crate::hash::{content_hash_of, metadata_hash, schema_hash};
use crate::keywords::{expand_abbreviation, split_identifier};
use crate::llm::LlmClient;
use crate::models::{
    Complexity, DatabaseAnalysis, DatabaseStatus, DocumentationPlan, TableMetadata, TableSpec,
    WorkUnit, SCHEMA_VERSION,
};
use crate::plan::{build_summary, read_plan, save_plan, validate_plan};
use crate::prompts;

/// Domains that mark high-value business tables.
pub const CORE_DOMAINS: &[&str] = &["customers", "users", "orders", "products"];

/// Domains relegated to the lowest documentation priority.
pub const SYSTEM_DOMAINS: &[&str] =
    &["system", "audit", "logs", "migrations", "other", "uncategorized"];

/// The closed domain alphabet enumerated in the inference prompt. LLM output
/// outside this set collapses to `other`.
pub const DOMAIN_ALPHABET: &[&str] = &[
    "customers",
    "users",
    "orders",
    "products",
    "billing",
    "payments",
    "inventory",
    "catalog",
    "shipping",
    "marketing",
    "analytics",
    "messaging",
    "system",
    "audit",
    "logs",
    "migrations",
    "other",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct PlannerOptions {
    pub force: bool,
    pub dry_run: bool,
}

struct AnalyzedDatabase {
    analysis: DatabaseAnalysis,
    tables: Vec<TableMetadata>,
    incoming_fk: HashMap<String, usize>,
}

pub async fn run_planner(config: &Config, options: PlannerOptions) -> Result<DocumentationPlan> {
    let config_hash = config.catalog_hash();

    if !options.force {
        if let Some(existing) = reusable_plan(config, &config_hash).await {
            println!("plan");
            println!("  reused existing plan (catalog and schemas unchanged)");
            return Ok(existing);
        }
    }

    let mut errors: Vec<AgentError> = Vec::new();
    let mut analyzed: Vec<AnalyzedDatabase> = Vec::new();
    for db in &config.databases {
        let result = analyze_database(config, db).await;
        errors.extend(result.analysis.errors.iter().cloned());
        analyzed.push(result);
    }

    // Domain inference across every reachable database.
    let llm_enabled = config.planner.domain_inference_enabled && config.llm.is_enabled();
    let llm = if llm_enabled {
        LlmClient::new(config.llm.clone()).ok()
    } else {
        None
    };

    let mut work_units = Vec::new();
    for db in &mut analyzed {
        if db.analysis.status != DatabaseStatus::Reachable {
            continue;
        }
        let domains = infer_domains(llm.as_ref(), config, &db.tables, &mut errors).await;

        for (domain, count) in count_by_domain(&domains) {
            db.analysis.domains.insert(domain, count);
        }

        work_units.extend(build_work_units(&db.analysis.name, &db.tables, &domains, &db.incoming_fk));
    }

    order_work_units(&mut work_units);

    let databases: Vec<DatabaseAnalysis> = analyzed.into_iter().map(|a| a.analysis).collect();
    let summary = build_summary(&databases, &work_units);
    let complexity = derive_complexity(summary.total_tables);

    let plan = DocumentationPlan {
        schema_version: SCHEMA_VERSION.to_string(),
        generated_at: Utc::now(),
        config_hash,
        complexity,
        databases,
        work_units,
        summary,
        errors,
    };

    validate_plan(&plan)?;

    if options.dry_run {
        println!("plan (dry-run)");
    } else {
        save_plan(config, &plan)?;
        println!("plan");
    }
    println!("  databases: {} ({} reachable)", plan.summary.total_databases, plan.summary.reachable_databases);
    println!("  tables: {}", plan.summary.total_tables);
    println!("  work units: {}", plan.summary.total_work_units);
    println!("  estimated minutes: {}", plan.summary.total_estimated_minutes);
    println!("ok");

    Ok(plan)
}

/// Return the prior plan when the catalog hash matches and no reachable
/// database's structural schema has drifted.
async fn reusable_plan(config: &Config, config_hash: &str) -> Option<DocumentationPlan> {
    let loaded = read_plan(&config.plan_path()).ok()?;
    if loaded.plan.config_hash != config_hash {
        info!("catalog configuration changed, replanning");
        return None;
    }

    for analysis in &loaded.plan.databases {
        if analysis.status != DatabaseStatus::Reachable {
            continue;
        }
        let db = config.databases.iter().find(|d| d.name == analysis.name)?;
        let current = live_schema_hash(db).await?;
        if Some(&current) != analysis.schema_hash.as_ref() {
            info!(database = %analysis.name, "schema drift detected, replanning");
            return None;
        }
    }

    Some(loaded.plan)
}

/// Lightweight structural hash of a live database (tables + columns only).
async fn live_schema_hash(db: &DatabaseConfig) -> Option<String> {
    let filter = TableFilter::from_config(db).ok()?;
    let mut connector = create_connector(db).ok()?;
    connector.connect().await.ok()?;
    let tables = connector.list_tables(&filter).await.ok();
    connector.disconnect().await;
    tables.map(|t| schema_hash(&t))
}

async fn analyze_database(config: &Config, db: &DatabaseConfig) -> AnalyzedDatabase {
    let unreachable = |err: AgentError| AnalyzedDatabase {
        analysis: DatabaseAnalysis {
            name: db.name.clone(),
            status: DatabaseStatus::Unreachable,
            table_count: 0,
            schema_hash: None,
            domains: BTreeMap::new(),
            errors: vec![err],
        },
        tables: Vec::new(),
        incoming_fk: HashMap::new(),
    };

    let filter = match TableFilter::from_config(db) {
        Ok(f) => f,
        Err(e) => {
            return unreachable(
                AgentError::new(ErrorCode::DocPlanInvalid, format!("Bad table filters: {}", e))
                    .with_severity(Severity::Error),
            )
        }
    };

    let mut connector = match create_connector(db) {
        Ok(c) => c,
        Err(e) => return unreachable(e),
    };
    if let Err(e) = connector.connect().await {
        warn!(database = %db.name, err = %e, "database unreachable, continuing");
        return unreachable(e.with_severity(Severity::Warning));
    }

    let mut tables = match connector.list_tables(&filter).await {
        Ok(t) => t,
        Err(e) => {
            connector.disconnect().await;
            return unreachable(e);
        }
    };

    // Deterministic truncation order before applying the cap.
    tables.sort_by(|a, b| a.fully_qualified_name().cmp(&b.fully_qualified_name()));
    if tables.len() > config.planner.max_tables_per_database {
        warn!(
            database = %db.name,
            total = tables.len(),
            cap = config.planner.max_tables_per_database,
            "truncating table list"
        );
        tables.truncate(config.planner.max_tables_per_database);
    }

    let mut errors = Vec::new();
    let relationships = match connector.get_relationships(&tables).await {
        Ok(r) => r,
        Err(e) => {
            warn!(database = %db.name, err = %e, "relationships unavailable, continuing without");
            errors.push(e.with_severity(Severity::Warning));
            Vec::new()
        }
    };
    connector.disconnect().await;

    let mut incoming_fk: HashMap<String, usize> = HashMap::new();
    for rel in &relationships {
        *incoming_fk.entry(rel.target.table.clone()).or_default() += 1;
    }

    AnalyzedDatabase {
        analysis: DatabaseAnalysis {
            name: db.name.clone(),
            status: DatabaseStatus::Reachable,
            table_count: tables.len(),
            schema_hash: Some(schema_hash(&tables)),
            domains: BTreeMap::new(),
            errors,
        },
        tables,
        incoming_fk,
    }
}

/// Map each table to exactly one domain. LLM first (validated to the closed
/// alphabet), rule-based fallback, `uncategorized` for leftovers.
async fn infer_domains(
    llm: Option<&LlmClient>,
    config: &Config,
    tables: &[TableMetadata],
    errors: &mut Vec<AgentError>,
) -> HashMap<String, String> {
    let mut assignments: HashMap<String, String> = HashMap::new();

    if let Some(client) = llm {
        let model = config
            .planner
            .llm_model
            .clone()
            .unwrap_or_else(|| client.primary_model().to_string());
        for batch in tables.chunks(config.planner.batch_size) {
            match infer_domains_llm(client, &model, batch).await {
                Ok(mapped) => assignments.extend(mapped),
                Err(e) => {
                    warn!(err = %e, "LLM domain inference failed, using rule-based fallback");
                    errors.push(
                        AgentError::new(
                            ErrorCode::DocLlmFailed,
                            format!("Domain inference failed: {}", e.message),
                        )
                        .with_severity(Severity::Warning),
                    );
                    break;
                }
            }
        }
    }

    let rules = infer_domains_rules(tables);
    for table in tables {
        let name = table.table.clone();
        assignments
            .entry(name.clone())
            .or_insert_with(|| rules.get(&name).cloned().unwrap_or_else(|| "uncategorized".into()));
    }
    assignments
}

async fn infer_domains_llm(
    client: &LlmClient,
    model: &str,
    batch: &[TableMetadata],
) -> Result<HashMap<String, String>, AgentError> {
    let table_list = batch
        .iter()
        .map(|t| {
            let fk_targets: Vec<&str> =
                t.foreign_keys.iter().map(|fk| fk.target_table.as_str()).collect();
            format!(
                "- {} ({} columns{})",
                t.table,
                t.columns.len(),
                if fk_targets.is_empty() {
                    String::new()
                } else {
                    format!(", references {}", fk_targets.join(", "))
                }
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = prompts::render(
        prompts::get_template(prompts::DOMAIN_INFERENCE)?,
        &[
            ("allowed_domains", DOMAIN_ALPHABET.join(", ")),
            ("table_list", table_list),
        ],
    );

    let completion = client.complete_with_model(&prompt, model).await?;
    Ok(parse_domain_assignments(&completion.content, batch))
}

/// Parse `table: domain` lines, validating to the closed alphabet. Unknown
/// domains collapse to `other`; unknown tables are dropped.
pub fn parse_domain_assignments(
    response: &str,
    batch: &[TableMetadata],
) -> HashMap<String, String> {
    let known: HashMap<String, &TableMetadata> =
        batch.iter().map(|t| (t.table.to_lowercase(), t)).collect();

    let mut out = HashMap::new();
    for line in response.lines() {
        let line = line.trim().trim_start_matches('-').trim_start_matches('`').trim();
        let Some((name, domain)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().trim_matches('`').to_lowercase();
        let domain = domain.trim().trim_matches('`').to_lowercase();
        let Some(table) = known.get(&name) else {
            continue;
        };
        let domain = if DOMAIN_ALPHABET.contains(&domain.as_str()) {
            domain
        } else {
            "other".to_string()
        };
        out.insert(table.table.clone(), domain);
    }
    out
}

/// Rule-based fallback: name-token match against the alphabet, then prefix
/// clustering, then FK clustering toward already assigned tables.
pub fn infer_domains_rules(tables: &[TableMetadata]) -> HashMap<String, String> {
    let mut assignments: HashMap<String, String> = HashMap::new();

    // Pass 1: a leading name token that maps into the alphabet wins
    // (`cust_orders` → customer → customers).
    for table in tables {
        let tokens = split_identifier(&table.table);
        let Some(first) = tokens.first().map(String::as_str) else { continue };
        let candidate = expand_abbreviation(first).unwrap_or(first);
        let candidate = candidate.split(' ').next().unwrap_or(candidate);
        if let Some(domain) = alphabet_match(candidate) {
            assignments.insert(table.table.clone(), domain.to_string());
        }
    }

    // Pass 2: shared name prefixes form their own domains.
    let mut prefix_groups: HashMap<String, Vec<&TableMetadata>> = HashMap::new();
    for table in tables {
        if assignments.contains_key(&table.table) {
            continue;
        }
        if let Some(prefix) = split_identifier(&table.table).into_iter().next() {
            prefix_groups.entry(prefix).or_default().push(table);
        }
    }
    for (prefix, group) in prefix_groups {
        if group.len() >= 2 {
            for table in group {
                assignments.insert(table.table.clone(), prefix.clone());
            }
        }
    }

    // Pass 3: FK clustering. Unassigned tables adopt the domain of the
    // table they reference most.
    for _ in 0..2 {
        let snapshot = assignments.clone();
        for table in tables {
            if assignments.contains_key(&table.table) {
                continue;
            }
            let mut votes: HashMap<&str, usize> = HashMap::new();
            for fk in &table.foreign_keys {
                if let Some(domain) = snapshot.get(&fk.target_table) {
                    *votes.entry(domain.as_str()).or_default() += 1;
                }
            }
            if let Some((domain, _)) = votes.into_iter().max_by_key(|(d, n)| (*n, std::cmp::Reverse(d.to_string()))) {
                assignments.insert(table.table.clone(), domain.to_string());
            }
        }
    }

    assignments
}

/// Match a singular/plural token against the domain alphabet.
fn alphabet_match(token: &str) -> Option<&'static str> {
    DOMAIN_ALPHABET
        .iter()
        .find(|d| **d == token || **d == format!("{}s", token) || d.trim_end_matches('s') == token)
        .copied()
}

fn count_by_domain(assignments: &HashMap<String, String>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for domain in assignments.values() {
        *counts.entry(domain.clone()).or_default() += 1;
    }
    counts
}

/// Derive a table's documentation priority from its domain and FK fan-in.
pub fn derive_priority(domain: &str, incoming_fk_count: usize) -> u8 {
    if CORE_DOMAINS.contains(&domain) || incoming_fk_count >= 3 {
        1
    } else if SYSTEM_DOMAINS.contains(&domain) {
        3
    } else {
        2
    }
}

/// `ceil((30 + 40·n) / 60)` minutes for an n-table unit.
pub fn estimate_minutes(table_count: usize) -> u64 {
    let seconds = 30 + 40 * table_count as u64;
    seconds.div_ceil(60)
}

fn build_work_units(
    database: &str,
    tables: &[TableMetadata],
    domains: &HashMap<String, String>,
    incoming_fk: &HashMap<String, usize>,
) -> Vec<WorkUnit> {
    let mut by_domain: BTreeMap<String, Vec<&TableMetadata>> = BTreeMap::new();
    for table in tables {
        let domain = domains
            .get(&table.table)
            .cloned()
            .unwrap_or_else(|| "uncategorized".to_string());
        by_domain.entry(domain).or_default().push(table);
    }

    let mut units = Vec::new();
    for (domain, group) in by_domain {
        let mut specs: Vec<TableSpec> = group
            .iter()
            .map(|t| {
                let incoming = incoming_fk.get(&t.table).copied().unwrap_or(0);
                TableSpec {
                    fully_qualified_name: t.fully_qualified_name(),
                    schema: t.schema.clone(),
                    table: t.table.clone(),
                    domain: domain.clone(),
                    priority: derive_priority(&domain, incoming),
                    column_count: t.columns.len(),
                    row_count_approx: t.row_count_approx,
                    incoming_fk_count: incoming,
                    outgoing_fk_count: t.foreign_keys.len(),
                    metadata_hash: metadata_hash(t),
                    existing_comment: t.comment.clone(),
                }
            })
            .collect();
        specs.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.fully_qualified_name.cmp(&b.fully_qualified_name))
        });

        let hashes: Vec<String> = specs.iter().map(|s| s.metadata_hash.clone()).collect();
        units.push(WorkUnit {
            id: WorkUnit::expected_id(database, &domain),
            database: database.to_string(),
            estimated_minutes: estimate_minutes(specs.len()),
            output_directory: WorkUnit::expected_output_directory(database, &domain),
            priority_order: 0,
            depends_on: Vec::new(),
            content_hash: content_hash_of(&hashes),
            domain,
            tables: specs,
        });
    }
    units
}

/// Core domains first, then table count descending, then id ascending.
/// Renumbers `priority_order` from 1.
pub fn order_work_units(units: &mut [WorkUnit]) {
    units.sort_by(|a, b| {
        let a_core = CORE_DOMAINS.contains(&a.domain.as_str());
        let b_core = CORE_DOMAINS.contains(&b.domain.as_str());
        b_core
            .cmp(&a_core)
            .then_with(|| b.tables.len().cmp(&a.tables.len()))
            .then_with(|| a.id.cmp(&b.id))
    });
    for (i, unit) in units.iter_mut().enumerate() {
        unit.priority_order = (i + 1) as u32;
    }
}

fn derive_complexity(total_tables: usize) -> Complexity {
    if total_tables < 20 {
        Complexity::Simple
    } else if total_tables <= 100 {
        Complexity::Moderate
    } else {
        Complexity::Complex
    }
}
