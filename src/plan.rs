//! Plan file loading, validation, and persistence.
//!
//! The plan is the contract between the planner and the documenter. The
//! validator here is shared by both sides: the planner refuses to emit an
//! inconsistent plan, and the documenter refuses to execute one.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::warn;

use crate::config::Config;
use crate::error::{AgentError, AgentResult, ErrorCode};
use crate::fsio::atomic_write;
use crate::hash::sha256_hex;
use crate::models::{DatabaseStatus, DocumentationPlan, WorkUnit, SCHEMA_VERSION};

/// A loaded plan plus the hash of its file bytes, used to tie progress
/// checkpoints to the exact plan they were made against.
pub struct LoadedPlan {
    pub plan: DocumentationPlan,
    pub plan_hash: String,
}

/// Load and validate the plan, emitting `DOC_PLAN_STALE` (warning) when the
/// stored config hash no longer matches the current catalog.
pub fn load_plan(config: &Config) -> AgentResult<(LoadedPlan, Vec<AgentError>)> {
    let path = config.plan_path();
    let loaded = read_plan(&path)?;
    validate_plan(&loaded.plan)?;

    let mut warnings = Vec::new();
    let current_hash = config.catalog_hash();
    if !loaded.plan.config_hash.is_empty() && loaded.plan.config_hash != current_hash {
        let stale = AgentError::new(
            ErrorCode::DocPlanStale,
            "Plan was generated from a different catalog configuration",
        )
        .with_context(serde_json::json!({
            "plan_config_hash": loaded.plan.config_hash,
            "current_config_hash": current_hash,
        }));
        warn!(err = %stale, "proceeding with stale plan");
        warnings.push(stale);
    }

    Ok((loaded, warnings))
}

/// Read and structurally decode the plan file.
pub fn read_plan(path: &Path) -> AgentResult<LoadedPlan> {
    let bytes = std::fs::read(path).map_err(|e| {
        AgentError::new(
            ErrorCode::DocPlanNotFound,
            format!("Plan not found at {}: {}", path.display(), e),
        )
    })?;
    let plan_hash = sha256_hex(&bytes);

    let plan: DocumentationPlan = serde_json::from_slice(&bytes).map_err(|e| {
        AgentError::new(ErrorCode::DocPlanInvalid, format!("Plan is not valid JSON: {}", e))
    })?;

    if plan.schema_version != SCHEMA_VERSION {
        return Err(AgentError::new(
            ErrorCode::DocPlanInvalid,
            format!(
                "Unsupported plan schema_version '{}' (expected '{}')",
                plan.schema_version, SCHEMA_VERSION
            ),
        ));
    }

    Ok(LoadedPlan { plan, plan_hash })
}

/// Atomically write the plan and return the hash of the written bytes.
pub fn save_plan(config: &Config, plan: &DocumentationPlan) -> AgentResult<String> {
    let bytes = serde_json::to_vec_pretty(plan).map_err(|e| {
        AgentError::new(ErrorCode::DocPlanInvalid, format!("Plan serialization failed: {}", e))
    })?;
    atomic_write(&config.plan_path(), &bytes).map_err(|e| {
        AgentError::new(ErrorCode::DocFileWriteFailed, format!("Plan write failed: {}", e))
    })?;
    Ok(sha256_hex(&bytes))
}

/// Structural invariants every plan must satisfy.
pub fn validate_plan(plan: &DocumentationPlan) -> AgentResult<()> {
    let derived_tables: usize = plan.work_units.iter().map(|wu| wu.tables.len()).sum();
    if plan.summary.total_tables != derived_tables {
        return invalid(format!(
            "summary.total_tables is {} but work units contain {}",
            plan.summary.total_tables, derived_tables
        ));
    }
    if plan.summary.total_work_units != plan.work_units.len() {
        return invalid(format!(
            "summary.total_work_units is {} but plan has {}",
            plan.summary.total_work_units,
            plan.work_units.len()
        ));
    }
    let reachable = plan
        .databases
        .iter()
        .filter(|db| db.status == DatabaseStatus::Reachable)
        .count();
    if plan.summary.reachable_databases != reachable {
        return invalid(format!(
            "summary.reachable_databases is {} but {} databases are reachable",
            plan.summary.reachable_databases, reachable
        ));
    }
    if plan.summary.total_databases != plan.databases.len() {
        return invalid(format!(
            "summary.total_databases is {} but plan lists {}",
            plan.summary.total_databases,
            plan.databases.len()
        ));
    }

    let mut unit_ids = HashSet::new();
    for unit in &plan.work_units {
        if unit.tables.is_empty() {
            return invalid(format!("work unit '{}' has no tables", unit.id));
        }
        if unit.id != WorkUnit::expected_id(&unit.database, &unit.domain) {
            return invalid(format!(
                "work unit id '{}' does not match '{{database}}_{{domain}}'",
                unit.id
            ));
        }
        if !unit_ids.insert(unit.id.clone()) {
            return invalid(format!("duplicate work unit id '{}'", unit.id));
        }
        for table in &unit.tables {
            if table.domain != unit.domain {
                return invalid(format!(
                    "table '{}' has domain '{}' inside unit '{}'",
                    table.fully_qualified_name, table.domain, unit.id
                ));
            }
            if table.metadata_hash.len() != 64 {
                return invalid(format!(
                    "table '{}' has a malformed metadata_hash",
                    table.fully_qualified_name
                ));
            }
            if !(1..=3).contains(&table.priority) {
                return invalid(format!(
                    "table '{}' has priority {} outside 1..=3",
                    table.fully_qualified_name, table.priority
                ));
            }
        }
    }

    // Every reachable database must have at least one work unit; unreachable
    // databases must have none.
    let units_by_db: HashSet<&str> =
        plan.work_units.iter().map(|wu| wu.database.as_str()).collect();
    for db in &plan.databases {
        match db.status {
            DatabaseStatus::Reachable if db.table_count > 0 => {
                if !units_by_db.contains(db.name.as_str()) {
                    return invalid(format!(
                        "reachable database '{}' has no work units",
                        db.name
                    ));
                }
            }
            DatabaseStatus::Unreachable => {
                if units_by_db.contains(db.name.as_str()) {
                    return invalid(format!(
                        "unreachable database '{}' has work units",
                        db.name
                    ));
                }
            }
            _ => {}
        }
    }

    check_dependency_cycles(&plan.work_units)?;
    Ok(())
}

/// Reject cyclic `depends_on` graphs (iterative DFS with three colors).
fn check_dependency_cycles(units: &[WorkUnit]) -> AgentResult<()> {
    let index: HashMap<&str, &WorkUnit> = units.iter().map(|u| (u.id.as_str(), u)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for unit in units {
        if marks.contains_key(unit.id.as_str()) {
            continue;
        }
        // Stack entries: (id, next dependency offset).
        let mut stack: Vec<(&str, usize)> = vec![(unit.id.as_str(), 0)];
        marks.insert(unit.id.as_str(), Mark::Visiting);

        while let Some((id, dep_idx)) = stack.pop() {
            let deps = index.get(id).map(|u| u.depends_on.as_slice()).unwrap_or(&[]);
            if dep_idx >= deps.len() {
                marks.insert(id, Mark::Done);
                continue;
            }
            stack.push((id, dep_idx + 1));
            let dep = deps[dep_idx].as_str();
            match marks.get(dep) {
                Some(Mark::Visiting) => {
                    return invalid(format!("dependency cycle through work unit '{}'", dep));
                }
                Some(Mark::Done) => {}
                None => {
                    if index.contains_key(dep) {
                        marks.insert(dep, Mark::Visiting);
                        stack.push((dep, 0));
                    }
                    // Unknown dependency ids are tolerated; generators emit [].
                }
            }
        }
    }
    Ok(())
}

fn invalid(message: String) -> AgentResult<()> {
    Err(AgentError::new(ErrorCode::DocPlanInvalid, message))
}

/// Build a consistent summary for a set of analyses and units.
pub fn build_summary(
    databases: &[crate::models::DatabaseAnalysis],
    work_units: &[WorkUnit],
) -> crate::models::PlanSummary {
    crate::models::PlanSummary {
        total_databases: databases.len(),
        reachable_databases: databases
            .iter()
            .filter(|db| db.status == DatabaseStatus::Reachable)
            .count(),
        total_tables: work_units.iter().map(|wu| wu.tables.len()).sum(),
        total_work_units: work_units.len(),
        total_estimated_minutes: work_units.iter().map(|wu| wu.estimated_minutes).sum(),
        recommended_parallelism: work_units.len().min(4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;
    use chrono::Utc;

    fn spec(table: &str, domain: &str) -> TableSpec {
        TableSpec {
            fully_qualified_name: format!("main.{}", table),
            schema: "main".into(),
            table: table.into(),
            domain: domain.into(),
            priority: 2,
            column_count: 3,
            row_count_approx: 10,
            incoming_fk_count: 0,
            outgoing_fk_count: 0,
            metadata_hash: "a".repeat(64),
            existing_comment: None,
        }
    }

    fn unit(db: &str, domain: &str, tables: Vec<TableSpec>, depends_on: Vec<&str>) -> WorkUnit {
        WorkUnit {
            id: WorkUnit::expected_id(db, domain),
            database: db.into(),
            domain: domain.into(),
            estimated_minutes: 1,
            output_directory: WorkUnit::expected_output_directory(db, domain),
            priority_order: 1,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            content_hash: "b".repeat(64),
            tables,
        }
    }

    fn plan_with(units: Vec<WorkUnit>) -> DocumentationPlan {
        let databases = vec![DatabaseAnalysis {
            name: "demo".into(),
            status: DatabaseStatus::Reachable,
            table_count: units.iter().map(|u| u.tables.len()).sum(),
            schema_hash: Some("c".repeat(64)),
            domains: Default::default(),
            errors: vec![],
        }];
        let summary = build_summary(&databases, &units);
        DocumentationPlan {
            schema_version: SCHEMA_VERSION.into(),
            generated_at: Utc::now(),
            config_hash: "d".repeat(64),
            complexity: Complexity::Simple,
            databases,
            work_units: units,
            summary,
            errors: vec![],
        }
    }

    #[test]
    fn valid_plan_passes() {
        let plan = plan_with(vec![unit("demo", "users", vec![spec("users", "users")], vec![])]);
        validate_plan(&plan).unwrap();
    }

    #[test]
    fn counter_mismatch_rejected() {
        let mut plan = plan_with(vec![unit("demo", "users", vec![spec("users", "users")], vec![])]);
        plan.summary.total_tables = 99;
        let err = validate_plan(&plan).err().unwrap();
        assert_eq!(err.code, ErrorCode::DocPlanInvalid);
    }

    #[test]
    fn mismatched_domain_rejected() {
        let plan = plan_with(vec![unit("demo", "users", vec![spec("users", "orders")], vec![])]);
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn bad_unit_id_rejected() {
        let mut plan = plan_with(vec![unit("demo", "users", vec![spec("users", "users")], vec![])]);
        plan.work_units[0].id = "weird".into();
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn dependency_cycle_rejected() {
        let mut a = unit("demo", "users", vec![spec("users", "users")], vec!["demo_orders"]);
        let b = unit("demo", "orders", vec![spec("orders", "orders")], vec!["demo_users"]);
        a.depends_on = vec!["demo_orders".into()];
        let mut plan = plan_with(vec![a, b]);
        plan.summary = build_summary(&plan.databases, &plan.work_units);
        let err = validate_plan(&plan).err().unwrap();
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn acyclic_dependencies_pass() {
        let a = unit("demo", "users", vec![spec("users", "users")], vec![]);
        let b = unit("demo", "orders", vec![spec("orders", "orders")], vec!["demo_users"]);
        let mut plan = plan_with(vec![a, b]);
        plan.summary = build_summary(&plan.databases, &plan.work_units);
        validate_plan(&plan).unwrap();
    }

    #[test]
    fn unreachable_database_with_units_rejected() {
        let mut plan = plan_with(vec![unit("demo", "users", vec![spec("users", "users")], vec![])]);
        plan.databases[0].status = DatabaseStatus::Unreachable;
        plan.summary = build_summary(&plan.databases, &plan.work_units);
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn read_plan_hash_matches_file_bytes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("documentation-plan.json");
        let plan = plan_with(vec![unit("demo", "users", vec![spec("users", "users")], vec![])]);
        let bytes = serde_json::to_vec_pretty(&plan).unwrap();
        std::fs::write(&path, &bytes).unwrap();

        let loaded = read_plan(&path).unwrap();
        assert_eq!(loaded.plan_hash, crate::hash::sha256_hex(&bytes));
        assert_eq!(loaded.plan.work_units.len(), 1);
    }

    #[test]
    fn wrong_schema_version_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("documentation-plan.json");
        let mut plan = plan_with(vec![unit("demo", "users", vec![spec("users", "users")], vec![])]);
        plan.schema_version = "2.0".into();
        std::fs::write(&path, serde_json::to_vec_pretty(&plan).unwrap()).unwrap();
        let err = read_plan(&path).err().unwrap();
        assert_eq!(err.code, ErrorCode::DocPlanInvalid);
    }

    #[test]
    fn missing_plan_is_not_found() {
        let err = read_plan(std::path::Path::new("/definitely/missing/plan.json"))
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::DocPlanNotFound);
    }
}
