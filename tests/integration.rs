use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn dbscribe_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dbscribe");
    path
}

/// Create the fixture SQLite database: users ← orders with one FK.
fn create_fixture_db(path: &Path) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = sqlx::sqlite::SqlitePool::connect(&url).await.unwrap();
        sqlx::query(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                email TEXT NOT NULL,
                display_name TEXT
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE orders (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                total_cents INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO users (email, display_name) VALUES
             ('ada@example.com', 'Ada'), ('bob@example.com', NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO orders (user_id, total_cents) VALUES (1, 1999), (2, 450)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    });
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    create_fixture_db(&root.join("demo.sqlite"));

    let config_content = format!(
        r#"[[databases]]
name = "demo"
engine = "sqlite"
connection = {{ path = "{root}/demo.sqlite" }}

[llm]
provider = "disabled"

[embedding]
provider = "disabled"

[indexer]
index_path = "{root}/data/index.sqlite"
"#,
        root = root.display()
    );
    let config_path = root.join("config/dbscribe.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dbscribe(config_path: &Path, root: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dbscribe_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("TEST_PROGRESS_DIR", root)
        .env("DBSCRIBE_DOCS_ROOT", root.join("docs"))
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dbscribe binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn plan_emits_valid_plan_file() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    let (stdout, stderr, success) = run_dbscribe(&config_path, root, &["plan"]);
    assert!(success, "plan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("work units: 2"));

    let plan = read_json(&root.join("progress/documentation-plan.json"));
    assert_eq!(plan["schema_version"], "1.0");
    assert_eq!(plan["summary"]["total_databases"], 1);
    assert_eq!(plan["summary"]["reachable_databases"], 1);
    assert_eq!(plan["summary"]["total_tables"], 2);
    assert_eq!(plan["summary"]["total_work_units"], 2);
    assert_eq!(plan["summary"]["recommended_parallelism"], 2);
    assert_eq!(plan["config_hash"].as_str().unwrap().len(), 64);

    let units = plan["work_units"].as_array().unwrap();
    let mut ids: Vec<&str> = units.iter().map(|u| u["id"].as_str().unwrap()).collect();
    ids.sort();
    assert_eq!(ids, vec!["demo_orders", "demo_users"]);

    for (i, unit) in units.iter().enumerate() {
        assert_eq!(unit["priority_order"], (i + 1) as u64);
        assert_eq!(unit["depends_on"].as_array().unwrap().len(), 0);
        for table in unit["tables"].as_array().unwrap() {
            assert_eq!(table["domain"], unit["domain"]);
            assert_eq!(table["metadata_hash"].as_str().unwrap().len(), 64);
        }
    }
}

#[test]
fn plan_is_reused_when_schema_unchanged() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    let (_, _, success) = run_dbscribe(&config_path, root, &["plan"]);
    assert!(success);

    let (stdout, _, success) = run_dbscribe(&config_path, root, &["plan"]);
    assert!(success);
    assert!(stdout.contains("reused existing plan"), "stdout: {}", stdout);
}

#[test]
fn plan_force_replans() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    run_dbscribe(&config_path, root, &["plan"]);
    let (stdout, _, success) = run_dbscribe(&config_path, root, &["plan", "--force"]);
    assert!(success);
    assert!(!stdout.contains("reused"));
}

#[test]
fn document_writes_artifacts_and_complete_manifest() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    run_dbscribe(&config_path, root, &["plan"]);
    let (stdout, stderr, success) = run_dbscribe(&config_path, root, &["document"]);
    assert!(success, "document failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("tables completed: 2"));
    assert!(stdout.contains("status: completed"));

    let users_md = root.join("docs/databases/demo/domains/users/tables/main.users.md");
    let users_json = root.join("docs/databases/demo/domains/users/tables/main.users.json");
    let orders_md = root.join("docs/databases/demo/domains/orders/tables/main.orders.md");
    assert!(users_md.is_file());
    assert!(users_json.is_file());
    assert!(orders_md.is_file());

    // With the LLM disabled every description is the deterministic fallback.
    let md = fs::read_to_string(&users_md).unwrap();
    assert!(md.contains("# users"));
    assert!(md.contains("**Database:** demo"));
    assert!(md.contains("| Column | Type | Nullable | Description |"));
    assert!(md.contains("Column email of type TEXT."));
    assert!(md.contains("## Sample Data"));
    assert!(md.contains("*Generated at: "));

    let orders = fs::read_to_string(&orders_md).unwrap();
    assert!(orders.contains("- user_id -> main.users.id"));

    let manifest = read_json(&root.join("docs/documentation-manifest.json"));
    assert_eq!(manifest["schema_version"], "1.0");
    assert_eq!(manifest["status"], "complete");
    assert_eq!(manifest["total_files"], 4);
    assert_eq!(manifest["indexable_files"].as_array().unwrap().len(), 4);
    for file in manifest["indexable_files"].as_array().unwrap() {
        assert_eq!(file["content_hash"].as_str().unwrap().len(), 64);
        assert!(root.join("docs").join(file["path"].as_str().unwrap()).is_file());
    }

    let progress = read_json(&root.join("progress/documenter-progress.json"));
    assert_eq!(progress["status"], "completed");
    assert_eq!(progress["work_units"].as_array().unwrap().len(), 2);
}

#[test]
fn document_rerun_skips_existing_artifacts() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    run_dbscribe(&config_path, root, &["plan"]);
    run_dbscribe(&config_path, root, &["document"]);

    let users_md = root.join("docs/databases/demo/domains/users/tables/main.users.md");
    let before = fs::read(&users_md).unwrap();

    let (stdout, _, success) = run_dbscribe(&config_path, root, &["document"]);
    assert!(success, "rerun failed: {}", stdout);
    assert!(stdout.contains("status: completed"));

    // Skipped-success replay leaves artifact bytes untouched.
    let after = fs::read(&users_md).unwrap();
    assert_eq!(before, after);
}

#[test]
fn unreachable_database_is_recorded_not_fatal() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    let config_content = format!(
        r#"[[databases]]
name = "demo"
engine = "sqlite"
connection = {{ path = "{root}/demo.sqlite" }}

[[databases]]
name = "ghost"
engine = "sqlite"
connection = {{ path = "{root}/missing.sqlite" }}

[llm]
provider = "disabled"

[embedding]
provider = "disabled"

[indexer]
index_path = "{root}/data/index.sqlite"
"#,
        root = root.display()
    );
    fs::write(&config_path, config_content).unwrap();

    let (stdout, stderr, success) = run_dbscribe(&config_path, root, &["plan"]);
    assert!(success, "plan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("databases: 2 (1 reachable)"));

    let plan = read_json(&root.join("progress/documentation-plan.json"));
    let databases = plan["databases"].as_array().unwrap();
    let ghost = databases.iter().find(|d| d["name"] == "ghost").unwrap();
    assert_eq!(ghost["status"], "unreachable");
    assert_eq!(ghost["table_count"], 0);
    assert!(plan["work_units"]
        .as_array()
        .unwrap()
        .iter()
        .all(|u| u["database"] != "ghost"));
    assert_eq!(plan["summary"]["reachable_databases"], 1);

    // The documenter only touches the reachable database and still
    // completes.
    let (stdout, _, success) = run_dbscribe(&config_path, root, &["document"]);
    assert!(success);
    assert!(stdout.contains("status: completed"));
}

#[test]
fn indexer_populates_documents_and_relationships() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    run_dbscribe(&config_path, root, &["plan"]);
    run_dbscribe(&config_path, root, &["document"]);

    let (stdout, stderr, success) =
        run_dbscribe(&config_path, root, &["index", "--skip-embeddings"]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    // 2 table docs + 6 column docs.
    assert!(stdout.contains("documents inserted: 8"), "stdout: {}", stdout);
    assert!(stdout.contains("relationships: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("vectors written: 0"));

    let (stdout, _, success) = run_dbscribe(&config_path, root, &["index", "--stats"]);
    assert!(success);
    assert!(stdout.contains("documents: 8"));
    assert!(stdout.contains("table: 2"));
    assert!(stdout.contains("column: 6"));
    assert!(stdout.contains("relationships: 1"));
    assert!(stdout.contains("1 hop: 1"));

    let progress = read_json(&root.join("progress/indexer-progress.json"));
    assert_eq!(progress["phase"], "done");
}

#[test]
fn incremental_reindex_with_no_changes_is_a_noop() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    run_dbscribe(&config_path, root, &["plan"]);
    run_dbscribe(&config_path, root, &["document"]);
    run_dbscribe(&config_path, root, &["index", "--skip-embeddings"]);

    let (stdout, _, success) =
        run_dbscribe(&config_path, root, &["index", "--incremental", "--skip-embeddings"]);
    assert!(success);
    assert!(stdout.contains("new: 0, changed: 0, deleted: 0, unchanged: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("documents inserted: 0"));
    assert!(stdout.contains("documents updated: 0"));
    assert!(stdout.contains("documents deleted: 0"));
}

#[test]
fn incremental_reindex_after_edit_touches_one_file() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    run_dbscribe(&config_path, root, &["plan"]);
    run_dbscribe(&config_path, root, &["document"]);
    run_dbscribe(&config_path, root, &["index", "--skip-embeddings"]);

    // Edit one description word, then regenerate the manifest via a
    // document rerun (artifacts themselves are skip-replayed).
    let orders_md = root.join("docs/databases/demo/domains/orders/tables/main.orders.md");
    let text = fs::read_to_string(&orders_md).unwrap();
    fs::write(&orders_md, text.replace("Column user_id", "Column user_id (edited)")).unwrap();
    run_dbscribe(&config_path, root, &["document"]);

    let (stdout, _, success) =
        run_dbscribe(&config_path, root, &["index", "--incremental", "--skip-embeddings"]);
    assert!(success);
    assert!(stdout.contains("new: 0, changed: 1, deleted: 0, unchanged: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("documents updated: 4"), "stdout: {}", stdout);
}

#[test]
fn index_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    run_dbscribe(&config_path, root, &["plan"]);
    run_dbscribe(&config_path, root, &["document"]);

    let (stdout, _, success) =
        run_dbscribe(&config_path, root, &["index", "--dry-run", "--skip-embeddings"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(!root.join("data/index.sqlite").exists());
}

#[test]
fn index_verify_passes_on_healthy_index() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    run_dbscribe(&config_path, root, &["plan"]);
    run_dbscribe(&config_path, root, &["document"]);
    run_dbscribe(&config_path, root, &["index", "--skip-embeddings"]);

    let (stdout, stderr, success) = run_dbscribe(&config_path, root, &["index", "--verify"]);
    assert!(success, "verify failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("orphan column documents: 0"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn index_without_manifest_fails() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    let (_, stderr, success) = run_dbscribe(&config_path, root, &["index", "--skip-embeddings"]);
    assert!(!success);
    assert!(stderr.contains("IDX_MANIFEST_NOT_FOUND"), "stderr: {}", stderr);
}

#[test]
fn document_without_plan_fails() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    let (_, stderr, success) = run_dbscribe(&config_path, root, &["document"]);
    assert!(!success);
    assert!(stderr.contains("DOC_PLAN_NOT_FOUND"), "stderr: {}", stderr);
}
