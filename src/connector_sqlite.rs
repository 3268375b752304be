//! SQLite catalog driver.
//!
//! Reads schema metadata through `sqlite_master` and the `table_info` /
//! `foreign_key_list` / `index_list` PRAGMAs. SQLite has a single logical
//! schema (`main`) and keeps its internal tables behind the `sqlite_`
//! name prefix, which this driver treats as the engine's system namespace.
//!
//! Sessions are opened read-only and never create the database file; a
//! missing or unopenable file reports the database as unreachable.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Column, Row, TypeInfo};
use std::str::FromStr;
use std::time::Duration;

use crate::catalog::{CatalogConnector, QueryRows, TableFilter};
use crate::config::DatabaseConfig;
use crate::error::{AgentError, AgentResult, ErrorCode};
use crate::models::{
    ColumnMetadata, ColumnRef, ForeignKeyRef, Relationship, RelationshipKind, TableMetadata,
};

const SQLITE_SCHEMA: &str = "main";

pub struct SqliteCatalog {
    config: DatabaseConfig,
    pool: Option<SqlitePool>,
}

impl SqliteCatalog {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config, pool: None }
    }

    fn pool(&self) -> AgentResult<&SqlitePool> {
        self.pool.as_ref().ok_or_else(|| {
            AgentError::new(
                ErrorCode::DocDbConnectionLost,
                format!("No open session for database '{}'", self.config.name),
            )
        })
    }

    fn classify(&self, err: sqlx::Error, fallback: ErrorCode) -> AgentError {
        let code = match &err {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                ErrorCode::DocDbConnectionLost
            }
            sqlx::Error::Database(db) if db.message().contains("unable to open") => {
                ErrorCode::DocDbConnectionLost
            }
            _ => fallback,
        };
        AgentError::new(code, err.to_string())
            .with_context(serde_json::json!({"database": self.config.name}))
    }
}

/// Escape an identifier for interpolation into a PRAGMA or quoted name.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl CatalogConnector for SqliteCatalog {
    fn engine(&self) -> &str {
        "sqlite"
    }

    fn database_name(&self) -> &str {
        &self.config.name
    }

    async fn connect(&mut self) -> AgentResult<()> {
        let conn_str = self.config.connection.resolve().map_err(|e| {
            AgentError::new(ErrorCode::DocDbConnectionLost, e.to_string())
                .with_context(serde_json::json!({"database": self.config.name}))
        })?;

        let path = std::path::Path::new(&conn_str);
        if !path.is_file() {
            return Err(AgentError::new(
                ErrorCode::DocDbConnectionLost,
                format!("SQLite database file not found: {}", conn_str),
            )
            .with_context(serde_json::json!({"database": self.config.name})));
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", conn_str))
            .map_err(|e| self.classify(e, ErrorCode::DocDbConnectionLost))?
            .read_only(true);

        let connect = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options);

        let pool = tokio::time::timeout(
            Duration::from_millis(self.config.timeouts.connect_ms),
            connect,
        )
        .await
        .map_err(|_| {
            AgentError::new(
                ErrorCode::DocDbConnectionLost,
                format!("Connection to '{}' timed out", self.config.name),
            )
        })?
        .map_err(|e| self.classify(e, ErrorCode::DocDbConnectionLost))?;

        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
    }

    async fn list_tables(&self, filter: &TableFilter) -> AgentResult<Vec<TableMetadata>> {
        let pool = self.pool()?;

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| self.classify(e, ErrorCode::DocTableExtractionFailed))?;

        let mut tables = Vec::new();
        for name in names {
            // SQLite's internal namespace is the sqlite_ prefix rather than
            // a separate schema.
            if !filter.include_system_tables && name.starts_with("sqlite_") {
                continue;
            }
            if !filter.admits(SQLITE_SCHEMA, &name, &[]) {
                continue;
            }
            tables.push(self.get_table_metadata(SQLITE_SCHEMA, &name).await?);
        }
        Ok(tables)
    }

    async fn get_table_metadata(&self, schema: &str, table: &str) -> AgentResult<TableMetadata> {
        let pool = self.pool()?;
        let quoted = quote_ident(table);

        let column_rows = sqlx::query(&format!("PRAGMA table_info({})", quoted))
            .fetch_all(pool)
            .await
            .map_err(|e| self.classify(e, ErrorCode::DocTableExtractionFailed))?;

        if column_rows.is_empty() {
            return Err(AgentError::new(
                ErrorCode::DocTableExtractionFailed,
                format!("Table '{}' has no columns or does not exist", table),
            )
            .with_context(serde_json::json!({"database": self.config.name, "table": table})));
        }

        let mut columns = Vec::with_capacity(column_rows.len());
        let mut primary_key: Vec<(i64, String)> = Vec::new();
        for row in &column_rows {
            let name: String = row.get("name");
            let data_type: String = row.get("type");
            let notnull: i64 = row.get("notnull");
            let default: Option<String> = row.try_get("dflt_value").ok().flatten();
            let pk: i64 = row.get("pk");
            if pk > 0 {
                primary_key.push((pk, name.clone()));
            }
            columns.push(ColumnMetadata {
                name,
                data_type: if data_type.is_empty() { "ANY".to_string() } else { data_type },
                nullable: notnull == 0 && pk == 0,
                default,
                comment: None,
            });
        }
        primary_key.sort_by_key(|(ord, _)| *ord);

        let fk_rows = sqlx::query(&format!("PRAGMA foreign_key_list({})", quoted))
            .fetch_all(pool)
            .await
            .map_err(|e| self.classify(e, ErrorCode::DocTableExtractionFailed))?;

        let mut foreign_keys = Vec::with_capacity(fk_rows.len());
        for row in &fk_rows {
            let target_table: String = row.get("table");
            let from: String = row.get("from");
            // A NULL "to" column means the FK references the target's
            // primary key implicitly; fall back to rowid naming.
            let to: Option<String> = row.try_get("to").ok().flatten();
            foreign_keys.push(ForeignKeyRef {
                column: from,
                target_schema: SQLITE_SCHEMA.to_string(),
                target_table,
                target_column: to.unwrap_or_else(|| "id".to_string()),
            });
        }

        let index_rows = sqlx::query(&format!("PRAGMA index_list({})", quoted))
            .fetch_all(pool)
            .await
            .map_err(|e| self.classify(e, ErrorCode::DocTableExtractionFailed))?;
        let indexes: Vec<String> = index_rows.iter().map(|r| r.get::<String, _>("name")).collect();

        let row_count_approx: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quoted))
                .fetch_one(pool)
                .await
                .unwrap_or(0);

        Ok(TableMetadata {
            schema: schema.to_string(),
            table: table.to_string(),
            columns,
            primary_key: primary_key.into_iter().map(|(_, n)| n).collect(),
            foreign_keys,
            indexes,
            row_count_approx,
            comment: None,
        })
    }

    async fn get_relationships(&self, tables: &[TableMetadata]) -> AgentResult<Vec<Relationship>> {
        // All edges are derivable from the outgoing FK lists already in the
        // metadata; enumerating every table covers incoming edges too.
        let mut relationships = Vec::new();
        for table in tables {
            for fk in &table.foreign_keys {
                let join_expression = format!(
                    "JOIN {} ON {}.{} = {}.{}",
                    fk.target_table, table.table, fk.column, fk.target_table, fk.target_column
                );
                relationships.push(Relationship {
                    source: ColumnRef {
                        schema: table.schema.clone(),
                        table: table.table.clone(),
                        column: fk.column.clone(),
                    },
                    target: ColumnRef {
                        schema: fk.target_schema.clone(),
                        table: fk.target_table.clone(),
                        column: fk.target_column.clone(),
                    },
                    kind: RelationshipKind::ForeignKey,
                    hop_count: 1,
                    confidence: 1.0,
                    join_expression,
                });
            }
        }
        Ok(relationships)
    }

    async fn query(&self, sql: &str, max_rows: usize) -> AgentResult<QueryRows> {
        let pool = self.pool()?;

        let rows = sqlx::query(sql)
            .fetch_all(pool)
            .await
            .map_err(|e| self.classify(e, ErrorCode::DocSamplingFailed))?;

        let mut result = QueryRows::default();
        for (i, row) in rows.iter().take(max_rows).enumerate() {
            if i == 0 {
                result.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
            }
            let values = row
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| decode_cell(row, idx, col.type_info().name()))
                .collect();
            result.rows.push(values);
        }
        Ok(result)
    }
}

/// Decode a single SQLite cell into a JSON value. SQLite's dynamic typing
/// means the declared type is advisory; try the likely decodings in order.
fn decode_cell(row: &sqlx::sqlite::SqliteRow, idx: usize, type_name: &str) -> serde_json::Value {
    match type_name {
        "INTEGER" | "BOOLEAN" => row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
        "REAL" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
        "BLOB" => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|b| serde_json::Value::String(format!("<{} bytes>", b.len())))
            .unwrap_or(serde_json::Value::Null),
        _ => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(serde_json::Value::String)
            .or_else(|| {
                row.try_get::<Option<i64>, _>(idx)
                    .ok()
                    .flatten()
                    .map(serde_json::Value::from)
            })
            .or_else(|| {
                row.try_get::<Option<f64>, _>(idx)
                    .ok()
                    .flatten()
                    .map(serde_json::Value::from)
            })
            .unwrap_or(serde_json::Value::Null),
    }
}
