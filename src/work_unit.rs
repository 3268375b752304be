//! Work-unit execution: one database connection, bounded table batches,
//! multi-level status rollup, and cooperative cancellation.

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::catalog::create_connector;
use crate::checkpoint::save_work_unit_progress;
use crate::config::Config;
use crate::error::{AgentError, ErrorCode, Severity};
use crate::llm::{LlmClient, TokenUsage};
use crate::models::{WorkUnit, WorkUnitProgress, WorkUnitStatus};
use crate::table_doc::{process_table, TableContext};

/// Outcome of a unit run, including token usage for the global counters.
pub struct UnitOutcome {
    pub progress: WorkUnitProgress,
    pub tokens: TokenUsage,
    pub cancelled: bool,
}

/// Roll up table results into the unit status.
///
/// `completed` counts skipped tables (skip is success); `processed` may be
/// less than `total` when the run was cancelled or the connection was lost.
pub fn unit_status(
    total: usize,
    completed: usize,
    failed: usize,
    connection_lost: bool,
    cancelled: bool,
) -> WorkUnitStatus {
    if total == 0 {
        return WorkUnitStatus::Completed;
    }
    if connection_lost {
        return if completed > 0 { WorkUnitStatus::Partial } else { WorkUnitStatus::Failed };
    }
    let processed = completed + failed;
    if cancelled && processed < total {
        return WorkUnitStatus::Partial;
    }
    if completed == total {
        WorkUnitStatus::Completed
    } else if completed == 0 {
        WorkUnitStatus::Failed
    } else {
        WorkUnitStatus::Partial
    }
}

pub async fn process_work_unit(
    config: &Config,
    llm: &LlmClient,
    unit: &WorkUnit,
    cancel: &watch::Receiver<bool>,
) -> UnitOutcome {
    let mut progress = WorkUnitProgress::new(&unit.id, unit.tables.len());
    progress.status = WorkUnitStatus::Running;
    save_work_unit_progress(config, &progress);

    let mut tokens = TokenUsage::default();
    let mut cancelled = *cancel.borrow();
    let mut connection_lost = false;

    if unit.tables.is_empty() {
        progress.status = WorkUnitStatus::Completed;
        progress.finished_at = Some(chrono::Utc::now());
        save_work_unit_progress(config, &progress);
        return UnitOutcome { progress, tokens, cancelled };
    }

    // One connection serves the whole unit.
    let db_config = config.databases.iter().find(|db| db.name == unit.database);
    let mut connector = match db_config.ok_or_else(|| {
        AgentError::new(
            ErrorCode::DocWorkUnitFailed,
            format!("Database '{}' missing from catalog", unit.database),
        )
    }) {
        Ok(db) => match create_connector(db) {
            Ok(c) => c,
            Err(e) => return fail_unit(config, progress, e, tokens),
        },
        Err(e) => return fail_unit(config, progress, e, tokens),
    };
    if let Err(e) = connector.connect().await {
        return fail_unit(config, progress, e, tokens);
    }

    let tables_dir = config.docs_root().join(&unit.output_directory).join("tables");
    let batch_size = config.documenter.table_batch_size.max(1);
    let grace = std::time::Duration::from_millis(config.documenter.shutdown_grace_ms);
    let mut since_checkpoint = 0usize;

    'batches: for batch in unit.tables.chunks(batch_size) {
        if cancelled || *cancel.borrow() {
            cancelled = true;
            break;
        }
        progress.current_table = Some(batch[0].fully_qualified_name.clone());

        let futures: Vec<_> = batch
            .iter()
            .map(|spec| {
                let ctx = TableContext {
                    config: &config.documenter,
                    llm,
                    connector: connector.as_ref(),
                    database: &unit.database,
                    spec,
                    tables_dir: &tables_dir,
                };
                async move { process_table(&ctx).await }
            })
            .collect();

        let batch_future = join_all(futures);
        tokio::pin!(batch_future);

        let mut watcher = cancel.clone();
        let outcomes = tokio::select! {
            outcomes = &mut batch_future => Some(outcomes),
            _ = watcher.wait_for(|stop| *stop) => {
                // Give the in-flight tables a short grace to finish, then
                // abandon them.
                cancelled = true;
                match tokio::time::timeout(grace, &mut batch_future).await {
                    Ok(outcomes) => Some(outcomes),
                    Err(_) => {
                        warn!(unit = %unit.id, "abandoning in-flight tables after grace period");
                        None
                    }
                }
            }
        };

        let Some(outcomes) = outcomes else {
            break 'batches;
        };

        for outcome in outcomes {
            tokens.add(&outcome.tokens);
            progress.errors.extend(outcome.errors);
            if outcome.succeeded {
                progress.tables_completed += 1;
                if outcome.skipped {
                    progress.tables_skipped += 1;
                }
            } else {
                progress.tables_failed += 1;
            }
            if outcome.connection_lost {
                connection_lost = true;
            }
            since_checkpoint += 1;
            if since_checkpoint >= config.documenter.checkpoint_every_tables {
                save_work_unit_progress(config, &progress);
                since_checkpoint = 0;
            }
        }

        if connection_lost {
            warn!(unit = %unit.id, "connection lost, aborting unit");
            progress.errors.push(
                AgentError::new(
                    ErrorCode::DocDbConnectionLost,
                    format!("Connection lost while processing unit '{}'", unit.id),
                )
                .with_severity(Severity::Error),
            );
            break 'batches;
        }
        if cancelled {
            break 'batches;
        }
    }

    connector.disconnect().await;

    progress.current_table = None;
    progress.status = unit_status(
        progress.tables_total,
        progress.tables_completed,
        progress.tables_failed,
        connection_lost,
        cancelled,
    );
    progress.finished_at = Some(chrono::Utc::now());
    save_work_unit_progress(config, &progress);

    info!(
        unit = %unit.id,
        status = ?progress.status,
        completed = progress.tables_completed,
        failed = progress.tables_failed,
        skipped = progress.tables_skipped,
        "work unit finished"
    );

    UnitOutcome { progress, tokens, cancelled }
}

fn fail_unit(
    config: &Config,
    mut progress: WorkUnitProgress,
    err: AgentError,
    tokens: TokenUsage,
) -> UnitOutcome {
    warn!(unit = %progress.id, err = %err, "work unit failed before processing tables");
    progress.tables_failed = progress.tables_total;
    progress.errors.push(err);
    progress.status = WorkUnitStatus::Failed;
    progress.finished_at = Some(chrono::Utc::now());
    save_work_unit_progress(config, &progress);
    UnitOutcome { progress, tokens, cancelled: false }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_unit_is_completed() {
        assert_eq!(unit_status(0, 0, 0, false, false), WorkUnitStatus::Completed);
    }

    #[test]
    fn all_succeeded_is_completed() {
        assert_eq!(unit_status(3, 3, 0, false, false), WorkUnitStatus::Completed);
    }

    #[test]
    fn mixed_results_are_partial() {
        assert_eq!(unit_status(3, 2, 1, false, false), WorkUnitStatus::Partial);
    }

    #[test]
    fn all_failed_is_failed() {
        assert_eq!(unit_status(3, 0, 3, false, false), WorkUnitStatus::Failed);
    }

    #[test]
    fn connection_lost_rollup() {
        assert_eq!(unit_status(5, 2, 1, true, false), WorkUnitStatus::Partial);
        assert_eq!(unit_status(5, 0, 1, true, false), WorkUnitStatus::Failed);
    }

    #[test]
    fn cancelled_mid_unit_is_partial() {
        assert_eq!(unit_status(5, 2, 0, false, true), WorkUnitStatus::Partial);
        // Cancellation after everything was processed falls back to the
        // normal rules.
        assert_eq!(unit_status(2, 2, 0, false, true), WorkUnitStatus::Completed);
    }

    #[test]
    fn skipped_counts_as_success() {
        // 2 skipped + 1 fresh success, all completed.
        assert_eq!(unit_status(3, 3, 0, false, false), WorkUnitStatus::Completed);
    }
}
