//! Documenter orchestration: signals, plan loading, checkpoint resume, the
//! serial work-unit loop, status rollup, and manifest generation.

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::checkpoint::{load_documenter_progress, save_documenter_progress};
use crate::config::Config;
use crate::llm::LlmClient;
use crate::manifest::generate_manifest;
use crate::models::{
    DocumenterProgress, RunStatus, WorkUnitProgress, WorkUnitStatus,
};
use crate::plan::load_plan;
use crate::work_unit::process_work_unit;

/// Roll unit statuses up into the run status.
pub fn overall_status(units: &[WorkUnitStatus]) -> RunStatus {
    if units.is_empty() {
        return RunStatus::Completed;
    }
    if units.iter().all(|s| *s == WorkUnitStatus::Completed) {
        return RunStatus::Completed;
    }
    if units.iter().all(|s| *s == WorkUnitStatus::Failed) {
        return RunStatus::Failed;
    }
    RunStatus::Partial
}

/// Install SIGINT/SIGTERM handlers that flip the shutdown flag. The flag is
/// checked between work units and between tables inside a unit.
fn install_signal_handlers() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(err = %e, "SIGTERM handler unavailable");
                        let _ = ctrl_c.await;
                        let _ = tx.send(true);
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown requested, finishing in-flight table");
        let _ = tx.send(true);
    });

    rx
}

pub async fn run_documenter(config: &Config) -> Result<RunStatus> {
    let cancel = install_signal_handlers();

    let (loaded, _warnings) = match load_plan(config) {
        Ok(v) => v,
        Err(e) => bail!("{}", e),
    };
    let plan = loaded.plan;
    let plan_hash = loaded.plan_hash;

    // Checkpoint resume: only a running checkpoint against this exact plan
    // resumes; completed units are skipped, partial/failed units are left
    // as-is and never auto-retried.
    let prior = load_documenter_progress(config)
        .filter(|p| p.plan_hash == plan_hash && p.status == RunStatus::Running);
    if prior.is_some() {
        info!("resuming from checkpoint");
    }
    let prior_units: Vec<WorkUnitProgress> =
        prior.as_ref().map(|p| p.work_units.clone()).unwrap_or_default();

    let llm = LlmClient::new(config.llm.clone())?;

    let mut progress = DocumenterProgress {
        status: RunStatus::Running,
        plan_hash: plan_hash.clone(),
        work_units: Vec::new(),
        tokens_prompt: prior.as_ref().map(|p| p.tokens_prompt).unwrap_or(0),
        tokens_completion: prior.as_ref().map(|p| p.tokens_completion).unwrap_or(0),
        started_at: prior.as_ref().map(|p| p.started_at).unwrap_or_else(Utc::now),
        last_checkpoint: Utc::now(),
    };
    save_documenter_progress(config, &mut progress);

    let mut units: Vec<_> = plan.work_units.iter().collect();
    units.sort_by_key(|u| u.priority_order);

    let mut cancelled = false;
    for unit in &units {
        if cancelled || *cancel.borrow() {
            cancelled = true;
            progress.work_units.push(WorkUnitProgress::new(&unit.id, unit.tables.len()));
            continue;
        }

        // Resume semantics: anything the checkpoint already finished with
        // (completed, partial, or failed) is carried over untouched.
        if let Some(done) = prior_units.iter().find(|p| {
            p.id == unit.id
                && matches!(
                    p.status,
                    WorkUnitStatus::Completed | WorkUnitStatus::Partial | WorkUnitStatus::Failed
                )
        }) {
            info!(unit = %unit.id, status = ?done.status, "skipping unit from checkpoint");
            progress.work_units.push(done.clone());
            continue;
        }

        let outcome = process_work_unit(config, &llm, unit, &cancel).await;
        progress.tokens_prompt += outcome.tokens.prompt;
        progress.tokens_completion += outcome.tokens.completion;
        progress.work_units.push(outcome.progress);
        cancelled = outcome.cancelled;

        save_documenter_progress(config, &mut progress);
    }

    let statuses: Vec<WorkUnitStatus> =
        progress.work_units.iter().map(|p| p.status).collect();
    let overall = if cancelled {
        RunStatus::Partial
    } else {
        overall_status(&statuses)
    };
    progress.status = overall;
    save_documenter_progress(config, &mut progress);

    // A manifest is produced on success, graceful shutdown, and fatal
    // failure alike; only a manifest write failure is fatal here.
    let manifest =
        generate_manifest(config, &plan, &plan_hash, overall, &progress.work_units)?;

    println!("document");
    println!("  work units: {}", progress.work_units.len());
    println!(
        "  tables completed: {}",
        progress.work_units.iter().map(|p| p.tables_completed).sum::<usize>()
    );
    println!(
        "  tables failed: {}",
        progress.work_units.iter().map(|p| p.tables_failed).sum::<usize>()
    );
    println!("  manifest files: {}", manifest.total_files);
    println!("  status: {}", serde_json::to_value(overall)?.as_str().unwrap_or("unknown"));
    println!("ok");

    Ok(overall)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_run_is_completed() {
        assert_eq!(overall_status(&[]), RunStatus::Completed);
    }

    #[test]
    fn all_completed_rolls_up() {
        assert_eq!(
            overall_status(&[WorkUnitStatus::Completed, WorkUnitStatus::Completed]),
            RunStatus::Completed
        );
    }

    #[test]
    fn any_partial_means_partial() {
        assert_eq!(
            overall_status(&[WorkUnitStatus::Completed, WorkUnitStatus::Partial]),
            RunStatus::Partial
        );
    }

    #[test]
    fn failed_mixed_with_success_is_partial() {
        assert_eq!(
            overall_status(&[WorkUnitStatus::Failed, WorkUnitStatus::Completed]),
            RunStatus::Partial
        );
    }

    #[test]
    fn all_failed_is_failed() {
        assert_eq!(
            overall_status(&[WorkUnitStatus::Failed, WorkUnitStatus::Failed]),
            RunStatus::Failed
        );
    }

    #[test]
    fn pending_units_at_termination_mean_partial() {
        assert_eq!(
            overall_status(&[WorkUnitStatus::Completed, WorkUnitStatus::Pending]),
            RunStatus::Partial
        );
    }
}
