//! Progress files and checkpoint persistence.
//!
//! Checkpoints are advisory snapshots sufficient to resume a stage. They are
//! written atomically, and a failed progress write is logged but never
//! propagated: losing a checkpoint must not block forward progress.

use std::path::Path;

use chrono::Utc;
use tracing::warn;

use crate::config::Config;
use crate::fsio::atomic_write;
use crate::models::{DocumenterProgress, IndexerProgress, WorkUnitProgress};

/// Write the global documenter progress file. Never fails.
pub fn save_documenter_progress(config: &Config, progress: &mut DocumenterProgress) {
    progress.last_checkpoint = Utc::now();
    write_json_best_effort(&config.documenter_progress_path(), progress);
}

/// Write one work unit's progress file. Never fails.
pub fn save_work_unit_progress(config: &Config, progress: &WorkUnitProgress) {
    write_json_best_effort(&config.work_unit_progress_path(&progress.id), progress);
}

/// Write the indexer progress file. Never fails.
pub fn save_indexer_progress(config: &Config, progress: &mut IndexerProgress) {
    progress.last_checkpoint = Utc::now();
    write_json_best_effort(&config.indexer_progress_path(), progress);
}

/// Load a prior documenter progress file if one exists and parses.
pub fn load_documenter_progress(config: &Config) -> Option<DocumenterProgress> {
    load_json(&config.documenter_progress_path())
}

pub fn load_indexer_progress(config: &Config) -> Option<IndexerProgress> {
    load_json(&config.indexer_progress_path())
}

fn write_json_best_effort<T: serde::Serialize>(path: &Path, value: &T) {
    let bytes = match serde_json::to_vec_pretty(value) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path.display(), err = %e, "progress serialization failed");
            return;
        }
    };
    if let Err(e) = atomic_write(path, &bytes) {
        warn!(path = %path.display(), err = %e, "progress write failed");
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), err = %e, "ignoring unreadable progress file");
            None
        }
    }
}
