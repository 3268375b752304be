//! Atomic file writes and artifact path handling.
//!
//! Every shared file (plan, progress, manifest, artifacts) is written via
//! temp-then-rename so readers never observe a torn write. The temp name
//! carries the PID plus a process-wide counter so concurrent writers of the
//! same target cannot collide.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

/// Characters that cannot appear in artifact filenames on common filesystems.
const INVALID_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Write `content` to `path` atomically (temp file in the same directory,
/// then rename). Creates parent directories as needed.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let tmp = temp_path_for(path);
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write temp file {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| {
        let _ = std::fs::remove_file(&tmp);
        format!("Failed to rename into place: {}", path.display())
    })?;
    Ok(())
}

/// Atomic write with one direct-write retry. Artifact emission uses this so
/// a rename failure on an exotic filesystem does not lose the table.
pub fn atomic_write_with_retry(path: &Path, content: &[u8]) -> Result<()> {
    match atomic_write(path, content) {
        Ok(()) => Ok(()),
        Err(first) => {
            tracing::warn!(path = %path.display(), err = %first, "atomic write failed, retrying direct");
            std::fs::write(path, content)
                .with_context(|| format!("Direct write also failed: {}", path.display()))
        }
    }
}

/// Temp name carries the PID plus a random token so concurrent writers of
/// the same target never collide.
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let token = Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(".{}.{}.{}.tmp", file_name, std::process::id(), &token[..8]))
}

/// Replace filesystem-invalid characters with `_`, preserving case.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if INVALID_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Artifact file name for a table: `{schema}.{table}.{ext}` with invalid
/// characters replaced.
pub fn artifact_file_name(schema: &str, table: &str, ext: &str) -> String {
    format!("{}.{}.{}", sanitize_filename(schema), sanitize_filename(table), ext)
}
