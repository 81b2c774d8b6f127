//! Batch checkpoint (`checkpoint.dat`) and run-directory reset.
//!
//! The checkpoint holds two integers, `last total`: the index of the last
//! finished descent and the number of descents the batch was asked for.
//! A fresh batch writes `-1 total`.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::AppError;

pub const CHECKPOINT_FILE: &str = "checkpoint.dat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// `-1` before the first descent finishes.
    pub last_completed: i64,
    pub total: usize,
}

impl Checkpoint {
    pub fn fresh(total: usize) -> Self {
        Self {
            last_completed: -1,
            total,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.last_completed + 1 == self.total as i64
    }

    fn parse(raw: &str) -> Option<Self> {
        let mut fields = raw.split_whitespace();
        let last_completed = fields.next()?.parse::<i64>().ok()?;
        let total = fields.next()?.parse::<usize>().ok()?;
        Some(Self {
            last_completed,
            total,
        })
    }
}

/// What to do with a run directory before starting a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// A previous batch of the same size already finished.
    AlreadyComplete(Checkpoint),
    /// The directory was cleared; run every descent from index 0.
    Start,
}

/// Read `checkpoint.dat`; a missing or unreadable file means no checkpoint.
pub fn read_checkpoint(dir: &Path) -> Option<Checkpoint> {
    let path = dir.join(CHECKPOINT_FILE);
    let raw = fs::read_to_string(&path).ok()?;
    let parsed = Checkpoint::parse(&raw);
    if parsed.is_none() {
        warn!(path = %path.display(), "ignoring malformed checkpoint");
    }
    parsed
}

pub fn write_checkpoint(dir: &Path, checkpoint: Checkpoint) -> Result<(), AppError> {
    let path = dir.join(CHECKPOINT_FILE);
    fs::write(
        &path,
        format!("{} {}\n", checkpoint.last_completed, checkpoint.total),
    )
    .map_err(|e| AppError::output(format!("Failed to write '{}': {e}", path.display())))
}

/// Create the run directory if needed and decide whether the batch must run.
///
/// A batch of `requested` descents is skipped only when the checkpoint
/// records exactly that many descents, all finished. Anything else clears
/// every regular file in the directory and resets the checkpoint.
pub fn prepare_run_dir(dir: &Path, requested: usize) -> Result<Resume, AppError> {
    fs::create_dir_all(dir)
        .map_err(|e| AppError::output(format!("Failed to create run directory '{}': {e}", dir.display())))?;

    if let Some(cp) = read_checkpoint(dir) {
        if cp.total == requested && cp.is_complete() {
            info!(dir = %dir.display(), total = cp.total, "batch already complete, skipping");
            return Ok(Resume::AlreadyComplete(cp));
        }
        info!(
            dir = %dir.display(),
            last = cp.last_completed,
            total = cp.total,
            requested,
            "stale checkpoint, restarting batch"
        );
    }

    let removed = clear_run_dir(dir)?;
    if removed > 0 {
        info!(dir = %dir.display(), removed, "cleared previous outputs");
    }
    write_checkpoint(dir, Checkpoint::fresh(requested))?;
    Ok(Resume::Start)
}

/// Remove regular files directly inside `dir`; subdirectories are left alone.
fn clear_run_dir(dir: &Path) -> Result<usize, AppError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::output(format!("Failed to list run directory '{}': {e}", dir.display())))?;

    let mut removed = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| AppError::output(format!("Failed to read run directory entry: {e}")))?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        let path = entry.path();
        fs::remove_file(&path)
            .map_err(|e| AppError::output(format!("Failed to remove '{}': {e}", path.display())))?;
        removed += 1;
    }
    Ok(removed)
}
