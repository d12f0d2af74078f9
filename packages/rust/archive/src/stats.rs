//! Progress stats file: `{"done": n, "total": m}`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pgarchive_shared::{PgArchiveError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Minimum delay between two periodic writes.
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

/// Write `progress` to `path` through a temp file.
pub fn write_progress(path: &Path, progress: Progress) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| PgArchiveError::io(parent, e))?;
        }
    }

    let json = serde_json::to_string_pretty(&progress)
        .map_err(|e| PgArchiveError::Archive(format!("stats serialization failed: {e}")))?;

    let temp = path.with_extension("tmp");
    std::fs::write(&temp, json).map_err(|e| PgArchiveError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| PgArchiveError::io(path, e))?;
    Ok(())
}

/// Throttled progress reporting to an optional stats file.
#[derive(Debug)]
pub struct StatsReporter {
    path: Option<PathBuf>,
    progress: Progress,
    last_write: Option<Instant>,
}

impl StatsReporter {
    pub fn new(path: Option<PathBuf>, total: usize) -> Self {
        Self {
            path,
            progress: Progress { done: 0, total },
            last_write: None,
        }
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Count one finished item, writing the file at most every ten seconds.
    pub fn inc(&mut self) {
        self.progress.done += 1;
        let due = self
            .last_write
            .is_none_or(|at| at.elapsed() >= REPORT_INTERVAL);
        if due {
            self.write();
        }
    }

    /// Write the final state.
    pub fn finish(&mut self) {
        self.write();
    }

    fn write(&mut self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_progress(path, self.progress) {
            warn!(path = %path.display(), error = %e, "failed to write stats file");
        }
        self.last_write = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_writes_first_and_final_state() {
        let path = std::env::temp_dir()
            .join(format!("pga_stats_{}", uuid::Uuid::now_v7()))
            .join("stats.json");
        let mut reporter = StatsReporter::new(Some(path.clone()), 3);

        reporter.inc();
        let first: Progress =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(first, Progress { done: 1, total: 3 });

        // Throttled: not written again until finish.
        reporter.inc();
        reporter.inc();
        reporter.finish();
        let last: Progress =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(last, Progress { done: 3, total: 3 });
    }

    #[test]
    fn reporter_without_path_is_silent() {
        let mut reporter = StatsReporter::new(None, 1);
        reporter.inc();
        reporter.finish();
        assert_eq!(reporter.progress().done, 1);
    }
}
