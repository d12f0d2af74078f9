//! Progress callbacks for pipeline runs.

use std::path::Path;

use crate::orchestrator::RunSummary;
use crate::stages::Stage;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts.
    fn stage(&self, stage: Stage);
    /// Called before each archive assembly.
    fn partition(&self, index: usize, total: usize, output: &Path);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn partition(&self, _index: usize, _total: usize, _output: &Path) {}
    fn done(&self, _summary: &RunSummary) {}
}
