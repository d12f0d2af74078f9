//! Pipeline orchestration for pgarchive.
//!
//! This crate resolves a run's selection and stage plan, gates it on its
//! pre-flight checks, then drives the catalog, fetcher and archive crates
//! through the [`Collaborators`] trait, assembling one archive per language
//! partition.

pub mod collaborators;
pub mod gate;
pub mod orchestrator;
pub mod partition;
pub mod progress;
pub mod selection;
pub mod services;
pub mod stages;

pub use collaborators::{
    AssembleRequest, Collaborators, DependencyReport, DownloadRequest, LanguageCatalog,
};
pub use orchestrator::{RunConfig, RunOptions, RunSummary, run};
pub use partition::{Partition, PartitionMode, plan_partitions};
pub use progress::{ProgressReporter, SilentProgress};
pub use selection::{ParsedSelector, parse_book_selector, resolve_selection};
pub use services::LocalServices;
pub use stages::{Stage, StageFlags, StagePlan};
