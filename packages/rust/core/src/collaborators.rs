//! The services the orchestrator delegates to.
//!
//! Every stage performs its work through [`Collaborators`]; the orchestrator
//! itself never touches the network, the filesystem or the metadata store.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pgarchive_shared::{CacheHandle, OptimizerVersions, Result, SelectionSet};
use url::Url;

/// Outcome of the external tool check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    /// Tools that could not be found.
    pub missing: Vec<String>,
}

impl DependencyReport {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Parameters handed to the download collaborator.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub dl_folder: PathBuf,
    /// Download-specific concurrency.
    pub concurrency: usize,
    pub selection: SelectionSet,
    pub force: bool,
    pub cache: Option<CacheHandle>,
    /// `None` accepts any optimized version from the cache.
    pub optimizer_versions: Option<OptimizerVersions>,
}

/// Parameters for one archive assembly.
#[derive(Debug, Clone)]
pub struct AssembleRequest {
    pub dl_folder: PathBuf,
    pub concurrency: usize,
    /// Scoped to one partition's languages.
    pub selection: SelectionSet,
    pub force: bool,
    pub title_search: bool,
    pub bookshelves: bool,
    pub fulltext_index: bool,
    pub cache: Option<CacheHandle>,
    pub optimizer_versions: Option<OptimizerVersions>,
    pub output: PathBuf,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub stats_file: Option<PathBuf>,
}

/// Read-only view of the languages present in the metadata store.
#[async_trait]
pub trait LanguageCatalog: Send + Sync {
    /// Distinct book languages, in first-seen order.
    async fn distinct_languages(&self) -> Result<Vec<String>>;
}

/// Everything a pipeline run delegates.
#[async_trait]
pub trait Collaborators: LanguageCatalog {
    async fn check_dependencies(&self) -> Result<DependencyReport>;

    /// Download and extract the RDF catalog into `path`.
    async fn setup_archive_source_folder(&self, url: &str, path: &Path, force: bool) -> Result<()>;

    /// Open the metadata store, wiping it first when asked.
    async fn setup_metadata_store(&self, wipe: bool) -> Result<()>;

    async fn parse_and_populate(
        &self,
        path: &Path,
        book_ids: &BTreeSet<u32>,
        concurrency: usize,
        force: bool,
    ) -> Result<()>;

    async fn register_derived_urls(&self, force: bool) -> Result<()>;

    async fn download_selected_books(&self, request: &DownloadRequest) -> Result<()>;

    /// Check the optimization cache location and credentials.
    async fn validate_cache_credentials(&self, location: &Url) -> Result<CacheHandle>;

    async fn assemble_archive(&self, request: &AssembleRequest) -> Result<()>;
}
