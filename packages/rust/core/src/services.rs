//! Default collaborators: local metadata store, HTTP fetcher, zip archive.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pgarchive_archive::AssembleOptions;
use pgarchive_fetcher::{DownloadOptions, download::DEFAULT_COVER_BASE};
use pgarchive_shared::{AppConfig, CacheHandle, PgArchiveError, Result};
use pgarchive_storage::Storage;
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use url::Url;

use crate::collaborators::{
    AssembleRequest, Collaborators, DependencyReport, DownloadRequest, LanguageCatalog,
};

/// Collaborators backed by a libSQL store on disk and live HTTP.
///
/// The store is opened by [`Collaborators::setup_metadata_store`], so nothing
/// touches the database before the run has passed its pre-flight checks.
pub struct LocalServices {
    db_path: PathBuf,
    mirror_url: String,
    cover_base: String,
    required_tools: Vec<String>,
    client: Client,
    storage: OnceCell<Storage>,
}

impl LocalServices {
    pub fn new(
        db_path: impl Into<PathBuf>,
        mirror_url: impl Into<String>,
        required_tools: Vec<String>,
    ) -> Result<Self> {
        Ok(Self {
            db_path: db_path.into(),
            mirror_url: mirror_url.into(),
            cover_base: DEFAULT_COVER_BASE.to_string(),
            required_tools,
            client: pgarchive_fetcher::http_client()?,
            storage: OnceCell::new(),
        })
    }

    /// Build from the `[defaults]` and `[dependencies]` config sections.
    pub fn from_config(config: &AppConfig, db_path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            db_path,
            config.defaults.mirror_url.clone(),
            config.dependencies.required.clone(),
        )
    }

    /// Serve covers from another base URL.
    pub fn with_cover_base(mut self, cover_base: impl Into<String>) -> Self {
        self.cover_base = cover_base.into();
        self
    }

    fn storage(&self) -> Result<&Storage> {
        self.storage
            .get()
            .ok_or_else(|| PgArchiveError::Storage("metadata store is not set up".into()))
    }
}

#[async_trait]
impl LanguageCatalog for LocalServices {
    async fn distinct_languages(&self) -> Result<Vec<String>> {
        self.storage()?.distinct_languages().await
    }
}

#[async_trait]
impl Collaborators for LocalServices {
    async fn check_dependencies(&self) -> Result<DependencyReport> {
        let missing = self
            .required_tools
            .iter()
            .filter(|tool| which::which(tool.as_str()).is_err())
            .cloned()
            .collect();
        Ok(DependencyReport { missing })
    }

    async fn setup_archive_source_folder(&self, url: &str, path: &Path, force: bool) -> Result<()> {
        pgarchive_fetcher::setup_rdf_folder(&self.client, url, path, force).await
    }

    async fn setup_metadata_store(&self, wipe: bool) -> Result<()> {
        let storage = self
            .storage
            .get_or_try_init(|| Storage::setup(&self.db_path, wipe))
            .await?;
        let books = storage.book_count().await?;
        info!(books, "metadata store ready");
        Ok(())
    }

    async fn parse_and_populate(
        &self,
        path: &Path,
        book_ids: &BTreeSet<u32>,
        concurrency: usize,
        force: bool,
    ) -> Result<()> {
        let storage = self.storage()?;
        let summary =
            pgarchive_catalog::parse_and_populate(storage, path, book_ids, concurrency, force)
                .await?;
        info!(
            stored = summary.stored,
            skipped = summary.skipped,
            failed = summary.failed,
            "catalog populated"
        );
        Ok(())
    }

    async fn register_derived_urls(&self, force: bool) -> Result<()> {
        let count =
            pgarchive_catalog::register_derived_urls(self.storage()?, &self.mirror_url, force)
                .await?;
        info!(urls = count, "download URLs registered");
        Ok(())
    }

    async fn download_selected_books(&self, request: &DownloadRequest) -> Result<()> {
        let opts = DownloadOptions {
            dl_folder: request.dl_folder.clone(),
            concurrency: request.concurrency,
            selection: request.selection.clone(),
            force: request.force,
            cache: request.cache.clone(),
            optimizer_versions: request.optimizer_versions.clone(),
            cover_base: self.cover_base.clone(),
        };
        let summary =
            pgarchive_fetcher::download_books(self.storage()?, &self.client, &opts).await?;
        if !summary.deleted_books.is_empty() {
            warn!(
                count = summary.deleted_books.len(),
                books = ?summary.deleted_books,
                "books dropped, no format could be downloaded"
            );
        }
        info!(
            books = summary.books,
            downloaded = summary.downloaded,
            from_cache = summary.from_cache,
            already_present = summary.already_present,
            "downloads finished"
        );
        Ok(())
    }

    async fn validate_cache_credentials(&self, location: &Url) -> Result<CacheHandle> {
        pgarchive_fetcher::validate_cache_credentials(&self.client, location).await
    }

    async fn assemble_archive(&self, request: &AssembleRequest) -> Result<()> {
        let opts = AssembleOptions {
            dl_folder: request.dl_folder.clone(),
            concurrency: request.concurrency,
            selection: request.selection.clone(),
            force: request.force,
            title_search: request.title_search,
            bookshelves: request.bookshelves,
            fulltext_index: request.fulltext_index,
            output: request.output.clone(),
            project_id: request.project_id.clone(),
            title: request.title.clone(),
            description: request.description.clone(),
            stats_file: request.stats_file.clone(),
            optimizer_versions: request.optimizer_versions.clone(),
        };
        let result = pgarchive_archive::assemble_archive(self.storage()?, &opts).await?;
        if !result.missing_books.is_empty() {
            warn!(
                count = result.missing_books.len(),
                "selected books without downloaded files were left out"
            );
        }
        info!(
            output = %result.output.display(),
            books = result.book_count,
            reused = result.reused,
            "archive ready"
        );
        Ok(())
    }
}
