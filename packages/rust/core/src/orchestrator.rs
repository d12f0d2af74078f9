//! The pipeline driver: resolve a run, gate it, then execute its stages in
//! order and assemble one archive per partition.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use pgarchive_archive::{archive_file_name, default_description, default_title, project_id};
use pgarchive_shared::{CacheHandle, OptimizerVersions, PgArchiveError, Result, SelectionSet};
use tracing::{info, instrument};

use crate::collaborators::{AssembleRequest, Collaborators, DownloadRequest};
use crate::gate;
use crate::partition::{Partition, PartitionMode, plan_partitions};
use crate::progress::ProgressReporter;
use crate::selection::resolve_selection;
use crate::stages::{Stage, StageFlags, StagePlan};

/// Raw run options, as collected from the command line and config file.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Comma-separated language codes.
    pub languages: Option<String>,
    /// Comma-separated formats, or `all`.
    pub formats: Option<String>,
    /// Book ids and ranges, e.g. `1342,84,100-200`.
    pub books: Option<String>,
    pub stages: StageFlags,
    /// General worker concurrency.
    pub concurrency: usize,
    /// Download concurrency; falls back to `concurrency`.
    pub dl_concurrency: Option<usize>,
    pub rdf_folder: PathBuf,
    pub rdf_url: String,
    pub dl_folder: PathBuf,
    /// Folder archives are written to.
    pub output_dir: PathBuf,
    /// Explicit archive file name.
    pub archive_file: Option<PathBuf>,
    /// Optimization cache location with credentials.
    pub optimization_cache: Option<String>,
    pub use_any_optimized_version: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub partition_mode: PartitionMode,
    pub title_search: bool,
    pub bookshelves: bool,
    pub fulltext_index: bool,
    pub wipe_db: bool,
    pub force: bool,
    pub stats_file: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            languages: None,
            formats: None,
            books: None,
            stages: StageFlags::default(),
            concurrency: 16,
            dl_concurrency: None,
            rdf_folder: PathBuf::from("rdf-files"),
            rdf_url: String::new(),
            dl_folder: PathBuf::from("dl-cache"),
            output_dir: PathBuf::from("."),
            archive_file: None,
            optimization_cache: None,
            use_any_optimized_version: false,
            title: None,
            description: None,
            partition_mode: PartitionMode::Off,
            title_search: false,
            bookshelves: false,
            fulltext_index: true,
            wipe_db: false,
            force: false,
            stats_file: None,
        }
    }
}

/// Resolved configuration shared read-only by every stage of a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub selection: SelectionSet,
    pub plan: StagePlan,
    pub concurrency: usize,
    pub dl_concurrency: usize,
    pub force: bool,
    pub wipe_db: bool,
    pub cache: Option<CacheHandle>,
    /// Versions required from the optimization cache; `None` accepts any.
    pub optimizer_versions: Option<OptimizerVersions>,
    pub rdf_folder: PathBuf,
    pub rdf_url: String,
    pub dl_folder: PathBuf,
    pub output_dir: PathBuf,
    pub archive_file: Option<PathBuf>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub partition_mode: PartitionMode,
    pub title_search: bool,
    pub bookshelves: bool,
    pub fulltext_index: bool,
    pub stats_file: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}

impl RunConfig {
    /// Resolve raw options. The cache handle is filled in by the gate.
    pub fn resolve(opts: &RunOptions) -> Result<Self> {
        if opts.concurrency == 0 {
            return Err(PgArchiveError::validation("concurrency must be at least 1"));
        }
        if opts.dl_concurrency == Some(0) {
            return Err(PgArchiveError::validation(
                "download concurrency must be at least 1",
            ));
        }

        let selection = resolve_selection(
            opts.languages.as_deref(),
            opts.formats.as_deref(),
            opts.books.as_deref(),
        )?;

        Ok(Self {
            selection,
            plan: StagePlan::resolve(opts.stages),
            concurrency: opts.concurrency,
            dl_concurrency: opts.dl_concurrency.unwrap_or(opts.concurrency),
            force: opts.force,
            wipe_db: opts.wipe_db,
            cache: None,
            optimizer_versions: (!opts.use_any_optimized_version)
                .then(OptimizerVersions::pinned),
            rdf_folder: opts.rdf_folder.clone(),
            rdf_url: opts.rdf_url.clone(),
            dl_folder: opts.dl_folder.clone(),
            output_dir: opts.output_dir.clone(),
            archive_file: opts.archive_file.clone(),
            title: opts.title.clone(),
            description: opts.description.clone(),
            partition_mode: opts.partition_mode,
            title_search: opts.title_search,
            bookshelves: opts.bookshelves,
            fulltext_index: opts.fulltext_index,
            stats_file: opts.stats_file.clone(),
            started_at: Utc::now(),
        })
    }

    /// Assembly parameters for one partition.
    pub fn assemble_request(&self, partition: &Partition) -> AssembleRequest {
        let selection = self.selection.with_languages(partition.language_set());
        let project_id = project_id(
            &partition.languages,
            &selection.formats,
            !selection.book_ids.is_empty(),
            self.started_at,
        );

        let single_language = if partition.combined {
            None
        } else {
            partition.languages.first().map(String::as_str)
        };
        let output = self.output_dir.join(archive_file_name(
            self.archive_file.as_deref(),
            single_language,
            &project_id,
        ));

        let title = self
            .title
            .clone()
            .unwrap_or_else(|| default_title(&partition.languages, &selection.formats));
        let description = self
            .description
            .clone()
            .unwrap_or_else(|| default_description(&partition.languages));

        AssembleRequest {
            dl_folder: self.dl_folder.clone(),
            concurrency: self.concurrency,
            selection,
            force: self.force,
            title_search: self.title_search,
            bookshelves: self.bookshelves,
            fulltext_index: self.fulltext_index,
            cache: self.cache.clone(),
            optimizer_versions: self.optimizer_versions.clone(),
            output,
            project_id,
            title,
            description,
            stats_file: self.stats_file.clone(),
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Stages executed, in order.
    pub stages: Vec<Stage>,
    /// Archives assembled, in order.
    pub archives: Vec<PathBuf>,
    pub elapsed: std::time::Duration,
}

/// Run the pipeline.
///
/// 1. Resolve the selection and stage plan
/// 2. Validate the optimization cache (fatal on failure)
/// 3. Check dependencies
/// 4. Prepare the RDF folder
/// 5. Set up the metadata store
/// 6. Parse RDF records and register download URLs
/// 7. Download books
/// 8. Assemble one archive per partition
#[instrument(skip_all, fields(concurrency = opts.concurrency))]
pub async fn run<S: Collaborators + ?Sized>(
    opts: &RunOptions,
    services: &S,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let start = Instant::now();

    let config = RunConfig::resolve(opts)?;
    let cache = gate::validate_cache(services, opts.optimization_cache.as_deref()).await?;
    let config = RunConfig { cache, ..config };

    let mut summary = RunSummary::default();

    // --- Dependency check ---
    if config.plan.runs(Stage::CheckDeps) {
        progress.stage(Stage::CheckDeps);
        gate::check_dependencies(services).await?;
        summary.stages.push(Stage::CheckDeps);
    }

    // --- Prepare ---
    if config.plan.runs(Stage::Prepare) {
        progress.stage(Stage::Prepare);
        info!(folder = %config.rdf_folder.display(), "preparing RDF folder");
        services
            .setup_archive_source_folder(&config.rdf_url, &config.rdf_folder, config.force)
            .await?;
        summary.stages.push(Stage::Prepare);
    }

    services.setup_metadata_store(config.wipe_db).await?;

    // --- Parse ---
    if config.plan.runs(Stage::Parse) {
        progress.stage(Stage::Parse);
        info!(folder = %config.rdf_folder.display(), "parsing RDF records");
        services
            .parse_and_populate(
                &config.rdf_folder,
                &config.selection.book_ids,
                config.concurrency,
                config.force,
            )
            .await?;
        services.register_derived_urls(config.force).await?;
        summary.stages.push(Stage::Parse);
    }

    // --- Download ---
    if config.plan.runs(Stage::Download) {
        progress.stage(Stage::Download);
        info!(concurrency = config.dl_concurrency, "downloading books");
        let request = DownloadRequest {
            dl_folder: config.dl_folder.clone(),
            concurrency: config.dl_concurrency,
            selection: config.selection.clone(),
            force: config.force,
            cache: config.cache.clone(),
            optimizer_versions: config.optimizer_versions.clone(),
        };
        services.download_selected_books(&request).await?;
        summary.stages.push(Stage::Download);
    }

    // --- Assemble ---
    if config.plan.runs(Stage::Assemble) {
        progress.stage(Stage::Assemble);
        let partitions =
            plan_partitions(config.partition_mode, &config.selection.languages, services).await?;
        let total = partitions.len();
        for (index, partition) in partitions.iter().enumerate() {
            let request = config.assemble_request(partition);
            progress.partition(index, total, &request.output);
            info!(
                project_id = %request.project_id,
                output = %request.output.display(),
                "assembling archive"
            );
            services.assemble_archive(&request).await?;
            summary.archives.push(request.output);
        }
        summary.stages.push(Stage::Assemble);
    }

    summary.elapsed = start.elapsed();
    info!(
        stages = summary.stages.len(),
        archives = summary.archives.len(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "run complete"
    );
    progress.done(&summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::collaborators::{DependencyReport, LanguageCatalog};
    use crate::progress::SilentProgress;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        CheckDependencies,
        SetupSource,
        SetupStore { wipe: bool },
        Parse { book_ids: BTreeSet<u32>, concurrency: usize },
        RegisterUrls,
        Download { concurrency: usize, versions: bool },
        ValidateCache,
        DistinctLanguages,
        Assemble { languages: BTreeSet<String>, output: PathBuf },
    }

    #[derive(Default)]
    struct RecordingServices {
        calls: Mutex<Vec<Call>>,
        missing_tools: Vec<String>,
        store_languages: Vec<String>,
        fail_parse: bool,
    }

    impl RecordingServices {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl LanguageCatalog for RecordingServices {
        async fn distinct_languages(&self) -> Result<Vec<String>> {
            self.record(Call::DistinctLanguages);
            Ok(self.store_languages.clone())
        }
    }

    #[async_trait]
    impl Collaborators for RecordingServices {
        async fn check_dependencies(&self) -> Result<DependencyReport> {
            self.record(Call::CheckDependencies);
            Ok(DependencyReport {
                missing: self.missing_tools.clone(),
            })
        }

        async fn setup_archive_source_folder(
            &self,
            _url: &str,
            _path: &Path,
            _force: bool,
        ) -> Result<()> {
            self.record(Call::SetupSource);
            Ok(())
        }

        async fn setup_metadata_store(&self, wipe: bool) -> Result<()> {
            self.record(Call::SetupStore { wipe });
            Ok(())
        }

        async fn parse_and_populate(
            &self,
            _path: &Path,
            book_ids: &BTreeSet<u32>,
            concurrency: usize,
            _force: bool,
        ) -> Result<()> {
            self.record(Call::Parse {
                book_ids: book_ids.clone(),
                concurrency,
            });
            if self.fail_parse {
                return Err(PgArchiveError::parse("corrupt catalog"));
            }
            Ok(())
        }

        async fn register_derived_urls(&self, _force: bool) -> Result<()> {
            self.record(Call::RegisterUrls);
            Ok(())
        }

        async fn download_selected_books(&self, request: &DownloadRequest) -> Result<()> {
            self.record(Call::Download {
                concurrency: request.concurrency,
                versions: request.optimizer_versions.is_some(),
            });
            Ok(())
        }

        async fn validate_cache_credentials(&self, location: &Url) -> Result<CacheHandle> {
            self.record(Call::ValidateCache);
            CacheHandle::from_location(location)
        }

        async fn assemble_archive(&self, request: &AssembleRequest) -> Result<()> {
            self.record(Call::Assemble {
                languages: request.selection.languages.clone(),
                output: request.output.clone(),
            });
            Ok(())
        }
    }

    fn langs(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn assembled_languages(calls: &[Call]) -> Vec<BTreeSet<String>> {
        calls
            .iter()
            .filter_map(|c| match c {
                Call::Assemble { languages, .. } => Some(languages.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn complete_run_executes_stages_in_order() {
        let services = RecordingServices::default();
        let opts = RunOptions {
            concurrency: 4,
            ..Default::default()
        };

        let summary = run(&opts, &services, &SilentProgress).await.unwrap();

        assert_eq!(
            summary.stages,
            vec![
                Stage::CheckDeps,
                Stage::Prepare,
                Stage::Parse,
                Stage::Download,
                Stage::Assemble
            ]
        );
        assert_eq!(
            services.calls(),
            vec![
                Call::CheckDependencies,
                Call::SetupSource,
                Call::SetupStore { wipe: false },
                Call::Parse {
                    book_ids: BTreeSet::new(),
                    concurrency: 4
                },
                Call::RegisterUrls,
                Call::Download {
                    concurrency: 4,
                    versions: true
                },
                Call::Assemble {
                    languages: BTreeSet::new(),
                    output: summary.archives[0].clone()
                },
            ]
        );
    }

    #[tokio::test]
    async fn invalid_cache_location_stops_before_any_stage() {
        let services = RecordingServices::default();
        let opts = RunOptions {
            optimization_cache: Some("https://cache.example.org/?keyId=abc".into()),
            ..Default::default()
        };

        let err = run(&opts, &services, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, PgArchiveError::Cache(_)));
        assert_eq!(services.calls(), vec![Call::ValidateCache]);
    }

    #[tokio::test]
    async fn unparseable_cache_url_is_a_cache_error() {
        let services = RecordingServices::default();
        let opts = RunOptions {
            optimization_cache: Some("not a url".into()),
            ..Default::default()
        };

        let err = run(&opts, &services, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, PgArchiveError::Cache(_)));
        assert!(services.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_dependencies_abort_the_run() {
        let services = RecordingServices {
            missing_tools: vec!["tar".into()],
            ..Default::default()
        };

        let err = run(&RunOptions::default(), &services, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PgArchiveError::MissingDependencies { .. }));
        assert_eq!(services.calls(), vec![Call::CheckDependencies]);
    }

    #[tokio::test]
    async fn download_concurrency_defaults_to_general() {
        let opts = RunOptions {
            concurrency: 4,
            ..Default::default()
        };
        assert_eq!(RunConfig::resolve(&opts).unwrap().dl_concurrency, 4);

        let opts = RunOptions {
            concurrency: 4,
            dl_concurrency: Some(2),
            ..Default::default()
        };
        let config = RunConfig::resolve(&opts).unwrap();
        assert_eq!(config.dl_concurrency, 2);
        assert_eq!(config.concurrency, 4);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let opts = RunOptions {
            concurrency: 0,
            ..Default::default()
        };
        assert!(RunConfig::resolve(&opts).is_err());
    }

    #[tokio::test]
    async fn partitions_per_language_with_filter() {
        let services = RecordingServices::default();
        let opts = RunOptions {
            languages: Some("en,fr".into()),
            partition_mode: PartitionMode::OneLanguagePerArchive,
            stages: StageFlags {
                assemble: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let summary = run(&opts, &services, &SilentProgress).await.unwrap();

        assert_eq!(
            assembled_languages(&services.calls()),
            vec![langs(&["en"]), langs(&["fr"]), langs(&["en", "fr"])]
        );
        assert_eq!(summary.archives.len(), 3);
        assert!(!services.calls().contains(&Call::DistinctLanguages));
    }

    #[tokio::test]
    async fn partitions_from_store_without_filter() {
        let services = RecordingServices {
            store_languages: vec!["en".into(), "de".into()],
            ..Default::default()
        };
        let opts = RunOptions {
            partition_mode: PartitionMode::OneLanguagePerArchive,
            stages: StageFlags {
                assemble: true,
                ..Default::default()
            },
            ..Default::default()
        };

        run(&opts, &services, &SilentProgress).await.unwrap();

        assert_eq!(
            assembled_languages(&services.calls()),
            vec![langs(&["en"]), langs(&["de"]), BTreeSet::new()]
        );
    }

    #[tokio::test]
    async fn explicit_archive_name_gets_language_suffix() {
        let services = RecordingServices::default();
        let opts = RunOptions {
            languages: Some("en,fr".into()),
            partition_mode: PartitionMode::OneLanguagePerArchive,
            archive_file: Some(PathBuf::from("library.zip")),
            output_dir: PathBuf::from("out"),
            stages: StageFlags {
                assemble: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let summary = run(&opts, &services, &SilentProgress).await.unwrap();

        assert_eq!(
            summary.archives,
            vec![
                PathBuf::from("out/library_en.zip"),
                PathBuf::from("out/library_fr.zip"),
                PathBuf::from("out/library.zip"),
            ]
        );
    }

    #[tokio::test]
    async fn any_optimized_version_drops_version_pins() {
        let services = RecordingServices::default();
        let opts = RunOptions {
            use_any_optimized_version: true,
            stages: StageFlags {
                download: true,
                ..Default::default()
            },
            ..Default::default()
        };

        run(&opts, &services, &SilentProgress).await.unwrap();

        assert!(services.calls().contains(&Call::Download {
            concurrency: 16,
            versions: false
        }));
    }

    #[tokio::test]
    async fn malformed_book_selector_selects_everything() {
        let services = RecordingServices::default();
        let opts = RunOptions {
            books: Some("1-99999999999".into()),
            stages: StageFlags {
                parse: true,
                ..Default::default()
            },
            ..Default::default()
        };

        run(&opts, &services, &SilentProgress).await.unwrap();

        assert!(services.calls().contains(&Call::Parse {
            book_ids: BTreeSet::new(),
            concurrency: 16
        }));
    }

    #[tokio::test]
    async fn assemble_only_still_sets_up_the_store() {
        let services = RecordingServices::default();
        let opts = RunOptions {
            wipe_db: true,
            stages: StageFlags {
                assemble: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let summary = run(&opts, &services, &SilentProgress).await.unwrap();

        assert_eq!(summary.stages, vec![Stage::Assemble]);
        let calls = services.calls();
        assert_eq!(calls[0], Call::SetupStore { wipe: true });
        assert!(matches!(calls[1], Call::Assemble { .. }));
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test]
    async fn collaborator_error_stops_later_stages() {
        let services = RecordingServices {
            fail_parse: true,
            ..Default::default()
        };

        let err = run(&RunOptions::default(), &services, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PgArchiveError::Parse { .. }));

        let calls = services.calls();
        assert!(!calls.contains(&Call::RegisterUrls));
        assert!(!calls.iter().any(|c| matches!(c, Call::Download { .. })));
    }

    #[tokio::test]
    async fn unknown_format_fails_before_any_stage() {
        let services = RecordingServices::default();
        let opts = RunOptions {
            formats: Some("mobi".into()),
            ..Default::default()
        };

        assert!(run(&opts, &services, &SilentProgress).await.is_err());
        assert!(services.calls().is_empty());
    }
}
