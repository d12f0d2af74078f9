//! CLI definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use pgarchive_core::{
    LocalServices, PartitionMode, ProgressReporter, RunOptions, RunSummary, Stage, StageFlags,
};
use pgarchive_shared::{AppConfig, init_config, load_config, load_config_from};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// pgarchive: Project Gutenberg to offline archives.
#[derive(Parser)]
#[command(
    name = "pgarchive",
    version,
    about = "Build offline archives of Project Gutenberg books.",
    long_about = None,
    args_conflicts_with_subcommands = true,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.pgarchive/pgarchive.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Pipeline run flags.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Languages to include, comma-separated ISO codes (e.g. `en,fr`).
    #[arg(short, long)]
    pub languages: Option<String>,

    /// Formats to include: `all` or a comma-separated subset of html, epub, pdf.
    #[arg(short, long)]
    pub formats: Option<String>,

    /// Book ids and ranges, e.g. `1342,84,100-200`.
    #[arg(short, long)]
    pub books: Option<String>,

    /// Download and extract the RDF catalog.
    #[arg(short, long)]
    pub prepare: bool,

    /// Parse RDF records into the metadata store.
    #[arg(short = 'r', long)]
    pub parse: bool,

    /// Download the selected books.
    #[arg(short, long)]
    pub download: bool,

    /// Assemble the archive(s).
    #[arg(short, long)]
    pub zim: bool,

    /// Check that required external tools are installed.
    #[arg(short = 'k', long)]
    pub check: bool,

    /// Run every stage.
    #[arg(short, long)]
    pub complete: bool,

    /// Worker concurrency for parsing and assembly.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Download concurrency (defaults to --concurrency).
    #[arg(long)]
    pub dlc: Option<usize>,

    /// Folder holding the extracted RDF catalog.
    #[arg(long)]
    pub rdf_folder: Option<PathBuf>,

    /// URL of the RDF catalog tarball.
    #[arg(long)]
    pub rdf_url: Option<String>,

    /// Download cache folder.
    #[arg(long)]
    pub dl_folder: Option<PathBuf>,

    /// Archive file name.
    #[arg(long)]
    pub zim_file: Option<PathBuf>,

    /// Optimization cache location with credentials.
    #[arg(long, env = "PGARCHIVE_OPTIMIZATION_CACHE")]
    pub optimization_cache: Option<String>,

    /// Accept optimized content of any version from the cache.
    #[arg(long)]
    pub use_any_optimized_version: bool,

    /// Archive title.
    #[arg(long)]
    pub zim_title: Option<String>,

    /// Archive description.
    #[arg(long)]
    pub zim_desc: Option<String>,

    /// One archive per language plus a combined one, optionally into FOLDER.
    #[arg(long, num_args = 0..=1, value_name = "FOLDER")]
    pub one_language_one_zim: Option<Option<PathBuf>>,

    /// Include a title search index.
    #[arg(long)]
    pub title_search: bool,

    /// Include the bookshelves catalog.
    #[arg(long)]
    pub bookshelves: bool,

    /// Skip the full-text index.
    #[arg(long)]
    pub no_index: bool,

    /// Drop the metadata store before the run.
    #[arg(long)]
    pub wipe_db: bool,

    /// Redo work that is already done.
    #[arg(long)]
    pub force: bool,

    /// Write `{done, total}` progress JSON to this file.
    #[arg(long)]
    pub stats_filename: Option<PathBuf>,

    /// Metadata store location.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Folder archives are written to.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Merge flags over config values. Flags win.
    pub(crate) fn to_run_options(&self, config: &AppConfig) -> RunOptions {
        let defaults = &config.defaults;

        let (partition_mode, partition_dir) = match &self.one_language_one_zim {
            None => (PartitionMode::Off, None),
            Some(folder) => (PartitionMode::OneLanguagePerArchive, folder.clone()),
        };
        let output_dir = partition_dir
            .or_else(|| self.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(&defaults.output_dir));

        RunOptions {
            languages: self.languages.clone(),
            formats: self.formats.clone(),
            books: self.books.clone(),
            stages: StageFlags {
                prepare: self.prepare,
                parse: self.parse,
                download: self.download,
                assemble: self.zim,
                check_deps: self.check,
                complete: self.complete,
            },
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            dl_concurrency: self.dlc,
            rdf_folder: self
                .rdf_folder
                .clone()
                .unwrap_or_else(|| PathBuf::from(&defaults.rdf_folder)),
            rdf_url: self
                .rdf_url
                .clone()
                .unwrap_or_else(|| defaults.rdf_url.clone()),
            dl_folder: self
                .dl_folder
                .clone()
                .unwrap_or_else(|| PathBuf::from(&defaults.dl_folder)),
            output_dir,
            archive_file: self.zim_file.clone(),
            optimization_cache: self.optimization_cache.clone(),
            use_any_optimized_version: self.use_any_optimized_version,
            title: self.zim_title.clone(),
            description: self.zim_desc.clone(),
            partition_mode,
            title_search: self.title_search,
            bookshelves: self.bookshelves,
            fulltext_index: !self.no_index,
            wipe_db: self.wipe_db,
            force: self.force,
            stats_file: self.stats_filename.clone(),
        }
    }

    fn db_path(&self, config: &AppConfig) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.defaults.db_path))
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pgarchive=info",
        1 => "pgarchive=debug",
        _ => "pgarchive=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()).await,
        },
        None => cmd_run(&cli.run, cli.config.as_deref()).await,
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

async fn cmd_run(args: &RunArgs, config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let opts = args.to_run_options(&config);
    let db_path = args.db_path(&config);

    info!(
        db = %db_path.display(),
        languages = opts.languages.as_deref().unwrap_or("all"),
        formats = opts.formats.as_deref().unwrap_or("all"),
        "starting pgarchive run"
    );

    let services = LocalServices::from_config(&config, db_path)?;
    let reporter = CliProgress::new();

    let summary = pgarchive_core::run(&opts, &services, &reporter).await?;

    println!();
    println!("  Run complete!");
    println!(
        "  Stages:   {}",
        summary
            .stages
            .iter()
            .map(Stage::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    for archive in &summary.archives {
        println!("  Archive:  {}", archive.display());
    }
    println!("  Time:     {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        self.spinner.set_message(format!("Stage: {stage}"));
    }

    fn partition(&self, index: usize, total: usize, output: &Path) {
        self.spinner.set_message(format!(
            "Assembling [{}/{total}] {}",
            index + 1,
            output.display()
        ));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pgarchive").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_config_defaults() {
        let cli = parse(&["--concurrency", "4", "--dlc", "2", "-l", "en,fr", "--zim"]);
        let opts = cli.run.to_run_options(&AppConfig::default());

        assert_eq!(opts.concurrency, 4);
        assert_eq!(opts.dl_concurrency, Some(2));
        assert_eq!(opts.languages.as_deref(), Some("en,fr"));
        assert!(opts.stages.assemble);
        assert_eq!(opts.rdf_folder, PathBuf::from("rdf-files"));
        assert!(opts.fulltext_index);
    }

    #[test]
    fn config_defaults_fill_missing_flags() {
        let mut config = AppConfig::default();
        config.defaults.concurrency = 3;
        config.defaults.dl_folder = "/var/cache/pg".into();

        let opts = parse(&[]).run.to_run_options(&config);
        assert_eq!(opts.concurrency, 3);
        assert_eq!(opts.dl_concurrency, None);
        assert_eq!(opts.dl_folder, PathBuf::from("/var/cache/pg"));
        assert_eq!(opts.partition_mode, PartitionMode::Off);
    }

    #[test]
    fn partition_flag_without_folder() {
        let opts = parse(&["--one-language-one-zim", "--output-dir", "out"])
            .run
            .to_run_options(&AppConfig::default());
        assert_eq!(opts.partition_mode, PartitionMode::OneLanguagePerArchive);
        assert_eq!(opts.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn partition_folder_sets_output_dir() {
        let opts = parse(&["--one-language-one-zim", "per-lang", "--output-dir", "out"])
            .run
            .to_run_options(&AppConfig::default());
        assert_eq!(opts.partition_mode, PartitionMode::OneLanguagePerArchive);
        assert_eq!(opts.output_dir, PathBuf::from("per-lang"));
    }

    #[test]
    fn no_index_disables_fulltext() {
        let opts = parse(&["--no-index"]).run.to_run_options(&AppConfig::default());
        assert!(!opts.fulltext_index);
    }

    #[test]
    fn config_subcommand_parses() {
        let cli = parse(&["config", "show"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config {
                action: ConfigAction::Show
            })
        ));
    }
}
