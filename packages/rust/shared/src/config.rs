//! Application configuration for pgarchive.
//!
//! User config lives at `~/.pgarchive/pgarchive.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PgArchiveError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pgarchive.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pgarchive";

// ---------------------------------------------------------------------------
// Config structs (matching pgarchive.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// External tools checked before a run.
    #[serde(default)]
    pub dependencies: DependenciesConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// General worker concurrency (parse, assemble).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Folder the RDF tarball is extracted into.
    #[serde(default = "default_rdf_folder")]
    pub rdf_folder: String,

    /// Where to fetch the RDF tarball from.
    #[serde(default = "default_rdf_url")]
    pub rdf_url: String,

    /// Per-book download cache.
    #[serde(default = "default_dl_folder")]
    pub dl_folder: String,

    /// Where archives are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Metadata store location.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Mirror base used to derive download URLs.
    #[serde(default = "default_mirror_url")]
    pub mirror_url: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            rdf_folder: default_rdf_folder(),
            rdf_url: default_rdf_url(),
            dl_folder: default_dl_folder(),
            output_dir: default_output_dir(),
            db_path: default_db_path(),
            mirror_url: default_mirror_url(),
        }
    }
}

fn default_concurrency() -> usize {
    16
}
fn default_rdf_folder() -> String {
    "rdf-files".into()
}
fn default_rdf_url() -> String {
    "https://www.gutenberg.org/cache/epub/feeds/rdf-files.tar.bz2".into()
}
fn default_dl_folder() -> String {
    "dl-cache".into()
}
fn default_output_dir() -> String {
    ".".into()
}
fn default_db_path() -> String {
    "gutenberg.db".into()
}
fn default_mirror_url() -> String {
    "https://aleph.gutenberg.org".into()
}

/// `[dependencies]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependenciesConfig {
    /// Executables that must be on `PATH` when the dependency check runs.
    #[serde(default = "default_required_tools")]
    pub required: Vec<String>,
}

impl Default for DependenciesConfig {
    fn default() -> Self {
        Self {
            required: default_required_tools(),
        }
    }
}

fn default_required_tools() -> Vec<String> {
    vec!["tar".into()]
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pgarchive/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PgArchiveError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pgarchive/pgarchive.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PgArchiveError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PgArchiveError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    if config.defaults.concurrency == 0 {
        return Err(PgArchiveError::config(format!(
            "{}: defaults.concurrency must be at least 1",
            path.display()
        )));
    }

    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PgArchiveError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PgArchiveError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PgArchiveError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
