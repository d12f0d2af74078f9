//! Shared types, error model, and configuration for pgarchive.
//!
//! This crate is the foundation depended on by all other pgarchive crates.
//! It provides:
//! - [`PgArchiveError`]: the unified error type
//! - Domain types ([`Format`], [`SelectionSet`], [`BookMeta`], [`CacheHandle`])
//! - Configuration ([`AppConfig`], config loading)
//! - The download cache layout ([`CacheLayout`])

pub mod config;
pub mod error;
pub mod layout;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, DependenciesConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{PgArchiveError, Result};
pub use layout::CacheLayout;
pub use types::{
    AuthorMeta, BookMeta, CacheHandle, Format, FormatMeta, OptimizerVersions, SelectionSet,
};
