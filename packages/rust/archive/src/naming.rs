//! Archive naming: project ids, file names, default title and description.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pgarchive_shared::Format;

/// Above this many languages the title no longer lists them.
const MAX_TITLE_LANGUAGES: usize = 5;

/// Deterministic name stem for an archive.
///
/// `gutenberg_{langs}[_{formats}]_{selection|all}_{YYYY-MM}`, where `langs`
/// is `mul` for an unfiltered partition and the formats part only appears
/// when fewer than all formats are selected.
pub fn project_id(
    languages: &[String],
    formats: &BTreeSet<Format>,
    has_book_filter: bool,
    now: DateTime<Utc>,
) -> String {
    let mut parts = vec!["gutenberg".to_string()];
    parts.push(if languages.is_empty() {
        "mul".to_string()
    } else {
        languages.join("-")
    });
    if formats.len() < Format::ALL.len() {
        parts.push(
            formats
                .iter()
                .map(Format::as_str)
                .collect::<Vec<_>>()
                .join("-"),
        );
    }
    parts.push(if has_book_filter { "selection" } else { "all" }.to_string());
    parts.push(now.format("%Y-%m").to_string());
    parts.join("_")
}

/// File name for one partition's archive.
///
/// Without an explicit name the archive is `{project_id}.zip`. An explicit
/// name is used as is for the combined partition, and gets a `_{lang}`
/// suffix on its stem for single-language partitions.
pub fn archive_file_name(
    explicit: Option<&Path>,
    single_language: Option<&str>,
    project_id: &str,
) -> PathBuf {
    let Some(explicit) = explicit else {
        return PathBuf::from(format!("{project_id}.zip"));
    };
    let Some(lang) = single_language else {
        return explicit.to_path_buf();
    };

    let stem = explicit
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match explicit.extension() {
        Some(ext) => format!("{stem}_{lang}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{lang}"),
    };
    explicit.with_file_name(name)
}

/// Default archive title.
pub fn default_title(languages: &[String], formats: &BTreeSet<Format>) -> String {
    let mut title = String::from("Project Gutenberg Library");
    if !languages.is_empty() && languages.len() <= MAX_TITLE_LANGUAGES {
        let langs = languages
            .iter()
            .map(|l| l.to_uppercase())
            .collect::<Vec<_>>()
            .join(", ");
        title.push_str(&format!(" ({langs})"));
    }
    if formats.len() < Format::ALL.len() {
        let fmts = formats
            .iter()
            .map(Format::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        title.push_str(&format!(" with {fmts}"));
    }
    title
}

/// Default archive description.
pub fn default_description(languages: &[String]) -> String {
    if languages.is_empty() {
        "All books in all languages".to_string()
    } else {
        format!("All books in {}", languages.join(", "))
    }
}
