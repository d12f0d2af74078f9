//! Core domain types for pgarchive.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PgArchiveError, Result};

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

/// An ebook format that can be downloaded and packaged.
///
/// Ordering follows the format matrix (html, epub, pdf), which is also the
/// order formats are processed and listed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Html,
    Epub,
    Pdf,
}

impl Format {
    /// Every known format, in matrix order.
    pub const ALL: [Format; 3] = [Format::Html, Format::Epub, Format::Pdf];

    /// Short name used on the command line and in file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Epub => "epub",
            Self::Pdf => "pdf",
        }
    }

    /// MIME type stored in the metadata store for this format.
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Html => "text/html",
            Self::Epub => "application/epub+zip",
            Self::Pdf => "application/pdf",
        }
    }

    /// Reverse lookup from a stored MIME type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.mime() == mime)
    }

    /// The full format set.
    pub fn all() -> BTreeSet<Format> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Format {
    type Err = PgArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "html" => Ok(Self::Html),
            "epub" => Ok(Self::Epub),
            "pdf" => Ok(Self::Pdf),
            other => Err(PgArchiveError::validation(format!(
                "unknown format '{other}': expected html, epub or pdf"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SelectionSet
// ---------------------------------------------------------------------------

/// Resolved user selection.
///
/// An empty `languages` or `book_ids` set means "no filter": every language
/// or every book matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSet {
    /// Normalized lowercase language codes.
    pub languages: BTreeSet<String>,
    /// Requested formats (never empty once resolved).
    pub formats: BTreeSet<Format>,
    /// Requested Project Gutenberg book ids.
    pub book_ids: BTreeSet<u32>,
}

impl SelectionSet {
    /// Same selection narrowed to another language scope.
    pub fn with_languages(&self, languages: BTreeSet<String>) -> Self {
        Self {
            languages,
            formats: self.formats.clone(),
            book_ids: self.book_ids.clone(),
        }
    }

    /// Whether every language matches. `mul` is the catalog's code for
    /// multilingual selections and is treated the same way.
    pub fn matches_all_languages(&self) -> bool {
        self.languages.is_empty() || self.languages.contains("mul")
    }

    /// Whether every format is requested.
    pub fn has_all_formats(&self) -> bool {
        self.formats.len() >= Format::ALL.len()
    }
}

// ---------------------------------------------------------------------------
// Catalog records
// ---------------------------------------------------------------------------

/// An author (creator agent) as extracted from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorMeta {
    /// Catalog agent id.
    pub gut_id: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_year: Option<String>,
}

impl AuthorMeta {
    /// Display name, `First Last`, falling back to whichever part exists.
    pub fn name(&self) -> String {
        fn sanitize(text: &str) -> String {
            text.trim().replace('/', "-").chars().take(230).collect()
        }

        let first = self.first_names.as_deref().unwrap_or("").trim();
        let last = self.last_name.trim();
        match (first.is_empty(), last.is_empty()) {
            (true, true) => sanitize("Anonymous"),
            (true, false) => sanitize(last),
            (false, true) => sanitize(first),
            (false, false) => sanitize(&format!("{first} {last}")),
        }
    }
}

/// One downloadable file advertised for a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatMeta {
    /// MIME type without parameters.
    pub mime: String,
    /// Whether the file carries images.
    pub images: bool,
    /// File name pattern with the book id replaced by `{id}`.
    pub pattern: String,
    /// Where the catalog says the file lives.
    pub url: String,
}

impl FormatMeta {
    /// Whether the file is a zip archive wrapping the content.
    pub fn is_zipped(&self) -> bool {
        self.pattern.ends_with(".zip")
    }
}

/// A book record as extracted from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMeta {
    pub id: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub language: String,
    pub downloads: u32,
    /// License slug (`PD`, `None` or `Copyright`).
    pub license: String,
    pub author: AuthorMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookshelf: Option<String>,
    pub cover_page: bool,
    #[serde(default)]
    pub formats: Vec<FormatMeta>,
}

// ---------------------------------------------------------------------------
// Optimization cache
// ---------------------------------------------------------------------------

/// Validated access to the optimization cache.
///
/// Obtained only through credential validation and passed downstream
/// unchanged. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheHandle {
    endpoint: Url,
    bucket: String,
    key_id: String,
    secret: String,
}

impl CacheHandle {
    /// Split a cache location of the form
    /// `https://host/?keyId=..&secretAccessKey=..&bucketName=..`.
    pub fn from_location(location: &Url) -> Result<Self> {
        let param = |name: &str| {
            location
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    PgArchiveError::Cache(format!("cache location is missing '{name}'"))
                })
        };

        let key_id = param("keyId")?;
        let secret = param("secretAccessKey")?;
        let bucket = param("bucketName")?;

        let mut endpoint = location.clone();
        endpoint.set_query(None);
        endpoint.set_fragment(None);
        endpoint.set_path("");

        Ok(Self {
            endpoint,
            bucket,
            key_id,
            secret,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// URL of the bucket root.
    pub fn bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint.as_str().trim_end_matches('/'), self.bucket)
    }

    /// URL of an object stored in the bucket.
    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url(), key.trim_start_matches('/'))
    }
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Optimizer version expected for each cached artifact kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptimizerVersions(BTreeMap<String, String>);

impl OptimizerVersions {
    /// The versions this build of the optimizer produces.
    pub fn pinned() -> Self {
        Self(
            [("html", "v1"), ("epub", "v1"), ("cover", "v1")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Version for an artifact kind (`html`, `epub`, `cover`, ...).
    pub fn get(&self, kind: &str) -> Option<&str> {
        self.0.get(kind).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_matrix_order() {
        let all: Vec<_> = Format::all().into_iter().collect();
        assert_eq!(all, vec![Format::Html, Format::Epub, Format::Pdf]);
        assert_eq!(Format::from_mime("application/epub+zip"), Some(Format::Epub));
        assert!("mobi".parse::<Format>().is_err());
    }

    #[test]
    fn author_name_fallbacks() {
        let mut author = AuthorMeta {
            gut_id: "68".into(),
            last_name: "Austen".into(),
            first_names: Some("Jane".into()),
            birth_year: None,
            death_year: None,
        };
        assert_eq!(author.name(), "Jane Austen");

        author.first_names = None;
        assert_eq!(author.name(), "Austen");

        author.last_name = String::new();
        assert_eq!(author.name(), "Anonymous");
    }

    #[test]
    fn mul_matches_all_languages() {
        let mut selection = SelectionSet::default();
        assert!(selection.matches_all_languages());
        selection.languages.insert("mul".into());
        assert!(selection.matches_all_languages());
        selection.languages = ["fr".to_string()].into_iter().collect();
        assert!(!selection.matches_all_languages());
    }

    #[test]
    fn cache_handle_from_location() {
        let url = Url::parse(
            "https://s3.example.com/?keyId=AKIA&secretAccessKey=s3cr3t&bucketName=books",
        )
        .unwrap();
        let handle = CacheHandle::from_location(&url).expect("parse location");
        assert_eq!(handle.bucket(), "books");
        assert_eq!(handle.bucket_url(), "https://s3.example.com/books");
        assert_eq!(
            handle.object_url("html/1342"),
            "https://s3.example.com/books/html/1342"
        );
        assert!(!format!("{handle:?}").contains("s3cr3t"));
    }

    #[test]
    fn cache_handle_requires_credentials() {
        let url = Url::parse("https://s3.example.com/?bucketName=books").unwrap();
        let err = CacheHandle::from_location(&url).unwrap_err();
        assert!(err.to_string().contains("keyId"));
    }

    #[test]
    fn pinned_optimizer_versions() {
        let versions = OptimizerVersions::pinned();
        assert_eq!(versions.get("html"), Some("v1"));
        assert_eq!(versions.get("cover"), Some("v1"));
        assert_eq!(versions.get("pdf"), None);
    }
}
