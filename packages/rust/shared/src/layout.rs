//! On-disk layout of the download cache.
//!
//! ```text
//! {root}/{id}/unoptimized/{id}.{kind}      files fetched from the mirror
//! {root}/{id}/optimized/{id}.{kind}        files served by the optimization cache
//! ```
//!
//! Covers use the `cover` kind with a `.jpg` name.

use std::path::{Path, PathBuf};

/// Paths inside a download cache folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder holding every file of a book.
    pub fn book_dir(&self, book_id: u32) -> PathBuf {
        self.root.join(book_id.to_string())
    }

    /// File fetched straight from the mirror.
    pub fn unoptimized(&self, book_id: u32, kind: &str) -> PathBuf {
        self.book_dir(book_id)
            .join("unoptimized")
            .join(file_name(book_id, kind))
    }

    /// File obtained from the optimization cache.
    pub fn optimized(&self, book_id: u32, kind: &str) -> PathBuf {
        self.book_dir(book_id)
            .join("optimized")
            .join(file_name(book_id, kind))
    }

    /// The best available copy: optimized first, then unoptimized.
    pub fn existing(&self, book_id: u32, kind: &str) -> Option<PathBuf> {
        [self.optimized(book_id, kind), self.unoptimized(book_id, kind)]
            .into_iter()
            .find(|p| p.is_file())
    }
}

fn file_name(book_id: u32, kind: &str) -> String {
    match kind {
        "cover" => format!("{book_id}_cover_image.jpg"),
        other => format!("{book_id}.{other}"),
    }
}
