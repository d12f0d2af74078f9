//! Catalog loading for pgarchive.
//!
//! Walks an extracted RDF folder, extracts book records and writes them to
//! the metadata store. Also derives mirror download URLs for every stored
//! book format.

pub mod rdf;
pub mod urls;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgarchive_shared::{BookMeta, PgArchiveError, Result};
use pgarchive_storage::Storage;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

pub use rdf::parse_rdf;
pub use urls::{mirror_url_for, register_derived_urls};

/// Records written to the store per transaction.
const WRITE_BATCH: usize = 500;

/// Summary of a populate run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulateSummary {
    /// Records extracted and stored.
    pub stored: usize,
    /// Records skipped because the book was already stored.
    pub skipped: usize,
    /// Records that could not be read or extracted.
    pub failed: usize,
}

/// Extract every `pg<ID>.rdf` under `folder` into `storage`.
///
/// An empty `book_ids` set loads every record. Records already in the store
/// are skipped unless `force` is set. At most `concurrency` files are read
/// and extracted at once; writes happen sequentially.
#[instrument(skip_all, fields(folder = %folder.display(), concurrency = concurrency))]
pub async fn parse_and_populate(
    storage: &Storage,
    folder: &Path,
    book_ids: &BTreeSet<u32>,
    concurrency: usize,
    force: bool,
) -> Result<PopulateSummary> {
    let mut summary = PopulateSummary::default();

    let mut files = Vec::new();
    for (book_id, path) in collect_rdf_files(folder)? {
        if !book_ids.is_empty() && !book_ids.contains(&book_id) {
            continue;
        }
        if !force && storage.has_book(book_id).await? {
            summary.skipped += 1;
            continue;
        }
        files.push((book_id, path));
    }

    info!(records = files.len(), skipped = summary.skipped, "extracting RDF records");

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    for chunk in files.chunks(WRITE_BATCH) {
        let mut handles = Vec::with_capacity(chunk.len());
        for (book_id, path) in chunk.iter().cloned() {
            let sem = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|e| PgArchiveError::parse(e.to_string()))?;
                extract_file(book_id, &path).await
            }));
        }

        let mut batch: Vec<BookMeta> = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok(book)) => batch.push(book),
                Ok(Err(e)) => {
                    warn!(error = %e, "skipping RDF record");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "RDF extraction task failed");
                    summary.failed += 1;
                }
            }
        }

        storage.upsert_books(&batch).await?;
        summary.stored += batch.len();
        debug!(stored = summary.stored, "stored RDF batch");
    }

    info!(
        stored = summary.stored,
        skipped = summary.skipped,
        failed = summary.failed,
        "catalog populated"
    );
    Ok(summary)
}

async fn extract_file(book_id: u32, path: &Path) -> Result<BookMeta> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PgArchiveError::io(path, e))?;
    rdf::parse_rdf(book_id, &content)
}

/// Every `pg<ID>.rdf` file below `folder`, sorted by book id.
fn collect_rdf_files(folder: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut found = Vec::new();
    let mut pending = vec![folder.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| PgArchiveError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| PgArchiveError::io(&dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let id = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(rdf::book_id_from_file_name);
            if let Some(id) = id {
                found.push((id, path));
            }
        }
    }

    found.sort_by_key(|(id, _)| *id);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(id: u32, title: &str, lang: &str) -> String {
        format!(
            r#"<rdf:RDF>
  <pgterms:ebook rdf:about="ebooks/{id}">
    <dcterms:title>{title}</dcterms:title>
    <dcterms:language><rdf:Description><rdf:value>{lang}</rdf:value></rdf:Description></dcterms:language>
    <pgterms:downloads>{id}</pgterms:downloads>
    <dcterms:rights>Public domain in the USA.</dcterms:rights>
    <dcterms:hasFormat>
      <pgterms:file rdf:about="https://www.gutenberg.org/files/{id}/{id}-h/{id}-h.htm">
        <dcterms:format><rdf:Description><rdf:value>text/html</rdf:value></rdf:Description></dcterms:format>
      </pgterms:file>
    </dcterms:hasFormat>
  </pgterms:ebook>
</rdf:RDF>"#
        )
    }

    /// Lay out `cache/epub/{id}/pg{id}.rdf` the way the catalog tarball does.
    fn rdf_folder(records: &[(u32, String)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("pga_rdf_{}", Uuid::now_v7()));
        for (id, content) in records {
            let dir = root.join("cache").join("epub").join(id.to_string());
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("pg{id}.rdf")), content).unwrap();
        }
        root
    }

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("pga_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn populates_every_record() {
        let folder = rdf_folder(&[
            (1, record(1, "First", "en")),
            (2, record(2, "Second", "fr")),
            (3, "<rdf:RDF></rdf:RDF>".into()),
        ]);
        let storage = test_storage().await;

        let summary = parse_and_populate(&storage, &folder, &BTreeSet::new(), 4, false)
            .await
            .unwrap();

        assert_eq!(summary.stored, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(storage.book_count().await.unwrap(), 2);
        assert_eq!(
            storage.distinct_languages().await.unwrap(),
            vec!["en".to_string(), "fr".to_string()]
        );
        assert_eq!(storage.formats_for_book(2).await.unwrap()[0].pattern, "{id}-h.htm");
    }

    #[tokio::test]
    async fn honours_book_filter_and_skips_known_books() {
        let folder = rdf_folder(&[
            (10, record(10, "Ten", "en")),
            (11, record(11, "Eleven", "en")),
            (12, record(12, "Twelve", "de")),
        ]);
        let storage = test_storage().await;
        let only: BTreeSet<u32> = [10, 12].into_iter().collect();

        let first = parse_and_populate(&storage, &folder, &only, 2, false).await.unwrap();
        assert_eq!(first.stored, 2);
        assert!(!storage.has_book(11).await.unwrap());

        let again = parse_and_populate(&storage, &folder, &only, 2, false).await.unwrap();
        assert_eq!(again.stored, 0);
        assert_eq!(again.skipped, 2);

        let forced = parse_and_populate(&storage, &folder, &only, 2, true).await.unwrap();
        assert_eq!(forced.stored, 2);
    }

    #[test]
    fn missing_folder_is_an_io_error() {
        let err = collect_rdf_files(Path::new("/nonexistent/pgarchive/rdf")).unwrap_err();
        assert!(matches!(err, PgArchiveError::Io { .. }));
    }
}
