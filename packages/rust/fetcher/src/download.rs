//! Book downloads into the download cache.
//!
//! Planning and bookkeeping happen on the calling task against the metadata
//! store; the network work for each book runs in a spawned task bounded by a
//! semaphore.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use pgarchive_shared::{
    CacheHandle, CacheLayout, Format, OptimizerVersions, PgArchiveError, Result, SelectionSet,
};
use pgarchive_storage::{EtagKind, Storage, StoredBook, StoredFormat};
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::OptimizationCache;
use crate::unzip::extract_zipped_html;
use crate::{download_file, head_etag};

/// Where book covers are served from.
pub const DEFAULT_COVER_BASE: &str = "https://www.gutenberg.org/cache/epub";

/// Parameters of a download run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Download cache folder.
    pub dl_folder: PathBuf,
    /// Maximum books in flight.
    pub concurrency: usize,
    /// Which books and formats to fetch. `html` is always added.
    pub selection: SelectionSet,
    /// Re-download files that already exist.
    pub force: bool,
    /// Validated optimization cache, tried before the mirror.
    pub cache: Option<CacheHandle>,
    /// Required optimizer versions; `None` accepts any cached version.
    pub optimizer_versions: Option<OptimizerVersions>,
    /// Base URL for `{base}/{id}/pg{id}.cover.medium.jpg`.
    pub cover_base: String,
}

/// Outcome of a download run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Books considered.
    pub books: usize,
    /// Files fetched from the mirror.
    pub downloaded: usize,
    /// Files fetched from the optimization cache.
    pub from_cache: usize,
    /// Files already present and left alone.
    pub already_present: usize,
    /// Books dropped because no format could be obtained.
    pub deleted_books: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Work for one book, computed from the store before any network access.
#[derive(Debug, Clone)]
struct BookPlan {
    book_id: u32,
    cover_page: bool,
    formats: Vec<FormatPlan>,
}

#[derive(Debug, Clone)]
struct FormatPlan {
    format: Format,
    action: FormatAction,
}

#[derive(Debug, Clone)]
enum FormatAction {
    /// A copy exists and `force` is off.
    Present,
    /// The catalog advertises no file for this format.
    Unavailable,
    /// Try these URLs in order. A zipped file is extracted once fetched.
    Fetch {
        book_format_id: i64,
        urls: Vec<String>,
        zipped: bool,
    },
}

/// The book format to download: plain files before zipped ones, then the
/// variant with images. Only HTML may come zipped.
fn choose_book_format(formats: &[StoredFormat], format: Format) -> Option<&StoredFormat> {
    formats
        .iter()
        .filter(|f| f.mime == format.mime())
        .filter(|f| !f.is_zipped() || format == Format::Html)
        .min_by_key(|f| (f.is_zipped(), !f.images))
}

async fn plan_book(
    storage: &Storage,
    layout: &CacheLayout,
    book: &StoredBook,
    formats: &BTreeSet<Format>,
    force: bool,
) -> Result<BookPlan> {
    let stored = storage.formats_for_book(book.id).await?;
    let mut plans = Vec::with_capacity(formats.len());

    for format in formats {
        let kind = format.as_str();
        if force {
            remove_existing(layout, book.id, kind).await;
        } else if layout.existing(book.id, kind).is_some() {
            debug!(book_id = book.id, format = kind, "already downloaded");
            plans.push(FormatPlan {
                format: *format,
                action: FormatAction::Present,
            });
            continue;
        }

        let Some(chosen) = choose_book_format(&stored, *format) else {
            debug!(book_id = book.id, format = kind, "format not available");
            plans.push(FormatPlan {
                format: *format,
                action: FormatAction::Unavailable,
            });
            continue;
        };

        let urls = match (&chosen.downloaded_from, force) {
            (Some(known), false) => vec![known.clone()],
            _ => {
                let mut urls = storage.urls_for(book.id, &chosen.mime).await?;
                if let Some(source) = &chosen.source_url {
                    if !urls.contains(source) {
                        urls.push(source.clone());
                    }
                }
                urls
            }
        };

        plans.push(FormatPlan {
            format: *format,
            action: FormatAction::Fetch {
                book_format_id: chosen.id,
                urls,
                zipped: chosen.is_zipped(),
            },
        });
    }

    Ok(BookPlan {
        book_id: book.id,
        cover_page: book.cover_page,
        formats: plans,
    })
}

async fn remove_existing(layout: &CacheLayout, book_id: u32, kind: &str) {
    for path in [layout.optimized(book_id, kind), layout.unoptimized(book_id, kind)] {
        if path.is_file() {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// What the network task obtained for one book.
#[derive(Debug, Default)]
struct BookOutcome {
    book_id: u32,
    /// `(book_format_id, url, etag kind, etag)` for files fetched from the mirror.
    downloaded: Vec<(i64, String, Option<EtagKind>, Option<String>)>,
    /// Book formats none of whose URLs worked.
    failed: Vec<i64>,
    from_cache: usize,
    present: usize,
    unavailable: usize,
    cover_etag: Option<Option<String>>,
}

impl BookOutcome {
    fn succeeded(&self) -> usize {
        self.downloaded.len() + self.from_cache + self.present
    }
}

/// Shared state handed to every book task.
struct FetchContext {
    client: Client,
    layout: CacheLayout,
    cache: Option<OptimizationCache>,
    versions: Option<OptimizerVersions>,
    cover_base: String,
}

impl FetchContext {
    fn version(&self, kind: &str) -> Option<&str> {
        self.versions.as_ref().and_then(|v| v.get(kind))
    }

    /// Try the optimization cache for one artifact. Errors count as a miss.
    async fn from_cache(&self, book_id: u32, kind: &str, etag: Option<&str>) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        let dest = self.layout.optimized(book_id, kind);
        match cache.fetch(book_id, kind, etag, self.version(kind), &dest).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(book_id, kind, error = %e, "optimization cache lookup failed");
                false
            }
        }
    }
}

fn etag_kind(format: Format) -> Option<EtagKind> {
    match format {
        Format::Html => Some(EtagKind::Html),
        Format::Epub => Some(EtagKind::Epub),
        Format::Pdf => None,
    }
}

async fn fetch_book(ctx: Arc<FetchContext>, plan: BookPlan) -> BookOutcome {
    let book_id = plan.book_id;
    let mut outcome = BookOutcome {
        book_id,
        ..Default::default()
    };

    for format_plan in plan.formats {
        let kind = format_plan.format.as_str();
        let (book_format_id, urls, zipped) = match format_plan.action {
            FormatAction::Present => {
                outcome.present += 1;
                continue;
            }
            FormatAction::Unavailable => {
                outcome.unavailable += 1;
                continue;
            }
            FormatAction::Fetch {
                book_format_id,
                urls,
                zipped,
            } => (book_format_id, urls, zipped),
        };

        let mut obtained = false;
        for url in &urls {
            let cacheable = etag_kind(format_plan.format).is_some();
            let etag = if ctx.cache.is_some() && cacheable {
                head_etag(&ctx.client, url).await
            } else {
                None
            };

            if cacheable && ctx.from_cache(book_id, kind, etag.as_deref()).await {
                outcome.from_cache += 1;
                obtained = true;
                break;
            }

            let dest = ctx.layout.unoptimized(book_id, kind);
            let fetched = if zipped {
                fetch_zipped_html(&ctx.client, url, book_id, dest).await
            } else {
                download_file(&ctx.client, url, &dest).await
            };
            match fetched {
                Ok(served_etag) => {
                    outcome.downloaded.push((
                        book_format_id,
                        url.clone(),
                        etag_kind(format_plan.format),
                        etag.or(served_etag),
                    ));
                    obtained = true;
                    break;
                }
                Err(e) => {
                    warn!(book_id, format = kind, %url, error = %e, "download failed");
                }
            }
        }

        if !obtained {
            error!(book_id, format = kind, "no working URL");
            outcome.failed.push(book_format_id);
        }
    }

    if plan.cover_page && outcome.succeeded() > 0 {
        outcome.cover_etag = fetch_cover(&ctx, book_id).await;
    }

    outcome
}

/// Download a zipped HTML book next to `html_dest` and unpack it there.
async fn fetch_zipped_html(
    client: &Client,
    url: &str,
    book_id: u32,
    html_dest: PathBuf,
) -> Result<Option<String>> {
    let archive = html_dest.with_extension("html.zip");
    let etag = download_file(client, url, &archive).await?;
    tokio::task::spawn_blocking(move || extract_zipped_html(book_id, &archive, &html_dest))
        .await
        .map_err(|e| PgArchiveError::Network(format!("extraction task failed: {e}")))??;
    Ok(etag)
}

/// Fetch the cover unless present. Returns the ETag to record when the
/// cover was downloaded from the mirror.
async fn fetch_cover(ctx: &FetchContext, book_id: u32) -> Option<Option<String>> {
    if ctx.layout.existing(book_id, "cover").is_some() {
        return None;
    }

    let url = format!(
        "{}/{book_id}/pg{book_id}.cover.medium.jpg",
        ctx.cover_base.trim_end_matches('/')
    );
    let etag = if ctx.cache.is_some() {
        head_etag(&ctx.client, &url).await
    } else {
        None
    };
    if ctx.from_cache(book_id, "cover", etag.as_deref()).await {
        return None;
    }

    match download_file(&ctx.client, &url, &ctx.layout.unoptimized(book_id, "cover")).await {
        Ok(served) => Some(etag.or(served)),
        Err(e) => {
            debug!(book_id, error = %e, "cover not downloaded");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Download every selected book's files.
///
/// Per-book failures are logged and never abort the run: a format with no
/// working URL is removed from the store, and a book left without any format
/// is deleted together with its cache folder. Errors are returned only for
/// store failures.
#[instrument(skip_all, fields(dl_folder = %opts.dl_folder.display(), concurrency = opts.concurrency))]
pub async fn download_books(
    storage: &Storage,
    client: &Client,
    opts: &DownloadOptions,
) -> Result<DownloadSummary> {
    let mut formats = if opts.selection.formats.is_empty() {
        Format::all()
    } else {
        opts.selection.formats.clone()
    };
    formats.insert(Format::Html);

    let books = storage.filtered_books(&opts.selection).await?;
    let layout = CacheLayout::new(&opts.dl_folder);
    tokio::fs::create_dir_all(&opts.dl_folder)
        .await
        .map_err(|e| PgArchiveError::io(&opts.dl_folder, e))?;

    info!(books = books.len(), "downloading books");

    let mut plans = Vec::with_capacity(books.len());
    for book in &books {
        plans.push(plan_book(storage, &layout, book, &formats, opts.force).await?);
    }

    let ctx = Arc::new(FetchContext {
        client: client.clone(),
        layout: layout.clone(),
        cache: opts
            .cache
            .clone()
            .map(|handle| OptimizationCache::new(client.clone(), handle)),
        versions: opts.optimizer_versions.clone(),
        cover_base: opts.cover_base.clone(),
    });
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));

    let mut handles = Vec::with_capacity(plans.len());
    for plan in plans {
        let ctx = ctx.clone();
        let sem = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            fetch_book(ctx, plan).await
        }));
    }

    let mut summary = DownloadSummary {
        books: books.len(),
        ..Default::default()
    };

    for handle in handles {
        let outcome = handle
            .await
            .map_err(|e| PgArchiveError::Network(format!("download task failed: {e}")))?;
        record_outcome(storage, &layout, &outcome, &mut summary).await?;
    }

    info!(
        books = summary.books,
        downloaded = summary.downloaded,
        from_cache = summary.from_cache,
        already_present = summary.already_present,
        deleted = summary.deleted_books.len(),
        "downloads completed"
    );
    Ok(summary)
}

async fn record_outcome(
    storage: &Storage,
    layout: &CacheLayout,
    outcome: &BookOutcome,
    summary: &mut DownloadSummary,
) -> Result<()> {
    for (book_format_id, url, kind, etag) in &outcome.downloaded {
        storage.set_downloaded_from(*book_format_id, url).await?;
        if let Some(kind) = kind {
            storage
                .set_book_etag(outcome.book_id, *kind, etag.as_deref())
                .await?;
        }
    }
    for book_format_id in &outcome.failed {
        storage.delete_book_format(*book_format_id).await?;
    }
    if let Some(etag) = &outcome.cover_etag {
        storage
            .set_book_etag(outcome.book_id, EtagKind::Cover, etag.as_deref())
            .await?;
    }

    summary.downloaded += outcome.downloaded.len();
    summary.from_cache += outcome.from_cache;
    summary.already_present += outcome.present;

    if outcome.succeeded() == 0 {
        warn!(
            book_id = outcome.book_id,
            "book could not be downloaded in any format, removing it"
        );
        storage.delete_book(outcome.book_id).await?;
        let dir = layout.book_dir(outcome.book_id);
        if dir.exists() {
            let _ = tokio::fs::remove_dir_all(&dir).await;
        }
        summary.deleted_books.push(outcome.book_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgarchive_shared::{AuthorMeta, BookMeta, FormatMeta};
    use uuid::Uuid;

    fn book(id: u32, formats: Vec<FormatMeta>) -> BookMeta {
        BookMeta {
            id,
            title: format!("Book {id}"),
            subtitle: None,
            language: "en".into(),
            downloads: 1,
            license: "PD".into(),
            author: AuthorMeta {
                gut_id: "216".into(),
                last_name: "Anonymous".into(),
                first_names: None,
                birth_year: None,
                death_year: None,
            },
            bookshelf: None,
            cover_page: false,
            formats,
        }
    }

    fn format(mime: &str, pattern: &str, url: String) -> FormatMeta {
        FormatMeta {
            mime: mime.into(),
            images: !pattern.contains("noimages"),
            pattern: pattern.into(),
            url,
        }
    }

    async fn setup() -> (Storage, PathBuf) {
        let id = Uuid::now_v7();
        let db = std::env::temp_dir().join(format!("pga_test_{id}.db"));
        let dl = std::env::temp_dir().join(format!("pga_dl_{id}"));
        (Storage::open(&db).await.unwrap(), dl)
    }

    fn options(dl_folder: PathBuf, formats: &[Format]) -> DownloadOptions {
        DownloadOptions {
            dl_folder,
            concurrency: 2,
            selection: SelectionSet {
                formats: formats.iter().copied().collect(),
                ..Default::default()
            },
            force: false,
            cache: None,
            optimizer_versions: None,
            cover_base: DEFAULT_COVER_BASE.into(),
        }
    }

    #[test]
    fn prefers_format_with_images() {
        let stored = vec![
            StoredFormat {
                id: 1,
                book_id: 9,
                mime: "text/html".into(),
                images: false,
                pattern: "{id}.html.noimages".into(),
                source_url: None,
                downloaded_from: None,
            },
            StoredFormat {
                id: 2,
                book_id: 9,
                mime: "text/html".into(),
                images: true,
                pattern: "{id}-h.htm".into(),
                source_url: None,
                downloaded_from: None,
            },
        ];
        assert_eq!(choose_book_format(&stored, Format::Html).map(|f| f.id), Some(2));
        assert!(choose_book_format(&stored, Format::Pdf).is_none());
    }

    fn stored(id: i64, mime: &str, images: bool, pattern: &str) -> StoredFormat {
        StoredFormat {
            id,
            book_id: 84,
            mime: mime.into(),
            images,
            pattern: pattern.into(),
            source_url: None,
            downloaded_from: None,
        }
    }

    #[test]
    fn plain_html_wins_over_zipped() {
        let formats = vec![
            stored(1, "text/html", true, "{id}-h.zip"),
            stored(2, "text/html", false, "{id}.html.noimages"),
            stored(3, "application/epub+zip", true, "{id}-images.epub.zip"),
        ];
        assert_eq!(choose_book_format(&formats, Format::Html).map(|f| f.id), Some(2));
        assert!(choose_book_format(&formats, Format::Epub).is_none());

        let zipped_only = vec![stored(1, "text/html", true, "{id}-h.zip")];
        assert_eq!(choose_book_format(&zipped_only, Format::Html).map(|f| f.id), Some(1));
    }

    #[tokio::test]
    async fn zipped_html_is_extracted() {
        use std::io::Write;

        let mut body = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut body);
            let entries = [
                ("84-h/84-h.htm", "<p>Frankenstein</p>"),
                ("84-h/images/plate.jpg", "jpeg"),
            ];
            for (name, content) in entries {
                writer
                    .start_file(name, zip::write::FileOptions::default())
                    .unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }

        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/files/84-h.zip"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_bytes(body.into_inner()))
            .mount(&server)
            .await;

        let (storage, dl) = setup().await;
        let url = format!("{}/files/84-h.zip", server.uri());
        storage
            .upsert_book(&book(84, vec![format("text/html", "{id}-h.zip", url)]))
            .await
            .unwrap();

        let client = crate::http_client().unwrap();
        let summary = download_books(&storage, &client, &options(dl.clone(), &[Format::Html]))
            .await
            .unwrap();

        assert_eq!(summary.downloaded, 1);
        let layout = CacheLayout::new(&dl);
        let html = layout.unoptimized(84, "html");
        assert_eq!(std::fs::read_to_string(&html).unwrap(), "<p>Frankenstein</p>");
        assert!(html.with_file_name("84_plate.jpg").is_file());
        assert!(!html.with_extension("html.zip").exists());
    }

    #[tokio::test]
    async fn downloads_and_records_source() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/files/84-h.htm"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header("ETag", "\"html-84\"")
                    .set_body_string("<html><body>Frankenstein</body></html>"),
            )
            .mount(&server)
            .await;

        let (storage, dl) = setup().await;
        let html_url = format!("{}/files/84-h.htm", server.uri());
        storage
            .upsert_book(&book(84, vec![format("text/html", "{id}-h.htm", html_url.clone())]))
            .await
            .unwrap();

        let client = crate::http_client().unwrap();
        let summary = download_books(&storage, &client, &options(dl.clone(), &[Format::Html]))
            .await
            .unwrap();

        assert_eq!(summary.downloaded, 1);
        assert!(summary.deleted_books.is_empty());
        assert!(CacheLayout::new(&dl).unoptimized(84, "html").is_file());

        let formats = storage.formats_for_book(84).await.unwrap();
        assert_eq!(formats[0].downloaded_from.as_deref(), Some(html_url.as_str()));

        // Second run finds the file in place.
        let again = download_books(&storage, &client, &options(dl, &[Format::Html]))
            .await
            .unwrap();
        assert_eq!(again.downloaded, 0);
        assert_eq!(again.already_present, 1);
    }

    #[tokio::test]
    async fn html_is_always_fetched() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("content"))
            .mount(&server)
            .await;

        let (storage, dl) = setup().await;
        storage
            .upsert_book(&book(
                11,
                vec![
                    format("text/html", "{id}-h.htm", format!("{}/11-h.htm", server.uri())),
                    format("application/pdf", "{id}.pdf", format!("{}/11.pdf", server.uri())),
                ],
            ))
            .await
            .unwrap();

        let client = crate::http_client().unwrap();
        let summary = download_books(&storage, &client, &options(dl.clone(), &[Format::Pdf]))
            .await
            .unwrap();

        assert_eq!(summary.downloaded, 2);
        let layout = CacheLayout::new(&dl);
        assert!(layout.unoptimized(11, "html").is_file());
        assert!(layout.unoptimized(11, "pdf").is_file());
    }

    #[tokio::test]
    async fn book_without_any_format_is_deleted() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (storage, dl) = setup().await;
        storage
            .upsert_book(&book(
                5,
                vec![format("text/html", "{id}-h.htm", format!("{}/5-h.htm", server.uri()))],
            ))
            .await
            .unwrap();

        let client = crate::http_client().unwrap();
        let summary = download_books(&storage, &client, &options(dl, &[Format::Html]))
            .await
            .unwrap();

        assert_eq!(summary.deleted_books, vec![5]);
        assert!(!storage.has_book(5).await.unwrap());
    }

    #[tokio::test]
    async fn optimization_cache_is_tried_first() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("HEAD"))
            .respond_with(wiremock::ResponseTemplate::new(200).insert_header("ETag", "\"e1\""))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/books/html/1342"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header(crate::cache::VERSION_HEADER, "v1")
                    .insert_header(crate::cache::SOURCE_ETAG_HEADER, "\"e1\"")
                    .set_body_string("<html>optimized</html>"),
            )
            .mount(&server)
            .await;

        let (storage, dl) = setup().await;
        storage
            .upsert_book(&book(
                1342,
                vec![format("text/html", "{id}-h.htm", format!("{}/1342-h.htm", server.uri()))],
            ))
            .await
            .unwrap();

        let location = url::Url::parse(&format!(
            "{}/?keyId=k&secretAccessKey=s&bucketName=books",
            server.uri()
        ))
        .unwrap();
        let mut opts = options(dl.clone(), &[Format::Html]);
        opts.cache = Some(CacheHandle::from_location(&location).unwrap());
        opts.optimizer_versions = Some(OptimizerVersions::pinned());

        let client = crate::http_client().unwrap();
        let summary = download_books(&storage, &client, &opts).await.unwrap();

        assert_eq!(summary.from_cache, 1);
        assert_eq!(summary.downloaded, 0);
        assert_eq!(
            std::fs::read_to_string(CacheLayout::new(&dl).optimized(1342, "html")).unwrap(),
            "<html>optimized</html>"
        );
    }
}
