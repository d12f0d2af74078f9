//! Offline archive assembly.
//!
//! Packages the downloaded books of a selection into a single zip container:
//!
//! ```text
//! manifest.json              project id, title, file checksums
//! index.html                 browsable listing
//! catalog/books.json
//! catalog/authors.json
//! catalog/languages.json
//! catalog/bookshelves.json   (with bookshelves)
//! index/titles.json          (with title search)
//! index/fulltext.json        (unless the full-text index is disabled)
//! books/{id}/{id}.html
//! books/{id}/{id}.epub|pdf
//! books/{id}/cover.jpg
//! ```

pub mod content;
pub mod naming;
pub mod popularity;
pub mod stats;

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pgarchive_shared::{
    CacheLayout, Format, OptimizerVersions, PgArchiveError, Result, SelectionSet,
};
use pgarchive_storage::{Storage, StoredBook};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

pub use naming::{archive_file_name, default_description, default_title, project_id};
pub use stats::{Progress, StatsReporter, write_progress};

/// Parameters of one archive assembly.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Download cache folder to read book files from.
    pub dl_folder: PathBuf,
    /// Maximum books loaded at once.
    pub concurrency: usize,
    /// Books and formats to include.
    pub selection: SelectionSet,
    /// Rebuild the archive even if the output file exists.
    pub force: bool,
    /// Write `index/titles.json`.
    pub title_search: bool,
    /// Write `catalog/bookshelves.json`.
    pub bookshelves: bool,
    /// Write `index/fulltext.json`.
    pub fulltext_index: bool,
    /// Archive file to write.
    pub output: PathBuf,
    pub project_id: String,
    pub title: String,
    pub description: String,
    /// Where to report `{done, total}` progress.
    pub stats_file: Option<PathBuf>,
    /// Optimizer versions the content was requested with.
    pub optimizer_versions: Option<OptimizerVersions>,
}

/// Output of a successful assembly.
#[derive(Debug, Clone)]
pub struct AssembleResult {
    pub output: PathBuf,
    /// Books packaged.
    pub book_count: usize,
    /// Selected books with no downloaded file.
    pub missing_books: Vec<u32>,
    /// The output already existed and was kept.
    pub reused: bool,
}

// ---------------------------------------------------------------------------
// Archive documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub tool_version: String,
    pub created_at: DateTime<Utc>,
    pub languages: Vec<String>,
    pub formats: Vec<Format>,
    pub book_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimizer_versions: Option<OptimizerVersions>,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub sha256: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
struct BookEntry {
    id: u32,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtitle: Option<String>,
    author: String,
    author_id: String,
    language: String,
    license: String,
    downloads: u32,
    popularity: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    bookshelf: Option<String>,
    formats: Vec<Format>,
    cover: bool,
}

#[derive(Debug, Clone, Serialize)]
struct AuthorEntry {
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    birth_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    death_year: Option<String>,
    book_count: usize,
}

#[derive(Debug, Clone, Serialize)]
struct LanguageEntry {
    code: String,
    count: usize,
}

#[derive(Debug, Clone, Serialize)]
struct TitleEntry {
    id: u32,
    title: String,
}

// ---------------------------------------------------------------------------
// Book loading
// ---------------------------------------------------------------------------

/// One book file copied into the archive while it is written.
#[derive(Debug, Clone)]
struct BookFile {
    /// Entry path inside the archive.
    entry: String,
    source: PathBuf,
    /// Reduce to the cleaned `<body>` while copying.
    html: bool,
}

/// Files found for one book in the download cache.
#[derive(Debug, Default)]
struct LoadedBook {
    id: u32,
    formats: Vec<Format>,
    files: Vec<BookFile>,
    cover: bool,
    text: Option<String>,
}

/// Locate a book's files. Only the plain text for the full-text index is
/// kept in memory; file contents are read again by the writer.
async fn load_book(
    layout: Arc<CacheLayout>,
    book_id: u32,
    formats: Arc<BTreeSet<Format>>,
    with_text: bool,
) -> Result<LoadedBook> {
    let mut loaded = LoadedBook {
        id: book_id,
        ..Default::default()
    };

    for format in formats.iter() {
        let Some(path) = layout.existing(book_id, format.as_str()) else {
            continue;
        };

        let html = *format == Format::Html;
        if html && with_text {
            let raw = tokio::fs::read(&path)
                .await
                .map_err(|e| PgArchiveError::io(&path, e))?;
            let body = content::body_html(&String::from_utf8_lossy(&raw));
            loaded.text = Some(content::plain_text(&body));
        }

        loaded.files.push(BookFile {
            entry: format!("books/{book_id}/{book_id}.{}", format.as_str()),
            source: path,
            html,
        });
        loaded.formats.push(*format);
    }

    if let Some(path) = layout.existing(book_id, "cover") {
        loaded.files.push(BookFile {
            entry: format!("books/{book_id}/cover.jpg"),
            source: path,
            html: false,
        });
        loaded.cover = true;
    }

    Ok(loaded)
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Assemble one archive for the books selected by `opts.selection`.
#[instrument(skip_all, fields(project_id = %opts.project_id, output = %opts.output.display()))]
pub async fn assemble_archive(storage: &Storage, opts: &AssembleOptions) -> Result<AssembleResult> {
    let books = storage.filtered_books(&opts.selection).await?;
    if books.is_empty() {
        return Err(PgArchiveError::validation(
            "unable to proceed: combination of languages, books and formats has no result",
        ));
    }

    if !opts.force && opts.output.is_file() {
        info!("archive already exists, keeping it");
        return Ok(AssembleResult {
            output: opts.output.clone(),
            book_count: 0,
            missing_books: Vec::new(),
            reused: true,
        });
    }

    info!(books = books.len(), "assembling archive");

    let downloads: Vec<u32> = books.iter().map(|b| b.downloads).collect();
    let limits = popularity::star_limits(&downloads);

    let mut formats = if opts.selection.formats.is_empty() {
        Format::all()
    } else {
        opts.selection.formats.clone()
    };
    formats.insert(Format::Html);

    let layout = Arc::new(CacheLayout::new(&opts.dl_folder));
    let formats = Arc::new(formats);
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));

    let mut handles = Vec::with_capacity(books.len());
    for book in &books {
        let sem = semaphore.clone();
        let layout = layout.clone();
        let formats = formats.clone();
        let book_id = book.id;
        let with_text = opts.fulltext_index;
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            load_book(layout, book_id, formats, with_text).await
        }));
    }

    let mut reporter = StatsReporter::new(opts.stats_file.clone(), books.len());
    let mut loaded = Vec::with_capacity(books.len());
    let mut missing_books = Vec::new();
    for (book, handle) in books.iter().zip(handles) {
        let result = handle
            .await
            .map_err(|e| PgArchiveError::Archive(format!("book loading task failed: {e}")))??;
        if result.formats.is_empty() {
            warn!(book_id = result.id, "no downloaded content, leaving book out");
            missing_books.push(result.id);
        } else {
            loaded.push((book, result));
        }
        reporter.inc();
    }

    if loaded.is_empty() {
        return Err(PgArchiveError::Archive(
            "no downloaded content for the selected books".into(),
        ));
    }

    let plan = build_plan(opts, &loaded, &limits)?;
    let book_count = loaded.len();
    drop(loaded);
    let output = opts.output.clone();
    tokio::task::spawn_blocking(move || write_zip(&output, plan))
        .await
        .map_err(|e| PgArchiveError::Archive(format!("archive writer failed: {e}")))??;

    reporter.finish();

    info!(
        books = book_count,
        missing = missing_books.len(),
        path = %opts.output.display(),
        "archive assembled"
    );

    Ok(AssembleResult {
        output: opts.output.clone(),
        book_count,
        missing_books,
        reused: false,
    })
}

/// What the writer puts in the archive: generated documents first, then
/// book files, then the manifest.
#[derive(Debug)]
struct ArchivePlan {
    generated: Vec<(String, Vec<u8>)>,
    book_files: Vec<BookFile>,
    /// Filled with file checksums as entries are written.
    manifest: Manifest,
}

fn build_plan(
    opts: &AssembleOptions,
    loaded: &[(&StoredBook, LoadedBook)],
    limits: &[u32; popularity::STARS],
) -> Result<ArchivePlan> {
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();

    let book_entries: Vec<BookEntry> = loaded
        .iter()
        .map(|(book, files)| BookEntry {
            id: book.id,
            title: book.title.clone(),
            subtitle: book.subtitle.clone(),
            author: book.author.name(),
            author_id: book.author.gut_id.clone(),
            language: book.language.clone(),
            license: book.license.clone(),
            downloads: book.downloads,
            popularity: popularity::stars_for(book.downloads, limits),
            bookshelf: book.bookshelf.clone(),
            formats: files.formats.clone(),
            cover: files.cover,
        })
        .collect();

    entries.push(("index.html".into(), index_html(opts, &book_entries).into_bytes()));
    entries.push(("catalog/books.json".into(), to_json(&book_entries)?));
    entries.push(("catalog/authors.json".into(), to_json(&authors(loaded))?));
    entries.push(("catalog/languages.json".into(), to_json(&languages(loaded))?));

    if opts.bookshelves {
        let shelves: BTreeSet<&str> = loaded
            .iter()
            .filter_map(|(book, _)| book.bookshelf.as_deref())
            .collect();
        entries.push(("catalog/bookshelves.json".into(), to_json(&shelves)?));
    }

    if opts.title_search {
        let mut titles: Vec<TitleEntry> = loaded
            .iter()
            .map(|(book, _)| TitleEntry {
                id: book.id,
                title: book.title.clone(),
            })
            .collect();
        titles.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
        entries.push(("index/titles.json".into(), to_json(&titles)?));
    }

    if opts.fulltext_index {
        let fulltext: BTreeMap<u32, &str> = loaded
            .iter()
            .filter_map(|(book, files)| files.text.as_deref().map(|t| (book.id, t)))
            .collect();
        entries.push(("index/fulltext.json".into(), to_json(&fulltext)?));
    }

    let book_files = loaded
        .iter()
        .flat_map(|(_, files)| files.files.iter().cloned())
        .collect();

    let manifest = Manifest {
        project_id: opts.project_id.clone(),
        title: opts.title.clone(),
        description: opts.description.clone(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        created_at: Utc::now(),
        languages: opts.selection.languages.iter().cloned().collect(),
        formats: opts.selection.formats.iter().copied().collect(),
        book_count: loaded.len(),
        optimizer_versions: opts.optimizer_versions.clone(),
        files: Vec::new(),
    };

    Ok(ArchivePlan {
        generated: entries,
        book_files,
        manifest,
    })
}

fn authors(loaded: &[(&StoredBook, LoadedBook)]) -> Vec<AuthorEntry> {
    let mut by_id: BTreeMap<&str, AuthorEntry> = BTreeMap::new();
    for (book, _) in loaded {
        by_id
            .entry(book.author.gut_id.as_str())
            .or_insert_with(|| AuthorEntry {
                id: book.author.gut_id.clone(),
                name: book.author.name(),
                birth_year: book.author.birth_year.clone(),
                death_year: book.author.death_year.clone(),
                book_count: 0,
            })
            .book_count += 1;
    }
    let mut authors: Vec<AuthorEntry> = by_id.into_values().collect();
    authors.sort_by(|a, b| a.name.cmp(&b.name));
    authors
}

/// Languages by descending book count.
fn languages(loaded: &[(&StoredBook, LoadedBook)]) -> Vec<LanguageEntry> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for (book, _) in loaded {
        *counts.entry(book.language.as_str()).or_default() += 1;
    }
    let mut languages: Vec<LanguageEntry> = counts
        .into_iter()
        .map(|(code, count)| LanguageEntry {
            code: code.to_string(),
            count,
        })
        .collect();
    languages.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)));
    languages
}

fn index_html(opts: &AssembleOptions, books: &[BookEntry]) -> String {
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
         <meta name=\"description\" content=\"{desc}\">\n</head>\n<body>\n<h1>{title}</h1>\n\
         <p>{desc}</p>\n<ul>\n",
        title = content::escape(&opts.title),
        desc = content::escape(&opts.description),
    );

    let mut by_popularity: Vec<&BookEntry> = books.iter().collect();
    by_popularity.sort_by(|a, b| b.downloads.cmp(&a.downloads).then(a.id.cmp(&b.id)));

    for book in by_popularity {
        html.push_str(&format!(
            "<li><a href=\"books/{id}/{id}.html\">{title}</a> by {author} {stars}</li>\n",
            id = book.id,
            title = content::escape(&book.title),
            author = content::escape(&book.author),
            stars = "\u{2605}".repeat(book.popularity as usize),
        ));
    }
    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| PgArchiveError::Archive(format!("JSON serialization failed: {e}")))
}

/// Passes writes through while hashing and counting them.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    size: usize,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    fn finish(self, path: String) -> FileEntry {
        FileEntry {
            path,
            sha256: format!("{:x}", self.hasher.finalize()),
            size_bytes: self.size,
        }
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn zip_err(e: zip::result::ZipError) -> PgArchiveError {
    PgArchiveError::Archive(format!("zip write error: {e}"))
}

/// Start entry `name` and copy `reader` into it, returning its manifest entry.
fn copy_entry<W: Write + std::io::Seek>(
    writer: &mut zip::ZipWriter<W>,
    name: &str,
    reader: &mut dyn Read,
    source: &Path,
) -> Result<FileEntry> {
    // Already compressed.
    let method = if [".epub", ".pdf", ".jpg"].iter().any(|ext| name.ends_with(ext)) {
        zip::CompressionMethod::Stored
    } else {
        zip::CompressionMethod::Deflated
    };
    let options = zip::write::FileOptions::default().compression_method(method);
    writer.start_file(name, options).map_err(zip_err)?;

    let mut hashing = HashingWriter::new(&mut *writer);
    std::io::copy(reader, &mut hashing).map_err(|e| PgArchiveError::io(source, e))?;
    let entry = hashing.finish(name.to_string());
    debug!(entry = %name, size = entry.size_bytes, "wrote archive entry");
    Ok(entry)
}

/// Write the zip container through a temp file and rename it into place.
///
/// Book files are streamed from the download cache one at a time.
fn write_zip(path: &Path, plan: ArchivePlan) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| PgArchiveError::io(parent, e))?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive.zip".into());
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    let file = std::fs::File::create(&temp).map_err(|e| PgArchiveError::io(&temp, e))?;
    let mut writer = zip::ZipWriter::new(std::io::BufWriter::new(file));

    let ArchivePlan {
        generated,
        book_files,
        mut manifest,
    } = plan;

    for (name, bytes) in &generated {
        let entry = copy_entry(&mut writer, name, &mut bytes.as_slice(), &temp)?;
        manifest.files.push(entry);
    }

    for book_file in &book_files {
        let source = &book_file.source;
        let entry = if book_file.html {
            let raw = std::fs::read(source).map_err(|e| PgArchiveError::io(source, e))?;
            let body = content::body_html(&String::from_utf8_lossy(&raw));
            copy_entry(&mut writer, &book_file.entry, &mut body.as_bytes(), source)?
        } else {
            let mut reader = std::fs::File::open(source)
                .map(std::io::BufReader::new)
                .map_err(|e| PgArchiveError::io(source, e))?;
            copy_entry(&mut writer, &book_file.entry, &mut reader, source)?
        };
        manifest.files.push(entry);
    }

    let json = to_json(&manifest)?;
    copy_entry(&mut writer, "manifest.json", &mut json.as_slice(), &temp)?;

    let mut buffered = writer.finish().map_err(zip_err)?;
    buffered.flush().map_err(|e| PgArchiveError::io(&temp, e))?;
    drop(buffered);
    std::fs::rename(&temp, path).map_err(|e| PgArchiveError::io(path, e))?;
    Ok(())
}
