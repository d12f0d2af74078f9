//! libSQL metadata store.
//!
//! The [`Storage`] struct wraps a local libSQL database holding the book
//! catalog: licenses, authors, books, their advertised formats, and derived
//! download URLs. It is set up once per run and shared by the parse,
//! download and assembly stages.

mod migrations;

use std::path::Path;

use libsql::params::Params;
use libsql::{Connection, Database, Value, params};
use pgarchive_shared::{AuthorMeta, BookMeta, PgArchiveError, Result, SelectionSet};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

/// A book row joined with its author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBook {
    pub id: u32,
    pub title: String,
    pub subtitle: Option<String>,
    pub language: String,
    pub downloads: u32,
    pub bookshelf: Option<String>,
    pub cover_page: bool,
    pub license: String,
    pub author: AuthorMeta,
}

/// A format advertised for a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFormat {
    /// `book_formats` row id.
    pub id: i64,
    pub book_id: u32,
    pub mime: String,
    pub images: bool,
    pub pattern: String,
    pub source_url: Option<String>,
    pub downloaded_from: Option<String>,
}

impl StoredFormat {
    /// Whether the file is a zip archive wrapping the content.
    pub fn is_zipped(&self) -> bool {
        self.pattern.ends_with(".zip")
    }
}

/// Which ETag column to update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtagKind {
    Html,
    Epub,
    Cover,
}

impl EtagKind {
    fn column(&self) -> &'static str {
        match self {
            Self::Html => "html_etag",
            Self::Epub => "epub_etag",
            Self::Cover => "cover_etag",
        }
    }
}

const BOOK_COLUMNS: &str = "b.id, b.title, b.subtitle, b.language, b.downloads, b.bookshelf, \
     b.cover_page, b.license_id, a.gut_id, a.last_name, a.first_names, a.birth_year, a.death_year";

const FORMAT_COLUMNS: &str =
    "bf.id, bf.book_id, f.mime, f.images, f.pattern, bf.source_url, bf.downloaded_from";

fn db_err(e: impl std::fmt::Display) -> PgArchiveError {
    PgArchiveError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PgArchiveError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open the store, dropping every table first when `wipe` is set.
    pub async fn setup(path: &Path, wipe: bool) -> Result<Self> {
        tracing::info!(path = %path.display(), wipe, "setting up the metadata store");
        let storage = Self::open(path).await?;
        if wipe {
            storage.wipe().await?;
        }
        Ok(storage)
    }

    /// Drop all tables and re-create an empty schema with fixtures.
    pub async fn wipe(&self) -> Result<()> {
        tracing::warn!("wiping metadata store");
        self.conn
            .execute_batch(migrations::DROP_ALL)
            .await
            .map_err(db_err)?;
        self.run_migrations().await
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PgArchiveError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Book operations
    // -----------------------------------------------------------------------

    /// Whether a book with this id is already stored.
    pub async fn has_book(&self, id: u32) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM books WHERE id = ?1", params![i64::from(id)])
            .await
            .map_err(db_err)?;
        Ok(matches!(rows.next().await, Ok(Some(_))))
    }

    /// Insert or update a batch of books, their authors and formats, in one
    /// transaction.
    pub async fn upsert_books(&self, books: &[BookMeta]) -> Result<()> {
        let tx = self.conn.transaction().await.map_err(db_err)?;
        for book in books {
            upsert_book_on(&tx, book).await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Insert or update a single book.
    pub async fn upsert_book(&self, book: &BookMeta) -> Result<()> {
        upsert_book_on(&self.conn, book).await
    }

    /// Fetch a book by id.
    pub async fn get_book(&self, id: u32) -> Result<Option<StoredBook>> {
        let sql = format!(
            "SELECT {BOOK_COLUMNS} FROM books b JOIN authors a ON a.gut_id = b.author_id
             WHERE b.id = ?1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![i64::from(id)])
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_book(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Remove a book along with its formats and URLs.
    pub async fn delete_book(&self, id: u32) -> Result<()> {
        let id = i64::from(id);
        for sql in [
            "DELETE FROM urls WHERE book_id = ?1",
            "DELETE FROM book_formats WHERE book_id = ?1",
            "DELETE FROM books WHERE id = ?1",
        ] {
            self.conn.execute(sql, params![id]).await.map_err(db_err)?;
        }
        Ok(())
    }

    /// Number of stored books.
    pub async fn book_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM books").await
    }

    /// Distinct book languages, ordered by the lowest book id carrying each.
    pub async fn distinct_languages(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT language FROM books GROUP BY language ORDER BY MIN(id)",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row.get::<String>(0).map_err(db_err)?);
        }
        Ok(results)
    }

    /// Books matching a selection.
    ///
    /// Empty `languages` / `book_ids` do not filter; a `formats` set keeps
    /// only books advertising at least one of the formats.
    pub async fn filtered_books(&self, selection: &SelectionSet) -> Result<Vec<StoredBook>> {
        let mut sql = format!(
            "SELECT {BOOK_COLUMNS} FROM books b JOIN authors a ON a.gut_id = b.author_id WHERE 1 = 1"
        );
        let mut values: Vec<Value> = Vec::new();

        if !selection.formats.is_empty() {
            sql.push_str(&format!(
                " AND b.id IN (SELECT bf.book_id FROM book_formats bf \
                 JOIN formats f ON f.id = bf.format_id WHERE f.mime IN ({}))",
                placeholders(values.len(), selection.formats.len())
            ));
            values.extend(
                selection
                    .formats
                    .iter()
                    .map(|f| Value::Text(f.mime().to_string())),
            );
        }

        // Ids go in as one JSON array: selections can exceed SQLite's
        // bind variable limit.
        if !selection.book_ids.is_empty() {
            sql.push_str(&format!(
                " AND b.id IN (SELECT value FROM json_each(?{}))",
                values.len() + 1
            ));
            let ids = selection
                .book_ids
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            values.push(Value::Text(format!("[{ids}]")));
        }

        if !selection.matches_all_languages() {
            sql.push_str(&format!(
                " AND b.language IN ({})",
                placeholders(values.len(), selection.languages.len())
            ));
            values.extend(selection.languages.iter().cloned().map(Value::Text));
        }

        sql.push_str(" ORDER BY b.id");

        let mut rows = self
            .conn
            .query(&sql, Params::Positional(values))
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_book(&row)?);
        }
        Ok(results)
    }

    /// Record the ETag a file was served with.
    pub async fn set_book_etag(&self, id: u32, kind: EtagKind, etag: Option<&str>) -> Result<()> {
        let sql = format!("UPDATE books SET {} = ?1 WHERE id = ?2", kind.column());
        self.conn
            .execute(&sql, params![etag, i64::from(id)])
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Format operations
    // -----------------------------------------------------------------------

    /// Formats advertised for a book.
    pub async fn formats_for_book(&self, book_id: u32) -> Result<Vec<StoredFormat>> {
        let sql = format!(
            "SELECT {FORMAT_COLUMNS} FROM book_formats bf JOIN formats f ON f.id = bf.format_id
             WHERE bf.book_id = ?1 ORDER BY bf.id"
        );
        self.query_formats(&sql, params![i64::from(book_id)]).await
    }

    /// Every stored book format.
    pub async fn all_book_formats(&self) -> Result<Vec<StoredFormat>> {
        let sql = format!(
            "SELECT {FORMAT_COLUMNS} FROM book_formats bf JOIN formats f ON f.id = bf.format_id
             ORDER BY bf.book_id, bf.id"
        );
        self.query_formats(&sql, params![]).await
    }

    /// Remember which URL a format was successfully fetched from.
    pub async fn set_downloaded_from(&self, book_format_id: i64, url: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE book_formats SET downloaded_from = ?1 WHERE id = ?2",
                params![url, book_format_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Forget a format that could not be fetched.
    pub async fn delete_book_format(&self, book_format_id: i64) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM book_formats WHERE id = ?1",
                params![book_format_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn query_formats(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<StoredFormat>> {
        let mut rows = self.conn.query(sql, params).await.map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(StoredFormat {
                id: row.get::<i64>(0).map_err(db_err)?,
                book_id: row.get::<u32>(1).map_err(db_err)?,
                mime: row.get::<String>(2).map_err(db_err)?,
                images: row.get::<i64>(3).map_err(db_err)? != 0,
                pattern: row.get::<String>(4).map_err(db_err)?,
                source_url: row.get::<String>(5).ok(),
                downloaded_from: row.get::<String>(6).ok(),
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // URL operations
    // -----------------------------------------------------------------------

    /// Number of derived URLs.
    pub async fn url_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM urls").await
    }

    /// Remove every derived URL.
    pub async fn clear_urls(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM urls", params![])
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Store derived `(book_id, mime, url)` candidates in one transaction.
    pub async fn insert_urls(&self, urls: &[(u32, String, String)]) -> Result<()> {
        let tx = self.conn.transaction().await.map_err(db_err)?;
        for (book_id, mime, url) in urls {
            tx.execute(
                "INSERT INTO urls (book_id, mime, url) VALUES (?1, ?2, ?3)",
                params![i64::from(*book_id), mime.as_str(), url.as_str()],
            )
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Derived URLs for one book and MIME type, in insertion order.
    pub async fn urls_for(&self, book_id: u32, mime: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url FROM urls WHERE book_id = ?1 AND mime = ?2 ORDER BY id",
                params![i64::from(book_id), mime],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row.get::<String>(0).map_err(db_err)?);
        }
        Ok(results)
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(db_err)?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0).max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(db_err(e)),
        }
    }
}

/// Write one book and everything hanging off it.
async fn upsert_book_on(conn: &Connection, book: &BookMeta) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO licenses (slug, name) VALUES (?1, ?1)",
        params![book.license.as_str()],
    )
    .await
    .map_err(db_err)?;

    let author = &book.author;
    conn.execute(
        "INSERT INTO authors (gut_id, last_name, first_names, birth_year, death_year)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(gut_id) DO UPDATE SET
           last_name = excluded.last_name,
           first_names = excluded.first_names,
           birth_year = excluded.birth_year,
           death_year = excluded.death_year",
        params![
            author.gut_id.as_str(),
            author.last_name.as_str(),
            author.first_names.as_deref(),
            author.birth_year.as_deref(),
            author.death_year.as_deref(),
        ],
    )
    .await
    .map_err(db_err)?;

    conn.execute(
        "INSERT INTO books (id, title, subtitle, author_id, license_id, language, downloads, bookshelf, cover_page)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           subtitle = excluded.subtitle,
           author_id = excluded.author_id,
           license_id = excluded.license_id,
           language = excluded.language,
           downloads = excluded.downloads,
           bookshelf = excluded.bookshelf,
           cover_page = excluded.cover_page",
        params![
            i64::from(book.id),
            book.title.as_str(),
            book.subtitle.as_deref(),
            author.gut_id.as_str(),
            book.license.as_str(),
            book.language.as_str(),
            i64::from(book.downloads),
            book.bookshelf.as_deref(),
            i64::from(book.cover_page),
        ],
    )
    .await
    .map_err(db_err)?;

    for format in &book.formats {
        conn.execute(
            "INSERT OR IGNORE INTO formats (mime, images, pattern) VALUES (?1, ?2, ?3)",
            params![
                format.mime.as_str(),
                i64::from(format.images),
                format.pattern.as_str()
            ],
        )
        .await
        .map_err(db_err)?;

        conn.execute(
            "INSERT INTO book_formats (book_id, format_id, source_url)
             SELECT ?1, id, ?2 FROM formats WHERE mime = ?3 AND images = ?4 AND pattern = ?5
             ON CONFLICT(book_id, format_id) DO UPDATE SET source_url = excluded.source_url",
            params![
                i64::from(book.id),
                format.url.as_str(),
                format.mime.as_str(),
                i64::from(format.images),
                format.pattern.as_str(),
            ],
        )
        .await
        .map_err(db_err)?;
    }

    Ok(())
}

/// `?N` placeholders continuing after `offset` already-bound values.
fn placeholders(offset: usize, count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", offset + i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert a database row to a [`StoredBook`].
fn row_to_book(row: &libsql::Row) -> Result<StoredBook> {
    Ok(StoredBook {
        id: row.get::<u32>(0).map_err(db_err)?,
        title: row.get::<String>(1).map_err(db_err)?,
        subtitle: row.get::<String>(2).ok(),
        language: row.get::<String>(3).map_err(db_err)?,
        downloads: row.get::<u32>(4).map_err(db_err)?,
        bookshelf: row.get::<String>(5).ok(),
        cover_page: row.get::<i64>(6).map_err(db_err)? != 0,
        license: row.get::<String>(7).map_err(db_err)?,
        author: AuthorMeta {
            gut_id: row.get::<String>(8).map_err(db_err)?,
            last_name: row.get::<String>(9).map_err(db_err)?,
            first_names: row.get::<String>(10).ok(),
            birth_year: row.get::<String>(11).ok(),
            death_year: row.get::<String>(12).ok(),
        },
    })
}
