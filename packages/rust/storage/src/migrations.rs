//! SQL migration definitions for the metadata store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: licenses, authors, books, formats, book_formats, urls",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS licenses (
    slug TEXT PRIMARY KEY,
    name TEXT NOT NULL
);

INSERT OR IGNORE INTO licenses (slug, name) VALUES
    ('PD', 'Public domain in the USA.'),
    ('None', 'None'),
    ('Copyright', 'Copyrighted. Read the copyright notice inside this book for details.');

CREATE TABLE IF NOT EXISTS authors (
    gut_id      TEXT PRIMARY KEY,
    last_name   TEXT NOT NULL,
    first_names TEXT,
    birth_year  TEXT,
    death_year  TEXT
);

INSERT OR IGNORE INTO authors (gut_id, last_name) VALUES
    ('116', 'Various'),
    ('216', 'Anonymous');

CREATE TABLE IF NOT EXISTS books (
    id         INTEGER PRIMARY KEY,
    title      TEXT NOT NULL,
    subtitle   TEXT,
    author_id  TEXT NOT NULL REFERENCES authors(gut_id),
    license_id TEXT NOT NULL REFERENCES licenses(slug),
    language   TEXT NOT NULL,
    downloads  INTEGER NOT NULL DEFAULT 0,
    bookshelf  TEXT,
    cover_page INTEGER NOT NULL DEFAULT 0,
    html_etag  TEXT,
    epub_etag  TEXT,
    cover_etag TEXT
);

CREATE INDEX IF NOT EXISTS idx_books_language ON books(language);

CREATE TABLE IF NOT EXISTS formats (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    mime    TEXT NOT NULL,
    images  INTEGER NOT NULL DEFAULT 1,
    pattern TEXT NOT NULL,
    UNIQUE(mime, images, pattern)
);

CREATE TABLE IF NOT EXISTS book_formats (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    book_id         INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    format_id       INTEGER NOT NULL REFERENCES formats(id),
    source_url      TEXT,
    downloaded_from TEXT,
    UNIQUE(book_id, format_id)
);

CREATE INDEX IF NOT EXISTS idx_book_formats_book ON book_formats(book_id);

-- Candidate download URLs derived from the mirror layout
CREATE TABLE IF NOT EXISTS urls (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    book_id INTEGER NOT NULL,
    mime    TEXT NOT NULL,
    url     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_urls_book_mime ON urls(book_id, mime);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}

/// Statements that drop every table, used by a wiping setup.
pub(crate) const DROP_ALL: &str = r#"
DROP TABLE IF EXISTS urls;
DROP TABLE IF EXISTS book_formats;
DROP TABLE IF EXISTS formats;
DROP TABLE IF EXISTS books;
DROP TABLE IF EXISTS authors;
DROP TABLE IF EXISTS licenses;
DROP TABLE IF EXISTS schema_migrations;
"#;
