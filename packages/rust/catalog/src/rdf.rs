//! Project Gutenberg RDF record extraction.
//!
//! A record is a `pg<ID>.rdf` file describing one ebook:
//! - `dcterms:title` (subtitle after the first line break)
//! - `dcterms:language`, `pgterms:downloads`, `dcterms:rights`
//! - the first `dcterms:creator` agent
//! - `pgterms:bookshelf`
//! - every `dcterms:hasFormat` file with its MIME type
//!
//! Extraction is regex based and only reads the fields above.

use std::sync::LazyLock;

use pgarchive_shared::{AuthorMeta, BookMeta, FormatMeta, PgArchiveError, Result};
use regex::Regex;

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<dcterms:title[^>]*>(.*?)</dcterms:title>").expect("title regex")
});

static LANGUAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<dcterms:language>.*?<rdf:value[^>]*>([^<]+)</rdf:value>")
        .expect("language regex")
});

static DOWNLOADS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<pgterms:downloads[^>]*>\s*(\d+)\s*</pgterms:downloads>")
        .expect("downloads regex")
});

static RIGHTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<dcterms:rights>(.*?)</dcterms:rights>").expect("rights regex")
});

/// First creator agent: captures the agent id and the agent body.
static CREATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<dcterms:creator>\s*<pgterms:agent rdf:about="[^"]*?/agents/(\d+)">(.*?)</pgterms:agent>"#,
    )
    .expect("creator regex")
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<pgterms:name>(.*?)</pgterms:name>").expect("name regex")
});

static BIRTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<pgterms:birthdate[^>]*>(-?\d+)</pgterms:birthdate>").expect("birth regex")
});

static DEATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<pgterms:deathdate[^>]*>(-?\d+)</pgterms:deathdate>").expect("death regex")
});

static BOOKSHELF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<pgterms:bookshelf>.*?<rdf:value>([^<]+)</rdf:value>")
        .expect("bookshelf regex")
});

/// A `pgterms:file` block: captures the file URL and the block body.
static FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<pgterms:file rdf:about="([^"]+)">(.*?)</pgterms:file>"#)
        .expect("file regex")
});

/// One `dcterms:format` element of a file. Zipped files carry two: the
/// content type and `application/zip`.
static FORMAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<dcterms:format>(.*?)</dcterms:format>").expect("format regex")
});

static VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<rdf:value[^>]*>([^<]+)</rdf:value>").expect("value regex"));

const ZIP_MIME: &str = "application/zip";

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract a book record from the contents of `pg<book_id>.rdf`.
///
/// Returns a parse error when the record has no title or language, which is
/// how the catalog marks removed or placeholder entries.
pub fn parse_rdf(book_id: u32, content: &str) -> Result<BookMeta> {
    let raw_title = capture(&TITLE_RE, content)
        .ok_or_else(|| PgArchiveError::parse(format!("book #{book_id} has no title")))?;
    let (title, subtitle) = split_title(&raw_title);

    let language = capture(&LANGUAGE_RE, content)
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .ok_or_else(|| PgArchiveError::parse(format!("book #{book_id} has no language")))?;

    let downloads = capture(&DOWNLOADS_RE, content)
        .and_then(|d| d.parse::<u32>().ok())
        .unwrap_or(0);

    let license = license_slug(capture(&RIGHTS_RE, content).as_deref());

    let author = CREATOR_RE
        .captures(content)
        .map(|caps| parse_agent(&caps[1], &caps[2]))
        .unwrap_or_else(anonymous);

    let bookshelf = capture(&BOOKSHELF_RE, content).map(|s| s.trim().to_string());

    let mut formats = Vec::new();
    let mut cover_page = false;
    for caps in FILE_RE.captures_iter(content) {
        let url = unescape(&caps[1]);
        if url.contains("cover") {
            cover_page = true;
        }
        let Some(mime) = content_mime(&caps[2]) else {
            continue;
        };
        formats.push(format_meta(book_id, &url, &mime));
    }

    Ok(BookMeta {
        id: book_id,
        title,
        subtitle,
        language,
        downloads,
        license,
        author,
        bookshelf,
        cover_page,
        formats,
    })
}

/// The id embedded in a `pg<ID>.rdf` file name.
pub fn book_id_from_file_name(name: &str) -> Option<u32> {
    name.strip_prefix("pg")?
        .strip_suffix(".rdf")?
        .parse::<u32>()
        .ok()
}

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack).map(|caps| unescape(caps[1].trim()))
}

/// Split the title on its first line break into title and subtitle.
fn split_title(raw: &str) -> (String, Option<String>) {
    let normalized = raw.replace("\r\n", "\n");
    match normalized.split_once('\n') {
        Some((title, rest)) => {
            let subtitle = rest.split_whitespace().collect::<Vec<_>>().join(" ");
            (
                title.trim().to_string(),
                (!subtitle.is_empty()).then_some(subtitle),
            )
        }
        None => (normalized.trim().to_string(), None),
    }
}

fn license_slug(rights: Option<&str>) -> String {
    match rights {
        Some(r) if r.contains("Public domain") => "PD",
        Some(r) if r.contains("Copyright") => "Copyright",
        _ => "None",
    }
    .to_string()
}

fn parse_agent(gut_id: &str, body: &str) -> AuthorMeta {
    let name = capture(&NAME_RE, body).unwrap_or_default();
    let (last_name, first_names) = match name.split_once(',') {
        Some((last, first)) => {
            let first = first.trim();
            (
                last.trim().to_string(),
                (!first.is_empty()).then(|| first.to_string()),
            )
        }
        None => (name.trim().to_string(), None),
    };

    AuthorMeta {
        gut_id: gut_id.to_string(),
        last_name,
        first_names,
        birth_year: capture(&BIRTH_RE, body),
        death_year: capture(&DEATH_RE, body),
    }
}

/// Fixture author used when a record names no creator.
fn anonymous() -> AuthorMeta {
    AuthorMeta {
        gut_id: "216".into(),
        last_name: "Anonymous".into(),
        first_names: None,
        birth_year: None,
        death_year: None,
    }
}

/// The file's content type: the first format value other than
/// `application/zip`, or `application/zip` for a bare archive.
fn content_mime(file_body: &str) -> Option<String> {
    let values: Vec<String> = FORMAT_RE
        .captures_iter(file_body)
        .filter_map(|caps| capture(&VALUE_RE, &caps[1]))
        .collect();
    values
        .iter()
        .find(|v| !v.starts_with(ZIP_MIME))
        .or_else(|| values.first())
        .cloned()
}

fn format_meta(book_id: u32, url: &str, mime: &str) -> FormatMeta {
    let mime = mime.split(';').next().unwrap_or(mime).trim().to_string();
    let file_name = url.rsplit('/').next().unwrap_or(url);
    let pattern = file_name.replace(&book_id.to_string(), "{id}");
    FormatMeta {
        images: !pattern.contains("noimages"),
        mime,
        pattern,
        url: url.to_string(),
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
