//! Book HTML clean-up for the archive.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("script regex"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// The inner HTML of `<body>` with scripts removed.
///
/// Documents without a body are returned whole, minus scripts.
pub fn body_html(document: &str) -> String {
    let doc = Html::parse_document(document);
    let body = Selector::parse("body")
        .ok()
        .and_then(|sel| doc.select(&sel).next().map(|el| el.inner_html()))
        .unwrap_or_else(|| document.to_string());
    SCRIPT_RE.replace_all(&body, "").trim().to_string()
}

/// Whitespace-normalized visible text of an HTML fragment.
pub fn plain_text(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    let text = doc.root_element().text().collect::<Vec<_>>().join(" ");
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// Escape text for inclusion in generated HTML.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
