//! Selection resolution: raw language, format and book-id filters into a
//! [`SelectionSet`].

use std::collections::BTreeSet;

use pgarchive_shared::{Format, Result, SelectionSet};
use tracing::{error, info};

/// Widest `a-b` range a book selector may name.
pub const MAX_RANGE_SPAN: u32 = 1_000_000;

/// Outcome of parsing a book selector such as `"5-8,12,100-"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedSelector {
    /// The ids the selector names. Empty means no filter.
    Parsed(BTreeSet<u32>),
    /// The selector could not be parsed and selects every book.
    Malformed { input: String, error: String },
}

impl ParsedSelector {
    /// The effective id filter. Malformed selectors filter nothing.
    pub fn into_ids(self) -> BTreeSet<u32> {
        match self {
            Self::Parsed(ids) => ids,
            Self::Malformed { .. } => BTreeSet::new(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

/// Parse a comma-separated list of book ids and `first-last` ranges.
///
/// Each token is split on `-` and only its all-digit parts are kept. Two or
/// more parts give the inclusive range between the first two (empty when
/// inverted), one part gives that id, none gives nothing.
pub fn parse_book_selector(raw: &str) -> ParsedSelector {
    let malformed = |error: String| ParsedSelector::Malformed {
        input: raw.to_string(),
        error,
    };

    let mut ids = BTreeSet::new();
    for token in raw.split(',') {
        let mut parts = Vec::new();
        for part in token.split('-').map(str::trim) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            match part.parse::<u32>() {
                Ok(id) => parts.push(id),
                Err(e) => return malformed(format!("book id '{part}' is out of range: {e}")),
            }
        }

        match parts.as_slice() {
            [] => {}
            [id] => {
                ids.insert(*id);
            }
            [first, second, ..] => {
                if second < first {
                    continue;
                }
                if second - first >= MAX_RANGE_SPAN {
                    return malformed(format!(
                        "range {first}-{second} spans more than {MAX_RANGE_SPAN} books"
                    ));
                }
                ids.extend(*first..=*second);
            }
        }
    }
    ParsedSelector::Parsed(ids)
}

/// Normalize comma-separated language codes: trimmed, lowercased, deduplicated.
pub fn resolve_languages(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Resolve a format list. Absent or `all` means every format.
///
/// Unknown format names are a validation error.
pub fn resolve_formats(raw: Option<&str>) -> Result<BTreeSet<Format>> {
    let raw = match raw.map(str::trim) {
        None | Some("all") => return Ok(Format::all()),
        Some(raw) => raw,
    };

    let mut formats = BTreeSet::new();
    for token in raw.split(',') {
        let token = token.trim().to_lowercase();
        if token.is_empty() {
            continue;
        }
        formats.insert(token.parse::<Format>()?);
    }

    if formats.is_empty() {
        return Ok(Format::all());
    }
    Ok(formats)
}

/// Resolve every raw filter into one [`SelectionSet`].
///
/// A malformed book selector is logged and selects every book.
pub fn resolve_selection(
    languages: Option<&str>,
    formats: Option<&str>,
    books: Option<&str>,
) -> Result<SelectionSet> {
    let formats = resolve_formats(formats)?;

    let book_ids = match books.map(parse_book_selector) {
        None => BTreeSet::new(),
        Some(ParsedSelector::Malformed { input, error }) => {
            error!(%input, %error, "ignoring malformed book selector, selecting every book");
            BTreeSet::new()
        }
        Some(parsed) => parsed.into_ids(),
    };

    let selection = SelectionSet {
        languages: resolve_languages(languages),
        formats,
        book_ids,
    };

    info!(
        languages = ?selection.languages,
        formats = ?selection.formats,
        books = selection.book_ids.len(),
        "selection resolved"
    );
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[u32]) -> BTreeSet<u32> {
        list.iter().copied().collect()
    }

    #[test]
    fn ranges_are_inclusive() {
        assert_eq!(parse_book_selector("5-8"), ParsedSelector::Parsed(ids(&[5, 6, 7, 8])));
        assert_eq!(parse_book_selector("5-5"), ParsedSelector::Parsed(ids(&[5])));
    }

    #[test]
    fn ids_and_ranges_are_unioned() {
        assert_eq!(
            parse_book_selector("1342,84,10-12,11"),
            ParsedSelector::Parsed(ids(&[10, 11, 12, 84, 1342]))
        );
    }

    #[test]
    fn non_numeric_parts_are_dropped() {
        assert_eq!(parse_book_selector("abc"), ParsedSelector::Parsed(BTreeSet::new()));
        assert_eq!(parse_book_selector("x-7"), ParsedSelector::Parsed(ids(&[7])));
        assert_eq!(parse_book_selector("3-4-9"), ParsedSelector::Parsed(ids(&[3, 4])));
        assert_eq!(parse_book_selector(""), ParsedSelector::Parsed(BTreeSet::new()));
    }

    #[test]
    fn inverted_range_is_empty() {
        assert_eq!(parse_book_selector("8-5"), ParsedSelector::Parsed(BTreeSet::new()));
    }

    #[test]
    fn oversized_input_is_malformed() {
        let overflow = parse_book_selector("99999999999");
        assert!(overflow.is_malformed());
        assert!(overflow.into_ids().is_empty());

        assert!(parse_book_selector("1-4000000000").is_malformed());
    }

    #[test]
    fn parsing_is_idempotent_on_normalized_output() {
        for raw in ["5-8", "1,3,2", "10-12,4", "7-7,abc,9"] {
            let first = parse_book_selector(raw).into_ids();
            let normalized = first
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            assert_eq!(parse_book_selector(&normalized).into_ids(), first);
        }
    }

    #[test]
    fn languages_are_normalized() {
        let langs = resolve_languages(Some(" EN,fr,,en "));
        assert_eq!(
            langs,
            ["en".to_string(), "fr".to_string()].into_iter().collect()
        );
        assert!(resolve_languages(None).is_empty());
    }

    #[test]
    fn absent_or_all_formats_mean_every_format() {
        assert_eq!(resolve_formats(None).unwrap(), Format::all());
        assert_eq!(resolve_formats(Some("all")).unwrap(), Format::all());
    }

    #[test]
    fn format_subset_is_deduplicated() {
        let formats = resolve_formats(Some("EPUB, pdf,epub")).unwrap();
        assert_eq!(formats, [Format::Epub, Format::Pdf].into_iter().collect());
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = resolve_formats(Some("epub,mobi")).unwrap_err();
        assert!(err.to_string().contains("mobi"));
    }

    #[test]
    fn malformed_selector_selects_everything() {
        let selection = resolve_selection(Some("en"), None, Some("99999999999")).unwrap();
        assert!(selection.book_ids.is_empty());
        assert_eq!(selection.formats, Format::all());
    }
}
