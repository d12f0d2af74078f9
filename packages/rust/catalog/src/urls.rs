//! Mirror download URL derivation.

use pgarchive_shared::Result;
use pgarchive_storage::Storage;
use tracing::{info, instrument};

/// Mirror URL of a book file.
///
/// The mirror shards books by the digits of their id, all but the last
/// forming the directory path: book 1342 lives under `1/3/4/1342/`, books
/// below 10 under `0/{id}/`.
pub fn mirror_url_for(mirror: &str, book_id: u32, pattern: &str) -> String {
    let id = book_id.to_string();
    let shard = if id.len() == 1 {
        "0".to_string()
    } else {
        id[..id.len() - 1]
            .chars()
            .map(String::from)
            .collect::<Vec<_>>()
            .join("/")
    };

    format!(
        "{}/{shard}/{id}/{}",
        mirror.trim_end_matches('/'),
        pattern.replace("{id}", &id)
    )
}

/// Record a mirror URL for every stored book format.
///
/// Skipped when URLs already exist, unless `force` is set, in which case the
/// table is rebuilt. Returns the number of URLs registered.
#[instrument(skip_all, fields(mirror = %mirror, force = force))]
pub async fn register_derived_urls(storage: &Storage, mirror: &str, force: bool) -> Result<usize> {
    if !force && storage.url_count().await? > 0 {
        info!("derived URLs already registered, skipping");
        return Ok(0);
    }

    storage.clear_urls().await?;

    let urls: Vec<(u32, String, String)> = storage
        .all_book_formats()
        .await?
        .into_iter()
        .map(|bf| {
            let url = mirror_url_for(mirror, bf.book_id, &bf.pattern);
            (bf.book_id, bf.mime, url)
        })
        .collect();

    storage.insert_urls(&urls).await?;
    info!(urls = urls.len(), "registered derived URLs");
    Ok(urls.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgarchive_shared::{AuthorMeta, BookMeta, FormatMeta};
    use uuid::Uuid;

    #[test]
    fn shards_by_id_digits() {
        assert_eq!(
            mirror_url_for("https://aleph.gutenberg.org/", 1342, "{id}-h.htm"),
            "https://aleph.gutenberg.org/1/3/4/1342/1342-h.htm"
        );
        assert_eq!(
            mirror_url_for("https://aleph.gutenberg.org", 5, "{id}.epub"),
            "https://aleph.gutenberg.org/0/5/5.epub"
        );
        assert_eq!(
            mirror_url_for("https://m", 12, "pg{id}.pdf"),
            "https://m/1/12/pg12.pdf"
        );
    }

    #[tokio::test]
    async fn registers_once_unless_forced() {
        let tmp = std::env::temp_dir().join(format!("pga_test_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.unwrap();
        storage
            .upsert_book(&BookMeta {
                id: 84,
                title: "Frankenstein".into(),
                subtitle: None,
                language: "en".into(),
                downloads: 1,
                license: "PD".into(),
                author: AuthorMeta {
                    gut_id: "61".into(),
                    last_name: "Shelley".into(),
                    first_names: Some("Mary".into()),
                    birth_year: None,
                    death_year: None,
                },
                bookshelf: None,
                cover_page: false,
                formats: vec![FormatMeta {
                    mime: "text/html".into(),
                    images: true,
                    pattern: "{id}-h.htm".into(),
                    url: "https://www.gutenberg.org/files/84/84-h/84-h.htm".into(),
                }],
            })
            .await
            .unwrap();

        assert_eq!(register_derived_urls(&storage, "https://m", false).await.unwrap(), 1);
        assert_eq!(register_derived_urls(&storage, "https://m", false).await.unwrap(), 0);
        assert_eq!(register_derived_urls(&storage, "https://m", true).await.unwrap(), 1);

        assert_eq!(
            storage.urls_for(84, "text/html").await.unwrap(),
            vec!["https://m/8/84/84-h.htm".to_string()]
        );
    }
}
