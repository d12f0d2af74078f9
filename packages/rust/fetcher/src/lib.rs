//! HTTP side of pgarchive.
//!
//! - [`prepare`]: fetch and extract the RDF catalog tarball
//! - [`cache`]: optimization cache client
//! - [`download`]: per-book file downloads into the download cache
//!
//! Zipped HTML books are unpacked in place after download.

pub mod cache;
pub mod download;
pub mod prepare;
mod unzip;

use std::path::{Path, PathBuf};
use std::time::Duration;

use pgarchive_shared::{PgArchiveError, Result};
use reqwest::Client;
use tracing::debug;

pub use cache::{OptimizationCache, validate_cache_credentials};
pub use download::{DownloadOptions, DownloadSummary, download_books};
pub use prepare::setup_rdf_folder;

/// User-Agent string for every request.
const USER_AGENT: &str = concat!("pgarchive/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(300))
        .build()
        .map_err(|e| PgArchiveError::Network(format!("failed to build HTTP client: {e}")))
}

/// Stream `url` into `dest`, returning the response ETag.
///
/// The body is written to a `.part` file next to `dest` and renamed once
/// complete, so `dest` never holds a truncated download.
pub async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<Option<String>> {
    debug!(%url, dest = %dest.display(), "downloading");

    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PgArchiveError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PgArchiveError::Network(format!("{url}: HTTP {status}")));
    }
    let etag = etag_of(response.headers());

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PgArchiveError::io(parent, e))?;
    }

    let part = part_path(dest);
    let written = write_body(&mut response, url, &part).await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e);
    }

    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| PgArchiveError::io(dest, e))?;
    Ok(etag)
}

/// ETag advertised for `url`, if the server answers a HEAD request.
pub async fn head_etag(client: &Client, url: &str) -> Option<String> {
    match client.head(url).send().await {
        Ok(response) if response.status().is_success() => etag_of(response.headers()),
        Ok(_) => None,
        Err(e) => {
            debug!(%url, error = %e, "HEAD request failed");
            None
        }
    }
}

async fn write_body(response: &mut reqwest::Response, url: &str, part: &Path) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| PgArchiveError::io(part, e))?;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| PgArchiveError::Network(format!("{url}: body read failed: {e}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| PgArchiveError::io(part, e))?;
    }
    file.flush().await.map_err(|e| PgArchiveError::io(part, e))?;
    Ok(())
}

fn etag_of(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
