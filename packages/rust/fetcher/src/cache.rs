//! Optimization cache client.
//!
//! The cache is an HTTP bucket of pre-optimized artifacts keyed
//! `{kind}/{book_id}`. Requests authenticate with the key id and secret from
//! the cache location. Objects carry the optimizer version that produced them
//! in `x-optimizer-version` and the ETag of their source file in
//! `x-source-etag`.

use std::path::Path;

use pgarchive_shared::{CacheHandle, PgArchiveError, Result};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument};
use url::Url;

/// Header naming the optimizer version of a cached object.
pub const VERSION_HEADER: &str = "x-optimizer-version";

/// Header carrying the ETag of the file the object was optimized from.
pub const SOURCE_ETAG_HEADER: &str = "x-source-etag";

/// Parse a cache location and check the bucket with its credentials.
#[instrument(skip_all, fields(host = location.host_str().unwrap_or("")))]
pub async fn validate_cache_credentials(client: &Client, location: &Url) -> Result<CacheHandle> {
    let handle = CacheHandle::from_location(location)?;

    let response = client
        .head(handle.bucket_url())
        .basic_auth(handle.key_id(), Some(handle.secret()))
        .send()
        .await
        .map_err(|e| PgArchiveError::Cache(format!("cache endpoint unreachable: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PgArchiveError::Cache(format!(
            "bucket '{}' rejected the credentials: HTTP {status}",
            handle.bucket()
        )));
    }

    info!(bucket = handle.bucket(), "optimization cache credentials validated");
    Ok(handle)
}

/// Authenticated access to a validated cache.
#[derive(Debug, Clone)]
pub struct OptimizationCache {
    client: Client,
    handle: CacheHandle,
}

impl OptimizationCache {
    pub fn new(client: Client, handle: CacheHandle) -> Self {
        Self { client, handle }
    }

    /// Fetch the optimized `kind` artifact of a book into `dest`.
    ///
    /// With a `version`, only an object produced by that optimizer version is
    /// accepted; without one any cached version is taken. A known `etag` must
    /// match the object's source ETag. Returns `false` when no acceptable
    /// object exists.
    pub async fn fetch(
        &self,
        book_id: u32,
        kind: &str,
        etag: Option<&str>,
        version: Option<&str>,
        dest: &Path,
    ) -> Result<bool> {
        let url = self.handle.object_url(&format!("{kind}/{book_id}"));
        let response = self
            .client
            .get(&url)
            .basic_auth(self.handle.key_id(), Some(self.handle.secret()))
            .send()
            .await
            .map_err(|e| PgArchiveError::Cache(format!("{url}: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(book_id, kind, "not in optimization cache");
                return Ok(false);
            }
            status if !status.is_success() => {
                return Err(PgArchiveError::Cache(format!("{url}: HTTP {status}")));
            }
            _ => {}
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        if let Some(wanted) = version {
            if header(VERSION_HEADER).as_deref() != Some(wanted) {
                debug!(book_id, kind, wanted, "cached object has another optimizer version");
                return Ok(false);
            }
        }
        if let (Some(etag), Some(source)) = (etag, header(SOURCE_ETAG_HEADER)) {
            if etag != source {
                debug!(book_id, kind, "cached object is outdated");
                return Ok(false);
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PgArchiveError::Cache(format!("{url}: body read failed: {e}")))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PgArchiveError::io(parent, e))?;
        }
        tokio::fs::write(dest, &body)
            .await
            .map_err(|e| PgArchiveError::io(dest, e))?;

        debug!(book_id, kind, "fetched from optimization cache");
        Ok(true)
    }
}
