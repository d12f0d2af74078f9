//! Pre-flight checks that abort a run before any stage executes.

use pgarchive_shared::{CacheHandle, PgArchiveError, Result};
use tracing::{error, info};
use url::Url;

use crate::collaborators::Collaborators;

/// Validate the optimization cache location, if one was given.
///
/// Any failure is fatal to the run.
pub async fn validate_cache<S: Collaborators + ?Sized>(
    services: &S,
    location: Option<&str>,
) -> Result<Option<CacheHandle>> {
    let Some(location) = location else {
        return Ok(None);
    };

    let url = Url::parse(location)
        .map_err(|e| PgArchiveError::Cache(format!("invalid cache location: {e}")))?;

    match services.validate_cache_credentials(&url).await {
        Ok(handle) => {
            info!(bucket = handle.bucket(), "optimization cache credentials valid");
            Ok(Some(handle))
        }
        Err(e) => {
            error!(error = %e, "optimization cache unusable");
            Err(e)
        }
    }
}

/// Fail when any required external tool is missing.
pub async fn check_dependencies<S: Collaborators + ?Sized>(services: &S) -> Result<()> {
    let report = services.check_dependencies().await?;
    if report.is_satisfied() {
        info!("all dependencies found");
        return Ok(());
    }
    error!(missing = ?report.missing, "required dependencies are missing");
    Err(PgArchiveError::MissingDependencies {
        missing: report.missing,
    })
}
