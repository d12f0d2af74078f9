//! RDF catalog preparation: download the tarball and extract it.

use std::path::{Path, PathBuf};

use pgarchive_shared::{PgArchiveError, Result};
use reqwest::Client;
use tracing::{info, instrument};

use crate::download_file;

/// Make sure `folder` holds the extracted RDF catalog.
///
/// An existing non-empty folder is kept unless `force` is set. Otherwise the
/// tarball at `url` is downloaded next to the folder (reused when already
/// present and not forced) and extracted with the system `tar`.
#[instrument(skip_all, fields(url = %url, folder = %folder.display(), force = force))]
pub async fn setup_rdf_folder(
    client: &Client,
    url: &str,
    folder: &Path,
    force: bool,
) -> Result<()> {
    if !force && is_populated(folder) {
        info!("RDF folder already populated, skipping preparation");
        return Ok(());
    }

    let tarball = tarball_path(url, folder);
    if force || !tarball.is_file() {
        info!(tarball = %tarball.display(), "downloading RDF catalog");
        download_file(client, url, &tarball).await?;
    } else {
        info!(tarball = %tarball.display(), "reusing downloaded RDF catalog");
    }

    if force && folder.exists() {
        tokio::fs::remove_dir_all(folder)
            .await
            .map_err(|e| PgArchiveError::io(folder, e))?;
    }
    tokio::fs::create_dir_all(folder)
        .await
        .map_err(|e| PgArchiveError::io(folder, e))?;

    extract(&tarball, folder).await?;
    info!("RDF catalog extracted");
    Ok(())
}

fn is_populated(folder: &Path) -> bool {
    std::fs::read_dir(folder)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Tarball location: the URL's file name, beside the target folder.
fn tarball_path(url: &str, folder: &Path) -> PathBuf {
    let name = url
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("rdf-files.tar.bz2");
    match folder.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

async fn extract(tarball: &Path, folder: &Path) -> Result<()> {
    let status = tokio::process::Command::new("tar")
        .arg("-xf")
        .arg(tarball)
        .arg("-C")
        .arg(folder)
        .status()
        .await
        .map_err(|e| PgArchiveError::External(format!("failed to run tar: {e}")))?;

    if !status.success() {
        return Err(PgArchiveError::External(format!(
            "tar exited with {status} while extracting {}",
            tarball.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn tarball_sits_next_to_folder() {
        let path = tarball_path(
            "https://www.gutenberg.org/cache/epub/feeds/rdf-files.tar.bz2",
            Path::new("/data/rdf-files"),
        );
        assert_eq!(path, PathBuf::from("/data/rdf-files.tar.bz2"));
    }

    #[tokio::test]
    async fn populated_folder_is_kept() {
        let folder = std::env::temp_dir().join(format!("pga_rdf_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("pg1.rdf"), "<rdf:RDF/>").unwrap();

        // No server behind this URL: any request would fail.
        let client = crate::http_client().unwrap();
        setup_rdf_folder(&client, "http://127.0.0.1:9/rdf-files.tar", &folder, false)
            .await
            .expect("populated folder skips preparation");
    }

    #[tokio::test]
    async fn downloads_and_extracts_tarball() {
        let work = std::env::temp_dir().join(format!("pga_prep_{}", Uuid::now_v7()));
        let source = work.join("source");
        std::fs::create_dir_all(source.join("cache/epub/5")).unwrap();
        std::fs::write(source.join("cache/epub/5/pg5.rdf"), "<rdf:RDF/>").unwrap();

        let archive = work.join("fixture.tar");
        let built = std::process::Command::new("tar")
            .arg("-cf")
            .arg(&archive)
            .arg("-C")
            .arg(&source)
            .arg("cache")
            .status();
        if !matches!(built, Ok(s) if s.success()) {
            // tar is unavailable on this machine
            return;
        }

        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/feeds/rdf-files.tar"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_bytes(std::fs::read(&archive).unwrap()),
            )
            .mount(&server)
            .await;

        let folder = work.join("rdf-files");
        let client = crate::http_client().unwrap();
        let url = format!("{}/feeds/rdf-files.tar", server.uri());
        setup_rdf_folder(&client, &url, &folder, false).await.unwrap();

        assert!(folder.join("cache/epub/5/pg5.rdf").is_file());
        assert!(work.join("rdf-files.tar").is_file());
    }
}
