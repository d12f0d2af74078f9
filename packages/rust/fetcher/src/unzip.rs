//! Extraction of zipped HTML books.
//!
//! Some books only advertise their HTML inside a zip. The main page lands at
//! `{id}.html` and every other file next to it as `{id}_{name}`.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use pgarchive_shared::{PgArchiveError, Result};
use tracing::debug;

fn zip_err(path: &Path, e: zip::result::ZipError) -> PgArchiveError {
    PgArchiveError::parse(format!("{}: {e}", path.display()))
}

fn is_html(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".html") || lower.ends_with(".htm")
}

/// Extract the zip at `archive` into `html_dest`'s folder, then delete it.
///
/// With several HTML entries the one named `{id}-h.*` is the main page.
/// Entries whose names would escape the folder are rejected.
pub fn extract_zipped_html(book_id: u32, archive: &Path, html_dest: &Path) -> Result<()> {
    let folder = html_dest
        .parent()
        .ok_or_else(|| PgArchiveError::validation("HTML destination has no parent folder"))?;
    let file = File::open(archive).map_err(|e| PgArchiveError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| zip_err(archive, e))?;

    let mut entries: Vec<(usize, PathBuf)> = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip.by_index(index).map_err(|e| zip_err(archive, e))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            PgArchiveError::validation(format!(
                "unsafe entry {:?} in {}",
                entry.name(),
                archive.display()
            ))
        })?;
        entries.push((index, name));
    }

    let base = |name: &Path| {
        name.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let html: Vec<usize> = entries
        .iter()
        .filter(|(_, name)| is_html(&base(name)))
        .map(|(index, _)| *index)
        .collect();
    let main = match html.as_slice() {
        [] => {
            return Err(PgArchiveError::parse(format!(
                "no HTML file in {}",
                archive.display()
            )));
        }
        [single] => *single,
        _ => {
            let prefix = format!("{book_id}-h.");
            entries
                .iter()
                .find(|(_, name)| is_html(&base(name)) && base(name).starts_with(&prefix))
                .map(|(index, _)| *index)
                .ok_or_else(|| {
                    PgArchiveError::parse(format!(
                        "no {prefix}* page among the HTML files of {}",
                        archive.display()
                    ))
                })?
        }
    };

    for (index, name) in &entries {
        let dest = if *index == main {
            html_dest.to_path_buf()
        } else {
            folder.join(format!("{book_id}_{}", base(name)))
        };
        let mut entry = zip.by_index(*index).map_err(|e| zip_err(archive, e))?;
        let mut out = File::create(&dest).map_err(|e| PgArchiveError::io(&dest, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| PgArchiveError::io(&dest, e))?;
        debug!(book_id, entry = %name.display(), dest = %dest.display(), "extracted");
    }

    std::fs::remove_file(archive).map_err(|e| PgArchiveError::io(archive, e))?;
    Ok(())
}
