//! Extract the CSV member of a downloaded report archive.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use zip::result::ZipError;

use crate::{IngestError, IngestResult};

impl From<ZipError> for IngestError {
    fn from(error: ZipError) -> Self {
        match error {
            ZipError::Io(error) => IngestError::Io(error),
            other => IngestError::UnexpectedArchiveShape(other.to_string()),
        }
    }
}

/// Extract the single member of the archive at `archive_path` into `dest_dir`, under its stored
/// name, and return the extracted path.
pub async fn unzip(archive_path: &Path, dest_dir: &Path) -> IngestResult<PathBuf> {
    let archive_path = archive_path.to_owned();
    let dest_dir = dest_dir.to_owned();
    tokio::task::spawn_blocking(move || unzip_blocking(&archive_path, &dest_dir))
        .await
        .map_err(|error| IngestError::Io(std::io::Error::new(std::io::ErrorKind::Other, error)))?
}

/// Synchronous version of [unzip].
pub fn unzip_blocking(archive_path: &Path, dest_dir: &Path) -> IngestResult<PathBuf> {
    let mut archive = zip::ZipArchive::new(File::open(archive_path)?)?;
    if archive.len() != 1 {
        return Err(IngestError::UnexpectedArchiveShape(format!(
            "expected a single entry, found {}",
            archive.len()
        )));
    }

    let mut entry = archive.by_index(0)?;
    if entry.is_dir() {
        return Err(IngestError::UnexpectedArchiveShape(format!(
            "entry '{}' is a directory",
            entry.name()
        )));
    }
    let relative = safe_relative_path(entry.name()).ok_or_else(|| {
        IngestError::UnexpectedArchiveShape(format!("unsafe entry path '{}'", entry.name()))
    })?;

    let path = dest_dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut output = File::create(&path)?;
    let bytes = std::io::copy(&mut entry, &mut output)?;

    debug!(path = %path.display(), bytes, "extracted archive");
    Ok(path)
}

/// The stored name as a relative path, unless it is empty, absolute, or escapes its root.
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    if name.contains('\\') {
        return None;
    }
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!path.as_os_str().is_empty()).then_some(path)
}
