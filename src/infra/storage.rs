//! Filesystem blob store.
//!
//! Layout: `<root>/<project id>/<category dir>/<filename>`. Paths handed back
//! to callers are relative to the root and always use `/` separators.

use crate::application::ports::{BlobCategory, BlobStore};
use crate::domain::StorageError;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Absolute location of a relative blob path.
    pub fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn check_segment(segment: &str) -> Result<(), StorageError> {
    let invalid = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\']);
    if invalid {
        return Err(StorageError::InvalidPath(segment.to_string()));
    }
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl BlobStore for FsBlobStore {
    fn save(
        &self,
        project_id: &str,
        category: BlobCategory,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        check_segment(project_id)?;
        check_segment(filename)?;

        let relative = format!("{}/{}/{}", project_id, category.dir_name(), filename);
        let full = self.full_path(&relative)?;
        let parent = full.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(parent).map_err(io_error(parent))?;

        // Stage in a uniquely named sibling so concurrent writers of the same
        // blob never share a staging file. Readers only see whole images.
        let mut staging = NamedTempFile::new_in(parent).map_err(io_error(parent))?;
        staging.write_all(bytes).map_err(io_error(staging.path()))?;
        staging
            .persist(&full)
            .map_err(|err| io_error(&full)(err.error))?;

        log::debug!("Stored {category} blob {relative} ({} bytes)", bytes.len());
        Ok(relative)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.full_path(path)?;
        fs::read(&full).map_err(|source| match source.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => io_error(&full)(source),
        })
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.full_path(path)?;
        match fs::remove_file(&full) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(io_error(&full)(err)),
            _ => Ok(()),
        }
    }

    fn delete_project(&self, project_id: &str) -> Result<(), StorageError> {
        check_segment(project_id)?;
        let dir = self.root.join(project_id);
        match fs::remove_dir_all(&dir) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(io_error(&dir)(err)),
            _ => Ok(()),
        }
    }
}
