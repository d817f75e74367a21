//! Default file-system loader
//!
//! Interprets the entity id as a path, optionally below a root directory, and
//! streams the file contents. Records the file modification time so reloads
//! can detect outdated entities.

use std::fs::File;
use std::io;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{LoadData, LoadRequest, ResourceLoader};

#[derive(Debug, Default, Clone)]
pub struct FileLoader {
    root: Option<PathBuf>,
}

impl FileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves ids relative to `root` instead of the working directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, id: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(id),
            None => Path::new(id).to_path_buf(),
        }
    }

    fn modification_time(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
    }
}

impl ResourceLoader for FileLoader {
    fn open(&self, request: &LoadRequest<'_>) -> io::Result<LoadData> {
        let path = self.resolve(request.id);
        let file = File::open(&path)?;
        let modified = file.metadata().and_then(|meta| meta.modified()).ok();

        Ok(LoadData {
            description: Some(path.display().to_string()),
            modified,
            stream: Box::new(BufReader::new(file)),
        })
    }

    fn is_outdated(&self, request: &LoadRequest<'_>, loaded_modified: Option<SystemTime>) -> bool {
        let current = Self::modification_time(&self.resolve(request.id));
        match (loaded_modified, current) {
            (Some(loaded), Some(current)) => current > loaded,
            // no recorded time means we cannot prove it is current
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }
}
