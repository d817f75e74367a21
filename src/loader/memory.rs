//! In-memory loader
//!
//! Serves a fixed byte buffer instead of touching the file system. Used to
//! push editor- or tool-generated data into an existing entity through
//! [`ResourceCache::update_with_custom_loader`](crate::cache::ResourceCache::update_with_custom_loader),
//! and as a deterministic loader in tests.

use std::io;
use std::io::Cursor;
use std::sync::Arc;
use std::time::SystemTime;

use super::{LoadData, LoadRequest, ResourceLoader};

/// Byte buffer shared between the loader and the streams it hands out.
#[derive(Clone)]
struct SharedBytes(Arc<[u8]>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

pub struct MemoryLoader {
    bytes: SharedBytes,
    description: Option<String>,
    modified: Option<SystemTime>,
}

impl MemoryLoader {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: SharedBytes(Arc::from(bytes.into().into_boxed_slice())),
            description: None,
            modified: Some(SystemTime::now()),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }
}

impl ResourceLoader for MemoryLoader {
    fn open(&self, _request: &LoadRequest<'_>) -> io::Result<LoadData> {
        Ok(LoadData {
            description: self.description.clone(),
            modified: self.modified,
            stream: Box::new(Cursor::new(self.bytes.clone())),
        })
    }
}
