//! Byte-stream loaders for the read phase
//!
//! A loader resolves an entity's id to a byte stream; the content builder for
//! the entity's kind then consumes that stream. Loaders run on worker threads
//! and must not touch cache state.

pub mod file;
pub mod memory;

use std::io;
use std::io::Read;
use std::time::SystemTime;

use crate::kind::ResourceKind;

pub use file::FileLoader;
pub use memory::MemoryLoader;

/// Identifies the entity a loader is asked to open.
pub struct LoadRequest<'a> {
    pub kind: ResourceKind,
    pub kind_name: &'a str,
    pub id: &'a str,
}

/// Data produced by a successful read phase.
pub struct LoadData {
    /// Human-readable source description, e.g. the resolved file path.
    pub description: Option<String>,
    /// Modification time of the source, used for outdated checks on reload.
    pub modified: Option<SystemTime>,
    pub stream: Box<dyn Read + Send>,
}

/// Resolves ids to byte streams.
pub trait ResourceLoader: Send + Sync {
    fn open(&self, request: &LoadRequest<'_>) -> io::Result<LoadData>;

    /// True if the source changed since `loaded_modified` was recorded.
    /// Unforced reloads skip entities whose loader reports them current.
    fn is_outdated(&self, request: &LoadRequest<'_>, loaded_modified: Option<SystemTime>) -> bool {
        let _ = (request, loaded_modified);
        false
    }
}
