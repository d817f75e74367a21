//! Shared fixtures: an in-memory loader, a counting blob builder, and a
//! ready-made cache setup.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use loadstone::{
    BuildContext, BuiltContent, CacheOptions, ContentBuilder, Descriptor, KindDescriptor,
    LoadData, LoadRequest, MemoryUsage, ResourceCache, ResourceError, ResourceKind,
    ResourceLoader, Result,
};

/// Content type used by every test kind.
pub struct Blob {
    pub bytes: Vec<u8>,
}

/// Builder that stores the stream bytes and counts every build.
#[derive(Default)]
pub struct BlobBuilder {
    pub builds: AtomicU32,
    pub built_ids: Mutex<Vec<String>>,
    pub build_delay: Mutex<Option<Duration>>,
}

impl BlobBuilder {
    pub fn build_count(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.build_delay.lock() = Some(delay);
    }
}

impl ContentBuilder for BlobBuilder {
    fn build(&self, cx: &BuildContext<'_>, stream: &mut dyn Read) -> Result<BuiltContent> {
        if let Some(delay) = *self.build_delay.lock() {
            std::thread::sleep(delay);
        }
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.built_ids.lock().push(cx.id.to_string());
        let memory = MemoryUsage::new(bytes.len() as u64, 0);
        Ok(BuiltContent::new(Blob { bytes }, memory))
    }

    fn build_from_descriptor(
        &self,
        cx: &BuildContext<'_>,
        descriptor: Descriptor,
    ) -> Result<BuiltContent> {
        let bytes = descriptor
            .downcast::<Vec<u8>>()
            .map_err(|_| ResourceError::WrongDescriptorType {
                kind: cx.kind_name.to_string(),
            })?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.built_ids.lock().push(cx.id.to_string());
        let memory = MemoryUsage::new(bytes.len() as u64, 0);
        Ok(BuiltContent::new(Blob { bytes: *bytes }, memory))
    }
}

/// Loader backed by a map of id -> bytes; ids not in the map fail to open.
#[derive(Default)]
pub struct MapLoader {
    files: Mutex<HashMap<String, Vec<u8>>>,
    pub opens: AtomicU32,
    pub open_delay: Mutex<Option<Duration>>,
    pub outdated: AtomicBool,
}

impl MapLoader {
    pub fn insert(&self, id: &str, bytes: impl Into<Vec<u8>>) {
        self.files.lock().insert(id.to_string(), bytes.into());
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.open_delay.lock() = Some(delay);
    }

    pub fn mark_outdated(&self, outdated: bool) {
        self.outdated.store(outdated, Ordering::SeqCst);
    }
}

impl ResourceLoader for MapLoader {
    fn open(&self, request: &LoadRequest<'_>) -> io::Result<LoadData> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = *self.open_delay.lock() {
            std::thread::sleep(delay);
        }
        let bytes = self
            .files
            .lock()
            .get(request.id)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, request.id.to_string()))?;
        Ok(LoadData {
            description: Some(request.id.to_string()),
            modified: Some(std::time::SystemTime::now()),
            stream: Box::new(Cursor::new(bytes)),
        })
    }

    fn is_outdated(
        &self,
        _request: &LoadRequest<'_>,
        _loaded_modified: Option<std::time::SystemTime>,
    ) -> bool {
        self.outdated.load(Ordering::SeqCst)
    }
}

pub struct TestEnv {
    pub cache: Arc<ResourceCache>,
    pub kind: ResourceKind,
    pub loader: Arc<MapLoader>,
    pub builder: Arc<BlobBuilder>,
}

pub fn setup(worker_threads: usize) -> TestEnv {
    let loader = Arc::new(MapLoader::default());
    let builder = Arc::new(BlobBuilder::default());
    let cache = CacheOptions::new()
        .worker_threads(worker_threads)
        .default_loader(loader.clone())
        .init();
    let kind = cache.register_kind(KindDescriptor::new("blob", builder.clone()));
    TestEnv {
        cache,
        kind,
        loader,
        builder,
    }
}

/// Drives the budget pump until the queue is drained.
pub fn pump_until_finished(cache: &ResourceCache) {
    for _ in 0..1_000 {
        if cache.pump_loading(Duration::from_millis(5)) == loadstone::LoadProgress::Finished {
            return;
        }
    }
    panic!("loading never finished");
}
