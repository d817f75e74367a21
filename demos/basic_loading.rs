//! Minimal end-to-end walkthrough: register a kind, create a placeholder from
//! a descriptor, load an asset in the background, fall back while it is in
//! flight, then block for the real content.

use std::io::Read;
use std::sync::Arc;

use loadstone::{
    AcquireMode, AcquireResult, BuildContext, BuiltContent, CacheOptions, ContentBuilder,
    Descriptor, KindDescriptor, MemoryLoader, MemoryUsage, ResourceError, Result,
};

struct TextAsset {
    text: String,
}

struct TextBuilder;

impl ContentBuilder for TextBuilder {
    fn build(&self, _cx: &BuildContext<'_>, stream: &mut dyn Read) -> Result<BuiltContent> {
        // pretend this is an expensive decode
        std::thread::sleep(std::time::Duration::from_millis(50));
        let mut text = String::new();
        stream.read_to_string(&mut text)?;
        let memory = MemoryUsage::new(text.len() as u64, 0);
        Ok(BuiltContent::new(TextAsset { text }, memory))
    }

    fn build_from_descriptor(
        &self,
        cx: &BuildContext<'_>,
        descriptor: Descriptor,
    ) -> Result<BuiltContent> {
        let text = descriptor
            .downcast::<String>()
            .map_err(|_| ResourceError::WrongDescriptorType {
                kind: cx.kind_name.to_string(),
            })?;
        let memory = MemoryUsage::new(text.len() as u64, 0);
        Ok(BuiltContent::new(TextAsset { text: *text }, memory))
    }
}

fn main() {
    env_logger::init();

    let cache = CacheOptions::new()
        .worker_threads(2)
        .default_loader(Arc::new(MemoryLoader::new(
            b"the quick brown fox jumps over the lazy dog".to_vec(),
        )))
        .init();

    let kind = cache.register_kind(KindDescriptor::new("text", Arc::new(TextBuilder)));

    // a placeholder built synchronously from memory, used while real assets load
    let placeholder = cache.create_from_descriptor::<TextAsset>(
        kind,
        "text://placeholder",
        Box::new("loading...".to_string()),
    );
    cache.set_kind_loading_fallback(kind, Some(placeholder.untyped().clone()));

    let handle = cache.load::<TextAsset>(kind, "books/pangram.txt");
    println!("state right after load: {:?}", handle.state());

    let first = cache.acquire(&handle, AcquireMode::AllowLoadingFallback);
    if first.result() == AcquireResult::LoadingFallback {
        println!("still loading, showing: {}", first.text);
    }
    drop(first);

    let content = cache.acquire(&handle, AcquireMode::BlockUntilLoaded);
    println!("loaded: {}", content.text);
    println!(
        "memory: {} bytes cpu, refcount {}",
        handle.memory_usage().cpu_bytes,
        handle.reference_count()
    );

    drop(content);
    drop(handle);
    drop(placeholder);
    cache.set_kind_loading_fallback(kind, None);
    println!("freed {} entities", cache.free_all_unused());

    cache.shutdown();
}
