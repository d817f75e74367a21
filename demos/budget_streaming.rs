//! Budget-bounded loading: queue a batch of assets, then interleave loading
//! with "frame" work by giving the pump a small slice of each tick.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use loadstone::{
    BuildContext, BuiltContent, CacheOptions, ContentBuilder, KindDescriptor, LoadProgress,
    MemoryLoader, MemoryUsage, Priority, Result,
};

struct Chunk {
    bytes: Vec<u8>,
}

struct ChunkBuilder;

impl ContentBuilder for ChunkBuilder {
    fn build(&self, _cx: &BuildContext<'_>, stream: &mut dyn Read) -> Result<BuiltContent> {
        std::thread::sleep(std::time::Duration::from_millis(3));
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        let memory = MemoryUsage::new(bytes.len() as u64, 0);
        Ok(BuiltContent::new(Chunk { bytes }, memory))
    }
}

fn main() {
    env_logger::init();

    // zero workers: every load happens inside the pump, on this thread
    let cache = CacheOptions::new()
        .worker_threads(0)
        .default_loader(Arc::new(MemoryLoader::new(vec![7u8; 16 * 1024])))
        .init();

    let kind = cache.register_kind(
        KindDescriptor::new("chunk", Arc::new(ChunkBuilder)).priority(Priority::Low),
    );

    let mut handles = Vec::new();
    for index in 0..32 {
        let handle = cache.load::<Chunk>(kind, &format!("world/chunk-{index}"));
        cache.preload(&handle);
        handles.push(handle);
    }

    let mut frame = 0;
    loop {
        frame += 1;
        // ... simulate the rest of the frame ...
        let progress = cache.pump_loading(Duration::from_millis(8));
        cache.per_frame_update();

        let loaded = handles.iter().filter(|h| h.is_loaded()).count();
        println!("frame {frame:>3}: {loaded:>2}/32 chunks resident");

        if progress == LoadProgress::Finished {
            break;
        }
    }

    println!(
        "all chunks loaded after {frame} frames, {} KiB resident",
        cache.metrics().resident_cpu_bytes() / 1024
    );

    handles.clear();
    println!("freed {} chunks", cache.free_all_unused());
    cache.shutdown();
}
