//! Content payload and builder contracts
//!
//! The cache never interprets content itself. A [`ContentBuilder`] registered
//! per kind turns the byte stream produced by the read phase (or an in-memory
//! descriptor) into the kind-specific payload, and reports its memory cost.

use std::any::Any;
use std::io::Read;
use std::sync::Arc;

use crate::error::{ResourceError, Result};
use crate::kind::ResourceKind;

/// Marker for types that can be stored as entity content.
///
/// Blanket-implemented; content only has to be sendable and type-erasable.
pub trait ResourceContent: Any + Send + Sync {}

impl<T: Any + Send + Sync> ResourceContent for T {}

/// Type-erased content payload owned by an entity.
pub(crate) type ContentPayload = Arc<dyn Any + Send + Sync>;

/// In-memory descriptor consumed by [`ContentBuilder::build_from_descriptor`].
pub type Descriptor = Box<dyn Any + Send>;

/// CPU/GPU memory cost of a built payload.
///
/// Builders must fill in both fields. A value left at [`MemoryUsage::UNREPORTED`]
/// is treated as a contract violation when the build result is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub cpu_bytes: u64,
    pub gpu_bytes: u64,
}

impl MemoryUsage {
    /// Sentinel for a field the builder failed to report.
    pub const UNREPORTED: u64 = u64::MAX;

    pub fn new(cpu_bytes: u64, gpu_bytes: u64) -> Self {
        Self {
            cpu_bytes,
            gpu_bytes,
        }
    }

    pub fn zero() -> Self {
        Self {
            cpu_bytes: 0,
            gpu_bytes: 0,
        }
    }

    /// True if both fields were filled in.
    pub fn is_fully_reported(&self) -> bool {
        self.cpu_bytes != Self::UNREPORTED && self.gpu_bytes != Self::UNREPORTED
    }

    pub fn total(&self) -> u64 {
        self.cpu_bytes.saturating_add(self.gpu_bytes)
    }
}

impl Default for MemoryUsage {
    fn default() -> Self {
        Self {
            cpu_bytes: Self::UNREPORTED,
            gpu_bytes: Self::UNREPORTED,
        }
    }
}

/// Output of a successful content build.
pub struct BuiltContent {
    pub(crate) content: ContentPayload,
    pub(crate) memory: MemoryUsage,
}

impl BuiltContent {
    pub fn new<T: ResourceContent>(content: T, memory: MemoryUsage) -> Self {
        Self {
            content: Arc::new(content),
            memory,
        }
    }

    pub fn memory(&self) -> MemoryUsage {
        self.memory
    }
}

/// Context handed to builders for the entity being built.
pub struct BuildContext<'a> {
    pub cache: &'a crate::cache::ResourceCache,
    pub kind: ResourceKind,
    pub kind_name: Arc<str>,
    pub id: Arc<str>,
    /// True when the entity previously received low-resolution data.
    pub has_low_res_data: bool,
}

/// Builds kind-specific content from a byte stream or a descriptor.
///
/// `build` runs on a worker thread unless the kind was registered with
/// `main_thread_build`. Acquiring other resources from inside `build` is only
/// legal for kind pairs registered via
/// [`ResourceCache::allow_nested_acquire`](crate::cache::ResourceCache::allow_nested_acquire).
pub trait ContentBuilder: Send + Sync {
    fn build(&self, cx: &BuildContext<'_>, stream: &mut dyn Read) -> Result<BuiltContent>;

    /// Synchronous creation path; kinds that support descriptors override this.
    fn build_from_descriptor(
        &self,
        cx: &BuildContext<'_>,
        descriptor: Descriptor,
    ) -> Result<BuiltContent> {
        let _ = descriptor;
        Err(ResourceError::UnsupportedDescriptor {
            kind: cx.kind_name.to_string(),
        })
    }
}
