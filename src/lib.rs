//! loadstone - Threaded resource cache and streaming loader
//!
//! # Features
//! - Opaque, reference-counted handles to every loadable asset
//! - Priority-ordered background loading on a fixed worker pool
//! - Budget-bounded loading for interleaving with per-frame work
//! - Loading/missing fallback substitution per kind and per entity
//! - Kind overrides and id redirection resolved at lookup time
//! - Incremental eviction with a persisted round-robin cursor
//!
//! # Quick Start
//!
//! ```ignore
//! use loadstone::{AcquireMode, CacheOptions, KindDescriptor};
//!
//! let cache = CacheOptions::new().init();
//! let texture_kind = cache.register_kind(KindDescriptor::new("texture", my_builder));
//! let handle = cache.load::<MyTexture>(texture_kind, "textures/wall.dds");
//! let content = cache.acquire(&handle, AcquireMode::BlockUntilLoaded);
//! ```
//!
//! Loading happens off the requesting thread; `acquire` either blocks until
//! the entity is loaded or hands out the configured fallback while loading is
//! still in flight. Call [`ResourceCache::per_frame_update`] once per tick and
//! [`ResourceCache::shutdown`] before dropping the last reference.

// Core modules
pub mod cache;
pub mod content;
pub mod entity;
pub mod events;
pub mod handle;
pub mod kind;
pub mod loader;
pub mod overrides;

// Error types
mod error;
pub use error::{ResourceError, Result};

// Re-export main types from cache
pub use cache::metrics::{CacheMetrics, CacheMetricsHandle};
pub use cache::options::CacheOptions;
pub use cache::{
    AcquireMode, AcquireResult, ContentGuard, LoadProgress, ResourceCache, UntypedContentGuard,
};

// Re-export entity and handle types
pub use content::{
    BuildContext, BuiltContent, ContentBuilder, Descriptor, MemoryUsage, ResourceContent,
};
pub use entity::{Priority, ResourceState};
pub use events::{ManagerEvent, ResourceEvent, ResourceEventKind, SubscriberId};
pub use handle::{Handle, UntypedHandle};
pub use kind::{KindDescriptor, ResourceKind};
pub use loader::{FileLoader, LoadData, LoadRequest, MemoryLoader, ResourceLoader};
pub use overrides::OverrideDecider;
