//! Kind registry and kind graph
//!
//! A kind describes one resource type: how to build its content, which loader
//! reads its bytes, its default scheduling priority, and its fallback policy.
//! Kinds form an explicit directed graph through their parent lists; type
//! overrides and the nested-acquire rules walk that graph instead of any
//! language-level type hierarchy.

use std::collections::HashMap;
use std::sync::Arc;

use crate::content::ContentBuilder;
use crate::entity::Priority;
use crate::handle::UntypedHandle;
use crate::loader::ResourceLoader;

/// Interned kind id. Cheap to copy and compare; resolved through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKind(u32);

impl ResourceKind {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Everything needed to register a kind.
pub struct KindDescriptor {
    pub name: String,
    pub parents: Vec<ResourceKind>,
    pub builder: Arc<dyn ContentBuilder>,
    /// Loader override; kinds without one use the cache's default loader.
    pub loader: Option<Arc<dyn ResourceLoader>>,
    pub default_priority: Priority,
    /// When false the budgeted sweeper skips this kind; only bulk frees touch it.
    pub incremental_unload: bool,
    /// Content builds must run on the thread that initialized the cache.
    pub main_thread_build: bool,
}

impl KindDescriptor {
    pub fn new(name: impl Into<String>, builder: Arc<dyn ContentBuilder>) -> Self {
        Self {
            name: name.into(),
            parents: Vec::new(),
            builder,
            loader: None,
            default_priority: Priority::Medium,
            incremental_unload: true,
            main_thread_build: false,
        }
    }

    pub fn parent(mut self, parent: ResourceKind) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn incremental_unload(mut self, allowed: bool) -> Self {
        self.incremental_unload = allowed;
        self
    }

    pub fn main_thread_build(mut self) -> Self {
        self.main_thread_build = true;
        self
    }
}

pub(crate) struct KindRecord {
    pub name: Arc<str>,
    pub parents: Vec<ResourceKind>,
    pub children: Vec<ResourceKind>,
    pub builder: Arc<dyn ContentBuilder>,
    pub loader: Option<Arc<dyn ResourceLoader>>,
    pub default_priority: Priority,
    pub incremental_unload: bool,
    pub main_thread_build: bool,
    pub loading_fallback: Option<UntypedHandle>,
    pub missing_fallback: Option<UntypedHandle>,
    /// Kinds that may be acquired while content of this kind is being built.
    /// Expanded to a transitive closure over the kind graph on first query.
    nested_allowed: Vec<ResourceKind>,
    nested_closure_built: bool,
}

#[derive(Default)]
pub(crate) struct KindRegistry {
    records: Vec<KindRecord>,
    by_lower_name: HashMap<String, ResourceKind>,
}

impl KindRegistry {
    pub fn register(&mut self, desc: KindDescriptor) -> ResourceKind {
        let lower = desc.name.to_lowercase();
        assert!(
            !self.by_lower_name.contains_key(&lower),
            "kind '{}' is already registered",
            desc.name
        );
        for parent in &desc.parents {
            assert!(
                parent.index() < self.records.len(),
                "parent kind of '{}' is not registered",
                desc.name
            );
        }

        let kind = ResourceKind::from_index(self.records.len());
        for parent in &desc.parents {
            self.records[parent.index()].children.push(kind);
        }
        self.records.push(KindRecord {
            name: Arc::from(desc.name.as_str()),
            parents: desc.parents,
            children: Vec::new(),
            builder: desc.builder,
            loader: desc.loader,
            default_priority: desc.default_priority,
            incremental_unload: desc.incremental_unload,
            main_thread_build: desc.main_thread_build,
            loading_fallback: None,
            missing_fallback: None,
            nested_allowed: Vec::new(),
            nested_closure_built: false,
        });
        self.by_lower_name.insert(lower, kind);
        kind
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, kind: ResourceKind) -> &KindRecord {
        &self.records[kind.index()]
    }

    pub fn record_mut(&mut self, kind: ResourceKind) -> &mut KindRecord {
        &mut self.records[kind.index()]
    }

    /// Name lookup; compares lowercased.
    pub fn by_name(&self, name: &str) -> Option<ResourceKind> {
        self.by_lower_name.get(&name.to_lowercase()).copied()
    }

    /// All kinds in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        (0..self.records.len()).map(ResourceKind::from_index)
    }

    /// All strict ancestors, breadth-first, deduplicated.
    pub fn ancestors(&self, kind: ResourceKind) -> Vec<ResourceKind> {
        let mut out = Vec::new();
        let mut todo = self.record(kind).parents.clone();
        while let Some(next) = todo.pop() {
            if out.contains(&next) {
                continue;
            }
            out.push(next);
            todo.extend_from_slice(&self.record(next).parents);
        }
        out
    }

    /// The kind itself plus everything derived from it.
    pub fn descendants_with_self(&self, kind: ResourceKind) -> Vec<ResourceKind> {
        let mut out = vec![kind];
        let mut cursor = 0;
        while cursor < out.len() {
            let current = out[cursor];
            cursor += 1;
            for child in &self.record(current).children {
                if !out.contains(child) {
                    out.push(*child);
                }
            }
        }
        out
    }

    /// Allows `target` (and everything derived from it) to be acquired while
    /// content of `updating` is being built. Must be called before the first
    /// nested-acquire query against `updating`.
    pub fn allow_nested_acquire(&mut self, updating: ResourceKind, target: ResourceKind) {
        let record = self.record_mut(updating);
        assert!(
            !record.nested_closure_built,
            "allow_nested_acquire for kind '{}' must happen before the rule is first queried",
            record.name
        );
        if !record.nested_allowed.contains(&target) {
            record.nested_allowed.push(target);
        }
    }

    /// True if acquiring `target` inside a content build of `updating` is legal.
    ///
    /// The answer is the transitive closure of the allow rules: every allowed
    /// kind contributes its own allowed kinds, and each step expands to all
    /// derived kinds. Computed once per kind and cached.
    pub fn is_nested_acquire_allowed(
        &mut self,
        updating: ResourceKind,
        target: ResourceKind,
    ) -> bool {
        if !self.record(updating).nested_closure_built {
            let seeds = self.record(updating).nested_allowed.clone();
            let mut todo: Vec<ResourceKind> = Vec::new();
            for seed in seeds {
                todo.extend(self.descendants_with_self(seed));
            }

            let mut closure: Vec<ResourceKind> = Vec::new();
            while let Some(next) = todo.pop() {
                if closure.contains(&next) {
                    continue;
                }
                closure.push(next);
                for nested in self.record(next).nested_allowed.clone() {
                    todo.extend(self.descendants_with_self(nested));
                }
            }
            closure.sort();

            let record = self.record_mut(updating);
            record.nested_allowed = closure;
            record.nested_closure_built = true;
        }

        self.record(updating).nested_allowed.binary_search(&target).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{BuildContext, BuiltContent, MemoryUsage};
    use crate::error::Result;
    use std::io::Read;

    struct NullBuilder;

    impl ContentBuilder for NullBuilder {
        fn build(&self, _cx: &BuildContext<'_>, _stream: &mut dyn Read) -> Result<BuiltContent> {
            Ok(BuiltContent::new((), MemoryUsage::zero()))
        }
    }

    fn builder() -> Arc<dyn ContentBuilder> {
        Arc::new(NullBuilder)
    }

    fn register(registry: &mut KindRegistry, name: &str, parents: &[ResourceKind]) -> ResourceKind {
        let mut desc = KindDescriptor::new(name, builder());
        desc.parents = parents.to_vec();
        registry.register(desc)
    }

    #[test]
    fn test_name_lookup_is_case_insensitive() {
        let mut registry = KindRegistry::default();
        let kind = register(&mut registry, "Texture", &[]);
        assert_eq!(registry.by_name("texture"), Some(kind));
        assert_eq!(registry.by_name("TEXTURE"), Some(kind));
        assert_eq!(registry.by_name("mesh"), None);
    }

    #[test]
    fn test_ancestors_walk_all_parents() {
        let mut registry = KindRegistry::default();
        let root = register(&mut registry, "root", &[]);
        let mid = register(&mut registry, "mid", &[root]);
        let leaf = register(&mut registry, "leaf", &[mid]);

        let ancestors = registry.ancestors(leaf);
        assert!(ancestors.contains(&mid));
        assert!(ancestors.contains(&root));
        assert_eq!(ancestors.len(), 2);
    }

    #[test]
    fn test_nested_closure_covers_diamond() {
        // base <- left, base <- right, bottom derives from both
        let mut registry = KindRegistry::default();
        let material = register(&mut registry, "material", &[]);
        let base = register(&mut registry, "base", &[]);
        let left = register(&mut registry, "left", &[base]);
        let right = register(&mut registry, "right", &[base]);
        let bottom = register(&mut registry, "bottom", &[left, right]);

        registry.allow_nested_acquire(material, base);

        assert!(registry.is_nested_acquire_allowed(material, base));
        assert!(registry.is_nested_acquire_allowed(material, left));
        assert!(registry.is_nested_acquire_allowed(material, right));
        // the diamond bottom must appear exactly once and be allowed
        assert!(registry.is_nested_acquire_allowed(material, bottom));
        assert!(!registry.is_nested_acquire_allowed(bottom, material));
    }

    #[test]
    fn test_nested_closure_is_transitive() {
        let mut registry = KindRegistry::default();
        let a = register(&mut registry, "a", &[]);
        let b = register(&mut registry, "b", &[]);
        let c = register(&mut registry, "c", &[]);

        registry.allow_nested_acquire(a, b);
        registry.allow_nested_acquire(b, c);

        // a -> b and b -> c, so building `a` may acquire `c` as well
        assert!(registry.is_nested_acquire_allowed(a, c));
    }

    #[test]
    #[should_panic]
    fn test_allow_after_query_panics() {
        let mut registry = KindRegistry::default();
        let a = register(&mut registry, "a", &[]);
        let b = register(&mut registry, "b", &[]);
        registry.is_nested_acquire_allowed(a, b);
        registry.allow_nested_acquire(a, b);
    }
}
