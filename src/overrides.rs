//! Identifier redirection and kind overrides
//!
//! Redirection renames an alias to a canonical id before the table is probed.
//! Kind overrides let a request for a general kind resolve to a more specific
//! kind based on the resolved id, without the caller knowing about the
//! specialization. An override registered for a derived kind is installed on
//! every ancestor, so requests against any of them can be redirected.

use std::collections::HashMap;
use std::sync::Arc;

use crate::kind::{KindRegistry, ResourceKind};

/// Predicate deciding whether an id should resolve to the derived kind.
pub type OverrideDecider = Arc<dyn Fn(&str) -> bool + Send + Sync>;

struct OverrideEntry {
    derived: ResourceKind,
    decider: OverrideDecider,
}

#[derive(Default)]
pub(crate) struct RedirectTable {
    aliases: HashMap<String, String>,
    chains: HashMap<ResourceKind, Vec<OverrideEntry>>,
}

impl RedirectTable {
    /// Registers a lookup alias; an existing alias is overwritten.
    pub fn register_alias(&mut self, alias: &str, target: &str) {
        self.aliases.insert(alias.to_string(), target.to_string());
    }

    pub fn unregister_alias(&mut self, alias: &str) {
        self.aliases.remove(alias);
    }

    pub fn resolve_alias<'a>(&'a self, id: &'a str) -> &'a str {
        self.aliases.get(id).map_or(id, String::as_str)
    }

    /// Installs `decider` on every ancestor of `derived`. Registering the same
    /// derived kind on a chain twice leaves a single entry.
    pub fn register_override(
        &mut self,
        registry: &KindRegistry,
        derived: ResourceKind,
        decider: OverrideDecider,
    ) {
        for ancestor in registry.ancestors(derived) {
            let chain = self.chains.entry(ancestor).or_default();
            if chain.iter().any(|entry| entry.derived == derived) {
                continue;
            }
            chain.push(OverrideEntry {
                derived,
                decider: decider.clone(),
            });
        }
    }

    /// Removes `derived` from every chain it was installed on.
    pub fn unregister_override(&mut self, registry: &KindRegistry, derived: ResourceKind) {
        for ancestor in registry.ancestors(derived) {
            if let Some(chain) = self.chains.get_mut(&ancestor) {
                chain.retain(|entry| entry.derived != derived);
            }
        }
    }

    /// Resolves `requested` against the chains until a fixed point is reached.
    pub fn resolve_kind(&self, requested: ResourceKind, id: &str) -> ResourceKind {
        let mut kind = requested;
        'resolve: loop {
            let Some(chain) = self.chains.get(&kind) else {
                return kind;
            };
            for entry in chain {
                if entry.derived != kind && (entry.decider)(id) {
                    kind = entry.derived;
                    continue 'resolve;
                }
            }
            return kind;
        }
    }
}
