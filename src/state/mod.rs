// Addon registry
//
// Holds the most recently published addon list. Readers take a cheap snapshot (an Arc
// of an immutable Vec); a finished run replaces the whole list in one write.

use crate::models::Addon;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Change events emitted by the registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryChange {
    /// A run finished and its addon list replaced the previous one
    AddonsPublished { count: usize },
}

/// Thread-safe holder of the published addon list.
///
/// Cloning the registry is cheap and every clone refers to the same list, so it can be
/// handed to the indexer and to consumers alike.
#[derive(Clone)]
pub struct AddonRegistry {
    addons: Arc<RwLock<Arc<Vec<Arc<Addon>>>>>,
    change_tx: broadcast::Sender<RegistryChange>,
}

impl AddonRegistry {
    /// Create an empty registry with a broadcast buffer of 16 events
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            addons: Arc::new(RwLock::new(Arc::new(Vec::new()))),
            change_tx,
        }
    }

    /// The current addon list. Later publishes do not affect a snapshot already taken.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Addon>>> {
        let guard = self
            .addons
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Find a published addon by directory name (including the `@`).
    pub fn find(&self, name: &str) -> Option<Arc<Addon>> {
        self.snapshot().iter().find(|a| a.name() == name).cloned()
    }

    /// Replace the published list and notify subscribers
    pub fn publish(&self, addons: Vec<Addon>) {
        let count = addons.len();
        let list = Arc::new(addons.into_iter().map(Arc::new).collect::<Vec<_>>());
        {
            let mut guard = self
                .addons
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = list;
        }
        tracing::debug!("Published {} addons", count);

        // No subscribers is fine
        let _ = self.change_tx.send(RegistryChange::AddonsPublished { count });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.change_tx.subscribe()
    }
}

impl Default for AddonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AddonIndexingHandle;

    fn addon(name: &str) -> Addon {
        Addon::from_handle(&AddonIndexingHandle::new(format!("/mods/{}", name)))
    }

    #[test]
    fn test_new_registry_is_empty() {
        assert!(AddonRegistry::new().snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_unaffected_by_publish() {
        let registry = AddonRegistry::new();
        registry.publish(vec![addon("@A")]);
        let before = registry.snapshot();

        registry.publish(vec![addon("@B"), addon("@C")]);

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].name(), "@A");
        assert_eq!(registry.snapshot().len(), 2);
        assert!(registry.find("@A").is_none());
        assert!(registry.find("@C").is_some());
    }

    #[test]
    fn test_clones_share_the_list() {
        let registry = AddonRegistry::new();
        let other = registry.clone();
        registry.publish(vec![addon("@A")]);
        assert_eq!(other.snapshot().len(), 1);
    }
}
