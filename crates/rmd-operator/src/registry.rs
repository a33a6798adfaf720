use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::MutexGuard;

/// Nodes known to run the daemon.
///
/// Written by the node-state reporter as node states appear and disappear,
/// read by the synchronizer. Holds only names, so starting empty after a
/// restart is safe: it refills as node states are observed again.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Mutex<BTreeSet<String>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        // The set stays consistent even if a holder panicked mid-insert.
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `true` if the node was not registered before.
    pub fn add(&self, node: &str) -> bool {
        self.lock().insert(node.to_string())
    }

    /// Returns `true` if the node was registered.
    pub fn remove(&self, node: &str) -> bool {
        self.lock().remove(node)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.lock().contains(node)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn add_and_remove() {
        let registry = NodeRegistry::new();
        assert!(registry.add("node-a"));
        assert!(!registry.add("node-a"));
        assert!(registry.add("node-b"));
        assert!(registry.contains("node-a"));

        assert!(registry.remove("node-a"));
        assert!(!registry.remove("node-a"));
        assert!(!registry.contains("node-a"));
        assert!(registry.contains("node-b"));
    }

    #[test]
    fn shared_across_threads() {
        let registry = Arc::new(NodeRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.add(&format!("node-{i}")))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert!((0..8).all(|i| registry.contains(&format!("node-{i}"))));
    }
}
