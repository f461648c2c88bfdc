//! Name to codec lookup.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

use super::{A2aWire, AcpWire, McpWire, Wire};

/// Concurrent map of protocol name to codec. Registering an existing name
/// replaces the previous codec.
#[derive(Default)]
pub struct WireRegistry {
    wires: DashMap<String, Arc<dyn Wire>>,
}

impl WireRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the three standard codecs.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(McpWire));
        registry.register(Arc::new(A2aWire));
        registry.register(Arc::new(AcpWire));
        registry
    }

    pub fn register(&self, wire: Arc<dyn Wire>) {
        self.wires.insert(wire.name().to_string(), wire);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Wire>> {
        self.wires.get(name).map(|w| w.value().clone())
    }

    /// Snapshot of registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.wires.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.wires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wires.is_empty()
    }
}

static DEFAULT_REGISTRY: LazyLock<WireRegistry> = LazyLock::new(WireRegistry::with_defaults);

/// Process-wide registry, populated with the standard codecs on first use.
pub fn default_registry() -> &'static WireRegistry {
    &DEFAULT_REGISTRY
}
