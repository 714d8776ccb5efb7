use super::DataSource;
use crate::error::{WaveError, WaveResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a source from its JSON parameters
pub type SourceFactory = fn(&Value) -> WaveResult<Arc<dyn DataSource>>;

/// Compile-time registration of a source kind
pub struct SourceKind {
    pub name: &'static str,
    pub description: &'static str,
    pub factory: SourceFactory,
}

inventory::collect!(SourceKind);

/// Registry of available source kinds
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry pre-filled with every kind submitted through `inventory`
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for kind in inventory::iter::<SourceKind> {
            registry.register(kind.name, kind.factory);
        }
        registry
    }

    pub fn register(&mut self, name: &str, factory: SourceFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, kind: &str, params: &Value) -> WaveResult<Arc<dyn DataSource>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| WaveError::config(format!("Unknown source kind: {}", kind)))?;
        factory(params)
    }

    pub fn list_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Name and description of every built-in kind
pub fn describe_builtin() -> Vec<(&'static str, &'static str)> {
    let mut kinds: Vec<_> = inventory::iter::<SourceKind>
        .into_iter()
        .map(|k| (k.name, k.description))
        .collect();
    kinds.sort();
    kinds
}
