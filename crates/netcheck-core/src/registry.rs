//! Explicit check registry: stable name -> factory.
//!
//! Checks are registered at startup; the catalog parser resolves names
//! through this table. There is no runtime discovery.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::catalog::CatalogError;
use crate::lifecycle::Check;

/// Builds a check from its raw (already deserialized) inputs.
pub type CheckFactory = Arc<dyn Fn(Value) -> Result<Arc<dyn Check>, CatalogError> + Send + Sync>;

/// Lookup table from check name to constructor.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    factories: HashMap<String, CheckFactory>,
}

impl CheckRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in checks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::checks::register_builtins(&mut registry);
        registry
    }

    /// Registers a check type whose inputs deserialize into the type itself.
    pub fn register<C>(&mut self, name: &'static str)
    where
        C: Check + DeserializeOwned + 'static,
    {
        self.register_factory(
            name,
            Arc::new(move |inputs: Value| {
                let check: C = serde_json::from_value(inputs).map_err(|source| CatalogError::InvalidInputs {
                    check: name.to_string(),
                    source,
                })?;
                Ok(Arc::new(check) as Arc<dyn Check>)
            }),
        );
    }

    /// Registers an arbitrary factory. Later registrations win.
    pub fn register_factory(&mut self, name: &str, factory: CheckFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Builds a check by name from raw inputs.
    pub fn build(&self, name: &str, inputs: Value) -> Result<Arc<dyn Check>, CatalogError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CatalogError::UnknownCheck { name: name.to_string() })?;
        factory(inputs)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted for stable display.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckRegistry").field("names", &self.names()).finish()
    }
}
