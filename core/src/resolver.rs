//! Model resolution.
//!
//! A resolver turns a URI into a concrete model by asking an ordered list
//! of sub-resolvers. Results are cached by `(base, uri)` so repeated
//! references to the same model share one instance factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::SimulationError;
use crate::model::Model;

/// One resolution strategy (filesystem, URL, subprocess-hosted, ...).
pub trait ModelSubResolver: Send + Sync {
    /// Returns `None` when this resolver does not handle the URI.
    fn resolve(&self, base: &Path, uri: &str) -> Option<Arc<dyn Model>>;
}

/// Ordered sub-resolver chain with a `(base, uri)` cache.
#[derive(Default)]
pub struct ModelResolver {
    cache: HashMap<(PathBuf, String), Arc<dyn Model>>,
    sub_resolvers: Vec<Box<dyn ModelSubResolver>>,
}

impl ModelResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sub_resolver(&mut self, sub_resolver: Box<dyn ModelSubResolver>) -> &mut Self {
        self.sub_resolvers.push(sub_resolver);
        self
    }

    /// Resolve a URI relative to `base`.
    pub fn resolve(&mut self, base: &Path, uri: &str) -> Result<Arc<dyn Model>, SimulationError> {
        let key = (base.to_path_buf(), uri.to_string());
        if let Some(model) = self.cache.get(&key) {
            debug!("resolver cache hit for '{uri}'");
            return Ok(model.clone());
        }

        for sub_resolver in &self.sub_resolvers {
            if let Some(model) = sub_resolver.resolve(base, uri) {
                self.cache.insert(key, model.clone());
                return Ok(model);
            }
        }

        Err(SimulationError::NotFound(format!(
            "no registered sub-resolver was able to resolve '{uri}' (base '{}')",
            base.display()
        )))
    }
}
