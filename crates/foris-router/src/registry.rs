//! Module registry
//!
//! [`ModuleLoader`] collects providers (built-in and external) and produces
//! the validator and the [`ModuleRegistry`] at startup. The registry itself is
//! immutable once built and is shared by every transport worker.

use crate::external;
use crate::module::{EntryPointAnnouncer, ModuleContext, ModuleDescriptor, ModuleProvider};
use crate::{Result, RouterError};
use foris_core::Validator;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Startup-time collection of module providers
#[derive(Default)]
pub struct ModuleLoader {
    providers: BTreeMap<String, Arc<dyn ModuleProvider>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider; a later provider with the same name replaces the
    /// earlier one.
    pub fn register(&mut self, provider: Arc<dyn ModuleProvider>) {
        let name = provider.name().to_string();
        if self.providers.insert(name.clone(), provider).is_some() {
            warn!("Module '{}' redefined, using the last definition", name);
        } else {
            debug!("Module '{}' registered", name);
        }
    }

    /// Load every external module found under `path`
    pub fn load_extra_path(&mut self, path: &Path) -> Result<usize> {
        let found = external::scan(path)?;
        let count = found.len();
        for provider in found {
            info!(
                "Loaded external module '{}' from {}",
                provider.name(),
                provider.dir().display()
            );
            self.register(Arc::new(provider));
        }
        Ok(count)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Schemas of every known module.
    ///
    /// A module without a schema aborts startup.
    pub fn schemas(&self) -> Result<Vec<(String, Value)>> {
        self.providers
            .iter()
            .map(|(name, provider)| match provider.schema() {
                Ok(schema) => Ok((name.clone(), schema)),
                Err(RouterError::MissingSchema(_)) => Err(RouterError::MissingSchema(name.clone())),
                Err(e) => Err(e),
            })
            .collect()
    }

    pub fn build_validator(&self) -> Result<Validator> {
        Ok(Validator::new(self.schemas()?)?)
    }

    /// Instantiate the enabled modules (`None` = all)
    pub fn instantiate(
        &self,
        ctx: &ModuleContext,
        filter: Option<&BTreeSet<String>>,
    ) -> Result<ModuleRegistry> {
        let mut registry = ModuleRegistry::new();

        for (name, provider) in &self.providers {
            if filter.map_or(false, |f| !f.contains(name)) {
                debug!("Module '{}' filtered out", name);
                continue;
            }

            let handler = provider.instantiate(ctx)?;
            registry.insert(ModuleDescriptor {
                name: name.clone(),
                version: provider.version().to_string(),
                actions: provider.actions().into_iter().collect(),
                handler,
            });
        }

        if let Some(filter) = filter {
            for name in filter.iter().filter(|n| !self.providers.contains_key(*n)) {
                warn!("Requested module '{}' is not available", name);
            }
        }

        info!("{} module(s) enabled", registry.len());
        Ok(registry)
    }
}

/// Registered modules, ordered by name
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, ModuleDescriptor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: ModuleDescriptor) {
        self.modules.insert(descriptor.name.clone(), descriptor);
    }

    /// Modules ordered by name, optionally restricted to `filter`
    pub fn list_modules(&self, filter: Option<&BTreeSet<String>>) -> Vec<(&str, &ModuleDescriptor)> {
        self.modules
            .iter()
            .filter(|(name, _)| filter.map_or(true, |f| f.contains(*name)))
            .map(|(name, descriptor)| (name.as_str(), descriptor))
            .collect()
    }

    /// Actions of a module, sorted; empty for an unknown module
    pub fn list_actions(&self, name: &str) -> Vec<String> {
        self.modules
            .get(name)
            .map(|m| m.actions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn resolve(&self, name: &str) -> Result<&ModuleDescriptor> {
        self.modules
            .get(name)
            .ok_or_else(|| RouterError::NotFound(name.to_string()))
    }

    /// Entry-point announcers of every module
    pub fn announcers(&self) -> Vec<Arc<dyn EntryPointAnnouncer>> {
        self.modules
            .values()
            .flat_map(|m| m.handler.announcers())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
