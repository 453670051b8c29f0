//! Module capability traits
//!
//! A module is a named bundle of actions. Each module is described by a
//! [`ModuleProvider`], which is known before any handler exists (its schema
//! feeds the validator), and instantiated into a [`Module`] once the shared
//! collaborators are ready.

use crate::{HandlerResult, Result};
use async_trait::async_trait;
use foris_core::{Backend, Message, Notifier};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Collaborators handed to every module on instantiation
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub backend: Backend,
    pub notifier: Notifier,
}

impl ModuleContext {
    pub fn new(backend: Backend, notifier: Notifier) -> Self {
        Self { backend, notifier }
    }
}

/// A running module handler
#[async_trait]
pub trait Module: Send + Sync {
    /// Perform `action` with the request `data`.
    ///
    /// `Ok(None)` produces a reply without `data`.
    async fn handle(&self, action: &str, data: Option<Value>) -> HandlerResult<Option<Value>>;

    /// Periodic announcers this module contributes to the MQTT advertizer
    fn announcers(&self) -> Vec<Arc<dyn EntryPointAnnouncer>> {
        Vec::new()
    }
}

/// Static description of a module plus its factory
pub trait ModuleProvider: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn actions(&self) -> Vec<String>;

    /// JSON Schema every message of this module must satisfy
    fn schema(&self) -> Result<Value>;

    /// Build the handler for the configured backend
    fn instantiate(&self, ctx: &ModuleContext) -> Result<Arc<dyn Module>>;
}

/// A message source driven by the MQTT announcer.
///
/// It is polled every `period_multiplier` announcer ticks; a returned message
/// is published on the regular notification topic.
#[async_trait]
pub trait EntryPointAnnouncer: Send + Sync {
    fn period_multiplier(&self) -> u32;

    async fn announce(&self) -> Option<Message>;
}

/// A registered module
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub actions: BTreeSet<String>,
    pub handler: Arc<dyn Module>,
}

impl ModuleDescriptor {
    pub fn has_action(&self, action: &str) -> bool {
        self.actions.contains(action)
    }
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("actions", &self.actions)
            .finish()
    }
}
