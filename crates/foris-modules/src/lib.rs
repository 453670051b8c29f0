//! Foris Modules
//!
//! Built-in modules shipped with foris-controller. Each module co-locates its
//! message schema (`schema.json`) with its handler.

pub mod lan;
pub mod router_notifications;
pub mod uci;

use foris_core::Backend;
use foris_router::{ModuleProvider, Result, RouterError};
use serde_json::Value;
use std::sync::Arc;

pub use lan::LanProvider;
pub use router_notifications::RouterNotificationsProvider;
pub use uci::{ConfigStore, MockUci, OpenwrtUci, UciBackend};

/// Providers of every built-in module, sharing one configuration store
pub fn builtin_providers(uci: Arc<ConfigStore>) -> Vec<Arc<dyn ModuleProvider>> {
    vec![
        Arc::new(LanProvider::new(uci)),
        Arc::new(RouterNotificationsProvider::new()),
    ]
}

/// Built-in providers with the configuration store matching `backend`
pub fn builtin_providers_for(backend: Backend) -> Vec<Arc<dyn ModuleProvider>> {
    builtin_providers(Arc::new(ConfigStore::for_backend(backend)))
}

pub(crate) fn parse_schema(name: &str, source: &str) -> Result<Value> {
    serde_json::from_str(source).map_err(|e| {
        RouterError::Core(foris_core::Error::InvalidSchema {
            name: name.to_string(),
            message: e.to_string(),
        })
    })
}
