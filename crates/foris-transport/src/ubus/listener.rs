//! ubus request listener
//!
//! Every enabled module is published as one ubus object named
//! `foris-controller-<module>`, with one method per action taking a single
//! table argument `data`.

use async_trait::async_trait;
use foris_router::Router;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::blobmsg::BlobmsgType;
use super::client::{MethodSignature, ObjectHandler, UbusConnection};
use super::proto::status;
use crate::error::{Result, TransportError};

/// Name of the ubus object serving `module`
pub fn endpoint_name(module: &str) -> String {
    format!("{}-{}", foris_core::NAMESPACE, module)
}

/// Serves one module's actions as ubus methods
struct ModuleObject {
    module: String,
    router: Router,
}

#[async_trait]
impl ObjectHandler for ModuleObject {
    async fn invoke(
        &self,
        method: &str,
        mut args: Map<String, Value>,
    ) -> std::result::Result<Map<String, Value>, u32> {
        let mut request = Map::new();
        request.insert("module".into(), Value::String(self.module.clone()));
        request.insert("kind".into(), Value::String("request".into()));
        request.insert("action".into(), Value::String(method.to_string()));
        if let Some(data) = args.remove("data") {
            request.insert("data".into(), data);
        }

        debug!("ubus call {}.{}", self.module, method);
        match self.router.process(&Value::Object(request)).await.to_value() {
            Value::Object(reply) => Ok(reply),
            other => {
                warn!("Reply is not an object: {}", other);
                Err(status::UNKNOWN_ERROR)
            }
        }
    }
}

/// Publishes modules on ubus and answers calls through the router
pub struct UbusListener {
    path: PathBuf,
    router: Router,
    modules: Vec<String>,
}

impl UbusListener {
    pub fn new(path: impl Into<PathBuf>, router: Router, modules: Vec<String>) -> Self {
        Self {
            path: path.into(),
            router,
            modules,
        }
    }

    fn signature(&self, module: &str) -> MethodSignature {
        self.router
            .registry()
            .list_actions(module)
            .into_iter()
            .map(|action| (action, vec![("data".to_string(), BlobmsgType::Table)]))
            .collect()
    }

    /// Register the module objects and serve until shutdown or until ubusd
    /// goes away.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let connection = UbusConnection::connect(&self.path).await?;

        for module in &self.modules {
            let name = endpoint_name(module);
            let handler = Arc::new(ModuleObject {
                module: module.clone(),
                router: self.router.clone(),
            });
            connection
                .add_object(&name, &self.signature(module), handler)
                .await?;
            info!("Serving {} on ubus", name);
        }

        tokio::select! {
            _ = connection.closed() => Err(TransportError::ConnectionClosed),
            _ = shutdown.changed() => {
                info!("ubus listener shutting down");
                Ok(())
            }
        }
    }
}
