//! Request dispatcher
//!
//! [`Router::process`] is the single entry point used by every transport:
//! validate the request, resolve the module, run the handler, validate the
//! reply. Every failure is packaged as an error reply; `process` never fails.

use crate::registry::ModuleRegistry;
use foris_core::{Message, MessageKind, Validator};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const ERR_INCORRECT_INPUT: &str = "Incorrect input.";
pub const ERR_WRONG_KIND: &str = "Wrong message kind (only request are allowed).";

/// Validates and dispatches requests to module handlers
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<ModuleRegistry>,
    validator: Arc<Validator>,
}

impl Router {
    pub fn new(registry: Arc<ModuleRegistry>, validator: Arc<Validator>) -> Self {
        Self {
            registry,
            validator,
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    /// Process a raw message and produce the reply
    pub async fn process(&self, message: &Value) -> Message {
        let module = str_field(message, "module");
        let action = str_field(message, "action");

        if let Err(e) = self.validator.validate(message) {
            debug!("Rejecting {}/{}: {}", module, action, e);
            return Message::error_reply(module, action, [ERR_INCORRECT_INPUT]);
        }

        if message.get("kind").and_then(Value::as_str) != Some(MessageKind::Request.as_str()) {
            return Message::error_reply(module, action, [ERR_WRONG_KIND]);
        }

        let descriptor = match self.registry.resolve(module) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("{}", e);
                return Message::error_reply(
                    module,
                    action,
                    [format!("Internal error (failed to import module '{}')", module)],
                );
            }
        };

        let data = message.get("data").cloned();
        let result = match descriptor.handler.handle(action, data).await {
            Ok(result) => result,
            Err(e) => {
                error!("Handler {}/{} failed", module, action);
                debug!("Handler error: {:?}", e);
                return Message::error_reply(
                    module,
                    action,
                    [format!("Internal error {}('{}')", e.kind(), e)],
                );
            }
        };

        let reply = Message::reply(module, action, result.filter(|v| !v.is_null()));
        let reply_value = reply.to_value();
        if let Err(e) = self.validator.validate(&reply_value) {
            error!("Reply of {}/{} failed validation: {}", module, action, e);
            return Message::error_reply(module, action, [format!("Incorrect output {}", reply_value)]);
        }

        reply
    }

    /// Process an already-parsed message
    pub async fn process_message(&self, message: &Message) -> Message {
        self.process(&message.to_value()).await
    }
}

fn str_field<'a>(message: &'a Value, key: &str) -> &'a str {
    message.get(key).and_then(Value::as_str).unwrap_or_default()
}
