//! Client-bridge socket
//!
//! Lets co-resident processes reach the controller over a plain framed unix
//! socket: requests are forwarded through the request sender of the active
//! bus, notifications through its notification sender.

use async_trait::async_trait;
use foris_core::{Message, MessageKind, Notifier};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::error::Result;
use crate::traits::{FrameHandler, RequestSender};
use crate::unix::{bind_socket, serve_socket};

pub const ERR_TIMED_OUT: &str = "Request timed out.";

pub struct ClientBridge {
    request_sender: Mutex<Box<dyn RequestSender>>,
    notifier: Mutex<Notifier>,
    timeout: Option<Duration>,
}

impl ClientBridge {
    /// `timeout` of `None` waits forever
    pub fn new(
        request_sender: Box<dyn RequestSender>,
        notifier: Notifier,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            request_sender: Mutex::new(request_sender),
            notifier: Mutex::new(notifier),
            timeout,
        }
    }

    async fn forward(&self, request: Message) -> Message {
        let sender = self.request_sender.lock().await;
        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, sender.send(&request)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Request {}/{} timed out", request.module, request.action);
                    sender.reset();
                    return Message::error_reply(&request.module, &request.action, [ERR_TIMED_OUT]);
                }
            },
            None => sender.send(&request).await,
        };

        match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed to forward {}/{}: {}", request.module, request.action, e);
                sender.reset();
                Message::error_reply(
                    &request.module,
                    &request.action,
                    [format!("Failed to forward request ({}).", e)],
                )
            }
        }
    }

    /// Serve the bridge socket at `path` until shutdown
    pub async fn serve(self, path: impl Into<PathBuf>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let path = path.into();
        let listener = bind_socket(&path)?;
        serve_socket(listener, path, Arc::new(self), shutdown).await
    }
}

#[async_trait]
impl FrameHandler for ClientBridge {
    async fn handle(&self, message: Value) -> Option<Message> {
        let message = match Message::from_value(message) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed bridge message: {}", e);
                return None;
            }
        };

        match message.kind {
            MessageKind::Request => Some(self.forward(message).await),
            MessageKind::Notification => {
                let notifier = self.notifier.lock().await;
                if let Err(e) = notifier.try_send(&message).await {
                    warn!("Dropping bridged notification: {}", e);
                }
                None
            }
            MessageKind::Reply => {
                debug!("Ignoring reply on the bridge socket");
                None
            }
        }
    }
}
