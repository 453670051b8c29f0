//! Notification sender contract
//!
//! Concrete transports implement [`NotificationSender`]. Producers (handlers,
//! the client bridge, the notification CLI) talk to a [`Notifier`], which
//! builds the message, optionally validates it and publishes it with one
//! reset-and-retry on failure.

use crate::{Message, Result, Validator};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Publishes notifications through a concrete transport
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Publish a notification
    async fn send(&self, message: &Message) -> Result<()>;

    /// Release transport resources
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Drop any cached connection so the next send starts fresh.
    ///
    /// Must be idempotent and cheap.
    fn reset(&self) {}
}

/// Front-end over a [`NotificationSender`]
#[derive(Clone)]
pub struct Notifier {
    sender: Arc<dyn NotificationSender>,
    validator: Option<Arc<Validator>>,
}

impl Notifier {
    pub fn new(sender: Arc<dyn NotificationSender>, validator: Option<Arc<Validator>>) -> Self {
        Self { sender, validator }
    }

    /// A notifier that discards everything
    pub fn null() -> Self {
        Self::new(Arc::new(NullSender), None)
    }

    /// Publish a notification, logging and dropping it on failure
    pub async fn notify(&self, module: &str, action: &str, data: Option<Value>) {
        if let Err(e) = self.try_notify(module, action, data).await {
            error!("Dropping notification {}/{}: {}", module, action, e);
        }
    }

    /// Publish a notification, reporting failure to the caller
    pub async fn try_notify(&self, module: &str, action: &str, data: Option<Value>) -> Result<()> {
        let message = Message::notification(module, action, data);
        self.try_send(&message).await
    }

    /// Publish an already-built notification
    pub async fn try_send(&self, message: &Message) -> Result<()> {
        if let Some(validator) = &self.validator {
            validator.validate_message(message)?;
        }

        debug!("Sending notification {}/{}", message.module, message.action);

        if let Err(e) = self.sender.send(message).await {
            warn!("Notification send failed ({}), reconnecting", e);
            self.sender.reset();
            self.sender.send(message).await?;
        }

        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.sender.disconnect().await
    }

    pub fn validator(&self) -> Option<&Arc<Validator>> {
        self.validator.as_ref()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("validating", &self.validator.is_some())
            .finish()
    }
}

/// Sender that discards notifications
#[derive(Debug, Default)]
pub struct NullSender;

#[async_trait]
impl NotificationSender for NullSender {
    async fn send(&self, _message: &Message) -> Result<()> {
        Ok(())
    }
}

/// Sender that keeps notifications in memory
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Message>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notification sent so far
    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, message: &Message) -> Result<()> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` sends
    struct FlakySender {
        failures: AtomicUsize,
        resets: AtomicUsize,
        delivered: Mutex<Vec<Message>>,
    }

    impl FlakySender {
        fn new(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                resets: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationSender for FlakySender {
        async fn send(&self, message: &Message) -> Result<()> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Transport("broken pipe".into()));
            }
            self.delivered.lock().push(message.clone());
            Ok(())
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn validator() -> Arc<Validator> {
        let schema = json!({
            "properties": {
                "kind": {"const": "notification"},
                "action": {"const": "ping"},
                "data": {"required": ["n"]}
            }
        });
        Arc::new(Validator::new([("pinger", schema)]).unwrap())
    }

    #[tokio::test]
    async fn test_retry_once_after_reset() {
        let sender = Arc::new(FlakySender::new(1));
        let notifier = Notifier::new(sender.clone(), None);

        notifier.try_notify("pinger", "ping", Some(json!({"n": 1}))).await.unwrap();
        assert_eq!(sender.resets.load(Ordering::SeqCst), 1);
        assert_eq!(sender.delivered.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_second_failure_reported() {
        let sender = Arc::new(FlakySender::new(2));
        let notifier = Notifier::new(sender.clone(), None);

        assert!(notifier.try_notify("pinger", "ping", None).await.is_err());
        // fire-and-forget variant swallows the error
        notifier.notify("pinger", "ping", None).await;
        assert_eq!(sender.delivered.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_drops_invalid() {
        let sender = Arc::new(RecordingSender::new());
        let notifier = Notifier::new(sender.clone(), Some(validator()));

        let result = notifier.try_notify("pinger", "ping", Some(json!({"m": 1}))).await;
        assert!(matches!(result, Err(Error::ValidationFailed(_))));
        assert!(sender.is_empty());

        notifier.notify("pinger", "ping", Some(json!({"n": 2}))).await;
        let sent = sender.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], Message::notification("pinger", "ping", Some(json!({"n": 2}))));
    }

    #[tokio::test]
    async fn test_identical_notifications_identical_bytes() {
        let sender = Arc::new(RecordingSender::new());
        let notifier = Notifier::new(sender.clone(), None);
        let data = json!({"severity": "error", "id": "1518776436-2598", "new_count": 4});

        notifier.notify("router_notifications", "create", Some(data.clone())).await;
        notifier.notify("router_notifications", "create", Some(data)).await;

        let sent = sender.messages();
        assert_eq!(sent[0].to_bytes().unwrap(), sent[1].to_bytes().unwrap());
    }
}
