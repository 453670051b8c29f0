//! Notifier tests

use async_trait::async_trait;
use foris_core::{Message, MessageKind, NotificationSender, Notifier, RecordingSender, Result, Validator};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn lan_schema() -> Value {
    json!({
        "oneOf": [{
            "properties": {
                "module": {"const": "lan"},
                "kind": {"const": "notification"},
                "action": {"const": "update_settings"},
                "data": {
                    "type": "object",
                    "properties": {"mode": {"enum": ["managed", "unmanaged"]}},
                    "required": ["mode"],
                    "additionalProperties": false
                }
            },
            "required": ["data"]
        }]
    })
}

fn validator() -> Arc<Validator> {
    Arc::new(Validator::new([("lan", lan_schema())]).unwrap())
}

/// Fails the first `failures` sends
#[derive(Default)]
struct FlakySender {
    failures: usize,
    attempts: AtomicUsize,
    resets: AtomicUsize,
}

#[async_trait]
impl NotificationSender for FlakySender {
    async fn send(&self, _message: &Message) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            Err(foris_core::Error::Transport("broken pipe".into()))
        } else {
            Ok(())
        }
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_notify_builds_notification() {
    let sender = Arc::new(RecordingSender::new());
    let notifier = Notifier::new(sender.clone(), Some(validator()));

    notifier
        .try_notify("lan", "update_settings", Some(json!({"mode": "managed"})))
        .await
        .unwrap();

    let sent = sender.messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, MessageKind::Notification);
    assert_eq!(sent[0].module, "lan");
    assert_eq!(sent[0].data, Some(json!({"mode": "managed"})));
}

#[tokio::test]
async fn test_invalid_notification_not_sent() {
    let sender = Arc::new(RecordingSender::new());
    let notifier = Notifier::new(sender.clone(), Some(validator()));

    let result = notifier
        .try_notify("lan", "update_settings", Some(json!({"mode": "bridge"})))
        .await;
    assert!(result.is_err());

    notifier.notify("lan", "update_settings", None).await;
    assert!(sender.is_empty());
}

#[tokio::test]
async fn test_no_validator_sends_anything() {
    let sender = Arc::new(RecordingSender::new());
    let notifier = Notifier::new(sender.clone(), None);

    notifier
        .try_notify("lan", "update_settings", Some(json!({"mode": "bridge"})))
        .await
        .unwrap();
    assert_eq!(sender.len(), 1);
}

#[tokio::test]
async fn test_retry_once_after_reset() {
    let sender = Arc::new(FlakySender {
        failures: 1,
        ..Default::default()
    });
    let notifier = Notifier::new(sender.clone(), None);

    notifier.try_notify("lan", "update_settings", None).await.unwrap();
    assert_eq!(sender.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(sender.resets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_failure_reported() {
    let sender = Arc::new(FlakySender {
        failures: 2,
        ..Default::default()
    });
    let notifier = Notifier::new(sender.clone(), None);

    assert!(notifier.try_notify("lan", "update_settings", None).await.is_err());
    assert_eq!(sender.attempts.load(Ordering::SeqCst), 2);

    // fire-and-forget swallows the error
    notifier.notify("lan", "update_settings", None).await;
}
