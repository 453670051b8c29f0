//! `router_notifications` module
//!
//! User-facing notifications (update available, restart needed, errors).
//! Besides the request actions it contributes an entry-point announcer that
//! periodically publishes the number of notifications not displayed yet.

mod store;

pub use store::{DirStore, MemoryStore, NotificationStore, UserNotification, DEFAULT_NOTIFY_DIR};

use async_trait::async_trait;
use foris_core::{Backend, Message, Notifier};
use foris_router::{
    EntryPointAnnouncer, HandlerError, HandlerResult, Module, ModuleContext, ModuleProvider,
    Result,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

const SCHEMA: &str = include_str!("schema.json");

const MODULE: &str = "router_notifications";

/// Announcer ticks between two `pending` checks
pub const PENDING_PERIOD_MULTIPLIER: u32 = 60;

pub struct RouterNotificationsProvider {
    store: Option<Arc<dyn NotificationStore>>,
}

impl RouterNotificationsProvider {
    /// Store selected by the backend at instantiation
    pub fn new() -> Self {
        Self { store: None }
    }

    pub fn with_store(store: Arc<dyn NotificationStore>) -> Self {
        Self { store: Some(store) }
    }
}

impl Default for RouterNotificationsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleProvider for RouterNotificationsProvider {
    fn name(&self) -> &str {
        MODULE
    }

    fn version(&self) -> &str {
        "0.2"
    }

    fn actions(&self) -> Vec<String> {
        vec!["create".into(), "list".into(), "mark_as_displayed".into()]
    }

    fn schema(&self) -> Result<Value> {
        crate::parse_schema(MODULE, SCHEMA)
    }

    fn instantiate(&self, ctx: &ModuleContext) -> Result<Arc<dyn Module>> {
        let store = self.store.clone().unwrap_or_else(|| match ctx.backend {
            Backend::Mock => Arc::new(MemoryStore::new()),
            Backend::Openwrt => Arc::new(DirStore::new(DEFAULT_NOTIFY_DIR)),
        });
        Ok(Arc::new(RouterNotificationsModule {
            store,
            notifier: ctx.notifier.clone(),
        }))
    }
}

struct RouterNotificationsModule {
    store: Arc<dyn NotificationStore>,
    notifier: Notifier,
}

#[async_trait]
impl Module for RouterNotificationsModule {
    async fn handle(&self, action: &str, data: Option<Value>) -> HandlerResult<Option<Value>> {
        let data = data.unwrap_or_else(|| json!({}));
        match action {
            "list" => {
                let notifications = self.store.list().await?;
                Ok(Some(json!({ "notifications": notifications })))
            }
            "mark_as_displayed" => {
                let ids: Vec<String> = serde_json::from_value(data["ids"].clone())?;
                self.store.mark_displayed(&ids).await?;
                let new_count = self.store.pending_count().await?;
                self.notifier
                    .notify(MODULE, "mark_as_displayed", Some(json!({"ids": ids, "new_count": new_count})))
                    .await;
                Ok(Some(json!({ "result": true })))
            }
            "create" => {
                let severity = data["severity"]
                    .as_str()
                    .ok_or_else(|| HandlerError::InvalidArgument("missing 'severity'".into()))?;
                let msg = data["msg"]
                    .as_str()
                    .ok_or_else(|| HandlerError::InvalidArgument("missing 'msg'".into()))?;

                let created = match self.store.create(severity, msg).await {
                    Ok(created) => created,
                    Err(e) => {
                        warn!("Failed to create notification: {}", e);
                        return Ok(Some(json!({ "result": false })));
                    }
                };
                let new_count = self.store.pending_count().await?;
                self.notifier
                    .notify(
                        MODULE,
                        "create",
                        Some(json!({"severity": created.severity, "id": created.id, "new_count": new_count})),
                    )
                    .await;
                Ok(Some(json!({ "result": true, "id": created.id })))
            }
            other => Err(HandlerError::UnknownAction(other.to_string())),
        }
    }

    fn announcers(&self) -> Vec<Arc<dyn EntryPointAnnouncer>> {
        vec![Arc::new(PendingAnnouncer {
            store: self.store.clone(),
            last: Mutex::new(None),
        })]
    }
}

/// Publishes `pending` whenever the count of undisplayed notifications changes
struct PendingAnnouncer {
    store: Arc<dyn NotificationStore>,
    last: Mutex<Option<usize>>,
}

#[async_trait]
impl EntryPointAnnouncer for PendingAnnouncer {
    fn period_multiplier(&self) -> u32 {
        PENDING_PERIOD_MULTIPLIER
    }

    async fn announce(&self) -> Option<Message> {
        let count = match self.store.pending_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count pending notifications: {}", e);
                return None;
            }
        };

        let mut last = self.last.lock();
        if *last == Some(count) {
            return None;
        }
        *last = Some(count);
        Some(Message::notification(MODULE, "pending", Some(json!({ "new_count": count }))))
    }
}
