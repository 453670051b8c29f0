//! Storage of user-facing router notifications

use async_trait::async_trait;
use foris_router::{HandlerError, HandlerResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Notification directory used by the `openwrt` backend
pub const DEFAULT_NOTIFY_DIR: &str = "/tmp/user_notify";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserNotification {
    /// `<unix time>-<sequence>`
    pub id: String,
    pub severity: String,
    pub msg: String,
    pub created_at: u64,
    pub displayed: bool,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Stored notifications, oldest first
    async fn list(&self) -> HandlerResult<Vec<UserNotification>>;

    async fn create(&self, severity: &str, msg: &str) -> HandlerResult<UserNotification>;

    /// Mark the given notifications as displayed; unknown ids are ignored
    async fn mark_displayed(&self, ids: &[String]) -> HandlerResult<()>;

    /// Count of notifications not displayed yet
    async fn pending_count(&self) -> HandlerResult<usize> {
        Ok(self.list().await?.iter().filter(|n| !n.displayed).count())
    }
}

fn new_id(sequence: &AtomicU32) -> (String, u64) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let seq = sequence.fetch_add(1, Ordering::Relaxed);
    (format!("{}-{}", now, seq), now)
}

/// In-memory store used with the `mock` backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    notifications: Mutex<Vec<UserNotification>>,
    sequence: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn list(&self) -> HandlerResult<Vec<UserNotification>> {
        Ok(self.notifications.lock().clone())
    }

    async fn create(&self, severity: &str, msg: &str) -> HandlerResult<UserNotification> {
        let (id, created_at) = new_id(&self.sequence);
        let notification = UserNotification {
            id,
            severity: severity.to_string(),
            msg: msg.to_string(),
            created_at,
            displayed: false,
        };
        self.notifications.lock().push(notification.clone());
        Ok(notification)
    }

    async fn mark_displayed(&self, ids: &[String]) -> HandlerResult<()> {
        for notification in self.notifications.lock().iter_mut() {
            if ids.contains(&notification.id) {
                notification.displayed = true;
            }
        }
        Ok(())
    }
}

/// Directory store: one sub-directory per notification holding `severity`,
/// `message_en` and a `displayed` marker file.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
    sequence: AtomicU32,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sequence: AtomicU32::new(std::process::id() % 10000),
        }
    }

    async fn read_one(&self, dir: &Path, id: &str) -> HandlerResult<UserNotification> {
        let severity = tokio::fs::read_to_string(dir.join("severity")).await?;
        let msg = tokio::fs::read_to_string(dir.join("message_en"))
            .await
            .unwrap_or_default();
        let created_at = id
            .split('-')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        Ok(UserNotification {
            id: id.to_string(),
            severity: severity.trim().to_string(),
            msg: msg.trim_end().to_string(),
            created_at,
            displayed: tokio::fs::metadata(dir.join("displayed")).await.is_ok(),
        })
    }
}

#[async_trait]
impl NotificationStore for DirStore {
    async fn list(&self) -> HandlerResult<Vec<UserNotification>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut notifications = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let id = entry.file_name().to_string_lossy().to_string();
            if !id.contains('-') {
                continue;
            }
            match self.read_one(&entry.path(), &id).await {
                Ok(notification) => notifications.push(notification),
                Err(e) => tracing::debug!("Skipping notification {}: {}", id, e),
            }
        }
        notifications.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(notifications)
    }

    async fn create(&self, severity: &str, msg: &str) -> HandlerResult<UserNotification> {
        let (id, created_at) = new_id(&self.sequence);
        let dir = self.root.join(&id);
        if tokio::fs::metadata(&dir).await.is_ok() {
            return Err(HandlerError::Backend(format!("notification {} already exists", id)));
        }
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("severity"), severity).await?;
        tokio::fs::write(dir.join("message_en"), msg).await?;

        Ok(UserNotification {
            id,
            severity: severity.to_string(),
            msg: msg.to_string(),
            created_at,
            displayed: false,
        })
    }

    async fn mark_displayed(&self, ids: &[String]) -> HandlerResult<()> {
        for id in ids {
            let dir = self.root.join(id);
            if tokio::fs::metadata(&dir).await.is_ok() {
                tokio::fs::write(dir.join("displayed"), "").await?;
            }
        }
        Ok(())
    }
}
