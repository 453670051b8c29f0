//! Common test helpers for foris-controller tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - Temporary socket directories cleaned up with RAII
//! - A running unix-socket daemon over the mock built-in modules
//! - A framed client and a notification sink

use async_trait::async_trait;
use foris_core::{Backend, Message, Notifier};
use foris_modules::builtin_providers_for;
use foris_router::{ModuleContext, ModuleLoader, Router};
use foris_transport::{
    bind_socket, serve_socket, FrameHandler, FramedStream, MessageDispatcher,
    UnixNotificationSender,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Whether an MQTT broker is available for broker-backed tests
pub async fn broker_available() -> bool {
    if std::env::var("FORIS_TEST_BROKER").map_or(false, |v| v == "1") {
        return true;
    }
    tokio::time::timeout(
        Duration::from_millis(200),
        tokio::net::TcpStream::connect("127.0.0.1:1883"),
    )
    .await
    .map_or(false, |r| r.is_ok())
}

// ============================================================================
// Sockets
// ============================================================================

/// A temporary directory for socket files, removed on drop
pub struct SocketDir {
    dir: TempDir,
}

impl SocketDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

impl Default for SocketDir {
    fn default() -> Self {
        Self::new()
    }
}

/// A client speaking length-prefixed JSON frames
pub struct FrameClient {
    stream: FramedStream<UnixStream>,
}

impl FrameClient {
    pub async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).await.unwrap();
        Self {
            stream: FramedStream::new(stream),
        }
    }

    /// Send a JSON value as one frame
    pub async fn send(&mut self, value: &Value) {
        self.send_raw(&serde_json::to_vec(value).unwrap()).await;
    }

    /// Send arbitrary bytes as one frame
    pub async fn send_raw(&mut self, payload: &[u8]) {
        self.stream.write_payload(payload).await.unwrap();
    }

    /// Read one frame as a message
    pub async fn recv(&mut self) -> Message {
        let payload = tokio::time::timeout(DEFAULT_TIMEOUT, self.stream.read_frame())
            .await
            .expect("timed out waiting for a reply")
            .unwrap()
            .expect("connection closed");
        Message::from_slice(&payload).unwrap()
    }

    /// Send a request and wait for its reply
    pub async fn request(&mut self, value: &Value) -> Message {
        self.send(value).await;
        self.recv().await
    }
}

// ============================================================================
// Notification Sink
// ============================================================================

#[derive(Default)]
struct Collected {
    messages: Mutex<Vec<Message>>,
    count: AtomicU32,
    notify: Notify,
}

struct SinkHandler(Arc<Collected>);

#[async_trait]
impl FrameHandler for SinkHandler {
    async fn handle(&self, message: Value) -> Option<Message> {
        if let Ok(message) = Message::from_value(message) {
            self.0.messages.lock().push(message);
            self.0.count.fetch_add(1, Ordering::SeqCst);
            self.0.notify.notify_waiters();
        }
        None
    }
}

/// Collects notifications written to a unix socket
pub struct NotificationSink {
    collected: Arc<Collected>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl NotificationSink {
    pub fn start(path: &Path) -> Self {
        let listener = bind_socket(path).unwrap();
        let collected = Arc::new(Collected::default());
        let (shutdown, rx) = watch::channel(false);
        let handler = Arc::new(SinkHandler(collected.clone()));
        let path = path.to_path_buf();
        let handle = tokio::spawn(async move {
            let _ = serve_socket(listener, path, handler, rx).await;
        });
        Self {
            collected,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.collected.messages.lock().clone()
    }

    pub fn count(&self) -> u32 {
        self.collected.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n notifications
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.collected.count, n, max_wait).await
    }
}

impl Drop for NotificationSink {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Test Daemon - RAII wrapper with proper cleanup
// ============================================================================

/// The unix-socket listener over the mock built-in modules, with its
/// notifications written to a [`NotificationSink`]
pub struct TestDaemon {
    dir: SocketDir,
    router: Router,
    notifier: Notifier,
    notifications: NotificationSink,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl TestDaemon {
    pub async fn start() -> Self {
        Self::start_with_extra_paths(&[]).await
    }

    /// Start with external modules loaded from `paths`
    pub async fn start_with_extra_paths(paths: &[&Path]) -> Self {
        let dir = SocketDir::new();
        let notifications = NotificationSink::start(&dir.path("notifications.sock"));

        let mut loader = ModuleLoader::new();
        for provider in builtin_providers_for(Backend::Mock) {
            loader.register(provider);
        }
        for path in paths {
            loader.load_extra_path(path).unwrap();
        }

        let validator = Arc::new(loader.build_validator().unwrap());
        let notifier = Notifier::new(
            Arc::new(UnixNotificationSender::new(dir.path("notifications.sock"))),
            Some(validator.clone()),
        );
        let registry = loader
            .instantiate(&ModuleContext::new(Backend::Mock, notifier.clone()), None)
            .unwrap();
        let router = Router::new(Arc::new(registry), validator);

        let socket = dir.path("controller.sock");
        let listener = bind_socket(&socket).unwrap();
        let dispatcher = Arc::new(MessageDispatcher::new(router.clone(), notifier.clone()));
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let _ = serve_socket(listener, socket, dispatcher, rx).await;
        });

        Self {
            dir,
            router,
            notifier,
            notifications,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.path("controller.sock")
    }

    pub fn notifications_path(&self) -> PathBuf {
        self.dir.path("notifications.sock")
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn notifications(&self) -> &NotificationSink {
        &self.notifications
    }

    pub async fn client(&self) -> FrameClient {
        FrameClient::connect(&self.socket_path()).await
    }

    /// Stop the listener and wait for it to remove its socket
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
