//! Unix-socket transport
//!
//! Clients connect to a stream socket and exchange length-prefixed JSON
//! frames. Each connection is served by its own task, so replies on one
//! connection come back in request order.

use async_trait::async_trait;
use foris_core::{Message, NotificationSender, Notifier};
use foris_router::Router;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::framing::FramedStream;
use crate::traits::{FrameHandler, RequestSender};

/// Default path of the request socket
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/foris-controller.soc";

/// Default path of the notification socket
pub const DEFAULT_NOTIFICATIONS_PATH: &str = "/tmp/foris-controller-notifications.soc";

/// Bind a stream socket, replacing a stale socket file
pub fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TransportError::BindFailed(format!("{}: {}", parent.display(), e)))?;
        }
    }

    if path.exists() {
        debug!("Removing stale socket {}", path.display());
        std::fs::remove_file(path)
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", path.display(), e)))?;
    }

    let listener = UnixListener::bind(path)
        .map_err(|e| TransportError::BindFailed(format!("{}: {}", path.display(), e)))?;
    info!("Listening on {}", path.display());
    Ok(listener)
}

/// Accept connections until shutdown, serving each with `handler`.
///
/// The socket file is removed on return.
pub async fn serve_socket(
    listener: UnixListener,
    path: PathBuf,
    handler: Arc<dyn FrameHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        debug!("Client connected to {}", path.display());
                        connections.spawn(handle_connection(stream, handler.clone()));
                    }
                    Err(e) => {
                        error!("Accept failed on {}: {}", path.display(), e);
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => {
                info!("Closing {}", path.display());
                break;
            }
        }
    }

    connections.shutdown().await;
    let _ = std::fs::remove_file(&path);
    Ok(())
}

async fn handle_connection(stream: UnixStream, handler: Arc<dyn FrameHandler>) {
    let mut framed = FramedStream::new(stream);

    loop {
        let payload = match framed.read_frame().await {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(e) => {
                warn!("Dropping connection: {}", e);
                break;
            }
        };

        let value: Value = match serde_json::from_slice(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring malformed frame: {}", e);
                continue;
            }
        };

        if let Some(reply) = handler.handle(value).await {
            if let Err(e) = framed.write_message(&reply).await {
                debug!("Failed to write reply: {}", e);
                break;
            }
        }
    }

    debug!("Client disconnected");
}

/// Dispatches requests to the router and notifications to the notifier
#[derive(Clone)]
pub struct MessageDispatcher {
    router: Router,
    notifier: Notifier,
}

impl MessageDispatcher {
    pub fn new(router: Router, notifier: Notifier) -> Self {
        Self { router, notifier }
    }
}

#[async_trait]
impl FrameHandler for MessageDispatcher {
    async fn handle(&self, message: Value) -> Option<Message> {
        match message.get("kind").and_then(Value::as_str) {
            Some("request") => Some(self.router.process(&message).await),
            Some("notification") => {
                match Message::from_value(message) {
                    Ok(notification) => {
                        if let Err(e) = self.notifier.try_send(&notification).await {
                            warn!("Dropping notification: {}", e);
                        }
                    }
                    Err(e) => warn!("Ignoring malformed notification: {}", e),
                }
                None
            }
            other => {
                warn!("Ignoring message of kind {:?}", other);
                None
            }
        }
    }
}

/// Unix-socket request listener
pub struct UnixSocketListener {
    path: PathBuf,
    dispatcher: MessageDispatcher,
}

impl UnixSocketListener {
    pub fn new(path: impl Into<PathBuf>, router: Router, notifier: Notifier) -> Self {
        Self {
            path: path.into(),
            dispatcher: MessageDispatcher::new(router, notifier),
        }
    }

    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = bind_socket(&self.path)?;
        serve_socket(listener, self.path, Arc::new(self.dispatcher), shutdown).await
    }
}

/// A lazily (re)connected framed client socket
#[derive(Debug)]
struct LazyConnection {
    path: PathBuf,
    conn: Mutex<Option<FramedStream<UnixStream>>>,
    stale: AtomicBool,
}

impl LazyConnection {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            conn: Mutex::new(None),
            stale: AtomicBool::new(false),
        }
    }

    fn reset(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    async fn connect(&self) -> Result<FramedStream<UnixStream>> {
        let stream = UnixStream::connect(&self.path).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("{}: {}", self.path.display(), e))
        })?;
        debug!("Connected to {}", self.path.display());
        Ok(FramedStream::new(stream))
    }

    /// Send a message and, when `expect_reply`, read one frame back
    async fn exchange(&self, message: &Message, expect_reply: bool) -> Result<Option<Message>> {
        let mut guard = self.conn.lock().await;
        if self.stale.swap(false, Ordering::SeqCst) {
            *guard = None;
        }

        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let conn = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let result = roundtrip(conn, message, expect_reply).await;

        if result.is_err() {
            *guard = None;
        }
        result
    }

    async fn close(&self) {
        *self.conn.lock().await = None;
    }
}

async fn roundtrip(
    conn: &mut FramedStream<UnixStream>,
    message: &Message,
    expect_reply: bool,
) -> Result<Option<Message>> {
    conn.write_message(message).await?;
    if !expect_reply {
        return Ok(None);
    }
    match conn.read_frame().await? {
        Some(payload) => Ok(Some(Message::from_slice(&payload)?)),
        None => Err(TransportError::ConnectionClosed),
    }
}

/// Writes notifications to a unix socket
#[derive(Debug)]
pub struct UnixNotificationSender {
    conn: LazyConnection,
}

impl UnixNotificationSender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            conn: LazyConnection::new(path.into()),
        }
    }
}

#[async_trait]
impl NotificationSender for UnixNotificationSender {
    async fn send(&self, message: &Message) -> foris_core::Result<()> {
        self.conn.exchange(message, false).await?;
        Ok(())
    }

    async fn disconnect(&self) -> foris_core::Result<()> {
        self.conn.close().await;
        Ok(())
    }

    fn reset(&self) {
        self.conn.reset();
    }
}

/// Sends requests to a unix-socket listener
#[derive(Debug)]
pub struct UnixRequestSender {
    conn: LazyConnection,
}

impl UnixRequestSender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            conn: LazyConnection::new(path.into()),
        }
    }
}

#[async_trait]
impl RequestSender for UnixRequestSender {
    async fn send(&self, request: &Message) -> Result<Message> {
        self.conn
            .exchange(request, true)
            .await?
            .ok_or(TransportError::ConnectionClosed)
    }

    fn reset(&self) {
        self.conn.reset();
    }

    async fn disconnect(&self) -> Result<()> {
        self.conn.close().await;
        Ok(())
    }
}
