//! Async ubus client
//!
//! One [`UbusConnection`] owns a socket to ubusd. A reader task routes
//! replies (DATA/STATUS) to the pending request with the same sequence number
//! and serves INVOKE calls on objects registered with
//! [`UbusConnection::add_object`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, warn};

use super::blobmsg::BlobmsgType;
use super::proto::{attr, msg, read_message, status, UbusMessage, UBUS_SYSTEM_OBJECT_EVENT};
use crate::error::{Result, TransportError};

/// Default path of the ubusd socket
pub const DEFAULT_UBUS_SOCKET: &str = "/var/run/ubus/ubus.sock";

/// Serves method calls on a registered object
#[async_trait]
pub trait ObjectHandler: Send + Sync {
    /// Returns the reply table or a ubus status code
    async fn invoke(
        &self,
        method: &str,
        args: Map<String, Value>,
    ) -> std::result::Result<Map<String, Value>, u32>;
}

/// Methods of an object with their argument types
pub type MethodSignature = Vec<(String, Vec<(String, BlobmsgType)>)>;

struct Inner {
    writer: Mutex<OwnedWriteHalf>,
    pending: DashMap<u16, mpsc::UnboundedSender<UbusMessage>>,
    objects: DashMap<u32, Arc<dyn ObjectHandler>>,
    /// Handlers of ADD_OBJECT requests in flight, by sequence number
    registering: DashMap<u16, Arc<dyn ObjectHandler>>,
    seq: AtomicU16,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl Inner {
    async fn write(&self, message: &UbusMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&message.encode()).await?;
        Ok(())
    }

    fn next_seq(&self) -> u16 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // dropping the senders wakes every pending request
        self.pending.clear();
        self.closed_notify.notify_waiters();
    }
}

/// Request bookkeeping for one sequence number, released when the request
/// finishes or its future is dropped
struct PendingSlot<'a> {
    inner: &'a Inner,
    seq: u16,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.inner.pending.remove(&self.seq);
        self.inner.registering.remove(&self.seq);
    }
}

/// A connection to ubusd
#[derive(Clone)]
pub struct UbusConnection {
    inner: Arc<Inner>,
    local_id: u32,
}

impl UbusConnection {
    /// Connect and complete the HELLO handshake
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("{}: {}", path.display(), e))
        })?;
        let (mut reader, writer) = stream.into_split();

        let hello = read_message(&mut reader)
            .await?
            .ok_or(TransportError::ConnectionClosed)?;
        if hello.msg_type != msg::HELLO {
            return Err(TransportError::Protocol(format!(
                "expected HELLO, got message type {}",
                hello.msg_type
            )));
        }
        debug!("Connected to ubus at {} as {:08x}", path.display(), hello.peer);

        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            pending: DashMap::new(),
            objects: DashMap::new(),
            registering: DashMap::new(),
            seq: AtomicU16::new(1),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        });

        let reader_inner = inner.clone();
        tokio::spawn(async move {
            loop {
                match read_message(&mut reader).await {
                    Ok(Some(message)) => dispatch(&reader_inner, message),
                    Ok(None) => {
                        debug!("ubus connection closed");
                        break;
                    }
                    Err(e) => {
                        error!("ubus read error: {}", e);
                        break;
                    }
                }
            }
            reader_inner.mark_closed();
        });

        Ok(Self {
            inner,
            local_id: hello.peer,
        })
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the connection has been closed by ubusd
    pub async fn closed(&self) {
        let notified = self.inner.closed_notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Send a request and collect its DATA replies until the final STATUS
    async fn request(&self, message: UbusMessage) -> Result<Vec<UbusMessage>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner.pending.insert(message.seq, tx);
        let _slot = PendingSlot {
            inner: &self.inner,
            seq: message.seq,
        };

        self.inner.write(&message).await?;

        let mut replies = Vec::new();
        loop {
            match rx.recv().await {
                Some(reply) if reply.msg_type == msg::STATUS => {
                    let code = reply.get_u32(attr::STATUS).unwrap_or(status::UNKNOWN_ERROR);
                    if code != status::OK {
                        return Err(TransportError::UbusStatus(code));
                    }
                    return Ok(replies);
                }
                Some(reply) => replies.push(reply),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    /// Resolve an object path to its id
    pub async fn lookup_id(&self, path: &str) -> Result<u32> {
        let request = UbusMessage::new(msg::LOOKUP, self.inner.next_seq(), 0)
            .with_string(attr::OBJPATH, path);
        self.request(request)
            .await?
            .iter()
            .find_map(|reply| reply.get_u32(attr::OBJID))
            .ok_or(TransportError::UbusStatus(status::NOT_FOUND))
    }

    /// Call a method on an object id
    pub async fn invoke(
        &self,
        object: u32,
        method: &str,
        args: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let request = UbusMessage::new(msg::INVOKE, self.inner.next_seq(), object)
            .with_u32(attr::OBJID, object)
            .with_string(attr::METHOD, method)
            .with_table(attr::DATA, args)?;

        let mut result = Map::new();
        for reply in self.request(request).await? {
            if let Some(table) = reply.get_table(attr::DATA)? {
                result.extend(table);
            }
        }
        Ok(result)
    }

    /// Look up `path` and call `method` on it
    pub async fn call(
        &self,
        path: &str,
        method: &str,
        args: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let object = self.lookup_id(path).await?;
        self.invoke(object, method, args).await
    }

    /// Register an object served by `handler`; returns its id
    pub async fn add_object(
        &self,
        path: &str,
        methods: &MethodSignature,
        handler: Arc<dyn ObjectHandler>,
    ) -> Result<u32> {
        let seq = self.inner.next_seq();
        let request = UbusMessage::new(msg::ADD_OBJECT, seq, 0)
            .with_string(attr::OBJPATH, path)
            .with_signature(methods);

        self.inner.registering.insert(seq, handler.clone());
        let id = self
            .request(request)
            .await?
            .iter()
            .find_map(|reply| reply.get_u32(attr::OBJID))
            .ok_or_else(|| TransportError::Protocol(format!("no object id for {}", path)))?;

        self.inner.objects.insert(id, handler);
        debug!("Registered ubus object {} ({:08x})", path, id);
        Ok(id)
    }

    /// Broadcast an event
    pub async fn send_event(&self, id: &str, data: &Map<String, Value>) -> Result<()> {
        let mut args = Map::new();
        args.insert("id".into(), Value::String(id.to_string()));
        args.insert("data".into(), Value::Object(data.clone()));
        self.invoke(UBUS_SYSTEM_OBJECT_EVENT, "send", &args).await?;
        Ok(())
    }
}

fn dispatch(inner: &Arc<Inner>, message: UbusMessage) {
    match message.msg_type {
        msg::DATA | msg::STATUS => {
            // calls may arrive before add_object resumes
            if let Some(id) = message.get_u32(attr::OBJID) {
                if let Some((_, handler)) = inner.registering.remove(&message.seq) {
                    inner.objects.insert(id, handler);
                }
            }
            let delivered = inner
                .pending
                .get(&message.seq)
                .map(|tx| tx.send(message.clone()).is_ok())
                .unwrap_or(false);
            if !delivered {
                debug!("Dropping reply for unknown request {}", message.seq);
            }
        }
        msg::INVOKE => {
            let inner = inner.clone();
            tokio::spawn(async move { serve_invoke(&inner, message).await });
        }
        msg::HELLO | msg::PING => {}
        other => debug!("Ignoring ubus message type {}", other),
    }
}

async fn serve_invoke(inner: &Arc<Inner>, message: UbusMessage) {
    let object = message.get_u32(attr::OBJID).unwrap_or_default();
    let method = message.get_string(attr::METHOD).unwrap_or_default();
    let no_reply = message.get_u8(attr::NO_REPLY).unwrap_or(0) != 0;

    let handler = inner.objects.get(&object).map(|h| h.value().clone());
    let code = match (handler, message.get_table(attr::DATA)) {
        (None, _) => status::NOT_FOUND,
        (Some(_), Err(e)) => {
            warn!("Malformed arguments for {}: {}", method, e);
            status::INVALID_ARGUMENT
        }
        (Some(handler), Ok(args)) => match handler.invoke(&method, args.unwrap_or_default()).await {
            Ok(reply) => {
                if !no_reply {
                    let data = UbusMessage::new(msg::DATA, message.seq, message.peer)
                        .with_u32(attr::OBJID, object)
                        .with_table(attr::DATA, &reply);
                    match data {
                        Ok(data) => {
                            if let Err(e) = inner.write(&data).await {
                                warn!("Failed to send reply for {}: {}", method, e);
                            }
                        }
                        Err(e) => warn!("Failed to encode reply for {}: {}", method, e),
                    }
                }
                status::OK
            }
            Err(code) => code,
        },
    };

    if no_reply {
        return;
    }

    let done = UbusMessage::new(msg::STATUS, message.seq, message.peer)
        .with_u32(attr::STATUS, code)
        .with_u32(attr::OBJID, object);
    if let Err(e) = inner.write(&done).await {
        warn!("Failed to send status for {}: {}", method, e);
    }
}
