//! MQTT notification and request senders

use async_trait::async_trait;
use dashmap::DashMap;
use foris_core::{ControllerId, Message, NotificationSender};
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, QoS};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::topics::Topics;
use super::MqttConfig;
use crate::error::{Result, TransportError};
use crate::traits::RequestSender;

const PUBLISH_ATTEMPTS: usize = 3;

/// Poll an event loop until the client disconnects, handing publishes to
/// `on_publish`. Errors are retried after a pause so rumqttc reconnects.
async fn drive<F>(mut eventloop: EventLoop, mut on_publish: F)
where
    F: FnMut(&str, &[u8]) + Send,
{
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                on_publish(&publish.topic, &publish.payload)
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("MQTT connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

struct Connection {
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl Connection {
    fn open(config: &MqttConfig) -> Self {
        let (client, eventloop) = AsyncClient::new(config.options("notifier", false), 100);
        let task = tokio::spawn(drive(eventloop, |_, _| {}));
        Self { client, task }
    }

    async fn close(self) {
        if self.client.disconnect().await.is_err() {
            self.task.abort();
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// Publishes notifications on `notification/<module>/action/<action>`.
///
/// Connect, publish and disconnect are serialised by one state lock.
pub struct MqttNotificationSender {
    config: MqttConfig,
    topics: Topics,
    state: Mutex<Option<Connection>>,
    stale: AtomicBool,
}

impl MqttNotificationSender {
    pub fn new(config: MqttConfig, controller_id: &ControllerId) -> Self {
        Self {
            config,
            topics: Topics::new(controller_id.as_str()),
            state: Mutex::new(None),
            stale: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl NotificationSender for MqttNotificationSender {
    async fn send(&self, message: &Message) -> foris_core::Result<()> {
        let topic = self.topics.notification(&message.module, &message.action);
        let payload = message.to_bytes()?;

        let mut state = self.state.lock().await;
        if self.stale.swap(false, Ordering::SeqCst) {
            if let Some(conn) = state.take() {
                conn.close().await;
            }
        }

        let mut last_error = TransportError::NotConnected;
        for attempt in 1..=PUBLISH_ATTEMPTS {
            let conn = state.get_or_insert_with(|| Connection::open(&self.config));
            match conn
                .client
                .publish(topic.as_str(), QoS::AtMostOnce, false, payload.clone())
                .await
            {
                Ok(()) => {
                    debug!("Published {}", topic);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Publish to {} failed (attempt {}): {}", topic, attempt, e);
                    last_error = e.into();
                    if let Some(conn) = state.take() {
                        conn.task.abort();
                    }
                }
            }
        }
        Err(last_error.into())
    }

    async fn disconnect(&self) -> foris_core::Result<()> {
        if let Some(conn) = self.state.lock().await.take() {
            conn.close().await;
        }
        Ok(())
    }

    fn reset(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }
}

/// Sends requests over MQTT and waits for the retained reply
pub struct MqttRequestSender {
    topics: Topics,
    client: AsyncClient,
    pending: Arc<DashMap<String, oneshot::Sender<Vec<u8>>>>,
    task: JoinHandle<()>,
}

impl MqttRequestSender {
    /// Connect to the broker; must be called inside a tokio runtime
    pub fn new(config: &MqttConfig, controller_id: &ControllerId) -> Self {
        let topics = Topics::new(controller_id.as_str());
        let (client, eventloop) = AsyncClient::new(config.options("client", true), 100);
        let pending: Arc<DashMap<String, oneshot::Sender<Vec<u8>>>> = Arc::new(DashMap::new());

        let reply_prefix = topics.reply("");
        let waiting = pending.clone();
        let task = tokio::spawn(drive(eventloop, move |topic, payload| {
            if payload.is_empty() {
                return;
            }
            let Some(reply_id) = topic.strip_prefix(reply_prefix.as_str()) else {
                return;
            };
            if let Some((_, tx)) = waiting.remove(reply_id) {
                let _ = tx.send(payload.to_vec());
            }
        }));

        Self {
            topics,
            client,
            pending,
            task,
        }
    }
}

/// Waiter for one reply, released when the request finishes or its future
/// is dropped
struct PendingReply<'a> {
    sender: &'a MqttRequestSender,
    reply_id: String,
    topic: String,
    subscribed: bool,
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.sender.pending.remove(&self.reply_id);
        if self.subscribed {
            if let Err(e) = self.sender.client.try_unsubscribe(self.topic.as_str()) {
                debug!("Unsubscribe from {} failed: {}", self.topic, e);
            }
        }
    }
}

#[async_trait]
impl RequestSender for MqttRequestSender {
    async fn send(&self, request: &Message) -> Result<Message> {
        let reply_id = uuid::Uuid::new_v4().simple().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(reply_id.clone(), tx);
        let mut waiter = PendingReply {
            sender: self,
            topic: self.topics.reply(&reply_id),
            reply_id,
            subscribed: false,
        };

        let mut payload = json!({"reply_msg_id": waiter.reply_id});
        if let (Some(data), Some(obj)) = (&request.data, payload.as_object_mut()) {
            obj.insert("data".into(), data.clone());
        }

        self.client
            .subscribe(waiter.topic.as_str(), QoS::AtMostOnce)
            .await?;
        waiter.subscribed = true;
        self.client
            .publish(
                self.topics.request(&request.module, &request.action),
                QoS::AtMostOnce,
                false,
                serde_json::to_vec(&payload)?,
            )
            .await?;

        let reply = rx.await.map_err(|_| TransportError::ConnectionClosed)?;
        drop(waiter);

        let reply: Value = serde_json::from_slice(&reply)?;
        Ok(Message::from_value(reply)?)
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}

impl Drop for MqttRequestSender {
    fn drop(&mut self) {
        self.task.abort();
    }
}
