//! ubus notification and request senders

use async_trait::async_trait;
use foris_core::{Message, NotificationSender};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::debug;

use super::client::UbusConnection;
use super::listener::endpoint_name;
use crate::error::{Result, TransportError};
use crate::traits::RequestSender;

/// A ubus connection opened on first use and reopened after `reset`
struct LazyUbus {
    path: PathBuf,
    conn: Mutex<Option<UbusConnection>>,
}

impl LazyUbus {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            conn: Mutex::new(None),
        }
    }

    async fn get(&self) -> Result<UbusConnection> {
        if let Some(conn) = self.conn.lock().as_ref().filter(|c| !c.is_closed()) {
            return Ok(conn.clone());
        }
        let conn = UbusConnection::connect(&self.path).await?;
        debug!("Opened ubus connection {:08x}", conn.local_id());
        *self.conn.lock() = Some(conn.clone());
        Ok(conn)
    }

    fn reset(&self) {
        self.conn.lock().take();
    }
}

/// Publishes notifications as ubus events named after the module endpoint
pub struct UbusNotificationSender {
    conn: LazyUbus,
}

impl UbusNotificationSender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            conn: LazyUbus::new(path.into()),
        }
    }
}

#[async_trait]
impl NotificationSender for UbusNotificationSender {
    async fn send(&self, message: &Message) -> foris_core::Result<()> {
        let mut event = Map::new();
        event.insert("action".into(), Value::String(message.action.clone()));
        if let Some(data) = &message.data {
            event.insert("data".into(), data.clone());
        }

        let conn = self.conn.get().await?;
        conn.send_event(&endpoint_name(&message.module), &event).await?;
        Ok(())
    }

    async fn disconnect(&self) -> foris_core::Result<()> {
        self.conn.reset();
        Ok(())
    }

    fn reset(&self) {
        self.conn.reset();
    }
}

/// Calls module endpoints over ubus
pub struct UbusRequestSender {
    conn: LazyUbus,
}

impl UbusRequestSender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            conn: LazyUbus::new(path.into()),
        }
    }
}

#[async_trait]
impl RequestSender for UbusRequestSender {
    async fn send(&self, request: &Message) -> Result<Message> {
        let mut args = Map::new();
        if let Some(data) = &request.data {
            args.insert("data".into(), data.clone());
        }

        let conn = self.conn.get().await?;
        let reply = conn
            .call(&endpoint_name(&request.module), &request.action, &args)
            .await?;
        if reply.is_empty() {
            return Err(TransportError::Protocol("empty ubus reply".into()));
        }
        Ok(Message::from_value(Value::Object(reply))?)
    }

    fn reset(&self) {
        self.conn.reset();
    }

    async fn disconnect(&self) -> Result<()> {
        self.conn.reset();
        Ok(())
    }
}
