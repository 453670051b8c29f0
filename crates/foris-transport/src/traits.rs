//! Transport trait definitions

use async_trait::async_trait;
use foris_core::Message;
use serde_json::Value;

use crate::error::Result;

/// Client side of a bus: forwards a request and waits for its reply
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send(&self, request: &Message) -> Result<Message>;

    /// Drop any cached connection
    fn reset(&self) {}

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Handles messages received on a framed stream socket.
///
/// A returned message is written back on the same connection.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn handle(&self, message: Value) -> Option<Message>;
}
