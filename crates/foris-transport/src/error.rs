//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("timeout")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("subscription failed: {0}")]
    SubscribeFailed(String),

    #[error("ubus call failed with status {0}")]
    UbusStatus(u32),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("core error: {0}")]
    Core(#[from] foris_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Core(e.into())
    }
}

impl From<rumqttc::ClientError> for TransportError {
    fn from(e: rumqttc::ClientError) -> Self {
        TransportError::Mqtt(e.to_string())
    }
}

impl From<TransportError> for foris_core::Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Core(inner) => inner,
            other => foris_core::Error::Transport(other.to_string()),
        }
    }
}
