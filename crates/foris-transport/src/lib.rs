//! Foris Transport
//!
//! Bus listeners and senders for foris-controller:
//! - Unix stream sockets with length-prefixed JSON frames ([`unix`])
//! - ubus, the OpenWrt local IPC bus ([`ubus`])
//! - MQTT with retained replies and periodic advertizements ([`mqtt`])
//! - The client-bridge socket ([`bridge`])

pub mod bridge;
pub mod error;
pub mod framing;
pub mod mqtt;
pub mod traits;
pub mod ubus;
pub mod unix;

pub use bridge::ClientBridge;
pub use error::{Result, TransportError};
pub use framing::FramedStream;
pub use mqtt::{MqttConfig, MqttListener, MqttNotificationSender, MqttRequestSender};
pub use traits::{FrameHandler, RequestSender};
pub use ubus::{UbusListener, UbusNotificationSender, UbusRequestSender};
pub use unix::{
    bind_socket, serve_socket, MessageDispatcher, UnixNotificationSender, UnixRequestSender,
    UnixSocketListener,
};
