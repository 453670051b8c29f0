//! Foris Core
//!
//! Core types and primitives shared by every part of foris-controller.
//!
//! This crate provides:
//! - The wire message model ([`Message`], [`MessageKind`])
//! - JSON-Schema validation of messages ([`Validator`], [`SchemaBundle`])
//! - Length-prefixed frame encoding/decoding ([`codec`])
//! - The process-wide application info ([`Context`])
//! - The notification sender contract ([`NotificationSender`], [`Notifier`])

pub mod codec;
pub mod context;
pub mod error;
pub mod message;
pub mod notify;
pub mod schema;

pub use codec::{decode_frame, encode_frame, FrameDecoder};
pub use context::{Backend, Context, ControllerId, MqttCredentials, ZeroconfConfig};
pub use error::{Error, Result};
pub use message::{Message, MessageKind};
pub use notify::{NotificationSender, Notifier, NullSender, RecordingSender};
pub use schema::{SchemaBundle, Validator};

/// Prefix of every MQTT topic and every ubus endpoint name
pub const NAMESPACE: &str = "foris-controller";

/// Default maximum size of a length-prefixed frame (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the little-endian length prefix of a frame
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default MQTT broker port
pub const DEFAULT_MQTT_PORT: u16 = 11883;

/// Default announcer period in seconds
pub const DEFAULT_ANNOUNCER_PERIOD: f64 = 1.0;

/// Environment variable overriding the announcer period
pub const ENV_ANNOUNCER_PERIOD: &str = "FC_MQTT_ANNOUNCER_PERIOD";

/// Environment variable disabling the advertizement cache
pub const ENV_DISABLE_ADV_CACHE: &str = "FC_DISABLE_ADV_CACHE";

/// mDNS service type of the MQTT endpoint
pub const MDNS_SERVICE_TYPE: &str = "_mqtt._tcp.local.";
