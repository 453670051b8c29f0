//! Foris Discovery
//!
//! Announces the MQTT endpoint of a controller over mDNS (`_mqtt._tcp.local.`)
//! on the private IPv4 addresses of the selected interfaces.

pub mod error;
pub mod zeroconf;

pub use error::{DiscoveryError, Result};
pub use zeroconf::{instance_name, is_private, select_addresses, ZeroconfAnnouncer};
