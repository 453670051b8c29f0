//! mDNS service announcement

use foris_core::{ControllerId, ZeroconfConfig, MDNS_SERVICE_TYPE, NAMESPACE};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, info, warn};

use crate::error::{DiscoveryError, Result};

/// RFC 1918 private ranges
pub fn is_private(addr: &Ipv4Addr) -> bool {
    let [a, b, ..] = addr.octets();
    a == 10 || (a == 172 && (16..=31).contains(&b)) || (a == 192 && b == 168)
}

/// Private IPv4 addresses of `interfaces` (name, address), restricted to
/// `devices` unless it is empty. Sorted and deduplicated.
pub fn select_addresses(interfaces: &[(String, IpAddr)], devices: &[String]) -> Vec<Ipv4Addr> {
    let mut addresses: Vec<Ipv4Addr> = interfaces
        .iter()
        .filter(|(name, _)| devices.is_empty() || devices.contains(name))
        .filter_map(|(_, addr)| match addr {
            IpAddr::V4(v4) if is_private(v4) => Some(*v4),
            _ => None,
        })
        .collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

/// Instance name without the service type
pub fn instance_name(controller_id: &ControllerId) -> String {
    format!("{}.{}", controller_id.as_str(), NAMESPACE)
}

fn local_interfaces() -> Result<Vec<(String, IpAddr)>> {
    Ok(if_addrs::get_if_addrs()?
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .map(|iface| {
            let ip = iface.ip();
            (iface.name, ip)
        })
        .collect())
}

/// A registered mDNS service, unregistered on drop
pub struct ZeroconfAnnouncer {
    daemon: ServiceDaemon,
    fullname: String,
}

impl ZeroconfAnnouncer {
    /// Register the service for `controller_id`
    pub fn start(controller_id: &ControllerId, config: &ZeroconfConfig) -> Result<Self> {
        let addresses = select_addresses(&local_interfaces()?, &config.devices);
        if addresses.is_empty() {
            return Err(DiscoveryError::NoAddress);
        }

        let listed: Vec<String> = addresses.iter().map(Ipv4Addr::to_string).collect();
        let txt = serde_json::to_string(&listed).map_err(|e| DiscoveryError::Mdns(e.to_string()))?;
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| controller_id.as_str().to_string());

        let daemon = ServiceDaemon::new()?;
        let info = ServiceInfo::new(
            MDNS_SERVICE_TYPE,
            &instance_name(controller_id),
            &format!("{}.local.", host),
            listed.join(",").as_str(),
            config.port,
            &[("addresses", txt.as_str())][..],
        )?;
        let fullname = info.get_fullname().to_string();
        daemon.register(info)?;

        info!("Announcing {} on {}", fullname, listed.join(", "));
        Ok(Self { daemon, fullname })
    }

    /// Register the service, logging instead of failing
    pub fn try_start(controller_id: &ControllerId, config: &ZeroconfConfig) -> Option<Self> {
        match Self::start(controller_id, config) {
            Ok(announcer) => Some(announcer),
            Err(e) => {
                warn!("Zero-configuration announcement disabled: {}", e);
                None
            }
        }
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }
}

impl Drop for ZeroconfAnnouncer {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            debug!("Failed to unregister {}: {}", self.fullname, e);
        }
        let _ = self.daemon.shutdown();
    }
}
