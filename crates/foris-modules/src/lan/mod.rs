//! `lan` module
//!
//! Reads and updates the LAN addressing mode and the DHCP server range.
//! A managed LAN runs the router's own DHCP server; an unmanaged LAN is a
//! client of some other network.

use crate::uci::{parse_bool, store_bool, ConfigStore, UciReader};
use async_trait::async_trait;
use foris_core::{Backend, Notifier};
use foris_router::{HandlerError, HandlerResult, Module, ModuleContext, ModuleProvider, Result};
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const SCHEMA: &str = include_str!("schema.json");

const MODE: &str = "network.lan._turris_mode";
const PROTO: &str = "network.lan.proto";
const IPADDR: &str = "network.lan.ipaddr";
const NETMASK: &str = "network.lan.netmask";
const GATEWAY: &str = "network.lan.gateway";
const DHCP_IGNORE: &str = "dhcp.lan.ignore";
const DHCP_START: &str = "dhcp.lan.start";
const DHCP_LIMIT: &str = "dhcp.lan.limit";
const DHCP_LEASE: &str = "dhcp.lan.leasetime";

const DEFAULT_LEASE: u64 = 12 * 3600;

pub struct LanProvider {
    uci: Arc<ConfigStore>,
}

impl LanProvider {
    pub fn new(uci: Arc<ConfigStore>) -> Self {
        Self { uci }
    }
}

impl ModuleProvider for LanProvider {
    fn name(&self) -> &str {
        "lan"
    }

    fn version(&self) -> &str {
        "0.3"
    }

    fn actions(&self) -> Vec<String> {
        vec!["get_settings".into(), "update_settings".into()]
    }

    fn schema(&self) -> Result<Value> {
        crate::parse_schema("lan", SCHEMA)
    }

    fn instantiate(&self, ctx: &ModuleContext) -> Result<Arc<dyn Module>> {
        Ok(Arc::new(LanModule {
            uci: self.uci.clone(),
            notifier: ctx.notifier.clone(),
            backend: ctx.backend,
        }))
    }
}

struct LanModule {
    uci: Arc<ConfigStore>,
    notifier: Notifier,
    backend: Backend,
}

#[async_trait]
impl Module for LanModule {
    async fn handle(&self, action: &str, data: Option<Value>) -> HandlerResult<Option<Value>> {
        match action {
            "get_settings" => self.get_settings().await.map(Some),
            "update_settings" => {
                let data = data.ok_or_else(|| HandlerError::InvalidArgument("missing data".into()))?;
                let result = self.update_settings(&data).await?;
                if result {
                    self.notifier.notify("lan", "update_settings", Some(data)).await;
                }
                Ok(Some(json!({ "result": result })))
            }
            other => Err(HandlerError::UnknownAction(other.to_string())),
        }
    }
}

impl LanModule {
    async fn get_settings(&self) -> HandlerResult<Value> {
        let (interface_count, interface_up_count) = interface_counts(self.backend).await;
        let uci = self.uci.read().await;

        let mode = match uci.get_or(MODE, "managed").await?.as_str() {
            "unmanaged" => "unmanaged",
            _ => "managed",
        };
        let lan_type = match uci.get_or(PROTO, "static").await?.as_str() {
            "dhcp" => "dhcp",
            "static" => "static",
            _ => "none",
        };
        let ip = uci.get_or(IPADDR, "192.168.1.1").await?;
        let netmask = uci.get_or(NETMASK, "255.255.255.0").await?;

        Ok(json!({
            "mode": mode,
            "mode_managed": {
                "router_ip": ip,
                "netmask": netmask,
                "dhcp": dhcp_settings(&uci).await?,
            },
            "mode_unmanaged": {
                "lan_type": lan_type,
                "lan_static": {
                    "ip": ip,
                    "netmask": netmask,
                    "gateway": uci.get_or(GATEWAY, "0.0.0.0").await?,
                },
            },
            "interface_count": interface_count,
            "interface_up_count": interface_up_count,
        }))
    }

    /// Returns `false` when the settings are well-formed but not applicable
    async fn update_settings(&self, data: &Value) -> HandlerResult<bool> {
        let mode = data.get("mode").and_then(Value::as_str).unwrap_or_default();
        let uci = self.uci.write().await;

        // every argument is checked before the first write
        match mode {
            "managed" => {
                let managed = &data["mode_managed"];
                let netmask = str_arg(managed, "netmask")?;
                if !is_contiguous_netmask(netmask) {
                    debug!("Rejecting non-contiguous netmask {}", netmask);
                    return Ok(false);
                }
                let router_ip = str_arg(managed, "router_ip")?;
                let dhcp = &managed["dhcp"];
                let dhcp_enabled = bool_arg(dhcp, "enabled")?;
                let dhcp_start = int_arg(dhcp, "start")?;
                let dhcp_limit = int_arg(dhcp, "limit")?;
                let lease_time = int_arg(dhcp, "lease_time")?;

                uci.set(MODE, "managed").await?;
                uci.set(PROTO, "static").await?;
                uci.set(IPADDR, router_ip).await?;
                uci.set(NETMASK, netmask).await?;
                uci.set(DHCP_IGNORE, store_bool(!dhcp_enabled)).await?;
                uci.set(DHCP_START, dhcp_start.to_string()).await?;
                uci.set(DHCP_LIMIT, dhcp_limit.to_string()).await?;
                uci.set(DHCP_LEASE, format_lease(lease_time)).await?;
            }
            "unmanaged" => {
                let unmanaged = &data["mode_unmanaged"];
                let lan_type = str_arg(unmanaged, "lan_type")?;
                let lan_static = if lan_type == "static" {
                    let lan_static = &unmanaged["lan_static"];
                    let netmask = str_arg(lan_static, "netmask")?;
                    if !is_contiguous_netmask(netmask) {
                        debug!("Rejecting non-contiguous netmask {}", netmask);
                        return Ok(false);
                    }
                    Some((
                        str_arg(lan_static, "ip")?,
                        netmask,
                        str_arg(lan_static, "gateway")?,
                    ))
                } else {
                    None
                };

                uci.set(MODE, "unmanaged").await?;
                uci.set(PROTO, lan_type).await?;
                uci.set(DHCP_IGNORE, store_bool(true)).await?;
                match lan_static {
                    Some((ip, netmask, gateway)) => {
                        uci.set(IPADDR, ip).await?;
                        uci.set(NETMASK, netmask).await?;
                        uci.set(GATEWAY, gateway).await?;
                    }
                    None => uci.delete(GATEWAY).await?,
                }
            }
            other => {
                return Err(HandlerError::InvalidArgument(format!("unknown mode '{}'", other)));
            }
        }

        uci.commit(&["network", "dhcp"]).await?;
        uci.reload("network").await?;
        Ok(true)
    }
}

async fn dhcp_settings(uci: &UciReader<'_>) -> HandlerResult<Value> {
    let lease = uci.get(DHCP_LEASE).await?;
    let lease_time = match lease.as_deref().map(parse_lease) {
        Some(Some(seconds)) => seconds,
        Some(None) => {
            warn!("Unparsable lease time {:?}, using default", lease);
            DEFAULT_LEASE
        }
        None => DEFAULT_LEASE,
    };

    Ok(json!({
        "enabled": !parse_bool(&uci.get_or(DHCP_IGNORE, "0").await?),
        "start": uci.get_or(DHCP_START, "100").await?.parse::<u64>().unwrap_or(100),
        "limit": uci.get_or(DHCP_LIMIT, "150").await?.parse::<u64>().unwrap_or(150),
        "lease_time": lease_time,
    }))
}

/// Number of LAN bridge ports and how many of them have a carrier
async fn interface_counts(backend: Backend) -> (usize, usize) {
    match backend {
        Backend::Mock => (4, 1),
        Backend::Openwrt => bridge_ports(Path::new("/sys/class/net"), "br-lan").await,
    }
}

async fn bridge_ports(sysfs: &Path, bridge: &str) -> (usize, usize) {
    let mut entries = match tokio::fs::read_dir(sysfs.join(bridge).join("brif")).await {
        Ok(entries) => entries,
        Err(_) => return (0, 0),
    };

    let mut total = 0;
    let mut up = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        total += 1;
        let state = tokio::fs::read_to_string(sysfs.join(entry.file_name()).join("operstate"))
            .await
            .unwrap_or_default();
        if state.trim() == "up" {
            up += 1;
        }
    }
    (total, up)
}

/// Parse a dnsmasq lease time (`infinite`, `3600`, `12h`, `30m`, ...)
fn parse_lease(value: &str) -> Option<u64> {
    let value = value.trim();
    if value == "infinite" {
        return Some(0);
    }
    let (number, multiplier) = match value.chars().last()? {
        's' => (&value[..value.len() - 1], 1),
        'm' => (&value[..value.len() - 1], 60),
        'h' => (&value[..value.len() - 1], 3600),
        'd' => (&value[..value.len() - 1], 86400),
        'w' => (&value[..value.len() - 1], 7 * 86400),
        _ => (value, 1),
    };
    number.parse::<u64>().ok()?.checked_mul(multiplier)
}

fn format_lease(seconds: u64) -> String {
    if seconds == 0 {
        "infinite".to_string()
    } else {
        seconds.to_string()
    }
}

fn is_contiguous_netmask(netmask: &str) -> bool {
    match netmask.parse::<Ipv4Addr>() {
        Ok(mask) => {
            let bits = u32::from(mask);
            bits.leading_ones() + bits.trailing_zeros() == 32
        }
        Err(_) => false,
    }
}

fn str_arg<'a>(data: &'a Value, key: &str) -> HandlerResult<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::InvalidArgument(format!("missing '{}'", key)))
}

fn int_arg(data: &Value, key: &str) -> HandlerResult<u64> {
    data.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| HandlerError::InvalidArgument(format!("missing '{}'", key)))
}

fn bool_arg(data: &Value, key: &str) -> HandlerResult<bool> {
    data.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| HandlerError::InvalidArgument(format!("missing '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lease() {
        assert_eq!(parse_lease("infinite"), Some(0));
        assert_eq!(parse_lease("12h"), Some(43200));
        assert_eq!(parse_lease("30m"), Some(1800));
        assert_eq!(parse_lease("86401"), Some(86401));
        assert_eq!(parse_lease("soon"), None);
        assert_eq!(parse_lease("99999999999999999w"), None);
        assert_eq!(format_lease(0), "infinite");
    }

    #[test]
    fn test_netmask() {
        assert!(is_contiguous_netmask("255.252.0.0"));
        assert!(is_contiguous_netmask("255.255.255.0"));
        assert!(!is_contiguous_netmask("255.0.255.0"));
        assert!(!is_contiguous_netmask("garbage"));
    }

    #[tokio::test]
    async fn test_bridge_ports() {
        let sysfs = tempfile::tempdir().unwrap();
        let brif = sysfs.path().join("br-lan").join("brif");
        for (port, state) in [("lan0", "up"), ("lan1", "down"), ("lan2", "up")] {
            std::fs::create_dir_all(brif.join(port)).unwrap();
            std::fs::create_dir_all(sysfs.path().join(port)).unwrap();
            std::fs::write(sysfs.path().join(port).join("operstate"), format!("{}\n", state)).unwrap();
        }

        assert_eq!(bridge_ports(sysfs.path(), "br-lan").await, (3, 2));
        assert_eq!(bridge_ports(sysfs.path(), "br-guest").await, (0, 0));
    }
}
