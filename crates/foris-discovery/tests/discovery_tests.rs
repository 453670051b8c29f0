//! Discovery tests (foris-discovery)

use foris_core::ControllerId;
use foris_discovery::{instance_name, is_private, select_addresses};
use std::net::{IpAddr, Ipv4Addr};

fn iface(name: &str, addr: &str) -> (String, IpAddr) {
    (name.to_string(), addr.parse().unwrap())
}

#[test]
fn test_private_ranges() {
    assert!(is_private(&Ipv4Addr::new(10, 1, 2, 3)));
    assert!(is_private(&Ipv4Addr::new(172, 16, 0, 1)));
    assert!(is_private(&Ipv4Addr::new(172, 31, 255, 254)));
    assert!(is_private(&Ipv4Addr::new(192, 168, 1, 1)));

    assert!(!is_private(&Ipv4Addr::new(172, 32, 0, 1)));
    assert!(!is_private(&Ipv4Addr::new(8, 8, 8, 8)));
    assert!(!is_private(&Ipv4Addr::new(192, 169, 0, 1)));
}

#[test]
fn test_select_addresses_all_interfaces() {
    let interfaces = vec![
        iface("br-lan", "192.168.1.1"),
        iface("eth2", "83.240.1.1"),
        iface("br-guest", "10.111.222.1"),
        iface("br-lan", "fd00::1"),
    ];
    let selected = select_addresses(&interfaces, &[]);
    assert_eq!(
        selected,
        vec![Ipv4Addr::new(10, 111, 222, 1), Ipv4Addr::new(192, 168, 1, 1)]
    );
}

#[test]
fn test_select_addresses_named_devices() {
    let interfaces = vec![
        iface("br-lan", "192.168.1.1"),
        iface("br-guest", "10.111.222.1"),
    ];
    let selected = select_addresses(&interfaces, &["br-lan".to_string()]);
    assert_eq!(selected, vec![Ipv4Addr::new(192, 168, 1, 1)]);

    let none = select_addresses(&interfaces, &["wlan0".to_string()]);
    assert!(none.is_empty());
}

#[test]
fn test_instance_name() {
    let id: ControllerId = "0000000A00000B00".parse().unwrap();
    assert_eq!(instance_name(&id), "0000000A00000B00.foris-controller");
}
