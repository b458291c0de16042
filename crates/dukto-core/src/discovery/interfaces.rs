//! Local IPv4 interfaces and their broadcast addresses.

use std::net::Ipv4Addr;

/// A local IPv4 address hellos are broadcast from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastTarget {
    /// Address of the local interface
    pub local: Ipv4Addr,
    /// Directed broadcast address of its subnet
    pub broadcast: Ipv4Addr,
}

/// Every non-loopback IPv4 interface with its broadcast address.
///
/// Interfaces that cannot be listed yield an empty result.
pub fn broadcast_targets() -> Vec<BroadcastTarget> {
    let interfaces = match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::warn!("Failed to list network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut targets: Vec<BroadcastTarget> = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            get_if_addrs::IfAddr::V4(v4) => Some(BroadcastTarget {
                local: v4.ip,
                broadcast: v4
                    .broadcast
                    .unwrap_or_else(|| broadcast_address(v4.ip, v4.netmask)),
            }),
            get_if_addrs::IfAddr::V6(_) => None,
        })
        .collect();

    targets.sort_by_key(|t| t.local);
    targets.dedup();
    targets
}

/// Directed broadcast address for `ip` within `netmask`.
pub fn broadcast_address(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
}
