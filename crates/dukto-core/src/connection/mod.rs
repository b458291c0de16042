//! Address parsing for outbound transfers.
//!
//! Peers are usually picked from the discovery table, but a host can also be
//! given by hand, which is the only way to reach one across networks where
//! broadcast does not travel (VPNs, routed subnets).

use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};
use crate::DEFAULT_PORT;

/// Map the "unspecified" port 0 to the default port.
#[must_use]
pub const fn resolve_port(port: u16) -> u16 {
    if port == 0 {
        DEFAULT_PORT
    } else {
        port
    }
}

/// Parse a host address string into a `SocketAddr`.
///
/// Accepts formats:
/// - `IP` (e.g., `192.168.1.100`) - uses default port 4644
/// - `IP:PORT` (e.g., `192.168.1.100:5000`) - uses specified port
/// - `[IPv6]` (e.g., `[::1]`) - uses default port 4644
/// - `[IPv6]:PORT` (e.g., `[::1]:5000`) - uses specified port
///
/// A port of 0 also selects the default port.
///
/// # Examples
///
/// ```
/// use dukto_core::connection::parse_host_address;
///
/// let addr = parse_host_address("192.168.1.100").unwrap();
/// assert_eq!(addr.port(), 4644);
///
/// let addr = parse_host_address("192.168.1.100:5000").unwrap();
/// assert_eq!(addr.port(), 5000);
/// ```
///
/// # Errors
///
/// Returns an error if the host string cannot be parsed.
pub fn parse_host_address(host: &str) -> Result<SocketAddr> {
    let host = host.trim();
    let invalid = || {
        Error::InvalidInput(format!(
            "Invalid host format '{host}'. Use IP or IP:PORT (e.g., 192.168.1.100 or 192.168.1.100:4644)"
        ))
    };

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(SocketAddr::new(addr.ip(), resolve_port(addr.port())));
    }

    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        let ip: IpAddr = inner.parse().map_err(|_| invalid())?;
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if let Some((ip_part, port_part)) = host.rsplit_once(':') {
        if !ip_part.contains(':') {
            let ip: IpAddr = ip_part.parse().map_err(|_| invalid())?;
            let port: u16 = port_part.parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "Invalid port '{port_part}'. Port must be a number between 0 and 65535"
                ))
            })?;
            return Ok(SocketAddr::new(ip, resolve_port(port)));
        }
    }

    Err(invalid())
}
