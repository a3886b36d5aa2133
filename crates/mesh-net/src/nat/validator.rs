//! Endpoint string validation

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use mesh_store::config::ValidationMode;

/// Parse and validate an endpoint string (`host:port` for IPv4,
/// `[host]:port` for IPv6).
///
/// `strict` mode rejects loopback, link-local, multicast, unspecified, and
/// RFC1918/ULA private ranges in addition to the always-rejected cases
/// (unparseable, port 0). `permissive` mode accepts private ranges but
/// still rejects structurally invalid endpoints.
pub fn validate(endpoint: &str, mode: ValidationMode) -> Option<SocketAddr> {
    let addr: SocketAddr = endpoint.parse().ok()?;
    if addr.port() == 0 {
        return None;
    }
    let ip = addr.ip();
    if ip.is_unspecified() || ip.is_multicast() {
        return None;
    }
    if is_link_local(ip) {
        return None;
    }
    if mode == ValidationMode::Strict && (ip.is_loopback() || is_private(ip)) {
        return None;
    }
    Some(addr)
}

/// Filter a list of endpoint strings down to the valid, parsed ones.
///
/// Used both on write (before persisting) and on read (defense in depth),
/// per the component contract.
pub fn filter_valid(endpoints: &[String], mode: ValidationMode) -> Vec<SocketAddr> {
    endpoints
        .iter()
        .filter_map(|e| validate(e, mode))
        .collect()
}

/// Format a `SocketAddr` using the wire convention: `host:port` for IPv4,
/// `[host]:port` for IPv6.
pub fn format_endpoint(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => format!("{}:{}", v4.ip(), v4.port()),
        SocketAddr::V6(v6) => format!("[{}]:{}", v6.ip(), v6.port()),
    }
}

fn is_link_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.octets()[0] == 169 && v4.octets()[1] == 254,
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00, // ULA fc00::/7
    }
}

fn is_private_v4(v4: Ipv4Addr) -> bool {
    let o = v4.octets();
    matches!(o[0], 10) || (o[0] == 172 && (16..=31).contains(&o[1])) || (o[0] == 192 && o[1] == 168)
}
