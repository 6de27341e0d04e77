//! Local interface address probe.
//!
//! Connecting a UDP socket sends nothing; it only asks the OS routing table
//! which local interface would be used to reach the target.  Reading back the
//! socket's local address gives an address other LAN hosts can reach us on.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::debug;

/// Well-known external address used only for the routing-table lookup.
pub const PROBE_TARGET: &str = "8.8.8.8:80";

/// Returns the local interface address the OS would use to reach `target`,
/// or `None` if the lookup fails.
pub fn probe_local_ip(target: SocketAddr) -> Option<IpAddr> {
    let bind: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() {
        None
    } else {
        Some(ip)
    }
}

/// Best-effort local address: the probe result, or `127.0.0.1` on failure.
pub fn local_ip_address() -> IpAddr {
    let probed = PROBE_TARGET.parse().ok().and_then(probe_local_ip);
    match probed {
        Some(ip) => ip,
        None => {
            debug!("local address probe failed; falling back to loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
