//! Route introspection for outbound peers: which local address, interface
//! and gateway the kernel would use to reach a remote host. Used to label
//! synthesized capture frames; every field degrades to a zero value when
//! the platform offers nothing better.

use crate::error::Result;
use std::ffi::{CStr, CString};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub remote_ip: IpAddr,
    pub local_ip: IpAddr,
    pub iface_id: u32,
    pub iface_mac: [u8; 6],
    pub gw_ip: IpAddr,
}

impl RouteInfo {
    /// Minimal route info for connections we accepted rather than dialed.
    pub fn from_addrs(remote_ip: IpAddr, local_ip: IpAddr) -> RouteInfo {
        RouteInfo {
            remote_ip,
            local_ip,
            iface_id: 0,
            iface_mac: [0; 6],
            gw_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// Fills the route info for `remote_ip` by asking the OS which source
/// address it would pick, then matching that address to an interface.
pub fn collect(remote_ip: IpAddr) -> Result<RouteInfo> {
    let local_ip = local_ip_for(remote_ip)?;

    let iface = interface_for(local_ip);
    let (iface_id, iface_mac) = match &iface {
        Some(name) => (if_index(name), read_mac(name)),
        None => (0, [0; 6]),
    };
    let gw_ip = default_gateway(iface.as_deref())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    Ok(RouteInfo {
        remote_ip,
        local_ip,
        iface_id,
        iface_mac,
        gw_ip,
    })
}

/// Source address selection via a connected (never used) UDP socket.
fn local_ip_for(remote: IpAddr) -> Result<IpAddr> {
    let bind_addr: SocketAddr = if remote.is_ipv4() {
        "0.0.0.0:0".parse().expect("literal address")
    } else {
        "[::]:0".parse().expect("literal address")
    };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(SocketAddr::new(remote, crate::transport::DEFAULT_PORT))?;
    Ok(socket.local_addr()?.ip())
}

/// Name of the interface carrying `local_ip`, via getifaddrs(3).
fn interface_for(local_ip: IpAddr) -> Option<String> {
    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: getifaddrs fills ifap with a list we walk read-only and
    // release with freeifaddrs before returning.
    unsafe {
        if libc::getifaddrs(&mut ifap) != 0 {
            return None;
        }
        let mut found = None;
        let mut cursor = ifap;
        while !cursor.is_null() {
            let ifa = &*cursor;
            if !ifa.ifa_addr.is_null() {
                let ip = match (*ifa.ifa_addr).sa_family as i32 {
                    libc::AF_INET => {
                        let sin = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                        Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))))
                    }
                    libc::AF_INET6 => {
                        let sin6 = &*(ifa.ifa_addr as *const libc::sockaddr_in6);
                        Some(IpAddr::from(sin6.sin6_addr.s6_addr))
                    }
                    _ => None,
                };
                if ip == Some(local_ip) {
                    found = Some(CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned());
                    break;
                }
            }
            cursor = ifa.ifa_next;
        }
        libc::freeifaddrs(ifap);
        found
    }
}

fn if_index(name: &str) -> u32 {
    match CString::new(name) {
        // SAFETY: name is a valid NUL-terminated C string.
        Ok(cname) => unsafe { libc::if_nametoindex(cname.as_ptr()) },
        Err(_) => 0,
    }
}

fn read_mac(name: &str) -> [u8; 6] {
    let path = format!("/sys/class/net/{}/address", name);
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return [0; 6],
    };
    let mut mac = [0u8; 6];
    for (i, part) in text.trim().split(':').take(6).enumerate() {
        mac[i] = u8::from_str_radix(part, 16).unwrap_or(0);
    }
    mac
}

/// Default gateway from /proc/net/route, preferring the peer's interface.
fn default_gateway(iface: Option<&str>) -> Option<IpAddr> {
    let table = std::fs::read_to_string("/proc/net/route").ok()?;
    let mut any_gateway = None;
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            continue;
        }
        let raw = match u32::from_str_radix(fields[2], 16) {
            Ok(raw) => raw,
            Err(_) => continue,
        };
        // the kernel exports addresses least significant byte first
        let gateway = IpAddr::V4(Ipv4Addr::from(raw.to_le_bytes()));
        if Some(fields[0]) == iface {
            return Some(gateway);
        }
        any_gateway.get_or_insert(gateway);
    }
    any_gateway
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_loopback() {
        let info = collect(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(info.remote_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(info.local_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_from_addrs_zeroes_link_fields() {
        let info = RouteInfo::from_addrs(
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)),
        );
        assert_eq!(info.iface_id, 0);
        assert_eq!(info.iface_mac, [0; 6]);
    }
}
