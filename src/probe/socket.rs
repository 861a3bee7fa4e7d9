use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};

use crate::probe::ProbeError;

/// Socket capability level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketCapability {
    /// Full raw socket access
    Raw,
    /// Unprivileged ICMP socket (Linux ping_group_range)
    Dgram,
}

/// Socket with metadata about type (for DGRAM-aware parsing)
#[derive(Debug)]
pub struct SocketInfo {
    pub socket: Socket,
    /// True if SOCK_DGRAM (no IP header in received packets)
    pub is_dgram: bool,
}

impl SocketInfo {
    pub fn capability(&self) -> SocketCapability {
        if self.is_dgram {
            SocketCapability::Dgram
        } else {
            SocketCapability::Raw
        }
    }
}

fn icmp_domain(ipv6: bool) -> (Domain, Protocol) {
    if ipv6 {
        (Domain::IPV6, Protocol::ICMPV6)
    } else {
        (Domain::IPV4, Protocol::ICMPV4)
    }
}

/// Create a raw ICMP socket
pub fn create_raw_icmp_socket(ipv6: bool) -> io::Result<Socket> {
    let (domain, protocol) = icmp_domain(ipv6);
    Socket::new(domain, Type::RAW, Some(protocol))
}

/// Create an unprivileged ICMP socket (SOCK_DGRAM)
pub fn create_dgram_icmp_socket(ipv6: bool) -> io::Result<Socket> {
    let (domain, protocol) = icmp_domain(ipv6);
    Socket::new(domain, Type::DGRAM, Some(protocol))
}

/// Open the socket one target is probed through.
///
/// Prefers RAW, falls back to DGRAM for unprivileged ICMP. The socket is
/// non-blocking so it can be driven by the async runtime.
pub fn open_probe_socket(ipv6: bool) -> Result<SocketInfo, ProbeError> {
    let info = match create_raw_icmp_socket(ipv6) {
        Ok(socket) => SocketInfo {
            socket,
            is_dgram: false,
        },
        Err(raw_err) => match create_dgram_icmp_socket(ipv6) {
            Ok(socket) => SocketInfo {
                socket,
                is_dgram: true,
            },
            // Report the RAW failure, it is the one that names the missing privilege
            Err(_) => return Err(ProbeError::Permission(raw_err)),
        },
    };

    info.socket
        .set_nonblocking(true)
        .map_err(ProbeError::Socket)?;
    Ok(info)
}

/// Check which ICMP socket type this process may open
pub fn check_permissions(ipv6: bool) -> Result<SocketCapability, ProbeError> {
    open_probe_socket(ipv6).map(|info| info.capability())
}

/// Remediation text shown when no ICMP socket can be opened
pub fn permission_hint() -> String {
    let binary_path = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "route-mapper".to_string());

    format!(
        "Fix options:\n\
         \u{2022} Run with sudo: sudo route-mapper <start> <end>\n\
         \u{2022} Add capability: sudo setcap cap_net_raw+ep {}\n\
         \u{2022} Enable unprivileged ICMP: sudo sysctl -w net.ipv4.ping_group_range='0 65534'",
        binary_path
    )
}

/// Set the hop limit (TTL on IPv4, unicast hops on IPv6) for the next probe
pub fn set_hop_limit(socket: &Socket, hop_limit: u8, ipv6: bool) -> io::Result<()> {
    if ipv6 {
        socket.set_unicast_hops_v6(hop_limit as u32)
    } else {
        socket.set_ttl(hop_limit as u32)
    }
}

/// Send ICMP packet to target
pub fn send_icmp(socket: &Socket, packet: &[u8], target: IpAddr) -> io::Result<usize> {
    let addr = SockAddr::from(SocketAddr::new(target, 0));
    socket.send_to(packet, &addr)
}

/// Receive one packet and the address it came from
pub fn recv_icmp(socket: &Socket, buffer: &mut [u8]) -> io::Result<(usize, IpAddr)> {
    // SAFETY: the buffer is initialized and recv_from only writes into it
    let uninit = unsafe { &mut *(buffer as *mut [u8] as *mut [MaybeUninit<u8>]) };
    let (len, addr) = socket.recv_from(uninit)?;
    let source = addr
        .as_socket()
        .map(|s| s.ip())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-IP source address"))?;
    Ok((len, source))
}
