// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LLRP multicast group management and interface discovery (§4.C).
//!
//! Adapted from the teacher's RTPS multicast helper: same interface-discovery
//! strategy (Linux `ip addr show` parsing, `local_ip_address` fallback,
//! environment-variable override), retargeted at LLRP's two well-known
//! multicast groups instead of SPDP/SEDP.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::LLRP_PORT;
use crate::transport::pktinfo;

/// LLRP IPv4 multicast group (E1.33 §9.1).
pub const LLRP_MULTICAST_IPV4: Ipv4Addr = Ipv4Addr::new(239, 255, 250, 133);
/// LLRP IPv6 multicast group.
pub const LLRP_MULTICAST_IPV6: Ipv6Addr = Ipv6Addr::new(
    0xff18, 0, 0, 0, 0, 0, 0x8300, 0x0085,
);

/// Join the LLRP multicast groups on every suitable local interface.
pub fn join_llrp_multicast(socket: &UdpSocket) -> io::Result<Ipv4Addr> {
    let interfaces = get_multicast_interfaces()?;

    if interfaces.is_empty() {
        log::debug!("[LLRP] no suitable interfaces found, joining on UNSPECIFIED");
        socket.join_multicast_v4(&LLRP_MULTICAST_IPV4, &Ipv4Addr::UNSPECIFIED)?;
    } else {
        for iface in &interfaces {
            match socket.join_multicast_v4(&LLRP_MULTICAST_IPV4, iface) {
                Ok(()) => {
                    log::debug!("[LLRP] joined {} on interface {}", LLRP_MULTICAST_IPV4, iface);
                }
                Err(e) if e.raw_os_error() == Some(98) => {
                    log::debug!("[LLRP] {} already joined on {}, skipping", LLRP_MULTICAST_IPV4, iface);
                }
                Err(e) => {
                    log::debug!("[LLRP] join on {} failed (non-fatal): {}", iface, e);
                }
            }
        }
    }

    socket.set_multicast_loop_v4(true)?;
    let _ = socket.set_multicast_ttl_v4(1);

    Ok(interfaces.first().copied().unwrap_or(Ipv4Addr::UNSPECIFIED))
}

/// The LLRP manager's multicast send target for a given address family.
pub fn llrp_multicast_addr(family_v6: bool) -> SocketAddr {
    if family_v6 {
        SocketAddr::new(IpAddr::V6(LLRP_MULTICAST_IPV6), LLRP_PORT)
    } else {
        SocketAddr::new(IpAddr::V4(LLRP_MULTICAST_IPV4), LLRP_PORT)
    }
}

/// Get all non-loopback IPv4 interfaces suitable for multicast.
pub fn get_multicast_interfaces() -> io::Result<Vec<Ipv4Addr>> {
    if let Ok(var) = std::env::var("RDMNET_MULTICAST_IF") {
        if let Ok(addr) = var.parse::<Ipv4Addr>() {
            log::debug!("[LLRP] using RDMNET_MULTICAST_IF override: {addr}");
            return Ok(vec![addr]);
        }
    }

    get_multicast_interfaces_platform()
}

#[cfg(target_os = "linux")]
fn get_multicast_interfaces_platform() -> io::Result<Vec<Ipv4Addr>> {
    use std::process::Command;

    let output = match Command::new("ip").args(["-4", "addr", "show"]).output() {
        Ok(o) => o,
        Err(_) => {
            log::debug!("[LLRP] 'ip' command not found, using local_ip_address crate");
            return get_multicast_interfaces_crate();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut interfaces = Vec::new();

    for line in stdout.lines() {
        if line.contains("127.0.0.1") || line.contains("host lo") {
            continue;
        }
        if let Some(inet_part) = line.trim().strip_prefix("inet ") {
            if let Some(addr_str) = inet_part.split('/').next() {
                if let Ok(addr) = addr_str.trim().parse::<Ipv4Addr>() {
                    interfaces.push(addr);
                }
            }
        }
    }

    Ok(interfaces)
}

#[cfg(not(target_os = "linux"))]
fn get_multicast_interfaces_platform() -> io::Result<Vec<Ipv4Addr>> {
    get_multicast_interfaces_crate()
}

fn get_multicast_interfaces_crate() -> io::Result<Vec<Ipv4Addr>> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::debug!("[LLRP] failed to list network interfaces: {e}");
            return Ok(vec![]);
        }
    };

    let mut addrs = Vec::new();
    for (_name, ip) in interfaces {
        if let IpAddr::V4(ipv4) = ip {
            if !ipv4.is_loopback() {
                addrs.push(ipv4);
            }
        }
    }
    Ok(addrs)
}

/// One usable LLRP interface: its address, its OS-assigned index (needed to
/// tell which interface an inbound datagram arrived on via `IP_PKTINFO`,
/// and to name a send socket's egress interface), and its name.
#[derive(Debug, Clone)]
pub struct McastInterface {
    pub name: String,
    pub index: u32,
    pub addr: Ipv4Addr,
}

/// Like [`get_multicast_interfaces`] but paired with interface names, so
/// callers can resolve an OS interface index for each one (§4.C).
pub fn get_multicast_interfaces_named() -> io::Result<Vec<(String, Ipv4Addr)>> {
    if let Ok(var) = std::env::var("RDMNET_MULTICAST_IF") {
        if let Ok(addr) = var.parse::<Ipv4Addr>() {
            return Ok(vec![(String::new(), addr)]);
        }
    }

    #[cfg(target_os = "linux")]
    {
        get_multicast_interfaces_named_linux()
    }
    #[cfg(not(target_os = "linux"))]
    {
        get_multicast_interfaces_named_crate()
    }
}

#[cfg(target_os = "linux")]
fn get_multicast_interfaces_named_linux() -> io::Result<Vec<(String, Ipv4Addr)>> {
    use std::process::Command;

    let output = match Command::new("ip").args(["-4", "addr", "show"]).output() {
        Ok(o) => o,
        Err(_) => return get_multicast_interfaces_named_crate(),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut current_name = String::new();
    let mut interfaces = Vec::new();
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix(|c: char| c.is_ascii_digit()) {
            // "2: eth0: <BROADCAST,...>" - header line for a new interface.
            if let Some(name) = rest.trim_start_matches(|c: char| c == ':' || c == ' ').split(':').next() {
                current_name = name.to_string();
            }
            continue;
        }
        if line.contains("127.0.0.1") || line.contains("host lo") {
            continue;
        }
        if let Some(inet_part) = line.trim().strip_prefix("inet ") {
            if let Some(addr_str) = inet_part.split('/').next() {
                if let Ok(addr) = addr_str.trim().parse::<Ipv4Addr>() {
                    interfaces.push((current_name.clone(), addr));
                }
            }
        }
    }
    Ok(interfaces)
}

fn get_multicast_interfaces_named_crate() -> io::Result<Vec<(String, Ipv4Addr)>> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::debug!("[LLRP] failed to list network interfaces: {e}");
            return Ok(vec![]);
        }
    };
    let mut out = Vec::new();
    for (name, ip) in interfaces {
        if let IpAddr::V4(ipv4) = ip {
            if !ipv4.is_loopback() {
                out.push((name, ipv4));
            }
        }
    }
    Ok(out)
}

/// Resolve every usable LLRP interface, including its OS index where that
/// can be determined. On platforms without `if_nametoindex` (or when the
/// `RDMNET_MULTICAST_IF` override is in effect, which carries no interface
/// name), `index` is `0`, meaning "let the kernel route it" on send and
/// "unknown, deliver to every per-interface target" on receive.
pub fn get_multicast_interfaces_indexed() -> io::Result<Vec<McastInterface>> {
    let named = get_multicast_interfaces_named()?;
    Ok(named
        .into_iter()
        .map(|(name, addr)| {
            let index = if name.is_empty() {
                0
            } else {
                pktinfo::interface_name_to_index(&name).unwrap_or(0)
            };
            McastInterface { name, index, addr }
        })
        .collect())
}

/// Hardware (MAC) address of the lowest-numbered non-loopback interface,
/// used to break ties between Probe Replies from components that share a
/// CID/UID pair (§4.G's lowest-hardware-address tie-break rule).
pub fn lowest_hardware_address() -> Option<[u8; 6]> {
    #[cfg(target_os = "linux")]
    {
        lowest_hardware_address_linux()
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(target_os = "linux")]
fn lowest_hardware_address_linux() -> Option<[u8; 6]> {
    use std::fs;

    let mut lowest: Option<[u8; 6]> = None;
    let entries = fs::read_dir("/sys/class/net").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == "lo" {
            continue;
        }
        let addr_path = entry.path().join("address");
        let Ok(addr_str) = fs::read_to_string(addr_path) else {
            continue;
        };
        if let Some(mac) = parse_mac(addr_str.trim()) {
            if mac == [0u8; 6] {
                continue;
            }
            lowest = Some(match lowest {
                Some(cur) if cur <= mac => cur,
                _ => mac,
            });
        }
    }
    lowest
}

#[cfg(target_os = "linux")]
fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    for (i, p) in parts.iter().enumerate() {
        out[i] = u8::from_str_radix(p, 16).ok()?;
    }
    Some(out)
}

/// Reference-counted per-`(interface, source port)` UDP send sockets, so an
/// LLRP reply goes out the same interface its probe arrived on instead of
/// whatever the kernel's default route picks (§4.C). Sockets are cheap to
/// share (`Arc<UdpSocket>` is `Send + Sync`) and are created lazily on first
/// use, then kept for the life of the manager.
#[derive(Default)]
pub struct McastSendSockets {
    by_key: DashMap<(u32, u16), Arc<UdpSocket>>,
}

impl McastSendSockets {
    pub fn new() -> Self {
        Self { by_key: DashMap::new() }
    }

    /// Get or create the send socket for `interface`, bound to `source_addr`
    /// so outbound traffic is scoped to that interface without needing
    /// `CAP_NET_RAW`/`SO_BINDTODEVICE`.
    pub fn get_or_create(
        &self,
        interface_index: u32,
        source_addr: Ipv4Addr,
        source_port: u16,
    ) -> io::Result<Arc<UdpSocket>> {
        if let Some(existing) = self.by_key.get(&(interface_index, source_port)) {
            return Ok(existing.clone());
        }
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        socket2.bind(&SocketAddr::new(IpAddr::V4(source_addr), source_port).into())?;
        socket2.set_multicast_loop_v4(true)?;
        let socket: UdpSocket = socket2.into();
        socket.set_nonblocking(true)?;
        let socket = Arc::new(socket);
        self.by_key.insert((interface_index, source_port), socket.clone());
        Ok(socket)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// The single shared LLRP receive socket, bound to `INADDR_ANY:LLRP_PORT`
/// and joined to the multicast group on every usable interface, with
/// `IP_PKTINFO` enabled so each inbound datagram can be attributed back to
/// the interface it arrived on (§4.C/§4.G).
pub struct McastRecvSocket {
    socket: UdpSocket,
}

impl McastRecvSocket {
    pub fn bind() -> io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        #[cfg(unix)]
        socket2.set_reuse_port(true)?;
        socket2.bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), LLRP_PORT).into())?;
        let socket: UdpSocket = socket2.into();

        join_llrp_multicast(&socket)?;
        if let Err(e) = pktinfo::enable_pktinfo_v4(&socket) {
            log::debug!("[LLRP] IP_PKTINFO unavailable, interface attribution disabled: {e}");
        }
        socket.set_nonblocking(true)?;

        Ok(Self { socket })
    }

    /// Receive one datagram, reporting the interface it arrived on when the
    /// platform supports `IP_PKTINFO` (`0` otherwise, meaning "unknown").
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr, u32)> {
        let (n, src, info) = pktinfo::recvmsg_with_pktinfo(&self.socket, buf)?;
        Ok((n, src, info.map(|i| i.interface_index).unwrap_or(0)))
    }
}
