// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `IP_PKTINFO`-assisted receive: LLRP's recv socket is bound to
//! `INADDR_ANY` so it can hear the multicast group on every joined
//! interface at once, which means the only way to know *which* interface a
//! given datagram arrived on (needed to route it to that interface's
//! [`crate::llrp::LlrpTarget`] and to reply out the same interface) is the
//! ancillary `IP_PKTINFO`/`IPV6_PKTINFO` control message Linux attaches to
//! the recvmsg() call. Adapted from the teacher's mobility pktinfo helper.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Receive-side interface information recovered from a packet's ancillary
/// control data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub local_addr: IpAddr,
    pub interface_index: u32,
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use std::os::fd::AsRawFd;

    /// Ancillary control-message buffer sized for one `in_pktinfo` or
    /// `in6_pktinfo` cmsg, 8-byte aligned as `recvmsg(2)` requires.
    #[repr(C, align(8))]
    pub struct AlignedCmsgBuf {
        buf: [u8; Self::SIZE],
    }

    impl AlignedCmsgBuf {
        pub const SIZE: usize = 128;

        pub fn new() -> Self {
            Self { buf: [0u8; Self::SIZE] }
        }

        pub fn as_mut_ptr(&mut self) -> *mut libc::c_void {
            self.buf.as_mut_ptr() as *mut libc::c_void
        }
    }

    impl Default for AlignedCmsgBuf {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Ask the kernel to attach `IP_PKTINFO` ancillary data to every
    /// datagram delivered on `socket`.
    pub fn enable_pktinfo_v4(socket: &std::net::UdpSocket) -> io::Result<()> {
        let fd = socket.as_raw_fd();
        let enable: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_PKTINFO,
                &enable as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn enable_pktinfo_v6(socket: &std::net::UdpSocket) -> io::Result<()> {
        let fd = socket.as_raw_fd();
        let enable: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_RECVPKTINFO,
                &enable as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn parse_pktinfo_v4(cmsg: &libc::cmsghdr) -> Option<PacketInfo> {
        if cmsg.cmsg_level != libc::IPPROTO_IP || cmsg.cmsg_type != libc::IP_PKTINFO {
            return None;
        }
        let info: libc::in_pktinfo = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const _);
        Some(PacketInfo {
            local_addr: IpAddr::V4(Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr))),
            interface_index: info.ipi_ifindex as u32,
        })
    }

    unsafe fn parse_pktinfo_v6(cmsg: &libc::cmsghdr) -> Option<PacketInfo> {
        if cmsg.cmsg_level != libc::IPPROTO_IPV6 || cmsg.cmsg_type != libc::IPV6_PKTINFO {
            return None;
        }
        let info: libc::in6_pktinfo = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const _);
        Some(PacketInfo {
            local_addr: IpAddr::V6(Ipv6Addr::from(info.ipi6_addr.s6_addr)),
            interface_index: info.ipi6_ifindex,
        })
    }

    /// Receive one datagram on `socket`, returning the bytes read, the
    /// sender's address, and the interface the datagram arrived on (`None`
    /// if the kernel didn't attach pktinfo, which shouldn't happen once
    /// [`enable_pktinfo_v4`]/[`enable_pktinfo_v6`] has been called).
    pub fn recvmsg_with_pktinfo(
        socket: &std::net::UdpSocket,
        buf: &mut [u8],
    ) -> io::Result<(usize, SocketAddr, Option<PacketInfo>)> {
        let fd = socket.as_raw_fd();
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let mut name: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut cmsg_buf = AlignedCmsgBuf::new();
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_name = &mut name as *mut _ as *mut libc::c_void;
        msg.msg_namelen = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr();
        msg.msg_controllen = AlignedCmsgBuf::SIZE;

        let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let src = sockaddr_storage_to_std(&name)?;

        let mut pktinfo = None;
        let mut cmsg_ptr = unsafe { libc::CMSG_FIRSTHDR(&msg) };
        while !cmsg_ptr.is_null() {
            let cmsg = unsafe { &*cmsg_ptr };
            if let Some(info) = unsafe { parse_pktinfo_v4(cmsg) }.or_else(|| unsafe { parse_pktinfo_v6(cmsg) }) {
                pktinfo = Some(info);
                break;
            }
            cmsg_ptr = unsafe { libc::CMSG_NXTHDR(&msg, cmsg_ptr) };
        }

        Ok((n as usize, src, pktinfo))
    }

    fn sockaddr_storage_to_std(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
        match storage.ss_family as libc::c_int {
            libc::AF_INET => {
                let addr: libc::sockaddr_in =
                    unsafe { std::ptr::read(storage as *const _ as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
                Ok(SocketAddr::new(IpAddr::V4(ip), u16::from_be(addr.sin_port)))
            }
            libc::AF_INET6 => {
                let addr: libc::sockaddr_in6 =
                    unsafe { std::ptr::read(storage as *const _ as *const libc::sockaddr_in6) };
                let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
                Ok(SocketAddr::new(IpAddr::V6(ip), u16::from_be(addr.sin6_port)))
            }
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported sockaddr family")),
        }
    }

    pub fn interface_name_to_index(name: &str) -> io::Result<u32> {
        let cname = std::ffi::CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name has embedded NUL"))?;
        let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if idx == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(idx)
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(not(target_os = "linux"))]
mod fallback {
    use super::*;

    pub fn enable_pktinfo_v4(_socket: &std::net::UdpSocket) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "IP_PKTINFO is Linux-only"))
    }

    pub fn enable_pktinfo_v6(_socket: &std::net::UdpSocket) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "IPV6_RECVPKTINFO is Linux-only"))
    }

    pub fn recvmsg_with_pktinfo(
        socket: &std::net::UdpSocket,
        buf: &mut [u8],
    ) -> io::Result<(usize, SocketAddr, Option<PacketInfo>)> {
        let (n, src) = socket.recv_from(buf)?;
        Ok((n, src, None))
    }

    pub fn interface_name_to_index(_name: &str) -> io::Result<u32> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "interface indexing is Linux-only"))
    }
}

#[cfg(not(target_os = "linux"))]
pub use fallback::*;
