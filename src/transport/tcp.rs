// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking TCP send/receive helpers for one broker connection.
//!
//! Built on `mio::net::TcpStream` (rather than `std::net::TcpStream`) so a
//! connection can be registered directly with the shared [`crate::context::Context`]
//! poller instead of needing its own thread.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream as MioTcpStream;
use mio::{Interest, Token};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// A non-blocking TCP stream guarded by a send-side mutex so the connection
/// engine and the application's outbound RDM calls can both write without
/// interleaving partial messages on the wire.
pub struct TcpTransport {
    stream: Mutex<MioTcpStream>,
    send_lock: Mutex<()>,
}

impl TcpTransport {
    /// Begin a non-blocking connect. The caller must wait for the writable
    /// event (registered via [`TcpTransport::register`]) before assuming the
    /// handshake can proceed, then check [`TcpTransport::take_connect_error`].
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = MioTcpStream::connect(addr)?;
        Ok(Self {
            stream: Mutex::new(stream),
            send_lock: Mutex::new(()),
        })
    }

    pub fn register(&self, registry: &mio::Registry, token: Token) -> io::Result<()> {
        registry.register(
            &mut *self.stream.lock(),
            token,
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    pub fn deregister(&self, registry: &mio::Registry) -> io::Result<()> {
        registry.deregister(&mut *self.stream.lock())
    }

    /// After a writable event fires on a connecting socket, `SO_ERROR`
    /// reveals whether the connect actually succeeded.
    pub fn take_connect_error(&self) -> io::Result<Option<io::Error>> {
        self.stream.lock().take_error()
    }

    /// Send the full buffer, looping over `WouldBlock` until it is flushed.
    /// Held under the send lock so a heartbeat and an application message
    /// can't interleave.
    pub fn send_all(&self, buf: &[u8]) -> Result<()> {
        let _guard = self.send_lock.lock();
        let mut stream = self.stream.lock();
        let mut written = 0;
        while written < buf.len() {
            match stream.write(&buf[written..]) {
                Ok(0) => return Err(Error::SocketFailure(io::ErrorKind::WriteZero.into())),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(Error::SocketFailure(e)),
            }
        }
        Ok(())
    }

    /// Non-blocking read into `buf`. Returns `Ok(0)` only on peer shutdown;
    /// `Error::WouldBlock` means "try again once the poller signals readable".
    pub fn try_recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut stream = self.stream.lock();
        match stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Error::WouldBlock),
            Err(e) => Err(Error::SocketFailure(e)),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.lock().peer_addr()
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.stream.lock().shutdown(std::net::Shutdown::Both)
    }
}
