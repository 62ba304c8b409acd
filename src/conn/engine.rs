// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The per-scope TCP connection state machine (§4.D): connect, handshake,
//! heartbeat, and backoff-on-failure, driven by `tick()` calls from the
//! shared poll loop plus readiness events from the registered socket.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::Token;

use crate::cid::Cid;
use crate::codec::broker::{ClientConnectMsg, ConnectReplyMsg};
use crate::config::{E133_HEARTBEAT_TIMEOUT, E133_TCP_HEARTBEAT_INTERVAL};
use crate::conn::backoff::Backoff;
use crate::error::{ConnectFailReason, DisconnectReason, Error, Result};
use crate::recv_buffer::{RecvBuffer, RootLayerPdu};
use crate::transport::tcp::TcpTransport;

/// The connection engine's externally observable state (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Inactive,
    ConnectingTcp,
    ConnectingHandshake,
    Connected,
    Backoff,
}

/// Events the engine surfaces to its owner (the client/scope manager, §4.E)
/// each time `tick()` or `on_readable`/`on_writable` is called.
#[derive(Debug)]
pub enum ConnEvent {
    Connected { broker_cid: Cid, reply: ConnectReplyMsg },
    ConnectFailed(ConnectFailReason),
    Disconnected(DisconnectReason),
    Pdu(RootLayerPdu),
}

/// Drives one scope's connection to a single broker address through its
/// full lifecycle. Owned by the client/scope manager; one instance per scope.
pub struct ConnEngine {
    state: ConnState,
    transport: Option<TcpTransport>,
    recv_buf: RecvBuffer,
    backoff: Backoff,
    token: Token,
    local_cid: Cid,
    connect_msg: ClientConnectMsg,
    broker_addr: Option<SocketAddr>,
    state_entered_at: Instant,
    last_sent_at: Instant,
    last_recv_at: Instant,
}

impl ConnEngine {
    pub fn new(token: Token, local_cid: Cid, connect_msg: ClientConnectMsg) -> Self {
        let now = Instant::now();
        Self {
            state: ConnState::Inactive,
            transport: None,
            recv_buf: RecvBuffer::new(),
            backoff: Backoff::new(),
            token,
            local_cid,
            connect_msg,
            broker_addr: None,
            state_entered_at: now,
            last_sent_at: now,
            last_recv_at: now,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// The `mio::Token` this engine's socket is (or will be) registered
    /// under, so a caller driving the shared poll loop can route a
    /// readiness event back to the owning scope.
    pub fn token(&self) -> Token {
        self.token
    }

    fn enter(&mut self, state: ConnState) {
        self.state = state;
        self.state_entered_at = Instant::now();
    }

    /// Begin connecting to `addr`. Valid from `Inactive` or `Backoff`.
    pub fn start_connect(&mut self, addr: SocketAddr, registry: &mio::Registry) -> Result<()> {
        let transport = TcpTransport::connect(addr)?;
        transport.register(registry, self.token)?;
        self.transport = Some(transport);
        self.broker_addr = Some(addr);
        self.enter(ConnState::ConnectingTcp);
        Ok(())
    }

    /// Socket became writable: either the TCP connect completed (move to
    /// handshake) or the peer became writable mid-handshake/connected (no-op
    /// here; sends happen synchronously through `TcpTransport::send_all`).
    pub fn on_writable(&mut self) -> Result<Option<ConnEvent>> {
        if self.state != ConnState::ConnectingTcp {
            return Ok(None);
        }
        let transport = self.transport.as_ref().ok_or(Error::NotFound)?;
        match transport.take_connect_error()? {
            Some(e) => {
                self.teardown();
                self.enter(ConnState::Backoff);
                Ok(Some(ConnEvent::ConnectFailed(ConnectFailReason::TcpLevel)))
            }
            None => {
                self.send_client_connect()?;
                self.enter(ConnState::ConnectingHandshake);
                Ok(None)
            }
        }
    }

    fn send_client_connect(&mut self) -> Result<()> {
        use crate::codec::cursor::CursorMut;
        use crate::codec::root;

        let msg = self.connect_msg.clone();
        let entry_size = crate::codec::broker::client_entry_size(&msg.client_entry);
        let body_len = crate::config::E133_SCOPE_STRING_PADDED_LENGTH
            + 2
            + crate::config::E133_DOMAIN_STRING_PADDED_LENGTH
            + 1
            + entry_size;
        let total = root::ROOT_PDU_HEADER_SIZE
            + crate::codec::broker::BROKER_PDU_HEADER_SIZE
            + body_len;
        let mut buf = vec![0u8; root::TCP_PREAMBLE_SIZE + total];
        {
            let mut w = CursorMut::new(&mut buf);
            root::pack_tcp_preamble(&mut w)?;
            root::pack_root_layer_header(
                &mut w,
                root::VECTOR_ROOT_BROKER,
                self.local_cid,
                (total) as u32,
            )?;
            crate::codec::broker::pack_broker_pdu_header(
                &mut w,
                crate::codec::broker::VECTOR_BROKER_CONNECT,
                body_len as u32,
            )?;
            crate::codec::broker::pack_client_connect(&mut w, &msg)?;
        }
        self.transport.as_ref().ok_or(Error::NotFound)?.send_all(&buf)?;
        self.last_sent_at = Instant::now();
        Ok(())
    }

    /// Socket became readable: pull bytes, reassemble PDUs, and advance the
    /// handshake or hand completed PDUs up to the caller once connected.
    pub fn on_readable(&mut self) -> Result<Vec<ConnEvent>> {
        let mut events = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match self.transport.as_ref().ok_or(Error::NotFound)?.try_recv(&mut buf) {
                Ok(0) => {
                    events.push(self.fail_connection(DisconnectReason::SocketFailure));
                    return Ok(events);
                }
                Ok(n) => n,
                Err(Error::WouldBlock) => break,
                Err(e) => return Err(e),
            };
            if self.recv_buf.append(&buf[..n]).is_err() {
                events.push(self.fail_connection(DisconnectReason::SocketFailure));
                return Ok(events);
            }
            while let Ok(Some(pdu)) = self.recv_buf.next_pdu() {
                self.last_recv_at = Instant::now();
                if let Some(ev) = self.handle_pdu(pdu) {
                    events.push(ev);
                }
            }
        }
        Ok(events)
    }

    fn handle_pdu(&mut self, pdu: RootLayerPdu) -> Option<ConnEvent> {
        use crate::codec::broker::{self, VECTOR_BROKER_CONNECT_REPLY};
        use crate::codec::cursor::Cursor;
        use crate::codec::root::VECTOR_ROOT_BROKER;

        if self.state == ConnState::ConnectingHandshake && pdu.vector == VECTOR_ROOT_BROKER {
            let mut r = Cursor::new(&pdu.data);
            if let Ok((vector, body_len)) = broker::parse_broker_pdu_header(&mut r) {
                if vector == VECTOR_BROKER_CONNECT_REPLY {
                    let body = r.read_bytes(body_len).ok()?;
                    let mut br = Cursor::new(body);
                    let reply = broker::parse_connect_reply(&mut br).ok()?;
                    self.backoff.reset();
                    self.enter(ConnState::Connected);
                    return Some(ConnEvent::Connected {
                        broker_cid: pdu.sender_cid,
                        reply,
                    });
                }
            }
        }
        if self.state == ConnState::Connected {
            return Some(ConnEvent::Pdu(pdu));
        }
        None
    }

    fn fail_connection(&mut self, reason: DisconnectReason) -> ConnEvent {
        self.teardown();
        self.enter(ConnState::Backoff);
        ConnEvent::Disconnected(reason)
    }

    fn teardown(&mut self) {
        self.transport = None;
    }

    /// Periodic housekeeping: heartbeat emission while connected, timeout
    /// detection, and backoff expiry. Call at a cadence fine enough to
    /// resolve the heartbeat interval (e.g. every second).
    pub fn tick(&mut self, now: Instant, registry: &mio::Registry) -> Result<Vec<ConnEvent>> {
        let mut events = Vec::new();
        match self.state {
            ConnState::Connected => {
                if now.duration_since(self.last_recv_at) > E133_HEARTBEAT_TIMEOUT {
                    events.push(self.fail_connection(DisconnectReason::NoHeartbeat));
                } else if now.duration_since(self.last_sent_at) >= E133_TCP_HEARTBEAT_INTERVAL {
                    self.send_heartbeat()?;
                }
            }
            ConnState::Backoff => {
                if now.duration_since(self.state_entered_at)
                    >= Duration::from_millis(self.backoff.current_ms() as u64)
                {
                    if let Some(addr) = self.broker_addr {
                        self.backoff.next();
                        self.start_connect(addr, registry)?;
                    }
                }
            }
            ConnState::ConnectingTcp | ConnState::ConnectingHandshake => {
                if now.duration_since(self.state_entered_at) > Duration::from_secs(10) {
                    events.push(self.fail_connection(DisconnectReason::SocketFailure));
                }
            }
            ConnState::Inactive => {}
        }
        Ok(events)
    }

    fn send_heartbeat(&mut self) -> Result<()> {
        use crate::codec::broker;
        use crate::codec::cursor::CursorMut;
        use crate::codec::root;

        let total = root::ROOT_PDU_HEADER_SIZE + broker::BROKER_PDU_HEADER_SIZE;
        let mut buf = vec![0u8; root::TCP_PREAMBLE_SIZE + total];
        {
            let mut w = CursorMut::new(&mut buf);
            root::pack_tcp_preamble(&mut w)?;
            root::pack_root_layer_header(&mut w, root::VECTOR_ROOT_BROKER, self.local_cid, total as u32)?;
            broker::pack_broker_pdu_header(&mut w, broker::VECTOR_BROKER_NULL, 0)?;
        }
        self.transport.as_ref().ok_or(Error::NotFound)?.send_all(&buf)?;
        self.last_sent_at = Instant::now();
        Ok(())
    }

    /// Send an already-encoded PDU (root layer and below) over this
    /// connection, e.g. an RPT Request built by the client manager.
    pub fn send_raw(&self, buf: &[u8]) -> Result<()> {
        if self.state != ConnState::Connected {
            return Err(Error::NotFound);
        }
        self.transport.as_ref().ok_or(Error::NotFound)?.send_all(buf)
    }

    /// Gracefully disconnect: send a Disconnect PDU then tear down.
    pub fn disconnect(&mut self, reason: crate::error::DisconnectCode) -> Result<()> {
        use crate::codec::broker;
        use crate::codec::cursor::CursorMut;
        use crate::codec::root;

        if let Some(transport) = &self.transport {
            let body = broker::DisconnectMsg { reason };
            let total = root::ROOT_PDU_HEADER_SIZE + broker::BROKER_PDU_HEADER_SIZE + 2;
            let mut buf = vec![0u8; root::TCP_PREAMBLE_SIZE + total];
            {
                let mut w = CursorMut::new(&mut buf);
                root::pack_tcp_preamble(&mut w)?;
                root::pack_root_layer_header(&mut w, root::VECTOR_ROOT_BROKER, self.local_cid, total as u32)?;
                broker::pack_broker_pdu_header(&mut w, broker::VECTOR_BROKER_DISCONNECT, 2)?;
                broker::pack_disconnect(&mut w, &body)?;
            }
            let _ = transport.send_all(&buf);
            let _ = transport.shutdown();
        }
        self.teardown();
        self.enter(ConnState::Inactive);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::broker::{ClientEntry, ClientEntryData, RptClientType};
    use crate::uid::Uid;

    fn sample_connect_msg() -> ClientConnectMsg {
        ClientConnectMsg {
            scope: "default".into(),
            e133_version: 1,
            search_domain: "local.".into(),
            connect_flags: 0,
            client_entry: ClientEntry {
                client_cid: Cid::new_v4(),
                data: ClientEntryData::Rpt {
                    uid: Uid::dynamic_request(0x6574),
                    client_type: RptClientType::Controller,
                    binding_cid: Cid::nil(),
                },
            },
        }
    }

    #[test]
    fn starts_inactive() {
        let engine = ConnEngine::new(Token(0), Cid::new_v4(), sample_connect_msg());
        assert_eq!(engine.state(), ConnState::Inactive);
    }

    #[test]
    fn send_raw_rejected_unless_connected() {
        let engine = ConnEngine::new(Token(0), Cid::new_v4(), sample_connect_msg());
        assert!(matches!(engine.send_raw(&[1, 2, 3]), Err(Error::NotFound)));
    }
}
