// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wires [`LlrpTarget`]'s pure decision state to a real UDP multicast
//! socket: one shared receive socket (§4.C), one ref-counted send socket
//! per interface, and one [`LlrpTarget`] per interface (since a probe
//! arriving on interface A must be replied to from interface A, per
//! `llrp_target.c`'s per-netint reply-pending slot this FSM was grounded
//! on).

use std::io;
use std::net::Ipv4Addr;
use std::time::Instant;

use dashmap::DashMap;

use crate::cid::Cid;
use crate::codec::cursor::{Cursor, CursorMut};
use crate::codec::llrp::{
    self, LlrpComponentType, ProbeReplyMsg, LLRP_PDU_HEADER_SIZE, VECTOR_LLRP_PROBE_REPLY,
    VECTOR_LLRP_PROBE_REQUEST, VECTOR_LLRP_RDM_CMD,
};
use crate::codec::rdm::RdmBuffer;
use crate::codec::root::{self, ROOT_PDU_HEADER_SIZE, VECTOR_ROOT_LLRP};
use crate::config::LLRP_PORT;
use crate::error::{Error, FramingError, Result};
use crate::llrp::target::{LlrpTarget, LlrpTargetAction};
use crate::transport::mcast::{self, McastInterface, McastRecvSocket, McastSendSockets};
use crate::uid::Uid;

/// Maximum encoded size of one LLRP datagram this crate sends or expects to
/// receive: root layer header + LLRP PDU header + the largest body (an RDM
/// command, capped at 231 bytes of parameter data by `LlrpTarget`).
const LLRP_DATAGRAM_BUF: usize = ROOT_PDU_HEADER_SIZE + LLRP_PDU_HEADER_SIZE + 256;

/// Lift a wire-framing failure into the library's top-level error type; LLRP
/// datagrams are malformed input, not a resource/argument problem, but
/// [`Error`] has no framing variant of its own (that's `router`'s and
/// `recv_buffer`'s domain over TCP), so it's reported as [`Error::Invalid`].
fn framing_err(e: FramingError) -> Error {
    Error::Invalid(e.to_string())
}

/// Delivered when an inbound LLRP RDM Command PDU is addressed to this
/// target and needs an application-synthesized response, mirroring
/// [`crate::client::ClientCallbacks`]'s RDM delivery but for the
/// UDP-multicast recovery path (§4.G) rather than a broker connection.
pub trait LlrpCallbacks {
    fn rdm_command_received(
        &self,
        requester_cid: Cid,
        transaction_number: u32,
        interface_index: u32,
        rdm: RdmBuffer,
    );
}

/// Owns the LLRP UDP plumbing for one local component (one CID/UID/component
/// type): the shared receive socket, one ref-counted send socket per
/// interface, and one per-interface [`LlrpTarget`] (§4.C/§4.G).
pub struct LlrpManager {
    cid: Cid,
    recv_socket: McastRecvSocket,
    send_sockets: McastSendSockets,
    interfaces: Vec<McastInterface>,
    targets: DashMap<u32, LlrpTarget>,
}

impl LlrpManager {
    /// Bind the shared receive socket, discover the local multicast-capable
    /// interfaces, and create one [`LlrpTarget`] per interface (all sharing
    /// `cid`/`uid`/`component_type`).
    pub fn new(cid: Cid, uid: Uid, component_type: LlrpComponentType) -> io::Result<Self> {
        let recv_socket = McastRecvSocket::bind()?;
        let interfaces = mcast::get_multicast_interfaces_indexed()?;
        let hardware_address = mcast::lowest_hardware_address().unwrap_or([0u8; 6]);

        let targets = DashMap::new();
        if interfaces.is_empty() {
            targets.insert(0, LlrpTarget::new(cid, uid, component_type, hardware_address));
        } else {
            for iface in &interfaces {
                targets.insert(
                    iface.index,
                    LlrpTarget::new(cid, uid, component_type, hardware_address),
                );
            }
        }

        Ok(Self {
            cid,
            recv_socket,
            send_sockets: McastSendSockets::new(),
            interfaces,
            targets,
        })
    }

    /// Propagate broker-connectedness to every interface's target, so
    /// `CLIENT_CONN_INACTIVE` filtering (§4.G) reflects the scope manager's
    /// actual state.
    pub fn set_connected_to_broker(&self, connected: bool) {
        for mut entry in self.targets.iter_mut() {
            entry.value_mut().set_connected_to_broker(connected);
        }
    }

    /// Drain one inbound datagram, if any is pending, and act on it.
    /// Returns `Ok(false)` when there was nothing to read (the caller
    /// should stop polling until the next readiness notification).
    pub fn poll_once(&self, callbacks: &dyn LlrpCallbacks) -> Result<bool> {
        let mut buf = [0u8; LLRP_DATAGRAM_BUF];
        let (n, _src, interface_index) = match self.recv_socket.recv(&mut buf) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(Error::SocketFailure(e)),
        };

        if let Err(e) = self.handle_datagram(&buf[..n], interface_index, callbacks) {
            log::debug!("[LLRP] dropping malformed datagram: {e}");
        }
        Ok(true)
    }

    fn handle_datagram(
        &self,
        data: &[u8],
        interface_index: u32,
        callbacks: &dyn LlrpCallbacks,
    ) -> Result<()> {
        let mut r = Cursor::new(data);
        let root_header = root::parse_root_layer_header(&mut r).map_err(framing_err)?;
        if root_header.vector != VECTOR_ROOT_LLRP {
            return Err(Error::Invalid("root layer vector is not LLRP".into()));
        }
        let (vector, dest_cid, transaction_number, _data_len) =
            llrp::parse_llrp_pdu_header(&mut r).map_err(framing_err)?;

        if !dest_cid.is_nil() && dest_cid != self.cid && dest_cid != Cid::llrp_broadcast() {
            return Ok(());
        }

        let Some(mut target) = self.target_for_interface(interface_index) else {
            return Ok(());
        };

        match vector {
            VECTOR_LLRP_PROBE_REQUEST => {
                let body_len = r.remaining();
                let req = llrp::parse_probe_request(&mut r, body_len).map_err(framing_err)?;
                target.value_mut().handle_probe_request(
                    &req,
                    root_header.sender_cid,
                    transaction_number,
                    Instant::now(),
                );
            }
            VECTOR_LLRP_RDM_CMD => {
                let cmd = llrp::parse_llrp_rdm_cmd(&mut r).map_err(framing_err)?;
                if let Some(action) =
                    target.value().handle_rdm_command(root_header.sender_cid, transaction_number, cmd)
                {
                    if let LlrpTargetAction::DeliverToApplication {
                        requester_cid,
                        transaction_number,
                        rdm,
                    } = action
                    {
                        callbacks.rdm_command_received(
                            requester_cid,
                            transaction_number,
                            interface_index,
                            rdm,
                        );
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Periodic housekeeping: drive every interface's pending-reply timer
    /// and send anything that became due.
    pub fn tick(&self, now: Instant) {
        for mut entry in self.targets.iter_mut() {
            let interface_index = *entry.key();
            let action = entry.value_mut().tick(now);
            drop(entry);
            self.dispatch_action(interface_index, action);
        }
    }

    /// Deliver the application's ACK/NACK for a command surfaced via
    /// [`LlrpCallbacks::rdm_command_received`].
    pub fn send_response(&self, interface_index: u32, action: LlrpTargetAction) {
        self.dispatch_action(interface_index, action);
    }

    fn target_for_interface(
        &self,
        interface_index: u32,
    ) -> Option<dashmap::mapref::one::RefMut<'_, u32, LlrpTarget>> {
        if self.targets.contains_key(&interface_index) {
            return self.targets.get_mut(&interface_index);
        }
        // Interface attribution unavailable (non-Linux, or pktinfo absent):
        // fall back to the sole target when there's exactly one interface.
        if self.targets.len() == 1 {
            let key = *self.targets.iter().next()?.key();
            return self.targets.get_mut(&key);
        }
        None
    }

    fn dispatch_action(&self, interface_index: u32, action: LlrpTargetAction) {
        match action {
            LlrpTargetAction::None | LlrpTargetAction::DeliverToApplication { .. } => {}
            LlrpTargetAction::SendProbeReply {
                dest_cid,
                transaction_number,
                reply,
            } => {
                if let Err(e) = self.send_probe_reply(interface_index, dest_cid, transaction_number, reply) {
                    log::debug!("[LLRP] failed to send probe reply: {e}");
                }
            }
            LlrpTargetAction::SendRdmResponse {
                requester_cid,
                transaction_number,
                rdm,
            } => {
                if let Err(e) =
                    self.send_rdm_response(interface_index, requester_cid, transaction_number, rdm)
                {
                    log::debug!("[LLRP] failed to send RDM response: {e}");
                }
            }
        }
    }

    fn send_rdm_response(
        &self,
        interface_index: u32,
        dest_cid: Cid,
        transaction_number: u32,
        rdm: RdmBuffer,
    ) -> Result<()> {
        let body_len = 26 + rdm.param_data.len();
        let mut body = vec![0u8; body_len];
        {
            let mut w = CursorMut::new(&mut body);
            llrp::pack_llrp_rdm_cmd(&mut w, &rdm).map_err(framing_err)?;
        }
        self.send_llrp_pdu(interface_index, VECTOR_LLRP_RDM_CMD, dest_cid, transaction_number, &body)
    }

    fn send_probe_reply(
        &self,
        interface_index: u32,
        dest_cid: Cid,
        transaction_number: u32,
        reply: ProbeReplyMsg,
    ) -> Result<()> {
        let mut body = [0u8; 13];
        {
            let mut w = CursorMut::new(&mut body);
            llrp::pack_probe_reply(&mut w, &reply).map_err(framing_err)?;
        }
        self.send_llrp_pdu(interface_index, VECTOR_LLRP_PROBE_REPLY, dest_cid, transaction_number, &body)
    }

    fn send_llrp_pdu(
        &self,
        interface_index: u32,
        vector: u32,
        dest_cid: Cid,
        transaction_number: u32,
        body: &[u8],
    ) -> Result<()> {
        let total = ROOT_PDU_HEADER_SIZE + LLRP_PDU_HEADER_SIZE + body.len();
        let mut buf = vec![0u8; total];
        {
            let mut w = CursorMut::new(&mut buf);
            root::pack_root_layer_header(&mut w, VECTOR_ROOT_LLRP, self.cid, total as u32)
                .map_err(framing_err)?;
            llrp::pack_llrp_pdu_header(
                &mut w,
                vector,
                dest_cid,
                transaction_number,
                body.len() as u32,
            )
            .map_err(framing_err)?;
            w.write_bytes(body).map_err(framing_err)?;
        }

        let source_addr = self
            .interfaces
            .iter()
            .find(|i| i.index == interface_index)
            .map(|i| i.addr)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let socket = self
            .send_sockets
            .get_or_create(interface_index, source_addr, 0)
            .map_err(Error::SocketFailure)?;
        let dest = mcast::llrp_multicast_addr(false);
        socket
            .send_to(&buf, std::net::SocketAddr::new(dest.ip(), LLRP_PORT))
            .map_err(Error::SocketFailure)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCallbacks;
    impl LlrpCallbacks for NoCallbacks {
        fn rdm_command_received(
            &self,
            _requester_cid: Cid,
            _transaction_number: u32,
            _interface_index: u32,
            _rdm: RdmBuffer,
        ) {
        }
    }

    #[test]
    fn new_manager_binds_without_error() {
        let manager = LlrpManager::new(Cid::new_v4(), Uid::new(0x6574, 1), LlrpComponentType::RptDevice);
        assert!(manager.is_ok());
    }

    #[test]
    fn tick_with_no_pending_replies_sends_nothing() {
        let manager =
            LlrpManager::new(Cid::new_v4(), Uid::new(0x6574, 1), LlrpComponentType::RptDevice).unwrap();
        manager.tick(Instant::now());
    }

    #[test]
    fn poll_once_returns_false_when_nothing_pending() {
        let manager =
            LlrpManager::new(Cid::new_v4(), Uid::new(0x6574, 1), LlrpComponentType::RptDevice).unwrap();
        assert_eq!(manager.poll_once(&NoCallbacks).unwrap(), false);
    }
}
