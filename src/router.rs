// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPT message router (§4.F): parses RPT PDUs out of reassembled root-layer
//! PDUs, reassembles ACK_OVERFLOW response chains, and answers RDM PIDs this
//! library handles without application involvement. `E133_COMPONENT_SCOPE`
//! GET is answered here directly; `E133_TCP_COMMS_STATUS` GET/SET is handed
//! back to the caller as [`RouterAction::TcpCommsStatus`] since answering it
//! correctly needs the full client-wide scope list, which only
//! `client::manager::RdmnetClient` has (one `Router` exists per scope).

use std::collections::HashMap;

use crate::config::{E133_NULL_ENDPOINT, E133_SCOPE_STRING_PADDED_LENGTH};
use crate::codec::cursor::Cursor;
use crate::codec::rdm::{CommandClass, RdmBuffer, ResponseType};
use crate::codec::root::RootLayerPdu as _RootLayerPduMarker; // keeps root module linked for doc xref
use crate::codec::rpt::{self, RptHeader};
use crate::recv_buffer::RootLayerPdu;
use crate::uid::Uid;

const E133_TCP_COMMS_STATUS: u16 = 0x7FED;
const E133_COMPONENT_SCOPE: u16 = 0x7FEF;

/// What the router decided should happen with one incoming root-layer PDU.
pub enum RouterAction {
    /// A complete RDM command/response the application should see.
    DeliverRdm { header: RptHeader, rdm: RdmBuffer },
    /// An RPT Status the application should see.
    DeliverStatus { header: RptHeader, status: rpt::RptStatusMsg },
    /// The router answered a command internally; nothing further to do.
    HandledInternally,
    /// A `TCP_COMMS_STATUS` GET or SET, which needs the full client-wide
    /// scope list `Router` doesn't have access to (§4.F): the caller (the
    /// client/scope manager) must build the reply itself.
    TcpCommsStatus { header: RptHeader, cmd: RdmBuffer },
    /// More ACK_OVERFLOW fragments are expected before the response is complete.
    AwaitingMore,
    /// The PDU wasn't RPT, or failed to parse; caller may log and drop it.
    Ignored,
}

/// Key identifying one in-flight ACK_OVERFLOW reassembly: the conversation
/// is uniquely identified by the peer UID and the RDM transaction number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct OverflowKey {
    source_uid: Uid,
    transaction_num: u8,
}

/// Accumulates ACK_OVERFLOW fragments and answers internally-handled PIDs.
/// One instance per scope connection (overflow chains don't cross scopes).
#[derive(Default)]
pub struct Router {
    overflow: HashMap<OverflowKey, Vec<u8>>,
}

/// What the router produced for an internally-handled command, for the
/// caller to encode and send back over the same connection.
pub struct InternalReply {
    pub header: RptHeader,
    pub rdm: RdmBuffer,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one reassembled root-layer PDU known to carry an RPT vector.
    pub fn handle_pdu(
        &mut self,
        pdu: &RootLayerPdu,
        local_scope: &str,
        local_uid: Uid,
    ) -> (RouterAction, Option<InternalReply>) {
        if pdu.vector != crate::codec::root::VECTOR_ROOT_RPT {
            return (RouterAction::Ignored, None);
        }
        let mut r = Cursor::new(&pdu.data);
        let Ok((vector, header, data_len)) = rpt::parse_rpt_pdu_header(&mut r) else {
            return (RouterAction::Ignored, None);
        };
        let Ok(body) = r.read_bytes(data_len) else {
            return (RouterAction::Ignored, None);
        };

        match vector {
            rpt::VECTOR_RPT_STATUS => {
                let mut br = Cursor::new(body);
                match rpt::parse_rpt_status(&mut br) {
                    Ok(status) => (RouterAction::DeliverStatus { header, status }, None),
                    Err(_) => (RouterAction::Ignored, None),
                }
            }
            rpt::VECTOR_RPT_REQUEST | rpt::VECTOR_RPT_NOTIFICATION => {
                let mut br = Cursor::new(body);
                let Ok((_notif_vector, notif_len)) = rpt::parse_request_notif_header(&mut br)
                else {
                    return (RouterAction::Ignored, None);
                };
                let Ok(rdm_body) = br.read_bytes(notif_len) else {
                    return (RouterAction::Ignored, None);
                };
                // skip the leading VECTOR_RDM_CMD_RDM_DATA sentinel byte.
                if rdm_body.is_empty() {
                    return (RouterAction::Ignored, None);
                }
                let mut rr = Cursor::new(&rdm_body[1..]);
                let Ok(rdm) = crate::codec::rdm::parse_rdm_buffer(&mut rr) else {
                    return (RouterAction::Ignored, None);
                };
                self.route_rdm(header, rdm, local_scope, local_uid)
            }
            _ => (RouterAction::Ignored, None),
        }
    }

    fn route_rdm(
        &mut self,
        header: RptHeader,
        rdm: RdmBuffer,
        local_scope: &str,
        local_uid: Uid,
    ) -> (RouterAction, Option<InternalReply>) {
        if rdm.response_type() == Some(ResponseType::AckOverflow) {
            let key = OverflowKey {
                source_uid: rdm.source_uid,
                transaction_num: rdm.transaction_num,
            };
            self.overflow
                .entry(key)
                .or_default()
                .extend_from_slice(&rdm.param_data);
            return (RouterAction::AwaitingMore, None);
        }

        let mut full = rdm.clone();
        if let Some(mut prefix) = self.take_overflow(&rdm) {
            prefix.extend_from_slice(&rdm.param_data);
            full.param_data = prefix;
        }

        if header.dest_endpoint == E133_NULL_ENDPOINT {
            if full.pid == E133_TCP_COMMS_STATUS
                && matches!(full.command_class, CommandClass::GetCommand | CommandClass::SetCommand)
            {
                return (RouterAction::TcpCommsStatus { header, cmd: full }, None);
            }

            if full.command_class == CommandClass::GetCommand {
                if let Some(reply) = self.handle_internal_get(&header, &full, local_scope, local_uid) {
                    return (RouterAction::HandledInternally, Some(reply));
                }
            }
        }

        (RouterAction::DeliverRdm { header, rdm: full }, None)
    }

    fn take_overflow(&mut self, rdm: &RdmBuffer) -> Option<Vec<u8>> {
        let key = OverflowKey {
            source_uid: rdm.source_uid,
            transaction_num: rdm.transaction_num,
        };
        self.overflow.remove(&key)
    }

    /// `E133_TCP_COMMS_STATUS` and `E133_COMPONENT_SCOPE` GET are answered
    /// without surfacing the command to the application (§4.F, SPEC_FULL.md
    /// supplemented-features item 4).
    fn handle_internal_get(
        &self,
        header: &RptHeader,
        cmd: &RdmBuffer,
        local_scope: &str,
        local_uid: Uid,
    ) -> Option<InternalReply> {
        match cmd.pid {
            E133_COMPONENT_SCOPE => {
                let mut param_data = Vec::with_capacity(2 + E133_SCOPE_STRING_PADDED_LENGTH);
                param_data.extend_from_slice(&1u16.to_be_bytes()); // scope slot 1
                let mut scope_field = [0u8; E133_SCOPE_STRING_PADDED_LENGTH];
                let bytes = local_scope.as_bytes();
                let n = bytes.len().min(E133_SCOPE_STRING_PADDED_LENGTH);
                scope_field[..n].copy_from_slice(&bytes[..n]);
                param_data.extend_from_slice(&scope_field);
                Some(Self::build_ack_reply_for(header, cmd, param_data, local_uid))
            }
            _ => None,
        }
    }

    /// Build an ACK reply to `cmd` carrying `param_data`, addressed back to
    /// its sender. Shared with `client::manager`'s `TCP_COMMS_STATUS`
    /// handling, which needs the same reply shape but with scope-list data
    /// only the manager has access to (§4.F).
    pub(crate) fn build_ack_reply_for(
        header: &RptHeader,
        cmd: &RdmBuffer,
        param_data: Vec<u8>,
        local_uid: Uid,
    ) -> InternalReply {
        let reply_rdm = RdmBuffer {
            source_uid: local_uid,
            dest_uid: cmd.source_uid,
            transaction_num: cmd.transaction_num,
            port_id_or_resp_type: ResponseType::Ack.to_wire(),
            msg_count: 0,
            sub_device: cmd.sub_device,
            command_class: CommandClass::GetCommandResponse,
            pid: cmd.pid,
            param_data,
        };
        let reply_header = RptHeader {
            source_uid: header.dest_uid,
            source_endpoint: header.dest_endpoint,
            dest_uid: header.source_uid,
            dest_endpoint: header.source_endpoint,
            seqnum: header.seqnum,
        };
        InternalReply {
            header: reply_header,
            rdm: reply_rdm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::Cid;
    use crate::codec::cursor::CursorMut;
    use crate::codec::root;

    fn wrap_rpt_request(header: &RptHeader, rdm: &RdmBuffer) -> RootLayerPdu {
        let notif_body_len = 1 + 23 + rdm.param_data.len() + 2;
        let rpt_body_len = rpt::REQUEST_NOTIF_PDU_HEADER_SIZE + notif_body_len;
        let mut buf = vec![0u8; rpt::RPT_PDU_HEADER_SIZE + rpt_body_len];
        {
            let mut w = CursorMut::new(&mut buf);
            rpt::pack_rpt_pdu_header(&mut w, rpt::VECTOR_RPT_REQUEST, header, rpt_body_len as u32)
                .unwrap();
            rpt::pack_request_notif_header(&mut w, rpt::VECTOR_REQUEST_RDM_CMD, notif_body_len as u32)
                .unwrap();
            w.write_u8(crate::codec::rdm::VECTOR_RDM_CMD_RDM_DATA).unwrap();
            crate::codec::rdm::pack_rdm_buffer_checked(&mut w, rdm).unwrap();
        }
        RootLayerPdu {
            vector: root::VECTOR_ROOT_RPT,
            sender_cid: Cid::new_v4(),
            data: buf,
        }
    }

    #[test]
    fn answers_component_scope_get_internally() {
        let local_uid = Uid::new(0x6574, 1);
        let peer_uid = Uid::new(0x6574, 2);
        let header = RptHeader {
            source_uid: peer_uid,
            source_endpoint: 0,
            dest_uid: local_uid,
            dest_endpoint: 0,
            seqnum: 1,
        };
        let cmd = RdmBuffer {
            source_uid: peer_uid,
            dest_uid: local_uid,
            transaction_num: 9,
            port_id_or_resp_type: 1,
            msg_count: 0,
            sub_device: 0,
            command_class: CommandClass::GetCommand,
            pid: E133_COMPONENT_SCOPE,
            param_data: vec![],
        };
        let pdu = wrap_rpt_request(&header, &cmd);
        let mut router = Router::new();
        let (action, reply) = router.handle_pdu(&pdu, "default", local_uid);
        assert!(matches!(action, RouterAction::HandledInternally));
        let reply = reply.unwrap();
        assert_eq!(reply.rdm.command_class, CommandClass::GetCommandResponse);
        assert_eq!(reply.rdm.dest_uid, peer_uid);
    }

    #[test]
    fn delivers_unrecognized_get_to_application() {
        let local_uid = Uid::new(0x6574, 1);
        let peer_uid = Uid::new(0x6574, 2);
        let header = RptHeader {
            source_uid: peer_uid,
            source_endpoint: 0,
            dest_uid: local_uid,
            dest_endpoint: 0,
            seqnum: 1,
        };
        let cmd = RdmBuffer {
            source_uid: peer_uid,
            dest_uid: local_uid,
            transaction_num: 1,
            port_id_or_resp_type: 1,
            msg_count: 0,
            sub_device: 0,
            command_class: CommandClass::GetCommand,
            pid: 0x0060, // DEVICE_INFO, not internally handled
            param_data: vec![],
        };
        let pdu = wrap_rpt_request(&header, &cmd);
        let mut router = Router::new();
        let (action, reply) = router.handle_pdu(&pdu, "default", local_uid);
        assert!(matches!(action, RouterAction::DeliverRdm { .. }));
        assert!(reply.is_none());
    }

    #[test]
    fn tcp_comms_status_delegated_to_caller() {
        let local_uid = Uid::new(0x6574, 1);
        let peer_uid = Uid::new(0x6574, 2);
        let header = RptHeader {
            source_uid: peer_uid,
            source_endpoint: 0,
            dest_uid: local_uid,
            dest_endpoint: 0,
            seqnum: 1,
        };
        let cmd = RdmBuffer {
            source_uid: peer_uid,
            dest_uid: local_uid,
            transaction_num: 3,
            port_id_or_resp_type: 1,
            msg_count: 0,
            sub_device: 0,
            command_class: CommandClass::GetCommand,
            pid: E133_TCP_COMMS_STATUS,
            param_data: vec![],
        };
        let pdu = wrap_rpt_request(&header, &cmd);
        let mut router = Router::new();
        let (action, reply) = router.handle_pdu(&pdu, "default", local_uid);
        assert!(reply.is_none());
        match action {
            RouterAction::TcpCommsStatus { cmd: got, .. } => {
                assert_eq!(got.pid, E133_TCP_COMMS_STATUS);
                assert_eq!(got.command_class, CommandClass::GetCommand);
            }
            _ => panic!("expected TcpCommsStatus action"),
        }
    }

    #[test]
    fn reassembles_ack_overflow_chain() {
        let local_uid = Uid::new(0x6574, 1);
        let peer_uid = Uid::new(0x6574, 2);
        let header = RptHeader {
            source_uid: peer_uid,
            source_endpoint: 0,
            dest_uid: local_uid,
            dest_endpoint: 0,
            seqnum: 1,
        };
        let mut router = Router::new();

        let overflow_fragment = RdmBuffer {
            source_uid: peer_uid,
            dest_uid: local_uid,
            transaction_num: 5,
            port_id_or_resp_type: ResponseType::AckOverflow.to_wire(),
            msg_count: 0,
            sub_device: 0,
            command_class: CommandClass::GetCommandResponse,
            pid: 0x0060,
            param_data: vec![1, 2, 3],
        };
        let pdu1 = wrap_rpt_request(&header, &overflow_fragment);
        let (action1, _) = router.handle_pdu(&pdu1, "default", local_uid);
        assert!(matches!(action1, RouterAction::AwaitingMore));

        let final_fragment = RdmBuffer {
            port_id_or_resp_type: ResponseType::Ack.to_wire(),
            param_data: vec![4, 5],
            ..overflow_fragment
        };
        let pdu2 = wrap_rpt_request(&header, &final_fragment);
        let (action2, _) = router.handle_pdu(&pdu2, "default", local_uid);
        match action2 {
            RouterAction::DeliverRdm { rdm, .. } => {
                assert_eq!(rdm.param_data, vec![1, 2, 3, 4, 5]);
            }
            _ => panic!("expected reassembled RDM delivery"),
        }
    }
}
