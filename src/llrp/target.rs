// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One LLRP target FSM (§4.G), grounded on `llrp_target.c`'s per-netint
//! pending-reply slot (`netint->reply_pending`, `netint->pending_reply_trans_num`)
//! but reworked as an owned-state machine instead of an intrusive list node:
//! the owner keeps one `LlrpTarget` per configured multicast interface (§4.C).

use std::time::{Duration, Instant};

use crate::cid::Cid;
use crate::codec::llrp::{LlrpComponentType, ProbeReplyMsg, ProbeRequestMsg};
use crate::codec::rdm::{response_command_class, CommandClass, RdmBuffer, ResponseType};
use crate::config::{
    LLRP_FILTERVAL_BROKERS_ONLY, LLRP_FILTERVAL_CLIENT_CONN_INACTIVE, LLRP_MAX_BACKOFF_MS,
};
use crate::error::RdmNackReason;
use crate::uid::Uid;

/// One scheduled-but-not-yet-sent Probe Reply.
#[derive(Debug, Clone, Copy)]
struct PendingReply {
    requester_cid: Cid,
    transaction_number: u32,
    deadline: Instant,
}

/// What the target decided to do in response to one inbound datagram or
/// `tick()` call (§4.G). Pure decision state: the per-interface UDP socket
/// driver is responsible for actually encoding and sending the bytes.
#[derive(Debug)]
pub enum LlrpTargetAction {
    /// Nothing to do.
    None,
    /// The randomized reply delay expired; send this Probe Reply now.
    SendProbeReply {
        dest_cid: Cid,
        transaction_number: u32,
        reply: ProbeReplyMsg,
    },
    /// An RDM command addressed to this target, to hand to the application's
    /// synchronous response channel (the same one §4.F uses for RPT).
    DeliverToApplication {
        requester_cid: Cid,
        transaction_number: u32,
        rdm: RdmBuffer,
    },
    /// A fully-formed RDM ACK or NACK, ready to encode and send as one LLRP
    /// RDM Command PDU.
    SendRdmResponse {
        requester_cid: Cid,
        transaction_number: u32,
        rdm: RdmBuffer,
    },
}

/// Per-interface LLRP target state machine. One instance exists per
/// (target × interface) pair per §4.G; all instances for a given target
/// share the same CID/UID/component type and differ only in pending-reply
/// state and which socket they're driven by.
pub struct LlrpTarget {
    cid: Cid,
    uid: Uid,
    component_type: LlrpComponentType,
    connected_to_broker: bool,
    hardware_address: [u8; 6],
    pending: Option<PendingReply>,
}

/// Maximum RDM parameter-data length a single LLRP RDM Command PDU can carry.
/// ACK_OVERFLOW isn't legal in LLRP (§4.G), so a response that would need it
/// is NACKed with `ACTION_NOT_SUPPORTED` instead.
const MAX_LLRP_PARAM_DATA: usize = 231;

impl LlrpTarget {
    pub fn new(
        cid: Cid,
        uid: Uid,
        component_type: LlrpComponentType,
        hardware_address: [u8; 6],
    ) -> Self {
        Self {
            cid,
            uid,
            component_type,
            connected_to_broker: false,
            hardware_address,
            pending: None,
        }
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn has_pending_reply(&self) -> bool {
        self.pending.is_some()
    }

    /// Track broker-connectedness so `CLIENT_CONN_INACTIVE` filtering works;
    /// the owning scope manager calls this on every connect/disconnect (§4.E).
    pub fn set_connected_to_broker(&mut self, connected: bool) {
        self.connected_to_broker = connected;
    }

    fn passes_filter(&self, filter: u16) -> bool {
        if filter & LLRP_FILTERVAL_BROKERS_ONLY != 0
            && self.component_type != LlrpComponentType::Broker
        {
            return false;
        }
        if filter & LLRP_FILTERVAL_CLIENT_CONN_INACTIVE != 0 && self.connected_to_broker {
            return false;
        }
        true
    }

    /// Process an inbound Probe Request. `delay_ms` is the randomized
    /// `[0, LLRP_MAX_BACKOFF_MS]` draw, injected so scheduling is testable;
    /// [`LlrpTarget::handle_probe_request`] draws it from `fastrand`.
    pub fn handle_probe_request_with(
        &mut self,
        req: &ProbeRequestMsg,
        requester_cid: Cid,
        transaction_number: u32,
        now: Instant,
        delay_ms: u64,
    ) {
        if !req.matches(&self.uid) || !self.passes_filter(req.filter) {
            return;
        }
        // A second matching Probe Request arriving during an existing pending
        // delay is coalesced, not used to extend or restart the timer (§4.G).
        if self.pending.is_some() {
            return;
        }
        self.pending = Some(PendingReply {
            requester_cid,
            transaction_number,
            deadline: now + Duration::from_millis(delay_ms),
        });
    }

    pub fn handle_probe_request(
        &mut self,
        req: &ProbeRequestMsg,
        requester_cid: Cid,
        transaction_number: u32,
        now: Instant,
    ) {
        let delay_ms = fastrand::u64(0..=LLRP_MAX_BACKOFF_MS);
        self.handle_probe_request_with(req, requester_cid, transaction_number, now, delay_ms);
    }

    /// Periodic housekeeping: fires the pending Probe Reply once its
    /// randomized delay has elapsed. Call at a cadence fine enough to
    /// resolve `LLRP_MAX_BACKOFF_MS` (e.g. every 50-100ms while a reply is
    /// pending).
    pub fn tick(&mut self, now: Instant) -> LlrpTargetAction {
        match self.pending {
            Some(p) if now >= p.deadline => {
                self.pending = None;
                LlrpTargetAction::SendProbeReply {
                    dest_cid: p.requester_cid,
                    transaction_number: p.transaction_number,
                    reply: ProbeReplyMsg {
                        target_uid: self.uid,
                        hardware_address: self.hardware_address,
                        component_type: self.component_type,
                    },
                }
            }
            _ => LlrpTargetAction::None,
        }
    }

    /// An LLRP RDM Command PDU arrived addressed to `cmd.dest_uid`. Returns
    /// `None` if it isn't addressed to this target (self or broadcast), in
    /// which case the caller drops it silently.
    pub fn handle_rdm_command(
        &self,
        requester_cid: Cid,
        transaction_number: u32,
        cmd: RdmBuffer,
    ) -> Option<LlrpTargetAction> {
        if !self.uid.matches(&cmd.dest_uid) {
            return None;
        }
        Some(LlrpTargetAction::DeliverToApplication {
            requester_cid,
            transaction_number,
            rdm: cmd,
        })
    }

    fn build_nack(&self, cmd: &RdmBuffer, reason: RdmNackReason) -> RdmBuffer {
        RdmBuffer {
            source_uid: self.uid,
            dest_uid: cmd.source_uid,
            transaction_num: cmd.transaction_num,
            port_id_or_resp_type: ResponseType::NackReason.to_wire(),
            msg_count: 0,
            sub_device: cmd.sub_device,
            command_class: response_command_class(cmd.command_class),
            pid: cmd.pid,
            param_data: reason.to_wire().to_be_bytes().to_vec(),
        }
    }

    /// Build the outbound ACK for an application-synthesized response to an
    /// LLRP RDM command, enforcing the single-packet limit LLRP imposes: a
    /// response that doesn't fit in one RDM packet is NACKed with
    /// `ActionNotSupported` instead, since ACK_OVERFLOW isn't legal in LLRP.
    pub fn send_llrp_ack(
        &self,
        requester_cid: Cid,
        transaction_number: u32,
        cmd: &RdmBuffer,
        response_param_data: Vec<u8>,
    ) -> LlrpTargetAction {
        let rdm = if response_param_data.len() > MAX_LLRP_PARAM_DATA {
            self.build_nack(cmd, RdmNackReason::ActionNotSupported)
        } else {
            RdmBuffer {
                source_uid: self.uid,
                dest_uid: cmd.source_uid,
                transaction_num: cmd.transaction_num,
                port_id_or_resp_type: ResponseType::Ack.to_wire(),
                msg_count: 0,
                sub_device: cmd.sub_device,
                command_class: response_command_class(cmd.command_class),
                pid: cmd.pid,
                param_data: response_param_data,
            }
        };
        LlrpTargetAction::SendRdmResponse {
            requester_cid,
            transaction_number,
            rdm,
        }
    }

    /// Build the outbound NACK for an application-rejected LLRP RDM command.
    pub fn send_llrp_nack(
        &self,
        requester_cid: Cid,
        transaction_number: u32,
        cmd: &RdmBuffer,
        reason: RdmNackReason,
    ) -> LlrpTargetAction {
        LlrpTargetAction::SendRdmResponse {
            requester_cid,
            transaction_number,
            rdm: self.build_nack(cmd, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_target() -> LlrpTarget {
        LlrpTarget::new(
            Cid::new_v4(),
            Uid::new(0x6574, 1),
            LlrpComponentType::RptDevice,
            [0x00, 0x11, 0x22, 0x33, 0x44, 0x33],
        )
    }

    fn probe(filter: u16) -> ProbeRequestMsg {
        ProbeRequestMsg {
            lower_uid: Uid::new(0, 0),
            upper_uid: Uid::new(0xFFFF, 0xFFFF_FFFF),
            filter,
            known_uids: vec![],
        }
    }

    /// S4: probe/reply scenario from spec.md §8.
    #[test]
    fn schedules_and_fires_probe_reply() {
        let mut target = sample_target();
        let now = Instant::now();
        let requester = Cid::new_v4();
        target.handle_probe_request_with(&probe(0), requester, 7, now, 1500);
        assert!(target.has_pending_reply());

        // Not yet due.
        assert!(matches!(target.tick(now), LlrpTargetAction::None));

        let later = now + Duration::from_millis(1500);
        match target.tick(later) {
            LlrpTargetAction::SendProbeReply {
                dest_cid,
                transaction_number,
                reply,
            } => {
                assert_eq!(dest_cid, requester);
                assert_eq!(transaction_number, 7);
                assert_eq!(reply.target_uid, Uid::new(0x6574, 1));
                assert_eq!(reply.hardware_address, [0x00, 0x11, 0x22, 0x33, 0x44, 0x33]);
                assert_eq!(reply.component_type, LlrpComponentType::RptDevice);
            }
            other => panic!("expected SendProbeReply, got {other:?}"),
        }
        assert!(!target.has_pending_reply());
    }

    #[test]
    fn coalesces_repeated_probe_during_pending_delay() {
        let mut target = sample_target();
        let now = Instant::now();
        target.handle_probe_request_with(&probe(0), Cid::new_v4(), 1, now, 1000);
        let deadline_before = now + Duration::from_millis(1000);

        // A second matching request 200ms later must not push the deadline out.
        target.handle_probe_request_with(
            &probe(0),
            Cid::new_v4(),
            2,
            now + Duration::from_millis(200),
            1000,
        );
        assert!(matches!(
            target.tick(deadline_before),
            LlrpTargetAction::SendProbeReply { .. }
        ));
    }

    /// S8: filter compliance.
    #[test]
    fn brokers_only_filter_suppresses_non_broker_device() {
        let mut target = sample_target(); // RptDevice
        target.handle_probe_request_with(
            &probe(LLRP_FILTERVAL_BROKERS_ONLY),
            Cid::new_v4(),
            1,
            Instant::now(),
            0,
        );
        assert!(!target.has_pending_reply());
    }

    #[test]
    fn client_conn_inactive_filter_suppresses_connected_controller() {
        let mut target = LlrpTarget::new(
            Cid::new_v4(),
            Uid::new(0x6574, 1),
            LlrpComponentType::RptController,
            [0u8; 6],
        );
        target.set_connected_to_broker(true);
        target.handle_probe_request_with(
            &probe(LLRP_FILTERVAL_CLIENT_CONN_INACTIVE),
            Cid::new_v4(),
            1,
            Instant::now(),
            0,
        );
        assert!(!target.has_pending_reply());
    }

    #[test]
    fn known_uid_suppresses_reply() {
        let mut target = sample_target();
        let mut req = probe(0);
        req.known_uids.push(target.uid());
        target.handle_probe_request_with(&req, Cid::new_v4(), 1, Instant::now(), 0);
        assert!(!target.has_pending_reply());
    }

    #[test]
    fn rdm_command_rejected_when_not_addressed_to_target() {
        let target = sample_target();
        let cmd = RdmBuffer {
            source_uid: Uid::new(0x1234, 1),
            dest_uid: Uid::new(0x1234, 99),
            transaction_num: 1,
            port_id_or_resp_type: 1,
            msg_count: 0,
            sub_device: 0,
            command_class: CommandClass::GetCommand,
            pid: 0x0060,
            param_data: vec![],
        };
        assert!(target.handle_rdm_command(Cid::new_v4(), 1, cmd).is_none());
    }

    #[test]
    fn oversized_response_becomes_nack_not_overflow() {
        let target = sample_target();
        let cmd = RdmBuffer {
            source_uid: Uid::new(0x1234, 1),
            dest_uid: target.uid(),
            transaction_num: 5,
            port_id_or_resp_type: 1,
            msg_count: 0,
            sub_device: 0,
            command_class: CommandClass::GetCommand,
            pid: 0x0060,
            param_data: vec![],
        };
        let oversized = vec![0u8; MAX_LLRP_PARAM_DATA + 1];
        match target.send_llrp_ack(Cid::new_v4(), 1, &cmd, oversized) {
            LlrpTargetAction::SendRdmResponse { rdm, .. } => {
                assert_eq!(
                    rdm.response_type(),
                    Some(ResponseType::NackReason)
                );
                let reason = u16::from_be_bytes([rdm.param_data[0], rdm.param_data[1]]);
                assert_eq!(reason, RdmNackReason::ActionNotSupported.to_wire());
            }
            other => panic!("expected SendRdmResponse, got {other:?}"),
        }
    }

    #[test]
    fn fitting_response_becomes_ack() {
        let target = sample_target();
        let cmd = RdmBuffer {
            source_uid: Uid::new(0x1234, 1),
            dest_uid: target.uid(),
            transaction_num: 5,
            port_id_or_resp_type: 1,
            msg_count: 0,
            sub_device: 0,
            command_class: CommandClass::GetCommand,
            pid: 0x0060,
            param_data: vec![],
        };
        match target.send_llrp_ack(Cid::new_v4(), 1, &cmd, vec![1, 2, 3]) {
            LlrpTargetAction::SendRdmResponse { rdm, .. } => {
                assert_eq!(rdm.response_type(), Some(ResponseType::Ack));
                assert_eq!(rdm.command_class, CommandClass::GetCommandResponse);
            }
            other => panic!("expected SendRdmResponse, got {other:?}"),
        }
    }

    #[test]
    fn explicit_nack_carries_given_reason() {
        let target = sample_target();
        let cmd = RdmBuffer {
            source_uid: Uid::new(0x1234, 1),
            dest_uid: target.uid(),
            transaction_num: 5,
            port_id_or_resp_type: 1,
            msg_count: 0,
            sub_device: 0,
            command_class: CommandClass::SetCommand,
            pid: 0x0060,
            param_data: vec![],
        };
        match target.send_llrp_nack(Cid::new_v4(), 1, &cmd, RdmNackReason::DataOutOfRange) {
            LlrpTargetAction::SendRdmResponse { rdm, .. } => {
                assert_eq!(rdm.response_type(), Some(ResponseType::NackReason));
                assert_eq!(rdm.command_class, CommandClass::SetCommandResponse);
                let reason = u16::from_be_bytes([rdm.param_data[0], rdm.param_data[1]]);
                assert_eq!(reason, RdmNackReason::DataOutOfRange.to_wire());
            }
            other => panic!("expected SendRdmResponse, got {other:?}"),
        }
    }
}
