// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LLRP (Low Level Recovery Protocol) PDUs, carried over UDP multicast
//! (E1.33 §9): Probe Request/Reply and the RDM Command wrapper used to
//! recover/configure a component that isn't currently on a broker.

use crate::cid::Cid;
use crate::codec::cursor::{Cursor, CursorMut};
use crate::codec::rdm::RdmBuffer;
use crate::error::FramingError;
use crate::uid::Uid;

pub const VECTOR_LLRP_PROBE_REQUEST: u32 = 0x0000_0001;
pub const VECTOR_LLRP_PROBE_REPLY: u32 = 0x0000_0002;
pub const VECTOR_LLRP_RDM_CMD: u32 = 0x0000_0003;

/// LLRP PDU header: flags+length, vector, 16-byte destination CID, 4-byte
/// transaction number (the field `llrp_target.c` calls `header.transaction_number`,
/// echoed from Probe Request to Probe Reply so a manager can correlate replies).
pub const LLRP_PDU_HEADER_SIZE: usize = 3 + 4 + 16 + 4;

/// Component type carried in a Probe Reply (E1.33 Table A-21).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlrpComponentType {
    RptDevice,
    RptController,
    Broker,
    Unknown,
}

impl LlrpComponentType {
    pub fn from_wire(v: u8) -> Option<Self> {
        Some(match v {
            0 => LlrpComponentType::RptDevice,
            1 => LlrpComponentType::RptController,
            2 => LlrpComponentType::Broker,
            3 => LlrpComponentType::Unknown,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u8 {
        match self {
            LlrpComponentType::RptDevice => 0,
            LlrpComponentType::RptController => 1,
            LlrpComponentType::Broker => 2,
            LlrpComponentType::Unknown => 3,
        }
    }
}

/// `VECTOR_LLRP_PROBE_REQUEST` body: a UID range plus a filter bitmask and
/// the set of known UIDs to exclude from the reply (probe suppression).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequestMsg {
    pub lower_uid: Uid,
    pub upper_uid: Uid,
    pub filter: u16,
    pub known_uids: Vec<Uid>,
}

pub fn pack_probe_request(
    w: &mut CursorMut<'_>,
    msg: &ProbeRequestMsg,
) -> Result<(), FramingError> {
    w.write_bytes(&msg.lower_uid.to_bytes())?;
    w.write_bytes(&msg.upper_uid.to_bytes())?;
    w.write_u16(msg.filter)?;
    for uid in &msg.known_uids {
        w.write_bytes(&uid.to_bytes())?;
    }
    Ok(())
}

pub fn parse_probe_request(
    r: &mut Cursor<'_>,
    data_len: usize,
) -> Result<ProbeRequestMsg, FramingError> {
    let lower_uid = Uid::from_bytes(r.read_array::<6>()?);
    let upper_uid = Uid::from_bytes(r.read_array::<6>()?);
    let filter = r.read_u16()?;
    let known_count = data_len.saturating_sub(14) / 6;
    let mut known_uids = Vec::with_capacity(known_count);
    for _ in 0..known_count {
        known_uids.push(Uid::from_bytes(r.read_array::<6>()?));
    }
    Ok(ProbeRequestMsg {
        lower_uid,
        upper_uid,
        filter,
        known_uids,
    })
}

impl ProbeRequestMsg {
    /// Whether `uid` falls in this request's addressed range and isn't
    /// suppressed by the known-UIDs list (§4.G reply-filtering invariant).
    pub fn matches(&self, uid: &Uid) -> bool {
        let in_range = (self.lower_uid.manu, self.lower_uid.id) <= (uid.manu, uid.id)
            && (uid.manu, uid.id) <= (self.upper_uid.manu, self.upper_uid.id);
        in_range && !self.known_uids.contains(uid)
    }
}

/// `VECTOR_LLRP_PROBE_REPLY` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReplyMsg {
    pub target_uid: Uid,
    pub hardware_address: [u8; 6],
    pub component_type: LlrpComponentType,
}

pub fn pack_probe_reply(w: &mut CursorMut<'_>, msg: &ProbeReplyMsg) -> Result<(), FramingError> {
    w.write_bytes(&msg.target_uid.to_bytes())?;
    w.write_bytes(&msg.hardware_address)?;
    w.write_u8(msg.component_type.to_wire())
}

pub fn parse_probe_reply(r: &mut Cursor<'_>) -> Result<ProbeReplyMsg, FramingError> {
    let target_uid = Uid::from_bytes(r.read_array::<6>()?);
    let hardware_address = r.read_array::<6>()?;
    let component_type =
        LlrpComponentType::from_wire(r.read_u8()?).ok_or(FramingError::BadVector)?;
    Ok(ProbeReplyMsg {
        target_uid,
        hardware_address,
        component_type,
    })
}

/// `VECTOR_LLRP_RDM_CMD` body: wraps a single RDM command/response buffer,
/// same framing as RPT's embedded RDM but without the RPT routing header.
pub fn pack_llrp_rdm_cmd(w: &mut CursorMut<'_>, msg: &RdmBuffer) -> Result<(), FramingError> {
    crate::codec::rdm::pack_rdm_buffer_checked(w, msg)
}

pub fn parse_llrp_rdm_cmd(r: &mut Cursor<'_>) -> Result<RdmBuffer, FramingError> {
    crate::codec::rdm::parse_rdm_buffer(r)
}

/// Pack the LLRP PDU header (flags+length, vector, destination CID,
/// transaction number) ahead of `body_len` bytes of already-encoded body.
pub fn pack_llrp_pdu_header(
    w: &mut CursorMut<'_>,
    vector: u32,
    dest_cid: Cid,
    transaction_number: u32,
    body_len: u32,
) -> Result<(), FramingError> {
    crate::codec::root::pack_flags_length(w, LLRP_PDU_HEADER_SIZE as u32 + body_len)?;
    w.write_u32(vector)?;
    w.write_bytes(&dest_cid.as_bytes())?;
    w.write_u32(transaction_number)
}

pub fn parse_llrp_pdu_header(r: &mut Cursor<'_>) -> Result<(u32, Cid, u32, usize), FramingError> {
    let total = crate::codec::root::parse_flags_length(r)? as usize;
    if total < LLRP_PDU_HEADER_SIZE {
        return Err(FramingError::BadLength);
    }
    let vector = r.read_u32()?;
    let dest_cid = Cid::from_bytes(r.read_array::<16>()?);
    let transaction_number = r.read_u32()?;
    Ok((vector, dest_cid, transaction_number, total - LLRP_PDU_HEADER_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_request_roundtrip() {
        let msg = ProbeRequestMsg {
            lower_uid: Uid::new(0, 0),
            upper_uid: Uid::new(0xFFFF, 0xFFFF_FFFF),
            filter: 0,
            known_uids: vec![Uid::new(0x6574, 1), Uid::new(0x6574, 2)],
        };
        let mut buf = vec![0u8; 14 + msg.known_uids.len() * 6];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_probe_request(&mut w, &msg).unwrap();
        }
        let mut r = Cursor::new(&buf);
        let parsed = parse_probe_request(&mut r, buf.len()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn probe_request_filters_known_uid() {
        let known = Uid::new(0x6574, 1);
        let msg = ProbeRequestMsg {
            lower_uid: Uid::new(0, 0),
            upper_uid: Uid::new(0xFFFF, 0xFFFF_FFFF),
            filter: 0,
            known_uids: vec![known],
        };
        assert!(!msg.matches(&known));
        assert!(msg.matches(&Uid::new(0x6574, 2)));
    }

    #[test]
    fn probe_request_respects_range() {
        let msg = ProbeRequestMsg {
            lower_uid: Uid::new(0x6574, 10),
            upper_uid: Uid::new(0x6574, 20),
            filter: 0,
            known_uids: vec![],
        };
        assert!(!msg.matches(&Uid::new(0x6574, 5)));
        assert!(msg.matches(&Uid::new(0x6574, 15)));
        assert!(!msg.matches(&Uid::new(0x6574, 25)));
    }

    #[test]
    fn probe_reply_roundtrip() {
        let msg = ProbeReplyMsg {
            target_uid: Uid::new(0x6574, 1),
            hardware_address: [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            component_type: LlrpComponentType::RptDevice,
        };
        let mut buf = [0u8; 13];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_probe_reply(&mut w, &msg).unwrap();
        }
        let mut r = Cursor::new(&buf);
        assert_eq!(parse_probe_reply(&mut r).unwrap(), msg);
    }

    #[test]
    fn llrp_pdu_header_roundtrip() {
        let cid = Cid::new_v4();
        let mut buf = [0u8; LLRP_PDU_HEADER_SIZE];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_llrp_pdu_header(&mut w, VECTOR_LLRP_PROBE_REPLY, cid, 7, 13).unwrap();
        }
        let mut r = Cursor::new(&buf);
        let (vector, parsed_cid, txn, data_len) = parse_llrp_pdu_header(&mut r).unwrap();
        assert_eq!(vector, VECTOR_LLRP_PROBE_REPLY);
        assert_eq!(parsed_cid, cid);
        assert_eq!(txn, 7);
        assert_eq!(data_len, 13);
    }
}
