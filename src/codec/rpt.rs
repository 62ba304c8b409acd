// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPT (RDM Packet Transport) PDUs: the Request/Notification/Status messages
//! that carry RDM commands between controllers and devices over a broker.

use crate::codec::cursor::{Cursor, CursorMut};
use crate::error::FramingError;
use crate::uid::Uid;

/// Total size of the RPT PDU header: 3-byte flags+length, 4-byte vector,
/// 20-byte `RptHeader`, 1 reserved byte.
pub const RPT_PDU_HEADER_SIZE: usize = 3 + 4 + 20 + 1;
/// Size of the nested `RptHeader` (src UID, src endpoint, dst UID, dst endpoint, seqno).
pub const RPT_HEADER_SIZE: usize = 6 + 2 + 6 + 2 + 4;
pub const RPT_STATUS_HEADER_SIZE: usize = 5;
pub const REQUEST_NOTIF_PDU_HEADER_SIZE: usize = 7;

pub const VECTOR_RPT_REQUEST: u32 = 0x0000_0001;
pub const VECTOR_RPT_STATUS: u32 = 0x0000_0002;
pub const VECTOR_RPT_NOTIFICATION: u32 = 0x0000_0003;

pub const VECTOR_REQUEST_RDM_CMD: u16 = 0x0001;
pub const VECTOR_NOTIFICATION_RDM_CMD: u16 = 0x0001;

/// RPT Status codes (E1.33 Table A-16 "RPT Status Codes" subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RptStatusCode {
    UnknownRdmUid,
    RdmTimeout,
    RdmInvalidResponse,
    UnknownRptUid,
    UnknownEndpoint,
    BroadcastComplete,
    UnknownVector,
    InvalidMessage,
    InvalidCommandClass,
    BrokerTimeout,
}

impl RptStatusCode {
    pub fn from_wire(code: u16) -> Option<Self> {
        Some(match code {
            0x0000 => RptStatusCode::UnknownRdmUid,
            0x0001 => RptStatusCode::RdmTimeout,
            0x0002 => RptStatusCode::RdmInvalidResponse,
            0x0003 => RptStatusCode::UnknownRptUid,
            0x0004 => RptStatusCode::UnknownEndpoint,
            0x0005 => RptStatusCode::BroadcastComplete,
            0x0006 => RptStatusCode::UnknownVector,
            0x0007 => RptStatusCode::InvalidMessage,
            0x0008 => RptStatusCode::InvalidCommandClass,
            0x0009 => RptStatusCode::BrokerTimeout,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u16 {
        match self {
            RptStatusCode::UnknownRdmUid => 0x0000,
            RptStatusCode::RdmTimeout => 0x0001,
            RptStatusCode::RdmInvalidResponse => 0x0002,
            RptStatusCode::UnknownRptUid => 0x0003,
            RptStatusCode::UnknownEndpoint => 0x0004,
            RptStatusCode::BroadcastComplete => 0x0005,
            RptStatusCode::UnknownVector => 0x0006,
            RptStatusCode::InvalidMessage => 0x0007,
            RptStatusCode::InvalidCommandClass => 0x0008,
            RptStatusCode::BrokerTimeout => 0x0009,
        }
    }
}

/// The 20-byte routing header nested in every RPT PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RptHeader {
    pub source_uid: Uid,
    pub source_endpoint: u16,
    pub dest_uid: Uid,
    pub dest_endpoint: u16,
    pub seqnum: u32,
}

pub fn pack_rpt_header(w: &mut CursorMut<'_>, h: &RptHeader) -> Result<(), FramingError> {
    w.write_bytes(&h.source_uid.to_bytes())?;
    w.write_u16(h.source_endpoint)?;
    w.write_bytes(&h.dest_uid.to_bytes())?;
    w.write_u16(h.dest_endpoint)?;
    w.write_u32(h.seqnum)
}

pub fn parse_rpt_header(r: &mut Cursor<'_>) -> Result<RptHeader, FramingError> {
    let source_uid = Uid::from_bytes(r.read_array::<6>()?);
    let source_endpoint = r.read_u16()?;
    let dest_uid = Uid::from_bytes(r.read_array::<6>()?);
    let dest_endpoint = r.read_u16()?;
    let seqnum = r.read_u32()?;
    Ok(RptHeader {
        source_uid,
        source_endpoint,
        dest_uid,
        dest_endpoint,
        seqnum,
    })
}

/// Pack the RPT PDU header: flags+length over `body_len` bytes of already
/// encoded body, the RPT vector, the routing header, and a reserved byte.
pub fn pack_rpt_pdu_header(
    w: &mut CursorMut<'_>,
    vector: u32,
    header: &RptHeader,
    body_len: u32,
) -> Result<(), FramingError> {
    crate::codec::root::pack_flags_length(w, RPT_PDU_HEADER_SIZE as u32 + body_len)?;
    w.write_u32(vector)?;
    pack_rpt_header(w, header)?;
    w.write_u8(0) // reserved
}

pub fn parse_rpt_pdu_header(
    r: &mut Cursor<'_>,
) -> Result<(u32, RptHeader, usize), FramingError> {
    let total = crate::codec::root::parse_flags_length(r)? as usize;
    if total < RPT_PDU_HEADER_SIZE {
        return Err(FramingError::BadLength);
    }
    let vector = r.read_u32()?;
    let header = parse_rpt_header(r)?;
    let _reserved = r.read_u8()?;
    Ok((vector, header, total - RPT_PDU_HEADER_SIZE))
}

/// Request/Notification PDU wrapper (vector + nested RDM command buffer).
pub fn pack_request_notif_header(
    w: &mut CursorMut<'_>,
    vector: u16,
    body_len: u32,
) -> Result<(), FramingError> {
    crate::codec::root::pack_flags_length(w, REQUEST_NOTIF_PDU_HEADER_SIZE as u32 + body_len)?;
    w.write_u16(vector)
}

pub fn parse_request_notif_header(r: &mut Cursor<'_>) -> Result<(u16, usize), FramingError> {
    let total = crate::codec::root::parse_flags_length(r)? as usize;
    if total < REQUEST_NOTIF_PDU_HEADER_SIZE {
        return Err(FramingError::BadLength);
    }
    let vector = r.read_u16()?;
    Ok((vector, total - REQUEST_NOTIF_PDU_HEADER_SIZE))
}

/// `VECTOR_RPT_STATUS` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RptStatusMsg {
    pub status_code: RptStatusCode,
    pub status_string: String,
}

pub fn pack_rpt_status(w: &mut CursorMut<'_>, msg: &RptStatusMsg) -> Result<(), FramingError> {
    crate::codec::root::pack_flags_length(
        w,
        RPT_STATUS_HEADER_SIZE as u32 + msg.status_string.len() as u32,
    )?;
    w.write_u16(msg.status_code.to_wire())?;
    w.write_bytes(msg.status_string.as_bytes())
}

pub fn parse_rpt_status(r: &mut Cursor<'_>) -> Result<RptStatusMsg, FramingError> {
    let total = crate::codec::root::parse_flags_length(r)? as usize;
    if total < RPT_STATUS_HEADER_SIZE {
        return Err(FramingError::BadLength);
    }
    let status_code = RptStatusCode::from_wire(r.read_u16()?).ok_or(FramingError::BadVector)?;
    let str_len = total - RPT_STATUS_HEADER_SIZE;
    let status_string = String::from_utf8_lossy(r.read_bytes(str_len)?).into_owned();
    Ok(RptStatusMsg {
        status_code,
        status_string,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RptHeader {
        RptHeader {
            source_uid: Uid::new(0x6574, 1),
            source_endpoint: 0,
            dest_uid: Uid::new(0x6574, 2),
            dest_endpoint: 0,
            seqnum: 7,
        }
    }

    #[test]
    fn rpt_header_roundtrip() {
        let h = sample_header();
        let mut buf = [0u8; RPT_HEADER_SIZE];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_rpt_header(&mut w, &h).unwrap();
        }
        let mut r = Cursor::new(&buf);
        assert_eq!(parse_rpt_header(&mut r).unwrap(), h);
    }

    #[test]
    fn rpt_pdu_header_roundtrip() {
        let h = sample_header();
        let mut buf = [0u8; RPT_PDU_HEADER_SIZE];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_rpt_pdu_header(&mut w, VECTOR_RPT_REQUEST, &h, 10).unwrap();
        }
        let mut r = Cursor::new(&buf);
        let (vector, parsed_header, data_len) = parse_rpt_pdu_header(&mut r).unwrap();
        assert_eq!(vector, VECTOR_RPT_REQUEST);
        assert_eq!(parsed_header, h);
        assert_eq!(data_len, 10);
    }

    #[test]
    fn sequence_numbers_monotonic_across_headers() {
        let mut h = sample_header();
        h.seqnum = 1;
        let h2 = RptHeader { seqnum: 2, ..h };
        assert!(h2.seqnum > h.seqnum);
    }

    #[test]
    fn rpt_status_roundtrip() {
        let msg = RptStatusMsg {
            status_code: RptStatusCode::RdmTimeout,
            status_string: "no response".to_string(),
        };
        let mut buf = vec![0u8; RPT_STATUS_HEADER_SIZE + msg.status_string.len()];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_rpt_status(&mut w, &msg).unwrap();
        }
        let mut r = Cursor::new(&buf);
        assert_eq!(parse_rpt_status(&mut r).unwrap(), msg);
    }

    #[test]
    fn status_code_roundtrip_all() {
        for c in [
            RptStatusCode::UnknownRdmUid,
            RptStatusCode::RdmTimeout,
            RptStatusCode::RdmInvalidResponse,
            RptStatusCode::UnknownRptUid,
            RptStatusCode::UnknownEndpoint,
            RptStatusCode::BroadcastComplete,
            RptStatusCode::UnknownVector,
            RptStatusCode::InvalidMessage,
            RptStatusCode::InvalidCommandClass,
            RptStatusCode::BrokerTimeout,
        ] {
            assert_eq!(RptStatusCode::from_wire(c.to_wire()), Some(c));
        }
    }
}
