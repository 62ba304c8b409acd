// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! EPT (Extensible Packet Transport) PDUs: an opaque, CID-addressed sibling
//! to RPT for non-RDM data exchange (E1.33 §8).

use crate::cid::Cid;
use crate::codec::cursor::{Cursor, CursorMut};
use crate::error::FramingError;

pub const VECTOR_EPT_DATA: u32 = 0x0000_0001;
pub const VECTOR_EPT_STATUS: u32 = 0x0000_0002;

/// EPT status codes (E1.33 Table A-16 "EPT Status Codes" subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EptStatusCode {
    UnknownCid,
    UnknownVector,
}

impl EptStatusCode {
    pub fn from_wire(v: u16) -> Option<Self> {
        match v {
            0x0000 => Some(EptStatusCode::UnknownCid),
            0x0001 => Some(EptStatusCode::UnknownVector),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u16 {
        match self {
            EptStatusCode::UnknownCid => 0x0000,
            EptStatusCode::UnknownVector => 0x0001,
        }
    }
}

/// `VECTOR_EPT_DATA`: opaque payload addressed to a destination CID, tagged
/// with a sub-protocol vector the two EPT endpoints agree on out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EptDataMsg {
    pub dest_cid: Cid,
    pub sub_protocol_vector: u16,
    pub data: Vec<u8>,
}

pub fn pack_ept_data(w: &mut CursorMut<'_>, msg: &EptDataMsg) -> Result<(), FramingError> {
    crate::codec::root::pack_flags_length(
        w,
        (16 + 2 + msg.data.len()) as u32 + 3 + 4,
    )?;
    w.write_u32(VECTOR_EPT_DATA)?;
    w.write_bytes(&msg.dest_cid.as_bytes())?;
    w.write_u16(msg.sub_protocol_vector)?;
    w.write_bytes(&msg.data)
}

pub fn parse_ept_data(r: &mut Cursor<'_>) -> Result<EptDataMsg, FramingError> {
    let total = crate::codec::root::parse_flags_length(r)? as usize;
    let header_len = 3 + 4;
    if total < header_len + 16 + 2 {
        return Err(FramingError::BadLength);
    }
    let vector = r.read_u32()?;
    if vector != VECTOR_EPT_DATA {
        return Err(FramingError::BadVector);
    }
    let dest_cid = Cid::from_bytes(r.read_array::<16>()?);
    let sub_protocol_vector = r.read_u16()?;
    let data_len = total - header_len - 16 - 2;
    let data = r.read_bytes(data_len)?.to_vec();
    Ok(EptDataMsg {
        dest_cid,
        sub_protocol_vector,
        data,
    })
}

/// `VECTOR_EPT_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EptStatusMsg {
    pub status_code: EptStatusCode,
    pub status_string: String,
}

pub fn pack_ept_status(w: &mut CursorMut<'_>, msg: &EptStatusMsg) -> Result<(), FramingError> {
    crate::codec::root::pack_flags_length(w, (2 + msg.status_string.len()) as u32 + 3 + 4)?;
    w.write_u32(VECTOR_EPT_STATUS)?;
    w.write_u16(msg.status_code.to_wire())?;
    w.write_bytes(msg.status_string.as_bytes())
}

pub fn parse_ept_status(r: &mut Cursor<'_>) -> Result<EptStatusMsg, FramingError> {
    let total = crate::codec::root::parse_flags_length(r)? as usize;
    let header_len = 3 + 4;
    if total < header_len + 2 {
        return Err(FramingError::BadLength);
    }
    let vector = r.read_u32()?;
    if vector != VECTOR_EPT_STATUS {
        return Err(FramingError::BadVector);
    }
    let status_code = EptStatusCode::from_wire(r.read_u16()?).ok_or(FramingError::BadVector)?;
    let str_len = total - header_len - 2;
    let status_string = String::from_utf8_lossy(r.read_bytes(str_len)?).into_owned();
    Ok(EptStatusMsg {
        status_code,
        status_string,
    })
}
