// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RDM (E1.20) command/response buffer framing, as carried inside an RPT
//! Request/Notification PDU (`VECTOR_RPT_REQUEST`/`VECTOR_RPT_NOTIFICATION`
//! bodies always hold exactly one RDM command buffer).

use crate::codec::cursor::{Cursor, CursorMut};
use crate::error::FramingError;
use crate::uid::Uid;

/// Wire value of the RDM start code.
pub const RDM_SUB_START_CODE: u8 = 0x01;
/// `VECTOR_RDM_CMD_RDM_DATA`, the sentinel 1-byte vector ahead of every RDM
/// command carried over RPT.
pub const VECTOR_RDM_CMD_RDM_DATA: u8 = 0xCC;

pub const RDM_CMD_PDU_MIN_SIZE: usize = 1 + 24; // vector + minimal RDM message
pub const RDM_CMD_PDU_MAX_SIZE: usize = 1 + 257;

/// RDM command class (E1.20 Table A-2, the subset meaningful at this layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    DiscoveryCommand,
    DiscoveryCommandResponse,
    GetCommand,
    GetCommandResponse,
    SetCommand,
    SetCommandResponse,
}

impl CommandClass {
    pub fn from_wire(v: u8) -> Option<Self> {
        Some(match v {
            0x10 => CommandClass::DiscoveryCommand,
            0x11 => CommandClass::DiscoveryCommandResponse,
            0x20 => CommandClass::GetCommand,
            0x21 => CommandClass::GetCommandResponse,
            0x30 => CommandClass::SetCommand,
            0x31 => CommandClass::SetCommandResponse,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u8 {
        match self {
            CommandClass::DiscoveryCommand => 0x10,
            CommandClass::DiscoveryCommandResponse => 0x11,
            CommandClass::GetCommand => 0x20,
            CommandClass::GetCommandResponse => 0x21,
            CommandClass::SetCommand => 0x30,
            CommandClass::SetCommandResponse => 0x31,
        }
    }

    pub fn is_response(self) -> bool {
        matches!(
            self,
            CommandClass::DiscoveryCommandResponse
                | CommandClass::GetCommandResponse
                | CommandClass::SetCommandResponse
        )
    }
}

/// RDM response type (E1.20 Table A-4), present only when `cc.is_response()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Ack,
    AckTimer,
    NackReason,
    AckOverflow,
}

impl ResponseType {
    pub fn from_wire(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => ResponseType::Ack,
            0x01 => ResponseType::AckTimer,
            0x02 => ResponseType::NackReason,
            0x03 => ResponseType::AckOverflow,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u8 {
        match self {
            ResponseType::Ack => 0x00,
            ResponseType::AckTimer => 0x01,
            ResponseType::NackReason => 0x02,
            ResponseType::AckOverflow => 0x03,
        }
    }
}

/// A fully decoded RDM command or response buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmBuffer {
    pub source_uid: Uid,
    pub dest_uid: Uid,
    pub transaction_num: u8,
    pub port_id_or_resp_type: u8,
    pub msg_count: u8,
    pub sub_device: u16,
    pub command_class: CommandClass,
    pub pid: u16,
    pub param_data: Vec<u8>,
}

impl RdmBuffer {
    pub fn response_type(&self) -> Option<ResponseType> {
        if self.command_class.is_response() {
            ResponseType::from_wire(self.port_id_or_resp_type)
        } else {
            None
        }
    }
}

/// The response command class for a given command class (e.g. `GetCommand`
/// -> `GetCommandResponse`), used wherever a router or client synthesizes
/// an ACK/NACK for a received command (§4.F, §4.G).
pub fn response_command_class(cc: CommandClass) -> CommandClass {
    match cc {
        CommandClass::GetCommand => CommandClass::GetCommandResponse,
        CommandClass::SetCommand => CommandClass::SetCommandResponse,
        CommandClass::DiscoveryCommand => CommandClass::DiscoveryCommandResponse,
        other => other,
    }
}

/// Compute the E1.20 checksum: the sum of every byte in the message (start
/// code through param data inclusive), modulo 65536.
pub fn rdm_checksum(msg: &RdmBuffer) -> u16 {
    let mut sum: u32 = VECTOR_RDM_CMD_RDM_DATA as u32 + RDM_SUB_START_CODE as u32;
    let msg_len = 24 + msg.param_data.len() as u32;
    sum += msg_len;
    for b in msg.dest_uid.to_bytes() {
        sum += b as u32;
    }
    for b in msg.source_uid.to_bytes() {
        sum += b as u32;
    }
    sum += msg.transaction_num as u32;
    sum += msg.port_id_or_resp_type as u32;
    sum += msg.msg_count as u32;
    sum += (msg.sub_device >> 8) as u32 + (msg.sub_device & 0xFF) as u32;
    sum += msg.command_class.to_wire() as u32;
    sum += (msg.pid >> 8) as u32 + (msg.pid & 0xFF) as u32;
    sum += msg.param_data.len() as u32;
    for &b in &msg.param_data {
        sum += b as u32;
    }
    (sum & 0xFFFF) as u16
}

/// Pack a complete RDM buffer with a correct trailing checksum.
pub fn pack_rdm_buffer_checked(w: &mut CursorMut<'_>, msg: &RdmBuffer) -> Result<(), FramingError> {
    w.write_u8(RDM_SUB_START_CODE)?;
    let msg_len = 24 + msg.param_data.len() as u8;
    w.write_u8(msg_len)?;
    w.write_bytes(&msg.dest_uid.to_bytes())?;
    w.write_bytes(&msg.source_uid.to_bytes())?;
    w.write_u8(msg.transaction_num)?;
    w.write_u8(msg.port_id_or_resp_type)?;
    w.write_u8(msg.msg_count)?;
    w.write_u16(msg.sub_device)?;
    w.write_u8(msg.command_class.to_wire())?;
    w.write_u16(msg.pid)?;
    w.write_u8(msg.param_data.len() as u8)?;
    w.write_bytes(&msg.param_data)?;
    w.write_u16(rdm_checksum(msg))
}

pub fn parse_rdm_buffer(r: &mut Cursor<'_>) -> Result<RdmBuffer, FramingError> {
    let sub_start_code = r.read_u8()?;
    if sub_start_code != RDM_SUB_START_CODE {
        return Err(FramingError::BadVector);
    }
    let msg_len = r.read_u8()?;
    if (msg_len as usize) < 24 {
        return Err(FramingError::BadLength);
    }
    let dest_uid = Uid::from_bytes(r.read_array::<6>()?);
    let source_uid = Uid::from_bytes(r.read_array::<6>()?);
    let transaction_num = r.read_u8()?;
    let port_id_or_resp_type = r.read_u8()?;
    let msg_count = r.read_u8()?;
    let sub_device = r.read_u16()?;
    let command_class =
        CommandClass::from_wire(r.read_u8()?).ok_or(FramingError::BadCommandClass)?;
    let pid = r.read_u16()?;
    let pdl = r.read_u8()?;
    let param_data = r.read_bytes(pdl as usize)?.to_vec();
    let checksum = r.read_u16()?;

    let msg = RdmBuffer {
        source_uid,
        dest_uid,
        transaction_num,
        port_id_or_resp_type,
        msg_count,
        sub_device,
        command_class,
        pid,
        param_data,
    };
    if rdm_checksum(&msg) != checksum {
        return Err(FramingError::BadChecksum);
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RdmBuffer {
        RdmBuffer {
            source_uid: Uid::new(0x6574, 1),
            dest_uid: Uid::new(0x6574, 2),
            transaction_num: 5,
            port_id_or_resp_type: 1,
            msg_count: 0,
            sub_device: 0,
            command_class: CommandClass::GetCommand,
            pid: 0x0060, // DEVICE_INFO
            param_data: vec![],
        }
    }

    #[test]
    fn roundtrip_with_correct_checksum() {
        let msg = sample();
        let mut buf = vec![0u8; 26];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_rdm_buffer_checked(&mut w, &msg).unwrap();
        }
        let mut r = Cursor::new(&buf);
        assert_eq!(parse_rdm_buffer(&mut r).unwrap(), msg);
    }

    #[test]
    fn roundtrip_with_param_data() {
        let mut msg = sample();
        msg.command_class = CommandClass::GetCommandResponse;
        msg.port_id_or_resp_type = ResponseType::Ack.to_wire();
        msg.param_data = vec![1, 2, 3, 4];
        let mut buf = vec![0u8; 30];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_rdm_buffer_checked(&mut w, &msg).unwrap();
        }
        let mut r = Cursor::new(&buf);
        let parsed = parse_rdm_buffer(&mut r).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.response_type(), Some(ResponseType::Ack));
    }

    #[test]
    fn bad_checksum_rejected() {
        let msg = sample();
        let mut buf = vec![0u8; 26];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_rdm_buffer_checked(&mut w, &msg).unwrap();
        }
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let mut r = Cursor::new(&buf);
        assert_eq!(parse_rdm_buffer(&mut r), Err(FramingError::BadChecksum));
    }

    #[test]
    fn checksum_changes_when_param_data_changes() {
        let mut a = sample();
        let mut b = sample();
        a.param_data = vec![1];
        b.param_data = vec![2];
        assert_ne!(rdm_checksum(&a), rdm_checksum(&b));
    }
}
