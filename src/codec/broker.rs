// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker protocol messages (E1.33 §7): client connection handshake, client
//! lists, dynamic UID assignment, and disconnection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::cid::Cid;
use crate::codec::cursor::{read_padded_str, Cursor, CursorMut};
use crate::config::E133_SCOPE_STRING_PADDED_LENGTH;
use crate::error::{ConnectStatus, DisconnectCode, FramingError};
use crate::uid::Uid;

pub const BROKER_PDU_HEADER_SIZE: usize = 3 + 2;
pub const CLIENT_ENTRY_HEADER_SIZE: usize = 3 + 4 + 16;
pub const RPT_CLIENT_ENTRY_DATA_SIZE: usize = 6 + 1 + 16;
pub const EPT_PROTOCOL_ENTRY_SIZE: usize = 2 + 2 + 16 + 2 + 16;

pub const VECTOR_BROKER_CONNECT: u16 = 0x0001;
pub const VECTOR_BROKER_CONNECT_REPLY: u16 = 0x0002;
pub const VECTOR_BROKER_CLIENT_ENTRY_UPDATE: u16 = 0x0003;
pub const VECTOR_BROKER_REDIRECT_V4: u16 = 0x0004;
pub const VECTOR_BROKER_REDIRECT_V6: u16 = 0x0005;
pub const VECTOR_BROKER_FETCH_CLIENT_LIST: u16 = 0x0006;
pub const VECTOR_BROKER_CONNECTED_CLIENT_LIST: u16 = 0x0007;
pub const VECTOR_BROKER_CLIENT_ADD: u16 = 0x0008;
pub const VECTOR_BROKER_CLIENT_REMOVE: u16 = 0x0009;
pub const VECTOR_BROKER_CLIENT_ENTRY_CHANGE: u16 = 0x000A;
pub const VECTOR_BROKER_REQUEST_DYNAMIC_UIDS: u16 = 0x000B;
pub const VECTOR_BROKER_ASSIGNED_DYNAMIC_UIDS: u16 = 0x000C;
pub const VECTOR_BROKER_FETCH_DYNAMIC_UID_LIST: u16 = 0x000D;
pub const VECTOR_BROKER_DISCONNECT: u16 = 0x000E;
pub const VECTOR_BROKER_NULL: u16 = 0x000F;

/// Client protocol type, carried in a Client Entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProtocol {
    Rpt = 0x0000_0005,
    Ept = 0x0000_000B,
}

/// RPT client type, carried in an RPT client entry's data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RptClientType {
    Device,
    Controller,
}

impl RptClientType {
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(RptClientType::Device),
            1 => Some(RptClientType::Controller),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            RptClientType::Device => 0,
            RptClientType::Controller => 1,
        }
    }
}

/// A client entry as carried in Client Connect, Client List, and Client Entry
/// Update messages. RPT entries carry a UID/type/binding CID; EPT entries
/// carry a list of supported sub-protocols (kept opaque per SPEC_FULL.md).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEntryData {
    Rpt {
        uid: Uid,
        client_type: RptClientType,
        binding_cid: Cid,
    },
    Ept {
        protocols: Vec<(u16, Cid)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntry {
    pub client_cid: Cid,
    pub data: ClientEntryData,
}

fn client_entry_protocol(entry: &ClientEntry) -> ClientProtocol {
    match entry.data {
        ClientEntryData::Rpt { .. } => ClientProtocol::Rpt,
        ClientEntryData::Ept { .. } => ClientProtocol::Ept,
    }
}

fn client_entry_data_len(entry: &ClientEntry) -> usize {
    match &entry.data {
        ClientEntryData::Rpt { .. } => RPT_CLIENT_ENTRY_DATA_SIZE,
        ClientEntryData::Ept { protocols } => protocols.len() * EPT_PROTOCOL_ENTRY_SIZE,
    }
}

pub fn client_entry_size(entry: &ClientEntry) -> usize {
    CLIENT_ENTRY_HEADER_SIZE + client_entry_data_len(entry)
}

pub fn pack_client_entry(w: &mut CursorMut<'_>, entry: &ClientEntry) -> Result<(), FramingError> {
    let total = client_entry_size(entry) as u32;
    crate::codec::root::pack_flags_length(w, total)?;
    w.write_u32(client_entry_protocol(entry) as u32)?;
    w.write_bytes(&entry.client_cid.as_bytes())?;
    match &entry.data {
        ClientEntryData::Rpt {
            uid,
            client_type,
            binding_cid,
        } => {
            w.write_bytes(&uid.to_bytes())?;
            w.write_u8(client_type.to_wire())?;
            w.write_bytes(&binding_cid.as_bytes())?;
        }
        ClientEntryData::Ept { protocols } => {
            for (vector, cid) in protocols {
                w.write_u16(*vector)?;
                w.write_u16(EPT_PROTOCOL_ENTRY_SIZE as u16)?;
                w.write_bytes(&cid.as_bytes())?;
                // protocol string field intentionally left opaque/unused (zero-filled).
                w.write_u16(0)?;
                w.write_bytes(&[0u8; 16])?;
            }
        }
    }
    Ok(())
}

pub fn parse_client_entry(r: &mut Cursor<'_>) -> Result<ClientEntry, FramingError> {
    let total = crate::codec::root::parse_flags_length(r)? as usize;
    if total < CLIENT_ENTRY_HEADER_SIZE {
        return Err(FramingError::BadLength);
    }
    let vector = r.read_u32()?;
    let client_cid = Cid::from_bytes(r.read_array::<16>()?);
    let data_len = total - CLIENT_ENTRY_HEADER_SIZE;
    let data = if vector == ClientProtocol::Rpt as u32 {
        if data_len < RPT_CLIENT_ENTRY_DATA_SIZE {
            return Err(FramingError::ShortBuffer);
        }
        let uid = Uid::from_bytes(r.read_array::<6>()?);
        let client_type =
            RptClientType::from_wire(r.read_u8()?).ok_or(FramingError::BadVector)?;
        let binding_cid = Cid::from_bytes(r.read_array::<16>()?);
        ClientEntryData::Rpt {
            uid,
            client_type,
            binding_cid,
        }
    } else if vector == ClientProtocol::Ept as u32 {
        let count = data_len / EPT_PROTOCOL_ENTRY_SIZE;
        let mut protocols = Vec::with_capacity(count);
        for _ in 0..count {
            let pvector = r.read_u16()?;
            let _len = r.read_u16()?;
            let cid = Cid::from_bytes(r.read_array::<16>()?);
            let _strlen = r.read_u16()?;
            let _reserved = r.read_array::<16>()?;
            protocols.push((pvector, cid));
        }
        ClientEntryData::Ept { protocols }
    } else {
        r.read_bytes(data_len)?;
        return Err(FramingError::BadVector);
    };
    Ok(ClientEntry { client_cid, data })
}

/// `VECTOR_BROKER_CONNECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnectMsg {
    pub scope: String,
    pub e133_version: u16,
    pub search_domain: String,
    pub connect_flags: u8,
    pub client_entry: ClientEntry,
}

pub fn pack_client_connect(
    w: &mut CursorMut<'_>,
    msg: &ClientConnectMsg,
) -> Result<(), FramingError> {
    w.write_padded_str(&msg.scope, E133_SCOPE_STRING_PADDED_LENGTH)?;
    w.write_u16(msg.e133_version)?;
    w.write_padded_str(
        &msg.search_domain,
        crate::config::E133_DOMAIN_STRING_PADDED_LENGTH,
    )?;
    w.write_u8(msg.connect_flags)?;
    pack_client_entry(w, &msg.client_entry)
}

pub fn parse_client_connect(r: &mut Cursor<'_>) -> Result<ClientConnectMsg, FramingError> {
    let scope = read_padded_str(r.read_bytes(E133_SCOPE_STRING_PADDED_LENGTH)?).to_string();
    let e133_version = r.read_u16()?;
    let search_domain =
        read_padded_str(r.read_bytes(crate::config::E133_DOMAIN_STRING_PADDED_LENGTH)?)
            .to_string();
    let connect_flags = r.read_u8()?;
    let client_entry = parse_client_entry(r)?;
    Ok(ClientConnectMsg {
        scope,
        e133_version,
        search_domain,
        connect_flags,
        client_entry,
    })
}

/// `VECTOR_BROKER_CONNECT_REPLY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectReplyMsg {
    pub connect_status: ConnectStatus,
    pub e133_version: u16,
    pub broker_uid: Uid,
    pub client_uid: Uid,
}

pub fn pack_connect_reply(
    w: &mut CursorMut<'_>,
    msg: &ConnectReplyMsg,
) -> Result<(), FramingError> {
    w.write_u16(msg.connect_status.to_wire())?;
    w.write_u16(msg.e133_version)?;
    w.write_bytes(&msg.broker_uid.to_bytes())?;
    w.write_bytes(&msg.client_uid.to_bytes())
}

pub fn parse_connect_reply(r: &mut Cursor<'_>) -> Result<ConnectReplyMsg, FramingError> {
    let connect_status =
        ConnectStatus::from_wire(r.read_u16()?).ok_or(FramingError::BadVector)?;
    let e133_version = r.read_u16()?;
    let broker_uid = Uid::from_bytes(r.read_array::<6>()?);
    let client_uid = Uid::from_bytes(r.read_array::<6>()?);
    Ok(ConnectReplyMsg {
        connect_status,
        e133_version,
        broker_uid,
        client_uid,
    })
}

/// `VECTOR_BROKER_CLIENT_ENTRY_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntryUpdateMsg {
    pub connect_flags: u8,
    pub client_entry: ClientEntry,
}

pub fn pack_client_entry_update(
    w: &mut CursorMut<'_>,
    msg: &ClientEntryUpdateMsg,
) -> Result<(), FramingError> {
    w.write_u8(msg.connect_flags)?;
    pack_client_entry(w, &msg.client_entry)
}

pub fn parse_client_entry_update(r: &mut Cursor<'_>) -> Result<ClientEntryUpdateMsg, FramingError> {
    let connect_flags = r.read_u8()?;
    let client_entry = parse_client_entry(r)?;
    Ok(ClientEntryUpdateMsg {
        connect_flags,
        client_entry,
    })
}

/// `VECTOR_BROKER_REDIRECT_V4` / `VECTOR_BROKER_REDIRECT_V6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRedirectMsg {
    pub addr: SocketAddr,
}

pub fn pack_client_redirect(
    w: &mut CursorMut<'_>,
    msg: &ClientRedirectMsg,
) -> Result<(), FramingError> {
    match msg.addr.ip() {
        IpAddr::V4(v4) => {
            w.write_bytes(&v4.octets())?;
        }
        IpAddr::V6(v6) => {
            w.write_bytes(&v6.octets())?;
        }
    }
    w.write_u16(msg.addr.port())
}

pub fn parse_client_redirect_v4(r: &mut Cursor<'_>) -> Result<ClientRedirectMsg, FramingError> {
    let octets = r.read_array::<4>()?;
    let port = r.read_u16()?;
    Ok(ClientRedirectMsg {
        addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port),
    })
}

pub fn parse_client_redirect_v6(r: &mut Cursor<'_>) -> Result<ClientRedirectMsg, FramingError> {
    let octets = r.read_array::<16>()?;
    let port = r.read_u16()?;
    Ok(ClientRedirectMsg {
        addr: SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port),
    })
}

/// A list of client entries, used by Connected Client List / Client Add /
/// Client Remove / Client Entry Change, carrying a `more_coming` flag for
/// ACK_OVERFLOW-style partial-list streaming.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientList {
    pub entries: Vec<ClientEntry>,
    pub more_coming: bool,
}

pub fn pack_client_list(w: &mut CursorMut<'_>, list: &ClientList) -> Result<(), FramingError> {
    for entry in &list.entries {
        pack_client_entry(w, entry)?;
    }
    Ok(())
}

pub fn parse_client_list(r: &mut Cursor<'_>, data_len: usize) -> Result<ClientList, FramingError> {
    let start = r.position();
    let mut entries = Vec::new();
    while r.position() - start < data_len {
        entries.push(parse_client_entry(r)?);
    }
    Ok(ClientList {
        entries,
        more_coming: false,
    })
}

/// One requested dynamic UID assignment: the manufacturer ID the device is
/// requesting under, keyed by a responder ID so the reply can match it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicUidRequest {
    pub manu_id: u16,
    pub rid: Cid,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DynamicUidRequestList {
    pub requests: Vec<DynamicUidRequest>,
    pub more_coming: bool,
}

pub fn pack_dynamic_uid_request_list(
    w: &mut CursorMut<'_>,
    list: &DynamicUidRequestList,
) -> Result<(), FramingError> {
    for req in &list.requests {
        w.write_u16(req.manu_id)?;
        w.write_bytes(&[0u8; 4])?; // reserved device-ID half, always requested as zero
        w.write_bytes(&req.rid.as_bytes())?;
    }
    Ok(())
}

pub fn parse_dynamic_uid_request_list(
    r: &mut Cursor<'_>,
    data_len: usize,
) -> Result<DynamicUidRequestList, FramingError> {
    const ENTRY_SIZE: usize = 2 + 4 + 16;
    let count = data_len / ENTRY_SIZE;
    let mut requests = Vec::with_capacity(count);
    for _ in 0..count {
        let manu_id = r.read_u16()?;
        let _reserved = r.read_array::<4>()?;
        let rid = Cid::from_bytes(r.read_array::<16>()?);
        requests.push(DynamicUidRequest { manu_id, rid });
    }
    Ok(DynamicUidRequestList {
        requests,
        more_coming: false,
    })
}

/// One assignment result, keyed back to the requesting RID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicUidAssignment {
    pub rid: Cid,
    pub uid: Uid,
    /// `None` means the assignment succeeded; `Some` carries the NACK reason.
    pub status: Option<crate::error::RdmNackReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DynamicUidAssignmentList {
    pub assignments: Vec<DynamicUidAssignment>,
    pub more_coming: bool,
}

pub fn pack_dynamic_uid_assignment_list(
    w: &mut CursorMut<'_>,
    list: &DynamicUidAssignmentList,
) -> Result<(), FramingError> {
    for a in &list.assignments {
        w.write_bytes(&a.uid.to_bytes())?;
        w.write_bytes(&a.rid.as_bytes())?;
        w.write_u16(a.status.map(|s| s.to_wire()).unwrap_or(0))?;
    }
    Ok(())
}

pub fn parse_dynamic_uid_assignment_list(
    r: &mut Cursor<'_>,
    data_len: usize,
) -> Result<DynamicUidAssignmentList, FramingError> {
    const ENTRY_SIZE: usize = 6 + 16 + 2;
    let count = data_len / ENTRY_SIZE;
    let mut assignments = Vec::with_capacity(count);
    for _ in 0..count {
        let uid = Uid::from_bytes(r.read_array::<6>()?);
        let rid = Cid::from_bytes(r.read_array::<16>()?);
        let status_code = r.read_u16()?;
        let status = if status_code == 0 {
            None
        } else {
            Some(crate::error::RdmNackReason::from_wire(status_code).unwrap_or(
                crate::error::RdmNackReason::HardwareFault,
            ))
        };
        assignments.push(DynamicUidAssignment { rid, uid, status });
    }
    Ok(DynamicUidAssignmentList {
        assignments,
        more_coming: false,
    })
}

/// `VECTOR_BROKER_FETCH_DYNAMIC_UID_LIST` request: a bare list of RIDs to
/// resolve to currently-assigned UIDs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchDynamicUidList {
    pub rids: Vec<Cid>,
}

pub fn pack_fetch_dynamic_uid_list(
    w: &mut CursorMut<'_>,
    msg: &FetchDynamicUidList,
) -> Result<(), FramingError> {
    for rid in &msg.rids {
        w.write_bytes(&rid.as_bytes())?;
    }
    Ok(())
}

pub fn parse_fetch_dynamic_uid_list(
    r: &mut Cursor<'_>,
    data_len: usize,
) -> Result<FetchDynamicUidList, FramingError> {
    let count = data_len / 16;
    let mut rids = Vec::with_capacity(count);
    for _ in 0..count {
        rids.push(Cid::from_bytes(r.read_array::<16>()?));
    }
    Ok(FetchDynamicUidList { rids })
}

/// `VECTOR_BROKER_DISCONNECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectMsg {
    pub reason: DisconnectCode,
}

pub fn pack_disconnect(w: &mut CursorMut<'_>, msg: &DisconnectMsg) -> Result<(), FramingError> {
    w.write_u16(msg.reason.to_wire())
}

pub fn parse_disconnect(r: &mut Cursor<'_>) -> Result<DisconnectMsg, FramingError> {
    let reason = DisconnectCode::from_wire(r.read_u16()?).ok_or(FramingError::BadVector)?;
    Ok(DisconnectMsg { reason })
}

/// Pack a Broker PDU header (flags+length, vector) ahead of `body_len` bytes
/// of already-encoded body.
pub fn pack_broker_pdu_header(
    w: &mut CursorMut<'_>,
    vector: u16,
    body_len: u32,
) -> Result<(), FramingError> {
    crate::codec::root::pack_flags_length(w, BROKER_PDU_HEADER_SIZE as u32 + body_len)?;
    w.write_u16(vector)
}

/// Parse a Broker PDU header, returning `(vector, body_len)`.
pub fn parse_broker_pdu_header(r: &mut Cursor<'_>) -> Result<(u16, usize), FramingError> {
    let total = crate::codec::root::parse_flags_length(r)? as usize;
    if total < BROKER_PDU_HEADER_SIZE {
        return Err(FramingError::BadLength);
    }
    let vector = r.read_u16()?;
    Ok((vector, total - BROKER_PDU_HEADER_SIZE))
}
