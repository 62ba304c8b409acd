// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ACN root layer: the TCP preamble and root-layer PDU every RDMnet message
//! over TCP is wrapped in (E1.17 §5).

use crate::cid::Cid;
use crate::codec::cursor::{Cursor, CursorMut};
use crate::error::FramingError;

/// Fixed 12-byte ACN packet identifier carried in the TCP preamble.
pub const ACN_PACKET_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";

/// Size of the TCP preamble block (preamble size + postamble size + ACN id).
pub const TCP_PREAMBLE_SIZE: usize = 16;

/// Root layer vector: this PDU's data is a Broker PDU.
pub const VECTOR_ROOT_BROKER: u32 = 0x0000_0004;
/// Root layer vector: this PDU's data is an RPT PDU.
pub const VECTOR_ROOT_RPT: u32 = 0x0000_0005;
/// Root layer vector: this PDU's data is an EPT PDU.
pub const VECTOR_ROOT_EPT: u32 = 0x0000_0008;
/// Root layer vector: this PDU's data is an LLRP PDU (carried over UDP, no preamble).
pub const VECTOR_ROOT_LLRP: u32 = 0x0000_000A;

/// Minimum size of a root layer PDU header: 3-byte flags+length, 4-byte vector,
/// 16-byte sender CID.
pub const ROOT_PDU_HEADER_SIZE: usize = 3 + 4 + 16;

/// A parsed root layer PDU header plus the byte range of its nested data.
#[derive(Debug, Clone, Copy)]
pub struct RootLayerHeader {
    pub vector: u32,
    pub sender_cid: Cid,
    /// Length of the data following this header, in bytes.
    pub data_len: usize,
}

/// Pack the TCP preamble block ahead of a root-layer PDU.
pub fn pack_tcp_preamble(w: &mut CursorMut<'_>) -> Result<(), FramingError> {
    w.write_u16(TCP_PREAMBLE_SIZE as u16)?;
    w.write_u16(0)?; // postamble size is always 0 on the wire
    w.write_bytes(&ACN_PACKET_IDENTIFIER)
}

/// Parse and validate the TCP preamble block, returning the root-layer PDU
/// offset (immediately following it).
pub fn parse_tcp_preamble(r: &mut Cursor<'_>) -> Result<(), FramingError> {
    let preamble_size = r.read_u16()?;
    let _postamble_size = r.read_u16()?;
    let ident = r.read_array::<12>()?;
    if preamble_size as usize != TCP_PREAMBLE_SIZE || ident != ACN_PACKET_IDENTIFIER {
        return Err(FramingError::BadVector);
    }
    Ok(())
}

/// Pack the 3-byte ACN "flags + length" field: top nibble of the first byte is
/// always `0xF` for RDMnet (the "extended length" form), remaining 20 bits hold
/// the total PDU length including this header.
pub fn pack_flags_length(w: &mut CursorMut<'_>, length: u32) -> Result<(), FramingError> {
    if length > 0x000F_FFFF {
        return Err(FramingError::BadLength);
    }
    let b0 = 0xF0 | ((length >> 16) as u8 & 0x0F);
    w.write_u8(b0)?;
    w.write_u8(((length >> 8) & 0xFF) as u8)?;
    w.write_u8((length & 0xFF) as u8)
}

/// Parse the 3-byte flags+length field, returning the PDU length.
pub fn parse_flags_length(r: &mut Cursor<'_>) -> Result<u32, FramingError> {
    let b0 = r.read_u8()?;
    let b1 = r.read_u8()?;
    let b2 = r.read_u8()?;
    if b0 & 0xF0 != 0xF0 {
        return Err(FramingError::BadLength);
    }
    Ok((((b0 & 0x0F) as u32) << 16) | ((b1 as u32) << 8) | (b2 as u32))
}

/// Pack a root layer PDU header. `length` is the *total* PDU length (header +
/// nested data), matching the wire convention used throughout RDMnet PDUs.
pub fn pack_root_layer_header(
    w: &mut CursorMut<'_>,
    vector: u32,
    sender_cid: Cid,
    length: u32,
) -> Result<(), FramingError> {
    pack_flags_length(w, length)?;
    w.write_u32(vector)?;
    w.write_bytes(&sender_cid.as_bytes())
}

/// Parse a root layer PDU header.
pub fn parse_root_layer_header(r: &mut Cursor<'_>) -> Result<RootLayerHeader, FramingError> {
    let length = parse_flags_length(r)?;
    if (length as usize) < ROOT_PDU_HEADER_SIZE {
        return Err(FramingError::BadLength);
    }
    let vector = r.read_u32()?;
    let sender_cid = Cid::from_bytes(r.read_array::<16>()?);
    Ok(RootLayerHeader {
        vector,
        sender_cid,
        data_len: length as usize - ROOT_PDU_HEADER_SIZE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_roundtrip() {
        let mut buf = [0u8; TCP_PREAMBLE_SIZE];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_tcp_preamble(&mut w).unwrap();
        }
        let mut r = Cursor::new(&buf);
        parse_tcp_preamble(&mut r).unwrap();
    }

    #[test]
    fn bad_preamble_identifier_rejected() {
        let mut buf = [0u8; TCP_PREAMBLE_SIZE];
        buf[4] = b'X';
        let mut r = Cursor::new(&buf);
        assert_eq!(parse_tcp_preamble(&mut r), Err(FramingError::BadVector));
    }

    #[test]
    fn flags_length_roundtrip() {
        let mut buf = [0u8; 3];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_flags_length(&mut w, 1234).unwrap();
        }
        assert_eq!(buf[0] & 0xF0, 0xF0);
        let mut r = Cursor::new(&buf);
        assert_eq!(parse_flags_length(&mut r).unwrap(), 1234);
    }

    #[test]
    fn flags_length_rejects_oversized() {
        let mut buf = [0u8; 3];
        let mut w = CursorMut::new(&mut buf);
        assert_eq!(
            pack_flags_length(&mut w, 0x0010_0000),
            Err(FramingError::BadLength)
        );
    }

    #[test]
    fn root_layer_header_roundtrip() {
        let cid = Cid::new_v4();
        let mut buf = [0u8; ROOT_PDU_HEADER_SIZE];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_root_layer_header(&mut w, VECTOR_ROOT_BROKER, cid, ROOT_PDU_HEADER_SIZE as u32 + 10)
                .unwrap();
        }
        let mut r = Cursor::new(&buf);
        let hdr = parse_root_layer_header(&mut r).unwrap();
        assert_eq!(hdr.vector, VECTOR_ROOT_BROKER);
        assert_eq!(hdr.sender_cid, cid);
        assert_eq!(hdr.data_len, 10);
    }

    #[test]
    fn root_layer_header_rejects_short_length() {
        let mut buf = [0u8; ROOT_PDU_HEADER_SIZE];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_root_layer_header(&mut w, VECTOR_ROOT_BROKER, Cid::nil(), 5).unwrap();
        }
        let mut r = Cursor::new(&buf);
        assert_eq!(parse_root_layer_header(&mut r), Err(FramingError::BadLength));
    }
}
