// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection receive reassembly (§4.B): accumulates bytes as they
//! arrive from a TCP stream and yields complete root-layer PDUs once enough
//! bytes have arrived, bounded by [`RDMNET_RECV_DATA_BUF_SIZE`].

use crate::cid::Cid;
use crate::codec::cursor::Cursor;
use crate::codec::root::{self, TCP_PREAMBLE_SIZE};
use crate::config::RDMNET_RECV_DATA_BUF_SIZE;
use crate::error::FramingError;

/// One fully reassembled root-layer PDU: its vector, sender CID, and the raw
/// (unparsed) bytes of its nested data, ready for a family-specific parser.
#[derive(Debug, Clone)]
pub struct RootLayerPdu {
    pub vector: u32,
    pub sender_cid: Cid,
    pub data: Vec<u8>,
}

/// Accumulates inbound bytes for one TCP connection and extracts framed
/// root-layer PDUs. Each connection owns exactly one of these.
pub struct RecvBuffer {
    buf: Vec<u8>,
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append freshly received bytes. Returns an error if doing so would
    /// exceed the buffer's capacity without a complete PDU ever forming
    /// (a malformed or malicious peer flooding partial data).
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), FramingError> {
        if self.buf.len() + bytes.len() > RDMNET_RECV_DATA_BUF_SIZE {
            return Err(FramingError::BadLength);
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Attempt to pull one complete root-layer PDU (including consuming its
    /// TCP preamble) off the front of the buffer. Returns `Ok(None)` if not
    /// enough bytes have arrived yet. On a framing error the offending bytes
    /// are dropped and parsing resumes at the next preamble-sized boundary,
    /// per §7's framing-error recovery policy.
    pub fn next_pdu(&mut self) -> Result<Option<RootLayerPdu>, FramingError> {
        if self.buf.len() < TCP_PREAMBLE_SIZE {
            return Ok(None);
        }
        let mut r = Cursor::new(&self.buf);
        if root::parse_tcp_preamble(&mut r).is_err() {
            // Resynchronize by dropping one byte and letting the caller retry;
            // a genuine peer never sends a bad preamble mid-stream.
            self.buf.drain(0..1);
            return Err(FramingError::BadVector);
        }

        // Need at least the 3-byte flags+length field to know the PDU size.
        if r.remaining() < 3 {
            return Ok(None);
        }
        let peek = r.peek_bytes(3)?;
        let mut len_cursor = Cursor::new(peek);
        let total_len = root::parse_flags_length(&mut len_cursor)? as usize;

        let frame_end = TCP_PREAMBLE_SIZE + total_len;
        if self.buf.len() < frame_end {
            return Ok(None);
        }

        let mut r = Cursor::new(&self.buf[TCP_PREAMBLE_SIZE..frame_end]);
        let header = root::parse_root_layer_header(&mut r)?;
        let data = r.read_bytes(header.data_len)?.to_vec();
        let pdu = RootLayerPdu {
            vector: header.vector,
            sender_cid: header.sender_cid,
            data,
        };
        self.buf.drain(0..frame_end);
        Ok(Some(pdu))
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::cursor::CursorMut;
    use crate::codec::root::{pack_root_layer_header, pack_tcp_preamble, VECTOR_ROOT_BROKER};

    fn frame(vector: u32, cid: Cid, data: &[u8]) -> Vec<u8> {
        let total = root::ROOT_PDU_HEADER_SIZE + data.len();
        let mut buf = vec![0u8; TCP_PREAMBLE_SIZE + total];
        {
            let mut w = CursorMut::new(&mut buf);
            pack_tcp_preamble(&mut w).unwrap();
            pack_root_layer_header(&mut w, vector, cid, total as u32).unwrap();
            w.write_bytes(data).unwrap();
        }
        buf
    }

    #[test]
    fn yields_nothing_until_complete() {
        let cid = Cid::new_v4();
        let full = frame(VECTOR_ROOT_BROKER, cid, &[1, 2, 3, 4]);
        let mut rb = RecvBuffer::new();
        rb.append(&full[..TCP_PREAMBLE_SIZE + 2]).unwrap();
        assert!(rb.next_pdu().unwrap().is_none());
    }

    #[test]
    fn reassembles_split_across_multiple_appends() {
        let cid = Cid::new_v4();
        let full = frame(VECTOR_ROOT_BROKER, cid, &[9, 8, 7]);
        let mut rb = RecvBuffer::new();
        let (first, second) = full.split_at(5);
        rb.append(first).unwrap();
        assert!(rb.next_pdu().unwrap().is_none());
        rb.append(second).unwrap();
        let pdu = rb.next_pdu().unwrap().unwrap();
        assert_eq!(pdu.vector, VECTOR_ROOT_BROKER);
        assert_eq!(pdu.sender_cid, cid);
        assert_eq!(pdu.data, vec![9, 8, 7]);
        assert!(rb.is_empty());
    }

    #[test]
    fn handles_back_to_back_pdus() {
        let cid = Cid::new_v4();
        let mut combined = frame(VECTOR_ROOT_BROKER, cid, &[1]);
        combined.extend(frame(VECTOR_ROOT_BROKER, cid, &[2, 2]));
        let mut rb = RecvBuffer::new();
        rb.append(&combined).unwrap();
        let first = rb.next_pdu().unwrap().unwrap();
        assert_eq!(first.data, vec![1]);
        let second = rb.next_pdu().unwrap().unwrap();
        assert_eq!(second.data, vec![2, 2]);
        assert!(rb.next_pdu().unwrap().is_none());
    }

    #[test]
    fn rejects_overflowing_append() {
        let mut rb = RecvBuffer::new();
        let huge = vec![0u8; RDMNET_RECV_DATA_BUF_SIZE + 1];
        assert_eq!(rb.append(&huge), Err(FramingError::BadLength));
    }
}
