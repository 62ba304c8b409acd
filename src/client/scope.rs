// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-scope state: the scope string/static-broker configuration, the
//! connection engine driving it, and the UID this client holds within it
//! (dynamic until the broker assigns one, §4.E).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};

use std::sync::atomic::AtomicU16;

use arc_swap::ArcSwap;

use crate::cid::Cid;
use crate::client::handle::ScopeHandle;
use crate::codec::broker::{ClientEntryData, RptClientType};
use crate::conn::ConnEngine;
use crate::discovery::DiscoveryHandle;
use crate::router::Router;
use crate::uid::Uid;

/// A scope entry's externally observable lifecycle state (§3 Data Model).
/// Transitions happen only under the owning client's scope-map entry lock
/// (the `DashMap` shard guard `client::manager::RdmnetClient` holds while
/// mutating a [`ScopeEntry`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Inactive,
    /// Awaiting broker discovery events for a dynamic (non-static-address) scope.
    Discovery,
    /// TCP connect and/or the Broker Connect handshake is underway.
    Connecting,
    /// Heartbeat running; the scope has a live broker connection.
    Connected,
    /// Torn down but not yet reclaimed; no new callbacks will originate for it.
    MarkedForDestruction,
}

/// A scope's UID assignment: static (fixed at configuration time) or dynamic
/// (requested from the broker, resolved once `AssignedDynamicUids` arrives).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeUid {
    Static(Uid),
    PendingDynamic,
    Dynamic(Uid),
}

impl ScopeUid {
    pub fn current(&self) -> Option<Uid> {
        match self {
            ScopeUid::Static(u) | ScopeUid::Dynamic(u) => Some(*u),
            ScopeUid::PendingDynamic => None,
        }
    }
}

/// Per-scope sequence-number generator for RPT messages sent on this
/// connection, grounded on the teacher's atomic sequence generator pattern.
#[derive(Debug, Default)]
pub struct SeqNumGenerator(AtomicU32);

impl SeqNumGenerator {
    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// One scope this client has joined.
pub struct ScopeEntry {
    pub handle: ScopeHandle,
    pub scope: String,
    pub static_broker_addr: Option<SocketAddr>,
    /// `Some` for an RPT controller/device scope, `None` for an EPT scope
    /// (in which case [`Self::ept_protocols`] carries the entry data
    /// instead). Exactly one of the two is populated; kept as two `Option`s
    /// rather than folding `RptClientType` into `ClientEntryData` itself so
    /// the common RPT path (the overwhelming majority of scopes) doesn't pay
    /// for an enum match on every read.
    pub client_type: Option<RptClientType>,
    /// EPT sub-protocol list (vector, CID) this scope advertises, when this
    /// is an EPT rather than an RPT client entry (§3 Data Model "Client";
    /// SPEC_FULL.md supplemented feature 1).
    pub ept_protocols: Option<Vec<(u16, Cid)>>,
    /// Swapped in place (`PendingDynamic` -> `Dynamic(uid)`) the moment a
    /// `ConnectReply` arrives, without needing exclusive access to the
    /// whole entry the way a plain field behind the map's shard lock
    /// would, grounded on the teacher's `ArcSwap`-for-rarely-written,
    /// often-read state pattern.
    pub uid: ArcSwap<ScopeUid>,
    pub seqnum: SeqNumGenerator,
    pub engine: ConnEngine,
    /// ACK_OVERFLOW reassembly and internal-PID state for this connection;
    /// overflow chains and internally-handled GETs don't cross scopes.
    pub router: Router,
    pub state: ScopeState,
    /// Handle into the `Discovery` backend, if this scope resolves its
    /// broker dynamically rather than via a static address (§4.H). `None`
    /// for statically-configured scopes.
    pub discovery_handle: Option<DiscoveryHandle>,
    /// Incremented each time this connection is torn down for heartbeat
    /// timeout; saturates at `u16::MAX` and is cleared by a
    /// `TCP_COMMS_STATUS` SET naming this scope (§3 "Connection").
    pub unhealthy_tcp_counter: AtomicU16,
}

impl ScopeEntry {
    pub fn current_uid(&self) -> Option<Uid> {
        self.uid.load().current()
    }

    pub fn client_protocol_entry(&self, client_cid: Cid) -> ClientEntryData {
        if let Some(protocols) = &self.ept_protocols {
            return ClientEntryData::Ept {
                protocols: protocols.clone(),
            };
        }
        ClientEntryData::Rpt {
            uid: self.current_uid().unwrap_or_else(|| Uid::dynamic_request(0)),
            client_type: self.client_type.unwrap_or(RptClientType::Device),
            binding_cid: client_cid,
        }
    }

    pub fn bump_unhealthy_tcp_counter(&self) {
        use std::sync::atomic::Ordering;
        let _ = self
            .unhealthy_tcp_counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_add(1))
            });
    }

    pub fn clear_unhealthy_tcp_counter(&self) {
        self.unhealthy_tcp_counter.store(0, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_uid_current_none_while_pending() {
        assert_eq!(ScopeUid::PendingDynamic.current(), None);
        assert_eq!(ScopeUid::Static(Uid::new(1, 1)).current(), Some(Uid::new(1, 1)));
    }

    #[test]
    fn seqnum_increments() {
        let gen = SeqNumGenerator::default();
        let a = gen.next();
        let b = gen.next();
        assert_eq!(b, a + 1);
    }
}
