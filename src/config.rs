// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! E1.33 wire constants and per-client configuration.

use std::time::Duration;

use crate::cid::Cid;
use crate::uid::Uid;

/// RDMnet protocol version carried in every Broker Client Connect message.
pub const E133_VERSION: u16 = 1;

/// Default scope string used when an application does not specify one.
pub const E133_DEFAULT_SCOPE: &str = "default";
/// Default mDNS search domain.
pub const E133_DEFAULT_DOMAIN: &str = "local.";

/// Maximum length, including the null terminator, of a scope string on the wire.
pub const E133_SCOPE_STRING_PADDED_LENGTH: usize = 63;
/// Maximum length, including the null terminator, of a search domain string.
pub const E133_DOMAIN_STRING_PADDED_LENGTH: usize = 231;
/// Maximum length, including the null terminator, of an mDNS service-instance name.
pub const E133_SERVICE_NAME_STRING_PADDED_LENGTH: usize = 64;
/// Maximum length, including the null terminator, of a model-description string.
pub const E133_MODEL_STRING_PADDED_LENGTH: usize = 250;
/// Maximum length, including the null terminator, of a manufacturer string.
pub const E133_MANUFACTURER_STRING_PADDED_LENGTH: usize = 250;

/// Interval between heartbeat (Null) messages sent on an idle connection.
pub const E133_TCP_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// If no data is received from the peer within this long, the connection is dead.
pub const E133_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);
/// Minimum spacing between a controller's connection attempts to the same broker.
pub const E133_CONTROLLER_BACKOFF: Duration = Duration::from_secs(6);

/// Endpoint number reserved for the broker's own (non-gateway) RPT traffic.
pub const E133_NULL_ENDPOINT: u16 = 0x0000;
/// Endpoint number that addresses every endpoint on a device.
pub const E133_BROADCAST_ENDPOINT: u16 = 0xFFFF;

/// LLRP filter value: ignore probe requests unless this component is idle
/// (not a current broker client). Set by a client that wants to be
/// recoverable only when disconnected.
pub const LLRP_FILTERVAL_CLIENT_CONN_INACTIVE: u16 = 0x0001;
/// LLRP filter value: only reply to probes that target brokers specifically.
pub const LLRP_FILTERVAL_BROKERS_ONLY: u16 = 0x0002;

/// LLRP multicast port (IPv4 and IPv6 share this port number).
pub const LLRP_PORT: u16 = 5569;
/// A manager's overall LLRP probe timeout: how long it waits for replies to
/// one probe cycle before concluding no more targets will answer (§5).
pub const LLRP_TIMEOUT_MS: u64 = 2000;
/// Time a target reply is expected to reach the manager by, from the
/// manager's perspective (§5). A manager-side concern; targets only consult
/// [`LLRP_MAX_BACKOFF_MS`] when scheduling their own reply.
pub const LLRP_TARGET_REPLY_TIMEOUT_MS: u64 = 500;
/// Upper bound, in milliseconds, of an LLRP target's randomized reply delay
/// after a matching Probe Request (§4.G).
pub const LLRP_MAX_BACKOFF_MS: u64 = 1500;

/// Maximum size, in bytes, of one connection's receive-reassembly buffer.
pub const RDMNET_RECV_DATA_BUF_SIZE: usize = 8192;

/// Upper bound on connection backoff used by [`crate::conn::backoff`].
pub const MAX_BACKOFF_MS: u32 = 30_000;

/// Per-client configuration supplied at construction time (§4.E, §6 init).
///
/// Mirrors the teacher's flat `Config` builder: plain fields, no file-backed
/// loader, since the upstream client configures purely through this struct.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub cid: Cid,
    /// Static UID to use, or `None` to request a dynamically assigned UID.
    pub uid: Option<Uid>,
    pub search_domain: String,
    /// Optional fixed set of addresses to try per scope before falling back
    /// to discovery; empty means "discover via the `Discovery` backend".
    pub static_broker_addrs: Vec<std::net::SocketAddr>,
}

impl ClientConfig {
    pub fn new(cid: Cid) -> Self {
        Self {
            cid,
            uid: None,
            search_domain: E133_DEFAULT_DOMAIN.to_string(),
            static_broker_addrs: Vec::new(),
        }
    }

    pub fn with_static_uid(mut self, uid: Uid) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_search_domain(mut self, domain: impl Into<String>) -> Self {
        self.search_domain = domain.into();
        self
    }

    pub fn with_static_broker(mut self, addr: std::net::SocketAddr) -> Self {
        self.static_broker_addrs.push(addr);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_string_length_matches_wire_table() {
        assert_eq!(E133_SCOPE_STRING_PADDED_LENGTH, 63);
    }

    #[test]
    fn default_config_requests_dynamic_uid() {
        let cfg = ClientConfig::new(Cid::nil());
        assert!(cfg.uid.is_none());
        assert_eq!(cfg.search_domain, "local.");
    }

    #[test]
    fn builder_sets_static_uid() {
        let cfg = ClientConfig::new(Cid::nil()).with_static_uid(Uid::new(0x6574, 1));
        assert_eq!(cfg.uid, Some(Uid::new(0x6574, 1)));
    }
}
