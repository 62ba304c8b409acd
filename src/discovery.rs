// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The discovery adapter contract (§4.H): a thin trait boundary to whatever
//! mDNS/DNS-SD backend the embedding application links in (Bonjour, Avahi,
//! or the in-tree lightweight mDNS prototype `examples/device/src/*` shows
//! for the original C library). The core never implements discovery itself;
//! it only drives scopes through this trait and reacts to its callbacks.

use std::net::IpAddr;

use crate::cid::Cid;
use crate::uid::Uid;

/// Opaque handle a `Discovery` backend hands back from `start_monitoring`/
/// `register_broker`, echoed on every later callback for that operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryHandle(pub u32);

/// One listen address a broker advertises, with the local network interface
/// index it was observed on (§3 Data Model: "Discovered broker record").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenAddr {
    pub addr: IpAddr,
    pub netint_index: u32,
}

/// A broker discovered (or updated) via DNS-SD, assembled from its TXT
/// record and SRV/A/AAAA data (§6 "Discovered broker record").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredBroker {
    pub cid: Cid,
    /// DNS-SD service-instance name, ≤63 bytes.
    pub service_instance_name: String,
    pub uid: Uid,
    pub e133_version: u16,
    pub port: u16,
    pub listen_addrs: Vec<ListenAddr>,
    pub scope: String,
    pub model: String,
    pub manufacturer: String,
    /// TXT keys this layer doesn't interpret, preserved verbatim (§6).
    pub additional_txt_items: Vec<(String, String)>,
}

/// Information an application supplies to advertise itself as a broker via
/// `register_broker`. Only meaningful for the broker role; RPT/EPT clients
/// never call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRegisterInfo {
    pub cid: Cid,
    pub service_instance_name: String,
    pub uid: Uid,
    pub port: u16,
    pub scope: String,
    pub model: String,
    pub manufacturer: String,
}

/// Callbacks the discovery backend invokes on the core (§4.H). The core
/// guarantees it will never re-enter the `Discovery` trait from inside one
/// of these calls — a backend is free to call back synchronously from
/// whatever thread it drives its own event loop on, so long as it doesn't
/// hold a lock the core also needs.
pub trait DiscoveryCallbacks: Send + Sync {
    /// A broker matching a `start_monitoring` scope was found.
    fn broker_found(&self, handle: DiscoveryHandle, info: DiscoveredBroker);
    /// A previously-found broker's record changed (e.g. its listen addresses).
    fn broker_updated(&self, handle: DiscoveryHandle, info: DiscoveredBroker);
    /// A previously-found broker's advertisement expired or was withdrawn.
    fn broker_lost(&self, handle: DiscoveryHandle, scope: String, service_instance_name: String);
    /// This process's own `register_broker` call succeeded.
    fn broker_registered(&self, handle: DiscoveryHandle, assigned_service_instance_name: String);
    /// This process's own `register_broker` call failed.
    fn broker_register_failed(&self, handle: DiscoveryHandle, reason: String);
    /// A broker belonging to a *different* scope than the one being
    /// monitored was observed on the network (diagnostic-only).
    fn other_broker_found(&self, handle: DiscoveryHandle, info: DiscoveredBroker);
    /// Likewise, a previously-observed other-scope broker disappeared.
    fn other_broker_lost(&self, handle: DiscoveryHandle, scope: String, service_instance_name: String);
}

/// The platform DNS-SD/mDNS backend contract (§1, §4.H, §9 "Dynamic dispatch
/// for discovery and sockets"). Implementations: Bonjour, Avahi, or an
/// in-tree lightweight mDNS responder — none of which are this crate's
/// concern; it only defines and calls through this trait.
pub trait Discovery: Send + Sync {
    /// Begin monitoring `scope` within `domain` for broker advertisements.
    /// Results arrive asynchronously via [`DiscoveryCallbacks::broker_found`]
    /// et al., tagged with the returned handle.
    fn start_monitoring(&self, scope: &str, domain: &str) -> DiscoveryHandle;

    /// Stop monitoring a scope previously started with `start_monitoring`.
    /// No further callbacks for `handle` are delivered after this returns.
    fn stop_monitoring(&self, handle: DiscoveryHandle);

    /// Advertise this process as a broker. Resolution arrives via
    /// [`DiscoveryCallbacks::broker_registered`] or
    /// [`DiscoveryCallbacks::broker_register_failed`].
    fn register_broker(&self, info: BrokerRegisterInfo) -> DiscoveryHandle;

    /// Withdraw a broker advertisement previously made with `register_broker`.
    fn unregister_broker(&self, handle: DiscoveryHandle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A trivial in-memory `Discovery` used to exercise the trait boundary
    /// in tests; never a real mDNS implementation (§1 explicitly excludes
    /// that from this crate's scope).
    #[derive(Default)]
    struct FakeDiscovery {
        next: Mutex<u32>,
    }

    impl Discovery for FakeDiscovery {
        fn start_monitoring(&self, _scope: &str, _domain: &str) -> DiscoveryHandle {
            let mut n = self.next.lock().unwrap();
            *n += 1;
            DiscoveryHandle(*n)
        }
        fn stop_monitoring(&self, _handle: DiscoveryHandle) {}
        fn register_broker(&self, _info: BrokerRegisterInfo) -> DiscoveryHandle {
            let mut n = self.next.lock().unwrap();
            *n += 1;
            DiscoveryHandle(*n)
        }
        fn unregister_broker(&self, _handle: DiscoveryHandle) {}
    }

    #[test]
    fn fake_backend_hands_out_distinct_handles() {
        let d = FakeDiscovery::default();
        let a = d.start_monitoring("default", "local.");
        let b = d.start_monitoring("default", "local.");
        assert_ne!(a, b);
    }
}
