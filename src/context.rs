// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide shared state (§9 "Global state"): the poller every
//! connection and the LLRP target register with, and the local
//! network-interface facts (lowest hardware address) several components
//! need but none individually own.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mio::{Events, Poll};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::transport::mcast;

/// Process-wide state shared (via `Arc`) across every [`crate::client::RdmnetClient`]
/// and LLRP target created against it. Constructed once with [`Context::new`];
/// never a hidden singleton (§9 explicitly calls this out).
pub struct Context {
    poll: Mutex<Poll>,
    registry: mio::Registry,
    lowest_hw_addr: Option<[u8; 6]>,
    next_token: AtomicUsize,
}

impl Context {
    /// Initialize polling and resolve local network-interface facts. This is
    /// the library's `init` entry point (§6).
    pub fn new() -> Result<Arc<Self>> {
        let poll = Poll::new().map_err(Error::from)?;
        let registry = poll.registry().try_clone().map_err(Error::from)?;
        let lowest_hw_addr = mcast::lowest_hardware_address();
        log::info!(
            "rdmnet context initialized, lowest hardware address: {:?}",
            lowest_hw_addr
        );
        Ok(Arc::new(Self {
            poll: Mutex::new(poll),
            registry,
            lowest_hw_addr,
            next_token: AtomicUsize::new(1),
        }))
    }

    pub fn registry(&self) -> &mio::Registry {
        &self.registry
    }

    /// Allocate a fresh `mio::Token` for a newly created connection or socket.
    pub fn next_token(&self) -> mio::Token {
        mio::Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// This component's tie-breaking hardware address for LLRP Probe Reply
    /// collisions (§4.G), if one could be determined.
    pub fn lowest_hardware_address(&self) -> Option<[u8; 6]> {
        self.lowest_hw_addr
    }

    /// Block for up to `timeout` waiting for socket readiness, delivering
    /// results into `events`. The caller dispatches each event's token back
    /// to the owning connection/target.
    pub fn poll(&self, events: &mut Events, timeout: Option<std::time::Duration>) -> Result<()> {
        self.poll.lock().poll(events, timeout).map_err(Error::from)
    }

    /// Release process-wide resources. The library's `deinit` entry point (§6).
    pub fn shutdown(&self) {
        log::info!("rdmnet context shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_increasing() {
        let ctx = Context::new().unwrap();
        let a = ctx.next_token();
        let b = ctx.next_token();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }
}
