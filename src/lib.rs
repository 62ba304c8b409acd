// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rdmnet - ANSI E1.33 RDMnet in pure Rust
//!
//! A from-scratch implementation of RDMnet (RDM Packet Transport over TCP,
//! the Broker protocol, and LLRP over UDP multicast), the ANSI E1.33
//! standard for remotely managing ESTA RDM (E1.20) devices across an IP
//! network.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rdmnet::{Cid, ClientConfig, Context, RdmnetClient, RptClientType};
//!
//! fn main() -> rdmnet::Result<()> {
//!     let ctx = Context::new()?;
//!     let config = ClientConfig::new(Cid::new_v4());
//!     let client = RdmnetClient::new(ctx, rdmnet::client::ClientHandle(1), config);
//!
//!     let broker_addr = "192.0.2.10:8888".parse().unwrap();
//!     let scope = client.add_scope("default", broker_addr, RptClientType::Controller)?;
//!     client.request_client_list(scope)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                     Application callbacks                    |
//! +-------------------------------------------------------------+
//! |  client::RdmnetClient   -- scope lifecycle, outbound sends    |
//! |  router::Router         -- ACK_OVERFLOW reassembly, internal  |
//! |                             PID handling (§4.F)               |
//! |  llrp::LlrpTarget       -- UDP probe/reply FSM (§4.G)         |
//! |  conn::ConnEngine       -- per-scope TCP connect/handshake/    |
//! |                             heartbeat/backoff FSM (§4.D)      |
//! +-------------------------------------------------------------+
//! |  codec::{root,broker,rpt,ept,llrp,rdm}  -- wire framing       |
//! |  recv_buffer::RecvBuffer                -- TCP reassembly     |
//! |  transport::{tcp,mcast}                 -- non-blocking I/O   |
//! +-------------------------------------------------------------+
//! ```
//!
//! ## Modules overview
//!
//! - [`client`] - per-application client/scope manager (start here)
//! - [`conn`] - the TCP connection engine
//! - [`router`] - RPT message routing and internal PID handling
//! - [`llrp`] - the LLRP target state machine
//! - [`discovery`] - the DNS-SD/mDNS adapter trait boundary
//! - [`codec`] - wire-format packing/parsing for every PDU family
//! - [`transport`] - TCP and UDP multicast I/O
//! - [`config`] - E1.33 wire constants and per-client configuration
//! - [`error`] - the error taxonomy (§7)

pub mod cid;
pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod conn;
pub mod discovery;
pub mod error;
pub mod llrp;
pub mod recv_buffer;
pub mod router;
pub mod transport;
pub mod uid;

pub use cid::Cid;
pub use client::{ClientHandle, RdmnetClient, ScopeHandle};
pub use codec::broker::RptClientType;
pub use config::ClientConfig;
pub use context::Context;
pub use discovery::{Discovery, DiscoveryCallbacks, DiscoveryHandle};
pub use error::{Error, Result};
pub use llrp::{LlrpCallbacks, LlrpManager, LlrpTarget, LlrpTargetAction};
pub use router::{Router, RouterAction};
pub use uid::Uid;

/// rdmnet crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
