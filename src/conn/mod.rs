// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The TCP connection engine: connect/handshake/heartbeat/backoff FSM (§4.D).

pub mod backoff;
pub mod engine;

pub use engine::{ConnEngine, ConnEvent, ConnState};
