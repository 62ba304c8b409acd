// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Component Identifier (CID): a 128-bit UUID naming a component end-to-end.

use std::fmt;

use uuid::Uuid;

/// Component Identifier. Persistent across reconnects (§3 Data Model).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Cid(pub [u8; 16]);

impl Cid {
    /// Generate a new random (v4) CID.
    pub fn new_v4() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        self.0
    }

    pub fn nil() -> Self {
        Self([0u8; 16])
    }

    pub fn is_nil(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// The well-known LLRP broadcast CID `fbad822c-bd0c-4d4c-bdc8-7eabebc85aff`.
    pub fn llrp_broadcast() -> Self {
        Self(*Uuid::parse_str("fbad822c-bd0c-4d4c-bdc8-7eabebc85aff")
            .expect("well-known LLRP broadcast CID literal is valid")
            .as_bytes())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_cid_matches_standard() {
        assert_eq!(
            Cid::llrp_broadcast().to_string(),
            "fbad822c-bd0c-4d4c-bdc8-7eabebc85aff"
        );
    }

    #[test]
    fn nil_is_zero() {
        assert!(Cid::nil().is_nil());
        assert!(!Cid::new_v4().is_nil());
    }

    #[test]
    fn roundtrip_bytes() {
        let cid = Cid::new_v4();
        assert_eq!(Cid::from_bytes(cid.as_bytes()), cid);
    }
}
