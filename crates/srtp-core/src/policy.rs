//! Crypto policy model
//!
//! A [`CryptoPolicy`] couples a catalog suite with raw key material and the
//! per-direction suppression flags. Two policies are active per media line
//! (local and peer); a third negotiated-pending pair exists only inside an
//! offer/answer round and is promoted or discarded when the round ends.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SrtpError};
use crate::suite::{self, NULL_SUITE};

/// Upper bound on raw key material carried by a policy
pub const MAX_KEY_LEN: usize = 128;

/// Secure-media use requirement, for both the local configuration and the
/// peer's declared requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SrtpUse {
    /// Never negotiate SRTP
    Disabled,
    /// Offer SRTP but accept plain media
    Optional,
    /// Require SRTP; deactivate media that cannot be secured
    Mandatory,
}

impl Default for SrtpUse {
    fn default() -> Self {
        SrtpUse::Optional
    }
}

/// One direction's crypto parameters: suite, key material, suppression bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoPolicy {
    /// Catalog index of the suite
    pub suite: usize,
    /// Raw key material (master key || master salt), at most [`MAX_KEY_LEN`]
    key: Vec<u8>,
    /// Run the cipher as null even if the suite encrypts
    pub suppress_encryption: bool,
    /// Skip authentication tags even if the suite authenticates
    pub suppress_authentication: bool,
}

impl CryptoPolicy {
    /// The sentinel plain-RTP policy
    pub fn plain() -> Self {
        Self {
            suite: NULL_SUITE,
            key: Vec::new(),
            suppress_encryption: false,
            suppress_authentication: false,
        }
    }

    /// Policy for a suite with key material. The key is bounds-checked
    /// here; the per-suite length check happens at session start.
    pub fn new(suite: usize, key: Vec<u8>) -> Result<Self> {
        if key.len() > MAX_KEY_LEN {
            return Err(SrtpError::InvalidKey);
        }
        Ok(Self {
            suite,
            key,
            suppress_encryption: false,
            suppress_authentication: false,
        })
    }

    /// Policy for a suite with no key yet (generated at offer time).
    pub fn unkeyed(suite: usize) -> Self {
        Self {
            suite,
            key: Vec::new(),
            suppress_encryption: false,
            suppress_authentication: false,
        }
    }

    /// Raw key material
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Replace the key material, keeping the bounds check.
    pub fn set_key(&mut self, key: Vec<u8>) -> Result<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(SrtpError::InvalidKey);
        }
        self.key = key;
        Ok(())
    }

    /// Whether the policy, after suppression flags, amounts to plain RTP.
    pub fn is_plain(&self) -> bool {
        self.suite == NULL_SUITE
            || (self.suppress_encryption && self.suppress_authentication)
    }

    /// Validate the key length against the suite's declared requirement.
    /// Never succeeds with an under- or over-length key for a real suite.
    pub fn validate(&self) -> Result<()> {
        let suite = suite::get(self.suite);
        if suite.is_null() {
            return Ok(());
        }
        if self.key.len() != suite.cipher_key_len {
            return Err(SrtpError::KeyLength {
                suite: suite.name,
                expected: suite.cipher_key_len,
                actual: self.key.len(),
            });
        }
        Ok(())
    }

    /// Zero and drop the key material. Used when a session stops so stale
    /// keys never outlive the contexts built from them.
    pub fn clear(&mut self) {
        for b in self.key.iter_mut() {
            *b = 0;
        }
        self.key.clear();
        self.suite = NULL_SUITE;
        self.suppress_encryption = false;
        self.suppress_authentication = false;
    }
}

impl Default for CryptoPolicy {
    fn default() -> Self {
        Self::plain()
    }
}
