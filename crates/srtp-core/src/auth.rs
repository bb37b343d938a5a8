//! Packet authentication and replay detection
//!
//! HMAC-SHA1 tags over `packet || ROC` (RFC 3711 section 4.2) and a sliding
//! replay window. The window separates "older than the window" from
//! "already received" so the transport can recognize the replay sub-class
//! that is eligible for probation recovery.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::error::{Result, SrtpError};
use crate::suite::AuthId;

type HmacSha1 = Hmac<Sha1>;

/// Tag computation/verification for one direction.
pub struct SrtpAuthenticator {
    algorithm: AuthId,
    auth_key: Vec<u8>,
    tag_len: usize,
}

impl SrtpAuthenticator {
    pub fn new(algorithm: AuthId, auth_key: Vec<u8>, tag_len: usize) -> Self {
        Self {
            algorithm,
            auth_key,
            tag_len,
        }
    }

    /// Authentication tag length in bytes (0 when disabled)
    pub fn tag_len(&self) -> usize {
        if self.algorithm == AuthId::Null {
            0
        } else {
            self.tag_len
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.algorithm != AuthId::Null
    }

    /// Compute the truncated tag over `data || roc`.
    pub fn compute_tag(&self, data: &[u8], roc: u32) -> Result<Vec<u8>> {
        if self.algorithm == AuthId::Null {
            return Ok(Vec::new());
        }
        let mut mac = HmacSha1::new_from_slice(&self.auth_key)
            .map_err(|_| SrtpError::InvalidKey)?;
        mac.update(data);
        mac.update(&roc.to_be_bytes());
        let full = mac.finalize().into_bytes();
        Ok(full[..self.tag_len].to_vec())
    }

    /// Compute a tag without the trailing ROC word (SRTCP).
    pub fn compute_tag_no_roc(&self, data: &[u8]) -> Result<Vec<u8>> {
        if self.algorithm == AuthId::Null {
            return Ok(Vec::new());
        }
        let mut mac = HmacSha1::new_from_slice(&self.auth_key)
            .map_err(|_| SrtpError::InvalidKey)?;
        mac.update(data);
        let full = mac.finalize().into_bytes();
        Ok(full[..self.tag_len].to_vec())
    }

    /// Constant-time verification of a received tag.
    pub fn verify_tag(&self, data: &[u8], tag: &[u8], roc: u32) -> Result<()> {
        if self.algorithm == AuthId::Null {
            return Ok(());
        }
        let expected = self.compute_tag(data, roc)?;
        if expected.len() != tag.len() || expected.ct_eq(tag).unwrap_u8() != 1 {
            return Err(SrtpError::AuthenticationFailed);
        }
        Ok(())
    }

    /// Constant-time verification without the ROC word (SRTCP).
    pub fn verify_tag_no_roc(&self, data: &[u8], tag: &[u8]) -> Result<()> {
        if self.algorithm == AuthId::Null {
            return Ok(());
        }
        let expected = self.compute_tag_no_roc(data)?;
        if expected.len() != tag.len() || expected.ct_eq(tag).unwrap_u8() != 1 {
            return Err(SrtpError::AuthenticationFailed);
        }
        Ok(())
    }
}

impl Drop for SrtpAuthenticator {
    fn drop(&mut self) {
        for b in self.auth_key.iter_mut() {
            *b = 0;
        }
    }
}

/// Outcome of a replay-window probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCheck {
    /// Index not seen before and inside (or ahead of) the window
    Fresh,
    /// Index older than the window's left edge
    TooOld,
    /// Index inside the window but already received
    Duplicate,
}

/// Sliding replay window over packet indices.
///
/// `check` only probes; `commit` marks the index as received. Callers
/// commit after tag verification succeeds so a forged packet cannot poison
/// the window.
pub struct ReplayWindow {
    window_size: u64,
    highest: u64,
    seen: Vec<bool>,
    primed: bool,
}

impl ReplayWindow {
    pub fn new(window_size: u64) -> Self {
        Self {
            window_size,
            highest: 0,
            seen: vec![false; window_size as usize],
            primed: false,
        }
    }

    /// Probe an index without mutating the window.
    pub fn check(&self, index: u64) -> ReplayCheck {
        if !self.primed {
            return ReplayCheck::Fresh;
        }
        if index > self.highest {
            return ReplayCheck::Fresh;
        }
        if index + self.window_size <= self.highest {
            return ReplayCheck::TooOld;
        }
        if self.seen[(index % self.window_size) as usize] {
            ReplayCheck::Duplicate
        } else {
            ReplayCheck::Fresh
        }
    }

    /// Record an index as received.
    pub fn commit(&mut self, index: u64) {
        if !self.primed {
            self.primed = true;
            self.highest = index;
            self.seen[(index % self.window_size) as usize] = true;
            return;
        }
        if index > self.highest {
            let advance = index - self.highest;
            if advance >= self.window_size {
                for slot in self.seen.iter_mut() {
                    *slot = false;
                }
            } else {
                // Clear the slots that fell off the left edge.
                for i in 1..=advance {
                    let idx = ((self.highest + i) % self.window_size) as usize;
                    self.seen[idx] = false;
                }
            }
            self.highest = index;
        }
        self.seen[(index % self.window_size) as usize] = true;
    }

    pub fn reset(&mut self) {
        self.primed = false;
        self.highest = 0;
        for slot in self.seen.iter_mut() {
            *slot = false;
        }
    }
}
