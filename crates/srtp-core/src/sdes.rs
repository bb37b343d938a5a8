//! SDES `crypto` attribute codec (RFC 4568)
//!
//! Wire shape of the attribute value: `<tag> <suite-name> inline:<base64-key>`.
//! The tag is a decimal integer with no leading zero, the key method must be
//! literally `inline`, and the decoded key must fit the policy key buffer.
//! Any violation is a parse error, never a panic.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SrtpError};
use crate::policy::{CryptoPolicy, MAX_KEY_LEN};
use crate::suite;

/// Bounded redraws when a generated key contains a zero byte
const KEYGEN_MAX_ATTEMPTS: usize = 8;

/// One parsed `a=crypto` attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoAttribute {
    /// Attribute tag as offered/answered
    pub tag: u32,
    /// Suite wire name (e.g. `AES_CM_128_HMAC_SHA1_80`)
    pub suite_name: String,
    /// Decoded inline key material
    pub key: Vec<u8>,
}

impl CryptoAttribute {
    /// Parse the attribute value (the part after `a=crypto:`).
    pub fn parse(value: &str) -> Result<(CryptoPolicy, u32)> {
        let mut fields = value.split_ascii_whitespace();
        let tag_text = fields.next().ok_or(SrtpError::MalformedAttribute)?;
        let suite_name = fields.next().ok_or(SrtpError::MalformedAttribute)?;
        let key_params = fields.next().ok_or(SrtpError::MalformedAttribute)?;

        let tag = parse_tag(tag_text)?;

        let (method, rest) = key_params
            .split_once(':')
            .ok_or(SrtpError::MalformedAttribute)?;
        if method != "inline" {
            return Err(SrtpError::InvalidKeyMethod {
                method: method.to_string(),
            });
        }

        // Optional session parameters (lifetime/MKI) follow the key after
        // '|'; they are not negotiated here and are ignored.
        let key_b64 = rest.split('|').next().unwrap_or(rest);
        let key = BASE64.decode(key_b64).map_err(|_| SrtpError::InvalidKey)?;
        if key.len() > MAX_KEY_LEN {
            return Err(SrtpError::InvalidKey);
        }

        let suite_index = suite::lookup(suite_name)?;
        let policy = CryptoPolicy::new(suite_index, key)?;
        Ok((policy, tag))
    }

    /// View of an already-validated policy as an attribute.
    pub fn from_policy(policy: &CryptoPolicy, tag: u32) -> Self {
        Self {
            tag,
            suite_name: suite::get(policy.suite).name.to_string(),
            key: policy.key().to_vec(),
        }
    }
}

impl fmt::Display for CryptoAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} inline:{}",
            self.tag,
            self.suite_name,
            BASE64.encode(&self.key)
        )
    }
}

fn parse_tag(text: &str) -> Result<u32> {
    let invalid = || SrtpError::InvalidTag {
        text: text.to_string(),
    };
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if text.len() > 1 && text.starts_with('0') {
        return Err(invalid());
    }
    text.parse::<u32>().map_err(|_| invalid())
}

/// Generate master key material for `policy` if it has none, then format
/// the offer attribute line value.
///
/// Returns `None` for the sentinel suite: a plain line carries no crypto
/// attribute at all. Generated keys come from the OS CSPRNG; any draw
/// containing a zero byte is redrawn (bounded) because zero bytes trip
/// edge cases in downstream cipher plumbing.
pub fn generate_offer_attribute(
    policy: &mut CryptoPolicy,
    tag: u32,
) -> Result<Option<CryptoAttribute>> {
    let suite = suite::get(policy.suite);
    if suite.is_null() {
        return Ok(None);
    }

    if policy.key().is_empty() {
        policy.set_key(generate_key(suite.cipher_key_len)?)?;
    }
    policy.validate()?;

    Ok(Some(CryptoAttribute::from_policy(policy, tag)))
}

fn generate_key(len: usize) -> Result<Vec<u8>> {
    let mut key = vec![0u8; len];
    for _ in 0..KEYGEN_MAX_ATTEMPTS {
        rand::rngs::OsRng.fill_bytes(&mut key);
        if !key.contains(&0) {
            return Ok(key);
        }
    }
    // Astronomically unlikely with a healthy RNG; treat as a key problem
    // rather than looping forever.
    Err(SrtpError::InvalidKey)
}
