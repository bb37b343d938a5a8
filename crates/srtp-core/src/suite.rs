//! Crypto suite catalog
//!
//! Static table of the supported cipher/authentication combinations. Index 0
//! is the sentinel "no cryptography" suite; offer/answer lines may omit a
//! suite entirely to mean plain RTP, so an empty name resolves to the
//! sentinel instead of failing.

use crate::error::{Result, SrtpError};

/// Cipher identifiers used by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherId {
    /// No encryption
    Null,
    /// AES-128 in counter mode (RFC 3711 AES-CM)
    AesCm128,
}

/// Authentication algorithm identifiers used by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthId {
    /// No authentication
    Null,
    /// HMAC-SHA1, truncated per suite tag length
    HmacSha1,
}

/// Security services a suite provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityService {
    /// Neither confidentiality nor authentication
    None,
    /// Confidentiality and authentication
    ConfAuth,
}

/// One immutable catalog entry.
///
/// `cipher_key_len` is the length of the SDES inline key material: master
/// key plus master salt (30 bytes for the AES-CM-128 suites).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoSuite {
    /// Wire name as it appears in the `a=crypto` attribute
    pub name: &'static str,
    /// Cipher algorithm
    pub cipher: CipherId,
    /// Required key material length in bytes (master key + salt)
    pub cipher_key_len: usize,
    /// Authentication algorithm
    pub auth: AuthId,
    /// Session authentication key length in bytes
    pub auth_key_len: usize,
    /// SRTP authentication tag length in bytes
    pub srtp_tag_len: usize,
    /// SRTCP authentication tag length in bytes
    pub srtcp_tag_len: usize,
    /// Service class
    pub service: SecurityService,
}

impl CryptoSuite {
    /// Master key portion of the inline key material
    pub fn master_key_len(&self) -> usize {
        match self.cipher {
            CipherId::Null => 0,
            CipherId::AesCm128 => 16,
        }
    }

    /// Master salt portion of the inline key material
    pub fn salt_len(&self) -> usize {
        match self.cipher {
            CipherId::Null => 0,
            CipherId::AesCm128 => 14,
        }
    }

    /// Whether this is the sentinel "no cryptography" suite
    pub fn is_null(&self) -> bool {
        self.cipher == CipherId::Null && self.auth == AuthId::Null
    }
}

/// Index of the sentinel suite in the catalog
pub const NULL_SUITE: usize = 0;

/// The supported suites. Constructed once, never mutated.
pub const CRYPTO_SUITES: &[CryptoSuite] = &[
    CryptoSuite {
        name: "NULL",
        cipher: CipherId::Null,
        cipher_key_len: 0,
        auth: AuthId::Null,
        auth_key_len: 0,
        srtp_tag_len: 0,
        srtcp_tag_len: 0,
        service: SecurityService::None,
    },
    CryptoSuite {
        name: "AES_CM_128_HMAC_SHA1_80",
        cipher: CipherId::AesCm128,
        cipher_key_len: 30,
        auth: AuthId::HmacSha1,
        auth_key_len: 20,
        srtp_tag_len: 10,
        srtcp_tag_len: 10,
        service: SecurityService::ConfAuth,
    },
    CryptoSuite {
        name: "AES_CM_128_HMAC_SHA1_32",
        cipher: CipherId::AesCm128,
        cipher_key_len: 30,
        auth: AuthId::HmacSha1,
        auth_key_len: 20,
        srtp_tag_len: 4,
        // RFC 4568: the shorter tag applies to SRTP only
        srtcp_tag_len: 10,
        service: SecurityService::ConfAuth,
    },
];

/// Look up a suite index by wire name, case-insensitively.
///
/// An empty name maps to the sentinel suite rather than failing.
pub fn lookup(name: &str) -> Result<usize> {
    if name.is_empty() {
        return Ok(NULL_SUITE);
    }
    CRYPTO_SUITES
        .iter()
        .position(|s| s.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| SrtpError::UnknownSuite {
            name: name.to_string(),
        })
}

/// Fetch a suite record by catalog index.
pub fn get(index: usize) -> &'static CryptoSuite {
    &CRYPTO_SUITES[index]
}
