//! SRTP key derivation (RFC 3711 section 4.3)
//!
//! Session keys, authentication keys, and salts are derived from the
//! negotiated master key/salt with the AES-CM PRF. The key derivation rate
//! is fixed at zero: one derivation per session (re)start.

use aes::cipher::generic_array::GenericArray;
use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use crate::error::{Result, SrtpError};

type Aes128Ctr = Ctr128BE<Aes128>;

/// Label values selecting which session key is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDerivationLabel {
    /// RTP encryption key
    RtpEncryption = 0x00,
    /// RTP authentication key
    RtpAuthentication = 0x01,
    /// RTP salt (for IV creation)
    RtpSalt = 0x02,
    /// RTCP encryption key
    RtcpEncryption = 0x03,
    /// RTCP authentication key
    RtcpAuthentication = 0x04,
    /// RTCP salt (for IV creation)
    RtcpSalt = 0x05,
}

/// Derive one session key of `output_len` bytes from the master key/salt.
///
/// The PRF input block is the 14-byte master salt left-shifted into a
/// 16-byte counter block with the label XORed at byte 7 (the key
/// derivation rate is zero, so the index term vanishes).
pub fn derive_session_key(
    master_key: &[u8],
    master_salt: &[u8],
    label: KeyDerivationLabel,
    output_len: usize,
) -> Result<Vec<u8>> {
    if master_key.len() != 16 || master_salt.len() != 14 {
        return Err(SrtpError::InvalidKey);
    }

    let mut iv = [0u8; 16];
    iv[..14].copy_from_slice(master_salt);
    iv[7] ^= label as u8;

    let mut cipher = Aes128Ctr::new(
        GenericArray::from_slice(master_key),
        GenericArray::from_slice(&iv),
    );
    let mut out = vec![0u8; output_len];
    cipher.apply_keystream(&mut out);
    Ok(out)
}

/// The full set of session keys for one direction.
#[derive(Clone)]
pub struct SessionKeys {
    pub rtp_cipher_key: Vec<u8>,
    pub rtp_auth_key: Vec<u8>,
    pub rtp_salt: Vec<u8>,
    pub rtcp_cipher_key: Vec<u8>,
    pub rtcp_auth_key: Vec<u8>,
    pub rtcp_salt: Vec<u8>,
}

impl SessionKeys {
    /// Derive every session key from `master` (master key || master salt).
    pub fn derive(master: &[u8], auth_key_len: usize) -> Result<Self> {
        if master.len() != 30 {
            return Err(SrtpError::InvalidKey);
        }
        let (key, salt) = master.split_at(16);
        Ok(Self {
            rtp_cipher_key: derive_session_key(key, salt, KeyDerivationLabel::RtpEncryption, 16)?,
            rtp_auth_key: derive_session_key(
                key,
                salt,
                KeyDerivationLabel::RtpAuthentication,
                auth_key_len,
            )?,
            rtp_salt: derive_session_key(key, salt, KeyDerivationLabel::RtpSalt, 14)?,
            rtcp_cipher_key: derive_session_key(key, salt, KeyDerivationLabel::RtcpEncryption, 16)?,
            rtcp_auth_key: derive_session_key(
                key,
                salt,
                KeyDerivationLabel::RtcpAuthentication,
                auth_key_len,
            )?,
            rtcp_salt: derive_session_key(key, salt, KeyDerivationLabel::RtcpSalt, 14)?,
        })
    }
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        for k in [
            &mut self.rtp_cipher_key,
            &mut self.rtp_auth_key,
            &mut self.rtp_salt,
            &mut self.rtcp_cipher_key,
            &mut self.rtcp_auth_key,
            &mut self.rtcp_salt,
        ] {
            for b in k.iter_mut() {
                *b = 0;
            }
        }
    }
}
