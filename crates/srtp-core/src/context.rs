//! Per-direction SRTP/SRTCP packet protection context
//!
//! One context owns the derived session keys, rollover-counter tracking,
//! and the replay window for a single direction of a single transport. The
//! context is created by [`crate::transport::SecureMediaTransport::start`]
//! and torn down by `stop`; it is never shared across transports or calls.

use aes::cipher::generic_array::GenericArray;
use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use crate::auth::{ReplayCheck, ReplayWindow, SrtpAuthenticator};
use crate::error::{Result, SrtpError};
use crate::kdf::SessionKeys;
use crate::policy::CryptoPolicy;
use crate::suite::{self, AuthId, CipherId, CryptoSuite};

type Aes128Ctr = Ctr128BE<Aes128>;

/// Replay window width in packets
const REPLAY_WINDOW: u64 = 64;

/// RTP packet index space is 48 bits (ROC || SEQ)
const MAX_RTP_INDEX: u64 = (1 << 48) - 1;

/// SRTCP index space is 31 bits
const MAX_RTCP_INDEX: u32 = 0x7FFF_FFFF;

const RTP_HEADER_MIN: usize = 12;
const RTCP_HEADER_LEN: usize = 8;

/// Minimal RTP header view: enough to locate the payload and the fields
/// that feed the IV (sequence number, SSRC).
struct RtpHeaderView {
    seq: u16,
    ssrc: u32,
    payload_offset: usize,
}

fn parse_rtp_header(data: &[u8]) -> Result<RtpHeaderView> {
    if data.len() < RTP_HEADER_MIN {
        return Err(SrtpError::BadPacket);
    }
    let cc = (data[0] & 0x0F) as usize;
    let has_extension = data[0] & 0x10 != 0;
    let mut offset = RTP_HEADER_MIN + cc * 4;
    if data.len() < offset {
        return Err(SrtpError::BadPacket);
    }
    if has_extension {
        if data.len() < offset + 4 {
            return Err(SrtpError::BadPacket);
        }
        let ext_words =
            u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        offset += 4 + ext_words * 4;
        if data.len() < offset {
            return Err(SrtpError::BadPacket);
        }
    }
    Ok(RtpHeaderView {
        seq: u16::from_be_bytes([data[2], data[3]]),
        ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        payload_offset: offset,
    })
}

/// AES-CM IV (RFC 3711 section 4.1.1): salt shifted left 16 bits, XOR SSRC
/// at bytes 4..8, XOR 48-bit packet index at bytes 8..14.
fn aes_cm_iv(salt: &[u8], ssrc: u32, index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..14].copy_from_slice(&salt[..14]);
    for (i, b) in ssrc.to_be_bytes().iter().enumerate() {
        iv[4 + i] ^= b;
    }
    let idx = index.to_be_bytes();
    for i in 0..6 {
        iv[8 + i] ^= idx[2 + i];
    }
    iv
}

/// One direction's crypto state.
pub struct SrtpContext {
    suite: &'static CryptoSuite,
    keys: SessionKeys,
    rtp_auth: SrtpAuthenticator,
    rtcp_auth: SrtpAuthenticator,
    encrypt: bool,

    // Transmit-side index tracking
    tx_roc: u32,
    tx_last_seq: Option<u16>,

    // Receive-side index tracking (RFC 3711 appendix A)
    rx_roc: u32,
    rx_last_seq: Option<u16>,
    rx_replay: ReplayWindow,

    // SRTCP
    tx_rtcp_index: u32,
    rx_rtcp_replay: ReplayWindow,
}

impl SrtpContext {
    /// Build a context from a validated policy. Fails if the suite is the
    /// sentinel (the transport handles Bypass before reaching here) or the
    /// key length is wrong.
    pub fn new(policy: &CryptoPolicy) -> Result<Self> {
        policy.validate()?;
        let suite = suite::get(policy.suite);
        if suite.is_null() {
            return Err(SrtpError::NoUsableSuite);
        }

        let keys = SessionKeys::derive(policy.key(), suite.auth_key_len)?;

        let rtp_auth_alg = if policy.suppress_authentication {
            AuthId::Null
        } else {
            suite.auth
        };
        let rtp_auth = SrtpAuthenticator::new(
            rtp_auth_alg,
            keys.rtp_auth_key.clone(),
            suite.srtp_tag_len,
        );
        let rtcp_auth = SrtpAuthenticator::new(
            rtp_auth_alg,
            keys.rtcp_auth_key.clone(),
            suite.srtcp_tag_len,
        );

        Ok(Self {
            suite,
            keys,
            rtp_auth,
            rtcp_auth,
            encrypt: suite.cipher == CipherId::AesCm128 && !policy.suppress_encryption,
            tx_roc: 0,
            tx_last_seq: None,
            rx_roc: 0,
            rx_last_seq: None,
            rx_replay: ReplayWindow::new(REPLAY_WINDOW),
            tx_rtcp_index: 0,
            rx_rtcp_replay: ReplayWindow::new(REPLAY_WINDOW),
        })
    }

    /// Bytes of growth `protect_rtp` may add to a packet
    pub fn rtp_overhead(&self) -> usize {
        self.rtp_auth.tag_len()
    }

    /// Bytes of growth `protect_rtcp` may add to a packet
    pub fn rtcp_overhead(&self) -> usize {
        4 + self.rtcp_auth.tag_len()
    }

    fn keystream_in_place(key: &[u8], iv: [u8; 16], data: &mut [u8]) {
        let mut cipher =
            Aes128Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(&iv));
        cipher.apply_keystream(data);
    }

    /// Estimate the 48-bit index of a received packet from its sequence
    /// number (RFC 3711 appendix A). Returns (index, guessed_roc).
    fn estimate_rx_index(&self, seq: u16) -> (u64, u32) {
        let roc = match self.rx_last_seq {
            None => self.rx_roc,
            Some(s_l) => {
                if s_l < 0x8000 {
                    if seq > s_l && seq - s_l > 0x8000 {
                        self.rx_roc.wrapping_sub(1)
                    } else {
                        self.rx_roc
                    }
                } else if s_l - 0x8000 > seq {
                    self.rx_roc.wrapping_add(1)
                } else {
                    self.rx_roc
                }
            }
        };
        (((roc as u64) << 16) | seq as u64, roc)
    }

    /// Encrypt and authenticate an RTP packet into `out`.
    ///
    /// `out` must already hold enough room; the transport's scratch buffer
    /// sizing guarantees it. Returns the protected length.
    pub fn protect_rtp(&mut self, packet: &[u8], out: &mut [u8]) -> Result<usize> {
        let hdr = parse_rtp_header(packet)?;

        // Advance the transmit ROC on sequence wrap.
        if let Some(last) = self.tx_last_seq {
            if hdr.seq < last && last - hdr.seq > 0x8000 {
                self.tx_roc = self.tx_roc.wrapping_add(1);
            }
        }
        self.tx_last_seq = Some(hdr.seq);

        let index = ((self.tx_roc as u64) << 16) | hdr.seq as u64;
        if index >= MAX_RTP_INDEX {
            return Err(SrtpError::KeyExhausted);
        }

        let tag_len = self.rtp_auth.tag_len();
        let total = packet.len() + tag_len;
        if out.len() < total {
            return Err(SrtpError::TooLarge {
                len: total,
                capacity: out.len(),
            });
        }

        out[..packet.len()].copy_from_slice(packet);
        if self.encrypt {
            let iv = aes_cm_iv(&self.keys.rtp_salt, hdr.ssrc, index);
            Self::keystream_in_place(
                &self.keys.rtp_cipher_key,
                iv,
                &mut out[hdr.payload_offset..packet.len()],
            );
        }

        if tag_len > 0 {
            let tag = self.rtp_auth.compute_tag(&out[..packet.len()], self.tx_roc)?;
            out[packet.len()..total].copy_from_slice(&tag);
        }
        Ok(total)
    }

    /// Verify, replay-check, and decrypt an SRTP packet into `out`.
    /// Returns the plaintext length. The replay window is only committed
    /// after the tag verifies.
    pub fn unprotect_rtp(&mut self, packet: &[u8], out: &mut [u8]) -> Result<usize> {
        let tag_len = self.rtp_auth.tag_len();
        if packet.len() < RTP_HEADER_MIN + tag_len {
            return Err(SrtpError::BadPacket);
        }
        let auth_len = packet.len() - tag_len;
        let (auth_part, tag) = packet.split_at(auth_len);
        let hdr = parse_rtp_header(auth_part)?;

        let (index, guessed_roc) = self.estimate_rx_index(hdr.seq);

        match self.rx_replay.check(index) {
            ReplayCheck::Fresh => {}
            ReplayCheck::TooOld => return Err(SrtpError::ReplayTooOld),
            ReplayCheck::Duplicate => return Err(SrtpError::ReplayDuplicate),
        }

        self.rtp_auth.verify_tag(auth_part, tag, guessed_roc)?;

        if out.len() < auth_len {
            return Err(SrtpError::TooLarge {
                len: auth_len,
                capacity: out.len(),
            });
        }
        out[..auth_len].copy_from_slice(auth_part);
        if self.encrypt {
            let iv = aes_cm_iv(&self.keys.rtp_salt, hdr.ssrc, index);
            Self::keystream_in_place(
                &self.keys.rtp_cipher_key,
                iv,
                &mut out[hdr.payload_offset..auth_len],
            );
        }

        // Commit the index and roll the receive state forward.
        self.rx_replay.commit(index);
        match self.rx_last_seq {
            None => {
                self.rx_last_seq = Some(hdr.seq);
                self.rx_roc = guessed_roc;
            }
            Some(last) => {
                if guessed_roc == self.rx_roc.wrapping_add(1) && self.rx_roc != guessed_roc {
                    self.rx_roc = guessed_roc;
                    self.rx_last_seq = Some(hdr.seq);
                } else if guessed_roc == self.rx_roc && hdr.seq > last {
                    self.rx_last_seq = Some(hdr.seq);
                }
            }
        }
        Ok(auth_len)
    }

    /// Encrypt and authenticate an RTCP compound packet into `out`.
    /// Appends the E-bit/index word and the tag (RFC 3711 section 3.4).
    pub fn protect_rtcp(&mut self, packet: &[u8], out: &mut [u8]) -> Result<usize> {
        if packet.len() < RTCP_HEADER_LEN {
            return Err(SrtpError::BadPacket);
        }
        if self.tx_rtcp_index >= MAX_RTCP_INDEX {
            return Err(SrtpError::KeyExhausted);
        }
        self.tx_rtcp_index += 1;
        let index = self.tx_rtcp_index;

        let tag_len = self.rtcp_auth.tag_len();
        let total = packet.len() + 4 + tag_len;
        if out.len() < total {
            return Err(SrtpError::TooLarge {
                len: total,
                capacity: out.len(),
            });
        }

        out[..packet.len()].copy_from_slice(packet);
        let ssrc = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        if self.encrypt {
            let iv = aes_cm_iv(&self.keys.rtcp_salt, ssrc, index as u64);
            Self::keystream_in_place(
                &self.keys.rtcp_cipher_key,
                iv,
                &mut out[RTCP_HEADER_LEN..packet.len()],
            );
        }

        let e_and_index = if self.encrypt {
            index | 0x8000_0000
        } else {
            index
        };
        out[packet.len()..packet.len() + 4].copy_from_slice(&e_and_index.to_be_bytes());

        if tag_len > 0 {
            let tag = self
                .rtcp_auth
                .compute_tag_no_roc(&out[..packet.len() + 4])?;
            out[packet.len() + 4..total].copy_from_slice(&tag);
        }
        Ok(total)
    }

    /// Verify, replay-check, and decrypt an SRTCP packet into `out`.
    pub fn unprotect_rtcp(&mut self, packet: &[u8], out: &mut [u8]) -> Result<usize> {
        let tag_len = self.rtcp_auth.tag_len();
        if packet.len() < RTCP_HEADER_LEN + 4 + tag_len {
            return Err(SrtpError::BadPacket);
        }
        let tag_start = packet.len() - tag_len;
        let (auth_part, tag) = packet.split_at(tag_start);
        self.rtcp_auth.verify_tag_no_roc(auth_part, tag)?;

        let idx_start = tag_start - 4;
        let word = u32::from_be_bytes([
            packet[idx_start],
            packet[idx_start + 1],
            packet[idx_start + 2],
            packet[idx_start + 3],
        ]);
        let encrypted = word & 0x8000_0000 != 0;
        let index = word & MAX_RTCP_INDEX;

        match self.rx_rtcp_replay.check(index as u64) {
            ReplayCheck::Fresh => {}
            ReplayCheck::TooOld => return Err(SrtpError::ReplayTooOld),
            ReplayCheck::Duplicate => return Err(SrtpError::ReplayDuplicate),
        }

        let plain_len = idx_start;
        if out.len() < plain_len {
            return Err(SrtpError::TooLarge {
                len: plain_len,
                capacity: out.len(),
            });
        }
        out[..plain_len].copy_from_slice(&packet[..plain_len]);
        if encrypted {
            let ssrc = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
            let iv = aes_cm_iv(&self.keys.rtcp_salt, ssrc, index as u64);
            Self::keystream_in_place(
                &self.keys.rtcp_cipher_key,
                iv,
                &mut out[RTCP_HEADER_LEN..plain_len],
            );
        }
        self.rx_rtcp_replay.commit(index as u64);
        Ok(plain_len)
    }

    /// Suite backing this context
    pub fn suite(&self) -> &'static CryptoSuite {
        self.suite
    }
}
