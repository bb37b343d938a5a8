//! Secure-transport mediation for SDP offer/answer
//!
//! Glue between the session's SDP model and the per-line
//! [`SecureMediaTransport`]: transport-profile token selection from the
//! use-policy, crypto attribute placement in offers, answer validation, and
//! the answerer's scan of a remote offer. The commit itself (promote
//! pending policies, restart only on change) lives on the transport and is
//! driven by the session at media-start time.

use tracing::debug;

use ringline_srtp_core::{SecureMediaTransport, SrtpUse};

use crate::errors::Result;
use crate::sdp::{MediaDescription, TransportProfile};

/// The security requirement a remote media line declares: `RTP/SAVP` means
/// mandatory, crypto attributes on a plain profile mean optional, anything
/// else means disabled.
pub fn peer_declared_use(m: &MediaDescription) -> SrtpUse {
    if m.profile.is_secure() {
        SrtpUse::Mandatory
    } else if !m.crypto.is_empty() {
        SrtpUse::Optional
    } else {
        SrtpUse::Disabled
    }
}

/// Decorate one outgoing offer line.
///
/// The transport-profile token follows the configured use-policy:
/// Disabled offers `RTP/AVP`, Mandatory offers `RTP/SAVP`, and Optional
/// offers `RTP/SAVP` only when the peer has previously declared Mandatory.
/// Crypto attributes are attached unless the line already carries some (a
/// re-offer built from the active local SDP), in which case the transport
/// adopts the carried lines so answer matching stays consistent.
pub fn decorate_offer_line(
    m: &mut MediaDescription,
    transport: &SecureMediaTransport,
) -> Result<()> {
    let use_policy = transport.setting().use_policy;
    m.profile = match use_policy {
        SrtpUse::Disabled => TransportProfile::RtpAvp,
        SrtpUse::Mandatory => TransportProfile::RtpSavp,
        SrtpUse::Optional => {
            if transport.peer_use() == SrtpUse::Mandatory {
                TransportProfile::RtpSavp
            } else {
                TransportProfile::RtpAvp
            }
        }
    };

    if m.crypto.is_empty() {
        m.crypto = transport.generate_offer()?;
    } else {
        transport.adopt_offer(&m.crypto)?;
    }
    Ok(())
}

/// Validate the answer for a line we offered and park the negotiated
/// policies on the transport. Errors are the distinct negotiation codes
/// from the SRTP layer; the caller decides whether the line is deactivated.
pub fn apply_answer_line(
    answer_m: &MediaDescription,
    transport: &SecureMediaTransport,
) -> Result<()> {
    transport.set_peer_use(peer_declared_use(answer_m));
    transport.apply_answer(&answer_m.crypto)?;
    Ok(())
}

/// Run the answerer side for one offered line, filling in our answer
/// line's profile and crypto attribute. The offer's crypto lines are
/// scanned in order with duplicate tags rejected outright; the first
/// locally-supported suite wins and the answer pins the offerer's tag.
pub fn answer_offer_line(
    offer_m: &MediaDescription,
    answer_m: &mut MediaDescription,
    transport: &SecureMediaTransport,
) -> Result<()> {
    let peer_use = peer_declared_use(offer_m);
    match transport.apply_offer(&offer_m.crypto, peer_use)? {
        Some(attr) => {
            // Echo the offered profile on a secured answer.
            answer_m.profile = offer_m.profile;
            debug!(tag = attr.tag, suite = %attr.suite_name, "answering with crypto");
            answer_m.crypto = vec![attr];
        }
        None => {
            answer_m.profile = TransportProfile::RtpAvp;
            answer_m.crypto = Vec::new();
        }
    }
    Ok(())
}
