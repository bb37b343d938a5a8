//! Owned SDP data model for negotiation
//!
//! Wire syntax parsing/printing belongs to the signaling stack; the session
//! works on this already-parsed model. Only the pieces negotiation touches
//! are modeled: origin version, media lines with transport profile,
//! formats, direction, and crypto attributes.

use serde::{Deserialize, Serialize};

use ringline_srtp_core::CryptoAttribute;

/// Media stream direction, as carried by SDP direction attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    /// `inactive`: no media flows, but the transport stays attached for
    /// keep-alive-level processing
    Inactive,
}

impl MediaDirection {
    /// Direction the peer observes for our line.
    pub fn reversed(self) -> Self {
        match self {
            MediaDirection::SendOnly => MediaDirection::RecvOnly,
            MediaDirection::RecvOnly => MediaDirection::SendOnly,
            other => other,
        }
    }
}

/// RTP transport profile token on the media line. Exactly `RTP/AVP` or
/// `RTP/SAVP` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportProfile {
    RtpAvp,
    RtpSavp,
}

impl TransportProfile {
    pub fn token(self) -> &'static str {
        match self {
            TransportProfile::RtpAvp => "RTP/AVP",
            TransportProfile::RtpSavp => "RTP/SAVP",
        }
    }

    pub fn is_secure(self) -> bool {
        self == TransportProfile::RtpSavp
    }
}

/// Media kind of an m-line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
    Other(String),
}

/// One negotiated format (payload type plus rtpmap data)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub payload_type: u8,
    /// Encoding name from the rtpmap (e.g. `PCMU`, `telephone-event`)
    pub encoding: String,
    pub clock_rate: u32,
}

impl MediaFormat {
    pub fn new(payload_type: u8, encoding: &str, clock_rate: u32) -> Self {
        Self {
            payload_type,
            encoding: encoding.to_string(),
            clock_rate,
        }
    }

    /// Comfort noise and telephone-event are signalling formats: they do
    /// not count toward the codec total that codec locking acts on.
    pub fn is_signalling(&self) -> bool {
        // Static PT 13 is comfort noise even without an rtpmap.
        self.payload_type == 13
            || self.encoding.eq_ignore_ascii_case("telephone-event")
            || self.encoding.eq_ignore_ascii_case("CN")
    }
}

/// One media description (m-line plus the attributes negotiation reads).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescription {
    pub kind: MediaKind,
    /// Zero means the line is administratively deactivated
    pub port: u16,
    pub profile: TransportProfile,
    pub formats: Vec<MediaFormat>,
    pub direction: MediaDirection,
    pub crypto: Vec<CryptoAttribute>,
}

impl MediaDescription {
    pub fn audio(port: u16, formats: Vec<MediaFormat>) -> Self {
        Self {
            kind: MediaKind::Audio,
            port,
            profile: TransportProfile::RtpAvp,
            formats,
            direction: MediaDirection::SendRecv,
            crypto: Vec::new(),
        }
    }

    /// Whether the line carries (or could carry) media at all
    pub fn is_active(&self) -> bool {
        self.port != 0
    }

    /// Administratively deactivate the line, keeping it present in the SDP.
    pub fn deactivate(&mut self) {
        self.port = 0;
        self.direction = MediaDirection::Inactive;
        self.crypto.clear();
    }

    /// Count of real (non-signalling) formats
    pub fn real_format_count(&self) -> usize {
        self.formats.iter().filter(|f| !f.is_signalling()).count()
    }

    /// Strip every real format except the first, keeping signalling
    /// formats. Returns true when something was removed.
    pub fn retain_first_real_format(&mut self) -> bool {
        let before = self.formats.len();
        let mut real_seen = 0usize;
        self.formats.retain(|f| {
            if f.is_signalling() {
                return true;
            }
            real_seen += 1;
            real_seen == 1
        });
        self.formats.len() != before
    }

    /// The negotiated telephone-event payload type, if any
    pub fn telephone_event_pt(&self) -> Option<u8> {
        self.formats
            .iter()
            .find(|f| f.encoding.eq_ignore_ascii_case("telephone-event"))
            .map(|f| f.payload_type)
    }
}

/// A session description: origin version plus media lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// `o=` line version; bumped on every modified re-offer
    pub version: u64,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    pub fn new(media: Vec<MediaDescription>) -> Self {
        Self { version: 1, media }
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Pick the active audio line. With a secure preference, a secured
    /// line (`RTP/SAVP` or one carrying crypto attributes) wins over a
    /// plain one; otherwise the first active audio line is used.
    pub fn audio_index(&self, prefer_secure: bool) -> Option<usize> {
        let audio_lines = || {
            self.media
                .iter()
                .enumerate()
                .filter(|(_, m)| m.kind == MediaKind::Audio && m.is_active())
        };
        if prefer_secure {
            if let Some((i, _)) = audio_lines()
                .find(|(_, m)| m.profile.is_secure() || !m.crypto.is_empty())
            {
                return Some(i);
            }
        } else if let Some((i, _)) =
            audio_lines().find(|(_, m)| !m.profile.is_secure())
        {
            return Some(i);
        }
        audio_lines().next().map(|(i, _)| i)
    }
}
