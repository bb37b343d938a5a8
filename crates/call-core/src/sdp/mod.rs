//! SDP negotiation data model

pub mod types;

pub use types::{
    MediaDescription, MediaDirection, MediaFormat, MediaKind, SessionDescription,
    TransportProfile,
};
