//! Public API types

pub mod types;

pub use types::{
    CallInfo, CallRole, CallState, MediaStatus, RedirectAction, SessionCallbacks,
    SessionConfig, SessionId,
};
