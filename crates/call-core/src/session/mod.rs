//! Call session state machine and codec lock controller

pub mod call;
pub mod lock_codec;

pub use call::CallSession;
pub use lock_codec::{CODEC_LOCK_MAX_RETRY, CODEC_LOCK_RETRY_INTERVAL};
