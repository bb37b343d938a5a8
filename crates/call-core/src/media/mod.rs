//! Media-side integration for the call session

pub mod security;

pub use security::{answer_offer_line, apply_answer_line, decorate_offer_line, peer_declared_use};
