//! Data models for the active position, its trailing stop, and inbound messages.

mod message;
mod position;

pub use message::InboundMessage;
pub use position::{ActivePosition, StopState};
