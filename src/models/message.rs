//! Inbound message model from the messaging feed.

use serde::Deserialize;

/// A channel/chat message delivered by the update pump.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    /// Free-text message body
    #[serde(default)]
    pub text: String,

    /// ID of the channel or chat the message came from
    pub source_chat_id: i64,
}
