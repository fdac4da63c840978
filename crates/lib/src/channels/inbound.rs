//! Inbound message from a channel: delivered to the dispatcher for command handling.

/// Reference to media attached to an inbound message. Downloaded lazily via the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Channel-specific file id (e.g. Telegram `file_id`).
    pub file_id: String,
    /// MIME type as reported by the channel, when it reports one.
    pub mime_type: Option<String>,
}

/// A message from a chat. Immutable once received.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: String,
    pub message_id: String,
    pub sender: String,
    /// Text, or the caption when the message carries media.
    pub body: String,
    pub media: Option<MediaRef>,
}

impl InboundMessage {
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }
}
