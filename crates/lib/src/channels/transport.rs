//! Transport contract: the four chat operations the core depends on.

use crate::channels::InboundMessage;
use crate::media::{MediaPayload, StickerImage};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(reqwest::Error),
    #[error("transport api error: {0}")]
    Api(String),
    #[error("sticker encoding failed: {0}")]
    Encode(String),
    #[error("message has no media")]
    NoMedia,
}

/// Request URLs carry the bot token; drop them before the error can reach a log line.
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Request(e.without_url())
    }
}

/// Identifies a reply we posted so it can be edited later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHandle {
    pub chat_id: String,
    pub message_id: String,
}

/// Messaging transport used by the dispatcher.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the media attached to `msg`.
    async fn download_media(&self, msg: &InboundMessage) -> Result<MediaPayload, TransportError>;

    /// Reply to `msg` with text; the handle can be passed to [`Transport::edit`].
    async fn reply(&self, msg: &InboundMessage, text: &str) -> Result<ReplyHandle, TransportError>;

    /// Replace the text of a previously posted reply.
    async fn edit(&self, handle: &ReplyHandle, text: &str) -> Result<(), TransportError>;

    /// Reply to `msg` with media flagged as a sticker.
    async fn reply_sticker(
        &self,
        msg: &InboundMessage,
        sticker: &StickerImage,
    ) -> Result<(), TransportError>;
}
