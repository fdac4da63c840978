//! Telegram transport: long-poll getUpdates, replies, edits and sticker uploads via Bot API.

use crate::channels::inbound::{InboundMessage, MediaRef};
use crate::channels::transport::{ReplyHandle, Transport, TransportError};
use crate::media::{MediaPayload, StickerImage};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;
/// sendMessage / editMessageText reject longer text.
const MAX_TEXT_CHARS: usize = 4096;
/// Longest sticker side Telegram accepts.
const MAX_STICKER_SIDE: u32 = 512;

/// Bot API envelope: `{ "ok": bool, "result": T, "description": "..." }`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<TelegramFileRef>>,
    #[serde(default)]
    pub animation: Option<TelegramFileRef>,
    #[serde(default)]
    pub video: Option<TelegramFileRef>,
    #[serde(default)]
    pub document: Option<TelegramFileRef>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
}

/// Any file-bearing object (PhotoSize, Animation, Video, Document).
#[derive(Debug, Deserialize)]
pub struct TelegramFileRef {
    pub file_id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramMessage {
    /// Convert to the channel-agnostic inbound shape. Messages with neither text nor media are dropped.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let media = if let Some(p) = self.photo.and_then(|sizes| sizes.into_iter().last()) {
            // Telegram re-encodes photos as JPEG.
            Some(MediaRef {
                file_id: p.file_id,
                mime_type: Some("image/jpeg".to_string()),
            })
        } else {
            self.animation
                .or(self.video)
                .or(self.document)
                .map(|f| MediaRef {
                    file_id: f.file_id,
                    mime_type: f.mime_type,
                })
        };
        let body = self.text.or(self.caption).unwrap_or_default();
        if body.is_empty() && media.is_none() {
            return None;
        }
        Some(InboundMessage {
            chat_id: self.chat.id.to_string(),
            message_id: self.message_id.to_string(),
            sender: self
                .from
                .map(|u| u.id.to_string())
                .unwrap_or_else(|| self.chat.id.to_string()),
            body,
            media,
        })
    }
}

/// Telegram transport: long-polls for updates and answers through the Bot API.
pub struct TelegramTransport {
    api_base: String,
    token: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(token: String) -> Self {
        Self::with_api_base(token, telegram_api_base())
    }

    pub fn with_api_base(token: String, api_base: String) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Start the getUpdates long-poll loop and forward messages to the dispatcher. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<InboundMessage>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// Unwrap the Bot API envelope, turning `ok: false` and HTTP errors into [`TransportError::Api`].
    async fn parse<T: DeserializeOwned>(
        method: &str,
        res: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!("{} failed: {} {}", method, status, body)));
        }
        let data: ApiResponse<T> = res.json().await?;
        if !data.ok {
            return Err(TransportError::Api(format!(
                "{} returned ok: false ({})",
                method,
                data.description.unwrap_or_default()
            )));
        }
        data.result
            .ok_or_else(|| TransportError::Api(format!("{} returned no result", method)))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let res = self.client.post(self.method_url(method)).json(body).send().await?;
        Self::parse(method, res).await
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), TransportError> {
        let mut body = serde_json::json!({ "timeout": LONG_POLL_TIMEOUT });
        if let Some(off) = offset {
            body["offset"] = off.into();
        }
        let updates: Vec<TelegramUpdate> = self.call("getUpdates", &body).await?;
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }

    /// Upload a GIF as an animation, anything else as a WEBP sticker.
    async fn upload(
        &self,
        msg: &InboundMessage,
        sticker: &StickerImage,
    ) -> Result<(), TransportError> {
        let (method, field, file_name, mime_type, data) = if sticker.mime_type == "image/gif" {
            ("sendAnimation", "animation", "sticker.gif", "image/gif", sticker.data.clone())
        } else {
            ("sendSticker", "sticker", "sticker.webp", "image/webp", sticker_webp(sticker)?)
        };
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str(mime_type)?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", msg.chat_id.clone())
            .text("reply_to_message_id", msg.message_id.clone())
            .part(field, part);
        let res = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await?;
        let _: SentMessage = Self::parse(method, res).await?;
        Ok(())
    }
}

/// sendSticker only takes WEBP. Still images (PNG, JPEG, ...) are re-encoded, shrunk to
/// fit [`MAX_STICKER_SIDE`] when larger.
fn sticker_webp(sticker: &StickerImage) -> Result<Vec<u8>, TransportError> {
    if sticker.mime_type == "image/webp" {
        return Ok(sticker.data.clone());
    }
    let img = image::load_from_memory(&sticker.data)
        .map_err(|e| TransportError::Encode(format!("decoding {}: {}", sticker.mime_type, e)))?;
    let img = if img.width() > MAX_STICKER_SIDE || img.height() > MAX_STICKER_SIDE {
        img.resize(MAX_STICKER_SIDE, MAX_STICKER_SIDE, FilterType::Triangle)
    } else {
        img
    };
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img.to_rgba8())
        .write_to(&mut out, ImageFormat::WebP)
        .map_err(|e| TransportError::Encode(format!("encoding webp: {}", e)))?;
    Ok(out.into_inner())
}

fn truncate_text(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        text.to_string()
    } else {
        text.chars().take(MAX_TEXT_CHARS).collect()
    }
}

async fn run_get_updates_loop(transport: Arc<TelegramTransport>, inbound_tx: mpsc::Sender<InboundMessage>) {
    let mut offset: Option<i64> = None;
    while transport.running() {
        match transport.get_updates(offset).await {
            Ok((updates, next)) => {
                if next.is_some() {
                    offset = next;
                }
                for u in updates {
                    let Some(inbound) = u.message.and_then(TelegramMessage::into_inbound) else {
                        continue;
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram: getUpdates loop stopped");
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn download_media(&self, msg: &InboundMessage) -> Result<MediaPayload, TransportError> {
        let media = msg.media.as_ref().ok_or(TransportError::NoMedia)?;
        let file: TelegramFile = self
            .call("getFile", &serde_json::json!({ "file_id": media.file_id }))
            .await?;
        let file_path = file
            .file_path
            .ok_or_else(|| TransportError::Api("getFile returned no file_path".to_string()))?;
        let url = format!("{}/file/bot{}/{}", self.api_base, self.token, file_path);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(TransportError::Api(format!("file download failed: {}", res.status())));
        }
        let data = res.bytes().await?.to_vec();
        Ok(MediaPayload::new(media.mime_type.clone(), data))
    }

    async fn reply(&self, msg: &InboundMessage, text: &str) -> Result<ReplyHandle, TransportError> {
        let body = serde_json::json!({
            "chat_id": msg.chat_id,
            "text": truncate_text(text),
            "reply_to_message_id": msg.message_id,
        });
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(ReplyHandle {
            chat_id: msg.chat_id.clone(),
            message_id: sent.message_id.to_string(),
        })
    }

    async fn edit(&self, handle: &ReplyHandle, text: &str) -> Result<(), TransportError> {
        let body = serde_json::json!({
            "chat_id": handle.chat_id,
            "message_id": handle.message_id,
            "text": truncate_text(text),
        });
        // editMessageText returns the edited Message; only success matters here.
        let _: serde_json::Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn reply_sticker(
        &self,
        msg: &InboundMessage,
        sticker: &StickerImage,
    ) -> Result<(), TransportError> {
        self.upload(msg, sticker).await
    }
}

/// Resolve Telegram bot API base URL (for tests or custom endpoints).
pub fn telegram_api_base() -> String {
    std::env::var("TELEGRAM_API_BASE").unwrap_or_else(|_| TELEGRAM_API_BASE.to_string())
}
