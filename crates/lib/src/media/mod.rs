//! Sticker conversion: attachments, remote URLs and quoted text become sticker images.
//!
//! [`MediaConverter::convert`] only computes sticker bytes; sending the reply is the
//! dispatcher's job, so every path can be tested without a chat.

mod text;
mod transcode;

pub use text::{layout_text, FontMeasure, TextLayout, TextLayoutParams, TextMeasure, CANVAS_SIZE, CONTENT_SIZE};
pub use transcode::{FfmpegTranscoder, TempMediaFiles, Transcoder, STICKER_SIZE};

use crate::config::MediaConfig;
use crate::sources::ConversionSource;
use base64::Engine as _;
use futures_util::StreamExt;
use std::sync::Arc;

/// Media bytes plus their MIME type, as downloaded or fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl MediaPayload {
    pub fn new(mime_type: Option<String>, data: Vec<u8>) -> Self {
        Self { mime_type, data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Standard base64, the encoding providers expect for inline media.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// Finished sticker ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickerImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("invalid media: {0}")]
    InvalidMedia(String),
    #[error("input is {size} bytes, limit is {max}")]
    OversizeInput { size: usize, max: usize },
    #[error("converted sticker is {size} bytes, limit is {max}")]
    OversizeOutput { size: usize, max: usize },
    #[error("transcode failed: {0}")]
    Transcode(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("text render failed: {0}")]
    Render(String),
    #[error("media download failed: {0}")]
    Download(#[from] crate::channels::TransportError),
    #[error("media io failed: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Fixed, non-technical reason shown in the chat. Details stay in the log.
    pub fn user_reason(&self, config: &MediaConfig) -> String {
        match self {
            MediaError::InvalidMedia(_) => "The media type could not be recognized.".to_string(),
            MediaError::OversizeInput { .. } => format!(
                "Media file size is too large. Please upload a file smaller than {}.",
                human_size(config.max_input_bytes)
            ),
            MediaError::OversizeOutput { .. } => {
                "Converted sticker is too large. Please upload a smaller file.".to_string()
            }
            MediaError::Transcode(_) => "The media could not be converted.".to_string(),
            MediaError::Fetch(_) => "The link could not be downloaded.".to_string(),
            MediaError::Render(_) => "The text could not be drawn.".to_string(),
            MediaError::Download(_) => "The attachment could not be downloaded.".to_string(),
            MediaError::Io(_) => "The media could not be processed.".to_string(),
        }
    }
}

fn human_size(bytes: usize) -> String {
    const MIB: usize = 1024 * 1024;
    if bytes % MIB == 0 {
        format!("{} MB", bytes / MIB)
    } else {
        format!("{} KB", bytes.div_ceil(1024))
    }
}

/// True for inputs that go through the transcoder instead of straight through.
pub fn needs_transcode(mime_type: &str) -> bool {
    mime_type.starts_with("video") || mime_type == "image/gif"
}

/// Converts [`ConversionSource`]s into sticker images.
#[derive(Clone)]
pub struct MediaConverter {
    transcoder: Arc<dyn Transcoder>,
    http: reqwest::Client,
}

impl MediaConverter {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            http: reqwest::Client::new(),
        }
    }

    pub async fn convert(
        &self,
        source: ConversionSource,
        config: &MediaConfig,
    ) -> Result<StickerImage, MediaError> {
        match source {
            ConversionSource::Attachment(payload) => self.convert_attachment(payload, config).await,
            ConversionSource::RemoteUrl(url) => self.fetch_remote(&url, config).await,
            ConversionSource::TextLiteral(text) => render_text_sticker(&text, config).await,
        }
    }

    async fn convert_attachment(
        &self,
        payload: MediaPayload,
        config: &MediaConfig,
    ) -> Result<StickerImage, MediaError> {
        let mime_type = payload
            .mime_type
            .clone()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| MediaError::InvalidMedia("media mimetype is undefined".to_string()))?;
        if payload.size() > config.max_input_bytes {
            return Err(MediaError::OversizeInput {
                size: payload.size(),
                max: config.max_input_bytes,
            });
        }
        if !needs_transcode(&mime_type) {
            return Ok(StickerImage {
                mime_type,
                data: payload.data,
            });
        }

        let files = TempMediaFiles::create(&config.resolved_temp_dir(), &mime_type).await?;
        tokio::fs::write(files.input(), &payload.data).await?;
        self.transcoder
            .transcode(files.input(), files.output(), config)
            .await?;
        let data = tokio::fs::read(files.output()).await?;
        if data.len() > config.max_output_bytes {
            return Err(MediaError::OversizeOutput {
                size: data.len(),
                max: config.max_output_bytes,
            });
        }
        log::debug!(
            "media: transcoded {} ({} bytes) to webp ({} bytes)",
            mime_type,
            payload.size(),
            data.len()
        );
        Ok(StickerImage {
            mime_type: "image/webp".to_string(),
            data,
        })
    }

    /// Fetch a link and send it as an animation without re-encoding.
    async fn fetch_remote(&self, url: &str, config: &MediaConfig) -> Result<StickerImage, MediaError> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MediaError::Fetch(e.to_string()))?;
        if !res.status().is_success() {
            return Err(MediaError::Fetch(format!("{} returned {}", url, res.status())));
        }
        let max = config.max_input_bytes;
        if let Some(len) = res.content_length().filter(|len| *len > max as u64) {
            return Err(MediaError::OversizeInput {
                size: usize::try_from(len).unwrap_or(usize::MAX),
                max,
            });
        }
        // The declared length may be missing or wrong; stop reading once the limit is passed.
        let mut data = Vec::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| MediaError::Fetch(e.to_string()))?;
            if data.len() + chunk.len() > max {
                return Err(MediaError::OversizeInput {
                    size: data.len() + chunk.len(),
                    max,
                });
            }
            data.extend_from_slice(&chunk);
        }
        Ok(StickerImage {
            mime_type: "image/gif".to_string(),
            data,
        })
    }
}

/// DejaVu Sans Bold, used when `media.fontPath` is not set.
const BUNDLED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans-Bold.ttf");

/// Load the configured font, or the bundled one.
pub async fn load_font(config: &MediaConfig) -> Result<ab_glyph::FontVec, MediaError> {
    let bytes = match &config.font_path {
        Some(path) => tokio::fs::read(path)
            .await
            .map_err(|e| MediaError::Render(format!("reading font {}: {}", path.display(), e)))?,
        None => BUNDLED_FONT.to_vec(),
    };
    ab_glyph::FontVec::try_from_vec(bytes).map_err(|e| MediaError::Render(format!("loading font: {}", e)))
}

async fn render_text_sticker(text: &str, config: &MediaConfig) -> Result<StickerImage, MediaError> {
    let font = load_font(config).await?;
    let params = TextLayoutParams::from_config(config);
    let data = text::render(text, &font, &params)?;
    Ok(StickerImage {
        mime_type: "image/webp".to_string(),
        data,
    })
}
