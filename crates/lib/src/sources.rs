//! Source resolution for `sticker`: which attachments, links and quoted text to convert.
//!
//! [`SourcePlan::from_message`] is pure and only looks at the message; the attachment is
//! downloaded when the plan is materialized. The dispatcher and [`resolve`] share that path.

use crate::channels::{InboundMessage, Transport};
use crate::media::{MediaError, MediaPayload};
use futures_util::future::join_all;

/// One unit of sticker input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionSource {
    Attachment(MediaPayload),
    RemoteUrl(String),
    TextLiteral(String),
}

/// A source found in the message, before any download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedSource {
    Attachment,
    RemoteUrl(String),
    TextLiteral(String),
}

impl PlannedSource {
    /// Download the attachment if needed and produce the convertible source.
    pub async fn materialize(
        self,
        msg: &InboundMessage,
        transport: &dyn Transport,
    ) -> Result<ConversionSource, MediaError> {
        Ok(match self {
            PlannedSource::Attachment => ConversionSource::Attachment(transport.download_media(msg).await?),
            PlannedSource::RemoteUrl(url) => ConversionSource::RemoteUrl(url),
            PlannedSource::TextLiteral(text) => ConversionSource::TextLiteral(text),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlannedSource::Attachment => "attachment",
            PlannedSource::RemoteUrl(_) => "url",
            PlannedSource::TextLiteral(_) => "text",
        }
    }
}

/// Ordered sources of one message: attachment, then links in body order, then quoted text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePlan {
    pub items: Vec<PlannedSource>,
}

impl SourcePlan {
    pub fn from_message(msg: &InboundMessage) -> Self {
        let mut items = Vec::new();
        if msg.has_media() {
            items.push(PlannedSource::Attachment);
        }
        items.extend(find_urls(&msg.body).into_iter().map(PlannedSource::RemoteUrl));
        if let Some(text) = first_quoted(&msg.body) {
            items.push(PlannedSource::TextLiteral(text));
        }
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Materialize every source concurrently, in plan order. Each keeps its own outcome, so a
    /// failed download only fails that source.
    pub async fn materialize(
        self,
        msg: &InboundMessage,
        transport: &dyn Transport,
    ) -> Vec<Result<ConversionSource, MediaError>> {
        join_all(self.items.into_iter().map(|p| p.materialize(msg, transport))).await
    }
}

/// Resolve every source of `msg`: attachment, then links, then quoted text. Fails with the
/// first source that could not be materialized.
pub async fn resolve(
    msg: &InboundMessage,
    transport: &dyn Transport,
) -> Result<Vec<ConversionSource>, MediaError> {
    SourcePlan::from_message(msg)
        .materialize(msg, transport)
        .await
        .into_iter()
        .collect()
}

/// Whitespace-separated tokens starting with `http://` or `https://` (case-insensitive).
/// A quoted link is quoted text, not a link.
fn find_urls(body: &str) -> Vec<String> {
    body.split_whitespace()
        .filter_map(|token| {
            let lower = token.to_ascii_lowercase();
            if !(lower.starts_with("http://") || lower.starts_with("https://")) {
                return None;
            }
            let url = token.trim_end_matches(['"', '\'', '>', '”']);
            let host_start = url.find("://")? + 3;
            (url.len() > host_start).then(|| url.to_string())
        })
        .collect()
}

/// Contents of the first double-quoted substring, straight (`"`) or typographic (`“…”`).
/// Empty or whitespace-only quotes are ignored.
fn first_quoted(body: &str) -> Option<String> {
    let start = body.find(['"', '“'])?;
    let open = body[start..].chars().next()?;
    let rest = &body[start + open.len_utf8()..];
    let end = rest.find(['"', '”'])?;
    let text = rest[..end].trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
