//! AI backends behind one `ask` contract.
//!
//! Each provider (Gemini, OpenAI-compatible, Ollama) owns its request/response wire shape.
//! The active one is picked from the config snapshot on every call, so switching
//! `activeAI` takes effect without a restart.

mod gemini;
mod ollama;
mod openai;

pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use crate::config::{BackendKind, Config};
use crate::media::MediaPayload;
use async_trait::async_trait;
use std::time::Duration;

/// Fixed prompt used to check that a backend answers at all.
pub const PROBE_PROMPT: &str = "say `test` just that";

/// Provider-agnostic question.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub query: String,
    /// Attached media, forwarded only to backends that accept inline input.
    pub inline_media: Option<MediaPayload>,
}

impl BackendRequest {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            inline_media: None,
        }
    }
}

/// Provider-agnostic answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(reqwest::Error),
    #[error("backend api error: {0}")]
    Api(String),
    #[error("unexpected response shape: missing {0}")]
    UnexpectedResponseShape(&'static str),
    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),
}

/// Gemini puts the API key in the query string; drop the URL so logs never carry it.
impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Request(e.without_url())
    }
}

/// One AI provider.
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Short name for logs (e.g. "gemini").
    fn name(&self) -> &'static str;

    /// Whether [`BackendRequest::inline_media`] is sent to the provider.
    fn supports_inline_media(&self) -> bool {
        false
    }

    /// Single attempt, no retries. Deadlines are applied by the caller.
    async fn ask(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError>;
}

/// Picks the backend for a config snapshot.
pub trait BackendProvider: Send + Sync {
    fn backend(&self, config: &Config) -> Box<dyn AiBackend>;
}

/// HTTP backends sharing one connection pool.
#[derive(Clone, Default)]
pub struct HttpBackends {
    client: reqwest::Client,
}

impl HttpBackends {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackendProvider for HttpBackends {
    fn backend(&self, config: &Config) -> Box<dyn AiBackend> {
        let client = self.client.clone();
        match config.active_ai {
            BackendKind::Gemini => Box::new(GeminiClient::new(client, &config.gemini)),
            BackendKind::Openai => Box::new(OpenAiClient::new(client, &config.openai)),
            BackendKind::Olama => Box::new(OllamaClient::new(client, &config.olama)),
        }
    }
}

/// Send [`PROBE_PROMPT`] and return the answer. Any error means the backend is not usable.
pub async fn probe(backend: &dyn AiBackend) -> Result<String, BackendError> {
    let res = backend.ask(&BackendRequest::text(PROBE_PROMPT)).await?;
    Ok(res.text)
}

/// Turn a non-2xx response into [`BackendError::Api`] with status and body (for logs only).
pub(crate) async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(BackendError::Api(format!("{} {}", status, body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_follows_active_ai() {
        let backends = HttpBackends::new();
        let mut config = Config::default();
        assert_eq!(backends.backend(&config).name(), "gemini");
        config.active_ai = BackendKind::Openai;
        assert_eq!(backends.backend(&config).name(), "openai");
        config.active_ai = BackendKind::Olama;
        assert_eq!(backends.backend(&config).name(), "olama");
    }

    #[test]
    fn only_gemini_takes_inline_media() {
        let backends = HttpBackends::new();
        let mut config = Config::default();
        assert!(backends.backend(&config).supports_inline_media());
        config.active_ai = BackendKind::Openai;
        assert!(!backends.backend(&config).supports_inline_media());
        config.active_ai = BackendKind::Olama;
        assert!(!backends.backend(&config).supports_inline_media());
    }
}
