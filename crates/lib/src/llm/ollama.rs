//! Ollama generate API client (`POST /api/generate`, non-streaming).

use crate::config::BackendConfig;
use crate::llm::{check_status, AiBackend, BackendError, BackendRequest, BackendResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_MODEL: &str = "llama3.2:latest";

/// Client for an Ollama server. The configured URL is the full generate endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, config: &BackendConfig) -> Self {
        let model = config
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_string();
        Self {
            url: config.url.trim().to_string(),
            model,
            client,
        }
    }
}

#[async_trait]
impl AiBackend for OllamaClient {
    fn name(&self) -> &'static str {
        "olama"
    }

    async fn ask(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.query,
            stream: false,
        };
        let res = self.client.post(&self.url).json(&body).send().await?;
        let data: GenerateResponse = check_status(res).await?.json().await?;
        let text = data
            .response
            .ok_or(BackendError::UnexpectedResponseShape("response"))?;
        Ok(BackendResponse { text })
    }
}
