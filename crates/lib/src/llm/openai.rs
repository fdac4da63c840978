//! OpenAI-compatible chat completions client (`POST .../chat/completions`).

use crate::config::BackendConfig;
use crate::llm::{check_status, AiBackend, BackendError, BackendRequest, BackendResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f32 = 0.7;

#[derive(Clone)]
pub struct OpenAiClient {
    url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum OpenAiMessage<'a> {
    User { content: &'a str },
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Option<Vec<OpenAiChoice>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
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
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            client,
        }
    }
}

#[async_trait]
impl AiBackend for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn ask(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let body = OpenAiChatRequest {
            model: &self.model,
            messages: vec![OpenAiMessage::User {
                content: &request.query,
            }],
            temperature: TEMPERATURE,
            stream: false,
        };
        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let data: OpenAiChatResponse = check_status(req.send().await?).await?.json().await?;
        let text = data
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or(BackendError::UnexpectedResponseShape("choices[0].message.content"))?;
        Ok(BackendResponse { text })
    }
}
