//! Gemini generateContent client. Accepts inline media next to the question.

use crate::config::BackendConfig;
use crate::llm::{check_status, AiBackend, BackendError, BackendRequest, BackendResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The configured URL ends in `?key=` and the API key is appended to it.
#[derive(Clone)]
pub struct GeminiClient {
    url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(client: reqwest::Client, config: &BackendConfig) -> Self {
        let url = format!(
            "{}{}",
            config.url.trim(),
            config.api_key.as_deref().unwrap_or("").trim()
        );
        Self { url, client }
    }

    fn build_request(request: &BackendRequest) -> GenerateContentRequest {
        let mut parts = vec![Part::Text {
            text: request.query.clone(),
        }];
        if let Some(media) = &request.inline_media {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: media
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    data: media.to_base64(),
                },
            });
        }
        GenerateContentRequest {
            contents: vec![Content { parts }],
        }
    }
}

#[async_trait]
impl AiBackend for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn supports_inline_media(&self) -> bool {
        true
    }

    async fn ask(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let body = Self::build_request(request);
        let res = self.client.post(&self.url).json(&body).send().await?;
        let data: GenerateContentResponse = check_status(res).await?.json().await?;
        let text = data
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .and_then(|p| p.into_iter().next())
            .and_then(|p| p.text)
            .ok_or(BackendError::UnexpectedResponseShape(
                "candidates[0].content.parts[0].text",
            ))?;
        Ok(BackendResponse { text })
    }
}
