//! HTTP model backend
//!
//! Speaks the Gemini `generateContent` wire format. The credential key
//! arrives per invocation from the executor's lease; this backend holds
//! no credential state of its own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use convoke_utils::error::ModelError;

use crate::types::{ModelBackend, ModelRequest, ModelResponse};

/// Default API endpoint root.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a new HTTP backend.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Misconfiguration` if the HTTP client cannot
    /// be constructed.
    pub fn new(base_url: Option<String>) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ModelError::Misconfiguration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[async_trait]
impl ModelBackend for HttpBackend {
    async fn invoke(&self, key: &str, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        };

        debug!(
            stage = %request.stage,
            model = %request.model,
            max_output_tokens = request.max_output_tokens,
            "Issuing model call"
        );

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header(API_KEY_HEADER, key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = detail.chars().take(256).collect::<String>();
            return Err(match status.as_u16() {
                401 | 403 => ModelError::ProviderAuth(format!("HTTP {status}: {detail}")),
                429 => ModelError::ProviderQuota(format!("HTTP {status}: {detail}")),
                code if code >= 500 => ModelError::ProviderOutage(format!("HTTP {status}: {detail}")),
                _ => ModelError::Transport(format!("HTTP {status}: {detail}")),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Transport(format!("failed to decode response body: {e}")))?;

        let text = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ModelError::Transport(
                "response contained no candidate text".to_string(),
            ));
        }

        Ok(ModelResponse {
            raw: text,
            provider: "http".to_string(),
            model_used: request.model.clone(),
        })
    }
}
