//! AI collaborator client
//!
//! One blocking RPC: `POST {base_url}/v1/generate` with `{message, context, mode}`,
//! answered by `{text, confidence_score, attachments}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tw_common::{ChatMessage, MessageRole};
use tw_config::AiConfig;

const MAX_ERROR_BODY: usize = 2 * 1024;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl AiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Request(_) => true,
            AiError::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Reply,
    Suggestion,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Reply => "reply",
            GenerationMode::Suggestion => "suggestion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: MessageRole,
    pub content: String,
}

impl From<&ChatMessage> for ContextMessage {
    fn from(message: &ChatMessage) -> Self {
        Self { role: message.role, content: message.content.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub message: String,
    pub context: Vec<ContextMessage>,
    pub mode: GenerationMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedResponse {
    pub text: String,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
}

impl GeneratedResponse {
    /// The collaborator declined to answer; a human should take over.
    pub fn wants_handover(&self) -> bool {
        self.confidence_score == Some(0.0)
    }
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedResponse, AiError>;
}

pub struct HttpResponseGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpResponseGenerator {
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/generate", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ResponseGenerator for HttpResponseGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedResponse, AiError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            return Err(AiError::Status { status: status.as_u16(), body });
        }

        let generated: GeneratedResponse = response.json().await?;
        debug!(
            mode = request.mode.as_str(),
            confidence = ?generated.confidence_score,
            "AI response received"
        );
        Ok(generated)
    }
}
