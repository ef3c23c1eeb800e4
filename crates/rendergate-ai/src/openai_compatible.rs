use crate::provider::*;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAICompatibleConfig {
    /// Base URL (e.g., "http://localhost:8080/v1")
    pub base_url: String,
    /// Model to request
    pub model: String,
    /// Optional API key (local gateways often require none)
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum retries for failed requests
    pub max_retries: u32,
    /// Display name for logs
    pub provider_name: String,
}

impl Default for OpenAICompatibleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            model: "vision-judge-large".to_string(),
            api_key: None,
            timeout_secs: 120,
            max_retries: 3,
            provider_name: "gateway".to_string(),
        }
    }
}

/// Multimodal provider speaking the OpenAI chat-completions dialect,
/// with image references passed as `image_url` content parts.
pub struct OpenAICompatibleProvider {
    config: OpenAICompatibleConfig,
    client: Client,
}

impl OpenAICompatibleProvider {
    pub fn new(config: OpenAICompatibleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    /// Send a request with retry logic
    async fn send_request(&self, request: &ModelRequest) -> Result<ChatResponse> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            match self.try_request(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tracing::warn!(
                            provider = %self.config.provider_name,
                            "request failed (attempt {}/{}), retrying...",
                            attempt + 1,
                            self.config.max_retries + 1
                        );
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("All retry attempts failed")))
    }

    async fn try_request(&self, request: &ModelRequest) -> Result<ChatResponse> {
        let mut messages = Vec::new();

        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: vec![ContentPart::text(system.clone())],
            });
        }

        let mut parts = vec![ContentPart::text(request.prompt.clone())];
        for uri in &request.image_uris {
            parts.push(ContentPart::image(uri.clone()));
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: parts,
        });

        let payload = ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("content-type", "application/json");

        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to reach {} endpoint", self.config.provider_name))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(anyhow!(
                "{} API error ({}): {}",
                self.config.provider_name,
                status,
                error_text
            ));
        }

        response
            .json::<ChatResponse>()
            .await
            .context("Failed to parse chat completion response")
    }
}

#[async_trait]
impl ModelProvider for OpenAICompatibleProvider {
    async fn complete(&self, request: &ModelRequest) -> ModelResult<ModelResponse> {
        let response = self.send_request(request).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Response contained no choices"))?;

        Ok(ModelResponse {
            content: choice.message.content,
            model: response.model,
            total_tokens: response.usage.map(|u| u.total_tokens),
            finish_reason: choice.finish_reason,
        })
    }

    async fn is_available(&self) -> bool {
        let request = ModelRequest {
            prompt: "ping".to_string(),
            max_tokens: 1,
            ..Default::default()
        };
        self.try_request(&request).await.is_ok()
    }

    fn provider_name(&self) -> &str {
        &self.config.provider_name
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// OpenAI-compatible request/response types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    fn text(text: String) -> Self {
        ContentPart::Text { text }
    }

    fn image(url: String) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url },
        }
    }
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: usize,
}
