use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for model provider operations
pub type ModelResult<T> = anyhow::Result<T>;

/// A single multimodal completion request: one text prompt plus zero or
/// more image references the model should inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Optional system instruction.
    pub system: Option<String>,
    /// User prompt text.
    pub prompt: String,
    /// URIs of images attached to the request.
    pub image_uris: Vec<String>,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
    /// Sampling temperature (0.0 to 2.0).
    pub temperature: f32,
}

impl Default for ModelRequest {
    fn default() -> Self {
        Self {
            system: None,
            prompt: String::new(),
            image_uris: Vec::new(),
            max_tokens: 2048,
            temperature: 0.1,
        }
    }
}

/// Response from a model completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text content
    pub content: String,
    /// Model used for generation
    pub model: String,
    /// Total tokens used, when the endpoint reports usage
    pub total_tokens: Option<usize>,
    /// Finish reason (e.g., "stop", "length")
    pub finish_reason: Option<String>,
}

/// Main trait for multimodal model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Run one completion request.
    async fn complete(&self, request: &ModelRequest) -> ModelResult<ModelResponse>;

    /// Check if the provider is available and ready.
    async fn is_available(&self) -> bool;

    /// Get the name of this provider.
    fn provider_name(&self) -> &str;

    /// Get the model identifier.
    fn model_name(&self) -> &str;
}
