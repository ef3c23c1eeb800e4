use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use rendergate_core::{AssetGenerator, AssetRef, GenerationRequest, RenderGateError};

/// Configuration for the image/asset generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayGeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for GatewayGeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            model: "render-diffusion-xl".to_string(),
            api_key: None,
            timeout_secs: 180,
            max_retries: 2,
        }
    }
}

/// Asset generator speaking a generations endpoint. The engine treats the
/// call as opaque; correction guidance and the B-slot anchor ride along as
/// request fields.
pub struct GatewayAssetGenerator {
    config: GatewayGeneratorConfig,
    client: Client,
}

impl GatewayAssetGenerator {
    pub fn new(config: GatewayGeneratorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    async fn send_request(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            match self.try_request(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tracing::warn!(
                            model = %self.config.model,
                            "generation request failed (attempt {}/{}), retrying...",
                            attempt + 1,
                            self.config.max_retries + 1
                        );
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("All generation attempts failed")))
    }

    async fn try_request(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let payload = GenerationPayload {
            model: self.config.model.clone(),
            prompt: request.prompt.clone(),
            init_image: request.primary_ref.as_ref().map(|r| r.uri.clone()),
            anchor_image: request.anchor.as_ref().map(|r| r.uri.clone()),
            correction_guidance: request.correction_guidance.clone(),
        };

        let mut builder = self
            .client
            .post(format!("{}/images/generations", self.config.base_url))
            .header("content-type", "application/json");

        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .json(&payload)
            .send()
            .await
            .context("Failed to reach generation endpoint")?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(anyhow!("Generation API error ({}): {}", status, error_text));
        }

        response
            .json::<GenerationResponse>()
            .await
            .context("Failed to parse generation response")
    }
}

#[async_trait]
impl AssetGenerator for GatewayAssetGenerator {
    async fn generate(&self, request: &GenerationRequest) -> rendergate_core::Result<AssetRef> {
        let response = self
            .send_request(request)
            .await
            .map_err(|e| RenderGateError::Provider(e.to_string()))?;

        Ok(AssetRef::new(response.url))
    }
}

#[derive(Debug, Serialize)]
struct GenerationPayload {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    init_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anchor_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correction_guidance: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    url: String,
}
