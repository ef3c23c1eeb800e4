use std::sync::Arc;

use anyhow::Result;

use rendergate_core::{AssetGenerator, ConsistencyAuditor, ProviderConfig, VisionJudge};

use crate::collaborators::{GatewayAuditor, GatewayVisionJudge};
use crate::generation::{GatewayAssetGenerator, GatewayGeneratorConfig};
use crate::openai_compatible::{OpenAICompatibleConfig, OpenAICompatibleProvider};
use crate::provider::ModelProvider;

/// Factory for creating the collaborator set from configuration.
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create the asset generator.
    pub fn generator(config: &ProviderConfig) -> Result<Arc<dyn AssetGenerator>> {
        let generator = GatewayAssetGenerator::new(GatewayGeneratorConfig {
            base_url: config.base_url.clone(),
            model: config.generation_model.clone(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })?;
        Ok(Arc::new(generator))
    }

    /// Create the primary vision judge.
    pub fn vision_judge(config: &ProviderConfig) -> Result<Arc<dyn VisionJudge>> {
        Ok(Arc::new(GatewayVisionJudge::new(Self::chat_provider(
            config,
            &config.judge_model,
            "judge-primary",
        )?)))
    }

    /// Create the secondary judgment model used after a primary failure.
    pub fn vision_judge_fallback(config: &ProviderConfig) -> Result<Arc<dyn VisionJudge>> {
        Ok(Arc::new(GatewayVisionJudge::new(Self::chat_provider(
            config,
            &config.judge_fallback_model,
            "judge-fallback",
        )?)))
    }

    /// Create the supervisor's consistency auditor.
    pub fn auditor(config: &ProviderConfig) -> Result<Arc<dyn ConsistencyAuditor>> {
        Ok(Arc::new(GatewayAuditor::new(Self::chat_provider(
            config,
            &config.audit_model,
            "auditor",
        )?)))
    }

    fn chat_provider(
        config: &ProviderConfig,
        model: &str,
        name: &str,
    ) -> Result<Arc<dyn ModelProvider>> {
        let provider = OpenAICompatibleProvider::new(OpenAICompatibleConfig {
            base_url: config.base_url.clone(),
            model: model.to_string(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            provider_name: name.to_string(),
        })?;
        Ok(Arc::new(provider))
    }
}
