use std::sync::Arc;

use async_trait::async_trait;

use rendergate_core::{ConsistencyAuditor, JudgmentRequest, RenderGateError, VisionJudge};

use crate::provider::{ModelProvider, ModelRequest};

const JUDGE_SYSTEM_PROMPT: &str = "You are a strict visual quality judge for interior renders. \
Inspect the candidate image against the stated category rules and reference images. \
Respond with a single JSON object with fields: \
pass (bool), score (0-100), confidence (0-1), \
violations (array of: category_mismatch, structural_mismatch, anchor_mismatch), \
corrected_instructions (string or null).";

const AUDIT_SYSTEM_PROMPT: &str = "You audit pipeline job outputs for internal consistency. \
Respond with a single JSON object with fields: \
consistency_score (0-1), contradictions (array of strings), \
reasoning_quality (one of: sound, shallow, contradictory).";

/// Vision judge backed by a multimodal model provider. The first image is
/// always the candidate asset, followed by the comparison references.
pub struct GatewayVisionJudge {
    provider: Arc<dyn ModelProvider>,
}

impl GatewayVisionJudge {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl VisionJudge for GatewayVisionJudge {
    async fn judge(&self, request: &JudgmentRequest) -> rendergate_core::Result<String> {
        let mut prompt = format!(
            "Candidate category: {}\n\nCategory rules:\n{}\n",
            request.category, request.category_rules
        );
        if !request.calibration_guidance.is_empty() {
            prompt.push_str(&format!(
                "\nCalibration guidance from prior human review:\n{}\n",
                request.calibration_guidance
            ));
        }
        if request.references.is_empty() {
            prompt.push_str("\nNo reference images were provided.\n");
        } else {
            prompt.push_str(&format!(
                "\nThe first image is the candidate; the remaining {} are references it must match.\n",
                request.references.len()
            ));
        }

        let mut image_uris = vec![request.asset.uri.clone()];
        image_uris.extend(request.references.iter().map(|r| r.uri.clone()));

        let model_request = ModelRequest {
            system: Some(JUDGE_SYSTEM_PROMPT.to_string()),
            prompt,
            image_uris,
            max_tokens: 1024,
            temperature: 0.0,
        };

        let response = self
            .provider
            .complete(&model_request)
            .await
            .map_err(|e| RenderGateError::Judgment(e.to_string()))?;

        Ok(response.content)
    }

    fn model_name(&self) -> &str {
        self.provider.model_name()
    }
}

/// Consistency auditor backed by a text model provider.
pub struct GatewayAuditor {
    provider: Arc<dyn ModelProvider>,
}

impl GatewayAuditor {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ConsistencyAuditor for GatewayAuditor {
    async fn audit(&self, job_summary: &str) -> rendergate_core::Result<String> {
        let model_request = ModelRequest {
            system: Some(AUDIT_SYSTEM_PROMPT.to_string()),
            prompt: format!("Job summary to audit:\n\n{}", job_summary),
            image_uris: Vec::new(),
            max_tokens: 1024,
            temperature: 0.0,
        };

        let response = self
            .provider
            .complete(&model_request)
            .await
            .map_err(|e| RenderGateError::Provider(e.to_string()))?;

        Ok(response.content)
    }

    fn model_name(&self) -> &str {
        self.provider.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use rendergate_core::{AssetRef, SpaceCategory};

    struct ScriptedProvider {
        responses: Mutex<Vec<anyhow::Result<String>>>,
        last_request: Mutex<Option<ModelRequest>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<anyhow::Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn complete(&self, request: &ModelRequest) -> crate::provider::ModelResult<crate::provider::ModelResponse> {
            *self.last_request.lock() = Some(request.clone());
            let next = self
                .responses
                .lock()
                .pop()
                .unwrap_or_else(|| Err(anyhow!("script exhausted")));
            next.map(|content| crate::provider::ModelResponse {
                content,
                model: "scripted".to_string(),
                total_tokens: None,
                finish_reason: Some("stop".to_string()),
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn judge_places_candidate_image_first() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("{}".to_string())]));
        let judge = GatewayVisionJudge::new(provider.clone());

        let request = JudgmentRequest {
            asset: AssetRef::new("asset://candidate"),
            category: SpaceCategory::Bedroom,
            references: vec![AssetRef::new("asset://plan")],
            category_rules: "a bedroom must contain a bed".to_string(),
            calibration_guidance: String::new(),
        };

        judge.judge(&request).await.unwrap();

        let seen = provider.last_request.lock().clone().unwrap();
        assert_eq!(seen.image_uris[0], "asset://candidate");
        assert_eq!(seen.image_uris[1], "asset://plan");
        assert!(seen.prompt.contains("bedroom"));
    }

    #[tokio::test]
    async fn judge_provider_errors_surface_as_judgment_errors() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(anyhow!("rate limited"))]));
        let judge = GatewayVisionJudge::new(provider);

        let request = JudgmentRequest {
            asset: AssetRef::new("asset://candidate"),
            category: SpaceCategory::Kitchen,
            references: Vec::new(),
            category_rules: String::new(),
            calibration_guidance: String::new(),
        };

        let err = judge.judge(&request).await.unwrap_err();
        assert!(matches!(err, RenderGateError::Judgment(_)));
    }
}
