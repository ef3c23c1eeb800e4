use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

use rendergate_core::{
    AssetRef, CalibrationScope, GuidanceSource, JudgmentRequest, QaVerdict, RecommendedAction,
    SpaceCategory, Violation, VisionJudge,
};

use crate::rules::rules_for;

/// Score ceiling applied whenever a critical violation is flagged; an
/// optimistic raw score never survives a category or structural mismatch.
const VIOLATION_SCORE_CAP: u8 = 30;

/// Declared context for one evaluation.
#[derive(Debug, Clone)]
pub struct JudgeContext {
    pub category: SpaceCategory,
    pub references: Vec<AssetRef>,
    /// Steps that compare against a styled plan or anchor declare this;
    /// missing references then flag the verdict instead of passing it.
    pub requires_reference_comparison: bool,
    pub scope: CalibrationScope,
}

/// The QA judge: assembles the judgment request, invokes the vision
/// judgment service (primary, then fallback once), and normalizes the raw
/// result into a structured verdict. Never errors out of `evaluate`; every
/// failure path degrades into a verdict that routes through the normal
/// retry/budget logic.
pub struct QaJudge {
    primary: Arc<dyn VisionJudge>,
    fallback: Arc<dyn VisionJudge>,
    guidance: Arc<dyn GuidanceSource>,
    timeout: Duration,
}

impl QaJudge {
    pub fn new(
        primary: Arc<dyn VisionJudge>,
        fallback: Arc<dyn VisionJudge>,
        guidance: Arc<dyn GuidanceSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            guidance,
            timeout,
        }
    }

    pub async fn evaluate(&self, asset: &AssetRef, context: &JudgeContext) -> QaVerdict {
        let request = JudgmentRequest {
            asset: asset.clone(),
            category: context.category.clone(),
            references: context.references.clone(),
            category_rules: rules_for(&context.category),
            calibration_guidance: self
                .guidance
                .build_guidance(&context.category, &context.scope),
        };

        let (raw, judged_by) = match self.invoke(&request).await {
            Ok(pair) => pair,
            Err(detail) => {
                counter!("judge_unavailable").increment(1);
                return QaVerdict::needs_human(
                    self.fallback.model_name(),
                    format!("both judgment services failed: {}", detail),
                );
            }
        };

        let verdict = match parse_raw_judgment(&raw) {
            Ok(parsed) => normalize(parsed, &judged_by, context),
            Err(e) => {
                // Malformed judgment payloads are an automatic fail routed
                // through normal retry logic, not a crash.
                warn!(model = %judged_by, error = %e, "unparseable judgment payload");
                counter!("judge_parse_failures").increment(1);
                QaVerdict {
                    pass: false,
                    score: 0,
                    confidence: 0.0,
                    violations: Vec::new(),
                    corrected_instructions: Some(format!("judgment was unparseable: {}", e)),
                    recommended: RecommendedAction::Retry,
                    judged_by,
                    created_at: Utc::now(),
                }
            }
        };

        counter!("judge_verdicts", "pass" => verdict.pass.to_string()).increment(1);
        verdict
    }

    /// Primary judgment with one fallback-model retry. Timeouts count as
    /// service failures.
    async fn invoke(&self, request: &JudgmentRequest) -> Result<(String, String), String> {
        match tokio::time::timeout(self.timeout, self.primary.judge(request)).await {
            Ok(Ok(raw)) => return Ok((raw, self.primary.model_name().to_string())),
            Ok(Err(e)) => {
                warn!(model = %self.primary.model_name(), error = %e,
                    "primary judgment failed, trying fallback");
            }
            Err(_) => {
                warn!(model = %self.primary.model_name(), "primary judgment timed out, trying fallback");
            }
        }

        match tokio::time::timeout(self.timeout, self.fallback.judge(request)).await {
            Ok(Ok(raw)) => Ok((raw, self.fallback.model_name().to_string())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("fallback judgment timed out".to_string()),
        }
    }
}

/// Raw judgment shape as returned by the model. `pass` and `score` are
/// required; a payload missing either is a parse failure, never defaulted.
#[derive(Debug, Deserialize)]
struct RawJudgment {
    pass: bool,
    score: f64,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    violations: Vec<String>,
    #[serde(default)]
    corrected_instructions: Option<String>,
}

fn parse_raw_judgment(raw: &str) -> Result<RawJudgment, String> {
    let json = extract_json_object(raw).ok_or("no JSON object in response")?;
    serde_json::from_str::<RawJudgment>(json).map_err(|e| e.to_string())
}

/// Models often wrap their JSON in prose or code fences; take the outermost
/// object.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn normalize(raw: RawJudgment, judged_by: &str, context: &JudgeContext) -> QaVerdict {
    let mut violations: Vec<Violation> = Vec::new();
    for v in &raw.violations {
        match v.as_str() {
            "category_mismatch" => violations.push(Violation::CategoryMismatch),
            "structural_mismatch" => violations.push(Violation::StructuralMismatch),
            "anchor_mismatch" => violations.push(Violation::AnchorMismatch),
            other => debug!(flag = other, "ignoring unknown violation flag"),
        }
    }

    let mut pass = raw.pass;
    let mut score = raw.score.clamp(0.0, 100.0).round() as u8;
    let confidence = raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0) as f32;

    // A flagged violation overrides any optimistic raw score.
    if violations.iter().any(|v| v.is_critical()) {
        pass = false;
        score = score.min(VIOLATION_SCORE_CAP);
    }

    // Required references were unavailable: flag rather than silently pass.
    if context.requires_reference_comparison && context.references.is_empty() {
        violations.push(Violation::ValidationIncomplete);
        pass = false;
    }

    let recommended = if pass {
        RecommendedAction::Approve
    } else if violations.iter().any(|v| v.is_critical()) {
        RecommendedAction::NeedsHuman
    } else {
        RecommendedAction::Retry
    };

    QaVerdict {
        pass,
        score,
        confidence,
        violations,
        corrected_instructions: raw.corrected_instructions,
        recommended,
        judged_by: judged_by.to_string(),
        created_at: Utc::now(),
    }
}
