use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use tracing::{info, warn};

use rendergate_core::{
    ConsistencyAudit, ConsistencyAuditor, DecisionLog, GateDecision, Phase, PolicyConfig,
    ReasoningQuality, Result, RunStore, SupervisorDecision, WorkerJob,
};

/// Upper bound on images a single worker job may report.
const MAX_IMAGES_PER_JOB: usize = 32;

/// Audit gate that runs after every worker-type job, independent of the
/// per-asset QA judge: schema validation, deterministic rule checks, then
/// an LLM consistency audit. Keeps its own retry ledger (per step and per
/// run) separate from per-unit attempt budgets.
pub struct SupervisorGate {
    auditor: Arc<dyn ConsistencyAuditor>,
    runs: Arc<dyn RunStore>,
    log: Arc<dyn DecisionLog>,
    policy: PolicyConfig,
    audit_timeout: Duration,
}

impl SupervisorGate {
    pub fn new(
        auditor: Arc<dyn ConsistencyAuditor>,
        runs: Arc<dyn RunStore>,
        log: Arc<dyn DecisionLog>,
        policy: PolicyConfig,
        audit_timeout: Duration,
    ) -> Self {
        Self {
            auditor,
            runs,
            log,
            policy,
            audit_timeout,
        }
    }

    pub async fn review(&self, job: &WorkerJob) -> Result<SupervisorDecision> {
        let schema_errors = validate_schema(job.phase, &job.result);
        let rule_failures = check_rules(job.phase, &job.result);
        let audit = self.run_audit(job).await;

        let run = self.runs.get(job.run_id).await?;
        let mut step_remaining = self
            .policy
            .step_retry_budget
            .saturating_sub(run.step_retries);
        let mut run_remaining = self
            .policy
            .run_retry_budget
            .saturating_sub(run.total_retries);

        // Schema failures always dominate: a structurally invalid result
        // is never excused by a good consistency score.
        let decision = if !schema_errors.is_empty() {
            GateDecision::Block
        } else if audit.score < self.policy.consistency_threshold {
            GateDecision::Block
        } else if !rule_failures.is_empty() {
            if step_remaining > 0 && run_remaining > 0 {
                let (step_used, total_used) = self.runs.bump_retries(job.run_id).await?;
                step_remaining = self.policy.step_retry_budget.saturating_sub(step_used);
                run_remaining = self.policy.run_retry_budget.saturating_sub(total_used);
                GateDecision::Retry
            } else {
                GateDecision::Block
            }
        } else {
            GateDecision::Proceed
        };

        if decision == GateDecision::Block {
            let detail = schema_errors
                .first()
                .or_else(|| rule_failures.first())
                .cloned()
                .unwrap_or_else(|| format!("consistency score {:.2} below threshold", audit.score));
            self.runs
                .set_last_error(job.run_id, Some(detail))
                .await?;
        }

        let record = SupervisorDecision {
            run_id: job.run_id,
            step_index: job.step_index,
            job_id: job.id,
            schema_errors,
            rule_failures,
            audit: Some(audit),
            decision,
            step_budget_remaining: step_remaining,
            run_budget_remaining: run_remaining,
            created_at: Utc::now(),
        };

        self.log.append(record.clone()).await?;
        counter!("supervisor_decisions", "decision" => decision.to_string()).increment(1);
        info!(
            run = %job.run_id,
            job = %job.id,
            phase = %job.phase,
            decision = %decision,
            "supervisor gate decided"
        );

        Ok(record)
    }

    /// Audit failures degrade to a zero score so the decision tree blocks
    /// conservatively rather than proceeding unaudited.
    async fn run_audit(&self, job: &WorkerJob) -> ConsistencyAudit {
        let raw = match tokio::time::timeout(self.audit_timeout, self.auditor.audit(&job.summary))
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(job = %job.id, error = %e, "consistency audit failed");
                return unavailable_audit(format!("audit unavailable: {}", e));
            }
            Err(_) => {
                warn!(job = %job.id, "consistency audit timed out");
                return unavailable_audit("audit timed out".to_string());
            }
        };

        match parse_raw_audit(&raw) {
            Ok(audit) => audit,
            Err(e) => {
                warn!(job = %job.id, error = %e, "unparseable audit payload");
                unavailable_audit(format!("audit unparseable: {}", e))
            }
        }
    }
}

fn unavailable_audit(reason: String) -> ConsistencyAudit {
    ConsistencyAudit {
        score: 0.0,
        contradictions: vec![reason],
        reasoning_quality: ReasoningQuality::Contradictory,
    }
}

// Per-service-type result shapes. Deserialization failure is the schema
// failure; extra fields are tolerated, missing required ones are not.

#[derive(Debug, Deserialize)]
struct SpaceDetectionResult {
    spaces: Vec<DetectedSpace>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct DetectedSpace {
    category: String,
}

#[derive(Debug, Deserialize)]
struct CameraIntentResult {
    cameras: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ImageJobResult {
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct AssetJobResult {
    asset_url: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct AnalysisJobResult {
    summary: String,
}

fn validate_schema(phase: Phase, result: &serde_json::Value) -> Vec<String> {
    let check = |r: std::result::Result<(), serde_json::Error>| -> Vec<String> {
        match r {
            Ok(()) => Vec::new(),
            Err(e) => vec![format!("result does not match {} schema: {}", phase, e)],
        }
    };

    match phase {
        Phase::InputAnalysis => check(
            serde_json::from_value::<AnalysisJobResult>(result.clone()).map(|_| ()),
        ),
        Phase::PlanGeneration | Phase::StyleApplication => check(
            serde_json::from_value::<AssetJobResult>(result.clone()).map(|_| ()),
        ),
        Phase::SpaceDetection => check(
            serde_json::from_value::<SpaceDetectionResult>(result.clone()).map(|_| ()),
        ),
        Phase::CameraIntent => check(
            serde_json::from_value::<CameraIntentResult>(result.clone()).map(|_| ()),
        ),
        Phase::RenderAndQa | Phase::Panorama | Phase::Merge => check(
            serde_json::from_value::<ImageJobResult>(result.clone()).map(|_| ()),
        ),
        Phase::Complete => vec!["no worker jobs run in the complete phase".to_string()],
    }
}

fn check_rules(phase: Phase, result: &serde_json::Value) -> Vec<String> {
    let mut failures = Vec::new();

    // No unhandled error field set, for any service type.
    if let Some(error) = result.get("error") {
        if !error.is_null() {
            failures.push(format!("result carries an unhandled error field: {}", error));
        }
    }

    match phase {
        Phase::SpaceDetection => {
            let count = result
                .get("spaces")
                .and_then(|s| s.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            if count == 0 {
                failures.push("no spaces detected".to_string());
            }
        }
        Phase::RenderAndQa | Phase::Panorama | Phase::Merge => {
            let count = result
                .get("images")
                .and_then(|s| s.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            if count == 0 {
                failures.push("job produced no images".to_string());
            } else if count > MAX_IMAGES_PER_JOB {
                failures.push(format!(
                    "image count {} exceeds bound {}",
                    count, MAX_IMAGES_PER_JOB
                ));
            }
        }
        _ => {}
    }

    failures
}

/// Raw audit shape. `consistency_score` is required; the rest default.
#[derive(Debug, Deserialize)]
struct RawAudit {
    consistency_score: f64,
    #[serde(default)]
    contradictions: Vec<String>,
    #[serde(default)]
    reasoning_quality: Option<String>,
}

fn parse_raw_audit(raw: &str) -> std::result::Result<ConsistencyAudit, String> {
    let start = raw.find('{').ok_or("no JSON object in audit response")?;
    let end = raw.rfind('}').ok_or("no JSON object in audit response")?;
    if end <= start {
        return Err("no JSON object in audit response".to_string());
    }

    let parsed: RawAudit =
        serde_json::from_str(&raw[start..=end]).map_err(|e| e.to_string())?;

    let reasoning_quality = match parsed.reasoning_quality.as_deref() {
        Some("sound") | None => ReasoningQuality::Sound,
        Some("shallow") => ReasoningQuality::Shallow,
        Some("contradictory") => ReasoningQuality::Contradictory,
        Some(other) => {
            warn!(label = other, "unknown reasoning quality label");
            ReasoningQuality::Shallow
        }
    };

    Ok(ConsistencyAudit {
        score: parsed.consistency_score.clamp(0.0, 1.0) as f32,
        contradictions: parsed.contradictions,
        reasoning_quality,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rendergate_core::{PipelineRun, RenderGateError};
    use rendergate_store::{InMemoryDecisionLog, InMemoryRunStore};
    use serde_json::json;
    use uuid::Uuid;

    struct ScriptedAuditor {
        responses: Mutex<Vec<rendergate_core::Result<String>>>,
    }

    impl ScriptedAuditor {
        fn returning(raw: &str) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(vec![Ok(raw.to_string())]),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(vec![Err(RenderGateError::Provider("down".into()))]),
            })
        }
    }

    #[async_trait]
    impl ConsistencyAuditor for ScriptedAuditor {
        async fn audit(&self, _job_summary: &str) -> rendergate_core::Result<String> {
            self.responses
                .lock()
                .pop()
                .unwrap_or_else(|| Ok(r#"{"consistency_score": 0.95}"#.to_string()))
        }

        fn model_name(&self) -> &str {
            "scripted-auditor"
        }
    }

    async fn gate(auditor: Arc<ScriptedAuditor>) -> (SupervisorGate, PipelineRun) {
        let runs = Arc::new(InMemoryRunStore::new());
        let log = Arc::new(InMemoryDecisionLog::new());
        let run = PipelineRun::new();
        runs.insert(run.clone()).await.unwrap();
        let gate = SupervisorGate::new(
            auditor,
            runs,
            log,
            PolicyConfig::default(),
            Duration::from_secs(5),
        );
        (gate, run)
    }

    fn job(run: &PipelineRun, phase: Phase, result: serde_json::Value) -> WorkerJob {
        WorkerJob {
            id: Uuid::new_v4(),
            run_id: run.id,
            step_index: phase.step_index(),
            phase,
            result,
            summary: "detected 3 spaces from the styled plan".to_string(),
        }
    }

    #[tokio::test]
    async fn schema_failure_dominates_high_consistency_score() {
        let auditor = ScriptedAuditor::returning(r#"{"consistency_score": 0.99}"#);
        let (gate, run) = gate(auditor).await;

        // Missing required `spaces` field.
        let job = job(&run, Phase::SpaceDetection, json!({"rooms": []}));
        let decision = gate.review(&job).await.unwrap();

        assert_eq!(decision.decision, GateDecision::Block);
        assert!(!decision.schema_errors.is_empty());
    }

    #[tokio::test]
    async fn low_consistency_score_blocks() {
        let auditor = ScriptedAuditor::returning(r#"{"consistency_score": 0.4}"#);
        let (gate, run) = gate(auditor).await;

        let job = job(
            &run,
            Phase::SpaceDetection,
            json!({"spaces": [{"category": "bedroom"}]}),
        );
        let decision = gate.review(&job).await.unwrap();
        assert_eq!(decision.decision, GateDecision::Block);
    }

    #[tokio::test]
    async fn rule_failure_retries_while_budget_remains() {
        let auditor = ScriptedAuditor::returning(r#"{"consistency_score": 0.9}"#);
        let (gate, run) = gate(auditor).await;

        let job = job(&run, Phase::SpaceDetection, json!({"spaces": []}));
        let decision = gate.review(&job).await.unwrap();

        assert_eq!(decision.decision, GateDecision::Retry);
        assert_eq!(decision.step_budget_remaining, 2);
        assert_eq!(decision.run_budget_remaining, 9);
    }

    #[tokio::test]
    async fn exhausted_step_budget_turns_retry_into_block() {
        let auditor = Arc::new(ScriptedAuditor {
            responses: Mutex::new(Vec::new()),
        });
        let (gate, run) = gate(auditor).await;

        let failing_job = job(&run, Phase::SpaceDetection, json!({"spaces": []}));
        for _ in 0..3 {
            let decision = gate.review(&failing_job).await.unwrap();
            assert_eq!(decision.decision, GateDecision::Retry);
        }

        let decision = gate.review(&failing_job).await.unwrap();
        assert_eq!(decision.decision, GateDecision::Block);
    }

    #[tokio::test]
    async fn clean_job_proceeds() {
        let auditor = ScriptedAuditor::returning(
            r#"{"consistency_score": 0.92, "contradictions": [], "reasoning_quality": "sound"}"#,
        );
        let (gate, run) = gate(auditor).await;

        let job = job(
            &run,
            Phase::SpaceDetection,
            json!({"spaces": [{"category": "bedroom"}, {"category": "kitchen"}]}),
        );
        let decision = gate.review(&job).await.unwrap();

        assert_eq!(decision.decision, GateDecision::Proceed);
        assert!(decision.schema_errors.is_empty());
        assert!(decision.rule_failures.is_empty());
    }

    #[tokio::test]
    async fn audit_unavailability_blocks_conservatively() {
        let auditor = ScriptedAuditor::failing();
        let (gate, run) = gate(auditor).await;

        let job = job(
            &run,
            Phase::SpaceDetection,
            json!({"spaces": [{"category": "bedroom"}]}),
        );
        let decision = gate.review(&job).await.unwrap();

        assert_eq!(decision.decision, GateDecision::Block);
        let audit = decision.audit.unwrap();
        assert_eq!(audit.score, 0.0);
    }

    #[tokio::test]
    async fn unhandled_error_field_fails_rules() {
        let auditor = ScriptedAuditor::returning(r#"{"consistency_score": 0.9}"#);
        let (gate, run) = gate(auditor).await;

        let job = job(
            &run,
            Phase::Panorama,
            json!({"images": ["asset://p1"], "error": "partial stitch"}),
        );
        let decision = gate.review(&job).await.unwrap();
        assert_eq!(decision.decision, GateDecision::Retry);
        assert!(decision.rule_failures[0].contains("unhandled error field"));
    }

    #[test]
    fn image_count_bound_is_enforced() {
        let images: Vec<String> = (0..33).map(|i| format!("asset://{}", i)).collect();
        let failures = check_rules(Phase::RenderAndQa, &json!({ "images": images }));
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("exceeds bound"));
    }
}
