use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type RunId = Uuid;
pub type UnitId = Uuid;
pub type GroupId = Uuid;
pub type JobId = Uuid;

/// Opaque reference to a generated binary asset. The engine never touches
/// asset bytes; it only threads references between generation calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: Uuid,
    pub uri: String,
}

impl AssetRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uri: uri.into(),
        }
    }
}

/// Ordered pipeline phases. The step index of a run must always map onto
/// exactly one phase; transitions that land on any other pair are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    InputAnalysis,
    PlanGeneration,
    StyleApplication,
    SpaceDetection,
    CameraIntent,
    RenderAndQa,
    Panorama,
    Merge,
    Complete,
}

impl Phase {
    pub const ORDERED: [Phase; 9] = [
        Phase::InputAnalysis,
        Phase::PlanGeneration,
        Phase::StyleApplication,
        Phase::SpaceDetection,
        Phase::CameraIntent,
        Phase::RenderAndQa,
        Phase::Panorama,
        Phase::Merge,
        Phase::Complete,
    ];

    pub fn step_index(&self) -> usize {
        Self::ORDERED
            .iter()
            .position(|p| p == self)
            .unwrap_or(Self::ORDERED.len() - 1)
    }

    pub fn for_step(step_index: usize) -> Option<Phase> {
        Self::ORDERED.get(step_index).copied()
    }

    pub fn next(&self) -> Option<Phase> {
        Self::ORDERED.get(self.step_index() + 1).copied()
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Phase::Complete)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::InputAnalysis => "input_analysis",
            Phase::PlanGeneration => "plan_generation",
            Phase::StyleApplication => "style_application",
            Phase::SpaceDetection => "space_detection",
            Phase::CameraIntent => "camera_intent",
            Phase::RenderAndQa => "render_and_qa",
            Phase::Panorama => "panorama",
            Phase::Merge => "merge",
            Phase::Complete => "complete",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "input_analysis" => Ok(Phase::InputAnalysis),
            "plan_generation" => Ok(Phase::PlanGeneration),
            "style_application" => Ok(Phase::StyleApplication),
            "space_detection" => Ok(Phase::SpaceDetection),
            "camera_intent" => Ok(Phase::CameraIntent),
            "render_and_qa" => Ok(Phase::RenderAndQa),
            "panorama" => Ok(Phase::Panorama),
            "merge" => Ok(Phase::Merge),
            "complete" => Ok(Phase::Complete),
            other => Err(format!("unknown phase: {}", other)),
        }
    }
}

/// Sub-state of the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Review,
    Complete,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepState::Pending => "pending",
            StepState::Running => "running",
            StepState::Review => "review",
            StepState::Complete => "complete",
            StepState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One execution of the multi-step workflow for one input. Mutated only by
/// the step state machine, always via compare-and-set on the prior state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub phase: Phase,
    pub step_state: StepState,
    pub step_index: usize,
    pub enabled: bool,
    pub total_retries: u32,
    pub step_retries: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            phase: Phase::InputAnalysis,
            step_state: StepState::Pending,
            step_index: 0,
            enabled: true,
            total_retries: 0,
            step_retries: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A run is well-formed only when its step index maps onto its phase.
    pub fn is_consistent(&self) -> bool {
        Phase::for_step(self.step_index) == Some(self.phase)
    }
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot of a unit inside its dependency group. The grounded slot ("B") may
/// only run against the anchor slot's ("A") approved asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSlot {
    Anchor,
    Grounded,
}

impl UnitSlot {
    pub fn label(&self) -> &'static str {
        match self {
            UnitSlot::Anchor => "A",
            UnitSlot::Grounded => "B",
        }
    }
}

/// What kind of artifact the unit produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Render,
    Panorama,
    Merge,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitKind::Render => "render",
            UnitKind::Panorama => "panorama",
            UnitKind::Merge => "merge",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Queued,
    Running,
    NeedsReview,
    Approved,
    Rejected,
    Blocked,
    Failed,
}

impl UnitStatus {
    /// Terminal for phase advancement: approved or explicitly excluded.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Approved | UnitStatus::Rejected)
    }

    /// States that pin the owning phase in review.
    pub fn pins_review(&self) -> bool {
        matches!(
            self,
            UnitStatus::NeedsReview | UnitStatus::Blocked | UnitStatus::Failed
        )
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, UnitStatus::Queued | UnitStatus::Running)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Queued => "queued",
            UnitStatus::Running => "running",
            UnitStatus::NeedsReview => "needs_review",
            UnitStatus::Approved => "approved",
            UnitStatus::Rejected => "rejected",
            UnitStatus::Blocked => "blocked",
            UnitStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Declared category of the space a unit belongs to; drives the fixed
/// judgment rules applied by the QA judge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceCategory {
    Bedroom,
    Bathroom,
    Kitchen,
    LivingRoom,
    DiningRoom,
    Office,
    Hallway,
    Other(String),
}

impl fmt::Display for SpaceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpaceCategory::Bedroom => "bedroom",
            SpaceCategory::Bathroom => "bathroom",
            SpaceCategory::Kitchen => "kitchen",
            SpaceCategory::LivingRoom => "living_room",
            SpaceCategory::DiningRoom => "dining_room",
            SpaceCategory::Office => "office",
            SpaceCategory::Hallway => "hallway",
            SpaceCategory::Other(s) => s.as_str(),
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SpaceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bedroom" => Ok(SpaceCategory::Bedroom),
            "bathroom" => Ok(SpaceCategory::Bathroom),
            "kitchen" => Ok(SpaceCategory::Kitchen),
            "living_room" => Ok(SpaceCategory::LivingRoom),
            "dining_room" => Ok(SpaceCategory::DiningRoom),
            "office" => Ok(SpaceCategory::Office),
            "hallway" => Ok(SpaceCategory::Hallway),
            other => Ok(SpaceCategory::Other(other.to_string())),
        }
    }
}

/// Violation flags raised by the QA judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    CategoryMismatch,
    StructuralMismatch,
    AnchorMismatch,
    ValidationIncomplete,
}

impl Violation {
    /// Critical violations bypass the remaining retry budget: further
    /// automated attempts are unlikely to self-correct a category or
    /// structural mismatch.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Violation::CategoryMismatch | Violation::StructuralMismatch
        )
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Violation::CategoryMismatch => "category_mismatch",
            Violation::StructuralMismatch => "structural_mismatch",
            Violation::AnchorMismatch => "anchor_mismatch",
            Violation::ValidationIncomplete => "validation_incomplete",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Approve,
    Retry,
    NeedsHuman,
}

/// Structured judgment for one attempt. Produced fresh per attempt and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaVerdict {
    pub pass: bool,
    pub score: u8,
    pub confidence: f32,
    pub violations: Vec<Violation>,
    pub corrected_instructions: Option<String>,
    pub recommended: RecommendedAction,
    pub judged_by: String,
    pub created_at: DateTime<Utc>,
}

impl QaVerdict {
    pub fn has_critical_violation(&self) -> bool {
        self.violations.iter().any(|v| v.is_critical())
    }

    /// Verdict used when every judgment path failed: never an approval.
    pub fn needs_human(judged_by: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pass: false,
            score: 0,
            confidence: 0.0,
            violations: Vec::new(),
            corrected_instructions: Some(reason.into()),
            recommended: RecommendedAction::NeedsHuman,
            judged_by: judged_by.into(),
            created_at: Utc::now(),
        }
    }
}

/// Machine-readable reason a unit stopped advancing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    BudgetExhausted { attempts: u32 },
    CriticalViolation { violation: Violation },
    DependencyFailed { anchor_unit: UnitId, reason: String },
    JudgeUnavailable { detail: String },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::BudgetExhausted { attempts } => {
                write!(f, "attempt budget exhausted after {} attempts", attempts)
            }
            BlockReason::CriticalViolation { violation } => {
                write!(f, "critical violation: {}", violation)
            }
            BlockReason::DependencyFailed {
                anchor_unit,
                reason,
            } => write!(f, "anchor unit {} failed: {}", anchor_unit, reason),
            BlockReason::JudgeUnavailable { detail } => {
                write!(f, "judgment unavailable: {}", detail)
            }
        }
    }
}

/// One generatable artifact within a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputUnit {
    pub id: UnitId,
    pub run_id: RunId,
    pub group_id: GroupId,
    pub space_id: Uuid,
    pub step_index: usize,
    pub slot: UnitSlot,
    pub kind: UnitKind,
    pub category: SpaceCategory,
    pub status: UnitStatus,
    /// Prompt supplied by the external prompt-templating system.
    pub prompt: String,
    /// Comparison references the judge must check against (e.g. the styled
    /// floor plan). The engine appends the anchor asset for grounded units.
    pub references: Vec<AssetRef>,
    /// Declared per step: whether judgment must compare against references.
    pub requires_reference_comparison: bool,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub locked_approved: bool,
    pub asset: Option<AssetRef>,
    pub last_verdict: Option<QaVerdict>,
    pub blocked_reason: Option<BlockReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutputUnit {
    pub fn new(
        run_id: RunId,
        group_id: GroupId,
        space_id: Uuid,
        step_index: usize,
        slot: UnitSlot,
        kind: UnitKind,
        category: SpaceCategory,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        let prompt = format!("{} of {} space", kind, category);
        Self {
            id: Uuid::new_v4(),
            run_id,
            group_id,
            space_id,
            step_index,
            slot,
            kind,
            category,
            status: UnitStatus::Pending,
            prompt,
            references: Vec::new(),
            requires_reference_comparison: false,
            attempt_count: 0,
            max_attempts,
            locked_approved: false,
            asset: None,
            last_verdict: None,
            blocked_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn budget_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }
}

/// Input to one generation attempt. Retries carry the previous verdict's
/// corrected instructions so each attempt is strictly more constrained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub primary_ref: Option<AssetRef>,
    pub anchor: Option<AssetRef>,
    pub correction_guidance: Option<String>,
}

/// Append-only row per (unit, attempt index).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub unit_id: UnitId,
    pub attempt: u32,
    pub prompt: String,
    pub guidance: Option<String>,
    pub asset: Option<AssetRef>,
    pub verdict: Option<QaVerdict>,
    pub created_at: DateTime<Utc>,
}

/// Scope under which calibration is recorded and looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationScope {
    Global,
    Run(RunId),
}

/// A policy rule promoted from repeated human corrections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub text: String,
    pub support: u32,
}

/// Per (scope, category) learned counters and promoted rules. Mutated only
/// by recorded human feedback; read-only to the judge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub false_accepts: u32,
    pub false_rejects: u32,
    pub confirmed_correct: u32,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanDecision {
    Approve,
    Reject,
}

/// Why a human overrode (or confirmed) the judge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCategory {
    WrongCategory,
    StructureMismatch,
    StyleMismatch,
    QualityTooLow,
    JudgeTooStrict,
    Other(String),
}

impl fmt::Display for ReasonCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasonCategory::WrongCategory => "wrong_category",
            ReasonCategory::StructureMismatch => "structure_mismatch",
            ReasonCategory::StyleMismatch => "style_mismatch",
            ReasonCategory::QualityTooLow => "quality_too_low",
            ReasonCategory::JudgeTooStrict => "judge_too_strict",
            ReasonCategory::Other(s) => s.as_str(),
        };
        write!(f, "{}", s)
    }
}

/// A completed worker job submitted to the supervisor gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerJob {
    pub id: JobId,
    pub run_id: RunId,
    pub step_index: usize,
    pub phase: Phase,
    pub result: serde_json::Value,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningQuality {
    Sound,
    Shallow,
    Contradictory,
}

/// Parsed LLM consistency audit for a worker job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyAudit {
    pub score: f32,
    pub contradictions: Vec<String>,
    pub reasoning_quality: ReasoningQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Proceed,
    Retry,
    Block,
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateDecision::Proceed => "proceed",
            GateDecision::Retry => "retry",
            GateDecision::Block => "block",
        };
        write!(f, "{}", s)
    }
}

/// Append-only supervisor record, one per supervised job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorDecision {
    pub run_id: RunId,
    pub step_index: usize,
    pub job_id: JobId,
    pub schema_errors: Vec<String>,
    pub rule_failures: Vec<String>,
    pub audit: Option<ConsistencyAudit>,
    pub decision: GateDecision,
    pub step_budget_remaining: u32,
    pub run_budget_remaining: u32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_table_is_bijective() {
        for (idx, phase) in Phase::ORDERED.iter().enumerate() {
            assert_eq!(phase.step_index(), idx);
            assert_eq!(Phase::for_step(idx), Some(*phase));
        }
        assert_eq!(Phase::for_step(Phase::ORDERED.len()), None);
    }

    #[test]
    fn phase_round_trips_through_str() {
        for phase in Phase::ORDERED {
            let parsed: Phase = phase.to_string().parse().unwrap();
            assert_eq!(parsed, phase);
        }
    }

    #[test]
    fn new_run_is_consistent() {
        let run = PipelineRun::new();
        assert!(run.is_consistent());
        assert_eq!(run.phase, Phase::InputAnalysis);
        assert!(run.enabled);
    }

    #[test]
    fn critical_violations() {
        assert!(Violation::CategoryMismatch.is_critical());
        assert!(Violation::StructuralMismatch.is_critical());
        assert!(!Violation::AnchorMismatch.is_critical());
        assert!(!Violation::ValidationIncomplete.is_critical());
    }

    #[test]
    fn needs_human_verdict_never_passes() {
        let v = QaVerdict::needs_human("fallback", "all judgment paths failed");
        assert!(!v.pass);
        assert_eq!(v.confidence, 0.0);
        assert_eq!(v.recommended, RecommendedAction::NeedsHuman);
    }

    #[test]
    fn terminal_and_review_statuses_are_disjoint() {
        let all = [
            UnitStatus::Pending,
            UnitStatus::Queued,
            UnitStatus::Running,
            UnitStatus::NeedsReview,
            UnitStatus::Approved,
            UnitStatus::Rejected,
            UnitStatus::Blocked,
            UnitStatus::Failed,
        ];
        for status in all {
            assert!(!(status.is_terminal() && status.pins_review()));
        }
    }
}
