use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AssetRef, AttemptRecord, BlockReason, CalibrationScope, GenerationRequest, OutputUnit, Phase,
    PipelineRun, QaVerdict, RunId, SpaceCategory, StepState, SupervisorDecision, UnitId,
    UnitStatus,
};

/// Opaque generative call producing an asset from a prompt plus optional
/// references. Consumed, never implemented, by the engine core.
#[async_trait]
pub trait AssetGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<AssetRef>;
}

/// What the judge needs alongside the candidate asset.
#[derive(Debug, Clone)]
pub struct JudgmentRequest {
    pub asset: AssetRef,
    pub category: SpaceCategory,
    pub references: Vec<AssetRef>,
    pub category_rules: String,
    pub calibration_guidance: String,
}

/// Opaque vision-judgment call. Returns free-form structured text that the
/// QA judge parses into a verdict.
#[async_trait]
pub trait VisionJudge: Send + Sync {
    async fn judge(&self, request: &JudgmentRequest) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Opaque LLM audit call for the supervisor gate.
#[async_trait]
pub trait ConsistencyAuditor: Send + Sync {
    async fn audit(&self, job_summary: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Read-side of the calibration store, the only surface the judge sees.
pub trait GuidanceSource: Send + Sync {
    fn build_guidance(&self, category: &SpaceCategory, scope: &CalibrationScope) -> String;
}

/// Authoritative run record. Every transition is a compare-and-set keyed
/// on the expected prior state; a mismatch is a `CasConflict`.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert(&self, run: PipelineRun) -> Result<()>;

    async fn get(&self, id: RunId) -> Result<PipelineRun>;

    /// Atomically move the run from `expected` (phase, sub-state) to the
    /// new (phase, sub-state, step index) triple.
    async fn update_phase(
        &self,
        id: RunId,
        expected: (Phase, StepState),
        new: (Phase, StepState, usize),
    ) -> Result<()>;

    async fn set_enabled(&self, id: RunId, enabled: bool) -> Result<()>;

    async fn set_last_error(&self, id: RunId, error: Option<String>) -> Result<()>;

    /// Increment both retry counters, returning (step_retries, total_retries).
    async fn bump_retries(&self, id: RunId) -> Result<(u32, u32)>;

    async fn reset_step_retries(&self, id: RunId) -> Result<()>;
}

/// Output unit state. `update_status` is the single mutation point for the
/// status field; locked-approved units refuse every mutation.
#[async_trait]
pub trait UnitStore: Send + Sync {
    async fn insert(&self, unit: OutputUnit) -> Result<()>;

    async fn get(&self, id: UnitId) -> Result<OutputUnit>;

    async fn units_for_step(&self, run_id: RunId, step_index: usize) -> Result<Vec<OutputUnit>>;

    /// Compare-and-set on (unit id, expected prior status).
    async fn update_status(
        &self,
        id: UnitId,
        expected: UnitStatus,
        new: UnitStatus,
    ) -> Result<()>;

    /// Record the outcome of one attempt: bump the attempt counter and
    /// stash the verdict (and asset, when one was produced).
    async fn record_attempt_outcome(
        &self,
        id: UnitId,
        asset: Option<AssetRef>,
        verdict: QaVerdict,
    ) -> Result<()>;

    /// Terminal approval: sets status `Approved`, stores the asset and
    /// raises the immutable locked-approved flag.
    async fn lock_approved(&self, id: UnitId, asset: AssetRef) -> Result<()>;

    /// Durable review flag consumable by the external review surface.
    async fn set_blocked(&self, id: UnitId, status: UnitStatus, reason: BlockReason)
        -> Result<()>;

    /// Rollback support: clear asset, verdict, attempt count, block reason
    /// and the locked-approved flag, returning the unit to `Pending`.
    async fn reset_unit(&self, id: UnitId) -> Result<()>;
}

/// Append-only attempt history. `begin` reserves an attempt slot and is
/// the idempotency point for concurrent duplicate dispatch.
#[async_trait]
pub trait AttemptLedger: Send + Sync {
    /// Reserve (unit, attempt). Fails with `DuplicateAttempt` when the slot
    /// exists or another attempt is still open for the unit.
    async fn begin(&self, unit_id: UnitId, attempt: u32) -> Result<()>;

    /// Close the reserved slot with the final immutable record.
    async fn record(&self, record: AttemptRecord) -> Result<()>;

    async fn attempts(&self, unit_id: UnitId) -> Result<Vec<AttemptRecord>>;

    async fn open_attempt(&self, unit_id: UnitId) -> Result<Option<u32>>;

    /// Drop the unit's history so a rolled-back unit can attempt from
    /// index 1 again. Only the rollback path calls this.
    async fn clear(&self, unit_id: UnitId) -> Result<()>;
}

/// Append-only supervisor decision log.
#[async_trait]
pub trait DecisionLog: Send + Sync {
    async fn append(&self, decision: SupervisorDecision) -> Result<()>;

    async fn decisions_for_run(&self, run_id: RunId) -> Result<Vec<SupervisorDecision>>;
}
