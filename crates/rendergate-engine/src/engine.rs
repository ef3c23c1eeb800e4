use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tracing::{error, info, warn};

use rendergate_core::{
    AssetGenerator, AssetRef, AttemptLedger, AttemptRecord, CalibrationScope, ConsistencyAuditor,
    DecisionLog, EngineConfig, GateDecision, GenerationRequest, HumanDecision, OutputUnit, Phase,
    PipelineRun, QaVerdict, ReasonCategory, RecommendedAction, RenderGateError, Result, RunId,
    RunStore, SpaceCategory, StepState, SupervisorDecision, UnitId, UnitKind, UnitSlot,
    UnitStatus, UnitStore, VisionJudge, WorkerJob,
};
use rendergate_ai::factory::ProviderFactory;
use rendergate_judge::{CalibrationStore, JudgeContext, QaJudge};
use rendergate_store::{
    InMemoryAttemptLedger, InMemoryDecisionLog, InMemoryRunStore, InMemoryUnitStore,
};

use crate::batch::{group_units, BatchController, UnitGroup};
use crate::budget::{BudgetManager, NextAction};
use crate::dependency::{AnchorGate, DependencyEnforcer};
use crate::state_machine::{StepOutcome, StepStateMachine};
use crate::supervisor::SupervisorGate;

/// Collaborators and storage the engine is wired with.
pub struct EngineDeps {
    pub runs: Arc<dyn RunStore>,
    pub units: Arc<dyn UnitStore>,
    pub ledger: Arc<dyn AttemptLedger>,
    pub decisions: Arc<dyn DecisionLog>,
    pub generator: Arc<dyn AssetGenerator>,
    pub judge_primary: Arc<dyn VisionJudge>,
    pub judge_fallback: Arc<dyn VisionJudge>,
    pub auditor: Arc<dyn ConsistencyAuditor>,
}

/// The quality-gated execution engine facade. Owns no state beyond its
/// configuration; everything durable lives behind the storage traits.
pub struct Engine {
    config: EngineConfig,
    runs: Arc<dyn RunStore>,
    units: Arc<dyn UnitStore>,
    ledger: Arc<dyn AttemptLedger>,
    generator: Arc<dyn AssetGenerator>,
    judge: QaJudge,
    calibration: Arc<CalibrationStore>,
    supervisor: SupervisorGate,
    state: StepStateMachine,
    budget: BudgetManager,
    batch: BatchController,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let calibration = Arc::new(CalibrationStore::new(config.policy.rule_promotion_support));
        let judge = QaJudge::new(
            deps.judge_primary,
            deps.judge_fallback,
            calibration.clone(),
            Duration::from_secs(config.timeouts.judgment_secs),
        );
        let supervisor = SupervisorGate::new(
            deps.auditor,
            deps.runs.clone(),
            deps.decisions,
            config.policy.clone(),
            Duration::from_secs(config.timeouts.audit_secs),
        );
        let state = StepStateMachine::new(deps.runs.clone(), deps.units.clone());
        let budget = BudgetManager::new(config.policy.max_attempts_per_unit);
        let batch = BatchController::new(config.policy.concurrency_window);

        Self {
            runs: deps.runs,
            units: deps.units,
            ledger: deps.ledger,
            generator: deps.generator,
            judge,
            calibration,
            supervisor,
            state,
            budget,
            batch,
            config,
        }
    }

    /// Wire an engine from configuration alone: gateway model providers
    /// for generation, judgment and audit, plus fresh in-memory stores.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let wire = |e: anyhow::Error| RenderGateError::Provider(e.to_string());
        let provider = &config.provider;
        let deps = EngineDeps {
            runs: Arc::new(InMemoryRunStore::new()),
            units: Arc::new(InMemoryUnitStore::new()),
            ledger: Arc::new(InMemoryAttemptLedger::new()),
            decisions: Arc::new(InMemoryDecisionLog::new()),
            generator: ProviderFactory::generator(provider).map_err(wire)?,
            judge_primary: ProviderFactory::vision_judge(provider).map_err(wire)?,
            judge_fallback: ProviderFactory::vision_judge_fallback(provider).map_err(wire)?,
            auditor: ProviderFactory::auditor(provider).map_err(wire)?,
        };
        Ok(Self::new(config, deps))
    }

    /// Create and persist a fresh run at the first phase.
    pub async fn create_run(&self) -> Result<PipelineRun> {
        let run = PipelineRun::new();
        self.runs.insert(run.clone()).await?;
        info!(run = %run.id, "run created");
        Ok(run)
    }

    /// Register an output unit for a step, applying the configured attempt
    /// ceiling.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_unit(
        &self,
        run_id: RunId,
        group_id: uuid::Uuid,
        space_id: uuid::Uuid,
        step_index: usize,
        slot: UnitSlot,
        kind: UnitKind,
        category: SpaceCategory,
    ) -> Result<OutputUnit> {
        let unit = OutputUnit::new(
            run_id,
            group_id,
            space_id,
            step_index,
            slot,
            kind,
            category,
            self.config.policy.max_attempts_per_unit,
        );
        self.units.insert(unit.clone()).await?;
        Ok(unit)
    }

    /// Insert a caller-prepared unit (prompt, references and comparison
    /// flag already set).
    pub async fn register_prepared_unit(&self, unit: OutputUnit) -> Result<()> {
        self.units.insert(unit).await
    }

    /// Drive every unit group of the given step through the generate/judge
    /// cycle, then aggregate the step outcome.
    pub async fn submit_step(&self, run_id: RunId, step_index: usize) -> Result<StepOutcome> {
        let run = self.runs.get(run_id).await?;
        if !run.enabled {
            return Err(RenderGateError::RunPaused(run_id));
        }
        if run.step_index != step_index {
            return Err(RenderGateError::InvalidTransition {
                from: format!("step {}", run.step_index),
                to: format!("submitted step {}", step_index),
            });
        }

        self.state.begin_step(&run).await?;

        let units = self.units.units_for_step(run_id, step_index).await?;
        let groups = group_units(units);

        // Unit-level failures never crash the run; only storage failures
        // abort, surfaced through this slot after the fan-out drains.
        let fatal: Mutex<Option<RenderGateError>> = Mutex::new(None);
        let this = &*self;
        let fatal_ref = &fatal;

        self.batch
            .process_groups(groups, move |group| async move {
                if let Err(e) = this.process_group(group).await {
                    error!(run = %run_id, error = %e, "storage failure while processing group");
                    let mut slot = fatal_ref.lock().unwrap_or_else(|p| p.into_inner());
                    slot.get_or_insert(e);
                }
            })
            .await;

        if let Some(e) = fatal.into_inner().unwrap_or_else(|p| p.into_inner()) {
            self.runs
                .set_last_error(run_id, Some(e.to_string()))
                .await?;
            return Err(e);
        }

        self.state.evaluate_step(run_id).await
    }

    /// Sequential A→B execution within one dependency group.
    async fn process_group(&self, group: UnitGroup) -> Result<()> {
        for unit in &group.units {
            let fresh = self.units.get(unit.id).await?;

            let anchor = match fresh.slot {
                UnitSlot::Anchor => None,
                UnitSlot::Grounded => {
                    let sibling = group
                        .units
                        .iter()
                        .find(|u| u.slot == UnitSlot::Anchor && u.id != fresh.id);
                    match sibling {
                        Some(s) => Some(self.units.get(s.id).await?),
                        None => None,
                    }
                }
            };

            match DependencyEnforcer::gate(&fresh, anchor.as_ref()) {
                AnchorGate::Ready(anchor_asset) => {
                    self.process_unit(fresh.id, anchor_asset).await?;
                }
                AnchorGate::Blocked(reason) => {
                    // Hard precondition failed: zero generation calls.
                    if !fresh.status.is_terminal() && !fresh.locked_approved {
                        warn!(unit = %fresh.id, reason = %reason, "unit blocked by dependency");
                        self.units
                            .set_blocked(fresh.id, UnitStatus::Blocked, reason)
                            .await?;
                    }
                }
                AnchorGate::Wait => {
                    // Anchor undecided (e.g. run paused mid-group); the
                    // next submit picks the unit up again.
                }
            }
        }
        Ok(())
    }

    /// One unit's attempt loop: claim, generate, judge, and route the
    /// verdict until the unit reaches a resting state.
    async fn process_unit(
        &self,
        unit_id: UnitId,
        anchor: Option<AssetRef>,
    ) -> Result<UnitStatus> {
        let unit = self.units.get(unit_id).await?;

        // Locked approval from a prior cycle: reuse, never regenerate.
        if unit.locked_approved {
            return Ok(UnitStatus::Approved);
        }
        if unit.status.is_terminal() || unit.status.pins_review() {
            return Ok(unit.status);
        }
        if unit.status.is_in_flight() {
            // Another worker is already driving this unit.
            return Ok(unit.status);
        }

        // Idempotent claim: losing the compare-and-set means a concurrent
        // duplicate trigger; do not create a second attempt.
        match self
            .units
            .update_status(unit_id, UnitStatus::Pending, UnitStatus::Queued)
            .await
        {
            Ok(()) => {}
            Err(RenderGateError::CasConflict { .. }) | Err(RenderGateError::LockedApproved(_)) => {
                return Ok(self.units.get(unit_id).await?.status);
            }
            Err(e) => return Err(e),
        }
        self.units
            .update_status(unit_id, UnitStatus::Queued, UnitStatus::Running)
            .await?;

        let mut guidance: Option<String> = None;

        loop {
            let unit = self.units.get(unit_id).await?;
            let run = self.runs.get(unit.run_id).await?;

            // Pause gate: checked before every dispatch. In-flight calls
            // complete; no new work starts while paused.
            if !run.enabled {
                self.units
                    .update_status(unit_id, UnitStatus::Running, UnitStatus::Pending)
                    .await?;
                info!(unit = %unit_id, "dispatch skipped: run paused");
                return Ok(UnitStatus::Pending);
            }

            let attempt = unit.attempt_count + 1;
            match self.ledger.begin(unit_id, attempt).await {
                Ok(()) => {}
                Err(RenderGateError::DuplicateAttempt { .. }) => {
                    warn!(unit = %unit_id, attempt, "duplicate attempt suppressed");
                    return Ok(self.units.get(unit_id).await?.status);
                }
                Err(e) => return Err(e),
            }
            counter!("attempts_dispatched").increment(1);

            let request = GenerationRequest {
                prompt: unit.prompt.clone(),
                primary_ref: unit.references.first().cloned(),
                anchor: anchor.clone(),
                correction_guidance: guidance.clone(),
            };

            let generation = tokio::time::timeout(
                Duration::from_secs(self.config.timeouts.generation_secs),
                self.generator.generate(&request),
            )
            .await;

            let (asset, verdict) = match generation {
                Ok(Ok(asset)) => {
                    let mut references = unit.references.clone();
                    if let Some(a) = &anchor {
                        references.push(a.clone());
                    }
                    let context = JudgeContext {
                        category: unit.category.clone(),
                        references,
                        requires_reference_comparison: unit.requires_reference_comparison,
                        scope: CalibrationScope::Run(unit.run_id),
                    };
                    let verdict = self.judge.evaluate(&asset, &context).await;
                    (Some(asset), verdict)
                }
                Ok(Err(e)) => {
                    warn!(unit = %unit_id, attempt, error = %e, "generation failed");
                    (None, generation_failure_verdict())
                }
                Err(_) => {
                    warn!(unit = %unit_id, attempt, "generation timed out");
                    (None, generation_failure_verdict())
                }
            };

            // Storage failures from here on are fatal: never proceed with
            // unpersisted state.
            self.ledger
                .record(AttemptRecord {
                    unit_id,
                    attempt,
                    prompt: unit.prompt.clone(),
                    guidance: guidance.clone(),
                    asset: asset.clone(),
                    verdict: Some(verdict.clone()),
                    created_at: Utc::now(),
                })
                .await?;
            self.units
                .record_attempt_outcome(unit_id, asset.clone(), verdict.clone())
                .await?;

            let unit_now = self.units.get(unit_id).await?;
            let history = self.ledger.attempts(unit_id).await?;

            match self.budget.next_action(&unit_now, &verdict, &history) {
                NextAction::Approve => {
                    let asset = asset.ok_or_else(|| {
                        RenderGateError::Storage("passing verdict without an asset".to_string())
                    })?;
                    self.units.lock_approved(unit_id, asset).await?;
                    counter!("units_approved").increment(1);
                    info!(unit = %unit_id, attempt, "unit approved and locked");
                    return Ok(UnitStatus::Approved);
                }
                NextAction::Retry { guidance: next } => {
                    info!(unit = %unit_id, attempt, "verdict failed, retrying with guidance");
                    guidance = Some(next);
                }
                NextAction::BlockForHuman { reason } => {
                    self.units
                        .set_blocked(unit_id, UnitStatus::NeedsReview, reason.clone())
                        .await?;
                    counter!("units_blocked").increment(1);
                    warn!(unit = %unit_id, attempt, reason = %reason, "unit routed to human review");
                    return Ok(UnitStatus::NeedsReview);
                }
            }
        }
    }

    /// Supervisor gate entry point for completed worker jobs. A `proceed`
    /// advances the run's step pointer; a `block` pins the phase in review.
    pub async fn audit_worker_job(&self, job: &WorkerJob) -> Result<SupervisorDecision> {
        let decision = self.supervisor.review(job).await?;

        match decision.decision {
            GateDecision::Proceed => {
                self.state.advance(job.run_id).await?;
            }
            GateDecision::Block => {
                let run = self.runs.get(job.run_id).await?;
                self.runs
                    .update_phase(
                        job.run_id,
                        (run.phase, run.step_state),
                        (run.phase, StepState::Review, run.step_index),
                    )
                    .await?;
            }
            GateDecision::Retry => {}
        }

        Ok(decision)
    }

    pub async fn unit_status(&self, unit_id: UnitId) -> Result<OutputUnit> {
        self.units.get(unit_id).await
    }

    pub async fn run_status(&self, run_id: RunId) -> Result<PipelineRun> {
        self.runs.get(run_id).await
    }

    pub async fn pause(&self, run_id: RunId) -> Result<()> {
        info!(run = %run_id, "run paused");
        self.runs.set_enabled(run_id, false).await
    }

    pub async fn resume(&self, run_id: RunId) -> Result<()> {
        info!(run = %run_id, "run resumed");
        self.runs.set_enabled(run_id, true).await
    }

    pub async fn force_rollback(&self, run_id: RunId, step_index: usize) -> Result<()> {
        self.state.force_rollback(run_id, step_index).await?;

        // Reset units may attempt from index 1 again.
        for step in step_index..Phase::ORDERED.len() {
            for unit in self.units.units_for_step(run_id, step).await? {
                self.ledger.clear(unit.id).await?;
            }
        }
        Ok(())
    }

    /// Record a human review of a unit: updates the calibration counters
    /// against the judge's verdict, applies the decision to the unit, and
    /// re-aggregates the owning step.
    pub async fn record_human_feedback(
        &self,
        unit_id: UnitId,
        decision: HumanDecision,
        reason: ReasonCategory,
    ) -> Result<UnitStatus> {
        let unit = self.units.get(unit_id).await?;

        self.calibration.record_feedback(
            CalibrationScope::Global,
            unit.category.clone(),
            unit.last_verdict.as_ref(),
            decision,
            reason.clone(),
        );
        self.calibration.record_feedback(
            CalibrationScope::Run(unit.run_id),
            unit.category.clone(),
            unit.last_verdict.as_ref(),
            decision,
            reason,
        );

        let status = match decision {
            HumanDecision::Approve => {
                let asset = unit.asset.clone().ok_or_else(|| {
                    RenderGateError::InvalidTransition {
                        from: unit.status.to_string(),
                        to: "approved without an asset on file".to_string(),
                    }
                })?;
                self.units.lock_approved(unit_id, asset).await?;
                UnitStatus::Approved
            }
            HumanDecision::Reject => {
                self.units
                    .update_status(unit_id, unit.status, UnitStatus::Rejected)
                    .await?;
                UnitStatus::Rejected
            }
        };

        self.state.evaluate_step(unit.run_id).await?;
        Ok(status)
    }

    /// Expose the calibration store for external inspection tooling.
    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }
}

/// Synthetic verdict for a failed or timed-out generation call: counts
/// against the attempt budget and routes through normal retry logic.
fn generation_failure_verdict() -> QaVerdict {
    QaVerdict {
        pass: false,
        score: 0,
        confidence: 0.0,
        violations: Vec::new(),
        corrected_instructions: None,
        recommended: RecommendedAction::Retry,
        judged_by: "engine".to_string(),
        created_at: Utc::now(),
    }
}
