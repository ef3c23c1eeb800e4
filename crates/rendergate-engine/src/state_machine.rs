use std::sync::Arc;

use tracing::{info, warn};

use rendergate_core::{
    Phase, PipelineRun, RenderGateError, Result, RunId, RunStore, StepState, UnitStore,
};

/// Aggregated view of one step's units after a processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// At least one unit needs human attention: phase pinned in review.
    PinnedInReview,
    /// Every unit is terminal; the phase completed (and advanced when a
    /// next phase exists).
    Completed,
    /// Units remain in flight or pending (e.g. the run was paused).
    InProgress,
}

/// Per-run phase/step transition logic. All mutations go through the run
/// store's compare-and-set; this type never holds state of its own.
pub struct StepStateMachine {
    runs: Arc<dyn RunStore>,
    units: Arc<dyn UnitStore>,
}

impl StepStateMachine {
    pub fn new(runs: Arc<dyn RunStore>, units: Arc<dyn UnitStore>) -> Self {
        Self { runs, units }
    }

    /// Move the run's current step from pending (or review, on a resumed
    /// retry) into running.
    pub async fn begin_step(&self, run: &PipelineRun) -> Result<()> {
        let target = (run.phase, StepState::Running, run.step_index);
        match self
            .runs
            .update_phase(run.id, (run.phase, run.step_state), target)
            .await
        {
            Ok(()) => Ok(()),
            // Already running: another caller won the race, which is fine.
            Err(RenderGateError::CasConflict { .. }) if run.step_state == StepState::Running => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Aggregate unit outcomes for the current step and advance, pin, or
    /// leave the run as-is. Tolerates out-of-order group completion: only
    /// the full set of units decides.
    pub async fn evaluate_step(&self, run_id: RunId) -> Result<StepOutcome> {
        let run = self.runs.get(run_id).await?;
        let units = self
            .units
            .units_for_step(run_id, run.step_index)
            .await?;

        if units.iter().any(|u| u.status.pins_review()) {
            self.runs
                .update_phase(
                    run_id,
                    (run.phase, run.step_state),
                    (run.phase, StepState::Review, run.step_index),
                )
                .await?;
            warn!(run = %run_id, phase = %run.phase, "step pinned in review");
            return Ok(StepOutcome::PinnedInReview);
        }

        // Partial completion never auto-advances.
        if units.is_empty() || !units.iter().all(|u| u.status.is_terminal()) {
            return Ok(StepOutcome::InProgress);
        }

        self.runs
            .update_phase(
                run_id,
                (run.phase, run.step_state),
                (run.phase, StepState::Complete, run.step_index),
            )
            .await?;

        if let Some(next) = run.phase.next() {
            self.runs
                .update_phase(
                    run_id,
                    (run.phase, StepState::Complete),
                    (next, StepState::Pending, next.step_index()),
                )
                .await?;
            self.runs.reset_step_retries(run_id).await?;
            info!(run = %run_id, from = %run.phase, to = %next, "phase advanced");
        }

        Ok(StepOutcome::Completed)
    }

    /// Advance the run pointer after a supervisor `proceed`, without
    /// touching unit state.
    pub async fn advance(&self, run_id: RunId) -> Result<()> {
        let run = self.runs.get(run_id).await?;
        let next = run.phase.next().ok_or_else(|| {
            RenderGateError::InvalidTransition {
                from: run.phase.to_string(),
                to: "beyond complete".to_string(),
            }
        })?;
        self.runs
            .update_phase(
                run_id,
                (run.phase, run.step_state),
                (next, StepState::Pending, next.step_index()),
            )
            .await?;
        self.runs.reset_step_retries(run_id).await
    }

    /// Explicit restart of a step: clear its outputs and every dependent
    /// downstream output, reset attempt counts and locked-approved flags,
    /// and point the run back at the rolled-back step. Upstream steps are
    /// untouched.
    pub async fn force_rollback(&self, run_id: RunId, step_index: usize) -> Result<()> {
        let run = self.runs.get(run_id).await?;
        let target_phase =
            Phase::for_step(step_index).ok_or_else(|| RenderGateError::InvalidTransition {
                from: run.phase.to_string(),
                to: format!("step {}", step_index),
            })?;
        if step_index > run.step_index {
            return Err(RenderGateError::InvalidTransition {
                from: format!("step {}", run.step_index),
                to: format!("future step {}", step_index),
            });
        }

        for step in step_index..Phase::ORDERED.len() {
            for unit in self.units.units_for_step(run_id, step).await? {
                self.units.reset_unit(unit.id).await?;
            }
        }

        self.runs
            .update_phase(
                run_id,
                (run.phase, run.step_state),
                (target_phase, StepState::Pending, step_index),
            )
            .await?;
        self.runs.reset_step_retries(run_id).await?;
        self.runs.set_last_error(run_id, None).await?;

        info!(run = %run_id, step = step_index, phase = %target_phase, "step force-rolled-back");
        Ok(())
    }
}
