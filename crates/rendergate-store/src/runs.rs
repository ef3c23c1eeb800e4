use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use rendergate_core::{
    Phase, PipelineRun, RenderGateError, Result, RunId, RunStore, StepState,
};

/// In-memory run store. Each entry's lock is held only for the duration of
/// a single compare-and-set; no long-held locks.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: DashMap<RunId, PipelineRun>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert(&self, run: PipelineRun) -> Result<()> {
        if !run.is_consistent() {
            return Err(RenderGateError::InvalidTransition {
                from: "new".to_string(),
                to: format!("{}/{}", run.phase, run.step_index),
            });
        }
        self.runs.insert(run.id, run);
        Ok(())
    }

    async fn get(&self, id: RunId) -> Result<PipelineRun> {
        self.runs
            .get(&id)
            .map(|r| r.clone())
            .ok_or(RenderGateError::RunNotFound(id))
    }

    async fn update_phase(
        &self,
        id: RunId,
        expected: (Phase, StepState),
        new: (Phase, StepState, usize),
    ) -> Result<()> {
        let (new_phase, new_state, new_step) = new;

        // The target must land on a valid phase/step pair.
        if Phase::for_step(new_step) != Some(new_phase) {
            return Err(RenderGateError::InvalidTransition {
                from: format!("{}/{}", expected.0, expected.1),
                to: format!("{}/{}", new_phase, new_step),
            });
        }

        let mut run = self
            .runs
            .get_mut(&id)
            .ok_or(RenderGateError::RunNotFound(id))?;

        if (run.phase, run.step_state) != expected {
            return Err(RenderGateError::CasConflict {
                entity: format!("run {}", id),
                expected: format!("{}/{}", expected.0, expected.1),
                actual: format!("{}/{}", run.phase, run.step_state),
            });
        }

        run.phase = new_phase;
        run.step_state = new_state;
        run.step_index = new_step;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn set_enabled(&self, id: RunId, enabled: bool) -> Result<()> {
        let mut run = self
            .runs
            .get_mut(&id)
            .ok_or(RenderGateError::RunNotFound(id))?;
        run.enabled = enabled;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn set_last_error(&self, id: RunId, error: Option<String>) -> Result<()> {
        let mut run = self
            .runs
            .get_mut(&id)
            .ok_or(RenderGateError::RunNotFound(id))?;
        run.last_error = error;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn bump_retries(&self, id: RunId) -> Result<(u32, u32)> {
        let mut run = self
            .runs
            .get_mut(&id)
            .ok_or(RenderGateError::RunNotFound(id))?;
        run.step_retries += 1;
        run.total_retries += 1;
        run.updated_at = Utc::now();
        Ok((run.step_retries, run.total_retries))
    }

    async fn reset_step_retries(&self, id: RunId) -> Result<()> {
        let mut run = self
            .runs
            .get_mut(&id)
            .ok_or(RenderGateError::RunNotFound(id))?;
        run.step_retries = 0;
        run.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn phase_cas_rejects_stale_expectation() {
        let store = InMemoryRunStore::new();
        let run = PipelineRun::new();
        let id = run.id;
        store.insert(run).await.unwrap();

        store
            .update_phase(
                id,
                (Phase::InputAnalysis, StepState::Pending),
                (Phase::InputAnalysis, StepState::Running, 0),
            )
            .await
            .unwrap();

        // Second caller still expects Pending: must conflict, not overwrite.
        let err = store
            .update_phase(
                id,
                (Phase::InputAnalysis, StepState::Pending),
                (Phase::InputAnalysis, StepState::Running, 0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RenderGateError::CasConflict { .. }));
    }

    #[tokio::test]
    async fn invalid_phase_step_pair_is_rejected() {
        let store = InMemoryRunStore::new();
        let run = PipelineRun::new();
        let id = run.id;
        store.insert(run).await.unwrap();

        let err = store
            .update_phase(
                id,
                (Phase::InputAnalysis, StepState::Pending),
                (Phase::Merge, StepState::Running, 2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RenderGateError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn retry_counters_accumulate() {
        let store = InMemoryRunStore::new();
        let run = PipelineRun::new();
        let id = run.id;
        store.insert(run).await.unwrap();

        assert_eq!(store.bump_retries(id).await.unwrap(), (1, 1));
        assert_eq!(store.bump_retries(id).await.unwrap(), (2, 2));
        store.reset_step_retries(id).await.unwrap();
        assert_eq!(store.bump_retries(id).await.unwrap(), (1, 3));
    }
}
