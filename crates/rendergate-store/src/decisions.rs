use async_trait::async_trait;
use dashmap::DashMap;

use rendergate_core::{DecisionLog, Result, RunId, SupervisorDecision};

/// Append-only supervisor decision log, keyed by run.
#[derive(Default)]
pub struct InMemoryDecisionLog {
    decisions: DashMap<RunId, Vec<SupervisorDecision>>,
}

impl InMemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionLog for InMemoryDecisionLog {
    async fn append(&self, decision: SupervisorDecision) -> Result<()> {
        self.decisions
            .entry(decision.run_id)
            .or_default()
            .push(decision);
        Ok(())
    }

    async fn decisions_for_run(&self, run_id: RunId) -> Result<Vec<SupervisorDecision>> {
        Ok(self
            .decisions
            .get(&run_id)
            .map(|d| d.clone())
            .unwrap_or_default())
    }
}
