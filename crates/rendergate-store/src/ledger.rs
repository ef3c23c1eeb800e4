use async_trait::async_trait;
use dashmap::DashMap;

use rendergate_core::{AttemptLedger, AttemptRecord, RenderGateError, Result, UnitId};

#[derive(Default)]
struct UnitHistory {
    open: Option<u32>,
    records: Vec<AttemptRecord>,
}

/// Append-only attempt ledger. One entry lock per unit key makes
/// begin/record atomic under concurrent duplicate dispatch.
#[derive(Default)]
pub struct InMemoryAttemptLedger {
    history: DashMap<UnitId, UnitHistory>,
}

impl InMemoryAttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptLedger for InMemoryAttemptLedger {
    async fn begin(&self, unit_id: UnitId, attempt: u32) -> Result<()> {
        let mut entry = self.history.entry(unit_id).or_default();

        if entry.open.is_some() || entry.records.iter().any(|r| r.attempt == attempt) {
            return Err(RenderGateError::DuplicateAttempt {
                unit: unit_id,
                attempt,
            });
        }

        entry.open = Some(attempt);
        Ok(())
    }

    async fn record(&self, record: AttemptRecord) -> Result<()> {
        let mut entry = self.history.entry(record.unit_id).or_default();

        if entry.records.iter().any(|r| r.attempt == record.attempt) {
            return Err(RenderGateError::DuplicateAttempt {
                unit: record.unit_id,
                attempt: record.attempt,
            });
        }

        if entry.open == Some(record.attempt) {
            entry.open = None;
        }
        entry.records.push(record);
        Ok(())
    }

    async fn attempts(&self, unit_id: UnitId) -> Result<Vec<AttemptRecord>> {
        Ok(self
            .history
            .get(&unit_id)
            .map(|h| h.records.clone())
            .unwrap_or_default())
    }

    async fn open_attempt(&self, unit_id: UnitId) -> Result<Option<u32>> {
        Ok(self.history.get(&unit_id).and_then(|h| h.open))
    }

    async fn clear(&self, unit_id: UnitId) -> Result<()> {
        self.history.remove(&unit_id);
        Ok(())
    }
}
