use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use rendergate_core::{
    AssetRef, BlockReason, OutputUnit, QaVerdict, RenderGateError, Result, RunId, UnitId,
    UnitStatus, UnitStore,
};

/// In-memory unit store enforcing the locked-approved terminal state at
/// the storage boundary, not by caller convention.
#[derive(Default)]
pub struct InMemoryUnitStore {
    units: DashMap<UnitId, OutputUnit>,
}

impl InMemoryUnitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UnitStore for InMemoryUnitStore {
    async fn insert(&self, unit: OutputUnit) -> Result<()> {
        self.units.insert(unit.id, unit);
        Ok(())
    }

    async fn get(&self, id: UnitId) -> Result<OutputUnit> {
        self.units
            .get(&id)
            .map(|u| u.clone())
            .ok_or(RenderGateError::UnitNotFound(id))
    }

    async fn units_for_step(&self, run_id: RunId, step_index: usize) -> Result<Vec<OutputUnit>> {
        Ok(self
            .units
            .iter()
            .filter(|u| u.run_id == run_id && u.step_index == step_index)
            .map(|u| u.clone())
            .collect())
    }

    async fn update_status(
        &self,
        id: UnitId,
        expected: UnitStatus,
        new: UnitStatus,
    ) -> Result<()> {
        let mut unit = self
            .units
            .get_mut(&id)
            .ok_or(RenderGateError::UnitNotFound(id))?;

        if unit.locked_approved {
            return Err(RenderGateError::LockedApproved(id));
        }
        if unit.status != expected {
            return Err(RenderGateError::CasConflict {
                entity: format!("unit {}", id),
                expected: expected.to_string(),
                actual: unit.status.to_string(),
            });
        }

        unit.status = new;
        unit.updated_at = Utc::now();
        Ok(())
    }

    async fn record_attempt_outcome(
        &self,
        id: UnitId,
        asset: Option<AssetRef>,
        verdict: QaVerdict,
    ) -> Result<()> {
        let mut unit = self
            .units
            .get_mut(&id)
            .ok_or(RenderGateError::UnitNotFound(id))?;

        if unit.locked_approved {
            return Err(RenderGateError::LockedApproved(id));
        }

        unit.attempt_count += 1;
        if let Some(asset) = asset {
            unit.asset = Some(asset);
        }
        unit.last_verdict = Some(verdict);
        unit.updated_at = Utc::now();
        Ok(())
    }

    async fn lock_approved(&self, id: UnitId, asset: AssetRef) -> Result<()> {
        let mut unit = self
            .units
            .get_mut(&id)
            .ok_or(RenderGateError::UnitNotFound(id))?;

        if unit.locked_approved {
            return Err(RenderGateError::LockedApproved(id));
        }

        unit.status = UnitStatus::Approved;
        unit.asset = Some(asset);
        unit.locked_approved = true;
        unit.blocked_reason = None;
        unit.updated_at = Utc::now();
        Ok(())
    }

    async fn set_blocked(
        &self,
        id: UnitId,
        status: UnitStatus,
        reason: BlockReason,
    ) -> Result<()> {
        let mut unit = self
            .units
            .get_mut(&id)
            .ok_or(RenderGateError::UnitNotFound(id))?;

        if unit.locked_approved {
            return Err(RenderGateError::LockedApproved(id));
        }

        unit.status = status;
        unit.blocked_reason = Some(reason);
        unit.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_unit(&self, id: UnitId) -> Result<()> {
        let mut unit = self
            .units
            .get_mut(&id)
            .ok_or(RenderGateError::UnitNotFound(id))?;

        // Rollback is the one sanctioned path past locked-approved.
        unit.status = UnitStatus::Pending;
        unit.attempt_count = 0;
        unit.locked_approved = false;
        unit.asset = None;
        unit.last_verdict = None;
        unit.blocked_reason = None;
        unit.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendergate_core::{SpaceCategory, UnitKind, UnitSlot};
    use uuid::Uuid;

    fn unit() -> OutputUnit {
        OutputUnit::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            5,
            UnitSlot::Anchor,
            UnitKind::Render,
            SpaceCategory::Bedroom,
            5,
        )
    }

    #[tokio::test]
    async fn status_cas_rejects_stale_prior() {
        let store = InMemoryUnitStore::new();
        let u = unit();
        let id = u.id;
        store.insert(u).await.unwrap();

        store
            .update_status(id, UnitStatus::Pending, UnitStatus::Queued)
            .await
            .unwrap();
        let err = store
            .update_status(id, UnitStatus::Pending, UnitStatus::Queued)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderGateError::CasConflict { .. }));
    }

    #[tokio::test]
    async fn locked_approved_refuses_every_mutation() {
        let store = InMemoryUnitStore::new();
        let u = unit();
        let id = u.id;
        store.insert(u).await.unwrap();

        store
            .lock_approved(id, AssetRef::new("asset://final"))
            .await
            .unwrap();

        let err = store
            .update_status(id, UnitStatus::Approved, UnitStatus::Rejected)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderGateError::LockedApproved(_)));

        let verdict = QaVerdict::needs_human("m", "r");
        let err = store
            .record_attempt_outcome(id, None, verdict)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderGateError::LockedApproved(_)));

        let err = store
            .lock_approved(id, AssetRef::new("asset://other"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderGateError::LockedApproved(_)));

        // Content unchanged under all of the above.
        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.asset.unwrap().uri, "asset://final");
        assert_eq!(stored.attempt_count, 0);
    }

    #[tokio::test]
    async fn reset_clears_lock_and_history() {
        let store = InMemoryUnitStore::new();
        let u = unit();
        let id = u.id;
        store.insert(u).await.unwrap();

        store
            .lock_approved(id, AssetRef::new("asset://final"))
            .await
            .unwrap();
        store.reset_unit(id).await.unwrap();

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, UnitStatus::Pending);
        assert!(!stored.locked_approved);
        assert!(stored.asset.is_none());
        assert_eq!(stored.attempt_count, 0);
    }
}
