use futures::stream::{self, StreamExt};
use tracing::debug;

use rendergate_core::{GroupId, OutputUnit, UnitSlot};

/// One dependency group's units, anchor first.
#[derive(Debug, Clone)]
pub struct UnitGroup {
    pub group_id: GroupId,
    pub units: Vec<OutputUnit>,
}

/// Partition a step's units into dependency groups with in-group
/// production order (anchor before grounded) restored.
pub fn group_units(mut units: Vec<OutputUnit>) -> Vec<UnitGroup> {
    units.sort_by_key(|u| (u.group_id, matches!(u.slot, UnitSlot::Grounded)));

    let mut groups: Vec<UnitGroup> = Vec::new();
    for unit in units {
        match groups.last_mut() {
            Some(group) if group.group_id == unit.group_id => group.units.push(unit),
            _ => groups.push(UnitGroup {
                group_id: unit.group_id,
                units: vec![unit],
            }),
        }
    }
    groups
}

/// Fans out independent groups with a bounded concurrency window. Groups
/// complete in any order; within a group the caller-provided future runs
/// units sequentially.
pub struct BatchController {
    window: usize,
}

impl BatchController {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub async fn process_groups<F, Fut>(&self, groups: Vec<UnitGroup>, handler: F)
    where
        F: Fn(UnitGroup) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        debug!(groups = groups.len(), window = self.window, "fanning out unit groups");
        stream::iter(groups)
            .for_each_concurrent(self.window, handler)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendergate_core::{SpaceCategory, UnitKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn unit(group: GroupId, slot: UnitSlot) -> OutputUnit {
        OutputUnit::new(
            Uuid::new_v4(),
            group,
            Uuid::new_v4(),
            5,
            slot,
            UnitKind::Render,
            SpaceCategory::Bedroom,
            5,
        )
    }

    #[test]
    fn groups_restore_anchor_first_order() {
        let g1 = Uuid::new_v4();
        let g2 = Uuid::new_v4();
        let units = vec![
            unit(g1, UnitSlot::Grounded),
            unit(g2, UnitSlot::Anchor),
            unit(g1, UnitSlot::Anchor),
            unit(g2, UnitSlot::Grounded),
        ];

        let groups = group_units(units);
        assert_eq!(groups.len(), 2);
        for group in &groups {
            assert_eq!(group.units[0].slot, UnitSlot::Anchor);
            assert_eq!(group.units[1].slot, UnitSlot::Grounded);
        }
    }

    #[tokio::test]
    async fn window_bounds_in_flight_groups() {
        let groups: Vec<UnitGroup> = (0..10)
            .map(|_| UnitGroup {
                group_id: Uuid::new_v4(),
                units: vec![unit(Uuid::new_v4(), UnitSlot::Anchor)],
            })
            .collect();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let controller = BatchController::new(3);
        controller
            .process_groups(groups, |_group| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn all_groups_are_processed() {
        let groups: Vec<UnitGroup> = (0..7)
            .map(|_| UnitGroup {
                group_id: Uuid::new_v4(),
                units: vec![unit(Uuid::new_v4(), UnitSlot::Anchor)],
            })
            .collect();

        let processed = Arc::new(AtomicUsize::new(0));
        let controller = BatchController::new(2);
        controller
            .process_groups(groups, |_group| {
                let processed = Arc::clone(&processed);
                async move {
                    processed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        assert_eq!(processed.load(Ordering::SeqCst), 7);
    }
}
