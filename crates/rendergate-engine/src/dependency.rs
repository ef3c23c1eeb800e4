use rendergate_core::{AssetRef, BlockReason, OutputUnit, UnitSlot, UnitStatus};

/// Dispatch decision for a unit with respect to its dependency group.
#[derive(Debug, Clone, PartialEq)]
pub enum AnchorGate {
    /// Dispatch now; grounded units get the anchor's asset attached.
    Ready(Option<AssetRef>),
    /// The anchor failed: the grounded unit must never run.
    Blocked(BlockReason),
    /// The anchor has not reached a terminal state yet.
    Wait,
}

/// Sequences paired output units: a grounded ("B") unit never dispatches
/// without its anchor's ("A") resulting asset as an explicit grounding
/// input. Checked before dispatch, not a best-effort hint.
pub struct DependencyEnforcer;

impl DependencyEnforcer {
    /// `anchor` is the unit's sibling anchor within the same group, when
    /// one exists. Anchor units and ungrouped units always pass.
    pub fn gate(unit: &OutputUnit, anchor: Option<&OutputUnit>) -> AnchorGate {
        if unit.slot == UnitSlot::Anchor {
            return AnchorGate::Ready(None);
        }

        let Some(anchor) = anchor else {
            // A grounded unit with no anchor on file is a wiring defect;
            // refusing to dispatch is the safe outcome.
            return AnchorGate::Blocked(BlockReason::DependencyFailed {
                anchor_unit: unit.id,
                reason: "no anchor unit registered for group".to_string(),
            });
        };

        if anchor.locked_approved {
            // Approved in this cycle or a prior one; reuse the stored
            // asset without regenerating the anchor.
            return match &anchor.asset {
                Some(asset) => AnchorGate::Ready(Some(asset.clone())),
                None => AnchorGate::Blocked(BlockReason::DependencyFailed {
                    anchor_unit: anchor.id,
                    reason: "anchor approved but asset reference missing".to_string(),
                }),
            };
        }

        match anchor.status {
            UnitStatus::Failed
            | UnitStatus::Blocked
            | UnitStatus::NeedsReview
            | UnitStatus::Rejected => AnchorGate::Blocked(BlockReason::DependencyFailed {
                anchor_unit: anchor.id,
                reason: anchor
                    .blocked_reason
                    .as_ref()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| format!("anchor status is {}", anchor.status)),
            }),
            _ => AnchorGate::Wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendergate_core::{SpaceCategory, UnitKind};
    use uuid::Uuid;

    fn pair() -> (OutputUnit, OutputUnit) {
        let run = Uuid::new_v4();
        let group = Uuid::new_v4();
        let space = Uuid::new_v4();
        let anchor = OutputUnit::new(
            run,
            group,
            space,
            5,
            UnitSlot::Anchor,
            UnitKind::Render,
            SpaceCategory::Bedroom,
            5,
        );
        let grounded = OutputUnit::new(
            run,
            group,
            space,
            5,
            UnitSlot::Grounded,
            UnitKind::Panorama,
            SpaceCategory::Bedroom,
            5,
        );
        (anchor, grounded)
    }

    #[test]
    fn grounded_waits_for_running_anchor() {
        let (mut anchor, grounded) = pair();
        anchor.status = UnitStatus::Running;
        assert_eq!(
            DependencyEnforcer::gate(&grounded, Some(&anchor)),
            AnchorGate::Wait
        );
    }

    #[test]
    fn approved_anchor_hands_its_asset_to_grounded() {
        let (mut anchor, grounded) = pair();
        anchor.status = UnitStatus::Approved;
        anchor.locked_approved = true;
        anchor.asset = Some(AssetRef::new("asset://a"));

        match DependencyEnforcer::gate(&grounded, Some(&anchor)) {
            AnchorGate::Ready(Some(asset)) => assert_eq!(asset.uri, "asset://a"),
            other => panic!("expected ready with asset, got {:?}", other),
        }
    }

    #[test]
    fn failed_anchor_blocks_grounded_with_reason() {
        let (mut anchor, grounded) = pair();
        anchor.status = UnitStatus::Failed;
        anchor.blocked_reason = Some(BlockReason::BudgetExhausted { attempts: 5 });

        match DependencyEnforcer::gate(&grounded, Some(&anchor)) {
            AnchorGate::Blocked(BlockReason::DependencyFailed { anchor_unit, reason }) => {
                assert_eq!(anchor_unit, anchor.id);
                assert!(reason.contains("budget exhausted"));
            }
            other => panic!("expected blocked, got {:?}", other),
        }
    }

    #[test]
    fn anchor_units_always_pass_the_gate() {
        let (anchor, _) = pair();
        assert_eq!(
            DependencyEnforcer::gate(&anchor, None),
            AnchorGate::Ready(None)
        );
    }
}
