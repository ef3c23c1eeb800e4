use rendergate_core::{AttemptRecord, BlockReason, OutputUnit, QaVerdict, RecommendedAction};

/// What the engine does with a unit after one generation/QA cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// Terminal approval: lock the unit.
    Approve,
    /// Re-issue a generation attempt with accumulated corrective guidance.
    Retry { guidance: String },
    /// Route to human review with a durable, machine-readable reason.
    BlockForHuman { reason: BlockReason },
}

/// Owns the attempt ceiling per output unit. The ceiling is a hard cutoff:
/// once reached, any failing verdict routes to human review regardless of
/// verdict content.
#[derive(Debug, Clone, Copy)]
pub struct BudgetManager {
    max_attempts: u32,
}

impl BudgetManager {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide from a verdict. `unit.attempt_count` must already include
    /// the attempt this verdict belongs to.
    pub fn next_action(
        &self,
        unit: &OutputUnit,
        verdict: &QaVerdict,
        history: &[AttemptRecord],
    ) -> NextAction {
        if verdict.pass {
            return NextAction::Approve;
        }

        // Critical violations bypass the remaining budget: further
        // automated attempts are unlikely to self-correct a structural or
        // category mismatch.
        if let Some(violation) = verdict.violations.iter().find(|v| v.is_critical()) {
            return NextAction::BlockForHuman {
                reason: BlockReason::CriticalViolation {
                    violation: *violation,
                },
            };
        }

        if verdict.recommended == RecommendedAction::NeedsHuman {
            return NextAction::BlockForHuman {
                reason: BlockReason::JudgeUnavailable {
                    detail: verdict
                        .corrected_instructions
                        .clone()
                        .unwrap_or_else(|| "judgment unavailable".to_string()),
                },
            };
        }

        if unit.attempt_count >= self.max_attempts {
            return NextAction::BlockForHuman {
                reason: BlockReason::BudgetExhausted {
                    attempts: unit.attempt_count,
                },
            };
        }

        NextAction::Retry {
            guidance: corrective_guidance(history, verdict),
        }
    }
}

/// Fold every corrected instruction seen so far into the next attempt's
/// guidance, so each retry is strictly more constrained than the last.
pub fn corrective_guidance(history: &[AttemptRecord], latest: &QaVerdict) -> String {
    let mut lines: Vec<&str> = history
        .iter()
        .filter_map(|r| r.verdict.as_ref())
        .filter_map(|v| v.corrected_instructions.as_deref())
        .collect();

    if let Some(instructions) = latest.corrected_instructions.as_deref() {
        if !lines.contains(&instructions) {
            lines.push(instructions);
        }
    }

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}. {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rendergate_core::{SpaceCategory, UnitKind, UnitSlot, Violation};
    use uuid::Uuid;

    fn unit_with_attempts(attempt_count: u32, max_attempts: u32) -> OutputUnit {
        let mut unit = OutputUnit::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            5,
            UnitSlot::Anchor,
            UnitKind::Render,
            SpaceCategory::Bedroom,
            max_attempts,
        );
        unit.attempt_count = attempt_count;
        unit
    }

    fn failing_verdict(instructions: Option<&str>) -> QaVerdict {
        QaVerdict {
            pass: false,
            score: 40,
            confidence: 0.8,
            violations: Vec::new(),
            corrected_instructions: instructions.map(str::to_string),
            recommended: RecommendedAction::Retry,
            judged_by: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pass_approves_regardless_of_budget() {
        let budget = BudgetManager::new(5);
        let unit = unit_with_attempts(5, 5);
        let mut verdict = failing_verdict(None);
        verdict.pass = true;
        verdict.recommended = RecommendedAction::Approve;

        assert_eq!(budget.next_action(&unit, &verdict, &[]), NextAction::Approve);
    }

    #[test]
    fn fifth_failure_blocks_instead_of_sixth_retry() {
        let budget = BudgetManager::new(5);
        let verdict = failing_verdict(Some("fix the lighting"));

        // Attempts 1-4 retry.
        for n in 1..5 {
            let unit = unit_with_attempts(n, 5);
            assert!(matches!(
                budget.next_action(&unit, &verdict, &[]),
                NextAction::Retry { .. }
            ));
        }

        // The fifth failing verdict blocks for human review.
        let unit = unit_with_attempts(5, 5);
        assert_eq!(
            budget.next_action(&unit, &verdict, &[]),
            NextAction::BlockForHuman {
                reason: BlockReason::BudgetExhausted { attempts: 5 }
            }
        );
    }

    #[test]
    fn critical_violation_bypasses_remaining_budget() {
        let budget = BudgetManager::new(5);
        let unit = unit_with_attempts(1, 5);
        let mut verdict = failing_verdict(None);
        verdict.violations.push(Violation::CategoryMismatch);

        assert_eq!(
            budget.next_action(&unit, &verdict, &[]),
            NextAction::BlockForHuman {
                reason: BlockReason::CriticalViolation {
                    violation: Violation::CategoryMismatch
                }
            }
        );
    }

    #[test]
    fn retry_guidance_accumulates_across_attempts() {
        let unit_id = Uuid::new_v4();
        let mut first = failing_verdict(Some("add a window"));
        first.score = 35;
        let history = vec![AttemptRecord {
            unit_id,
            attempt: 1,
            prompt: "render".to_string(),
            guidance: None,
            asset: None,
            verdict: Some(first),
            created_at: Utc::now(),
        }];
        let latest = failing_verdict(Some("fix the lighting"));

        let guidance = corrective_guidance(&history, &latest);
        assert!(guidance.contains("1. add a window"));
        assert!(guidance.contains("2. fix the lighting"));
    }

    #[test]
    fn needs_human_verdict_blocks_even_under_budget() {
        let budget = BudgetManager::new(5);
        let unit = unit_with_attempts(1, 5);
        let verdict = QaVerdict::needs_human("fallback", "both judgment services failed");

        assert!(matches!(
            budget.next_action(&unit, &verdict, &[]),
            NextAction::BlockForHuman {
                reason: BlockReason::JudgeUnavailable { .. }
            }
        ));
    }
}
