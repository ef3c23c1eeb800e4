use std::collections::HashMap;

use dashmap::DashMap;
use tracing::{debug, info};

use rendergate_core::{
    CalibrationRecord, CalibrationScope, GuidanceSource, HumanDecision, PolicyRule, QaVerdict,
    ReasonCategory, SpaceCategory,
};

type Key = (CalibrationScope, SpaceCategory);

#[derive(Default)]
struct Entry {
    record: CalibrationRecord,
    reason_counts: HashMap<ReasonCategory, u32>,
}

/// Learned judgment bias. Human feedback is the only writer; the judge
/// reads it through `GuidanceSource::build_guidance`.
pub struct CalibrationStore {
    entries: DashMap<Key, Entry>,
    /// Repetitions of a reason category before it becomes a policy rule.
    promotion_support: u32,
}

impl CalibrationStore {
    pub fn new(promotion_support: u32) -> Self {
        Self {
            entries: DashMap::new(),
            promotion_support,
        }
    }

    /// Fold one human review into the counters, comparing the human call
    /// against what the judge said for the same attempt.
    pub fn record_feedback(
        &self,
        scope: CalibrationScope,
        category: SpaceCategory,
        judge_verdict: Option<&QaVerdict>,
        decision: HumanDecision,
        reason: ReasonCategory,
    ) {
        let mut entry = self
            .entries
            .entry((scope.clone(), category.clone()))
            .or_default();

        match (judge_verdict.map(|v| v.pass), decision) {
            (Some(true), HumanDecision::Reject) => entry.record.false_accepts += 1,
            (Some(false), HumanDecision::Approve) => entry.record.false_rejects += 1,
            (Some(_), _) => entry.record.confirmed_correct += 1,
            // No verdict on file: the human reviewed an unjudged unit;
            // nothing to score the judge on.
            (None, _) => {}
        }

        let count = entry.reason_counts.entry(reason.clone()).or_insert(0);
        *count += 1;
        let count = *count;

        if count >= self.promotion_support {
            let text = promoted_rule_text(&reason, decision);
            match entry.record.rules.iter_mut().find(|r| r.text == text) {
                Some(rule) => rule.support = count,
                None => {
                    info!(category = %category, reason = %reason, support = count,
                        "promoting repeated human correction into policy rule");
                    entry.record.rules.push(PolicyRule {
                        text,
                        support: count,
                    });
                }
            }
        }

        debug!(
            category = %category,
            false_accepts = entry.record.false_accepts,
            false_rejects = entry.record.false_rejects,
            confirmed = entry.record.confirmed_correct,
            "calibration updated"
        );
    }

    pub fn record(&self, scope: &CalibrationScope, category: &SpaceCategory) -> CalibrationRecord {
        self.entries
            .get(&(scope.clone(), category.clone()))
            .map(|e| e.record.clone())
            .unwrap_or_default()
    }

    fn guidance_for_key(&self, key: &Key, out: &mut String) {
        let Some(entry) = self.entries.get(key) else {
            return;
        };
        let record = &entry.record;

        for rule in &record.rules {
            out.push_str("- ");
            out.push_str(&rule.text);
            out.push('\n');
        }

        // Bias the threshold in the direction of observed judge error.
        if record.false_accepts > record.false_rejects && record.false_accepts >= 2 {
            out.push_str(
                "- prior approvals in this category were overturned by reviewers; \
                 judge borderline cases as failures\n",
            );
        } else if record.false_rejects > record.false_accepts && record.false_rejects >= 2 {
            out.push_str(
                "- prior rejections in this category were overturned by reviewers; \
                 do not fail borderline cases on minor issues\n",
            );
        }
    }
}

impl GuidanceSource for CalibrationStore {
    fn build_guidance(&self, category: &SpaceCategory, scope: &CalibrationScope) -> String {
        let mut out = String::new();
        self.guidance_for_key(&(CalibrationScope::Global, category.clone()), &mut out);
        if *scope != CalibrationScope::Global {
            self.guidance_for_key(&(scope.clone(), category.clone()), &mut out);
        }
        out
    }
}

fn promoted_rule_text(reason: &ReasonCategory, decision: HumanDecision) -> String {
    let direction = match decision {
        HumanDecision::Approve => "reviewers approved outputs the judge failed",
        HumanDecision::Reject => "reviewers rejected outputs the judge passed",
    };
    format!(
        "{} for reason '{}'; weight this failure mode accordingly",
        direction, reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rendergate_core::RecommendedAction;

    fn passing_verdict() -> QaVerdict {
        QaVerdict {
            pass: true,
            score: 90,
            confidence: 0.9,
            violations: Vec::new(),
            corrected_instructions: None,
            recommended: RecommendedAction::Approve,
            judged_by: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn override_counts_track_direction() {
        let store = CalibrationStore::new(3);
        let verdict = passing_verdict();

        store.record_feedback(
            CalibrationScope::Global,
            SpaceCategory::Bedroom,
            Some(&verdict),
            HumanDecision::Reject,
            ReasonCategory::WrongCategory,
        );
        store.record_feedback(
            CalibrationScope::Global,
            SpaceCategory::Bedroom,
            Some(&verdict),
            HumanDecision::Approve,
            ReasonCategory::Other("fine".to_string()),
        );

        let record = store.record(&CalibrationScope::Global, &SpaceCategory::Bedroom);
        assert_eq!(record.false_accepts, 1);
        assert_eq!(record.confirmed_correct, 1);
    }

    #[test]
    fn repeated_reason_promotes_rule() {
        let store = CalibrationStore::new(3);
        let verdict = passing_verdict();

        for _ in 0..3 {
            store.record_feedback(
                CalibrationScope::Global,
                SpaceCategory::Kitchen,
                Some(&verdict),
                HumanDecision::Reject,
                ReasonCategory::StructureMismatch,
            );
        }

        let record = store.record(&CalibrationScope::Global, &SpaceCategory::Kitchen);
        assert_eq!(record.rules.len(), 1);
        assert_eq!(record.rules[0].support, 3);

        let guidance =
            store.build_guidance(&SpaceCategory::Kitchen, &CalibrationScope::Global);
        assert!(guidance.contains("structure_mismatch"));
    }

    #[test]
    fn guidance_empty_without_history() {
        let store = CalibrationStore::new(3);
        let guidance =
            store.build_guidance(&SpaceCategory::Office, &CalibrationScope::Global);
        assert!(guidance.is_empty());
    }

    #[test]
    fn repeated_false_accepts_bias_toward_strictness() {
        let store = CalibrationStore::new(10);
        let verdict = passing_verdict();

        for _ in 0..2 {
            store.record_feedback(
                CalibrationScope::Global,
                SpaceCategory::Bedroom,
                Some(&verdict),
                HumanDecision::Reject,
                ReasonCategory::QualityTooLow,
            );
        }

        let guidance =
            store.build_guidance(&SpaceCategory::Bedroom, &CalibrationScope::Global);
        assert!(guidance.contains("judge borderline cases as failures"));
    }
}
