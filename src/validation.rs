//! Clinical validation tracking
//!
//! Records two kinds of validation signals against discovered patterns:
//! implicit (a medication or treatment change shortly after a related
//! finding) and explicit (parent or provider feedback). Validations are
//! input signals only; they never rewrite a pattern's statistics.

use crate::config::EngineConfig;
use crate::error::InsightError;
use crate::store::InsightStore;
use crate::types::{ClinicalValidation, Pattern, ValidationSource, ValidationTarget};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Strength assigned to an implicit treatment-change match
const IMPLICIT_STRENGTH: f64 = 0.7;
/// Strength of helpful parent feedback
const PARENT_POSITIVE_STRENGTH: f64 = 0.8;
/// Strength of unhelpful parent feedback
const PARENT_NEGATIVE_STRENGTH: f64 = -0.3;
/// Strength of a provider confirmation, the maximum
const PROVIDER_STRENGTH: f64 = 1.0;

/// Records validation events that adjust confidence in findings.
pub struct ValidationTracker {
    store: Arc<dyn InsightStore>,
    config: EngineConfig,
}

impl ValidationTracker {
    pub fn new(store: Arc<dyn InsightStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Implicit validation: a medication/treatment change was recorded.
    ///
    /// Searches patterns touched within the lookback window whose factors or
    /// description mention the changed medication (case-insensitive substring
    /// match) and records one validation per match. Returns the validations
    /// created.
    pub fn on_treatment_change(
        &self,
        child_id: Uuid,
        medication_name: &str,
    ) -> Result<Vec<ClinicalValidation>, InsightError> {
        let since = Utc::now() - Duration::days(self.config.validation_lookback_days);
        let needle = medication_name.to_lowercase();

        let mut created = Vec::new();
        for mut pattern in self.store.patterns_updated_since(child_id, since)? {
            if !Self::mentions(&pattern, &needle) {
                continue;
            }

            let validation = ClinicalValidation {
                id: Uuid::new_v4(),
                target: ValidationTarget::Pattern(pattern.id),
                validation_strength: IMPLICIT_STRENGTH,
                source: ValidationSource::Implicit,
                note: format!("treatment change: {medication_name}"),
                created_at: Utc::now(),
            };
            self.store.insert_validation(validation.clone())?;

            pattern.validation_count += 1;
            pattern.last_updated = Utc::now();
            self.store.update_pattern(pattern)?;

            created.push(validation);
        }
        Ok(created)
    }

    /// Explicit parent feedback on a finding.
    pub fn record_parent_feedback(
        &self,
        target: ValidationTarget,
        was_helpful: bool,
        note: &str,
    ) -> Result<ClinicalValidation, InsightError> {
        let strength = if was_helpful {
            PARENT_POSITIVE_STRENGTH
        } else {
            PARENT_NEGATIVE_STRENGTH
        };
        let validation = self.record(target, strength, ValidationSource::Parent, note)?;

        if was_helpful {
            self.bump_pattern(target, false)?;
        }
        Ok(validation)
    }

    /// Provider confirmation: maximum strength, and a one-way upgrade of the
    /// target pattern to clinically validated.
    pub fn record_provider_validation(
        &self,
        target: ValidationTarget,
        note: &str,
    ) -> Result<ClinicalValidation, InsightError> {
        let validation = self.record(target, PROVIDER_STRENGTH, ValidationSource::Provider, note)?;
        self.bump_pattern(target, true)?;
        Ok(validation)
    }

    fn record(
        &self,
        target: ValidationTarget,
        strength: f64,
        source: ValidationSource,
        note: &str,
    ) -> Result<ClinicalValidation, InsightError> {
        let validation = ClinicalValidation {
            id: Uuid::new_v4(),
            target,
            validation_strength: strength,
            source,
            note: note.to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_validation(validation.clone())?;
        Ok(validation)
    }

    /// Increment the validation counter on a pattern target; optionally mark
    /// it clinically validated. Insight targets carry no counter here.
    fn bump_pattern(
        &self,
        target: ValidationTarget,
        clinically_validated: bool,
    ) -> Result<(), InsightError> {
        let ValidationTarget::Pattern(pattern_id) = target else {
            return Ok(());
        };
        let mut pattern = self
            .store
            .pattern(pattern_id)?
            .ok_or_else(|| InsightError::NotFound(format!("pattern {pattern_id}")))?;
        pattern.validation_count += 1;
        if clinically_validated {
            pattern.clinically_validated = true;
        }
        pattern.last_updated = Utc::now();
        self.store.update_pattern(pattern)
    }

    /// Case-insensitive substring match against the pattern's factors and
    /// its generated description
    fn mentions(pattern: &Pattern, needle: &str) -> bool {
        pattern.input_factor.to_lowercase().contains(needle)
            || pattern.output_factor.to_lowercase().contains(needle)
            || Self::describe(pattern).to_lowercase().contains(needle)
    }

    fn describe(pattern: &Pattern) -> String {
        format!(
            "{} is typically followed by {} within {}h",
            pattern.input_factor, pattern.output_factor, pattern.lag_hours
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn make_pattern(child_id: Uuid, input: &str, output: &str) -> Pattern {
        Pattern {
            id: Uuid::new_v4(),
            child_id,
            input_factor: input.to_string(),
            output_factor: output.to_string(),
            correlation_strength: 0.8,
            confidence_score: 0.4,
            sample_size: 50,
            lag_hours: 24,
            times_confirmed: 0,
            validation_count: 0,
            clinically_validated: false,
            is_active: true,
            discovered_at: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    fn make_tracker(store: Arc<MemoryStore>) -> ValidationTracker {
        ValidationTracker::new(store, EngineConfig::default())
    }

    #[test]
    fn test_treatment_change_validates_matching_patterns() {
        let store = Arc::new(MemoryStore::new());
        let child_id = Uuid::new_v4();

        let matching = make_pattern(child_id, "melatonin_missed", "night_wakings");
        let unrelated = make_pattern(child_id, "screen_time", "meltdowns");
        store.insert_pattern(matching.clone()).unwrap();
        store.insert_pattern(unrelated.clone()).unwrap();

        let created = make_tracker(store.clone())
            .on_treatment_change(child_id, "Melatonin")
            .unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].target, ValidationTarget::Pattern(matching.id));
        assert_eq!(created[0].source, ValidationSource::Implicit);
        assert!((created[0].validation_strength - 0.7).abs() < 1e-12);

        assert_eq!(store.pattern(matching.id).unwrap().unwrap().validation_count, 1);
        assert_eq!(store.pattern(unrelated.id).unwrap().unwrap().validation_count, 0);
    }

    #[test]
    fn test_treatment_change_ignores_stale_patterns() {
        let store = Arc::new(MemoryStore::new());
        let child_id = Uuid::new_v4();

        let mut stale = make_pattern(child_id, "melatonin_missed", "night_wakings");
        stale.last_updated = Utc::now() - Duration::days(30);
        store.insert_pattern(stale).unwrap();

        let created = make_tracker(store)
            .on_treatment_change(child_id, "melatonin")
            .unwrap();
        assert!(created.is_empty());
    }

    #[test]
    fn test_parent_feedback_strengths() {
        let store = Arc::new(MemoryStore::new());
        let child_id = Uuid::new_v4();
        let pattern = make_pattern(child_id, "sleep_minutes", "meltdowns");
        store.insert_pattern(pattern.clone()).unwrap();
        let tracker = make_tracker(store.clone());

        let helpful = tracker
            .record_parent_feedback(ValidationTarget::Pattern(pattern.id), true, "confirmed")
            .unwrap();
        assert!((helpful.validation_strength - 0.8).abs() < 1e-12);
        assert_eq!(store.pattern(pattern.id).unwrap().unwrap().validation_count, 1);

        let unhelpful = tracker
            .record_parent_feedback(ValidationTarget::Pattern(pattern.id), false, "not it")
            .unwrap();
        assert!((unhelpful.validation_strength + 0.3).abs() < 1e-12);
        // Negative feedback recorded but does not bump the counter
        assert_eq!(store.pattern(pattern.id).unwrap().unwrap().validation_count, 1);
        assert_eq!(store.validations().len(), 2);
    }

    #[test]
    fn test_provider_validation_is_one_way_upgrade() {
        let store = Arc::new(MemoryStore::new());
        let child_id = Uuid::new_v4();
        let pattern = make_pattern(child_id, "sleep_minutes", "meltdowns");
        store.insert_pattern(pattern.clone()).unwrap();
        let tracker = make_tracker(store.clone());

        let validation = tracker
            .record_provider_validation(
                ValidationTarget::Pattern(pattern.id),
                "seen in clinic",
            )
            .unwrap();
        assert!((validation.validation_strength - 1.0).abs() < 1e-12);

        let stored = store.pattern(pattern.id).unwrap().unwrap();
        assert!(stored.clinically_validated);

        // Later parent feedback never downgrades the flag
        tracker
            .record_parent_feedback(ValidationTarget::Pattern(pattern.id), false, "unsure")
            .unwrap();
        assert!(store.pattern(pattern.id).unwrap().unwrap().clinically_validated);
    }

    #[test]
    fn test_insight_target_records_without_counter() {
        let store = Arc::new(MemoryStore::new());
        let tracker = make_tracker(store.clone());

        let insight_id = Uuid::new_v4();
        tracker
            .record_parent_feedback(ValidationTarget::Insight(insight_id), true, "useful")
            .unwrap();
        assert_eq!(store.validations().len(), 1);
        assert_eq!(
            store.validations()[0].target,
            ValidationTarget::Insight(insight_id)
        );
    }
}
