//! External collaborator seams
//!
//! The engine never talks to a database or log table directly. It consumes
//! four narrow traits: a log-data provider (factor series derived on read
//! from raw logs), an insight store (baselines, patterns, correlation
//! requests, validations, alert bookkeeping, cohorts), an alert sink, and a
//! child/family directory. [`MemoryStore`] implements all four in memory and
//! backs the test suite.

use crate::error::InsightError;
use crate::types::{
    Alert, AlertCounters, AlertFeedback, Baseline, ChildProfile, ClinicalValidation, Cohort,
    CohortPattern, CorrelationRequest, DataPoint, DateRange, Pattern, RequestStatus,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Read-side access to observation-derived factor series.
pub trait LogDataProvider: Send + Sync {
    /// All factor series for a child inside `range`, keyed by factor name,
    /// each ordered by timestamp
    fn factor_series(
        &self,
        child_id: Uuid,
        range: &DateRange,
    ) -> Result<BTreeMap<String, Vec<DataPoint>>, InsightError>;

    /// Missed doses recorded for one medication inside `range`
    fn missed_dose_count(
        &self,
        child_id: Uuid,
        medication_id: Uuid,
        range: &DateRange,
    ) -> Result<usize, InsightError>;
}

/// Durable storage for everything the engine derives.
pub trait InsightStore: Send + Sync {
    // Baselines: one active row per (child, metric)
    fn baselines_for_child(&self, child_id: Uuid) -> Result<Vec<Baseline>, InsightError>;
    fn upsert_baseline(&self, baseline: Baseline) -> Result<(), InsightError>;

    // Patterns
    fn insert_pattern(&self, pattern: Pattern) -> Result<(), InsightError>;
    fn pattern(&self, id: Uuid) -> Result<Option<Pattern>, InsightError>;
    fn active_patterns(&self, child_id: Uuid) -> Result<Vec<Pattern>, InsightError>;
    fn update_pattern(&self, pattern: Pattern) -> Result<(), InsightError>;
    /// Patterns for a child touched at or after `since`, active or not
    fn patterns_updated_since(
        &self,
        child_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Pattern>, InsightError>;

    // Correlation requests
    fn insert_correlation_request(&self, request: CorrelationRequest)
        -> Result<(), InsightError>;
    fn correlation_request(&self, id: Uuid) -> Result<Option<CorrelationRequest>, InsightError>;
    fn update_correlation_request(&self, request: CorrelationRequest)
        -> Result<(), InsightError>;
    /// True while any request for the child sits in `processing`
    fn has_active_run(&self, child_id: Uuid) -> Result<bool, InsightError>;

    // Validations
    fn insert_validation(&self, validation: ClinicalValidation) -> Result<(), InsightError>;

    // Alert bookkeeping (generation history, counters, feedback)
    fn record_alert(&self, alert: &Alert) -> Result<(), InsightError>;
    fn alert(&self, id: Uuid) -> Result<Option<Alert>, InsightError>;
    fn latest_alert_at(
        &self,
        child_id: Uuid,
        alert_type: &str,
    ) -> Result<Option<DateTime<Utc>>, InsightError>;
    fn alert_counters(
        &self,
        child_id: Uuid,
        alert_type: &str,
    ) -> Result<AlertCounters, InsightError>;
    fn record_feedback(&self, feedback: AlertFeedback) -> Result<(), InsightError>;

    // Cohorts
    fn cohorts(&self) -> Result<Vec<Cohort>, InsightError>;
    fn cohort_patterns(&self, cohort_id: Uuid) -> Result<Vec<CohortPattern>, InsightError>;
    /// Record anonymous membership; `member_hash` is a one-way salted hash,
    /// never a child id
    fn insert_cohort_membership(
        &self,
        cohort_id: Uuid,
        member_hash: &str,
    ) -> Result<(), InsightError>;
}

/// Delivery seam for fully-formed alerts.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: &Alert) -> Result<(), InsightError>;
}

/// Child to family/profile resolution for alert routing and cohort scoring.
pub trait ChildDirectory: Send + Sync {
    fn child_profile(&self, child_id: Uuid) -> Result<ChildProfile, InsightError>;
    fn family_of(&self, child_id: Uuid) -> Result<Uuid, InsightError>;
}

#[derive(Default)]
struct MemoryState {
    baselines: Vec<Baseline>,
    patterns: Vec<Pattern>,
    requests: HashMap<Uuid, CorrelationRequest>,
    validations: Vec<ClinicalValidation>,
    alerts: Vec<Alert>,
    counters: HashMap<(Uuid, String), AlertCounters>,
    feedback: Vec<AlertFeedback>,
    cohorts: Vec<Cohort>,
    cohort_patterns: HashMap<Uuid, Vec<CohortPattern>>,
    memberships: Vec<(Uuid, String)>,
    profiles: HashMap<Uuid, ChildProfile>,
    families: HashMap<Uuid, Uuid>,
    series: HashMap<Uuid, BTreeMap<String, Vec<DataPoint>>>,
    missed_doses: HashMap<(Uuid, Uuid), Vec<DateTime<Utc>>>,
    fail_fetch: Option<String>,
}

/// In-memory implementation of every collaborator seam.
///
/// Used by the test suite and by embedders that want the engine without a
/// relational store behind it.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock means a test already panicked; propagating the
        // inner state is still sound for reads and writes here.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a child profile and its family mapping
    pub fn put_child(&self, profile: ChildProfile, family_id: Uuid) {
        let mut state = self.lock();
        state.families.insert(profile.child_id, family_id);
        state.profiles.insert(profile.child_id, profile);
    }

    /// Seed one factor series for a child
    pub fn put_series(&self, child_id: Uuid, factor: &str, points: Vec<DataPoint>) {
        let mut state = self.lock();
        state
            .series
            .entry(child_id)
            .or_default()
            .insert(factor.to_string(), points);
    }

    /// Seed a missed-dose event
    pub fn put_missed_dose(&self, child_id: Uuid, medication_id: Uuid, at: DateTime<Utc>) {
        self.lock()
            .missed_doses
            .entry((child_id, medication_id))
            .or_default()
            .push(at);
    }

    /// Seed a cohort and its shared patterns
    pub fn put_cohort(&self, cohort: Cohort, patterns: Vec<CohortPattern>) {
        let mut state = self.lock();
        state.cohort_patterns.insert(cohort.id, patterns);
        state.cohorts.push(cohort);
    }

    /// Make the next `factor_series` call fail with `message`
    pub fn fail_next_fetch(&self, message: &str) {
        self.lock().fail_fetch = Some(message.to_string());
    }

    /// Alerts delivered through the sink, oldest first
    pub fn sent_alerts(&self) -> Vec<Alert> {
        self.lock().alerts.clone()
    }

    /// Stored validations, oldest first
    pub fn validations(&self) -> Vec<ClinicalValidation> {
        self.lock().validations.clone()
    }

    /// Anonymous cohort memberships as `(cohort_id, member_hash)`
    pub fn memberships(&self) -> Vec<(Uuid, String)> {
        self.lock().memberships.clone()
    }
}

impl LogDataProvider for MemoryStore {
    fn factor_series(
        &self,
        child_id: Uuid,
        range: &DateRange,
    ) -> Result<BTreeMap<String, Vec<DataPoint>>, InsightError> {
        let mut state = self.lock();
        if let Some(message) = state.fail_fetch.take() {
            return Err(InsightError::DataFetch(message));
        }
        let mut out = BTreeMap::new();
        if let Some(series) = state.series.get(&child_id) {
            for (factor, points) in series {
                let filtered: Vec<DataPoint> = points
                    .iter()
                    .filter(|p| range.contains(p.timestamp))
                    .copied()
                    .collect();
                if !filtered.is_empty() {
                    out.insert(factor.clone(), filtered);
                }
            }
        }
        Ok(out)
    }

    fn missed_dose_count(
        &self,
        child_id: Uuid,
        medication_id: Uuid,
        range: &DateRange,
    ) -> Result<usize, InsightError> {
        let state = self.lock();
        Ok(state
            .missed_doses
            .get(&(child_id, medication_id))
            .map(|events| events.iter().filter(|t| range.contains(**t)).count())
            .unwrap_or(0))
    }
}

impl InsightStore for MemoryStore {
    fn baselines_for_child(&self, child_id: Uuid) -> Result<Vec<Baseline>, InsightError> {
        Ok(self
            .lock()
            .baselines
            .iter()
            .filter(|b| b.child_id == child_id)
            .cloned()
            .collect())
    }

    fn upsert_baseline(&self, baseline: Baseline) -> Result<(), InsightError> {
        let mut state = self.lock();
        match state
            .baselines
            .iter_mut()
            .find(|b| b.child_id == baseline.child_id && b.metric_name == baseline.metric_name)
        {
            Some(existing) => {
                // Keep the existing row identity on overwrite
                let id = existing.id;
                *existing = baseline;
                existing.id = id;
            }
            None => state.baselines.push(baseline),
        }
        Ok(())
    }

    fn insert_pattern(&self, pattern: Pattern) -> Result<(), InsightError> {
        self.lock().patterns.push(pattern);
        Ok(())
    }

    fn pattern(&self, id: Uuid) -> Result<Option<Pattern>, InsightError> {
        Ok(self.lock().patterns.iter().find(|p| p.id == id).cloned())
    }

    fn active_patterns(&self, child_id: Uuid) -> Result<Vec<Pattern>, InsightError> {
        Ok(self
            .lock()
            .patterns
            .iter()
            .filter(|p| p.child_id == child_id && p.is_active)
            .cloned()
            .collect())
    }

    fn update_pattern(&self, pattern: Pattern) -> Result<(), InsightError> {
        let mut state = self.lock();
        match state.patterns.iter_mut().find(|p| p.id == pattern.id) {
            Some(existing) => {
                *existing = pattern;
                Ok(())
            }
            None => Err(InsightError::NotFound(format!("pattern {}", pattern.id))),
        }
    }

    fn patterns_updated_since(
        &self,
        child_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Pattern>, InsightError> {
        Ok(self
            .lock()
            .patterns
            .iter()
            .filter(|p| p.child_id == child_id && p.last_updated >= since)
            .cloned()
            .collect())
    }

    fn insert_correlation_request(
        &self,
        request: CorrelationRequest,
    ) -> Result<(), InsightError> {
        self.lock().requests.insert(request.id, request);
        Ok(())
    }

    fn correlation_request(&self, id: Uuid) -> Result<Option<CorrelationRequest>, InsightError> {
        Ok(self.lock().requests.get(&id).cloned())
    }

    fn update_correlation_request(
        &self,
        request: CorrelationRequest,
    ) -> Result<(), InsightError> {
        let mut state = self.lock();
        if !state.requests.contains_key(&request.id) {
            return Err(InsightError::NotFound(format!("request {}", request.id)));
        }
        state.requests.insert(request.id, request);
        Ok(())
    }

    fn has_active_run(&self, child_id: Uuid) -> Result<bool, InsightError> {
        Ok(self
            .lock()
            .requests
            .values()
            .any(|r| r.child_id == child_id && r.status == RequestStatus::Processing))
    }

    fn insert_validation(&self, validation: ClinicalValidation) -> Result<(), InsightError> {
        self.lock().validations.push(validation);
        Ok(())
    }

    fn record_alert(&self, alert: &Alert) -> Result<(), InsightError> {
        let mut state = self.lock();
        state
            .counters
            .entry((alert.child_id, alert.alert_type.clone()))
            .or_default()
            .total_generated += 1;
        state.alerts.push(alert.clone());
        Ok(())
    }

    fn alert(&self, id: Uuid) -> Result<Option<Alert>, InsightError> {
        Ok(self.lock().alerts.iter().find(|a| a.id == id).cloned())
    }

    fn latest_alert_at(
        &self,
        child_id: Uuid,
        alert_type: &str,
    ) -> Result<Option<DateTime<Utc>>, InsightError> {
        Ok(self
            .lock()
            .alerts
            .iter()
            .filter(|a| a.child_id == child_id && a.alert_type == alert_type)
            .map(|a| a.created_at)
            .max())
    }

    fn alert_counters(
        &self,
        child_id: Uuid,
        alert_type: &str,
    ) -> Result<AlertCounters, InsightError> {
        Ok(self
            .lock()
            .counters
            .get(&(child_id, alert_type.to_string()))
            .copied()
            .unwrap_or_default())
    }

    fn record_feedback(&self, feedback: AlertFeedback) -> Result<(), InsightError> {
        let mut state = self.lock();
        let alert = state
            .alerts
            .iter()
            .find(|a| a.id == feedback.alert_id)
            .cloned()
            .ok_or_else(|| InsightError::NotFound(format!("alert {}", feedback.alert_id)))?;

        let counters = state
            .counters
            .entry((alert.child_id, alert.alert_type.clone()))
            .or_default();
        counters.acknowledged += 1;
        if feedback.was_helpful {
            counters.helpful_count += 1;
        } else {
            counters.dismissed_count += 1;
        }
        state.feedback.push(feedback);
        Ok(())
    }

    fn cohorts(&self) -> Result<Vec<Cohort>, InsightError> {
        Ok(self.lock().cohorts.clone())
    }

    fn cohort_patterns(&self, cohort_id: Uuid) -> Result<Vec<CohortPattern>, InsightError> {
        Ok(self
            .lock()
            .cohort_patterns
            .get(&cohort_id)
            .cloned()
            .unwrap_or_default())
    }

    fn insert_cohort_membership(
        &self,
        cohort_id: Uuid,
        member_hash: &str,
    ) -> Result<(), InsightError> {
        let mut state = self.lock();
        if !state
            .memberships
            .iter()
            .any(|(c, h)| *c == cohort_id && h == member_hash)
        {
            state.memberships.push((cohort_id, member_hash.to_string()));
        }
        Ok(())
    }
}

impl AlertSink for MemoryStore {
    fn send(&self, _alert: &Alert) -> Result<(), InsightError> {
        // Delivery and bookkeeping share storage in the in-memory backend;
        // record_alert already captured the alert row.
        Ok(())
    }
}

impl ChildDirectory for MemoryStore {
    fn child_profile(&self, child_id: Uuid) -> Result<ChildProfile, InsightError> {
        self.lock()
            .profiles
            .get(&child_id)
            .cloned()
            .ok_or_else(|| InsightError::NotFound(format!("child {child_id}")))
    }

    fn family_of(&self, child_id: Uuid) -> Result<Uuid, InsightError> {
        self.lock()
            .families
            .get(&child_id)
            .copied()
            .ok_or_else(|| InsightError::NotFound(format!("child {child_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn make_baseline(child_id: Uuid, metric: &str, mean: f64) -> Baseline {
        Baseline {
            id: Uuid::new_v4(),
            child_id,
            metric_name: metric.to_string(),
            mean,
            std_dev: 1.0,
            sample_size: 20,
            calculated_at: Utc::now(),
            valid_until: Utc::now(),
        }
    }

    #[test]
    fn test_baseline_upsert_keeps_identity() {
        let store = MemoryStore::new();
        let child_id = Uuid::new_v4();

        let first = make_baseline(child_id, "sleep_minutes", 400.0);
        let original_id = first.id;
        store.upsert_baseline(first).unwrap();

        let replacement = make_baseline(child_id, "sleep_minutes", 430.0);
        store.upsert_baseline(replacement).unwrap();

        let baselines = store.baselines_for_child(child_id).unwrap();
        assert_eq!(baselines.len(), 1);
        assert_eq!(baselines[0].id, original_id);
        assert_eq!(baselines[0].mean, 430.0);
    }

    #[test]
    fn test_active_run_guard_tracks_processing() {
        let store = MemoryStore::new();
        let child_id = Uuid::new_v4();
        let mut request =
            CorrelationRequest::new(child_id, vec!["a".into()], vec!["b".into()], None);
        store.insert_correlation_request(request.clone()).unwrap();
        assert!(!store.has_active_run(child_id).unwrap());

        request.status = RequestStatus::Processing;
        store.update_correlation_request(request.clone()).unwrap();
        assert!(store.has_active_run(child_id).unwrap());

        request.status = RequestStatus::Completed;
        store.update_correlation_request(request).unwrap();
        assert!(!store.has_active_run(child_id).unwrap());
    }

    #[test]
    fn test_feedback_updates_counters() {
        let store = MemoryStore::new();
        let child_id = Uuid::new_v4();
        let alert = Alert {
            id: Uuid::new_v4(),
            child_id,
            family_id: Uuid::new_v4(),
            alert_type: "sleep_concern".to_string(),
            severity: crate::types::Severity::Info,
            title: "t".to_string(),
            description: "d".to_string(),
            data: serde_json::json!({}),
            confidence: Some(0.7),
            pattern_id: None,
            created_at: Utc::now(),
        };
        store.record_alert(&alert).unwrap();

        store
            .record_feedback(AlertFeedback {
                alert_id: alert.id,
                user_id: Uuid::new_v4(),
                was_helpful: true,
                comment: None,
                created_at: Utc::now(),
            })
            .unwrap();

        let counters = store.alert_counters(child_id, "sleep_concern").unwrap();
        assert_eq!(counters.total_generated, 1);
        assert_eq!(counters.acknowledged, 1);
        assert_eq!(counters.helpful_count, 1);
        assert_eq!(counters.dismissed_count, 0);
    }

    #[test]
    fn test_missing_child_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.child_profile(Uuid::new_v4()),
            Err(InsightError::NotFound(_))
        ));
    }
}
