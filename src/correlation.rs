//! Correlation discovery
//!
//! Runs a caller-created [`CorrelationRequest`] through its state machine:
//! for each declared factor pair and each candidate lag, aligns the two
//! series by calendar day, computes Pearson's r, records significant
//! findings, and promotes high-confidence findings into durable patterns.
//!
//! Failure policy follows the request boundary: a data-fetch failure
//! terminates the request into `failed` with the provider's message captured
//! verbatim and is never thrown past `run`; per-pair and per-lag problems
//! are isolated; pattern persistence and alert emission are best-effort.

use crate::config::EngineConfig;
use crate::error::InsightError;
use crate::stats;
use crate::store::{AlertSink, ChildDirectory, InsightStore, LogDataProvider};
use crate::types::{
    Alert, CorrelationFinding, CorrelationRequest, CorrelationResults, DataPoint, DateRange,
    Pattern, RequestStatus, Severity,
};
use chrono::Utc;
use log::{debug, warn};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Discovers lagged statistical relationships between factor series.
pub struct CorrelationEngine {
    provider: Arc<dyn LogDataProvider>,
    store: Arc<dyn InsightStore>,
    sink: Arc<dyn AlertSink>,
    directory: Arc<dyn ChildDirectory>,
    config: EngineConfig,
}

/// Marks the request `failed` if the run unwinds before reaching a terminal
/// state, so a cancelled or panicked run never leaves `processing` behind.
struct RunGuard {
    store: Arc<dyn InsightStore>,
    request_id: Uuid,
    armed: bool,
}

impl RunGuard {
    fn new(store: Arc<dyn InsightStore>, request_id: Uuid) -> Self {
        Self {
            store,
            request_id,
            armed: true,
        }
    }

    /// The run reached a terminal state on its own
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let rolled_back = self
            .store
            .correlation_request(self.request_id)
            .ok()
            .flatten()
            .filter(|r| r.status == RequestStatus::Processing)
            .map(|mut request| {
                request.status = RequestStatus::Failed;
                request.error_message = Some("run aborted before completion".to_string());
                request.completed_at = Some(Utc::now());
                self.store.update_correlation_request(request)
            });
        if let Some(Err(e)) = rolled_back {
            warn!("failed to roll back aborted request {}: {e}", self.request_id);
        }
    }
}

impl CorrelationEngine {
    pub fn new(
        provider: Arc<dyn LogDataProvider>,
        store: Arc<dyn InsightStore>,
        sink: Arc<dyn AlertSink>,
        directory: Arc<dyn ChildDirectory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            store,
            sink,
            directory,
            config,
        }
    }

    /// Execute a pending correlation request to a terminal state.
    ///
    /// Returns `Ok(())` both on `completed` and on a run recorded as
    /// `failed`; the error variants cover only problems outside the request
    /// itself (unknown id, non-pending status, concurrent run, store loss).
    pub fn run(&self, request_id: Uuid) -> Result<(), InsightError> {
        let mut request = self
            .store
            .correlation_request(request_id)?
            .ok_or_else(|| InsightError::NotFound(format!("correlation request {request_id}")))?;

        if request.status != RequestStatus::Pending {
            return Err(InsightError::InvalidRequest(format!(
                "request {request_id} is {:?}, expected pending",
                request.status
            )));
        }

        // At most one concurrent run per child; two concurrent runs could
        // double-write overlapping patterns
        if self.store.has_active_run(request.child_id)? {
            return Err(InsightError::RunInProgress(request.child_id));
        }

        // Transition recorded with a timestamp before any computation
        request.status = RequestStatus::Processing;
        request.started_at = Some(Utc::now());
        self.store.update_correlation_request(request.clone())?;

        let mut guard = RunGuard::new(self.store.clone(), request_id);

        let range = request
            .date_range
            .unwrap_or_else(|| DateRange::trailing_days(self.config.baseline_window_days));

        let series = match self.provider.factor_series(request.child_id, &range) {
            Ok(series) => series,
            Err(e) => {
                request.status = RequestStatus::Failed;
                request.error_message = Some(e.to_string());
                request.completed_at = Some(Utc::now());
                self.store.update_correlation_request(request)?;
                guard.disarm();
                return Ok(());
            }
        };

        let mut findings = Vec::new();
        let mut patterns_created = 0;

        for input_factor in &request.input_factors {
            for output_factor in &request.output_factors {
                patterns_created += self.analyze_pair(
                    request.child_id,
                    input_factor,
                    output_factor,
                    &series,
                    &mut findings,
                );
            }
        }

        let completed_at = Utc::now();
        request.results = Some(CorrelationResults {
            findings,
            date_range: range,
            completed_at,
            patterns_created,
        });
        request.status = RequestStatus::Completed;
        request.completed_at = Some(completed_at);
        self.store.update_correlation_request(request)?;
        guard.disarm();
        Ok(())
    }

    /// Evaluate one factor pair across every candidate lag. Returns the
    /// number of patterns persisted for the pair.
    fn analyze_pair(
        &self,
        child_id: Uuid,
        input_factor: &str,
        output_factor: &str,
        series: &BTreeMap<String, Vec<DataPoint>>,
        findings: &mut Vec<CorrelationFinding>,
    ) -> usize {
        let (Some(input), Some(output)) = (series.get(input_factor), series.get(output_factor))
        else {
            debug!("skipping pair {input_factor}->{output_factor}: missing series");
            return 0;
        };
        if input.len() < self.config.min_sample_size || output.len() < self.config.min_sample_size
        {
            debug!(
                "skipping pair {input_factor}->{output_factor}: {}/{} samples",
                input.len(),
                output.len()
            );
            return 0;
        }

        let mut patterns_created = 0;

        // Every qualifying lag is reported independently; no best-lag-only
        // collapsing
        for &lag_hours in &self.config.candidate_lags_hours {
            let pairs = stats::align_series_with_lag(input, output, lag_hours);
            if pairs.len() < self.config.min_sample_size {
                continue;
            }

            let xs: Vec<f64> = pairs.iter().map(|(x, _)| *x).collect();
            let ys: Vec<f64> = pairs.iter().map(|(_, y)| *y).collect();
            let r = stats::pearson(&xs, &ys);

            if r.abs() < self.config.significant_correlation {
                continue;
            }

            let finding = CorrelationFinding {
                input_factor: input_factor.to_string(),
                output_factor: output_factor.to_string(),
                lag_hours,
                coefficient: r,
                sample_size: pairs.len(),
            };

            if r.abs() >= self.config.high_confidence_threshold
                && self.promote_to_pattern(child_id, &finding)
            {
                patterns_created += 1;
            }

            findings.push(finding);
        }

        patterns_created
    }

    /// Persist a high-confidence finding as a durable pattern and raise the
    /// discovery alert. Both writes are best-effort: a failure is logged and
    /// the run continues.
    fn promote_to_pattern(&self, child_id: Uuid, finding: &CorrelationFinding) -> bool {
        let now = Utc::now();
        // Confidence saturates once the sample reaches 100 and never
        // exceeds |r|
        let confidence =
            finding.coefficient.abs() * (finding.sample_size as f64 / 100.0).min(1.0);

        let pattern = Pattern {
            id: Uuid::new_v4(),
            child_id,
            input_factor: finding.input_factor.clone(),
            output_factor: finding.output_factor.clone(),
            correlation_strength: finding.coefficient,
            confidence_score: confidence,
            sample_size: finding.sample_size,
            lag_hours: finding.lag_hours,
            times_confirmed: 0,
            validation_count: 0,
            clinically_validated: false,
            is_active: true,
            discovered_at: now,
            last_updated: now,
        };

        if let Err(e) = self.store.insert_pattern(pattern.clone()) {
            warn!(
                "failed to persist pattern {}->{}: {e}",
                finding.input_factor, finding.output_factor
            );
            return false;
        }

        self.raise_discovery_alert(&pattern);
        true
    }

    fn raise_discovery_alert(&self, pattern: &Pattern) {
        let family_id = match self.directory.family_of(pattern.child_id) {
            Ok(family_id) => family_id,
            Err(e) => {
                warn!("cannot route discovery alert for pattern {}: {e}", pattern.id);
                return;
            }
        };

        let direction = if pattern.correlation_strength >= 0.0 {
            "followed by more"
        } else {
            "followed by less"
        };
        let alert = Alert {
            id: Uuid::new_v4(),
            child_id: pattern.child_id,
            family_id,
            alert_type: "pattern_discovered".to_string(),
            severity: Severity::Info,
            title: "New behavioral pattern discovered".to_string(),
            description: format!(
                "{} is typically {} {} about {}h later",
                pattern.input_factor, direction, pattern.output_factor, pattern.lag_hours
            ),
            data: json!({
                "input_factor": pattern.input_factor,
                "output_factor": pattern.output_factor,
                "correlation": pattern.correlation_strength,
                "lag_hours": pattern.lag_hours,
                "sample_size": pattern.sample_size,
                "engine_version": crate::ENGINE_VERSION,
            }),
            confidence: Some(pattern.confidence_score),
            pattern_id: Some(pattern.id),
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.record_alert(&alert) {
            warn!("failed to record discovery alert: {e}");
            return;
        }
        if let Err(e) = self.sink.send(&alert) {
            warn!("failed to deliver discovery alert: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::ChildProfile;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    // Binary missed-dose indicator for 20 days; chosen so the series only
    // correlates with the meltdown series at the 24h lag.
    const MISSED: [f64; 20] = [
        1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0,
        1.0, 1.0,
    ];
    // Meltdown scores one day later: 4 * missed[d-1] + jitter + 2
    const MELTDOWNS: [f64; 20] = [
        6.352, 0.836, 0.71, 4.784, 3.377, 4.823, 2.376, 3.409, 0.605, 1.658, 1.932, 3.251, 5.066,
        5.275, 5.244, 4.648, 6.521, 2.95, 5.809, 4.614,
    ];

    fn make_store_with_child() -> (Arc<MemoryStore>, Uuid) {
        // Best-effort writes log through the `log` facade; capture them
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(MemoryStore::new());
        let child_id = Uuid::new_v4();
        store.put_child(
            ChildProfile {
                child_id,
                birth_date: NaiveDate::from_ymd_opt(2019, 4, 2).unwrap(),
                gender: "male".to_string(),
                conditions: vec![],
            },
            Uuid::new_v4(),
        );
        (store, child_id)
    }

    fn make_engine(store: Arc<MemoryStore>) -> CorrelationEngine {
        CorrelationEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            EngineConfig::default(),
        )
    }

    fn seed_lagged_series(store: &MemoryStore, child_id: Uuid) -> DateRange {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let missed: Vec<DataPoint> = MISSED
            .iter()
            .enumerate()
            .map(|(i, v)| DataPoint::new(base + Duration::days(i as i64), *v))
            .collect();
        // Meltdowns observed at 18:00 on days 1..=20
        let meltdowns: Vec<DataPoint> = MELTDOWNS
            .iter()
            .enumerate()
            .map(|(i, v)| {
                DataPoint::new(base + Duration::days(i as i64 + 1) + Duration::hours(10), *v)
            })
            .collect();
        store.put_series(child_id, "medication_missed", missed);
        store.put_series(child_id, "meltdowns", meltdowns);
        DateRange::new(base - Duration::days(1), base + Duration::days(25))
    }

    fn make_request(store: &MemoryStore, child_id: Uuid, range: DateRange) -> Uuid {
        let request = CorrelationRequest::new(
            child_id,
            vec!["medication_missed".to_string()],
            vec!["meltdowns".to_string()],
            Some(range),
        );
        let id = request.id;
        store.insert_correlation_request(request).unwrap();
        id
    }

    #[test]
    fn test_missed_dose_to_meltdown_discovery() {
        let (store, child_id) = make_store_with_child();
        let range = seed_lagged_series(&store, child_id);
        let request_id = make_request(&store, child_id, range);

        make_engine(store.clone()).run(request_id).unwrap();

        let request = store.correlation_request(request_id).unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert!(request.completed_at.is_some());
        assert!(request.started_at.is_some());

        let results = request.results.unwrap();
        assert_eq!(results.findings.len(), 1);
        let finding = &results.findings[0];
        assert_eq!(finding.lag_hours, 24);
        assert_eq!(finding.sample_size, 20);
        assert!(finding.coefficient >= 0.7);
        assert!((finding.coefficient - 0.874654416).abs() < 1e-6);

        // Exactly one pattern, confidence = |r| * n/100
        let patterns = store.active_patterns(child_id).unwrap();
        assert_eq!(patterns.len(), 1);
        let pattern = &patterns[0];
        assert_eq!(pattern.lag_hours, 24);
        let expected = finding.coefficient.abs() * 0.2;
        assert!((pattern.confidence_score - expected).abs() < 1e-9);
        assert!(pattern.confidence_score <= pattern.correlation_strength.abs());

        // Discovery alert routed to the family
        let alerts = store.sent_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "pattern_discovered");
        assert_eq!(alerts[0].pattern_id, Some(pattern.id));
    }

    #[test]
    fn test_data_fetch_failure_terminates_request() {
        let (store, child_id) = make_store_with_child();
        let range = seed_lagged_series(&store, child_id);
        let request_id = make_request(&store, child_id, range);

        store.fail_next_fetch("log provider unavailable");
        make_engine(store.clone()).run(request_id).unwrap();

        let request = store.correlation_request(request_id).unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Failed);
        let message = request.error_message.unwrap();
        assert!(message.contains("log provider unavailable"));
        assert!(request.results.is_none());
    }

    #[test]
    fn test_unknown_request_is_not_found() {
        let (store, _) = make_store_with_child();
        let result = make_engine(store).run(Uuid::new_v4());
        assert!(matches!(result, Err(InsightError::NotFound(_))));
    }

    #[test]
    fn test_non_pending_request_is_rejected() {
        let (store, child_id) = make_store_with_child();
        let range = seed_lagged_series(&store, child_id);
        let request_id = make_request(&store, child_id, range);

        let engine = make_engine(store.clone());
        engine.run(request_id).unwrap();
        // Second run of a completed request
        let result = engine.run(request_id);
        assert!(matches!(result, Err(InsightError::InvalidRequest(_))));
    }

    #[test]
    fn test_concurrent_run_guard() {
        let (store, child_id) = make_store_with_child();
        let range = seed_lagged_series(&store, child_id);

        // A stuck request already in processing for the same child
        let mut stuck = CorrelationRequest::new(
            child_id,
            vec!["sleep_minutes".to_string()],
            vec!["meltdowns".to_string()],
            Some(range),
        );
        stuck.status = RequestStatus::Processing;
        store.insert_correlation_request(stuck).unwrap();

        let request_id = make_request(&store, child_id, range);
        let result = make_engine(store).run(request_id);
        assert!(matches!(result, Err(InsightError::RunInProgress(c)) if c == child_id));
    }

    #[test]
    fn test_thin_pair_yields_no_findings() {
        let (store, child_id) = make_store_with_child();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        // Only 5 observations per factor, below the minimum of 14
        let short: Vec<DataPoint> = (0..5)
            .map(|i| DataPoint::new(base + Duration::days(i), 1.0 + i as f64))
            .collect();
        store.put_series(child_id, "medication_missed", short.clone());
        store.put_series(child_id, "meltdowns", short);

        let range = DateRange::new(base - Duration::days(1), base + Duration::days(10));
        let request_id = make_request(&store, child_id, range);
        make_engine(store.clone()).run(request_id).unwrap();

        let request = store.correlation_request(request_id).unwrap().unwrap();
        // Insufficient data completes the run with no findings, not an error
        assert_eq!(request.status, RequestStatus::Completed);
        assert!(request.results.unwrap().findings.is_empty());
        assert!(store.active_patterns(child_id).unwrap().is_empty());
    }

    #[test]
    fn test_constant_series_produces_no_degenerate_finding() {
        let (store, child_id) = make_store_with_child();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let constant: Vec<DataPoint> = (0..20)
            .map(|i| DataPoint::new(base + Duration::days(i), 5.0))
            .collect();
        let varying: Vec<DataPoint> = (0..20)
            .map(|i| DataPoint::new(base + Duration::days(i), i as f64))
            .collect();
        store.put_series(child_id, "medication_missed", constant);
        store.put_series(child_id, "meltdowns", varying);

        let range = DateRange::new(base - Duration::days(1), base + Duration::days(25));
        let request_id = make_request(&store, child_id, range);
        make_engine(store.clone()).run(request_id).unwrap();

        let request = store.correlation_request(request_id).unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert!(request.results.unwrap().findings.is_empty());
    }

    #[test]
    fn test_run_guard_rolls_back_abandoned_processing() {
        let (store, child_id) = make_store_with_child();
        let range = seed_lagged_series(&store, child_id);
        let request_id = make_request(&store, child_id, range);

        let mut request = store.correlation_request(request_id).unwrap().unwrap();
        request.status = RequestStatus::Processing;
        store.update_correlation_request(request).unwrap();

        // Guard dropped without reaching a terminal state, as after a panic
        // or caller cancellation mid-run
        drop(RunGuard::new(store.clone(), request_id));

        let request = store.correlation_request(request_id).unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Failed);
        assert!(request.error_message.unwrap().contains("aborted"));
    }
}
