//! Engine facade
//!
//! Wires the components over shared collaborators and exposes the
//! operations consumed by the surrounding API layer. Everything is an
//! in-process, synchronous call; no wire format is mandated here.

use crate::alerts::AlertIntelligence;
use crate::baseline::BaselineEstimator;
use crate::cohort::CohortMatcher;
use crate::config::EngineConfig;
use crate::correlation::CorrelationEngine;
use crate::error::InsightError;
use crate::realtime::RealtimeDetector;
use crate::store::{AlertSink, ChildDirectory, InsightStore, LogDataProvider};
use crate::types::{
    AlertEffectiveness, CohortMatchResult, CorrelationRequest, DateRange, DetectionResult,
    Observation, ValidationTarget,
};
use crate::validation::ValidationTracker;
use std::sync::Arc;
use uuid::Uuid;

/// The assembled correlation and detection engine.
pub struct InsightEngine {
    baselines: BaselineEstimator,
    correlation: CorrelationEngine,
    realtime: RealtimeDetector,
    cohorts: CohortMatcher,
    alerts: AlertIntelligence,
    validation: ValidationTracker,
    store: Arc<dyn InsightStore>,
}

impl InsightEngine {
    pub fn new(
        provider: Arc<dyn LogDataProvider>,
        store: Arc<dyn InsightStore>,
        sink: Arc<dyn AlertSink>,
        directory: Arc<dyn ChildDirectory>,
        config: EngineConfig,
    ) -> Self {
        let alerts = AlertIntelligence::new(
            store.clone(),
            sink.clone(),
            directory.clone(),
            config.clone(),
        );
        Self {
            baselines: BaselineEstimator::new(provider.clone(), store.clone(), config.clone()),
            correlation: CorrelationEngine::new(
                provider.clone(),
                store.clone(),
                sink.clone(),
                directory.clone(),
                config.clone(),
            ),
            realtime: RealtimeDetector::new(
                provider,
                store.clone(),
                AlertIntelligence::new(store.clone(), sink, directory.clone(), config.clone()),
                config.clone(),
            ),
            cohorts: CohortMatcher::new(store.clone(), directory, config.clone()),
            alerts,
            validation: ValidationTracker::new(store.clone(), config),
            store,
        }
    }

    /// Create and persist a new correlation request in `pending`
    pub fn create_correlation_request(
        &self,
        child_id: Uuid,
        input_factors: Vec<String>,
        output_factors: Vec<String>,
        date_range: Option<DateRange>,
    ) -> Result<Uuid, InsightError> {
        if input_factors.is_empty() || output_factors.is_empty() {
            return Err(InsightError::InvalidRequest(
                "at least one input and one output factor required".to_string(),
            ));
        }
        let request =
            CorrelationRequest::new(child_id, input_factors, output_factors, date_range);
        let id = request.id;
        self.store.insert_correlation_request(request)?;
        Ok(id)
    }

    /// Execute a pending correlation request to a terminal state
    pub fn run_correlation(&self, request_id: Uuid) -> Result<(), InsightError> {
        self.correlation.run(request_id)
    }

    /// Recompute baselines for a child; returns the number written
    pub fn calculate_baselines(&self, child_id: Uuid) -> Result<usize, InsightError> {
        self.baselines.calculate_baselines(child_id)
    }

    /// Evaluate a newly-recorded observation synchronously
    pub fn on_log_created(
        &self,
        child_id: Uuid,
        observation: &Observation,
    ) -> Result<DetectionResult, InsightError> {
        self.realtime.on_log_created(child_id, observation)
    }

    /// Evaluate a missed medication dose
    pub fn on_medication_missed(
        &self,
        child_id: Uuid,
        medication_id: Uuid,
    ) -> Result<DetectionResult, InsightError> {
        self.realtime.on_medication_missed(child_id, medication_id)
    }

    /// Cohorts the child's profile matches, best first
    pub fn find_matching_cohorts(
        &self,
        child_id: Uuid,
    ) -> Result<Vec<CohortMatchResult>, InsightError> {
        self.cohorts.find_matching_cohorts(child_id)
    }

    /// Join a cohort anonymously; returns the membership hash
    pub fn join_cohort(&self, child_id: Uuid, cohort_id: Uuid) -> Result<String, InsightError> {
        self.cohorts.join_cohort(child_id, cohort_id)
    }

    /// Whether a candidate finding clears the adaptive generation bar
    pub fn should_generate_alert(
        &self,
        child_id: Uuid,
        alert_type: &str,
        confidence: f64,
    ) -> Result<bool, InsightError> {
        self.alerts.should_generate(child_id, alert_type, confidence)
    }

    /// Derived per-type alert effectiveness, recomputed on demand
    pub fn alert_effectiveness(
        &self,
        child_id: Uuid,
        alert_type: &str,
    ) -> Result<AlertEffectiveness, InsightError> {
        self.alerts.alert_effectiveness(child_id, alert_type)
    }

    /// Ingest explicit user feedback on a generated alert
    pub fn process_feedback(
        &self,
        alert_id: Uuid,
        user_id: Uuid,
        was_helpful: bool,
        comment: Option<String>,
    ) -> Result<(), InsightError> {
        self.alerts
            .process_feedback(alert_id, user_id, was_helpful, comment)
    }

    /// Implicit validation hook for treatment changes
    pub fn on_treatment_change(
        &self,
        child_id: Uuid,
        medication_name: &str,
    ) -> Result<usize, InsightError> {
        Ok(self
            .validation
            .on_treatment_change(child_id, medication_name)?
            .len())
    }

    /// Explicit parent validation of a finding
    pub fn record_parent_validation(
        &self,
        target: ValidationTarget,
        was_helpful: bool,
        note: &str,
    ) -> Result<(), InsightError> {
        self.validation
            .record_parent_feedback(target, was_helpful, note)
            .map(|_| ())
    }

    /// Provider confirmation of a finding
    pub fn record_provider_validation(
        &self,
        target: ValidationTarget,
        note: &str,
    ) -> Result<(), InsightError> {
        self.validation
            .record_provider_validation(target, note)
            .map(|_| ())
    }
}
