//! Core types for the insight engine
//!
//! This module defines the data structures that flow through the engine:
//! observation samples, baselines, correlation requests and findings,
//! durable patterns, cohort aggregates, validations, and alerts.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One sample of one factor for one child, derived on read from raw logs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Inclusive time range over which series are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range covering the trailing `days` up to now
    pub fn trailing_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Per-child, per-metric statistical baseline.
///
/// One active baseline per `(child_id, metric_name)`; recomputation
/// overwrites in place and keeps the row's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub id: Uuid,
    pub child_id: Uuid,
    pub metric_name: String,
    pub mean: f64,
    pub std_dev: f64,
    pub sample_size: usize,
    pub calculated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Lifecycle of a correlation request. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A single caller-initiated correlation run over declared factor pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRequest {
    pub id: Uuid,
    pub child_id: Uuid,
    pub input_factors: Vec<String>,
    pub output_factors: Vec<String>,
    /// Resolved to the trailing default window when absent
    pub date_range: Option<DateRange>,
    pub status: RequestStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: Option<CorrelationResults>,
    pub error_message: Option<String>,
}

impl CorrelationRequest {
    pub fn new(
        child_id: Uuid,
        input_factors: Vec<String>,
        output_factors: Vec<String>,
        date_range: Option<DateRange>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            child_id,
            input_factors,
            output_factors,
            date_range,
            status: RequestStatus::Pending,
            started_at: None,
            completed_at: None,
            results: None,
            error_message: None,
        }
    }
}

/// One `(pair, lag, r, n)` relationship that cleared the significance bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationFinding {
    pub input_factor: String,
    pub output_factor: String,
    pub lag_hours: i64,
    pub coefficient: f64,
    pub sample_size: usize,
}

/// Verbatim payload stored on a completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResults {
    pub findings: Vec<CorrelationFinding>,
    pub date_range: DateRange,
    pub completed_at: DateTime<Utc>,
    pub patterns_created: usize,
}

/// A persisted, confidence-scored, directional relationship between two
/// factors for one child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: Uuid,
    pub child_id: Uuid,
    pub input_factor: String,
    pub output_factor: String,
    /// Pearson r, in [-1, 1]
    pub correlation_strength: f64,
    /// |r| weighted by sample size, in [0, 1]
    pub confidence_score: f64,
    pub sample_size: usize,
    pub lag_hours: i64,
    pub times_confirmed: u32,
    pub validation_count: u32,
    pub clinically_validated: bool,
    pub is_active: bool,
    pub discovered_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Matching criteria declared by a cohort. An empty/absent criterion is
/// skipped during scoring, not penalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CohortCriteria {
    /// Inclusive age band in whole years
    pub age_range: Option<(u32, u32)>,
    pub gender: Option<String>,
    pub conditions: Vec<String>,
}

impl CohortCriteria {
    pub fn is_empty(&self) -> bool {
        self.age_range.is_none() && self.gender.is_none() && self.conditions.is_empty()
    }
}

/// An anonymized population segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cohort {
    pub id: Uuid,
    pub name: String,
    pub criteria: CohortCriteria,
}

/// A pattern observed across a cohort's member families.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortPattern {
    pub cohort_id: Uuid,
    pub description: String,
    pub families_affected: u32,
    pub families_total: u32,
    pub avg_correlation: f64,
}

impl CohortPattern {
    /// Share of the cohort showing this pattern, 0 when the cohort is empty
    pub fn percentage(&self) -> f64 {
        if self.families_total == 0 {
            return 0.0;
        }
        f64::from(self.families_affected) / f64::from(self.families_total) * 100.0
    }

    /// Cohort-level confidence: correlation magnitude with sign discarded
    pub fn confidence(&self) -> f64 {
        self.avg_correlation.abs()
    }
}

/// A cohort a child's profile matched, with its shared patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortMatchResult {
    pub cohort: Cohort,
    pub match_score: f64,
    pub patterns: Vec<CohortPattern>,
}

/// Demographic/clinical profile scored against cohort criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildProfile {
    pub child_id: Uuid,
    pub birth_date: NaiveDate,
    pub gender: String,
    pub conditions: Vec<String>,
}

impl ChildProfile {
    /// Whole-year age at `today`, accounting for day-of-year
    pub fn age_years(&self, today: NaiveDate) -> u32 {
        let mut age = today.year() - self.birth_date.year();
        if (today.month(), today.day()) < (self.birth_date.month(), self.birth_date.day()) {
            age -= 1;
        }
        age.max(0) as u32
    }
}

/// What a clinical validation event points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ValidationTarget {
    Pattern(Uuid),
    Insight(Uuid),
}

/// Where a validation signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSource {
    /// Inferred from a treatment change following a finding
    Implicit,
    /// Parent feedback
    Parent,
    /// Provider confirmation
    Provider,
}

/// A single validation event. Input signal only; it never overwrites the
/// originating pattern's statistics directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalValidation {
    pub id: Uuid,
    pub target: ValidationTarget,
    /// Signed strength; negative on negative feedback
    pub validation_strength: f64,
    pub source: ValidationSource,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Raw per-type alert counters kept by the store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AlertCounters {
    pub total_generated: u32,
    pub acknowledged: u32,
    pub helpful_count: u32,
    pub dismissed_count: u32,
}

/// Derived alert-effectiveness view, recomputed on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEffectiveness {
    pub alert_type: String,
    pub total_generated: u32,
    pub acknowledged: u32,
    pub helpful_count: u32,
    pub dismissed_count: u32,
    /// None when no alerts of this type have been generated
    pub effectiveness_score: Option<f64>,
}

/// Alert severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A fully-formed alert handed to the alert sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub child_id: Uuid,
    pub family_id: Uuid,
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// Structured values behind the decision
    pub data: Value,
    pub confidence: Option<f64>,
    /// Set when the alert was raised off a discovered pattern
    pub pattern_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Explicit user feedback on a generated alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertFeedback {
    pub alert_id: Uuid,
    pub user_id: Uuid,
    pub was_helpful: bool,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sleep quality bands reported by caregivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepQuality {
    VeryPoor,
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Observed mood during a behavior episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Calm,
    Happy,
    Anxious,
    Upset,
    ExtremelyUpset,
    Aggressive,
}

/// Appetite reported for a meal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealAppetite {
    None,
    Low,
    Normal,
    High,
}

/// Reaction observed after a meal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealReaction {
    None,
    MildDiscomfort,
    Vomiting,
    SevereReaction,
}

/// Sleep log observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepObservation {
    pub duration_minutes: f64,
    pub quality: Option<SleepQuality>,
    pub night_wakings: u32,
}

/// Behavior episode observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorObservation {
    /// 1-10 intensity scale
    pub intensity: u32,
    pub mood: Option<Mood>,
    pub duration_minutes: f64,
}

/// Symptom observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomObservation {
    pub name: String,
    /// 1-10 severity scale
    pub severity: u32,
    /// First time this symptom has been logged for the child
    pub is_new: bool,
}

/// Meal observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealObservation {
    pub appetite: Option<MealAppetite>,
    pub reaction: Option<MealReaction>,
}

/// A newly-recorded observation of a known log type.
///
/// Each variant carries a statically known shape, so the realtime heuristics
/// read typed fields instead of probing optional map keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "log_type", content = "data")]
pub enum Observation {
    Sleep(SleepObservation),
    Behavior(BehaviorObservation),
    Symptom(SymptomObservation),
    Meal(MealObservation),
}

impl Observation {
    pub fn log_type(&self) -> &'static str {
        match self {
            Observation::Sleep(_) => "sleep",
            Observation::Behavior(_) => "behavior",
            Observation::Symptom(_) => "symptom",
            Observation::Meal(_) => "meal",
        }
    }

    /// The observation's headline numeric value, used for baseline deviation.
    /// Meals carry no single magnitude and are skipped by the baseline check.
    pub fn primary_value(&self) -> Option<f64> {
        match self {
            Observation::Sleep(s) => Some(s.duration_minutes),
            Observation::Behavior(b) => Some(f64::from(b.intensity)),
            Observation::Symptom(s) => Some(f64::from(s.severity)),
            Observation::Meal(_) => None,
        }
    }
}

/// One positive detection produced by the realtime detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Alert category this detection maps to (e.g. `sleep_concern`)
    pub category: String,
    pub severity: Severity,
    /// In [0, 1]
    pub confidence: f64,
    pub title: String,
    pub description: String,
    /// Values that triggered the detection, sufficient to reconstruct the
    /// decision without re-querying raw logs
    pub data: Value,
    /// Set when the detection was triggered by a known pattern
    pub pattern_id: Option<Uuid>,
}

/// Outcome of evaluating one new observation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    /// Alerts that cleared the adaptive generation bar and were sent
    pub alerts_created: usize,
}
