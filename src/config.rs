//! Engine configuration
//!
//! All statistical tunables live in one immutable struct passed into each
//! component's constructor. Nothing in the engine reads thresholds from
//! globals, so two engines with different settings can coexist in one
//! process (and in one test binary).

use serde::{Deserialize, Serialize};

/// Default salt for the one-way cohort membership hash.
///
/// A static salt keeps membership hashes stable across runs but weakens the
/// irreversibility claim; deployments should supply their own managed secret
/// via [`EngineConfig::cohort_salt`].
pub const DEFAULT_COHORT_SALT: &str = "carelog-cohort-v1";

/// Immutable tuning parameters for every engine component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum observations before a metric or factor pair is considered
    pub min_sample_size: usize,
    /// |r| at which a correlation finding is recorded
    pub significant_correlation: f64,
    /// |r| at which a finding is promoted to a durable pattern
    pub high_confidence_threshold: f64,
    /// Candidate lags tested between input and output series
    pub candidate_lags_hours: Vec<i64>,
    /// Trailing window for baseline computation and default correlation range
    pub baseline_window_days: i64,
    /// How long a computed baseline stays valid
    pub baseline_validity_days: i64,
    /// Baseline deviation (in capped standard deviations) that triggers a finding
    pub deviation_trigger: f64,
    /// Deviation above which a baseline finding escalates from info to warning
    pub deviation_warning_threshold: f64,
    /// Minimum pattern confidence consulted by the realtime detector
    pub pattern_trigger_confidence: f64,
    /// Pattern confidence above which a trigger escalates from info to warning
    pub pattern_warning_confidence: f64,
    /// Default alert-generation confidence bar
    pub base_alert_threshold: f64,
    /// Bar applied when an alert type is usually ignored
    pub raised_alert_threshold: f64,
    /// Bar applied when an alert type is usually helpful
    pub lowered_alert_threshold: f64,
    /// Duplicate-alert suppression window
    pub alert_dedup_hours: i64,
    /// Cohort matches below this score are dropped from results
    pub cohort_result_floor: f64,
    /// Minimum score required to join a cohort anonymously
    pub cohort_join_threshold: f64,
    /// Salt for the one-way cohort membership hash
    pub cohort_salt: String,
    /// Lookback window for implicit treatment-change validation
    pub validation_lookback_days: i64,
    /// Lookback window for missed-dose counting
    pub missed_dose_lookback_days: i64,
    /// Missed doses within the lookback window that trigger an adherence alert
    pub missed_dose_trigger: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 14,
            significant_correlation: 0.5,
            high_confidence_threshold: 0.7,
            candidate_lags_hours: vec![0, 12, 24, 48],
            baseline_window_days: 90,
            baseline_validity_days: 30,
            deviation_trigger: 2.0,
            deviation_warning_threshold: 3.0,
            pattern_trigger_confidence: 0.6,
            pattern_warning_confidence: 0.8,
            base_alert_threshold: 0.6,
            raised_alert_threshold: 0.8,
            lowered_alert_threshold: 0.5,
            alert_dedup_hours: 24,
            cohort_result_floor: 0.5,
            cohort_join_threshold: 0.7,
            cohort_salt: DEFAULT_COHORT_SALT.to_string(),
            validation_lookback_days: 7,
            missed_dose_lookback_days: 7,
            missed_dose_trigger: 3,
        }
    }
}
