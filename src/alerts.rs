//! Adaptive alert generation
//!
//! Tracks how useful past alerts of each category have been for each child
//! and moves the confidence bar for future generation accordingly: alert
//! types that are usually dismissed must clear a higher bar, types that are
//! usually helpful a lower one. Also suppresses duplicates inside a rolling
//! window and feeds explicit feedback back into pattern confirmation counts.

use crate::config::EngineConfig;
use crate::error::InsightError;
use crate::store::{AlertSink, ChildDirectory, InsightStore};
use crate::types::{Alert, AlertCounters, AlertEffectiveness, AlertFeedback, Detection};
use chrono::{Duration, Utc};
use log::{debug, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Adaptive threshold and feedback layer between detections and the sink.
pub struct AlertIntelligence {
    store: Arc<dyn InsightStore>,
    sink: Arc<dyn AlertSink>,
    directory: Arc<dyn ChildDirectory>,
    config: EngineConfig,
}

impl AlertIntelligence {
    pub fn new(
        store: Arc<dyn InsightStore>,
        sink: Arc<dyn AlertSink>,
        directory: Arc<dyn ChildDirectory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            sink,
            directory,
            config,
        }
    }

    /// Weighted effectiveness of past alerts, clamped to [0, 1].
    /// `None` means no history: nothing of this type has been generated yet.
    pub fn effectiveness_score(counters: &AlertCounters) -> Option<f64> {
        if counters.total_generated == 0 {
            return None;
        }
        let total = f64::from(counters.total_generated);
        let score = 0.3 * f64::from(counters.acknowledged) / total
            + 0.5 * f64::from(counters.helpful_count) / total
            - 0.2 * f64::from(counters.dismissed_count) / total;
        Some(score.clamp(0.0, 1.0))
    }

    /// Derived effectiveness view, recomputed from raw counters on demand.
    pub fn alert_effectiveness(
        &self,
        child_id: Uuid,
        alert_type: &str,
    ) -> Result<AlertEffectiveness, InsightError> {
        let counters = self.store.alert_counters(child_id, alert_type)?;
        Ok(AlertEffectiveness {
            alert_type: alert_type.to_string(),
            total_generated: counters.total_generated,
            acknowledged: counters.acknowledged,
            helpful_count: counters.helpful_count,
            dismissed_count: counters.dismissed_count,
            effectiveness_score: Self::effectiveness_score(&counters),
        })
    }

    /// The confidence bar currently applied to this alert type for this child
    pub fn generation_threshold(
        &self,
        child_id: Uuid,
        alert_type: &str,
    ) -> Result<f64, InsightError> {
        let counters = self.store.alert_counters(child_id, alert_type)?;
        Ok(match Self::effectiveness_score(&counters) {
            // Usually ignored: demand more confidence
            Some(score) if score < 0.3 => self.config.raised_alert_threshold,
            // Usually helpful: allow more through
            Some(score) if score > 0.7 => self.config.lowered_alert_threshold,
            _ => self.config.base_alert_threshold,
        })
    }

    /// Decide whether a candidate finding should become an alert.
    ///
    /// A duplicate of the same type for the same child inside the dedup
    /// window is suppressed outright; otherwise the candidate's confidence
    /// must clear the adaptive threshold.
    pub fn should_generate(
        &self,
        child_id: Uuid,
        alert_type: &str,
        confidence: f64,
    ) -> Result<bool, InsightError> {
        if let Some(last) = self.store.latest_alert_at(child_id, alert_type)? {
            let window = Duration::hours(self.config.alert_dedup_hours);
            if Utc::now() - last < window {
                debug!("suppressing duplicate {alert_type} alert for child {child_id}");
                return Ok(false);
            }
        }
        Ok(confidence >= self.generation_threshold(child_id, alert_type)?)
    }

    /// Offer a detection for alert generation. Returns the alert if it was
    /// accepted and recorded; delivery to the sink is best-effort.
    pub fn offer(
        &self,
        child_id: Uuid,
        detection: &Detection,
    ) -> Result<Option<Alert>, InsightError> {
        if !self.should_generate(child_id, &detection.category, detection.confidence)? {
            return Ok(None);
        }

        let family_id = self.directory.family_of(child_id)?;
        let alert = Alert {
            id: Uuid::new_v4(),
            child_id,
            family_id,
            alert_type: detection.category.clone(),
            severity: detection.severity,
            title: detection.title.clone(),
            description: detection.description.clone(),
            data: detection.data.clone(),
            confidence: Some(detection.confidence),
            pattern_id: detection.pattern_id,
            created_at: Utc::now(),
        };

        self.store.record_alert(&alert)?;
        if let Err(e) = self.sink.send(&alert) {
            warn!("failed to deliver {} alert: {e}", alert.alert_type);
        }
        Ok(Some(alert))
    }

    /// Ingest explicit user feedback on a generated alert.
    ///
    /// Positive feedback on an alert tied to a pattern also increments that
    /// pattern's confirmation count.
    pub fn process_feedback(
        &self,
        alert_id: Uuid,
        user_id: Uuid,
        was_helpful: bool,
        comment: Option<String>,
    ) -> Result<(), InsightError> {
        let alert = self
            .store
            .alert(alert_id)?
            .ok_or_else(|| InsightError::NotFound(format!("alert {alert_id}")))?;

        self.store.record_feedback(AlertFeedback {
            alert_id,
            user_id,
            was_helpful,
            comment,
            created_at: Utc::now(),
        })?;

        if was_helpful {
            if let Some(pattern_id) = alert.pattern_id {
                if let Some(mut pattern) = self.store.pattern(pattern_id)? {
                    pattern.times_confirmed += 1;
                    pattern.last_updated = Utc::now();
                    self.store.update_pattern(pattern)?;
                }
            }
        }
        Ok(())
    }
}
