//! Realtime detection
//!
//! Evaluates a single newly-recorded observation synchronously at write
//! time, in a fixed priority order: baseline deviation first, then known
//! pattern triggers, then type-specific heuristics. The chain stops at the
//! first positive detection. Missed medication doses enter through a
//! separate path that does not participate in the chain.

use crate::alerts::AlertIntelligence;
use crate::config::EngineConfig;
use crate::error::InsightError;
use crate::store::{InsightStore, LogDataProvider};
use crate::types::{
    BehaviorObservation, DateRange, Detection, DetectionResult, MealAppetite, MealObservation,
    MealReaction, Mood, Observation, Severity, SleepObservation, SleepQuality, SymptomObservation,
};
use chrono::Utc;
use log::warn;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Evaluates new observations against baselines, known patterns, and
/// hand-tuned per-type heuristics.
pub struct RealtimeDetector {
    provider: Arc<dyn LogDataProvider>,
    store: Arc<dyn InsightStore>,
    alerts: AlertIntelligence,
    config: EngineConfig,
}

impl RealtimeDetector {
    pub fn new(
        provider: Arc<dyn LogDataProvider>,
        store: Arc<dyn InsightStore>,
        alerts: AlertIntelligence,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            store,
            alerts,
            config,
        }
    }

    /// Evaluate one new observation. At most one detection is produced; it
    /// is then offered to the adaptive alert layer.
    pub fn on_log_created(
        &self,
        child_id: Uuid,
        observation: &Observation,
    ) -> Result<DetectionResult, InsightError> {
        let mut detection = self.check_baseline_deviation(child_id, observation)?;
        if detection.is_none() {
            detection = self.check_pattern_trigger(child_id, observation)?;
        }
        if detection.is_none() {
            detection = Self::check_heuristics(observation);
        }

        self.finish(child_id, detection)
    }

    /// Evaluate a missed-dose event. Independent of the per-log priority
    /// chain: the adherence check runs on every missed dose and alerts with
    /// fixed confidence once the trailing-window count reaches the trigger.
    pub fn on_medication_missed(
        &self,
        child_id: Uuid,
        medication_id: Uuid,
    ) -> Result<DetectionResult, InsightError> {
        let range = DateRange::trailing_days(self.config.missed_dose_lookback_days);
        let missed = self
            .provider
            .missed_dose_count(child_id, medication_id, &range)?;

        if missed < self.config.missed_dose_trigger {
            return Ok(DetectionResult::default());
        }

        let detection = Detection {
            category: "medication_adherence".to_string(),
            severity: Severity::Warning,
            confidence: 0.85,
            title: "Repeated missed doses".to_string(),
            description: format!(
                "{missed} missed doses in the last {} days",
                self.config.missed_dose_lookback_days
            ),
            data: json!({
                "medication_id": medication_id,
                "missed_doses": missed,
                "lookback_days": self.config.missed_dose_lookback_days,
            }),
            pattern_id: None,
        };
        self.finish(child_id, Some(detection))
    }

    fn finish(
        &self,
        child_id: Uuid,
        detection: Option<Detection>,
    ) -> Result<DetectionResult, InsightError> {
        let mut result = DetectionResult::default();
        let Some(detection) = detection else {
            return Ok(result);
        };

        match self.alerts.offer(child_id, &detection) {
            Ok(Some(_)) => result.alerts_created += 1,
            Ok(None) => {}
            // Alert emission is best-effort; the detection still stands
            Err(e) => warn!("alert generation failed for {}: {e}", detection.category),
        }
        result.detections.push(detection);
        Ok(result)
    }

    /// Priority 1: deviation from any stored baseline whose metric name
    /// prefix-matches the incoming log type.
    fn check_baseline_deviation(
        &self,
        child_id: Uuid,
        observation: &Observation,
    ) -> Result<Option<Detection>, InsightError> {
        let Some(value) = observation.primary_value() else {
            return Ok(None);
        };
        let log_type = observation.log_type();
        let now = Utc::now();

        for baseline in self.store.baselines_for_child(child_id)? {
            // Expired baselines are skipped rather than refreshed here;
            // recomputation is the estimator's job
            if !baseline.metric_name.starts_with(log_type) || baseline.valid_until < now {
                continue;
            }
            // Spread capped below at 1 so near-constant baselines don't
            // turn tiny shifts into huge deviations
            let deviation = (value - baseline.mean).abs() / baseline.std_dev.max(1.0);
            if deviation <= self.config.deviation_trigger {
                continue;
            }

            let severity = if deviation <= self.config.deviation_warning_threshold {
                Severity::Info
            } else {
                Severity::Warning
            };
            return Ok(Some(Detection {
                category: format!("{log_type}_deviation"),
                severity,
                confidence: (0.5 + 0.15 * deviation).min(0.95),
                title: format!("Unusual {} reading", baseline.metric_name),
                description: format!(
                    "{} of {value:.1} is {deviation:.1} standard deviations from the usual {:.1}",
                    baseline.metric_name, baseline.mean
                ),
                data: json!({
                    "metric": baseline.metric_name,
                    "value": value,
                    "baseline_mean": baseline.mean,
                    "baseline_std_dev": baseline.std_dev,
                    "deviation": deviation,
                }),
                pattern_id: None,
            }));
        }
        Ok(None)
    }

    /// Priority 2: a known active pattern whose input factor prefix-matches
    /// the incoming log type and whose confidence clears the trigger bar.
    fn check_pattern_trigger(
        &self,
        child_id: Uuid,
        observation: &Observation,
    ) -> Result<Option<Detection>, InsightError> {
        let log_type = observation.log_type();

        for pattern in self.store.active_patterns(child_id)? {
            if !pattern.input_factor.starts_with(log_type)
                || pattern.confidence_score < self.config.pattern_trigger_confidence
            {
                continue;
            }

            let severity = if pattern.confidence_score > self.config.pattern_warning_confidence {
                Severity::Warning
            } else {
                Severity::Info
            };
            return Ok(Some(Detection {
                category: "pattern_alert".to_string(),
                severity,
                confidence: pattern.confidence_score,
                title: format!("Watch for {}", pattern.output_factor),
                description: format!(
                    "{} has historically been followed by {} within {}h",
                    pattern.input_factor, pattern.output_factor, pattern.lag_hours
                ),
                data: json!({
                    "input_factor": pattern.input_factor,
                    "output_factor": pattern.output_factor,
                    "lag_hours": pattern.lag_hours,
                    "correlation": pattern.correlation_strength,
                    "pattern_confidence": pattern.confidence_score,
                }),
                pattern_id: Some(pattern.id),
            }));
        }
        Ok(None)
    }

    /// Priority 3: hand-tuned per-type heuristics, reached only when the
    /// statistical checks found nothing.
    fn check_heuristics(observation: &Observation) -> Option<Detection> {
        match observation {
            Observation::Sleep(sleep) => Self::check_sleep(sleep),
            Observation::Behavior(behavior) => Self::check_behavior(behavior),
            Observation::Symptom(symptom) => Self::check_symptom(symptom),
            Observation::Meal(meal) => Self::check_meal(meal),
        }
    }

    fn check_sleep(sleep: &SleepObservation) -> Option<Detection> {
        let short_sleep = sleep.duration_minutes < 360.0;
        let poor_quality = matches!(
            sleep.quality,
            Some(SleepQuality::Poor) | Some(SleepQuality::VeryPoor)
        );
        let frequent_wakings = sleep.night_wakings >= 3;

        let met = usize::from(short_sleep) + usize::from(poor_quality) + usize::from(frequent_wakings);
        if met < 2 {
            return None;
        }

        Some(Detection {
            category: "sleep_concern".to_string(),
            severity: if met == 3 {
                Severity::Warning
            } else {
                Severity::Info
            },
            confidence: 0.55 + 0.1 * met as f64,
            title: "Disrupted sleep".to_string(),
            description: format!(
                "{:.0} minutes of sleep with {} night wakings",
                sleep.duration_minutes, sleep.night_wakings
            ),
            data: json!({
                "duration_minutes": sleep.duration_minutes,
                "quality": sleep.quality,
                "night_wakings": sleep.night_wakings,
                "criteria_met": met,
            }),
            pattern_id: None,
        })
    }

    fn check_behavior(behavior: &BehaviorObservation) -> Option<Detection> {
        let extreme_mood = matches!(
            behavior.mood,
            Some(Mood::Aggressive) | Some(Mood::ExtremelyUpset)
        );
        let flagged =
            behavior.intensity >= 8 || extreme_mood || behavior.duration_minutes >= 60.0;
        if !flagged {
            return None;
        }

        let critical = behavior.intensity >= 9 || behavior.duration_minutes >= 90.0;
        Some(Detection {
            category: "behavior_concern".to_string(),
            severity: if critical {
                Severity::Critical
            } else {
                Severity::Warning
            },
            confidence: if critical { 0.9 } else { 0.75 },
            title: "Intense behavior episode".to_string(),
            description: format!(
                "Episode at intensity {} lasting {:.0} minutes",
                behavior.intensity, behavior.duration_minutes
            ),
            data: json!({
                "intensity": behavior.intensity,
                "mood": behavior.mood,
                "duration_minutes": behavior.duration_minutes,
            }),
            pattern_id: None,
        })
    }

    fn check_symptom(symptom: &SymptomObservation) -> Option<Detection> {
        let flagged = symptom.severity >= 7 || (symptom.is_new && symptom.severity >= 5);
        if !flagged {
            return None;
        }

        let critical = symptom.severity >= 9;
        Some(Detection {
            category: "symptom_concern".to_string(),
            severity: if critical {
                Severity::Critical
            } else {
                Severity::Warning
            },
            confidence: (0.5 + 0.05 * f64::from(symptom.severity)).min(0.95),
            title: format!("Severe symptom: {}", symptom.name),
            description: format!(
                "{} at severity {}{}",
                symptom.name,
                symptom.severity,
                if symptom.is_new { " (new symptom)" } else { "" }
            ),
            data: json!({
                "symptom": symptom.name,
                "severity": symptom.severity,
                "is_new": symptom.is_new,
            }),
            pattern_id: None,
        })
    }

    fn check_meal(meal: &MealObservation) -> Option<Detection> {
        let no_appetite = meal.appetite == Some(MealAppetite::None);
        let bad_reaction = matches!(
            meal.reaction,
            Some(MealReaction::Vomiting) | Some(MealReaction::SevereReaction)
        );
        if !no_appetite && !bad_reaction {
            return None;
        }

        let critical = meal.reaction == Some(MealReaction::SevereReaction);
        Some(Detection {
            category: "meal_concern".to_string(),
            severity: if critical {
                Severity::Critical
            } else {
                Severity::Warning
            },
            confidence: if critical { 0.85 } else { 0.7 },
            title: "Concerning meal".to_string(),
            description: match (no_appetite, &meal.reaction) {
                (_, Some(MealReaction::SevereReaction)) => {
                    "Severe reaction observed after eating".to_string()
                }
                (_, Some(MealReaction::Vomiting)) => "Vomiting after eating".to_string(),
                _ => "No appetite at mealtime".to_string(),
            },
            data: json!({
                "appetite": meal.appetite,
                "reaction": meal.reaction,
            }),
            pattern_id: None,
        })
    }
}
